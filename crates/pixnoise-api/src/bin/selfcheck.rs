use std::path::Path;

use tokio::process::Command;

use pixnoise_api::ApiConfig;
use pixnoise_media::FfmpegPaths;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = ApiConfig::from_env();

    println!(
        "pixnoise-selfcheck: starting with temp_dir={}",
        config.temp_dir.display()
    );
    ensure_temp_dir(&config.temp_dir).await?;
    let paths = FfmpegPaths::resolve()?;
    ensure_runs(&paths.ffmpeg).await?;
    ensure_runs(&paths.ffprobe).await?;

    println!("pixnoise-selfcheck: ok");
    Ok(())
}

async fn ensure_temp_dir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path.as_ref()).await?;
    Ok(())
}

async fn ensure_runs(program: &Path) -> anyhow::Result<()> {
    let output = Command::new(program)
        .arg("-version")
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("{} not available: {}", program.display(), e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "{} -version failed: {:?}",
            program.display(),
            output.status
        ));
    }
    let version = String::from_utf8_lossy(&output.stdout);
    println!(
        "pixnoise-selfcheck: {}",
        version.lines().next().unwrap_or_default()
    );
    Ok(())
}
