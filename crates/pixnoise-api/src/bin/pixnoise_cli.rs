use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use pixnoise_media::{process_folder, process_image_file, FfmpegPaths, StepCallback, VideoPipeline};
use pixnoise_models::{PerturbParams, DEFAULT_PERTURB_PROB};

#[derive(Parser, Debug)]
#[command(name = "pixnoise-cli")]
#[command(about = "Perturb images and videos from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Perturb one image into a directory, keeping its name
    Image {
        input: PathBuf,
        output_dir: PathBuf,
        #[command(flatten)]
        perturb: PerturbArgs,
    },
    /// Perturb every image in a directory
    Folder {
        input_dir: PathBuf,
        output_dir: PathBuf,
        #[command(flatten)]
        perturb: PerturbArgs,
        /// Worker threads (default: all cores but two)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Perturb a video frame by frame
    Video {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        perturb: PerturbArgs,
        /// Frame worker threads (default: all cores but two)
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[derive(Args, Debug)]
struct PerturbArgs {
    /// Share of pixels to perturb (0-1)
    #[arg(long, default_value_t = DEFAULT_PERTURB_PROB)]
    prob: f64,
    /// Paint perturbed pixels red
    #[arg(long)]
    debug: bool,
}

impl PerturbArgs {
    fn params(&self) -> Result<PerturbParams> {
        Ok(PerturbParams::new(self.prob, self.debug)?)
    }
}

fn stderr_progress() -> StepCallback {
    Arc::new(|current: u64, total: u64, info: &str| {
        eprint!("\r{}: {}/{}", info, current, total);
        if current >= total {
            eprintln!();
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    pixnoise_api::init_tracing();

    match Cli::parse().command {
        Command::Image {
            input,
            output_dir,
            perturb,
        } => {
            let params = perturb.params()?;
            let output = tokio::task::spawn_blocking(move || process_image_file(&input, &output_dir, &params))
                .await??;
            println!("{}", output.display());
        }
        Command::Folder {
            input_dir,
            output_dir,
            perturb,
            workers,
        } => {
            let params = perturb.params()?;
            let report = tokio::task::spawn_blocking(move || {
                process_folder(&input_dir, &output_dir, &params, workers, Some(stderr_progress()))
            })
            .await??;
            for (name, reason) in &report.failed {
                eprintln!("failed: {}: {}", name, reason);
            }
            println!("{} of {} images processed", report.processed, report.total());
        }
        Command::Video {
            input,
            output,
            perturb,
            workers,
        } => {
            let params = perturb.params()?;
            let pipeline = VideoPipeline::new(FfmpegPaths::resolve()?).with_frame_workers(workers);
            let metadata = pipeline
                .process(&input, &output, params, Some(stderr_progress()))
                .await
                .with_context(|| format!("Failed to process {}", input.display()))?;
            println!(
                "{} ({} frames at {:.2} fps, audio: {})",
                output.display(),
                metadata.total_frames,
                metadata.fps,
                metadata.has_audio
            );
        }
    }

    Ok(())
}
