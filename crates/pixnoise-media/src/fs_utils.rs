//! Filesystem helpers for work directories and outputs.

use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Create a directory and its parents if missing.
pub async fn ensure_dir(path: impl AsRef<Path>) -> MediaResult<()> {
    fs::create_dir_all(path.as_ref()).await?;
    Ok(())
}

/// Remove a directory tree, treating "already gone" as success.
pub async fn remove_dir_if_exists(path: impl AsRef<Path>) -> MediaResult<()> {
    match fs::remove_dir_all(path.as_ref()).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(MediaError::from(e)),
        _ => Ok(()),
    }
}

/// Remove a file, treating "already gone" as success.
pub async fn remove_file_if_exists(path: impl AsRef<Path>) -> MediaResult<()> {
    match fs::remove_file(path.as_ref()).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(MediaError::from(e)),
        _ => Ok(()),
    }
}

/// Move `src` to `dst`, copying when the two sit on different filesystems.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());

    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        // EXDEV
        Err(e) if e.raw_os_error() == Some(18) => {
            tracing::debug!(
                "Cross-device move, copying {} -> {}",
                src.display(),
                dst.display()
            );
            let staging = dst.with_extension("partial");
            fs::copy(src, &staging).await?;
            if let Err(e) = fs::rename(&staging, dst).await {
                let _ = fs::remove_file(&staging).await;
                return Err(e.into());
            }
            if let Err(e) = fs::remove_file(src).await {
                tracing::warn!("Could not remove {} after copy: {}", src.display(), e);
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
