//! Locating the FFmpeg and FFprobe executables.
//!
//! The service ships with an `ffmpeg` binary beside it, so lookup prefers an
//! explicit override, then the executable's directory, then the working
//! directory, and only then `PATH`.

use std::env::consts::EXE_SUFFIX;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Environment variable overriding the ffmpeg location.
pub const FFMPEG_ENV: &str = "PIXNOISE_FFMPEG";
/// Environment variable overriding the ffprobe location.
pub const FFPROBE_ENV: &str = "PIXNOISE_FFPROBE";

/// Resolved tool locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl FfmpegPaths {
    /// Use explicit locations.
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Resolve both tools from the environment.
    pub fn resolve() -> MediaResult<Self> {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf));
        let cwd = std::env::current_dir().ok();

        let ffmpeg = locate(
            "ffmpeg",
            std::env::var_os(FFMPEG_ENV).map(PathBuf::from),
            exe_dir.as_deref(),
            cwd.as_deref(),
        )
        .ok_or(MediaError::FfmpegNotFound)?;
        let ffprobe = locate(
            "ffprobe",
            std::env::var_os(FFPROBE_ENV).map(PathBuf::from),
            exe_dir.as_deref(),
            cwd.as_deref(),
        )
        .ok_or(MediaError::FfprobeNotFound)?;

        debug!(ffmpeg = %ffmpeg.display(), ffprobe = %ffprobe.display(), "Resolved FFmpeg tools");
        Ok(Self { ffmpeg, ffprobe })
    }
}

/// Find `tool` by override, then next to the executable, then in the working
/// directory, then on `PATH`.
pub fn locate(
    tool: &str,
    override_path: Option<PathBuf>,
    exe_dir: Option<&Path>,
    cwd: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(path) = override_path {
        return path.is_file().then_some(path);
    }

    let file_name = format!("{}{}", tool, EXE_SUFFIX);
    [exe_dir, cwd]
        .into_iter()
        .flatten()
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
        .or_else(|| which::which(tool).ok())
}
