//! Pixel perturbation and FFmpeg CLI wrapper.
//!
//! This crate provides:
//! - Sparse, near-invisible pixel perturbation of images
//! - Parallel processing of frame folders
//! - Type-safe FFmpeg command building with `-progress pipe:2` parsing
//! - The frame-by-frame video pipeline (split, perturb, reassemble, remux audio)

pub mod command;
pub mod error;
pub mod fs_utils;
pub mod images;
pub mod paths;
pub mod perturb;
pub mod probe;
pub mod progress;
pub mod video;

pub use command::{FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use images::{
    default_frame_workers, process_folder, process_folder_until, process_image_bytes, process_image_file,
    FolderReport,
};
pub use paths::FfmpegPaths;
pub use perturb::{perturb_pixels, perturb_pixels_with_rng};
pub use probe::{probe_video, VideoInfo};
pub use progress::{FfmpegProgress, StepCallback};
pub use video::VideoPipeline;
