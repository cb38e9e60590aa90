//! Shared data models for the pixnoise service.
//!
//! This crate provides Serde-serializable types for:
//! - Perturbation parameters and output image formats
//! - Video processing tasks and their progress snapshots
//! - Encoding constants shared by the FFmpeg pipeline

pub mod encoding;
pub mod error;
pub mod params;
pub mod task;
pub mod video;

// Re-export common types
pub use error::{ModelError, ModelResult};
pub use params::{
    parse_form_bool, parse_form_f64, OutputFormat, PerturbParams, API_JPEG_QUALITY,
    DEFAULT_PERTURB_PROB,
};
pub use task::{TaskId, TaskProgress, TaskStatus};
pub use video::VideoMetadata;
