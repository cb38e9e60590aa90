//! Video result metadata.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Metadata reported once a video has been processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoMetadata {
    /// Source frame rate
    pub fps: f64,
    /// Frame count reported by the probe
    pub total_frames: u64,
    /// Whether an audio track was carried over
    pub has_audio: bool,
}
