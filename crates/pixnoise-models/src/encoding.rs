//! Encoding constants for the frame-by-frame video pipeline.

/// Prefix of every extracted frame file.
pub const FRAME_PREFIX: &str = "frame_";
/// FFmpeg image2 pattern for extracted frames.
pub const FRAME_PATTERN: &str = "frame_%06d.jpg";
/// JPEG quality scale used when extracting frames (`-q:v`, 2 = high).
pub const FRAME_EXTRACT_QUALITY: &str = "2";

/// JPEG quality for perturbed frames.
pub const FRAME_JPEG_QUALITY: u8 = 95;

/// Output video codec.
pub const OUTPUT_VIDEO_CODEC: &str = "libx264";
/// Target output bitrate.
pub const OUTPUT_VIDEO_BITRATE: &str = "1800k";
/// Output pixel format.
pub const OUTPUT_PIX_FMT: &str = "yuv420p";
/// x264 preset.
pub const OUTPUT_PRESET: &str = "medium";
/// H.264 profile.
pub const OUTPUT_PROFILE: &str = "main";
/// H.264 level.
pub const OUTPUT_LEVEL: &str = "4.1";
/// Audio codec used when merging or re-encoding audio.
pub const OUTPUT_AUDIO_CODEC: &str = "aac";

/// Encoder tag written into the merged container.
pub const DISGUISE_ENCODER: &str = "Lavf58.20.100";
/// Compatible brands written into the merged container.
pub const DISGUISE_COMPATIBLE_BRANDS: &str = "isom/iso2/avc1/mp41";

/// Descriptive metadata keys blanked in the merged output.
pub const BLANKED_METADATA_KEYS: &[&str] = &[
    "title",
    "artist",
    "album",
    "date",
    "genre",
    "comment",
    "description",
    "copyright",
    "encoded_by",
    "creation_time",
];

/// File names inside a per-task work directory.
pub const WORK_DIR_PREFIX: &str = "catch_";
pub const FRAMES_DIR: &str = "frames";
pub const PROCESSED_FRAMES_DIR: &str = "processed_frames";
pub const AUDIO_FILE: &str = "audio.aac";
pub const TEMP_VIDEO_FILE: &str = "temp_video.mp4";

/// Image extensions picked up when processing a folder of frames.
pub const FOLDER_IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".bmp", ".gif"];

/// Full list of `-metadata key=value` pairs applied when merging audio back.
pub fn merge_metadata() -> Vec<(String, String)> {
    let mut entries = vec![
        ("encoder".to_string(), DISGUISE_ENCODER.to_string()),
        (
            "compatible_brands".to_string(),
            DISGUISE_COMPATIBLE_BRANDS.to_string(),
        ),
    ];
    entries.extend(
        BLANKED_METADATA_KEYS
            .iter()
            .map(|k| (k.to_string(), String::new())),
    );
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_metadata_blanks_descriptive_keys() {
        let entries = merge_metadata();
        assert_eq!(entries[0], ("encoder".to_string(), "Lavf58.20.100".to_string()));
        assert_eq!(entries.len(), 2 + BLANKED_METADATA_KEYS.len());
        assert!(entries
            .iter()
            .any(|(k, v)| k == "creation_time" && v.is_empty()));
    }
}
