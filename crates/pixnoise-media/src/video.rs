//! Frame-by-frame video pipeline.
//!
//! The video is split into JPEG frames, every frame is perturbed, the frames are
//! re-encoded to H.264 and the original audio is muxed back in. All
//! intermediate files live in a `catch_<stem>` directory next to the output,
//! which is removed whether the run succeeds or not.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use pixnoise_models::encoding::{
    merge_metadata, AUDIO_FILE, FRAMES_DIR, FRAME_EXTRACT_QUALITY, FRAME_PATTERN, FRAME_PREFIX,
    OUTPUT_AUDIO_CODEC, OUTPUT_LEVEL, OUTPUT_PIX_FMT, OUTPUT_PRESET, OUTPUT_PROFILE,
    OUTPUT_VIDEO_BITRATE, OUTPUT_VIDEO_CODEC, PROCESSED_FRAMES_DIR, TEMP_VIDEO_FILE,
    WORK_DIR_PREFIX,
};
use pixnoise_models::{PerturbParams, VideoMetadata};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{ensure_dir, move_file, remove_dir_if_exists};
use crate::images::process_folder_until;
use crate::paths::FfmpegPaths;
use crate::probe::probe_video;
use crate::progress::StepCallback;

/// Step label reported while frames are extracted.
pub const SPLIT_STEP: &str = "Splitting video into frames";

/// Intermediate file layout for one run.
#[derive(Debug, Clone)]
pub struct WorkDir {
    pub root: PathBuf,
    pub frames: PathBuf,
    pub processed_frames: PathBuf,
    pub audio: PathBuf,
    pub temp_video: PathBuf,
}

impl WorkDir {
    /// Layout for `output`: `<output dir>/catch_<output stem>/...`.
    pub fn for_output(output: &Path) -> Self {
        let parent = output.parent().unwrap_or_else(|| Path::new("."));
        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        let root = parent.join(format!("{}{}", WORK_DIR_PREFIX, stem));
        Self {
            frames: root.join(FRAMES_DIR),
            processed_frames: root.join(PROCESSED_FRAMES_DIR),
            audio: root.join(AUDIO_FILE),
            temp_video: root.join(TEMP_VIDEO_FILE),
            root,
        }
    }
}

/// Runs the full perturbation pipeline for one video.
#[derive(Debug, Clone)]
pub struct VideoPipeline {
    paths: FfmpegPaths,
    frame_workers: Option<usize>,
    step_timeout_secs: Option<u64>,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl VideoPipeline {
    pub fn new(paths: FfmpegPaths) -> Self {
        Self {
            paths,
            frame_workers: None,
            step_timeout_secs: None,
            cancel_rx: None,
        }
    }

    /// Threads used to perturb frames (default: all cores but two).
    pub fn with_frame_workers(mut self, workers: Option<usize>) -> Self {
        self.frame_workers = workers;
        self
    }

    /// Kill any single FFmpeg step running longer than this.
    pub fn with_step_timeout(mut self, secs: Option<u64>) -> Self {
        self.step_timeout_secs = secs;
        self
    }

    /// Stop the run once `cancel_rx` turns true. Running FFmpeg steps are
    /// killed, frames not yet perturbed are skipped and the work directory is
    /// still removed.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    fn runner(&self) -> FfmpegRunner {
        let runner = FfmpegRunner::new(&self.paths.ffmpeg).with_timeout(self.step_timeout_secs);
        match &self.cancel_rx {
            Some(rx) => runner.with_cancel(rx.clone()),
            None => runner,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    fn ensure_not_cancelled(&self) -> MediaResult<()> {
        if self.is_cancelled() {
            Err(MediaError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Process `input` into `output`.
    pub async fn process(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        params: PerturbParams,
        progress: Option<StepCallback>,
    ) -> MediaResult<VideoMetadata> {
        let input = input.as_ref();
        let output = output.as_ref();
        params.check()?;

        let work = WorkDir::for_output(output);
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent).await?;
        }

        let started = Instant::now();
        let result = self.run_steps(input, output, &work, params, progress).await;

        if let Err(e) = remove_dir_if_exists(&work.root).await {
            warn!("Failed to remove work directory {}: {}", work.root.display(), e);
        }

        match &result {
            Ok(meta) => info!(
                fps = meta.fps,
                total_frames = meta.total_frames,
                has_audio = meta.has_audio,
                elapsed_secs = started.elapsed().as_secs_f64(),
                "Video processed: {}",
                output.display()
            ),
            Err(e) => warn!("Video processing failed for {}: {}", input.display(), e),
        }
        result
    }

    async fn run_steps(
        &self,
        input: &Path,
        output: &Path,
        work: &WorkDir,
        params: PerturbParams,
        progress: Option<StepCallback>,
    ) -> MediaResult<VideoMetadata> {
        self.ensure_not_cancelled()?;
        let (fps, total_frames, source_has_audio) = self
            .video_to_frames(input, &work.frames, progress.clone())
            .await
            .map_err(|e| step_failed("Failed to split video into frames", e))?;

        self.ensure_not_cancelled()?;
        let frames_dir = work.frames.clone();
        let processed_dir = work.processed_frames.clone();
        let workers = self.frame_workers;
        let cancel_rx = self.cancel_rx.clone();
        let report = tokio::task::spawn_blocking(move || {
            let cancelled = || cancel_rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false);
            process_folder_until(&frames_dir, &processed_dir, &params, workers, progress, cancelled)
        })
        .await
        .map_err(|e| MediaError::internal(format!("Frame worker panicked: {}", e)))??;

        if !report.failed.is_empty() {
            let (name, reason) = &report.failed[0];
            return Err(MediaError::pipeline(format!(
                "Failed to perturb {} of {} frames (first: {}: {})",
                report.failed.len(),
                report.total(),
                name,
                reason
            )));
        }

        let has_audio = source_has_audio && self.extract_audio(input, &work.audio).await;
        self.ensure_not_cancelled()?;

        self.frames_to_video(&work.processed_frames, &work.temp_video, fps)
            .await
            .map_err(|e| step_failed("Failed to assemble frames into video", e))?;

        if has_audio {
            self.merge_video_audio(&work.temp_video, &work.audio, output)
                .await
                .map_err(|e| step_failed("Failed to merge video and audio", e))?;
        } else {
            move_file(&work.temp_video, output).await?;
        }

        Ok(VideoMetadata {
            fps,
            total_frames,
            has_audio,
        })
    }

    /// Extract every frame as high quality JPEG. Returns `(fps, total_frames, has_audio)`.
    pub async fn video_to_frames(
        &self,
        input: &Path,
        frames_dir: &Path,
        progress: Option<StepCallback>,
    ) -> MediaResult<(f64, u64, bool)> {
        ensure_dir(frames_dir).await?;

        let info = probe_video(&self.paths.ffprobe, input).await?;
        info!(
            "Video info: {} ({:.2} fps, {} frames, {}x{})",
            input.display(),
            info.fps,
            info.total_frames,
            info.width,
            info.height
        );

        let cmd = FfmpegCommand::new(input, frames_dir.join(FRAME_PATTERN))
            .output_args(["-q:v", FRAME_EXTRACT_QUALITY]);

        let total = info.total_frames;
        let started = Instant::now();
        self.runner()
            .run_with_progress(&cmd, move |p| {
                if let Some(cb) = progress.as_ref() {
                    cb(p.frames_done(total), total, SPLIT_STEP);
                }
            })
            .await?;
        record_step("split", started);

        let extracted = list_frames(frames_dir).await?.len();
        if extracted == 0 {
            return Err(MediaError::InvalidVideo("No frames extracted".to_string()));
        }
        info!("Extracted {} frames", extracted);

        Ok((info.fps, info.total_frames, info.has_audio))
    }

    /// Extract the audio track. Stream copy is tried first, then an AAC
    /// re-encode. Returns whether `audio_path` holds usable audio.
    pub async fn extract_audio(&self, input: &Path, audio_path: &Path) -> bool {
        let started = Instant::now();
        let copy = FfmpegCommand::new(input, audio_path)
            .no_video()
            .output_args(["-acodec", "copy"]);

        let ok = match self.runner().run(&copy).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Audio stream copy failed ({}), re-encoding to AAC", e);
                let reencode = FfmpegCommand::new(input, audio_path)
                    .no_video()
                    .audio_codec(OUTPUT_AUDIO_CODEC);
                match self.runner().run(&reencode).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Audio extraction failed, producing silent video: {}", e);
                        false
                    }
                }
            }
        };
        record_step("extract_audio", started);
        ok
    }

    /// Encode a directory of frames to H.264 at `fps`.
    pub async fn frames_to_video(&self, frames_dir: &Path, output: &Path, fps: f64) -> MediaResult<()> {
        let frames = list_frames(frames_dir).await?;
        let first = frames
            .first()
            .ok_or_else(|| MediaError::pipeline(format!("No frames found in {}", frames_dir.display())))?;

        let (width, height) = image::image_dimensions(first)?;

        let cmd = FfmpegCommand::new(frames_dir.join(FRAME_PATTERN), output)
            .input_frame_rate(fps)
            .input_args(["-f", "image2"])
            .input_args(["-s".to_string(), format!("{}x{}", width, height)])
            .output_args(["-vcodec", OUTPUT_VIDEO_CODEC])
            .video_bitrate(OUTPUT_VIDEO_BITRATE)
            .output_args(["-pix_fmt", OUTPUT_PIX_FMT])
            .preset(OUTPUT_PRESET)
            .output_args(["-profile:v", OUTPUT_PROFILE, "-level", OUTPUT_LEVEL]);

        let started = Instant::now();
        self.runner().run(&cmd).await?;
        record_step("encode", started);
        info!("Encoded {} frames into {}", frames.len(), output.display());
        Ok(())
    }

    /// Mux `audio` into `video`, copying the video stream and scrubbing
    /// descriptive container metadata.
    pub async fn merge_video_audio(&self, video: &Path, audio: &Path, output: &Path) -> MediaResult<()> {
        let cmd = merge_metadata().into_iter().fold(
            FfmpegCommand::new(video, output)
                .add_input(audio)
                .video_codec("copy")
                .audio_codec(OUTPUT_AUDIO_CODEC)
                .map("0:v:0")
                .map("1:a:0")
                .shortest(),
            |cmd, (key, value)| cmd.metadata(key, value),
        );

        let started = Instant::now();
        self.runner().run(&cmd).await?;
        record_step("merge_audio", started);
        Ok(())
    }
}

/// Sorted frame files (`frame_*` with a jpg/jpeg/png extension) in `dir`.
pub async fn list_frames(dir: &Path) -> MediaResult<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut frames = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_lowercase();
        let is_frame = name.starts_with(FRAME_PREFIX)
            && (name.ends_with(".jpg") || name.ends_with(".jpeg") || name.ends_with(".png"));
        if is_frame {
            frames.push(entry.path());
        }
    }
    frames.sort();
    Ok(frames)
}

/// Prefix a step failure with its context. Cancellation passes through.
fn step_failed(context: &str, e: MediaError) -> MediaError {
    match e {
        MediaError::Cancelled => e,
        e => MediaError::pipeline(format!("{}: {}", context, e)),
    }
}

fn record_step(step: &'static str, started: Instant) {
    metrics::histogram!("pixnoise_video_step_duration_seconds", "step" => step)
        .record(started.elapsed().as_secs_f64());
}
