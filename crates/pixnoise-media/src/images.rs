//! Image encoding helpers and parallel folder processing.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, RgbImage};
use rayon::prelude::*;
use tracing::{debug, warn};

use pixnoise_models::encoding::{FOLDER_IMAGE_EXTENSIONS, FRAME_JPEG_QUALITY};
use pixnoise_models::{OutputFormat, PerturbParams, API_JPEG_QUALITY};

use crate::error::{MediaError, MediaResult};
use crate::perturb::perturb_pixels;
use crate::progress::StepCallback;

/// Step label reported while frames are perturbed.
pub const PERTURB_STEP: &str = "Perturbing frames";

/// Decode an uploaded image, perturb it, and re-encode it for the response.
///
/// The output format follows the upload's file name: JPEG (quality 90) for
/// `.jpg`/`.jpeg`, PNG otherwise.
pub fn process_image_bytes(
    bytes: &[u8],
    filename: &str,
    params: &PerturbParams,
) -> MediaResult<(Vec<u8>, OutputFormat)> {
    params.check()?;
    let decoded = image::load_from_memory(bytes)?;
    let perturbed = perturb_pixels(&decoded, params);
    let format = OutputFormat::for_filename(filename);
    let encoded = encode(&perturbed, format)?;
    Ok((encoded, format))
}

/// Encode an RGB image in the given format.
pub fn encode(image: &RgbImage, format: OutputFormat) -> MediaResult<Vec<u8>> {
    encode_with_quality(image, format, API_JPEG_QUALITY)
}

fn encode_with_quality(image: &RgbImage, format: OutputFormat, jpeg_quality: u8) -> MediaResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let (width, height) = image.dimensions();
    match format {
        OutputFormat::Jpeg => {
            JpegEncoder::new_with_quality(&mut buf, jpeg_quality).write_image(
                image.as_raw(),
                width,
                height,
                ColorType::Rgb8,
            )?;
        }
        OutputFormat::Png => {
            PngEncoder::new(&mut buf).write_image(image.as_raw(), width, height, ColorType::Rgb8)?;
        }
    }
    Ok(buf.into_inner())
}

/// Perturb a single image file into `output_dir`, keeping its file name.
pub fn process_image_file(
    input: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    params: &PerturbParams,
) -> MediaResult<PathBuf> {
    let input = input.as_ref();
    let output_dir = output_dir.as_ref();
    params.check()?;

    std::fs::create_dir_all(output_dir)?;
    let file_name = input
        .file_name()
        .ok_or_else(|| MediaError::FileNotFound(input.to_path_buf()))?;
    let output = output_dir.join(file_name);

    perturb_file(input, &output, params)?;
    Ok(output)
}

/// JPEG files are written at [`FRAME_JPEG_QUALITY`] so the re-encode does not
/// wash out the perturbation; other formats use the `image` defaults.
fn perturb_file(input: &Path, output: &Path, params: &PerturbParams) -> MediaResult<()> {
    let decoded = image::open(input)?;
    let perturbed = perturb_pixels(&decoded, params);
    let name = output.to_string_lossy();
    if OutputFormat::for_filename(&name) == OutputFormat::Jpeg {
        std::fs::write(output, encode_with_quality(&perturbed, OutputFormat::Jpeg, FRAME_JPEG_QUALITY)?)?;
    } else {
        perturbed.save(output)?;
    }
    Ok(())
}

/// Outcome of a folder run.
#[derive(Debug, Default)]
pub struct FolderReport {
    /// Files written successfully
    pub processed: usize,
    /// Files that could not be processed, with the reason
    pub failed: Vec<(String, String)>,
}

impl FolderReport {
    pub fn total(&self) -> usize {
        self.processed + self.failed.len()
    }
}

/// Default worker count for frame processing: all cores but two, at least one.
pub fn default_frame_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(2)
        .max(1)
}

/// Whether a file name is picked up by [`process_folder`].
pub fn is_folder_image(name: &str) -> bool {
    FOLDER_IMAGE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Perturb every image in `input_dir` into `output_dir` on a dedicated
/// thread pool, reporting progress after each file.
///
/// This is CPU bound and blocking; call it from `spawn_blocking` in async code.
pub fn process_folder(
    input_dir: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    params: &PerturbParams,
    max_workers: Option<usize>,
    progress: Option<StepCallback>,
) -> MediaResult<FolderReport> {
    process_folder_until(input_dir, output_dir, params, max_workers, progress, || false)
}

/// Like [`process_folder`], but files not yet started are skipped once
/// `cancelled` returns true, and the run ends with [`MediaError::Cancelled`].
pub fn process_folder_until<C>(
    input_dir: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    params: &PerturbParams,
    max_workers: Option<usize>,
    progress: Option<StepCallback>,
    cancelled: C,
) -> MediaResult<FolderReport>
where
    C: Fn() -> bool + Sync,
{
    let input_dir = input_dir.as_ref();
    let output_dir = output_dir.as_ref();
    params.check()?;
    std::fs::create_dir_all(output_dir)?;

    let mut files: Vec<String> = std::fs::read_dir(input_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| is_folder_image(name))
        .collect();
    files.sort();

    let total = files.len() as u64;
    if total == 0 {
        return Ok(FolderReport::default());
    }

    let workers = max_workers.unwrap_or_else(default_frame_workers).max(1);
    debug!("Perturbing {} images with {} workers", total, workers);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("frames_{}", i))
        .build()
        .map_err(|e| MediaError::internal(format!("Failed to build frame pool: {}", e)))?;

    let completed = AtomicU64::new(0);
    let results: Vec<(String, MediaResult<()>)> = pool.install(|| {
        files
            .par_iter()
            .map(|name| {
                if cancelled() {
                    return (name.clone(), Err(MediaError::Cancelled));
                }
                let result = perturb_file(&input_dir.join(name), &output_dir.join(name), params);
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(cb) = progress.as_ref() {
                    cb(done.min(total), total, PERTURB_STEP);
                }
                (name.clone(), result)
            })
            .collect()
    });

    if results
        .iter()
        .any(|(_, result)| matches!(result, Err(MediaError::Cancelled)))
    {
        return Err(MediaError::Cancelled);
    }

    let mut report = FolderReport::default();
    for (name, result) in results {
        match result {
            Ok(()) => report.processed += 1,
            Err(e) => {
                warn!(file = %name, "Failed to perturb image: {}", e);
                report.failed.push((name, e.to_string()));
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([120, 60, 200]));
        encode(&img, OutputFormat::Png).unwrap()
    }

    #[test]
    fn test_process_image_bytes_format_follows_name() {
        let png = sample_png(32, 32);
        let params = PerturbParams::default();

        let (bytes, format) = process_image_bytes(&png, "photo.JPG", &params).unwrap();
        assert_eq!(format, OutputFormat::Jpeg);
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        let (bytes, format) = process_image_bytes(&png, "photo.webp", &params).unwrap();
        assert_eq!(format, OutputFormat::Png);
        assert_eq!(&bytes[1..4], b"PNG");
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 32));
    }

    #[test]
    fn test_process_image_bytes_rejects_garbage() {
        let err = process_image_bytes(b"not an image", "x.png", &PerturbParams::default());
        assert!(matches!(err, Err(MediaError::Image(_))));
    }

    #[test]
    fn test_process_image_file_keeps_name() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("frame.png");
        std::fs::write(&input, sample_png(20, 10)).unwrap();

        let out_dir = dir.path().join("out");
        let params = PerturbParams::new(0.5, true).unwrap();
        let output = process_image_file(&input, &out_dir, &params).unwrap();

        assert_eq!(output, out_dir.join("frame.png"));
        let img = image::open(&output).unwrap().to_rgb8();
        let red = img.pixels().filter(|p| p.0 == [255, 0, 0]).count();
        assert_eq!(red, 100);
    }

    #[test]
    fn test_process_folder_filters_and_reports() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("frames");
        let output = dir.path().join("processed");
        std::fs::create_dir_all(&input).unwrap();

        for i in 1..=5 {
            let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([9, 9, 9])));
            img.save(input.join(format!("frame_{:06}.png", i))).unwrap();
        }
        std::fs::write(input.join("notes.txt"), b"skip me").unwrap();
        std::fs::write(input.join("broken.jpg"), b"not a jpeg").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let callback: StepCallback = Arc::new(move |current: u64, total: u64, info: &str| {
            seen_cb.lock().unwrap().push((current, total, info.to_string()));
        });

        let report = process_folder(
            &input,
            &output,
            &PerturbParams::default(),
            Some(2),
            Some(callback),
        )
        .unwrap();

        assert_eq!(report.processed, 5);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "broken.jpg");
        assert!(output.join("frame_000003.png").exists());
        assert!(!output.join("notes.txt").exists());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 6);
        assert!(seen.iter().all(|(_, total, info)| *total == 6 && info == PERTURB_STEP));
        assert!(seen.iter().any(|(current, _, _)| *current == 6));
    }

    #[test]
    fn test_process_folder_until_stops_when_cancelled() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("frames");
        let output = dir.path().join("processed");
        std::fs::create_dir_all(&input).unwrap();
        for i in 1..=4 {
            std::fs::write(input.join(format!("frame_{:06}.png", i)), sample_png(8, 8)).unwrap();
        }

        let err = process_folder_until(
            &input,
            &output,
            &PerturbParams::default(),
            Some(1),
            None,
            || true,
        )
        .unwrap_err();

        assert!(matches!(err, MediaError::Cancelled));
        assert!(!output.join("frame_000001.png").exists());
    }

    #[test]
    fn test_process_folder_empty_is_noop() {
        let dir = TempDir::new().unwrap();
        let report = process_folder(
            dir.path(),
            dir.path().join("out"),
            &PerturbParams::default(),
            None,
            None,
        )
        .unwrap();
        assert_eq!(report.total(), 0);
    }

    #[test]
    fn test_is_folder_image() {
        assert!(is_folder_image("frame_000001.jpg"));
        assert!(is_folder_image("a.gif"));
        assert!(!is_folder_image("a.JPG"));
        assert!(!is_folder_image("a.mp4"));
    }
}
