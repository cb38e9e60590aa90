//! Sparse pixel perturbation.
//!
//! A small random share of pixels gets one colour channel nudged by at most
//! three levels. The change is practically invisible but alters the exact
//! pixel data recognition models see. With `visual_debug` the chosen pixels
//! are painted red so the distribution can be inspected.

use image::{DynamicImage, Rgb, RgbImage};
use rand::seq::index;
use rand::Rng;

use pixnoise_models::PerturbParams;

/// Possible channel offsets. Zero is excluded so every chosen pixel moves.
const DELTAS: [i16; 6] = [-3, -2, -1, 1, 2, 3];

/// Debug marker colour.
const DEBUG_MARK: Rgb<u8> = Rgb([255, 0, 0]);

/// Perturb an image using the thread-local RNG.
pub fn perturb_pixels(image: &DynamicImage, params: &PerturbParams) -> RgbImage {
    perturb_pixels_with_rng(image, params, &mut rand::rng())
}

/// Perturb an image with the given RNG.
pub fn perturb_pixels_with_rng<R: Rng + ?Sized>(
    image: &DynamicImage,
    params: &PerturbParams,
    rng: &mut R,
) -> RgbImage {
    let mut pixels = image.to_rgb8();
    let (width, height) = pixels.dimensions();
    let total = width as usize * height as usize;
    let count = (params.pixels_to_perturb(total as u64) as usize).min(total);

    if count == 0 {
        return pixels;
    }

    let chosen = index::sample(rng, total, count);

    for idx in chosen.iter() {
        let x = (idx % width as usize) as u32;
        let y = (idx / width as usize) as u32;

        let pixel = pixels.get_pixel_mut(x, y);
        if params.visual_debug {
            *pixel = DEBUG_MARK;
            continue;
        }

        let channel = rng.random_range(0..3);
        let delta = DELTAS[rng.random_range(0..DELTAS.len())];
        pixel.0[channel] = (pixel.0[channel] as i16 + delta).clamp(0, 255) as u8;
    }

    pixels
}
