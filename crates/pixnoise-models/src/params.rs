//! Perturbation parameters and output formats.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{ModelError, ModelResult};

/// Default share of pixels that get perturbed (1%).
pub const DEFAULT_PERTURB_PROB: f64 = 0.01;

/// JPEG quality used for images returned by the API.
pub const API_JPEG_QUALITY: u8 = 90;

/// Parameters controlling pixel perturbation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct PerturbParams {
    /// Probability that a given pixel is perturbed (0-1)
    #[serde(default = "default_perturb_prob")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub perturb_prob: f64,

    /// Paint perturbed pixels red instead of nudging them invisibly
    #[serde(default)]
    pub visual_debug: bool,
}

fn default_perturb_prob() -> f64 {
    DEFAULT_PERTURB_PROB
}

impl Default for PerturbParams {
    fn default() -> Self {
        Self {
            perturb_prob: DEFAULT_PERTURB_PROB,
            visual_debug: false,
        }
    }
}

impl PerturbParams {
    pub fn new(perturb_prob: f64, visual_debug: bool) -> ModelResult<Self> {
        let params = Self {
            perturb_prob,
            visual_debug,
        };
        params.check()?;
        Ok(params)
    }

    /// Validate the probability range. NaN is rejected explicitly since the
    /// range validator lets it through.
    pub fn check(&self) -> ModelResult<()> {
        if !self.perturb_prob.is_finite() || self.validate().is_err() {
            return Err(ModelError::InvalidProbability(self.perturb_prob));
        }
        Ok(())
    }

    /// Number of pixels to perturb out of `total_pixels`.
    pub fn pixels_to_perturb(&self, total_pixels: u64) -> u64 {
        (total_pixels as f64 * self.perturb_prob).floor() as u64
    }
}

/// Image format of a processed upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
}

impl OutputFormat {
    /// JPEG for `.jpg`/`.jpeg` names (any case), PNG for everything else.
    pub fn for_filename(filename: &str) -> Self {
        let lower = filename.to_lowercase();
        if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
            OutputFormat::Jpeg
        } else {
            OutputFormat::Png
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }
}

/// Parse a boolean form field the way HTML form clients send them.
pub fn parse_form_bool(value: &str) -> ModelResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "y" | "t" => Ok(true),
        "false" | "0" | "no" | "off" | "n" | "f" => Ok(false),
        other => Err(ModelError::InvalidBool(other.to_string())),
    }
}

/// Parse a float form field.
pub fn parse_form_f64(value: &str) -> ModelResult<f64> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| ModelError::InvalidNumber(value.to_string()))
}
