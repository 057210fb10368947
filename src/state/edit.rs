/// Per-run processing parameters
///
/// Manual adjustments are used by the corrector when no chart calibration
/// applies. Output settings decide the encoded file format.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Manual adjustment values applied when a run does not use a chart
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Adjustments {
    // ========== Exposure & Tone ==========

    /// Exposure adjustment in stops (EV)
    /// - 0.0 = no adjustment
    pub exposure: f32,

    /// Shadows adjustment (-1.0 to +1.0)
    /// - Positive values lift shadows
    pub shadows: f32,

    /// Highlights adjustment (-1.0 to +1.0)
    /// - Negative values recover bright areas
    pub highlights: f32,

    // ========== White Balance ==========
    // This field and the detail fields below are carried into the project
    // document for downstream editors. The built-in corrector ignores them.

    /// Target white balance in Kelvin, None = as shot
    pub white_balance: Option<u32>,

    // ========== Detail ==========

    /// Denoise strength in percent, 0 = off
    pub denoise: f32,

    /// Sharpen amount in percent, 0 = off
    pub sharpen: f32,
}

impl Default for Adjustments {
    /// Create default adjustments (no changes)
    fn default() -> Self {
        Self {
            exposure: 0.0,
            shadows: 0.0,
            highlights: 0.0,
            white_balance: None,
            denoise: 0.0,
            sharpen: 0.0,
        }
    }
}

impl Adjustments {
    /// Check if this represents an unedited image (all values at default)
    pub fn is_unedited(&self) -> bool {
        *self == Self::default()
    }
}

/// Encoded output file format
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpg,
    Png,
    Tiff,
    Exr,
}

impl OutputFormat {
    /// Parse ".jpg", "jpg", ".TIFF" ...
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().trim_start_matches('.').to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(OutputFormat::Jpg),
            "png" => Some(OutputFormat::Png),
            "tif" | "tiff" => Some(OutputFormat::Tiff),
            "exr" => Some(OutputFormat::Exr),
            _ => None,
        }
    }

    /// Extension including the dot, as used by `[e]`
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpg => ".jpg",
            OutputFormat::Png => ".png",
            OutputFormat::Tiff => ".tiff",
            OutputFormat::Exr => ".exr",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// How processed images are encoded
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct OutputSettings {
    pub format: OutputFormat,
    /// JPEG quality 1-100
    pub jpeg_quality: u8,
    /// 8 or 16; only TIFF and PNG honour 16
    pub bit_depth: u8,
    pub exr_colorspace: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            format: OutputFormat::Jpg,
            jpeg_quality: 100,
            bit_depth: 8,
            exr_colorspace: "sRGB".to_string(),
        }
    }
}
