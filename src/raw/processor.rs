/// Reference corrector
///
/// Decodes an input, applies calibration gains or the manual adjustments,
/// scales by the exposure multiplier and writes the output file in the
/// configured format.

use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, ImageFormat, Rgb, Rgb32FImage, RgbImage};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use tracing::debug;

use super::loader;
use crate::batch::{ImageCorrector, ImageJob, RunSettings};
use crate::calibration::CalibrationEntry;
use crate::color::{self, linear_to_srgb};
use crate::error::{Error, Result};
use crate::state::edit::{Adjustments, OutputFormat, OutputSettings};

/// Per-channel gains, then exposure, then tone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    pub gains: [f32; 3],
    pub exposure: f32,
    pub shadows: f32,
    pub highlights: f32,
}

impl Correction {
    /// Calibration wins over manual adjustments; the exposure multiplier
    /// applies either way. Only exposure and tone are read from the
    /// adjustments, white balance and detail are export-only.
    pub fn new(
        calibration: Option<&CalibrationEntry>,
        adjustments: &Adjustments,
        exposure_multiplier: Option<f32>,
    ) -> Self {
        let multiplier = exposure_multiplier.filter(|m| m.is_finite() && *m > 0.0).unwrap_or(1.0);
        match calibration {
            Some(entry) => Self {
                gains: color::channel_gains(entry.swatches.neutrals()),
                exposure: multiplier,
                shadows: 0.0,
                highlights: 0.0,
            },
            None => Self {
                gains: [1.0; 3],
                exposure: multiplier * 2f32.powf(adjustments.exposure),
                shadows: adjustments.shadows,
                highlights: adjustments.highlights,
            },
        }
    }

    pub fn apply(&self, image: &mut Rgb32FImage) {
        for pixel in image.pixels_mut() {
            for (v, gain) in pixel.0.iter_mut().zip(self.gains) {
                let scaled = *v * gain * self.exposure;
                *v = color::tone(scaled, self.shadows, self.highlights).clamp(0.0, 1.0);
            }
        }
    }
}

/// Corrector used by the command line
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicCorrector;

impl ImageCorrector for BasicCorrector {
    fn correct(
        &self,
        job: &ImageJob,
        calibration: Option<&CalibrationEntry>,
        settings: &RunSettings,
    ) -> Result<()> {
        let mut image = loader::load_rgb(&job.input).map_err(|e| Error::Processing {
            path: job.input.clone(),
            message: e.to_string(),
        })?;

        let correction = Correction::new(calibration, &settings.adjustments, job.exposure_multiplier);
        correction.apply(&mut image);

        save(&image, &job.output, &settings.output)?;
        debug!("Wrote {}", job.output.display());
        Ok(())
    }
}

/// Encode a linear image to `path` in the configured format
pub fn save(image: &Rgb32FImage, path: &Path, output: &OutputSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    match output.format {
        OutputFormat::Jpg => {
            let writer = BufWriter::new(File::create(path)?);
            let quality = output.jpeg_quality.clamp(1, 100);
            JpegEncoder::new_with_quality(writer, quality).encode_image(&to_srgb8(image))?;
        }
        OutputFormat::Png | OutputFormat::Tiff => {
            let format = if output.format == OutputFormat::Png {
                ImageFormat::Png
            } else {
                ImageFormat::Tiff
            };
            if output.bit_depth == 16 {
                to_srgb16(image).save_with_format(path, format)?;
            } else {
                to_srgb8(image).save_with_format(path, format)?;
            }
        }
        OutputFormat::Exr => {
            // EXR stays linear
            image.save_with_format(path, ImageFormat::OpenExr)?;
        }
    }
    Ok(())
}

fn to_srgb8(image: &Rgb32FImage) -> RgbImage {
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        let p = image.get_pixel(x, y).0;
        Rgb(p.map(|v| (linear_to_srgb(v) * 255.0).round() as u8))
    })
}

fn to_srgb16(image: &Rgb32FImage) -> ImageBuffer<Rgb<u16>, Vec<u16>> {
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        let p = image.get_pixel(x, y).0;
        Rgb(p.map(|v| (linear_to_srgb(v) * 65535.0).round() as u16))
    })
}
