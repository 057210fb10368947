/// Exposure normalization
///
/// Brings a set of images to a common brightness. Each image is measured on
/// a small sample; pixels at or beyond the shadow and highlight limits are
/// left out of the measurement. The reference is a designated image, or the
/// mean of all images when none is designated.

use image::Rgb32FImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::color::{linear_to_srgb, luminance};
use crate::raw::thumbnail::{self, THUMBNAIL_SIZE};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureNormalizer {
    /// Display-encoded luminance at or below which a pixel counts as shadow
    pub shadow_limit: f32,
    /// Display-encoded luminance at or above which a pixel counts as clipped
    pub highlight_limit: f32,
}

impl Default for ExposureNormalizer {
    fn default() -> Self {
        Self {
            shadow_limit: 0.05,
            highlight_limit: 0.98,
        }
    }
}

impl ExposureNormalizer {
    pub fn new(shadow_limit: f32, highlight_limit: f32) -> Self {
        Self {
            shadow_limit,
            highlight_limit,
        }
    }

    /// Mean luminance of pixels strictly between the limits, or of every
    /// pixel if none is in that band. Measured on display-encoded values.
    pub fn luminance_of(&self, sample: &Rgb32FImage) -> f32 {
        let mut band_sum = 0.0f64;
        let mut band_count = 0usize;
        let mut all_sum = 0.0f64;
        let mut all_count = 0usize;

        for pixel in sample.pixels() {
            let lum = luminance(pixel.0.map(linear_to_srgb));
            all_sum += lum as f64;
            all_count += 1;
            if lum > self.shadow_limit && lum < self.highlight_limit {
                band_sum += lum as f64;
                band_count += 1;
            }
        }

        if band_count > 0 {
            (band_sum / band_count as f64) as f32
        } else if all_count > 0 {
            (all_sum / all_count as f64) as f32
        } else {
            0.0
        }
    }

    /// Multiplier per image from measured luminances.
    ///
    /// An image with zero luminance gets 1.0. A `reference` that was not
    /// measured falls back to the mean.
    pub fn compute_multipliers(
        &self,
        luminances: &[(PathBuf, f32)],
        reference: Option<&Path>,
    ) -> HashMap<PathBuf, f32> {
        if luminances.is_empty() {
            return HashMap::new();
        }

        let designated = reference.and_then(|r| {
            luminances
                .iter()
                .find(|(path, _)| path == r)
                .map(|(_, lum)| *lum)
        });
        let reference_lum = match designated {
            Some(lum) => lum,
            None => {
                let mean = luminances.iter().map(|(_, l)| *l as f64).sum::<f64>()
                    / luminances.len() as f64;
                debug!("Using average image brightness as reference ({:.3})", mean);
                mean as f32
            }
        };

        luminances
            .iter()
            .map(|(path, lum)| {
                let multiplier = if *lum > 0.0 { reference_lum / lum } else { 1.0 };
                debug!("{} multiplier: {:.3}", path.display(), multiplier);
                (path.clone(), multiplier)
            })
            .collect()
    }

    /// Measure every file on a thumbnail and compute multipliers.
    /// Files that cannot be read are skipped and get no multiplier.
    pub fn from_files(&self, paths: &[PathBuf], reference: Option<&Path>) -> HashMap<PathBuf, f32> {
        let luminances: Vec<(PathBuf, f32)> = paths
            .iter()
            .filter_map(|path| match thumbnail::load_thumbnail(path, THUMBNAIL_SIZE) {
                Ok(sample) => Some((path.clone(), self.luminance_of(&sample))),
                Err(e) => {
                    warn!("Exposure sample failed for {}: {}", path.display(), e);
                    None
                }
            })
            .collect();

        if luminances.is_empty() {
            warn!("No valid images for exposure normalization");
            return HashMap::new();
        }

        let multipliers = self.compute_multipliers(&luminances, reference);
        info!("Exposure multipliers calculated for {} images", multipliers.len());
        multipliers
    }
}
