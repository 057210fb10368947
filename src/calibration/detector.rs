/// Colour chart swatch detection
///
/// Detectors are collaborators of the calibration registry: given the chart
/// image of a group they return the measured swatch colours.

use image::Rgb32FImage;
use std::path::Path;
use tracing::debug;

use super::swatches::SWATCH_COUNT;
use crate::error::{Error, Result};
use crate::raw::loader;

/// Finds the 24 swatches of a colour chart in an image
pub trait SwatchDetector: Send + Sync {
    /// Measure the swatches in `chart`. Implementations may return any
    /// number of rows; callers reject anything other than 24.
    fn detect(&self, chart: &Path) -> Result<Vec<[f32; 3]>>;
}

/// Columns and rows of a 24-patch chart
const GRID: (u32, u32) = (6, 4);

/// Detector for charts that fill the frame, landscape, white patch bottom left
///
/// Each patch is measured as the mean of the central half of its grid cell,
/// which keeps the black borders between patches out of the average.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridChartDetector;

impl GridChartDetector {
    pub fn swatches_from_image(image: &Rgb32FImage) -> Result<Vec<[f32; 3]>> {
        let (cols, rows) = GRID;
        let (width, height) = image.dimensions();
        if width < cols * 2 || height < rows * 2 {
            return Err(Error::Decode(format!(
                "chart image too small: {}x{}",
                width, height
            )));
        }

        let cell_w = width / cols;
        let cell_h = height / rows;
        let mut swatches = Vec::with_capacity(SWATCH_COUNT);

        for row in 0..rows {
            for col in 0..cols {
                let x0 = col * cell_w + cell_w / 4;
                let y0 = row * cell_h + cell_h / 4;
                let x1 = (x0 + cell_w / 2).max(x0 + 1);
                let y1 = (y0 + cell_h / 2).max(y0 + 1);

                let mut sum = [0.0f64; 3];
                let mut count = 0u32;
                for y in y0..y1 {
                    for x in x0..x1 {
                        let p = image.get_pixel(x, y);
                        for (acc, v) in sum.iter_mut().zip(p.0) {
                            *acc += v as f64;
                        }
                        count += 1;
                    }
                }
                let n = count.max(1) as f64;
                swatches.push([
                    (sum[0] / n) as f32,
                    (sum[1] / n) as f32,
                    (sum[2] / n) as f32,
                ]);
            }
        }

        Ok(swatches)
    }
}

impl SwatchDetector for GridChartDetector {
    fn detect(&self, chart: &Path) -> Result<Vec<[f32; 3]>> {
        debug!("Detecting chart swatches in {}", chart.display());
        let image = loader::load_rgb(chart)?;
        Self::swatches_from_image(&image)
    }
}
