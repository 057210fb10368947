/// Full-size image loader
///
/// Decodes any supported input into linear RGB f32. RAW files go through
/// rawloader with a 2x2 superpixel demosaic; if the sensor data cannot be
/// decoded the largest embedded JPEG is used instead. Other formats are
/// opened with the image crate.

use image::{DynamicImage, ImageFormat, Rgb, Rgb32FImage};
use std::path::{Path, PathBuf};
use tokio::task;
use tracing::{debug, warn};

use super::thumbnail;
use crate::color::srgb_to_linear;
use crate::error::{Error, Result};
use crate::state::library::is_raw_file;

/// Load an image as linear RGB off the async runtime
pub async fn load_rgb_async(path: PathBuf) -> Result<Rgb32FImage> {
    // Spawn blocking because decoding is CPU-intensive
    task::spawn_blocking(move || load_rgb(&path))
        .await
        .map_err(|e| Error::Decode(format!("Task join error: {}", e)))?
}

/// Load an image as linear RGB
pub fn load_rgb(path: &Path) -> Result<Rgb32FImage> {
    if !path.exists() {
        return Err(Error::Decode(format!("File not found: {}", path.display())));
    }

    if !is_raw_file(path) {
        let img = image::open(path)?;
        return Ok(to_linear(&img));
    }

    match decode_sensor_data(path) {
        Ok(img) => Ok(img),
        Err(e) => {
            warn!("RAW decode failed for {}: {}; trying embedded preview", path.display(), e);
            let jpeg = thumbnail::extract_largest_jpeg(path).ok_or(e)?;
            let img = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)?;
            Ok(to_linear(&img))
        }
    }
}

/// Convert an sRGB-encoded image to linear RGB f32
pub fn to_linear(img: &DynamicImage) -> Rgb32FImage {
    let mut out = img.to_rgb32f();
    for pixel in out.pixels_mut() {
        for v in pixel.0.iter_mut() {
            *v = srgb_to_linear(*v);
        }
    }
    out
}

fn decode_sensor_data(path: &Path) -> Result<Rgb32FImage> {
    let raw = rawloader::decode_file(path)
        .map_err(|e| Error::Decode(format!("Failed to decode RAW: {:?}", e)))?;

    let width = raw.width;
    let height = raw.height;
    if width < 2 || height < 2 {
        return Err(Error::Decode(format!("RAW too small: {}x{}", width, height)));
    }

    let samples: Vec<f32> = match &raw.data {
        rawloader::RawImageData::Integer(values) => values.iter().map(|&v| v as f32).collect(),
        rawloader::RawImageData::Float(values) => values.clone(),
    };

    // Normalize as-shot white balance so green = 1.0
    let g_ref = raw.wb_coeffs[1].max(0.001);
    let wb = [
        sane_coeff(raw.wb_coeffs[0] / g_ref),
        1.0,
        sane_coeff(raw.wb_coeffs[2] / g_ref),
    ];
    let black = [
        raw.blacklevels[0] as f32,
        raw.blacklevels[1] as f32,
        raw.blacklevels[2] as f32,
    ];
    let range = [
        (raw.whitelevels[0] as f32 - black[0]).max(1.0),
        (raw.whitelevels[1] as f32 - black[1]).max(1.0),
        (raw.whitelevels[2] as f32 - black[2]).max(1.0),
    ];
    let is_float = matches!(raw.data, rawloader::RawImageData::Float(_));
    let normalize = |v: f32, c: usize| -> f32 {
        let linear = if is_float { v } else { (v - black[c]) / range[c] };
        (linear * wb[c]).max(0.0)
    };

    debug!(
        "Decoded {}x{} RAW, cpp={}, wb=[{:.3}, {:.3}, {:.3}]",
        width, height, raw.cpp, wb[0], wb[1], wb[2]
    );

    if raw.cpp == 3 {
        let img = Rgb32FImage::from_fn(width as u32, height as u32, |x, y| {
            let idx = (y as usize * width + x as usize) * 3;
            Rgb([
                normalize(samples[idx], 0),
                normalize(samples[idx + 1], 1),
                normalize(samples[idx + 2], 2),
            ])
        });
        return Ok(img);
    }

    // One output pixel per 2x2 CFA block
    let out_w = (width / 2) as u32;
    let out_h = (height / 2) as u32;
    let img = Rgb32FImage::from_fn(out_w, out_h, |x, y| {
        let mut sum = [0.0f32; 3];
        let mut count = [0u32; 3];
        for dy in 0..2 {
            for dx in 0..2 {
                let row = y as usize * 2 + dy;
                let col = x as usize * 2 + dx;
                // Fourth CFA colour (e.g. emerald) is folded into green
                let c = match raw.cfa.color_at(row, col) {
                    0 => 0,
                    2 => 2,
                    _ => 1,
                };
                sum[c] += normalize(samples[row * width + col], c);
                count[c] += 1;
            }
        }
        Rgb([
            sum[0] / count[0].max(1) as f32,
            sum[1] / count[1].max(1) as f32,
            sum[2] / count[2].max(1) as f32,
        ])
    });
    Ok(img)
}

fn sane_coeff(v: f32) -> f32 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        1.0
    }
}
