/// Downscaled image samples
///
/// Exposure normalization only needs a small linear RGB sample of each
/// image. For RAW files the embedded JPEG preview is tried first, in
/// growing read sizes, before falling back to a full decode.

use image::{DynamicImage, ImageFormat, Rgb32FImage};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

use super::loader;
use crate::error::Result;
use crate::state::library::is_raw_file;

/// Default longest edge of a sample
pub const THUMBNAIL_SIZE: u32 = 512;

/// Load a linear RGB sample of `path` no larger than `max_size` on either edge
pub fn load_thumbnail(path: &Path, max_size: u32) -> Result<Rgb32FImage> {
    if is_raw_file(path) {
        if let Some(jpeg) = extract_embedded_jpeg(path) {
            if let Ok(img) = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg) {
                debug!("Sample from embedded JPEG: {}", path.display());
                return Ok(loader::to_linear(&img.thumbnail(max_size, max_size)));
            }
        }
    }

    let full = loader::load_rgb(path)?;
    let sample = DynamicImage::ImageRgb32F(full).thumbnail(max_size, max_size);
    Ok(sample.to_rgb32f())
}

/// Find a usable embedded JPEG, reading more of the file on each attempt
pub fn extract_embedded_jpeg(raw_path: &Path) -> Option<Vec<u8>> {
    // (bytes to read, minimum JPEG size)
    const TIERS: [(usize, usize); 3] = [
        (256 * 1024, 50_000),
        (512 * 1024, 30_000),
        (5 * 1024 * 1024, 10_000),
    ];

    TIERS
        .iter()
        .find_map(|&(max_bytes, min_size)| extract_jpeg_from_raw(raw_path, max_bytes, min_size))
}

fn extract_jpeg_from_raw(raw_path: &Path, max_bytes: usize, min_size: usize) -> Option<Vec<u8>> {
    let file = File::open(raw_path).ok()?;
    let mut data = Vec::new();
    file.take(max_bytes as u64).read_to_end(&mut data).ok()?;

    extract_jpeg_from_data(&data, min_size)
}

/// Return the first complete JPEG in `data` larger than `min_size` bytes
fn extract_jpeg_from_data(data: &[u8], min_size: usize) -> Option<Vec<u8>> {
    let jpeg_start = [0xFF, 0xD8];
    let jpeg_end = [0xFF, 0xD9];

    // Find JPEG start positions - stop after finding a few
    let mut jpeg_starts = Vec::new();
    for (i, window) in data.windows(2).enumerate() {
        if window == jpeg_start {
            jpeg_starts.push(i);
            if jpeg_starts.len() > 5 {
                break;
            }
        }
    }

    for &start in &jpeg_starts {
        if let Some(end_offset) = data[start..]
            .windows(2)
            .position(|window| window == jpeg_end)
        {
            let end = start + end_offset + 1;
            let size = end - start + 1;

            if size > min_size {
                return Some(data[start..=end].to_vec());
            }
        }
    }

    None
}

/// Largest decodable JPEG anywhere in the file
pub fn extract_largest_jpeg(raw_path: &Path) -> Option<Vec<u8>> {
    let data = std::fs::read(raw_path).ok()?;

    let jpeg_start = [0xFF, 0xD8];
    let jpeg_end = [0xFF, 0xD9];

    let mut all_jpegs = Vec::new();
    for (i, window) in data.windows(2).enumerate() {
        if window == jpeg_start {
            if let Some(end_offset) = data[i..].windows(2).position(|w| w == jpeg_end) {
                let end = i + end_offset + 1;
                let jpeg_data = &data[i..=end];
                if image::load_from_memory_with_format(jpeg_data, ImageFormat::Jpeg).is_ok() {
                    all_jpegs.push(jpeg_data.to_vec());
                }
            }
        }
    }

    all_jpegs.into_iter().max_by_key(Vec::len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn test_extract_jpeg_respects_min_size() {
        let mut data = vec![0u8; 16];
        data.extend_from_slice(&[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        data.extend_from_slice(&[0u8; 8]);

        let found = extract_jpeg_from_data(&data, 2).expect("jpeg found");
        assert_eq!(found, vec![0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        assert!(extract_jpeg_from_data(&data, 100).is_none());
    }

    #[test]
    fn test_thumbnail_of_plain_image_is_bounded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("frame.png");
        RgbImage::from_pixel(64, 32, Rgb([255, 255, 255]))
            .save(&path)
            .unwrap();

        let sample = load_thumbnail(&path, 16).unwrap();

        assert_eq!(sample.dimensions(), (16, 8));
        assert!((sample.get_pixel(3, 3).0[0] - 1.0).abs() < 1e-3);
    }
}
