use image::imageops::FilterType;
use image::GrayImage;

use crate::MediaResult;

/// Perceptual fingerprint primitive used for image identities.
///
/// Implementations decode an encoded image and produce one digest per requested
/// grid size, each `grid * grid` bits packed most-significant bit first.
pub trait PerceptualHasher: Send + Sync {
    /// Whether `fingerprints` can decode this content type directly.
    /// Anything else is transcoded to PNG first.
    fn accepts(&self, content_type: &str) -> bool;

    /// Fingerprint the same decoded image at every grid size in `grids`
    fn fingerprints(&self, encoded: &[u8], grids: &[u32]) -> MediaResult<Vec<Vec<u8>>>;
}

/// Block-mean hash: the luma image is averaged down to a `grid x grid` raster
/// and every cell brighter than the raster's median sets its bit.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockHasher;

impl PerceptualHasher for BlockHasher {
    fn accepts(&self, content_type: &str) -> bool {
        matches!(
            essence(content_type).as_str(),
            "image/png" | "image/jpeg" | "image/jpg"
        )
    }

    fn fingerprints(&self, encoded: &[u8], grids: &[u32]) -> MediaResult<Vec<Vec<u8>>> {
        let luma = image::load_from_memory(encoded)?.to_luma8();
        Ok(grids.iter().map(|&grid| block_digest(&luma, grid)).collect())
    }
}

fn block_digest(luma: &GrayImage, grid: u32) -> Vec<u8> {
    let cells = image::imageops::resize(luma, grid, grid, FilterType::Triangle).into_raw();
    if cells.is_empty() {
        return Vec::new();
    }

    // Twice the median, so even-length rasters stay in integers
    let mut sorted = cells.clone();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    let median_x2 = if sorted.len() % 2 == 0 {
        u16::from(sorted[mid - 1]) + u16::from(sorted[mid])
    } else {
        2 * u16::from(sorted[mid])
    };

    let mut digest = vec![0u8; cells.len().div_ceil(8)];
    for (i, &cell) in cells.iter().enumerate() {
        if 2 * u16::from(cell) > median_x2 {
            digest[i / 8] |= 0x80 >> (i % 8);
        }
    }
    digest
}

/// `"Image/JPEG; charset=x"` -> `"image/jpeg"`
pub(crate) fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    fn horizontal_gradient(invert: bool) -> Vec<u8> {
        let img = RgbImage::from_fn(64, 64, |x, _| {
            let v = (x * 4) as u8;
            let v = if invert { 255 - v } else { v };
            image::Rgb([v, v, v])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn digest_width_follows_grid() {
        let digests = BlockHasher.fingerprints(&horizontal_gradient(false), &[4, 16]).unwrap();
        assert_eq!(digests[0].len(), 2);
        assert_eq!(digests[1].len(), 32);
    }

    #[test]
    fn gradient_splits_at_median() {
        let digests = BlockHasher.fingerprints(&horizontal_gradient(false), &[4]).unwrap();
        // Left half darker than the median, right half brighter, in every row
        assert_eq!(digests[0], vec![0b0011_0011, 0b0011_0011]);

        let inverted = BlockHasher.fingerprints(&horizontal_gradient(true), &[4]).unwrap();
        assert_eq!(inverted[0], vec![0b1100_1100, 0b1100_1100]);
    }

    #[test]
    fn accepts_only_native_formats() {
        assert!(BlockHasher.accepts("image/png"));
        assert!(BlockHasher.accepts("IMAGE/JPEG; q=1"));
        assert!(!BlockHasher.accepts("image/webp"));
        assert!(!BlockHasher.accepts("image/bmp"));
    }

    #[test]
    fn undecodable_input_is_a_processing_error() {
        let result = BlockHasher.fingerprints(b"definitely not a png", &[4]);
        assert!(matches!(result, Err(crate::MediaError::Processing { .. })));
    }
}
