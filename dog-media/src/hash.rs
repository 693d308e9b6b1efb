//! Content hashing: turns a byte stream into the hash layers of an identity.
//!
//! Generic files get one SHA-256 layer (exact duplicates only). Images get a coarse
//! and a fine perceptual layer computed from the same prepared buffer, so that
//! near-duplicates land in the same bucket and rank by fine-digest distance.

use std::io::Cursor;
use std::sync::Arc;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use image::{GenericImageView, ImageFormat};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::perceptual::{BlockHasher, PerceptualHasher};
use crate::{ByteStream, ImageHashRules, MediaError, MediaResult, MediaType};

/// Stream the full body through SHA-256 and return its base64url digest.
///
/// Transport errors surface as I/O errors, never as malformed content.
pub async fn hash_generic(mut stream: ByteStream) -> MediaResult<String> {
    let mut hasher = Sha256::new();
    while let Some(chunk) = stream.next().await {
        hasher.update(&chunk?);
    }
    Ok(URL_SAFE_NO_PAD.encode(hasher.finalize()))
}

/// Computes identity hash layers for any media type
#[derive(Clone)]
pub struct ContentHasher {
    perceptual: Arc<dyn PerceptualHasher>,
    rules: ImageHashRules,
}

impl ContentHasher {
    /// Create a hasher using the built-in block hash for images
    pub fn new(rules: ImageHashRules) -> Self {
        Self {
            perceptual: Arc::new(BlockHasher),
            rules,
        }
    }

    /// Replace the perceptual hash primitive
    pub fn with_perceptual_hasher<P: PerceptualHasher + 'static>(mut self, hasher: P) -> Self {
        self.perceptual = Arc::new(hasher);
        self
    }

    /// Hash layers for `media_type`: `[coarse, fine]` for images, `[digest]` otherwise
    pub async fn hash(
        &self,
        media_type: MediaType,
        stream: ByteStream,
        byte_size: u64,
        content_type: &str,
    ) -> MediaResult<Vec<String>> {
        match media_type {
            MediaType::Image => {
                let [coarse, fine] = self.hash_image(stream, byte_size, content_type).await?;
                Ok(vec![coarse, fine])
            }
            _ => Ok(vec![hash_generic(stream).await?]),
        }
    }

    /// Coarse and fine perceptual digests of an image, base64url encoded.
    ///
    /// Sources above the downsample threshold are shrunk (aspect ratio kept) and
    /// formats the primitive can't read are transcoded to PNG before hashing.
    pub async fn hash_image(
        &self,
        mut stream: ByteStream,
        byte_size: u64,
        content_type: &str,
    ) -> MediaResult<[String; 2]> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }

        let data = buffer.freeze();
        let perceptual = self.perceptual.clone();
        let rules = self.rules.clone();
        let content_type = content_type.to_string();

        let mut digests = tokio::task::spawn_blocking(move || {
            let prepared = prepare_image(data, byte_size, &content_type, &rules, perceptual.as_ref())?;
            perceptual.fingerprints(&prepared, &[rules.coarse_grid, rules.fine_grid])
        })
        .await
        .map_err(|e| MediaError::processing(format!("image hashing task failed: {}", e)))??
        .into_iter()
        .map(|digest| URL_SAFE_NO_PAD.encode(digest));

        match (digests.next(), digests.next()) {
            (Some(coarse), Some(fine)) if !coarse.is_empty() && !fine.is_empty() => Ok([coarse, fine]),
            _ => Err(MediaError::processing("perceptual hasher returned no digest")),
        }
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new(ImageHashRules::default())
    }
}

fn prepare_image(
    data: Bytes,
    byte_size: u64,
    content_type: &str,
    rules: &ImageHashRules,
    perceptual: &dyn PerceptualHasher,
) -> MediaResult<Bytes> {
    if byte_size > rules.downsample_threshold_bytes {
        let image = image::load_from_memory(&data)?;
        let (width, height) = image.dimensions();
        let max = rules.downsample_max_dimension;
        let image = if width > max || height > max {
            image.thumbnail(max, max)
        } else {
            image
        };
        debug!("Downsampled {} byte image to {}x{}", byte_size, image.width(), image.height());
        return encode_png(&image);
    }

    if !perceptual.accepts(content_type) {
        debug!("Transcoding {} to PNG for hashing", content_type);
        return encode_png(&image::load_from_memory(&data)?);
    }

    Ok(data)
}

fn encode_png(image: &image::DynamicImage) -> MediaResult<Bytes> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(Bytes::from(out.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn stream_of(chunks: Vec<&'static [u8]>) -> ByteStream {
        Box::pin(futures_util::stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))),
        ))
    }

    fn bytes_stream(data: Vec<u8>) -> ByteStream {
        Box::pin(futures_util::stream::iter(vec![Ok(Bytes::from(data))]))
    }

    fn gradient(format: ImageFormat) -> Vec<u8> {
        let img = RgbImage::from_fn(96, 64, |x, y| {
            let v = ((x * 2 + y) % 256) as u8;
            image::Rgb([v, v / 2, 255 - v])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_generic_digest() {
        let digest = hash_generic(stream_of(vec![b"hello world"])).await.unwrap();
        assert_eq!(digest, "uU0nuZNNPgilLlLX2n2r-sSE7-N6U4DukIj3rOLvzek");

        let chunked = hash_generic(stream_of(vec![b"hel", b"lo ", b"world"])).await.unwrap();
        assert_eq!(chunked, digest);

        let empty = hash_generic(stream_of(vec![])).await.unwrap();
        assert_eq!(empty, "47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU");
    }

    #[tokio::test]
    async fn test_generic_stream_error_is_io() {
        let failing: ByteStream = Box::pin(futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "test error")),
        ]));

        let result = hash_generic(failing).await;
        assert!(matches!(result, Err(MediaError::Io { .. })));
    }

    #[tokio::test]
    async fn test_non_image_types_get_one_layer() {
        let hasher = ContentHasher::default();
        for media_type in [MediaType::File, MediaType::Audio, MediaType::Video] {
            let layers = hasher
                .hash(media_type, stream_of(vec![b"hello world"]), 11, "audio/mpeg")
                .await
                .unwrap();
            assert_eq!(layers, vec!["uU0nuZNNPgilLlLX2n2r-sSE7-N6U4DukIj3rOLvzek".to_string()]);
        }
    }

    #[tokio::test]
    async fn test_image_digests_are_deterministic() {
        let hasher = ContentHasher::default();
        let png = gradient(ImageFormat::Png);
        let size = png.len() as u64;

        let first = hasher.hash_image(bytes_stream(png.clone()), size, "image/png").await.unwrap();
        let second = hasher.hash_image(bytes_stream(png), size, "image/png").await.unwrap();

        assert_eq!(first, second);
        // 16 bits -> 3 chars, 256 bits -> 43 chars
        assert_eq!(first[0].len(), 3);
        assert_eq!(first[1].len(), 43);
    }

    #[tokio::test]
    async fn test_unsupported_format_is_transcoded_losslessly() {
        let hasher = ContentHasher::default();
        let png = gradient(ImageFormat::Png);
        let bmp = gradient(ImageFormat::Bmp);

        let from_png = hasher
            .hash_image(bytes_stream(png.clone()), png.len() as u64, "image/png")
            .await
            .unwrap();
        let from_bmp = hasher
            .hash_image(bytes_stream(bmp.clone()), bmp.len() as u64, "image/bmp")
            .await
            .unwrap();

        assert_eq!(from_png, from_bmp);
    }

    #[tokio::test]
    async fn test_large_images_are_downsampled() {
        let rules = ImageHashRules::default()
            .with_downsample_threshold(16)
            .with_downsample_max_dimension(24);
        let hasher = ContentHasher::new(rules);
        let png = gradient(ImageFormat::Png);

        let downsampled = hasher
            .hash_image(bytes_stream(png.clone()), png.len() as u64, "image/png")
            .await
            .unwrap();
        let full = ContentHasher::default()
            .hash_image(bytes_stream(png.clone()), png.len() as u64, "image/png")
            .await
            .unwrap();

        let similarity = crate::similarity::similarity(&downsampled[1], &full[1]).unwrap();
        assert!(similarity > 0.8, "similarity was {}", similarity);
    }

    #[tokio::test]
    async fn test_corrupt_image_is_processing_error() {
        let hasher = ContentHasher::default();

        for content_type in ["image/png", "image/webp"] {
            let result = hasher
                .hash_image(stream_of(vec![b"not an image"]), 12, content_type)
                .await;
            assert!(matches!(result, Err(MediaError::Processing { .. })));
            assert!(!result.unwrap_err().is_retryable());
        }
    }
}
