//! Variant pipeline: which derived representations an insert produces.
//!
//! A [`VariantPlanner`] turns the source's type, content type and size into an
//! ordered list of [`VariantSetting`]s. Each setting pairs a name with a
//! [`VariantTransform`] stage. Planners know nothing about storage keys.

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use image::{GenericImageView, ImageFormat};

use crate::types::is_variant_name;
use crate::{ByteStream, MediaError, MediaResult, MediaType, ORIGINAL_VARIANT};

/// A transform stage: consumes the source stream, emits the variant's bytes
#[async_trait]
pub trait VariantTransform: Send + Sync {
    async fn apply(&self, input: ByteStream) -> MediaResult<ByteStream>;
}

/// Identity transform
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

#[async_trait]
impl VariantTransform for Passthrough {
    async fn apply(&self, input: ByteStream) -> MediaResult<ByteStream> {
        Ok(input)
    }
}

/// Shrinks an image to fit a bounding box (aspect ratio kept) and re-encodes it
#[derive(Debug, Clone, Copy)]
pub struct ImageResize {
    pub max_width: u32,
    pub max_height: u32,
    pub format: ImageFormat,
}

impl ImageResize {
    pub fn new(max_width: u32, max_height: u32, format: ImageFormat) -> Self {
        Self {
            max_width,
            max_height,
            format,
        }
    }
}

#[async_trait]
impl VariantTransform for ImageResize {
    async fn apply(&self, mut input: ByteStream) -> MediaResult<ByteStream> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = input.next().await {
            buffer.extend_from_slice(&chunk?);
        }

        let data = buffer.freeze();
        let resize = *self;
        let encoded = tokio::task::spawn_blocking(move || -> MediaResult<Vec<u8>> {
            let image = image::load_from_memory(&data)?;
            let (width, height) = image.dimensions();
            let image = if width > resize.max_width || height > resize.max_height {
                image.thumbnail(resize.max_width, resize.max_height)
            } else {
                image
            };
            let mut out = Cursor::new(Vec::new());
            image.write_to(&mut out, resize.format)?;
            Ok(out.into_inner())
        })
        .await
        .map_err(|e| MediaError::processing(format!("resize task failed: {}", e)))??;

        Ok(Box::pin(futures_util::stream::once(async move {
            Ok(Bytes::from(encoded))
        })))
    }
}

/// One derived representation to produce for an insert
#[derive(Clone)]
pub struct VariantSetting {
    /// Unique within one entry; the last segment of the variant's key
    pub name: String,

    pub transform: Arc<dyn VariantTransform>,

    /// Content type of the transform's output
    pub content_type: String,
}

impl VariantSetting {
    pub fn new<N, T, C>(name: N, transform: T, content_type: C) -> Self
    where
        N: Into<String>,
        T: VariantTransform + 'static,
        C: Into<String>,
    {
        Self {
            name: name.into(),
            transform: Arc::new(transform),
            content_type: content_type.into(),
        }
    }
}

impl std::fmt::Debug for VariantSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariantSetting")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// What a planner knows about the source
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub media_type: MediaType,
    pub content_type: String,
    pub size: u64,
}

/// Produces the ordered variant plan for a source. The first setting is the
/// canonical one and should be named [`ORIGINAL_VARIANT`].
pub trait VariantPlanner: Send + Sync {
    fn plan(&self, request: &PlanRequest) -> Vec<VariantSetting>;
}

impl<F> VariantPlanner for F
where
    F: Fn(&PlanRequest) -> Vec<VariantSetting> + Send + Sync,
{
    fn plan(&self, request: &PlanRequest) -> Vec<VariantSetting> {
        self(request)
    }
}

/// Identity variant mirroring the source content type
pub fn original<C: Into<String>>(content_type: C) -> VariantSetting {
    VariantSetting::new(ORIGINAL_VARIANT, Passthrough, content_type)
}

/// Default plan: a single `original` variant, whatever the source
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPlanner;

impl VariantPlanner for DefaultPlanner {
    fn plan(&self, request: &PlanRequest) -> Vec<VariantSetting> {
        vec![original(request.content_type.clone())]
    }
}

/// Reject empty plans, duplicate names and names that are not a single key segment
pub fn validate_plan(plan: &[VariantSetting]) -> MediaResult<()> {
    if plan.is_empty() {
        return Err(MediaError::invalid("Variant plan is empty"));
    }

    let mut seen = HashSet::new();
    for setting in plan {
        if !is_variant_name(&setting.name) {
            return Err(MediaError::invalid(format!(
                "Invalid variant name {:?}",
                setting.name
            )));
        }
        if !seen.insert(setting.name.as_str()) {
            return Err(MediaError::invalid(format!(
                "Duplicate variant name {:?}",
                setting.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn request(media_type: MediaType, content_type: &str) -> PlanRequest {
        PlanRequest {
            media_type,
            content_type: content_type.to_string(),
            size: 1024,
        }
    }

    async fn collect(mut stream: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[test]
    fn default_plan_is_original_passthrough() {
        let plan = DefaultPlanner.plan(&request(MediaType::Image, "image/jpeg"));

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].name, ORIGINAL_VARIANT);
        assert_eq!(plan[0].content_type, "image/jpeg");
    }

    #[test]
    fn closures_are_planners() {
        let planner = |req: &PlanRequest| match req.media_type {
            MediaType::Image => vec![
                original(req.content_type.clone()),
                VariantSetting::new("thumb", ImageResize::new(100, 100, ImageFormat::Png), "image/png"),
            ],
            _ => vec![original(req.content_type.clone())],
        };

        assert_eq!(planner.plan(&request(MediaType::Image, "image/png")).len(), 2);
        assert_eq!(planner.plan(&request(MediaType::File, "text/plain")).len(), 1);
    }

    #[test]
    fn plan_validation() {
        assert!(validate_plan(&[original("text/plain")]).is_ok());
        assert!(validate_plan(&[]).is_err());
        assert!(validate_plan(&[original("text/plain"), original("text/plain")]).is_err());
        assert!(validate_plan(&[VariantSetting::new("a/b", Passthrough, "text/plain")]).is_err());
    }

    #[tokio::test]
    async fn passthrough_preserves_bytes() {
        let input: ByteStream = Box::pin(futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"def")),
        ]));
        let output = Passthrough.apply(input).await.unwrap();
        assert_eq!(collect(output).await, b"abcdef");
    }

    #[tokio::test]
    async fn image_resize_bounds_dimensions() {
        let img = RgbImage::from_fn(200, 100, |x, _| image::Rgb([x as u8, 0, 0]));
        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut png, ImageFormat::Png).unwrap();
        let input: ByteStream = Box::pin(futures_util::stream::iter(vec![Ok(Bytes::from(png.into_inner()))]));

        let output = ImageResize::new(50, 50, ImageFormat::Png).apply(input).await.unwrap();
        let resized = image::load_from_memory(&collect(output).await).unwrap();

        assert_eq!(resized.dimensions(), (50, 25));
    }

    #[tokio::test]
    async fn image_resize_rejects_garbage() {
        let input: ByteStream = Box::pin(futures_util::stream::iter(vec![Ok(Bytes::from_static(b"nope"))]));
        let result = ImageResize::new(50, 50, ImageFormat::Png).apply(input).await;
        assert!(matches!(result, Err(MediaError::Processing { .. })));
    }
}
