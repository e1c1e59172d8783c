//! Mask compositing service
//!
//! Backends return a grayscale mask; this module applies it as the alpha
//! channel of the source image and encodes the result as PNG.

use crate::{
    backends::run_with_context,
    context::InferenceContext,
    error::{DispatchError, Result},
    inference::InferenceBackend,
};
use image::{imageops::FilterType, DynamicImage, GrayImage, ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;
use tracing::trace;

/// Solid color used to flatten transparent output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl BackgroundColor {
    #[must_use]
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    #[must_use]
    pub fn white() -> Self {
        Self::new(255, 255, 255)
    }
}

impl std::str::FromStr for BackgroundColor {
    type Err = DispatchError;

    /// Parse `#rrggbb` or `rrggbb`
    fn from_str(s: &str) -> Result<Self> {
        let hex = s.trim().trim_start_matches('#');
        let invalid =
            || DispatchError::invalid_config(format!("invalid color '{}', expected #rrggbb", s));
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(invalid());
        }
        let channel = |range: std::ops::Range<usize>| {
            hex.get(range)
                .and_then(|part| u8::from_str_radix(part, 16).ok())
                .ok_or_else(invalid)
        };
        Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

/// How a mask is turned into output pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeOptions {
    /// Output the (resized) mask itself instead of a cutout
    pub only_mask: bool,

    /// Flatten the cutout onto this color instead of keeping transparency
    pub background_color: Option<BackgroundColor>,
}

/// Combines a source image with the mask a backend produced
pub trait Compositor: Send + Sync {
    /// Composite decoded images
    ///
    /// # Errors
    /// - The mask is empty
    fn composite_image(&self, source: &DynamicImage, mask: &DynamicImage) -> Result<DynamicImage>;

    /// Composite encoded images, returning PNG bytes
    ///
    /// # Errors
    /// - Either input cannot be decoded
    /// - The result cannot be encoded
    fn composite(&self, source: &[u8], mask: &[u8]) -> Result<Vec<u8>> {
        let source = image::load_from_memory(source)?;
        let mask = image::load_from_memory(mask)?;
        let output = self.composite_image(&source, &mask)?;
        encode_png(&output)
    }
}

/// Default compositor: mask luminance becomes the alpha channel
#[derive(Debug, Clone, Default)]
pub struct AlphaMaskCompositor {
    options: CompositeOptions,
}

impl AlphaMaskCompositor {
    #[must_use]
    pub fn new(options: CompositeOptions) -> Self {
        Self { options }
    }

    #[must_use]
    pub fn options(&self) -> &CompositeOptions {
        &self.options
    }

    fn fit_mask(mask: &DynamicImage, width: u32, height: u32) -> Result<GrayImage> {
        if mask.width() == 0 || mask.height() == 0 {
            return Err(DispatchError::backend("backend returned an empty mask"));
        }
        let luma = mask.to_luma8();
        if luma.dimensions() == (width, height) {
            return Ok(luma);
        }
        trace!(
            mask_width = luma.width(),
            mask_height = luma.height(),
            width,
            height,
            "resizing mask to source dimensions"
        );
        Ok(image::imageops::resize(&luma, width, height, FilterType::Triangle))
    }

    fn flatten(cutout: &mut RgbaImage, color: BackgroundColor) {
        for pixel in cutout.pixels_mut() {
            let alpha = f32::from(pixel[3]) / 255.0;
            let blend = |fg: u8, bg: u8| {
                (f32::from(fg) * alpha + f32::from(bg) * (1.0 - alpha))
                    .round()
                    .clamp(0.0, 255.0) as u8
            };
            *pixel = image::Rgba([
                blend(pixel[0], color.r),
                blend(pixel[1], color.g),
                blend(pixel[2], color.b),
                255,
            ]);
        }
    }
}

impl Compositor for AlphaMaskCompositor {
    fn composite_image(&self, source: &DynamicImage, mask: &DynamicImage) -> Result<DynamicImage> {
        let mask = Self::fit_mask(mask, source.width(), source.height())?;
        if self.options.only_mask {
            return Ok(DynamicImage::ImageLuma8(mask));
        }

        let mut cutout = source.to_rgba8();
        for (pixel, alpha) in cutout.pixels_mut().zip(mask.pixels()) {
            pixel[3] = alpha[0];
        }
        if let Some(color) = self.options.background_color {
            Self::flatten(&mut cutout, color);
        }
        Ok(DynamicImage::ImageRgba8(cutout))
    }
}

/// Encode an image as PNG bytes
///
/// # Errors
/// - The encoder rejects the image
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

/// Run one image through `backend` and composite the returned mask
///
/// The source format is checked before the backend is called so unreadable
/// input never costs an inference request. The call is abandoned once `ctx`
/// is done even if the backend does not observe it. Compositing runs on a
/// blocking thread.
///
/// # Errors
/// - The source is not a recognized image format
/// - The backend call fails or `ctx` is done
/// - The mask cannot be decoded or composited
pub async fn remove_background_with_backend<B>(
    ctx: &InferenceContext,
    backend: &B,
    compositor: Arc<dyn Compositor>,
    image_bytes: Vec<u8>,
) -> Result<Vec<u8>>
where
    B: InferenceBackend + ?Sized,
{
    image::guess_format(&image_bytes)?;
    let mask = run_with_context(ctx, backend.infer(ctx, &image_bytes)).await?;
    tokio::task::spawn_blocking(move || compositor.composite(&image_bytes, &mask)).await?
}
