//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};
use rembg_dispatch::{DispatchError, InferenceBackend, InferenceContext, Result};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Backend returning a fixed mask, with optional latency and poisoned payloads
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    mask: Vec<u8>,
    delay: Duration,
    poisoned: Vec<Vec<u8>>,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(mask: Vec<u8>) -> Self {
        Self {
            mask,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn poison(mut self, payload: &[u8]) -> Self {
        self.poisoned.push(payload.to_vec());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn infer(&self, ctx: &InferenceContext, payload: &[u8]) -> Result<Vec<u8>> {
        ctx.check()?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.poisoned.iter().any(|p| p == payload) {
            return Err(DispatchError::backend("scripted failure"));
        }
        Ok(self.mask.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn png_bytes(image: &DynamicImage) -> Vec<u8> {
    rembg_dispatch::services::encode_png(image).unwrap()
}

/// Uniform gray mask
pub fn mask_png(level: u8) -> Vec<u8> {
    png_bytes(&DynamicImage::ImageLuma8(GrayImage::from_pixel(
        8,
        8,
        Luma([level]),
    )))
}

/// Opaque frame whose red channel encodes `seed`
pub fn frame_image(seed: u8) -> RgbaImage {
    RgbaImage::from_pixel(8, 8, Rgba([seed, 10, 20, 255]))
}

/// Write `count` frames named like extraction output, returning their bytes
pub fn write_frames(dir: &Path, count: u8) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let bytes = png_bytes(&DynamicImage::ImageRgba8(frame_image(i)));
            std::fs::write(dir.join(format!("frame_{:04}.png", i)), &bytes).unwrap();
            bytes
        })
        .collect()
}
