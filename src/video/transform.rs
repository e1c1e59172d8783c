//! Per-frame transforms applied during extraction

use super::VideoFrame;
use crate::{
    backends::run_with_context,
    context::InferenceContext,
    error::Result,
    inference::InferenceBackend,
    services::{encode_png, Compositor},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::trace;

/// Transformation applied to each frame before it is persisted
///
/// Called from the extraction driver's blocking thread.
pub trait FrameTransform: Send + Sync {
    /// # Errors
    /// Any error aborts the extraction.
    fn apply(&self, ctx: &InferenceContext, frame: VideoFrame) -> Result<VideoFrame>;
}

impl<F> FrameTransform for F
where
    F: Fn(&InferenceContext, VideoFrame) -> Result<VideoFrame> + Send + Sync,
{
    fn apply(&self, ctx: &InferenceContext, frame: VideoFrame) -> Result<VideoFrame> {
        self(ctx, frame)
    }
}

/// Removes each frame's background through an inference backend
pub struct BackendTransform<B: ?Sized> {
    backend: Arc<B>,
    compositor: Arc<dyn Compositor>,
    runtime: Handle,
    timeout: Option<Duration>,
}

impl<B: InferenceBackend + ?Sized> BackendTransform<B> {
    /// Create a transform bound to the current tokio runtime
    ///
    /// # Errors
    /// - Called outside a tokio runtime
    pub fn new(backend: Arc<B>, compositor: Arc<dyn Compositor>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            crate::error::DispatchError::internal(format!(
                "frame transform requires a tokio runtime: {}",
                e
            ))
        })?;
        Ok(Self {
            backend,
            compositor,
            runtime,
            timeout: None,
        })
    }

    /// Bound each frame's inference call
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<B: InferenceBackend + ?Sized> FrameTransform for BackendTransform<B> {
    fn apply(&self, ctx: &InferenceContext, frame: VideoFrame) -> Result<VideoFrame> {
        let (frame_number, timestamp) = (frame.frame_number, frame.timestamp);
        let source = frame.into_dynamic_image();
        let payload = encode_png(&source)?;

        let call_ctx = match self.timeout {
            Some(timeout) => ctx.child_with_timeout(timeout),
            None => ctx.child(),
        };
        let mask_bytes = self.runtime.block_on(run_with_context(
            &call_ctx,
            self.backend.infer(&call_ctx, &payload),
        ))?;
        trace!(frame = frame_number, mask_bytes = mask_bytes.len(), "mask received");

        let mask = image::load_from_memory(&mask_bytes)?;
        let output = self.compositor.composite_image(&source, &mask)?;
        Ok(VideoFrame::from_dynamic_image(&output, frame_number, timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::MockBackend;
    use crate::services::AlphaMaskCompositor;
    use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_backend_transform_applies_mask() {
        let mask = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([0])));
        let backend = Arc::new(MockBackend::with_response(encode_png(&mask).unwrap()));
        let transform =
            BackendTransform::new(backend.clone(), Arc::new(AlphaMaskCompositor::default()))
                .unwrap()
                .with_timeout(Duration::from_secs(5));

        let frame = VideoFrame::new(
            RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255])),
            7,
            Duration::from_millis(280),
        );
        let out = tokio::task::spawn_blocking(move || {
            transform.apply(&InferenceContext::background(), frame)
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(out.frame_number, 7);
        assert_eq!(out.timestamp, Duration::from_millis(280));
        assert!(out.image.pixels().all(|p| p[3] == 0));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_backend_is_cut_off_at_frame_timeout() {
        let backend = Arc::new(MockBackend::echo().delay(Duration::from_secs(5)));
        let transform = BackendTransform::new(backend, Arc::new(AlphaMaskCompositor::default()))
            .unwrap()
            .with_timeout(Duration::from_millis(50));

        let frame = VideoFrame::new(RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 255])), 0, Duration::ZERO);
        let start = std::time::Instant::now();
        let err = tokio::task::spawn_blocking(move || {
            transform.apply(&InferenceContext::background(), frame)
        })
        .await
        .unwrap()
        .unwrap_err();

        assert!(err.is_cancellation());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_closure_transform() {
        let invert = |_: &InferenceContext, mut frame: VideoFrame| -> Result<VideoFrame> {
            for pixel in frame.image.pixels_mut() {
                pixel[0] = 255 - pixel[0];
            }
            Ok(frame)
        };
        let frame = VideoFrame::new(RgbaImage::from_pixel(1, 1, Rgba([5, 0, 0, 255])), 0, Duration::ZERO);
        let out = invert.apply(&InferenceContext::background(), frame).unwrap();
        assert_eq!(out.image.get_pixel(0, 0)[0], 250);
    }
}
