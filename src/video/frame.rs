//! Decoded video frame representation

use image::{DynamicImage, RgbaImage};
use std::time::Duration;

/// A single decoded video frame with its position in the stream
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame image data
    pub image: RgbaImage,
    /// Position in the decoded sequence, as reported by the source
    pub frame_number: u64,
    /// Presentation timestamp
    pub timestamp: Duration,
}

impl VideoFrame {
    #[must_use]
    pub fn new(image: RgbaImage, frame_number: u64, timestamp: Duration) -> Self {
        Self {
            image,
            frame_number,
            timestamp,
        }
    }

    /// Create a frame from any decoded image
    #[must_use]
    pub fn from_dynamic_image(image: &DynamicImage, frame_number: u64, timestamp: Duration) -> Self {
        Self::new(image.to_rgba8(), frame_number, timestamp)
    }

    /// Take the pixels as a `DynamicImage`, dropping the stream position
    #[must_use]
    pub fn into_dynamic_image(self) -> DynamicImage {
        DynamicImage::ImageRgba8(self.image)
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// A frame with no pixels; extraction skips these
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }
}
