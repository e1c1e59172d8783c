//! Sequential frame sources

use super::VideoFrame;
use crate::error::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A producer of decoded frames, read one at a time
///
/// Sources are driven from a blocking thread, so implementations may block
/// while decoding.
pub trait VideoSource: Send {
    /// Read the next frame; `Ok(None)` marks the end of the stream
    ///
    /// # Errors
    /// - The underlying decoder fails
    fn read(&mut self) -> Result<Option<VideoFrame>>;

    /// Release decoder resources; called once after the last read
    fn close(&mut self) {}
}

impl<S: VideoSource + ?Sized> VideoSource for Box<S> {
    fn read(&mut self) -> Result<Option<VideoFrame>> {
        (**self).read()
    }

    fn close(&mut self) {
        (**self).close();
    }
}

/// In-memory frame sequence
#[derive(Debug, Default)]
pub struct VecSource {
    frames: VecDeque<VideoFrame>,
    closed: Arc<AtomicBool>,
}

impl VecSource {
    #[must_use]
    pub fn new(frames: Vec<VideoFrame>) -> Self {
        Self {
            frames: frames.into(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag set once `close` has been called, observable after the source is moved
    #[must_use]
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

impl FromIterator<VideoFrame> for VecSource {
    fn from_iter<I: IntoIterator<Item = VideoFrame>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl VideoSource for VecSource {
    fn read(&mut self) -> Result<Option<VideoFrame>> {
        Ok(self.frames.pop_front())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use std::time::Duration;

    #[test]
    fn test_vec_source_reads_in_order() {
        let mut source: VecSource = (0..3)
            .map(|i| VideoFrame::new(RgbaImage::new(2, 2), i, Duration::ZERO))
            .collect();
        let closed = source.closed_flag();

        for expected in 0..3 {
            assert_eq!(source.read().unwrap().unwrap().frame_number, expected);
        }
        assert!(source.read().unwrap().is_none());

        assert!(!closed.load(Ordering::SeqCst));
        source.close();
        assert!(closed.load(Ordering::SeqCst));
    }
}
