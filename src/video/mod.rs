//! Video frame sources and per-frame transforms
//!
//! Frames are produced by a [`VideoSource`], optionally passed through a
//! [`FrameTransform`], and persisted by the extraction pipeline. The FFmpeg
//! source is available with the `video-ffmpeg` feature.

#[cfg(feature = "video-ffmpeg")]
pub mod ffmpeg;

pub mod frame;
pub mod source;
pub mod transform;

#[cfg(feature = "video-ffmpeg")]
pub use self::ffmpeg::FfmpegSource;

pub use self::frame::VideoFrame;
pub use self::source::{VecSource, VideoSource};
pub use self::transform::{BackendTransform, FrameTransform};

/// Container formats accepted by the FFmpeg source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFormat {
    /// MP4 format (H.264/H.265)
    Mp4,
    /// AVI format
    Avi,
    /// MOV format (QuickTime)
    Mov,
    /// MKV format (Matroska)
    Mkv,
    /// WebM format
    WebM,
}

impl VideoFormat {
    /// Get file extension for the video format
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Avi => "avi",
            Self::Mov => "mov",
            Self::Mkv => "mkv",
            Self::WebM => "webm",
        }
    }

    /// Detect format from file extension
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp4" => Some(Self::Mp4),
            "avi" => Some(Self::Avi),
            "mov" => Some(Self::Mov),
            "mkv" => Some(Self::Mkv),
            "webm" => Some(Self::WebM),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_format_from_extension() {
        assert_eq!(VideoFormat::from_extension("MP4"), Some(VideoFormat::Mp4));
        assert_eq!(VideoFormat::from_extension("webm"), Some(VideoFormat::WebM));
        assert_eq!(VideoFormat::from_extension("gif"), None);
        assert_eq!(VideoFormat::Mkv.extension(), "mkv");
    }
}
