//! FFmpeg-backed frame source
//!
//! Decodes the best video stream of a file and converts every frame to RGBA.

use super::{VideoFormat, VideoFrame, VideoSource};
use crate::error::{DispatchError, Result};
use ffmpeg_next as ffmpeg;
use image::RgbaImage;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

type ScalerKey = (ffmpeg::format::Pixel, u32, u32);

/// Converts decoded frames to RGBA, reusing the scaler while the source
/// format and size stay the same
pub(crate) struct RgbaConverter {
    time_base: ffmpeg::Rational,
    scaler: Option<(ScalerKey, ffmpeg::software::scaling::Context)>,
    scalers_built: u64,
}

impl RgbaConverter {
    pub(crate) fn new(time_base: ffmpeg::Rational) -> Self {
        Self {
            time_base,
            scaler: None,
            scalers_built: 0,
        }
    }

    /// How many scalers have been created so far
    pub(crate) fn scalers_built(&self) -> u64 {
        self.scalers_built
    }

    fn scaler_for(&mut self, key: ScalerKey) -> Result<&mut ffmpeg::software::scaling::Context> {
        let stale = self.scaler.as_ref().map_or(true, |(cached, _)| *cached != key);
        if stale {
            let (format, width, height) = key;
            let context = ffmpeg::software::scaling::Context::get(
                format,
                width,
                height,
                ffmpeg::format::Pixel::RGBA,
                width,
                height,
                ffmpeg::software::scaling::Flags::BILINEAR,
            )
            .map_err(|e| DispatchError::internal(format!("failed to create frame scaler: {}", e)))?;
            debug!(?format, width, height, "frame scaler configured");
            self.scalers_built += 1;
            self.scaler = Some((key, context));
        }
        self.scaler
            .as_mut()
            .map(|(_, context)| context)
            .ok_or_else(|| DispatchError::internal("frame scaler missing"))
    }

    pub(crate) fn convert(
        &mut self,
        frame: &ffmpeg::util::frame::video::Video,
        frame_number: u64,
    ) -> Result<VideoFrame> {
        let width = frame.width();
        let height = frame.height();

        let mut rgba = ffmpeg::util::frame::video::Video::empty();
        self.scaler_for((frame.format(), width, height))?
            .run(frame, &mut rgba)
            .map_err(|e| DispatchError::internal(format!("failed to convert frame to RGBA: {}", e)))?;

        let stride = rgba.stride(0);
        let row_len = width as usize * 4;
        let data = rgba.data(0);
        let mut pixels = Vec::with_capacity(row_len * height as usize);
        for y in 0..height as usize {
            let row = data
                .get(y * stride..y * stride + row_len)
                .ok_or_else(|| DispatchError::internal("decoded frame shorter than its stride"))?;
            pixels.extend_from_slice(row);
        }
        let image = RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| DispatchError::internal("decoded frame has inconsistent dimensions"))?;

        let timestamp = frame.pts().map_or(Duration::ZERO, |pts| {
            let seconds = pts as f64 * f64::from(self.time_base.numerator())
                / f64::from(self.time_base.denominator());
            Duration::from_secs_f64(seconds.max(0.0))
        });
        Ok(VideoFrame::new(image, frame_number, timestamp))
    }
}

/// Frame source reading a video file through FFmpeg
pub struct FfmpegSource {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
    converter: RgbaConverter,
    frames_decoded: u64,
    packets_read: u64,
    eof_sent: bool,
}

impl FfmpegSource {
    /// Open `path` and prepare a decoder for its best video stream
    ///
    /// # Errors
    /// - Unsupported file extension
    /// - FFmpeg cannot open the file or find a decodable video stream
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(VideoFormat::from_extension)
            .ok_or_else(|| {
                DispatchError::invalid_config(format!(
                    "unsupported video format: {}",
                    path.display()
                ))
            })?;

        ffmpeg::init()
            .map_err(|e| DispatchError::internal(format!("failed to initialize FFmpeg: {}", e)))?;

        let input = ffmpeg::format::input(path).map_err(|e| {
            DispatchError::internal(format!(
                "failed to open video file {}: {}",
                path.display(),
                e
            ))
        })?;

        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| DispatchError::internal("no video stream found in file"))?;
        let stream_index = stream.index();
        let time_base = stream.time_base();

        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().video())
            .map_err(|e| DispatchError::internal(format!("failed to create video decoder: {}", e)))?;

        debug!(
            path = %path.display(),
            format = format.extension(),
            width = decoder.width(),
            height = decoder.height(),
            "opened video"
        );

        Ok(Self {
            input,
            decoder,
            stream_index,
            converter: RgbaConverter::new(time_base),
            frames_decoded: 0,
            packets_read: 0,
            eof_sent: false,
        })
    }
}

impl VideoSource for FfmpegSource {
    fn read(&mut self) -> Result<Option<VideoFrame>> {
        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let frame = self.converter.convert(&decoded, self.frames_decoded)?;
                self.frames_decoded += 1;
                return Ok(Some(frame));
            }
            if self.eof_sent {
                return Ok(None);
            }

            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() == self.stream_index {
                        self.packets_read += 1;
                        self.decoder.send_packet(&packet).map_err(|e| {
                            DispatchError::internal(format!("failed to decode packet: {}", e))
                        })?;
                    }
                },
                Err(ffmpeg::Error::Eof) => {
                    self.decoder.send_eof().map_err(|e| {
                        DispatchError::internal(format!("failed to flush decoder: {}", e))
                    })?;
                    self.eof_sent = true;
                },
                Err(e) => {
                    return Err(DispatchError::internal(format!(
                        "failed to read packet: {}",
                        e
                    )))
                },
            }
        }
    }

    fn close(&mut self) {
        info!(
            frames = self.frames_decoded,
            packets = self.packets_read,
            scalers = self.converter.scalers_built(),
            "video decoding finished"
        );
    }
}
