//! Multi-item pipelines built on the inference backends
//!
//! - [`FrameExtractionPipeline`] streams frames from a video source to PNG files
//! - [`BatchInferencePipeline`] removes backgrounds from a directory of images

pub mod batch;
pub mod extract;

pub use batch::{BatchInferencePipeline, BatchReport, ItemFailure};
pub use extract::{ExtractionSummary, FrameExtractionPipeline};
