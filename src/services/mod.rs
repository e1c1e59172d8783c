//! Services layered on top of inference dispatch

pub mod compositor;
pub mod progress;

pub use compositor::{
    encode_png, remove_background_with_backend, AlphaMaskCompositor, BackgroundColor,
    CompositeOptions, Compositor,
};
pub use progress::{BatchProgressUpdate, NoOpProgressReporter, ProgressReporter, ProgressTracker};
