//! Error types for inference dispatch and pipeline operations

use crate::context::CancelReason;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Error types produced by the dispatch layer and the pipelines built on it
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The request context was canceled or its deadline passed before a
    /// result could be delivered
    #[error("{0}")]
    Cancelled(CancelReason),

    /// The underlying inference call failed (network, status, malformed response)
    #[error("Backend error: {0}")]
    Backend(String),

    /// Submission attempted after the worker pool began shutting down
    #[error("Worker pool is closed")]
    PoolClosed,

    /// Failure scoped to a single batch item
    #[error("Failed to process '{}': {source}", path.display())]
    Item {
        path: PathBuf,
        #[source]
        source: Box<DispatchError>,
    },

    /// Failure while extracting a frame; aborts the whole extraction
    #[error("Frame {index} failed: {source}")]
    Stream {
        index: u64,
        #[source]
        source: Box<DispatchError>,
    },

    /// Batch enumeration found nothing to process
    #[error("No inputs found: {0}")]
    NoInputs(String),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode/encode errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error for unexpected conditions (panicked workers, runtime missing)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Create a new backend error
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Wrap an error as a batch item failure
    pub fn item<P: Into<PathBuf>>(path: P, source: DispatchError) -> Self {
        Self::Item {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an error as a frame extraction failure
    pub fn stream(index: u64, source: DispatchError) -> Self {
        Self::Stream {
            index,
            source: Box::new(source),
        }
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Whether this error (or the error it wraps) is a cancellation
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled(_) => true,
            Self::Item { source, .. } | Self::Stream { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }

    /// The cancellation reason, if this is a cancellation error
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            Self::Cancelled(reason) => Some(*reason),
            Self::Item { source, .. } | Self::Stream { source, .. } => source.cancel_reason(),
            _ => None,
        }
    }
}

impl From<CancelReason> for DispatchError {
    fn from(reason: CancelReason) -> Self {
        Self::Cancelled(reason)
    }
}

impl From<tokio::task::JoinError> for DispatchError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("worker task failed: {}", err))
    }
}
