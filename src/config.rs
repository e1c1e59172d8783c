//! Configuration types for dispatch, pooling and the frame pipelines

use crate::error::{DispatchError, Result};
use crate::services::CompositeOptions;
use crate::utils::TensorDataType;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default Triton model name
pub const DEFAULT_MODEL: &str = "u2net";

/// Default Triton input tensor name
pub const DEFAULT_INPUT_NAME: &str = "INPUT__0";

/// Default batch file pattern, matching the names the extraction pipeline writes
pub const DEFAULT_BATCH_PATTERN: &str = "frame_*.png";

/// Default per-request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Upper bound for worker, writer and queue sizes
pub const MAX_WORKERS: usize = 4096;

/// Worker count derived from the host's available parallelism
#[must_use]
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(crate::pool::DEFAULT_POOL_WORKERS)
}

/// Remote backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// AWS SageMaker real-time endpoint
    #[serde(rename = "sagemaker")]
    SageMaker,
    /// Triton inference server over HTTP (KServe v2)
    TritonHttp,
    /// Triton inference server over gRPC
    TritonGrpc,
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::SageMaker
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SageMaker => write!(f, "sagemaker"),
            Self::TritonHttp => write!(f, "triton_http"),
            Self::TritonGrpc => write!(f, "triton_grpc"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sagemaker" => Ok(Self::SageMaker),
            "triton_http" | "triton-http" => Ok(Self::TritonHttp),
            "triton_grpc" | "triton-grpc" => Ok(Self::TritonGrpc),
            other => Err(DispatchError::invalid_config(format!(
                "unknown backend '{}'. Valid options: sagemaker, triton_http, triton_grpc",
                other
            ))),
        }
    }
}

/// Connection and tensor settings for a remote backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Which backend to talk to
    pub kind: BackendKind,

    /// Endpoint name (SageMaker) or `host:port` / URL (Triton)
    pub address: String,

    /// Triton model name
    pub model: String,

    /// Triton input tensor name
    pub input_name: String,

    /// Triton output tensor to request (None = server default outputs)
    pub output_name: Option<String>,

    /// Input tensor shape
    pub shape: Vec<usize>,

    /// Input tensor datatype
    pub datatype: TensorDataType,

    /// AWS region override (None = default provider chain)
    pub region: Option<String>,

    /// Content type sent to SageMaker
    pub content_type: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            address: String::new(),
            model: DEFAULT_MODEL.to_string(),
            input_name: DEFAULT_INPUT_NAME.to_string(),
            output_name: None,
            shape: vec![1, 3, 320, 320],
            datatype: TensorDataType::Uint8,
            region: None,
            content_type: "application/octet-stream".to_string(),
        }
    }
}

impl BackendConfig {
    /// Check the settings needed to actually connect
    ///
    /// # Errors
    /// - Empty address, model or input name
    /// - Empty shape or a zero dimension
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(DispatchError::invalid_config(format!(
                "{} backend requires an address",
                self.kind
            )));
        }
        if self.kind != BackendKind::SageMaker {
            if self.model.is_empty() {
                return Err(DispatchError::invalid_config("model name must not be empty"));
            }
            if self.input_name.is_empty() {
                return Err(DispatchError::invalid_config("input name must not be empty"));
            }
        }
        if self.shape.is_empty() || self.shape.contains(&0) {
            return Err(DispatchError::invalid_config(format!(
                "tensor shape {:?} must be non-empty with positive dimensions",
                self.shape
            )));
        }
        Ok(())
    }
}

/// Worker pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of workers (0 = 4)
    pub workers: usize,

    /// Job queue capacity (0 = same as workers)
    pub queue_capacity: usize,
}

/// Batch inference pipeline settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of item workers (0 = available parallelism)
    pub workers: usize,

    /// Glob pattern matched inside the input directory
    pub pattern: String,

    /// Timeout applied to each item's inference call
    pub item_timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            pattern: DEFAULT_BATCH_PATTERN.to_string(),
            item_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl BatchConfig {
    /// Effective worker count
    #[must_use]
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            default_worker_count()
        } else {
            self.workers
        }
    }

    #[must_use]
    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }
}

/// Frame extraction pipeline settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Number of writer workers (0 = available parallelism)
    pub writers: usize,

    /// Output file prefix; files are named `{prefix}_{index:04}.png`
    pub file_prefix: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            writers: 0,
            file_prefix: "frame".to_string(),
        }
    }
}

impl ExtractionConfig {
    /// Effective writer count
    #[must_use]
    pub fn writer_count(&self) -> usize {
        if self.writers == 0 {
            default_worker_count()
        } else {
            self.writers
        }
    }

    /// Persistence queue capacity, twice the writer count
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.writer_count().saturating_mul(2)
    }
}

/// Top-level configuration for the `rembg` tool
///
/// Loadable from JSON with every field optional:
///
/// ```json
/// {
///   "backend": { "kind": "triton_http", "address": "localhost:8000" },
///   "pool": { "workers": 8 },
///   "request_timeout_secs": 30
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub backend: BackendConfig,
    pub pool: PoolConfig,

    /// Timeout for single-image requests
    pub request_timeout_secs: u64,

    pub batch: BatchConfig,
    pub extraction: ExtractionConfig,
    pub composite: CompositeOptions,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            pool: PoolConfig::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            batch: BatchConfig::default(),
            extraction: ExtractionConfig::default(),
            composite: CompositeOptions::default(),
        }
    }
}

impl DispatchConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use rembg_dispatch::{BackendKind, DispatchConfig};
    ///
    /// let config = DispatchConfig::builder()
    ///     .backend_kind(BackendKind::TritonHttp)
    ///     .address("localhost:8000")
    ///     .workers(8)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.pool.workers, 8);
    /// ```
    #[must_use]
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder::default()
    }

    /// Load and validate a JSON configuration file
    ///
    /// # Errors
    /// - The file cannot be read
    /// - The JSON is malformed or fails validation
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| DispatchError::file_io_error("read config file", path, e))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            DispatchError::invalid_config(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate parameters that do not depend on a live backend
    ///
    /// The backend address is checked when a backend is built, so a default
    /// configuration is valid on its own.
    ///
    /// # Errors
    /// - Zero request or item timeout
    /// - Empty tensor shape or a zero dimension
    /// - Empty batch pattern or file prefix
    /// - A worker, writer or queue size above [`MAX_WORKERS`]
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(DispatchError::invalid_config(
                "request timeout must be at least 1 second",
            ));
        }
        if self.batch.item_timeout_secs == 0 {
            return Err(DispatchError::invalid_config(
                "batch item timeout must be at least 1 second",
            ));
        }
        if self.backend.shape.is_empty() || self.backend.shape.contains(&0) {
            return Err(DispatchError::invalid_config(format!(
                "tensor shape {:?} must be non-empty with positive dimensions",
                self.backend.shape
            )));
        }
        if self.batch.pattern.trim().is_empty() {
            return Err(DispatchError::invalid_config("batch pattern must not be empty"));
        }
        if self.extraction.file_prefix.is_empty() {
            return Err(DispatchError::invalid_config("file prefix must not be empty"));
        }
        for (name, value) in [
            ("pool workers", self.pool.workers),
            ("pool queue capacity", self.pool.queue_capacity),
            ("batch workers", self.batch.workers),
            ("extraction writers", self.extraction.writers),
        ] {
            if value > MAX_WORKERS {
                return Err(DispatchError::invalid_config(format!(
                    "{} must be at most {}, got {}",
                    name, MAX_WORKERS, value
                )));
            }
        }
        Ok(())
    }
}

/// Builder for `DispatchConfig`
#[derive(Debug, Default)]
pub struct DispatchConfigBuilder {
    config: DispatchConfig,
}

impl DispatchConfigBuilder {
    #[must_use]
    pub fn backend_kind(mut self, kind: BackendKind) -> Self {
        self.config.backend.kind = kind;
        self
    }

    /// Endpoint name or server address
    #[must_use]
    pub fn address<S: Into<String>>(mut self, address: S) -> Self {
        self.config.backend.address = address.into();
        self
    }

    #[must_use]
    pub fn model<S: Into<String>>(mut self, model: S) -> Self {
        self.config.backend.model = model.into();
        self
    }

    #[must_use]
    pub fn region<S: Into<String>>(mut self, region: S) -> Self {
        self.config.backend.region = Some(region.into());
        self
    }

    /// Set pool worker count (0 = default)
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.pool.workers = workers;
        self
    }

    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.pool.queue_capacity = capacity;
        self
    }

    /// Set the single-request timeout, rounded down to whole seconds
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_secs = timeout.as_secs();
        self
    }

    #[must_use]
    pub fn batch_workers(mut self, workers: usize) -> Self {
        self.config.batch.workers = workers;
        self
    }

    #[must_use]
    pub fn batch_pattern<S: Into<String>>(mut self, pattern: S) -> Self {
        self.config.batch.pattern = pattern.into();
        self
    }

    #[must_use]
    pub fn item_timeout(mut self, timeout: Duration) -> Self {
        self.config.batch.item_timeout_secs = timeout.as_secs();
        self
    }

    #[must_use]
    pub fn writers(mut self, writers: usize) -> Self {
        self.config.extraction.writers = writers;
        self
    }

    #[must_use]
    pub fn file_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.extraction.file_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn composite(mut self, options: CompositeOptions) -> Self {
        self.config.composite = options;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any rule checked by [`DispatchConfig::validate`]
    pub fn build(self) -> Result<DispatchConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
