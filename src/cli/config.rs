//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::{BackendArgs, Cli, Command};
use crate::{config::DispatchConfig, services::CompositeOptions};
use anyhow::{Context, Result};

/// Convert CLI arguments to a `DispatchConfig`
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the configuration: file values first, then flag overrides
    pub(crate) fn from_cli(cli: &Cli) -> Result<DispatchConfig> {
        let mut config = match &cli.config {
            Some(path) => DispatchConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => DispatchConfig::default(),
        };

        Self::apply_backend_args(&mut config, &cli.backend);
        Self::apply_command_args(&mut config, &cli.command);

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn apply_backend_args(config: &mut DispatchConfig, args: &BackendArgs) {
        if let Some(kind) = args.backend {
            config.backend.kind = kind;
        }
        if let Some(address) = &args.address {
            config.backend.address.clone_from(address);
        }
        if let Some(model) = &args.model {
            config.backend.model.clone_from(model);
        }
        if let Some(region) = &args.region {
            config.backend.region = Some(region.clone());
        }
        if let Some(workers) = args.workers {
            config.pool.workers = workers;
            config.batch.workers = workers;
        }
        if let Some(secs) = args.timeout {
            config.request_timeout_secs = secs;
            config.batch.item_timeout_secs = secs;
        }
        if args.only_mask || args.bg_color.is_some() {
            config.composite = CompositeOptions {
                only_mask: args.only_mask || config.composite.only_mask,
                background_color: args.bg_color.or(config.composite.background_color),
            };
        }
    }

    fn apply_command_args(config: &mut DispatchConfig, command: &Command) {
        match command {
            Command::Image { .. } => {},
            Command::Extract {
                writers, prefix, ..
            } => {
                if let Some(writers) = writers {
                    config.extraction.writers = *writers;
                }
                if let Some(prefix) = prefix {
                    config.extraction.file_prefix.clone_from(prefix);
                }
            },
            Command::Batch { pattern, .. } => {
                if let Some(pattern) = pattern {
                    config.batch.pattern.clone_from(pattern);
                }
            },
        }
    }

    /// Check that the backend settings are complete
    ///
    /// Checked before any network setup so a missing `--addr` reads as a usage
    /// error.
    pub(crate) fn require_backend(config: &DispatchConfig) -> Result<()> {
        config
            .backend
            .validate()
            .context("Backend is not configured (use --backend and --addr, or --config)")
    }
}
