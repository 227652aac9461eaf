// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Configuration loading.
//!
//! Hierarchical precedence, highest first:
//! 1. Environment variables (`IMAGE_GATEWAY_` prefix, `__` nesting, e.g.
//!    `IMAGE_GATEWAY_DATABASE__URL`)
//! 2. Config file (TOML, path via [`ConfigLoader::with_file`] or
//!    `./gateway.toml`)
//! 3. Defaults

pub mod models;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File};
use std::path::{Path, PathBuf};

pub use models::{
    AuthSettings, GatewayConfig, LimitSettings, ProviderSettings, RedisSettings, RetrySettings,
    ServerSettings, StorageSettings, WebhookSettings, WorkerSettings,
};

/// Default configuration file name, looked up in the working directory.
const CONFIG_FILE_NAME: &str = "gateway.toml";

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "IMAGE_GATEWAY";

/// Environment variable separator for nested configuration.
const ENV_SEPARATOR: &str = "__";

/// Configuration loader with builder pattern.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    custom_file: Option<PathBuf>,
    skip_default_file: bool,
    skip_env: bool,
}

impl ConfigLoader {
    /// Create a loader with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific configuration file instead of `./gateway.toml`.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.custom_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Skip the default configuration file.
    pub fn skip_default_file(mut self) -> Self {
        self.skip_default_file = true;
        self
    }

    /// Skip environment variable overrides (useful in tests).
    pub fn skip_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Load and validate the configuration from all sources.
    pub fn load(&self) -> Result<GatewayConfig> {
        let mut builder = ConfigBuilder::builder();

        let defaults = GatewayConfig::default();
        let defaults_value =
            serde_json::to_string(&defaults).context("failed to serialize defaults")?;
        builder = builder.add_source(File::from_str(
            &defaults_value,
            config::FileFormat::Json,
        ));

        if let Some(custom) = &self.custom_file {
            tracing::info!("Loading config from: {}", custom.display());
            builder = builder.add_source(
                File::from(custom.as_path())
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        } else if !self.skip_default_file {
            builder = builder.add_source(
                File::with_name(CONFIG_FILE_NAME)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        if !self.skip_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            );
        }

        let config: GatewayConfig = builder
            .build()
            .context("failed to assemble configuration")?
            .try_deserialize()
            .context("configuration did not match the expected schema")?;

        validate(&config)?;
        Ok(config)
    }
}

fn validate(config: &GatewayConfig) -> Result<()> {
    anyhow::ensure!(
        config.retry.max_attempts >= 1,
        "retry.max_attempts must be at least 1"
    );
    anyhow::ensure!(
        config.worker.concurrency >= 1,
        "worker.concurrency must be at least 1"
    );
    anyhow::ensure!(
        !config.provider.endpoints.is_empty(),
        "provider.endpoints must not be empty"
    );
    anyhow::ensure!(
        config.limits.inflight_ttl_secs as u64 >= config.worker.job_timeout_secs,
        "limits.inflight_ttl_secs must cover worker.job_timeout_secs, \
         otherwise in-flight tokens expire under running jobs"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_defaults() {
        let config = ConfigLoader::new()
            .skip_default_file()
            .skip_env()
            .load()
            .unwrap();
        assert_eq!(config, GatewayConfig::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(
            &path,
            r#"
            [limits]
            global_rpm = 1200

            [retry]
            max_attempts = 6
            "#,
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_file(&path)
            .skip_env()
            .load()
            .unwrap();
        assert_eq!(config.limits.global_rpm, 1200);
        assert_eq!(config.retry.max_attempts, 6);
        // Untouched sections keep their defaults
        assert_eq!(config.worker.concurrency, 50);
    }

    #[test]
    fn test_validation_rejects_bad_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(
            &path,
            r#"
            [limits]
            inflight_ttl_secs = 10

            [worker]
            job_timeout_secs = 300
            "#,
        )
        .unwrap();

        let result = ConfigLoader::new().with_file(&path).skip_env().load();
        assert!(result.is_err());
    }
}
