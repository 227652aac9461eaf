// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Configuration data structures for the gateway.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::credentials::HealthConfig;
use crate::database::DatabaseConfig;
use crate::providers::endpoints::{AuthStyle, EndpointDescriptor};
use crate::providers::gemini::GeminiConfig;
use crate::queue::RetryPolicy;
use crate::webhook::WebhookConfig;

/// Root configuration.
///
/// Sources are merged in this precedence (highest to lowest):
/// 1. Environment variables (`IMAGE_GATEWAY_` prefix, `__` nesting)
/// 2. Config file (TOML)
/// 3. Defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP server settings
    pub server: ServerSettings,
    /// PostgreSQL settings
    pub database: DatabaseConfig,
    /// Coordination store settings
    pub redis: RedisSettings,
    /// API authentication settings
    pub auth: AuthSettings,
    /// Global admission limits
    pub limits: LimitSettings,
    /// Retry scheduling
    pub retry: RetrySettings,
    /// Worker pool settings
    pub worker: WorkerSettings,
    /// Result cache settings
    pub cache: CacheConfig,
    /// Credential health settings
    pub health: HealthConfig,
    /// Upstream provider settings
    pub provider: ProviderSettings,
    /// Webhook delivery settings
    pub webhook: WebhookSettings,
    /// Blob storage settings
    pub storage: StorageSettings,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// CORS allowed origins; `*` allows any
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_allowed_origins: vec!["*".to_string()],
        }
    }
}

impl ServerSettings {
    /// Socket address string.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Coordination store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RedisSettings {
    /// Connection URL
    pub url: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// API authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthSettings {
    /// Server-side salt mixed into API-key fingerprints
    pub api_key_salt: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            api_key_salt: "dev-salt-change-in-production".to_string(),
        }
    }
}

/// Global admission limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitSettings {
    /// Instance-wide requests per minute
    pub global_rpm: u32,
    /// Instance-wide concurrent provider calls
    pub global_concurrency: u32,
    /// TTL armed on in-flight counters; must exceed the job budget
    pub inflight_ttl_secs: i64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            global_rpm: 600,
            global_concurrency: 100,
            inflight_ttl_secs: 360,
        }
    }
}

/// Retry scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempt ceiling per job
    pub max_attempts: i32,
    /// First backoff delay
    pub base_ms: u64,
    /// Backoff ceiling
    pub cap_ms: u64,
    /// Backoff ceiling while the provider sheds load
    pub overload_cap_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_ms: 2_000,
            cap_ms: 30_000,
            overload_cap_ms: 60_000,
        }
    }
}

impl RetrySettings {
    /// Backoff policy for the queue layer.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_ms: self.base_ms,
            cap_ms: self.cap_ms,
            overload_cap_ms: self.overload_cap_ms,
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerSettings {
    /// Concurrent job tasks per process
    pub concurrency: usize,
    /// Queue poll interval when idle
    pub poll_interval_ms: u64,
    /// Per-job wall-clock budget, including retries within the attempt
    pub job_timeout_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 50,
            poll_interval_ms: 500,
            job_timeout_secs: 300,
        }
    }
}

/// Upstream provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderSettings {
    /// Provider tag scheduled against
    pub provider: String,
    /// Per-request timeout
    pub request_timeout_secs: u64,
    /// Whether 503s trigger endpoint fallback
    pub endpoint_fallback: bool,
    /// Endpoint variants, in fallback order
    pub endpoints: Vec<EndpointDescriptor>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            request_timeout_secs: 120,
            endpoint_fallback: true,
            endpoints: vec![EndpointDescriptor {
                tag: "primary".to_string(),
                base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                auth: AuthStyle::Query,
                default_model: "gemini-2.5-flash-image".to_string(),
                preferred_models: vec!["gemini-2.5-flash-image".to_string()],
            }],
        }
    }
}

impl ProviderSettings {
    /// Driver configuration.
    pub fn gemini_config(&self) -> GeminiConfig {
        GeminiConfig {
            timeout: Duration::from_secs(self.request_timeout_secs),
            endpoint_fallback: self.endpoint_fallback,
        }
    }
}

/// Webhook delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebhookSettings {
    /// Per-POST timeout
    pub timeout_secs: u64,
    /// Attempt ceiling
    pub max_attempts: u32,
    /// First backoff delay
    pub backoff_base_ms: u64,
    /// Backoff ceiling
    pub backoff_cap_ms: u64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_attempts: 8,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 60_000,
        }
    }
}

impl WebhookSettings {
    /// Deliverer configuration.
    pub fn webhook_config(&self) -> WebhookConfig {
        WebhookConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            max_attempts: self.max_attempts,
            backoff_base_ms: self.backoff_base_ms,
            backoff_cap_ms: self.backoff_cap_ms,
            ..WebhookConfig::default()
        }
    }
}

/// Blob storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    /// Filesystem root for stored images
    pub root_dir: String,
    /// Public URL prefix under which stored objects are served
    pub public_base_url: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root_dir: "./data/images".to_string(),
            public_base_url: "http://localhost:8080/images".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = GatewayConfig::default();
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.worker.concurrency, 50);
        assert_eq!(config.cache.ttl_secs, 24 * 3600);
        assert_eq!(config.health.failure_threshold, 5);
        assert_eq!(config.webhook.max_attempts, 8);
        assert_eq!(config.provider.endpoints.len(), 1);
    }

    #[test]
    fn test_bind_addr() {
        let server = ServerSettings::default();
        assert_eq!(server.bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_retry_policy_conversion() {
        let settings = RetrySettings::default();
        let policy = settings.policy();
        assert_eq!(policy.base_ms, 2_000);
        assert_eq!(policy.overload_cap_ms, 60_000);
    }
}
