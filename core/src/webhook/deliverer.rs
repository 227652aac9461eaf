// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Webhook delivery with bounded exponential retries.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::signature::{sign, SIGNATURE_HEADER};
use super::WebhookEvent;

/// Webhook delivery failures.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Receiver answered with a non-2xx status
    #[error("webhook returned HTTP {status}")]
    Http {
        /// HTTP status code
        status: u16,
    },

    /// Transport failure
    #[error("webhook network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Payload failed to serialize
    #[error("webhook serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// All attempts failed
    #[error("webhook delivery exhausted after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Description of the last failure
        last: String,
    },
}

impl WebhookError {
    /// Deterministic code for logs and rows, e.g. `WEBHOOK_HTTP_500`.
    pub fn code(&self) -> String {
        match self {
            Self::Http { status } => format!("WEBHOOK_HTTP_{status}"),
            Self::Network(_) => "WEBHOOK_NETWORK".to_string(),
            Self::Serialize(_) => "WEBHOOK_SERIALIZE".to_string(),
            Self::Exhausted { .. } => "WEBHOOK_EXHAUSTED".to_string(),
        }
    }
}

/// Webhook delivery configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Per-POST timeout
    pub timeout: Duration,
    /// Attempt ceiling
    pub max_attempts: u32,
    /// First backoff delay
    pub backoff_base_ms: u64,
    /// Backoff ceiling
    pub backoff_cap_ms: u64,
    /// User-Agent header identifying the sender
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 8,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 60_000,
            user_agent: format!("image-gateway-webhook/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Delivery seam between the executor and receivers.
#[async_trait]
pub trait WebhookDeliverer: Send + Sync {
    /// Deliver one event, retrying internally as configured.
    async fn deliver(
        &self,
        endpoint: &str,
        secret: &str,
        event: &WebhookEvent,
    ) -> Result<(), WebhookError>;
}

/// HTTP deliverer.
pub struct HttpWebhookDeliverer {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl HttpWebhookDeliverer {
    /// Create a deliverer.
    pub fn new(config: WebhookConfig) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .use_rustls_tls()
            .build()?;
        Ok(Self { client, config })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let delay = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.config.backoff_cap_ms);
        Duration::from_millis(delay)
    }

    async fn post_once(
        &self,
        endpoint: &str,
        body: &[u8],
        signature: &str,
    ) -> Result<(), WebhookError> {
        let response = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/json")
            .header("User-Agent", &self.config.user_agent)
            .header(SIGNATURE_HEADER, signature)
            .body(body.to_vec())
            .send()
            .await?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(WebhookError::Http { status })
        }
    }
}

#[async_trait]
impl WebhookDeliverer for HttpWebhookDeliverer {
    async fn deliver(
        &self,
        endpoint: &str,
        secret: &str,
        event: &WebhookEvent,
    ) -> Result<(), WebhookError> {
        // Serialize exactly once; the signature covers these bytes.
        let body = serde_json::to_vec(event)?;
        let signature = sign(secret, &body);

        let mut last = String::new();
        for attempt in 0..self.config.max_attempts {
            match self.post_once(endpoint, &body, &signature).await {
                Ok(()) => {
                    debug!(event_id = %event.event_id, attempt, "webhook delivered");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        event_id = %event.event_id,
                        attempt,
                        code = %e.code(),
                        "webhook delivery attempt failed"
                    );
                    last = e.to_string();
                }
            }
            if attempt + 1 < self.config.max_attempts {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }

        Err(WebhookError::Exhausted {
            attempts: self.config.max_attempts,
            last,
        })
    }
}

/// One delivery captured by [`RecordingDeliverer`].
#[derive(Debug, Clone)]
pub struct RecordedDelivery {
    /// Target endpoint
    pub endpoint: String,
    /// Signing secret used
    pub secret: String,
    /// Verbatim signed body
    pub body: Vec<u8>,
    /// Signature header value
    pub signature: String,
    /// The event itself
    pub event: WebhookEvent,
}

/// Test deliverer that records instead of POSTing.
#[derive(Default)]
pub struct RecordingDeliverer {
    deliveries: Mutex<Vec<RecordedDelivery>>,
}

impl RecordingDeliverer {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded deliveries.
    pub fn deliveries(&self) -> Vec<RecordedDelivery> {
        self.deliveries.lock().clone()
    }

    /// Number of recorded deliveries.
    pub fn len(&self) -> usize {
        self.deliveries.lock().len()
    }

    /// Whether nothing has been delivered.
    pub fn is_empty(&self) -> bool {
        self.deliveries.lock().is_empty()
    }
}

#[async_trait]
impl WebhookDeliverer for RecordingDeliverer {
    async fn deliver(
        &self,
        endpoint: &str,
        secret: &str,
        event: &WebhookEvent,
    ) -> Result<(), WebhookError> {
        let body = serde_json::to_vec(event)?;
        let signature = sign(secret, &body);
        self.deliveries.lock().push(RecordedDelivery {
            endpoint: endpoint.to_string(),
            secret: secret.to_string(),
            body,
            signature,
            event: event.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::signature::verify;
    use crate::jobs::JobStatus;
    use uuid::Uuid;

    fn event() -> WebhookEvent {
        WebhookEvent {
            event_id: Uuid::new_v4().to_string(),
            job_id: "job_1".into(),
            tenant_id: Uuid::new_v4(),
            status: JobStatus::Succeeded,
            result_urls: Some(vec!["https://img/1.png".into()]),
            error: None,
            timestamp: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn test_recorded_signature_verifies() {
        let deliverer = RecordingDeliverer::new();
        deliverer
            .deliver("https://hooks.example.com", "whsec", &event())
            .await
            .unwrap();

        let recorded = deliverer.deliveries().pop().unwrap();
        assert!(verify("whsec", &recorded.body, &recorded.signature));
        // Tampering breaks it
        let mut tampered = recorded.body.clone();
        tampered[0] ^= 1;
        assert!(!verify("whsec", &tampered, &recorded.signature));
    }

    #[test]
    fn test_backoff_caps() {
        let deliverer = HttpWebhookDeliverer::new(WebhookConfig::default()).unwrap();
        assert_eq!(deliverer.backoff(0), Duration::from_millis(1_000));
        assert_eq!(deliverer.backoff(1), Duration::from_millis(2_000));
        assert_eq!(deliverer.backoff(10), Duration::from_millis(60_000));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(WebhookError::Http { status: 503 }.code(), "WEBHOOK_HTTP_503");
    }
}
