// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Signed webhook callbacks.
//!
//! Delivery is at-least-once: events carry unique ids so receivers can
//! deduplicate, and payloads are HMAC-signed over the verbatim body.

pub mod deliverer;
pub mod signature;

pub use deliverer::{
    HttpWebhookDeliverer, RecordingDeliverer, WebhookConfig, WebhookDeliverer, WebhookError,
};
pub use signature::{sign, verify, SIGNATURE_HEADER};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::jobs::{ErrorCode, Job, JobStatus};

/// Error detail carried by FAILED events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookErrorBody {
    /// Deterministic error code
    pub code: String,
    /// Human-readable message
    pub message: String,
}

/// One webhook event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    /// Unique per enqueue; receivers deduplicate on it
    pub event_id: String,
    /// Job the event concerns
    pub job_id: String,
    /// Owning tenant
    pub tenant_id: Uuid,
    /// Terminal status (SUCCEEDED or FAILED)
    pub status: JobStatus,
    /// Result URLs, present on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_urls: Option<Vec<String>>,
    /// Error detail, present on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WebhookErrorBody>,
    /// Event time, epoch milliseconds
    pub timestamp: i64,
}

impl WebhookEvent {
    /// Build a SUCCEEDED event for a job.
    pub fn succeeded(job: &Job) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            tenant_id: job.tenant_id,
            status: JobStatus::Succeeded,
            result_urls: Some(job.result_urls.clone()),
            error: None,
            timestamp: crate::coord::now_ms(),
        }
    }

    /// Build a FAILED event for a job.
    pub fn failed(job: &Job, code: ErrorCode, message: &str) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            tenant_id: job.tenant_id,
            status: JobStatus::Failed,
            result_urls: None,
            error: Some(WebhookErrorBody {
                code: code.as_str().to_string(),
                message: message.to_string(),
            }),
            timestamp: crate::coord::now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::jobs::GenerationMode;

    fn job() -> Job {
        Job {
            id: "job_1".into(),
            tenant_id: Uuid::new_v4(),
            idempotency_key: None,
            status: JobStatus::Succeeded,
            mode: GenerationMode::Final,
            prompt: "A red apple".into(),
            input_image: None,
            resolution: None,
            aspect_ratio: None,
            sample_count: None,
            model: None,
            attempts: 1,
            max_attempts: 4,
            error_code: None,
            error_message: None,
            credential_id: None,
            result_urls: vec!["https://img/1.png".into()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_succeeded_event_shape() {
        let event = WebhookEvent::succeeded(&job());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["status"], "SUCCEEDED");
        assert_eq!(value["jobId"], "job_1");
        assert!(value.get("error").is_none());
        assert_eq!(value["resultUrls"][0], "https://img/1.png");
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_failed_event_shape() {
        let event = WebhookEvent::failed(&job(), ErrorCode::ServerError, "upstream 500");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["status"], "FAILED");
        assert_eq!(value["error"]["code"], "SERVER_ERROR");
        assert!(value.get("resultUrls").is_none());
    }

    #[test]
    fn test_event_ids_are_unique() {
        let job = job();
        let a = WebhookEvent::succeeded(&job);
        let b = WebhookEvent::succeeded(&job);
        assert_ne!(a.event_id, b.event_id);
    }
}
