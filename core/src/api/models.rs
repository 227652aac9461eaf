// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! API request and response models.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::error::ApiError;
use crate::jobs::{AspectRatio, GenerationMode, Job, JobStatus, Resolution};

/// Maximum decoded size of an input image.
const MAX_INPUT_IMAGE_BYTES: usize = 4 * 1024 * 1024;

fn data_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^data:image/(png|jpeg|jpg|gif|webp);base64,[A-Za-z0-9+/]+=*$")
            .expect("static regex compiles")
    })
}

/// Body of `POST /v1/images/generate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GenerateImageRequest {
    /// Prompt text
    pub prompt: String,
    /// Optional reference image as a data URL
    #[serde(default)]
    pub input_image: Option<String>,
    /// Generation mode (defaults to `final`)
    #[serde(default)]
    pub mode: Option<GenerationMode>,
    /// Requested resolution tier
    #[serde(default)]
    pub resolution: Option<Resolution>,
    /// Requested aspect ratio
    #[serde(default)]
    pub aspect_ratio: Option<AspectRatio>,
    /// Requested number of images
    #[serde(default)]
    pub sample_count: Option<i32>,
}

impl GenerateImageRequest {
    /// Validate field constraints beyond what serde enforces.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.prompt.trim().is_empty() {
            return Err(ApiError::InvalidRequest("prompt must not be empty".into()));
        }
        if let Some(count) = self.sample_count {
            if !(1..=10).contains(&count) {
                return Err(ApiError::InvalidRequest(
                    "sampleCount must be between 1 and 10".into(),
                ));
            }
        }
        if let Some(image) = &self.input_image {
            if !data_url_regex().is_match(image) {
                return Err(ApiError::InvalidRequest(
                    "inputImage must be a base64 data URL of a supported image type".into(),
                ));
            }
            let payload = image
                .split_once(";base64,")
                .map(|(_, data)| data)
                .unwrap_or_default();
            let decoded = BASE64.decode(payload).map_err(|_| {
                ApiError::InvalidRequest("inputImage payload is not valid base64".into())
            })?;
            if decoded.len() > MAX_INPUT_IMAGE_BYTES {
                return Err(ApiError::InvalidRequest(
                    "inputImage exceeds the 4 MiB limit".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Response of `POST /v1/images/generate`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImageResponse {
    /// Created (or idempotently reused) job id
    pub job_id: String,
    /// Job status at submission
    pub status: JobStatus,
}

/// Error detail on a failed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobErrorBody {
    /// Deterministic error code
    pub code: String,
    /// Human-readable message
    pub message: String,
}

/// One job, as exposed to pollers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    /// Job id
    pub job_id: String,
    /// Current status
    pub status: JobStatus,
    /// Result URLs appended so far
    pub result_urls: Vec<String>,
    /// Error detail, present once the job failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobErrorBody>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        let error = match (&job.error_code, job.status) {
            (Some(code), JobStatus::Failed | JobStatus::Retrying) => Some(JobErrorBody {
                code: code.clone(),
                message: job.error_message.clone().unwrap_or_default(),
            }),
            _ => None,
        };
        Self {
            job_id: job.id,
            status: job.status,
            result_urls: job.result_urls,
            error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Response of `GET /v1/jobs`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListResponse {
    /// Jobs, newest first
    pub items: Vec<JobResponse>,
    /// Cursor for the next page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// Whether more pages exist
    pub has_more: bool,
}

/// Response of `DELETE /v1/jobs/{id}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelJobResponse {
    /// Job id
    pub job_id: String,
    /// Always `CANCELED`
    pub status: JobStatus,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Fixed "ok"
    pub status: String,
    /// Server time
    pub timestamp: DateTime<Utc>,
    /// Crate version
    pub version: String,
    /// Seconds since process start
    pub uptime_seconds: u64,
}

/// Error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error detail
    pub error: JobErrorBody,
}

impl ErrorResponse {
    /// Build an envelope.
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            error: JobErrorBody {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }
}
