// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Job domain model: statuses, generation parameters, and the error taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default maximum number of execution attempts per job.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 4;

/// Job lifecycle status.
///
/// Transitions are monotonic: once a job reaches a terminal status
/// (`Succeeded`, `Failed`, `Canceled`) the row is immutable apart from
/// timestamps. `Retrying` is equivalent to `Queued` for workers but is
/// surfaced to pollers so they can distinguish a first run from a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted, waiting for a worker
    Queued,
    /// A worker is executing the job
    Running,
    /// Admission or provider failure, rescheduled with backoff
    Retrying,
    /// Terminal: images produced and persisted
    Succeeded,
    /// Terminal: attempts exhausted or non-retryable error
    Failed,
    /// Terminal: canceled by the tenant before execution
    Canceled,
}

impl JobStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Whether a worker may pick the job up in this status.
    pub fn is_runnable(&self) -> bool {
        matches!(self, Self::Queued | Self::Retrying)
    }

    /// Whether the transition `self -> next` is allowed by the state
    /// machine. Admission denials happen before the RUNNING transition,
    /// so a queued job may move straight to RETRYING (rescheduled) or
    /// FAILED (attempt budget exhausted).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Queued | Self::Retrying, Self::Running)
            | (Self::Queued | Self::Retrying, Self::Canceled)
            | (Self::Queued | Self::Retrying, Self::Retrying)
            | (Self::Queued | Self::Retrying, Self::Failed)
            | (Self::Running, Self::Succeeded)
            | (Self::Running, Self::Failed)
            | (Self::Running, Self::Retrying) => true,
            _ => false,
        }
    }

    /// Stable string form, as persisted and exposed over the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Retrying => "RETRYING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(Self::Queued),
            "RUNNING" => Some(Self::Running),
            "RETRYING" => Some(Self::Retrying),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            "CANCELED" => Some(Self::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generation mode. Draft trades quality for latency and bypasses the
/// result cache entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Fast preview generation
    Draft,
    /// Full-quality generation, cacheable
    Final,
}

impl GenerationMode {
    /// Sampling temperature sent to the provider for this mode.
    pub fn temperature(&self) -> f32 {
        match self {
            Self::Draft => 0.7,
            Self::Final => 1.0,
        }
    }

    /// Stable string form, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Final => "final",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "final" => Some(Self::Final),
            _ => None,
        }
    }
}

impl Default for GenerationMode {
    fn default() -> Self {
        Self::Final
    }
}

/// Output resolution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl Resolution {
    /// Wire value for the provider's `imageConfig.imageSize` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneK => "1K",
            Self::TwoK => "2K",
            Self::FourK => "4K",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1K" => Some(Self::OneK),
            "2K" => Some(Self::TwoK),
            "4K" => Some(Self::FourK),
            _ => None,
        }
    }
}

/// Output aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "16:9")]
    Wide,
    #[serde(rename = "9:16")]
    Tall,
}

impl AspectRatio {
    /// Wire value for the provider's `imageConfig.aspectRatio` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Landscape => "4:3",
            Self::Portrait => "3:4",
            Self::Wide => "16:9",
            Self::Tall => "9:16",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1:1" => Some(Self::Square),
            "4:3" => Some(Self::Landscape),
            "3:4" => Some(Self::Portrait),
            "16:9" => Some(Self::Wide),
            "9:16" => Some(Self::Tall),
            _ => None,
        }
    }
}

/// A persistent image-generation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Opaque job identifier
    pub id: String,
    /// Owning tenant
    pub tenant_id: Uuid,
    /// Idempotency token, unique within the tenant when present
    pub idempotency_key: Option<String>,
    /// Current lifecycle status
    pub status: JobStatus,
    /// Generation mode
    pub mode: GenerationMode,
    /// Prompt text
    pub prompt: String,
    /// Optional reference image as a `data:image/...;base64,...` URL
    pub input_image: Option<String>,
    /// Requested resolution tier
    pub resolution: Option<Resolution>,
    /// Requested aspect ratio
    pub aspect_ratio: Option<AspectRatio>,
    /// Requested number of images (1..=10)
    pub sample_count: Option<i32>,
    /// Model hint forwarded to endpoint selection
    pub model: Option<String>,
    /// Completed execution attempts
    pub attempts: i32,
    /// Attempt ceiling, after which the job finalizes as FAILED
    pub max_attempts: i32,
    /// Error code of the last failed attempt
    pub error_code: Option<String>,
    /// Error message of the last failed attempt
    pub error_message: Option<String>,
    /// Credential chosen by the scheduler for the running attempt
    pub credential_id: Option<Uuid>,
    /// Result URLs, appended progressively as uploads complete
    pub result_urls: Vec<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether another attempt may be scheduled after a retryable failure.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Deterministic error codes shared by persisted job rows, API responses,
/// and webhook payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Provider rejected the request inputs
    InvalidRequest,
    /// Provider rejected the credential
    InvalidApiKey,
    /// Provider returned 429
    RateLimitExceeded,
    /// Provider returned 503
    ServiceOverload,
    /// Provider returned another 5xx
    ServerError,
    /// Provider returned an unclassified non-2xx
    GeminiError,
    /// Global sliding-window admission denied
    GlobalRateLimit,
    /// Global concurrency admission denied
    GlobalConcLimit,
    /// Credential sliding-window admission denied
    KeyRateLimit,
    /// Credential concurrency admission denied
    KeyConcLimit,
    /// Tenant sliding-window admission denied
    TenantRateLimit,
    /// Tenant concurrency admission denied
    TenantConcLimit,
    /// Every credential is cooling down, saturated, or disabled
    NoProviderKeyAvailable,
    /// Provider returned a response with zero images
    NoImages,
    /// Blob store write failed
    StorageError,
    /// Anything unclassified
    UnknownError,
}

impl ErrorCode {
    /// Stable string form used in rows, responses, and webhook payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InvalidApiKey => "INVALID_API_KEY",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::ServiceOverload => "SERVICE_OVERLOAD",
            Self::ServerError => "SERVER_ERROR",
            Self::GeminiError => "GEMINI_ERROR",
            Self::GlobalRateLimit => "GLOBAL_RATE_LIMIT",
            Self::GlobalConcLimit => "GLOBAL_CONC_LIMIT",
            Self::KeyRateLimit => "KEY_RATE_LIMIT",
            Self::KeyConcLimit => "KEY_CONC_LIMIT",
            Self::TenantRateLimit => "TENANT_RATE_LIMIT",
            Self::TenantConcLimit => "TENANT_CONC_LIMIT",
            Self::NoProviderKeyAvailable => "NO_PROVIDER_KEY_AVAILABLE",
            Self::NoImages => "NO_IMAGES",
            Self::StorageError => "STORAGE_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Whether a failure with this code may be retried (attempt budget
    /// permitting).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidRequest | Self::InvalidApiKey | Self::NoImages => false,
            Self::RateLimitExceeded
            | Self::ServiceOverload
            | Self::ServerError
            | Self::GeminiError
            | Self::GlobalRateLimit
            | Self::GlobalConcLimit
            | Self::KeyRateLimit
            | Self::KeyConcLimit
            | Self::TenantRateLimit
            | Self::TenantConcLimit
            | Self::NoProviderKeyAvailable
            | Self::StorageError
            | Self::UnknownError => true,
        }
    }

    /// Whether a failure with this code counts against the credential's
    /// consecutive-failure counter. Admission denials and empty responses
    /// say nothing about credential health.
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidApiKey
                | Self::RateLimitExceeded
                | Self::ServiceOverload
                | Self::ServerError
                | Self::GeminiError
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified job execution failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct JobError {
    /// Deterministic error code
    pub code: ErrorCode,
    /// Human-readable detail, never containing secret material
    pub message: String,
}

impl JobError {
    /// Create a new job error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Shorthand for an admission denial.
    pub fn denied(code: ErrorCode, scope: &str, count: i64, limit: u32) -> Self {
        Self::new(
            code,
            format!("{scope} admission denied: {count} >= {limit}"),
        )
    }

    /// Whether the executor may reschedule the job for this failure.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Canceled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_transitions() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Canceled));
        assert!(JobStatus::Retrying.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Retrying.can_transition_to(JobStatus::Canceled));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Succeeded));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Retrying));
        // Admission denials reschedule or finalize before RUNNING
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Retrying));
        assert!(JobStatus::Retrying.can_transition_to(JobStatus::Failed));

        // Terminal states never move
        assert!(!JobStatus::Succeeded.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Canceled.can_transition_to(JobStatus::Running));
        // Running jobs are not cancelable
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Canceled));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Retrying,
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::Canceled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("nonsense"), None);
    }

    #[test]
    fn test_mode_temperature() {
        assert_eq!(GenerationMode::Draft.temperature(), 0.7);
        assert_eq!(GenerationMode::Final.temperature(), 1.0);
    }

    #[test]
    fn test_error_code_retryability() {
        assert!(!ErrorCode::InvalidRequest.is_retryable());
        assert!(!ErrorCode::InvalidApiKey.is_retryable());
        assert!(!ErrorCode::NoImages.is_retryable());
        assert!(ErrorCode::RateLimitExceeded.is_retryable());
        assert!(ErrorCode::ServiceOverload.is_retryable());
        assert!(ErrorCode::TenantRateLimit.is_retryable());
        assert!(ErrorCode::NoProviderKeyAvailable.is_retryable());
        assert!(ErrorCode::StorageError.is_retryable());
    }

    #[test]
    fn test_credential_failure_codes() {
        assert!(ErrorCode::ServerError.is_credential_failure());
        assert!(ErrorCode::InvalidApiKey.is_credential_failure());
        assert!(!ErrorCode::TenantRateLimit.is_credential_failure());
        assert!(!ErrorCode::NoImages.is_credential_failure());
        assert!(!ErrorCode::StorageError.is_credential_failure());
    }

    #[test]
    fn test_serde_enums() {
        assert_eq!(
            serde_json::to_string(&Resolution::TwoK).unwrap(),
            "\"2K\""
        );
        assert_eq!(
            serde_json::from_str::<AspectRatio>("\"16:9\"").unwrap(),
            AspectRatio::Wide
        );
        assert_eq!(
            serde_json::to_string(&GenerationMode::Draft).unwrap(),
            "\"draft\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::Queued).unwrap(),
            "\"QUEUED\""
        );
    }
}
