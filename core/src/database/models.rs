// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Database models and their domain conversions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::error::DatabaseError;
use crate::credentials::Credential;
use crate::jobs::{AspectRatio, GenerationMode, Job, JobStatus, Resolution};

/// An authenticated API consumer with plan limits and optional webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant identifier
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Salted fingerprint of the API key (never the key itself)
    pub api_key_fingerprint: String,
    /// Plan requests-per-minute limit
    pub plan_rpm: i32,
    /// Plan concurrency limit
    pub plan_concurrency: i32,
    /// Webhook callback URL
    pub webhook_url: Option<String>,
    /// Webhook signing secret
    pub webhook_secret: Option<String>,
    /// Whether webhook delivery is enabled
    pub webhook_enabled: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    /// Webhook endpoint and secret, when delivery is enabled and fully
    /// configured.
    pub fn webhook_target(&self) -> Option<(&str, &str)> {
        if !self.webhook_enabled {
            return None;
        }
        match (&self.webhook_url, &self.webhook_secret) {
            (Some(url), Some(secret)) => Some((url.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

/// Tenant row
#[derive(Debug, Clone, FromRow)]
pub struct TenantRow {
    pub id: Uuid,
    pub name: String,
    pub api_key_fingerprint: String,
    pub plan_rpm: i32,
    pub plan_concurrency: i32,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub webhook_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl From<TenantRow> for Tenant {
    fn from(row: TenantRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            api_key_fingerprint: row.api_key_fingerprint,
            plan_rpm: row.plan_rpm,
            plan_concurrency: row.plan_concurrency,
            webhook_url: row.webhook_url,
            webhook_secret: row.webhook_secret,
            webhook_enabled: row.webhook_enabled,
            created_at: row.created_at,
        }
    }
}

/// Credential row
#[derive(Debug, Clone, FromRow)]
pub struct CredentialRow {
    pub id: Uuid,
    pub provider: String,
    pub endpoint: String,
    pub secret: String,
    pub rpm_limit: i32,
    pub concurrency_limit: i32,
    pub priority: i32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl From<CredentialRow> for Credential {
    fn from(row: CredentialRow) -> Self {
        Self {
            id: row.id,
            provider: row.provider,
            endpoint: row.endpoint,
            secret: row.secret,
            rpm_limit: row.rpm_limit,
            concurrency_limit: row.concurrency_limit,
            priority: row.priority,
            enabled: row.enabled,
            created_at: row.created_at,
        }
    }
}

/// Job row
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: String,
    pub tenant_id: Uuid,
    pub idempotency_key: Option<String>,
    pub status: String,
    pub mode: String,
    pub prompt: String,
    pub input_image: Option<String>,
    pub resolution: Option<String>,
    pub aspect_ratio: Option<String>,
    pub sample_count: Option<i32>,
    pub model: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub credential_id: Option<Uuid>,
    pub result_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = DatabaseError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::parse(&row.status).ok_or_else(|| {
            DatabaseError::SerializationError(format!("unknown job status: {}", row.status))
        })?;
        let mode = GenerationMode::parse(&row.mode).ok_or_else(|| {
            DatabaseError::SerializationError(format!("unknown job mode: {}", row.mode))
        })?;
        let resolution = row
            .resolution
            .as_deref()
            .map(|s| {
                Resolution::parse(s).ok_or_else(|| {
                    DatabaseError::SerializationError(format!("unknown resolution: {s}"))
                })
            })
            .transpose()?;
        let aspect_ratio = row
            .aspect_ratio
            .as_deref()
            .map(|s| {
                AspectRatio::parse(s).ok_or_else(|| {
                    DatabaseError::SerializationError(format!("unknown aspect ratio: {s}"))
                })
            })
            .transpose()?;

        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            idempotency_key: row.idempotency_key,
            status,
            mode,
            prompt: row.prompt,
            input_image: row.input_image,
            resolution,
            aspect_ratio,
            sample_count: row.sample_count,
            model: row.model,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            error_code: row.error_code,
            error_message: row.error_message,
            credential_id: row.credential_id,
            result_urls: row.result_urls,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
