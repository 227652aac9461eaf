// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Provider credentials: the pool of upstream identities, their health
//! tracking, and the scheduler that picks one for a job.

pub mod health;
pub mod scheduler;

pub use health::{HealthConfig, HealthTracker};
pub use scheduler::{CredentialScheduler, PickError, PickRequest};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One upstream provider credential.
///
/// The secret authorizes requests at the provider and must never appear
/// in logs, API responses, or webhook payloads; `Debug` redacts it.
#[derive(Clone)]
pub struct Credential {
    /// Credential identifier
    pub id: Uuid,
    /// Provider tag (e.g. "gemini")
    pub provider: String,
    /// Endpoint tag this credential authenticates against
    pub endpoint: String,
    /// Opaque secret
    pub secret: String,
    /// Requests per minute this credential may spend upstream
    pub rpm_limit: i32,
    /// Concurrent requests this credential may have in flight
    pub concurrency_limit: i32,
    /// Scheduling priority; lower is preferred
    pub priority: i32,
    /// Whether the credential participates in scheduling
    pub enabled: bool,
    /// Row creation time; doubles as the scheduler's insertion order
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("secret", &"<redacted>")
            .field("rpm_limit", &self.rpm_limit)
            .field("concurrency_limit", &self.concurrency_limit)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .finish()
    }
}
