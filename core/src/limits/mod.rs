// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Multi-level admission control over the coordination store.
//!
//! Two disciplines: sliding-window RPM (not released, the window slides
//! on its own) and bounded concurrency (explicitly released). Concurrency
//! tokens are tracked by [`AdmissionGuard`] and released in reverse
//! acquisition order on every exit path, which together with the fixed
//! Global -> Credential -> Tenant acquisition order keeps two workers
//! from deadlocking on each other's scopes.

use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::coord::{ConcurrencyAdmission, CoordError, CoordinationStore, WindowAdmission};

/// Sliding-window length for every RPM scope.
pub const WINDOW_MS: i64 = 60_000;

/// Key for the global sliding window.
pub fn global_rpm_key() -> String {
    "lim:global:rpm".to_string()
}

/// Key for the global concurrency counter.
pub fn global_conc_key() -> String {
    "lim:global:conc".to_string()
}

/// Key for a credential's sliding window.
pub fn key_rpm_key(credential_id: Uuid) -> String {
    format!("lim:key:{credential_id}:rpm")
}

/// Key for a credential's in-flight counter.
pub fn key_inflight_key(credential_id: Uuid) -> String {
    format!("lim:key:{credential_id}:inflight")
}

/// Key for a tenant's sliding window.
pub fn tenant_rpm_key(tenant_id: Uuid) -> String {
    format!("lim:tenant:{tenant_id}:rpm")
}

/// Key for a tenant's concurrency counter.
pub fn tenant_conc_key(tenant_id: Uuid) -> String {
    format!("lim:tenant:{tenant_id}:conc")
}

/// Admission facade over the coordination store.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CoordinationStore>,
    /// TTL armed on concurrency counters; must exceed the per-job wall
    /// clock budget so a crashed worker's tokens expire rather than leak.
    inflight_ttl_secs: i64,
}

impl RateLimiter {
    /// Create a limiter. `inflight_ttl_secs` should be at least the
    /// per-job wall-clock budget.
    pub fn new(store: Arc<dyn CoordinationStore>, inflight_ttl_secs: i64) -> Self {
        Self {
            store,
            inflight_ttl_secs,
        }
    }

    /// Sliding-window admission for one scope.
    pub async fn admit_rpm(&self, key: &str, limit: u32) -> Result<WindowAdmission, CoordError> {
        self.store
            .sliding_window_admit(key, limit, WINDOW_MS, crate::coord::now_ms())
            .await
    }

    /// Current value of an in-flight counter.
    pub async fn inflight(&self, key: &str) -> Result<i64, CoordError> {
        self.store.counter(key).await
    }

    /// Start a guard for concurrency admissions.
    pub fn guard(&self) -> AdmissionGuard {
        AdmissionGuard {
            store: Arc::clone(&self.store),
            inflight_ttl_secs: self.inflight_ttl_secs,
            held: Vec::new(),
        }
    }
}

/// Tracks acquired concurrency tokens and releases them in reverse
/// acquisition order. Release failures are logged, not propagated: the
/// counter TTL self-heals a missed release.
pub struct AdmissionGuard {
    store: Arc<dyn CoordinationStore>,
    inflight_ttl_secs: i64,
    held: Vec<String>,
}

impl AdmissionGuard {
    /// Attempt a concurrency admission; the token is tracked on success.
    pub async fn admit(
        &mut self,
        key: &str,
        limit: u32,
    ) -> Result<ConcurrencyAdmission, CoordError> {
        let admission = self
            .store
            .concurrency_admit(key, limit, self.inflight_ttl_secs)
            .await?;
        if admission.admitted {
            self.held.push(key.to_string());
        }
        Ok(admission)
    }

    /// Number of tokens currently held.
    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// Release all held tokens, most recently acquired first.
    pub async fn release_all(&mut self) {
        while let Some(key) = self.held.pop() {
            if let Err(e) = self.store.concurrency_release(&key).await {
                warn!(key = %key, error = %e, "failed to release concurrency token");
            }
        }
    }
}
