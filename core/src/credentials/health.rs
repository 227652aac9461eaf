// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Credential health tracking.
//!
//! Consecutive failures are counted per credential; at the threshold the
//! credential enters a cooldown and is invisible to the scheduler until
//! it elapses. A success wipes the counter. Endpoint-level rollups
//! (successes, failures, 503 count) inform scheduling order but never
//! gate a credential on their own.

use std::sync::Arc;
use uuid::Uuid;

use super::Credential;
use crate::coord::{CoordError, CoordinationStore, CredentialAvailability, ProbeOptions};

/// Health tracking configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failures that trip the cooldown
    pub failure_threshold: i64,
    /// Cooldown duration once tripped, in milliseconds
    pub cooldown_ms: i64,
    /// TTL of the consecutive-failure counter
    pub failure_ttl_secs: i64,
    /// TTL of the success/failure/503 rollups
    pub rollup_ttl_secs: i64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 10 * 60 * 1000,
            failure_ttl_secs: 3600,
            rollup_ttl_secs: 300,
        }
    }
}

/// Health tracker over the coordination store.
#[derive(Clone)]
pub struct HealthTracker {
    store: Arc<dyn CoordinationStore>,
    config: HealthConfig,
}

fn cooldown_key(id: Uuid) -> String {
    format!("kp:{id}:cooldown_until")
}

fn failures_key(id: Uuid) -> String {
    format!("kp:{id}:failures")
}

fn successes_key(id: Uuid) -> String {
    format!("kp:{id}:successes")
}

fn endpoint_key(provider: &str, endpoint: &str, kind: &str) -> String {
    format!("ep:{provider}:{endpoint}:{kind}")
}

impl HealthTracker {
    /// Create a tracker.
    pub fn new(store: Arc<dyn CoordinationStore>, config: HealthConfig) -> Self {
        Self { store, config }
    }

    fn probe_opts(&self, record_failure: bool, reset_on_success: bool) -> ProbeOptions {
        ProbeOptions {
            record_failure,
            reset_on_success,
            failure_threshold: self.config.failure_threshold,
            cooldown_ms: self.config.cooldown_ms,
            failure_ttl_secs: self.config.failure_ttl_secs,
        }
    }

    /// Read-only availability check.
    pub async fn check(&self, id: Uuid) -> Result<CredentialAvailability, CoordError> {
        self.store
            .credential_probe(
                &cooldown_key(id),
                &failures_key(id),
                crate::coord::now_ms(),
                self.probe_opts(false, false),
            )
            .await
    }

    /// Record a failure attributable to the credential. May trip the
    /// cooldown; the returned availability reflects the new state.
    pub async fn record_failure(
        &self,
        credential: &Credential,
    ) -> Result<CredentialAvailability, CoordError> {
        let availability = self
            .store
            .credential_probe(
                &cooldown_key(credential.id),
                &failures_key(credential.id),
                crate::coord::now_ms(),
                self.probe_opts(true, false),
            )
            .await?;
        self.store
            .incr_with_ttl(
                &endpoint_key(&credential.provider, &credential.endpoint, "failures"),
                self.config.rollup_ttl_secs,
            )
            .await?;
        Ok(availability)
    }

    /// Record a successful call: wipes the consecutive-failure counter
    /// and bumps the success rollups.
    pub async fn record_success(&self, credential: &Credential) -> Result<(), CoordError> {
        self.store
            .credential_probe(
                &cooldown_key(credential.id),
                &failures_key(credential.id),
                crate::coord::now_ms(),
                self.probe_opts(false, true),
            )
            .await?;
        self.store
            .incr_with_ttl(&successes_key(credential.id), self.config.rollup_ttl_secs)
            .await?;
        self.store
            .incr_with_ttl(
                &endpoint_key(&credential.provider, &credential.endpoint, "successes"),
                self.config.rollup_ttl_secs,
            )
            .await?;
        Ok(())
    }

    /// Record a 503 against the endpoint's 5-minute window.
    pub async fn record_overload(&self, provider: &str, endpoint: &str) -> Result<(), CoordError> {
        self.store
            .incr_with_ttl(
                &endpoint_key(provider, endpoint, "503_count"),
                self.config.rollup_ttl_secs,
            )
            .await?;
        Ok(())
    }

    /// Success ratio scaled to 0..=100, defaulting to 100 when the
    /// rollups are empty.
    pub async fn health_score(&self, id: Uuid) -> Result<f64, CoordError> {
        let successes = self.store.counter(&successes_key(id)).await? as f64;
        let failures = self.store.counter(&failures_key(id)).await? as f64;
        if successes + failures == 0.0 {
            return Ok(100.0);
        }
        Ok(100.0 * successes / (successes + failures))
    }

    /// Endpoint failure ratio in 0..=1, defaulting to 0 when empty.
    pub async fn endpoint_failure_rate(
        &self,
        provider: &str,
        endpoint: &str,
    ) -> Result<f64, CoordError> {
        let successes = self
            .store
            .counter(&endpoint_key(provider, endpoint, "successes"))
            .await? as f64;
        let failures = self
            .store
            .counter(&endpoint_key(provider, endpoint, "failures"))
            .await? as f64;
        if successes + failures == 0.0 {
            return Ok(0.0);
        }
        Ok(failures / (successes + failures))
    }
}
