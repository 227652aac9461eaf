// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Credential scheduler.
//!
//! Picks one credential for a job out of the enabled pool. Ordering is
//! deterministic so two workers looking at equal store state choose the
//! same winner: candidates surviving the health and saturation filters
//! sort by model preference, caller endpoint preference, priority,
//! health score (only when the gap exceeds ten points), in-flight load,
//! and endpoint failure rate; ties fall back to row creation order.

use std::cmp::Ordering;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::health::HealthTracker;
use super::Credential;
use crate::coord::{CoordError, CoordinationStore};
use crate::database::error::DatabaseError;
use crate::database::repositories::CredentialRepository;
use crate::limits::key_inflight_key;
use crate::providers::EndpointRegistry;

/// Health-score gaps at or below this many points are treated as equal.
const HEALTH_SCORE_BAND: f64 = 10.0;

/// Scheduler failures.
#[derive(Debug, Error)]
pub enum PickError {
    /// Coordination-store failure
    #[error(transparent)]
    Coord(#[from] CoordError),

    /// Persistence failure
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// One scheduling request.
#[derive(Debug, Clone, Default)]
pub struct PickRequest<'a> {
    /// Provider tag to schedule for
    pub provider: &'a str,
    /// Endpoint the caller would prefer
    pub preferred_endpoint: Option<&'a str>,
    /// Model hint; endpoints preferring it sort first
    pub model: Option<&'a str>,
    /// Endpoints to skip (e.g. just failed in this attempt)
    pub exclude_endpoints: &'a [String],
    /// When false, only the preferred endpoint is considered
    pub allow_fallback: bool,
}

#[derive(Debug)]
struct Candidate {
    credential: Credential,
    model_preferred: bool,
    endpoint_preferred: bool,
    health_score: f64,
    in_flight: i64,
    failure_rate: f64,
}

/// Deterministic credential scheduler.
#[derive(Clone)]
pub struct CredentialScheduler {
    repo: Arc<dyn CredentialRepository>,
    health: HealthTracker,
    store: Arc<dyn CoordinationStore>,
    registry: Arc<EndpointRegistry>,
}

impl CredentialScheduler {
    /// Create a scheduler.
    pub fn new(
        repo: Arc<dyn CredentialRepository>,
        health: HealthTracker,
        store: Arc<dyn CoordinationStore>,
        registry: Arc<EndpointRegistry>,
    ) -> Self {
        Self {
            repo,
            health,
            store,
            registry,
        }
    }

    /// Pick a credential, or `None` when every candidate is cooling
    /// down, saturated, or filtered out.
    pub async fn pick(&self, request: PickRequest<'_>) -> Result<Option<Credential>, PickError> {
        let credentials = self.repo.list_enabled(request.provider).await?;

        let mut candidates = Vec::new();
        for credential in credentials {
            if request
                .exclude_endpoints
                .iter()
                .any(|e| e == &credential.endpoint)
            {
                continue;
            }
            if !request.allow_fallback {
                if let Some(preferred) = request.preferred_endpoint {
                    if credential.endpoint != preferred {
                        continue;
                    }
                }
            }

            let availability = self.health.check(credential.id).await?;
            if !availability.available {
                debug!(credential_id = %credential.id, "skipping credential in cooldown");
                continue;
            }

            let in_flight = self
                .store
                .counter(&key_inflight_key(credential.id))
                .await?;
            if in_flight >= i64::from(credential.concurrency_limit) {
                debug!(credential_id = %credential.id, in_flight, "skipping saturated credential");
                continue;
            }

            let health_score = self.health.health_score(credential.id).await?;
            let failure_rate = self
                .health
                .endpoint_failure_rate(&credential.provider, &credential.endpoint)
                .await?;
            let model_preferred = request
                .model
                .is_some_and(|m| self.registry.endpoint_prefers_model(&credential.endpoint, m));
            let endpoint_preferred = request
                .preferred_endpoint
                .is_some_and(|e| e == credential.endpoint);

            candidates.push(Candidate {
                credential,
                model_preferred,
                endpoint_preferred,
                health_score,
                in_flight,
                failure_rate,
            });
        }

        // Stable sort keeps row creation order as the final tie-break.
        candidates.sort_by(compare_candidates);

        Ok(candidates.into_iter().next().map(|c| c.credential))
    }

    /// Number of enabled credentials for a provider. Used by callers to
    /// distinguish an empty pool from a saturated one.
    pub async fn pool_size(&self, provider: &str) -> Result<usize, PickError> {
        Ok(self.repo.list_enabled(provider).await?.len())
    }

    /// The endpoint registry this scheduler steers by.
    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.model_preferred
        .cmp(&a.model_preferred)
        .then_with(|| b.endpoint_preferred.cmp(&a.endpoint_preferred))
        .then_with(|| a.credential.priority.cmp(&b.credential.priority))
        .then_with(|| {
            if (a.health_score - b.health_score).abs() > HEALTH_SCORE_BAND {
                b.health_score
                    .partial_cmp(&a.health_score)
                    .unwrap_or(Ordering::Equal)
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| a.in_flight.cmp(&b.in_flight))
        .then_with(|| {
            a.failure_rate
                .partial_cmp(&b.failure_rate)
                .unwrap_or(Ordering::Equal)
        })
}
