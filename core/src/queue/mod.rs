// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Delayed job queue on the coordination store.
//!
//! Members are job ids scored by readiness time. The pop is atomic, so
//! across all worker processes each job id has at most one active
//! consumer. Retries re-enqueue the same id with an exponential delay.

use std::sync::Arc;
use std::time::Duration;

use crate::coord::{CoordError, CoordinationStore};
use crate::jobs::ErrorCode;

const QUEUE_KEY: &str = "queue:jobs";

/// Job queue handle.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn CoordinationStore>,
}

impl JobQueue {
    /// Create a queue over the store.
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Enqueue a job for immediate processing.
    pub async fn enqueue(&self, job_id: &str) -> Result<(), CoordError> {
        self.store
            .queue_push(QUEUE_KEY, job_id, crate::coord::now_ms())
            .await
    }

    /// Enqueue a job to become due after `delay`.
    pub async fn enqueue_delayed(&self, job_id: &str, delay: Duration) -> Result<(), CoordError> {
        let ready_at = crate::coord::now_ms() + delay.as_millis() as i64;
        self.store.queue_push(QUEUE_KEY, job_id, ready_at).await
    }

    /// Pop one due job id, if any.
    pub async fn pop_due(&self) -> Result<Option<String>, CoordError> {
        self.store
            .queue_pop_due(QUEUE_KEY, crate::coord::now_ms())
            .await
    }
}

/// Retry scheduling policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// First backoff delay
    pub base_ms: u64,
    /// Backoff ceiling for most retryable failures
    pub cap_ms: u64,
    /// Extended ceiling while the provider sheds load
    pub overload_cap_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_ms: 2_000,
            cap_ms: 30_000,
            overload_cap_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1`, given the failure that
    /// ended attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: i32, code: ErrorCode) -> Duration {
        let exponent = attempt.max(1) as u32 - 1;
        let cap = if code == ErrorCode::ServiceOverload {
            self.overload_cap_ms
        } else {
            self.cap_ms
        };
        let delay = self
            .base_ms
            .saturating_mul(1u64 << exponent.min(16))
            .min(cap);
        Duration::from_millis(delay)
    }
}
