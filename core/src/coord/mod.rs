// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Coordination-store client.
//!
//! Every primitive that involves a read-modify-write cycle executes as a
//! single atomic unit on the store: the Redis implementation runs
//! server-side Lua scripts by digest, and the in-memory implementation
//! holds one lock across the whole operation. Workers never perform a
//! read-modify-write outside these primitives.
//!
//! All entries carry TTLs so that counters left behind by a crashed
//! worker expire on their own.

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use async_trait::async_trait;
use thiserror::Error;

/// Coordination-store errors.
#[derive(Debug, Error)]
pub enum CoordError {
    /// Underlying Redis failure
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// Connection establishment failure
    #[error("connection error: {0}")]
    Connection(String),
}

/// Result of a sliding-window admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAdmission {
    /// Whether the request was admitted
    pub admitted: bool,
    /// Number of requests in the window after the attempt
    pub count: i64,
}

/// Result of a bounded-concurrency admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyAdmission {
    /// Whether a token was acquired
    pub admitted: bool,
    /// Counter value after the attempt
    pub value: i64,
}

/// Options for a credential health probe.
#[derive(Debug, Clone, Copy)]
pub struct ProbeOptions {
    /// Increment the consecutive-failure counter
    pub record_failure: bool,
    /// Delete the consecutive-failure counter
    pub reset_on_success: bool,
    /// Failures at which the cooldown trips
    pub failure_threshold: i64,
    /// Cooldown duration once tripped, in milliseconds
    pub cooldown_ms: i64,
    /// TTL of the consecutive-failure counter, in seconds
    pub failure_ttl_secs: i64,
}

impl ProbeOptions {
    /// A read-only probe: no counter mutation.
    pub fn check(threshold: i64, cooldown_ms: i64, failure_ttl_secs: i64) -> Self {
        Self {
            record_failure: false,
            reset_on_success: false,
            failure_threshold: threshold,
            cooldown_ms,
            failure_ttl_secs,
        }
    }
}

/// Outcome of a credential health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialAvailability {
    /// Whether the credential may be used right now
    pub available: bool,
    /// When the active cooldown expires (0 when none)
    pub cooldown_until_ms: i64,
    /// Current consecutive-failure count
    pub failures: i64,
}

/// Atomic primitives shared by every worker process.
///
/// Keys are built by callers; implementations treat them as opaque. The
/// Redis variant is the production store, the memory variant backs tests.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Sliding-window admission: prune entries older than `window_ms`,
    /// admit iff fewer than `limit` remain, record the admitted request
    /// at `now_ms`.
    async fn sliding_window_admit(
        &self,
        key: &str,
        limit: u32,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<WindowAdmission, CoordError>;

    /// Bounded-concurrency admission: INCR, roll back and deny when the
    /// new value exceeds `limit`. The first increment arms a TTL of
    /// `ttl_secs` so crashed holders expire.
    async fn concurrency_admit(
        &self,
        key: &str,
        limit: u32,
        ttl_secs: i64,
    ) -> Result<ConcurrencyAdmission, CoordError>;

    /// Release one concurrency token, clamping the counter at zero.
    async fn concurrency_release(&self, key: &str) -> Result<(), CoordError>;

    /// Read a plain integer counter (0 when absent).
    async fn counter(&self, key: &str) -> Result<i64, CoordError>;

    /// Increment a rollup counter, arming `ttl_secs` on first increment.
    async fn incr_with_ttl(&self, key: &str, ttl_secs: i64) -> Result<i64, CoordError>;

    /// Probe (and optionally mutate) a credential's health state.
    async fn credential_probe(
        &self,
        cooldown_key: &str,
        failures_key: &str,
        now_ms: i64,
        opts: ProbeOptions,
    ) -> Result<CredentialAvailability, CoordError>;

    /// Read a string value (None when absent or expired).
    async fn get(&self, key: &str) -> Result<Option<String>, CoordError>;

    /// Write a string value with a TTL.
    async fn put_with_ttl(&self, key: &str, value: &str, ttl_secs: i64) -> Result<(), CoordError>;

    /// Delete a key.
    async fn delete(&self, key: &str) -> Result<(), CoordError>;

    /// Schedule `member` on the delayed queue at `ready_at_ms`.
    async fn queue_push(
        &self,
        key: &str,
        member: &str,
        ready_at_ms: i64,
    ) -> Result<(), CoordError>;

    /// Atomically pop one member whose readiness time has passed.
    /// The atomic pop is what gives the queue its at-most-one-active-
    /// consumer guarantee.
    async fn queue_pop_due(&self, key: &str, now_ms: i64) -> Result<Option<String>, CoordError>;
}

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
