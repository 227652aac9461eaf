// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! In-memory coordination store for tests and single-process runs.
//!
//! Each primitive holds the store lock for its whole duration, which
//! gives the same atomicity the Redis scripts give across processes.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::{
    ConcurrencyAdmission, CoordError, CoordinationStore, CredentialAvailability, ProbeOptions,
    WindowAdmission,
};

#[derive(Default)]
struct Inner {
    /// Sliding-window timestamps per key
    windows: HashMap<String, Vec<i64>>,
    /// Plain integer counters (concurrency, rollups)
    counters: HashMap<String, i64>,
    /// String values with optional expiry (epoch ms)
    values: HashMap<String, (String, Option<i64>)>,
    /// Delayed queue members with readiness times
    queues: HashMap<String, Vec<(String, i64)>>,
}

/// In-memory coordination store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: read a raw counter value.
    pub fn counter_value(&self, key: &str) -> i64 {
        *self.inner.lock().counters.get(key).unwrap_or(&0)
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn sliding_window_admit(
        &self,
        key: &str,
        limit: u32,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<WindowAdmission, CoordError> {
        let mut inner = self.inner.lock();
        let entries = inner.windows.entry(key.to_string()).or_default();
        entries.retain(|&t| t >= now_ms - window_ms);
        let count = entries.len() as i64;
        if count >= i64::from(limit) {
            return Ok(WindowAdmission {
                admitted: false,
                count,
            });
        }
        entries.push(now_ms);
        Ok(WindowAdmission {
            admitted: true,
            count: count + 1,
        })
    }

    async fn concurrency_admit(
        &self,
        key: &str,
        limit: u32,
        _ttl_secs: i64,
    ) -> Result<ConcurrencyAdmission, CoordError> {
        let mut inner = self.inner.lock();
        let counter = inner.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        if *counter > i64::from(limit) {
            *counter -= 1;
            let value = *counter;
            return Ok(ConcurrencyAdmission {
                admitted: false,
                value,
            });
        }
        Ok(ConcurrencyAdmission {
            admitted: true,
            value: *counter,
        })
    }

    async fn concurrency_release(&self, key: &str) -> Result<(), CoordError> {
        let mut inner = self.inner.lock();
        let counter = inner.counters.entry(key.to_string()).or_insert(0);
        *counter = (*counter - 1).max(0);
        Ok(())
    }

    async fn counter(&self, key: &str) -> Result<i64, CoordError> {
        Ok(*self.inner.lock().counters.get(key).unwrap_or(&0))
    }

    async fn incr_with_ttl(&self, key: &str, _ttl_secs: i64) -> Result<i64, CoordError> {
        let mut inner = self.inner.lock();
        let counter = inner.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn credential_probe(
        &self,
        cooldown_key: &str,
        failures_key: &str,
        now_ms: i64,
        opts: ProbeOptions,
    ) -> Result<CredentialAvailability, CoordError> {
        let mut inner = self.inner.lock();
        let cooldown_until = inner
            .values
            .get(cooldown_key)
            .and_then(|(v, _)| v.parse::<i64>().ok())
            .unwrap_or(0);
        if cooldown_until > now_ms {
            let failures = *inner.counters.get(failures_key).unwrap_or(&0);
            return Ok(CredentialAvailability {
                available: false,
                cooldown_until_ms: cooldown_until,
                failures,
            });
        }
        if opts.record_failure {
            let counter = inner.counters.entry(failures_key.to_string()).or_insert(0);
            *counter += 1;
            let failures = *counter;
            if failures >= opts.failure_threshold {
                let until_ms = now_ms + opts.cooldown_ms;
                inner.values.insert(
                    cooldown_key.to_string(),
                    (until_ms.to_string(), Some(until_ms)),
                );
                inner.counters.remove(failures_key);
                return Ok(CredentialAvailability {
                    available: false,
                    cooldown_until_ms: until_ms,
                    failures,
                });
            }
            return Ok(CredentialAvailability {
                available: true,
                cooldown_until_ms: 0,
                failures,
            });
        }
        if opts.reset_on_success {
            inner.counters.remove(failures_key);
            return Ok(CredentialAvailability {
                available: true,
                cooldown_until_ms: 0,
                failures: 0,
            });
        }
        let failures = *inner.counters.get(failures_key).unwrap_or(&0);
        Ok(CredentialAvailability {
            available: true,
            cooldown_until_ms: 0,
            failures,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CoordError> {
        let mut inner = self.inner.lock();
        if let Some((value, expires_at)) = inner.values.get(key) {
            if let Some(expires_at) = expires_at {
                if *expires_at <= Self::now_ms() {
                    inner.values.remove(key);
                    return Ok(None);
                }
            }
            return Ok(Some(value.clone()));
        }
        Ok(None)
    }

    async fn put_with_ttl(&self, key: &str, value: &str, ttl_secs: i64) -> Result<(), CoordError> {
        let expires_at = Self::now_ms() + ttl_secs * 1000;
        self.inner
            .lock()
            .values
            .insert(key.to_string(), (value.to_string(), Some(expires_at)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CoordError> {
        let mut inner = self.inner.lock();
        inner.values.remove(key);
        inner.counters.remove(key);
        Ok(())
    }

    async fn queue_push(
        &self,
        key: &str,
        member: &str,
        ready_at_ms: i64,
    ) -> Result<(), CoordError> {
        let mut inner = self.inner.lock();
        let queue = inner.queues.entry(key.to_string()).or_default();
        queue.retain(|(m, _)| m != member);
        queue.push((member.to_string(), ready_at_ms));
        Ok(())
    }

    async fn queue_pop_due(&self, key: &str, now_ms: i64) -> Result<Option<String>, CoordError> {
        let mut inner = self.inner.lock();
        let Some(queue) = inner.queues.get_mut(key) else {
            return Ok(None);
        };
        let due = queue
            .iter()
            .enumerate()
            .filter(|(_, (_, ready_at))| *ready_at <= now_ms)
            .min_by_key(|(_, (_, ready_at))| *ready_at)
            .map(|(i, _)| i);
        Ok(due.map(|i| queue.remove(i).0))
    }
}
