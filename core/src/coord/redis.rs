// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Redis-backed coordination store.
//!
//! All read-modify-write primitives are server-side Lua scripts invoked
//! by digest. `redis::Script` caches the SHA1 and transparently re-loads
//! the source when the server replies NOSCRIPT, so a flushed script
//! cache heals on the next call.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use uuid::Uuid;

use super::{
    ConcurrencyAdmission, CoordError, CoordinationStore, CredentialAvailability, ProbeOptions,
    WindowAdmission,
};

const SLIDING_WINDOW_SRC: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local member = ARGV[4]
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
if count >= limit then
  return {0, count}
end
redis.call('ZADD', key, now, member)
redis.call('PEXPIRE', key, window + 1000)
return {1, count + 1}
"#;

const CONCURRENCY_ADMIT_SRC: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local ttl = tonumber(ARGV[2])
local value = redis.call('INCR', key)
if value > limit then
  redis.call('DECR', key)
  return {0, value - 1}
end
if value == 1 then
  redis.call('EXPIRE', key, ttl)
end
return {1, value}
"#;

const CONCURRENCY_RELEASE_SRC: &str = r#"
local key = KEYS[1]
local value = redis.call('DECR', key)
if value < 0 then
  redis.call('INCR', key)
  return 0
end
return value
"#;

const INCR_WITH_TTL_SRC: &str = r#"
local value = redis.call('INCR', KEYS[1])
if value == 1 then
  redis.call('EXPIRE', KEYS[1], tonumber(ARGV[1]))
end
return value
"#;

const CREDENTIAL_PROBE_SRC: &str = r#"
local cooldown_key = KEYS[1]
local failures_key = KEYS[2]
local now = tonumber(ARGV[1])
local record_failure = tonumber(ARGV[2])
local reset_on_success = tonumber(ARGV[3])
local threshold = tonumber(ARGV[4])
local cooldown_ms = tonumber(ARGV[5])
local failure_ttl = tonumber(ARGV[6])
local cooldown_until = tonumber(redis.call('GET', cooldown_key) or '0')
if cooldown_until > now then
  local failures = tonumber(redis.call('GET', failures_key) or '0')
  return {0, cooldown_until, failures}
end
if record_failure == 1 then
  local failures = redis.call('INCR', failures_key)
  redis.call('EXPIRE', failures_key, failure_ttl)
  if failures >= threshold then
    local until_ms = now + cooldown_ms
    redis.call('SET', cooldown_key, until_ms, 'PX', cooldown_ms)
    redis.call('DEL', failures_key)
    return {0, until_ms, failures}
  end
  return {1, 0, failures}
end
if reset_on_success == 1 then
  redis.call('DEL', failures_key)
  return {1, 0, 0}
end
local failures = tonumber(redis.call('GET', failures_key) or '0')
return {1, 0, failures}
"#;

const QUEUE_POP_DUE_SRC: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local due = redis.call('ZRANGEBYSCORE', key, '-inf', now, 'LIMIT', 0, 1)
if #due == 0 then
  return false
end
redis.call('ZREM', key, due[1])
return due[1]
"#;

/// Redis coordination store.
///
/// Holds a multiplexed connection manager (process lifetime) and the
/// script handles (lazy SHA1 cache, re-loaded on digest miss).
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    sliding_window: Script,
    concurrency_admit: Script,
    concurrency_release: Script,
    incr_with_ttl: Script,
    credential_probe: Script,
    queue_pop_due: Script,
}

impl RedisStore {
    /// Connect to the coordination store.
    pub async fn connect(url: &str) -> Result<Self, CoordError> {
        let client = redis::Client::open(url)
            .map_err(|e| CoordError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CoordError::Connection(e.to_string()))?;
        Ok(Self::with_connection(conn))
    }

    /// Build a store over an established connection manager.
    pub fn with_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            sliding_window: Script::new(SLIDING_WINDOW_SRC),
            concurrency_admit: Script::new(CONCURRENCY_ADMIT_SRC),
            concurrency_release: Script::new(CONCURRENCY_RELEASE_SRC),
            incr_with_ttl: Script::new(INCR_WITH_TTL_SRC),
            credential_probe: Script::new(CREDENTIAL_PROBE_SRC),
            queue_pop_due: Script::new(QUEUE_POP_DUE_SRC),
        }
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn sliding_window_admit(
        &self,
        key: &str,
        limit: u32,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<WindowAdmission, CoordError> {
        let mut conn = self.conn.clone();
        let member = format!("{now_ms}-{}", Uuid::new_v4().simple());
        let (admitted, count): (i64, i64) = self
            .sliding_window
            .key(key)
            .arg(limit)
            .arg(window_ms)
            .arg(now_ms)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;
        Ok(WindowAdmission {
            admitted: admitted == 1,
            count,
        })
    }

    async fn concurrency_admit(
        &self,
        key: &str,
        limit: u32,
        ttl_secs: i64,
    ) -> Result<ConcurrencyAdmission, CoordError> {
        let mut conn = self.conn.clone();
        let (admitted, value): (i64, i64) = self
            .concurrency_admit
            .key(key)
            .arg(limit)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(ConcurrencyAdmission {
            admitted: admitted == 1,
            value,
        })
    }

    async fn concurrency_release(&self, key: &str) -> Result<(), CoordError> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .concurrency_release
            .key(key)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn counter(&self, key: &str) -> Result<i64, CoordError> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }

    async fn incr_with_ttl(&self, key: &str, ttl_secs: i64) -> Result<i64, CoordError> {
        let mut conn = self.conn.clone();
        let value: i64 = self
            .incr_with_ttl
            .key(key)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn credential_probe(
        &self,
        cooldown_key: &str,
        failures_key: &str,
        now_ms: i64,
        opts: ProbeOptions,
    ) -> Result<CredentialAvailability, CoordError> {
        let mut conn = self.conn.clone();
        let (available, cooldown_until_ms, failures): (i64, i64, i64) = self
            .credential_probe
            .key(cooldown_key)
            .key(failures_key)
            .arg(now_ms)
            .arg(i64::from(opts.record_failure))
            .arg(i64::from(opts.reset_on_success))
            .arg(opts.failure_threshold)
            .arg(opts.cooldown_ms)
            .arg(opts.failure_ttl_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(CredentialAvailability {
            available: available == 1,
            cooldown_until_ms,
            failures,
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CoordError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn put_with_ttl(&self, key: &str, value: &str, ttl_secs: i64) -> Result<(), CoordError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_secs as u64).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CoordError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn queue_push(
        &self,
        key: &str,
        member: &str,
        ready_at_ms: i64,
    ) -> Result<(), CoordError> {
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(key, member, ready_at_ms).await?;
        Ok(())
    }

    async fn queue_pop_due(&self, key: &str, now_ms: i64) -> Result<Option<String>, CoordError> {
        let mut conn = self.conn.clone();
        let member: Option<String> = self
            .queue_pop_due
            .key(key)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(member)
    }
}
