// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Prompt-fingerprinted result cache.
//!
//! Final-mode generations with substantial prompts are cached by a hash
//! over the fields that determine the output. The cache is advisory: a
//! stale entry whose blobs were deleted surfaces as broken URLs for the
//! remainder of the 24h window, which is acceptable.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use crate::coord::{CoordError, CoordinationStore};
use crate::jobs::{AspectRatio, GenerationMode, Resolution};

/// Result cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry TTL
    pub ttl_secs: i64,
    /// Prompts shorter than this are never cached
    pub min_prompt_len: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 3600,
            min_prompt_len: 10,
        }
    }
}

/// A cached generation result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedResult {
    /// Result URLs as originally persisted
    pub urls: Vec<String>,
    /// Model that produced them
    pub model: String,
    /// Expiry, epoch milliseconds
    pub expires_at_ms: i64,
}

/// Fingerprint over the fields that uniquely determine a generation.
pub fn fingerprint(
    prompt: &str,
    model: Option<&str>,
    resolution: Option<Resolution>,
    aspect_ratio: Option<AspectRatio>,
    sample_count: Option<i32>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update([0x1f]);
    hasher.update(model.unwrap_or_default().as_bytes());
    hasher.update([0x1f]);
    hasher.update(resolution.map(|r| r.as_str()).unwrap_or_default().as_bytes());
    hasher.update([0x1f]);
    hasher.update(
        aspect_ratio
            .map(|a| a.as_str())
            .unwrap_or_default()
            .as_bytes(),
    );
    hasher.update([0x1f]);
    hasher.update(sample_count.unwrap_or(0).to_le_bytes());
    hex::encode(hasher.finalize())
}

fn cache_key(fingerprint: &str) -> String {
    format!("rc:gemini:{fingerprint}")
}

/// Result cache over the coordination store.
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn CoordinationStore>,
    config: CacheConfig,
}

impl ResultCache {
    /// Create a cache.
    pub fn new(store: Arc<dyn CoordinationStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    /// Whether this job shape participates in caching at all. Draft
    /// mode never reads or writes.
    pub fn is_cacheable(&self, mode: GenerationMode, prompt: &str) -> bool {
        mode == GenerationMode::Final && prompt.len() >= self.config.min_prompt_len
    }

    /// Look up a fingerprint. A malformed entry counts as a miss.
    pub async fn lookup(&self, fingerprint: &str) -> Result<Option<CachedResult>, CoordError> {
        let Some(raw) = self.store.get(&cache_key(fingerprint)).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<CachedResult>(&raw) {
            Ok(result) => Ok(Some(result)),
            Err(e) => {
                debug!(error = %e, "discarding malformed cache entry");
                self.store.delete(&cache_key(fingerprint)).await?;
                Ok(None)
            }
        }
    }

    /// Store a result. Empty URL lists are never written.
    pub async fn put(
        &self,
        fingerprint: &str,
        urls: &[String],
        model: &str,
    ) -> Result<(), CoordError> {
        if urls.is_empty() {
            return Ok(());
        }
        let entry = CachedResult {
            urls: urls.to_vec(),
            model: model.to_string(),
            expires_at_ms: crate::coord::now_ms() + self.config.ttl_secs * 1000,
        };
        let raw = serde_json::to_string(&entry).unwrap_or_default();
        self.store
            .put_with_ttl(&cache_key(fingerprint), &raw, self.config.ttl_secs)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::MemoryStore;

    fn cache() -> ResultCache {
        ResultCache::new(Arc::new(MemoryStore::new()), CacheConfig::default())
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = fingerprint("A red apple on a table", Some("m"), Some(Resolution::TwoK), None, Some(1));
        let b = fingerprint("A red apple on a table", Some("m"), Some(Resolution::TwoK), None, Some(1));
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_varies_by_field() {
        let base = fingerprint("A red apple on a table", None, None, None, None);
        assert_ne!(
            base,
            fingerprint("A green apple on a table", None, None, None, None)
        );
        assert_ne!(base, fingerprint("A red apple on a table", Some("m"), None, None, None));
        assert_ne!(
            base,
            fingerprint("A red apple on a table", None, Some(Resolution::FourK), None, None)
        );
        assert_ne!(
            base,
            fingerprint("A red apple on a table", None, None, Some(AspectRatio::Wide), None)
        );
        assert_ne!(base, fingerprint("A red apple on a table", None, None, None, Some(2)));
    }

    #[test]
    fn test_cacheability_policy() {
        let cache = cache();
        assert!(cache.is_cacheable(GenerationMode::Final, "A red apple on a table"));
        // Draft never caches
        assert!(!cache.is_cacheable(GenerationMode::Draft, "A red apple on a table"));
        // Short prompts never cache
        assert!(!cache.is_cacheable(GenerationMode::Final, "apple"));
    }

    #[tokio::test]
    async fn test_round_trip() {
        let cache = cache();
        let fp = fingerprint("A red apple on a table", None, None, None, None);
        assert_eq!(cache.lookup(&fp).await.unwrap(), None);

        let urls = vec!["https://img/1.png".to_string()];
        cache.put(&fp, &urls, "gemini-2.5-flash-image").await.unwrap();

        let hit = cache.lookup(&fp).await.unwrap().unwrap();
        assert_eq!(hit.urls, urls);
        assert_eq!(hit.model, "gemini-2.5-flash-image");
    }

    #[tokio::test]
    async fn test_empty_results_never_cached() {
        let cache = cache();
        let fp = fingerprint("A red apple on a table", None, None, None, None);
        cache.put(&fp, &[], "m").await.unwrap();
        assert_eq!(cache.lookup(&fp).await.unwrap(), None);
    }
}
