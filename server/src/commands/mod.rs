// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Command implementations and shared runtime assembly.

pub mod serve;
pub mod worker;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use image_gateway_core::api::{AppState, AuthService};
use image_gateway_core::cache::ResultCache;
use image_gateway_core::config::{ConfigLoader, GatewayConfig};
use image_gateway_core::coord::RedisStore;
use image_gateway_core::credentials::{CredentialScheduler, HealthTracker};
use image_gateway_core::database::Database;
use image_gateway_core::executor::{ExecutorConfig, JobExecutor, WorkerPoolConfig};
use image_gateway_core::limits::RateLimiter;
use image_gateway_core::providers::{EndpointRegistry, GeminiProvider};
use image_gateway_core::queue::JobQueue;
use image_gateway_core::storage::LocalBlobStore;
use image_gateway_core::webhook::HttpWebhookDeliverer;

/// Everything a command needs to run.
pub struct Runtime {
    /// Loaded configuration
    pub config: GatewayConfig,
    /// Executor for the worker pool
    pub executor: Arc<JobExecutor>,
    /// Job queue shared by intake and workers
    pub queue: JobQueue,
    /// API state (auth, repositories, queue)
    pub state: Arc<AppState>,
}

/// Load configuration from the given file or the default locations.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig> {
    let loader = match path {
        Some(path) => ConfigLoader::new().with_file(path),
        None => ConfigLoader::new(),
    };
    loader.load().context("failed to load configuration")
}

/// Assemble the shared runtime: database, coordination store, provider
/// driver, executor, and API state.
pub async fn build(config: GatewayConfig) -> Result<Runtime> {
    let database = Database::connect(&config.database)
        .await
        .context("database connection failed")?;
    database
        .migrate()
        .await
        .context("database migration failed")?;

    let store = Arc::new(
        RedisStore::connect(&config.redis.url)
            .await
            .context("coordination store connection failed")?,
    );
    let store: Arc<dyn image_gateway_core::coord::CoordinationStore> = store;

    let registry = Arc::new(EndpointRegistry::new(config.provider.endpoints.clone()));
    let provider = Arc::new(
        GeminiProvider::with_config(Arc::clone(&registry), config.provider.gemini_config())
            .context("provider driver construction failed")?,
    );

    let health = HealthTracker::new(Arc::clone(&store), config.health.clone());
    let limiter = RateLimiter::new(Arc::clone(&store), config.limits.inflight_ttl_secs);
    let scheduler = CredentialScheduler::new(
        database.credentials(),
        health.clone(),
        Arc::clone(&store),
        registry,
    );
    let cache = ResultCache::new(Arc::clone(&store), config.cache.clone());
    let queue = JobQueue::new(Arc::clone(&store));
    let blobs = Arc::new(LocalBlobStore::new(
        &config.storage.root_dir,
        &config.storage.public_base_url,
    ));
    let webhooks = Arc::new(
        HttpWebhookDeliverer::new(config.webhook.webhook_config())
            .context("webhook deliverer construction failed")?,
    );

    let executor = Arc::new(JobExecutor::new(
        database.jobs(),
        database.tenants(),
        provider,
        blobs,
        webhooks,
        queue.clone(),
        limiter,
        scheduler,
        health,
        cache,
        ExecutorConfig {
            provider_tag: config.provider.provider.clone(),
            global_rpm: config.limits.global_rpm,
            global_concurrency: config.limits.global_concurrency,
            retry: config.retry.policy(),
            job_timeout: Duration::from_secs(config.worker.job_timeout_secs),
        },
    ));

    let state = Arc::new(AppState {
        auth: AuthService::new(config.auth.api_key_salt.clone(), database.tenants()),
        jobs: database.jobs(),
        queue: queue.clone(),
        max_attempts: config.retry.max_attempts,
        started_at: std::time::Instant::now(),
    });

    Ok(Runtime {
        config,
        executor,
        queue,
        state,
    })
}

/// Worker pool configuration from settings.
pub fn worker_pool_config(config: &GatewayConfig) -> WorkerPoolConfig {
    WorkerPoolConfig {
        concurrency: config.worker.concurrency,
        poll_interval: Duration::from_millis(config.worker.poll_interval_ms),
    }
}
