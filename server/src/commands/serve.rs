// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `serve`: the HTTP API with an embedded worker pool.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use image_gateway_core::api::ApiServer;
use image_gateway_core::executor::WorkerPool;

use super::{build, load_config, worker_pool_config};

/// Run the API server and worker pool until ctrl-c.
pub async fn execute(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let runtime = build(config).await?;
    let pool_config = worker_pool_config(&runtime.config);
    let server_settings = runtime.config.server.clone();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pool = WorkerPool::new(
        Arc::clone(&runtime.executor),
        runtime.queue.clone(),
        pool_config,
    );
    let pool_shutdown = shutdown_rx.clone();
    let pool_handle = tokio::spawn(async move { pool.run(pool_shutdown).await });

    let server = ApiServer::new(server_settings, Arc::clone(&runtime.state));
    let server_shutdown = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move { server.serve(server_shutdown).await });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    let _ = pool_handle.await;
    match server_handle.await {
        Ok(result) => result?,
        Err(e) => tracing::error!(error = %e, "API server task panicked"),
    }

    info!("shutdown complete");
    Ok(())
}
