// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `worker`: a worker pool without the HTTP API, for scale-out.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use image_gateway_core::executor::WorkerPool;

use super::{build, load_config, worker_pool_config};

/// Run a worker pool until ctrl-c.
pub async fn execute(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let runtime = build(config).await?;
    let pool_config = worker_pool_config(&runtime.config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pool = WorkerPool::new(
        Arc::clone(&runtime.executor),
        runtime.queue.clone(),
        pool_config,
    );
    let pool_handle = tokio::spawn(async move { pool.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    let _ = pool_handle.await;

    info!("shutdown complete");
    Ok(())
}
