// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Worker pool: pulls due jobs off the queue and executes them on a
//! bounded set of concurrent tasks.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use super::pipeline::JobExecutor;
use crate::queue::JobQueue;

/// Delay before retrying a job whose execution hit infrastructure
/// trouble (store or database unavailable).
const REQUEUE_DELAY: Duration = Duration::from_secs(5);

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Concurrent job tasks in this process
    pub concurrency: usize,
    /// Queue poll interval when idle
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 50,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Worker pool.
pub struct WorkerPool {
    executor: Arc<JobExecutor>,
    queue: JobQueue,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    /// Create a pool.
    pub fn new(executor: Arc<JobExecutor>, queue: JobQueue, config: WorkerPoolConfig) -> Self {
        Self {
            executor,
            queue,
            config,
        }
    }

    /// Run until the shutdown signal flips, then drain in-flight tasks.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(concurrency = self.config.concurrency, "worker pool started");
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Hold a slot before popping so a busy pool stops consuming.
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
                _ = shutdown.changed() => continue,
            };

            match self.queue.pop_due().await {
                Ok(Some(job_id)) => {
                    let executor = Arc::clone(&self.executor);
                    let queue = self.queue.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        match executor.execute(&job_id).await {
                            Ok(outcome) => {
                                debug!(job_id = %job_id, ?outcome, "job task finished");
                            }
                            Err(e) => {
                                error!(job_id = %job_id, error = %e, "job execution hit infrastructure failure");
                                if let Err(requeue_err) =
                                    queue.enqueue_delayed(&job_id, REQUEUE_DELAY).await
                                {
                                    error!(
                                        job_id = %job_id,
                                        error = %requeue_err,
                                        "failed to re-enqueue job after infrastructure failure"
                                    );
                                }
                            }
                        }
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    warn!(error = %e, "queue poll failed");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        // Drain: wait until every slot is back.
        let _ = semaphore
            .acquire_many(self.config.concurrency as u32)
            .await;
        info!("worker pool drained");
    }
}
