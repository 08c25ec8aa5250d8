//! The blocking consumption loop: pop task ids from the owned partitions,
//! and never block on a queue this worker no longer owns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use taskfleet_common::queue::{partition_queue, TaskQueue};

use crate::metrics::WorkerMetrics;
use crate::ownership::OwnershipView;

pub struct Consumer {
    queue: Arc<dyn TaskQueue>,
    view: OwnershipView,
    metrics: WorkerMetrics,
    idle_backoff: Duration,
    error_backoff: Duration,
}

impl Consumer {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        view: OwnershipView,
        metrics: WorkerMetrics,
        idle_backoff: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            queue,
            view,
            metrics,
            idle_backoff,
            error_backoff,
        }
    }

    /// Pop tasks from the owned partitions until shutdown. Each iteration
    /// re-reads the ownership view; the blocking pop is abandoned whenever
    /// the rebalancer signals, so the loop always blocks on the current
    /// ownership only. Task execution itself happens elsewhere — this loop
    /// records the consumption.
    pub async fn run(&self, mut restart_rx: mpsc::Receiver<()>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            let owned = self.view.snapshot().await;
            if owned.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = restart_rx.recv() => {}
                    _ = tokio::time::sleep(self.idle_backoff) => {}
                }
                continue;
            }

            let queues: Vec<String> = owned.iter().map(|p| partition_queue(*p)).collect();

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = restart_rx.recv() => {
                    info!("ownership changed, restarting blocking pop");
                }
                popped = self.queue.blocking_pop(&queues) => match popped {
                    Ok((queue, task)) => {
                        self.metrics.incr_tasks_processed();
                        info!(queue = %queue, task = %task, "task popped");
                    }
                    Err(e) => {
                        warn!(error = %e, "blocking pop failed");
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(self.error_backoff) => {}
                        }
                    }
                },
            }
        }
    }
}
