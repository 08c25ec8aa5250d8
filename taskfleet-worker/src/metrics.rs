use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use taskfleet_common::types::WorkerId;

/// The worker's three exported series, labelled by worker id.
///
/// Values are recorded through the process-global prometheus recorder and
/// mirrored in plain atomics for the periodic summary log.
#[derive(Clone)]
pub struct WorkerMetrics {
    worker_id: WorkerId,
    tasks_processed: Arc<AtomicU64>,
    rebalances: Arc<AtomicU64>,
    partitions_owned: Arc<AtomicU64>,
}

impl WorkerMetrics {
    pub fn new(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            tasks_processed: Arc::new(AtomicU64::new(0)),
            rebalances: Arc::new(AtomicU64::new(0)),
            partitions_owned: Arc::new(AtomicU64::new(0)),
        }
    }

    fn labels(&self) -> [(&'static str, String); 1] {
        [("worker_id", self.worker_id.to_string())]
    }

    pub fn incr_tasks_processed(&self) {
        self.tasks_processed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("taskfleet_tasks_processed_total", &self.labels()).increment(1);
    }

    pub fn incr_rebalances(&self) {
        self.rebalances.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("taskfleet_rebalances_total", &self.labels()).increment(1);
    }

    pub fn set_partitions_owned(&self, count: u64) {
        self.partitions_owned.store(count, Ordering::Relaxed);
        metrics::gauge!("taskfleet_partitions_owned", &self.labels()).set(count as f64);
    }

    pub fn tasks_processed(&self) -> u64 {
        self.tasks_processed.load(Ordering::Relaxed)
    }

    pub fn rebalances(&self) -> u64 {
        self.rebalances.load(Ordering::Relaxed)
    }

    pub fn partitions_owned(&self) -> u64 {
        self.partitions_owned.load(Ordering::Relaxed)
    }

    /// Log a summary of the three series every `interval` until cancelled.
    pub async fn run_summary_log(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    tracing::info!(
                        worker_id = %self.worker_id,
                        tasks_processed = self.tasks_processed(),
                        rebalances = self.rebalances(),
                        partitions_owned = self.partitions_owned(),
                        "metrics summary"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> WorkerMetrics {
        WorkerMetrics::new(WorkerId::from("worker-test-1-1"))
    }

    #[test]
    fn counters_are_monotonic() {
        let m = metrics();
        m.incr_tasks_processed();
        m.incr_tasks_processed();
        m.incr_rebalances();
        assert_eq!(m.tasks_processed(), 2);
        assert_eq!(m.rebalances(), 1);
    }

    #[test]
    fn gauge_tracks_the_latest_value() {
        let m = metrics();
        m.set_partitions_owned(128);
        m.set_partitions_owned(7);
        assert_eq!(m.partitions_owned(), 7);
    }

    #[test]
    fn clones_share_state() {
        let m = metrics();
        let other = m.clone();
        other.incr_tasks_processed();
        assert_eq!(m.tasks_processed(), 1);
    }
}
