//! Serialises membership events into ring and ownership-view updates, and
//! pokes the consumer to restart its blocking read.

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use taskfleet_common::types::{MembershipEvent, WorkerId};

use crate::metrics::WorkerMetrics;
use crate::ownership::OwnershipView;
use crate::ring::HashRing;

pub struct Rebalancer {
    worker_id: WorkerId,
    ring: Arc<RwLock<HashRing>>,
    view: OwnershipView,
    metrics: WorkerMetrics,
    restart_tx: mpsc::Sender<()>,
}

impl Rebalancer {
    /// The returned receiver is the consumer's restart signal: a single-slot
    /// channel, so a burst of events coalesces into at most one visible
    /// restart that observes the final state.
    pub fn new(
        worker_id: WorkerId,
        ring: Arc<RwLock<HashRing>>,
        view: OwnershipView,
        metrics: WorkerMetrics,
    ) -> (Self, mpsc::Receiver<()>) {
        let (restart_tx, restart_rx) = mpsc::channel(1);
        (
            Self {
                worker_id,
                ring,
                view,
                metrics,
                restart_tx,
            },
            restart_rx,
        )
    }

    /// Apply membership events in arrival order until the stream closes or
    /// `cancel` fires. The single consuming loop is what linearises all ring
    /// and view mutations.
    pub async fn run(&self, mut events: mpsc::Receiver<MembershipEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.recv() => match event {
                    Some(event) => self.apply(event).await,
                    None => {
                        tracing::warn!("membership event stream closed");
                        return;
                    }
                },
            }
        }
    }

    pub async fn apply(&self, event: MembershipEvent) {
        {
            let mut ring = self.ring.write().await;
            match &event {
                MembershipEvent::Joined(worker) => {
                    tracing::info!(worker = %worker, "worker joined");
                    if let Err(e) = ring.add_node(worker) {
                        // Skip the mutation rather than poison the ring; it
                        // keeps serving its previous consistent state.
                        tracing::error!(worker = %worker, error = %e, "rejected ring mutation");
                    }
                }
                MembershipEvent::Left(worker) => {
                    tracing::info!(worker = %worker, "worker left");
                    ring.remove_node(worker);
                }
            }
        }

        let owned = self
            .ring
            .read()
            .await
            .partitions_owned_by(&self.worker_id);
        let count = owned.len() as u64;
        self.view.replace(owned).await;

        self.metrics.incr_rebalances();
        self.metrics.set_partitions_owned(count);
        tracing::info!(partitions = count, "ownership recomputed");

        // Non-blocking: a full slot means a restart is already pending and
        // the consumer will see the final view when it handles it.
        let _ = self.restart_tx.try_send(());
    }
}
