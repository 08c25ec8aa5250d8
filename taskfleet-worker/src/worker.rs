//! Wires membership, the ring, the rebalancer, and the consumer into one
//! running worker process.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use taskfleet_common::membership::{Membership, MembershipConfig};
use taskfleet_common::queue::{RedisQueue, TaskQueue, PARTITION_COUNT};
use taskfleet_common::store::CoordStore;
use taskfleet_common::types::WorkerId;
use taskfleet_common::Error as CoordError;

use crate::config::Config;
use crate::consumer::Consumer;
use crate::error::WorkerError;
use crate::metrics::WorkerMetrics;
use crate::ownership::OwnershipView;
use crate::rebalancer::Rebalancer;
use crate::ring::HashRing;

pub struct Worker {
    config: Config,
    worker_id: WorkerId,
}

impl Worker {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            worker_id: WorkerId::generate(),
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Run the worker until `cancel` fires or the lease is lost.
    ///
    /// Startup order: connect → register → first ownership computation (the
    /// initial snapshot delivers our own join) → consume. A lost lease is
    /// self-eviction: the error propagates so the process exits nonzero and
    /// the supervisor restarts it.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), WorkerError> {
        let store = CoordStore::connect(&self.config.etcd_endpoint_list()).await?;
        let queue: Arc<dyn TaskQueue> = Arc::new(RedisQueue::new(&self.config.redis_url)?);

        let membership = Arc::new(Membership::new(
            store,
            MembershipConfig {
                worker_id: self.worker_id.clone(),
                lease_ttl_secs: self.config.lease_ttl_secs,
                metrics_endpoint: self.config.advertise(),
            },
        ));
        let registration = membership.register().await?;
        tracing::info!(
            worker_id = %self.worker_id,
            lease_id = registration.lease_id,
            "registered with the fleet"
        );

        let metrics = WorkerMetrics::new(self.worker_id.clone());
        let ring = Arc::new(RwLock::new(HashRing::new(PARTITION_COUNT)));
        let view = OwnershipView::new();
        let (rebalancer, restart_rx) = Rebalancer::new(
            self.worker_id.clone(),
            ring,
            view.clone(),
            metrics.clone(),
        );

        let events = membership.subscribe(cancel.child_token()).await?;

        let mut keepalive_handle = {
            let membership = Arc::clone(&membership);
            let token = cancel.child_token();
            tokio::spawn(
                async move { membership.run_keepalive(registration.lease_id, token).await },
            )
        };

        let rebalancer_handle = {
            let token = cancel.child_token();
            tokio::spawn(async move { rebalancer.run(events, token).await })
        };

        let consumer = Consumer::new(
            queue,
            view,
            metrics.clone(),
            self.config.idle_backoff.0,
            self.config.error_backoff.0,
        );
        let consumer_handle = {
            let token = cancel.child_token();
            tokio::spawn(async move { consumer.run(restart_rx, token).await })
        };

        let summary_handle = {
            let metrics = metrics.clone();
            let interval = self.config.metrics_log_interval.0;
            let token = cancel.child_token();
            tokio::spawn(async move { metrics.run_summary_log(interval, token).await })
        };

        // Block until shutdown is requested or the keepalive fails.
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("shutdown requested");
                Ok(())
            }
            keepalive = &mut keepalive_handle => match keepalive {
                Ok(Ok(())) => Ok(()),
                Ok(Err(CoordError::LeaseLost)) => {
                    tracing::error!("membership lease lost, evicting self");
                    Err(WorkerError::LeaseLost)
                }
                Ok(Err(e)) => Err(e.into()),
                Err(e) => Err(WorkerError::Internal(format!("keepalive task panicked: {e}"))),
            },
        };

        // Stop the loops, revoke the lease so peers observe the leave
        // promptly, and drop the store connections last.
        cancel.cancel();
        keepalive_handle.abort();
        let _ = tokio::join!(rebalancer_handle, consumer_handle, summary_handle);
        membership.deregister(registration.lease_id).await;

        result
    }
}
