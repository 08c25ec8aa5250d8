//! Fleet membership over etcd leases and watches.
//!
//! Each worker holds exactly one lease for its lifetime. The `worker_id:`
//! record bound to it is the liveness signal: lease expiry deletes the record
//! and the rest of the fleet observes a leave. Subscribers receive the member
//! set as an ordered event stream — the initial snapshot first (self
//! included, so the initial join is observable), then watch events in commit
//! order.

use std::collections::BTreeSet;
use std::time::Duration;

use etcd_client::EventType;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::store::{self, CoordStore, StoreKey};
use crate::types::{MembershipEvent, WorkerId};

/// Default TTL for the membership lease.
pub const LEASE_TTL_SECS: i64 = 10;

/// Deadline for the shutdown-time lease revoke. On timeout the TTL cleans up.
pub const REVOKE_DEADLINE: Duration = Duration::from_secs(5);

const WATCH_BACKOFF_INITIAL: Duration = Duration::from_millis(200);
const WATCH_BACKOFF_MAX: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct MembershipConfig {
    pub worker_id: WorkerId,
    pub lease_ttl_secs: i64,
    /// `host:port` of this worker's metrics endpoint, advertised under
    /// `worker_metrics:` for the discovery sidecar.
    pub metrics_endpoint: String,
}

/// This worker's registration: the lease backing its membership record.
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    pub lease_id: i64,
}

pub struct Membership {
    store: CoordStore,
    config: MembershipConfig,
}

impl Membership {
    pub fn new(store: CoordStore, config: MembershipConfig) -> Self {
        Self { store, config }
    }

    /// Register this worker: grant the lease, claim the member key, and
    /// advertise the metrics endpoint. Any failure here is fatal to startup.
    ///
    /// The member key is claimed conditionally (only if absent). If a
    /// previous incarnation's un-expired lease still holds the key, the
    /// record is not bound to our lease and waiting would leave us invisible
    /// to the fleet, so the stale record is deleted and the claim retried
    /// once. A second failure means another live process owns our id.
    pub async fn register(&self) -> Result<Registration> {
        let lease_id = self.store.grant_lease(self.config.lease_ttl_secs).await?;

        let member_key = StoreKey::Member(&self.config.worker_id).resolve();
        let mut claimed = self.store.put_if_absent(&member_key, "live", lease_id).await?;
        if !claimed {
            tracing::warn!(
                worker_id = %self.config.worker_id,
                "membership record held by a stale lease, replacing"
            );
            self.store.delete(&member_key).await?;
            claimed = self.store.put_if_absent(&member_key, "live", lease_id).await?;
        }
        if !claimed {
            return Err(Error::RegistrationConflict(
                self.config.worker_id.to_string(),
            ));
        }

        let metrics_key = StoreKey::MetricsEndpoint(&self.config.worker_id).resolve();
        self.store
            .put_with_lease(&metrics_key, &self.config.metrics_endpoint, lease_id)
            .await?;

        Ok(Registration { lease_id })
    }

    /// Renew the lease at TTL/3 cadence until cancelled. Returns
    /// `Error::LeaseLost` when a renewal fails or the store reports the lease
    /// expired; the caller must treat that as self-eviction and shut down.
    pub async fn run_keepalive(&self, lease_id: i64, cancel: CancellationToken) -> Result<()> {
        let interval = Duration::from_secs((self.config.lease_ttl_secs as u64 / 3).max(1));
        let (mut keeper, mut stream) = self.store.keep_alive(lease_id).await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(interval) => {
                    keeper.keep_alive().await.map_err(|_| Error::LeaseLost)?;
                    match stream.message().await {
                        Ok(Some(resp)) if resp.ttl() > 0 => {
                            tracing::debug!(lease_id, ttl = resp.ttl(), "lease renewed");
                        }
                        _ => return Err(Error::LeaseLost),
                    }
                }
            }
        }
    }

    /// Stream membership changes to a single subscriber: the initial snapshot
    /// as joins (in key order), then watch events in commit order. The watch
    /// starts at the snapshot revision so nothing is lost or duplicated
    /// between the two.
    ///
    /// A broken watch is re-established with exponential backoff and resync:
    /// the watcher re-reads the prefix, emits the diff against what it
    /// already delivered, and resumes.
    pub async fn subscribe(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<MembershipEvent>> {
        let (tx, rx) = mpsc::channel(64);
        let store = self.store.clone();
        tokio::spawn(async move {
            run_member_watch(store, tx, cancel).await;
        });
        Ok(rx)
    }

    /// Revoke the lease under [`REVOKE_DEADLINE`], swallowing timeouts.
    pub async fn deregister(&self, lease_id: i64) {
        match tokio::time::timeout(REVOKE_DEADLINE, self.store.revoke_lease(lease_id)).await {
            Ok(Ok(())) => tracing::info!(lease_id, "lease revoked"),
            Ok(Err(e)) => tracing::warn!(lease_id, error = %e, "failed to revoke lease"),
            Err(_) => tracing::warn!(lease_id, "lease revoke timed out, relying on TTL expiry"),
        }
    }
}

async fn run_member_watch(
    store: CoordStore,
    tx: mpsc::Sender<MembershipEvent>,
    cancel: CancellationToken,
) {
    let mut delivered: BTreeSet<WorkerId> = BTreeSet::new();
    let mut backoff = WATCH_BACKOFF_INITIAL;

    while !cancel.is_cancelled() {
        match watch_once(&store, &mut delivered, &tx, &cancel).await {
            Ok(()) => return,
            Err(e) => {
                tracing::warn!(error = %e, backoff = ?backoff, "membership watch broken, resyncing");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(WATCH_BACKOFF_MAX);
            }
        }
    }
}

/// One snapshot-then-watch pass. `Ok` means the subscriber went away or the
/// task was cancelled; `Err` means the watch broke and the caller should
/// resync. `delivered` tracks the member set the subscriber has seen, so a
/// resync emits only the difference.
async fn watch_once(
    store: &CoordStore,
    delivered: &mut BTreeSet<WorkerId>,
    tx: &mpsc::Sender<MembershipEvent>,
    cancel: &CancellationToken,
) -> Result<()> {
    let prefix = StoreKey::MembersPrefix.resolve();
    let (kvs, revision) = store.get_prefix(&prefix).await?;
    let current: BTreeSet<WorkerId> = kvs
        .iter()
        .filter_map(|(key, _)| store::worker_id_from_key(key))
        .collect();

    let left: Vec<WorkerId> = delivered.difference(&current).cloned().collect();
    let joined: Vec<WorkerId> = current.difference(delivered).cloned().collect();
    for id in left {
        delivered.remove(&id);
        if tx.send(MembershipEvent::Left(id)).await.is_err() {
            return Ok(());
        }
    }
    for id in joined {
        delivered.insert(id.clone());
        if tx.send(MembershipEvent::Joined(id)).await.is_err() {
            return Ok(());
        }
    }

    let (_watcher, mut stream) = store.watch_prefix(&prefix, revision).await?;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            msg = stream.message() => {
                let resp = msg?.ok_or_else(|| {
                    Error::InvalidState("member watch stream ended".to_string())
                })?;
                for event in resp.events() {
                    let Some(kv) = event.kv() else { continue };
                    let Some(id) = store::worker_id_from_key(kv.key_str()?) else {
                        continue;
                    };
                    let membership_event = match event.event_type() {
                        EventType::Put => {
                            delivered.insert(id.clone());
                            MembershipEvent::Joined(id)
                        }
                        EventType::Delete => {
                            delivered.remove(&id);
                            MembershipEvent::Left(id)
                        }
                    };
                    if tx.send(membership_event).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}
