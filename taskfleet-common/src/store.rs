use etcd_client::{
    Client, Compare, CompareOp, GetOptions, LeaseKeepAliveStream, LeaseKeeper, PutOptions, Txn,
    TxnOp, WatchOptions, WatchStream, Watcher,
};

use crate::error::Result;
use crate::types::WorkerId;

/// All etcd key patterns used by the fleet.
pub enum StoreKey<'a> {
    /// `worker_id:<id>` = `"live"`, lease-bound. Presence of the key is the
    /// authoritative liveness signal.
    Member(&'a WorkerId),
    MembersPrefix,
    /// `worker_metrics:<id>` = `<host:port>`, lease-bound. Consumed by the
    /// discovery sidecar.
    MetricsEndpoint(&'a WorkerId),
    MetricsEndpointsPrefix,
}

impl StoreKey<'_> {
    pub fn resolve(&self) -> String {
        match self {
            StoreKey::Member(id) => format!("worker_id:{id}"),
            StoreKey::MembersPrefix => "worker_id:".to_string(),
            StoreKey::MetricsEndpoint(id) => format!("worker_metrics:{id}"),
            StoreKey::MetricsEndpointsPrefix => "worker_metrics:".to_string(),
        }
    }
}

/// Extract the worker id from a `worker_id:<id>` or `worker_metrics:<id>` key.
pub fn worker_id_from_key(key: &str) -> Option<WorkerId> {
    key.split_once(':')
        .filter(|(_, id)| !id.is_empty())
        .map(|(_, id)| WorkerId::from(id))
}

/// etcd client wrapper carrying the fleet's key schema and lease helpers.
///
/// `Client` is `Clone` (wraps an inner `Arc`), so each method clones it
/// cheaply. The one connection is created at startup and shared by every
/// component of the process.
#[derive(Clone)]
pub struct CoordStore {
    client: Client,
}

impl CoordStore {
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        let client = Client::connect(endpoints, None).await?;
        Ok(Self { client })
    }

    // ── KV operations ────────────────────────────────────────────

    /// Write `key = value` bound to `lease_id` only if the key does not
    /// already exist. Returns whether the write happened.
    pub async fn put_if_absent(&self, key: &str, value: &str, lease_id: i64) -> Result<bool> {
        let txn = Txn::new()
            .when(vec![Compare::version(key, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(
                key,
                value,
                Some(PutOptions::new().with_lease(lease_id)),
            )]);
        let resp = self.client.clone().txn(txn).await?;
        Ok(resp.succeeded())
    }

    pub async fn put_with_lease(&self, key: &str, value: &str, lease_id: i64) -> Result<()> {
        let options = PutOptions::new().with_lease(lease_id);
        self.client.clone().put(key, value, Some(options)).await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.client.clone().delete(key, None).await?;
        Ok(())
    }

    pub async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let options = etcd_client::DeleteOptions::new().with_prefix();
        self.client.clone().delete(prefix, Some(options)).await?;
        Ok(())
    }

    /// Prefix scan returning `(key, value)` pairs plus the store revision the
    /// snapshot was taken at. The revision binds a follow-up watch to this
    /// snapshot so no event is lost or duplicated between them.
    pub async fn get_prefix(&self, prefix: &str) -> Result<(Vec<(String, String)>, i64)> {
        let options = GetOptions::new().with_prefix();
        let resp = self.client.clone().get(prefix, Some(options)).await?;
        let revision = resp.header().map(|h| h.revision()).unwrap_or(0);
        let kvs = resp
            .kvs()
            .iter()
            .map(|kv| Ok((kv.key_str()?.to_string(), kv.value_str()?.to_string())))
            .collect::<Result<Vec<_>>>()?;
        Ok((kvs, revision))
    }

    /// Open a prefix watch delivering events committed after `revision`.
    ///
    /// The returned `Watcher` must be kept alive for the stream's lifetime.
    pub async fn watch_prefix(
        &self,
        prefix: &str,
        revision: i64,
    ) -> Result<(Watcher, WatchStream)> {
        let options = WatchOptions::new()
            .with_prefix()
            .with_start_revision(revision + 1);
        let (watcher, stream) = self.client.clone().watch(prefix, Some(options)).await?;
        Ok((watcher, stream))
    }

    // ── Lease operations ─────────────────────────────────────────

    pub async fn grant_lease(&self, ttl: i64) -> Result<i64> {
        let resp = self.client.clone().lease_grant(ttl, None).await?;
        Ok(resp.id())
    }

    pub async fn keep_alive(&self, lease_id: i64) -> Result<(LeaseKeeper, LeaseKeepAliveStream)> {
        let (keeper, stream) = self.client.clone().lease_keep_alive(lease_id).await?;
        Ok((keeper, stream))
    }

    pub async fn revoke_lease(&self, lease_id: i64) -> Result<()> {
        self.client.clone().lease_revoke(lease_id).await?;
        Ok(())
    }
}
