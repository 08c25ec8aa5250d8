use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::RwLock;

/// The partitions this worker currently owns.
///
/// Replaced wholesale by the rebalancer after every membership change and
/// snapshotted by the consumer on each loop iteration. Readers observe the
/// pre- or the post-image, never a partial set.
#[derive(Clone, Default)]
pub struct OwnershipView {
    owned: Arc<RwLock<BTreeSet<u32>>>,
}

impl OwnershipView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace(&self, owned: BTreeSet<u32>) {
        *self.owned.write().await = owned;
    }

    pub async fn snapshot(&self) -> BTreeSet<u32> {
        self.owned.read().await.clone()
    }
}
