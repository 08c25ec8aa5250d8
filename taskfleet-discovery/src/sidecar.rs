//! Mirrors the fleet's `worker_metrics:` records into a file-based
//! service-discovery target list for the external scraper.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use etcd_client::EventType;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use taskfleet_common::store::{self, CoordStore, StoreKey};
use taskfleet_common::types::WorkerId;
use taskfleet_common::{Error, Result};

const WATCH_BACKOFF_INITIAL: Duration = Duration::from_millis(200);
const WATCH_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// One scrape target group in the file-based discovery format.
#[derive(Debug, Serialize)]
pub struct TargetGroup {
    pub targets: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

pub struct DiscoverySidecar {
    store: CoordStore,
    targets_path: PathBuf,
    job_label: String,
    endpoints: BTreeMap<WorkerId, String>,
}

impl DiscoverySidecar {
    pub fn new(store: CoordStore, targets_path: impl Into<PathBuf>, job_label: String) -> Self {
        Self {
            store,
            targets_path: targets_path.into(),
            job_label,
            endpoints: BTreeMap::new(),
        }
    }

    /// Mirror endpoint records into the targets file until cancelled. A
    /// broken watch is re-established with exponential backoff, resyncing
    /// from a fresh snapshot.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        let mut backoff = WATCH_BACKOFF_INITIAL;
        while !cancel.is_cancelled() {
            match self.watch_once(&cancel).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(error = %e, backoff = ?backoff, "endpoint watch broken, resyncing");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(WATCH_BACKOFF_MAX);
                }
            }
        }
        Ok(())
    }

    async fn watch_once(&mut self, cancel: &CancellationToken) -> Result<()> {
        let prefix = StoreKey::MetricsEndpointsPrefix.resolve();
        let (kvs, revision) = self.store.get_prefix(&prefix).await?;

        self.endpoints = kvs
            .into_iter()
            .filter_map(|(key, value)| store::worker_id_from_key(&key).map(|id| (id, value)))
            .collect();
        tracing::info!(workers = self.endpoints.len(), "loaded existing workers");
        self.persist();

        let (_watcher, mut stream) = self.store.watch_prefix(&prefix, revision).await?;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                msg = stream.message() => {
                    let resp = msg?.ok_or_else(|| {
                        Error::InvalidState("endpoint watch stream ended".to_string())
                    })?;
                    let mut changed = false;
                    for event in resp.events() {
                        let Some(kv) = event.kv() else { continue };
                        let Some(id) = store::worker_id_from_key(kv.key_str()?) else {
                            continue;
                        };
                        match event.event_type() {
                            EventType::Put => {
                                let endpoint = kv.value_str()?.to_string();
                                tracing::info!(worker = %id, endpoint = %endpoint, "worker joined");
                                self.endpoints.insert(id, endpoint);
                            }
                            EventType::Delete => {
                                tracing::info!(worker = %id, "worker left");
                                self.endpoints.remove(&id);
                            }
                        }
                        changed = true;
                    }
                    if changed {
                        self.persist();
                    }
                }
            }
        }
    }

    /// Rewrite the targets file. Failures are logged only; the next fleet
    /// change retries.
    fn persist(&self) {
        let group = TargetGroup {
            targets: self.endpoints.values().cloned().collect(),
            labels: BTreeMap::from([("job".to_string(), self.job_label.clone())]),
        };
        if let Err(e) = write_targets_file(&self.targets_path, &[group]) {
            tracing::error!(
                error = %e,
                path = %self.targets_path.display(),
                "failed to write targets file"
            );
        }
    }
}

/// Atomic rewrite: the content lands in a temp file next to the final path,
/// then renames over it, so the scraper never reads a partial file.
pub fn write_targets_file(path: &Path, groups: &[TargetGroup]) -> std::io::Result<()> {
    let content = serde_json::to_vec(groups)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{name}-{}.json", uuid::Uuid::new_v4()))
    }

    fn group(targets: &[&str], job: &str) -> TargetGroup {
        TargetGroup {
            targets: targets.iter().map(|t| t.to_string()).collect(),
            labels: BTreeMap::from([("job".to_string(), job.to_string())]),
        }
    }

    #[test]
    fn targets_file_has_the_scraper_shape() {
        let path = tmp_path("tgroups");
        write_targets_file(&path, &[group(&["host1:1111", "host2:2222"], "fleet")]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!([
                {
                    "targets": ["host1:1111", "host2:2222"],
                    "labels": { "job": "fleet" }
                }
            ])
        );

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn rewrite_replaces_previous_content_and_leaves_no_temp_file() {
        let path = tmp_path("tgroups-rewrite");
        write_targets_file(&path, &[group(&["host1:1111"], "fleet")]).unwrap();
        write_targets_file(&path, &[group(&["host2:2222"], "fleet")]).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed[0]["targets"], serde_json::json!(["host2:2222"]));
        assert!(!path.with_extension("tmp").exists());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn empty_fleet_writes_an_empty_target_list() {
        let path = tmp_path("tgroups-empty");
        write_targets_file(&path, &[group(&[], "fleet")]).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed[0]["targets"], serde_json::json!([]));

        std::fs::remove_file(&path).ok();
    }
}
