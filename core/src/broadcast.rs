//! Reliable multicast of crawled pages to every index replica.
//!
//! A crawl worker hands one [`PageRecord`] to [`ReplicationBroadcaster::send_document`],
//! which fans it out to all known replicas in parallel and waits for at least
//! `min_replicas` acknowledgments. Replicas that failed are retried after
//! `retry_delay`, up to `max_retries` extra rounds; each failing round first
//! refreshes the replica set through discovery so a restarted barrel is picked
//! up under its new address. `min_replicas = 1` gives plain best-effort delivery.

use crate::discovery::DiscoveryClient;
use crate::error::{Error, Result};
use crate::index::PageRecord;
use crate::rpc::ReplicaHandle;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinSet;

/// Recent message ids kept for duplicate suppression; cleared wholesale past this.
const RECENT_CAP: usize = 1000;

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub min_replicas: usize,
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            min_replicas: 1,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            call_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

pub struct ReplicationBroadcaster {
    replicas: RwLock<Vec<ReplicaHandle>>,
    discovery: Arc<dyn DiscoveryClient>,
    recent: Mutex<HashSet<String>>,
    config: BroadcastConfig,
}

impl ReplicationBroadcaster {
    pub fn new(discovery: Arc<dyn DiscoveryClient>, config: BroadcastConfig) -> Self {
        Self {
            replicas: RwLock::new(Vec::new()),
            discovery,
            recent: Mutex::new(HashSet::new()),
            config,
        }
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Add a replica, replacing any handle with the same id.
    pub fn add_replica(&self, handle: ReplicaHandle) {
        let mut replicas = self.replicas.write();
        match replicas.iter_mut().find(|h| h.id() == handle.id()) {
            Some(slot) => *slot = handle,
            None => replicas.push(handle),
        }
    }

    pub fn remove_replica(&self, id: &str) -> bool {
        let mut replicas = self.replicas.write();
        let before = replicas.len();
        replicas.retain(|h| h.id() != id);
        replicas.len() != before
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.read().len()
    }

    pub fn replica_ids(&self) -> Vec<String> {
        self.replicas.read().iter().map(|h| h.id().to_string()).collect()
    }

    /// Replace the known set with whatever discovery currently reports.
    /// An empty answer leaves the set untouched.
    pub async fn refresh(&self) -> usize {
        let found = self.discovery.discover().await;
        let mut replicas = self.replicas.write();
        if !found.is_empty() {
            *replicas = found;
        }
        replicas.len()
    }

    pub async fn send_document(&self, page: PageRecord) -> Result<Delivery> {
        let message_id = format!("{}:{}", page.url, unix_millis());
        self.send_message(message_id, page).await
    }

    async fn send_message(&self, message_id: String, page: PageRecord) -> Result<Delivery> {
        if self.recent.lock().contains(&message_id) {
            tracing::debug!(%message_id, "duplicate message suppressed");
            return Ok(Delivery { delivered: 0, failed: 0 });
        }

        if self.replica_count() == 0 && self.refresh().await == 0 {
            tracing::warn!(url = %page.url, "no replicas known, document dropped");
            return Err(Error::NoReplicas);
        }

        let required = self.config.min_replicas.max(1);
        let page = Arc::new(page);
        let mut delivered: HashSet<String> = HashSet::new();
        let mut failed: Vec<String>;
        let mut targets = self.replicas.read().clone();
        let mut round = 0usize;

        loop {
            let (ok, bad) = self.dispatch(&page, targets).await;
            delivered.extend(ok);
            failed = bad;

            if !failed.is_empty() {
                let known = self.refresh().await;
                tracing::debug!(url = %page.url, round, failed = failed.len(), known, "delivery round had failures");
            }
            if delivered.len() >= required || round >= self.config.max_retries {
                break;
            }

            round += 1;
            tokio::time::sleep(self.config.retry_delay).await;
            targets = self
                .replicas
                .read()
                .iter()
                .filter(|h| !delivered.contains(h.id()))
                .cloned()
                .collect();
            if targets.is_empty() {
                break;
            }
        }

        if delivered.len() < required {
            tracing::warn!(
                url = %page.url,
                delivered = delivered.len(),
                failed = failed.len(),
                required,
                "replication quorum not reached"
            );
            return Err(Error::Quorum {
                delivered: delivered.len(),
                failed: failed.len(),
                required,
            });
        }

        self.remember(message_id);
        tracing::debug!(url = %page.url, delivered = delivered.len(), failed = failed.len(), "document replicated");
        Ok(Delivery { delivered: delivered.len(), failed: failed.len() })
    }

    /// Send to every target in parallel; returns (acknowledged ids, failed ids).
    async fn dispatch(&self, page: &Arc<PageRecord>, targets: Vec<ReplicaHandle>) -> (Vec<String>, Vec<String>) {
        let mut tasks = JoinSet::new();
        for handle in targets {
            let page = Arc::clone(page);
            let timeout = self.config.call_timeout;
            tasks.spawn(async move {
                let outcome = match tokio::time::timeout(timeout, handle.rpc().add_document(&page)).await {
                    Ok(res) => res,
                    Err(_) => Err(Error::Timeout { replica: handle.id().to_string() }),
                };
                (handle.id().to_string(), outcome)
            });
        }

        let mut ok = Vec::new();
        let mut bad = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(()))) => ok.push(id),
                Ok((id, Err(e))) => {
                    tracing::debug!(replica = %id, error = %e, "delivery failed");
                    bad.push(id);
                }
                Err(e) => tracing::error!(error = %e, "delivery task aborted"),
            }
        }
        (ok, bad)
    }

    fn remember(&self, message_id: String) {
        let mut recent = self.recent.lock();
        if recent.len() > RECENT_CAP {
            recent.clear();
        }
        recent.insert(message_id);
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
