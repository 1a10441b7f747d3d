//! Lifecycle of one barrel: bootstrap from a peer or from disk, then periodic
//! snapshots while serving.
//!
//! ```text
//! Bootstrapping -> SyncingFromPeer -> Merged ----------------------> Ready
//!                                  \-> SyncFailed -> LoadingFromDisk -/
//! ```
//!
//! Writes are applied in every state; nothing reaches disk before `Ready`, so
//! a half-bootstrapped barrel can never overwrite a good snapshot.

use index_core::discovery::DiscoveryClient;
use index_core::persist::{load_meta, load_snapshot, save_snapshot, SnapshotPaths};
use index_core::rpc::{ReplicaNotice, ENDPOINT_NOTIFY};
use index_core::{IndexStore, StoreStats};
use parking_lot::RwLock;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrelState {
    Bootstrapping,
    SyncingFromPeer,
    Merged,
    SyncFailed,
    LoadingFromDisk,
    Ready,
}

#[derive(Debug, Clone)]
pub struct BarrelConfig {
    pub id: String,
    pub data_dir: PathBuf,
    pub persist_interval: Duration,
}

/// Posts a [`ReplicaNotice`] to the gateway when this barrel's counts change.
pub struct GatewayNotifier {
    url: String,
    client: reqwest::Client,
}

impl GatewayNotifier {
    pub fn new(gateway: &str, client: reqwest::Client) -> Self {
        let gateway = gateway.trim_end_matches('/');
        let base = if gateway.contains("://") {
            gateway.to_string()
        } else {
            format!("http://{gateway}")
        };
        Self { url: format!("{base}{ENDPOINT_NOTIFY}"), client }
    }

    async fn notify(&self, notice: &ReplicaNotice) {
        let sent = self
            .client
            .post(&self.url)
            .json(notice)
            .timeout(Duration::from_secs(2))
            .send()
            .await;
        match sent {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => tracing::debug!(status = %resp.status(), "gateway rejected notification"),
            Err(e) => tracing::debug!(error = %e, "gateway notification failed"),
        }
    }
}

pub struct BarrelNode {
    id: String,
    store: Arc<IndexStore>,
    /// Every state entered so far; the last one is current.
    lifecycle: RwLock<Vec<BarrelState>>,
    paths: SnapshotPaths,
    persist_interval: Duration,
    /// Serializes snapshot writers; holds the counts last reported to the gateway.
    persist: Mutex<Option<StoreStats>>,
    notifier: Option<GatewayNotifier>,
}

impl BarrelNode {
    pub fn new(config: BarrelConfig, notifier: Option<GatewayNotifier>) -> Self {
        let paths = SnapshotPaths::new(&config.data_dir, &config.id);
        Self {
            id: config.id,
            store: Arc::new(IndexStore::new()),
            lifecycle: RwLock::new(vec![BarrelState::Bootstrapping]),
            paths,
            persist_interval: config.persist_interval,
            persist: Mutex::new(None),
            notifier,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    pub fn state(&self) -> BarrelState {
        self.lifecycle.read().last().copied().unwrap_or(BarrelState::Bootstrapping)
    }

    pub fn lifecycle(&self) -> Vec<BarrelState> {
        self.lifecycle.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == BarrelState::Ready
    }

    fn set_state(&self, next: BarrelState) {
        let prev = {
            let mut lifecycle = self.lifecycle.write();
            let prev = lifecycle.last().copied();
            lifecycle.push(next);
            prev
        };
        tracing::debug!(id = %self.id, ?prev, ?next, "state transition");
    }

    /// Recover state from the first peer that answers, else from the local
    /// snapshot, else start empty. Ends in `Ready` with an immediate persist.
    pub async fn bootstrap(&self, discovery: &dyn DiscoveryClient) -> BarrelState {
        self.set_state(BarrelState::SyncingFromPeer);
        let path = if self.sync_from_peer(discovery).await {
            self.set_state(BarrelState::Merged);
            BarrelState::Merged
        } else {
            self.set_state(BarrelState::SyncFailed);
            self.set_state(BarrelState::LoadingFromDisk);
            let restored = self.load_from_disk();
            tracing::info!(id = %self.id, restored, "disk recovery finished");
            BarrelState::LoadingFromDisk
        };
        self.set_state(BarrelState::Ready);

        let stats = self.store.stats();
        tracing::info!(
            id = %self.id,
            via = ?path,
            pages = stats.page_count,
            terms = stats.term_count,
            "barrel ready"
        );
        self.persist().await;
        path
    }

    async fn sync_from_peer(&self, discovery: &dyn DiscoveryClient) -> bool {
        let peers = discovery.discover().await;
        for peer in peers.iter().filter(|p| p.id() != self.id) {
            tracing::info!(peer = %peer.id(), "requesting full state");
            match peer.rpc().get_full_state().await {
                Ok(snapshot) => {
                    let pages = snapshot.pages.len();
                    self.store.merge_snapshot(snapshot);
                    tracing::info!(peer = %peer.id(), pages, "merged peer state");
                    return true;
                }
                Err(e) => tracing::warn!(peer = %peer.id(), error = %e, "peer sync failed, trying next"),
            }
        }
        tracing::info!(id = %self.id, "no peer available for sync");
        false
    }

    fn load_from_disk(&self) -> bool {
        match load_snapshot(&self.paths) {
            Ok(Some(snapshot)) => {
                let pages = snapshot.pages.len();
                self.store.merge_snapshot(snapshot);
                match load_meta(&self.paths) {
                    Ok(Some(meta)) => {
                        tracing::info!(pages, saved_at = %meta.saved_at, "loaded local snapshot")
                    }
                    _ => tracing::info!(path = %self.paths.snapshot().display(), pages, "loaded local snapshot"),
                }
                true
            }
            Ok(None) => {
                tracing::info!(path = %self.paths.snapshot().display(), "no local snapshot, starting empty");
                false
            }
            Err(e) => {
                tracing::error!(path = %self.paths.snapshot().display(), error = %e, "failed to read local snapshot");
                false
            }
        }
    }

    /// Write a snapshot if `Ready`. One writer at a time; failures are logged.
    /// Returns whether a snapshot was written.
    pub async fn persist(&self) -> bool {
        let mut last_notified = self.persist.lock().await;
        if !self.is_ready() {
            tracing::debug!(id = %self.id, state = ?self.state(), "not ready, skipping persist");
            return false;
        }

        let snapshot = self.store.full_state();
        let paths = self.paths.clone();
        let written = tokio::task::spawn_blocking(move || save_snapshot(&paths, &snapshot)).await;
        let meta = match written {
            Ok(Ok(meta)) => meta,
            Ok(Err(e)) => {
                tracing::error!(id = %self.id, error = %e, "snapshot write failed");
                return false;
            }
            Err(e) => {
                tracing::error!(id = %self.id, error = %e, "snapshot task failed");
                return false;
            }
        };
        tracing::debug!(id = %self.id, pages = meta.pages, terms = meta.terms, "snapshot written");

        let stats = self.store.stats();
        if *last_notified != Some(stats) {
            if let Some(notifier) = &self.notifier {
                notifier
                    .notify(&ReplicaNotice { replica_id: self.id.clone(), stats })
                    .await;
            }
            *last_notified = Some(stats);
        }
        true
    }

    pub fn spawn_autosave(self: &Arc<Self>) -> JoinHandle<()> {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let period = node.persist_interval;
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                node.persist().await;
            }
        })
    }
}
