//! Query coordination across index replicas.
//!
//! Reads go to one replica chosen round robin. A replica that fails a call is
//! dropped from the active set and the call moves on to the next one; dropped
//! replicas come back on the next discovery pass. Results are cached per
//! `(terms, page)` and every successful query feeds popularity and latency
//! statistics, which are pushed to subscribers whenever they change.

use crate::cache::{CacheKey, QueryCache};
use crate::stats::{FrontierStatus, QueryStats, ReplicaReport, StatsReport};
use crate::subscribers::StatsSubscriber;
use dashmap::DashMap;
use index_core::discovery::DiscoveryClient;
use index_core::frontier::Frontier;
use index_core::{Error, ReplicaHandle, Result, SearchResultItem, StoreStats};
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub page_size: usize,
    pub cache_ttl: Duration,
    pub sweep_interval: Duration,
    pub discovery_interval: Duration,
    pub top_queries: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            cache_ttl: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
            discovery_interval: Duration::from_secs(30),
            top_queries: 10,
        }
    }
}

#[derive(Default)]
struct ActiveSet {
    replicas: Vec<ReplicaHandle>,
    cursor: usize,
}

pub struct Coordinator {
    active: Mutex<ActiveSet>,
    discovery: Arc<dyn DiscoveryClient>,
    frontier: Arc<dyn Frontier>,
    cache: QueryCache,
    stats: QueryStats,
    counts: DashMap<String, StoreStats>,
    subscribers: Mutex<Vec<Arc<dyn StatsSubscriber>>>,
    signature: Mutex<Option<u64>>,
    frontier_status: Mutex<FrontierStatus>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        discovery: Arc<dyn DiscoveryClient>,
        frontier: Arc<dyn Frontier>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            active: Mutex::new(ActiveSet::default()),
            discovery,
            frontier,
            cache: QueryCache::new(config.cache_ttl),
            stats: QueryStats::new(),
            counts: DashMap::new(),
            subscribers: Mutex::new(Vec::new()),
            signature: Mutex::new(None),
            frontier_status: Mutex::new(FrontierStatus::default()),
            config,
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Add a replica, replacing the handle of an already known id.
    pub fn add_replica(&self, handle: ReplicaHandle) {
        let mut active = self.active.lock();
        match active.replicas.iter_mut().find(|h| h.id() == handle.id()) {
            Some(slot) => *slot = handle,
            None => active.replicas.push(handle),
        }
    }

    pub fn register_replica(&self, handle: ReplicaHandle) {
        tracing::info!(replica = %handle.id(), "replica registered");
        self.add_replica(handle);
    }

    pub fn remove_replica(&self, id: &str) -> bool {
        let mut active = self.active.lock();
        let before = active.replicas.len();
        active.replicas.retain(|h| h.id() != id);
        active.replicas.len() != before
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.active.lock().replicas.iter().map(|h| h.id().to_string()).collect()
    }

    /// Merge whatever discovery reports into the active set.
    pub async fn refresh_replicas(&self) -> usize {
        let found = self.discovery.discover().await;
        for handle in found {
            self.add_replica(handle);
        }
        self.active.lock().replicas.len()
    }

    fn next_replica(&self) -> Option<ReplicaHandle> {
        let mut active = self.active.lock();
        if active.replicas.is_empty() {
            return None;
        }
        let idx = active.cursor % active.replicas.len();
        active.cursor = active.cursor.wrapping_add(1);
        Some(active.replicas[idx].clone())
    }

    /// Run `call` against replicas in round-robin order until one succeeds,
    /// removing each replica that fails.
    async fn with_failover<T, F, Fut>(&self, mut call: F) -> Result<(T, String, Duration)>
    where
        F: FnMut(ReplicaHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.active.lock().replicas.is_empty() {
            self.refresh_replicas().await;
        }
        while let Some(handle) = self.next_replica() {
            let id = handle.id().to_string();
            let started = Instant::now();
            match call(handle).await {
                Ok(value) => return Ok((value, id, started.elapsed())),
                Err(e) => {
                    tracing::warn!(replica = %id, error = %e, "replica failed, removing from active set");
                    self.remove_replica(&id);
                }
            }
        }
        Err(Error::AllReplicasFailed)
    }

    pub async fn search(&self, terms: &[String], page: usize) -> Result<Vec<SearchResultItem>> {
        let terms: Vec<String> = terms
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        self.stats.record_query(&terms.join(" "));

        let key = CacheKey { terms, page };
        if let Some(results) = self.cache.get(&key) {
            tracing::debug!(terms = ?key.terms, page, "cache hit");
            self.notify_if_changed().await;
            return Ok(results);
        }

        let page_size = self.config.page_size;
        let query = &key.terms;
        let (results, replica, elapsed) = self
            .with_failover(move |h| async move { h.rpc().search_all_terms(query, page, page_size).await })
            .await?;

        tracing::debug!(%replica, hits = results.len(), elapsed_ms = elapsed.as_millis() as u64, "search served");
        self.stats.record_latency(&replica, elapsed);
        self.cache.put(key, results.clone());
        self.notify_if_changed().await;
        Ok(results)
    }

    /// Pages linking to `url`, trying common spellings of it in turn.
    pub async fn get_backlinks(&self, url: &str) -> Vec<String> {
        for variant in url_variants(url) {
            let target = variant.as_str();
            match self
                .with_failover(move |h| async move { h.rpc().get_backlinks(target).await })
                .await
            {
                Ok((links, _, _)) if !links.is_empty() => return links,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(%url, error = %e, "backlink lookup exhausted replicas");
                    return Vec::new();
                }
            }
        }
        Vec::new()
    }

    /// Ask every active replica for its counts. A failing replica is
    /// re-resolved through discovery and retried once, then reported offline.
    pub async fn get_stats(&self) -> StatsReport {
        let handles: Vec<ReplicaHandle> = self.active.lock().replicas.clone();
        let mut replicas = Vec::with_capacity(handles.len());

        for handle in handles {
            let id = handle.id().to_string();
            let counts = match handle.rpc().stats().await {
                Ok(stats) => Some(stats),
                Err(e) => {
                    tracing::debug!(replica = %id, error = %e, "stats failed, re-resolving");
                    self.retry_stats(&id).await
                }
            };
            if let Some(stats) = counts {
                self.counts.insert(id.clone(), stats);
            }
            replicas.push(self.replica_report(&id, counts.is_some(), counts));
        }

        let report = StatsReport {
            top_queries: self.stats.top_queries(self.config.top_queries),
            active_replicas: replicas.len(),
            replicas,
            frontier: self.refresh_frontier_status().await,
        };
        self.notify_if_changed().await;
        report
    }

    async fn retry_stats(&self, id: &str) -> Option<StoreStats> {
        let fresh = self.discovery.discover().await.into_iter().find(|h| h.id() == id)?;
        self.add_replica(fresh.clone());
        match fresh.rpc().stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::warn!(replica = %id, error = %e, "replica offline");
                None
            }
        }
    }

    async fn refresh_frontier_status(&self) -> FrontierStatus {
        let queue_size = match self.frontier.queue_size().await {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::debug!(error = %e, "frontier queue size unavailable");
                None
            }
        };
        let active_downloaders = match self.frontier.active_downloaders().await {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::debug!(error = %e, "frontier downloader count unavailable");
                None
            }
        };
        let status = FrontierStatus { queue_size, active_downloaders };
        *self.frontier_status.lock() = status;
        status
    }

    /// The frontier's liveness answer, `None` when it is unreachable.
    pub async fn ping_frontier(&self) -> Option<String> {
        match self.frontier.ping().await {
            Ok(reply) => Some(reply),
            Err(e) => {
                tracing::warn!(error = %e, "frontier ping failed");
                None
            }
        }
    }

    /// Queue `url` at the head of the crawl frontier. Returns whether it was accepted.
    pub async fn index_url(&self, url: &str) -> bool {
        let Some(normalized) = normalize_url(url) else {
            tracing::debug!(%url, "rejected invalid url");
            return false;
        };
        match self.frontier.add_top_priority_url(&normalized).await {
            Ok(()) => {
                tracing::info!(url = %normalized, "queued for indexing");
                true
            }
            Err(e) => {
                tracing::warn!(url = %normalized, error = %e, "frontier rejected url");
                false
            }
        }
    }

    pub fn register_subscriber(&self, subscriber: Arc<dyn StatsSubscriber>) {
        tracing::info!(subscriber = %subscriber.name(), "subscriber registered");
        self.subscribers.lock().push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub async fn notify_from_replica(&self, id: &str, stats: StoreStats) {
        tracing::debug!(replica = %id, pages = stats.page_count, "replica reported new counts");
        self.counts.insert(id.to_string(), stats);
        self.notify_if_changed().await;
    }

    fn replica_report(&self, id: &str, online: bool, counts: Option<StoreStats>) -> ReplicaReport {
        ReplicaReport {
            id: id.to_string(),
            online,
            pages: counts.map(|c| c.page_count),
            terms: counts.map(|c| c.term_count),
            backlink_entries: counts.map(|c| c.backlink_entry_count),
            avg_latency_ms: self.stats.average_latency_ms(id),
        }
    }

    /// Report built from what the gateway already knows, without remote calls.
    pub fn current_report(&self) -> StatsReport {
        let active = self.active_ids();
        let mut ids: Vec<String> = self.counts.iter().map(|e| e.key().clone()).collect();
        ids.extend(active.iter().cloned());
        ids.sort();
        ids.dedup();

        let replicas = ids
            .iter()
            .map(|id| {
                let counts = self.counts.get(id).map(|c| *c);
                self.replica_report(id, active.contains(id), counts)
            })
            .collect();
        StatsReport {
            top_queries: self.stats.top_queries(self.config.top_queries),
            replicas,
            active_replicas: active.len(),
            frontier: *self.frontier_status.lock(),
        }
    }

    async fn notify_if_changed(&self) {
        let report = self.current_report();
        let rendered = match serde_json::to_string(&report) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to render stats");
                return;
            }
        };
        let mut hasher = DefaultHasher::new();
        rendered.hash(&mut hasher);
        let signature = hasher.finish();

        {
            let mut last = self.signature.lock();
            if *last == Some(signature) {
                return;
            }
            *last = Some(signature);
        }

        let targets: Vec<Arc<dyn StatsSubscriber>> = self.subscribers.lock().clone();
        if targets.is_empty() {
            return;
        }
        let mut dead = Vec::new();
        for subscriber in &targets {
            if let Err(e) = subscriber.push(&report).await {
                tracing::info!(subscriber = %subscriber.name(), error = %e, "dropping subscriber");
                dead.push(Arc::clone(subscriber));
            }
        }
        if !dead.is_empty() {
            self.subscribers
                .lock()
                .retain(|s| !dead.iter().any(|d| Arc::ptr_eq(s, d)));
        }
    }

    /// Start the cache sweep and the periodic discovery refresh.
    pub fn spawn_background(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let sweeper = {
            let coord = Arc::clone(self);
            tokio::spawn(async move {
                let period = coord.config.sweep_interval;
                let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                loop {
                    ticker.tick().await;
                    let removed = coord.cache.sweep();
                    if removed > 0 {
                        tracing::debug!(removed, remaining = coord.cache.len(), "cache swept");
                    }
                }
            })
        };
        let discoverer = {
            let coord = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(coord.config.discovery_interval);
                loop {
                    ticker.tick().await;
                    let active = coord.refresh_replicas().await;
                    tracing::debug!(active, "replica set refreshed");
                }
            })
        };
        vec![sweeper, discoverer]
    }
}

/// Spellings of `url` a crawler may have stored: as given, with `https://`,
/// with the `www.` prefix toggled, each with and without a trailing slash.
pub fn url_variants(url: &str) -> Vec<String> {
    let raw = url.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };

    let mut bases = vec![raw.to_string(), with_scheme.clone()];
    if let Some((scheme, rest)) = with_scheme.split_once("://") {
        let toggled = match rest.strip_prefix("www.") {
            Some(bare) => bare.to_string(),
            None => format!("www.{rest}"),
        };
        bases.push(format!("{scheme}://{toggled}"));
    }

    let mut out: Vec<String> = Vec::new();
    for base in bases {
        let slash = match base.strip_suffix('/') {
            Some(trimmed) => trimmed.to_string(),
            None => format!("{base}/"),
        };
        for candidate in [base, slash] {
            if !candidate.is_empty() && !out.contains(&candidate) {
                out.push(candidate);
            }
        }
    }
    out
}

/// Trim, default to `https://`, drop one trailing slash. `None` unless the
/// result is an absolute http(s) URL with a host.
pub fn normalize_url(url: &str) -> Option<String> {
    let raw = url.trim();
    if raw.is_empty() {
        return None;
    }
    let mut normalized = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    if normalized.ends_with('/') {
        normalized.pop();
    }
    let parsed = url::Url::parse(&normalized).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }
    Some(normalized)
}
