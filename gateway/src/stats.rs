//! Query popularity, per-replica latency, and the report built from them.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCount {
    pub query: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaReport {
    pub id: String,
    pub online: bool,
    pub pages: Option<usize>,
    pub terms: Option<usize>,
    pub backlink_entries: Option<usize>,
    pub avg_latency_ms: Option<f64>,
}

/// Crawl-side figures from the frontier; `None` when it could not be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontierStatus {
    pub queue_size: Option<usize>,
    pub active_downloaders: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub top_queries: Vec<QueryCount>,
    pub replicas: Vec<ReplicaReport>,
    pub active_replicas: usize,
    #[serde(flatten)]
    pub frontier: FrontierStatus,
}

#[derive(Default, Clone, Copy)]
struct Latency {
    total: Duration,
    samples: u64,
}

#[derive(Default)]
pub struct QueryStats {
    popularity: DashMap<String, u64>,
    latency: DashMap<String, Latency>,
}

impl QueryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_query(&self, key: &str) {
        *self.popularity.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn record_latency(&self, replica: &str, elapsed: Duration) {
        let mut slot = self.latency.entry(replica.to_string()).or_default();
        slot.total += elapsed;
        slot.samples += 1;
    }

    /// Most frequent queries, ties broken alphabetically.
    pub fn top_queries(&self, n: usize) -> Vec<QueryCount> {
        let mut all: Vec<QueryCount> = self
            .popularity
            .iter()
            .map(|e| QueryCount { query: e.key().clone(), count: *e.value() })
            .collect();
        all.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.query.cmp(&b.query)));
        all.truncate(n);
        all
    }

    /// Mean latency in milliseconds, rounded to two decimals.
    pub fn average_latency_ms(&self, replica: &str) -> Option<f64> {
        let l = *self.latency.get(replica)?;
        if l.samples == 0 {
            return None;
        }
        let ms = l.total.as_secs_f64() * 1000.0 / l.samples as f64;
        Some((ms * 100.0).round() / 100.0)
    }
}
