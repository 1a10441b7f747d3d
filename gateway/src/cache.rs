use dashmap::DashMap;
use index_core::SearchResultItem;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub terms: Vec<String>,
    pub page: usize,
}

#[derive(Debug, Clone)]
struct CachedResult {
    results: Vec<SearchResultItem>,
    stored_at: Instant,
}

/// Query results keyed by normalized terms and page. Stale entries are
/// dropped when read and by [`QueryCache::sweep`].
pub struct QueryCache {
    entries: DashMap<CacheKey, CachedResult>,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<SearchResultItem>> {
        let fresh = {
            let entry = self.entries.get(key)?;
            (entry.stored_at.elapsed() < self.ttl).then(|| entry.results.clone())
        };
        if fresh.is_none() {
            self.entries.remove_if(key, |_, e| e.stored_at.elapsed() >= self.ttl);
        }
        fresh
    }

    pub fn put(&self, key: CacheKey, results: Vec<SearchResultItem>) {
        self.entries.insert(key, CachedResult { results, stored_at: Instant::now() });
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.stored_at.elapsed() < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
