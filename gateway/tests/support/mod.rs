#![allow(dead_code)]

use async_trait::async_trait;
use gateway::stats::StatsReport;
use gateway::subscribers::StatsSubscriber;
use index_core::frontier::Frontier;
use index_core::{
    BarrelRpc, Error, IndexStore, PageRecord, ReplicaHandle, Result, SearchResultItem,
    StateSnapshot, StoreStats,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// In-process replica that can be switched off and counts its calls.
pub struct FakeBarrel {
    pub id: String,
    pub store: IndexStore,
    pub down: AtomicBool,
    pub searches: AtomicUsize,
    pub backlink_calls: AtomicUsize,
}

impl FakeBarrel {
    pub fn up(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            store: IndexStore::new(),
            down: AtomicBool::new(false),
            searches: AtomicUsize::new(0),
            backlink_calls: AtomicUsize::new(0),
        })
    }

    pub fn down(id: &str) -> Arc<Self> {
        let b = Self::up(id);
        b.down.store(true, Ordering::SeqCst);
        b
    }

    pub fn handle(self: &Arc<Self>) -> ReplicaHandle {
        ReplicaHandle::new(self.id.clone(), self.clone())
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(Error::remote(&self.id, "connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BarrelRpc for FakeBarrel {
    async fn add_document(&self, page: &PageRecord) -> Result<()> {
        self.check()?;
        self.store.add_document(page.clone());
        Ok(())
    }

    async fn search_all_terms(&self, terms: &[String], page: usize, page_size: usize) -> Result<Vec<SearchResultItem>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.store.search_all_terms(terms, page, page_size))
    }

    async fn get_backlinks(&self, url: &str) -> Result<Vec<String>> {
        self.backlink_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.store.get_backlinks(url))
    }

    async fn get_full_state(&self) -> Result<StateSnapshot> {
        self.check()?;
        Ok(self.store.full_state())
    }

    async fn ping(&self) -> Result<String> {
        self.check()?;
        Ok("PONG".into())
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.check()?;
        Ok(self.store.stats())
    }
}

#[derive(Default)]
pub struct FakeFrontier {
    pub priority: Mutex<Vec<String>>,
    pub downloaders: AtomicUsize,
    pub fail: bool,
}

impl FakeFrontier {
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    fn check(&self) -> Result<()> {
        if self.fail {
            Err(Error::Frontier("queue unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Frontier for FakeFrontier {
    async fn add_url(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn add_top_priority_url(&self, url: &str) -> Result<()> {
        self.check()?;
        self.priority.lock().push(url.to_string());
        Ok(())
    }

    async fn get_next_url(&self) -> Result<Option<String>> {
        Ok(None)
    }

    async fn mark_as_visited(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn queue_size(&self) -> Result<usize> {
        self.check()?;
        Ok(self.priority.lock().len())
    }

    async fn register_downloader(&self) -> Result<()> {
        self.check()?;
        self.downloaders.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unregister_downloader(&self) -> Result<()> {
        self.check()?;
        self.downloaders.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn active_downloaders(&self) -> Result<usize> {
        self.check()?;
        Ok(self.downloaders.load(Ordering::SeqCst))
    }

    async fn ping(&self) -> Result<String> {
        self.check()?;
        Ok(format!("frontier online, {} pending", self.priority.lock().len()))
    }
}

#[derive(Default)]
pub struct RecordingSubscriber {
    pub reports: Mutex<Vec<StatsReport>>,
    pub fail: bool,
}

impl RecordingSubscriber {
    pub fn pushes(&self) -> usize {
        self.reports.lock().len()
    }
}

#[async_trait]
impl StatsSubscriber for RecordingSubscriber {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn push(&self, report: &StatsReport) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("gone");
        }
        self.reports.lock().push(report.clone());
        Ok(())
    }
}

pub fn page(url: &str, terms: &[&str], links: &[&str]) -> PageRecord {
    PageRecord {
        url: url.to_string(),
        title: url.to_string(),
        snippet: String::new(),
        terms: terms.iter().map(|t| t.to_string()).collect(),
        out_links: links.iter().map(|l| l.to_string()).collect(),
    }
}
