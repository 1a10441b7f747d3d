//! The replica RPC seam.
//!
//! [`BarrelRpc`] is the remote surface of one index replica. The gateway and
//! the broadcaster only ever talk to replicas through a [`ReplicaHandle`],
//! which pairs a stable replica id with an implementation: [`HttpBarrel`] for
//! a remote barrel service, [`LocalBarrel`] for a store living in the same
//! process.

use crate::error::{Error, Result};
use crate::index::{IndexStore, PageRecord, SearchResultItem, StateSnapshot, StoreStats};
use crate::persist::decode_snapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const ENDPOINT_DOCUMENTS: &str = "/documents";
pub const ENDPOINT_SEARCH: &str = "/search";
pub const ENDPOINT_BACKLINKS: &str = "/backlinks";
pub const ENDPOINT_STATE: &str = "/state";
pub const ENDPOINT_PING: &str = "/ping";
pub const ENDPOINT_STATS: &str = "/stats";

/// Gateway endpoint replicas post a [`ReplicaNotice`] to after their state changed.
pub const ENDPOINT_NOTIFY: &str = "/notify";

pub const PONG: &str = "PONG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub terms: Vec<String>,
    #[serde(default)]
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacklinksQuery {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaNotice {
    pub replica_id: String,
    pub stats: StoreStats,
}

#[async_trait]
pub trait BarrelRpc: Send + Sync {
    async fn add_document(&self, page: &PageRecord) -> Result<()>;
    async fn search_all_terms(
        &self,
        terms: &[String],
        page: usize,
        page_size: usize,
    ) -> Result<Vec<SearchResultItem>>;
    async fn get_backlinks(&self, url: &str) -> Result<Vec<String>>;
    async fn get_full_state(&self) -> Result<StateSnapshot>;
    async fn ping(&self) -> Result<String>;
    async fn stats(&self) -> Result<StoreStats>;
}

/// A live reference to one replica. Handles are replaced, never mutated.
#[derive(Clone)]
pub struct ReplicaHandle {
    id: String,
    rpc: Arc<dyn BarrelRpc>,
}

impl ReplicaHandle {
    pub fn new(id: impl Into<String>, rpc: Arc<dyn BarrelRpc>) -> Self {
        Self { id: id.into(), rpc }
    }

    pub fn local(id: impl Into<String>, store: Arc<IndexStore>) -> Self {
        Self::new(id, Arc::new(LocalBarrel::new(store)))
    }

    pub fn http(id: impl Into<String>, addr: &str, client: reqwest::Client, timeout: Duration) -> Self {
        let id = id.into();
        let rpc = HttpBarrel::new(id.clone(), addr, client, timeout);
        Self::new(id, Arc::new(rpc))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn rpc(&self) -> &dyn BarrelRpc {
        self.rpc.as_ref()
    }
}

impl fmt::Debug for ReplicaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaHandle").field("id", &self.id).finish()
    }
}

/// In-process replica backed directly by an [`IndexStore`].
pub struct LocalBarrel {
    store: Arc<IndexStore>,
}

impl LocalBarrel {
    pub fn new(store: Arc<IndexStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BarrelRpc for LocalBarrel {
    async fn add_document(&self, page: &PageRecord) -> Result<()> {
        self.store.add_document(page.clone());
        Ok(())
    }

    async fn search_all_terms(
        &self,
        terms: &[String],
        page: usize,
        page_size: usize,
    ) -> Result<Vec<SearchResultItem>> {
        Ok(self.store.search_all_terms(terms, page, page_size))
    }

    async fn get_backlinks(&self, url: &str) -> Result<Vec<String>> {
        Ok(self.store.get_backlinks(url))
    }

    async fn get_full_state(&self) -> Result<StateSnapshot> {
        Ok(self.store.full_state())
    }

    async fn ping(&self) -> Result<String> {
        Ok(PONG.to_string())
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(self.store.stats())
    }
}

/// Client for a barrel service reachable over HTTP.
pub struct HttpBarrel {
    id: String,
    base: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpBarrel {
    pub fn new(id: impl Into<String>, addr: &str, client: reqwest::Client, timeout: Duration) -> Self {
        let addr = addr.trim_end_matches('/');
        let base = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };
        Self { id: id.into(), base, client, timeout }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn fail(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout { replica: self.id.clone() }
        } else {
            Error::remote(&self.id, err)
        }
    }

    fn check(&self, resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            Err(Error::remote(&self.id, format!("status {status}")))
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned + Send>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let resp = req.timeout(self.timeout).send().await.map_err(|e| self.fail(e))?;
        self.check(resp)?.json::<T>().await.map_err(|e| self.fail(e))
    }
}

#[async_trait]
impl BarrelRpc for HttpBarrel {
    async fn add_document(&self, page: &PageRecord) -> Result<()> {
        let resp = self
            .client
            .post(self.url(ENDPOINT_DOCUMENTS))
            .json(page)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.fail(e))?;
        self.check(resp)?;
        Ok(())
    }

    async fn search_all_terms(
        &self,
        terms: &[String],
        page: usize,
        page_size: usize,
    ) -> Result<Vec<SearchResultItem>> {
        let body = SearchRequest { terms: terms.to_vec(), page, page_size };
        self.get_json(self.client.post(self.url(ENDPOINT_SEARCH)).json(&body)).await
    }

    async fn get_backlinks(&self, url: &str) -> Result<Vec<String>> {
        let query = BacklinksQuery { url: url.to_string() };
        self.get_json(self.client.get(self.url(ENDPOINT_BACKLINKS)).query(&query)).await
    }

    async fn get_full_state(&self) -> Result<StateSnapshot> {
        let resp = self
            .client
            .get(self.url(ENDPOINT_STATE))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.fail(e))?;
        let bytes = self.check(resp)?.bytes().await.map_err(|e| self.fail(e))?;
        decode_snapshot(&bytes)
    }

    async fn ping(&self) -> Result<String> {
        let resp: PingResponse = self.get_json(self.client.get(self.url(ENDPOINT_PING))).await?;
        Ok(resp.status)
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.get_json(self.client.get(self.url(ENDPOINT_STATS))).await
    }
}
