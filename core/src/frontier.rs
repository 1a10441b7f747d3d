//! Client side of the URL frontier (the crawl queue service).

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENDPOINT_URLS: &str = "/urls";
pub const ENDPOINT_PRIORITY: &str = "/urls/priority";
pub const ENDPOINT_NEXT: &str = "/urls/next";
pub const ENDPOINT_VISITED: &str = "/visited";
pub const ENDPOINT_QUEUE_SIZE: &str = "/queue/size";
pub const ENDPOINT_DOWNLOADERS: &str = "/downloaders";
pub const ENDPOINT_REGISTER: &str = "/downloaders/register";
pub const ENDPOINT_UNREGISTER: &str = "/downloaders/unregister";
pub const ENDPOINT_PING: &str = "/ping";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlBody {
    pub url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CountBody {
    pub count: usize,
}

#[async_trait]
pub trait Frontier: Send + Sync {
    async fn add_url(&self, url: &str) -> Result<()>;
    /// Queue `url` ahead of everything else (manual indexing requests).
    async fn add_top_priority_url(&self, url: &str) -> Result<()>;
    async fn get_next_url(&self) -> Result<Option<String>>;
    async fn mark_as_visited(&self, url: &str) -> Result<()>;
    /// URLs waiting to be crawled.
    async fn queue_size(&self) -> Result<usize>;
    /// Announce one more crawl worker.
    async fn register_downloader(&self) -> Result<()>;
    async fn unregister_downloader(&self) -> Result<()>;
    async fn active_downloaders(&self) -> Result<usize>;
    async fn ping(&self) -> Result<String>;
}

pub struct HttpFrontier {
    base: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFrontier {
    pub fn new(addr: &str, client: reqwest::Client, timeout: Duration) -> Self {
        let addr = addr.trim_end_matches('/');
        let base = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };
        Self { base, client, timeout }
    }

    async fn post_url(&self, path: &str, url: &str) -> Result<()> {
        let req = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(&UrlBody { url: url.to_string() });
        self.send(req, path).await?;
        Ok(())
    }

    async fn send(&self, req: reqwest::RequestBuilder, path: &str) -> Result<reqwest::Response> {
        let resp = req
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Frontier(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::Frontier(format!("{path} returned {}", resp.status())));
        }
        Ok(resp)
    }

    async fn get_count(&self, path: &str) -> Result<usize> {
        let resp = self.send(self.client.get(format!("{}{}", self.base, path)), path).await?;
        let body: CountBody = resp.json().await.map_err(|e| Error::Frontier(e.to_string()))?;
        Ok(body.count)
    }

    async fn post_empty(&self, path: &str) -> Result<()> {
        self.send(self.client.post(format!("{}{}", self.base, path)), path).await?;
        Ok(())
    }
}

#[async_trait]
impl Frontier for HttpFrontier {
    async fn add_url(&self, url: &str) -> Result<()> {
        self.post_url(ENDPOINT_URLS, url).await
    }

    async fn add_top_priority_url(&self, url: &str) -> Result<()> {
        self.post_url(ENDPOINT_PRIORITY, url).await
    }

    async fn get_next_url(&self) -> Result<Option<String>> {
        let resp = self
            .client
            .get(format!("{}{}", self.base, ENDPOINT_NEXT))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Frontier(e.to_string()))?;
        match resp.status() {
            reqwest::StatusCode::NO_CONTENT | reqwest::StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let body: UrlBody = resp.json().await.map_err(|e| Error::Frontier(e.to_string()))?;
                Ok(Some(body.url))
            }
            s => Err(Error::Frontier(format!("{ENDPOINT_NEXT} returned {s}"))),
        }
    }

    async fn mark_as_visited(&self, url: &str) -> Result<()> {
        self.post_url(ENDPOINT_VISITED, url).await
    }

    async fn queue_size(&self) -> Result<usize> {
        self.get_count(ENDPOINT_QUEUE_SIZE).await
    }

    async fn register_downloader(&self) -> Result<()> {
        self.post_empty(ENDPOINT_REGISTER).await
    }

    async fn unregister_downloader(&self) -> Result<()> {
        self.post_empty(ENDPOINT_UNREGISTER).await
    }

    async fn active_downloaders(&self) -> Result<usize> {
        self.get_count(ENDPOINT_DOWNLOADERS).await
    }

    async fn ping(&self) -> Result<String> {
        let resp = self.send(self.client.get(format!("{}{}", self.base, ENDPOINT_PING)), ENDPOINT_PING).await?;
        resp.text().await.map_err(|e| Error::Frontier(e.to_string()))
    }
}
