use anyhow::{anyhow, bail, Result};
use clap::Parser;
use index_core::broadcast::{BroadcastConfig, ReplicationBroadcaster};
use index_core::discovery::{DirectoryDiscovery, DiscoveryClient, ReplicaDirectory, StaticDiscovery};
use index_core::frontier::{Frontier, HttpFrontier};
use index_core::tokenizer::tokenize;
use index_core::{PageRecord, ReplicaHandle};
use reqwest::{header, Client, Url};
use scraper::{Html, Selector};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing_subscriber::{fmt, EnvFilter};

const SNIPPET_CHARS: usize = 150;
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;
const IDLE_WAIT: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "crawler")]
#[command(about = "Pull URLs from the frontier and replicate crawled pages to every barrel")]
struct Cli {
    /// URL frontier address
    #[arg(long, default_value = "127.0.0.1:7100", env = "FRONTIER_ADDR")]
    frontier: String,
    /// Shared replica directory used for discovery
    #[arg(long, default_value = "./replicas", env = "REPLICA_DIR")]
    directory: PathBuf,
    /// Fixed replicas as id=addr, instead of the directory (repeatable)
    #[arg(long = "barrel")]
    barrels: Vec<String>,
    /// Number of concurrent workers
    #[arg(long, default_value_t = 4)]
    workers: usize,
    /// Replicas that must acknowledge a page
    #[arg(long, default_value_t = 1)]
    min_replicas: usize,
    /// Extra delivery rounds for replicas that failed
    #[arg(long, default_value_t = 3)]
    max_retries: usize,
    /// Pause between delivery rounds
    #[arg(long, default_value_t = 500)]
    retry_delay_ms: u64,
    /// Request timeout seconds
    #[arg(long, default_value_t = 12)]
    timeout_secs: u64,
    /// User-Agent string to use for crawling
    #[arg(long, default_value = "barrel-crawler/0.1")]
    user_agent: String,
}

struct Selectors {
    title: Selector,
    body: Selector,
    link: Selector,
}

impl Selectors {
    fn new() -> Result<Self> {
        let parse = |css: &str| Selector::parse(css).map_err(|e| anyhow!("selector {css:?}: {e:?}"));
        Ok(Self { title: parse("title")?, body: parse("body")?, link: parse("a")? })
    }
}

struct Extracted {
    title: String,
    text: String,
    links: Vec<Url>,
}

struct Crawler {
    client: Client,
    frontier: Arc<dyn Frontier>,
    broadcaster: ReplicationBroadcaster,
    selectors: Selectors,
    /// Workers the frontier currently counts as active.
    registered: AtomicUsize,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Cli::parse();
    let timeout = Duration::from_secs(args.timeout_secs);

    let client = Client::builder()
        .user_agent(args.user_agent.clone())
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(timeout)
        .build()?;

    let discovery: Arc<dyn DiscoveryClient> = if args.barrels.is_empty() {
        Arc::new(DirectoryDiscovery::new(ReplicaDirectory::new(&args.directory), client.clone(), timeout))
    } else {
        let mut handles = Vec::new();
        for spec in &args.barrels {
            let Some((id, addr)) = spec.split_once('=') else {
                bail!("barrel must be given as id=addr, got {spec:?}");
            };
            handles.push(ReplicaHandle::http(id.trim(), addr.trim(), client.clone(), timeout));
        }
        Arc::new(StaticDiscovery::new(handles))
    };
    let broadcaster = ReplicationBroadcaster::new(
        discovery,
        BroadcastConfig {
            min_replicas: args.min_replicas.max(1),
            max_retries: args.max_retries,
            retry_delay: Duration::from_millis(args.retry_delay_ms),
            call_timeout: timeout,
        },
    );

    let crawler = Arc::new(Crawler {
        frontier: Arc::new(HttpFrontier::new(&args.frontier, client.clone(), timeout)),
        client,
        broadcaster,
        selectors: Selectors::new()?,
        registered: AtomicUsize::new(0),
    });

    tracing::info!(
        workers = args.workers,
        frontier = %args.frontier,
        min_replicas = args.min_replicas,
        "crawler started"
    );
    let mut workers = JoinSet::new();
    for n in 0..args.workers.max(1) {
        let crawler = Arc::clone(&crawler);
        workers.spawn(async move { crawler.run(n).await });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("shutdown signal received"),
        _ = async { while workers.join_next().await.is_some() {} } => {}
    }
    workers.abort_all();
    while workers.join_next().await.is_some() {}
    crawler.release().await;
    Ok(())
}

impl Crawler {
    async fn run(&self, worker: usize) {
        match self.frontier.register_downloader().await {
            Ok(()) => {
                self.registered.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => tracing::warn!(worker, error = %e, "could not register with the frontier"),
        }
        loop {
            match self.frontier.get_next_url().await {
                Ok(Some(url)) => self.crawl(worker, &url).await,
                Ok(None) => sleep(IDLE_WAIT).await,
                Err(e) => {
                    tracing::warn!(worker, error = %e, "frontier unavailable");
                    sleep(IDLE_WAIT).await;
                }
            }
        }
    }

    async fn crawl(&self, worker: usize, raw: &str) {
        let url = match Url::parse(raw) {
            Ok(u) if u.scheme().starts_with("http") => u,
            _ => {
                tracing::debug!(worker, url = %raw, "skipping non-http url");
                self.visited(raw).await;
                return;
            }
        };

        let extracted = match self.fetch(&url).await {
            Ok(Some(page)) => page,
            Ok(None) => {
                self.visited(raw).await;
                return;
            }
            Err(e) => {
                tracing::debug!(worker, url = %raw, error = %e, "fetch failed");
                self.visited(raw).await;
                return;
            }
        };

        let record = build_record(&url, &extracted);
        match self.broadcaster.send_document(record).await {
            Ok(delivery) => tracing::debug!(
                worker,
                url = %raw,
                delivered = delivery.delivered,
                failed = delivery.failed,
                "page replicated"
            ),
            Err(e) => tracing::warn!(worker, url = %raw, error = %e, "page dropped"),
        }

        self.visited(raw).await;
        for link in &extracted.links {
            if let Err(e) = self.frontier.add_url(link.as_str()).await {
                tracing::debug!(link = %link, error = %e, "failed to queue link");
            }
        }
    }

    /// Unregister every worker that registered. Call once the workers have stopped.
    async fn release(&self) {
        let n = self.registered.swap(0, Ordering::SeqCst);
        for _ in 0..n {
            if let Err(e) = self.frontier.unregister_downloader().await {
                tracing::warn!(error = %e, "could not unregister from the frontier");
                return;
            }
        }
        tracing::info!(workers = n, "unregistered from the frontier");
    }

    async fn visited(&self, url: &str) {
        if let Err(e) = self.frontier.mark_as_visited(url).await {
            tracing::debug!(%url, error = %e, "failed to mark visited");
        }
    }

    /// `Ok(None)` for pages that are not worth indexing.
    async fn fetch(&self, url: &Url) -> Result<Option<Extracted>> {
        let resp = self.client.get(url.clone()).send().await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        if let Some(ct) = resp.headers().get(header::CONTENT_TYPE) {
            if let Ok(v) = ct.to_str() {
                if !v.starts_with("text/html") {
                    return Ok(None);
                }
            }
        }
        let bytes = resp.bytes().await?;
        if bytes.len() > MAX_BODY_BYTES {
            return Ok(None);
        }
        let body = String::from_utf8_lossy(&bytes);
        Ok(Some(extract(&body, url, &self.selectors)))
    }
}

fn extract(body: &str, url: &Url, sel: &Selectors) -> Extracted {
    let doc = Html::parse_document(body);
    let title = doc
        .select(&sel.title)
        .next()
        .map(|n| n.text().collect::<String>())
        .unwrap_or_default();
    let text = doc
        .select(&sel.body)
        .next()
        .map(|n| n.text().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();

    let mut links = Vec::new();
    for a in doc.select(&sel.link) {
        if let Some(h) = a.value().attr("href") {
            if let Ok(u) = Url::parse(h).or_else(|_| url.join(h)) {
                if u.scheme().starts_with("http") {
                    let u = norm(&u);
                    if !links.contains(&u) {
                        links.push(u);
                    }
                }
            }
        }
    }
    Extracted {
        title: collapse(&title),
        text: collapse(&text),
        links,
    }
}

fn build_record(url: &Url, page: &Extracted) -> PageRecord {
    PageRecord {
        url: norm(url).to_string(),
        title: page.title.clone(),
        snippet: page.text.chars().take(SNIPPET_CHARS).collect(),
        terms: tokenize(&format!("{} {}", page.title, page.text)),
        out_links: page.links.iter().map(|l| l.to_string()).collect(),
    }
}

fn norm(u: &Url) -> Url {
    let mut s = u.clone();
    s.set_fragment(None);
    s
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
