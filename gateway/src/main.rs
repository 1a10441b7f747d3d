use anyhow::{bail, Result};
use axum::Router;
use clap::Parser;
use gateway::coordinator::{Coordinator, CoordinatorConfig};
use gateway::{build_app, AppState};
use index_core::discovery::{DirectoryDiscovery, DiscoveryClient, ReplicaDirectory, StaticDiscovery};
use index_core::frontier::HttpFrontier;
use index_core::ReplicaHandle;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "gateway")]
#[command(about = "Route queries across index replicas", long_about = None)]
struct Args {
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// Shared replica directory used for discovery
    #[arg(long, default_value = "./replicas", env = "REPLICA_DIR")]
    directory: PathBuf,
    /// Fixed replicas as id=addr, instead of the directory (repeatable)
    #[arg(long = "barrel")]
    barrels: Vec<String>,
    /// URL frontier address
    #[arg(long, default_value = "127.0.0.1:7100", env = "FRONTIER_ADDR")]
    frontier: String,
    /// Timeout for calls to replicas, the frontier and subscribers
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,
    /// Seconds a cached result stays fresh
    #[arg(long, default_value_t = 300)]
    cache_ttl_secs: u64,
}

fn parse_barrels(specs: &[String], client: &reqwest::Client, timeout: Duration) -> Result<Vec<ReplicaHandle>> {
    let mut handles = Vec::new();
    for spec in specs {
        let Some((id, addr)) = spec.split_once('=') else {
            bail!("barrel must be given as id=addr, got {spec:?}");
        };
        handles.push(ReplicaHandle::http(id.trim(), addr.trim(), client.clone(), timeout));
    }
    Ok(handles)
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout_secs);
    let client = reqwest::Client::builder().build()?;

    let discovery: Arc<dyn DiscoveryClient> = if args.barrels.is_empty() {
        Arc::new(DirectoryDiscovery::new(ReplicaDirectory::new(&args.directory), client.clone(), timeout))
    } else {
        Arc::new(StaticDiscovery::new(parse_barrels(&args.barrels, &client, timeout)?))
    };
    let frontier = Arc::new(HttpFrontier::new(&args.frontier, client.clone(), timeout));
    let config = CoordinatorConfig {
        cache_ttl: Duration::from_secs(args.cache_ttl_secs),
        ..CoordinatorConfig::default()
    };

    let coordinator = Arc::new(Coordinator::new(discovery, frontier, config));
    let active = coordinator.refresh_replicas().await;
    tracing::info!(active, "initial replica discovery");
    let background = coordinator.spawn_background();

    let app: Router = build_app(AppState::from_env(coordinator, client, timeout));
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    for task in background {
        task.abort();
    }
    Ok(())
}
