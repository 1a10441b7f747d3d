use anyhow::Result;
use barrel::{build_app, BarrelConfig, BarrelNode, GatewayNotifier};
use clap::Parser;
use index_core::discovery::{DirectoryDiscovery, ReplicaDirectory, ReplicaEndpoint};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "barrel")]
#[command(about = "Serve one replica of the inverted index", long_about = None)]
struct Args {
    /// Replica id, unique across the cluster
    #[arg(long, env = "BARREL_ID")]
    id: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 7001)]
    port: u16,
    /// Address peers and the gateway should use (defaults to host:port)
    #[arg(long, env = "BARREL_ADVERTISE")]
    advertise: Option<String>,
    /// Directory holding this replica's snapshot
    #[arg(long, default_value = "./data", env = "BARREL_DATA_DIR")]
    data_dir: PathBuf,
    /// Shared replica directory used for discovery
    #[arg(long, default_value = "./replicas", env = "REPLICA_DIR")]
    directory: PathBuf,
    /// Seconds between snapshots
    #[arg(long, default_value_t = 10)]
    persist_interval_secs: u64,
    /// Timeout for calls to peer barrels
    #[arg(long, default_value_t = 30)]
    peer_timeout_secs: u64,
    /// Gateway address to notify when this replica's counts change
    #[arg(long, env = "GATEWAY_ADDR")]
    gateway: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let client = reqwest::Client::builder().build()?;
    let notifier = args.gateway.as_deref().map(|g| GatewayNotifier::new(g, client.clone()));
    let node = Arc::new(BarrelNode::new(
        BarrelConfig {
            id: args.id.clone(),
            data_dir: args.data_dir.clone(),
            persist_interval: Duration::from_secs(args.persist_interval_secs.max(1)),
        },
        notifier,
    ));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    let advertise = args.advertise.clone().unwrap_or_else(|| format!("{}:{}", args.host, args.port));

    let directory = ReplicaDirectory::new(&args.directory);
    directory.register(&ReplicaEndpoint { id: args.id.clone(), addr: advertise })?;

    let discovery = DirectoryDiscovery::new(
        ReplicaDirectory::new(&args.directory),
        client,
        Duration::from_secs(args.peer_timeout_secs),
    );
    let bootstrap = {
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            node.bootstrap(&discovery).await;
        })
    };
    let autosave = node.spawn_autosave();

    tracing::info!(%addr, id = %args.id, "barrel listening");
    axum::serve(listener, build_app(Arc::clone(&node)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    autosave.abort();
    bootstrap.abort();
    node.persist().await;
    if let Err(e) = directory.deregister(&args.id) {
        tracing::warn!(error = %e, "failed to deregister replica");
    }
    tracing::info!(id = %args.id, "barrel stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
