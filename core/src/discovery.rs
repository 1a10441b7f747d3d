//! Replica discovery.
//!
//! Both the gateway and the broadcaster ask a [`DiscoveryClient`] for the
//! replicas that are currently live instead of talking to a registry. The
//! default deployment shares a [`ReplicaDirectory`]: every barrel drops a small
//! JSON file naming its id and address on start and removes it on shutdown.

use crate::error::Result;
use crate::persist::write_atomic;
use crate::rpc::ReplicaHandle;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaEndpoint {
    pub id: String,
    pub addr: String,
}

#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// Current set of live replicas. Lookup failures yield an empty list.
    async fn discover(&self) -> Vec<ReplicaHandle>;
}

/// A fixed set of handles, swappable at runtime.
#[derive(Default)]
pub struct StaticDiscovery {
    handles: RwLock<Vec<ReplicaHandle>>,
}

impl StaticDiscovery {
    pub fn new(handles: Vec<ReplicaHandle>) -> Self {
        Self { handles: RwLock::new(handles) }
    }

    pub fn set(&self, handles: Vec<ReplicaHandle>) {
        *self.handles.write() = handles;
    }
}

#[async_trait]
impl DiscoveryClient for StaticDiscovery {
    async fn discover(&self) -> Vec<ReplicaHandle> {
        self.handles.read().clone()
    }
}

pub struct ReplicaDirectory {
    root: PathBuf,
}

impl ReplicaDirectory {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        let safe: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("{safe}.json"))
    }

    pub fn register(&self, endpoint: &ReplicaEndpoint) -> Result<()> {
        let json = serde_json::to_vec_pretty(endpoint)?;
        write_atomic(&self.entry_path(&endpoint.id), &json)?;
        tracing::info!(id = %endpoint.id, addr = %endpoint.addr, "replica registered");
        Ok(())
    }

    pub fn deregister(&self, id: &str) -> Result<()> {
        match fs::remove_file(self.entry_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Registered endpoints sorted by id. Unreadable entries are skipped.
    pub fn entries(&self) -> Result<Vec<ReplicaEndpoint>> {
        let mut out = Vec::new();
        let dir = match fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for entry in dir.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).map(|b| serde_json::from_slice::<ReplicaEndpoint>(&b)) {
                Ok(Ok(ep)) => out.push(ep),
                Ok(Err(e)) => tracing::warn!(path = %path.display(), error = %e, "skipping malformed replica entry"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable replica entry"),
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

/// Discovery over a shared [`ReplicaDirectory`], producing HTTP handles.
pub struct DirectoryDiscovery {
    directory: ReplicaDirectory,
    client: reqwest::Client,
    timeout: Duration,
}

impl DirectoryDiscovery {
    pub fn new(directory: ReplicaDirectory, client: reqwest::Client, timeout: Duration) -> Self {
        Self { directory, client, timeout }
    }
}

#[async_trait]
impl DiscoveryClient for DirectoryDiscovery {
    async fn discover(&self) -> Vec<ReplicaHandle> {
        match self.directory.entries() {
            Ok(entries) => entries
                .into_iter()
                .map(|ep| ReplicaHandle::http(ep.id, &ep.addr, self.client.clone(), self.timeout))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "replica directory lookup failed");
                Vec::new()
            }
        }
    }
}
