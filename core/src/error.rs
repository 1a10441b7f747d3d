//! Error type shared by the index, the replica clients and the broadcaster.
//!
//! Library code returns [`Error`]; the service binaries wrap it in `anyhow`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Remote Errors ===
    /// A replica answered with an error or could not be reached
    #[error("replica {replica} failed: {reason}")]
    Remote { replica: String, reason: String },

    /// A replica did not answer within the per-call timeout
    #[error("replica {replica} timed out")]
    Timeout { replica: String },

    /// No replica is known, even after a discovery pass
    #[error("no replicas available")]
    NoReplicas,

    /// Fewer replicas than required acknowledged a write after all retries
    #[error("quorum not reached: {delivered} delivered, {failed} failed, {required} required")]
    Quorum {
        delivered: usize,
        failed: usize,
        required: usize,
    },

    /// Every replica in the active set failed the request
    #[error("all replicas failed")]
    AllReplicasFailed,

    /// The URL frontier rejected or failed a request
    #[error("frontier error: {0}")]
    Frontier(String),

    // === Snapshot Errors ===
    #[error("snapshot is corrupted: {reason}")]
    SnapshotCorrupted { reason: String },

    #[error("snapshot version mismatch: found {found}, expected {expected}")]
    SnapshotVersion { found: u32, expected: u32 },

    // === Local Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub fn remote(replica: impl Into<String>, reason: impl ToString) -> Self {
        Error::Remote {
            replica: replica.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for failures a caller may retry on another or the same replica.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Remote { .. } | Error::Timeout { .. })
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
