//! Shared building blocks of the replicated index: the page/index data model,
//! term normalization, the in-memory `IndexStore`, the snapshot format, the
//! replica RPC seam, discovery, and the replication broadcaster used by crawl
//! workers.

pub mod broadcast;
pub mod discovery;
pub mod error;
pub mod frontier;
pub mod index;
pub mod persist;
pub mod rpc;
pub mod tokenizer;

pub use error::{Error, Result};
pub use index::{IndexStore, PageRecord, SearchResultItem, StateSnapshot, StoreStats};
pub use rpc::{BarrelRpc, ReplicaHandle};
