//! Snapshot wire and disk format.
//!
//! The same encoding is used for `GET /state` peer transfer and for the
//! barrel's periodic snapshot file:
//!
//! ```text
//! [magic: "BRLS" 4 bytes][version: u32 little-endian][body: bincode(StateSnapshot)]
//! ```
//!
//! Files are written to a temporary sibling, fsynced, then renamed over the
//! previous snapshot so a crash never leaves a half-written file in place.

use crate::error::{Error, Result};
use crate::index::StateSnapshot;
use serde::{Deserialize, Serialize};
use std::fs::{self, create_dir_all, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;

/// Magic bytes at the start of every encoded snapshot
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"BRLS";
/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;
const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFile {
    pub pages: usize,
    pub terms: usize,
    pub backlink_entries: usize,
    pub saved_at: String,
    pub version: u32,
}

#[derive(Debug, Clone)]
pub struct SnapshotPaths {
    pub root: PathBuf,
    pub name: String,
}

impl SnapshotPaths {
    pub fn new<P: AsRef<Path>>(root: P, replica_id: &str) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            name: format!("barrel-{replica_id}"),
        }
    }
    pub fn snapshot(&self) -> PathBuf { self.root.join(format!("{}.snap", self.name)) }
    fn meta(&self) -> PathBuf { self.root.join(format!("{}.meta.json", self.name)) }
}

pub fn encode_snapshot(snapshot: &StateSnapshot) -> Result<Vec<u8>> {
    let body = bincode::serialize(snapshot)?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
    bytes.extend_from_slice(SNAPSHOT_MAGIC);
    bytes.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<StateSnapshot> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::SnapshotCorrupted {
            reason: format!("{} bytes is shorter than the header", bytes.len()),
        });
    }
    if &bytes[..4] != SNAPSHOT_MAGIC {
        return Err(Error::SnapshotCorrupted {
            reason: "bad magic".into(),
        });
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[4..HEADER_LEN]);
    let version = u32::from_le_bytes(version);
    if version != SNAPSHOT_VERSION {
        return Err(Error::SnapshotVersion {
            found: version,
            expected: SNAPSHOT_VERSION,
        });
    }
    bincode::deserialize(&bytes[HEADER_LEN..]).map_err(|e| Error::SnapshotCorrupted {
        reason: e.to_string(),
    })
}

/// Write `bytes` to `path` through a temporary sibling and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        create_dir_all(dir)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn save_snapshot(paths: &SnapshotPaths, snapshot: &StateSnapshot) -> Result<MetaFile> {
    let bytes = encode_snapshot(snapshot)?;
    write_atomic(&paths.snapshot(), &bytes)?;
    let meta = MetaFile {
        pages: snapshot.pages.len(),
        terms: snapshot.index.len(),
        backlink_entries: snapshot.backlinks.len(),
        saved_at: time::OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default(),
        version: SNAPSHOT_VERSION,
    };
    save_meta(paths, &meta)?;
    Ok(meta)
}

/// Load the last snapshot; `Ok(None)` when none was ever written.
pub fn load_snapshot(paths: &SnapshotPaths) -> Result<Option<StateSnapshot>> {
    let mut f = match File::open(paths.snapshot()) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    decode_snapshot(&buf).map(Some)
}

fn save_meta(paths: &SnapshotPaths, meta: &MetaFile) -> Result<()> {
    let json = serde_json::to_string_pretty(meta)?;
    write_atomic(&paths.meta(), json.as_bytes())
}

/// Summary written next to the last snapshot; `Ok(None)` when there is none.
pub fn load_meta(paths: &SnapshotPaths) -> Result<Option<MetaFile>> {
    match fs::read_to_string(paths.meta()) {
        Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
