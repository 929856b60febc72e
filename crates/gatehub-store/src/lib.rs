//! Embedded persistence for the function hub.
//!
//! Everything lives under one state directory:
//!
//! ```text
//! <state>/
//!   <key segments>/<last segment>.json   one JSON file per record key
//!   files/...                            sanitized binary blobs
//!   logs/<id>.log                        per-id append-only text logs
//!   cache.json                           TTL cache snapshot
//! ```
//!
//! This is deliberately not a database: no query language, no multi-key
//! transactions, no indexes. Collections are directories and scans re-read
//! them every time, which is fine at the scale this serves (user accounts,
//! not event firehoses).

pub mod cache;
pub mod docs;
pub mod files;
pub mod logs;
mod storage;

pub use cache::TtlCache;
pub use docs::DocStore;
pub use files::FileStore;
pub use logs::LogStore;
pub use storage::{LocalStore, Record};

/// Errors surfaced by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid key \"{key}\": {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error("{0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Validate one path segment of a record key or file path. Rejects anything
/// that could escape the storage root; the engine never sanitizes keys, it
/// refuses them.
pub(crate) fn check_segment(key: &str, seg: &str) -> Result<(), StoreError> {
    let reason = if seg.is_empty() {
        Some("empty path segment")
    } else if seg == "." || seg == ".." {
        Some("path traversal segment")
    } else if seg.contains('\\') || seg.contains('\0') {
        Some("forbidden character in segment")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(StoreError::InvalidKey {
            key: key.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
