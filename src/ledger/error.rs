//! Error types for ledger persistence.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading or saving a ledger snapshot.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The snapshot exists but could not be read.
    #[error("Failed to read snapshot {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The snapshot could not be written or moved into place.
    #[error("Failed to write snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The snapshot is not valid JSON or does not match the ledger layout.
    #[error("Snapshot {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The snapshot was written by a newer version of this tool.
    #[error("Snapshot {path} has version {found}, newer than supported version {supported}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    /// Another process holds the snapshot lock.
    #[error("Another replicate-rs instance is using {path}")]
    Locked { path: PathBuf },

    /// Failed to spawn a blocking task.
    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),
}
