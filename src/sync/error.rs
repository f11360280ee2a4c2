//! Error types for the sync engine.

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::store::StoreError;

/// Fatal errors that end a run. The controller checkpoints before returning
/// any of them, except when the checkpoint itself is what failed.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The Source collection listing failed.
    #[error("Unable to get collections from the Source: {0}")]
    SourceUnavailable(#[source] StoreError),

    /// The Source answered with no collections, usually a wrong endpoint.
    #[error("Unable to find any collections at the Source {store}")]
    EmptySource { store: String },

    /// A Source collection could not be listed and errors are not ignored.
    #[error("Unable to get items for collection {collection}: {source}")]
    InstanceListUnavailable {
        collection: String,
        source: StoreError,
    },

    /// The Target collection listing failed.
    #[error("Unable to get collections from the Target: {0}")]
    TargetUnavailable(#[source] StoreError),

    /// An item fetch or push failed and errors are not ignored.
    #[error("Unable to transfer items for collection {collection}: {source}")]
    Transfer {
        collection: String,
        source: StoreError,
    },

    /// The snapshot could not be loaded or written.
    #[error(transparent)]
    Persistence(#[from] LedgerError),

    /// A transfer worker task panicked or was aborted.
    #[error("Transfer worker failed: {0}")]
    WorkerPanicked(#[from] tokio::task::JoinError),
}
