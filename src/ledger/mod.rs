//! Durable transfer ledger.
//!
//! Tracks every known collection and item with its transfer status, and
//! persists the whole ledger as a JSON snapshot at each checkpoint:
//! - after the Source scan
//! - after the Target scan
//! - when the transfer phase ends, however it ends

pub mod error;
pub mod snapshot;
pub mod types;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use error::LedgerError;
pub use snapshot::SnapshotStore;
pub use types::{ItemStatus, Ledger, LedgerSummary};

/// Ledger shared between the controller and transfer workers.
///
/// All mutation goes through one mutex. Guards are never held across an
/// `.await`, so a std mutex is enough.
#[derive(Debug, Clone, Default)]
pub struct SharedLedger(Arc<Mutex<Ledger>>);

impl SharedLedger {
    pub fn new(ledger: Ledger) -> Self {
        Self(Arc::new(Mutex::new(ledger)))
    }

    /// Lock the ledger. A panicked worker cannot leave the maps half-updated
    /// (every mutation is a single insert or field store), so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clone the current state, e.g. for a checkpoint.
    pub fn snapshot(&self) -> Ledger {
        self.lock().clone()
    }
}
