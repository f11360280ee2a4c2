//! Inventory scanner. Reconciles Source and Target listings into the ledger.
//!
//! The Source is authoritative: its failures are fatal (unless ignored per
//! collection). The Target check is advisory: it can only move `New` items to
//! `Skipped`, and a Target collection that cannot be listed is just skipped.

use tokio_util::sync::CancellationToken;

use super::error::SyncError;
use crate::ledger::SharedLedger;
use crate::progress::{create_progress_bar, BarKind};
use crate::store::Store;

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    pub ignore_errors: bool,
    pub no_progress_bar: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceScanReport {
    /// Collections the Source reported.
    pub collections: usize,
    /// Collections whose items were listed this run.
    pub listed: usize,
    /// Items added to the ledger as `New`.
    pub items_added: usize,
    /// Listings that failed and were ignored.
    pub failed: usize,
    pub interrupted: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetScanReport {
    /// Collections the Target reported.
    pub collections: usize,
    /// Ledger items moved to `Skipped`.
    pub skipped: usize,
    /// Target collections absent from the ledger, not inspected.
    pub unmatched: usize,
    /// Listings that failed and were ignored.
    pub failed: usize,
    pub interrupted: bool,
}

/// List every Source collection and record the items of those not yet known.
///
/// A collection whose listing is in flight when `cancel` fires stays marked
/// as scanning, so the next load clears and lists it again.
pub async fn scan_source(
    source: &dyn Store,
    ledger: &SharedLedger,
    options: &ScanOptions,
    cancel: &CancellationToken,
) -> Result<SourceScanReport, SyncError> {
    let collections = source
        .list_collections()
        .await
        .map_err(SyncError::SourceUnavailable)?;
    if collections.is_empty() {
        return Err(SyncError::EmptySource {
            store: source.name().to_string(),
        });
    }
    tracing::info!("Found {} collections on the Source", collections.len());

    let mut report = SourceScanReport {
        collections: collections.len(),
        ..SourceScanReport::default()
    };
    let pb = create_progress_bar(
        options.no_progress_bar,
        collections.len() as u64,
        BarKind::Count,
    );

    for collection in &collections {
        if cancel.is_cancelled() {
            report.interrupted = true;
            break;
        }
        pb.set_message(collection.clone());

        if !ledger.lock().needs_scan(collection) {
            pb.inc(1);
            continue;
        }

        ledger.lock().begin_scan(collection);
        let listing = tokio::select! {
            listing = source.list_items(collection) => listing,
            _ = cancel.cancelled() => {
                report.interrupted = true;
                break;
            }
        };

        match listing {
            Ok(items) => {
                let added = ledger.lock().record_items(
                    collection,
                    items.into_iter().map(|item| (item.id, item.size)),
                );
                report.listed += 1;
                report.items_added += added;
            }
            Err(e) if options.ignore_errors => {
                pb.suspend(|| tracing::warn!("{}, continuing", e));
                report.failed += 1;
            }
            Err(e) => {
                pb.abandon();
                return Err(SyncError::InstanceListUnavailable {
                    collection: collection.clone(),
                    source: e,
                });
            }
        }
        ledger.lock().finish_scan(collection);
        pb.inc(1);
    }

    pb.finish_and_clear();
    if report.interrupted {
        tracing::info!("Source scan interrupted");
    }
    Ok(report)
}

/// Mark ledger items the Target already holds with the same size as `Skipped`.
pub async fn scan_target(
    target: &dyn Store,
    ledger: &SharedLedger,
    options: &ScanOptions,
    cancel: &CancellationToken,
) -> Result<TargetScanReport, SyncError> {
    let collections = target
        .list_collections()
        .await
        .map_err(SyncError::TargetUnavailable)?;
    if collections.is_empty() {
        tracing::info!("Target is empty");
    } else {
        tracing::info!("Found {} collections on the Target", collections.len());
    }

    let mut report = TargetScanReport {
        collections: collections.len(),
        ..TargetScanReport::default()
    };
    let pb = create_progress_bar(
        options.no_progress_bar,
        collections.len() as u64,
        BarKind::Count,
    );

    for collection in &collections {
        if cancel.is_cancelled() {
            report.interrupted = true;
            break;
        }
        pb.set_message(collection.clone());
        pb.inc(1);

        if !ledger.lock().contains_collection(collection) {
            tracing::debug!(collection = %collection, "Target collection not on the Source, ignoring");
            report.unmatched += 1;
            continue;
        }

        let items = match target.list_items(collection).await {
            Ok(items) => items,
            Err(e) => {
                pb.suspend(|| tracing::warn!("{}, skipping Target check", e));
                report.failed += 1;
                continue;
            }
        };

        let mut guard = ledger.lock();
        for item in items {
            if guard.mark_skipped(collection, &item.id, item.size) {
                report.skipped += 1;
            }
        }
    }

    pb.finish_and_clear();
    Ok(report)
}
