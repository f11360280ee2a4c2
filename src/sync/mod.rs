//! Replication controller.
//!
//! Sequences one run: load the snapshot, scan the Source, check the Target,
//! transfer what is still `New`. The ledger is checkpointed after each phase
//! and before any fatal error is returned, so a rerun resumes where this one
//! stopped.

pub mod error;
pub mod scan;
pub mod transfer;

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

pub use error::SyncError;

use crate::ledger::{LedgerSummary, SharedLedger, SnapshotStore};
use crate::progress::{
    create_progress_bar, format_duration, format_size, BarKind, TransferProgress, TransferReport,
};
use crate::retry::RetryConfig;
use crate::store::Store;
use scan::ScanOptions;
use transfer::{TransferOptions, WorkQueue};

/// Knobs for a single run.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub workers: usize,
    pub ignore_errors: bool,
    pub dry_run: bool,
    pub no_progress_bar: bool,
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            ignore_errors: false,
            dry_run: false,
            no_progress_bar: false,
            retry: RetryConfig::default(),
        }
    }
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every phase ran. `transfer.failed` counts items left `New` under
    /// `--ignore-errors`.
    Completed {
        summary: LedgerSummary,
        transfer: TransferReport,
    },
    /// Stopped after the Target check because of `--dry-run`.
    DryRun { summary: LedgerSummary },
    /// A stop was requested; progress so far is saved.
    Interrupted { summary: LedgerSummary },
}

pub struct Controller {
    source: Arc<dyn Store>,
    target: Arc<dyn Store>,
    snapshot: SnapshotStore,
    config: SyncConfig,
    shutdown: CancellationToken,
}

impl Controller {
    pub fn new(
        source: Arc<dyn Store>,
        target: Arc<dyn Store>,
        snapshot: SnapshotStore,
        config: SyncConfig,
    ) -> Self {
        Self {
            source,
            target,
            snapshot,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the run when cancelled. Signal handlers hold a clone.
    pub fn stop_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Ask the run to checkpoint and return at the next safe point. Items
    /// already in flight finish first.
    pub fn request_stop(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!("Stop requested, finishing in-flight transfers");
        }
        self.shutdown.cancel();
    }

    pub async fn run(&self) -> Result<SyncOutcome, SyncError> {
        let started = Instant::now();

        let mut ledger = self.snapshot.load().await?;
        let resumed = ledger.summary();
        if resumed.collections > 0 {
            tracing::info!(
                "Resuming from {}: {} collections, {} items already known",
                self.snapshot.path().display(),
                resumed.collections,
                resumed.total.items
            );
        }
        if let Some(collection) = ledger.reset_interrupted_scan() {
            tracing::info!(
                "Collection {} was being scanned when the last run stopped, scanning it again",
                collection
            );
        }
        let ledger = SharedLedger::new(ledger);

        let scan_options = ScanOptions {
            ignore_errors: self.config.ignore_errors,
            no_progress_bar: self.config.no_progress_bar,
        };

        tracing::info!("Scanning Source {}", self.source.name());
        let source_report = self
            .phase(
                &ledger,
                scan::scan_source(&*self.source, &ledger, &scan_options, &self.shutdown),
            )
            .await?;
        tracing::debug!(?source_report, "Source scan finished");
        if source_report.interrupted {
            return Ok(SyncOutcome::Interrupted {
                summary: ledger.lock().summary(),
            });
        }

        tracing::info!("Checking Target {}", self.target.name());
        let target_report = self
            .phase(
                &ledger,
                scan::scan_target(&*self.target, &ledger, &scan_options, &self.shutdown),
            )
            .await?;
        if target_report.unmatched > 0 {
            tracing::debug!(
                "{} Target collections are not on the Source and were not inspected",
                target_report.unmatched
            );
        }
        if target_report.interrupted {
            return Ok(SyncOutcome::Interrupted {
                summary: ledger.lock().summary(),
            });
        }

        let summary = ledger.lock().summary();
        log_summary(&summary);

        if self.config.dry_run {
            tracing::info!("Dry run, not transferring anything");
            return Ok(SyncOutcome::DryRun { summary });
        }
        if summary.new.items == 0 {
            tracing::info!("Nothing to transfer");
            return Ok(SyncOutcome::Completed {
                summary,
                transfer: TransferReport::default(),
            });
        }

        let queue = Arc::new(WorkQueue::new(ledger.lock().pending_collections()));
        let progress = Arc::new(TransferProgress::new(create_progress_bar(
            self.config.no_progress_bar,
            summary.new.bytes,
            BarKind::Bytes,
        )));
        let transfer_options = TransferOptions {
            workers: self.config.workers,
            ignore_errors: self.config.ignore_errors,
            retry: self.config.retry,
        };
        tracing::info!(
            "Transferring {} items ({}) with {} workers",
            summary.new.items,
            format_size(summary.new.bytes),
            transfer_options.workers
        );

        let result = self
            .phase(
                &ledger,
                transfer::run_transfer(
                    Arc::clone(&self.source),
                    Arc::clone(&self.target),
                    ledger.clone(),
                    queue,
                    &transfer_options,
                    Arc::clone(&progress),
                    &self.shutdown,
                ),
            )
            .await;
        progress.bar().finish_and_clear();
        let report = result?;

        let summary = ledger.lock().summary();
        tracing::info!(
            "Transferred {} items ({}) in {}",
            report.completed,
            format_size(report.bytes),
            format_duration(started.elapsed())
        );
        if report.failed > 0 {
            tracing::warn!(
                "{} items failed and remain pending, run again to retry them",
                report.failed
            );
        }

        if self.shutdown.is_cancelled() {
            Ok(SyncOutcome::Interrupted { summary })
        } else {
            Ok(SyncOutcome::Completed {
                summary,
                transfer: report,
            })
        }
    }

    /// Await a phase, then checkpoint whatever state it left behind.
    ///
    /// When the phase failed the checkpoint is best effort and the phase error
    /// wins. When only the checkpoint fails, that error is returned.
    async fn phase<T>(
        &self,
        ledger: &SharedLedger,
        work: impl std::future::Future<Output = Result<T, SyncError>>,
    ) -> Result<T, SyncError> {
        let result = work.await;
        let saved = self.checkpoint(ledger).await;
        match (result, saved) {
            (Err(e), Err(save_err)) => {
                tracing::error!("Failed to save progress: {}", save_err);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(save_err)) => Err(save_err),
            (Ok(value), Ok(())) => Ok(value),
        }
    }

    async fn checkpoint(&self, ledger: &SharedLedger) -> Result<(), SyncError> {
        let snapshot = ledger.snapshot();
        self.snapshot.save(&snapshot).await?;
        Ok(())
    }
}

/// Log how the ledger breaks down by status.
pub fn log_summary(summary: &LedgerSummary) {
    tracing::info!(
        "{} collections, {} items ({}) on the Source",
        summary.collections,
        summary.total.items,
        format_size(summary.total.bytes)
    );
    tracing::info!(
        "{} items ({}) already on the Target",
        summary.skipped.items,
        format_size(summary.skipped.bytes)
    );
    tracing::info!(
        "{} items ({}) transferred by earlier runs",
        summary.completed.items,
        format_size(summary.completed.bytes)
    );
    tracing::info!(
        "{} items ({}) to transfer",
        summary.new.items,
        format_size(summary.new.bytes)
    );
}
