//! Transfer pool.
//!
//! Workers pull whole collections from a shared queue, so two workers never
//! operate on the same collection at once. Within a collection every `New`
//! item is fetched from the Source and pushed to the Target, in ledger order.
//! A shutdown request is observed between items; the item in flight finishes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::error::SyncError;
use crate::ledger::SharedLedger;
use crate::progress::{TransferProgress, TransferReport};
use crate::retry::{retry_with_backoff, RetryAction, RetryConfig};
use crate::store::{Store, StoreError};

/// Collections waiting for a worker. Each ID is handed out exactly once.
#[derive(Debug, Default)]
pub struct WorkQueue {
    pending: Mutex<VecDeque<String>>,
}

impl WorkQueue {
    pub fn new(collections: impl IntoIterator<Item = String>) -> Self {
        Self {
            pending: Mutex::new(collections.into_iter().collect()),
        }
    }

    /// Take the next unclaimed collection, or `None` when the queue is drained.
    pub fn claim(&self) -> Option<String> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransferOptions {
    pub workers: usize,
    pub ignore_errors: bool,
    pub retry: RetryConfig,
}

/// Run `options.workers` workers until the queue is drained, `cancel` fires,
/// or a worker hits an error that is not ignored.
///
/// On a hard failure the remaining workers are told to stop after their
/// current item and the first error is returned once all have exited. Items
/// completed before that point are already recorded in `ledger`.
pub async fn run_transfer(
    source: Arc<dyn Store>,
    target: Arc<dyn Store>,
    ledger: SharedLedger,
    queue: Arc<WorkQueue>,
    options: &TransferOptions,
    progress: Arc<TransferProgress>,
    cancel: &CancellationToken,
) -> Result<TransferReport, SyncError> {
    let pool = cancel.child_token();
    let workers = options.workers.max(1).min(queue.len().max(1));
    tracing::debug!(workers, collections = queue.len(), "Starting transfer pool");

    let mut set = JoinSet::new();
    for id in 0..workers {
        let worker = Worker {
            source: Arc::clone(&source),
            target: Arc::clone(&target),
            ledger: ledger.clone(),
            queue: Arc::clone(&queue),
            progress: Arc::clone(&progress),
            ignore_errors: options.ignore_errors,
            retry: options.retry,
            cancel: pool.clone(),
        };
        set.spawn(worker.run().instrument(tracing::info_span!("worker", id)));
    }

    let mut first_error: Option<SyncError> = None;
    while let Some(joined) = set.join_next().await {
        let error = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e,
            Err(e) => SyncError::WorkerPanicked(e),
        };
        if first_error.is_none() {
            pool.cancel();
            first_error = Some(error);
        } else {
            tracing::debug!("Additional worker error after abort: {}", error);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(progress.report()),
    }
}

struct Worker {
    source: Arc<dyn Store>,
    target: Arc<dyn Store>,
    ledger: SharedLedger,
    queue: Arc<WorkQueue>,
    progress: Arc<TransferProgress>,
    ignore_errors: bool,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) -> Result<(), SyncError> {
        while !self.cancel.is_cancelled() {
            let Some(collection) = self.queue.claim() else {
                break;
            };
            self.transfer_collection(&collection).await?;
        }
        Ok(())
    }

    async fn transfer_collection(&self, collection: &str) -> Result<(), SyncError> {
        let items = self.ledger.lock().pending_items(collection);
        tracing::debug!(collection, items = items.len(), "Transferring collection");
        self.progress.bar().set_message(collection.to_string());

        for (item, size) in items {
            if self.cancel.is_cancelled() {
                tracing::debug!(collection, "Stopping before next item");
                break;
            }
            match self.transfer_item(collection, &item).await {
                Ok(()) => {
                    self.ledger.lock().mark_completed(collection, &item);
                    self.progress.item_completed(size);
                    tracing::debug!(collection, item = %item, size, "Transferred");
                }
                // A stop during backoff cuts retries short; the item stays New.
                Err(e) if self.cancel.is_cancelled() => {
                    tracing::debug!(
                        collection,
                        item = %item,
                        "Stopped before item finished: {}",
                        e
                    );
                    break;
                }
                Err(e) if self.ignore_errors => {
                    self.progress
                        .bar()
                        .suspend(|| tracing::error!("{}, leaving it for the next run", e));
                    self.progress.item_failed(size);
                }
                Err(e) => {
                    return Err(SyncError::Transfer {
                        collection: collection.to_string(),
                        source: e,
                    });
                }
            }
        }
        Ok(())
    }

    /// Fetch from the Source and push to the Target. The body is held in
    /// memory only for the duration of this call.
    async fn transfer_item(&self, collection: &str, item: &str) -> Result<(), StoreError> {
        let body = retry_with_backoff(&self.retry, &self.cancel, classify, || {
            self.source.fetch_item(collection, item)
        })
        .await?;
        retry_with_backoff(&self.retry, &self.cancel, classify, || {
            self.target.push_item(collection, item, body.clone())
        })
        .await
    }
}

fn classify(error: &StoreError) -> RetryAction {
    if error.is_retryable() {
        RetryAction::Retry
    } else {
        RetryAction::Abort
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{ItemStatus, Ledger};
    use crate::store::memory::MemoryStore;
    use std::time::Duration;

    fn options(workers: usize, ignore_errors: bool) -> TransferOptions {
        TransferOptions {
            workers,
            ignore_errors,
            retry: RetryConfig::default(),
        }
    }

    fn ledger_of(pairs: &[(&str, &str, u64)]) -> SharedLedger {
        let mut ledger = Ledger::new();
        for (c, i, s) in pairs {
            ledger.record_items(c, vec![(i.to_string(), *s)]);
        }
        SharedLedger::new(ledger)
    }

    async fn run(
        source: &Arc<MemoryStore>,
        target: &Arc<MemoryStore>,
        ledger: &SharedLedger,
        options: TransferOptions,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, SyncError> {
        let queue = Arc::new(WorkQueue::new(ledger.lock().pending_collections()));
        run_transfer(
            source.clone(),
            target.clone(),
            ledger.clone(),
            queue,
            &options,
            Arc::new(TransferProgress::hidden()),
            cancel,
        )
        .await
    }

    #[test]
    fn test_work_queue_hands_out_each_collection_once() {
        let queue = WorkQueue::new(vec!["S1".to_string(), "S2".to_string()]);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.claim().as_deref(), Some("S1"));
        assert_eq!(queue.claim().as_deref(), Some("S2"));
        assert_eq!(queue.claim(), None);
    }

    #[tokio::test]
    async fn test_transfers_all_new_items() {
        let source = Arc::new(
            MemoryStore::new("source")
                .with_item("S1", "a", 100)
                .with_item("S1", "b", 200),
        );
        let target = Arc::new(MemoryStore::new("target"));
        let ledger = ledger_of(&[("S1", "a", 100), ("S1", "b", 200)]);

        let report = run(&source, &target, &ledger, options(2, false), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.completed, 2);
        assert_eq!(report.bytes, 300);
        assert!(target.contains("S1", "a"));
        assert!(target.contains("S1", "b"));
        let ledger = ledger.lock();
        assert_eq!(ledger.item("S1", "a").unwrap().status, ItemStatus::Completed);
        assert_eq!(ledger.item("S1", "b").unwrap().status, ItemStatus::Completed);
    }

    #[tokio::test]
    async fn test_skipped_and_completed_items_are_not_fetched() {
        let source = Arc::new(
            MemoryStore::new("source")
                .with_item("S1", "a", 1)
                .with_item("S1", "b", 2)
                .with_item("S1", "c", 3),
        );
        let target = Arc::new(MemoryStore::new("target"));
        let ledger = ledger_of(&[("S1", "a", 1), ("S1", "b", 2), ("S1", "c", 3)]);
        {
            let mut l = ledger.lock();
            l.mark_skipped("S1", "a", 1);
            l.mark_completed("S1", "b");
        }

        run(&source, &target, &ledger, options(1, false), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.fetched(), vec!["c".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_workers_never_share_a_collection() {
        let mut source = MemoryStore::new("source").with_delay(Duration::from_millis(2));
        let mut pairs = Vec::new();
        for c in 0..8 {
            for i in 0..4 {
                let (collection, item) = (format!("S{c}"), format!("i{c}-{i}"));
                source = source.with_item(&collection, &item, 10);
                pairs.push((collection, item));
            }
        }
        let source = Arc::new(source);
        let target = Arc::new(MemoryStore::new("target"));
        let mut ledger = Ledger::new();
        for (c, i) in &pairs {
            ledger.record_items(c, vec![(i.clone(), 10)]);
        }
        let ledger = SharedLedger::new(ledger);

        let report = run(&source, &target, &ledger, options(4, false), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.completed, 32);
        assert!(!source.overlap_seen());
        assert_eq!(ledger.lock().summary().completed.items, 32);
    }

    #[tokio::test]
    async fn test_single_worker_processes_every_collection() {
        let source = Arc::new(
            MemoryStore::new("source")
                .with_item("S1", "a", 1)
                .with_item("S2", "b", 1)
                .with_item("S3", "c", 1),
        );
        let target = Arc::new(MemoryStore::new("target"));
        let ledger = ledger_of(&[("S1", "a", 1), ("S2", "b", 1), ("S3", "c", 1)]);

        run(&source, &target, &ledger, options(1, false), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(target.pushed(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_ignored_failure_leaves_item_new() {
        let source = Arc::new(
            MemoryStore::new("source")
                .with_item("S1", "a", 1)
                .with_item("S1", "c", 3)
                .with_item("S1", "d", 4)
                .fail_fetch("c"),
        );
        let target = Arc::new(MemoryStore::new("target"));
        let ledger = ledger_of(&[("S1", "a", 1), ("S1", "c", 3), ("S1", "d", 4)]);

        let report = run(&source, &target, &ledger, options(1, true), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 1);
        let ledger = ledger.lock();
        assert_eq!(ledger.item("S1", "c").unwrap().status, ItemStatus::New);
        assert_eq!(ledger.item("S1", "d").unwrap().status, ItemStatus::Completed);
    }

    #[tokio::test]
    async fn test_push_failure_aborts_without_ignore_errors() {
        let source = Arc::new(
            MemoryStore::new("source")
                .with_item("S1", "a", 1)
                .with_item("S1", "b", 2)
                .with_item("S1", "c", 3),
        );
        let target = Arc::new(MemoryStore::new("target").fail_push("b"));
        let ledger = ledger_of(&[("S1", "a", 1), ("S1", "b", 2), ("S1", "c", 3)]);

        let err = run(&source, &target, &ledger, options(1, false), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Transfer { ref collection, source: StoreError::ItemPushFailed { .. } }
                if collection == "S1"
        ));
        let ledger = ledger.lock();
        assert_eq!(ledger.item("S1", "a").unwrap().status, ItemStatus::Completed);
        assert_eq!(ledger.item("S1", "b").unwrap().status, ItemStatus::New);
        assert_eq!(ledger.item("S1", "c").unwrap().status, ItemStatus::New);
        assert!(!source.fetched().contains(&"c".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_stops_after_in_flight_item() {
        let source = Arc::new(
            MemoryStore::new("source")
                .with_item("S1", "a", 1)
                .with_item("S1", "b", 2)
                .with_item("S2", "c", 3),
        );
        let target = Arc::new(MemoryStore::new("target"));
        let cancel = CancellationToken::new();
        target.cancel_after_pushes(1, cancel.clone());
        let ledger = ledger_of(&[("S1", "a", 1), ("S1", "b", 2), ("S2", "c", 3)]);

        let report = run(&source, &target, &ledger, options(1, false), &cancel)
            .await
            .unwrap();

        assert_eq!(report.completed, 1);
        assert_eq!(source.fetched(), vec!["a".to_string()]);
        let ledger = ledger.lock();
        assert_eq!(ledger.item("S1", "a").unwrap().status, ItemStatus::Completed);
        assert_eq!(ledger.item("S1", "b").unwrap().status, ItemStatus::New);
    }

    /// Source answers 503 for `a`; retries back off for 30s each, and the
    /// stop arrives while the first backoff is sleeping.
    async fn stop_during_backoff(
        ignore_errors: bool,
    ) -> (Arc<MemoryStore>, SharedLedger, TransferReport) {
        let source = Arc::new(
            MemoryStore::new("source")
                .with_item("S1", "a", 1)
                .with_item("S1", "b", 2)
                .unavailable_fetch("a"),
        );
        let target = Arc::new(MemoryStore::new("target"));
        let ledger = ledger_of(&[("S1", "a", 1), ("S1", "b", 2)]);
        let options = TransferOptions {
            workers: 1,
            ignore_errors,
            retry: RetryConfig {
                max_retries: 5,
                base_delay: Duration::from_secs(30),
                max_delay: Duration::from_secs(30),
            },
        };
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.cancel();
        });

        let report = run(&source, &target, &ledger, options, &cancel)
            .await
            .unwrap();
        (source, ledger, report)
    }

    #[tokio::test]
    async fn test_stop_during_retry_backoff_is_not_fatal() {
        let (source, ledger, report) = stop_during_backoff(false).await;

        assert_eq!(report, TransferReport::default());
        assert_eq!(source.fetched(), vec!["a".to_string()]);
        let ledger = ledger.lock();
        assert_eq!(ledger.item("S1", "a").unwrap().status, ItemStatus::New);
        assert_eq!(ledger.item("S1", "b").unwrap().status, ItemStatus::New);
    }

    #[tokio::test]
    async fn test_stop_during_retry_backoff_is_not_counted_as_failure() {
        let (_, ledger, report) = stop_during_backoff(true).await;

        assert_eq!(report.failed, 0);
        assert_eq!(
            ledger.lock().item("S1", "a").unwrap().status,
            ItemStatus::New
        );
    }

    #[tokio::test]
    async fn test_empty_queue_returns_immediately() {
        let source = Arc::new(MemoryStore::new("source"));
        let target = Arc::new(MemoryStore::new("target"));
        let report = run(
            &source,
            &target,
            &SharedLedger::default(),
            options(4, false),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(report, TransferReport::default());
    }
}
