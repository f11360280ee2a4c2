//! Types for the transfer ledger.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Transfer status of a single item.
///
/// Only moves forward: `New -> Skipped` when the Target already holds a copy
/// of the same size, `New -> Completed` once transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Discovered on the Source, not yet on the Target.
    New,
    /// Target already holds an item with the same ID and size.
    Skipped,
    /// Transferred by this run or a previous one.
    Completed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Skipped => "skipped",
            Self::Completed => "completed",
        }
    }
}

/// One item as recorded at Source discovery time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    /// Size in bytes reported by the Source. Never changes once recorded.
    pub size: u64,
    pub status: ItemStatus,
}

impl ItemRecord {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            status: ItemStatus::New,
        }
    }
}

/// Items of one collection, keyed by item ID.
pub type ItemMap = BTreeMap<String, ItemRecord>;

/// Item count and byte total for one status bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub items: u64,
    pub bytes: u64,
}

impl Tally {
    fn add(&mut self, size: u64) {
        self.items += 1;
        self.bytes += size;
    }
}

/// Aggregate counters over the whole ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSummary {
    pub collections: u64,
    pub total: Tally,
    pub new: Tally,
    pub skipped: Tally,
    pub completed: Tally,
}

/// Durable record of every known collection and item.
///
/// `scanning` names the collection whose Source listing has started but not
/// yet been recorded. A snapshot taken in that window cannot be trusted for
/// that collection, so it is cleared on the next load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    collections: BTreeMap<String, ItemMap>,
    scanning: Option<String>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        collections: BTreeMap<String, ItemMap>,
        scanning: Option<String>,
    ) -> Self {
        Self {
            collections,
            scanning,
        }
    }

    pub(crate) fn collections(&self) -> &BTreeMap<String, ItemMap> {
        &self.collections
    }

    pub fn scanning(&self) -> Option<&str> {
        self.scanning.as_deref()
    }

    pub fn collection(&self, collection: &str) -> Option<&ItemMap> {
        self.collections.get(collection)
    }

    pub fn item(&self, collection: &str, item: &str) -> Option<&ItemRecord> {
        self.collections.get(collection)?.get(item)
    }

    pub fn contains_collection(&self, collection: &str) -> bool {
        self.collections.contains_key(collection)
    }

    /// A collection needs a Source listing when it is unknown or has no items.
    pub fn needs_scan(&self, collection: &str) -> bool {
        self.collections
            .get(collection)
            .is_none_or(|items| items.is_empty())
    }

    pub fn begin_scan(&mut self, collection: &str) {
        self.scanning = Some(collection.to_string());
    }

    pub fn finish_scan(&mut self, collection: &str) {
        if self.scanning.as_deref() == Some(collection) {
            self.scanning = None;
        }
    }

    /// Drop the items of a collection whose scan was cut short.
    ///
    /// Returns the cleared collection, if any. Called once after loading a
    /// snapshot, before any scanning starts.
    pub fn reset_interrupted_scan(&mut self) -> Option<String> {
        let collection = self.scanning.take()?;
        self.collections.remove(&collection);
        Some(collection)
    }

    /// Record Source items for a collection as `New`.
    ///
    /// Items already present keep their recorded size and status. A listing
    /// with no items leaves the collection unrecorded so it is listed again
    /// next run. Returns the number of newly inserted items.
    pub fn record_items<I>(&mut self, collection: &str, items: I) -> usize
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        let mut items = items.into_iter().peekable();
        if items.peek().is_none() {
            return 0;
        }

        let entry = self.collections.entry(collection.to_string()).or_default();
        let mut inserted = 0;
        for (id, size) in items {
            entry.entry(id).or_insert_with(|| {
                inserted += 1;
                ItemRecord::new(size)
            });
        }
        inserted
    }

    /// Mark an item `Skipped` when the Target copy has the recorded size.
    ///
    /// Returns true when the item transitioned from `New`.
    pub fn mark_skipped(&mut self, collection: &str, item: &str, target_size: u64) -> bool {
        match self
            .collections
            .get_mut(collection)
            .and_then(|items| items.get_mut(item))
        {
            Some(record) if record.status == ItemStatus::New && record.size == target_size => {
                record.status = ItemStatus::Skipped;
                true
            }
            _ => false,
        }
    }

    /// Mark a `New` item as transferred. Returns false if it was not `New`.
    pub fn mark_completed(&mut self, collection: &str, item: &str) -> bool {
        match self
            .collections
            .get_mut(collection)
            .and_then(|items| items.get_mut(item))
        {
            Some(record) if record.status == ItemStatus::New => {
                record.status = ItemStatus::Completed;
                true
            }
            _ => false,
        }
    }

    /// Collections holding at least one `New` item, in ledger order.
    pub fn pending_collections(&self) -> Vec<String> {
        self.collections
            .iter()
            .filter(|(_, items)| items.values().any(|r| r.status == ItemStatus::New))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// `New` items of one collection as `(id, size)` pairs, in ledger order.
    pub fn pending_items(&self, collection: &str) -> Vec<(String, u64)> {
        self.collections
            .get(collection)
            .map(|items| {
                items
                    .iter()
                    .filter(|(_, r)| r.status == ItemStatus::New)
                    .map(|(id, r)| (id.clone(), r.size))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn summary(&self) -> LedgerSummary {
        let mut summary = LedgerSummary {
            collections: self.collections.len() as u64,
            ..LedgerSummary::default()
        };
        for record in self.collections.values().flat_map(|items| items.values()) {
            summary.total.add(record.size);
            match record.status {
                ItemStatus::New => summary.new.add(record.size),
                ItemStatus::Skipped => summary.skipped.add(record.size),
                ItemStatus::Completed => summary.completed.add(record.size),
            }
        }
        summary
    }
}
