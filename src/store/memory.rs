//! In-memory store for tests.
//!
//! Holds collections of byte payloads, records every fetch and push, and can
//! be told to fail specific operations. Also detects two operations running
//! against the same collection at once.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::{ItemListing, Store, StoreError};

#[derive(Default)]
struct MemoryState {
    collections: BTreeMap<String, BTreeMap<String, Bytes>>,
    unreachable: bool,
    failing_collections: HashSet<String>,
    failing_fetches: HashSet<String>,
    unavailable_fetches: HashSet<String>,
    failing_pushes: HashSet<String>,
    fetched: Vec<String>,
    pushed: Vec<String>,
    listed: Vec<String>,
    in_flight: HashMap<String, usize>,
    overlap_seen: bool,
    cancel_after_pushes: Option<(usize, CancellationToken)>,
}

pub struct MemoryStore {
    name: String,
    delay: Option<Duration>,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            delay: None,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Sleep this long inside every fetch and push.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Add an item whose payload is `size` zero bytes.
    pub fn with_item(self, collection: &str, item: &str, size: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(item.to_string(), Bytes::from(vec![0u8; size]));
        self
    }

    pub fn unreachable(self) -> Self {
        self.state.lock().unwrap().unreachable = true;
        self
    }

    pub fn fail_listing(self, collection: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_collections
            .insert(collection.to_string());
        self
    }

    pub fn fail_fetch(self, item: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_fetches
            .insert(item.to_string());
        self
    }

    /// Fetches of `item` answer 503, which the retry classifier treats as
    /// transient.
    pub fn unavailable_fetch(self, item: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .unavailable_fetches
            .insert(item.to_string());
        self
    }

    pub fn fail_push(self, item: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_pushes
            .insert(item.to_string());
        self
    }

    /// Cancel `token` once `count` pushes have succeeded.
    pub fn cancel_after_pushes(&self, count: usize, token: CancellationToken) {
        self.state.lock().unwrap().cancel_after_pushes = Some((count, token));
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.failing_collections.clear();
        state.failing_fetches.clear();
        state.unavailable_fetches.clear();
        state.failing_pushes.clear();
    }

    pub fn fetched(&self) -> Vec<String> {
        self.state.lock().unwrap().fetched.clone()
    }

    pub fn pushed(&self) -> Vec<String> {
        self.state.lock().unwrap().pushed.clone()
    }

    pub fn listed(&self) -> Vec<String> {
        self.state.lock().unwrap().listed.clone()
    }

    pub fn reset_log(&self) {
        let mut state = self.state.lock().unwrap();
        state.fetched.clear();
        state.pushed.clear();
        state.listed.clear();
    }

    pub fn overlap_seen(&self) -> bool {
        self.state.lock().unwrap().overlap_seen
    }

    pub fn contains(&self, collection: &str, item: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .collections
            .get(collection)
            .is_some_and(|items| items.contains_key(item))
    }

    fn enter(&self, collection: &str) {
        let mut state = self.state.lock().unwrap();
        let count = state.in_flight.entry(collection.to_string()).or_insert(0);
        *count += 1;
        if *count > 1 {
            state.overlap_seen = true;
        }
    }

    fn leave(&self, collection: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(count) = state.in_flight.get_mut(collection) {
            *count -= 1;
        }
    }

    async fn pause(&self) {
        match self.delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(StoreError::Unavailable {
                store: self.name.clone(),
                status: None,
                reason: "connection refused".into(),
            });
        }
        Ok(state.collections.keys().cloned().collect())
    }

    async fn list_items(&self, collection: &str) -> Result<Vec<ItemListing>, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.listed.push(collection.to_string());
        if state.failing_collections.contains(collection) {
            return Err(StoreError::CollectionUnavailable {
                store: self.name.clone(),
                collection: collection.to_string(),
                status: Some(500),
                reason: "HTTP 500".into(),
            });
        }
        Ok(state
            .collections
            .get(collection)
            .map(|items| {
                items
                    .iter()
                    .map(|(id, body)| ItemListing {
                        id: id.clone(),
                        size: body.len() as u64,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_item(&self, collection: &str, item: &str) -> Result<Bytes, StoreError> {
        self.enter(collection);
        self.pause().await;
        let result = {
            let mut state = self.state.lock().unwrap();
            state.fetched.push(item.to_string());
            if state.failing_fetches.contains(item) {
                Err(StoreError::ItemFetchFailed {
                    store: self.name.clone(),
                    item: item.to_string(),
                    status: Some(404),
                    reason: "HTTP 404".into(),
                })
            } else if state.unavailable_fetches.contains(item) {
                Err(StoreError::ItemFetchFailed {
                    store: self.name.clone(),
                    item: item.to_string(),
                    status: Some(503),
                    reason: "HTTP 503".into(),
                })
            } else {
                state
                    .collections
                    .get(collection)
                    .and_then(|items| items.get(item))
                    .cloned()
                    .ok_or_else(|| StoreError::ItemFetchFailed {
                        store: self.name.clone(),
                        item: item.to_string(),
                        status: Some(404),
                        reason: "no such item".into(),
                    })
            }
        };
        self.leave(collection);
        result
    }

    async fn push_item(
        &self,
        collection: &str,
        item: &str,
        body: Bytes,
    ) -> Result<(), StoreError> {
        self.enter(collection);
        self.pause().await;
        let result = {
            let mut state = self.state.lock().unwrap();
            if state.failing_pushes.contains(item) {
                Err(StoreError::ItemPushFailed {
                    store: self.name.clone(),
                    item: item.to_string(),
                    status: Some(400),
                    reason: "HTTP 400".into(),
                })
            } else {
                state.pushed.push(item.to_string());
                state
                    .collections
                    .entry(collection.to_string())
                    .or_default()
                    .insert(item.to_string(), body);

                let pushed = state.pushed.len();
                if let Some((after, token)) = &state.cancel_after_pushes {
                    if pushed >= *after {
                        token.cancel();
                    }
                }
                Ok(())
            }
        };
        self.leave(collection);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_pushes_to_one_collection_are_seen() {
        let store = MemoryStore::new("target").with_delay(Duration::from_millis(10));
        let (a, b) = tokio::join!(
            store.push_item("S1", "a", Bytes::from_static(b"a")),
            store.push_item("S1", "b", Bytes::from_static(b"b")),
        );
        a.unwrap();
        b.unwrap();
        assert!(store.overlap_seen());
    }

    #[tokio::test]
    async fn test_fetch_overlapping_push_is_seen() {
        let store = MemoryStore::new("store")
            .with_delay(Duration::from_millis(10))
            .with_item("S1", "a", 1);
        let (fetched, pushed) = tokio::join!(
            store.fetch_item("S1", "a"),
            store.push_item("S1", "b", Bytes::from_static(b"b")),
        );
        fetched.unwrap();
        pushed.unwrap();
        assert!(store.overlap_seen());
    }

    #[tokio::test]
    async fn test_sequential_operations_do_not_overlap() {
        let store = MemoryStore::new("store").with_item("S1", "a", 1);
        let body = store.fetch_item("S1", "a").await.unwrap();
        store.push_item("S1", "b", body).await.unwrap();
        assert!(!store.overlap_seen());
    }
}
