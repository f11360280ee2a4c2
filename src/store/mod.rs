//! Store abstraction: the four operations the sync engine needs from the
//! Source and Target REST servers.

pub mod error;
#[cfg(test)]
pub mod memory;
pub mod rest;

pub use error::StoreError;
pub use rest::RestStore;

use bytes::Bytes;
use serde::Deserialize;

/// One item as reported by a collection listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ItemListing {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "FileSize")]
    pub size: u64,
}

/// Basic-auth credentials shared by both stores.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A collection/item store reachable over the network.
///
/// Object-safe so the controller can hold `Arc<dyn Store>` for both sides.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Human-readable identity for logs (usually the base URL).
    fn name(&self) -> &str;

    async fn list_collections(&self) -> Result<Vec<String>, StoreError>;

    async fn list_items(&self, collection: &str) -> Result<Vec<ItemListing>, StoreError>;

    /// Fetch the raw bytes of one item.
    async fn fetch_item(&self, collection: &str, item: &str) -> Result<Bytes, StoreError>;

    /// Create a member from raw bytes. `collection` and `item` identify the
    /// payload for error reporting; the store derives placement from the body.
    async fn push_item(&self, collection: &str, item: &str, body: Bytes)
        -> Result<(), StoreError>;
}
