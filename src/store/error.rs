use thiserror::Error;

/// Failures of the four store operations.
///
/// `status` is the HTTP status when the store answered, `None` when the
/// request never got a response (connection refused, timeout, bad body).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unable to list collections on {store}: {reason}")]
    Unavailable {
        store: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("Unable to list items of collection {collection} on {store}: {reason}")]
    CollectionUnavailable {
        store: String,
        collection: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("Unable to fetch item {item} from {store}: {reason}")]
    ItemFetchFailed {
        store: String,
        item: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("Unable to push item {item} to {store}: {reason}")]
    ItemPushFailed {
        store: String,
        item: String,
        status: Option<u16>,
        reason: String,
    },
}

impl StoreError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unavailable { status, .. }
            | Self::CollectionUnavailable { status, .. }
            | Self::ItemFetchFailed { status, .. }
            | Self::ItemPushFailed { status, .. } => *status,
        }
    }

    /// Whether this error is transient and worth retrying.
    ///
    /// Transport failures, rate limiting and server errors are transient;
    /// other HTTP statuses (auth, not found, rejected payload) are not.
    pub fn is_retryable(&self) -> bool {
        match self.status() {
            None => true,
            Some(status) => status == 429 || status >= 500,
        }
    }
}
