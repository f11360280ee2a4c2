//! REST store client.
//!
//! Speaks the DICOM-server REST layout: collections are studies, items are
//! instances.
//! - `GET  /studies`
//! - `GET  /studies/{id}/instances`
//! - `GET  /instances/{id}/file`
//! - `POST /instances`

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response};

use super::{Credentials, ItemListing, Store, StoreError};

/// Why a request failed, before it is attached to an operation.
struct Failure {
    status: Option<u16>,
    reason: String,
}

impl From<reqwest::Error> for Failure {
    fn from(e: reqwest::Error) -> Self {
        Self {
            status: e.status().map(|s| s.as_u16()),
            reason: e.to_string(),
        }
    }
}

pub struct RestStore {
    base_url: String,
    client: Client,
    credentials: Credentials,
}

impl std::fmt::Debug for RestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestStore")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl RestStore {
    /// Build a client for the store at `base_url`. A trailing `/` is ignored.
    /// With `timeout` unset, requests may take as long as the transfer needs.
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        timeout: Option<Duration>,
    ) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: builder.build()?,
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, Failure> {
        let response = request
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Failure {
                status: Some(status.as_u16()),
                reason: format!("HTTP {}", status),
            });
        }
        Ok(response)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, Failure> {
        let response = self.send(self.client.get(self.url(path))).await?;
        Ok(response.json().await?)
    }
}

#[async_trait::async_trait]
impl Store for RestStore {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        self.get_json("studies")
            .await
            .map_err(|f| StoreError::Unavailable {
                store: self.base_url.clone(),
                status: f.status,
                reason: f.reason,
            })
    }

    async fn list_items(&self, collection: &str) -> Result<Vec<ItemListing>, StoreError> {
        self.get_json(&format!("studies/{}/instances", collection))
            .await
            .map_err(|f| StoreError::CollectionUnavailable {
                store: self.base_url.clone(),
                collection: collection.to_string(),
                status: f.status,
                reason: f.reason,
            })
    }

    async fn fetch_item(&self, _collection: &str, item: &str) -> Result<Bytes, StoreError> {
        let result = async {
            let response = self
                .send(self.client.get(self.url(&format!("instances/{}/file", item))))
                .await?;
            Ok::<_, Failure>(response.bytes().await?)
        }
        .await;

        result.map_err(|f| StoreError::ItemFetchFailed {
            store: self.base_url.clone(),
            item: item.to_string(),
            status: f.status,
            reason: f.reason,
        })
    }

    async fn push_item(
        &self,
        _collection: &str,
        item: &str,
        body: Bytes,
    ) -> Result<(), StoreError> {
        self.send(self.client.post(self.url("instances")).body(body))
            .await
            .map(|_| ())
            .map_err(|f| StoreError::ItemPushFailed {
                store: self.base_url.clone(),
                item: item.to_string(),
                status: f.status,
                reason: f.reason,
            })
    }
}
