//! HTTP remote implementation.
//!
//! JSON over HTTP with reqwest. Endpoints, relative to the configured base URL:
//!
//! - `GET  /api/users/{user}/sync`
//! - `POST /api/users/{user}/{kind}s`
//! - `PUT  /api/users/{user}/{kind}s/{id}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use super::{RemoteApi, RemoteError};
use crate::{
    Result,
    config::ApiConfig,
    constants::API_PREFIX,
    types::{EncryptedRecord, RecordId, RecordKind, ServerSnapshot, UserId},
};

/// [`RemoteApi`] backed by a reqwest client.
#[derive(Clone, Debug)]
pub struct HttpRemoteApi {
    client: Client,
    base_url: Url,
    access_token: Option<String>,
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_decode() {
        RemoteError::InvalidResponse {
            reason: e.to_string(),
        }
    } else if let Some(status) = e.status() {
        RemoteError::Rejected {
            status: status.as_u16(),
            message: e.to_string(),
        }
    } else {
        // Connect, timeout and request-level failures all mean no usable network
        RemoteError::Unreachable {
            reason: e.to_string(),
        }
    }
}

impl HttpRemoteApi {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        if config.base_url.cannot_be_a_base() {
            return Err(RemoteError::InvalidConfig {
                reason: format!("'{}' cannot be used as a base URL", config.base_url),
            }
            .into());
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RemoteError::InvalidConfig {
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            access_token: config.access_token.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, user_id: &UserId, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidConfig {
                reason: format!("'{}' cannot be used as a base URL", self.base_url),
            })?
            .pop_if_empty()
            .push(API_PREFIX)
            .push("users")
            .push(user_id.as_str())
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response: Response = self
            .authorize(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RemoteError::Rejected {
                status: status.as_u16(),
                message,
            }
            .into());
        }

        let body = response.json::<T>().await.map_err(transport_error)?;
        Ok(body)
    }
}

fn collection_segment(kind: RecordKind) -> String {
    format!("{}s", kind.as_str())
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn full_sync(&self, user_id: &UserId) -> Result<ServerSnapshot> {
        let url = self.endpoint(user_id, &["sync"])?;
        trace!(%url, "Requesting full sync");
        let snapshot: ServerSnapshot = self.send(self.client.get(url)).await?;
        debug!(
            user_id = %user_id,
            credentials = snapshot.credentials.len(),
            sends = snapshot.sends.len(),
            "Received full sync"
        );
        Ok(snapshot)
    }

    async fn create_record(
        &self,
        user_id: &UserId,
        kind: RecordKind,
        record: &EncryptedRecord,
    ) -> Result<EncryptedRecord> {
        let collection = collection_segment(kind);
        let url = self.endpoint(user_id, &[collection.as_str()])?;
        self.send(self.client.post(url).json(record)).await
    }

    async fn update_record(
        &self,
        user_id: &UserId,
        kind: RecordKind,
        id: &RecordId,
        record: &EncryptedRecord,
    ) -> Result<EncryptedRecord> {
        let collection = collection_segment(kind);
        let url = self.endpoint(user_id, &[collection.as_str(), id.as_str()])?;
        self.send(self.client.put(url).json(record)).await
    }
}
