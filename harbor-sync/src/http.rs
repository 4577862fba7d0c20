//! HTTP document store client.
//!
//! REST layout:
//!
//! ```text
//! GET    {base}/v1/owners/{owner}/collections/{collection}/documents
//! GET    {base}/v1/owners/{owner}/collections/{collection}/documents/{id}
//! PUT    ...documents/{id}      full upsert
//! PATCH  ...documents/{id}      top-level merge, 404 if absent
//! DELETE ...documents/{id}      404 if absent
//! GET    {base}/health
//! ```
//!
//! Timestamps travel as `{"$timestamp": "<rfc3339>"}`, the store's native
//! time type, and decode back to [`Value::Timestamp`].

use crate::connectivity::ReachabilityProbe;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;
use async_trait::async_trait;
use harbor_types::time::{format_canonical, parse_timestamp};
use harbor_types::{Document, DocumentId, Fields, OwnerId, Value};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use urlencoding::encode;

const TIMESTAMP_KEY: &str = "$timestamp";

/// Connection settings for [`HttpRemoteStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRemoteConfig {
    /// Base URL of the document store (e.g. `https://docs.example.com`).
    pub base_url: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for HttpRemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            token: None,
            timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DocumentList {
    documents: Vec<serde_json::Value>,
}

/// Remote store speaking the REST layout above.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    config: HttpRemoteConfig,
    client: Client,
}

impl HttpRemoteStore {
    pub fn new(config: HttpRemoteConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SyncError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn collection_url(&self, owner: &OwnerId, collection: &str) -> String {
        format!(
            "{}/v1/owners/{}/collections/{}/documents",
            self.config.base_url.trim_end_matches('/'),
            encode(owner.as_str()),
            encode(collection)
        )
    }

    fn document_url(&self, owner: &OwnerId, collection: &str, id: &DocumentId) -> String {
        format!("{}/{}", self.collection_url(owner, collection), encode(id.as_str()))
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn get(
        &self,
        owner: &OwnerId,
        collection: &str,
        id: &DocumentId,
    ) -> SyncResult<Option<Fields>> {
        let response = self
            .request(Method::GET, self.document_url(owner, collection, id))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: serde_json::Value = check(response).await?.json().await?;
        match decode_value(body) {
            Value::Map(mut fields) => {
                fields.remove("id");
                Ok(Some(fields))
            }
            _ => Err(SyncError::Remote {
                status: 200,
                message: format!("document {id} is not an object"),
            }),
        }
    }

    async fn set(
        &self,
        owner: &OwnerId,
        collection: &str,
        id: &DocumentId,
        fields: Fields,
    ) -> SyncResult<()> {
        debug!("PUT {}/{}", collection, id);
        let response = self
            .request(Method::PUT, self.document_url(owner, collection, id))
            .json(&encode_fields(&fields))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn merge(
        &self,
        owner: &OwnerId,
        collection: &str,
        id: &DocumentId,
        fields: Fields,
    ) -> SyncResult<()> {
        debug!("PATCH {}/{}", collection, id);
        let response = self
            .request(Method::PATCH, self.document_url(owner, collection, id))
            .json(&encode_fields(&fields))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound(id.to_string()));
        }
        check(response).await?;
        Ok(())
    }

    async fn delete(
        &self,
        owner: &OwnerId,
        collection: &str,
        id: &DocumentId,
    ) -> SyncResult<bool> {
        debug!("DELETE {}/{}", collection, id);
        let response = self
            .request(Method::DELETE, self.document_url(owner, collection, id))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response).await?;
        Ok(true)
    }

    async fn list(&self, owner: &OwnerId, collection: &str) -> SyncResult<Vec<Document>> {
        let response = self
            .request(Method::GET, self.collection_url(owner, collection))
            .send()
            .await?;
        let list: DocumentList = check(response).await?.json().await?;

        let mut documents = Vec::with_capacity(list.documents.len());
        for raw in list.documents {
            let Value::Map(mut fields) = decode_value(raw) else {
                warn!("Skipping non-object document in {}", collection);
                continue;
            };
            match fields.remove("id") {
                Some(Value::String(id)) if !id.is_empty() => {
                    documents.push(Document::from_fields(id, fields));
                }
                _ => warn!("Skipping document without id in {}", collection),
            }
        }
        Ok(documents)
    }
}

/// Reachability probe hitting `{base}/health`.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    url: String,
}

impl HttpProbe {
    pub fn new(base_url: &str, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: format!("{}/health", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn is_reachable(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Health probe failed: {}", e);
                false
            }
        }
    }
}

async fn check(response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(SyncError::Remote {
        status: status.as_u16(),
        message,
    })
}

/// Encodes fields in the store's wire format.
pub fn encode_fields(fields: &Fields) -> serde_json::Value {
    serde_json::Value::Object(
        fields
            .iter()
            .map(|(key, value)| (key.clone(), encode_value(value)))
            .collect(),
    )
}

fn encode_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Timestamp(ts) => serde_json::json!({ TIMESTAMP_KEY: format_canonical(ts) }),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(encode_value).collect()),
        Value::Map(map) => encode_fields(map),
        other => other.to_json(),
    }
}

/// Decodes a value from the store's wire format.
pub fn decode_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Object(map) => {
            if map.len() == 1
                && let Some(ts) = map
                    .get(TIMESTAMP_KEY)
                    .and_then(serde_json::Value::as_str)
                    .and_then(|s| parse_timestamp(s).ok())
            {
                return Value::Timestamp(ts);
            }
            Value::Map(map.into_iter().map(|(k, v)| (k, decode_value(v))).collect())
        }
        serde_json::Value::Array(items) => Value::Array(items.into_iter().map(decode_value).collect()),
        other => Value::from(other),
    }
}
