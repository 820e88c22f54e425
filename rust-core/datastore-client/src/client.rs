use async_trait::async_trait;
use serde_json::Value;

use crate::error::DispatchError;
use crate::wire::{decode_msearch_responses, encode_msearch_envelope, MsearchBody, MsearchResponse};

/// Abstract transport to one Elasticsearch- or OpenSearch-compatible
/// cluster (spec §4.5). Generalizes the teacher's `SearchStore` trait
/// (`indexing/src/store.rs`) from "one document-store call" to "one
/// msearch envelope per cluster per wave" — the only network boundary the
/// dispatcher crosses.
#[async_trait]
pub trait DatastoreClient: Send + Sync {
    /// Sends one multi-search envelope to `cluster_url` and returns one
    /// response per submitted body, in order.
    async fn msearch(
        &self,
        cluster_url: &str,
        bodies: &[MsearchBody],
    ) -> Result<Vec<MsearchResponse>, DispatchError>;
}

/// Production transport over the `elasticsearch` crate's low-level
/// `Transport`, with the read-only security invariant (spec §4.5, §6: "use
/// GET-with-body style, never POST") enforced by pinning the HTTP method
/// on every outgoing request rather than trusting the high-level client's
/// default verb choice.
pub struct ElasticsearchDatastoreClient {
    enforce_read_only: bool,
}

impl ElasticsearchDatastoreClient {
    pub fn new(enforce_read_only: bool) -> Self {
        Self { enforce_read_only }
    }

    fn method(&self) -> http::Method {
        // `_msearch` is a read endpoint regardless of verb; GET-with-body
        // is the convention this system insists on so that a reader
        // credential scoped to read-only access can never be rejected (or
        // silently upgraded) by an intermediary that inspects the verb.
        if self.enforce_read_only {
            http::Method::GET
        } else {
            http::Method::POST
        }
    }
}

#[async_trait]
impl DatastoreClient for ElasticsearchDatastoreClient {
    async fn msearch(
        &self,
        cluster_url: &str,
        bodies: &[MsearchBody],
    ) -> Result<Vec<MsearchResponse>, DispatchError> {
        if bodies.is_empty() {
            return Ok(vec![]);
        }

        let transport = elasticsearch::http::transport::Transport::single_node(cluster_url)
            .map_err(|e| DispatchError::Transport(cluster_url.to_string(), e.to_string()))?;

        let envelope = encode_msearch_envelope(bodies);
        let method = self.method();

        let response = transport
            .send(
                method,
                "/_msearch",
                elasticsearch::http::headers::HeaderMap::new(),
                Option::<&Value>::None,
                Some(envelope.into_bytes()),
                None,
            )
            .await
            .map_err(|e| DispatchError::Transport(cluster_url.to_string(), e.to_string()))?;

        let status = response.status_code();
        let body: Value = response
            .json()
            .await
            .map_err(|e| DispatchError::MalformedResponse(cluster_url.to_string(), e.to_string()))?;

        if !status.is_success() {
            return Err(DispatchError::SearchFailed(cluster_url.to_string(), body.to_string()));
        }

        decode_msearch_responses(&body)
            .map_err(|e| DispatchError::MalformedResponse(cluster_url.to_string(), e))
    }
}

/// `reqwest`-based fallback transport for OpenSearch-flavored clusters that
/// reject the `elasticsearch` crate's Content-Type negotiation (spec's
/// "Elasticsearch- or OpenSearch-compatible" framing). Same GET-with-body
/// invariant, built directly on `reqwest::Client::request` so the verb is
/// explicit rather than implied by a convenience method.
pub struct ReqwestDatastoreClient {
    http: reqwest::Client,
    enforce_read_only: bool,
}

impl ReqwestDatastoreClient {
    pub fn new(enforce_read_only: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            enforce_read_only,
        }
    }
}

#[async_trait]
impl DatastoreClient for ReqwestDatastoreClient {
    async fn msearch(
        &self,
        cluster_url: &str,
        bodies: &[MsearchBody],
    ) -> Result<Vec<MsearchResponse>, DispatchError> {
        if bodies.is_empty() {
            return Ok(vec![]);
        }

        let method = if self.enforce_read_only {
            reqwest::Method::GET
        } else {
            reqwest::Method::POST
        };

        let url = url::Url::parse(cluster_url)
            .map_err(|e| DispatchError::Transport(cluster_url.to_string(), e.to_string()))?
            .join("_msearch")
            .map_err(|e| DispatchError::Transport(cluster_url.to_string(), e.to_string()))?;

        let envelope = encode_msearch_envelope(bodies);
        let response = self
            .http
            .request(method, url)
            .header("content-type", "application/x-ndjson")
            .body(envelope)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(cluster_url.to_string(), e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(DispatchError::SearchFailed(
                cluster_url.to_string(),
                format!("{status}: {text}"),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| DispatchError::MalformedResponse(cluster_url.to_string(), e.to_string()))?;

        decode_msearch_responses(&body)
            .map_err(|e| DispatchError::MalformedResponse(cluster_url.to_string(), e))
    }
}

/// An in-memory, scripted client used by `graphql-engine`'s resolver tests
/// and this crate's own dispatcher tests — no network, deterministic
/// responses keyed by call order. Grounded on the teacher's habit of
/// providing a trivial in-memory store implementation alongside the real
/// one for test wiring (`indexing::store::ElasticsearchStore` placeholder).
#[cfg(any(test, feature = "test-util"))]
pub struct ScriptedDatastoreClient {
    responses: std::sync::Mutex<std::collections::VecDeque<Vec<MsearchResponse>>>,
    pub calls: std::sync::Mutex<Vec<(String, usize)>>,
}

#[cfg(any(test, feature = "test-util"))]
impl ScriptedDatastoreClient {
    pub fn new(scripted: Vec<Vec<MsearchResponse>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(scripted.into()),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl DatastoreClient for ScriptedDatastoreClient {
    async fn msearch(
        &self,
        cluster_url: &str,
        bodies: &[MsearchBody],
    ) -> Result<Vec<MsearchResponse>, DispatchError> {
        self.calls
            .lock()
            .unwrap()
            .push((cluster_url.to_string(), bodies.len()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| DispatchError::SearchFailed(cluster_url.to_string(), "no scripted response left".to_string()))
    }
}
