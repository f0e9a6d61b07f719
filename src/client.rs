//! Interceptable HTTP client handed to connectors.
//!
//! Connectors never talk to the network directly. Every call goes through
//! [`HttpClient::fetch`], which runs in one of three modes:
//!
//! | Mode | Behaviour |
//! |------|-----------|
//! | live | send through the [`Transport`] |
//! | record | send, then store the response (or HTTP status error) in an archive |
//! | replay | look the request up in an archive; never touch the network |
//!
//! In record and replay modes the request is sanitized before it is
//! fingerprinted: credential headers and connector-declared payload keys
//! are dropped, so secrets stay out of archives and a replay without
//! credentials still finds its entries.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::archive::Archive;
use crate::error::HttpError;
use crate::models::FetchParams;
use crate::outcome::Outcome;

pub const DEFAULT_REDACTED_HEADERS: &[&str] = &["Authorization"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
}

/// An outgoing request.
///
/// `payload` is sent as query parameters for GET and as a form body for
/// POST.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub payload: Option<Map<String, Value>>,
    pub headers: Option<Map<String, Value>>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            payload: None,
            headers: None,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            ..Self::get(url)
        }
    }

    /// Add a payload parameter.
    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Map::new)
            .insert(name.to_string(), Value::String(value.into()));
        self
    }
}

/// A response as received from the transport, whatever its status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    pub url: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    #[serde(with = "base64_body")]
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }

    /// Header value, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

mod base64_body {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Transport
// ═══════════════════════════════════════════════════════════════════════

/// Sends a request over the wire.
///
/// Returns every response, including error statuses; only failures to
/// get a response at all are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &Request) -> Result<RawResponse, HttpError>;
}

/// [`Transport`] backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

fn form_pairs(payload: &Map<String, Value>) -> Vec<(String, String)> {
    payload
        .iter()
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &Request) -> Result<RawResponse, HttpError> {
        let pairs = request.payload.as_ref().map(form_pairs).unwrap_or_default();

        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url).query(&pairs),
            Method::Post => self.client.post(&request.url).form(&pairs),
        };
        if let Some(headers) = &request.headers {
            for (name, value) in form_pairs(headers) {
                builder = builder.header(name, value);
            }
        }

        let network_err = |e: reqwest::Error| HttpError::Network {
            url: request.url.clone(),
            message: e.to_string(),
        };

        let response = builder.send().await.map_err(network_err)?;
        let url = response.url().to_string();
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response.bytes().await.map_err(network_err)?.to_vec();

        Ok(RawResponse {
            url,
            status,
            headers,
            body,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Client modes
// ═══════════════════════════════════════════════════════════════════════

/// Metadata written to a recording archive on its first store.
#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub origin: String,
    pub connector_name: String,
    pub connector_version: String,
    pub category: String,
    pub params: FetchParams,
}

struct Recorder {
    archive: Arc<Archive>,
    pending: Mutex<Option<RunMetadata>>,
}

impl Recorder {
    async fn init_metadata_once(&self) -> Result<(), crate::error::ArchiveError> {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        match pending {
            Some(meta) if self.archive.metadata().is_none() => {
                self.archive
                    .init_metadata(
                        &meta.origin,
                        &meta.connector_name,
                        &meta.connector_version,
                        &meta.category,
                        &meta.params,
                    )
                    .await
            }
            _ => Ok(()),
        }
    }
}

enum Mode {
    Live(Arc<dyn Transport>),
    Record(Arc<dyn Transport>, Recorder),
    Replay(Arc<Archive>),
}

pub struct HttpClient {
    mode: Mode,
    redacted_headers: Vec<String>,
    redacted_params: Vec<String>,
}

impl HttpClient {
    /// Plain client: every call goes to the network.
    pub fn live(transport: Arc<dyn Transport>) -> Self {
        Self::with_mode(Mode::Live(transport))
    }

    /// Client that stores every outcome in `archive`.
    ///
    /// The archive metadata is written on the first store, unless the
    /// archive already has it.
    pub fn recording(
        transport: Arc<dyn Transport>,
        archive: Arc<Archive>,
        metadata: RunMetadata,
    ) -> Self {
        Self::with_mode(Mode::Record(
            transport,
            Recorder {
                archive,
                pending: Mutex::new(Some(metadata)),
            },
        ))
    }

    /// Client answering every call from `archive`.
    pub fn replaying(archive: Arc<Archive>) -> Self {
        Self::with_mode(Mode::Replay(archive))
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            redacted_headers: DEFAULT_REDACTED_HEADERS
                .iter()
                .map(|h| h.to_string())
                .collect(),
            redacted_params: Vec::new(),
        }
    }

    /// Also drop these payload keys before fingerprinting.
    pub fn redact_params(mut self, keys: &[&str]) -> Self {
        self.redacted_params
            .extend(keys.iter().map(|k| k.to_string()));
        self
    }

    /// Also drop these headers before fingerprinting.
    pub fn redact_headers(mut self, names: &[&str]) -> Self {
        self.redacted_headers
            .extend(names.iter().map(|h| h.to_string()));
        self
    }

    /// Perform a request.
    ///
    /// Statuses of 400 and above fail with [`HttpError::Status`]. In record
    /// mode that failure is stored before it is returned; in replay mode a
    /// stored failure is returned as the same error.
    pub async fn fetch(&self, request: Request) -> Result<RawResponse> {
        match &self.mode {
            Mode::Live(transport) => {
                debug!(url = %request.url, "fetching");
                let response = transport.send(&request).await?;
                Ok(check_status(response)?)
            }
            Mode::Record(transport, recorder) => {
                debug!(url = %request.url, "fetching and recording");
                let response = transport.send(&request).await?;

                recorder.init_metadata_once().await?;
                let (payload, headers) = self.sanitize(&request);
                let outcome = match check_status(response) {
                    Ok(response) => Ok(response),
                    Err(e) => {
                        error!(url = %request.url, error = %e, "HTTP error");
                        Err(e)
                    }
                };
                let recorded = match &outcome {
                    Ok(response) => Outcome::Value(serde_json::to_value(response)?),
                    Err(e) => Outcome::Error(e.to_record()),
                };
                recorder
                    .archive
                    .store(&request.url, &payload, &headers, &recorded)
                    .await?;

                Ok(outcome?)
            }
            Mode::Replay(archive) => {
                debug!(url = %request.url, "replaying");
                let (payload, headers) = self.sanitize(&request);
                match archive.retrieve(&request.url, &payload, &headers).await? {
                    Outcome::Value(value) => Ok(serde_json::from_value(value)?),
                    Outcome::Error(record) => Err(HttpError::from_record(&record).into()),
                }
            }
        }
    }

    fn sanitize(&self, request: &Request) -> (Value, Value) {
        let payload = request.payload.as_ref().map(|payload| {
            let mut payload = payload.clone();
            for key in &self.redacted_params {
                payload.remove(key);
            }
            payload
        });
        let headers = request.headers.as_ref().map(|headers| {
            headers
                .iter()
                .filter(|(name, _)| {
                    !self
                        .redacted_headers
                        .iter()
                        .any(|r| r.eq_ignore_ascii_case(name))
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<String, Value>>()
        });

        (non_empty(payload), non_empty(headers))
    }
}

/// An absent and an emptied map fingerprint the same.
fn non_empty(map: Option<Map<String, Value>>) -> Value {
    match map {
        Some(map) if !map.is_empty() => Value::Object(map),
        _ => Value::Null,
    }
}

fn check_status(response: RawResponse) -> Result<RawResponse, HttpError> {
    if response.status >= 400 {
        return Err(HttpError::Status {
            url: response.url.clone(),
            status: response.status,
            body: response.text(),
        });
    }
    Ok(response)
}
