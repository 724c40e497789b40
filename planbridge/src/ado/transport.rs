//! Authenticated, throttled, retrying transport for the work-item REST API.
//!
//! Every call sleeps a fixed minimum interval before going out, whether the
//! previous call succeeded or not. 429 and 5xx responses (and network errors)
//! are retried with exponential backoff up to the attempt budget; any other
//! non-2xx status fails immediately.
//!
//! ```text
//! request
//!   ├─ throttle sleep
//!   ├─ 2xx        → record stats, decode JSON
//!   ├─ 429 / 5xx  → backoff 2^(attempt+1)s, retry (3 attempts total)
//!   └─ other 4xx  → Rejected (no retry)
//! ```
//!
//! Retrying a mutating request whose response was lost can duplicate remote
//! state. The synchronizer compensates with its resume mapping and title dedup.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, ETAG, IF_MATCH};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::ado::error::{FailureClass, TrackerError, TrackerResult};

pub const CONTENT_JSON: &str = "application/json";
pub const CONTENT_JSON_PATCH: &str = "application/json-patch+json";
pub const CONTENT_OCTET_STREAM: &str = "application/octet-stream";

/// Body of an outgoing request, before serialization.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    JsonPatch(Value),
    Bytes(Vec<u8>),
}

impl RequestBody {
    fn into_payload(self) -> TrackerResult<Option<Payload>> {
        let payload = match self {
            Self::Empty => None,
            Self::Json(value) => Some(Payload {
                content_type: CONTENT_JSON,
                bytes: serde_json::to_vec(&value)?,
            }),
            Self::JsonPatch(value) => Some(Payload {
                content_type: CONTENT_JSON_PATCH,
                bytes: serde_json::to_vec(&value)?,
            }),
            Self::Bytes(bytes) => Some(Payload {
                content_type: CONTENT_OCTET_STREAM,
                bytes,
            }),
        };
        Ok(payload)
    }
}

/// Serialized request body with its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// A fully prepared request as it goes on the wire.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub method: Method,
    pub url: Url,
    pub authorization: String,
    pub if_match: Option<String>,
    pub payload: Option<Payload>,
}

impl WireRequest {
    /// Decode the payload as JSON. Used by test doubles.
    pub fn json_body(&self) -> Option<Value> {
        self.payload
            .as_ref()
            .and_then(|p| serde_json::from_slice(&p.bytes).ok())
    }
}

/// A response as it comes off the wire.
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: u16,
    pub reason: String,
    pub etag: Option<String>,
    pub body: String,
}

impl WireResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        let reason = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("")
            .to_string();
        Self {
            status,
            reason,
            etag: None,
            body: body.into(),
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure below the HTTP layer.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),
}

/// The wire. Production uses [`ReqwestBackend`]; tests substitute fakes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn send(&self, request: WireRequest) -> Result<WireResponse, BackendError>;
}

/// reqwest-backed HTTP backend.
pub struct ReqwestBackend {
    client: reqwest::Client,
}

impl ReqwestBackend {
    pub fn new(timeout: Duration) -> TrackerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrackerError::config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn send(&self, request: WireRequest) -> Result<WireResponse, BackendError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .header(AUTHORIZATION, request.authorization);
        if let Some(etag) = request.if_match {
            builder = builder.header(IF_MATCH, etag);
        }
        if let Some(payload) = request.payload {
            builder = builder
                .header(CONTENT_TYPE, payload.content_type)
                .body(payload.bytes);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        Ok(WireResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            etag,
            body,
        })
    }
}

/// Exponential backoff for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff multiplier (2.0 for exponential).
    pub backoff_multiplier: f64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Backoff after the given failed attempt (0-indexed): 2s, 4s, 8s, ...
    pub fn backoff_ms(&self, failed_attempt: u32) -> u64 {
        let delay = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(failed_attempt as i32);
        (delay as u64).min(self.max_backoff_ms)
    }

    pub fn backoff_duration(&self, failed_attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms(failed_attempt))
    }

    /// Whether another attempt is allowed after `attempts_made`.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 2_000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 60_000,
        }
    }
}

/// Transport tuning.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Sleep before every call.
    pub min_interval: Duration,
    pub retry: RetryPolicy,
    /// Per-request timeout for the production backend.
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(300),
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl TransportConfig {
    /// Defaults with `PLANBRIDGE_MIN_INTERVAL_MS` applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = std::env::var("PLANBRIDGE_MIN_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.min_interval = Duration::from_millis(ms);
        }
        config
    }
}

/// Successful-call accounting for one logical operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiCallStats {
    pub count: u64,
    pub total_seconds: f64,
}

impl ApiCallStats {
    fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total_seconds += elapsed.as_secs_f64();
    }

    /// Seconds rounded to two decimals, as written to the usage log.
    pub fn rounded_seconds(&self) -> f64 {
        (self.total_seconds * 100.0).round() / 100.0
    }
}

/// A request handed to [`Transport::execute`].
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub url: Url,
    pub body: RequestBody,
    pub if_match: Option<String>,
}

impl Call {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            body: RequestBody::Empty,
            if_match: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn if_match(mut self, etag: Option<String>) -> Self {
        self.if_match = etag;
        self
    }
}

/// Signs, throttles and retries requests; counts successful calls.
pub struct Transport<B = ReqwestBackend> {
    backend: B,
    authorization: String,
    config: TransportConfig,
    stats: Mutex<ApiCallStats>,
}

impl Transport<ReqwestBackend> {
    /// Transport over the production reqwest backend.
    pub fn connect(credential: &str, config: TransportConfig) -> TrackerResult<Self> {
        let backend = ReqwestBackend::new(config.timeout)?;
        Ok(Self::new(backend, credential, config))
    }
}

impl<B: HttpBackend> Transport<B> {
    pub fn new(backend: B, credential: &str, config: TransportConfig) -> Self {
        Self {
            backend,
            authorization: basic_auth(credential),
            config,
            stats: Mutex::new(ApiCallStats::default()),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Send a call and decode the JSON body. An empty body decodes to `{}`.
    pub async fn request(&self, call: Call) -> TrackerResult<Value> {
        let url = call.url.to_string();
        let response = self.execute(call).await?;
        decode_json(&url, &response.body)
    }

    /// Send a call and return the raw response (for callers that need headers).
    pub async fn execute(&self, call: Call) -> TrackerResult<WireResponse> {
        let method = call.method.to_string();
        let url = call.url.to_string();
        let request = WireRequest {
            method: call.method,
            url: call.url,
            authorization: self.authorization.clone(),
            if_match: call.if_match,
            payload: call.body.into_payload()?,
        };

        let retry = &self.config.retry;
        let mut attempts = 0;
        let mut last_status = None;
        let mut last_body = String::new();

        while retry.should_retry(attempts) {
            tokio::time::sleep(self.config.min_interval).await;
            let started = Instant::now();
            let outcome = self.backend.send(request.clone()).await;
            attempts += 1;

            match outcome {
                Ok(response) if response.is_success() => {
                    self.record_success(started.elapsed());
                    debug!(%method, %url, status = response.status, attempts, "Tracker call succeeded");
                    return Ok(response);
                }
                Ok(response) => match FailureClass::from_status(response.status) {
                    FailureClass::Permanent => {
                        return Err(TrackerError::rejected(
                            &method,
                            &url,
                            response.status,
                            response.reason,
                            &response.body,
                        ));
                    }
                    FailureClass::Transient => {
                        last_status = Some(response.status);
                        last_body = response.body;
                    }
                },
                Err(BackendError::Network(message)) => {
                    last_status = None;
                    last_body = message;
                }
            }

            if retry.should_retry(attempts) {
                let delay = retry.backoff_duration(attempts - 1);
                warn!(
                    %method,
                    %url,
                    status = ?last_status,
                    attempt = attempts,
                    delay_secs = delay.as_secs(),
                    "Transient tracker failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(TrackerError::retries_exhausted(
            method,
            url,
            attempts,
            last_status,
            &last_body,
        ))
    }

    /// Stats accumulated since the last [`take_stats`](Self::take_stats).
    pub fn stats(&self) -> ApiCallStats {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the accumulated stats and start a new operation scope.
    pub fn take_stats(&self) -> ApiCallStats {
        std::mem::take(&mut *self.stats.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn record_success(&self, elapsed: Duration) {
        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(elapsed);
    }
}

/// `Basic base64(":" + credential)`.
pub fn basic_auth(credential: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!(":{credential}")))
}

pub(crate) fn decode_json(url: &str, body: &str) -> TrackerResult<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(body).map_err(|e| TrackerError::malformed(url, e.to_string()))
}
