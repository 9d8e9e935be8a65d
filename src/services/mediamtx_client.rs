// MediaMTX Client Service
// Manages one path on the MediaMTX control API (v3) with bounded retry

use reqwest::{header, Client, Method, Response};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::models::{EndpointAddress, ManagedPathConfig};

/// Status returned when no HTTP response was ever received
pub const TRANSPORT_FAILURE: u16 = 0;

const REQUEST_TIMEOUT_SECS: u64 = 10;
const RETRY_STATUSES: &[u16] = &[502, 503, 504];

/// Errors that stop a call before a usable response exists
#[derive(Debug, thiserror::Error)]
pub enum MediaMtxError {
    #[error("MediaMTX unreachable at {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("Failed to decode MediaMTX response: {0}")]
    Decode(String),
}

/// Retry budget for one outbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Sleep before the first retry; doubles for every further retry
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
        }
    }

    /// Sleep before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }

    /// Upper bound of time spent sleeping across the whole budget
    pub fn total_backoff(&self) -> Duration {
        (1..=self.max_retries)
            .map(|retry| self.backoff(retry))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(300))
    }
}

/// Connection options shared by every client a session creates
#[derive(Debug, Clone)]
pub struct MediaMtxOptions {
    pub token: Option<String>,
    pub verify_tls: bool,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for MediaMtxOptions {
    fn default() -> Self {
        Self {
            token: None,
            verify_tls: false,
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

/// Diagnostic view of a client
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMtxClientInfo {
    pub base_url: String,
    pub managed_path: String,
    pub token_provided: bool,
    pub verify_tls: bool,
}

/// Client bound to one MediaMTX server and one managed path.
///
/// Calls never surface transport errors: they degrade to [`TRANSPORT_FAILURE`]
/// (or `None` for calls returning a body) after the retry budget is spent.
pub struct MediaMtxClient {
    client: Client,
    base_url: String,
    managed_path: String,
    token: Option<String>,
    verify_tls: bool,
    retry: RetryPolicy,
}

impl MediaMtxClient {
    pub fn new(server: &EndpointAddress, managed_path: &str, options: &MediaMtxOptions) -> Self {
        let client = Client::builder()
            .timeout(options.timeout)
            .danger_accept_invalid_certs(!options.verify_tls)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Failed to build MediaMTX HTTP client, using defaults: {e}");
                Client::new()
            });

        Self {
            client,
            base_url: server.url().trim_end_matches('/').to_string(),
            managed_path: managed_path.trim_matches('/').to_string(),
            token: options.token.clone().filter(|t| !t.is_empty()),
            verify_tls: options.verify_tls,
            retry: options.retry,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn managed_path(&self) -> &str {
        &self.managed_path
    }

    pub fn info(&self) -> MediaMtxClientInfo {
        MediaMtxClientInfo {
            base_url: self.base_url.clone(),
            managed_path: self.managed_path.clone(),
            token_provided: self.token.is_some(),
            verify_tls: self.verify_tls,
        }
    }

    /// Send one request, retrying on 502/503/504 and on connection failures
    async fn send(
        &self,
        method: Method,
        api_path: &str,
        body: Option<&Map<String, Value>>,
    ) -> Result<Response, MediaMtxError> {
        let url = format!("{}/{}", self.base_url, api_path.trim_start_matches('/'));
        let mut retry = 0;

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header(header::CONTENT_TYPE, "application/json");
            if let Some(token) = &self.token {
                request = request.bearer_auth(token).query(&[("jwt", token)]);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            log::debug!("MediaMTX {method} {url} (attempt {})", retry + 1);
            let outcome = request.send().await;
            let budget_left = retry < self.retry.max_retries;

            match outcome {
                Ok(response) if budget_left && RETRY_STATUSES.contains(&response.status().as_u16()) => {
                    log::debug!("MediaMTX answered {} for {method} {url}, retrying", response.status());
                }
                Ok(response) => return Ok(response),
                Err(e) if budget_left => {
                    log::debug!("MediaMTX request {method} {url} failed, retrying: {e}");
                }
                Err(e) => {
                    log::warn!("MediaMTX request {method} {url} failed: {e}");
                    return Err(MediaMtxError::Transport {
                        url,
                        reason: e.to_string(),
                    });
                }
            }

            retry += 1;
            tokio::time::sleep(self.retry.backoff(retry)).await;
        }
    }

    async fn status_of(&self, method: Method, api_path: &str, body: Option<&Map<String, Value>>) -> u16 {
        match self.send(method, api_path, body).await {
            Ok(response) => response.status().as_u16(),
            Err(_) => TRANSPORT_FAILURE,
        }
    }

    /// POST /v3/config/paths/add/<path>
    pub async fn add(&self, config: &Map<String, Value>) -> u16 {
        let api_path = format!("v3/config/paths/add/{}", self.managed_path);
        self.status_of(Method::POST, &api_path, Some(config)).await
    }

    /// PATCH /v3/config/paths/patch/<path>
    pub async fn patch(&self, changes: &Map<String, Value>) -> u16 {
        let api_path = format!("v3/config/paths/patch/{}", self.managed_path);
        self.status_of(Method::PATCH, &api_path, Some(changes)).await
    }

    /// DELETE /v3/config/paths/delete/<path>
    pub async fn delete(&self) -> u16 {
        let api_path = format!("v3/config/paths/delete/{}", self.managed_path);
        self.status_of(Method::DELETE, &api_path, None).await
    }

    /// GET /v3/config/paths/list answers with 2xx
    pub async fn is_alive(&self) -> bool {
        let status = self.status_of(Method::GET, "v3/config/paths/list", None).await;
        (200..300).contains(&status)
    }

    /// GET /v3/paths/get/<path>; `None` on any non-200 answer or undecodable body
    pub async fn get_config(&self) -> Option<ManagedPathConfig> {
        let api_path = format!("v3/paths/get/{}", self.managed_path);
        let response = self.send(Method::GET, &api_path, None).await.ok()?;
        if response.status().as_u16() != 200 {
            log::debug!(
                "MediaMTX has no config for '{}' (status {})",
                self.managed_path,
                response.status()
            );
            return None;
        }

        match Self::decode_config(response).await {
            Ok(config) => Some(config),
            Err(e) => {
                log::warn!("{e}");
                None
            }
        }
    }

    async fn decode_config(response: Response) -> Result<ManagedPathConfig, MediaMtxError> {
        let value: Value = response
            .json()
            .await
            .map_err(|e| MediaMtxError::Decode(e.to_string()))?;
        ManagedPathConfig::from_value(value).map_err(|e| MediaMtxError::Decode(e.to_string()))
    }
}
