// Settings Model
// Relay-wide configuration: MediaMTX, signaling server, ingestion and backend

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::endpoint::{EndpointAddress, Protocol};

fn default_protocol() -> String {
    "http".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_mediamtx_api_port() -> u16 {
    9997
}

fn default_mediamtx_streaming_port() -> u16 {
    8554
}

fn default_mediamtx_timeout_secs() -> u64 {
    10
}

fn default_mediamtx_max_retries() -> u32 {
    3
}

fn default_mediamtx_backoff_ms() -> u64 {
    300
}

fn default_signaling_port() -> u16 {
    8443
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ingest_timeout_us() -> u64 {
    5_000_000
}

fn default_backend_port() -> u16 {
    8010
}

fn default_log_retention_days() -> u32 {
    30
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySettings {
    // MediaMTX control API and relay
    #[serde(default = "default_protocol")]
    pub mediamtx_protocol: String,
    #[serde(default = "default_host")]
    pub mediamtx_host: String,
    #[serde(default = "default_mediamtx_api_port")]
    pub mediamtx_api_port: u16,
    #[serde(default = "default_mediamtx_streaming_port")]
    pub mediamtx_streaming_port: u16,
    #[serde(default)]
    pub mediamtx_token: String,
    #[serde(default)]
    pub mediamtx_verify_tls: bool,
    #[serde(default = "default_mediamtx_timeout_secs")]
    pub mediamtx_timeout_secs: u64,
    #[serde(default = "default_mediamtx_max_retries")]
    pub mediamtx_max_retries: u32,
    #[serde(default = "default_mediamtx_backoff_ms")]
    pub mediamtx_backoff_ms: u64,

    // Signaling server (injection start/stop, unregister hooks)
    #[serde(default = "default_protocol")]
    pub signaling_protocol: String,
    #[serde(default = "default_host")]
    pub signaling_host: String,
    #[serde(default = "default_signaling_port")]
    pub signaling_port: u16,
    #[serde(default)]
    pub signaling_token: String,

    // Ingestion
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ingest_timeout_us")]
    pub ingest_timeout_us: u64,

    // Local host server (HTTP)
    #[serde(default = "default_host")]
    pub backend_host: String,
    #[serde(default = "default_backend_port")]
    pub backend_port: u16,
    #[serde(default)]
    pub backend_token: String,

    // Log retention
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            mediamtx_protocol: default_protocol(),
            mediamtx_host: default_host(),
            mediamtx_api_port: default_mediamtx_api_port(),
            mediamtx_streaming_port: default_mediamtx_streaming_port(),
            mediamtx_token: String::new(),
            mediamtx_verify_tls: false,
            mediamtx_timeout_secs: default_mediamtx_timeout_secs(),
            mediamtx_max_retries: default_mediamtx_max_retries(),
            mediamtx_backoff_ms: default_mediamtx_backoff_ms(),
            signaling_protocol: default_protocol(),
            signaling_host: default_host(),
            signaling_port: default_signaling_port(),
            signaling_token: String::new(),
            ffmpeg_path: default_ffmpeg_path(),
            ingest_timeout_us: default_ingest_timeout_us(),
            backend_host: default_host(),
            backend_port: default_backend_port(),
            backend_token: String::new(),
            log_retention_days: default_log_retention_days(),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl RelaySettings {
    /// MediaMTX control API address
    pub fn mediamtx_address(&self) -> EndpointAddress {
        EndpointAddress::with_allowed(
            &self.mediamtx_protocol,
            &self.mediamtx_host,
            Some(i64::from(self.mediamtx_api_port)),
            "",
            Protocol::WEB,
        )
    }

    /// Signaling server address
    pub fn signaling_address(&self) -> EndpointAddress {
        EndpointAddress::with_allowed(
            &self.signaling_protocol,
            &self.signaling_host,
            Some(i64::from(self.signaling_port)),
            "",
            Protocol::WEB,
        )
    }

    pub fn mediamtx_token(&self) -> Option<String> {
        non_empty(&self.mediamtx_token)
    }

    pub fn signaling_token(&self) -> Option<String> {
        non_empty(&self.signaling_token)
    }

    pub fn backend_token(&self) -> Option<String> {
        non_empty(&self.backend_token)
    }

    pub fn mediamtx_timeout(&self) -> Duration {
        Duration::from_secs(self.mediamtx_timeout_secs.max(1))
    }

    pub fn mediamtx_backoff(&self) -> Duration {
        Duration::from_millis(self.mediamtx_backoff_ms)
    }
}
