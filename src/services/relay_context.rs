// Relay Context Service
// Connection details every session shares: MediaMTX, signaling and ingestion defaults

use crate::models::{EndpointAddress, RelaySettings};
use crate::services::mediamtx_client::{MediaMtxOptions, RetryPolicy};
use crate::services::signaling_client::SignalingClient;

/// Shared, read-only view of the relay infrastructure a session is provisioned against
#[derive(Debug, Clone)]
pub struct RelayContext {
    pub mediamtx: EndpointAddress,
    pub streaming_port: u16,
    pub options: MediaMtxOptions,
    pub signaling: SignalingClient,
    pub ffmpeg_path: String,
    pub ingest_timeout_us: u64,
}

impl RelayContext {
    pub fn from_settings(settings: &RelaySettings) -> Self {
        let options = MediaMtxOptions {
            token: settings.mediamtx_token(),
            verify_tls: settings.mediamtx_verify_tls,
            timeout: settings.mediamtx_timeout(),
            retry: RetryPolicy::new(settings.mediamtx_max_retries, settings.mediamtx_backoff()),
        };
        let signaling = SignalingClient::new(
            &settings.signaling_address(),
            settings.signaling_token(),
            settings.mediamtx_timeout(),
        );

        Self {
            mediamtx: settings.mediamtx_address(),
            streaming_port: settings.mediamtx_streaming_port,
            options,
            signaling,
            ffmpeg_path: settings.ffmpeg_path.clone(),
            ingest_timeout_us: settings.ingest_timeout_us,
        }
    }
}
