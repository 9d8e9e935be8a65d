// Signaling Client Service
// URLs and hook commands for the signaling server that drives stream injection

use reqwest::Client;
use std::time::Duration;

use crate::models::EndpointAddress;
use crate::services::mediamtx_client::TRANSPORT_FAILURE;

const START_INJECTION: &str = "TakatVideo/StartInjection";
const STOP_INJECTION: &str = "TakatVideo/StopInjection";
const DISCONNECT: &str = "TakatVideo/Disconnect";
const UNREGISTER: &str = "TakatVideo/Unregister";

/// Client for the signaling API.
///
/// Calls are best-effort: a failure is reported as a status code, never as an error.
#[derive(Debug, Clone)]
pub struct SignalingClient {
    client: Client,
    base: String,
    token: Option<String>,
}

impl SignalingClient {
    pub fn new(server: &EndpointAddress, token: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
            log::warn!("Failed to build signaling HTTP client, using defaults: {e}");
            Client::new()
        });

        // Drop the port when it is the protocol default
        let port = server
            .port()
            .filter(|port| *port != server.protocol().default_port())
            .map(i64::from);
        let base = EndpointAddress::with_allowed(
            server.protocol().as_str(),
            server.host(),
            port,
            "",
            server.allowed_protocols(),
        )
        .root();

        Self {
            client,
            base,
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn endpoint(&self, route: &str, uid: &str, otp: &str) -> String {
        format!(
            "{}{}?uid={}&otp={}",
            self.base,
            route,
            urlencoding::encode(uid),
            urlencoding::encode(otp)
        )
    }

    pub fn start_injection_url(&self, uid: &str, otp: &str) -> String {
        self.endpoint(START_INJECTION, uid, otp)
    }

    pub fn stop_injection_url(&self, uid: &str, otp: &str) -> String {
        self.endpoint(STOP_INJECTION, uid, otp)
    }

    pub fn disconnect_url(&self, uid: &str, otp: &str) -> String {
        self.endpoint(DISCONNECT, uid, otp)
    }

    pub fn unregister_url(&self, uid: &str, otp: &str) -> String {
        self.endpoint(UNREGISTER, uid, otp)
    }

    /// MediaMTX hook that calls `url` when the hook fires
    pub fn hook_command(&self, url: &str) -> String {
        match &self.token {
            Some(token) => format!("curl -fsS \"{url}\" -H \"Authorization: Bearer {token}\""),
            None => format!("curl -fsS \"{url}\""),
        }
    }

    async fn get(&self, url: &str) -> u16 {
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        match request.send().await {
            Ok(response) => response.status().as_u16(),
            Err(e) => {
                log::warn!("Signaling request to {} failed: {e}", self.base);
                TRANSPORT_FAILURE
            }
        }
    }

    pub async fn start_injection(&self, uid: &str, otp: &str) -> u16 {
        log::debug!("Starting injection for {uid}");
        self.get(&self.start_injection_url(uid, otp)).await
    }

    pub async fn stop_injection(&self, uid: &str, otp: &str) -> u16 {
        log::debug!("Stopping injection for {uid}");
        self.get(&self.stop_injection_url(uid, otp)).await
    }
}
