// Camera Resource Service
// Lifecycle of one managed MediaMTX path and the ingestion hook feeding it

use serde::Serialize;
use serde_json::{Map, Value};

use crate::models::{EndpointAddress, ManagedPathConfig, PathField};
use crate::services::ingest_command::{IngestCommandBuilder, IngestError, IngestType};
use crate::services::mediamtx_client::{MediaMtxClient, MediaMtxClientInfo, TRANSPORT_FAILURE};
use crate::services::relay_context::RelayContext;

/// Reported when MediaMTX could not be reached at all
pub const STATUS_UNREACHABLE: u16 = 503;
/// Reported for local failures (bad config values, unsupported ingestion)
pub const STATUS_INTERNAL: u16 = 500;

/// Managed path name for a UID; also where the ingestion command publishes
pub fn relay_path(uid: &str) -> String {
    format!("{uid}/stream")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraStatus {
    pub code: u16,
    pub message: String,
}

impl CameraStatus {
    pub fn is_success(&self) -> bool {
        matches!(self.code, 200 | 201)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum PathState {
    /// Creation was attempted but never succeeded; the path is not ours
    Pending,
    Provisioned,
    Removed,
    /// Removed before creation ever succeeded
    Abandoned,
}

/// Diagnostic view; the OTP is masked everywhere it appears
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSnapshot {
    pub uid: String,
    pub managed_path: String,
    pub address: EndpointAddress,
    pub server: EndpointAddress,
    pub ingest_type: IngestType,
    pub ready: bool,
    pub synced: bool,
    pub state: String,
    pub status: CameraStatus,
    pub config: Map<String, Value>,
    pub client: MediaMtxClientInfo,
}

/// One managed path on MediaMTX.
///
/// `ready` only holds after the path was created and the most recent external
/// call answered 200/201. A failed patch leaves the local change in place and
/// clears `synced`; the next successful patch sends the whole configuration.
///
/// Only a path this resource created is ever patched or deleted. When creation
/// failed (the name may belong to someone else) updates stay local.
pub struct CameraResource {
    uid: String,
    otp: String,
    config: ManagedPathConfig,
    address: EndpointAddress,
    server: EndpointAddress,
    streaming_port: u16,
    ingest_type: IngestType,
    status: CameraStatus,
    creation_code: u16,
    synced: bool,
    state: PathState,
    client: MediaMtxClient,
    ingest: IngestCommandBuilder,
    secrets: Vec<String>,
}

impl CameraResource {
    /// Build the resource and create its path immediately. Never fails: a
    /// creation error is visible through `status()`.
    pub async fn create(
        uid: &str,
        otp: &str,
        linked_device: &str,
        address: EndpointAddress,
        ingest_type: IngestType,
        base_config: &ManagedPathConfig,
        relay: &RelayContext,
    ) -> Self {
        let managed_path = relay_path(uid);
        let ingest = IngestCommandBuilder::new(uid, linked_device, otp)
            .with_program(&relay.ffmpeg_path)
            .with_timeout(relay.ingest_timeout_us);
        let secrets = [relay.options.token.as_deref(), relay.signaling.token()]
            .into_iter()
            .flatten()
            .map(String::from)
            .collect();

        let mut camera = Self {
            uid: uid.to_string(),
            otp: otp.to_string(),
            config: base_config.clone(),
            address,
            server: relay.mediamtx.clone(),
            streaming_port: relay.streaming_port,
            ingest_type,
            status: CameraStatus {
                code: TRANSPORT_FAILURE,
                message: "Not created".to_string(),
            },
            creation_code: TRANSPORT_FAILURE,
            synced: false,
            state: PathState::Pending,
            client: MediaMtxClient::new(&relay.mediamtx, &managed_path, &relay.options),
            ingest,
            secrets,
        };
        camera.add_path().await;
        camera
    }

    async fn add_path(&mut self) -> u16 {
        let status = self.client.add(&self.config.to_map()).await;
        self.creation_code = match status {
            TRANSPORT_FAILURE => STATUS_UNREACHABLE,
            _ => status,
        };
        match status {
            200 | 201 => {
                self.state = PathState::Provisioned;
                self.synced = true;
                self.record(status, format!("Camera {} initialized", self.uid))
            }
            TRANSPORT_FAILURE => self.record(
                STATUS_UNREACHABLE,
                format!("MediaMTX unreachable while creating path for camera {}", self.uid),
            ),
            _ => self.record(
                status,
                format!("Failed to initialize camera {} (MediaMTX status {status})", self.uid),
            ),
        }
    }

    fn record(&mut self, code: u16, message: String) -> u16 {
        if matches!(code, 200 | 201) {
            log::debug!("[{}] {message}", self.uid);
        } else {
            log::warn!("[{}] {message} ({code})", self.uid);
        }
        self.status = CameraStatus { code, message };
        code
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn otp(&self) -> &str {
        &self.otp
    }

    pub fn managed_path(&self) -> &str {
        self.client.managed_path()
    }

    pub fn config(&self) -> &ManagedPathConfig {
        &self.config
    }

    pub fn address(&self) -> &EndpointAddress {
        &self.address
    }

    pub fn server_address(&self) -> &EndpointAddress {
        &self.server
    }

    pub fn ingest_type(&self) -> IngestType {
        self.ingest_type
    }

    pub fn status(&self) -> &CameraStatus {
        &self.status
    }

    pub fn ready(&self) -> bool {
        self.state == PathState::Provisioned && self.status.is_success()
    }

    /// Local configuration matches what MediaMTX last accepted
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Ingestion command for this camera's source
    pub fn run_on_ready_command(&self) -> Result<String, IngestError> {
        self.ingest
            .build(self.ingest_type, &self.address, self.streaming_port)
    }

    async fn push_config(&mut self, change: &str) -> u16 {
        match self.state {
            PathState::Provisioned => {}
            PathState::Pending => {
                self.synced = false;
                let message = format!(
                    "Path {} was never created; {change} changed locally only",
                    self.managed_path()
                );
                return self.record(self.creation_code, message);
            }
            PathState::Removed | PathState::Abandoned => {
                self.synced = false;
                let message = format!(
                    "Path {} was removed; {change} changed locally only",
                    self.managed_path()
                );
                return self.record(STATUS_INTERNAL, message);
            }
        }

        let status = self.client.patch(&self.config.to_map()).await;
        match status {
            200..=299 => {
                self.synced = true;
                self.record(status, format!("Updated {change}"))
            }
            TRANSPORT_FAILURE => {
                self.synced = false;
                self.record(
                    STATUS_UNREACHABLE,
                    format!("MediaMTX unreachable; {change} changed locally only"),
                )
            }
            _ => {
                self.synced = false;
                self.record(
                    status,
                    format!("MediaMTX rejected {change}; changed locally only"),
                )
            }
        }
    }

    /// Set one configuration key locally, then patch MediaMTX
    pub async fn update_single_value(&mut self, key: &str, value: Value) -> u16 {
        if let Err(e) = self.config.set(key, value) {
            return self.record(STATUS_INTERNAL, e.to_string());
        }
        let change = PathField::parse(key).map_or(key, |field| field.key()).to_string();
        self.push_config(&change).await
    }

    /// Set several keys locally (all or none), then patch MediaMTX once
    pub async fn update_many_values(&mut self, values: &Map<String, Value>) -> u16 {
        if let Err(e) = self.config.apply(values) {
            return self.record(STATUS_INTERNAL, e.to_string());
        }
        let keys: Vec<&str> = values.keys().map(String::as_str).collect();
        self.push_config(&keys.join(", ")).await
    }

    /// Install the ingestion command as `runOnReady` together with `on_not_ready`.
    /// An unsupported ingestion type is recorded as an internal error and nothing
    /// is sent.
    pub async fn install_ingest_hooks(&mut self, on_not_ready: &str) -> u16 {
        let command = match self.run_on_ready_command() {
            Ok(command) => command,
            Err(e) => return self.record(STATUS_INTERNAL, format!("{e}; hooks not installed")),
        };

        let mut hooks = Map::new();
        hooks.insert(PathField::RunOnReady.key().to_string(), Value::String(command));
        hooks.insert(
            PathField::RunOnNotReady.key().to_string(),
            Value::String(on_not_ready.to_string()),
        );
        self.update_many_values(&hooks).await
    }

    /// Delete the path. The resource counts as removed whatever MediaMTX answers.
    /// A path that was never created is left alone.
    pub async fn remove(&mut self) -> u16 {
        if matches!(self.state, PathState::Pending | PathState::Abandoned) {
            self.state = PathState::Abandoned;
            self.synced = false;
            return self.record(200, format!("Camera {} held no path; nothing to delete", self.uid));
        }

        let status = self.client.delete().await;
        self.state = PathState::Removed;
        self.synced = false;
        match status {
            200..=299 => self.record(status, format!("Camera {} removed", self.uid)),
            TRANSPORT_FAILURE => self.record(
                STATUS_UNREACHABLE,
                format!("MediaMTX unreachable while removing camera {}", self.uid),
            ),
            _ => self.record(
                status,
                format!("MediaMTX refused to remove camera {} (status {status})", self.uid),
            ),
        }
    }

    /// Replace the OTP stamped into future ingestion commands. MediaMTX is not
    /// patched; push `runOnReady` again to apply it remotely.
    pub fn change_otp(&mut self, otp: &str) -> u16 {
        if otp.is_empty() {
            return self.record(STATUS_INTERNAL, "Refusing to set an empty OTP".to_string());
        }
        self.otp = otp.to_string();
        self.ingest.update_metadata(None, None, Some(otp));
        200
    }

    /// Health check against MediaMTX; records 200 or 503
    pub async fn alive(&mut self) -> bool {
        let alive = self.client.is_alive().await;
        if alive {
            self.record(200, "MediaMTX reachable".to_string());
        } else {
            self.record(STATUS_UNREACHABLE, "MediaMTX not reachable".to_string());
        }
        alive
    }

    /// Replace the local configuration with what MediaMTX reports for a path
    /// this resource holds
    pub async fn refresh_config(&mut self) -> bool {
        if self.state != PathState::Provisioned {
            return false;
        }
        match self.client.get_config().await {
            Some(remote) => {
                self.config = remote;
                self.synced = true;
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> CameraSnapshot {
        let state = match self.state {
            PathState::Pending => "pending",
            PathState::Provisioned => "provisioned",
            PathState::Removed => "removed",
            PathState::Abandoned => "abandoned",
        };
        let mut secrets = vec![self.otp.as_str()];
        secrets.extend(self.secrets.iter().map(String::as_str));
        CameraSnapshot {
            uid: self.uid.clone(),
            managed_path: self.managed_path().to_string(),
            address: self.address.clone(),
            server: self.server.clone(),
            ingest_type: self.ingest_type,
            ready: self.ready(),
            synced: self.synced,
            state: state.to_string(),
            status: self.status.clone(),
            config: self.config.redacted(&secrets),
            client: self.client.info(),
        }
    }
}
