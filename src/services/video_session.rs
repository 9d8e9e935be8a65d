// Video Session Service
// Pairs a source camera with a virtual relay camera under one set of credentials

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{EndpointAddress, ManagedPathConfig, PathField, Protocol};
use crate::services::camera_resource::{relay_path, CameraResource, CameraSnapshot, CameraStatus};
use crate::services::ingest_command::{relay_url, IngestType};
use crate::services::relay_context::RelayContext;
use crate::services::session_credentials::{is_valid_uid, SessionCredentials, UidEntry, UidRole};
use crate::services::signaling_client::SignalingClient;

/// Everything a caller may supply when registering a camera
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    #[serde(default)]
    pub uid: Option<String>,
    /// Seed OTP; never accepted from the wire
    #[serde(skip)]
    pub otp: Option<String>,
    pub source_camera: EndpointAddress,
    #[serde(default)]
    pub source_camera_uid: Option<String>,
    #[serde(default)]
    pub virtual_camera_uid: Option<String>,
    #[serde(default)]
    pub linked_device: Option<String>,
    #[serde(default)]
    pub processing_type: IngestType,
    #[serde(default)]
    pub path_config: ManagedPathConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionRequestError {
    #[error("Invalid {field} '{value}': use letters, digits, '.', '_' or '-'")]
    InvalidUid { field: &'static str, value: String },
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn checked_uid(
    field: &'static str,
    value: Option<String>,
) -> Result<Option<String>, SessionRequestError> {
    match trimmed(value) {
        Some(uid) if !is_valid_uid(&uid) => {
            Err(SessionRequestError::InvalidUid { field, value: uid })
        }
        uid => Ok(uid),
    }
}

impl SessionRequest {
    /// Reject malformed UIDs and fill in every missing one, so the UIDs a
    /// session will claim are known before anything is provisioned
    pub fn resolve_ids(mut self) -> Result<Self, SessionRequestError> {
        let uid = checked_uid("uid", self.uid.take())?;
        let source_uid = checked_uid("sourceCameraUid", self.source_camera_uid.take())?;
        let virtual_uid = checked_uid("virtualCameraUid", self.virtual_camera_uid.take())?
            .unwrap_or_else(SessionCredentials::random_uid);
        let linked_device = checked_uid("linkedDevice", self.linked_device.take())?;

        self.uid = Some(uid.unwrap_or_else(SessionCredentials::random_uid));
        self.source_camera_uid = Some(source_uid.unwrap_or_else(SessionCredentials::random_uid));
        self.linked_device = Some(linked_device.unwrap_or_else(|| virtual_uid.clone()));
        self.virtual_camera_uid = Some(virtual_uid);
        Ok(self)
    }

    /// UIDs supplied so far: primary, source, virtual and linked device
    pub fn claimed_uids(&self) -> Vec<String> {
        [
            &self.uid,
            &self.source_camera_uid,
            &self.virtual_camera_uid,
            &self.linked_device,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect()
    }
}

/// Diagnostic view of a session; carries no OTP
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub uid: String,
    pub linked_device: String,
    pub processing_type: IngestType,
    pub streaming_port: u16,
    pub ready: bool,
    pub status: CameraStatus,
    pub virtual_stream_url: String,
    pub credentials: Vec<UidEntry>,
    pub source_camera: CameraSnapshot,
    pub virtual_camera: CameraSnapshot,
}

fn supplied(field: &str, value: Option<String>) -> Option<String> {
    let value = trimmed(value)?;
    if is_valid_uid(&value) {
        Some(value)
    } else {
        log::warn!("Ignoring invalid {field} '{value}', generating one");
        None
    }
}

pub struct VideoSession {
    credentials: SessionCredentials,
    linked_device: String,
    source: CameraResource,
    virtual_camera: CameraResource,
    streaming_port: u16,
    processing_type: IngestType,
    signaling: SignalingClient,
    status: CameraStatus,
}

impl VideoSession {
    /// Provision both paths, strictly in order. A failing step is recorded in
    /// the cameras' status and never rolled back; see [`VideoSession::check_status`].
    pub async fn create(request: SessionRequest, relay: &RelayContext) -> Self {
        let SessionRequest {
            uid,
            otp,
            source_camera,
            source_camera_uid,
            virtual_camera_uid,
            linked_device,
            processing_type,
            path_config,
        } = request;

        // Credentials and roster
        let mut credentials = SessionCredentials::new(supplied("uid", uid), otp);
        let source_uid = supplied("sourceCameraUid", source_camera_uid)
            .unwrap_or_else(SessionCredentials::random_uid);
        let virtual_uid = supplied("virtualCameraUid", virtual_camera_uid)
            .unwrap_or_else(SessionCredentials::random_uid);
        credentials.add_uid(&source_uid, UidRole::SourceCamera);
        credentials.add_uid(&virtual_uid, UidRole::VirtualCamera);
        let linked_device =
            supplied("linkedDevice", linked_device).unwrap_or_else(|| virtual_uid.clone());
        let otp = credentials.otp().to_string();
        let signaling = relay.signaling.clone();

        // Source camera: ingest the physical feed, unregister when it drops
        let mut source = CameraResource::create(
            &source_uid,
            &otp,
            &linked_device,
            source_camera,
            processing_type,
            &path_config,
            relay,
        )
        .await;
        let unregister_hook = signaling.hook_command(&signaling.unregister_url(&source_uid, &otp));
        source.install_ingest_hooks(&unregister_hook).await;

        // Virtual camera: loop-back relay of the source path
        let virtual_address = EndpointAddress::with_allowed(
            Protocol::Rtsp.as_str(),
            relay.mediamtx.host(),
            Some(i64::from(relay.streaming_port)),
            &relay_path(&virtual_uid),
            Protocol::ALL,
        );
        let mut virtual_camera = CameraResource::create(
            &virtual_uid,
            &otp,
            &linked_device,
            virtual_address,
            IngestType::Camera,
            &path_config,
            relay,
        )
        .await;
        virtual_camera
            .update_single_value(
                PathField::Source.key(),
                Value::String(relay_url(relay.streaming_port, &source_uid)),
            )
            .await;

        let mut hooks = Map::new();
        hooks.insert(
            PathField::RunOnReady.key().to_string(),
            Value::String(signaling.hook_command(&signaling.start_injection_url(&virtual_uid, &otp))),
        );
        hooks.insert(
            PathField::RunOnNotReady.key().to_string(),
            Value::String(signaling.hook_command(&signaling.stop_injection_url(&virtual_uid, &otp))),
        );
        virtual_camera.update_many_values(&hooks).await;

        let mut session = Self {
            credentials,
            linked_device,
            source,
            virtual_camera,
            streaming_port: relay.streaming_port,
            processing_type,
            signaling,
            status: CameraStatus {
                code: 0,
                message: String::new(),
            },
        };
        session.check_status();
        log::info!(
            "Session {} created (source {}, virtual {}): {}",
            session.uid(),
            session.source_uid(),
            session.virtual_uid(),
            session.status.message
        );
        session
    }

    pub fn uid(&self) -> &str {
        self.credentials.primary_uid()
    }

    pub fn otp(&self) -> &str {
        self.credentials.otp()
    }

    pub fn linked_device(&self) -> &str {
        &self.linked_device
    }

    pub fn credentials(&self) -> &SessionCredentials {
        &self.credentials
    }

    pub fn source_uid(&self) -> &str {
        self.source.uid()
    }

    pub fn virtual_uid(&self) -> &str {
        self.virtual_camera.uid()
    }

    pub fn source_camera(&self) -> &CameraResource {
        &self.source
    }

    pub fn virtual_camera(&self) -> &CameraResource {
        &self.virtual_camera
    }

    pub fn streaming_port(&self) -> u16 {
        self.streaming_port
    }

    pub fn processing_type(&self) -> IngestType {
        self.processing_type
    }

    /// URL downstream viewers attach to
    pub fn virtual_stream_url(&self) -> String {
        self.virtual_camera.address().url()
    }

    pub fn status_message(&self) -> &str {
        &self.status.message
    }

    pub fn ready(&self) -> bool {
        self.source.ready() && self.virtual_camera.ready()
    }

    /// 200 when both cameras are ready, otherwise 500 with both failures listed
    pub fn check_status(&mut self) -> u16 {
        self.status = if self.ready() {
            CameraStatus {
                code: 200,
                message: "Both cameras are ready".to_string(),
            }
        } else {
            let mut failures = Vec::new();
            for (label, camera) in [("Source", &self.source), ("Virtual", &self.virtual_camera)] {
                if !camera.ready() {
                    let status = camera.status();
                    failures.push(format!(
                        "{label} camera error ({}): {}",
                        status.code, status.message
                    ));
                }
            }
            CameraStatus {
                code: 500,
                message: failures.join("; "),
            }
        };
        self.status.code
    }

    /// Delete both paths. 200 only if both deletions succeeded; otherwise the
    /// first failing status. The session object stays usable.
    pub async fn remove_all_paths(&mut self) -> u16 {
        let source = self.source.remove().await;
        let virtual_status = self.virtual_camera.remove().await;
        let code = [source, virtual_status]
            .into_iter()
            .find(|status| !(200..300).contains(status))
            .unwrap_or(200);

        self.status = CameraStatus {
            code,
            message: if code == 200 {
                "All paths removed".to_string()
            } else {
                format!("Path removal incomplete (source {source}, virtual {virtual_status})")
            },
        };
        log::info!("Session {} paths removed: {}", self.uid(), self.status.message);
        code
    }

    /// Every UID this session holds, linked device included
    pub fn claimed_uids(&self) -> Vec<String> {
        let mut uids: Vec<String> = self.credentials.uids().iter().map(|e| e.uid.clone()).collect();
        uids.push(self.linked_device.clone());
        uids.dedup();
        uids
    }

    pub fn valid_credentials(&self, otp: &str, uid: &str) -> bool {
        self.credentials.valid(otp, uid)
    }

    /// Best-effort stop of the injection process on the virtual feed
    pub async fn stop_injection(&self) -> u16 {
        self.signaling
            .stop_injection(self.virtual_camera.uid(), self.credentials.otp())
            .await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            uid: self.uid().to_string(),
            linked_device: self.linked_device.clone(),
            processing_type: self.processing_type,
            streaming_port: self.streaming_port,
            ready: self.ready(),
            status: self.status.clone(),
            virtual_stream_url: self.virtual_stream_url(),
            credentials: self.credentials.uids().to_vec(),
            source_camera: self.source.snapshot(),
            virtual_camera: self.virtual_camera.snapshot(),
        }
    }
}
