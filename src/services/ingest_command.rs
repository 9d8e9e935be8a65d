// Ingest Command Service
// Builds the ffmpeg directive that republishes a source feed onto the relay

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::EndpointAddress;

pub const DEFAULT_PROGRAM: &str = "ffmpeg";
pub const DEFAULT_TIMEOUT_US: u64 = 5_000_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("Ingestion type '{0}' is not implemented")]
    NotImplemented(IngestType),
}

/// Kind of feed a camera resource ingests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestType {
    /// Live device feed, read from its full URL
    #[default]
    Camera,
    /// File served over the network, read from root + path
    NetworkedFile,
    /// File on the relay host, read from the bare path
    LocalFile,
    /// Object-detection overlay; reserved
    Inference,
}

impl IngestType {
    pub const ALL: &'static [IngestType] = &[
        IngestType::Camera,
        IngestType::NetworkedFile,
        IngestType::LocalFile,
        IngestType::Inference,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IngestType::Camera => "camera",
            IngestType::NetworkedFile => "networked_file",
            IngestType::LocalFile => "local_file",
            IngestType::Inference => "inference",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

impl fmt::Display for IngestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Escape a value for use inside a double-quoted shell word
fn quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Relay URL a session UID publishes to on the local MediaMTX
pub fn relay_url(port: u16, uid: &str) -> String {
    format!("rtsp://127.0.0.1:{port}/{uid}/stream")
}

/// Holds the per-session metadata stamped into every synthesized command
#[derive(Clone)]
pub struct IngestCommandBuilder {
    program: String,
    timeout_us: u64,
    uid: String,
    linked_device: String,
    otp: String,
}

impl fmt::Debug for IngestCommandBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestCommandBuilder")
            .field("program", &self.program)
            .field("timeout_us", &self.timeout_us)
            .field("uid", &self.uid)
            .field("linked_device", &self.linked_device)
            .finish_non_exhaustive()
    }
}

impl IngestCommandBuilder {
    pub fn new(uid: &str, linked_device: &str, otp: &str) -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            timeout_us: DEFAULT_TIMEOUT_US,
            uid: uid.to_string(),
            linked_device: linked_device.to_string(),
            otp: otp.to_string(),
        }
    }

    /// Override the executable; blank values keep the current one
    pub fn with_program(mut self, program: &str) -> Self {
        if !program.trim().is_empty() {
            self.program = program.trim().to_string();
        }
        self
    }

    pub fn with_timeout(mut self, timeout_us: u64) -> Self {
        if timeout_us > 0 {
            self.timeout_us = timeout_us;
        }
        self
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn linked_device(&self) -> &str {
        &self.linked_device
    }

    pub fn timeout_us(&self) -> u64 {
        self.timeout_us
    }

    /// Replace whichever metadata values are supplied. Zero timeouts and empty
    /// strings are ignored.
    pub fn update_metadata(&mut self, timeout_us: Option<u64>, uid: Option<&str>, otp: Option<&str>) {
        if let Some(timeout_us) = timeout_us.filter(|t| *t > 0) {
            self.timeout_us = timeout_us;
        }
        if let Some(uid) = uid.filter(|u| !u.is_empty()) {
            self.uid = uid.to_string();
        }
        if let Some(otp) = otp.filter(|o| !o.is_empty()) {
            self.otp = otp.to_string();
        }
    }

    /// `-metadata` flags, rendered from the current values on every call
    pub fn metadata(&self) -> String {
        format!(
            "-metadata uid={} -metadata linked_device={} -metadata otp={}",
            quoted(&self.uid),
            quoted(&self.linked_device),
            quoted(&self.otp)
        )
    }

    fn input_path(ingest_type: IngestType, source: &EndpointAddress) -> Result<String, IngestError> {
        match ingest_type {
            IngestType::Camera => Ok(source.url()),
            IngestType::NetworkedFile => Ok(format!(
                "{}{}",
                source.root(),
                source.path().trim_start_matches('/')
            )),
            IngestType::LocalFile => Ok(source.path().to_string()),
            IngestType::Inference => Err(IngestError::NotImplemented(ingest_type)),
        }
    }

    /// Synthesize the full command for `source`, publishing to the relay on `port`
    pub fn build(
        &self,
        ingest_type: IngestType,
        source: &EndpointAddress,
        port: u16,
    ) -> Result<String, IngestError> {
        let input = Self::input_path(ingest_type, source)?;
        Ok(format!(
            "{} -timeout {} -re -stream_loop -1 -i {} -c copy {} -f rtsp {}",
            self.program,
            self.timeout_us,
            quoted(&input),
            self.metadata(),
            quoted(&relay_url(port, &self.uid))
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Protocol;

    fn camera_source() -> EndpointAddress {
        EndpointAddress::with_allowed("http", "cam.local", Some(80), "mjpeg", Protocol::ALL)
    }

    #[test]
    fn test_camera_command_targets_session_relay() {
        let builder = IngestCommandBuilder::new("abc123", "dev-1", "otp-secret-1");
        let command = builder
            .build(IngestType::Camera, &camera_source(), 8554)
            .unwrap();

        assert!(command.ends_with("-f rtsp \"rtsp://127.0.0.1:8554/abc123/stream\""));
        assert!(command.contains("-metadata uid=\"abc123\""));
        assert!(command.contains("-i \"http://cam.local:80/mjpeg\""));
        assert_eq!(
            command,
            "ffmpeg -timeout 5000000 -re -stream_loop -1 -i \"http://cam.local:80/mjpeg\" -c copy \
             -metadata uid=\"abc123\" -metadata linked_device=\"dev-1\" -metadata otp=\"otp-secret-1\" \
             -f rtsp \"rtsp://127.0.0.1:8554/abc123/stream\""
        );
    }

    #[test]
    fn test_input_path_per_type() {
        let builder = IngestCommandBuilder::new("u", "l", "o");
        let source =
            EndpointAddress::with_allowed("https", "files.local", None, "/media/clip.mp4", Protocol::ALL);

        let networked = builder.build(IngestType::NetworkedFile, &source, 8554).unwrap();
        assert!(networked.contains("-i \"https://files.local/media/clip.mp4\""));

        let local = builder.build(IngestType::LocalFile, &source, 8554).unwrap();
        assert!(local.contains("-i \"/media/clip.mp4\""));
    }

    #[test]
    fn test_inference_is_not_implemented() {
        let builder = IngestCommandBuilder::new("u", "l", "o");
        assert_eq!(
            builder.build(IngestType::Inference, &camera_source(), 8554),
            Err(IngestError::NotImplemented(IngestType::Inference))
        );
    }

    #[test]
    fn test_updated_metadata_is_never_stale() {
        let mut builder = IngestCommandBuilder::new("old-uid", "dev", "old-otp-value");
        builder.update_metadata(Some(1_000), Some("new-uid"), Some("new-otp-value"));
        let command = builder.build(IngestType::Camera, &camera_source(), 9000).unwrap();

        assert!(command.contains("-timeout 1000 "));
        assert!(command.contains("otp=\"new-otp-value\""));
        assert!(!command.contains("old-otp-value"));
        assert!(!command.contains("old-uid"));
        assert!(command.contains("rtsp://127.0.0.1:9000/new-uid/stream"));
    }

    #[test]
    fn test_empty_updates_are_ignored() {
        let mut builder = IngestCommandBuilder::new("uid", "dev", "otp-value-1");
        builder.update_metadata(Some(0), Some(""), None);
        assert_eq!(builder.uid(), "uid");
        assert_eq!(builder.timeout_us(), DEFAULT_TIMEOUT_US);
    }

    #[test]
    fn test_quotes_are_escaped() {
        let builder = IngestCommandBuilder::new("u", "dev\"; reboot", "o");
        assert!(builder.metadata().contains("linked_device=\"dev\\\"; reboot\""));
    }

    #[test]
    fn test_custom_program() {
        let builder = IngestCommandBuilder::new("u", "l", "o").with_program("/opt/ffmpeg/bin/ffmpeg");
        let command = builder.build(IngestType::Camera, &camera_source(), 8554).unwrap();
        assert!(command.starts_with("/opt/ffmpeg/bin/ffmpeg -timeout"));
    }

    #[test]
    fn test_type_parse() {
        assert_eq!(IngestType::parse("Local_File"), Some(IngestType::LocalFile));
        assert_eq!(IngestType::parse("yolo"), None);
        assert_eq!(IngestType::default(), IngestType::Camera);
    }
}
