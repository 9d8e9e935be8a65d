// Endpoint Model
// Validated network addresses for cameras, MediaMTX and the signaling server

use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::net::IpAddr;
use std::sync::OnceLock;

pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Protocols an endpoint can be rendered with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Rtsp,
    Rtsps,
    Rtmp,
    Srt,
}

impl Protocol {
    pub const ALL: &'static [Protocol] = &[
        Protocol::Http,
        Protocol::Https,
        Protocol::Rtsp,
        Protocol::Rtsps,
        Protocol::Rtmp,
        Protocol::Srt,
    ];

    /// Control APIs (MediaMTX, signaling) only speak HTTP(S)
    pub const WEB: &'static [Protocol] = &[Protocol::Http, Protocol::Https];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Some(Protocol::Http),
            "https" => Some(Protocol::Https),
            "rtsp" => Some(Protocol::Rtsp),
            "rtsps" => Some(Protocol::Rtsps),
            "rtmp" => Some(Protocol::Rtmp),
            "srt" => Some(Protocol::Srt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Rtsp => "rtsp",
            Protocol::Rtsps => "rtsps",
            Protocol::Rtmp => "rtmp",
            Protocol::Srt => "srt",
        }
    }

    /// Port implied when none is rendered
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
            Protocol::Rtsp => 554,
            Protocol::Rtsps => 322,
            Protocol::Rtmp => 1935,
            Protocol::Srt => 8890,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn hostname_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("static hostname pattern"))
}

/// Accept IP literals and plain DNS-style names only
pub fn is_safe_host(value: &str) -> bool {
    value.parse::<IpAddr>().is_ok() || hostname_pattern().is_match(value)
}

fn valid_port(value: Option<i64>) -> Option<u16> {
    value
        .filter(|port| (1..=65535).contains(port))
        .map(|port| port as u16)
}

/// A network endpoint that always renders to a well-formed URL.
///
/// Invalid input never fails construction: a rejected protocol becomes `http`,
/// a rejected host becomes `127.0.0.1` and a rejected port is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "EndpointInput")]
pub struct EndpointAddress {
    protocol: Protocol,
    host: String,
    port: Option<u16>,
    path: String,
    allowed: Vec<Protocol>,
}

impl EndpointAddress {
    /// Build an HTTP(S)-only endpoint
    pub fn new(protocol: &str, host: &str, port: Option<i64>, path: &str) -> Self {
        Self::with_allowed(protocol, host, port, path, Protocol::WEB)
    }

    /// Build an endpoint restricted to the given protocol set
    pub fn with_allowed(
        protocol: &str,
        host: &str,
        port: Option<i64>,
        path: &str,
        allowed: &[Protocol],
    ) -> Self {
        let allowed = if allowed.is_empty() {
            Protocol::WEB.to_vec()
        } else {
            allowed.to_vec()
        };

        let protocol = Protocol::parse(protocol)
            .filter(|p| allowed.contains(p))
            .unwrap_or_else(|| {
                log::debug!("Rejected protocol '{protocol}', falling back to http");
                Protocol::Http
            });

        let host = if is_safe_host(host) {
            host.to_string()
        } else {
            log::debug!("Rejected host '{host}', falling back to {DEFAULT_HOST}");
            DEFAULT_HOST.to_string()
        };

        Self {
            protocol,
            host,
            port: valid_port(port),
            path: path.to_string(),
            allowed,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn allowed_protocols(&self) -> &[Protocol] {
        &self.allowed
    }

    fn authority(&self) -> String {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        match self.port {
            Some(port) => format!("{host}:{port}"),
            None => host,
        }
    }

    /// Full URL, e.g. `rtsp://10.0.0.5:554/cam/stream`
    pub fn url(&self) -> String {
        let path = self.path.trim_start_matches('/');
        if path.is_empty() {
            format!("{}://{}", self.protocol, self.authority())
        } else {
            format!("{}://{}/{}", self.protocol, self.authority(), path)
        }
    }

    /// Scheme and authority with a trailing slash, e.g. `http://cam.local:80/`
    pub fn root(&self) -> String {
        format!("{}://{}/", self.protocol, self.authority())
    }

    /// Apply the valid parts of an update; invalid parts leave the current value
    pub fn update(
        &mut self,
        protocol: Option<&str>,
        host: Option<&str>,
        port: Option<i64>,
        path: Option<&str>,
    ) {
        if let Some(protocol) = protocol
            .and_then(Protocol::parse)
            .filter(|p| self.allowed.contains(p))
        {
            self.protocol = protocol;
        }
        if let Some(host) = host.filter(|h| is_safe_host(h)) {
            self.host = host.to_string();
        }
        if let Some(port) = valid_port(port) {
            self.port = Some(port);
        }
        if let Some(path) = path {
            self.path = path.to_string();
        }
    }
}

impl Default for EndpointAddress {
    fn default() -> Self {
        Self::new("http", DEFAULT_HOST, None, "")
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

impl Serialize for EndpointAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        EndpointView {
            protocol: self.protocol,
            host: &self.host,
            port: self.port,
            path: &self.path,
            url: self.url(),
            root: self.root(),
        }
        .serialize(serializer)
    }
}

#[derive(Serialize)]
struct EndpointView<'a> {
    protocol: Protocol,
    host: &'a str,
    port: Option<u16>,
    path: &'a str,
    url: String,
    root: String,
}

/// Wire form accepted from callers; validated on conversion
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointInput {
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: Option<i64>,
    #[serde(default)]
    pub path: String,
}

impl From<EndpointInput> for EndpointAddress {
    fn from(input: EndpointInput) -> Self {
        EndpointAddress::with_allowed(
            &input.protocol,
            &input.host,
            input.port,
            &input.path,
            Protocol::ALL,
        )
    }
}
