//! Shared types for botlink components.
//!
//! This crate provides the configuration variants that select a connector,
//! the connector kind table and the call kinds understood by every transport.
//! All types are serializable so configs can be loaded straight from JSON.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Ordered list of `[key, value]` pairs that an inbound request must carry.
pub type AllowList = Vec<(String, String)>;

const DEFAULT_HOST: &str = "http://localhost:8080";
const DEFAULT_PATH: &str = "/";

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_path() -> String {
    DEFAULT_PATH.to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_fetch_count() -> u32 {
    10
}

/// How a command is invoked on the remote gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMethod {
    /// Plain GET with query parameters
    Get,
    /// Plain POST with a JSON body
    Post,
    /// REST-shaped read (`subCommand: "get"` on push transports)
    RestGet,
    /// REST-shaped write (`subCommand: "update"` on push transports)
    RestPost,
    /// Multipart upload, only available over HTTP
    Multipart,
}

impl CallMethod {
    /// Sub-command tag used by push transports for REST-shaped calls.
    #[must_use]
    pub fn sub_command(self) -> Option<&'static str> {
        match self {
            CallMethod::RestGet => Some("get"),
            CallMethod::RestPost => Some("update"),
            CallMethod::Get | CallMethod::Post | CallMethod::Multipart => None,
        }
    }
}

/// The closed set of connector implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    WebsocketServer,
    WebsocketClient,
    HttpServer,
    HttpClient,
}

impl ConnectorKind {
    pub const ALL: [ConnectorKind; 4] = [
        ConnectorKind::WebsocketServer,
        ConnectorKind::WebsocketClient,
        ConnectorKind::HttpServer,
        ConnectorKind::HttpClient,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectorKind::WebsocketServer => "websocket_server",
            ConnectorKind::WebsocketClient => "websocket_client",
            ConnectorKind::HttpServer => "http_server",
            ConnectorKind::HttpClient => "http_client",
        }
    }
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a connector kind name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(pub String);

impl fmt::Display for UnknownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown connector kind: {}", self.0)
    }
}

impl std::error::Error for UnknownKind {}

impl FromStr for ConnectorKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConnectorKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Connector configuration, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectorConfig {
    WebsocketServer(WebsocketServerConfig),
    WebsocketClient(WebsocketClientConfig),
    HttpServer(HttpServerConfig),
    HttpClient(HttpClientConfig),
}

impl ConnectorConfig {
    #[must_use]
    pub fn kind(&self) -> ConnectorKind {
        match self {
            ConnectorConfig::WebsocketServer(_) => ConnectorKind::WebsocketServer,
            ConnectorConfig::WebsocketClient(_) => ConnectorKind::WebsocketClient,
            ConnectorConfig::HttpServer(_) => ConnectorKind::HttpServer,
            ConnectorConfig::HttpClient(_) => ConnectorKind::HttpClient,
        }
    }
}

/// Accept WebSocket connections pushed by the gateway on `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsocketServerConfig {
    pub account: u64,
    pub verify_key: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Query parameters the upgrade request must carry
    #[serde(default)]
    pub params: AllowList,
    /// Headers the upgrade request must carry
    #[serde(default)]
    pub headers: AllowList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_timeout_secs: Option<u64>,
}

impl WebsocketServerConfig {
    #[must_use]
    pub fn new(account: u64, verify_key: impl Into<String>) -> Self {
        Self {
            account,
            verify_key: verify_key.into(),
            path: default_path(),
            params: Vec::new(),
            headers: Vec::new(),
            call_timeout_secs: None,
        }
    }

    #[must_use]
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }
}

/// Dial the gateway's WebSocket endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsocketClientConfig {
    pub account: u64,
    pub verify_key: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_timeout_secs: Option<u64>,
}

impl WebsocketClientConfig {
    #[must_use]
    pub fn new(account: u64, verify_key: impl Into<String>) -> Self {
        Self {
            account,
            verify_key: verify_key.into(),
            host: default_host(),
            call_timeout_secs: None,
        }
    }

    #[must_use]
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }
}

/// Receive events POSTed by the gateway on `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpServerConfig {
    pub account: u64,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub headers: AllowList,
}

impl HttpServerConfig {
    #[must_use]
    pub fn new(account: u64) -> Self {
        Self {
            account,
            path: default_path(),
            headers: Vec::new(),
        }
    }
}

/// Talk to the gateway over plain HTTP, polling for events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpClientConfig {
    pub account: u64,
    pub verify_key: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_fetch_count")]
    pub fetch_count: u32,
}

impl HttpClientConfig {
    #[must_use]
    pub fn new(account: u64, verify_key: impl Into<String>) -> Self {
        Self {
            account,
            verify_key: verify_key.into(),
            host: default_host(),
            poll_interval_ms: default_poll_interval_ms(),
            fetch_count: default_fetch_count(),
        }
    }

    /// Absolute URL of a gateway endpoint.
    #[must_use]
    pub fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.host.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
