//! Connector interface and transport implementations.
//!
//! A connector owns one transport, a [`ConnectionStatus`] and an immutable
//! config. The host starts its [`Connector::mainline`] once; upper layers
//! only ever use [`Connector::call`].

mod hook;
mod http_client;
mod http_server;
mod push;
mod ws_client;
mod ws_server;

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use botlink_types::{CallMethod, ConnectorKind};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{ConnectorError, Result};
use crate::status::ConnectionStatus;

pub use hook::{CallDelegate, DelegateSlot};
pub use http_client::HttpClientConnector;
pub use http_server::{HttpServerConnector, PushRejection};
pub use ws_client::WebsocketClientConnector;
pub use ws_server::WebsocketServerConnector;

/// Raw event payloads handed to the external event decoder.
pub type EventSink = mpsc::Sender<Value>;

/// Create an event sink and the receiver the event decoder reads from.
#[must_use]
pub fn event_channel(capacity: usize) -> (EventSink, mpsc::Receiver<Value>) {
    mpsc::channel(capacity)
}

/// Infrastructure a connector needs from its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// Routes mounted on the shared inbound HTTP server
    InboundHttp,
    /// The shared outbound HTTP/WebSocket client
    OutboundHttp,
}

/// What the host runtime lends to every mainline.
///
/// Shared clients are handed over at construction; see
/// [`crate::registry::BuildContext`].
#[derive(Debug, Clone, Default)]
pub struct Host {
    shutdown: CancellationToken,
}

impl Host {
    #[must_use]
    pub fn new(shutdown: CancellationToken) -> Self {
        Self { shutdown }
    }

    #[must_use]
    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn kind(&self) -> ConnectorKind;

    fn status(&self) -> Arc<ConnectionStatus>;

    fn dependencies(&self) -> &'static [Dependency] {
        crate::registry::dependencies(self.kind())
    }

    /// Routes this connector mounts on the shared inbound server.
    fn routes(self: Arc<Self>) -> Option<Router> {
        None
    }

    /// Accept a capable connector as the target of every `call`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::CapabilityUnsupported` for connectors that
    /// cannot be hooked.
    fn attach_delegate(&self, _delegate: Arc<dyn CallDelegate>) -> Result<()> {
        Err(ConnectorError::unsupported(format!(
            "{} connector cannot be hooked",
            self.kind()
        )))
    }

    /// Run the transport until it closes or the host shuts down.
    async fn mainline(self: Arc<Self>, host: Host) -> Result<()>;

    /// Invoke a remote command and wait for its result.
    async fn call(&self, method: CallMethod, command: &str, params: Value) -> Result<Value>;
}

/// Check an ordered `[key, value]` allow-list against a request.
pub(crate) fn allow_list_matches<'a>(
    allow: &[(String, String)],
    lookup: impl Fn(&str) -> Option<&'a str>,
) -> bool {
    allow
        .iter()
        .all(|(key, expected)| lookup(key) == Some(expected.as_str()))
}
