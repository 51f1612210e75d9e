//! Mapping from connector configs to connector instances.

use std::sync::Arc;

use botlink_types::{ConnectorConfig, ConnectorKind};
use serde_json::Value;

use crate::connector::{
    Connector, Dependency, EventSink, HttpClientConnector, HttpServerConnector,
    WebsocketClientConnector, WebsocketServerConnector,
};
use crate::error::{ConnectorError, Result};

/// Shared resources handed to every connector at construction.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub events: EventSink,
    pub client: reqwest::Client,
}

impl BuildContext {
    #[must_use]
    pub fn new(events: EventSink) -> Self {
        Self {
            events,
            client: reqwest::Client::new(),
        }
    }
}

/// A built connector, keeping its concrete type for hook assembly.
#[derive(Debug, Clone)]
pub enum AnyConnector {
    WebsocketServer(Arc<WebsocketServerConnector>),
    WebsocketClient(Arc<WebsocketClientConnector>),
    HttpServer(Arc<HttpServerConnector>),
    HttpClient(Arc<HttpClientConnector>),
}

impl AnyConnector {
    #[must_use]
    pub fn as_dyn(&self) -> Arc<dyn Connector> {
        match self {
            Self::WebsocketServer(c) => c.clone(),
            Self::WebsocketClient(c) => c.clone(),
            Self::HttpServer(c) => c.clone(),
            Self::HttpClient(c) => c.clone(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ConnectorKind {
        match self {
            Self::WebsocketServer(_) => ConnectorKind::WebsocketServer,
            Self::WebsocketClient(_) => ConnectorKind::WebsocketClient,
            Self::HttpServer(_) => ConnectorKind::HttpServer,
            Self::HttpClient(_) => ConnectorKind::HttpClient,
        }
    }
}

/// Instantiate the connector a config selects.
#[must_use]
pub fn build_connector(config: ConnectorConfig, ctx: &BuildContext) -> AnyConnector {
    let events = ctx.events.clone();
    match config {
        ConnectorConfig::WebsocketServer(c) => {
            AnyConnector::WebsocketServer(Arc::new(WebsocketServerConnector::new(c, events)))
        }
        ConnectorConfig::WebsocketClient(c) => {
            AnyConnector::WebsocketClient(Arc::new(WebsocketClientConnector::new(c, events)))
        }
        ConnectorConfig::HttpServer(c) => {
            AnyConnector::HttpServer(Arc::new(HttpServerConnector::new(c, events)))
        }
        ConnectorConfig::HttpClient(c) => AnyConnector::HttpClient(Arc::new(
            HttpClientConnector::new(c, ctx.client.clone(), events),
        )),
    }
}

/// Parse a config whose `kind` names a connector.
///
/// # Errors
///
/// Returns `ConnectorError::UnknownConnectorKind` for an unrecognized `kind`
/// and `ConnectorError::Json` for a malformed body.
pub fn config_from_value(value: Value) -> Result<ConnectorConfig> {
    let kind = value
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| ConnectorError::UnknownConnectorKind("<missing>".to_string()))?;
    kind.parse::<ConnectorKind>()?;
    Ok(serde_json::from_value(value)?)
}

/// Infrastructure each connector kind needs from the host.
#[must_use]
pub fn dependencies(kind: ConnectorKind) -> &'static [Dependency] {
    match kind {
        ConnectorKind::WebsocketServer | ConnectorKind::HttpServer => &[Dependency::InboundHttp],
        ConnectorKind::WebsocketClient | ConnectorKind::HttpClient => &[Dependency::OutboundHttp],
    }
}
