//! HTTP server connector: receive-only endpoint for gateway event pushes.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use botlink_types::{CallMethod, ConnectorKind, HttpServerConfig};
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{CallDelegate, Connector, DelegateSlot, EventSink, Host, allow_list_matches};
use crate::error::Result;
use crate::status::{ConnectionStatus, StatusUpdate};

/// Header naming the bot account a push is meant for.
pub const ACCOUNT_HEADER: &str = "accountId";

/// Why an inbound push was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushRejection {
    WrongAccount,
    HeaderMismatch,
    MalformedBody,
}

impl PushRejection {
    #[must_use]
    pub fn status_code(self) -> StatusCode {
        match self {
            Self::WrongAccount | Self::HeaderMismatch => StatusCode::UNAUTHORIZED,
            Self::MalformedBody => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for PushRejection {
    fn into_response(self) -> Response {
        self.status_code().into_response()
    }
}

#[derive(Debug)]
pub struct HttpServerConnector {
    config: HttpServerConfig,
    status: Arc<ConnectionStatus>,
    events: EventSink,
    delegate: DelegateSlot,
}

impl HttpServerConnector {
    #[must_use]
    pub fn new(config: HttpServerConfig, events: EventSink) -> Self {
        Self {
            config,
            status: Arc::new(ConnectionStatus::new()),
            events,
            delegate: DelegateSlot::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HttpServerConfig {
        &self.config
    }

    fn authenticate(&self, headers: &HeaderMap) -> std::result::Result<(), PushRejection> {
        let account = headers
            .get(ACCOUNT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        if account != Some(self.config.account) {
            return Err(PushRejection::WrongAccount);
        }
        if !allow_list_matches(&self.config.headers, |key| {
            headers.get(key).and_then(|v| v.to_str().ok())
        }) {
            return Err(PushRejection::HeaderMismatch);
        }
        Ok(())
    }

    /// Authenticate one pushed request and hand its payload to the event sink.
    ///
    /// # Errors
    ///
    /// Returns the rejection reason; the status is left untouched.
    pub async fn receive_push(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> std::result::Result<(), PushRejection> {
        self.authenticate(headers)?;
        let payload: Value =
            serde_json::from_slice(body).map_err(|_| PushRejection::MalformedBody)?;

        if !self.status.snapshot().connected {
            info!(account = self.config.account, "First push received");
            self.status.update(StatusUpdate::connected(true));
        }
        if self.events.send(payload).await.is_err() {
            warn!("Event receiver dropped, discarding event");
        }
        Ok(())
    }
}

async fn receive(
    State(connector): State<Arc<HttpServerConnector>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match connector.receive_push(&headers, &body).await {
        Ok(()) => Json(json!({"command": "", "data": {}})).into_response(),
        Err(rejection) => {
            warn!(?rejection, "Rejected event push");
            rejection.into_response()
        }
    }
}

#[async_trait]
impl Connector for HttpServerConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::HttpServer
    }

    fn status(&self) -> Arc<ConnectionStatus> {
        self.status.clone()
    }

    fn routes(self: Arc<Self>) -> Option<Router> {
        let path = self.config.path.clone();
        Some(Router::new().route(&path, post(receive)).with_state(self))
    }

    fn attach_delegate(&self, delegate: Arc<dyn CallDelegate>) -> Result<()> {
        self.delegate.attach(delegate);
        Ok(())
    }

    async fn mainline(self: Arc<Self>, host: Host) -> Result<()> {
        debug!(path = %self.config.path, "Listening for event pushes");
        host.shutdown().cancelled().await;
        Ok(())
    }

    async fn call(&self, method: CallMethod, command: &str, params: Value) -> Result<Value> {
        self.delegate.call(method, command, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::event_channel;
    use crate::error::ConnectorError;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[tokio::test]
    async fn test_valid_push_marks_connected_and_forwards() {
        let (events, mut rx) = event_channel(4);
        let server = HttpServerConnector::new(HttpServerConfig::new(99), events);

        server
            .receive_push(&headers(&[("accountid", "99")]), br#"{"type":"FriendMessage"}"#)
            .await
            .unwrap();
        assert!(server.status().snapshot().connected);
        assert_eq!(rx.recv().await.unwrap()["type"], "FriendMessage");
    }

    #[tokio::test]
    async fn test_wrong_account_rejected() {
        let (events, mut rx) = event_channel(4);
        let server = HttpServerConnector::new(HttpServerConfig::new(99), events);

        let err = server
            .receive_push(&headers(&[("accountid", "100")]), b"{}")
            .await
            .unwrap_err();
        assert_eq!(err, PushRejection::WrongAccount);
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert!(!server.status().snapshot().connected);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_header_allow_list_enforced() {
        let (events, _rx) = event_channel(4);
        let mut config = HttpServerConfig::new(7);
        config.headers = vec![("x-secret".to_string(), "s3".to_string())];
        let server = HttpServerConnector::new(config, events);

        let err = server
            .receive_push(&headers(&[("accountid", "7"), ("x-secret", "nope")]), b"{}")
            .await
            .unwrap_err();
        assert_eq!(err, PushRejection::HeaderMismatch);
        assert!(!server.status().snapshot().connected);

        server
            .receive_push(&headers(&[("accountid", "7"), ("x-secret", "s3")]), b"{}")
            .await
            .unwrap();
        assert!(server.status().snapshot().connected);
    }

    #[tokio::test]
    async fn test_malformed_body_rejected() {
        let (events, _rx) = event_channel(4);
        let server = HttpServerConnector::new(HttpServerConfig::new(1), events);
        let err = server
            .receive_push(&headers(&[("accountid", "1")]), b"not json")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_call_without_hook_is_unsupported() {
        let (events, _rx) = event_channel(1);
        let server = HttpServerConnector::new(HttpServerConfig::new(1), events);
        let err = server
            .call(CallMethod::Get, "about", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::CapabilityUnsupported(_)));
    }
}
