//! WebSocket server connector: the gateway dials in and we verify.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use botlink_types::{CallMethod, ConnectorKind, WebsocketServerConfig};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::push::PushChannel;
use super::{CallDelegate, Connector, DelegateSlot, EventSink, Host, allow_list_matches};
use crate::error::Result;
use crate::protocol::OutboundFrame;
use crate::status::ConnectionStatus;

#[derive(Debug)]
pub struct WebsocketServerConnector {
    config: WebsocketServerConfig,
    push: PushChannel,
    delegate: DelegateSlot,
    shutdown: CancellationToken,
}

impl WebsocketServerConnector {
    #[must_use]
    pub fn new(config: WebsocketServerConfig, events: EventSink) -> Self {
        let push = PushChannel::new(events, config.call_timeout());
        Self {
            config,
            push,
            delegate: DelegateSlot::new(),
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &WebsocketServerConfig {
        &self.config
    }

    /// Whether an upgrade request carries every required header and param.
    fn accepts(&self, headers: &HeaderMap, params: &HashMap<String, String>) -> bool {
        allow_list_matches(&self.config.headers, |key| {
            headers.get(key).and_then(|v| v.to_str().ok())
        }) && allow_list_matches(&self.config.params, |key| {
            params.get(key).map(String::as_str)
        })
    }

    async fn serve_socket(self: Arc<Self>, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();

        let verify = OutboundFrame::verify(&self.config.verify_key, self.config.account);
        let verify = match serde_json::to_string(&verify) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode verify frame: {e}");
                return;
            }
        };
        if let Err(e) = sink.send(Message::Text(verify)).await {
            warn!("Failed to send verify frame: {e}");
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let conn = self.push.attach(tx);

        let writer = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if sink.send(Message::Text(text)).await.is_err() {
                    debug!("Socket send failed, peer gone");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        loop {
            let message = tokio::select! {
                () = self.shutdown.cancelled() => break,
                message = stream.next() => message,
            };
            match message {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = self.push.handle_frame(&text).await {
                        warn!("Bad frame from gateway: {e}");
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Socket error: {e}");
                    break;
                }
            }
        }

        self.push.detach(conn);
        writer.abort();
    }
}

async fn upgrade(
    State(connector): State<Arc<WebsocketServerConnector>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !connector.accepts(&headers, &params) {
        warn!(
            account = connector.config.account,
            "Rejected WebSocket handshake: headers or params do not match"
        );
        return StatusCode::UNAUTHORIZED.into_response();
    }
    info!(account = connector.config.account, "Gateway connected");
    ws.on_upgrade(move |socket| connector.serve_socket(socket))
}

#[async_trait]
impl Connector for WebsocketServerConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::WebsocketServer
    }

    fn status(&self) -> Arc<ConnectionStatus> {
        self.push.status().clone()
    }

    fn routes(self: Arc<Self>) -> Option<Router> {
        let path = self.config.path.clone();
        Some(Router::new().route(&path, get(upgrade)).with_state(self))
    }

    fn attach_delegate(&self, delegate: Arc<dyn CallDelegate>) -> Result<()> {
        self.delegate.attach(delegate);
        Ok(())
    }

    async fn mainline(self: Arc<Self>, host: Host) -> Result<()> {
        info!(path = %self.config.path, "Waiting for gateway connections");
        host.shutdown().cancelled().await;
        self.shutdown.cancel();
        Ok(())
    }

    async fn call(&self, method: CallMethod, command: &str, params: Value) -> Result<Value> {
        match self.delegate.get() {
            Some(delegate) => delegate.call(method, command, params).await,
            None => self.push.call(method, command, params).await,
        }
    }
}
