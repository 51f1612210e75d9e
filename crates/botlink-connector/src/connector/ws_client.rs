//! WebSocket client connector: we dial the gateway and it verifies us.

use std::sync::Arc;

use async_trait::async_trait;
use botlink_types::{CallMethod, ConnectorKind, WebsocketClientConfig};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::push::PushChannel;
use super::{CallDelegate, Connector, DelegateSlot, EventSink, Host};
use crate::error::{ConnectorError, Result};
use crate::status::ConnectionStatus;

#[derive(Debug)]
pub struct WebsocketClientConnector {
    config: WebsocketClientConfig,
    push: PushChannel,
    delegate: DelegateSlot,
}

impl WebsocketClientConnector {
    #[must_use]
    pub fn new(config: WebsocketClientConfig, events: EventSink) -> Self {
        let push = PushChannel::new(events, config.call_timeout());
        Self {
            config,
            push,
            delegate: DelegateSlot::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &WebsocketClientConfig {
        &self.config
    }

    /// `<host>/all?accountId=..&verifyKey=..` with the scheme moved to ws/wss.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::InvalidUrl` if the host cannot be parsed or
    /// uses an unsupported scheme.
    pub fn endpoint_url(&self) -> Result<Url> {
        let base = format!("{}/all", self.config.host.trim_end_matches('/'));
        let mut url =
            Url::parse(&base).map_err(|e| ConnectorError::InvalidUrl(format!("{base}: {e}")))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ConnectorError::InvalidUrl(format!(
                    "unsupported scheme {other:?} in {base}"
                )));
            }
        };
        url.set_scheme(scheme).map_err(|()| ConnectorError::InvalidUrl(base))?;

        url.query_pairs_mut()
            .append_pair("accountId", &self.config.account.to_string())
            .append_pair("verifyKey", &self.config.verify_key);
        Ok(url)
    }
}

#[async_trait]
impl Connector for WebsocketClientConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::WebsocketClient
    }

    fn status(&self) -> Arc<ConnectionStatus> {
        self.push.status().clone()
    }

    fn attach_delegate(&self, delegate: Arc<dyn CallDelegate>) -> Result<()> {
        self.delegate.attach(delegate);
        Ok(())
    }

    async fn mainline(self: Arc<Self>, host: Host) -> Result<()> {
        let url = self.endpoint_url()?;
        info!(host = %self.config.host, account = self.config.account, "Connecting to gateway");

        let (socket, _) = tokio::select! {
            () = host.shutdown().cancelled() => return Ok(()),
            connected = connect_async(url.as_str()) => connected?,
        };
        let (mut sink, mut stream) = socket.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let conn = self.push.attach(tx);

        let writer = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if sink.send(Message::Text(text)).await.is_err() {
                    debug!("Socket send failed, gateway gone");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let outcome = loop {
            let message = tokio::select! {
                () = host.shutdown().cancelled() => break Ok(()),
                message = stream.next() => message,
            };
            match message {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = self.push.handle_frame(&text).await {
                        warn!("Bad frame from gateway: {e}");
                    }
                }
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(ConnectorError::from(e)),
            }
        };

        self.push.detach(conn);
        writer.abort();
        info!(account = self.config.account, "Gateway connection closed");
        outcome
    }

    async fn call(&self, method: CallMethod, command: &str, params: Value) -> Result<Value> {
        match self.delegate.get() {
            Some(delegate) => delegate.call(method, command, params).await,
            None => self.push.call(method, command, params).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::event_channel;

    fn connector(host: &str) -> WebsocketClientConnector {
        let (events, _rx) = event_channel(1);
        let mut config = WebsocketClientConfig::new(42, "k y");
        config.host = host.to_string();
        WebsocketClientConnector::new(config, events)
    }

    #[test]
    fn test_endpoint_url_rewrites_scheme() {
        let url = connector("http://localhost:8080/").endpoint_url().unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/all?accountId=42&verifyKey=k+y");

        let url = connector("https://gw.example.com").endpoint_url().unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/all");
    }

    #[test]
    fn test_endpoint_url_keeps_base_path() {
        let url = connector("http://gw/api").endpoint_url().unwrap();
        assert_eq!(url.path(), "/api/all");
    }

    #[test]
    fn test_endpoint_url_rejects_bad_host() {
        assert!(matches!(
            connector("not a url").endpoint_url(),
            Err(ConnectorError::InvalidUrl(_))
        ));
        assert!(matches!(
            connector("ftp://gw").endpoint_url(),
            Err(ConnectorError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_unhooked_multipart_is_unsupported() {
        let client = connector("http://localhost:8080");
        let err = client
            .call(CallMethod::Multipart, "uploadImage", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::CapabilityUnsupported(_)));
    }
}
