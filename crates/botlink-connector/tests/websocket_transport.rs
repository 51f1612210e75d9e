//! Integration tests for the WebSocket connectors
//!
//! The gateway side of each socket is a plain tokio-tungstenite peer driven
//! by the test, so every frame on the wire can be asserted.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use botlink_connector::{
    Connector, ConnectorError, Host, StatusFrame, WebsocketClientConnector,
    WebsocketServerConnector, event_channel,
};
use botlink_types::{CallMethod, WebsocketClientConfig, WebsocketServerConfig};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_hdr_async, connect_async};
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

type Peer<S> = WebSocketStream<S>;

async fn next_json<S>(peer: &mut Peer<S>) -> Value
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    loop {
        let message = tokio::time::timeout(TIMEOUT, peer.next())
            .await
            .expect("frame should arrive")
            .expect("socket should stay open")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send_json<S>(peer: &mut Peer<S>, value: Value)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    peer.send(Message::Text(value.to_string())).await.unwrap();
}

async fn wait_status(
    connector: &dyn Connector,
    predicate: impl FnMut(&StatusFrame) -> bool,
) -> StatusFrame {
    tokio::time::timeout(TIMEOUT, connector.status().wait_for(predicate))
        .await
        .expect("status should change")
}

/// Accept one gateway-side socket, recording the request URI.
async fn accept_gateway(listener: &TcpListener) -> (Peer<TcpStream>, String) {
    let (stream, _) = listener.accept().await.unwrap();
    let uri = Arc::new(Mutex::new(String::new()));
    let seen = uri.clone();
    let peer = accept_hdr_async(stream, move |req: &Request, resp: Response| {
        *seen.lock().unwrap() = req.uri().to_string();
        Ok(resp)
    })
    .await
    .unwrap();
    let uri = uri.lock().unwrap().clone();
    (peer, uri)
}

fn ws_client(host: String) -> Arc<WebsocketClientConnector> {
    let (events, _rx) = event_channel(8);
    let mut config = WebsocketClientConfig::new(123, "secret");
    config.host = host;
    Arc::new(WebsocketClientConnector::new(config, events))
}

#[tokio::test]
async fn test_client_session_frame_makes_connector_available() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = ws_client(format!("http://{addr}"));
    let shutdown = CancellationToken::new();
    let mainline = tokio::spawn(client.clone().mainline(Host::new(shutdown.clone())));

    let (mut gateway, uri) = accept_gateway(&listener).await;
    assert_eq!(uri, "/all?accountId=123&verifyKey=secret");

    let frame = wait_status(client.as_ref(), |f| f.connected).await;
    assert!(frame.session_key.is_none());

    send_json(&mut gateway, json!({"correlationId": "#", "data": {"session": "abc"}})).await;
    let frame = wait_status(client.as_ref(), StatusFrame::available).await;
    assert_eq!(frame.session_key.as_deref(), Some("abc"));

    shutdown.cancel();
    tokio::time::timeout(TIMEOUT, mainline)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!client.status().snapshot().connected);
}

#[tokio::test]
async fn test_client_call_before_auth_is_queued_then_sent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = ws_client(format!("http://{addr}"));
    let shutdown = CancellationToken::new();
    tokio::spawn(client.clone().mainline(Host::new(shutdown.clone())));

    let (mut gateway, _) = accept_gateway(&listener).await;
    wait_status(client.as_ref(), |f| f.connected).await;

    let caller = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .call(CallMethod::RestGet, "messageList", json!({}))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!caller.is_finished());

    send_json(&mut gateway, json!({"correlationId": "#", "data": {"session": "abc"}})).await;
    let sent = next_json(&mut gateway).await;
    let id = sent["correlationId"].as_str().unwrap().to_string();
    assert_ne!(id, "#");
    assert_eq!(
        sent,
        json!({"correlationId": id, "command": "messageList", "subCommand": "get", "content": {}})
    );

    send_json(
        &mut gateway,
        json!({"correlationId": id, "data": {"code": 0, "msg": "", "data": [{"messageId": 1}]}}),
    )
    .await;
    let result = tokio::time::timeout(TIMEOUT, caller).await.unwrap().unwrap();
    assert_eq!(result.unwrap(), json!([{"messageId": 1}]));

    shutdown.cancel();
}

#[tokio::test]
async fn test_client_concurrent_calls_resolve_independently() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = ws_client(format!("http://{addr}"));
    let shutdown = CancellationToken::new();
    tokio::spawn(client.clone().mainline(Host::new(shutdown.clone())));

    let (mut gateway, _) = accept_gateway(&listener).await;
    send_json(&mut gateway, json!({"correlationId": "#", "data": {"session": "abc"}})).await;
    wait_status(client.as_ref(), StatusFrame::available).await;

    let callers: Vec<_> = (0..3)
        .map(|n| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .call(CallMethod::Post, "sendFriendMessage", json!({"target": n}))
                    .await
            })
        })
        .collect();

    let mut frames = Vec::new();
    for _ in 0..3 {
        frames.push(next_json(&mut gateway).await);
    }
    // Answer in reverse order; each caller still gets its own reply.
    for frame in frames.iter().rev() {
        let reply = json!({
            "correlationId": frame["correlationId"],
            "data": {"code": 0, "messageId": frame["content"]["target"]},
        });
        send_json(&mut gateway, reply).await;
    }

    for (n, caller) in callers.into_iter().enumerate() {
        let reply = tokio::time::timeout(TIMEOUT, caller).await.unwrap().unwrap().unwrap();
        assert_eq!(reply["messageId"], n);
    }

    shutdown.cancel();
}

#[tokio::test]
async fn test_client_disconnect_fails_pending_calls() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = ws_client(format!("http://{addr}"));
    let mainline = tokio::spawn(client.clone().mainline(Host::default()));

    let (mut gateway, _) = accept_gateway(&listener).await;
    send_json(&mut gateway, json!({"correlationId": "#", "data": {"session": "abc"}})).await;
    wait_status(client.as_ref(), StatusFrame::available).await;

    let caller = {
        let client = client.clone();
        tokio::spawn(async move { client.call(CallMethod::Get, "about", json!({})).await })
    };
    next_json(&mut gateway).await;
    gateway.close(None).await.unwrap();

    let result = tokio::time::timeout(TIMEOUT, caller).await.unwrap().unwrap();
    assert!(matches!(result, Err(ConnectorError::TransportClosed)));
    tokio::time::timeout(TIMEOUT, mainline)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let frame = client.status().snapshot();
    assert!(!frame.connected);
    assert!(frame.session_key.is_none());
}

#[tokio::test]
async fn test_client_forwards_pushed_events() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (events, mut rx) = event_channel(8);
    let mut config = WebsocketClientConfig::new(123, "secret");
    config.host = format!("http://{addr}");
    let client = Arc::new(WebsocketClientConnector::new(config, events));
    let shutdown = CancellationToken::new();
    tokio::spawn(client.clone().mainline(Host::new(shutdown.clone())));

    let (mut gateway, _) = accept_gateway(&listener).await;
    send_json(
        &mut gateway,
        json!({"correlationId": "#", "data": {"type": "GroupMessage", "messageChain": []}}),
    )
    .await;
    let event = tokio::time::timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(event["type"], "GroupMessage");

    shutdown.cancel();
}

async fn serve(connector: &Arc<WebsocketServerConnector>) -> String {
    let router = connector.clone().routes().expect("server mounts routes");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("ws://{addr}")
}

fn ws_server(config: WebsocketServerConfig) -> Arc<WebsocketServerConnector> {
    let (events, _rx) = event_channel(8);
    Arc::new(WebsocketServerConnector::new(config, events))
}

#[tokio::test]
async fn test_server_sends_verify_and_serves_calls() {
    let mut config = WebsocketServerConfig::new(123, "secret");
    config.path = "/ws".to_string();
    config.params = vec![("bot".to_string(), "123".to_string())];
    let server = ws_server(config);
    let base = serve(&server).await;

    let (mut gateway, _): (Peer<MaybeTlsStream<TcpStream>>, _) =
        connect_async(format!("{base}/ws?bot=123")).await.unwrap();

    let verify = next_json(&mut gateway).await;
    assert_eq!(
        verify,
        json!({
            "correlationId": "#",
            "command": "verify",
            "content": {"verifyKey": "secret", "sessionKey": null, "accountId": 123},
        })
    );

    send_json(&mut gateway, json!({"correlationId": "#", "data": {"session": "xyz"}})).await;
    wait_status(server.as_ref(), StatusFrame::available).await;

    let caller = {
        let server = server.clone();
        tokio::spawn(async move {
            server
                .call(CallMethod::RestPost, "groupConfig", json!({"target": 9}))
                .await
        })
    };
    let sent = next_json(&mut gateway).await;
    assert_eq!(sent["command"], "groupConfig");
    assert_eq!(sent["subCommand"], "update");
    assert_eq!(sent["content"]["target"], 9);

    send_json(
        &mut gateway,
        json!({
            "correlationId": sent["correlationId"],
            "data": {"code": 10, "msg": "no permission"},
        }),
    )
    .await;
    let err = tokio::time::timeout(TIMEOUT, caller).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, ConnectorError::Remote { code: 10, .. }));

    gateway.close(None).await.unwrap();
    wait_status(server.as_ref(), |f| !f.connected).await;
    assert!(server.status().session_key().is_none());
}

#[tokio::test]
async fn test_server_rejects_handshake_with_wrong_params() {
    let mut config = WebsocketServerConfig::new(123, "secret");
    config.params = vec![("bot".to_string(), "123".to_string())];
    config.headers = vec![("x-gateway".to_string(), "mirai".to_string())];
    let server = ws_server(config);
    let base = serve(&server).await;

    let err = connect_async(format!("{base}/?bot=999")).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("Expected HTTP rejection, got {other:?}"),
    }

    let err = connect_async(format!("{base}/?bot=123")).await.unwrap_err();
    assert!(matches!(err, tokio_tungstenite::tungstenite::Error::Http(_)));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(server.status().snapshot(), StatusFrame::default());
}
