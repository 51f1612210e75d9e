//! HTTP client connector: verify/bind login, command calls and event polling.
//!
//! This is the only connector that can lend its call surface to others via
//! [`HttpClientConnector::hook`].

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use botlink_types::{CallMethod, ConnectorKind, HttpClientConfig};
use reqwest::RequestBuilder;
use reqwest::multipart::{Form, Part};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use super::{CallDelegate, Connector, EventSink, Host};
use crate::error::{ConnectorError, Result};
use crate::protocol::{self, validate_response};
use crate::status::{ConnectionStatus, StatusUpdate};

const SESSION_FIELD: &str = "sessionKey";

#[derive(Debug)]
pub struct HttpClientConnector {
    config: HttpClientConfig,
    status: RwLock<Arc<ConnectionStatus>>,
    client: reqwest::Client,
    events: EventSink,
    auth_lock: Mutex<()>,
}

impl HttpClientConnector {
    #[must_use]
    pub fn new(config: HttpClientConfig, client: reqwest::Client, events: EventSink) -> Self {
        Self {
            config,
            status: RwLock::new(Arc::new(ConnectionStatus::new())),
            client,
            events,
            auth_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Lend this client's call surface to `target` and share its status.
    ///
    /// After hooking, `target.call(..)` is served by this client and both
    /// report one session lifecycle.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::CapabilityUnsupported` if `target` cannot
    /// accept a delegate.
    pub fn hook(self: &Arc<Self>, target: &dyn Connector) -> Result<()> {
        target.attach_delegate(self.clone())?;
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = target.status();
        info!(target = %target.kind(), "HTTP client hooked");
        Ok(())
    }

    async fn request(&self, builder: RequestBuilder) -> Result<Value> {
        let response = builder.send().await?;
        let code = response.status();
        let body = response.bytes().await?;
        match serde_json::from_slice::<Value>(&body) {
            Ok(value) => validate_response(value),
            Err(_) if !code.is_success() => Err(ConnectorError::UnexpectedResponse(format!(
                "HTTP {code}: {}",
                String::from_utf8_lossy(&body)
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Log in with `verify` then `bind`, and publish the new session key.
    ///
    /// # Errors
    ///
    /// Returns the remote error of either step, or
    /// `ConnectorError::UnexpectedResponse` if `verify` issues no session.
    pub async fn http_auth(&self) -> Result<String> {
        let verified = self
            .request(
                self.client
                    .post(self.config.url("verify"))
                    .json(&json!({"verifyKey": self.config.verify_key})),
            )
            .await?;
        let session = protocol::session_of(&verified)
            .ok_or_else(|| {
                ConnectorError::UnexpectedResponse("verify reply carries no session".to_string())
            })?
            .to_string();

        self.request(self.client.post(self.config.url("bind")).json(&json!({
            "accountId": self.config.account,
            "sessionKey": session,
        })))
        .await?;

        self.status()
            .update(StatusUpdate::session(Some(session.clone())));
        info!(account = self.config.account, "HTTP session bound");
        Ok(session)
    }

    async fn login(&self) -> Result<String> {
        let _guard = self.auth_lock.lock().await;
        self.http_auth().await
    }

    /// Current session key, authenticating once if there is none.
    async fn ensure_session(&self) -> Result<String> {
        if let Some(key) = self.status().session_key() {
            return Ok(key);
        }
        let _guard = self.auth_lock.lock().await;
        if let Some(key) = self.status().session_key() {
            return Ok(key);
        }
        debug!("No session key, authenticating");
        self.http_auth().await
    }

    async fn invoke(&self, method: CallMethod, command: &str, params: Value) -> Result<Value> {
        let status = self.status();
        status.wait_for(|frame| frame.connected).await;
        let session = self.ensure_session().await?;

        let url = self.config.url(&command.replace('_', "/"));
        let builder = match method {
            CallMethod::Get | CallMethod::RestGet => {
                self.client.get(url).query(&query_pairs(params, &session)?)
            }
            CallMethod::Post | CallMethod::RestPost => {
                self.client.post(url).json(&with_session(params, &session)?)
            }
            CallMethod::Multipart => self
                .client
                .post(url)
                .multipart(multipart_form(params, &session)?),
        };
        trace!(command, ?method, "HTTP call");

        match self.request(builder).await {
            Err(e) if e.is_session_invalid() => {
                warn!(command, "Session rejected, clearing it: {e}");
                status.clear_session();
                Err(e)
            }
            other => other,
        }
    }

    /// Fetch one batch of queued events and forward them.
    async fn fetch_events(&self) -> Result<usize> {
        let session = self
            .status()
            .session_key()
            .ok_or_else(|| ConnectorError::from_code(protocol::INVALID_SESSION, ""))?;
        let data = self
            .request(self.client.get(self.config.url("fetchMessage")).query(&[
                ("sessionKey", session),
                ("count", self.config.fetch_count.to_string()),
            ]))
            .await?;

        let Value::Array(items) = data else {
            return Err(ConnectorError::UnexpectedResponse(format!(
                "fetchMessage returned {data}"
            )));
        };
        let count = items.len();
        for item in items {
            if self.events.send(item).await.is_err() {
                warn!("Event receiver dropped, discarding event");
            }
        }
        Ok(count)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn into_object(params: Value) -> Result<Map<String, Value>> {
    match params {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        other => Err(ConnectorError::InvalidParams(format!(
            "expected an object, got {other}"
        ))),
    }
}

/// Flatten params into query pairs; nested values are sent as JSON text.
fn query_pairs(params: Value, session: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = vec![(SESSION_FIELD.to_string(), session.to_string())];
    for (key, value) in into_object(params)? {
        if key == SESSION_FIELD || value.is_null() {
            continue;
        }
        let text = scalar_text(&value).unwrap_or_else(|| value.to_string());
        pairs.push((key, text));
    }
    Ok(pairs)
}

fn with_session(params: Value, session: &str) -> Result<Value> {
    let mut map = into_object(params)?;
    map.insert(SESSION_FIELD.to_string(), Value::String(session.to_string()));
    Ok(Value::Object(map))
}

fn byte_array(value: &Value) -> Option<Vec<u8>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

/// One multipart field: a scalar becomes a text part, a byte array or a
/// `{value, filename, contentType}` object becomes a file part.
fn form_part(key: &str, value: Value) -> Result<Part> {
    if let Some(text) = scalar_text(&value) {
        return Ok(Part::text(text));
    }
    if let Some(bytes) = byte_array(&value) {
        return Ok(Part::bytes(bytes).file_name(key.to_string()));
    }
    let Value::Object(mut file) = value else {
        return Err(ConnectorError::InvalidParams(format!(
            "unsupported multipart value for {key:?}"
        )));
    };

    let bytes = match file.remove("value") {
        Some(Value::String(s)) => s.into_bytes(),
        Some(other) => byte_array(&other).ok_or_else(|| {
            ConnectorError::InvalidParams(format!("{key:?}.value must be a string or bytes"))
        })?,
        None => {
            return Err(ConnectorError::InvalidParams(format!(
                "{key:?} is missing its value"
            )));
        }
    };
    let filename = file
        .get("filename")
        .and_then(Value::as_str)
        .map_or_else(|| key.to_string(), str::to_string);

    let mut part = Part::bytes(bytes).file_name(filename);
    if let Some(content_type) = file.get("contentType").and_then(Value::as_str) {
        part = part.mime_str(content_type)?;
    }
    Ok(part)
}

fn multipart_form(params: Value, session: &str) -> Result<Form> {
    let mut form = Form::new().text(SESSION_FIELD, session.to_string());
    for (key, value) in into_object(params)? {
        if key == SESSION_FIELD || value.is_null() {
            continue;
        }
        let part = form_part(&key, value)?;
        form = form.part(key, part);
    }
    Ok(form)
}

#[async_trait]
impl CallDelegate for HttpClientConnector {
    async fn call(&self, method: CallMethod, command: &str, params: Value) -> Result<Value> {
        self.invoke(method, command, params).await
    }
}

#[async_trait]
impl Connector for HttpClientConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::HttpClient
    }

    fn status(&self) -> Arc<ConnectionStatus> {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn mainline(self: Arc<Self>, host: Host) -> Result<()> {
        let status = self.status();
        if let Err(e) = self.login().await {
            error!(account = self.config.account, "HTTP authentication failed: {e}");
            status.update(StatusUpdate::session(None));
            return Ok(());
        }
        status.update(StatusUpdate::succeeded(true));

        let mut reauthenticated = false;
        while status.snapshot().connected {
            tokio::select! {
                () = host.shutdown().cancelled() => break,
                () = tokio::time::sleep(self.config.poll_interval()) => {}
            }

            match self.fetch_events().await {
                Ok(count) => {
                    reauthenticated = false;
                    if count > 0 {
                        trace!(count, "Fetched events");
                    }
                }
                Err(e) if e.is_session_invalid() && !reauthenticated => {
                    warn!("Session expired while polling, re-authenticating");
                    reauthenticated = true;
                    if let Err(e) = self.login().await {
                        error!("HTTP re-authentication failed: {e}");
                        status.update(StatusUpdate::session(None));
                        break;
                    }
                }
                Err(e) => {
                    error!("Polling failed: {e}");
                    status.update(StatusUpdate::session(None));
                    break;
                }
            }
        }
        info!(account = self.config.account, "HTTP polling stopped");
        Ok(())
    }

    async fn call(&self, method: CallMethod, command: &str, params: Value) -> Result<Value> {
        self.invoke(method, command, params).await
    }
}
