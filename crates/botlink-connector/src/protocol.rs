//! Gateway wire envelopes and status codes.
//!
//! Inbound frames are `{ "correlationId": .., "data": .. }` or a bare error
//! object `{ "code": .., "msg": .. }`. Outbound frames are
//! `{ "correlationId", "command", "subCommand"?, "content" }`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{ConnectorError, Result};

/// Correlation id of unsolicited pushes and of the handshake frame.
pub const SENTINEL_ID: &str = "#";

pub const SUCCESS: i64 = 0;
pub const INVALID_VERIFY_KEY: i64 = 1;
pub const BOT_NOT_FOUND: i64 = 2;
pub const INVALID_SESSION: i64 = 3;
pub const UNVERIFIED_SESSION: i64 = 4;
pub const TARGET_NOT_FOUND: i64 = 5;
pub const FILE_NOT_FOUND: i64 = 6;
pub const NO_PERMISSION: i64 = 10;
pub const ACCOUNT_MUTED: i64 = 20;
pub const MESSAGE_TOO_LONG: i64 = 30;
pub const INVALID_ARGUMENT: i64 = 400;
pub const REMOTE_EXCEPTION: i64 = 500;

/// Some gateways answer plain HTTP success with this instead of `0`.
const HTTP_OK: i64 = 200;

#[must_use]
pub fn describe_code(code: i64) -> &'static str {
    match code {
        SUCCESS => "Success",
        INVALID_VERIFY_KEY => "Invalid verify key",
        BOT_NOT_FOUND => "Bot account not found",
        INVALID_SESSION => "Invalid session key",
        UNVERIFIED_SESSION => "Session not verified",
        TARGET_NOT_FOUND => "Target not found",
        FILE_NOT_FOUND => "File not found",
        NO_PERMISSION => "No permission",
        ACCOUNT_MUTED => "Account muted",
        MESSAGE_TOO_LONG => "Message too long",
        INVALID_ARGUMENT => "Invalid argument",
        REMOTE_EXCEPTION => "Remote exception",
        _ => "Unknown error",
    }
}

/// Check a gateway response and unwrap its payload.
///
/// Objects carrying a non-zero `code` become errors. Objects with a `data`
/// field yield that field; anything else is returned unchanged.
///
/// # Errors
///
/// Returns `ConnectorError::Remote` or `ConnectorError::SessionInvalid` for
/// failure codes.
pub fn validate_response(value: Value) -> Result<Value> {
    let Value::Object(mut obj) = value else {
        return Ok(value);
    };

    if let Some(code) = obj.get("code").and_then(Value::as_i64)
        && code != SUCCESS
        && code != HTTP_OK
    {
        let message = obj
            .get("msg")
            .or_else(|| obj.get("message"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(ConnectorError::from_code(code, message));
    }

    match obj.remove("data") {
        Some(data) => Ok(data),
        None => Ok(Value::Object(obj)),
    }
}

fn sentinel() -> String {
    SENTINEL_ID.to_string()
}

/// A frame received over a push transport.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    #[serde(default = "sentinel", alias = "syncId")]
    pub correlation_id: String,
    #[serde(default)]
    pub data: Value,
}

impl InboundFrame {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::Json` for malformed JSON or a non-object
    /// frame, and the mapped remote error for a top-level error envelope.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(text)?;
        if raw.get("code").is_some() {
            validate_response(raw.clone())?;
        }
        Ok(serde_json::from_value(raw)?)
    }

    #[must_use]
    pub fn is_push(&self) -> bool {
        self.correlation_id == SENTINEL_ID
    }
}

/// A frame sent over a push transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundFrame {
    pub correlation_id: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_command: Option<String>,
    pub content: Value,
}

impl OutboundFrame {
    #[must_use]
    pub fn new(
        correlation_id: impl Into<String>,
        command: impl Into<String>,
        sub_command: Option<&str>,
        content: Value,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            command: command.into(),
            sub_command: sub_command.map(str::to_string),
            content,
        }
    }

    /// Handshake frame the server-side connector sends after accepting.
    #[must_use]
    pub fn verify(verify_key: &str, account: u64) -> Self {
        Self::new(
            SENTINEL_ID,
            "verify",
            None,
            json!({
                "verifyKey": verify_key,
                "sessionKey": null,
                "accountId": account,
            }),
        )
    }
}

/// Session key carried by a handshake reply.
#[must_use]
pub fn session_of(data: &Value) -> Option<&str> {
    data.get("session").and_then(Value::as_str)
}

/// Whether a payload carries an event type marker.
#[must_use]
pub fn is_event(data: &Value) -> bool {
    data.get("type").is_some_and(Value::is_string)
}
