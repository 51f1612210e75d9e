//! Session-keeping connectors for bot gateways.
//!
//! This crate keeps an authenticated session with a remote bot gateway over
//! one of four transports and exposes a single "invoke a command, await its
//! result" operation to upper layers.
//!
//! # Architecture
//!
//! - [`status`]: Connection and session state with awaitable predicates
//! - [`pending`]: Correlation table for calls awaiting a response
//! - [`protocol`]: Wire envelopes and gateway status codes
//! - [`connector`]: The `Connector` trait, the four transports and hooking
//! - [`registry`]: Config to connector mapping
//! - [`launcher`]: Host runtime that serves inbound routes and runs mainlines
//! - [`error`]: Error type and `Result` alias
//!
//! # Example
//!
//! ```no_run
//! use botlink_connector::{Connector, Launcher, LauncherConfig};
//! use botlink_types::{CallMethod, ConnectorConfig, WebsocketClientConfig};
//! use serde_json::json;
//!
//! # async fn example() -> botlink_connector::Result<()> {
//! let configs = vec![ConnectorConfig::WebsocketClient(WebsocketClientConfig::new(
//!     123456, "verify-key",
//! ))];
//! let (launcher, _events) = Launcher::new(LauncherConfig::default(), configs)?;
//! let caller = launcher.caller().expect("one connector configured");
//!
//! tokio::spawn(async move { launcher.run().await });
//! let about = caller.call(CallMethod::Get, "about", json!({})).await?;
//! println!("{about}");
//! # Ok(())
//! # }
//! ```

pub mod connector;
pub mod error;
pub mod launcher;
pub mod pending;
pub mod protocol;
pub mod registry;
pub mod status;

pub use connector::{
    CallDelegate, Connector, Dependency, EventSink, Host, HttpClientConnector,
    HttpServerConnector, PushRejection, WebsocketClientConnector, WebsocketServerConnector,
    event_channel,
};
pub use error::{ConnectorError, Result};
pub use launcher::{Launcher, LauncherConfig};
pub use pending::{CallTable, PendingCall, Resolution};
pub use registry::{AnyConnector, BuildContext, build_connector, config_from_value};
pub use status::{ConnectionStatus, StatusFrame, StatusTransition, StatusUpdate};
