//! Host runtime: builds connectors, wires hooks and runs their mainlines.
//!
//! Every connector that declares [`Dependency::InboundHttp`] shares one
//! axum server; every mainline runs as its own task until it returns or the
//! shutdown token fires.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use botlink_types::{ConnectorConfig, ConnectorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::connector::{Connector, Dependency, Host, event_channel};
use crate::error::Result;
use crate::registry::{AnyConnector, BuildContext, build_connector};

const DEFAULT_EVENT_BUFFER: usize = 256;

fn default_bind() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8081))
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

/// Settings for the shared host infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LauncherConfig {
    /// Address of the shared inbound HTTP server
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Capacity of the event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

pub struct Launcher {
    config: LauncherConfig,
    connectors: Vec<AnyConnector>,
    /// Index of the HTTP client lending its calls, if hooks were assembled
    hooked: Option<usize>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Launcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launcher")
            .field("bind", &self.config.bind)
            .field(
                "connectors",
                &self.connectors.iter().map(AnyConnector::kind).collect::<Vec<_>>(),
            )
            .field("hooked", &self.hooked)
            .finish_non_exhaustive()
    }
}

impl Launcher {
    /// Build every configured connector and assemble hooks.
    ///
    /// Returns the launcher and the receiver of all raw events.
    ///
    /// # Errors
    ///
    /// Returns an error if a hook cannot be attached.
    pub fn new(
        config: LauncherConfig,
        connectors: Vec<ConnectorConfig>,
    ) -> Result<(Self, mpsc::Receiver<Value>)> {
        let (events, rx) = event_channel(config.event_buffer);
        let ctx = BuildContext::new(events);
        let connectors: Vec<AnyConnector> = connectors
            .into_iter()
            .map(|c| build_connector(c, &ctx))
            .collect();
        let hooked = assemble_hooks(&connectors)?;

        let launcher = Self {
            config,
            connectors,
            hooked,
            shutdown: CancellationToken::new(),
        };
        Ok((launcher, rx))
    }

    #[must_use]
    pub fn connectors(&self) -> &[AnyConnector] {
        &self.connectors
    }

    /// The connector upper layers should send commands through.
    #[must_use]
    pub fn caller(&self) -> Option<Arc<dyn Connector>> {
        self.connectors.first().map(AnyConnector::as_dyn)
    }

    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[must_use]
    pub fn needs_inbound(&self) -> bool {
        self.connectors
            .iter()
            .any(|c| c.as_dyn().dependencies().contains(&Dependency::InboundHttp))
    }

    /// Routes of every inbound connector, merged into one router.
    #[must_use]
    pub fn inbound_router(&self) -> Option<Router> {
        self.connectors
            .iter()
            .filter_map(|c| c.as_dyn().routes())
            .reduce(Router::merge)
    }

    /// Bind the inbound server if needed, then run until done.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the inbound address cannot be bound.
    pub async fn run(&self) -> Result<()> {
        let listener = if self.needs_inbound() {
            Some(TcpListener::bind(self.config.bind).await?)
        } else {
            None
        };
        self.run_on(listener).await
    }

    /// Run with an already bound inbound listener.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the listener address cannot be read.
    pub async fn run_on(&self, listener: Option<TcpListener>) -> Result<()> {
        let host = Host::new(self.shutdown.clone());
        let mut tasks: JoinSet<(String, Result<()>)> = JoinSet::new();

        if let (Some(listener), Some(router)) = (listener, self.inbound_router()) {
            info!(addr = %listener.local_addr()?, "Inbound server listening");
            let shutdown = self.shutdown.clone();
            tasks.spawn(async move {
                let served = axum::serve(listener, router)
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await;
                ("inbound server".to_string(), served.map_err(Into::into))
            });
        }

        for (index, connector) in self.connectors.iter().enumerate() {
            if self.hooked == Some(index) {
                debug!(index, "Skipping mainline of hooked HTTP client");
                continue;
            }
            let connector = connector.as_dyn();
            let host = host.clone();
            tasks.spawn(async move {
                let name = format!("{} #{index}", connector.kind());
                (name, connector.mainline(host).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => debug!(task = %name, "Task finished"),
                Ok((name, Err(e))) => error!(task = %name, "Task failed: {e}"),
                Err(e) => error!("Task panicked: {e}"),
            }
        }
        info!("All connectors stopped");
        Ok(())
    }
}

/// Hook the first HTTP client into every push-only connector.
///
/// The client adopts the status of the first target; the others only
/// delegate their calls. Returns the hooked client's index.
fn assemble_hooks(connectors: &[AnyConnector]) -> Result<Option<usize>> {
    let Some((index, client)) = connectors.iter().enumerate().find_map(|(i, c)| match c {
        AnyConnector::HttpClient(client) => Some((i, client.clone())),
        _ => None,
    }) else {
        return Ok(None);
    };

    let mut targets = connectors
        .iter()
        .filter(|c| c.kind() != ConnectorKind::HttpClient)
        .map(AnyConnector::as_dyn);
    let Some(first) = targets.next() else {
        return Ok(None);
    };

    client.hook(first.as_ref())?;
    for target in targets {
        target.attach_delegate(client.clone())?;
    }
    info!(index, "HTTP client serves calls for push connectors");
    Ok(Some(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use botlink_types::{HttpClientConfig, HttpServerConfig, WebsocketClientConfig};
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config: LauncherConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, LauncherConfig::default());
        assert_eq!(config.bind.port(), 8081);
    }

    #[test]
    fn test_http_client_alone_is_not_hooked() {
        let (launcher, _rx) = Launcher::new(
            LauncherConfig::default(),
            vec![ConnectorConfig::HttpClient(HttpClientConfig::new(1, "k"))],
        )
        .unwrap();
        assert_eq!(launcher.hooked, None);
        assert!(!launcher.needs_inbound());
        assert!(launcher.inbound_router().is_none());
    }

    #[test]
    fn test_http_client_hooked_into_push_connectors() {
        let (launcher, _rx) = Launcher::new(
            LauncherConfig::default(),
            vec![
                ConnectorConfig::HttpServer(HttpServerConfig::new(1)),
                ConnectorConfig::HttpClient(HttpClientConfig::new(1, "k")),
                ConnectorConfig::WebsocketClient(WebsocketClientConfig::new(1, "k")),
            ],
        )
        .unwrap();
        assert_eq!(launcher.hooked, Some(1));
        assert!(launcher.needs_inbound());

        let server = launcher.connectors()[0].as_dyn();
        let client = launcher.connectors()[1].as_dyn();
        assert!(Arc::ptr_eq(&server.status(), &client.status()));
        assert_eq!(
            launcher.caller().map(|c| c.kind()),
            Some(ConnectorKind::HttpServer)
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (launcher, _rx) = Launcher::new(
            LauncherConfig::default(),
            vec![ConnectorConfig::HttpServer(HttpServerConfig::new(1))],
        )
        .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = launcher.shutdown_token();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.cancel();
        });
        tokio::time::timeout(Duration::from_secs(5), launcher.run_on(Some(listener)))
            .await
            .expect("launcher should stop after shutdown")
            .unwrap();
        stopper.await.unwrap();
    }
}
