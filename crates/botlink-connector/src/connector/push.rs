//! Shared frame handling for the WebSocket server and client connectors.
//!
//! Both sides of a push transport speak the same envelopes once the socket
//! is open. Frames from one socket are handled strictly in arrival order by
//! the socket's reader loop; calls may be issued from any task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use botlink_types::CallMethod;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::EventSink;
use crate::error::{ConnectorError, Result};
use crate::pending::{CallTable, PendingCall, Resolution};
use crate::protocol::{self, InboundFrame, OutboundFrame};
use crate::status::{ConnectionStatus, StatusUpdate};

/// Writer half of the live socket, tagged with its connection id.
type Outbound = (u64, mpsc::UnboundedSender<String>);

#[derive(Debug)]
pub(crate) struct PushChannel {
    status: Arc<ConnectionStatus>,
    calls: CallTable,
    outbound: Mutex<Option<Outbound>>,
    next_conn: AtomicU64,
    events: EventSink,
    call_timeout: Option<Duration>,
}

impl PushChannel {
    pub(crate) fn new(events: EventSink, call_timeout: Option<Duration>) -> Self {
        Self {
            status: Arc::new(ConnectionStatus::new()),
            calls: CallTable::new(),
            outbound: Mutex::new(None),
            next_conn: AtomicU64::new(1),
            events,
            call_timeout,
        }
    }

    pub(crate) fn status(&self) -> &Arc<ConnectionStatus> {
        &self.status
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.calls.len()
    }

    /// Install the writer of a freshly opened socket and mark it connected.
    ///
    /// A previous socket, if any, loses its writer, its session and its
    /// pending calls.
    pub(crate) fn attach(&self, tx: mpsc::UnboundedSender<String>) -> u64 {
        let id = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let mut outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        if outbound.replace((id, tx)).is_some() {
            warn!(conn = id, "New socket replaces a live one");
            self.calls.fail_all(|| ConnectorError::TransportClosed);
        }
        self.status
            .update(StatusUpdate::session(None).with_connected(true));
        info!(conn = id, "Socket open, awaiting session");
        id
    }

    /// Release the socket `id` and tear down its session.
    ///
    /// Does nothing if a newer socket has replaced it.
    pub(crate) fn detach(&self, id: u64) {
        let mut outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        if outbound.as_ref().is_none_or(|(current, _)| *current != id) {
            return;
        }
        outbound.take();
        self.status.update(StatusUpdate::session(None));
        let failed = self.calls.fail_all(|| ConnectorError::TransportClosed);
        info!(conn = id, failed_calls = failed, "Socket closed");
    }

    /// Process one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed frames and for top-level error
    /// envelopes that no pending call can absorb.
    pub(crate) async fn handle_frame(&self, text: &str) -> Result<()> {
        let InboundFrame {
            correlation_id,
            data,
        } = InboundFrame::parse(text)?;
        let is_push = correlation_id == protocol::SENTINEL_ID;
        trace!(id = %correlation_id, "Frame received");

        let data = match protocol::validate_response(data) {
            Ok(data) => data,
            Err(e) if !is_push => {
                self.deliver(&correlation_id, Err(e));
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if let Some(session) = protocol::session_of(&data) {
            info!("Session established");
            self.status
                .update(StatusUpdate::session(Some(session.to_string())));
            return Ok(());
        }

        if !is_push && self.calls.contains(&correlation_id) {
            self.deliver(&correlation_id, Ok(data));
            return Ok(());
        }

        if protocol::is_event(&data) {
            if self.events.send(data).await.is_err() {
                warn!("Event receiver dropped, discarding event");
            }
            return Ok(());
        }

        warn!(id = %correlation_id, "Dropping unrecognized frame");
        Ok(())
    }

    fn deliver(&self, token: &str, result: Result<Value>) {
        match self.calls.resolve(token, result) {
            Resolution::Resolved => trace!(token, "Call resolved"),
            Resolution::Abandoned => debug!(token, "Caller gone before response arrived"),
            Resolution::Unknown => warn!(token, "Response for unknown call"),
        }
    }

    /// Send a command and wait for the matching response.
    ///
    /// Suspends until the session is available, so calls issued before the
    /// handshake completes are queued rather than dropped. A queued call
    /// outlives a socket that closes before authenticating and is sent on
    /// the next one.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::CapabilityUnsupported` for multipart calls,
    /// `ConnectorError::TransportClosed` if the socket goes away after the
    /// call was sent, or the remote error the response carries.
    pub(crate) async fn call(
        &self,
        method: CallMethod,
        command: &str,
        params: Value,
    ) -> Result<Value> {
        if method == CallMethod::Multipart {
            return Err(ConnectorError::unsupported(
                "multipart calls are not supported over a socket",
            ));
        }

        let pending = self.send_when_available(method, command, params).await?;
        debug!(token = pending.token(), command, "Call sent");

        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, pending.wait())
                .await
                .map_err(|_| ConnectorError::Timeout)?,
            None => pending.wait().await,
        }
    }

    /// Register and send a call on an authenticated socket.
    ///
    /// Registration and send happen under the writer lock, which `attach`
    /// and `detach` also hold while failing calls, so a call is only ever
    /// failed by the socket it was written to.
    async fn send_when_available(
        &self,
        method: CallMethod,
        command: &str,
        params: Value,
    ) -> Result<PendingCall> {
        loop {
            self.status.wait_for_available().await;

            let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
            let Some((_, tx)) = outbound.as_ref().filter(|_| self.status.available()) else {
                continue;
            };

            let pending = self.calls.register();
            let frame = OutboundFrame::new(
                pending.token(),
                command,
                method.sub_command(),
                params.clone(),
            );
            let text = serde_json::to_string(&frame)?;
            tx.send(text).map_err(|_| ConnectorError::TransportClosed)?;
            return Ok(pending);
        }
    }
}
