//! Connection and session state shared by a connector and its observers.
//!
//! `available` holds exactly when the transport is connected and a session
//! key is present. Every update publishes the previous and current snapshot
//! together, so observers never see a half-applied update.

use tokio::sync::watch;
use tracing::debug;

/// Immutable snapshot of a connection's state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusFrame {
    pub session_key: Option<String>,
    pub connected: bool,
    pub succeeded: Option<bool>,
}

impl StatusFrame {
    #[must_use]
    pub fn available(&self) -> bool {
        self.connected && self.session_key.is_some()
    }
}

/// A single applied update, as seen by observers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusTransition {
    pub previous: StatusFrame,
    pub current: StatusFrame,
}

/// Any subset of the three status fields.
///
/// `session_key: Some(None)` is an explicit clear, `None` leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pub session_key: Option<Option<String>>,
    pub connected: Option<bool>,
    pub succeeded: Option<bool>,
}

impl StatusUpdate {
    #[must_use]
    pub fn session(session_key: Option<String>) -> Self {
        Self {
            session_key: Some(session_key),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn connected(connected: bool) -> Self {
        Self {
            connected: Some(connected),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn succeeded(succeeded: bool) -> Self {
        Self {
            succeeded: Some(succeeded),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_connected(mut self, connected: bool) -> Self {
        self.connected = Some(connected);
        self
    }

    fn apply(self, frame: &mut StatusFrame) {
        if let Some(session_key) = self.session_key {
            frame.connected = session_key.is_some();
            frame.session_key = session_key;
        }
        if let Some(connected) = self.connected {
            frame.connected = connected;
        }
        if let Some(succeeded) = self.succeeded {
            frame.succeeded = Some(succeeded);
        }
    }
}

#[derive(Debug)]
pub struct ConnectionStatus {
    tx: watch::Sender<StatusTransition>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStatus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StatusTransition::default());
        Self { tx }
    }

    /// Apply an update and notify every observer.
    ///
    /// When a session key is supplied, `connected` is recomputed from it
    /// before an explicit `connected` value is applied.
    pub fn update(&self, update: StatusUpdate) -> StatusTransition {
        self.update_from(|_| update)
    }

    /// Drop the session key without touching `connected`.
    ///
    /// Used when the gateway rejects a key while the transport stays up;
    /// a transport that has already closed stays disconnected.
    pub fn clear_session(&self) -> StatusTransition {
        self.update_from(|current| StatusUpdate::session(None).with_connected(current.connected))
    }

    /// Build the update from the current snapshot and apply it atomically.
    fn update_from(&self, build: impl FnOnce(&StatusFrame) -> StatusUpdate) -> StatusTransition {
        let mut applied = StatusTransition::default();
        self.tx.send_modify(|transition| {
            let previous = transition.current.clone();
            let mut current = previous.clone();
            build(&previous).apply(&mut current);
            *transition = StatusTransition { previous, current };
            applied = transition.clone();
        });
        debug!(
            connected = applied.current.connected,
            authenticated = applied.current.session_key.is_some(),
            "Connection status updated"
        );
        applied
    }

    #[must_use]
    pub fn snapshot(&self) -> StatusFrame {
        self.tx.borrow().current.clone()
    }

    #[must_use]
    pub fn available(&self) -> bool {
        self.tx.borrow().current.available()
    }

    #[must_use]
    pub fn session_key(&self) -> Option<String> {
        self.tx.borrow().current.session_key.clone()
    }

    /// Observe every subsequent transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StatusTransition> {
        self.tx.subscribe()
    }

    /// Suspend until `predicate` holds; resolves at once if it already does.
    pub async fn wait_for(&self, mut predicate: impl FnMut(&StatusFrame) -> bool) -> StatusFrame {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(|transition| predicate(&transition.current)).await {
            Ok(transition) => transition.current.clone(),
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => self.snapshot(),
        }
    }

    pub async fn wait_for_available(&self) -> StatusFrame {
        self.wait_for(StatusFrame::available).await
    }

    /// Suspend until the next update, whatever it changes.
    pub async fn wait_for_update(&self) -> StatusTransition {
        let mut rx = self.tx.subscribe();
        if rx.changed().await.is_err() {
            return self.tx.borrow().clone();
        }
        rx.borrow_and_update().clone()
    }
}
