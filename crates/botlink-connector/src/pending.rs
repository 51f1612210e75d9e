//! Correlation table for calls awaiting a response frame.
//!
//! Each outstanding call owns a unique token. The first frame carrying that
//! token resolves the call and removes it; later frames with the same token
//! are reported as [`Resolution::Unknown`] and never overwrite a result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{ConnectorError, Result};
use crate::protocol::SENTINEL_ID;

type Slot = oneshot::Sender<Result<Value>>;
type Slots = Mutex<HashMap<String, Slot>>;

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<String, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Outcome of delivering a response to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The waiting caller received the result
    Resolved,
    /// No call is waiting on this token (never issued, or already resolved)
    Unknown,
    /// The token was registered but its caller has gone away
    Abandoned,
}

#[derive(Debug, Default, Clone)]
pub struct CallTable {
    slots: Arc<Slots>,
}

impl CallTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new call under a fresh token.
    #[must_use]
    pub fn register(&self) -> PendingCall {
        let (tx, rx) = oneshot::channel();
        let mut slots = lock(&self.slots);
        let mut token = new_token();
        while token == SENTINEL_ID || slots.contains_key(&token) {
            token = new_token();
        }
        slots.insert(token.clone(), tx);
        trace!(token = %token, outstanding = slots.len(), "Registered pending call");

        PendingCall {
            token,
            rx,
            slots: Arc::downgrade(&self.slots),
        }
    }

    /// Deliver the result for `token`, removing it from the table.
    pub fn resolve(&self, token: &str, result: Result<Value>) -> Resolution {
        let Some(slot) = lock(&self.slots).remove(token) else {
            return Resolution::Unknown;
        };
        if slot.send(result).is_ok() {
            Resolution::Resolved
        } else {
            Resolution::Abandoned
        }
    }

    #[must_use]
    pub fn contains(&self, token: &str) -> bool {
        lock(&self.slots).contains_key(token)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.slots).is_empty()
    }

    /// Fail every outstanding call, returning how many were waiting.
    pub fn fail_all(&self, error: impl Fn() -> ConnectorError) -> usize {
        let drained: Vec<Slot> = lock(&self.slots).drain().map(|(_, slot)| slot).collect();
        let count = drained.len();
        for slot in drained {
            let _ = slot.send(Err(error()));
        }
        count
    }
}

/// A registered call waiting for its response.
///
/// Dropping it before resolution removes the token from the table.
#[derive(Debug)]
pub struct PendingCall {
    token: String,
    rx: oneshot::Receiver<Result<Value>>,
    slots: Weak<Slots>,
}

impl PendingCall {
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Wait for the response frame.
    ///
    /// # Errors
    ///
    /// Returns the error the call was resolved with, or
    /// `ConnectorError::TransportClosed` if the table went away.
    pub async fn wait(mut self) -> Result<Value> {
        (&mut self.rx)
            .await
            .unwrap_or(Err(ConnectorError::TransportClosed))
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if let Some(slots) = self.slots.upgrade() {
            lock(&slots).remove(&self.token);
        }
    }
}
