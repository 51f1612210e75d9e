//! Delegation of `call` from an outbound-incapable connector to a capable one.
//!
//! Hooking is explicit: the incapable connector keeps a [`DelegateSlot`] and
//! forwards every call through it once a delegate is attached.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use botlink_types::CallMethod;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ConnectorError, Result};

/// The call surface a capable connector lends out.
#[async_trait]
pub trait CallDelegate: Send + Sync {
    async fn call(&self, method: CallMethod, command: &str, params: Value) -> Result<Value>;
}

/// Optional delegate held by a hookable connector.
#[derive(Default)]
pub struct DelegateSlot {
    inner: RwLock<Option<Arc<dyn CallDelegate>>>,
}

impl std::fmt::Debug for DelegateSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateSlot")
            .field("hooked", &self.is_hooked())
            .finish()
    }
}

impl DelegateSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, delegate: Arc<dyn CallDelegate>) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.is_some() {
            warn!("Replacing an existing call delegate");
        }
        *inner = Some(delegate);
        debug!("Call delegate attached");
    }

    #[must_use]
    pub fn get(&self) -> Option<Arc<dyn CallDelegate>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn is_hooked(&self) -> bool {
        self.get().is_some()
    }

    /// Forward to the delegate, or fail because none is attached.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::CapabilityUnsupported` when not hooked, and
    /// the delegate's error otherwise.
    pub async fn call(&self, method: CallMethod, command: &str, params: Value) -> Result<Value> {
        match self.get() {
            Some(delegate) => delegate.call(method, command, params).await,
            None => Err(ConnectorError::unsupported(format!(
                "cannot perform {command:?} on a receive-only connector, consider hooking an HTTP client connector"
            ))),
        }
    }
}
