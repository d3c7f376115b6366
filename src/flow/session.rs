//! Immutable session state
//!
//! Every change to a session produces a new `SessionState`; the flow swaps
//! the shared `Arc` rather than mutating fields in place.

use crate::chain::ClientConfig;
use crate::error::{FlowError, FlowResult};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionState {
    id: Uuid,
    config: Option<Arc<ClientConfig>>,
    account: Option<String>,
    ready: bool,
    opened_at: Option<DateTime<Utc>>,
}

impl Default for SessionState {
    /// The idle session: nothing connected, nothing configured
    fn default() -> Self {
        Self {
            id: Uuid::nil(),
            config: None,
            account: None,
            ready: false,
            opened_at: None,
        }
    }
}

impl SessionState {
    /// A new session owning `config`
    pub fn open(config: Arc<ClientConfig>) -> Self {
        Self {
            id: Uuid::new_v4(),
            config: Some(config),
            account: None,
            ready: false,
            opened_at: Some(Utc::now()),
        }
    }

    pub fn with_account(&self, address: impl Into<String>) -> Self {
        Self {
            account: Some(address.into()),
            ..self.clone()
        }
    }

    pub fn with_ready(&self) -> Self {
        Self {
            ready: true,
            ..self.clone()
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_idle(&self) -> bool {
        self.id.is_nil()
    }

    pub fn config(&self) -> Option<Arc<ClientConfig>> {
        self.config.clone()
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    /// Config to send with, if the session may send a transaction
    pub fn sendable_config(&self) -> FlowResult<Arc<ClientConfig>> {
        if self.account.is_none() {
            return Err(FlowError::WalletNotConnected);
        }
        let config = self.config.clone().ok_or(FlowError::ConfigMissing)?;
        if !self.ready {
            return Err(FlowError::WalletNotReady);
        }
        Ok(config)
    }
}
