//! Wallet connection flow
//!
//! The flow:
//! 1. Opens the wallet modal for a fresh client configuration
//! 2. Mirrors account-state events from the modal
//! 3. Captures the account on the first `connected` event and polls the
//!    chain client until it answers
//! 4. Sends the configured transfer once the session is ready

pub mod connection;
pub mod readiness;
pub mod session;

pub use connection::ConnectionFlow;
pub use readiness::{poll_until_ready, RetryPolicy};
pub use session::SessionState;

use crate::error::FlowError;
use crate::wallet::AccountStatus;

use std::fmt;

/// Lifecycle of a connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    Opening,
    WaitingForAccount,
    PollingReadiness,
    Ready,
}

impl FlowState {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: FlowState) -> bool {
        use FlowState::*;
        matches!(
            (self, next),
            (_, Idle)
                | (Idle, Opening)
                | (Opening, WaitingForAccount)
                | (WaitingForAccount, PollingReadiness)
                | (PollingReadiness, Ready)
                | (PollingReadiness, WaitingForAccount)
        )
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Connection state mirrored from the wallet modal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl From<AccountStatus> for ConnectionState {
    fn from(status: AccountStatus) -> Self {
        match status {
            AccountStatus::Connected => ConnectionState::Connected,
            AccountStatus::Connecting | AccountStatus::Reconnecting => ConnectionState::Connecting,
            AccountStatus::Disconnected => ConnectionState::Disconnected,
        }
    }
}

/// Outcome of readiness polling for the current session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessStatus {
    /// No session
    Idle,
    Pending,
    Ready,
    Failed(FlowError),
}
