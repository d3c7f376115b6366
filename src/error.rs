//! Error types for the wallet connection flow

use thiserror::Error;

/// Main error type for the connection flow
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Client configuration not found")]
    ConfigMissing,

    #[error("Wallet not connected")]
    WalletNotConnected,

    #[error("Wallet connected but chain client is not ready")]
    WalletNotReady,

    #[error("Chain client not ready after {attempts} attempts")]
    ReadinessTimeout { attempts: u32 },

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Wallet modal error: {0}")]
    Modal(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Operation cancelled")]
    Cancelled,
}

impl FlowError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlowError::ChainConnection { .. } | FlowError::ReadinessTimeout { .. }
        )
    }

    /// Message shown to the person operating the wallet
    pub fn user_message(&self) -> &'static str {
        match self {
            FlowError::Config(_) => "The application is misconfigured.",
            FlowError::ConfigMissing => "No active wallet session. Connect your wallet first.",
            FlowError::WalletNotConnected => "Please connect your wallet.",
            FlowError::WalletNotReady => {
                "Your wallet is connected but the network is not ready yet. Try again shortly."
            }
            FlowError::ReadinessTimeout { .. } => {
                "The network did not respond in time. Please reconnect."
            }
            FlowError::TransactionFailed(_) => "The transaction could not be sent.",
            FlowError::ChainConnection { .. } => "Unable to reach the network.",
            FlowError::Modal(_) => "The wallet selector could not be opened.",
            FlowError::Wallet(_) => "No wallet key is available.",
            FlowError::InvalidStateTransition { .. } => {
                "That action is not available right now."
            }
            FlowError::Cancelled => "The wallet session was closed.",
        }
    }
}

/// Result type for flow operations
pub type FlowResult<T> = Result<T, FlowError>;
