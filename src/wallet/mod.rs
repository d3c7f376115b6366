//! Wallet modal types and the modal seam
//!
//! The wallet modal owns wallet selection and the connection handshake. The
//! flow only sees it through `ModalFactory` and `WalletModal`, and learns
//! about connection changes from the account-state broadcast.

pub mod local;

pub use local::{LocalModalFactory, LocalWalletModal};

use crate::chain::{ChainSpec, ClientConfig};
use crate::config::{MetadataConfig, ModalFeatures, Settings, ThemeMode};
use crate::error::{FlowError, FlowResult};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Account status as reported by the wallet modal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Connected,
    Disconnected,
    Connecting,
    Reconnecting,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountStatus::Connected => "connected",
            AccountStatus::Disconnected => "disconnected",
            AccountStatus::Connecting => "connecting",
            AccountStatus::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Account-state event delivered by the modal subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub status: AccountStatus,
    pub address: Option<String>,
}

impl AccountState {
    pub fn connected(address: impl Into<String>) -> Self {
        Self {
            status: AccountStatus::Connected,
            address: Some(address.into()),
        }
    }

    pub fn with_status(status: AccountStatus) -> Self {
        Self {
            status,
            address: None,
        }
    }
}

/// Adapter binding the modal to a chain client configuration
#[derive(Debug, Clone)]
pub struct WalletAdapter {
    pub project_id: String,
    pub networks: Vec<ChainSpec>,
}

impl WalletAdapter {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            project_id: config.project_id().to_string(),
            networks: config.chains().to_vec(),
        }
    }
}

/// Everything needed to construct a wallet modal
#[derive(Debug, Clone)]
pub struct ModalOptions {
    pub project_id: String,
    pub networks: Vec<ChainSpec>,
    pub default_network: ChainSpec,
    pub adapter: WalletAdapter,
    pub metadata: MetadataConfig,
    pub theme_mode: ThemeMode,
    pub features: ModalFeatures,
    pub featured_wallet_ids: Vec<String>,
}

impl ModalOptions {
    /// Options for a modal scoped to `config`
    pub fn new(settings: &Settings, config: &ClientConfig) -> FlowResult<Self> {
        let default_network = config
            .default_chain()
            .cloned()
            .ok_or_else(|| FlowError::Config("Client config has no chains".to_string()))?;

        Ok(Self {
            project_id: config.project_id().to_string(),
            networks: config.chains().to_vec(),
            default_network,
            adapter: WalletAdapter::new(config),
            metadata: settings.project.metadata.clone(),
            theme_mode: settings.project.theme_mode,
            features: settings.modal.features,
            featured_wallet_ids: settings.modal.featured_wallet_ids.clone(),
        })
    }
}

/// A wallet selection dialog and its connection state
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletModal: Send + Sync {
    /// Present the modal. Returns once it is shown, not once the user is done.
    async fn open(&self) -> FlowResult<()>;

    /// Hide the modal without touching the connection
    async fn close(&self) -> FlowResult<()>;

    /// Drop the wallet connection
    async fn disconnect(&self) -> FlowResult<()>;

    /// Subscribe to account-state changes
    fn subscribe_account(&self) -> broadcast::Receiver<AccountState>;
}

/// Builds a modal for one connection attempt
#[cfg_attr(test, mockall::automock)]
pub trait ModalFactory: Send + Sync {
    fn create(&self, options: ModalOptions) -> FlowResult<Arc<dyn WalletModal>>;
}
