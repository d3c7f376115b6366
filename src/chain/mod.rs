//! Chain module - client configuration and the chain client seam
//!
//! This module provides:
//! - `ClientConfig`, the per-connection chain client configuration
//! - The `ChainClient` trait used for readiness probes and transfers
//! - An ethers-backed HTTP implementation with RPC failover

pub mod provider;

pub use provider::EthersChainClient;

use crate::config::Settings;
use crate::error::FlowResult;

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use std::collections::HashMap;
use uuid::Uuid;

/// A chain the client is configured for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSpec {
    pub id: u64,
    pub name: String,
    pub currency_symbol: String,
}

/// Transport used to reach a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Http { urls: Vec<String> },
}

/// Chain client configuration, created once per connection attempt.
///
/// A session owns its config for the lifetime of the attempt. Reconnecting
/// builds a new one; existing configs are never mutated.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    id: Uuid,
    project_id: String,
    chains: Vec<ChainSpec>,
    transports: HashMap<u64, Transport>,
}

impl ClientConfig {
    /// Build a fresh config from the process-wide settings
    pub fn new(settings: &Settings) -> Self {
        let network = &settings.network;
        let chain = ChainSpec {
            id: network.chain_id,
            name: network.name.clone(),
            currency_symbol: network.currency_symbol.clone(),
        };

        let mut transports = HashMap::new();
        transports.insert(
            chain.id,
            Transport::Http {
                urls: network.rpc_urls.clone(),
            },
        );

        Self {
            id: Uuid::new_v4(),
            project_id: settings.project.project_id.clone(),
            chains: vec![chain],
            transports,
        }
    }

    /// Unique id of this config instance
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn chains(&self) -> &[ChainSpec] {
        &self.chains
    }

    /// The chain used when no other chain is requested
    pub fn default_chain(&self) -> Option<&ChainSpec> {
        self.chains.first()
    }

    pub fn chain(&self, chain_id: u64) -> Option<&ChainSpec> {
        self.chains.iter().find(|c| c.id == chain_id)
    }

    pub fn transport(&self, chain_id: u64) -> Option<&Transport> {
        self.transports.get(&chain_id)
    }
}

/// A value transfer in the chain's smallest unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub chain_id: u64,
    pub to: Address,
    pub value: U256,
}

impl TransferRequest {
    /// The fixed transfer described by the settings
    pub fn from_settings(settings: &Settings) -> FlowResult<Self> {
        Ok(Self {
            chain_id: settings.network.chain_id,
            to: settings.transfer.recipient()?,
            value: settings.transfer.value()?,
        })
    }
}

/// Chain operations the connection flow depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Query the chain id. Used as the readiness probe.
    async fn chain_id(&self, config: &ClientConfig) -> FlowResult<u64>;

    /// Make `chain_id` the active chain for subsequent transactions
    async fn switch_chain(&self, config: &ClientConfig, chain_id: u64) -> FlowResult<()>;

    /// Submit a transfer and return its hash
    async fn send_transaction(
        &self,
        config: &ClientConfig,
        request: TransferRequest,
    ) -> FlowResult<H256>;
}
