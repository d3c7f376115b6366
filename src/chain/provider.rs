//! Ethers-backed chain client with multi-RPC failover

use super::{ChainClient, ClientConfig, Transport, TransferRequest};
use crate::error::{FlowError, FlowResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// HTTP chain client signing with a local wallet
pub struct EthersChainClient {
    /// Signer used for submitted transactions
    wallet: LocalWallet,
    /// Upper bound on a single RPC round trip
    request_timeout: Duration,
    /// Client config and chain selected by the last successful `switch_chain`
    active_chain: RwLock<Option<(Uuid, u64)>>,
}

impl EthersChainClient {
    /// Create a new chain client
    pub fn new(wallet: LocalWallet, request_timeout: Duration) -> Self {
        Self {
            wallet,
            request_timeout,
            active_chain: RwLock::new(None),
        }
    }

    /// Address transactions are sent from
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Build HTTP providers for every configured RPC URL of a chain
    fn http_providers(
        &self,
        config: &ClientConfig,
        chain_id: u64,
    ) -> FlowResult<Vec<Provider<Http>>> {
        let Some(Transport::Http { urls }) = config.transport(chain_id) else {
            return Err(FlowError::ChainConnection {
                chain_id,
                message: "No transport configured".to_string(),
            });
        };

        let mut providers = Vec::new();
        for url in urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    providers.push(provider.interval(Duration::from_millis(100)));
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if providers.is_empty() {
            return Err(FlowError::ChainConnection {
                chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(providers)
    }

    /// Query the chain id, failing over across providers
    async fn query_chain_id(&self, config: &ClientConfig, chain_id: u64) -> FlowResult<u64> {
        for provider in self.http_providers(config, chain_id)? {
            match timeout(self.request_timeout, provider.get_chainid()).await {
                Ok(Ok(id)) => return Ok(id.as_u64()),
                Ok(Err(e)) => {
                    warn!("Failed to get chain id from chain {}: {}", chain_id, e);
                }
                Err(_) => {
                    warn!("Chain id request timed out for chain {}", chain_id);
                }
            }
        }

        Err(FlowError::ChainConnection {
            chain_id,
            message: "All providers failed".to_string(),
        })
    }
}

#[async_trait]
impl ChainClient for EthersChainClient {
    async fn chain_id(&self, config: &ClientConfig) -> FlowResult<u64> {
        let chain = config
            .default_chain()
            .ok_or_else(|| FlowError::Config("Client config has no chains".to_string()))?;

        self.query_chain_id(config, chain.id).await
    }

    async fn switch_chain(&self, config: &ClientConfig, chain_id: u64) -> FlowResult<()> {
        if config.chain(chain_id).is_none() {
            return Err(FlowError::ChainConnection {
                chain_id,
                message: "Chain not configured".to_string(),
            });
        }

        let remote = self.query_chain_id(config, chain_id).await?;
        if remote != chain_id {
            return Err(FlowError::ChainConnection {
                chain_id,
                message: format!("RPC endpoint reports chain {}", remote),
            });
        }

        *self.active_chain.write().await = Some((config.id(), chain_id));
        info!("Switched to chain {} (config {})", chain_id, config.id());
        Ok(())
    }

    async fn send_transaction(
        &self,
        config: &ClientConfig,
        request: TransferRequest,
    ) -> FlowResult<H256> {
        let chain_id = request.chain_id;
        if *self.active_chain.read().await != Some((config.id(), chain_id)) {
            return Err(FlowError::ChainConnection {
                chain_id,
                message: "Chain is not the active chain".to_string(),
            });
        }

        let provider = self
            .http_providers(config, chain_id)?
            .into_iter()
            .next()
            .ok_or(FlowError::ChainConnection {
                chain_id,
                message: "No valid RPC providers".to_string(),
            })?;

        let client = SignerMiddleware::new(provider, self.wallet.clone().with_chain_id(chain_id));
        let tx = TransactionRequest::new()
            .from(self.wallet.address())
            .to(request.to)
            .value(request.value);

        debug!(
            "Sending {} wei to {:?} on chain {}",
            request.value, request.to, chain_id
        );

        let pending = timeout(self.request_timeout, client.send_transaction(tx, None))
            .await
            .map_err(|_| FlowError::ChainConnection {
                chain_id,
                message: "Transaction submission timed out".to_string(),
            })?
            .map_err(|e| FlowError::ChainConnection {
                chain_id,
                message: e.to_string(),
            })?;

        let tx_hash = pending.tx_hash();
        info!("Transaction sent on chain {}: {:?}", chain_id, tx_hash);
        Ok(tx_hash)
    }
}
