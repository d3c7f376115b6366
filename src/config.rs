//! Configuration management for the wallet connection flow
//!
//! Loads configuration from a TOML file with environment variable substitution.
//! When no file is configured and the default file is absent, the built-in
//! project and network constants are used.

use crate::error::{FlowError, FlowResult};

use anyhow::{Context, Result};
use ethers::types::{Address, U256};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_ENV: &str = "WALLETFLOW_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    pub project: ProjectConfig,
    pub network: NetworkConfig,
    pub modal: ModalConfig,
    pub readiness: ReadinessConfig,
    pub transfer: TransferConfig,
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProjectConfig {
    pub project_id: String,
    #[serde(default)]
    pub theme_mode: ThemeMode,
    pub metadata: MetadataConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    #[default]
    Light,
    Dark,
}

/// Display metadata shown by the wallet modal
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MetadataConfig {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub name: String,
    pub currency_symbol: String,
    pub rpc_urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModalConfig {
    pub featured_wallet_ids: Vec<String>,
    #[serde(default)]
    pub features: ModalFeatures,
}

/// Optional modal features. Everything is off unless enabled.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct ModalFeatures {
    #[serde(default)]
    pub email: bool,
    #[serde(default)]
    pub socials: bool,
    #[serde(default)]
    pub analytics: bool,
    #[serde(default)]
    pub onramp: bool,
    #[serde(default)]
    pub swaps: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReadinessConfig {
    pub interval_ms: u64,
    pub max_attempts: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TransferConfig {
    pub to: String,
    pub amount_ether: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WalletConfig {
    pub private_key_env: String,
}

impl Settings {
    /// Load settings from `$WALLETFLOW_CONFIG` or `config/default.toml`
    pub fn load() -> Result<Self> {
        match env::var(CONFIG_ENV) {
            Ok(path) => Self::load_from(PathBuf::from(path)),
            Err(_) => {
                let path = PathBuf::from(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::load_from(path)
                } else {
                    tracing::warn!(
                        "No config file at {:?}, using built-in settings",
                        path
                    );
                    Ok(Self::default())
                }
            }
        }
    }

    /// Load settings from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.project.project_id.is_empty() {
            anyhow::bail!("Project id must be set");
        }

        if self.network.rpc_urls.is_empty() {
            anyhow::bail!("Network {} has no RPC URLs configured", self.network.name);
        }

        if self.readiness.interval_ms == 0 {
            anyhow::bail!("Readiness interval must be greater than zero");
        }

        if self.readiness.max_attempts.is_none() && self.readiness.timeout_ms.is_none() {
            anyhow::bail!("Readiness polling needs max_attempts or timeout_ms");
        }

        if self.modal.featured_wallet_ids.is_empty() {
            tracing::warn!("No featured wallets configured");
        }

        self.transfer.recipient()?;
        self.transfer.value()?;

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project: ProjectConfig {
                project_id: "7c954e216e53a6243d1061a0b09346db".to_string(),
                theme_mode: ThemeMode::Light,
                metadata: MetadataConfig {
                    name: "Appkit test".to_string(),
                    description: "Lorem ipsum dolor sit amet, consectetur adipiscing elit."
                        .to_string(),
                    url: "https://my-appkit-test.io".to_string(),
                    icons: Vec::new(),
                },
            },
            network: NetworkConfig {
                chain_id: 56,
                name: "BNB Smart Chain".to_string(),
                currency_symbol: "BNB".to_string(),
                rpc_urls: vec!["https://56.rpc.thirdweb.com".to_string()],
            },
            modal: ModalConfig {
                featured_wallet_ids: vec![
                    // metamask
                    "c57ca95b47569778a828d19178114f4db188b89b763c899ba0be274e97267d96"
                        .to_string(),
                    // binance
                    "8a0ee50d1f22f6651afcae7eb4253e52a3310b90af5daef78a8c4929a9bb99d4"
                        .to_string(),
                    // koala
                    "e401b54ca287ce5c4c4579a91220e79816cff07cdf18b388fde84449c3be8a51"
                        .to_string(),
                ],
                features: ModalFeatures::default(),
            },
            readiness: ReadinessConfig {
                interval_ms: 100,
                max_attempts: Some(300),
                timeout_ms: Some(30_000),
                request_timeout_ms: 5_000,
            },
            transfer: TransferConfig {
                to: "0x2537a5F47166940A967e6272FBBb6B1b4928C62a".to_string(),
                amount_ether: "0.0001".to_string(),
            },
            wallet: WalletConfig {
                private_key_env: "WALLET_PRIVATE_KEY".to_string(),
            },
        }
    }
}

impl ReadinessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl TransferConfig {
    /// Destination address of the transfer
    pub fn recipient(&self) -> FlowResult<Address> {
        self.to
            .parse()
            .map_err(|e| FlowError::Config(format!("Invalid transfer address {}: {}", self.to, e)))
    }

    /// Transfer amount in wei
    pub fn value(&self) -> FlowResult<U256> {
        ethers::utils::parse_ether(&self.amount_ether).map_err(|e| {
            FlowError::Config(format!(
                "Invalid transfer amount {}: {}",
                self.amount_ether, e
            ))
        })
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
