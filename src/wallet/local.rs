//! Wallet modal backed by a local signing key
//!
//! There is no selection dialog to show on a terminal, so "opening" logs the
//! options the modal was built with and connects the configured key.

use super::{AccountState, AccountStatus, ModalFactory, ModalOptions, WalletModal};
use crate::error::{FlowError, FlowResult};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::utils::to_checksum;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

const ACCOUNT_CHANNEL_CAPACITY: usize = 16;

/// Load the signing key from the named environment variable
pub fn load_wallet(private_key_env: &str) -> FlowResult<LocalWallet> {
    let key = std::env::var(private_key_env).map_err(|_| {
        FlowError::Wallet(format!("No wallet configured. Set {}", private_key_env))
    })?;

    key.trim_start_matches("0x")
        .parse::<LocalWallet>()
        .map_err(|e| FlowError::Wallet(format!("Invalid private key: {}", e)))
}

/// Modal that connects a local wallet as soon as it is opened
pub struct LocalWalletModal {
    options: ModalOptions,
    wallet: LocalWallet,
    account_tx: broadcast::Sender<AccountState>,
    open: AtomicBool,
}

impl LocalWalletModal {
    pub fn new(options: ModalOptions, wallet: LocalWallet) -> Self {
        let (account_tx, _) = broadcast::channel(ACCOUNT_CHANNEL_CAPACITY);
        Self {
            options,
            wallet,
            account_tx,
            open: AtomicBool::new(false),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn address(&self) -> String {
        to_checksum(&self.wallet.address(), None)
    }

    fn emit(&self, state: AccountState) {
        debug!("Account state: {}", state.status);
        // No subscribers is fine
        let _ = self.account_tx.send(state);
    }
}

#[async_trait]
impl WalletModal for LocalWalletModal {
    async fn open(&self) -> FlowResult<()> {
        if self.open.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(
            "Opening wallet modal for {} on {} (theme {:?})",
            self.options.metadata.name, self.options.default_network.name, self.options.theme_mode
        );
        debug!(
            "Featured wallets: {:?}, features: {:?}",
            self.options.featured_wallet_ids, self.options.features
        );

        self.emit(AccountState::with_status(AccountStatus::Connecting));
        self.emit(AccountState::connected(self.address()));
        Ok(())
    }

    async fn close(&self) -> FlowResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> FlowResult<()> {
        self.open.store(false, Ordering::SeqCst);
        self.emit(AccountState::with_status(AccountStatus::Disconnected));
        Ok(())
    }

    fn subscribe_account(&self) -> broadcast::Receiver<AccountState> {
        self.account_tx.subscribe()
    }
}

/// Creates `LocalWalletModal`s sharing one signing key
pub struct LocalModalFactory {
    wallet: LocalWallet,
}

impl LocalModalFactory {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }
}

impl ModalFactory for LocalModalFactory {
    fn create(&self, options: ModalOptions) -> FlowResult<Arc<dyn WalletModal>> {
        Ok(Arc::new(LocalWalletModal::new(options, self.wallet.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ClientConfig;
    use crate::config::Settings;

    const TEST_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn modal() -> LocalWalletModal {
        let settings = Settings::default();
        let config = ClientConfig::new(&settings);
        let options = ModalOptions::new(&settings, &config).unwrap();
        LocalWalletModal::new(options, TEST_KEY.parse().unwrap())
    }

    #[tokio::test]
    async fn test_open_emits_connecting_then_connected() {
        let modal = modal();
        let mut rx = modal.subscribe_account();

        modal.open().await.unwrap();
        assert!(modal.is_open());

        assert_eq!(rx.recv().await.unwrap().status, AccountStatus::Connecting);
        let connected = rx.recv().await.unwrap();
        assert_eq!(connected.status, AccountStatus::Connected);
        assert_eq!(connected.address, Some(modal.address()));
    }

    #[tokio::test]
    async fn test_open_twice_emits_once() {
        let modal = modal();
        let mut rx = modal.subscribe_account();

        modal.open().await.unwrap();
        modal.open().await.unwrap();
        modal.disconnect().await.unwrap();

        let statuses: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|s| s.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                AccountStatus::Connecting,
                AccountStatus::Connected,
                AccountStatus::Disconnected
            ]
        );
        assert!(!modal.is_open());
    }

    #[test]
    fn test_load_wallet_missing_env() {
        let err = load_wallet("WALLETFLOW_TEST_KEY_UNSET").unwrap_err();
        assert!(matches!(err, FlowError::Wallet(_)));
    }
}
