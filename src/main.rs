//! walletflow - connect a wallet and send a single transfer
//!
//! Opens the wallet modal, waits until the chain client answers, then sends
//! the configured transfer on the configured chain.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod chain;
mod config;
mod error;
mod flow;
mod wallet;

use chain::EthersChainClient;
use config::Settings;
use flow::ConnectionFlow;
use wallet::LocalModalFactory;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting walletflow v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} (chain {})",
        settings.network.name, settings.network.chain_id
    );

    // The modal and the chain client sign with the same local key
    let wallet = wallet::local::load_wallet(&settings.wallet.private_key_env)?;
    let client = Arc::new(EthersChainClient::new(
        wallet.clone(),
        settings.readiness.request_timeout(),
    ));
    info!("Using wallet {:?}", client.address());

    let flow = Arc::new(ConnectionFlow::new(
        settings,
        Arc::new(LocalModalFactory::new(wallet)),
        client,
    ));

    tokio::select! {
        result = run(&flow) => {
            if let Err(e) = &result {
                error!("{}", e.user_message());
            }
            result?;
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    if let Err(e) = flow.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }

    info!("walletflow stopped");
    Ok(())
}

/// Connect, wait for readiness and send the transfer
async fn run(flow: &Arc<ConnectionFlow>) -> error::FlowResult<()> {
    flow.connect().await?;
    info!("Wallet modal open, waiting for account");

    flow.wait_ready().await?;
    info!(
        "Wallet {} ready",
        flow.account().await.unwrap_or_default()
    );

    let tx_hash = flow.send_transaction().await?;
    info!("Transfer sent: {:?}", tx_hash);
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,walletflow=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
