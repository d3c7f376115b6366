//! Connection flow orchestration

use super::{
    poll_until_ready, ConnectionState, FlowState, ReadinessStatus, RetryPolicy, SessionState,
};
use crate::chain::{ChainClient, ClientConfig, TransferRequest};
use crate::config::Settings;
use crate::error::{FlowError, FlowResult};
use crate::wallet::{AccountState, AccountStatus, ModalFactory, ModalOptions, WalletModal};

use ethers::types::H256;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Who initiated a teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// `disconnect`, reconnect, or a failed open
    Local,
    /// The wallet reported `disconnected`
    Remote,
}

/// Connects a wallet through the modal, waits for the chain client and sends
/// the configured transfer.
pub struct ConnectionFlow {
    settings: Arc<Settings>,
    modals: Arc<dyn ModalFactory>,
    client: Arc<dyn ChainClient>,
    /// Current session, replaced on every change
    session: RwLock<Arc<SessionState>>,
    /// Modal of the current session
    modal: RwLock<Option<Arc<dyn WalletModal>>>,
    state_tx: watch::Sender<FlowState>,
    connection_tx: watch::Sender<ConnectionState>,
    account_status_tx: watch::Sender<Option<AccountStatus>>,
    readiness_tx: watch::Sender<ReadinessStatus>,
    /// Cancels the current session's observer and poller
    cancel: Mutex<CancellationToken>,
    /// Account subscription task of the current session
    observer: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionFlow {
    pub fn new(
        settings: Settings,
        modals: Arc<dyn ModalFactory>,
        client: Arc<dyn ChainClient>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            modals,
            client,
            session: RwLock::new(Arc::new(SessionState::default())),
            modal: RwLock::new(None),
            state_tx: watch::Sender::new(FlowState::Idle),
            connection_tx: watch::Sender::new(ConnectionState::Disconnected),
            account_status_tx: watch::Sender::new(None),
            readiness_tx: watch::Sender::new(ReadinessStatus::Idle),
            cancel: Mutex::new(CancellationToken::new()),
            observer: Mutex::new(None),
        }
    }

    /// Open the wallet modal for a fresh client configuration.
    ///
    /// Returns once the modal is presented. Account capture and readiness
    /// polling continue in the background; use [`wait_ready`](Self::wait_ready)
    /// to wait for them. Any existing session is torn down first.
    pub async fn connect(self: &Arc<Self>) -> FlowResult<()> {
        if self.state() != FlowState::Idle || !self.session.read().await.is_idle() {
            info!("Superseding existing wallet session");
            self.teardown(Teardown::Local).await;
        }

        self.transition(FlowState::Opening)?;

        let config = Arc::new(ClientConfig::new(&self.settings));
        let modal = match ModalOptions::new(&self.settings, &config)
            .and_then(|options| self.modals.create(options))
        {
            Ok(modal) => modal,
            Err(e) => {
                error!("Failed to create wallet modal: {}", e);
                self.teardown(Teardown::Local).await;
                return Err(e);
            }
        };

        // Subscribe before opening so no early event is missed
        let account_rx = modal.subscribe_account();
        let token = CancellationToken::new();
        let session = SessionState::open(config.clone());
        let session_id = session.id();

        *self.session.write().await = Arc::new(session);
        *self.modal.write().await = Some(modal.clone());
        *self.cancel.lock().await = token.clone();
        self.readiness_tx.send_replace(ReadinessStatus::Pending);

        info!(
            "Opening wallet modal (session {}, config {})",
            session_id,
            config.id()
        );

        if let Err(e) = modal.open().await {
            error!("Failed to open wallet modal: {}", e);
            self.teardown(Teardown::Local).await;
            return Err(e);
        }

        self.transition(FlowState::WaitingForAccount)?;

        let handle = tokio::spawn(observe_accounts(Arc::downgrade(self), account_rx, token));
        *self.observer.lock().await = Some(handle);

        Ok(())
    }

    /// Wait until the current session is ready to send
    pub async fn wait_ready(&self) -> FlowResult<()> {
        let mut rx = self.readiness_tx.subscribe();

        let initial = rx.borrow_and_update().clone();
        match initial {
            ReadinessStatus::Idle => return Err(FlowError::WalletNotConnected),
            ReadinessStatus::Ready => return Ok(()),
            ReadinessStatus::Failed(e) => return Err(e),
            ReadinessStatus::Pending => {}
        }

        loop {
            if rx.changed().await.is_err() {
                return Err(FlowError::Cancelled);
            }

            let status = rx.borrow_and_update().clone();
            match status {
                ReadinessStatus::Ready => return Ok(()),
                ReadinessStatus::Failed(e) => return Err(e),
                ReadinessStatus::Idle => return Err(FlowError::Cancelled),
                ReadinessStatus::Pending => {}
            }
        }
    }

    /// Switch to the configured chain and send the configured transfer
    pub async fn send_transaction(&self) -> FlowResult<H256> {
        let session = self.session.read().await.clone();
        let config = session.sendable_config()?;
        let request = TransferRequest::from_settings(&self.settings)?;

        info!(
            "Sending transfer of {} wei to {:?} on chain {}",
            request.value, request.to, request.chain_id
        );

        self.client
            .switch_chain(&config, request.chain_id)
            .await
            .map_err(|e| {
                error!("Failed to switch to chain {}: {}", request.chain_id, e);
                FlowError::TransactionFailed(format!("switch chain: {}", e))
            })?;

        let tx_hash = self
            .client
            .send_transaction(&config, request)
            .await
            .map_err(|e| {
                error!("Failed to send transaction: {}", e);
                FlowError::TransactionFailed(e.to_string())
            })?;

        info!("Transaction submitted: {:?}", tx_hash);
        Ok(tx_hash)
    }

    /// Disconnect the wallet and discard the session
    pub async fn disconnect(&self) -> FlowResult<()> {
        self.teardown(Teardown::Local).await;
        Ok(())
    }

    pub fn state(&self) -> FlowState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<FlowState> {
        self.state_tx.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_tx.borrow()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection_tx.subscribe()
    }

    /// Last status reported by the modal
    pub fn account_status(&self) -> Option<AccountStatus> {
        *self.account_status_tx.borrow()
    }

    pub async fn account(&self) -> Option<String> {
        self.session.read().await.account().map(str::to_string)
    }

    pub async fn is_ready(&self) -> bool {
        self.session.read().await.is_ready()
    }

    pub async fn session(&self) -> Arc<SessionState> {
        self.session.read().await.clone()
    }

    fn transition(&self, next: FlowState) -> FlowResult<()> {
        let mut result = Ok(());
        self.state_tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                debug!("Flow state {} -> {}", state, next);
                let changed = *state != next;
                *state = next;
                changed
            } else {
                result = Err(FlowError::InvalidStateTransition {
                    from: state.to_string(),
                    to: next.to_string(),
                });
                false
            }
        });
        result
    }

    /// Replace the session if it is still `session_id`
    async fn update_session<F>(&self, session_id: Uuid, update: F) -> FlowResult<()>
    where
        F: FnOnce(&SessionState) -> SessionState,
    {
        let mut session = self.session.write().await;
        if session.id() != session_id || session.is_idle() {
            return Err(FlowError::ConfigMissing);
        }
        *session = Arc::new(update(&**session));
        Ok(())
    }

    async fn handle_account_state(
        self: &Arc<Self>,
        state: AccountState,
        latched: &mut bool,
        token: &CancellationToken,
    ) {
        self.account_status_tx.send_replace(Some(state.status));
        self.connection_tx.send_replace(ConnectionState::from(state.status));

        match state.status {
            AccountStatus::Connected => {
                if *latched {
                    debug!("Ignoring repeated connected event");
                    return;
                }
                let Some(address) = state.address else {
                    warn!("Connected event without an address");
                    return;
                };
                *latched = true;

                if let Err(e) = self.on_connected(address, token).await {
                    self.fail_readiness(e, token);
                }
            }
            AccountStatus::Disconnected if *latched => {
                info!("Wallet disconnected");
                self.teardown(Teardown::Remote).await;
            }
            _ => {}
        }
    }

    /// Capture the account and start readiness polling in its own task
    async fn on_connected(
        self: &Arc<Self>,
        address: String,
        token: &CancellationToken,
    ) -> FlowResult<()> {
        let session = self.session.read().await.clone();
        let session_id = session.id();
        let config = session.config().ok_or(FlowError::ConfigMissing)?;

        info!("Wallet connected: {}", address);
        self.update_session(session_id, |s| s.with_account(address)).await?;
        self.transition(FlowState::PollingReadiness)?;

        // Child token: teardown of the session stops the poll, the observer keeps reading
        tokio::spawn(poll_readiness(
            Arc::downgrade(self),
            self.client.clone(),
            config,
            RetryPolicy::from_config(&self.settings.readiness),
            session_id,
            token.child_token(),
        ));
        Ok(())
    }

    async fn mark_ready(&self, session_id: Uuid, attempts: u32) -> FlowResult<()> {
        self.update_session(session_id, SessionState::with_ready).await?;
        self.transition(FlowState::Ready)?;
        self.readiness_tx.send_replace(ReadinessStatus::Ready);

        info!("Chain client ready after {} attempts", attempts);
        Ok(())
    }

    fn fail_readiness(&self, err: FlowError, token: &CancellationToken) {
        if token.is_cancelled() {
            debug!("Readiness polling stopped: {}", err);
            return;
        }

        error!("Wallet session not ready: {}", err);
        if self.state() == FlowState::PollingReadiness {
            if let Err(e) = self.transition(FlowState::WaitingForAccount) {
                warn!("Failed to leave readiness polling: {}", e);
            }
        }
        self.readiness_tx.send_replace(ReadinessStatus::Failed(err));
    }

    async fn teardown(&self, origin: Teardown) {
        self.cancel.lock().await.cancel();

        // The observer itself runs remote teardowns, so only abort it for local ones
        if let Some(handle) = self.observer.lock().await.take() {
            if origin == Teardown::Local {
                handle.abort();
            }
        }

        let modal = self.modal.write().await.take();
        if let Some(modal) = modal {
            if origin == Teardown::Local {
                if let Err(e) = modal.disconnect().await {
                    warn!("Wallet modal disconnect failed: {}", e);
                }
            }
            if let Err(e) = modal.close().await {
                warn!("Wallet modal close failed: {}", e);
            }
        }

        *self.session.write().await = Arc::new(SessionState::default());
        self.state_tx.send_replace(FlowState::Idle);
        self.connection_tx.send_replace(ConnectionState::Disconnected);
        self.readiness_tx.send_replace(ReadinessStatus::Idle);

        debug!("Wallet session discarded ({:?})", origin);
    }
}

impl Drop for ConnectionFlow {
    fn drop(&mut self) {
        self.cancel.get_mut().cancel();
        if let Some(handle) = self.observer.get_mut().take() {
            handle.abort();
        }
    }
}

/// Forward account-state events to the flow until the session is cancelled.
///
/// `latched` makes sure only the first `connected` event of this modal
/// captures the account and starts readiness polling.
async fn observe_accounts(
    flow: Weak<ConnectionFlow>,
    mut account_rx: broadcast::Receiver<AccountState>,
    token: CancellationToken,
) {
    let mut latched = false;

    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = account_rx.recv() => event,
        };

        match event {
            Ok(state) => {
                let Some(flow) = flow.upgrade() else {
                    break;
                };
                flow.handle_account_state(state, &mut latched, &token).await;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Account observer lagged, skipped {} events", skipped);
            }
            Err(RecvError::Closed) => {
                debug!("Account subscription closed");
                break;
            }
        }
    }
}

/// Poll the chain client for one session, then publish the outcome.
///
/// Holds only a weak handle on the flow so a dropped flow is not kept alive
/// by an in-flight poll.
async fn poll_readiness(
    flow: Weak<ConnectionFlow>,
    client: Arc<dyn ChainClient>,
    config: Arc<ClientConfig>,
    policy: RetryPolicy,
    session_id: Uuid,
    token: CancellationToken,
) {
    let polled = poll_until_ready(client.as_ref(), &config, &policy, &token).await;

    let Some(flow) = flow.upgrade() else {
        return;
    };

    let result = match polled {
        Ok(attempts) => flow.mark_ready(session_id, attempts).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        flow.fail_readiness(e, &token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use crate::wallet::{MockModalFactory, MockWalletModal};
    use ethers::types::{Address, U256};
    use mockall::Sequence;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_test::{assert_err, assert_ok};

    /// Scriptable modal: tests push account events through `emit`
    struct FakeModal {
        account_tx: broadcast::Sender<AccountState>,
        opened: AtomicUsize,
        disconnected: AtomicUsize,
    }

    impl FakeModal {
        fn new() -> Arc<Self> {
            let (account_tx, _) = broadcast::channel(16);
            Arc::new(Self {
                account_tx,
                opened: AtomicUsize::new(0),
                disconnected: AtomicUsize::new(0),
            })
        }

        fn emit(&self, state: AccountState) {
            let _ = self.account_tx.send(state);
        }
    }

    #[async_trait::async_trait]
    impl WalletModal for FakeModal {
        async fn open(&self) -> FlowResult<()> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) -> FlowResult<()> {
            Ok(())
        }

        async fn disconnect(&self) -> FlowResult<()> {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn subscribe_account(&self) -> broadcast::Receiver<AccountState> {
            self.account_tx.subscribe()
        }
    }

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.readiness.interval_ms = 1;
        settings.readiness.max_attempts = Some(50);
        settings
    }

    fn factory_for(modal: Arc<FakeModal>) -> MockModalFactory {
        let mut factory = MockModalFactory::new();
        factory
            .expect_create()
            .returning(move |_| Ok(modal.clone() as Arc<dyn WalletModal>));
        factory
    }

    fn flow_with(
        settings: Settings,
        modal: Arc<FakeModal>,
        client: MockChainClient,
    ) -> Arc<ConnectionFlow> {
        Arc::new(ConnectionFlow::new(
            settings,
            Arc::new(factory_for(modal)),
            Arc::new(client),
        ))
    }

    /// Client whose probe fails `failures` times before answering
    fn probing_client(failures: u32, calls: Arc<AtomicU32>) -> MockChainClient {
        let mut client = MockChainClient::new();
        client.expect_chain_id().returning(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) < failures {
                Err(FlowError::ChainConnection {
                    chain_id: 56,
                    message: "not ready".to_string(),
                })
            } else {
                Ok(56)
            }
        });
        client
    }

    /// Settings that keep polling a failing client until the test ends
    fn slow_polling_settings() -> Settings {
        let mut settings = settings();
        settings.readiness.interval_ms = 5;
        settings.readiness.max_attempts = None;
        settings.readiness.timeout_ms = Some(60_000);
        settings
    }

    async fn assert_polling_stopped(calls: &AtomicU32) {
        // Let a probe that was already in flight land
        tokio::time::sleep(Duration::from_millis(20)).await;
        let before = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), before, "readiness probes kept running");
    }

    async fn wait_for_state(flow: &ConnectionFlow, target: FlowState) {
        let mut rx = flow.subscribe_state();
        timeout(Duration::from_secs(2), rx.wait_for(|s| *s == target))
            .await
            .expect("state not reached")
            .expect("state channel closed");
    }

    async fn connect_and_ready(flow: &Arc<ConnectionFlow>, modal: &FakeModal, address: &str) {
        assert_ok!(flow.connect().await);
        modal.emit(AccountState::connected(address));
        let ready = timeout(Duration::from_secs(2), flow.wait_ready())
            .await
            .expect("readiness timed out");
        assert_ok!(ready);
    }

    #[tokio::test]
    async fn test_send_without_connect_makes_no_calls() {
        let mut client = MockChainClient::new();
        client.expect_chain_id().never();
        client.expect_switch_chain().never();
        client.expect_send_transaction().never();

        let flow = flow_with(settings(), FakeModal::new(), client);

        assert_eq!(
            flow.send_transaction().await.unwrap_err(),
            FlowError::WalletNotConnected
        );
        assert_eq!(flow.wait_ready().await.unwrap_err(), FlowError::WalletNotConnected);
        assert_eq!(flow.state(), FlowState::Idle);
    }

    #[tokio::test]
    async fn test_ready_after_two_failed_probes() {
        let calls = Arc::new(AtomicU32::new(0));
        let modal = FakeModal::new();
        let flow = flow_with(settings(), modal.clone(), probing_client(2, calls.clone()));

        connect_and_ready(&flow, &modal, "0xABC").await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(flow.account().await.as_deref(), Some("0xABC"));
        assert!(flow.is_ready().await);
        assert_eq!(flow.state(), FlowState::Ready);
        assert_eq!(flow.connection_state(), ConnectionState::Connected);
        assert_eq!(flow.account_status(), Some(AccountStatus::Connected));
        assert_eq!(modal.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_connected_events_handled_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let modal = FakeModal::new();
        let flow = flow_with(settings(), modal.clone(), probing_client(0, calls.clone()));

        assert_ok!(flow.connect().await);
        modal.emit(AccountState::connected("0xABC"));
        modal.emit(AccountState::connected("0xABC"));
        modal.emit(AccountState::connected("0xDEF"));
        assert_ok!(timeout(Duration::from_secs(2), flow.wait_ready()).await.unwrap());

        modal.emit(AccountState::connected("0x123"));
        modal.emit(AccountState::with_status(AccountStatus::Connecting));
        let mut connection = flow.subscribe_connection();
        timeout(
            Duration::from_secs(2),
            connection.wait_for(|c| *c == ConnectionState::Connecting),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flow.account().await.as_deref(), Some("0xABC"));
        assert_eq!(flow.state(), FlowState::Ready);
    }

    #[tokio::test]
    async fn test_connected_without_address_is_ignored() {
        let calls = Arc::new(AtomicU32::new(0));
        let modal = FakeModal::new();
        let flow = flow_with(settings(), modal.clone(), probing_client(0, calls.clone()));

        assert_ok!(flow.connect().await);
        modal.emit(AccountState::with_status(AccountStatus::Connected));
        modal.emit(AccountState::connected("0xABC"));
        assert_ok!(timeout(Duration::from_secs(2), flow.wait_ready()).await.unwrap());

        assert_eq!(flow.account().await.as_deref(), Some("0xABC"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_switches_chain_then_transfers() {
        let recipient: Address = "0x2537a5F47166940A967e6272FBBb6B1b4928C62a".parse().unwrap();
        let mut seq = Sequence::new();
        let mut client = probing_client(0, Arc::new(AtomicU32::new(0)));
        client
            .expect_switch_chain()
            .withf(|_, chain_id| *chain_id == 56)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        client
            .expect_send_transaction()
            .withf(move |_, request| {
                request.chain_id == 56
                    && request.to == recipient
                    && request.value == U256::from(100_000_000_000_000u64)
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(H256::repeat_byte(0xab)));

        let modal = FakeModal::new();
        let flow = flow_with(settings(), modal.clone(), client);
        connect_and_ready(&flow, &modal, "0xABC").await;

        let tx_hash = flow.send_transaction().await.unwrap();
        assert_eq!(tx_hash, H256::repeat_byte(0xab));
    }

    #[tokio::test]
    async fn test_send_rejected_while_polling() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut client = probing_client(u32::MAX, calls.clone());
        client.expect_switch_chain().never();
        client.expect_send_transaction().never();

        let modal = FakeModal::new();
        let flow = flow_with(slow_polling_settings(), modal.clone(), client);
        assert_ok!(flow.connect().await);
        modal.emit(AccountState::connected("0xABC"));
        wait_for_state(&flow, FlowState::PollingReadiness).await;

        assert_eq!(flow.account().await.as_deref(), Some("0xABC"));
        assert_eq!(
            flow.send_transaction().await.unwrap_err(),
            FlowError::WalletNotReady
        );

        assert_ok!(flow.disconnect().await);
        assert_eq!(flow.state(), FlowState::Idle);
        assert_polling_stopped(&calls).await;
    }

    #[tokio::test]
    async fn test_wallet_disconnect_during_polling_cancels_poll() {
        let calls = Arc::new(AtomicU32::new(0));
        let modal = FakeModal::new();
        let flow = flow_with(
            slow_polling_settings(),
            modal.clone(),
            probing_client(u32::MAX, calls.clone()),
        );

        assert_ok!(flow.connect().await);
        modal.emit(AccountState::connected("0xABC"));
        wait_for_state(&flow, FlowState::PollingReadiness).await;

        // Account events keep flowing while the chain client is probed
        modal.emit(AccountState::with_status(AccountStatus::Connecting));
        let mut connection = flow.subscribe_connection();
        timeout(
            Duration::from_secs(2),
            connection.wait_for(|c| *c == ConnectionState::Connecting),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(calls.load(Ordering::SeqCst) > 0);

        modal.emit(AccountState::with_status(AccountStatus::Disconnected));
        wait_for_state(&flow, FlowState::Idle).await;

        assert!(flow.session().await.is_idle());
        assert_eq!(flow.connection_state(), ConnectionState::Disconnected);
        assert_eq!(flow.account_status(), Some(AccountStatus::Disconnected));
        assert_eq!(flow.wait_ready().await.unwrap_err(), FlowError::WalletNotConnected);
        assert_polling_stopped(&calls).await;
    }

    #[tokio::test]
    async fn test_reconnect_while_polling_stops_previous_poll() {
        let calls = Arc::new(AtomicU32::new(0));
        let modal = FakeModal::new();
        let flow = flow_with(
            slow_polling_settings(),
            modal.clone(),
            probing_client(u32::MAX, calls.clone()),
        );

        assert_ok!(flow.connect().await);
        modal.emit(AccountState::connected("0xABC"));
        wait_for_state(&flow, FlowState::PollingReadiness).await;

        assert_ok!(flow.connect().await);
        assert_eq!(flow.state(), FlowState::WaitingForAccount);
        assert_eq!(flow.account().await, None);
        assert_polling_stopped(&calls).await;
    }

    #[tokio::test]
    async fn test_readiness_timeout_is_surfaced() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut settings = settings();
        settings.readiness.max_attempts = Some(3);

        let modal = FakeModal::new();
        let flow = flow_with(settings, modal.clone(), probing_client(u32::MAX, calls.clone()));
        assert_ok!(flow.connect().await);
        modal.emit(AccountState::connected("0xABC"));

        let result = timeout(Duration::from_secs(2), flow.wait_ready()).await.unwrap();
        assert_eq!(result.unwrap_err(), FlowError::ReadinessTimeout { attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(flow.state(), FlowState::WaitingForAccount);
        assert!(!flow.is_ready().await);
    }

    #[tokio::test]
    async fn test_switch_failure_is_transaction_failed() {
        let mut client = probing_client(0, Arc::new(AtomicU32::new(0)));
        client.expect_switch_chain().returning(|_, _| {
            Err(FlowError::ChainConnection {
                chain_id: 56,
                message: "user rejected".to_string(),
            })
        });
        client.expect_send_transaction().never();

        let modal = FakeModal::new();
        let flow = flow_with(settings(), modal.clone(), client);
        connect_and_ready(&flow, &modal, "0xABC").await;

        let err = flow.send_transaction().await.unwrap_err();
        assert!(matches!(err, FlowError::TransactionFailed(_)));
    }

    #[tokio::test]
    async fn test_disconnect_discards_session() {
        let modal = FakeModal::new();
        let flow = flow_with(settings(), modal.clone(), probing_client(0, Arc::new(AtomicU32::new(0))));
        connect_and_ready(&flow, &modal, "0xABC").await;

        assert_ok!(flow.disconnect().await);

        assert_eq!(flow.state(), FlowState::Idle);
        assert_eq!(flow.connection_state(), ConnectionState::Disconnected);
        assert_eq!(flow.account().await, None);
        assert!(!flow.is_ready().await);
        assert!(flow.session().await.is_idle());
        assert_eq!(modal.disconnected.load(Ordering::SeqCst), 1);
        assert_err!(flow.send_transaction().await);
    }

    #[tokio::test]
    async fn test_wallet_disconnect_returns_to_idle() {
        let modal = FakeModal::new();
        let flow = flow_with(settings(), modal.clone(), probing_client(0, Arc::new(AtomicU32::new(0))));
        connect_and_ready(&flow, &modal, "0xABC").await;

        modal.emit(AccountState::with_status(AccountStatus::Disconnected));
        wait_for_state(&flow, FlowState::Idle).await;

        assert!(flow.session().await.is_idle());
        assert_eq!(flow.account_status(), Some(AccountStatus::Disconnected));
        // Remote disconnects are not echoed back to the modal
        assert_eq!(modal.disconnected.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reconnect_supersedes_config() {
        let modal = FakeModal::new();
        let flow = flow_with(settings(), modal.clone(), probing_client(0, Arc::new(AtomicU32::new(0))));
        connect_and_ready(&flow, &modal, "0xABC").await;
        let first = flow.session().await;

        connect_and_ready(&flow, &modal, "0xDEF").await;
        let second = flow.session().await;

        assert_ne!(first.id(), second.id());
        let first_config = first.config().unwrap();
        let second_config = second.config().unwrap();
        assert_ne!(first_config.id(), second_config.id());
        assert_eq!(second.account(), Some("0xDEF"));
        assert_eq!(modal.opened.load(Ordering::SeqCst), 2);
        assert_eq!(modal.disconnected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_modal_open_failure_returns_to_idle() {
        let (account_tx, _) = broadcast::channel::<AccountState>(4);
        let mut modal = MockWalletModal::new();
        modal
            .expect_subscribe_account()
            .returning(move || account_tx.subscribe());
        modal
            .expect_open()
            .returning(|| Err(FlowError::Modal("dialog closed".to_string())));
        modal.expect_disconnect().returning(|| Ok(()));
        modal.expect_close().returning(|| Ok(()));
        let modal: Arc<dyn WalletModal> = Arc::new(modal);

        let mut factory = MockModalFactory::new();
        factory
            .expect_create()
            .times(1)
            .returning(move |_| Ok(modal.clone()));

        let flow = Arc::new(ConnectionFlow::new(
            settings(),
            Arc::new(factory),
            Arc::new(MockChainClient::new()),
        ));

        let err = flow.connect().await.unwrap_err();
        assert_eq!(err, FlowError::Modal("dialog closed".to_string()));
        assert_eq!(flow.state(), FlowState::Idle);
        assert!(flow.session().await.is_idle());
    }

    #[tokio::test]
    async fn test_modal_receives_configured_options() {
        let mut factory = MockModalFactory::new();
        factory
            .expect_create()
            .withf(|options| {
                options.default_network.id == 56
                    && options.featured_wallet_ids.len() == 3
                    && !options.features.analytics
            })
            .times(1)
            .returning(|_| Err(FlowError::Modal("no display".to_string())));

        let flow = Arc::new(ConnectionFlow::new(
            settings(),
            Arc::new(factory),
            Arc::new(MockChainClient::new()),
        ));

        assert_err!(flow.connect().await);
        assert_eq!(flow.state(), FlowState::Idle);
    }
}
