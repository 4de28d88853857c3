//! Wallet-manager facade: owns the network, the account, the primary
//! wallet, the client-sync engine and the single-writer event-handler task.
//!
//! Every state transition driven by a client response happens on the
//! handler task; client futures are awaited on spawned tasks and their
//! results forwarded as [`ManagerOp`]s.

pub mod adapters;
pub mod events;
pub mod system;
pub mod transfer;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::account::Account;
use crate::client::bundle::{TransactionBundle, TransferBundle};
use crate::client::qry::QryManager;
use crate::client::{BlockchainClient, BlockNumber, FeeEstimate, SubmitResult};
use crate::error::{ClientError, WalletError};
use crate::keys::Seed;
use crate::storage::FileService;

use events::{
    Cookie, EventListener, QueryByType, SyncMode, TransferEvent, WalletEvent, WalletManagerEvent,
    WalletManagerState,
};
use system::Network;
use transfer::{FeeBasis, NetworkFee, Transfer, TransferDirection, TransferState};

/// A currency's transfer list under a manager.
pub struct ManagedWallet {
    currency: String,
    transfers: Mutex<Vec<Arc<Transfer>>>,
}

impl ManagedWallet {
    fn new(currency: String) -> Arc<ManagedWallet> {
        Arc::new(ManagedWallet { currency, transfers: Mutex::new(Vec::new()) })
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn transfers(&self) -> Vec<Arc<Transfer>> {
        self.transfers.lock().unwrap().clone()
    }

    pub fn transfer_by_uids(&self, uids: &str) -> Option<Arc<Transfer>> {
        self.transfers
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.uids().as_deref() == Some(uids))
            .cloned()
    }

    pub fn transfer_by_hash(&self, hash: &str) -> Option<Arc<Transfer>> {
        self.transfers
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.hash().as_deref() == Some(hash))
            .cloned()
    }

    fn add_transfer(&self, transfer: Arc<Transfer>) {
        self.transfers.lock().unwrap().push(transfer);
    }
}

/// Transfer facts a chain adapter derives from an announced transaction
/// bundle.
#[derive(Debug, Clone)]
pub struct RecoveredTransfer {
    pub uids: String,
    pub hash: String,
    pub source: String,
    pub target: String,
    pub amount: u64,
    pub fee: Option<u64>,
    pub direction: TransferDirection,
    pub state: TransferState,
}

/// Per-chain capability surface the manager and sync engine are generic
/// over: one implementation per chain, injected at construction.
pub trait ChainAdapter: Send + Sync {
    fn currency(&self) -> &str;

    /// The chain's current receive address.
    fn primary_address(&self) -> String;

    /// Union of every address the chain wallet can currently receive on.
    fn addresses_for_recovery(&self) -> BTreeSet<String>;

    fn owns_address(&self, address: &str) -> bool;

    /// Apply a transaction bundle to the chain wallet (which may grow its
    /// used-address set) and report the wallet-relevant transfers.
    fn recover_transactions(&self, bundle: &TransactionBundle) -> Vec<RecoveredTransfer>;

    /// Signed wire bytes for submission.
    fn serialize_for_submission(&self, transfer: &Transfer) -> Result<Vec<u8>, WalletError>;

    /// Wire bytes for fee estimation; an unsigned form is acceptable.
    fn serialize_for_fee_estimation(&self, transfer: &Transfer) -> Result<Vec<u8>, WalletError>;

    /// Assemble a fee basis from an indexer cost estimate.
    fn recover_fee_basis(
        &self,
        network_fee: &NetworkFee,
        cost_units: u64,
        attributes: &[(String, String)],
    ) -> FeeBasis;

    /// Sign the transfer's payload in place with keys derived from `seed`.
    fn sign_transfer(&self, transfer: &Transfer, seed: &Seed) -> Result<(), WalletError>;
}

/// Work items consumed by the event-handler task.
pub(crate) enum ManagerOp {
    Tick,
    AnnounceBlockNumber {
        rid: u64,
        result: Result<BlockNumber, ClientError>,
    },
    AnnounceTransactions {
        rid: u64,
        addresses: BTreeSet<String>,
        result: Result<Vec<TransactionBundle>, ClientError>,
    },
    AnnounceTransfers {
        rid: u64,
        addresses: BTreeSet<String>,
        result: Result<Vec<TransferBundle>, ClientError>,
    },
    AnnounceSubmit {
        transfer: Arc<Transfer>,
        result: Result<SubmitResult, ClientError>,
    },
    AnnounceEstimateFee {
        cookie: Cookie,
        network_fee: NetworkFee,
        result: Result<FeeEstimate, ClientError>,
    },
}

pub(crate) struct ManagerInner {
    pub(crate) network: Arc<Network>,
    pub(crate) account: Arc<Account>,
    pub(crate) sync_mode: SyncMode,
    pub(crate) listener: Arc<dyn EventListener>,
    pub(crate) chain: Arc<dyn ChainAdapter>,
    pub(crate) storage: FileService,
    pub(crate) primary_wallet: Arc<ManagedWallet>,
    pub(crate) wallets: Mutex<Vec<Arc<ManagedWallet>>>,
    pub(crate) qry: QryManager,
    pub(crate) ops_tx: mpsc::Sender<ManagerOp>,
    state: Mutex<WalletManagerState>,
    network_reachable: AtomicBool,
}

impl ManagerInner {
    pub(crate) fn enqueue(&self, op: ManagerOp) {
        if self.ops_tx.try_send(op).is_err() {
            warn!("event queue full; dropping manager op");
        }
    }

    pub(crate) fn handle_op(self: &Arc<Self>, op: ManagerOp) {
        match op {
            ManagerOp::Tick => self.qry.tick(self),
            ManagerOp::AnnounceBlockNumber { rid, result } => {
                self.qry.handle_block_number(self, rid, result)
            }
            ManagerOp::AnnounceTransactions { rid, addresses, result } => {
                self.qry.handle_transactions(self, rid, addresses, result)
            }
            ManagerOp::AnnounceTransfers { rid, addresses, result } => {
                self.qry.handle_transfers(self, rid, addresses, result)
            }
            ManagerOp::AnnounceSubmit { transfer, result } => {
                self.qry.handle_submit(self, transfer, result)
            }
            ManagerOp::AnnounceEstimateFee { cookie, network_fee, result } => {
                self.qry.handle_estimate_fee(self, cookie, network_fee, result)
            }
        }
    }

    pub(crate) fn state(&self) -> WalletManagerState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, new: WalletManagerState) {
        let old = {
            let mut state = self.state.lock().unwrap();
            let old = *state;
            *state = new;
            old
        };
        if old != new {
            self.listener.manager_event(WalletManagerEvent::Changed { old, new });
        }
    }

    pub(crate) fn announce_client_error(&self, error: &ClientError) {
        self.listener.manager_event(WalletManagerEvent::ClientError(error.clone()));
    }

    /// Store-then-notify: apply a transfer state transition and emit the
    /// `Changed` events only when it took effect.
    pub(crate) fn apply_transfer_state(&self, transfer: &Arc<Transfer>, new: TransferState) {
        if let Some((old, new)) = transfer.transition(new) {
            self.listener.transfer_event(transfer, TransferEvent::Changed { old, new });
            self.listener.wallet_event(
                &self.primary_wallet,
                WalletEvent::TransferChanged { transfer: transfer.clone() },
            );
        }
    }

    /// Transfer-recovery hook for announced transfer bundles: find or create
    /// the transfer, then advance its state per the bundle.
    pub(crate) fn recover_transfer_bundle(&self, bundle: &TransferBundle) {
        let confirmed_fee_basis = bundle
            .fee
            .as_ref()
            .and_then(|fee| fee.parse::<u64>().ok())
            .map(|fee| FeeBasis::new(fee as f64, 1));

        let existing = self
            .primary_wallet
            .transfer_by_uids(&bundle.uids)
            .or_else(|| self.primary_wallet.transfer_by_hash(&bundle.hash));

        let transfer = match existing {
            Some(transfer) => {
                if transfer.uids().is_none() {
                    transfer.set_uids(bundle.uids.clone());
                }
                transfer
            }
            None => {
                let owns_from = self.chain.owns_address(&bundle.from);
                let owns_to = self.chain.owns_address(&bundle.to);
                let direction = match (owns_from, owns_to) {
                    (true, true) => TransferDirection::Recovered,
                    (true, false) => TransferDirection::Sent,
                    _ => TransferDirection::Received,
                };
                let transfer = Arc::new(Transfer::new(
                    bundle.from.clone(),
                    bundle.to.clone(),
                    bundle.amount.parse().unwrap_or(0),
                    bundle.currency.clone(),
                    direction,
                    confirmed_fee_basis,
                    None,
                ));
                transfer.set_uids(bundle.uids.clone());
                if !bundle.hash.is_empty() {
                    transfer.set_hash(bundle.hash.clone());
                }
                if !bundle.identifier.is_empty() {
                    transfer.set_identifier(bundle.identifier.clone());
                }
                self.primary_wallet.add_transfer(transfer.clone());
                self.listener.transfer_event(&transfer, TransferEvent::Created);
                self.listener.wallet_event(
                    &self.primary_wallet,
                    WalletEvent::TransferAdded { transfer: transfer.clone() },
                );
                transfer
            }
        };

        self.apply_transfer_state(&transfer, bundle.transfer_state(confirmed_fee_basis));
    }

    /// Transfer-recovery hook for announced transaction bundles: the chain
    /// adapter applies the raw transaction, we track the derived transfers.
    pub(crate) fn recover_transaction_bundle(&self, bundle: &TransactionBundle) {
        for fact in self.chain.recover_transactions(bundle) {
            let existing = self
                .primary_wallet
                .transfer_by_uids(&fact.uids)
                .or_else(|| self.primary_wallet.transfer_by_hash(&fact.hash));

            let transfer = match existing {
                Some(transfer) => transfer,
                None => {
                    let transfer = Arc::new(Transfer::new(
                        fact.source.clone(),
                        fact.target.clone(),
                        fact.amount,
                        self.chain.currency().to_string(),
                        fact.direction,
                        fact.fee.map(|fee| FeeBasis::new(fee as f64, 1)),
                        None,
                    ));
                    transfer.set_uids(fact.uids.clone());
                    transfer.set_hash(fact.hash.clone());
                    self.primary_wallet.add_transfer(transfer.clone());
                    self.listener.transfer_event(&transfer, TransferEvent::Created);
                    self.listener.wallet_event(
                        &self.primary_wallet,
                        WalletEvent::TransferAdded { transfer: transfer.clone() },
                    );
                    transfer
                }
            };
            self.apply_transfer_state(&transfer, fact.state);
        }
    }
}

/// Handle to a wallet manager. Cheap to clone; the event-handler task keeps
/// running as long as any handle lives.
#[derive(Clone)]
pub struct WalletManager {
    inner: Arc<ManagerInner>,
}

impl WalletManager {
    /// Build a manager and start its event-handler task. Must run inside a
    /// tokio runtime.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        network: Arc<Network>,
        account: Arc<Account>,
        client: Arc<dyn BlockchainClient>,
        chain: Arc<dyn ChainAdapter>,
        listener: Arc<dyn EventListener>,
        sync_mode: SyncMode,
        by_type: QueryByType,
        storage: FileService,
        earliest_block: u64,
    ) -> WalletManager {
        let (ops_tx, mut ops_rx) = mpsc::channel(1024);

        let primary_wallet = ManagedWallet::new(chain.currency().to_string());
        let qry = QryManager::new(
            client,
            by_type,
            network.block_period_secs(),
            earliest_block,
            network.height(),
        );

        let inner = Arc::new(ManagerInner {
            network,
            account,
            sync_mode,
            listener,
            chain,
            storage,
            wallets: Mutex::new(vec![primary_wallet.clone()]),
            primary_wallet,
            qry,
            ops_tx,
            state: Mutex::new(WalletManagerState::Created),
            network_reachable: AtomicBool::new(true),
        });

        // replay persisted history before going live
        let mut transaction_bundles = inner.storage.load_transaction_bundles();
        transaction_bundles.sort_by_key(TransactionBundle::sort_key);
        for bundle in &transaction_bundles {
            inner.recover_transaction_bundle(bundle);
        }
        let mut transfer_bundles = inner.storage.load_transfer_bundles();
        transfer_bundles.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        for bundle in &transfer_bundles {
            inner.recover_transfer_bundle(bundle);
        }

        let weak: Weak<ManagerInner> = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(op) = ops_rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.handle_op(op);
            }
            debug!("manager event handler stopped");
        });

        inner.listener.manager_event(WalletManagerEvent::Created);
        inner.listener.wallet_event(&inner.primary_wallet, WalletEvent::Created);
        WalletManager { inner }
    }

    pub fn state(&self) -> WalletManagerState {
        self.inner.state()
    }

    pub fn network(&self) -> Arc<Network> {
        self.inner.network.clone()
    }

    pub fn account(&self) -> Arc<Account> {
        self.inner.account.clone()
    }

    pub fn wallet(&self) -> Arc<ManagedWallet> {
        self.inner.primary_wallet.clone()
    }

    pub fn wallets(&self) -> Vec<Arc<ManagedWallet>> {
        self.inner.wallets.lock().unwrap().clone()
    }

    /// Create (or return) the secondary wallet tracking `currency`.
    pub fn create_wallet(&self, currency: &str) -> Arc<ManagedWallet> {
        let mut wallets = self.inner.wallets.lock().unwrap();
        if let Some(wallet) = wallets.iter().find(|w| w.currency() == currency) {
            return wallet.clone();
        }
        let wallet = ManagedWallet::new(currency.to_string());
        wallets.push(wallet.clone());
        wallet
    }

    /// Begin syncing: flips to `Syncing` and fires an immediate tick.
    pub fn connect(&self) {
        self.inner.qry.connect(&self.inner);
        self.inner.enqueue(ManagerOp::Tick);
    }

    /// Stop syncing. In-flight responses still drain through the handler
    /// but fail the request-id match.
    pub fn disconnect(&self) {
        self.inner.qry.disconnect(&self.inner);
    }

    pub fn set_network_reachable(&self, reachable: bool) {
        self.inner.network_reachable.store(reachable, Ordering::SeqCst);
        debug!("network reachable: {reachable}");
    }

    pub fn is_network_reachable(&self) -> bool {
        self.inner.network_reachable.load(Ordering::SeqCst)
    }

    /// Drive one sync round; called by the periodic scheduler.
    pub fn tick(&self) {
        self.inner.enqueue(ManagerOp::Tick);
    }

    /// Create an outgoing transfer on the primary wallet. The payload is
    /// chain-specific material produced by the chain's builder (an unsigned
    /// UTXO transaction, or pre-signed account-chain bytes).
    pub fn create_transfer(
        &self,
        target: String,
        amount: u64,
        fee_basis: Option<FeeBasis>,
        payload: Option<transfer::TransferPayload>,
    ) -> Arc<Transfer> {
        let transfer = Arc::new(Transfer::new(
            self.inner.chain.primary_address(),
            target,
            amount,
            self.inner.chain.currency().to_string(),
            TransferDirection::Sent,
            fee_basis,
            payload,
        ));
        self.inner.primary_wallet.add_transfer(transfer.clone());
        self.inner.listener.transfer_event(&transfer, TransferEvent::Created);
        self.inner.listener.wallet_event(
            &self.inner.primary_wallet,
            WalletEvent::TransferAdded { transfer: transfer.clone() },
        );
        transfer
    }

    /// Sign the transfer with keys derived from `seed`, then submit it
    /// through the client.
    pub fn sign_and_submit(&self, transfer: &Arc<Transfer>, seed: &Seed) -> Result<(), WalletError> {
        self.inner.chain.sign_transfer(transfer, seed)?;
        self.inner.apply_transfer_state(transfer, TransferState::Signed);
        self.submit(transfer)
    }

    /// Submit an already-signed transfer.
    pub fn submit(&self, transfer: &Arc<Transfer>) -> Result<(), WalletError> {
        self.inner.qry.submit(&self.inner, transfer.clone())
    }

    /// Ask the indexer for a fee estimate; the result arrives as a
    /// `FeeBasisEstimated` event on the primary wallet carrying `cookie`.
    pub fn estimate_fee(
        &self,
        transfer: &Arc<Transfer>,
        network_fee: NetworkFee,
        cookie: Cookie,
    ) -> Result<(), WalletError> {
        self.inner.qry.estimate_fee(&self.inner, cookie, transfer.clone(), network_fee)
    }
}
