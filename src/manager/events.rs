//! Manager, wallet and transfer events, and the listener injected at
//! construction time.

use std::sync::Arc;

use crate::error::ClientError;

use super::transfer::{FeeBasis, Transfer, TransferState};
use super::ManagedWallet;

/// Opaque token correlating a fee-estimation request with its response
/// event.
pub type Cookie = u64;

/// How a manager synchronizes and submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    ApiOnly,
    ApiWithP2pSend,
    P2pWithApiSync,
    P2pOnly,
}

impl SyncMode {
    /// Whether the API branch drives block-height and history queries.
    pub fn uses_api_sync(&self) -> bool {
        matches!(self, SyncMode::ApiOnly | SyncMode::ApiWithP2pSend)
    }
}

/// Whether sync queries the indexer for transactions or transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryByType {
    Transactions,
    Transfers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletManagerState {
    Created,
    Disconnected,
    Connected,
    Syncing,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStoppedReason {
    Complete,
    Requested,
    Unknown,
}

#[derive(Debug, Clone)]
pub enum WalletManagerEvent {
    Created,
    Changed { old: WalletManagerState, new: WalletManagerState },
    SyncStarted,
    SyncContinues { percent_complete: Option<f32> },
    SyncStopped { reason: SyncStoppedReason },
    BlockHeightUpdated { height: u64 },
    ClientError(ClientError),
}

#[derive(Debug, Clone)]
pub enum WalletEvent {
    Created,
    BalanceUpdated { balance: u64 },
    TransferAdded { transfer: Arc<Transfer> },
    TransferChanged { transfer: Arc<Transfer> },
    FeeBasisEstimated { success: bool, cookie: Cookie, fee_basis: Option<FeeBasis> },
}

#[derive(Debug, Clone)]
pub enum TransferEvent {
    Created,
    Changed { old: TransferState, new: TransferState },
    Deleted,
}

/// Event fan-out target. All callbacks fire on the manager's event-handler
/// task, after the originating state transition has been stored.
pub trait EventListener: Send + Sync {
    fn manager_event(&self, _event: WalletManagerEvent) {}
    fn wallet_event(&self, _wallet: &Arc<ManagedWallet>, _event: WalletEvent) {}
    fn transfer_event(&self, _transfer: &Arc<Transfer>, _event: TransferEvent) {}
}

/// Listener that drops everything.
pub struct NullEventListener;
impl EventListener for NullEventListener {}
