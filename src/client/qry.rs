//! Client-sync engine: address-driven history discovery with gap-limit
//! expansion, block-height bookkeeping, request-id matching and the
//! submission / fee-estimation dispatch paths.
//!
//! Cycles never overlap: a new one starts only once the previous round
//! reports `completed`. Results carrying a stale request id are dropped
//! before any persistence or recovery.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::error::ClientError;
use crate::manager::events::{
    Cookie, QueryByType, SyncStoppedReason, WalletEvent, WalletManagerEvent, WalletManagerState,
};
use crate::manager::transfer::{NetworkFee, Transfer, TransferState};
use crate::manager::{ManagerInner, ManagerOp};
use crate::WalletError;

use super::bundle::{TransactionBundle, TransferBundle};
use super::{BlockchainClient, BlockNumber, FeeEstimate, SubmitResult, BLOCK_HEIGHT_UNBOUND};

/// Safety overlap: after a completed cycle the next one re-queries roughly
/// this many seconds' worth of blocks.
const OFFSET_BLOCKS_IN_SECONDS: u64 = 3 * 24 * 3600;

const RID_NONE: u64 = u64::MAX;

#[derive(Debug, Clone, Copy)]
pub(crate) struct SyncState {
    pub rid: u64,
    pub beg_block: u64,
    pub end_block: u64,
    pub completed: bool,
    pub success: bool,
    pub unbounded: bool,
}

struct QryState {
    request_id: u64,
    connected: bool,
    sync: SyncState,
}

pub struct QryManager {
    client: Arc<dyn BlockchainClient>,
    by_type: QueryByType,
    block_offset: u64,
    state: Mutex<QryState>,
}

impl QryManager {
    pub(crate) fn new(
        client: Arc<dyn BlockchainClient>,
        by_type: QueryByType,
        block_period_secs: u64,
        earliest_block: u64,
        current_block: u64,
    ) -> QryManager {
        let block_offset = (OFFSET_BLOCKS_IN_SECONDS / block_period_secs.max(1)).max(100);
        QryManager {
            client,
            by_type,
            block_offset,
            state: Mutex::new(QryState {
                request_id: 0,
                connected: false,
                sync: SyncState {
                    rid: RID_NONE,
                    beg_block: earliest_block,
                    end_block: earliest_block.max(current_block),
                    completed: true,
                    success: false,
                    unbounded: true,
                },
            }),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    pub(crate) fn current_rid(&self) -> u64 {
        self.state.lock().unwrap().sync.rid
    }

    fn next_request_id(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        let rid = state.request_id;
        state.request_id += 1;
        rid
    }

    pub(crate) fn connect(&self, inner: &Arc<ManagerInner>) {
        self.state.lock().unwrap().connected = true;
        inner.set_state(WalletManagerState::Syncing);
    }

    pub(crate) fn disconnect(&self, inner: &Arc<ManagerInner>) {
        self.state.lock().unwrap().connected = false;
        inner.set_state(WalletManagerState::Connected);
    }

    /// One scheduler tick: in the API sync modes, fetch the block number;
    /// its arrival drives the rest of the cycle.
    pub(crate) fn tick(&self, inner: &Arc<ManagerInner>) {
        if !self.is_connected() {
            return;
        }
        if inner.sync_mode.uses_api_sync() {
            self.request_block_number(inner);
        }
    }

    fn request_block_number(&self, inner: &Arc<ManagerInner>) {
        let rid = self.next_request_id();
        let client = self.client.clone();
        let ops_tx = inner.ops_tx.clone();
        tokio::spawn(async move {
            let result = client.get_block_number().await;
            let _ = ops_tx.send(ManagerOp::AnnounceBlockNumber { rid, result }).await;
        });
    }

    pub(crate) fn handle_block_number(
        &self,
        inner: &Arc<ManagerInner>,
        _rid: u64,
        result: Result<BlockNumber, ClientError>,
    ) {
        let error = result.as_ref().err().cloned();
        if let Ok(block_number) = result {
            if inner.network.height() != block_number.height {
                inner.network.set_height(block_number.height);
                if let Some(hash) = block_number
                    .verified_block_hash
                    .as_deref()
                    .filter(|hash| !hash.is_empty())
                {
                    inner.network.set_verified_block_hash(hash.to_string());
                }
                inner
                    .listener
                    .manager_event(WalletManagerEvent::BlockHeightUpdated {
                        height: block_number.height,
                    });
            }
        }

        // whether or not the height arrived, drive a sync; it will be
        // incremental or full depending on where the last one ended
        self.request_sync(inner);

        if let Some(error) = error {
            inner.announce_client_error(&error);
        }
    }

    /// Start a new cycle when the previous one is complete and there are
    /// blocks left to examine.
    fn request_sync(&self, inner: &Arc<ManagerInner>) {
        let rid = {
            let mut state = self.state.lock().unwrap();
            // a disconnect discards whatever the in-flight callbacks produce
            if !state.connected {
                return;
            }

            if state.sync.completed && state.sync.success {
                state.sync.beg_block = state.sync.end_block.saturating_sub(self.block_offset);
            }
            state.sync.end_block = inner.network.height().max(state.sync.beg_block);

            if !(state.sync.completed && state.sync.beg_block != state.sync.end_block) {
                return;
            }
            let rid = state.request_id;
            state.request_id += 1;
            state.sync.rid = rid;
            rid
        };

        self.update_sync(inner, false, false);

        let addresses = inner.chain.addresses_for_recovery();
        debug!("sync {rid}: querying {} addresses", addresses.len());
        self.request_transactions_or_transfers(inner, None, addresses, rid);
    }

    /// Query for `new \ old`; `new` is carried as the accumulated address
    /// set of the cycle. Returns false when no request was needed.
    fn request_transactions_or_transfers(
        &self,
        inner: &Arc<ManagerInner>,
        old: Option<&BTreeSet<String>>,
        new: BTreeSet<String>,
        rid: u64,
    ) -> bool {
        let needed: Vec<String> = match old {
            Some(old) => new.difference(old).cloned().collect(),
            None => new.iter().cloned().collect(),
        };
        if needed.is_empty() {
            return false;
        }

        let (beg_block, end_block) = {
            let state = self.state.lock().unwrap();
            (
                state.sync.beg_block,
                if state.sync.unbounded { BLOCK_HEIGHT_UNBOUND } else { state.sync.end_block },
            )
        };

        let client = self.client.clone();
        let ops_tx = inner.ops_tx.clone();
        let by_type = self.by_type;
        tokio::spawn(async move {
            let op = match by_type {
                QueryByType::Transactions => {
                    let result = client.get_transactions(&needed, beg_block, end_block).await;
                    ManagerOp::AnnounceTransactions { rid, addresses: new, result }
                }
                QueryByType::Transfers => {
                    let result = client.get_transfers(&needed, beg_block, end_block).await;
                    ManagerOp::AnnounceTransfers { rid, addresses: new, result }
                }
            };
            let _ = ops_tx.send(op).await;
        });
        true
    }

    pub(crate) fn handle_transactions(
        &self,
        inner: &Arc<ManagerInner>,
        rid: u64,
        addresses: BTreeSet<String>,
        result: Result<Vec<TransactionBundle>, ClientError>,
    ) {
        if self.current_rid() != rid {
            debug!("dropping stale transaction batch (rid {rid})");
            return;
        }

        let mut completed = false;
        let mut success = false;
        let error = result.as_ref().err().cloned();

        match result {
            Ok(mut bundles) => {
                // persist before applying
                for bundle in &bundles {
                    if let Err(e) = inner.storage.save_transaction_bundle(bundle) {
                        warn!("failed to persist transaction bundle: {e}");
                    }
                }

                bundles.sort_by_key(TransactionBundle::sort_key);
                let mut seen = HashSet::new();
                bundles.retain(|bundle| seen.insert(bundle.set_hash()));

                for bundle in &bundles {
                    inner.recover_transaction_bundle(bundle);
                }

                // recovery may have grown the wallet's address set;
                // re-query the difference under the same rid
                let new_addresses = inner.chain.addresses_for_recovery();
                if !self.request_transactions_or_transfers(inner, Some(&addresses), new_addresses, rid)
                {
                    completed = true;
                    success = true;
                }
            }
            Err(_) => {
                completed = true;
            }
        }

        self.update_sync(inner, completed, success);
        if let Some(error) = error {
            inner.announce_client_error(&error);
        }
    }

    pub(crate) fn handle_transfers(
        &self,
        inner: &Arc<ManagerInner>,
        rid: u64,
        addresses: BTreeSet<String>,
        result: Result<Vec<TransferBundle>, ClientError>,
    ) {
        if self.current_rid() != rid {
            debug!("dropping stale transfer batch (rid {rid})");
            return;
        }

        let mut completed = false;
        let mut success = false;
        let error = result.as_ref().err().cloned();

        match result {
            Ok(mut bundles) => {
                for bundle in &bundles {
                    if let Err(e) = inner.storage.save_transfer_bundle(bundle) {
                        warn!("failed to persist transfer bundle: {e}");
                    }
                }

                // ascending block order with uids dedup; Rust's sort is the
                // stable merge the mostly-ordered input wants
                bundles.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
                let mut seen = HashSet::new();
                bundles.retain(|bundle| seen.insert(bundle.uids.clone()));

                for bundle in &bundles {
                    inner.recover_transfer_bundle(bundle);
                }

                let new_addresses = inner.chain.addresses_for_recovery();
                if !self.request_transactions_or_transfers(inner, Some(&addresses), new_addresses, rid)
                {
                    completed = true;
                    success = true;
                }
            }
            Err(_) => {
                completed = true;
            }
        }

        self.update_sync(inner, completed, success);
        if let Some(error) = error {
            inner.announce_client_error(&error);
        }
    }

    /// Advance the sync flags, framing the cycle with started/stopped
    /// events unless it is incremental (its start lies within twice the
    /// block offset of the network height).
    fn update_sync(&self, inner: &Arc<ManagerInner>, completed: bool, success: bool) {
        let (need_beg, need_end) = {
            let mut state = self.state.lock().unwrap();
            let mut need_beg = !completed && state.sync.completed;
            let mut need_end = completed && !state.sync.completed;

            if state.sync.beg_block
                >= inner.network.height().saturating_sub(2 * self.block_offset)
            {
                need_beg = false;
                need_end = false;
            }

            state.sync.completed = completed;
            state.sync.success = success;
            (need_beg, need_end)
        };

        if need_beg {
            inner.set_state(WalletManagerState::Syncing);
            inner.listener.manager_event(WalletManagerEvent::SyncStarted);
            inner
                .listener
                .manager_event(WalletManagerEvent::SyncContinues { percent_complete: None });
        }
        if need_end {
            inner
                .listener
                .manager_event(WalletManagerEvent::SyncContinues { percent_complete: Some(100.0) });
            inner.listener.manager_event(WalletManagerEvent::SyncStopped {
                reason: if success { SyncStoppedReason::Complete } else { SyncStoppedReason::Unknown },
            });
            inner.set_state(WalletManagerState::Connected);
        }
    }

    /// Serialize and dispatch a submission; the response lands in
    /// [`Self::handle_submit`] on the handler task.
    pub(crate) fn submit(
        &self,
        inner: &Arc<ManagerInner>,
        transfer: Arc<Transfer>,
    ) -> Result<(), WalletError> {
        let serialization = inner.chain.serialize_for_submission(&transfer)?;
        let identifier = transfer.identifier();
        let exchange_id = transfer.exchange_id();

        let client = self.client.clone();
        let ops_tx = inner.ops_tx.clone();
        tokio::spawn(async move {
            let result = client
                .submit_transaction(identifier.as_deref(), exchange_id.as_deref(), &serialization)
                .await;
            let _ = ops_tx.send(ManagerOp::AnnounceSubmit { transfer, result }).await;
        });
        Ok(())
    }

    pub(crate) fn handle_submit(
        &self,
        inner: &Arc<ManagerInner>,
        transfer: Arc<Transfer>,
        result: Result<SubmitResult, ClientError>,
    ) {
        match result {
            Ok(submit) => {
                if let Some(identifier) = submit.identifier {
                    transfer.set_identifier(identifier);
                }
                // the hash may only be determined at submission
                if let Some(hash) = submit.hash {
                    if transfer.set_hash(hash) {
                        let state = transfer.state();
                        inner.listener.transfer_event(
                            &transfer,
                            crate::manager::events::TransferEvent::Changed {
                                old: state.clone(),
                                new: state,
                            },
                        );
                    }
                }
                inner.apply_transfer_state(&transfer, TransferState::Submitted);
            }
            Err(error) => {
                inner.apply_transfer_state(
                    &transfer,
                    TransferState::Errored(error.to_submit_error()),
                );
                inner.announce_client_error(&error);
            }
        }
    }

    /// Dispatch a fee estimation; the assembled fee basis is announced as a
    /// `FeeBasisEstimated` wallet event carrying `cookie`.
    pub(crate) fn estimate_fee(
        &self,
        inner: &Arc<ManagerInner>,
        cookie: Cookie,
        transfer: Arc<Transfer>,
        network_fee: NetworkFee,
    ) -> Result<(), WalletError> {
        let serialization = inner.chain.serialize_for_fee_estimation(&transfer)?;
        let hash_hex = transfer.hash().unwrap_or_default();

        let client = self.client.clone();
        let ops_tx = inner.ops_tx.clone();
        tokio::spawn(async move {
            let result = client.estimate_transaction_fee(&serialization, &hash_hex).await;
            let _ = ops_tx
                .send(ManagerOp::AnnounceEstimateFee { cookie, network_fee, result })
                .await;
        });
        Ok(())
    }

    pub(crate) fn handle_estimate_fee(
        &self,
        inner: &Arc<ManagerInner>,
        cookie: Cookie,
        network_fee: NetworkFee,
        result: Result<FeeEstimate, ClientError>,
    ) {
        match result {
            Ok(estimate) => {
                let fee_basis = inner.chain.recover_fee_basis(
                    &network_fee,
                    estimate.cost_units,
                    &estimate.attributes,
                );
                inner.listener.wallet_event(
                    &inner.primary_wallet,
                    WalletEvent::FeeBasisEstimated {
                        success: true,
                        cookie,
                        fee_basis: Some(fee_basis),
                    },
                );
            }
            Err(error) => {
                inner.listener.wallet_event(
                    &inner.primary_wallet,
                    WalletEvent::FeeBasisEstimated { success: false, cookie, fee_basis: None },
                );
                inner.announce_client_error(&error);
            }
        }
    }
}
