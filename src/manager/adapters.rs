//! Chain-adapter implementations: the full UTXO adapter over the bitcoin
//! wallet core, and a thin adapter for account-model chains whose builders
//! produce pre-serialized transfers.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::warn;

use crate::btc::transaction::TX_UNCONFIRMED;
use crate::btc::{Transaction, Wallet};
use crate::client::bundle::{TransactionBundle, TransferStatus};
use crate::client::BLOCK_HEIGHT_UNBOUND;
use crate::error::{SubmitError, SubmitErrorKind, WalletError};
use crate::keys::Seed;
use crate::manager::transfer::{
    FeeBasis, NetworkFee, Transfer, TransferDirection, TransferPayload, TransferState,
};
use crate::manager::{ChainAdapter, RecoveredTransfer};

/// UTXO-chain adapter: wraps the wallet core, recovering transfers from raw
/// transaction bundles and signing through the wallet's key derivation.
pub struct BitcoinChainAdapter {
    currency: String,
    wallet: Arc<Wallet>,
}

impl BitcoinChainAdapter {
    pub fn new(currency: impl Into<String>, wallet: Arc<Wallet>) -> BitcoinChainAdapter {
        BitcoinChainAdapter { currency: currency.into(), wallet }
    }

    pub fn wallet(&self) -> &Arc<Wallet> {
        &self.wallet
    }

    /// Build an outgoing transfer: coin selection via the wallet, payload
    /// carrying the unsigned transaction.
    pub fn create_transfer_payload(
        &self,
        target: &str,
        amount: u64,
        fee_per_kb: Option<u64>,
    ) -> Result<(TransferPayload, Option<FeeBasis>), WalletError> {
        let tx = self
            .wallet
            .create_transaction(amount, target, fee_per_kb)
            .ok_or(WalletError::InsufficientFunds)?;
        let fee_basis = self.wallet.fee_for_tx(&tx).map(|fee| FeeBasis::new(fee as f64, 1));
        Ok((TransferPayload::Bitcoin(tx), fee_basis))
    }
}

impl ChainAdapter for BitcoinChainAdapter {
    fn currency(&self) -> &str {
        &self.currency
    }

    fn primary_address(&self) -> String {
        self.wallet
            .receive_address()
            .map(|address| address.to_string_with(self.wallet.params()))
            .unwrap_or_default()
    }

    fn addresses_for_recovery(&self) -> BTreeSet<String> {
        self.wallet.addresses_for_recovery().into_iter().collect()
    }

    fn owns_address(&self, address: &str) -> bool {
        self.wallet.contains_address(address)
    }

    fn recover_transactions(&self, bundle: &TransactionBundle) -> Vec<RecoveredTransfer> {
        let Some(mut tx) = Transaction::parse(&bundle.serialization) else {
            warn!("undecodable transaction bundle ({} bytes)", bundle.serialization.len());
            return Vec::new();
        };

        let confirmed = bundle.status == TransferStatus::Included
            && bundle.block_height != BLOCK_HEIGHT_UNBOUND;
        let (block_height, timestamp) = if confirmed {
            (bundle.block_height as u32, bundle.timestamp as u32)
        } else {
            (TX_UNCONFIRMED, 0)
        };
        tx.block_height = block_height;
        tx.timestamp = timestamp;

        let txid = tx.txid();
        self.wallet.register_transaction(tx.clone());
        self.wallet.update_transactions(&[txid], block_height, timestamp);

        let received = self.wallet.amount_received_from_tx(&tx);
        let sent = self.wallet.amount_sent_by_tx(&tx);
        if received == 0 && sent == 0 {
            return Vec::new();
        }

        let fee = self.wallet.fee_for_tx(&tx);
        let fee_paid = fee.unwrap_or(0);
        let (direction, amount) = if sent == 0 {
            (TransferDirection::Received, received)
        } else if sent <= received + fee_paid {
            // change-only movement: a send back to ourselves
            (TransferDirection::Recovered, received)
        } else {
            (TransferDirection::Sent, sent - received - fee_paid)
        };

        let state = match bundle.status {
            TransferStatus::Included if confirmed => TransferState::Included {
                block_number: bundle.block_height,
                transaction_index: 0,
                timestamp: bundle.timestamp,
                fee_basis: fee.map(|fee| FeeBasis::new(fee as f64, 1)),
                success: true,
            },
            TransferStatus::Errored => {
                TransferState::Errored(SubmitError::new(SubmitErrorKind::Unknown, None))
            }
            TransferStatus::Deleted => TransferState::Deleted,
            _ => TransferState::Submitted,
        };

        let params = self.wallet.params();
        let target = tx
            .outputs
            .iter()
            .find_map(|output| {
                let rendered =
                    crate::btc::Address::from_script(&output.script)?.to_string_with(params);
                let ours = self.wallet.contains_address(&rendered);
                match direction {
                    TransferDirection::Sent => (!ours).then_some(rendered),
                    _ => ours.then_some(rendered),
                }
            })
            .unwrap_or_default();
        let source = match direction {
            TransferDirection::Received => String::new(),
            _ => self.primary_address(),
        };

        let hash = txid.to_string();
        vec![RecoveredTransfer {
            uids: format!("{hash}:0"),
            hash,
            source,
            target,
            amount,
            fee,
            direction,
            state,
        }]
    }

    fn serialize_for_submission(&self, transfer: &Transfer) -> Result<Vec<u8>, WalletError> {
        transfer.with_payload(|payload| match payload {
            Some(TransferPayload::Bitcoin(tx)) => {
                if !tx.is_signed() {
                    return Err(WalletError::IncompleteSignature);
                }
                Ok(tx.serialize())
            }
            Some(TransferPayload::Raw(bytes)) => Ok(bytes.clone()),
            None => Err(WalletError::MissingSerialization),
        })
    }

    fn serialize_for_fee_estimation(&self, transfer: &Transfer) -> Result<Vec<u8>, WalletError> {
        transfer.with_payload(|payload| match payload {
            Some(TransferPayload::Bitcoin(tx)) => Ok(tx.serialize()),
            Some(TransferPayload::Raw(bytes)) => Ok(bytes.clone()),
            None => Err(WalletError::MissingSerialization),
        })
    }

    fn recover_fee_basis(
        &self,
        network_fee: &NetworkFee,
        cost_units: u64,
        _attributes: &[(String, String)],
    ) -> FeeBasis {
        FeeBasis::new(cost_units as f64, network_fee.price_per_cost_factor)
    }

    fn sign_transfer(&self, transfer: &Transfer, seed: &Seed) -> Result<(), WalletError> {
        let fork_id = self.wallet.params().fork_id;
        let hash = transfer.with_payload(|payload| match payload {
            Some(TransferPayload::Bitcoin(tx)) => {
                if !self.wallet.sign_transaction(tx, fork_id, seed)? {
                    return Err(WalletError::IncompleteSignature);
                }
                Ok(tx.txid().to_string())
            }
            Some(TransferPayload::Raw(_)) | None => Err(WalletError::MissingSerialization),
        })?;
        transfer.set_hash(hash);
        Ok(())
    }
}

/// Adapter for account-model chains (XRP, XLM, XTZ, ETH): one primary
/// address, transfers carrying serializations built and signed by the
/// per-chain builders.
pub struct AccountChainAdapter {
    currency: String,
    primary_address: String,
}

impl AccountChainAdapter {
    pub fn new(currency: impl Into<String>, primary_address: impl Into<String>) -> AccountChainAdapter {
        AccountChainAdapter { currency: currency.into(), primary_address: primary_address.into() }
    }
}

impl ChainAdapter for AccountChainAdapter {
    fn currency(&self) -> &str {
        &self.currency
    }

    fn primary_address(&self) -> String {
        self.primary_address.clone()
    }

    fn addresses_for_recovery(&self) -> BTreeSet<String> {
        BTreeSet::from([self.primary_address.clone()])
    }

    fn owns_address(&self, address: &str) -> bool {
        address.eq_ignore_ascii_case(&self.primary_address)
    }

    fn recover_transactions(&self, _bundle: &TransactionBundle) -> Vec<RecoveredTransfer> {
        // account chains synchronize by transfer bundles
        Vec::new()
    }

    fn serialize_for_submission(&self, transfer: &Transfer) -> Result<Vec<u8>, WalletError> {
        transfer.with_payload(|payload| match payload {
            Some(TransferPayload::Raw(bytes)) => Ok(bytes.clone()),
            _ => Err(WalletError::MissingSerialization),
        })
    }

    fn serialize_for_fee_estimation(&self, transfer: &Transfer) -> Result<Vec<u8>, WalletError> {
        self.serialize_for_submission(transfer)
    }

    fn recover_fee_basis(
        &self,
        network_fee: &NetworkFee,
        cost_units: u64,
        _attributes: &[(String, String)],
    ) -> FeeBasis {
        FeeBasis::new(cost_units as f64, network_fee.price_per_cost_factor)
    }

    fn sign_transfer(&self, transfer: &Transfer, _seed: &Seed) -> Result<(), WalletError> {
        // builders sign before the payload reaches the manager
        transfer.with_payload(|payload| match payload {
            Some(TransferPayload::Raw(_)) => Ok(()),
            _ => Err(WalletError::MissingSerialization),
        })
    }
}
