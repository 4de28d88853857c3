//! Cross-chain transfers and their one-way state machine.

use std::sync::Mutex;

use crate::btc::Transaction as BitcoinTransaction;
use crate::error::SubmitError;

/// Cost units × price-per-unit, yielding a concrete fee amount.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeBasis {
    pub cost_factor: f64,
    pub price_per_cost_factor: u64,
}

impl FeeBasis {
    pub fn new(cost_factor: f64, price_per_cost_factor: u64) -> FeeBasis {
        FeeBasis { cost_factor, price_per_cost_factor }
    }

    pub fn fee(&self) -> u64 {
        (self.cost_factor * self.price_per_cost_factor as f64).ceil() as u64
    }
}

/// A network-published fee level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkFee {
    pub confirmation_time_ms: u64,
    pub price_per_cost_factor: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Sent,
    Received,
    Recovered,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferState {
    Created,
    Signed,
    Submitted,
    Included {
        block_number: u64,
        transaction_index: u64,
        timestamp: u64,
        fee_basis: Option<FeeBasis>,
        success: bool,
    },
    Errored(SubmitError),
    Deleted,
}

impl TransferState {
    fn rank(&self) -> u8 {
        match self {
            TransferState::Created => 0,
            TransferState::Signed => 1,
            TransferState::Submitted => 2,
            TransferState::Included { .. } | TransferState::Errored(_) => 3,
            TransferState::Deleted => 4,
        }
    }
}

/// Chain-specific material a transfer carries between creation, signing and
/// submission.
#[derive(Debug, Clone)]
pub enum TransferPayload {
    Bitcoin(BitcoinTransaction),
    /// Pre-serialized bytes for account-model chains.
    Raw(Vec<u8>),
}

#[derive(Debug)]
struct TransferInner {
    uids: Option<String>,
    hash: Option<String>,
    identifier: Option<String>,
    exchange_id: Option<String>,
    source: String,
    target: String,
    amount: u64,
    currency: String,
    direction: TransferDirection,
    fee_basis: Option<FeeBasis>,
    state: TransferState,
    payload: Option<TransferPayload>,
}

/// A transfer of value on some chain, tracked from creation through
/// submission and inclusion. State transitions are one-way except
/// `Submitted → {Included, Errored}` (both carry rank 3, so a transfer that
/// errored on submission may still be found included later).
#[derive(Debug)]
pub struct Transfer {
    inner: Mutex<TransferInner>,
}

impl Transfer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: String,
        target: String,
        amount: u64,
        currency: String,
        direction: TransferDirection,
        fee_basis: Option<FeeBasis>,
        payload: Option<TransferPayload>,
    ) -> Transfer {
        Transfer {
            inner: Mutex::new(TransferInner {
                uids: None,
                hash: None,
                identifier: None,
                exchange_id: None,
                source,
                target,
                amount,
                currency,
                direction,
                fee_basis,
                state: TransferState::Created,
                payload,
            }),
        }
    }

    pub fn state(&self) -> TransferState {
        self.inner.lock().unwrap().state.clone()
    }

    pub fn uids(&self) -> Option<String> {
        self.inner.lock().unwrap().uids.clone()
    }

    pub fn hash(&self) -> Option<String> {
        self.inner.lock().unwrap().hash.clone()
    }

    pub fn identifier(&self) -> Option<String> {
        self.inner.lock().unwrap().identifier.clone()
    }

    /// Exchange correlation id, when the transfer originated from one.
    pub fn exchange_id(&self) -> Option<String> {
        self.inner.lock().unwrap().exchange_id.clone()
    }

    pub fn set_exchange_id(&self, exchange_id: String) {
        self.inner.lock().unwrap().exchange_id = Some(exchange_id);
    }

    pub fn source(&self) -> String {
        self.inner.lock().unwrap().source.clone()
    }

    pub fn target(&self) -> String {
        self.inner.lock().unwrap().target.clone()
    }

    pub fn amount(&self) -> u64 {
        self.inner.lock().unwrap().amount
    }

    pub fn currency(&self) -> String {
        self.inner.lock().unwrap().currency.clone()
    }

    pub fn direction(&self) -> TransferDirection {
        self.inner.lock().unwrap().direction
    }

    pub fn fee_basis(&self) -> Option<FeeBasis> {
        self.inner.lock().unwrap().fee_basis
    }

    pub fn confirmed_fee_basis(&self) -> Option<FeeBasis> {
        match self.state() {
            TransferState::Included { fee_basis, .. } => fee_basis,
            _ => None,
        }
    }

    pub(crate) fn set_uids(&self, uids: String) {
        self.inner.lock().unwrap().uids = Some(uids);
    }

    pub(crate) fn set_identifier(&self, identifier: String) {
        self.inner.lock().unwrap().identifier = Some(identifier);
    }

    /// Set the transaction hash; true when it actually changed.
    pub(crate) fn set_hash(&self, hash: String) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.hash.as_deref() == Some(hash.as_str()) {
            return false;
        }
        inner.hash = Some(hash);
        true
    }

    /// Apply a state transition, returning `(old, new)` when it took effect.
    /// Regressions and no-ops return `None`; the caller emits the `Changed`
    /// event only for applied transitions (state stores before any notify).
    pub(crate) fn transition(&self, new: TransferState) -> Option<(TransferState, TransferState)> {
        let mut inner = self.inner.lock().unwrap();
        if new == inner.state || new.rank() < inner.state.rank() {
            return None;
        }
        let old = std::mem::replace(&mut inner.state, new.clone());
        Some((old, new))
    }

    pub(crate) fn with_payload<R>(&self, f: impl FnOnce(Option<&mut TransferPayload>) -> R) -> R {
        let mut inner = self.inner.lock().unwrap();
        f(inner.payload.as_mut())
    }
}
