//! UTXO wallet core.
//!
//! The wallet replays a transaction history into per-chain address sets,
//! a UTXO set and a balance history, keeps the history sorted oldest-first
//! (spends strictly after their funding transactions), selects coins for new
//! transactions and signs them with keys derived on demand from the seed.
//!
//! Every public method takes the wallet mutex for the whole call; listener
//! callbacks fire only after the lock is released.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::bip32::{ChildNumber, DerivationPath, Xpub};
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{ScriptBuf, Txid, Witness};
use log::{debug, warn};

use super::address::{hash160, script_pkh, signature_pkh, witness_pkh, Address, Pkh};
use super::params::AddressParams;
use super::transaction::{
    tx_fee, Transaction, TxInput, TxOutput, DEFAULT_FEE_PER_KB, SEQUENCE_FINAL,
    TX_INPUT_SIZE, TX_MAX_LOCK_HEIGHT, TX_MAX_SIZE, TX_MIN_OUTPUT_AMOUNT, TX_OUTPUT_SIZE,
    TX_UNCONFIRMED,
};
use crate::error::WalletError;
use crate::keys::{account_xpriv, Seed};

/// Minimum unused receive addresses kept past the last used one.
pub const GAP_LIMIT_EXTERNAL: u32 = 10;
/// Minimum unused change addresses kept past the last used one.
pub const GAP_LIMIT_INTERNAL: u32 = 5;
/// Wider bootstrap limit used when rebuilding a wallet from history.
pub const GAP_LIMIT_EXTENDED: u32 = 100;

const EXTERNAL_CHAIN: u32 = 0;
const INTERNAL_CHAIN: u32 = 1;

/// One never-spent output currently attributed to the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Utxo {
    pub hash: Txid,
    pub index: u32,
}

/// Wallet state-change callbacks, injected at construction.
pub trait WalletListener: Send + Sync {
    fn balance_changed(&self, _balance: u64) {}
    fn tx_added(&self, _tx: &Transaction) {}
    fn tx_updated(&self, _hashes: &[Txid], _block_height: u32, _timestamp: u32) {}
    fn tx_deleted(&self, _hash: Txid, _notify_user: bool, _recommend_rescan: bool) {}
}

/// No-op listener for callers that only query.
pub struct NullListener;
impl WalletListener for NullListener {}

struct WalletInner {
    fee_per_kb: u64,
    block_height: u32,
    balance: u64,
    total_sent: u64,
    total_received: u64,
    balance_hist: Vec<u64>,
    utxos: Vec<Utxo>,
    /// History sorted oldest-first; spends strictly after funding txs.
    transactions: Vec<Txid>,
    /// Every known transaction, wallet or retained-foreign.
    all_tx: HashMap<Txid, Transaction>,
    invalid_tx: HashSet<Txid>,
    pending_tx: HashSet<Txid>,
    spent_outputs: HashSet<Utxo>,
    used_pkh: HashSet<Pkh>,
    all_pkh: HashSet<Pkh>,
    internal_chain: Vec<Pkh>,
    external_chain: Vec<Pkh>,
}

pub struct Wallet {
    params: AddressParams,
    master_pub_key: Xpub,
    account_path: DerivationPath,
    secp: Secp256k1<All>,
    listener: Arc<dyn WalletListener>,
    inner: Mutex<WalletInner>,
}

fn unix_now() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0)
}

impl WalletInner {
    fn derive_pkh(&self, secp: &Secp256k1<All>, mpk: &Xpub, chain: u32, index: u32) -> Option<Pkh> {
        let path = [
            ChildNumber::from_normal_idx(chain).ok()?,
            ChildNumber::from_normal_idx(index).ok()?,
        ];
        let child = mpk.derive_pub(secp, &path).ok()?;
        Some(hash160(&child.public_key.serialize()))
    }

    /// Extend `internal`/`external` so that at least `gap_limit` unused
    /// addresses follow the last used one. Returns the index of the first
    /// unused address in the chain.
    fn ensure_chain(
        &mut self,
        secp: &Secp256k1<All>,
        mpk: &Xpub,
        internal: bool,
        gap_limit: u32,
    ) -> usize {
        let chain_id = if internal { INTERNAL_CHAIN } else { EXTERNAL_CHAIN };

        let mut count =
            if internal { self.internal_chain.len() } else { self.external_chain.len() };
        let mut first_unused = count;
        {
            let chain = if internal { &self.internal_chain } else { &self.external_chain };
            while first_unused > 0 && !self.used_pkh.contains(&chain[first_unused - 1]) {
                first_unused -= 1;
            }
        }

        while first_unused + gap_limit as usize > count {
            let Some(pkh) = self.derive_pkh(secp, mpk, chain_id, count as u32) else { break };
            if internal {
                self.internal_chain.push(pkh);
            } else {
                self.external_chain.push(pkh);
            }
            self.all_pkh.insert(pkh);
            count += 1;
            // history replay may mark freshly derived addresses as used
            if self.used_pkh.contains(&pkh) {
                first_unused = count;
            }
        }

        first_unused
    }

    fn chain(&self, internal: bool) -> &Vec<Pkh> {
        if internal {
            &self.internal_chain
        } else {
            &self.external_chain
        }
    }

    /// Chain position of the first output address appearing in `chain`
    /// (scanning the chain from its end), used as a sort tiebreaker.
    fn tx_chain_index(&self, tx: &Transaction, internal: bool) -> Option<usize> {
        let chain = self.chain(internal);
        for i in (0..chain.len()).rev() {
            for output in &tx.outputs {
                if script_pkh(&output.script) == Some(chain[i]) {
                    return Some(i);
                }
            }
        }
        None
    }

    fn tx_is_ascending(&self, a: &Txid, b: &Txid) -> bool {
        let (Some(tx1), Some(tx2)) = (self.all_tx.get(a), self.all_tx.get(b)) else {
            return false;
        };
        if tx1.block_height > tx2.block_height {
            return true;
        }
        if tx1.block_height < tx2.block_height {
            return false;
        }
        if tx1.inputs.iter().any(|input| input.prev_hash == *b) {
            return true;
        }
        if tx2.inputs.iter().any(|input| input.prev_hash == *a) {
            return false;
        }
        tx1.inputs.iter().any(|input| {
            self.all_tx.contains_key(&input.prev_hash) && self.tx_is_ascending(&input.prev_hash, b)
        })
    }

    fn tx_compare(&self, a: &Txid, b: &Txid) -> std::cmp::Ordering {
        use std::cmp::Ordering::*;
        if self.tx_is_ascending(a, b) {
            return Greater;
        }
        if self.tx_is_ascending(b, a) {
            return Less;
        }
        let (tx1, tx2) = (&self.all_tx[a], &self.all_tx[b]);
        let (mut i, mut j) = (None, None);
        if let Some(index) = self.tx_chain_index(tx1, true) {
            i = Some(index);
            j = self.tx_chain_index(tx2, true);
        }
        if j.is_none() {
            if let Some(index) = self.tx_chain_index(tx1, false) {
                i = Some(index);
                j = self.tx_chain_index(tx2, false);
            }
        }
        match (i, j) {
            (Some(i), Some(j)) if i != j => i.cmp(&j),
            _ => Equal,
        }
    }

    /// Insertion sort keeping the history oldest-first.
    fn insert_tx(&mut self, txid: Txid) {
        let mut i = self.transactions.len();
        while i > 0 && self.tx_compare(&self.transactions[i - 1], &txid) == std::cmp::Ordering::Greater
        {
            i -= 1;
        }
        self.transactions.insert(i, txid);
    }

    /// True if `tx` is attributable to the wallet: pays one of our addresses,
    /// spends one of our outputs, or reveals one of our public keys.
    fn contains_tx(&self, tx: &Transaction) -> bool {
        for output in &tx.outputs {
            if script_pkh(&output.script).is_some_and(|pkh| self.all_pkh.contains(&pkh)) {
                return true;
            }
        }
        for input in &tx.inputs {
            if let Some(parent) = self.all_tx.get(&input.prev_hash) {
                if let Some(output) = parent.outputs.get(input.prev_index as usize) {
                    if script_pkh(&output.script).is_some_and(|pkh| self.all_pkh.contains(&pkh)) {
                        return true;
                    }
                }
            }
        }
        for input in &tx.inputs {
            let pkh = if !input.witness.is_empty() {
                witness_pkh(&input.witness)
            } else {
                signature_pkh(&input.signature)
            };
            if pkh.is_some_and(|pkh| self.all_pkh.contains(&pkh)) {
                return true;
            }
        }
        false
    }

    /// Replay the sorted history, classifying each transaction as invalid,
    /// pending or effective, and rebuilding the UTXO set, the used-address
    /// set and the balance history.
    fn update_balance(&mut self) {
        let now = unix_now();
        let mut balance = 0u64;
        let mut prev_balance = 0u64;

        self.utxos.clear();
        self.balance_hist.clear();
        self.spent_outputs.clear();
        self.invalid_tx.clear();
        self.pending_tx.clear();
        self.used_pkh.clear();
        self.total_sent = 0;
        self.total_received = 0;

        for position in 0..self.transactions.len() {
            let txid = self.transactions[position];
            let tx = &self.all_tx[&txid];

            // a double spend or a spend of an invalid parent
            if tx.block_height == TX_UNCONFIRMED {
                let is_invalid = tx.inputs.iter().any(|input| {
                    self.spent_outputs.contains(&input.utxo())
                        || self.invalid_tx.contains(&input.prev_hash)
                });
                if is_invalid {
                    self.invalid_tx.insert(txid);
                    self.balance_hist.push(balance);
                    continue;
                }
            }

            let spent: Vec<Utxo> = tx.inputs.iter().map(TxInput::utxo).collect();
            for utxo in spent {
                self.spent_outputs.insert(utxo);
            }

            let tx = &self.all_tx[&txid];
            if tx.block_height == TX_UNCONFIRMED {
                let mut is_pending = tx.vsize() > TX_MAX_SIZE;
                is_pending |= tx.outputs.iter().any(|o| o.amount < TX_MIN_OUTPUT_AMOUNT);
                for input in &tx.inputs {
                    // replace-by-fee
                    if input.sequence < SEQUENCE_FINAL - 1 {
                        is_pending = true;
                    }
                    // future lock time, as height or timestamp
                    if input.sequence < SEQUENCE_FINAL
                        && tx.lock_time < TX_MAX_LOCK_HEIGHT
                        && tx.lock_time > self.block_height + 1
                    {
                        is_pending = true;
                    }
                    if input.sequence < SEQUENCE_FINAL
                        && tx.lock_time >= TX_MAX_LOCK_HEIGHT
                        && tx.lock_time > now
                    {
                        is_pending = true;
                    }
                    if self.pending_tx.contains(&input.prev_hash) {
                        is_pending = true;
                    }
                }
                if is_pending {
                    self.pending_tx.insert(txid);
                    self.balance_hist.push(balance);
                    continue;
                }
            }

            let tx = &self.all_tx[&txid];
            let mut received: Vec<(Pkh, Utxo, u64)> = Vec::new();
            for (index, output) in tx.outputs.iter().enumerate() {
                if let Some(pkh) = script_pkh(&output.script) {
                    if self.all_pkh.contains(&pkh) {
                        received.push((pkh, Utxo { hash: txid, index: index as u32 }, output.amount));
                    }
                }
            }
            for (pkh, utxo, amount) in received {
                self.used_pkh.insert(pkh);
                self.utxos.push(utxo);
                balance += amount;
            }

            // ordering of arrivals is not guaranteed; sweep the whole UTXO
            // set against the spent-output set
            for index in (0..self.utxos.len()).rev() {
                let utxo = self.utxos[index];
                if !self.spent_outputs.contains(&utxo) {
                    continue;
                }
                let amount = self.all_tx[&utxo.hash].outputs[utxo.index as usize].amount;
                balance -= amount;
                self.utxos.remove(index);
            }

            if prev_balance < balance {
                self.total_received += balance - prev_balance;
            }
            if balance < prev_balance {
                self.total_sent += prev_balance - balance;
            }
            self.balance_hist.push(balance);
            prev_balance = balance;
        }

        assert_eq!(self.balance_hist.len(), self.transactions.len());
        self.balance = balance;
    }

    fn min_output_amount(&self, fee_per_kb: u64) -> u64 {
        tx_fee(fee_per_kb, TX_OUTPUT_SIZE + TX_INPUT_SIZE).max(TX_MIN_OUTPUT_AMOUNT)
    }

    fn is_pending(&self, tx: &Transaction, now: u32) -> bool {
        if tx.block_height != TX_UNCONFIRMED {
            return false;
        }
        if tx.vsize() > TX_MAX_SIZE {
            return true;
        }
        if tx.outputs.iter().any(|o| o.amount < TX_MIN_OUTPUT_AMOUNT) {
            return true;
        }
        for input in &tx.inputs {
            if input.sequence < SEQUENCE_FINAL - 1 {
                return true;
            }
            if input.sequence < SEQUENCE_FINAL
                && tx.lock_time < TX_MAX_LOCK_HEIGHT
                && tx.lock_time > self.block_height + 1
            {
                return true;
            }
            if input.sequence < SEQUENCE_FINAL
                && tx.lock_time >= TX_MAX_LOCK_HEIGHT
                && tx.lock_time > now
            {
                return true;
            }
            if let Some(parent) = self.all_tx.get(&input.prev_hash) {
                if self.is_pending(parent, now) {
                    return true;
                }
            }
        }
        false
    }

    fn is_valid(&self, tx: &Transaction) -> bool {
        if tx.block_height != TX_UNCONFIRMED {
            return true;
        }
        let txid = tx.txid();
        if self.all_tx.contains_key(&txid) {
            if self.invalid_tx.contains(&txid) {
                return false;
            }
        } else if tx.inputs.iter().any(|input| self.spent_outputs.contains(&input.utxo())) {
            return false;
        }
        tx.inputs.iter().all(|input| match self.all_tx.get(&input.prev_hash) {
            Some(parent) => self.is_valid(parent),
            None => true,
        })
    }

    fn amount_received(&self, tx: &Transaction) -> u64 {
        tx.outputs
            .iter()
            .filter(|o| script_pkh(&o.script).is_some_and(|pkh| self.all_pkh.contains(&pkh)))
            .map(|o| o.amount)
            .sum()
    }

    fn amount_sent(&self, tx: &Transaction) -> u64 {
        tx.inputs
            .iter()
            .filter_map(|input| {
                let parent = self.all_tx.get(&input.prev_hash)?;
                let output = parent.outputs.get(input.prev_index as usize)?;
                script_pkh(&output.script)
                    .filter(|pkh| self.all_pkh.contains(pkh))
                    .map(|_| output.amount)
            })
            .sum()
    }

    fn fee_for_tx(&self, tx: &Transaction) -> Option<u64> {
        let mut amount = 0u64;
        for input in &tx.inputs {
            let parent = self.all_tx.get(&input.prev_hash)?;
            let output = parent.outputs.get(input.prev_index as usize)?;
            amount += output.amount;
        }
        let spent: u64 = tx.outputs.iter().map(|o| o.amount).sum();
        amount.checked_sub(spent)
    }
}

impl Wallet {
    /// The wallet master public key for `params`, derived from the seed at
    /// the chain's account path.
    pub fn master_pub_key(seed: &Seed, params: &AddressParams) -> Result<Xpub, WalletError> {
        let path = DerivationPath::from_str(params.bip32_path)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        crate::keys::account_xpub(seed, &path)
    }

    /// Rebuild a wallet by replaying `transactions` (pre-signed, any order).
    /// Returns `None` when the first transaction is not attributable to
    /// `master_pub_key` — a key/tx-history mismatch.
    pub fn new(
        params: AddressParams,
        transactions: Vec<Transaction>,
        master_pub_key: Xpub,
        listener: Arc<dyn WalletListener>,
    ) -> Option<Wallet> {
        let account_path = DerivationPath::from_str(params.bip32_path).ok()?;
        let wallet = Wallet {
            params,
            master_pub_key,
            account_path,
            secp: Secp256k1::new(),
            listener,
            inner: Mutex::new(WalletInner {
                fee_per_kb: DEFAULT_FEE_PER_KB,
                block_height: 0,
                balance: 0,
                total_sent: 0,
                total_received: 0,
                balance_hist: Vec::new(),
                utxos: Vec::new(),
                transactions: Vec::new(),
                all_tx: HashMap::new(),
                invalid_tx: HashSet::new(),
                pending_tx: HashSet::new(),
                spent_outputs: HashSet::new(),
                used_pkh: HashSet::new(),
                all_pkh: HashSet::new(),
                internal_chain: Vec::new(),
                external_chain: Vec::new(),
            }),
        };

        let first_tx = transactions.first().cloned();
        {
            let mut inner = wallet.inner.lock().unwrap();
            for tx in transactions {
                let txid = tx.txid();
                if !tx.is_signed() || inner.all_tx.contains_key(&txid) {
                    continue;
                }
                for output in &tx.outputs {
                    if let Some(pkh) = script_pkh(&output.script) {
                        inner.used_pkh.insert(pkh);
                    }
                }
                inner.all_tx.insert(txid, tx);
                inner.insert_tx(txid);
            }

            inner.ensure_chain(&wallet.secp, &wallet.master_pub_key, false, GAP_LIMIT_EXTENDED);
            inner.ensure_chain(&wallet.secp, &wallet.master_pub_key, true, GAP_LIMIT_EXTENDED);
            inner.update_balance();

            // key/tx-history mismatch check
            if let Some(first) = first_tx {
                if !inner.contains_tx(&first) {
                    return None;
                }
            }
        }
        Some(wallet)
    }

    pub fn params(&self) -> &AddressParams {
        &self.params
    }

    /// At least `gap_limit` unused addresses following the last used one on
    /// the chosen chain; extends the chain as needed.
    pub fn unused_addrs(&self, internal: bool, gap_limit: u32) -> Vec<Address> {
        let mut inner = self.inner.lock().unwrap();
        let first = inner.ensure_chain(&self.secp, &self.master_pub_key, internal, gap_limit);
        let chain = inner.chain(internal);
        chain[first..(first + gap_limit as usize).min(chain.len())]
            .iter()
            .map(|pkh| Address::preferred(*pkh, &self.params))
            .collect()
    }

    /// First unused external address in the chain's preferred encoding.
    pub fn receive_address(&self) -> Option<Address> {
        self.unused_addrs(false, 1).into_iter().next()
    }

    /// First unused external address in legacy base58 form.
    pub fn legacy_address(&self) -> Option<Address> {
        let mut inner = self.inner.lock().unwrap();
        let first = inner.ensure_chain(&self.secp, &self.master_pub_key, false, 1);
        inner.external_chain.get(first).map(|pkh| Address::PubkeyHash(*pkh))
    }

    /// Every address generated so far, internal chain first.
    pub fn all_addresses(&self) -> Vec<Address> {
        let inner = self.inner.lock().unwrap();
        inner
            .internal_chain
            .iter()
            .chain(inner.external_chain.iter())
            .map(|pkh| Address::preferred(*pkh, &self.params))
            .collect()
    }

    /// Deduplicated string forms of every generated address, for indexer
    /// queries during sync.
    pub fn addresses_for_recovery(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut seen = HashSet::new();
        let mut addresses = Vec::new();
        for pkh in inner.external_chain.iter().chain(inner.internal_chain.iter()) {
            if seen.insert(*pkh) {
                addresses.push(Address::preferred(*pkh, &self.params).to_string_with(&self.params));
            }
        }
        addresses
    }

    pub fn contains_address(&self, addr: &str) -> bool {
        let Some(address) = Address::parse(addr, &self.params) else { return false };
        let pkh = match address {
            Address::PubkeyHash(pkh) | Address::WitnessPubkeyHash(pkh) => pkh,
            _ => return false,
        };
        self.inner.lock().unwrap().all_pkh.contains(&pkh)
    }

    pub fn address_is_used(&self, addr: &str) -> bool {
        let Some(address) = Address::parse(addr, &self.params) else { return false };
        let pkh = match address {
            Address::PubkeyHash(pkh) | Address::WitnessPubkeyHash(pkh) => pkh,
            _ => return false,
        };
        self.inner.lock().unwrap().used_pkh.contains(&pkh)
    }

    pub fn balance(&self) -> u64 {
        self.inner.lock().unwrap().balance
    }

    pub fn total_sent(&self) -> u64 {
        self.inner.lock().unwrap().total_sent
    }

    pub fn total_received(&self) -> u64 {
        self.inner.lock().unwrap().total_received
    }

    pub fn block_height(&self) -> u32 {
        self.inner.lock().unwrap().block_height
    }

    pub fn fee_per_kb(&self) -> u64 {
        self.inner.lock().unwrap().fee_per_kb
    }

    pub fn set_fee_per_kb(&self, fee_per_kb: u64) {
        self.inner.lock().unwrap().fee_per_kb = fee_per_kb;
    }

    pub fn utxos(&self) -> Vec<Utxo> {
        self.inner.lock().unwrap().utxos.clone()
    }

    /// Registered transactions, sorted oldest-first.
    pub fn transactions(&self) -> Vec<Transaction> {
        let inner = self.inner.lock().unwrap();
        inner.transactions.iter().map(|txid| inner.all_tx[txid].clone()).collect()
    }

    pub fn transaction_for_hash(&self, txid: &Txid) -> Option<Transaction> {
        self.inner.lock().unwrap().all_tx.get(txid).cloned()
    }

    /// Registered transactions that were unconfirmed before `block_height`.
    pub fn transactions_unconfirmed_before(&self, block_height: u32) -> Vec<Transaction> {
        let inner = self.inner.lock().unwrap();
        let mut n = 0;
        let total = inner.transactions.len();
        while n < total
            && inner.all_tx[&inner.transactions[total - n - 1]].block_height >= block_height
        {
            n += 1;
        }
        inner.transactions[total - n..].iter().map(|txid| inner.all_tx[txid].clone()).collect()
    }

    /// Wallet balance immediately after `tx`, or the current balance when
    /// `tx` is not registered.
    pub fn balance_after_tx(&self, tx: &Transaction) -> u64 {
        let inner = self.inner.lock().unwrap();
        let txid = tx.txid();
        inner
            .transactions
            .iter()
            .position(|t| *t == txid)
            .map(|i| inner.balance_hist[i])
            .unwrap_or(inner.balance)
    }

    /// Unsigned transaction sending `amount` to `addr`, or `None` on
    /// insufficient funds / oversize.
    pub fn create_transaction(
        &self,
        amount: u64,
        addr: &str,
        fee_per_kb: Option<u64>,
    ) -> Option<Transaction> {
        let address = Address::parse(addr, &self.params)?;
        self.create_tx_for_outputs(
            &[TxOutput { amount, script: address.script_pubkey() }],
            fee_per_kb,
        )
    }

    /// Coin selection: walk the UTXO set oldest-first, tracking the fee for
    /// the growing transaction plus one change output, until the selection
    /// covers amount + fee exactly or leaves room for a non-dust change
    /// output. Residual balance below the dust threshold is consumed into
    /// the fee in 100-satoshi steps.
    pub fn create_tx_for_outputs(
        &self,
        outputs: &[TxOutput],
        fee_per_kb: Option<u64>,
    ) -> Option<Transaction> {
        if outputs.is_empty() || outputs.iter().any(|o| o.script.is_empty()) {
            return None;
        }
        let amount: u64 = outputs.iter().map(|o| o.amount).sum();

        let mut tx = Transaction::new();
        for output in outputs {
            tx.add_output(output.amount, output.script.clone());
        }

        let mut inner = self.inner.lock().unwrap();
        let fee_per_kb = fee_per_kb.unwrap_or(inner.fee_per_kb);
        let min_amount = inner.min_output_amount(fee_per_kb);
        let mut fee_amount = tx_fee(fee_per_kb, tx.vsize() + TX_OUTPUT_SIZE);
        let mut balance = 0u64;

        for index in 0..inner.utxos.len() {
            let utxo = inner.utxos[index];
            let Some(parent) = inner.all_tx.get(&utxo.hash) else { continue };
            let Some(output) = parent.outputs.get(utxo.index as usize) else { continue };

            tx.add_input(TxInput {
                prev_hash: utxo.hash,
                prev_index: utxo.index,
                prev_amount: output.amount,
                script: output.script.clone(),
                signature: ScriptBuf::new(),
                witness: Witness::new(),
                sequence: SEQUENCE_FINAL,
            });
            balance += output.amount;

            // fee after accounting for a change output
            fee_amount = tx_fee(fee_per_kb, tx.vsize() + TX_OUTPUT_SIZE);

            // round the residual wallet balance off to the nearest 100 satoshi
            if inner.balance > amount + fee_amount {
                fee_amount += (inner.balance - (amount + fee_amount)) % 100;
            }

            if balance == amount + fee_amount || balance >= amount + fee_amount + min_amount {
                break;
            }
        }

        if balance >= amount + fee_amount + min_amount {
            let first = inner.ensure_chain(&self.secp, &self.master_pub_key, true, 1);
            let change_pkh = *inner.internal_chain.get(first)?;
            let change = Address::preferred(change_pkh, &self.params);
            tx.add_output(balance - (amount + fee_amount), change.script_pubkey());
            tx.shuffle_outputs();
        } else if balance != amount + fee_amount {
            debug!("coin selection failed: selected {balance} for {amount} + fee {fee_amount}");
            return None;
        }

        if tx.vsize() > TX_MAX_SIZE {
            return None;
        }
        Some(tx)
    }

    /// Sign every input whose previous-output script maps to one of the
    /// wallet's chain indices, deriving exactly those private keys from the
    /// seed and wiping them before returning.
    pub fn sign_transaction(
        &self,
        tx: &mut Transaction,
        fork_id: u8,
        seed: &Seed,
    ) -> Result<bool, WalletError> {
        let (internal_idx, external_idx) = {
            let inner = self.inner.lock().unwrap();
            let mut internal_idx = Vec::new();
            let mut external_idx = Vec::new();
            for input in &tx.inputs {
                let Some(pkh) = script_pkh(&input.script) else { continue };
                if let Some(i) = inner.internal_chain.iter().position(|c| *c == pkh) {
                    internal_idx.push(i as u32);
                }
                if let Some(i) = inner.external_chain.iter().position(|c| *c == pkh) {
                    external_idx.push(i as u32);
                }
            }
            (internal_idx, external_idx)
        };

        let account = account_xpriv(seed, &self.account_path)?;
        let mut keys = Vec::with_capacity(internal_idx.len() + external_idx.len());
        for (chain, indices) in [(INTERNAL_CHAIN, internal_idx), (EXTERNAL_CHAIN, external_idx)] {
            for index in indices {
                let path = [
                    ChildNumber::from_normal_idx(chain)
                        .map_err(|e| WalletError::KeyDerivation(e.to_string()))?,
                    ChildNumber::from_normal_idx(index)
                        .map_err(|e| WalletError::KeyDerivation(e.to_string()))?,
                ];
                let child = account
                    .derive_priv(&self.secp, &path)
                    .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
                keys.push(child.private_key);
            }
        }

        let signed = tx.sign(fork_id, &keys);
        for key in &mut keys {
            key.non_secure_erase();
        }
        Ok(signed)
    }

    /// Register a signed transaction. Returns false when the transaction is
    /// not attributable to the wallet; an unconfirmed foreign transaction is
    /// still retained for invalid-spend detection.
    pub fn register_transaction(&self, tx: Transaction) -> bool {
        if !tx.is_signed() {
            return false;
        }
        let txid = tx.txid();

        let mut registered = true;
        let mut added: Option<(Transaction, u64)> = None;
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.all_tx.contains_key(&txid) {
                if inner.contains_tx(&tx) {
                    inner.all_tx.insert(txid, tx.clone());
                    inner.insert_tx(txid);
                    inner.update_balance();
                    // a used address is replaced by a fresh one
                    inner.ensure_chain(&self.secp, &self.master_pub_key, false, GAP_LIMIT_EXTERNAL);
                    inner.ensure_chain(&self.secp, &self.master_pub_key, true, GAP_LIMIT_INTERNAL);
                    added = Some((tx, inner.balance));
                } else {
                    if tx.block_height == TX_UNCONFIRMED {
                        inner.all_tx.insert(txid, tx);
                    }
                    registered = false;
                }
            }
        }

        if let Some((tx, balance)) = added {
            self.listener.balance_changed(balance);
            self.listener.tx_added(&tx);
        }
        registered
    }

    /// Remove a transaction along with every descendant spending one of its
    /// outputs, descendants first. Emits `tx_deleted` per removal.
    pub fn remove_transaction(&self, txid: Txid) {
        let mut emitted: Vec<(Txid, bool, bool, u64)> = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.all_tx.contains_key(&txid) {
                return;
            }

            // dependent closure over the spend graph
            let mut to_remove = vec![txid];
            let mut cursor = 0;
            while cursor < to_remove.len() {
                let target = to_remove[cursor];
                for candidate in inner.transactions.iter() {
                    if to_remove.contains(candidate) {
                        continue;
                    }
                    if inner.all_tx[candidate].inputs.iter().any(|i| i.prev_hash == target) {
                        to_remove.push(*candidate);
                    }
                }
                cursor += 1;
            }

            // later history positions (descendants) removed first
            to_remove.sort_by_key(|t| {
                std::cmp::Reverse(inner.transactions.iter().position(|x| x == t))
            });

            for target in to_remove {
                let Some(position) = inner.transactions.iter().position(|t| *t == target) else {
                    continue;
                };
                let tx = inner.all_tx[&target].clone();
                inner.transactions.remove(position);
                inner.update_balance();

                let mut notify_user = false;
                let mut recommend_rescan = false;
                if inner.amount_sent(&tx) > 0 && inner.is_valid(&tx) {
                    notify_user = true;
                    // only recommend a rescan when every input parent is confirmed
                    recommend_rescan = tx.inputs.iter().all(|input| {
                        inner
                            .all_tx
                            .get(&input.prev_hash)
                            .map(|t| t.block_height != TX_UNCONFIRMED)
                            .unwrap_or(true)
                    });
                }
                emitted.push((target, notify_user, recommend_rescan, inner.balance));
            }
        }

        for (hash, notify_user, recommend_rescan, balance) in emitted {
            self.listener.balance_changed(balance);
            self.listener.tx_deleted(hash, notify_user, recommend_rescan);
        }
    }

    /// Set block height and timestamp for the given transactions. Idempotent
    /// for matching values; re-inserts updated transactions to keep the
    /// history sorted; frees confirmed non-wallet transactions.
    pub fn update_transactions(&self, hashes: &[Txid], block_height: u32, timestamp: u32) {
        let mut updated = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            if block_height != TX_UNCONFIRMED && block_height > inner.block_height {
                inner.block_height = block_height;
            }

            let mut needs_update = false;
            for hash in hashes {
                let Some(tx) = inner.all_tx.get(hash) else { continue };
                if tx.block_height == block_height && tx.timestamp == timestamp {
                    continue;
                }

                let tx = inner.all_tx.get_mut(hash).expect("present");
                tx.block_height = block_height;
                tx.timestamp = timestamp;
                let tx = inner.all_tx[hash].clone();

                if inner.contains_tx(&tx) {
                    if let Some(position) = inner.transactions.iter().position(|t| t == hash) {
                        inner.transactions.remove(position);
                        inner.insert_tx(*hash);
                    }
                    updated.push(*hash);
                    if inner.pending_tx.contains(hash) || inner.invalid_tx.contains(hash) {
                        needs_update = true;
                    }
                } else if block_height != TX_UNCONFIRMED {
                    // confirmed non-wallet tx no longer needed
                    inner.all_tx.remove(hash);
                }
            }

            if needs_update {
                inner.update_balance();
            }
        }

        if !updated.is_empty() {
            self.listener.tx_updated(&updated, block_height, timestamp);
        }
    }

    /// Chain-reorg primitive: mark everything confirmed above `block_height`
    /// as unconfirmed again and recompute the balance.
    pub fn set_tx_unconfirmed_after(&self, block_height: u32) {
        let mut hashes = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.block_height = block_height;

            let total = inner.transactions.len();
            let mut i = total;
            while i > 0 && inner.all_tx[&inner.transactions[i - 1]].block_height > block_height {
                i -= 1;
            }

            for position in i..total {
                let txid = inner.transactions[position];
                let tx = inner.all_tx.get_mut(&txid).expect("present");
                tx.block_height = TX_UNCONFIRMED;
                tx.timestamp = 0;
                hashes.push(txid);
            }
            if !hashes.is_empty() {
                warn!("reorg below {block_height}: {} transactions unconfirmed", hashes.len());
                inner.update_balance();
            }
        }

        if !hashes.is_empty() {
            self.listener.tx_updated(&hashes, TX_UNCONFIRMED, 0);
        }
    }

    /// True if no registered transaction already spends any of `tx`'s inputs
    /// and no input parent is invalid.
    pub fn transaction_is_valid(&self, tx: &Transaction) -> bool {
        self.inner.lock().unwrap().is_valid(tx)
    }

    /// True if `tx` (or an input parent) cannot be immediately confirmed:
    /// oversize, dust outputs, replace-by-fee or a future lock time.
    pub fn transaction_is_pending(&self, tx: &Transaction) -> bool {
        self.inner.lock().unwrap().is_pending(tx, unix_now())
    }

    /// True if `tx` is 0-conf safe: timestamped, valid, not pending, and all
    /// input parents verified.
    pub fn transaction_is_verified(&self, tx: &Transaction) -> bool {
        let inner = self.inner.lock().unwrap();
        fn verified(inner: &WalletInner, tx: &Transaction, now: u32) -> bool {
            if tx.block_height != TX_UNCONFIRMED {
                return true;
            }
            if tx.timestamp == 0 || !inner.is_valid(tx) || inner.is_pending(tx, now) {
                return false;
            }
            tx.inputs.iter().all(|input| match inner.all_tx.get(&input.prev_hash) {
                Some(parent) => verified(inner, parent, now),
                None => true,
            })
        }
        verified(&inner, tx, unix_now())
    }

    /// True if every wallet-relevant input has a registered parent and the
    /// transaction is signed.
    pub fn transaction_is_resolved(&self, tx: &Transaction) -> bool {
        let inner = self.inner.lock().unwrap();
        if !tx.is_signed() {
            return false;
        }
        tx.inputs.iter().all(|input| {
            let in_wallet = {
                let parent_pkh = inner.all_tx.get(&input.prev_hash).and_then(|parent| {
                    parent
                        .outputs
                        .get(input.prev_index as usize)
                        .and_then(|o| script_pkh(&o.script))
                });
                let revealed = if !input.witness.is_empty() {
                    witness_pkh(&input.witness)
                } else {
                    signature_pkh(&input.signature)
                };
                parent_pkh.is_some_and(|pkh| inner.all_pkh.contains(&pkh))
                    || revealed.is_some_and(|pkh| inner.all_pkh.contains(&pkh))
            };
            !in_wallet || inner.all_tx.contains_key(&input.prev_hash)
        })
    }

    /// Total outputs paying wallet addresses.
    pub fn amount_received_from_tx(&self, tx: &Transaction) -> u64 {
        self.inner.lock().unwrap().amount_received(tx)
    }

    /// Total wallet-owned previous outputs consumed (change and fee included).
    pub fn amount_sent_by_tx(&self, tx: &Transaction) -> u64 {
        self.inner.lock().unwrap().amount_sent(tx)
    }

    /// Fee paid by `tx`, when every input parent is registered.
    pub fn fee_for_tx(&self, tx: &Transaction) -> Option<u64> {
        self.inner.lock().unwrap().fee_for_tx(tx)
    }

    /// Fee for a transaction of the given virtual size at the wallet rate.
    pub fn fee_for_tx_size(&self, size: u64) -> u64 {
        tx_fee(self.inner.lock().unwrap().fee_per_kb, size)
    }

    /// Fee the wallet would pay to send `amount`.
    pub fn fee_for_amount(&self, amount: u64, fee_per_kb: Option<u64>) -> Option<u64> {
        let max = self.max_output_amount(fee_per_kb);
        // unspendable placeholder output
        let script = Address::PubkeyHash([0u8; 20]).script_pubkey();
        let tx =
            self.create_tx_for_outputs(&[TxOutput { amount: amount.min(max), script }], fee_per_kb)?;
        self.fee_for_tx(&tx)
    }

    /// Smallest economical output at the given rate.
    pub fn min_output_amount(&self, fee_per_kb: Option<u64>) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner.min_output_amount(fee_per_kb.unwrap_or(inner.fee_per_kb))
    }

    /// Largest amount sendable to a single address after fees.
    pub fn max_output_amount(&self, fee_per_kb: Option<u64>) -> u64 {
        let inner = self.inner.lock().unwrap();
        let fee_per_kb = fee_per_kb.unwrap_or(inner.fee_per_kb);

        let mut tx = Transaction::new();
        let mut amount = 0u64;
        for utxo in &inner.utxos {
            let Some(parent) = inner.all_tx.get(&utxo.hash) else { continue };
            let Some(output) = parent.outputs.get(utxo.index as usize) else { continue };
            tx.add_input(TxInput {
                prev_hash: utxo.hash,
                prev_index: utxo.index,
                prev_amount: output.amount,
                script: output.script.clone(),
                signature: ScriptBuf::new(),
                witness: Witness::new(),
                sequence: SEQUENCE_FINAL,
            });
            if tx.vsize() + TX_OUTPUT_SIZE * 2 > TX_MAX_SIZE {
                tx.inputs.pop();
                break;
            }
            amount += output.amount;
        }

        let fee = tx_fee(fee_per_kb, tx.vsize() + TX_OUTPUT_SIZE * 2);
        amount.saturating_sub(fee)
    }
}
