//! Wallet-level transaction model for the UTXO family.
//!
//! Inputs carry the previous output's amount and script so that unsigned
//! transactions hold everything signing needs; consensus serialization,
//! txid/wtxid computation and virtual size delegate to the `bitcoin` crate.

use bitcoin::consensus::encode::{self, VarInt};
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::sighash::SighashCache;
use bitcoin::{absolute, transaction, Amount, OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Witness};
use bitcoin::{Txid, Wtxid};
use rand::seq::SliceRandom;

use super::address::{hash160, script_pkh};

/// Standard minimum relay fee rate, satoshis per 1000 vbytes.
pub const TX_FEE_PER_KB: u64 = 1_000;
/// Default wallet fee rate until the caller overrides it.
pub const DEFAULT_FEE_PER_KB: u64 = 10 * TX_FEE_PER_KB;
/// Estimated size of a typical output.
pub const TX_OUTPUT_SIZE: u64 = 34;
/// Estimated size of a typical compact-pubkey input.
pub const TX_INPUT_SIZE: u64 = 148;
/// No output may pay less than this.
pub const TX_MIN_OUTPUT_AMOUNT: u64 = TX_FEE_PER_KB * 3 * (TX_OUTPUT_SIZE + TX_INPUT_SIZE) / 1000;
/// No transaction may exceed this virtual size.
pub const TX_MAX_SIZE: u64 = 100_000;
/// Block height marking a transaction as unconfirmed.
pub const TX_UNCONFIRMED: u32 = u32::MAX;
/// Lock times below this are block heights, above it timestamps.
pub const TX_MAX_LOCK_HEIGHT: u32 = 500_000_000;
/// Sequence number of a finalized input.
pub const SEQUENCE_FINAL: u32 = u32::MAX;

pub const SATOSHIS: u64 = 100_000_000;
pub const MAX_MONEY: u64 = 21_000_000 * SATOSHIS;

/// Fee for a transaction of `size` vbytes at `fee_per_kb`, rounded up to the
/// nearest 100 satoshi and floored by the standard minimum relay fee.
pub fn tx_fee(fee_per_kb: u64, size: u64) -> u64 {
    let standard = size * TX_FEE_PER_KB / 1000;
    let fee = (size * fee_per_kb / 1000).div_ceil(100) * 100;
    fee.max(standard)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    pub prev_hash: Txid,
    pub prev_index: u32,
    /// Amount of the previous output; zero when unknown (parsed foreign tx).
    pub prev_amount: u64,
    /// The previous output's scriptPubKey, carried until signing.
    pub script: ScriptBuf,
    /// scriptSig once signed.
    pub signature: ScriptBuf,
    pub witness: Witness,
    pub sequence: u32,
}

impl TxInput {
    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty() || !self.witness.is_empty()
    }

    pub fn utxo(&self) -> super::wallet::Utxo {
        super::wallet::Utxo { hash: self.prev_hash, index: self.prev_index }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub amount: u64,
    pub script: ScriptBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
    pub block_height: u32,
    pub timestamp: u32,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    pub fn new() -> Transaction {
        Transaction {
            version: 2,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
            block_height: TX_UNCONFIRMED,
            timestamp: 0,
        }
    }

    pub fn add_input(&mut self, input: TxInput) {
        self.inputs.push(input);
    }

    pub fn add_output(&mut self, amount: u64, script: ScriptBuf) {
        self.outputs.push(TxOutput { amount, script });
    }

    /// All inputs carry a signature or witness.
    pub fn is_signed(&self) -> bool {
        !self.inputs.is_empty() && self.inputs.iter().all(TxInput::is_signed)
    }

    pub fn txid(&self) -> Txid {
        self.to_consensus().compute_txid()
    }

    pub fn wtxid(&self) -> Wtxid {
        self.to_consensus().compute_wtxid()
    }

    /// Consensus serialization (witness-inclusive when any witness exists).
    pub fn serialize(&self) -> Vec<u8> {
        encode::serialize(&self.to_consensus())
    }

    /// Parse a consensus serialization. Previous-output amounts and scripts
    /// are not recoverable from the wire form and are left empty.
    pub fn parse(bytes: &[u8]) -> Option<Transaction> {
        let tx: transaction::Transaction = encode::deserialize(bytes).ok()?;
        Some(Transaction {
            version: tx.version.0 as u32,
            inputs: tx
                .input
                .into_iter()
                .map(|txin| TxInput {
                    prev_hash: txin.previous_output.txid,
                    prev_index: txin.previous_output.vout,
                    prev_amount: 0,
                    script: ScriptBuf::new(),
                    signature: txin.script_sig,
                    witness: txin.witness,
                    sequence: txin.sequence.0,
                })
                .collect(),
            outputs: tx
                .output
                .into_iter()
                .map(|txout| TxOutput { amount: txout.value.to_sat(), script: txout.script_pubkey })
                .collect(),
            lock_time: tx.lock_time.to_consensus_u32(),
            block_height: TX_UNCONFIRMED,
            timestamp: 0,
        })
    }

    /// Virtual size per BIP-141. Unsigned inputs are estimated assuming
    /// compact-pubkey signatures.
    pub fn vsize(&self) -> u64 {
        let mut tx = self.to_consensus();
        for (txin, input) in tx.input.iter_mut().zip(&self.inputs) {
            if input.is_signed() {
                continue;
            }
            if input.script.is_p2wpkh() {
                let mut witness = Witness::new();
                witness.push([0u8; 72]);
                witness.push([0u8; 33]);
                txin.witness = witness;
            } else {
                // placeholder DER signature + compressed pubkey pushes
                let mut script_sig = Vec::with_capacity(107);
                script_sig.push(72);
                script_sig.extend_from_slice(&[0u8; 72]);
                script_sig.push(33);
                script_sig.extend_from_slice(&[0u8; 33]);
                txin.script_sig = ScriptBuf::from_bytes(script_sig);
            }
        }
        tx.vsize() as u64
    }

    /// Minimum fee for this transaction to relay.
    pub fn standard_fee(&self) -> u64 {
        self.vsize() * TX_FEE_PER_KB / 1000
    }

    pub fn shuffle_outputs(&mut self) {
        self.outputs.shuffle(&mut rand::thread_rng());
    }

    /// Sign every unsigned input whose previous-output script matches one of
    /// `keys`. `fork_id` is 0 for bitcoin, 0x40 for bcash (which signs the
    /// BIP-143 digest for all inputs). Returns true when the transaction is
    /// fully signed afterwards.
    pub fn sign(&mut self, fork_id: u8, keys: &[SecretKey]) -> bool {
        let secp = Secp256k1::new();
        let keyed: Vec<([u8; 20], SecretKey, Vec<u8>)> = keys
            .iter()
            .map(|key| {
                let pubkey = key.public_key(&secp).serialize().to_vec();
                (hash160(&pubkey), *key, pubkey)
            })
            .collect();

        for index in 0..self.inputs.len() {
            if self.inputs[index].is_signed() {
                continue;
            }
            let Some(pkh) = script_pkh(&self.inputs[index].script) else { continue };
            let Some((_, key, pubkey)) = keyed.iter().find(|(hash, _, _)| *hash == pkh) else {
                continue;
            };

            let hash_type = 0x01u32 | fork_id as u32;
            let segwit = self.inputs[index].script.is_p2wpkh();
            let digest = if segwit || fork_id != 0 {
                self.bip143_digest(index, &pkh, hash_type)
            } else {
                let tx = self.to_consensus();
                let cache = SighashCache::new(&tx);
                match cache.legacy_signature_hash(index, &self.inputs[index].script, hash_type) {
                    Ok(sighash) => sighash.to_byte_array(),
                    Err(_) => continue,
                }
            };

            let message = Message::from_digest(digest);
            let signature = secp.sign_ecdsa(&message, key);
            let mut sig_with_hashtype = signature.serialize_der().to_vec();
            sig_with_hashtype.push(hash_type as u8);

            let input = &mut self.inputs[index];
            if segwit {
                let mut witness = Witness::new();
                witness.push(&sig_with_hashtype);
                witness.push(pubkey);
                input.witness = witness;
            } else {
                let mut script_sig = Vec::with_capacity(sig_with_hashtype.len() + pubkey.len() + 2);
                script_sig.push(sig_with_hashtype.len() as u8);
                script_sig.extend_from_slice(&sig_with_hashtype);
                script_sig.push(pubkey.len() as u8);
                script_sig.extend_from_slice(pubkey);
                input.signature = ScriptBuf::from_bytes(script_sig);
            }
        }

        self.is_signed()
    }

    /// BIP-143 signature digest with the fork id folded into the hash type;
    /// the script code is the canonical P2PKH script over `pkh`.
    fn bip143_digest(&self, index: usize, pkh: &[u8; 20], hash_type: u32) -> [u8; 32] {
        let input = &self.inputs[index];

        let mut prevouts = Vec::with_capacity(self.inputs.len() * 36);
        let mut sequences = Vec::with_capacity(self.inputs.len() * 4);
        for txin in &self.inputs {
            prevouts.extend_from_slice(txin.prev_hash.as_byte_array());
            prevouts.extend_from_slice(&txin.prev_index.to_le_bytes());
            sequences.extend_from_slice(&txin.sequence.to_le_bytes());
        }

        let mut outputs = Vec::new();
        for txout in &self.outputs {
            outputs.extend_from_slice(&txout.amount.to_le_bytes());
            outputs.extend_from_slice(&encode::serialize(&VarInt(txout.script.len() as u64)));
            outputs.extend_from_slice(txout.script.as_bytes());
        }

        let script_code =
            ScriptBuf::new_p2pkh(&bitcoin::PubkeyHash::from_byte_array(*pkh));

        let mut preimage = Vec::new();
        preimage.extend_from_slice(&self.version.to_le_bytes());
        preimage.extend_from_slice(sha256d::Hash::hash(&prevouts).as_byte_array());
        preimage.extend_from_slice(sha256d::Hash::hash(&sequences).as_byte_array());
        preimage.extend_from_slice(input.prev_hash.as_byte_array());
        preimage.extend_from_slice(&input.prev_index.to_le_bytes());
        preimage.extend_from_slice(&encode::serialize(&VarInt(script_code.len() as u64)));
        preimage.extend_from_slice(script_code.as_bytes());
        preimage.extend_from_slice(&input.prev_amount.to_le_bytes());
        preimage.extend_from_slice(&input.sequence.to_le_bytes());
        preimage.extend_from_slice(sha256d::Hash::hash(&outputs).as_byte_array());
        preimage.extend_from_slice(&self.lock_time.to_le_bytes());
        preimage.extend_from_slice(&hash_type.to_le_bytes());

        sha256d::Hash::hash(&preimage).to_byte_array()
    }

    fn to_consensus(&self) -> transaction::Transaction {
        transaction::Transaction {
            version: transaction::Version(self.version as i32),
            lock_time: absolute::LockTime::from_consensus(self.lock_time),
            input: self
                .inputs
                .iter()
                .map(|input| TxIn {
                    previous_output: OutPoint { txid: input.prev_hash, vout: input.prev_index },
                    script_sig: input.signature.clone(),
                    sequence: Sequence(input.sequence),
                    witness: input.witness.clone(),
                })
                .collect(),
            output: self
                .outputs
                .iter()
                .map(|output| TxOut {
                    value: Amount::from_sat(output.amount),
                    script_pubkey: output.script.clone(),
                })
                .collect(),
        }
    }
}
