//! Stellar accounts, strkey addresses and payment envelopes.
//!
//! Transactions serialize to XDR; the signature covers
//! `sha256(networkId || envelopeTypeTx || txXDR)` where the network id is
//! the SHA-256 of the network passphrase.

use crc::{Crc, CRC_16_XMODEM};
use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use super::ChainAccount;
use crate::error::WalletError;
use crate::keys::{slip10_ed25519, Seed};

const SLIP10_PATH: [u32; 3] = [44, 148, 0];

/// Strkey version byte for an ed25519 account (`G…`).
const VERSION_ACCOUNT_ID: u8 = 6 << 3;

const ENVELOPE_TYPE_TX: u32 = 2;

pub const NETWORK_PUBLIC: &str = "Public Global Stellar Network ; September 2015";
pub const NETWORK_TESTNET: &str = "Test SDF Network ; September 2015";

/// One stroop = 1e-7 XLM; amounts are i64 stroops on the wire.
pub const STROOPS_PER_LUMEN: i64 = 10_000_000;

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for byte in data {
        buffer = (buffer << 8) | *byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[(buffer >> bits) as usize & 0x1f] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[(buffer << (5 - bits)) as usize & 0x1f] as char);
    }
    out
}

fn base32_decode(s: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for c in s.bytes() {
        let value = BASE32_ALPHABET.iter().position(|a| *a == c)? as u32;
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
    }
    Some(out)
}

fn strkey_checksum(payload: &[u8]) -> [u8; 2] {
    Crc::<u16>::new(&CRC_16_XMODEM).checksum(payload).to_le_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XlmAddress(pub [u8; 32]);

impl XlmAddress {
    pub fn parse(s: &str) -> Option<XlmAddress> {
        let decoded = base32_decode(s)?;
        if decoded.len() != 35 || decoded[0] != VERSION_ACCOUNT_ID {
            return None;
        }
        let (payload, checksum) = decoded.split_at(33);
        if checksum != strkey_checksum(payload).as_slice() {
            return None;
        }
        Some(XlmAddress(payload[1..].try_into().ok()?))
    }
}

impl std::fmt::Display for XlmAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut payload = vec![VERSION_ACCOUNT_ID];
        payload.extend_from_slice(&self.0);
        let checksum = strkey_checksum(&payload);
        payload.extend_from_slice(&checksum);
        write!(f, "{}", base32_encode(&payload))
    }
}

/// Minimal XDR writer: everything Stellar needs here is big-endian 4/8-byte
/// integers and length-prefixed opaques padded to 4 bytes.
fn xdr_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn xdr_i64(out: &mut Vec<u8>, value: i64) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn xdr_opaque_var(out: &mut Vec<u8>, data: &[u8]) {
    xdr_u32(out, data.len() as u32);
    out.extend_from_slice(data);
    for _ in 0..(4 - data.len() % 4) % 4 {
        out.push(0);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XlmAccount {
    public_key: [u8; 32],
    sequence: i64,
}

impl XlmAccount {
    pub fn address(&self) -> XlmAddress {
        XlmAddress(self.public_key)
    }

    /// Starts at the ledger the account was created in, not at zero.
    pub fn set_sequence(&mut self, sequence: i64) {
        self.sequence = sequence;
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    /// Build a native-asset payment. The transaction's sequence is one more
    /// than the account's current value.
    pub fn build_payment(
        &self,
        destination: XlmAddress,
        amount_stroops: i64,
        fee_stroops: u32,
        memo: Option<String>,
    ) -> XlmTransaction {
        XlmTransaction {
            source: self.address(),
            destination,
            amount_stroops,
            fee_stroops,
            sequence: self.sequence + 1,
            memo,
            signature: None,
        }
    }
}

impl ChainAccount for XlmAccount {
    fn from_seed(seed: &Seed) -> Result<XlmAccount, WalletError> {
        let mut secret = slip10_ed25519(seed, &SLIP10_PATH);
        let signing_key = SigningKey::from_bytes(&secret);
        secret.zeroize();
        Ok(XlmAccount { public_key: signing_key.verifying_key().to_bytes(), sequence: 0 })
    }

    fn from_bytes(bytes: &[u8]) -> Result<XlmAccount, WalletError> {
        let public_key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| WalletError::InvalidAccount("stellar account must be 32 bytes".into()))?;
        Ok(XlmAccount { public_key, sequence: 0 })
    }

    fn serialize(&self) -> Vec<u8> {
        self.public_key.to_vec()
    }

    fn primary_address(&self) -> String {
        self.address().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XlmTransaction {
    pub source: XlmAddress,
    pub destination: XlmAddress,
    pub amount_stroops: i64,
    pub fee_stroops: u32,
    pub sequence: i64,
    pub memo: Option<String>,
    signature: Option<[u8; 64]>,
}

impl XlmTransaction {
    /// The transaction body XDR (no envelope, no signatures).
    pub fn serialize_unsigned(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // source account: KEY_TYPE_ED25519
        xdr_u32(&mut out, 0);
        out.extend_from_slice(&self.source.0);
        xdr_u32(&mut out, self.fee_stroops);
        xdr_i64(&mut out, self.sequence);
        // no time bounds
        xdr_u32(&mut out, 0);
        // memo: MEMO_NONE or MEMO_TEXT
        match &self.memo {
            Some(text) => {
                xdr_u32(&mut out, 1);
                xdr_opaque_var(&mut out, text.as_bytes());
            }
            None => xdr_u32(&mut out, 0),
        }
        // one payment operation, no per-op source override
        xdr_u32(&mut out, 1);
        xdr_u32(&mut out, 0);
        // PAYMENT
        xdr_u32(&mut out, 1);
        xdr_u32(&mut out, 0);
        out.extend_from_slice(&self.destination.0);
        // ASSET_TYPE_NATIVE
        xdr_u32(&mut out, 0);
        xdr_i64(&mut out, self.amount_stroops);
        // ext
        xdr_u32(&mut out, 0);
        out
    }

    /// Sign over `{sha256(passphrase), ENVELOPE_TYPE_TX, txXDR}` and return
    /// the envelope XDR with the decorated signature appended.
    pub fn serialize_and_sign(
        &mut self,
        seed: &Seed,
        network_passphrase: &str,
    ) -> Result<Vec<u8>, WalletError> {
        let tx_xdr = self.serialize_unsigned();

        let network_id: [u8; 32] = Sha256::digest(network_passphrase.as_bytes()).into();
        let mut preimage = Vec::with_capacity(32 + 4 + tx_xdr.len());
        preimage.extend_from_slice(&network_id);
        xdr_u32(&mut preimage, ENVELOPE_TYPE_TX);
        preimage.extend_from_slice(&tx_xdr);
        let digest: [u8; 32] = Sha256::digest(&preimage).into();

        let mut secret = slip10_ed25519(seed, &SLIP10_PATH);
        let signing_key = SigningKey::from_bytes(&secret);
        secret.zeroize();
        let signature = signing_key.sign(&digest).to_bytes();
        self.signature = Some(signature);

        let mut envelope = tx_xdr;
        // one decorated signature: hint = last 4 bytes of the public key
        xdr_u32(&mut envelope, 1);
        envelope.extend_from_slice(&self.source.0[28..]);
        xdr_opaque_var(&mut envelope, &signature);
        Ok(envelope)
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// `sha256(networkId || envelopeType || txXDR)`, the value signers and
    /// explorers identify the transaction by.
    pub fn hash(&self, network_passphrase: &str) -> [u8; 32] {
        let network_id: [u8; 32] = Sha256::digest(network_passphrase.as_bytes()).into();
        let mut preimage = network_id.to_vec();
        xdr_u32(&mut preimage, ENVELOPE_TYPE_TX);
        preimage.extend_from_slice(&self.serialize_unsigned());
        Sha256::digest(&preimage).into()
    }
}
