//! Ripple accounts, classic addresses and payment assembly.
//!
//! Transactions serialize in the XRPL canonical field order; signing covers
//! `sha512half("STX\0" || fields-without-signature)` and the final hash is
//! `sha512half("TXN\0" || signed-fields)`.

use std::str::FromStr;

use bitcoin::bip32::DerivationPath;
use secp256k1::{Message, PublicKey, Secp256k1};
use sha2::{Digest, Sha512};

use super::ChainAccount;
use crate::btc::address::hash160;
use crate::error::WalletError;
use crate::keys::{secp_secret_key, Seed};

const DERIVATION_PATH: &str = "m/44'/144'/0'/0/0";

/// Classic address version byte.
const ACCOUNT_ID_VERSION: u8 = 0x00;

/// `tfFullyCanonicalSig`.
const FLAGS: u32 = 0x8000_0000;

const PAYMENT_FEE_DROPS: u64 = 10;
/// Deleting an account burns a distinct, much larger fee.
const ACCOUNT_DELETE_FEE_DROPS: u64 = 2_000_000;

/// Custodial-exchange destinations that refuse payments without a
/// destination tag. Build-time resource, not a protocol constant.
const DESTINATION_TAG_REQUIRED: &[&str] = &[
    "rLNaPoKeeBjZe2qs6x52yVPZpZ8td4dc6w", // Coinbase
    "rw2ciyaNshpHe7bCHo4bRWq6pqqynnWKQg", // Coinbase
    "rEb8TK3gBgk5auZkwc6sHnwrGVJH8DuaLh", // Binance
    "rJb5KsHsDHF1YS5B5DU6QCkH5NsPaKQTcy", // Binance
    "rEy8TFcrAPvhpKrwyrscNYyqBGUkE9hKaJ", // Binance
    "rXieaAC3nevTKgVu2SYoShjTCS2Tfczqx",  // Wirex
    "r9HwsqBnAUN4nF6nDqxd4sgP8DrDnDcZP3", // BitBay
    "rLbKbPyuvs4wc1h13BEPHgbFGsRXMeFGL6", // BitBank
    "rw7m3CtVHwGSdhFjV4MyJozmZJv3DYQnsA", // BitBank
];

fn sha512half(data: &[u8]) -> [u8; 32] {
    let digest = Sha512::digest(data);
    digest[..32].try_into().expect("sha512 is 64 bytes")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XrpAddress(pub [u8; 20]);

impl XrpAddress {
    pub fn parse(s: &str) -> Option<XrpAddress> {
        let payload = bs58::decode(s)
            .with_alphabet(bs58::Alphabet::RIPPLE)
            .with_check(None)
            .into_vec()
            .ok()?;
        if payload.len() != 21 || payload[0] != ACCOUNT_ID_VERSION {
            return None;
        }
        Some(XrpAddress(payload[1..].try_into().ok()?))
    }

    pub fn from_public_key(public_key: &PublicKey) -> XrpAddress {
        XrpAddress(hash160(&public_key.serialize()))
    }

    /// Whether this destination is a known custodial address requiring a
    /// destination tag.
    pub fn requires_destination_tag(&self) -> bool {
        let rendered = self.to_string();
        DESTINATION_TAG_REQUIRED.iter().any(|known| known.eq_ignore_ascii_case(&rendered))
    }
}

impl std::fmt::Display for XrpAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut payload = vec![ACCOUNT_ID_VERSION];
        payload.extend_from_slice(&self.0);
        let encoded =
            bs58::encode(payload).with_alphabet(bs58::Alphabet::RIPPLE).with_check().into_string();
        write!(f, "{encoded}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrpOperationKind {
    Payment,
    AccountDelete,
}

impl XrpOperationKind {
    fn transaction_type(&self) -> u16 {
        match self {
            XrpOperationKind::Payment => 0,
            XrpOperationKind::AccountDelete => 21,
        }
    }

    /// The chain charges a different base fee for account deletion.
    pub fn default_fee_drops(&self) -> u64 {
        match self {
            XrpOperationKind::Payment => PAYMENT_FEE_DROPS,
            XrpOperationKind::AccountDelete => ACCOUNT_DELETE_FEE_DROPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XrpAccount {
    public_key: PublicKey,
    sequence: u32,
    last_ledger_sequence: u32,
}

impl XrpAccount {
    pub fn address(&self) -> XrpAddress {
        XrpAddress::from_public_key(&self.public_key)
    }

    /// Sequence of the next transaction; exactly one greater than the
    /// previous transaction from this account.
    pub fn set_sequence(&mut self, sequence: u32) {
        self.sequence = sequence;
    }

    pub fn set_last_ledger_sequence(&mut self, last_ledger_sequence: u32) {
        self.last_ledger_sequence = last_ledger_sequence;
    }

    /// Build an operation from this account. Payments to known custodial
    /// destinations must carry a destination tag.
    pub fn build(
        &self,
        kind: XrpOperationKind,
        destination: XrpAddress,
        amount_drops: u64,
        fee_drops: Option<u64>,
        destination_tag: Option<u32>,
    ) -> Result<XrpTransaction, WalletError> {
        if destination.requires_destination_tag() && destination_tag.is_none() {
            return Err(WalletError::InvalidAddress(format!(
                "{destination} requires a destination tag"
            )));
        }
        Ok(XrpTransaction {
            kind,
            account: self.address(),
            destination,
            amount_drops,
            fee_drops: fee_drops.unwrap_or_else(|| kind.default_fee_drops()),
            sequence: self.sequence,
            last_ledger_sequence: self.last_ledger_sequence,
            destination_tag,
            signing_pub_key: self.public_key,
            signature: None,
        })
    }
}

impl ChainAccount for XrpAccount {
    fn from_seed(seed: &Seed) -> Result<XrpAccount, WalletError> {
        let path = DerivationPath::from_str(DERIVATION_PATH)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        let mut secret = secp_secret_key(seed, &path)?;
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret);
        secret.non_secure_erase();
        Ok(XrpAccount { public_key, sequence: 0, last_ledger_sequence: 0 })
    }

    fn from_bytes(bytes: &[u8]) -> Result<XrpAccount, WalletError> {
        let public_key = PublicKey::from_slice(bytes)
            .map_err(|e| WalletError::InvalidAccount(e.to_string()))?;
        Ok(XrpAccount { public_key, sequence: 0, last_ledger_sequence: 0 })
    }

    fn serialize(&self) -> Vec<u8> {
        self.public_key.serialize().to_vec()
    }

    fn primary_address(&self) -> String {
        self.address().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XrpTransaction {
    pub kind: XrpOperationKind,
    pub account: XrpAddress,
    pub destination: XrpAddress,
    pub amount_drops: u64,
    pub fee_drops: u64,
    pub sequence: u32,
    pub last_ledger_sequence: u32,
    pub destination_tag: Option<u32>,
    signing_pub_key: PublicKey,
    signature: Option<Vec<u8>>,
}

impl XrpTransaction {
    /// Canonical field serialization; the signature field is included only
    /// when present.
    fn serialize_fields(&self, out: &mut Vec<u8>) {
        // UInt16 TransactionType
        out.push(0x12);
        out.extend_from_slice(&self.kind.transaction_type().to_be_bytes());
        // UInt32 Flags
        out.push(0x22);
        out.extend_from_slice(&FLAGS.to_be_bytes());
        // UInt32 Sequence
        out.push(0x24);
        out.extend_from_slice(&self.sequence.to_be_bytes());
        // UInt32 DestinationTag
        if let Some(tag) = self.destination_tag {
            out.push(0x2e);
            out.extend_from_slice(&tag.to_be_bytes());
        }
        // UInt32 LastLedgerSequence (field code 27)
        if self.last_ledger_sequence > 0 {
            out.push(0x20);
            out.push(27);
            out.extend_from_slice(&self.last_ledger_sequence.to_be_bytes());
        }
        // Amount (native drops carry the positive bit)
        out.push(0x61);
        out.extend_from_slice(&(self.amount_drops | 0x4000_0000_0000_0000).to_be_bytes());
        // Fee
        out.push(0x68);
        out.extend_from_slice(&(self.fee_drops | 0x4000_0000_0000_0000).to_be_bytes());
        // SigningPubKey
        out.push(0x73);
        out.push(33);
        out.extend_from_slice(&self.signing_pub_key.serialize());
        // TxnSignature
        if let Some(signature) = &self.signature {
            out.push(0x74);
            out.push(signature.len() as u8);
            out.extend_from_slice(signature);
        }
        // Account
        out.push(0x81);
        out.push(20);
        out.extend_from_slice(&self.account.0);
        // Destination
        out.push(0x83);
        out.push(20);
        out.extend_from_slice(&self.destination.0);
    }

    pub fn serialize_unsigned(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_fields(&mut out);
        out
    }

    /// Sign over the `STX` prefix, deriving the key from the seed and wiping
    /// it before returning the signed serialization.
    pub fn sign(&mut self, seed: &Seed) -> Result<Vec<u8>, WalletError> {
        let path = DerivationPath::from_str(DERIVATION_PATH)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        let mut secret = secp_secret_key(seed, &path)?;

        let mut preimage = b"STX\0".to_vec();
        {
            let unsigned = XrpTransaction { signature: None, ..self.clone() };
            unsigned.serialize_fields(&mut preimage);
        }
        let digest = sha512half(&preimage);

        let secp = Secp256k1::new();
        let signature = secp.sign_ecdsa(&Message::from_digest(digest), &secret);
        secret.non_secure_erase();

        self.signature = Some(signature.serialize_der().to_vec());
        Ok(self.serialize_unsigned())
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// `sha512half("TXN\0" || signed serialization)`.
    pub fn hash(&self) -> Option<[u8; 32]> {
        if !self.is_signed() {
            return None;
        }
        let mut preimage = b"TXN\0".to_vec();
        self.serialize_fields(&mut preimage);
        Some(sha512half(&preimage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_account() -> XrpAccount {
        let seed = Seed::from_phrase(
            "patient doctor olympic frog force glimpse endless antenna online dragon bargain someone",
        )
        .unwrap();
        let mut account = XrpAccount::from_seed(&seed).unwrap();
        account.set_sequence(7);
        account
    }

    #[test]
    fn address_round_trip() {
        let address = test_account().address();
        let rendered = address.to_string();
        assert!(rendered.starts_with('r'));
        assert_eq!(XrpAddress::parse(&rendered), Some(address));
    }

    #[test]
    fn account_serialization_round_trip() {
        let account = test_account();
        let restored = XrpAccount::from_bytes(&account.serialize()).unwrap();
        assert_eq!(restored.primary_address(), account.primary_address());
    }

    #[test]
    fn custodial_destination_requires_tag() {
        let coinbase = XrpAddress::parse("rLNaPoKeeBjZe2qs6x52yVPZpZ8td4dc6w").unwrap();
        assert!(coinbase.requires_destination_tag());

        let account = test_account();
        assert!(account.build(XrpOperationKind::Payment, coinbase, 1_000, None, None).is_err());
        assert!(account
            .build(XrpOperationKind::Payment, coinbase, 1_000, None, Some(12345))
            .is_ok());
    }

    #[test]
    fn account_delete_has_distinct_fee() {
        assert_eq!(XrpOperationKind::Payment.default_fee_drops(), 10);
        assert_eq!(XrpOperationKind::AccountDelete.default_fee_drops(), 2_000_000);
    }

    #[test]
    fn sign_produces_longer_serialization_and_hash() {
        let account = test_account();
        let destination = XrpAddress([9u8; 20]);
        let mut tx = account
            .build(XrpOperationKind::Payment, destination, 50_000, None, None)
            .unwrap();
        let unsigned = tx.serialize_unsigned();
        assert!(tx.hash().is_none());

        let seed = Seed::from_phrase(
            "patient doctor olympic frog force glimpse endless antenna online dragon bargain someone",
        )
        .unwrap();
        let signed = tx.sign(&seed).unwrap();
        assert!(signed.len() > unsigned.len());
        assert!(tx.hash().is_some());
    }
}
