//! Tezos accounts, addresses and operation assembly.
//!
//! Operations are forged as `branch || op₁ || op₂ || …` with Zarith
//! (little-endian base-128) varints for every numeric field. Signing
//! prepends the generic watermark `0x03`, digests with blake2b-256 and
//! appends the raw ed25519 signature; the operation hash is the
//! base58check (`o…`) of blake2b-256 over the signed bytes.

use blake2::digest::consts::{U20, U32};
use blake2::{Blake2b, Digest};
use ed25519_dalek::{Signer, SigningKey};
use zeroize::Zeroize;

use super::ChainAccount;
use crate::error::WalletError;
use crate::keys::{slip10_ed25519, Seed};

const PREFIX_TZ1: [u8; 3] = [6, 161, 159];
const PREFIX_TZ2: [u8; 3] = [6, 161, 161];
const PREFIX_TZ3: [u8; 3] = [6, 161, 164];
const PREFIX_KT1: [u8; 3] = [2, 90, 121];
const PREFIX_BLOCK: [u8; 2] = [1, 52];
const PREFIX_OPERATION: [u8; 2] = [5, 116];

const TAG_REVEAL: u8 = 0x6b;
const TAG_TRANSACTION: u8 = 0x6c;
const TAG_DELEGATION: u8 = 0x6e;

/// Storage limit applied to ordinary operations.
pub const DEFAULT_STORAGE_LIMIT: u64 = 300;

const SLIP10_PATH: [u32; 4] = [44, 1729, 0, 0];

fn blake2b_160(data: &[u8]) -> [u8; 20] {
    Blake2b::<U20>::digest(data).into()
}

fn blake2b_256(data: &[u8]) -> [u8; 32] {
    Blake2b::<U32>::digest(data).into()
}

fn base58check(prefix: &[u8], payload: &[u8]) -> String {
    let mut bytes = prefix.to_vec();
    bytes.extend_from_slice(payload);
    bs58::encode(bytes).with_check().into_string()
}

fn base58check_decode(s: &str, prefix: &[u8], payload_len: usize) -> Option<Vec<u8>> {
    let bytes = bs58::decode(s).with_check(None).into_vec().ok()?;
    if bytes.len() != prefix.len() + payload_len || !bytes.starts_with(prefix) {
        return None;
    }
    Some(bytes[prefix.len()..].to_vec())
}

/// Zarith natural: little-endian base-128, continuation bit on every byte
/// but the last.
pub fn zarith_encode(mut n: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (n & 0x7f) as u8;
        n >>= 7;
        if n > 0 {
            out.push(byte | 0x80);
        } else {
            out.push(byte);
            return;
        }
    }
}

/// Decode a Zarith natural, returning the value and the bytes consumed.
pub fn zarith_decode(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        value = value.checked_add(u64::from(byte & 0x7f).checked_shl(7 * i as u32)?)?;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TezosAddress {
    /// `tz1`/`tz2`/`tz3`: curve tag plus the 20-byte key hash.
    Implicit { curve: u8, hash: [u8; 20] },
    /// `KT1` originated contract.
    Originated([u8; 20]),
}

impl TezosAddress {
    pub fn parse(s: &str) -> Option<TezosAddress> {
        for (curve, prefix) in [(0u8, PREFIX_TZ1), (1, PREFIX_TZ2), (2, PREFIX_TZ3)] {
            if let Some(payload) = base58check_decode(s, &prefix, 20) {
                return Some(TezosAddress::Implicit { curve, hash: payload.try_into().ok()? });
            }
        }
        base58check_decode(s, &PREFIX_KT1, 20)
            .and_then(|payload| Some(TezosAddress::Originated(payload.try_into().ok()?)))
    }

    pub fn from_public_key(public_key: &[u8; 32]) -> TezosAddress {
        TezosAddress::Implicit { curve: 0, hash: blake2b_160(public_key) }
    }

    /// 21-byte public-key-hash form used for operation sources and
    /// delegates.
    fn forge_pkh(&self, out: &mut Vec<u8>) {
        match self {
            TezosAddress::Implicit { curve, hash } => {
                out.push(*curve);
                out.extend_from_slice(hash);
            }
            TezosAddress::Originated(_) => {
                // an originated source cannot sign; forge as zeroed tz1
                out.push(0);
                out.extend_from_slice(&[0u8; 20]);
            }
        }
    }

    /// 22-byte contract-id form used for transaction destinations.
    fn forge_contract_id(&self, out: &mut Vec<u8>) {
        match self {
            TezosAddress::Implicit { curve, hash } => {
                out.push(0x00);
                out.push(*curve);
                out.extend_from_slice(hash);
            }
            TezosAddress::Originated(hash) => {
                out.push(0x01);
                out.extend_from_slice(hash);
                out.push(0x00);
            }
        }
    }
}

impl std::fmt::Display for TezosAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TezosAddress::Implicit { curve, hash } => {
                let prefix = match curve {
                    0 => PREFIX_TZ1,
                    1 => PREFIX_TZ2,
                    _ => PREFIX_TZ3,
                };
                write!(f, "{}", base58check(&prefix, hash))
            }
            TezosAddress::Originated(hash) => write!(f, "{}", base58check(&PREFIX_KT1, hash)),
        }
    }
}

/// Hash of the branch block an operation group is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TezosBlockHash(pub [u8; 32]);

impl TezosBlockHash {
    pub fn parse(s: &str) -> Option<TezosBlockHash> {
        let payload = base58check_decode(s, &PREFIX_BLOCK, 32)?;
        Some(TezosBlockHash(payload.try_into().ok()?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TezosOperationHash(pub [u8; 32]);

impl std::fmt::Display for TezosOperationHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", base58check(&PREFIX_OPERATION, &self.0))
    }
}

/// Per-operation cost parameters. The counter must be exactly one more than
/// the account's previous operation; batches use correlated counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TezosFeeBasis {
    pub fee: u64,
    pub gas_limit: u64,
    pub storage_limit: u64,
    pub counter: u64,
}

impl TezosFeeBasis {
    pub fn new(fee: u64, gas_limit: u64, counter: u64) -> TezosFeeBasis {
        TezosFeeBasis { fee, gas_limit, storage_limit: DEFAULT_STORAGE_LIMIT, counter }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TezosOperation {
    Reveal { source: TezosAddress, fee_basis: TezosFeeBasis, public_key: [u8; 32] },
    Transaction { source: TezosAddress, fee_basis: TezosFeeBasis, amount: u64, destination: TezosAddress },
    Delegation { source: TezosAddress, fee_basis: TezosFeeBasis, delegate: Option<TezosAddress> },
}

impl TezosOperation {
    fn forge(&self, out: &mut Vec<u8>) {
        let (tag, source, fee_basis) = match self {
            TezosOperation::Reveal { source, fee_basis, .. } => (TAG_REVEAL, source, fee_basis),
            TezosOperation::Transaction { source, fee_basis, .. } => {
                (TAG_TRANSACTION, source, fee_basis)
            }
            TezosOperation::Delegation { source, fee_basis, .. } => {
                (TAG_DELEGATION, source, fee_basis)
            }
        };

        out.push(tag);
        source.forge_pkh(out);
        zarith_encode(fee_basis.fee, out);
        zarith_encode(fee_basis.counter, out);
        zarith_encode(fee_basis.gas_limit, out);
        zarith_encode(fee_basis.storage_limit, out);

        match self {
            TezosOperation::Reveal { public_key, .. } => {
                out.push(0x00); // ed25519
                out.extend_from_slice(public_key);
            }
            TezosOperation::Transaction { amount, destination, .. } => {
                zarith_encode(*amount, out);
                destination.forge_contract_id(out);
                out.push(0x00); // no parameters
            }
            TezosOperation::Delegation { delegate, .. } => match delegate {
                Some(delegate) => {
                    out.push(0xff);
                    delegate.forge_pkh(out);
                }
                None => out.push(0x00),
            },
        }
    }
}

/// Forge an operation list after the 32-byte branch hash.
pub fn serialize_operation_list(operations: &[TezosOperation], branch: &TezosBlockHash) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + operations.len() * 64);
    out.extend_from_slice(&branch.0);
    for operation in operations {
        operation.forge(&mut out);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TezosAccount {
    public_key: [u8; 32],
}

impl TezosAccount {
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }
}

impl ChainAccount for TezosAccount {
    fn from_seed(seed: &Seed) -> Result<TezosAccount, WalletError> {
        let mut secret = slip10_ed25519(seed, &SLIP10_PATH);
        let signing_key = SigningKey::from_bytes(&secret);
        secret.zeroize();
        Ok(TezosAccount { public_key: signing_key.verifying_key().to_bytes() })
    }

    fn from_bytes(bytes: &[u8]) -> Result<TezosAccount, WalletError> {
        let public_key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| WalletError::InvalidAccount("tezos account must be 32 bytes".into()))?;
        Ok(TezosAccount { public_key })
    }

    fn serialize(&self) -> Vec<u8> {
        self.public_key.to_vec()
    }

    fn primary_address(&self) -> String {
        TezosAddress::from_public_key(&self.public_key).to_string()
    }
}

/// A one- or two-operation group (reveal + transaction batches carry
/// correlated counters) ready for signing.
#[derive(Debug, Clone)]
pub struct TezosTransaction {
    operations: Vec<TezosOperation>,
    signed_bytes: Option<Vec<u8>>,
}

impl TezosTransaction {
    pub fn new(operation: TezosOperation) -> TezosTransaction {
        TezosTransaction { operations: vec![operation], signed_bytes: None }
    }

    /// Reveal-then-transfer bundle; the reveal forges first.
    pub fn with_reveal(transfer: TezosOperation, reveal: TezosOperation) -> TezosTransaction {
        TezosTransaction { operations: vec![reveal, transfer], signed_bytes: None }
    }

    pub fn operations(&self) -> &[TezosOperation] {
        &self.operations
    }

    pub fn serialize_unsigned(&self, branch: &TezosBlockHash) -> Vec<u8> {
        serialize_operation_list(&self.operations, branch)
    }

    /// Forge, watermark, digest with blake2b-256 and sign with the ed25519
    /// key derived from the seed; the key is wiped before returning.
    pub fn serialize_and_sign(
        &mut self,
        seed: &Seed,
        branch: &TezosBlockHash,
    ) -> Result<&[u8], WalletError> {
        let forged = self.serialize_unsigned(branch);

        let mut watermarked = Vec::with_capacity(1 + forged.len());
        watermarked.push(0x03);
        watermarked.extend_from_slice(&forged);
        let digest = blake2b_256(&watermarked);

        let mut secret = slip10_ed25519(seed, &SLIP10_PATH);
        let signing_key = SigningKey::from_bytes(&secret);
        secret.zeroize();
        let signature = signing_key.sign(&digest);

        let mut signed = forged;
        signed.extend_from_slice(&signature.to_bytes());
        self.signed_bytes = Some(signed);
        Ok(self.signed_bytes.as_deref().expect("just set"))
    }

    pub fn signed_bytes(&self) -> Option<&[u8]> {
        self.signed_bytes.as_deref()
    }

    pub fn hash(&self) -> Option<TezosOperationHash> {
        Some(TezosOperationHash(blake2b_256(self.signed_bytes.as_deref()?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zarith_round_trip() {
        for n in [0u64, 1, 127, 128, 300, 10_200, 24_000, 52_500, 100_000, 6_307_075,
            u64::MAX >> 1]
        {
            let mut encoded = Vec::new();
            zarith_encode(n, &mut encoded);
            assert_eq!(zarith_decode(&encoded), Some((n, encoded.len())), "n = {n}");
        }
    }

    #[test]
    fn zarith_known_encodings() {
        let cases: [(u64, &str); 4] =
            [(300, "ac02"), (10_200, "d84f"), (24_000, "c0bb01"), (6_307_076, "84fa8003")];
        for (n, expected) in cases {
            let mut encoded = Vec::new();
            zarith_encode(n, &mut encoded);
            assert_eq!(hex::encode(&encoded), expected);
        }
    }

    #[test]
    fn address_prefixes() {
        assert!(TezosAddress::parse("tz1i5JJDhq7x8gVkpWq2Fwef3k7NEcBj2nJS").is_some());
        assert!(TezosAddress::parse("tz2TSvNTh2epDMhZHrw73nV9piBX7kLZ9K9m").is_some());
        assert!(TezosAddress::parse("tz3bEQoFCZEEfZMskefZ8q8e4eiHH1pssRax").is_some());
        assert!(TezosAddress::parse("KT1VG2WtYdSWz5E7chTeAdDPZNy2MpP8pTfL").is_some());
        assert!(TezosAddress::parse("tz4i5JJDhq7x8gVkpWq2Fwef3k7NEcBj2nJS").is_none());
        assert!(TezosAddress::parse("unknown").is_none());
    }

    #[test]
    fn address_round_trip() {
        let s = "tz1eEnQhbwf6trb8Q8mPb2RaPkNk2rN7BKi8";
        let address = TezosAddress::parse(s).unwrap();
        assert_eq!(address.to_string(), s);
    }

    #[test]
    fn account_from_seed_and_serialization_round_trip() {
        let seed = Seed::from_phrase(
            "patient doctor olympic frog force glimpse endless antenna online dragon bargain someone",
        )
        .unwrap();
        let account = TezosAccount::from_seed(&seed).unwrap();
        assert_eq!(
            hex::encode(account.public_key()),
            "efc82a1445744a87fec55fce35e1b7ec80f9bbed9df2a03bcdde1a346f3d4294"
        );
        assert_eq!(account.primary_address(), "tz1SeV3tueHQMTfquZSU7y98otvQTw6GDKaY");

        let restored = TezosAccount::from_bytes(&account.serialize()).unwrap();
        assert_eq!(restored, account);
    }
}
