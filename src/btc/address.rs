//! Chain-tagged UTXO addresses.
//!
//! Equality is byte-equality of the decoded program; string round-trips go
//! through the chain's [`AddressParams`] so the same hash renders as `1..`,
//! `bc1..`, `ltc1..` etc. depending on the chain.

use bech32::{u5, FromBase32, ToBase32, Variant};
use bitcoin::blockdata::script::Instruction;
use bitcoin::hashes::{hash160, Hash};
use bitcoin::{PubkeyHash, Script, ScriptBuf, ScriptHash, WPubkeyHash, WScriptHash};

use super::params::AddressParams;

/// 20-byte public-key hash: `RIPEMD160(SHA256(pubkey))`.
pub type Pkh = [u8; 20];

pub fn hash160(data: &[u8]) -> Pkh {
    hash160::Hash::hash(data).to_byte_array()
}

/// A parsed address, i.e. the script program plus its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    PubkeyHash(Pkh),
    ScriptHash(Pkh),
    WitnessPubkeyHash(Pkh),
    WitnessScriptHash([u8; 32]),
}

impl Address {
    /// Parse a string under the given chain parameters. Bech32 parsing folds
    /// ASCII case before decoding; base58 is case-sensitive by construction.
    pub fn parse(s: &str, params: &AddressParams) -> Option<Address> {
        if let Some(hrp) = params.bech32_hrp {
            if let Ok((found_hrp, data, variant)) = bech32::decode(&s.to_lowercase()) {
                if found_hrp != hrp || data.is_empty() {
                    return None;
                }
                let version = data[0].to_u8();
                let program = Vec::<u8>::from_base32(&data[1..]).ok()?;
                return match (version, variant, program.len()) {
                    (0, Variant::Bech32, 20) => {
                        Some(Address::WitnessPubkeyHash(program.try_into().ok()?))
                    }
                    (0, Variant::Bech32, 32) => {
                        Some(Address::WitnessScriptHash(program.try_into().ok()?))
                    }
                    _ => None,
                };
            }
        }

        let payload = bs58::decode(s).with_check(None).into_vec().ok()?;
        if payload.len() != 21 {
            return None;
        }
        let hash: Pkh = payload[1..].try_into().ok()?;
        if payload[0] == params.pubkey_prefix {
            Some(Address::PubkeyHash(hash))
        } else if payload[0] == params.script_prefix {
            Some(Address::ScriptHash(hash))
        } else {
            None
        }
    }

    /// Canonical string form under the given chain parameters.
    pub fn to_string_with(&self, params: &AddressParams) -> String {
        match self {
            Address::PubkeyHash(hash) => {
                let mut payload = vec![params.pubkey_prefix];
                payload.extend_from_slice(hash);
                bs58::encode(payload).with_check().into_string()
            }
            Address::ScriptHash(hash) => {
                let mut payload = vec![params.script_prefix];
                payload.extend_from_slice(hash);
                bs58::encode(payload).with_check().into_string()
            }
            Address::WitnessPubkeyHash(hash) => {
                segwit_encode(params.bech32_hrp.unwrap_or("bc"), hash)
            }
            Address::WitnessScriptHash(hash) => {
                segwit_encode(params.bech32_hrp.unwrap_or("bc"), hash)
            }
        }
    }

    /// The scriptPubKey paying this address.
    pub fn script_pubkey(&self) -> ScriptBuf {
        match self {
            Address::PubkeyHash(hash) => {
                ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(*hash))
            }
            Address::ScriptHash(hash) => {
                ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(*hash))
            }
            Address::WitnessPubkeyHash(hash) => {
                ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array(*hash))
            }
            Address::WitnessScriptHash(hash) => {
                ScriptBuf::new_p2wsh(&WScriptHash::from_byte_array(*hash))
            }
        }
    }

    /// Recover the address from a recognized scriptPubKey pattern.
    pub fn from_script(script: &Script) -> Option<Address> {
        let bytes = script.as_bytes();
        if script.is_p2pkh() {
            Some(Address::PubkeyHash(bytes[3..23].try_into().ok()?))
        } else if script.is_p2sh() {
            Some(Address::ScriptHash(bytes[2..22].try_into().ok()?))
        } else if script.is_p2wpkh() {
            Some(Address::WitnessPubkeyHash(bytes[2..22].try_into().ok()?))
        } else if script.is_p2wsh() {
            Some(Address::WitnessScriptHash(bytes[2..34].try_into().ok()?))
        } else {
            None
        }
    }

    /// The wallet's first-unused-address kind for a chain: segwit when the
    /// chain has an HRP, legacy base58 otherwise.
    pub fn preferred(pkh: Pkh, params: &AddressParams) -> Address {
        if params.bech32_hrp.is_some() {
            Address::WitnessPubkeyHash(pkh)
        } else {
            Address::PubkeyHash(pkh)
        }
    }
}

fn segwit_encode(hrp: &str, program: &[u8]) -> String {
    let mut data = vec![u5::try_from_u8(0).expect("0 is a valid u5")];
    data.extend(program.to_base32());
    bech32::encode(hrp, data, Variant::Bech32).expect("valid hrp")
}

/// Extract the 20-byte hash key from a recognized scriptPubKey pattern
/// (P2PKH, P2SH, P2WPKH), or `None` for anything else.
pub fn script_pkh(script: &Script) -> Option<Pkh> {
    let bytes = script.as_bytes();
    if script.is_p2pkh() {
        bytes[3..23].try_into().ok()
    } else if script.is_p2sh() || script.is_p2wpkh() {
        bytes[2..22].try_into().ok()
    } else {
        None
    }
}

/// Hash of the public key revealed by a P2PKH scriptSig (its last push).
pub fn signature_pkh(script_sig: &Script) -> Option<Pkh> {
    let mut last_push: Option<&[u8]> = None;
    for instruction in script_sig.instructions() {
        if let Ok(Instruction::PushBytes(push)) = instruction {
            last_push = Some(push.as_bytes());
        }
    }
    let pubkey = last_push?;
    if pubkey.len() == 33 || pubkey.len() == 65 {
        Some(hash160(pubkey))
    } else {
        None
    }
}

/// Hash of the public key revealed by a P2WPKH witness (its last element).
pub fn witness_pkh(witness: &bitcoin::Witness) -> Option<Pkh> {
    let pubkey = witness.last()?;
    if pubkey.len() == 33 || pubkey.len() == 65 {
        Some(hash160(pubkey))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::super::params::{BCASH_MAINNET, BITCOIN_MAINNET, LITECOIN_MAINNET};
    use super::*;

    #[test]
    fn base58_round_trip() {
        let addr = Address::PubkeyHash([0x11; 20]);
        let s = addr.to_string_with(&BITCOIN_MAINNET);
        assert!(s.starts_with('1'));
        assert_eq!(Address::parse(&s, &BITCOIN_MAINNET), Some(addr));
    }

    #[test]
    fn bech32_round_trip_and_case_folding() {
        let addr = Address::WitnessPubkeyHash([0x42; 20]);
        let s = addr.to_string_with(&BITCOIN_MAINNET);
        assert!(s.starts_with("bc1"));
        assert_eq!(Address::parse(&s, &BITCOIN_MAINNET), Some(addr.clone()));
        assert_eq!(Address::parse(&s.to_uppercase(), &BITCOIN_MAINNET), Some(addr));
    }

    #[test]
    fn hrp_mismatch_is_rejected() {
        let addr = Address::WitnessPubkeyHash([0x42; 20]);
        let s = addr.to_string_with(&LITECOIN_MAINNET);
        assert!(s.starts_with("ltc1"));
        assert_eq!(Address::parse(&s, &BITCOIN_MAINNET), None);
    }

    #[test]
    fn bcash_has_no_segwit_form() {
        let addr = Address::preferred([0x42; 20], &BCASH_MAINNET);
        assert!(matches!(addr, Address::PubkeyHash(_)));
    }

    #[test]
    fn script_pkh_recognizes_standard_patterns() {
        let pkh = [7u8; 20];
        for addr in [
            Address::PubkeyHash(pkh),
            Address::ScriptHash(pkh),
            Address::WitnessPubkeyHash(pkh),
        ] {
            assert_eq!(script_pkh(&addr.script_pubkey()), Some(pkh));
        }
        assert_eq!(script_pkh(Script::from_bytes(&[0x6a, 0x01, 0x00])), None);
    }

    #[test]
    fn script_round_trips_through_address() {
        let addr = Address::WitnessPubkeyHash([9u8; 20]);
        assert_eq!(Address::from_script(&addr.script_pubkey()), Some(addr));
    }
}
