//! Seed and key derivation shared by every chain.
//!
//! A 512-bit seed comes out of a BIP-39 mnemonic via PBKDF2-HMAC-SHA512
//! (the `bip39` crate). Secp256k1 chains derive through BIP-32
//! (`bitcoin::bip32`); the ed25519 chains (Stellar, Tezos) derive through
//! SLIP-10, which only admits hardened steps.

use bitcoin::bip32::{DerivationPath, Xpriv, Xpub};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::NetworkKind;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::WalletError;

/// 512-bit wallet seed. Zeroed on drop; signing routines borrow it and never
/// copy it beyond the ephemeral keys they derive.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Seed(pub [u8; 64]);

impl Seed {
    /// Derive the seed from a BIP-39 mnemonic phrase, empty passphrase.
    pub fn from_phrase(phrase: &str) -> Result<Seed, WalletError> {
        Self::from_phrase_with_passphrase(phrase, "")
    }

    pub fn from_phrase_with_passphrase(phrase: &str, passphrase: &str) -> Result<Seed, WalletError> {
        let mnemonic = bip39::Mnemonic::parse_normalized(phrase)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        Ok(Seed(mnemonic.to_seed_normalized(passphrase)))
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

/// Master extended private key over the whole seed.
pub fn master_xpriv(seed: &Seed) -> Result<Xpriv, WalletError> {
    Xpriv::new_master(NetworkKind::Main, &seed.0)
        .map_err(|e| WalletError::KeyDerivation(e.to_string()))
}

/// Account-level extended private key at `path`.
pub fn account_xpriv(seed: &Seed, path: &DerivationPath) -> Result<Xpriv, WalletError> {
    let secp = Secp256k1::new();
    master_xpriv(seed)?
        .derive_priv(&secp, path)
        .map_err(|e| WalletError::KeyDerivation(e.to_string()))
}

/// Account-level extended public key at `path` (the wallet "master public
/// key": all receive/change chains derive from it without the seed).
pub fn account_xpub(seed: &Seed, path: &DerivationPath) -> Result<Xpub, WalletError> {
    let secp = Secp256k1::new();
    Ok(Xpub::from_priv(&secp, &account_xpriv(seed, path)?))
}

/// Single secp256k1 secret key at a full derivation path.
pub fn secp_secret_key(seed: &Seed, path: &DerivationPath) -> Result<SecretKey, WalletError> {
    Ok(account_xpriv(seed, path)?.private_key)
}

type HmacSha512 = Hmac<Sha512>;

/// SLIP-10 ed25519 derivation. Every index in `path` is hardened; the
/// returned 32 bytes are the ed25519 signing-key seed at that node.
pub fn slip10_ed25519(seed: &Seed, path: &[u32]) -> [u8; 32] {
    let mut mac = HmacSha512::new_from_slice(b"ed25519 seed").expect("hmac accepts any key length");
    mac.update(&seed.0);
    let mut node = mac.finalize().into_bytes();

    for index in path {
        let hardened = 0x8000_0000u32 | index;
        let mut mac = HmacSha512::new_from_slice(&node[32..]).expect("hmac accepts any key length");
        mac.update(&[0u8]);
        mac.update(&node[..32]);
        mac.update(&hardened.to_be_bytes());
        node = mac.finalize().into_bytes();
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&node[..32]);
    node.as_mut_slice().zeroize();
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str =
        "boring head harsh green empty clip fatal typical found crane dinner timber";

    #[test]
    fn seed_from_phrase_is_deterministic() {
        let a = Seed::from_phrase(PHRASE).unwrap();
        let b = Seed::from_phrase(PHRASE).unwrap();
        assert_eq!(a.0, b.0);
    }

    #[test]
    fn invalid_phrase_is_rejected() {
        assert!(Seed::from_phrase("not a valid mnemonic at all").is_err());
    }

    #[test]
    fn slip10_depends_on_every_path_element() {
        let seed = Seed::from_phrase(PHRASE).unwrap();
        let a = slip10_ed25519(&seed, &[44, 1729, 0, 0]);
        let b = slip10_ed25519(&seed, &[44, 1729, 0, 1]);
        let c = slip10_ed25519(&seed, &[44, 148, 0]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
