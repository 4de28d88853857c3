//! Ethereum account: the compressed public key at the standard BIP-44 path
//! and the address it controls.

use std::str::FromStr;

use bitcoin::bip32::DerivationPath;
use secp256k1::{PublicKey, Secp256k1};

use super::address::EthAddress;
use crate::chains::ChainAccount;
use crate::error::WalletError;
use crate::keys::{secp_secret_key, Seed};

const DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthAccount {
    public_key: PublicKey,
}

impl EthAccount {
    pub fn address(&self) -> EthAddress {
        EthAddress::from_pubkey(&self.public_key)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The secret key for signing; derived fresh from the seed, never held.
    pub fn secret_key(seed: &Seed) -> Result<secp256k1::SecretKey, WalletError> {
        let path = DerivationPath::from_str(DERIVATION_PATH)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        secp_secret_key(seed, &path)
    }
}

impl ChainAccount for EthAccount {
    fn from_seed(seed: &Seed) -> Result<EthAccount, WalletError> {
        let mut secret = EthAccount::secret_key(seed)?;
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret);
        secret.non_secure_erase();
        Ok(EthAccount { public_key })
    }

    fn from_bytes(bytes: &[u8]) -> Result<EthAccount, WalletError> {
        let public_key = PublicKey::from_slice(bytes)
            .map_err(|e| WalletError::InvalidAccount(e.to_string()))?;
        Ok(EthAccount { public_key })
    }

    fn serialize(&self) -> Vec<u8> {
        self.public_key.serialize().to_vec()
    }

    fn primary_address(&self) -> String {
        self.address().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_round_trip() {
        let seed = Seed::from_phrase(
            "boring head harsh green empty clip fatal typical found crane dinner timber",
        )
        .unwrap();
        let account = EthAccount::from_seed(&seed).unwrap();
        let restored = EthAccount::from_bytes(&account.serialize()).unwrap();
        assert_eq!(restored, account);
        assert!(account.primary_address().starts_with("0x"));
    }

    #[test]
    fn signing_key_matches_account() {
        let seed = Seed::from_phrase(
            "boring head harsh green empty clip fatal typical found crane dinner timber",
        )
        .unwrap();
        let account = EthAccount::from_seed(&seed).unwrap();
        let secret = EthAccount::secret_key(&seed).unwrap();
        let secp = Secp256k1::new();
        assert_eq!(PublicKey::from_secret_key(&secp, &secret), *account.public_key());
    }
}
