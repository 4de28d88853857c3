//! Multi-chain account: per-chain public material derived once from a
//! BIP-39 seed. The account never holds the seed; signing paths take it as
//! an explicit argument and derive ephemeral keys.

use bitcoin::bip32::Xpub;

use crate::btc::params::BITCOIN_MAINNET;
use crate::btc::Wallet;
use crate::chains::xlm::XlmAccount;
use crate::chains::xrp::XrpAccount;
use crate::chains::xtz::TezosAccount;
use crate::chains::ChainAccount;
use crate::error::WalletError;
use crate::eth::EthAccount;
use crate::keys::Seed;

const SERIALIZATION_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    uids: String,
    timestamp: u64,
    btc: Xpub,
    eth: EthAccount,
    xrp: XrpAccount,
    xlm: XlmAccount,
    xtz: TezosAccount,
}

impl Account {
    /// Derive every chain's public material from a mnemonic phrase.
    /// `timestamp` anchors history discovery (account creation time).
    pub fn from_phrase(
        phrase: &str,
        uids: impl Into<String>,
        timestamp: u64,
    ) -> Result<Account, WalletError> {
        let seed = Seed::from_phrase(phrase)?;
        Self::from_seed(&seed, uids, timestamp)
    }

    pub fn from_seed(
        seed: &Seed,
        uids: impl Into<String>,
        timestamp: u64,
    ) -> Result<Account, WalletError> {
        Ok(Account {
            uids: uids.into(),
            timestamp,
            btc: Wallet::master_pub_key(seed, &BITCOIN_MAINNET)?,
            eth: EthAccount::from_seed(seed)?,
            xrp: XrpAccount::from_seed(seed)?,
            xlm: XlmAccount::from_seed(seed)?,
            xtz: TezosAccount::from_seed(seed)?,
        })
    }

    pub fn uids(&self) -> &str {
        &self.uids
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn btc_master_pub_key(&self) -> &Xpub {
        &self.btc
    }

    pub fn eth(&self) -> &EthAccount {
        &self.eth
    }

    pub fn xrp(&self) -> &XrpAccount {
        &self.xrp
    }

    pub fn xlm(&self) -> &XlmAccount {
        &self.xlm
    }

    pub fn xtz(&self) -> &TezosAccount {
        &self.xtz
    }

    /// Versioned serialization: length-prefixed per-chain blobs in fixed
    /// order, then the uids and timestamp.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![SERIALIZATION_VERSION];
        for blob in [
            self.btc.encode().to_vec(),
            self.eth.serialize(),
            self.xrp.serialize(),
            self.xlm.serialize(),
            self.xtz.serialize(),
            self.uids.as_bytes().to_vec(),
        ] {
            out.extend_from_slice(&(blob.len() as u16).to_be_bytes());
            out.extend_from_slice(&blob);
        }
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Account, WalletError> {
        let corrupt = |reason: &str| WalletError::InvalidAccount(reason.to_string());

        let mut cursor = bytes;
        let (&version, rest) = cursor.split_first().ok_or_else(|| corrupt("empty"))?;
        if version != SERIALIZATION_VERSION {
            return Err(corrupt("unknown serialization version"));
        }
        cursor = rest;

        let mut next = || -> Result<Vec<u8>, WalletError> {
            if cursor.len() < 2 {
                return Err(corrupt("truncated length prefix"));
            }
            let len = u16::from_be_bytes([cursor[0], cursor[1]]) as usize;
            cursor = &cursor[2..];
            if cursor.len() < len {
                return Err(corrupt("truncated blob"));
            }
            let (blob, rest) = cursor.split_at(len);
            cursor = rest;
            Ok(blob.to_vec())
        };

        let btc_bytes = next()?;
        let eth_bytes = next()?;
        let xrp_bytes = next()?;
        let xlm_bytes = next()?;
        let xtz_bytes = next()?;
        let uids_bytes = next()?;

        if cursor.len() != 8 {
            return Err(corrupt("truncated timestamp"));
        }
        let timestamp = u64::from_be_bytes(cursor.try_into().expect("checked length"));

        let btc_encoded: [u8; 78] =
            btc_bytes.as_slice().try_into().map_err(|_| corrupt("bad xpub length"))?;
        Ok(Account {
            uids: String::from_utf8(uids_bytes).map_err(|_| corrupt("bad uids"))?,
            timestamp,
            btc: Xpub::decode(&btc_encoded).map_err(|e| WalletError::InvalidAccount(e.to_string()))?,
            eth: EthAccount::from_bytes(&eth_bytes)?,
            xrp: XrpAccount::from_bytes(&xrp_bytes)?,
            xlm: XlmAccount::from_bytes(&xlm_bytes)?,
            xtz: TezosAccount::from_bytes(&xtz_bytes)?,
        })
    }
}
