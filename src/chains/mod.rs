//! Non-UTXO chain builders (Ripple, Stellar, Tezos) behind one small,
//! uniform account contract.

pub mod xlm;
pub mod xrp;
pub mod xtz;

use crate::error::WalletError;
use crate::keys::Seed;

/// The uniform per-chain account contract: derive from the wallet seed,
/// round-trip through an opaque serialization, and render the primary
/// address.
pub trait ChainAccount: Sized {
    fn from_seed(seed: &Seed) -> Result<Self, WalletError>;
    fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError>;
    fn serialize(&self) -> Vec<u8>;
    fn primary_address(&self) -> String;
}
