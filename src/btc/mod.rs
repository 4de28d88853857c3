//! Bitcoin-family UTXO chains: parameters, addresses, transactions and the
//! wallet core.

pub mod address;
pub mod params;
pub mod transaction;
pub mod wallet;

pub use address::{script_pkh, Address, Pkh};
pub use params::AddressParams;
pub use transaction::{Transaction, TxInput, TxOutput};
pub use wallet::{Utxo, Wallet, WalletListener};
