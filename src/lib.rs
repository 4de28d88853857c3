//! Multi-chain wallet engine.
//!
//! Accounts derive from BIP-39 mnemonics across Bitcoin-family UTXO chains,
//! Ethereum, Ripple, Stellar and Tezos. The crate provides:
//!
//! - the UTXO wallet core: gap-limit address discovery, insertion-sorted
//!   transaction history, coin selection, signing and reorg handling
//!   ([`btc::Wallet`]);
//! - the EIP-712 typed-data coder and recoverable signing
//!   ([`eth::StructureCoder`]);
//! - per-chain transaction builders ([`chains`], [`eth::EthTransaction`]);
//! - the indexer-driven sync engine and wallet-manager facade
//!   ([`manager::WalletManager`]), persisting its bundles through
//!   [`storage::FileService`].

pub mod account;
pub mod btc;
pub mod chains;
pub mod client;
pub mod error;
pub mod eth;
pub mod keys;
pub mod manager;
pub mod storage;

pub use account::Account;
pub use error::{ClientError, ClientErrorKind, StructureError, SubmitError, SubmitErrorKind, WalletError};
pub use keys::Seed;
pub use manager::events::{QueryByType, SyncMode};
pub use manager::system::{Network, System};
pub use manager::WalletManager;
