//! Ethereum: addresses, recoverable signatures, the EIP-712 typed-data
//! coder and legacy transaction assembly.

pub mod account;
pub mod address;
pub mod signer;
pub mod structure;
pub mod transaction;

pub use account::EthAccount;
pub use address::EthAddress;
pub use signer::{keccak256, Signature};
pub use structure::{FieldType, SignResult, StructureCoder};
pub use transaction::{EthTransaction, SignedEthTransaction};
