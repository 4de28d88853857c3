//! Remote-indexer client contract and the query-sync engine built on it.

pub mod bundle;
pub mod qry;

use async_trait::async_trait;

use crate::error::ClientError;
use bundle::{TransactionBundle, TransferBundle};

/// Sentinel for an unbounded upper block range.
pub const BLOCK_HEIGHT_UNBOUND: u64 = u64::MAX;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNumber {
    pub height: u64,
    pub verified_block_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResult {
    pub identifier: Option<String>,
    pub hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeEstimate {
    pub cost_units: u64,
    pub attributes: Vec<(String, String)>,
}

/// The functions the engine consumes from a remote indexer. Implementations
/// are free to block on the network; every call runs off the event-handler
/// task and its result is forwarded back as an event.
#[async_trait]
pub trait BlockchainClient: Send + Sync {
    async fn get_block_number(&self) -> Result<BlockNumber, ClientError>;

    async fn get_transactions(
        &self,
        addresses: &[String],
        beg_block: u64,
        end_block: u64,
    ) -> Result<Vec<TransactionBundle>, ClientError>;

    async fn get_transfers(
        &self,
        addresses: &[String],
        beg_block: u64,
        end_block: u64,
    ) -> Result<Vec<TransferBundle>, ClientError>;

    async fn submit_transaction(
        &self,
        identifier: Option<&str>,
        exchange_id: Option<&str>,
        raw: &[u8],
    ) -> Result<SubmitResult, ClientError>;

    async fn estimate_transaction_fee(
        &self,
        raw: &[u8],
        hash_hex: &str,
    ) -> Result<FeeEstimate, ClientError>;
}
