//! On-wire bundles announced by the indexer and their RLP persistence
//! encodings.
//!
//! Transfer bundles persist as a 16-field list (schema v2; v1 derived the
//! transfer index from the `uids` tail); transaction bundles as a 4-field
//! list; currency bundles carry a nested denomination list. File-service
//! identifiers are the SHA-256 of the bundle's primary unique field, whose
//! leading 16 bytes double as the in-memory dedup key.

use alloy_primitives::Bytes;
use alloy_rlp::{Decodable, Encodable, Header};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{StorageError, SubmitError, SubmitErrorKind};
use crate::manager::transfer::{FeeBasis, TransferState};

use super::BLOCK_HEIGHT_UNBOUND;

/// Lifecycle tag reported by the indexer for a transfer or transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransferStatus {
    Created,
    Signed,
    Submitted,
    Included,
    Errored,
    Deleted,
}

impl TransferStatus {
    pub fn from_u64(value: u64) -> Option<TransferStatus> {
        Some(match value {
            0 => TransferStatus::Created,
            1 => TransferStatus::Signed,
            2 => TransferStatus::Submitted,
            3 => TransferStatus::Included,
            4 => TransferStatus::Errored,
            5 => TransferStatus::Deleted,
            _ => return None,
        })
    }

    pub fn as_u64(&self) -> u64 {
        *self as u64
    }
}

/// Persisted transfer-bundle schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferBundleVersion {
    V1,
    V2,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferBundle {
    pub status: TransferStatus,
    pub hash: String,
    pub identifier: String,
    /// Globally unique within the indexer; the dedup and ordering tiebreak
    /// key.
    pub uids: String,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub currency: String,
    pub fee: Option<String>,
    pub transfer_index: u64,
    pub block_timestamp: u64,
    pub block_number: u64,
    pub block_confirmations: u64,
    pub block_transaction_index: u64,
    pub block_hash: String,
    pub attributes: Vec<(String, String)>,
}

impl TransferBundle {
    /// Ascending intake order: `(blockNumber, blockTxIndex, transferIndex,
    /// uids)`.
    pub fn sort_key(&self) -> (u64, u64, u64, &str) {
        (self.block_number, self.block_transaction_index, self.transfer_index, &self.uids)
    }

    /// SHA-256 of `uids`; hex form names the persisted file.
    pub fn identifier_hash(&self) -> [u8; 32] {
        Sha256::digest(self.uids.as_bytes()).into()
    }

    /// Leading 16 bytes of the identifier hash, the in-memory dedup key.
    pub fn set_hash(&self) -> [u8; 16] {
        self.identifier_hash()[..16].try_into().expect("sha256 is 32 bytes")
    }

    /// Transfer state carried by this bundle. An errored bundle that is
    /// nonetheless anchored in a block reports inclusion with a failed
    /// status.
    pub fn transfer_state(&self, confirmed_fee_basis: Option<FeeBasis>) -> TransferState {
        let anchored = self.block_number != BLOCK_HEIGHT_UNBOUND && self.block_timestamp != 0;
        match self.status {
            TransferStatus::Included => TransferState::Included {
                block_number: self.block_number,
                transaction_index: self.block_transaction_index,
                timestamp: self.block_timestamp,
                fee_basis: confirmed_fee_basis,
                success: true,
            },
            TransferStatus::Errored if anchored => TransferState::Included {
                block_number: self.block_number,
                transaction_index: self.block_transaction_index,
                timestamp: self.block_timestamp,
                fee_basis: confirmed_fee_basis,
                success: false,
            },
            TransferStatus::Errored => {
                TransferState::Errored(SubmitError::new(SubmitErrorKind::Unknown, None))
            }
            TransferStatus::Created => TransferState::Created,
            TransferStatus::Signed => TransferState::Signed,
            TransferStatus::Submitted => TransferState::Submitted,
            TransferStatus::Deleted => TransferState::Deleted,
        }
    }

    pub fn rlp_encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        self.status.as_u64().encode(&mut payload);
        self.uids.encode(&mut payload);
        self.hash.encode(&mut payload);
        self.identifier.encode(&mut payload);
        self.from.encode(&mut payload);
        self.to.encode(&mut payload);
        self.amount.encode(&mut payload);
        self.currency.encode(&mut payload);
        self.fee.clone().unwrap_or_default().encode(&mut payload);
        self.block_timestamp.encode(&mut payload);
        self.block_number.encode(&mut payload);
        self.block_confirmations.encode(&mut payload);
        self.block_transaction_index.encode(&mut payload);
        self.block_hash.encode(&mut payload);
        encode_attributes(&self.attributes, &mut payload);
        self.transfer_index.encode(&mut payload);

        finish_list(payload)
    }

    pub fn rlp_decode(
        buf: &[u8],
        version: TransferBundleVersion,
    ) -> Result<TransferBundle, StorageError> {
        let mut items = decode_list(buf)?;
        let status = TransferStatus::from_u64(decode_item::<u64>(&mut items)?)
            .ok_or_else(|| corrupt("unknown transfer status"))?;
        let uids: String = decode_item(&mut items)?;
        let hash: String = decode_item(&mut items)?;
        let identifier: String = decode_item(&mut items)?;
        let from: String = decode_item(&mut items)?;
        let to: String = decode_item(&mut items)?;
        let amount: String = decode_item(&mut items)?;
        let currency: String = decode_item(&mut items)?;
        let fee: String = decode_item(&mut items)?;
        let block_timestamp: u64 = decode_item(&mut items)?;
        let block_number: u64 = decode_item(&mut items)?;
        let block_confirmations: u64 = decode_item(&mut items)?;
        let block_transaction_index: u64 = decode_item(&mut items)?;
        let block_hash: String = decode_item(&mut items)?;
        let attributes = decode_attributes(&mut items)?;

        let transfer_index = match version {
            TransferBundleVersion::V2 => decode_item::<u64>(&mut items)?,
            // v1 derives the index from the uids tail: "<network>:<hash>:<index>"
            TransferBundleVersion::V1 => uids
                .rsplit_once(':')
                .and_then(|(_, tail)| tail.parse().ok())
                .unwrap_or(0),
        };

        Ok(TransferBundle {
            status,
            hash,
            identifier,
            uids,
            from,
            to,
            amount,
            currency,
            fee: if fee.is_empty() { None } else { Some(fee) },
            transfer_index,
            block_timestamp,
            block_number,
            block_confirmations,
            block_transaction_index,
            block_hash,
            attributes,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionBundle {
    pub status: TransferStatus,
    pub serialization: Vec<u8>,
    pub timestamp: u64,
    pub block_height: u64,
}

impl TransactionBundle {
    pub fn sort_key(&self) -> u64 {
        self.block_height
    }

    pub fn identifier_hash(&self) -> [u8; 32] {
        Sha256::digest(&self.serialization).into()
    }

    pub fn set_hash(&self) -> [u8; 16] {
        self.identifier_hash()[..16].try_into().expect("sha256 is 32 bytes")
    }

    pub fn rlp_encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        self.status.as_u64().encode(&mut payload);
        Bytes::copy_from_slice(&self.serialization).encode(&mut payload);
        self.timestamp.encode(&mut payload);
        self.block_height.encode(&mut payload);
        finish_list(payload)
    }

    pub fn rlp_decode(buf: &[u8]) -> Result<TransactionBundle, StorageError> {
        let mut items = decode_list(buf)?;
        let status = TransferStatus::from_u64(decode_item::<u64>(&mut items)?)
            .ok_or_else(|| corrupt("unknown transaction status"))?;
        let serialization: Bytes = decode_item(&mut items)?;
        let timestamp: u64 = decode_item(&mut items)?;
        let block_height: u64 = decode_item(&mut items)?;
        Ok(TransactionBundle { status, serialization: serialization.to_vec(), timestamp, block_height })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyDenomination {
    pub name: String,
    pub code: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyBundle {
    pub id: String,
    pub name: String,
    pub code: String,
    pub currency_type: String,
    pub blockchain_id: String,
    pub address: Option<String>,
    pub verified: bool,
    pub denominations: Vec<CurrencyDenomination>,
}

impl CurrencyBundle {
    pub fn identifier_hash(&self) -> [u8; 32] {
        Sha256::digest(self.id.as_bytes()).into()
    }

    pub fn set_hash(&self) -> [u8; 16] {
        self.identifier_hash()[..16].try_into().expect("sha256 is 32 bytes")
    }

    pub fn rlp_encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        self.id.encode(&mut payload);
        self.name.encode(&mut payload);
        self.code.encode(&mut payload);
        self.currency_type.encode(&mut payload);
        self.blockchain_id.encode(&mut payload);
        self.address.clone().unwrap_or_default().encode(&mut payload);
        (self.verified as u64).encode(&mut payload);

        let mut denominations = Vec::new();
        for denomination in &self.denominations {
            let mut item = Vec::new();
            denomination.name.encode(&mut item);
            denomination.code.encode(&mut item);
            denomination.symbol.encode(&mut item);
            (denomination.decimals as u64).encode(&mut item);
            denominations.extend_from_slice(&finish_list(item));
        }
        Header { list: true, payload_length: denominations.len() }.encode(&mut payload);
        payload.extend_from_slice(&denominations);

        finish_list(payload)
    }

    pub fn rlp_decode(buf: &[u8]) -> Result<CurrencyBundle, StorageError> {
        let mut items = decode_list(buf)?;
        let id: String = decode_item(&mut items)?;
        let name: String = decode_item(&mut items)?;
        let code: String = decode_item(&mut items)?;
        let currency_type: String = decode_item(&mut items)?;
        let blockchain_id: String = decode_item(&mut items)?;
        let address: String = decode_item(&mut items)?;
        let verified = decode_item::<u64>(&mut items)? != 0;

        let header = Header::decode(&mut items).map_err(|e| corrupt(&e.to_string()))?;
        if !header.list {
            return Err(corrupt("denominations must be a list"));
        }
        let (mut list, _) = items.split_at(header.payload_length);

        let mut denominations = Vec::new();
        while !list.is_empty() {
            let mut pair = decode_list_in_place(&mut list)?;
            denominations.push(CurrencyDenomination {
                name: decode_item(&mut pair)?,
                code: decode_item(&mut pair)?,
                symbol: decode_item(&mut pair)?,
                decimals: decode_item::<u64>(&mut pair)? as u8,
            });
        }

        Ok(CurrencyBundle {
            id,
            name,
            code,
            currency_type,
            blockchain_id,
            address: if address.is_empty() { None } else { Some(address) },
            verified,
            denominations,
        })
    }
}

fn encode_attributes(attributes: &[(String, String)], out: &mut Vec<u8>) {
    let mut payload = Vec::new();
    for (key, value) in attributes {
        let mut pair = Vec::new();
        key.encode(&mut pair);
        value.encode(&mut pair);
        payload.extend_from_slice(&finish_list(pair));
    }
    Header { list: true, payload_length: payload.len() }.encode(out);
    out.extend_from_slice(&payload);
}

fn decode_attributes(items: &mut &[u8]) -> Result<Vec<(String, String)>, StorageError> {
    let mut list = decode_list_in_place(items)?;
    let mut attributes = Vec::new();
    while !list.is_empty() {
        let mut pair = decode_list_in_place(&mut list)?;
        attributes.push((decode_item(&mut pair)?, decode_item(&mut pair)?));
    }
    Ok(attributes)
}

fn finish_list(payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 9);
    Header { list: true, payload_length: payload.len() }.encode(&mut out);
    out.extend_from_slice(&payload);
    out
}

fn decode_list(buf: &[u8]) -> Result<&[u8], StorageError> {
    let mut cursor = buf;
    let header = Header::decode(&mut cursor).map_err(|e| corrupt(&e.to_string()))?;
    if !header.list || cursor.len() < header.payload_length {
        return Err(corrupt("expected an RLP list"));
    }
    Ok(&cursor[..header.payload_length])
}

/// Decode a nested list header, advancing `items` past it and returning the
/// list payload.
fn decode_list_in_place<'a>(items: &mut &'a [u8]) -> Result<&'a [u8], StorageError> {
    let header = Header::decode(items).map_err(|e| corrupt(&e.to_string()))?;
    if !header.list || items.len() < header.payload_length {
        return Err(corrupt("expected a nested RLP list"));
    }
    let (payload, rest) = items.split_at(header.payload_length);
    *items = rest;
    Ok(payload)
}

fn decode_item<T: Decodable>(items: &mut &[u8]) -> Result<T, StorageError> {
    T::decode(items).map_err(|e| corrupt(&e.to_string()))
}

fn corrupt(reason: &str) -> StorageError {
    StorageError::Corrupt { path: String::new(), reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_transfer_bundle(uids: &str, block_number: u64) -> TransferBundle {
        TransferBundle {
            status: TransferStatus::Included,
            hash: format!("0xhash-{uids}"),
            identifier: format!("id-{uids}"),
            uids: uids.to_string(),
            from: "addr-from".into(),
            to: "addr-to".into(),
            amount: "125000".into(),
            currency: "btc".into(),
            fee: Some("310".into()),
            transfer_index: 1,
            block_timestamp: 1_650_000_000,
            block_number,
            block_confirmations: 6,
            block_transaction_index: 3,
            block_hash: "00000000a1b2".into(),
            attributes: vec![("memo".into(), "tea".into())],
        }
    }

    #[test]
    fn transfer_bundle_wire_json_uses_camel_case() {
        let bundle = sample_transfer_bundle("mainnet:0xabc:1", 700_000);
        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["status"], "INCLUDED");
        assert_eq!(json["blockTransactionIndex"], 3);
        assert_eq!(json["uids"], "mainnet:0xabc:1");
        let back: TransferBundle = serde_json::from_value(json).unwrap();
        assert_eq!(back, bundle);
    }

    #[test]
    fn transfer_bundle_v2_round_trip() {
        let bundle = sample_transfer_bundle("mainnet:0xabc:1", 700_000);
        let decoded =
            TransferBundle::rlp_decode(&bundle.rlp_encode(), TransferBundleVersion::V2).unwrap();
        assert_eq!(decoded, bundle);
    }

    #[test]
    fn transfer_bundle_without_fee_round_trips_as_none() {
        let mut bundle = sample_transfer_bundle("mainnet:0xdef:0", 700_001);
        bundle.fee = None;
        let decoded =
            TransferBundle::rlp_decode(&bundle.rlp_encode(), TransferBundleVersion::V2).unwrap();
        assert_eq!(decoded.fee, None);
    }

    #[test]
    fn transfer_bundle_v1_derives_index_from_uids() {
        let bundle = sample_transfer_bundle("mainnet:0xabc:7", 700_000);
        // v1 payloads have no trailing transferIndex field; re-encode without it
        let mut payload = Vec::new();
        bundle.status.as_u64().encode(&mut payload);
        bundle.uids.encode(&mut payload);
        bundle.hash.encode(&mut payload);
        bundle.identifier.encode(&mut payload);
        bundle.from.encode(&mut payload);
        bundle.to.encode(&mut payload);
        bundle.amount.encode(&mut payload);
        bundle.currency.encode(&mut payload);
        bundle.fee.clone().unwrap().encode(&mut payload);
        bundle.block_timestamp.encode(&mut payload);
        bundle.block_number.encode(&mut payload);
        bundle.block_confirmations.encode(&mut payload);
        bundle.block_transaction_index.encode(&mut payload);
        bundle.block_hash.encode(&mut payload);
        encode_attributes(&bundle.attributes, &mut payload);
        let encoded = finish_list(payload);

        let decoded = TransferBundle::rlp_decode(&encoded, TransferBundleVersion::V1).unwrap();
        assert_eq!(decoded.transfer_index, 7);
    }

    #[test]
    fn transaction_bundle_round_trip() {
        let bundle = TransactionBundle {
            status: TransferStatus::Submitted,
            serialization: vec![0xde, 0xad, 0xbe, 0xef],
            timestamp: 1_650_000_123,
            block_height: 700_002,
        };
        let decoded = TransactionBundle::rlp_decode(&bundle.rlp_encode()).unwrap();
        assert_eq!(decoded, bundle);
    }

    #[test]
    fn currency_bundle_round_trip() {
        let bundle = CurrencyBundle {
            id: "bitcoin-mainnet:__native__".into(),
            name: "Bitcoin".into(),
            code: "btc".into(),
            currency_type: "native".into(),
            blockchain_id: "bitcoin-mainnet".into(),
            address: None,
            verified: true,
            denominations: vec![
                CurrencyDenomination {
                    name: "satoshi".into(),
                    code: "sat".into(),
                    symbol: "sat".into(),
                    decimals: 0,
                },
                CurrencyDenomination {
                    name: "bitcoin".into(),
                    code: "btc".into(),
                    symbol: "₿".into(),
                    decimals: 8,
                },
            ],
        };
        let decoded = CurrencyBundle::rlp_decode(&bundle.rlp_encode()).unwrap();
        assert_eq!(decoded, bundle);
    }

    #[test]
    fn sort_key_orders_by_block_then_index_then_uids() {
        let mut bundles = vec![
            sample_transfer_bundle("c", 700_001),
            sample_transfer_bundle("b", 700_000),
            sample_transfer_bundle("a", 700_000),
        ];
        bundles.sort_by(|x, y| x.sort_key().cmp(&y.sort_key()));
        let uids: Vec<&str> = bundles.iter().map(|b| b.uids.as_str()).collect();
        assert_eq!(uids, ["a", "b", "c"]);
    }

    #[test]
    fn set_hash_is_leading_half_of_identifier() {
        let bundle = sample_transfer_bundle("x", 1);
        assert_eq!(bundle.set_hash()[..], bundle.identifier_hash()[..16]);
    }

    #[test]
    fn errored_but_anchored_bundle_reports_failed_inclusion() {
        let mut bundle = sample_transfer_bundle("y", 700_123);
        bundle.status = TransferStatus::Errored;
        match bundle.transfer_state(None) {
            TransferState::Included { success, block_number, .. } => {
                assert!(!success);
                assert_eq!(block_number, 700_123);
            }
            other => panic!("expected included-with-failure, got {other:?}"),
        }
    }
}
