//! File-service persistence for currency, transfer and transaction bundles.
//!
//! Each bundle lands in `<base>/<entity>/<version>/<hex(sha256(key))>` as a
//! raw RLP payload. Loading tolerates corrupt entries (they are logged and
//! skipped) so one damaged file cannot wedge a wallet manager at startup.

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

use crate::client::bundle::{
    CurrencyBundle, TransactionBundle, TransferBundle, TransferBundleVersion,
};
use crate::error::StorageError;

const ENTITY_CURRENCY: &str = "currency";
const ENTITY_TRANSFER: &str = "transfer";
const ENTITY_TRANSACTION: &str = "transaction";

#[derive(Debug, Clone)]
pub struct FileService {
    base: PathBuf,
}

impl FileService {
    pub fn new(base: impl Into<PathBuf>) -> Result<FileService, StorageError> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        Ok(FileService { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn entity_dir(&self, entity: &str, version: u32) -> PathBuf {
        self.base.join(entity).join(version.to_string())
    }

    fn write(&self, entity: &str, version: u32, key: [u8; 32], payload: &[u8]) -> Result<(), StorageError> {
        let dir = self.entity_dir(entity, version);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(hex::encode(key)), payload)?;
        Ok(())
    }

    fn read_all(&self, entity: &str, version: u32) -> Vec<(PathBuf, Vec<u8>)> {
        let dir = self.entity_dir(entity, version);
        let Ok(entries) = fs::read_dir(&dir) else { return Vec::new() };
        let mut payloads = Vec::new();
        for entry in entries.flatten() {
            match fs::read(entry.path()) {
                Ok(bytes) => payloads.push((entry.path(), bytes)),
                Err(e) => warn!("skipping unreadable bundle {:?}: {e}", entry.path()),
            }
        }
        payloads
    }

    pub fn save_transfer_bundle(&self, bundle: &TransferBundle) -> Result<(), StorageError> {
        self.write(ENTITY_TRANSFER, 2, bundle.identifier_hash(), &bundle.rlp_encode())
    }

    /// Load every persisted transfer bundle, current schema first, then the
    /// legacy v1 layout.
    pub fn load_transfer_bundles(&self) -> Vec<TransferBundle> {
        let mut bundles = Vec::new();
        for (version, tag) in
            [(2u32, TransferBundleVersion::V2), (1u32, TransferBundleVersion::V1)]
        {
            for (path, payload) in self.read_all(ENTITY_TRANSFER, version) {
                match TransferBundle::rlp_decode(&payload, tag) {
                    Ok(bundle) => bundles.push(bundle),
                    Err(e) => warn!("skipping corrupt transfer bundle {path:?}: {e}"),
                }
            }
        }
        bundles
    }

    pub fn save_transaction_bundle(&self, bundle: &TransactionBundle) -> Result<(), StorageError> {
        self.write(ENTITY_TRANSACTION, 1, bundle.identifier_hash(), &bundle.rlp_encode())
    }

    pub fn load_transaction_bundles(&self) -> Vec<TransactionBundle> {
        let mut bundles = Vec::new();
        for (path, payload) in self.read_all(ENTITY_TRANSACTION, 1) {
            match TransactionBundle::rlp_decode(&payload) {
                Ok(bundle) => bundles.push(bundle),
                Err(e) => warn!("skipping corrupt transaction bundle {path:?}: {e}"),
            }
        }
        bundles
    }

    pub fn save_currency_bundle(&self, bundle: &CurrencyBundle) -> Result<(), StorageError> {
        self.write(ENTITY_CURRENCY, 1, bundle.identifier_hash(), &bundle.rlp_encode())
    }

    pub fn load_currency_bundles(&self) -> Vec<CurrencyBundle> {
        let mut bundles = Vec::new();
        for (path, payload) in self.read_all(ENTITY_CURRENCY, 1) {
            match CurrencyBundle::rlp_decode(&payload) {
                Ok(bundle) => bundles.push(bundle),
                Err(e) => warn!("skipping corrupt currency bundle {path:?}: {e}"),
            }
        }
        bundles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::bundle::TransferStatus;

    fn sample_bundle(uids: &str) -> TransferBundle {
        TransferBundle {
            status: TransferStatus::Included,
            hash: "0xh".into(),
            identifier: "id".into(),
            uids: uids.into(),
            from: "a".into(),
            to: "b".into(),
            amount: "5".into(),
            currency: "btc".into(),
            fee: None,
            transfer_index: 0,
            block_timestamp: 1,
            block_number: 2,
            block_confirmations: 3,
            block_transaction_index: 4,
            block_hash: "bh".into(),
            attributes: Vec::new(),
        }
    }

    #[test]
    fn save_then_load_transfer_bundles() {
        let dir = tempfile::tempdir().unwrap();
        let service = FileService::new(dir.path()).unwrap();
        service.save_transfer_bundle(&sample_bundle("u:1")).unwrap();
        service.save_transfer_bundle(&sample_bundle("u:2")).unwrap();
        // saving the same bundle twice overwrites the same identifier
        service.save_transfer_bundle(&sample_bundle("u:2")).unwrap();

        let mut loaded = service.load_transfer_bundles();
        loaded.sort_by(|a, b| a.uids.cmp(&b.uids));
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].uids, "u:1");
        assert_eq!(loaded[1].uids, "u:2");
    }

    #[test]
    fn corrupt_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let service = FileService::new(dir.path()).unwrap();
        service.save_transfer_bundle(&sample_bundle("u:1")).unwrap();

        let bad = service.entity_dir(ENTITY_TRANSFER, 2).join("deadbeef");
        fs::write(bad, b"not rlp").unwrap();
        assert_eq!(service.load_transfer_bundles().len(), 1);
    }

    #[test]
    fn transaction_bundles_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let service = FileService::new(dir.path()).unwrap();
        let bundle = TransactionBundle {
            status: TransferStatus::Included,
            serialization: vec![1, 2, 3],
            timestamp: 9,
            block_height: 11,
        };
        service.save_transaction_bundle(&bundle).unwrap();
        assert_eq!(service.load_transaction_bundles(), vec![bundle]);
    }
}
