//! System and network lifecycle: a system owns networks, each network can
//! host at most one wallet manager per account.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::account::Account;
use crate::client::BlockchainClient;
use crate::error::WalletError;
use crate::storage::FileService;

use super::events::{EventListener, QueryByType, SyncMode};
use super::{ChainAdapter, WalletManager};

/// A blockchain network: identity, block cadence and the read-mostly chain
/// tip the sync engine maintains.
pub struct Network {
    uids: String,
    name: String,
    is_mainnet: bool,
    block_period_secs: u64,
    currency: String,
    height: AtomicU64,
    verified_block_hash: Mutex<Option<String>>,
}

impl Network {
    pub fn new(
        uids: impl Into<String>,
        name: impl Into<String>,
        is_mainnet: bool,
        block_period_secs: u64,
        currency: impl Into<String>,
        height: u64,
    ) -> Arc<Network> {
        Arc::new(Network {
            uids: uids.into(),
            name: name.into(),
            is_mainnet,
            block_period_secs,
            currency: currency.into(),
            height: AtomicU64::new(height),
            verified_block_hash: Mutex::new(None),
        })
    }

    pub fn uids(&self) -> &str {
        &self.uids
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_mainnet(&self) -> bool {
        self.is_mainnet
    }

    pub fn block_period_secs(&self) -> u64 {
        self.block_period_secs
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn height(&self) -> u64 {
        self.height.load(Ordering::SeqCst)
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn verified_block_hash(&self) -> Option<String> {
        self.verified_block_hash.lock().unwrap().clone()
    }

    pub fn set_verified_block_hash(&self, hash: String) {
        *self.verified_block_hash.lock().unwrap() = Some(hash);
    }
}

/// Owns networks and the managers spawned on them.
pub struct System {
    networks: Mutex<Vec<Arc<Network>>>,
    managers: Mutex<Vec<(String, String, WalletManager)>>,
}

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}

impl System {
    pub fn new() -> System {
        System { networks: Mutex::new(Vec::new()), managers: Mutex::new(Vec::new()) }
    }

    pub fn add_network(&self, network: Arc<Network>) {
        let mut networks = self.networks.lock().unwrap();
        if !networks.iter().any(|n| n.uids() == network.uids()) {
            networks.push(network);
        }
    }

    pub fn network(&self, uids: &str) -> Option<Arc<Network>> {
        self.networks.lock().unwrap().iter().find(|n| n.uids() == uids).cloned()
    }

    pub fn networks(&self) -> Vec<Arc<Network>> {
        self.networks.lock().unwrap().clone()
    }

    pub fn managers(&self) -> Vec<WalletManager> {
        self.managers.lock().unwrap().iter().map(|(_, _, m)| m.clone()).collect()
    }

    /// Spawn a manager for `(network, account)`; at most one may exist per
    /// pair.
    #[allow(clippy::too_many_arguments)]
    pub fn create_manager(
        &self,
        network: Arc<Network>,
        account: Arc<Account>,
        client: Arc<dyn BlockchainClient>,
        chain: Arc<dyn ChainAdapter>,
        listener: Arc<dyn EventListener>,
        sync_mode: SyncMode,
        by_type: QueryByType,
        storage: FileService,
        earliest_block: u64,
    ) -> Result<WalletManager, WalletError> {
        let mut managers = self.managers.lock().unwrap();
        if managers
            .iter()
            .any(|(n, a, _)| n == network.uids() && a == account.uids())
        {
            return Err(WalletError::InvalidAccount(format!(
                "a manager for account {} already exists on {}",
                account.uids(),
                network.uids()
            )));
        }

        self.add_network(network.clone());
        let manager = WalletManager::new(
            network.clone(),
            account.clone(),
            client,
            chain,
            listener,
            sync_mode,
            by_type,
            storage,
            earliest_block,
        );
        managers.push((network.uids().to_string(), account.uids().to_string(), manager.clone()));
        Ok(manager)
    }
}
