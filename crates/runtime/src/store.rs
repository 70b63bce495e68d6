//! Persistent ledger store
//!
//! Uses a sled embedded database. Committed chain state (containers, entry
//! records, accounts, chain metadata) lives in a single tree under key
//! prefixes; validator weight tables (one record per network) and network
//! owners live in a separate tree. The commit unit is one transaction over
//! both trees, so validation reads and state writes share a snapshot.

use crate::types::{AccountId, Hash, PendingEntry};
use crate::MIN_STAKE_SHARE;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::collections::BTreeMap;
use std::path::Path;

pub(crate) const META_KEY: &[u8] = b"meta/chain";

pub(crate) fn container_key(hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(10 + 32);
    key.extend_from_slice(b"container/");
    key.extend_from_slice(&hash.0);
    key
}

pub(crate) fn entry_key(hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(6 + 32);
    key.extend_from_slice(b"entry/");
    key.extend_from_slice(&hash.0);
    key
}

pub(crate) fn account_key(id: &AccountId) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + 32);
    key.extend_from_slice(b"account/");
    key.extend_from_slice(&id.0);
    key
}

pub(crate) fn table_key(network: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(6 + network.len());
    key.extend_from_slice(b"table/");
    key.extend_from_slice(network.as_bytes());
    key
}

fn owner_key(network: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(6 + network.len());
    key.extend_from_slice(b"owner/");
    key.extend_from_slice(network.as_bytes());
    key
}

/// An account on this ledger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: u64,
    pub nonce: u64,
}

/// The persisted form of a committed container: entries reduced to hashes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredContainer {
    pub hash: Hash,
    pub previous_hash: Option<Hash>,
    pub creator: AccountId,
    pub timestamp_ms: u64,
    pub entry_hashes: Vec<Hash>,
    pub signatures: BTreeMap<AccountId, Vec<u8>>,
}

/// A confirmed entry and the container that carried it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryRecord {
    pub entry: PendingEntry,
    pub container: Hash,
    pub applied_at_ms: u64,
}

/// Chain head and aggregate counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerMetadata {
    pub head: Option<Hash>,
    pub container_count: u64,
    pub entry_count: u64,
    /// Last metadata write (unix seconds)
    pub last_save_ts: i64,
}

/// Persistent storage for one ledger instance
pub struct LedgerStore {
    /// Local network id; selects the weight table the schedule runs on
    network: String,
    db: Db,
    /// Transactional chain state: containers, entries, accounts, metadata
    ledger: sled::Tree,
    /// Validator weight tables and owner accounts, per network id
    weights: sled::Tree,
    /// Read cache for committed containers
    container_cache: DashMap<Hash, StoredContainer>,
}

impl LedgerStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P, network: &str) -> anyhow::Result<Self> {
        let db = sled::open(&path)?;
        let ledger = db.open_tree("ledger")?;
        let weights = db.open_tree("weights")?;

        tracing::info!("Opened ledger store for {} at {:?}", network, path.as_ref());

        Ok(Self {
            network: network.to_string(),
            db,
            ledger,
            weights,
            container_cache: DashMap::new(),
        })
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub(crate) fn ledger(&self) -> &sled::Tree {
        &self.ledger
    }

    pub(crate) fn weights(&self) -> &sled::Tree {
        &self.weights
    }

    /// Current chain metadata; defaults when nothing was ever committed
    pub fn metadata(&self) -> anyhow::Result<LedgerMetadata> {
        match self.ledger.get(META_KEY)? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(LedgerMetadata::default()),
        }
    }

    /// Hash of the current chain head, if any container was committed
    pub fn head(&self) -> Option<Hash> {
        self.metadata().ok().and_then(|m| m.head)
    }

    pub fn container_count(&self) -> u64 {
        self.metadata().map(|m| m.container_count).unwrap_or(0)
    }

    pub fn get_container(&self, hash: &Hash) -> anyhow::Result<Option<StoredContainer>> {
        if let Some(cached) = self.container_cache.get(hash) {
            return Ok(Some(cached.value().clone()));
        }
        match self.ledger.get(container_key(hash))? {
            Some(bytes) => {
                let container: StoredContainer = bincode::deserialize(&bytes)?;
                self.container_cache.insert(*hash, container.clone());
                Ok(Some(container))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn cache_container(&self, container: StoredContainer) {
        self.container_cache.insert(container.hash, container);
    }

    pub fn get_entry(&self, hash: &Hash) -> anyhow::Result<Option<EntryRecord>> {
        match self.ledger.get(entry_key(hash))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn is_entry_confirmed(&self, hash: &Hash) -> bool {
        self.ledger
            .contains_key(entry_key(hash))
            .unwrap_or_default()
    }

    pub fn get_account(&self, id: &AccountId) -> anyhow::Result<Option<Account>> {
        match self.ledger.get(account_key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Direct account write, used for genesis bootstrap only; committed
    /// entries go through the engine's transaction
    pub fn put_account(&self, id: &AccountId, account: &Account) -> anyhow::Result<()> {
        self.ledger
            .insert(account_key(id), bincode::serialize(account)?)?;
        Ok(())
    }

    /// The local network's stake table, in key order
    pub fn validator_weights(&self) -> Vec<(AccountId, u64)> {
        self.network_weights(&self.network)
    }

    /// A network's stake table, in key order
    pub fn network_weights(&self, network: &str) -> Vec<(AccountId, u64)> {
        let Ok(Some(bytes)) = self.weights.get(table_key(network)) else {
            return Vec::new();
        };
        match bincode::deserialize::<BTreeMap<AccountId, u64>>(&bytes) {
            Ok(table) => table.into_iter().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn set_validator_weight(
        &self,
        network: &str,
        id: &AccountId,
        weight: u64,
    ) -> anyhow::Result<()> {
        let mut table: BTreeMap<AccountId, u64> = match self.weights.get(table_key(network))? {
            Some(bytes) => bincode::deserialize(&bytes)?,
            None => BTreeMap::new(),
        };
        table.insert(*id, weight);
        self.weights
            .insert(table_key(network), bincode::serialize(&table)?)?;
        Ok(())
    }

    pub fn network_owner(&self, network: &str) -> Option<AccountId> {
        let bytes = self.weights.get(owner_key(network)).ok()??;
        let arr: [u8; 32] = bytes.as_ref().try_into().ok()?;
        Some(AccountId(arr))
    }

    pub fn set_network_owner(&self, network: &str, owner: &AccountId) -> anyhow::Result<()> {
        self.weights.insert(owner_key(network), owner.0.to_vec())?;
        Ok(())
    }

    pub fn vote_weight(&self, id: &AccountId) -> u64 {
        self.validator_weights()
            .into_iter()
            .find(|(candidate, _)| candidate == id)
            .map(|(_, weight)| weight)
            .unwrap_or(0)
    }

    pub fn total_vote_weight(&self) -> u64 {
        self.validator_weights().iter().map(|(_, w)| w).sum()
    }

    /// Validators holding at least a 1% share of local stake, sorted
    /// descending by stake; equal stakes keep the table's key order
    pub fn eligible_validators(&self) -> Vec<(AccountId, u64)> {
        eligible_from(self.validator_weights())
    }

    /// Stamp the save time and flush everything to disk
    pub fn flush(&self) -> anyhow::Result<()> {
        let mut meta = self.metadata()?;
        meta.last_save_ts = chrono::Utc::now().timestamp();
        self.ledger.insert(META_KEY, bincode::serialize(&meta)?)?;
        self.db.flush()?;
        Ok(())
    }
}

/// Filter a stake table down to validators holding at least the minimum
/// share, sorted descending by stake; equal stakes keep the table's key
/// order
pub(crate) fn eligible_from(weights: Vec<(AccountId, u64)>) -> Vec<(AccountId, u64)> {
    let total: u128 = weights.iter().map(|(_, w)| *w as u128).sum();
    if total == 0 {
        return Vec::new();
    }
    let mut eligible: Vec<(AccountId, u64)> = weights
        .into_iter()
        .filter(|(_, weight)| *weight as f64 / total as f64 >= MIN_STAKE_SHARE)
        .collect();
    eligible.sort_by(|a, b| b.1.cmp(&a.1));
    eligible
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn id(seed: u8) -> AccountId {
        AccountId([seed; 32])
    }

    #[test]
    fn metadata_defaults_empty() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(dir.path(), "alpha").unwrap();
        assert_eq!(store.head(), None);
        assert_eq!(store.container_count(), 0);
    }

    #[test]
    fn weights_round_trip_and_totals() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(dir.path(), "alpha").unwrap();

        store.set_validator_weight("alpha", &id(1), 50).unwrap();
        store.set_validator_weight("alpha", &id(2), 30).unwrap();
        store.set_validator_weight("alpha", &id(3), 20).unwrap();
        store.set_validator_weight("beta", &id(9), 999).unwrap();

        assert_eq!(store.total_vote_weight(), 100);
        assert_eq!(store.vote_weight(&id(2)), 30);
        assert_eq!(store.network_weights("beta"), vec![(id(9), 999)]);
    }

    #[test]
    fn eligibility_filters_dust_stake_and_sorts_descending() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(dir.path(), "alpha").unwrap();

        store.set_validator_weight("alpha", &id(1), 500).unwrap();
        store.set_validator_weight("alpha", &id(2), 496).unwrap();
        // Below the 1% floor of the 1000 total
        store.set_validator_weight("alpha", &id(3), 4).unwrap();

        let eligible = store.eligible_validators();
        assert_eq!(eligible, vec![(id(1), 500), (id(2), 496)]);
    }

    #[test]
    fn equal_stake_keeps_table_order() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(dir.path(), "alpha").unwrap();

        store.set_validator_weight("alpha", &id(7), 50).unwrap();
        store.set_validator_weight("alpha", &id(2), 50).unwrap();

        let eligible = store.eligible_validators();
        // Key order of the table: id(2) before id(7)
        assert_eq!(eligible, vec![(id(2), 50), (id(7), 50)]);
    }

    #[test]
    fn network_owner_round_trip() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(dir.path(), "alpha").unwrap();

        assert_eq!(store.network_owner("beta"), None);
        store.set_network_owner("beta", &id(5)).unwrap();
        assert_eq!(store.network_owner("beta"), Some(id(5)));
    }

    #[test]
    fn accounts_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = LedgerStore::open(dir.path(), "alpha").unwrap();
            store
                .put_account(
                    &id(1),
                    &Account {
                        balance: 1000,
                        nonce: 3,
                    },
                )
                .unwrap();
            store.flush().unwrap();
        }
        let store = LedgerStore::open(dir.path(), "alpha").unwrap();
        let account = store.get_account(&id(1)).unwrap().unwrap();
        assert_eq!(account.balance, 1000);
        assert_eq!(account.nonce, 3);
    }
}
