//! Batch packaging and finality verification

use crate::BridgeError;
use ed25519_dalek::SigningKey;
use ledger_runtime::{
    sign_hash, verify_hash, AccountId, BatchValidation, Container, CrossNetworkBatch, Hash,
    LedgerStore, PendingEntry, CONFIRMATION_QUORUM,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// The hash every batch signature commits to: the origin container hash and
/// the ordered cross-network entry hashes, rendered as
/// `<container>:<h1>,<h2>,...` in bs58 and hashed
pub fn base_hash(origin: &Hash, hash_list: &[Hash]) -> Hash {
    let joined: Vec<String> = hash_list.iter().map(|h| h.to_bs58()).collect();
    let preimage = format!("{}:{}", origin.to_bs58(), joined.join(","));
    Hash::digest(preimage.as_bytes())
}

/// Packages and verifies cross-network batches for one ledger instance
pub struct CrossNetworkBridge {
    network: String,
    store: Arc<LedgerStore>,
    key: SigningKey,
    node_id: AccountId,
}

impl CrossNetworkBridge {
    pub fn new(store: Arc<LedgerStore>, key: SigningKey) -> Self {
        let network = store.network().to_string();
        let node_id = AccountId::of(&key);
        Self {
            network,
            store,
            key,
            node_id,
        }
    }

    pub fn node_id(&self) -> AccountId {
        self.node_id
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    /// This node's signature over a batch base hash
    pub fn sign_base_hash(&self, base: &Hash) -> (AccountId, Vec<u8>) {
        (self.node_id, sign_hash(&self.key, base))
    }

    /// Package the entries of a committed container addressed to one target
    /// network; `collected` carries base-hash signatures gathered from other
    /// validators, this node's own is always added
    ///
    /// Returns None when the container holds nothing for that network.
    pub fn build_batch(
        &self,
        container: &Container,
        target_network: &str,
        collected: BTreeMap<AccountId, Vec<u8>>,
    ) -> Option<CrossNetworkBatch> {
        let entries: Vec<PendingEntry> = container
            .entries
            .iter()
            .filter(|e| e.target_network.as_deref() == Some(target_network))
            .cloned()
            .collect();
        if entries.is_empty() {
            return None;
        }

        let hash_list = container.cross_network_hashes();
        let base = base_hash(&container.hash, &hash_list);

        let mut signatures = collected;
        let (signer, signature) = self.sign_base_hash(&base);
        signatures.insert(signer, signature);

        Some(CrossNetworkBatch {
            source_network: self.network.clone(),
            target_network: target_network.to_string(),
            entries,
            validation: BatchValidation {
                hash_list,
                base_hash: base,
                signatures,
                origin_container_hash: container.hash,
                container_signatures: container.signatures.clone(),
            },
        })
    }

    /// One batch per target network appearing in a committed container
    pub fn build_all_batches(&self, container: &Container) -> Vec<CrossNetworkBatch> {
        let targets: BTreeSet<String> = container
            .entries
            .iter()
            .filter_map(|e| e.target_network.clone())
            .collect();
        targets
            .into_iter()
            .filter_map(|target| self.build_batch(container, &target, BTreeMap::new()))
            .collect()
    }

    /// Verify one inbound entry against its batch validation
    ///
    /// Checks, in order: the entry's own hash, the base hash recomputation,
    /// membership of the entry in the hash list, and finality - a signature
    /// quorum over the base hash from the source network's stake table, or a
    /// direct signature from the source network's owner account when no
    /// weight table is known yet.
    pub fn verify_entry(
        &self,
        entry: &PendingEntry,
        validation: &BatchValidation,
        source_network: &str,
    ) -> Result<(), BridgeError> {
        if entry.hash != entry.compute_hash() {
            return Err(BridgeError::EntryHashMismatch);
        }

        let recomputed = base_hash(&validation.origin_container_hash, &validation.hash_list);
        if recomputed != validation.base_hash {
            return Err(BridgeError::BaseHashMismatch);
        }

        if !validation.hash_list.contains(&entry.hash) {
            return Err(BridgeError::NotInHashList);
        }

        let weights = self.store.network_weights(source_network);
        if !weights.is_empty() {
            let total: u64 = weights.iter().map(|(_, w)| w).sum();
            let signed: u64 = weights
                .iter()
                .filter(|(signer, _)| {
                    validation
                        .signatures
                        .get(signer)
                        .map(|sig| verify_hash(signer, &validation.base_hash, sig))
                        .unwrap_or(false)
                })
                .map(|(_, weight)| weight)
                .sum();
            if (signed as f64) / (total as f64) < CONFIRMATION_QUORUM {
                return Err(BridgeError::InsufficientQuorum { signed, total });
            }
            return Ok(());
        }

        match self.store.network_owner(source_network) {
            Some(owner) => {
                let verified = validation
                    .signatures
                    .get(&owner)
                    .map(|sig| verify_hash(&owner, &validation.base_hash, sig))
                    .unwrap_or(false);
                if verified {
                    Ok(())
                } else {
                    Err(BridgeError::NoOwnerSignature(owner))
                }
            }
            None => Err(BridgeError::UnknownSourceNetwork(
                source_network.to_string(),
            )),
        }
    }
}
