//! Single-node election driver
//!
//! A stand-in for the networked ballot-counting mechanism: with one voter
//! holding the whole stake, any candidate that clears the registered vote
//! validator wins immediately. Lets a node run a complete pipeline alone
//! and gives multi-node drivers a reference for the contract.

use ed25519_dalek::SigningKey;
use ledger_consensus::{
    ElectionCategory, ElectionDriver, ElectionId, ElectionMetadata, ElectionOutcome, VoteValidator,
};
use ledger_runtime::{sign_hash, AccountId, Hash};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::broadcast;

pub struct LocalElectionDriver {
    key: SigningKey,
    node_id: AccountId,
    validators: RwLock<HashMap<&'static str, VoteValidator>>,
    signatures: RwLock<HashMap<ElectionId, BTreeMap<AccountId, Vec<u8>>>>,
    events: broadcast::Sender<ElectionOutcome>,
}

impl LocalElectionDriver {
    pub fn new(key: SigningKey) -> Self {
        let (events, _) = broadcast::channel(256);
        let node_id = AccountId::of(&key);
        Self {
            key,
            node_id,
            validators: RwLock::new(HashMap::new()),
            signatures: RwLock::new(HashMap::new()),
            events,
        }
    }
}

impl ElectionDriver for LocalElectionDriver {
    fn create_election_id(
        &self,
        network: &str,
        category: ElectionCategory,
        subject: &str,
    ) -> ElectionId {
        ElectionId(format!("{network}:{category}:{subject}"))
    }

    fn start_local_election(
        &self,
        _network: &str,
        category: ElectionCategory,
        id: &ElectionId,
        candidate: Hash,
        metadata: ElectionMetadata,
    ) -> anyhow::Result<()> {
        // The sole voter still submits to the registered vote validator
        if let Some(validator) = self.validators.read().get(category.as_str()) {
            if !validator(&candidate, &metadata) {
                tracing::debug!(election = %id, candidate = %candidate, "Vote refused, election stays open");
                return Ok(());
            }
        }

        let signature = sign_hash(&self.key, &candidate);
        self.signatures
            .write()
            .entry(id.clone())
            .or_default()
            .insert(self.node_id, signature);

        let _ = self.events.send(ElectionOutcome {
            category,
            election_id: id.clone(),
            winner: candidate,
        });
        Ok(())
    }

    fn vote_signatures(&self, id: &ElectionId) -> BTreeMap<AccountId, Vec<u8>> {
        self.signatures.read().get(id).cloned().unwrap_or_default()
    }

    fn register_vote_validator(&self, category: ElectionCategory, validator: VoteValidator) {
        self.validators.write().insert(category.as_str(), validator);
    }

    fn subscribe(&self) -> broadcast::Receiver<ElectionOutcome> {
        self.events.subscribe()
    }
}
