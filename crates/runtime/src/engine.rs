//! Container engine: build, validate, and commit containers
//!
//! Validation is a fixed sequence of checks that short-circuits on the first
//! failure, evaluated against a snapshot of chain state and stake table.
//! Committing runs inside a single storage transaction spanning both trees:
//! the snapshot is re-read, the full validation sequence and the quorum gate
//! re-run against it, entries are applied through their processors, the
//! container and entry records are persisted, and the chain head moves - or
//! none of it happens.

use crate::registry::{ApplyContext, ApplyState, ProcessorRegistry};
use crate::store::{
    container_key, eligible_from, entry_key, table_key, EntryRecord, LedgerMetadata, LedgerStore,
    StoredContainer, META_KEY,
};
use crate::types::{verify_hash, AccountId, Container, Hash, PendingEntry};
use crate::{now_ms, CONFIRMATION_QUORUM, MAX_CLOCK_DRIFT_MS};
use ed25519_dalek::SigningKey;
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Container validation failures, in check order
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("container has no entries")]
    EmptyContainer,

    #[error("container hash does not match its contents")]
    HashMismatch,

    #[error("creator did not sign the container")]
    MissingCreatorSignature,

    #[error("creator signature does not verify")]
    BadCreatorSignature,

    #[error("signature from {0} does not verify")]
    BadSignature(AccountId),

    #[error("timestamp does not advance past the previous container")]
    TimestampNotAfterPrevious,

    #[error("timestamp is too far ahead of local clock")]
    TimestampTooFarAhead,

    #[error("entries are not in non-increasing fee order")]
    FeeOrderViolation,

    #[error("entry {entry} rejected: {reason}")]
    EntryRejected { entry: Hash, reason: String },

    #[error("signer {0} is not an eligible validator")]
    IneligibleSigner(AccountId),

    #[error("previous hash is not the current chain head")]
    NotChainHead,

    #[error("container links to itself")]
    SelfLink,

    #[error("genesis container on a non-empty ledger")]
    GenesisLedgerNotEmpty,

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Commit result discriminants; rule violations are values, not faults
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { hash: Hash, entries: usize },
    InvalidContainer(ValidationError),
    LedgerNotEmpty,
    InvalidNetworkConfirmation,
    ProcessFailure(String),
}

/// Knobs for container validation
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationOptions {
    /// Skip per-entry processor re-validation (used when entries were
    /// validated moments ago by the same serialized pipeline)
    pub skip_entry_validation: bool,
}

#[derive(Error, Debug)]
enum CommitError {
    #[error("container failed validation: {0}")]
    Invalid(ValidationError),

    #[error("genesis container on a non-empty ledger")]
    LedgerNotEmpty,

    #[error("signatures below the network confirmation quorum")]
    NoQuorum,

    #[error("entry {0} failed to apply: {1}")]
    Entry(Hash, String),

    #[error("codec failure: {0}")]
    Codec(String),
}

/// Chain state a validation pass reads: built from the live store for
/// standalone checks, and from inside the commit transaction so validation
/// and commit see one snapshot
struct ChainFacts {
    head: Option<Hash>,
    container_count: u64,
    /// Timestamp of the container's parent, when that parent is stored
    previous_timestamp: Option<u64>,
    /// The local network's stake table
    weights: Vec<(AccountId, u64)>,
}

/// Stake behind verifying signatures must reach the confirmation threshold
fn confirmation_quorum_met(container: &Container, weights: &[(AccountId, u64)]) -> bool {
    let total: u64 = weights.iter().map(|(_, w)| w).sum();
    if total == 0 {
        return false;
    }
    let signed: u64 = weights
        .iter()
        .filter(|(signer, _)| {
            container
                .signatures
                .get(signer)
                .map(|signature| verify_hash(signer, &container.hash, signature))
                .unwrap_or(false)
        })
        .map(|(_, weight)| *weight)
        .sum();
    signed as f64 / total as f64 >= CONFIRMATION_QUORUM
}

/// Builds, validates, and commits containers for one ledger instance
pub struct ContainerEngine {
    store: Arc<LedgerStore>,
    registry: Arc<ProcessorRegistry>,
    key: SigningKey,
    node_id: AccountId,
}

impl ContainerEngine {
    pub fn new(store: Arc<LedgerStore>, registry: Arc<ProcessorRegistry>, key: SigningKey) -> Self {
        let node_id = AccountId::of(&key);
        Self {
            store,
            registry,
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

    pub fn registry(&self) -> &Arc<ProcessorRegistry> {
        &self.registry
    }

    /// Build a container from pre-sorted entries and self-sign as creator
    pub fn create_container(
        &self,
        previous_hash: Option<Hash>,
        entries: Vec<PendingEntry>,
    ) -> Container {
        self.create_container_at(previous_hash, entries, now_ms())
    }

    /// Build a container with an explicit timestamp
    pub fn create_container_at(
        &self,
        previous_hash: Option<Hash>,
        entries: Vec<PendingEntry>,
        timestamp_ms: u64,
    ) -> Container {
        let mut container = Container {
            hash: Hash::default(),
            previous_hash,
            creator: self.node_id,
            timestamp_ms,
            entries,
            signatures: Default::default(),
        };
        container.hash = container.compute_hash();
        container.sign(&self.key);
        container
    }

    /// Read the chain facts the validation sequence needs from the live store
    fn live_facts(&self, container: &Container) -> Result<ChainFacts, ValidationError> {
        let meta = self
            .store
            .metadata()
            .map_err(|e| ValidationError::Storage(e.to_string()))?;
        let previous_timestamp = match &container.previous_hash {
            Some(previous) => self
                .store
                .get_container(previous)
                .map_err(|e| ValidationError::Storage(e.to_string()))?
                .map(|parent| parent.timestamp_ms),
            None => None,
        };
        Ok(ChainFacts {
            head: meta.head,
            container_count: meta.container_count,
            previous_timestamp,
            weights: self.store.validator_weights(),
        })
    }

    /// Run the full validation sequence with default options
    pub fn validate_container(&self, container: &Container) -> Result<(), ValidationError> {
        self.validate_container_with(container, ValidationOptions::default())
    }

    /// Run the validation sequence against the live store
    pub fn validate_container_with(
        &self,
        container: &Container,
        options: ValidationOptions,
    ) -> Result<(), ValidationError> {
        let facts = self.live_facts(container)?;
        self.validate_against(container, options, &facts)
    }

    /// The validation sequence itself, short-circuiting on the first failure
    fn validate_against(
        &self,
        container: &Container,
        options: ValidationOptions,
        facts: &ChainFacts,
    ) -> Result<(), ValidationError> {
        // 1. Structure
        if container.entries.is_empty() {
            return Err(ValidationError::EmptyContainer);
        }

        // 2. Hash re-derivation
        if container.hash != container.compute_hash() {
            return Err(ValidationError::HashMismatch);
        }

        // 3. Creator signature
        match container.signatures.get(&container.creator) {
            None => return Err(ValidationError::MissingCreatorSignature),
            Some(signature) => {
                if !verify_hash(&container.creator, &container.hash, signature) {
                    return Err(ValidationError::BadCreatorSignature);
                }
            }
        }

        // 4. Every signature in the signer map
        for (signer, signature) in &container.signatures {
            if !verify_hash(signer, &container.hash, signature) {
                return Err(ValidationError::BadSignature(*signer));
            }
        }

        // 5. Timestamp window
        if let Some(previous_timestamp) = facts.previous_timestamp {
            if container.timestamp_ms <= previous_timestamp {
                return Err(ValidationError::TimestampNotAfterPrevious);
            }
        }
        if container.timestamp_ms > now_ms() + MAX_CLOCK_DRIFT_MS {
            return Err(ValidationError::TimestampTooFarAhead);
        }

        // 6. Fee ordering
        for pair in container.entries.windows(2) {
            if pair[1].fee > pair[0].fee {
                return Err(ValidationError::FeeOrderViolation);
            }
        }

        // 7. Per-entry validation
        if !options.skip_entry_validation {
            for entry in &container.entries {
                if !entry.verify() {
                    return Err(ValidationError::EntryRejected {
                        entry: entry.hash,
                        reason: "hash or signature does not verify".to_string(),
                    });
                }
                if let Err(e) = self.registry.validate(entry, &self.store) {
                    return Err(ValidationError::EntryRejected {
                        entry: entry.hash,
                        reason: e.to_string(),
                    });
                }
            }
        }

        match &container.previous_hash {
            Some(previous_hash) => {
                // 8. Signers must be schedulable validators
                let eligible = eligible_from(facts.weights.clone());
                for signer in container.signatures.keys() {
                    if !eligible.iter().any(|(id, _)| id == signer) {
                        return Err(ValidationError::IneligibleSigner(*signer));
                    }
                }

                // 9. Chain position
                if facts.head != Some(*previous_hash) {
                    return Err(ValidationError::NotChainHead);
                }
                if container.hash == *previous_hash {
                    return Err(ValidationError::SelfLink);
                }
            }
            None => {
                // Genesis is only valid on an empty ledger
                if facts.container_count != 0 {
                    return Err(ValidationError::GenesisLedgerNotEmpty);
                }
            }
        }

        Ok(())
    }

    /// Network-wide quorum gate: stake behind verifying signatures must
    /// reach the confirmation threshold
    pub fn validate_network_confirmation(&self, container: &Container) -> bool {
        confirmation_quorum_met(container, &self.store.validator_weights())
    }

    /// Commit a container inside one storage transaction
    ///
    /// The transaction re-reads the chain state and stake table, re-runs the
    /// full validation sequence against that snapshot, enforces the network
    /// confirmation quorum (non-genesis) or the empty-ledger rule (genesis),
    /// applies every entry through its processor, persists the container with
    /// entries reduced to hashes, and moves the head. Any failure rolls the
    /// whole unit back.
    pub fn add_container(&self, container: &Container) -> CommitOutcome {
        let stored = StoredContainer {
            hash: container.hash,
            previous_hash: container.previous_hash,
            creator: container.creator,
            timestamp_ms: container.timestamp_ms,
            entry_hashes: container.entry_hashes(),
            signatures: container.signatures.clone(),
        };
        let applied_at = now_ms();
        let network = self.store.network();

        let result = (self.store.ledger(), self.store.weights()).transaction(|(ltx, wtx)| {
            let mut meta: LedgerMetadata = match ltx.get(META_KEY)? {
                Some(bytes) => bincode::deserialize(&bytes).map_err(|e| {
                    ConflictableTransactionError::Abort(CommitError::Codec(e.to_string()))
                })?,
                None => LedgerMetadata::default(),
            };

            let previous_timestamp = match &container.previous_hash {
                Some(previous) => match ltx.get(container_key(previous))? {
                    Some(bytes) => {
                        let parent: StoredContainer =
                            bincode::deserialize(&bytes).map_err(|e| {
                                ConflictableTransactionError::Abort(CommitError::Codec(
                                    e.to_string(),
                                ))
                            })?;
                        Some(parent.timestamp_ms)
                    }
                    None => None,
                },
                None => None,
            };

            let weights: Vec<(AccountId, u64)> = match wtx.get(table_key(network))? {
                Some(bytes) => bincode::deserialize::<BTreeMap<AccountId, u64>>(&bytes)
                    .map_err(|e| {
                        ConflictableTransactionError::Abort(CommitError::Codec(e.to_string()))
                    })?
                    .into_iter()
                    .collect(),
                None => Vec::new(),
            };

            let facts = ChainFacts {
                head: meta.head,
                container_count: meta.container_count,
                previous_timestamp,
                weights,
            };
            if let Err(e) = self.validate_against(container, ValidationOptions::default(), &facts)
            {
                return Err(ConflictableTransactionError::Abort(CommitError::Invalid(e)));
            }
            match container.previous_hash {
                None => {
                    if facts.container_count != 0 {
                        return Err(ConflictableTransactionError::Abort(
                            CommitError::LedgerNotEmpty,
                        ));
                    }
                }
                Some(_) => {
                    if !confirmation_quorum_met(container, &facts.weights) {
                        return Err(ConflictableTransactionError::Abort(CommitError::NoQuorum));
                    }
                }
            }

            let mut ctx = ApplyContext::new(ltx);
            for entry in &container.entries {
                match self.registry.apply(entry, &mut ctx) {
                    Ok(ApplyState::Applied) => {
                        let record = EntryRecord {
                            entry: entry.clone(),
                            container: container.hash,
                            applied_at_ms: applied_at,
                        };
                        let bytes = bincode::serialize(&record).map_err(|e| {
                            ConflictableTransactionError::Abort(CommitError::Codec(e.to_string()))
                        })?;
                        ltx.insert(entry_key(&entry.hash), bytes)?;
                    }
                    Ok(ApplyState::AlreadyApplied) => {
                        tracing::debug!(entry = %entry.hash, "Entry already applied, skipping");
                    }
                    Err(e) => {
                        return Err(ConflictableTransactionError::Abort(CommitError::Entry(
                            entry.hash,
                            e.to_string(),
                        )));
                    }
                }
            }

            let bytes = bincode::serialize(&stored).map_err(|e| {
                ConflictableTransactionError::Abort(CommitError::Codec(e.to_string()))
            })?;
            ltx.insert(container_key(&container.hash), bytes)?;

            meta.head = Some(container.hash);
            meta.container_count += 1;
            meta.entry_count += container.entries.len() as u64;
            meta.last_save_ts = chrono::Utc::now().timestamp();
            let bytes = bincode::serialize(&meta).map_err(|e| {
                ConflictableTransactionError::Abort(CommitError::Codec(e.to_string()))
            })?;
            ltx.insert(META_KEY, bytes)?;

            Ok(container.entries.len())
        });

        match result {
            Ok(entries) => {
                self.store.cache_container(stored);
                tracing::info!(
                    container = %container.hash,
                    entries,
                    "Container committed"
                );
                CommitOutcome::Committed {
                    hash: container.hash,
                    entries,
                }
            }
            Err(sled::transaction::TransactionError::Abort(CommitError::Invalid(e))) => {
                CommitOutcome::InvalidContainer(e)
            }
            Err(sled::transaction::TransactionError::Abort(CommitError::LedgerNotEmpty)) => {
                CommitOutcome::LedgerNotEmpty
            }
            Err(sled::transaction::TransactionError::Abort(CommitError::NoQuorum)) => {
                CommitOutcome::InvalidNetworkConfirmation
            }
            Err(sled::transaction::TransactionError::Abort(e)) => {
                tracing::warn!(container = %container.hash, error = %e, "Commit aborted");
                CommitOutcome::ProcessFailure(e.to_string())
            }
            Err(sled::transaction::TransactionError::Storage(e)) => {
                tracing::error!(container = %container.hash, error = %e, "Commit storage failure");
                CommitOutcome::ProcessFailure(e.to_string())
            }
        }
    }

    /// Competing chain heads are not resolved yet: the container is refused
    /// and left to the sender to retry once the chains reconcile.
    // TODO: real fork resolution needs branch scoring across stored chains
    pub fn handle_fork(&self, container: &Container) -> CommitOutcome {
        tracing::warn!(
            container = %container.hash,
            previous = ?container.previous_hash,
            head = ?self.store.head(),
            "Competing chain head refused"
        );
        CommitOutcome::InvalidContainer(ValidationError::NotChainHead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{EntryProcessor, ProcessError};
    use crate::store::Account;
    use tempfile::tempdir;

    fn keypair(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    /// Applies by crediting the sender one unit per entry; rejects entries
    /// whose payload starts with 0xFF
    struct CountingProcessor;

    impl EntryProcessor for CountingProcessor {
        fn entry_type(&self) -> &str {
            "count"
        }

        fn validate(&self, _entry: &PendingEntry, _store: &LedgerStore) -> Result<(), ProcessError> {
            Ok(())
        }

        fn apply(
            &self,
            entry: &PendingEntry,
            ctx: &mut ApplyContext<'_>,
        ) -> Result<ApplyState, ProcessError> {
            if entry.payload.first() == Some(&0xFF) {
                return Err(ProcessError::Rejected("poison payload".to_string()));
            }
            if ctx.entry_exists(&entry.hash)? {
                return Ok(ApplyState::AlreadyApplied);
            }
            let mut account = ctx.get_account(&entry.sender)?.unwrap_or_default();
            account.balance += 1;
            ctx.put_account(&entry.sender, &account)?;
            Ok(ApplyState::Applied)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: ContainerEngine,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(LedgerStore::open(dir.path(), "alpha").unwrap());
        for (seed, weight) in [(1u8, 50u64), (2, 30), (3, 20)] {
            store
                .set_validator_weight("alpha", &AccountId::of(&keypair(seed)), weight)
                .unwrap();
        }
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(CountingProcessor)).unwrap();
        let engine = ContainerEngine::new(store, Arc::new(registry), keypair(1));
        Fixture { _dir: dir, engine }
    }

    fn entry(fee: u64, nonce: u64) -> PendingEntry {
        PendingEntry::create_at(
            &keypair(1),
            "count",
            fee,
            nonce,
            None,
            None,
            vec![],
            now_ms(),
        )
    }

    fn quorum_sign(container: &mut Container) {
        container.sign(&keypair(2));
    }

    #[test]
    fn genesis_commits_only_on_an_empty_ledger() {
        let f = fixture();
        let genesis = f
            .engine
            .create_container_at(None, vec![entry(1, 0)], now_ms() - 10_000);

        let outcome = f.engine.add_container(&genesis);
        assert!(matches!(outcome, CommitOutcome::Committed { .. }));
        assert_eq!(f.engine.store().head(), Some(genesis.hash));

        let second = f
            .engine
            .create_container_at(None, vec![entry(1, 1)], now_ms() - 5_000);
        assert_eq!(
            f.engine.add_container(&second),
            CommitOutcome::InvalidContainer(ValidationError::GenesisLedgerNotEmpty)
        );
    }

    #[test]
    fn genesis_with_previous_hash_is_not_genesis() {
        let f = fixture();
        let bogus = f.engine.create_container_at(
            Some(Hash::digest(b"nothing")),
            vec![entry(1, 0)],
            now_ms(),
        );
        // Ledger is empty, so a chained container can never match the head
        assert_eq!(
            f.engine.validate_container(&bogus),
            Err(ValidationError::NotChainHead)
        );
    }

    #[test]
    fn stale_previous_hash_fails_even_though_it_exists() {
        let f = fixture();
        let a = f
            .engine
            .create_container_at(None, vec![entry(1, 0)], now_ms() - 20_000);
        assert!(matches!(
            f.engine.add_container(&a),
            CommitOutcome::Committed { .. }
        ));

        let mut b = f
            .engine
            .create_container_at(Some(a.hash), vec![entry(1, 1)], now_ms() - 10_000);
        quorum_sign(&mut b);
        assert!(matches!(
            f.engine.add_container(&b),
            CommitOutcome::Committed { .. }
        ));

        // A exists in the ledger, but is no longer the head
        let mut c = f
            .engine
            .create_container_at(Some(a.hash), vec![entry(1, 2)], now_ms());
        quorum_sign(&mut c);
        assert_eq!(
            f.engine.validate_container(&c),
            Err(ValidationError::NotChainHead)
        );
        // The commit transaction re-checks and refuses it too
        assert_eq!(
            f.engine.add_container(&c),
            CommitOutcome::InvalidContainer(ValidationError::NotChainHead)
        );
    }

    #[test]
    fn fee_order_must_not_increase() {
        let f = fixture();
        let container =
            f.engine
                .create_container_at(None, vec![entry(1, 0), entry(5, 1)], now_ms());
        assert_eq!(
            f.engine.validate_container(&container),
            Err(ValidationError::FeeOrderViolation)
        );

        let equal_fees =
            f.engine
                .create_container_at(None, vec![entry(3, 2), entry(3, 3)], now_ms());
        assert!(f.engine.validate_container(&equal_fees).is_ok());
    }

    #[test]
    fn mutated_container_fails_hash_check() {
        let f = fixture();
        let mut container = f.engine.create_container_at(None, vec![entry(2, 0)], now_ms());
        container.timestamp_ms += 1;
        assert_eq!(
            f.engine.validate_container(&container),
            Err(ValidationError::HashMismatch)
        );
    }

    #[test]
    fn mutated_entry_fails_validation() {
        let f = fixture();
        let mut bad = entry(2, 0);
        bad.fee += 1;
        let mut container = Container {
            hash: Hash::default(),
            previous_hash: None,
            creator: f.engine.node_id(),
            timestamp_ms: now_ms(),
            entries: vec![bad],
            signatures: Default::default(),
        };
        container.hash = container.compute_hash();
        container.sign(&keypair(1));
        assert!(matches!(
            f.engine.validate_container(&container),
            Err(ValidationError::EntryRejected { .. })
        ));
    }

    #[test]
    fn timestamps_must_advance_and_stay_near_the_clock() {
        let f = fixture();
        let a = f
            .engine
            .create_container_at(None, vec![entry(1, 0)], now_ms() - 5_000);
        assert!(matches!(
            f.engine.add_container(&a),
            CommitOutcome::Committed { .. }
        ));

        let mut stale = f
            .engine
            .create_container_at(Some(a.hash), vec![entry(1, 1)], a.timestamp_ms);
        quorum_sign(&mut stale);
        assert_eq!(
            f.engine.validate_container(&stale),
            Err(ValidationError::TimestampNotAfterPrevious)
        );

        let mut future = f.engine.create_container_at(
            Some(a.hash),
            vec![entry(1, 2)],
            now_ms() + MAX_CLOCK_DRIFT_MS + 5_000,
        );
        quorum_sign(&mut future);
        assert_eq!(
            f.engine.validate_container(&future),
            Err(ValidationError::TimestampTooFarAhead)
        );
    }

    #[test]
    fn unknown_signer_is_rejected_after_genesis() {
        let f = fixture();
        let a = f
            .engine
            .create_container_at(None, vec![entry(1, 0)], now_ms() - 5_000);
        assert!(matches!(
            f.engine.add_container(&a),
            CommitOutcome::Committed { .. }
        ));

        let mut b = f
            .engine
            .create_container_at(Some(a.hash), vec![entry(1, 1)], now_ms());
        b.sign(&keypair(9));
        assert_eq!(
            f.engine.validate_container(&b),
            Err(ValidationError::IneligibleSigner(AccountId::of(&keypair(9))))
        );
    }

    #[test]
    fn quorum_requires_two_thirds_of_stake() {
        let f = fixture();
        let a = f
            .engine
            .create_container_at(None, vec![entry(1, 0)], now_ms() - 5_000);
        assert!(matches!(
            f.engine.add_container(&a),
            CommitOutcome::Committed { .. }
        ));

        // Creator alone holds 50% - not enough
        let mut b = f
            .engine
            .create_container_at(Some(a.hash), vec![entry(1, 1)], now_ms());
        assert!(!f.engine.validate_network_confirmation(&b));
        assert_eq!(
            f.engine.add_container(&b),
            CommitOutcome::InvalidNetworkConfirmation
        );

        // 50% + 30% clears the threshold
        b.sign(&keypair(2));
        assert!(f.engine.validate_network_confirmation(&b));
        assert!(matches!(
            f.engine.add_container(&b),
            CommitOutcome::Committed { .. }
        ));
    }

    #[test]
    fn failed_entry_rolls_back_the_whole_commit() {
        let f = fixture();
        let good = entry(5, 0);
        let poison = PendingEntry::create_at(
            &keypair(1),
            "count",
            1,
            1,
            None,
            None,
            vec![0xFF],
            now_ms(),
        );
        let container = f
            .engine
            .create_container_at(None, vec![good.clone(), poison], now_ms());

        let outcome = f.engine.add_container(&container);
        assert!(matches!(outcome, CommitOutcome::ProcessFailure(_)));

        // Nothing from the failed commit is visible
        assert_eq!(f.engine.store().head(), None);
        assert_eq!(f.engine.store().container_count(), 0);
        assert!(!f.engine.store().is_entry_confirmed(&good.hash));
        assert_eq!(
            f.engine.store().get_account(&good.sender).unwrap(),
            None
        );
    }

    #[test]
    fn already_applied_entries_do_not_fail_a_commit() {
        let f = fixture();
        let shared = entry(4, 0);

        let a = f
            .engine
            .create_container_at(None, vec![shared.clone()], now_ms() - 5_000);
        assert!(matches!(
            f.engine.add_container(&a),
            CommitOutcome::Committed { .. }
        ));
        let balance = f
            .engine
            .store()
            .get_account(&shared.sender)
            .unwrap()
            .unwrap()
            .balance;

        let mut b = f
            .engine
            .create_container_at(Some(a.hash), vec![shared.clone()], now_ms());
        quorum_sign(&mut b);
        assert!(matches!(
            f.engine.add_container(&b),
            CommitOutcome::Committed { .. }
        ));

        // The re-delivered entry was skipped, not re-applied
        let account: Account = f
            .engine
            .store()
            .get_account(&shared.sender)
            .unwrap()
            .unwrap();
        assert_eq!(account.balance, balance);
    }

    #[test]
    fn committed_container_is_stored_with_entry_hashes_only() {
        let f = fixture();
        let e = entry(2, 0);
        let container = f
            .engine
            .create_container_at(None, vec![e.clone()], now_ms());
        assert!(matches!(
            f.engine.add_container(&container),
            CommitOutcome::Committed { .. }
        ));

        let stored = f
            .engine
            .store()
            .get_container(&container.hash)
            .unwrap()
            .unwrap();
        assert_eq!(stored.entry_hashes, vec![e.hash]);
        assert_eq!(stored.previous_hash, None);

        let record = f.engine.store().get_entry(&e.hash).unwrap().unwrap();
        assert_eq!(record.container, container.hash);
        assert_eq!(record.entry, e);
    }
}
