//! Proposal pipeline
//!
//! One actor task per ledger instance processes every proposal event in
//! FIFO order: callers may submit concurrently, but bodies run strictly one
//! at a time, which keeps the proposal table and early-proposal buffer
//! race-free without fine-grained locking.
//!
//! Protocol per chain position:
//! 1. The elected validator builds a container from the pending pool and
//!    enters it into a binary accept/reject election, gossiping it to peers
//! 2. Remote proposals are validated on arrival; ones ahead of the local
//!    head wait in a TTL-bounded buffer for their parent to commit
//! 3. When the accept/reject election completes, the preferred validated
//!    candidate enters a selection election
//! 4. The selection winner commits; confirmations fan out and the pipeline
//!    retriggers itself

use crate::election::{
    ElectionCategory, ElectionDriver, ElectionMetadata, ElectionOutcome, VoteValidator,
};
use crate::transport::{GossipMessage, PeerTransport, ProposalNotice};
use crate::{EARLY_PROPOSAL_TTL_MS, PROPOSAL_TIMEOUT_MS};
use ledger_runtime::{
    now_ms, AccountId, Container, ContainerEngine, Hash, PendingPool, PoolEvent,
    MAX_ENTRIES_PER_CONTAINER,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::selector::ValidatorSelector;

/// Protocol state of a proposal in the in-memory table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalState {
    Queued,
    Validated,
    Confirmed,
    Failed,
}

/// A candidate container plus its in-protocol agreement state
#[derive(Debug, Clone)]
pub struct Proposal {
    pub container: Container,
    pub state: ProposalState,
    pub inserted_at_ms: u64,
}

/// Counters surfaced by the pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct ManagerStats {
    pub proposals_started: u64,
    pub proposals_received: u64,
    pub containers_committed: u64,
    pub proposals_discarded: u64,
}

/// Post-commit hook, e.g. cross-network dispatch
pub type CommitHook = Arc<dyn Fn(&Container) + Send + Sync>;

enum Command {
    TryPropose,
    RemoteProposal(ProposalNotice),
    ElectionCompleted(ElectionOutcome),
    SweepEarlyProposals,
    Tick,
}

type ProposalTable = Arc<RwLock<HashMap<Hash, Proposal>>>;

/// Everything the pipeline needs to run
pub struct ProposalManagerConfig {
    pub network: String,
    pub engine: Arc<ContainerEngine>,
    pub pool: Arc<PendingPool>,
    pub selector: Arc<ValidatorSelector>,
    pub elections: Arc<dyn ElectionDriver>,
    pub transport: Arc<dyn PeerTransport>,
    pub on_commit: Vec<CommitHook>,
}

/// Cheap cloneable handle feeding the serialized pipeline
#[derive(Clone)]
pub struct ProposalManagerHandle {
    commands: mpsc::Sender<Command>,
    syncing: Arc<AtomicBool>,
}

impl ProposalManagerHandle {
    /// Attempt an own proposal (new entries arrived, or startup)
    pub async fn notify_entries_added(&self) {
        let _ = self.commands.send(Command::TryPropose).await;
    }

    /// Feed a proposal received from a peer into the pipeline
    pub async fn submit_remote_proposal(&self, notice: ProposalNotice) {
        let _ = self.commands.send(Command::RemoteProposal(notice)).await;
    }

    /// Mark this node as (not) catching up; a syncing node never proposes
    pub fn set_syncing(&self, syncing: bool) {
        self.syncing.store(syncing, Ordering::SeqCst);
    }

    /// Synchronous own-proposal trigger for non-async callers such as the
    /// slot-switch callback
    pub fn trigger_propose(&self) {
        let _ = self.commands.try_send(Command::TryPropose);
    }

    /// Drop early proposals past their TTL (driven by a schedule)
    pub fn trigger_early_sweep(&self) {
        let _ = self.commands.try_send(Command::SweepEarlyProposals);
    }

    /// Deferred-work tick: close out stale proposals (driven by a schedule)
    pub fn trigger_tick(&self) {
        let _ = self.commands.try_send(Command::Tick);
    }
}

/// Spawns the serialized proposal pipeline for one ledger instance
pub struct ProposalManager;

impl ProposalManager {
    pub fn spawn(config: ProposalManagerConfig) -> ProposalManagerHandle {
        let (commands, rx) = mpsc::channel(1024);
        let syncing = Arc::new(AtomicBool::new(false));
        let proposals: ProposalTable = Arc::new(RwLock::new(HashMap::new()));

        register_vote_validators(&config, &proposals);

        // Election completions feed the pipeline
        let mut outcomes = config.elections.subscribe();
        let outcome_commands = commands.clone();
        tokio::spawn(async move {
            loop {
                match outcomes.recv().await {
                    Ok(outcome) => {
                        if outcome_commands
                            .send(Command::ElectionCompleted(outcome))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Dropped {} election outcomes", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        // New pool entries trigger own-proposal attempts
        let mut pool_events = config.pool.subscribe();
        let pool_commands = commands.clone();
        tokio::spawn(async move {
            loop {
                match pool_events.recv().await {
                    Ok(PoolEvent::Added(_)) => {
                        if pool_commands.send(Command::TryPropose).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let state = ManagerState {
            node_id: config.engine.node_id(),
            network: config.network,
            engine: config.engine,
            pool: config.pool,
            selector: config.selector,
            elections: config.elections,
            transport: config.transport,
            on_commit: config.on_commit,
            proposals,
            early: HashMap::new(),
            last_own_ms: None,
            syncing: syncing.clone(),
            activity: HashMap::new(),
            stats: ManagerStats::default(),
        };
        tokio::spawn(run(state, rx));

        ProposalManagerHandle { commands, syncing }
    }
}

fn register_vote_validators(config: &ProposalManagerConfig, proposals: &ProposalTable) {
    // Accept/reject votes: the proposal must exist and re-validate
    let table = proposals.clone();
    let engine = config.engine.clone();
    let validator: VoteValidator = Arc::new(move |hash, _metadata| {
        let container = table.read().get(hash).map(|p| p.container.clone());
        match container {
            Some(container) => engine.validate_container(&container).is_ok(),
            None => false,
        }
    });
    config
        .elections
        .register_vote_validator(ElectionCategory::ContainerValidation, validator);

    // Selection votes: the proposal must exist at the election's chain
    // position and already be validated
    let table = proposals.clone();
    let validator: VoteValidator = Arc::new(move |hash, metadata| {
        table
            .read()
            .get(hash)
            .map(|p| {
                p.state == ProposalState::Validated
                    && p.container.previous_hash == metadata.previous_hash
            })
            .unwrap_or(false)
    });
    config
        .elections
        .register_vote_validator(ElectionCategory::NextContainer, validator);
}

struct ManagerState {
    node_id: AccountId,
    network: String,
    engine: Arc<ContainerEngine>,
    pool: Arc<PendingPool>,
    selector: Arc<ValidatorSelector>,
    elections: Arc<dyn ElectionDriver>,
    transport: Arc<dyn PeerTransport>,
    on_commit: Vec<CommitHook>,
    proposals: ProposalTable,
    /// Proposals ahead of the local head, keyed by the hash they wait for
    early: HashMap<Hash, Vec<(ProposalNotice, u64)>>,
    last_own_ms: Option<u64>,
    syncing: Arc<AtomicBool>,
    activity: HashMap<AccountId, u64>,
    stats: ManagerStats,
}

async fn run(mut state: ManagerState, mut rx: mpsc::Receiver<Command>) {
    while let Some(command) = rx.recv().await {
        let result = match command {
            Command::TryPropose => state.try_propose().await,
            Command::RemoteProposal(notice) => state.handle_remote(notice).await,
            Command::ElectionCompleted(outcome) => state.on_election_completed(outcome).await,
            Command::SweepEarlyProposals => {
                state.sweep_early();
                Ok(())
            }
            Command::Tick => {
                state.tick();
                Ok(())
            }
        };
        if let Err(e) = result {
            // Non-fatal: nothing processed this round, retried on next trigger
            tracing::warn!("Proposal step failed: {:#}", e);
        }
    }
    tracing::debug!("Proposal pipeline stopped");
}

impl ManagerState {
    /// The validator allowed to propose right now; on an empty chain the
    /// highest-stake validator bootstraps the genesis container
    fn proposer_now(&self) -> Option<AccountId> {
        match self.engine.store().head() {
            Some(_) => self.selector.current_validator(),
            None => self
                .engine
                .store()
                .eligible_validators()
                .first()
                .map(|(id, _)| *id),
        }
    }

    async fn try_propose(&mut self) -> anyhow::Result<()> {
        if self.syncing.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.proposer_now() != Some(self.node_id) {
            return Ok(());
        }
        if self.pool.is_empty() {
            return Ok(());
        }
        if let Some(last) = self.last_own_ms {
            if now_ms().saturating_sub(last) < PROPOSAL_TIMEOUT_MS {
                return Ok(());
            }
        }

        let entries = self.pool.select_for_container(
            MAX_ENTRIES_PER_CONTAINER,
            self.engine.registry(),
            self.engine.store(),
        );
        if entries.is_empty() {
            return Ok(());
        }

        let head = self.engine.store().head();
        let container = self.engine.create_container(head, entries);
        tracing::debug!(
            container = %container.hash,
            entries = container.entries.len(),
            "Proposing own container"
        );
        self.last_own_ms = Some(now_ms());
        self.enter_proposal(container).await
    }

    async fn handle_remote(&mut self, notice: ProposalNotice) -> anyhow::Result<()> {
        self.stats.proposals_received += 1;
        let container = notice.container.clone();

        // At-least-once delivery: already-seen proposals are a no-op
        if self.proposals.read().contains_key(&container.hash) {
            tracing::debug!(container = %container.hash, "Duplicate proposal ignored");
            return Ok(());
        }

        let head = self.engine.store().head();
        if container.previous_hash != head {
            match container.previous_hash {
                Some(previous) => {
                    // Out-of-order gossip: park it until its parent commits
                    let waiters = self.early.entry(previous).or_default();
                    if waiters.iter().all(|(n, _)| n.container.hash != container.hash) {
                        tracing::debug!(
                            container = %container.hash,
                            waiting_for = %previous,
                            "Buffering early proposal"
                        );
                        waiters.push((notice, now_ms()));
                    }
                }
                None => {
                    tracing::debug!(container = %container.hash, "Genesis proposal on a non-empty chain dropped");
                    self.stats.proposals_discarded += 1;
                }
            }
            return Ok(());
        }

        // The claimed hash must match the contents before anything else
        if container.hash != container.compute_hash() {
            tracing::warn!(container = %container.hash, "Proposal hash does not match contents");
            self.stats.proposals_discarded += 1;
            return Ok(());
        }

        self.enter_proposal(container).await
    }

    /// Validate a candidate, register it, and start its accept/reject
    /// election; gossips the proposal onward only when it was accepted
    async fn enter_proposal(&mut self, container: Container) -> anyhow::Result<()> {
        if self.proposals.read().contains_key(&container.hash) {
            return Ok(());
        }

        let expected_creator = self.proposer_now();
        if expected_creator != Some(container.creator) {
            tracing::debug!(
                container = %container.hash,
                creator = %container.creator,
                elected = ?expected_creator,
                "Proposal creator is not the elected validator, dropped"
            );
            self.stats.proposals_discarded += 1;
            return Ok(());
        }

        if container.previous_hash != self.engine.store().head() {
            tracing::debug!(container = %container.hash, "Proposal is not chained off the head, dropped");
            self.stats.proposals_discarded += 1;
            return Ok(());
        }

        if let Err(e) = self.engine.validate_container(&container) {
            tracing::debug!(container = %container.hash, error = %e, "Proposal failed validation, dropped");
            self.stats.proposals_discarded += 1;
            return Ok(());
        }

        let hash = container.hash;
        let previous_hash = container.previous_hash;
        self.proposals.write().insert(
            hash,
            Proposal {
                container: container.clone(),
                state: ProposalState::Queued,
                inserted_at_ms: now_ms(),
            },
        );
        self.stats.proposals_started += 1;

        let id = self.elections.create_election_id(
            &self.network,
            ElectionCategory::ContainerValidation,
            &hash.to_bs58(),
        );
        self.elections.start_local_election(
            &self.network,
            ElectionCategory::ContainerValidation,
            &id,
            hash,
            ElectionMetadata { previous_hash },
        )?;
        tracing::debug!(container = %hash, election = %id, "Validation election started");

        self.transport
            .broadcast(GossipMessage::Proposal {
                proposal: ProposalNotice { container },
            })
            .await?;
        Ok(())
    }

    async fn on_election_completed(&mut self, outcome: ElectionOutcome) -> anyhow::Result<()> {
        match outcome.category {
            ElectionCategory::ContainerValidation => self.on_validation_complete(outcome).await,
            ElectionCategory::NextContainer => self.on_selection_complete(outcome).await,
        }
    }

    async fn on_validation_complete(&mut self, outcome: ElectionOutcome) -> anyhow::Result<()> {
        let previous_hash = {
            let mut table = self.proposals.write();
            let Some(proposal) = table.get_mut(&outcome.winner) else {
                tracing::debug!(winner = %outcome.winner, "Validation outcome for unknown proposal");
                return Ok(());
            };
            if proposal.state != ProposalState::Queued {
                return Ok(());
            }
            proposal.state = ProposalState::Validated;
            proposal.container.previous_hash
        };
        tracing::debug!(container = %outcome.winner, "Proposal validated");

        // Preferred candidate among everything validated at this chain
        // position: freshest first, smaller hash on equal age
        let candidates: Vec<(Hash, u64)> = {
            let table = self.proposals.read();
            table
                .iter()
                .filter(|(_, p)| {
                    p.state == ProposalState::Validated
                        && p.container.previous_hash == previous_hash
                })
                .map(|(hash, p)| (*hash, p.inserted_at_ms))
                .collect()
        };
        let Some(candidate) = preferred_candidate(&candidates, now_ms()) else {
            return Ok(());
        };

        let subject = previous_hash
            .map(|h| h.to_bs58())
            .unwrap_or_else(|| "genesis".to_string());
        let id = self.elections.create_election_id(
            &self.network,
            ElectionCategory::NextContainer,
            &subject,
        );
        self.elections.start_local_election(
            &self.network,
            ElectionCategory::NextContainer,
            &id,
            candidate,
            ElectionMetadata { previous_hash },
        )?;
        tracing::debug!(candidate = %candidate, election = %id, "Selection election started");
        Ok(())
    }

    async fn on_selection_complete(&mut self, outcome: ElectionOutcome) -> anyhow::Result<()> {
        let mut container = {
            let mut table = self.proposals.write();
            let Some(proposal) = table.get_mut(&outcome.winner) else {
                tracing::debug!(winner = %outcome.winner, "Selection outcome for unknown proposal");
                return Ok(());
            };
            if proposal.state == ProposalState::Confirmed {
                return Ok(());
            }
            proposal.state = ProposalState::Confirmed;
            proposal.container.clone()
        };

        // Fold in the signatures voters produced for this election
        for (signer, signature) in self.elections.vote_signatures(&outcome.election_id) {
            container.signatures.entry(signer).or_insert(signature);
        }

        // Rival proposals for this chain position lost; drop them
        {
            let mut table = self.proposals.write();
            let before = table.len();
            table.retain(|hash, p| {
                *hash == container.hash || p.container.previous_hash != container.previous_hash
            });
            self.stats.proposals_discarded += (before - table.len()) as u64;
        }

        let commit = self.engine.add_container(&container);
        match commit {
            ledger_runtime::CommitOutcome::Committed { hash, entries } => {
                self.stats.containers_committed += 1;
                self.last_own_ms = None;
                tracing::info!(container = %hash, entries, "Container confirmed and committed");
                self.proposals.write().remove(&hash);

                // Confirmations fan out only after the commit is durable
                let entry_hashes = container.entry_hashes();
                self.pool.remove_confirmed(&entry_hashes);

                let now = now_ms();
                for signer in container.signatures.keys() {
                    self.activity.insert(*signer, now);
                }

                if let Err(e) = self
                    .transport
                    .broadcast(GossipMessage::NewContainer {
                        container: container.clone(),
                    })
                    .await
                {
                    tracing::warn!("Failed to gossip committed container: {:#}", e);
                }
                for entry_hash in entry_hashes {
                    if let Err(e) = self
                        .transport
                        .broadcast(GossipMessage::EntryConfirmed { hash: entry_hash })
                        .await
                    {
                        tracing::warn!("Failed to gossip entry confirmation: {:#}", e);
                    }
                }

                for hook in &self.on_commit {
                    hook(&container);
                }

                // Proposals that were waiting for this container can run now
                if let Some(waiters) = self.early.remove(&hash) {
                    for (notice, _) in waiters {
                        if let Err(e) = self.handle_remote(notice).await {
                            tracing::warn!("Promoted proposal failed: {:#}", e);
                        }
                    }
                }

                // The pipeline sustains itself
                self.try_propose().await
            }
            other => {
                tracing::warn!(container = %container.hash, outcome = ?other, "Confirmed container failed to commit");
                if let Some(proposal) = self.proposals.write().get_mut(&container.hash) {
                    proposal.state = ProposalState::Failed;
                }
                Ok(())
            }
        }
    }

    fn sweep_early(&mut self) {
        let now = now_ms();
        let mut dropped = 0usize;
        self.early.retain(|_, waiters| {
            waiters.retain(|(_, buffered_at)| {
                let keep = now.saturating_sub(*buffered_at) <= EARLY_PROPOSAL_TTL_MS;
                if !keep {
                    dropped += 1;
                }
                keep
            });
            !waiters.is_empty()
        });
        if dropped > 0 {
            tracing::debug!(dropped, "Swept expired early proposals");
        }
    }

    /// Deferred work: retire failed and stale proposals
    fn tick(&mut self) {
        let now = now_ms();
        let mut table = self.proposals.write();
        let before = table.len();
        table.retain(|_, p| {
            p.state != ProposalState::Failed
                && now.saturating_sub(p.inserted_at_ms) <= EARLY_PROPOSAL_TTL_MS
        });
        let closed = before - table.len();
        drop(table);
        if closed > 0 {
            self.stats.proposals_discarded += closed as u64;
            tracing::debug!(closed, "Closed stale proposals");
        }
        tracing::trace!(
            started = self.stats.proposals_started,
            received = self.stats.proposals_received,
            committed = self.stats.containers_committed,
            discarded = self.stats.proposals_discarded,
            active_validators = self.activity.len(),
            "Pipeline stats"
        );
    }
}

/// Linear freshness decay over the proposal timeout window
fn freshness(age_ms: u64) -> f64 {
    (1.0 - age_ms as f64 / PROPOSAL_TIMEOUT_MS as f64).max(0.0)
}

/// Pick the candidate with the highest freshness score; equal scores fall
/// back to the lexicographically smaller hash
fn preferred_candidate(candidates: &[(Hash, u64)], now: u64) -> Option<Hash> {
    candidates
        .iter()
        .max_by(|a, b| {
            let score_a = freshness(now.saturating_sub(a.1));
            let score_b = freshness(now.saturating_sub(b.1));
            score_a
                .partial_cmp(&score_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.cmp(&a.0))
        })
        .map(|(hash, _)| *hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::ElectionId;
    use async_trait::async_trait;
    use ed25519_dalek::SigningKey;
    use ledger_runtime::{
        ApplyContext, ApplyState, EntryProcessor, LedgerStore, PendingEntry, ProcessError,
        ProcessorRegistry,
    };
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::tempdir;

    fn keypair(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    struct AcceptAll;

    impl EntryProcessor for AcceptAll {
        fn entry_type(&self) -> &str {
            "noop"
        }

        fn validate(&self, _e: &PendingEntry, _s: &LedgerStore) -> Result<(), ProcessError> {
            Ok(())
        }

        fn apply(
            &self,
            _e: &PendingEntry,
            _ctx: &mut ApplyContext<'_>,
        ) -> Result<ApplyState, ProcessError> {
            Ok(ApplyState::Applied)
        }
    }

    #[derive(Debug, Clone)]
    struct StartedElection {
        category: ElectionCategory,
        id: ElectionId,
        candidate: Hash,
        metadata: ElectionMetadata,
    }

    struct MockDriver {
        started: Mutex<Vec<StartedElection>>,
        validators: Mutex<HashMap<&'static str, VoteValidator>>,
        events: broadcast::Sender<ElectionOutcome>,
    }

    impl MockDriver {
        fn new() -> Arc<Self> {
            let (events, _) = broadcast::channel(64);
            Arc::new(Self {
                started: Mutex::new(Vec::new()),
                validators: Mutex::new(HashMap::new()),
                events,
            })
        }

        fn started(&self) -> Vec<StartedElection> {
            self.started.lock().clone()
        }

        fn complete(&self, election: &StartedElection) {
            let _ = self.events.send(ElectionOutcome {
                category: election.category,
                election_id: election.id.clone(),
                winner: election.candidate,
            });
        }

        fn validator(&self, category: ElectionCategory) -> VoteValidator {
            self.validators
                .lock()
                .get(category.as_str())
                .cloned()
                .expect("validator registered")
        }
    }

    impl ElectionDriver for MockDriver {
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
            self.started.lock().push(StartedElection {
                category,
                id: id.clone(),
                candidate,
                metadata,
            });
            Ok(())
        }

        fn vote_signatures(&self, _id: &ElectionId) -> BTreeMap<AccountId, Vec<u8>> {
            BTreeMap::new()
        }

        fn register_vote_validator(&self, category: ElectionCategory, validator: VoteValidator) {
            self.validators.lock().insert(category.as_str(), validator);
        }

        fn subscribe(&self) -> broadcast::Receiver<ElectionOutcome> {
            self.events.subscribe()
        }
    }

    #[derive(Default)]
    struct MockTransport {
        messages: Mutex<Vec<GossipMessage>>,
    }

    impl MockTransport {
        fn messages(&self) -> Vec<GossipMessage> {
            self.messages.lock().clone()
        }
    }

    #[async_trait]
    impl PeerTransport for MockTransport {
        async fn broadcast(&self, message: GossipMessage) -> anyhow::Result<()> {
            self.messages.lock().push(message);
            Ok(())
        }

        async fn send_to_peer(&self, _peer: &str, message: GossipMessage) -> anyhow::Result<()> {
            self.messages.lock().push(message);
            Ok(())
        }

        async fn send_to_network(
            &self,
            _network: &str,
            message: GossipMessage,
            _on_response: Option<crate::transport::ResponseCallback>,
        ) -> anyhow::Result<()> {
            self.messages.lock().push(message);
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<LedgerStore>,
        engine: Arc<ContainerEngine>,
        pool: Arc<PendingPool>,
        driver: Arc<MockDriver>,
        transport: Arc<MockTransport>,
        handle: ProposalManagerHandle,
    }

    /// Single-validator network: this node holds 100% of the stake
    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(LedgerStore::open(dir.path(), "alpha").unwrap());
        store
            .set_validator_weight("alpha", &AccountId::of(&keypair(1)), 100)
            .unwrap();
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(AcceptAll)).unwrap();
        let engine = Arc::new(ContainerEngine::new(
            store.clone(),
            Arc::new(registry),
            keypair(1),
        ));
        let pool = Arc::new(PendingPool::new());
        let selector = Arc::new(ValidatorSelector::new(store.clone()));
        let driver = MockDriver::new();
        let transport = Arc::new(MockTransport::default());

        let handle = ProposalManager::spawn(ProposalManagerConfig {
            network: "alpha".to_string(),
            engine: engine.clone(),
            pool: pool.clone(),
            selector,
            elections: driver.clone(),
            transport: transport.clone(),
            on_commit: Vec::new(),
        });

        Fixture {
            _dir: dir,
            store,
            engine,
            pool,
            driver,
            transport,
            handle,
        }
    }

    fn entry(fee: u64, nonce: u64) -> PendingEntry {
        PendingEntry::create(&keypair(1), "noop", fee, nonce, None, None, vec![])
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn own_proposal_flows_through_both_elections_to_commit() {
        let f = fixture();
        f.pool.add_entry(entry(5, 0), None);
        f.pool.add_entry(entry(1, 1), None);
        f.pool.add_entry(entry(3, 2), None);
        f.handle.notify_entries_added().await;
        settle().await;

        // One accept/reject election over the new proposal
        let started = f.driver.started();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].category, ElectionCategory::ContainerValidation);
        let proposal_hash = started[0].candidate;

        f.driver.complete(&started[0]);
        settle().await;

        // The validated proposal moved on to the selection election
        let started = f.driver.started();
        assert_eq!(started.len(), 2);
        assert_eq!(started[1].category, ElectionCategory::NextContainer);
        assert_eq!(started[1].candidate, proposal_hash);

        f.driver.complete(&started[1]);
        settle().await;

        // Committed: head moved, pool drained, confirmations gossiped
        assert_eq!(f.store.head(), Some(proposal_hash));
        assert_eq!(f.pool.pending_len(), 0);

        let messages = f.transport.messages();
        let committed: Vec<&Container> = messages
            .iter()
            .filter_map(|m| match m {
                GossipMessage::NewContainer { container } => Some(container),
                _ => None,
            })
            .collect();
        assert_eq!(committed.len(), 1);
        let fees: Vec<u64> = committed[0].entries.iter().map(|e| e.fee).collect();
        assert_eq!(fees, vec![5, 3, 1]);

        let confirmations = messages
            .iter()
            .filter(|m| matches!(m, GossipMessage::EntryConfirmed { .. }))
            .count();
        assert_eq!(confirmations, 3);
    }

    #[tokio::test]
    async fn early_proposal_waits_for_its_parent_and_is_promoted() {
        let f = fixture();
        f.pool.add_entry(entry(5, 0), None);
        f.handle.notify_entries_added().await;
        settle().await;

        let started = f.driver.started();
        assert_eq!(started.len(), 1);
        let genesis_hash = started[0].candidate;

        // A proposal chained off the not-yet-committed genesis arrives early
        let future_entry = PendingEntry::create_at(
            &keypair(1),
            "noop",
            2,
            9,
            None,
            None,
            vec![],
            now_ms() + 5_000,
        );
        let early = f.engine.create_container_at(
            Some(genesis_hash),
            vec![future_entry],
            now_ms() + 5_000,
        );
        let early_hash = early.hash;
        f.handle
            .submit_remote_proposal(ProposalNotice { container: early })
            .await;
        settle().await;

        // Still buffered: no election started for it
        assert_eq!(f.driver.started().len(), 1);

        // Drive genesis through both elections
        f.driver.complete(&f.driver.started()[0]);
        settle().await;
        let selection = f.driver.started()[1].clone();
        f.driver.complete(&selection);
        settle().await;
        assert_eq!(f.store.head(), Some(genesis_hash));

        // The buffered proposal was promoted without re-transmission
        let started = f.driver.started();
        let promoted = started
            .iter()
            .find(|e| {
                e.category == ElectionCategory::ContainerValidation && e.candidate == early_hash
            })
            .expect("early proposal promoted");
        assert_eq!(promoted.metadata.previous_hash, Some(genesis_hash));
    }

    #[tokio::test]
    async fn duplicate_remote_proposals_are_idempotent() {
        let f = fixture();
        // A remote proposal chained off the (empty) head from the elected
        // bootstrap validator
        let container = f.engine.create_container(None, vec![entry(4, 0)]);
        let notice = ProposalNotice { container };

        f.handle.submit_remote_proposal(notice.clone()).await;
        f.handle.submit_remote_proposal(notice.clone()).await;
        f.handle.submit_remote_proposal(notice).await;
        settle().await;

        assert_eq!(f.driver.started().len(), 1);
    }

    #[tokio::test]
    async fn syncing_node_never_proposes() {
        let f = fixture();
        f.handle.set_syncing(true);
        f.pool.add_entry(entry(5, 0), None);
        f.handle.notify_entries_added().await;
        settle().await;
        assert!(f.driver.started().is_empty());

        f.handle.set_syncing(false);
        f.handle.notify_entries_added().await;
        settle().await;
        assert_eq!(f.driver.started().len(), 1);
    }

    #[tokio::test]
    async fn vote_validators_enforce_existence_state_and_position() {
        let f = fixture();
        f.pool.add_entry(entry(5, 0), None);
        f.handle.notify_entries_added().await;
        settle().await;

        let started = f.driver.started();
        let proposal_hash = started[0].candidate;
        let metadata = started[0].metadata.clone();

        let accept = f.driver.validator(ElectionCategory::ContainerValidation);
        let select = f.driver.validator(ElectionCategory::NextContainer);

        // Unknown proposals never collect votes
        assert!(!accept(&Hash::digest(b"unknown"), &metadata));
        assert!(!select(&Hash::digest(b"unknown"), &metadata));

        // Known and re-validating, but not yet validated: acceptable for the
        // binary pass, not yet for selection
        assert!(accept(&proposal_hash, &metadata));
        assert!(!select(&proposal_hash, &metadata));

        f.driver.complete(&started[0]);
        settle().await;

        assert!(select(&proposal_hash, &metadata));
        // Wrong chain position is refused even for a validated proposal
        let wrong = ElectionMetadata {
            previous_hash: Some(Hash::digest(b"elsewhere")),
        };
        assert!(!select(&proposal_hash, &wrong));
    }

    #[test]
    fn preferred_candidate_prefers_fresh_then_smaller_hash() {
        let now = 100_000;
        let older = (Hash::digest(b"a"), now - 5_000);
        let fresher = (Hash::digest(b"b"), now - 1_000);
        assert_eq!(
            preferred_candidate(&[older, fresher], now),
            Some(fresher.0)
        );

        // Equal age: the lexicographically smaller hash wins
        let one = (Hash::digest(b"one"), now - 2_000);
        let two = (Hash::digest(b"two"), now - 2_000);
        let smaller = one.0.min(two.0);
        assert_eq!(preferred_candidate(&[one, two], now), Some(smaller));
        assert_eq!(preferred_candidate(&[two, one], now), Some(smaller));

        // Scores saturate at zero: two ancient proposals still tie-break
        let ancient_a = (Hash::digest(b"x"), now - 50_000);
        let ancient_b = (Hash::digest(b"y"), now - 90_000);
        let smaller = ancient_a.0.min(ancient_b.0);
        assert_eq!(
            preferred_candidate(&[ancient_a, ancient_b], now),
            Some(smaller)
        );

        assert_eq!(preferred_candidate(&[], now), None);
    }

    #[tokio::test]
    async fn invalid_remote_proposal_is_dropped_not_gossiped() {
        let f = fixture();
        let mut container = f.engine.create_container(None, vec![entry(4, 0)]);
        // Tamper after signing
        container.entries[0].fee = 99;
        f.handle
            .submit_remote_proposal(ProposalNotice { container })
            .await;
        settle().await;

        assert!(f.driver.started().is_empty());
        assert!(f.transport.messages().is_empty());
    }
}
