//! Election collaborator contract
//!
//! The ballot counting itself lives outside this crate; the proposal
//! manager drives it through this interface. Two categories exist: a binary
//! accept/reject pass over a single proposal, and a selection pass that
//! picks the next container among validated candidates.

use ledger_runtime::{AccountId, Hash};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// The two election categories the proposal pipeline runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElectionCategory {
    /// Binary accept/reject over one proposal
    ContainerValidation,
    /// Selection among validated proposals for one chain position
    NextContainer,
}

impl ElectionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElectionCategory::ContainerValidation => "containerValidation",
            ElectionCategory::NextContainer => "nextContainer",
        }
    }
}

impl fmt::Display for ElectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier shared by every node running the same election
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElectionId(pub String);

impl fmt::Display for ElectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Context attached to an election so vote validators can check a
/// candidate's chain position
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElectionMetadata {
    pub previous_hash: Option<Hash>,
}

/// Completion notification for an election
#[derive(Debug, Clone)]
pub struct ElectionOutcome {
    pub category: ElectionCategory,
    pub election_id: ElectionId,
    pub winner: Hash,
}

/// Predicate consulted before counting a vote for a candidate
pub type VoteValidator = Arc<dyn Fn(&Hash, &ElectionMetadata) -> bool + Send + Sync>;

/// Driving interface for the external ballot-counting mechanism
pub trait ElectionDriver: Send + Sync {
    /// Deterministic id every node derives for the same election
    fn create_election_id(
        &self,
        network: &str,
        category: ElectionCategory,
        subject: &str,
    ) -> ElectionId;

    /// Enter a candidate into an election, creating it if needed
    fn start_local_election(
        &self,
        network: &str,
        category: ElectionCategory,
        id: &ElectionId,
        candidate: Hash,
        metadata: ElectionMetadata,
    ) -> anyhow::Result<()>;

    /// Signatures collected from voters of a completed election, keyed by
    /// signer; signatures are over the winning candidate hash
    fn vote_signatures(&self, id: &ElectionId) -> BTreeMap<AccountId, Vec<u8>>;

    /// Register the predicate consulted before counting votes in a category
    fn register_vote_validator(&self, category: ElectionCategory, validator: VoteValidator);

    /// Subscribe to completion notifications
    fn subscribe(&self) -> broadcast::Receiver<ElectionOutcome>;
}
