//! Ledger consensus - validator schedule and proposal pipeline
//!
//! Architecture:
//! - A deterministic, stake-weighted round-robin schedule elects one
//!   validator per time slot
//! - The elected validator proposes a container of pending entries
//! - Two elections agree on it: a binary accept/reject pass, then a
//!   selection pass among validated candidates
//! - The winning container commits through the container engine and the
//!   pipeline retriggers itself
//!
//! All proposal handling for one ledger instance is serialized through a
//! single FIFO task queue; distinct instances are fully independent.

pub mod election;
pub mod gossip;
pub mod proposal;
pub mod schedule;
pub mod selector;
pub mod transport;

pub use election::{
    ElectionCategory, ElectionDriver, ElectionId, ElectionMetadata, ElectionOutcome, VoteValidator,
};
pub use gossip::{GossipClient, GossipHub};
pub use proposal::{
    ManagerStats, Proposal, ProposalManager, ProposalManagerConfig, ProposalManagerHandle,
    ProposalState,
};
pub use schedule::ScheduleHandle;
pub use selector::{spawn_slot_timer, ValidatorSelector};
pub use transport::{GossipMessage, PeerTransport, ProposalNotice, ResponseCallback};

/// Window after starting an own proposal during which no new own proposal
/// for the same chain position is started (milliseconds)
pub const PROPOSAL_TIMEOUT_MS: u64 = 10_000;

/// Early proposals waiting on an unknown chain head are dropped after this
/// long (milliseconds)
pub const EARLY_PROPOSAL_TTL_MS: u64 = 120_000;

/// Cadence of the deferred-work tick that closes out stale proposals
/// (milliseconds)
pub const DELAYED_TICK_MS: u64 = 5_000;
