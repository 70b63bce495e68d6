//! Ledger runtime - data model, storage, and container engine
//!
//! This crate provides the core machinery one ledger instance runs on:
//! - Signed entry and hash-chained container types
//! - Persistent ledger store (sled) with an atomic commit unit
//! - Deduplicated, fee-ordered pending pool with confirmation callbacks
//! - Entry-processor registry for pluggable transaction semantics
//! - Container engine: build, validate, and commit containers

pub mod engine;
pub mod pool;
pub mod registry;
pub mod store;
pub mod types;

pub use engine::{CommitOutcome, ContainerEngine, ValidationError, ValidationOptions};
pub use pool::{ConfirmResult, PendingPool, PoolEvent};
pub use registry::{
    apply_scope, ApplyContext, ApplyState, EntryProcessor, ProcessError, ProcessorRegistry,
};
pub use store::{Account, EntryRecord, LedgerMetadata, LedgerStore, StoredContainer};
pub use types::{
    sign_hash, verify_hash, AccountId, BatchValidation, Container, CrossNetworkBatch, Hash,
    PendingEntry,
};

/// Maximum entries selected into a single container
pub const MAX_ENTRIES_PER_CONTAINER: usize = 20;

/// Default slot duration for the validator schedule (milliseconds)
pub const SLOT_DURATION_MS: u64 = 10_000;

/// Pending entries older than this are swept from the pool (milliseconds)
pub const ENTRY_EXPIRY_MS: u64 = 3_600_000;

/// Maximum tolerated forward clock drift on container timestamps (milliseconds)
pub const MAX_CLOCK_DRIFT_MS: u64 = 60_000;

/// Fraction of total stake whose signatures make a container final
pub const CONFIRMATION_QUORUM: f64 = 0.67;

/// Minimum share of total stake for a validator to be schedulable
pub const MIN_STAKE_SHARE: f64 = 0.01;

/// Current wall-clock time in unix milliseconds
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
