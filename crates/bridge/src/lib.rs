//! Cross-network bridge
//!
//! Packages entries committed on this ledger for delivery to another, and
//! verifies inbound batches without replaying the source ledger's
//! consensus: every entry is bound to a base hash over the origin
//! container's cross-network entry list, and the base hash carries a
//! stake-weighted signature quorum from the source network.

pub mod batch;
pub mod inbound;

pub use batch::{base_hash, CrossNetworkBridge};
pub use inbound::{ActionConstructor, InboundDispatcher};

use ledger_runtime::AccountId;
use thiserror::Error;

/// Expected verification and dispatch failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("entry hash does not match its contents")]
    EntryHashMismatch,

    #[error("base hash does not match the origin container and hash list")]
    BaseHashMismatch,

    #[error("entry hash is not a member of the batch hash list")]
    NotInHashList,

    #[error("signatures cover {signed} of {total} source stake, below quorum")]
    InsufficientQuorum { signed: u64, total: u64 },

    #[error("no verifying signature from network owner {0}")]
    NoOwnerSignature(AccountId),

    #[error("no weight table or owner known for network '{0}'")]
    UnknownSourceNetwork(String),

    #[error("no action constructor registered for entry type '{0}'")]
    NoConstructor(String),

    #[error("action constructor for entry type '{0}' already registered")]
    DuplicateConstructor(String),

    #[error("entry has no target account")]
    MissingTargetAccount,

    #[error("entry payload does not decode: {0}")]
    MalformedEntry(String),
}
