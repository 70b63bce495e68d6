//! Entry-processor registry
//!
//! Per-type transaction semantics are pluggable: each entry type registers a
//! processor implementing validation against committed state and application
//! inside the commit transaction. The engine never interprets payloads.

use crate::store::{account_key, entry_key, Account, LedgerStore};
use crate::types::{AccountId, Hash, PendingEntry};
use sled::transaction::TransactionalTree;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Expected processor-level failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("no processor registered for entry type '{0}'")]
    UnknownEntryType(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Result of applying an entry; `AlreadyApplied` is the idempotency signal
/// that lets re-delivered containers commit cleanly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyState {
    Applied,
    AlreadyApplied,
}

/// Mutable view of ledger state scoped to one commit transaction
///
/// Every read and write goes through the transaction, so a failed commit
/// leaves no trace of any entry's application.
pub struct ApplyContext<'a> {
    tree: &'a TransactionalTree,
}

impl<'a> ApplyContext<'a> {
    pub fn new(tree: &'a TransactionalTree) -> Self {
        Self { tree }
    }

    pub fn get_account(&self, id: &AccountId) -> Result<Option<Account>, ProcessError> {
        let bytes = self
            .tree
            .get(account_key(id))
            .map_err(|e| ProcessError::Storage(e.to_string()))?;
        match bytes {
            Some(bytes) => bincode::deserialize(&bytes)
                .map(Some)
                .map_err(|e| ProcessError::Storage(e.to_string())),
            None => Ok(None),
        }
    }

    pub fn put_account(&self, id: &AccountId, account: &Account) -> Result<(), ProcessError> {
        let bytes =
            bincode::serialize(account).map_err(|e| ProcessError::Storage(e.to_string()))?;
        self.tree
            .insert(account_key(id), bytes)
            .map_err(|e| ProcessError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Whether an entry hash was already committed in an earlier container
    pub fn entry_exists(&self, hash: &Hash) -> Result<bool, ProcessError> {
        self.tree
            .get(entry_key(hash))
            .map(|v| v.is_some())
            .map_err(|e| ProcessError::Storage(e.to_string()))
    }
}

/// Run a closure with an [`ApplyContext`] inside its own one-off storage
/// transaction; aimed at processor tests and administrative tooling
pub fn apply_scope<T>(
    store: &LedgerStore,
    f: impl Fn(&mut ApplyContext<'_>) -> Result<T, ProcessError>,
) -> Result<T, ProcessError> {
    let result = store.ledger().transaction(|tx| {
        let mut ctx = ApplyContext::new(tx);
        f(&mut ctx).map_err(sled::transaction::ConflictableTransactionError::Abort)
    });
    match result {
        Ok(value) => Ok(value),
        Err(sled::transaction::TransactionError::Abort(e)) => Err(e),
        Err(sled::transaction::TransactionError::Storage(e)) => {
            Err(ProcessError::Storage(e.to_string()))
        }
    }
}

/// Pluggable per-type transaction semantics
pub trait EntryProcessor: Send + Sync {
    /// The type tag this processor handles
    fn entry_type(&self) -> &str;

    /// Check an entry against committed state; used on pool selection and
    /// container validation
    fn validate(&self, entry: &PendingEntry, store: &LedgerStore) -> Result<(), ProcessError>;

    /// Apply an entry inside the commit transaction
    fn apply(&self, entry: &PendingEntry, ctx: &mut ApplyContext<'_>)
        -> Result<ApplyState, ProcessError>;
}

/// Registry of entry processors keyed by type tag
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn EntryProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor; empty tags and duplicate registrations are
    /// configuration mistakes and are refused
    pub fn register(&mut self, processor: Arc<dyn EntryProcessor>) -> Result<(), ProcessError> {
        let tag = processor.entry_type().to_string();
        if tag.is_empty() {
            return Err(ProcessError::Rejected(
                "processor registered with empty type tag".to_string(),
            ));
        }
        if self.processors.contains_key(&tag) {
            return Err(ProcessError::Rejected(format!(
                "processor for '{tag}' already registered"
            )));
        }
        tracing::debug!("Registered entry processor for '{}'", tag);
        self.processors.insert(tag, processor);
        Ok(())
    }

    pub fn get(&self, entry_type: &str) -> Option<&Arc<dyn EntryProcessor>> {
        self.processors.get(entry_type)
    }

    /// Validate an entry through its registered processor
    pub fn validate(&self, entry: &PendingEntry, store: &LedgerStore) -> Result<(), ProcessError> {
        match self.get(&entry.entry_type) {
            Some(processor) => processor.validate(entry, store),
            None => Err(ProcessError::UnknownEntryType(entry.entry_type.clone())),
        }
    }

    /// Apply an entry through its registered processor
    pub fn apply(
        &self,
        entry: &PendingEntry,
        ctx: &mut ApplyContext<'_>,
    ) -> Result<ApplyState, ProcessError> {
        match self.get(&entry.entry_type) {
            Some(processor) => processor.apply(entry, ctx),
            None => Err(ProcessError::UnknownEntryType(entry.entry_type.clone())),
        }
    }
}
