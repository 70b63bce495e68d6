//! Inbound batch dispatch
//!
//! Verified entries addressed to this ledger are rebuilt as local entries
//! by a per-type action constructor, receive sequential per-account nonces
//! within the batch, and enter the pending pool, which triggers the local
//! proposal pipeline.

use crate::batch::CrossNetworkBridge;
use crate::BridgeError;
use ledger_runtime::{AccountId, CrossNetworkBatch, PendingEntry, PendingPool};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds the local entry for one verified inbound entry; the second
/// argument is the nonce assigned for the target account
pub type ActionConstructor =
    Arc<dyn Fn(&PendingEntry, u64) -> Result<PendingEntry, BridgeError> + Send + Sync>;

/// Routes verified cross-network entries into the local ledger
pub struct InboundDispatcher {
    network: String,
    bridge: Arc<CrossNetworkBridge>,
    pool: Arc<PendingPool>,
    constructors: HashMap<String, ActionConstructor>,
}

impl InboundDispatcher {
    pub fn new(bridge: Arc<CrossNetworkBridge>, pool: Arc<PendingPool>) -> Self {
        let network = bridge.store().network().to_string();
        Self {
            network,
            bridge,
            pool,
            constructors: HashMap::new(),
        }
    }

    /// Register the constructor for a declared target entry type
    pub fn register_constructor(
        &mut self,
        entry_type: &str,
        constructor: ActionConstructor,
    ) -> Result<(), BridgeError> {
        if self.constructors.contains_key(entry_type) {
            return Err(BridgeError::DuplicateConstructor(entry_type.to_string()));
        }
        self.constructors.insert(entry_type.to_string(), constructor);
        Ok(())
    }

    /// Process one delivered batch; returns how many local entries entered
    /// the pool
    ///
    /// Entries that fail verification or dispatch are skipped with a log
    /// line naming the violation - a bad entry never blocks the rest of the
    /// batch.
    pub fn handle_batch(&self, batch: &CrossNetworkBatch) -> usize {
        let mut accepted = 0;
        let mut skipped = 0;
        let mut nonces: HashMap<AccountId, u64> = HashMap::new();

        for entry in &batch.entries {
            if entry.target_network.as_deref() != Some(self.network.as_str()) {
                continue;
            }
            match self.admit_entry(entry, batch, &mut nonces) {
                Ok(true) => accepted += 1,
                // The pool already knew the rebuilt entry
                Ok(false) => {}
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(entry = %entry.hash, error = %e, "Inbound entry skipped");
                }
            }
        }

        if accepted > 0 || skipped > 0 {
            tracing::info!(
                source = %batch.source_network,
                accepted,
                skipped,
                "Inbound cross-network batch processed"
            );
        }
        accepted
    }

    /// Verify one entry, rebuild it locally with the next nonce for its
    /// target account, and queue it; false means the pool already held the
    /// rebuilt entry
    fn admit_entry(
        &self,
        entry: &PendingEntry,
        batch: &CrossNetworkBatch,
        nonces: &mut HashMap<AccountId, u64>,
    ) -> Result<bool, BridgeError> {
        self.bridge
            .verify_entry(entry, &batch.validation, &batch.source_network)?;

        let target_account = entry
            .target_account
            .ok_or(BridgeError::MissingTargetAccount)?;
        let constructor = self
            .constructors
            .get(&entry.entry_type)
            .ok_or_else(|| BridgeError::NoConstructor(entry.entry_type.clone()))?;

        // Several entries landing on one account in a single delivery get
        // consecutive nonces, starting from the account's current one
        let next = nonces.entry(target_account).or_insert_with(|| {
            self.bridge
                .store()
                .get_account(&target_account)
                .ok()
                .flatten()
                .map(|account| account.nonce)
                .unwrap_or(0)
        });

        let local = constructor(entry, *next)?;
        *next += 1;
        Ok(self.pool.add_entry(local, None))
    }
}
