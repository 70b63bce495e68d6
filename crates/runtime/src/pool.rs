//! Pending entry pool
//!
//! Deduplicated, fee-ordered buffer of entries that are not yet committed.
//! Confirmation callbacks registered on insert fire exactly once, when the
//! entry's container commits. Pool changes fan out on a broadcast channel;
//! events are emitted only after the underlying mutation completed.

use crate::registry::ProcessorRegistry;
use crate::store::LedgerStore;
use crate::types::{Hash, PendingEntry};
use crate::{now_ms, ENTRY_EXPIRY_MS};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::sync::broadcast;

/// Pool change notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    Added(Hash),
    Confirmed(Hash),
    Expired(Hash),
}

/// Outcome delivered to a confirmation callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmResult {
    /// The entry was committed in a container
    Confirmed(Hash),
    /// The entry is not pending here (already confirmed or never seen)
    NotFound(Hash),
}

/// One-shot confirmation callback
pub type ConfirmCallback = Box<dyn FnOnce(ConfirmResult) + Send>;

#[derive(Default)]
struct PoolInner {
    pending: HashMap<Hash, PendingEntry>,
    confirmed: HashSet<Hash>,
    callbacks: HashMap<Hash, ConfirmCallback>,
}

/// Deduplicated, fee-ordered buffer of uncommitted entries
pub struct PendingPool {
    inner: Mutex<PoolInner>,
    events: broadcast::Sender<PoolEvent>,
    expiry_ms: u64,
}

impl PendingPool {
    pub fn new() -> Self {
        Self::with_expiry(ENTRY_EXPIRY_MS)
    }

    pub fn with_expiry(expiry_ms: u64) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            inner: Mutex::new(PoolInner::default()),
            events,
            expiry_ms,
        }
    }

    /// Subscribe to pool change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    /// Insert an entry unless it is already pending or confirmed
    ///
    /// Returns false only when the hash was already confirmed; a supplied
    /// callback then fires immediately with `NotFound`. Re-adding a pending
    /// entry is idempotent and returns true.
    pub fn add_entry(&self, entry: PendingEntry, on_confirm: Option<ConfirmCallback>) -> bool {
        let hash = entry.hash;
        let mut inner = self.inner.lock();

        if inner.confirmed.contains(&hash) {
            drop(inner);
            if let Some(callback) = on_confirm {
                callback(ConfirmResult::NotFound(hash));
            }
            return false;
        }

        if inner.pending.contains_key(&hash) {
            // Keep the first registered callback
            if let Some(callback) = on_confirm {
                inner.callbacks.entry(hash).or_insert(callback);
            }
            return true;
        }

        inner.pending.insert(hash, entry);
        if let Some(callback) = on_confirm {
            inner.callbacks.insert(hash, callback);
        }
        drop(inner);

        tracing::debug!(entry = %hash, "Entry added to pending pool");
        let _ = self.events.send(PoolEvent::Added(hash));
        true
    }

    /// Select up to `max_count` entries for a new container
    ///
    /// Every candidate is re-validated through its processor; failures are
    /// logged and skipped. Survivors come back sorted descending by fee,
    /// equal fees ordered by hash for a stable result.
    pub fn select_for_container(
        &self,
        max_count: usize,
        registry: &ProcessorRegistry,
        store: &LedgerStore,
    ) -> Vec<PendingEntry> {
        let candidates: Vec<PendingEntry> =
            self.inner.lock().pending.values().cloned().collect();

        let mut survivors: Vec<PendingEntry> = candidates
            .into_iter()
            .filter(|entry| match registry.validate(entry, store) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(entry = %entry.hash, error = %e, "Dropping invalid pending entry from selection");
                    false
                }
            })
            .collect();

        survivors.sort_by(|a, b| b.fee.cmp(&a.fee).then(a.hash.cmp(&b.hash)));
        survivors.truncate(max_count);
        survivors
    }

    /// Move committed hashes from pending to confirmed, firing events and
    /// any registered callback exactly once per hash
    pub fn remove_confirmed(&self, hashes: &[Hash]) -> usize {
        let mut moved = 0;
        let mut fired = Vec::new();
        {
            let mut inner = self.inner.lock();
            for hash in hashes {
                let was_pending = inner.pending.remove(hash).is_some();
                inner.confirmed.insert(*hash);
                if was_pending {
                    moved += 1;
                    if let Some(callback) = inner.callbacks.remove(hash) {
                        fired.push((*hash, callback));
                    }
                    let _ = self.events.send(PoolEvent::Confirmed(*hash));
                }
            }
        }
        for (hash, callback) in fired {
            callback(ConfirmResult::Confirmed(hash));
        }
        moved
    }

    /// Reinsert an entry only if its hash is in neither the pending nor the
    /// confirmed set
    pub fn requeue(&self, entry: PendingEntry) -> bool {
        let hash = entry.hash;
        let mut inner = self.inner.lock();
        if inner.pending.contains_key(&hash) || inner.confirmed.contains(&hash) {
            return false;
        }
        inner.pending.insert(hash, entry);
        tracing::debug!(entry = %hash, "Entry requeued");
        true
    }

    /// Evict entries past the age horizon; their callbacks are dropped and
    /// the entries are not recoverable
    pub fn sweep_expired(&self) -> usize {
        let now = now_ms();
        let mut expired = Vec::new();
        {
            let mut inner = self.inner.lock();
            let horizon = self.expiry_ms;
            inner
                .pending
                .retain(|hash, entry| {
                    if now.saturating_sub(entry.timestamp_ms) > horizon {
                        expired.push(*hash);
                        false
                    } else {
                        true
                    }
                });
            for hash in &expired {
                inner.callbacks.remove(hash);
            }
        }
        for hash in &expired {
            tracing::info!(entry = %hash, "Pending entry expired unconfirmed");
            let _ = self.events.send(PoolEvent::Expired(*hash));
        }
        expired.len()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }

    pub fn is_pending(&self, hash: &Hash) -> bool {
        self.inner.lock().pending.contains_key(hash)
    }

    pub fn is_confirmed(&self, hash: &Hash) -> bool {
        self.inner.lock().confirmed.contains(hash)
    }

    pub fn get_pending(&self, hash: &Hash) -> Option<PendingEntry> {
        self.inner.lock().pending.get(hash).cloned()
    }
}

impl Default for PendingPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn keypair(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn entry(fee: u64, nonce: u64) -> PendingEntry {
        PendingEntry::create_at(&keypair(1), "noop", fee, nonce, None, None, vec![], now_ms())
    }

    struct AcceptAll;

    impl crate::registry::EntryProcessor for AcceptAll {
        fn entry_type(&self) -> &str {
            "noop"
        }

        fn validate(
            &self,
            _entry: &PendingEntry,
            _store: &LedgerStore,
        ) -> Result<(), crate::registry::ProcessError> {
            Ok(())
        }

        fn apply(
            &self,
            _entry: &PendingEntry,
            _ctx: &mut crate::registry::ApplyContext<'_>,
        ) -> Result<crate::registry::ApplyState, crate::registry::ProcessError> {
            Ok(crate::registry::ApplyState::Applied)
        }
    }

    fn test_registry() -> ProcessorRegistry {
        let mut registry = ProcessorRegistry::new();
        registry.register(Arc::new(AcceptAll)).unwrap();
        registry
    }

    #[test]
    fn repeated_add_grows_pool_by_at_most_one() {
        let pool = PendingPool::new();
        let e = entry(5, 0);

        assert!(pool.add_entry(e.clone(), None));
        assert!(pool.add_entry(e.clone(), None));
        assert!(pool.add_entry(e, None));
        assert_eq!(pool.pending_len(), 1);
    }

    #[test]
    fn selection_orders_by_descending_fee() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(dir.path(), "alpha").unwrap();
        let registry = test_registry();
        let pool = PendingPool::new();

        pool.add_entry(entry(5, 0), None);
        pool.add_entry(entry(1, 1), None);
        pool.add_entry(entry(3, 2), None);

        let selected = pool.select_for_container(20, &registry, &store);
        let fees: Vec<u64> = selected.iter().map(|e| e.fee).collect();
        assert_eq!(fees, vec![5, 3, 1]);
    }

    #[test]
    fn selection_respects_max_count() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(dir.path(), "alpha").unwrap();
        let registry = test_registry();
        let pool = PendingPool::new();

        for i in 0..10 {
            pool.add_entry(entry(i, i), None);
        }
        assert_eq!(pool.select_for_container(4, &registry, &store).len(), 4);
    }

    #[test]
    fn confirmation_callback_fires_exactly_once() {
        let pool = PendingPool::new();
        let e = entry(2, 0);
        let hash = e.hash;
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        pool.add_entry(
            e,
            Some(Box::new(move |result| {
                assert_eq!(result, ConfirmResult::Confirmed(hash));
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );

        assert_eq!(pool.remove_confirmed(&[hash]), 1);
        assert_eq!(pool.remove_confirmed(&[hash]), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(pool.is_confirmed(&hash));
        assert!(!pool.is_pending(&hash));
    }

    #[test]
    fn adding_a_confirmed_hash_reports_not_found() {
        let pool = PendingPool::new();
        let e = entry(2, 0);
        let hash = e.hash;

        pool.add_entry(e.clone(), None);
        pool.remove_confirmed(&[hash]);

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let accepted = pool.add_entry(
            e,
            Some(Box::new(move |result| {
                assert_eq!(result, ConfirmResult::NotFound(hash));
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );

        assert!(!accepted);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(pool.pending_len(), 0);
    }

    #[test]
    fn requeue_skips_known_hashes() {
        let pool = PendingPool::new();
        let first = entry(2, 0);
        let second = entry(3, 1);
        let confirmed = second.hash;

        pool.add_entry(first.clone(), None);
        pool.add_entry(second.clone(), None);
        pool.remove_confirmed(&[confirmed]);

        assert!(!pool.requeue(first));
        assert!(!pool.requeue(second));

        let fresh = entry(4, 2);
        assert!(pool.requeue(fresh));
        assert_eq!(pool.pending_len(), 2);
    }

    #[test]
    fn sweep_evicts_only_entries_past_the_horizon() {
        let pool = PendingPool::with_expiry(1_000);
        let key = keypair(1);
        let now = now_ms();

        let old = PendingEntry::create_at(&key, "noop", 1, 0, None, None, vec![], now - 5_000);
        let fresh = PendingEntry::create_at(&key, "noop", 1, 1, None, None, vec![], now);
        let old_hash = old.hash;

        pool.add_entry(old, None);
        pool.add_entry(fresh, None);

        assert_eq!(pool.sweep_expired(), 1);
        assert_eq!(pool.pending_len(), 1);
        assert!(!pool.is_pending(&old_hash));
        // Expired entries are gone for good; nothing re-admits them here
        assert!(!pool.is_confirmed(&old_hash));
    }
}
