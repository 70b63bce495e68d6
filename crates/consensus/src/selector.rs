//! Deterministic, stake-weighted validator schedule
//!
//! Time since the last committed container is divided into fixed slots;
//! the slot index picks one validator from the eligible list (descending by
//! stake). Every node derives the same schedule from the same chain state.

use crate::schedule::ScheduleHandle;
use ledger_runtime::{now_ms, AccountId, LedgerStore, SLOT_DURATION_MS};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked when the elected validator changes
pub type SwitchCallback = Arc<dyn Fn(Option<AccountId>) + Send + Sync>;

/// Stake-weighted round-robin leader schedule
pub struct ValidatorSelector {
    store: Arc<LedgerStore>,
    slot_duration_ms: u64,
}

impl ValidatorSelector {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self::with_slot_duration(store, SLOT_DURATION_MS)
    }

    pub fn with_slot_duration(store: Arc<LedgerStore>, slot_duration_ms: u64) -> Self {
        Self {
            store,
            slot_duration_ms,
        }
    }

    pub fn slot_duration_ms(&self) -> u64 {
        self.slot_duration_ms
    }

    /// The validator elected for the current slot
    ///
    /// None when no container was ever committed or no validator clears the
    /// eligibility floor.
    pub fn current_validator(&self) -> Option<AccountId> {
        self.current_validator_at(now_ms())
    }

    /// The validator elected at an explicit point in time
    pub fn current_validator_at(&self, now: u64) -> Option<AccountId> {
        let head = self.store.head()?;
        let container = self.store.get_container(&head).ok().flatten()?;
        let eligible = self.store.eligible_validators();
        if eligible.is_empty() {
            return None;
        }
        let elapsed = now.saturating_sub(container.timestamp_ms);
        let slot = (elapsed / self.slot_duration_ms) as usize % eligible.len();
        Some(eligible[slot].0)
    }

    /// Milliseconds until the next slot boundary
    pub fn millis_to_next_slot(&self, now: u64) -> u64 {
        let anchor = self
            .store
            .head()
            .and_then(|head| self.store.get_container(&head).ok().flatten())
            .map(|container| container.timestamp_ms);
        match anchor {
            Some(anchor) => {
                let elapsed = now.saturating_sub(anchor);
                self.slot_duration_ms - (elapsed % self.slot_duration_ms)
            }
            None => self.slot_duration_ms,
        }
    }
}

/// Run the self-rescheduling slot timer
///
/// Evaluates the elected validator immediately, then sleeps to each slot
/// boundary and re-evaluates, invoking the switch callbacks only when the
/// elected id actually changes.
pub fn spawn_slot_timer(
    selector: Arc<ValidatorSelector>,
    on_switch: Vec<SwitchCallback>,
) -> ScheduleHandle {
    ScheduleHandle::spawn("validator-slot", move |cancelled| async move {
        let mut current = selector.current_validator();
        tracing::debug!(elected = ?current, "Slot timer armed");
        loop {
            if cancelled.load(Ordering::SeqCst) {
                break;
            }
            let wait = selector.millis_to_next_slot(now_ms());
            tokio::time::sleep(Duration::from_millis(wait)).await;
            if cancelled.load(Ordering::SeqCst) {
                break;
            }
            let elected = selector.current_validator();
            if elected != current {
                tracing::info!(from = ?current, to = ?elected, "Elected validator changed");
                for callback in &on_switch {
                    callback(elected);
                }
                current = elected;
            }
        }
    })
}
