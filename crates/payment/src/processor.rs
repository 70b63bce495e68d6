//! Payment execution

use crate::error::PaymentError;
use crate::instruction::PaymentInstruction;
use crate::ENTRY_TYPE;
use ledger_runtime::{
    ApplyContext, ApplyState, EntryProcessor, LedgerStore, PendingEntry, ProcessError,
};

/// Moves balance between accounts; fees are burned
#[derive(Default)]
pub struct PaymentProcessor;

impl PaymentProcessor {
    pub fn new() -> Self {
        Self
    }

    fn decode(entry: &PendingEntry) -> Result<PaymentInstruction, PaymentError> {
        PaymentInstruction::decode(&entry.payload).ok_or(PaymentError::MalformedInstruction)
    }

    fn check(instruction: &PaymentInstruction, entry: &PendingEntry) -> Result<u64, PaymentError> {
        if instruction.amount == 0 {
            return Err(PaymentError::ZeroAmount);
        }
        if instruction.to == entry.sender {
            return Err(PaymentError::SelfPayment);
        }
        instruction
            .amount
            .checked_add(entry.fee)
            .ok_or(PaymentError::ArithmeticOverflow)
    }
}

impl EntryProcessor for PaymentProcessor {
    fn entry_type(&self) -> &str {
        ENTRY_TYPE
    }

    fn validate(&self, entry: &PendingEntry, store: &LedgerStore) -> Result<(), ProcessError> {
        let instruction = Self::decode(entry)?;
        let debit = Self::check(&instruction, entry)?;

        let sender = store
            .get_account(&entry.sender)
            .map_err(|e| ProcessError::Storage(e.to_string()))?
            .ok_or(PaymentError::UnknownSender)?;
        if sender.balance < debit {
            return Err(PaymentError::InsufficientBalance.into());
        }
        Ok(())
    }

    fn apply(
        &self,
        entry: &PendingEntry,
        ctx: &mut ApplyContext<'_>,
    ) -> Result<ApplyState, ProcessError> {
        if ctx.entry_exists(&entry.hash)? {
            return Ok(ApplyState::AlreadyApplied);
        }

        let instruction = Self::decode(entry)?;
        let debit = Self::check(&instruction, entry)?;

        let mut sender = ctx
            .get_account(&entry.sender)?
            .ok_or(PaymentError::UnknownSender)?;
        if sender.balance < debit {
            return Err(PaymentError::InsufficientBalance.into());
        }
        sender.balance -= debit;
        sender.nonce += 1;
        ctx.put_account(&entry.sender, &sender)?;

        let mut receiver = ctx.get_account(&instruction.to)?.unwrap_or_default();
        receiver.balance = receiver
            .balance
            .checked_add(instruction.amount)
            .ok_or(PaymentError::ArithmeticOverflow)?;
        ctx.put_account(&instruction.to, &receiver)?;

        tracing::debug!(
            entry = %entry.hash,
            amount = instruction.amount,
            fee = entry.fee,
            "Payment applied"
        );
        Ok(ApplyState::Applied)
    }
}
