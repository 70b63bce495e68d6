//! Payment instruction payload

use borsh::{BorshDeserialize, BorshSerialize};
use ledger_runtime::AccountId;

/// Borsh-encoded payload of a payment entry
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct PaymentInstruction {
    /// Receiving account
    pub to: AccountId,
    /// Amount moved to the receiver; the entry's fee is burned on top
    pub amount: u64,
}

impl PaymentInstruction {
    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("PaymentInstruction serialization should not fail")
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        borsh::from_slice(data).ok()
    }
}
