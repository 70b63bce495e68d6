//! Payment processor errors

use ledger_runtime::ProcessError;
use thiserror::Error;

/// Payment rule violations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentError {
    #[error("instruction data does not decode")]
    MalformedInstruction,

    #[error("amount must be positive")]
    ZeroAmount,

    #[error("sender and receiver are the same account")]
    SelfPayment,

    #[error("sender balance does not cover amount plus fee")]
    InsufficientBalance,

    #[error("arithmetic overflow")]
    ArithmeticOverflow,

    #[error("sender account does not exist")]
    UnknownSender,
}

impl From<PaymentError> for ProcessError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::MalformedInstruction => ProcessError::MalformedPayload(e.to_string()),
            _ => ProcessError::Rejected(e.to_string()),
        }
    }
}
