//! Payment entry processor
//!
//! The reference processor consumed through the registry interface: moves
//! balance from the entry's sender to a receiver, burning the declared fee.

pub mod error;
pub mod instruction;
pub mod processor;

pub use error::PaymentError;
pub use instruction::PaymentInstruction;
pub use processor::PaymentProcessor;

/// Type tag payments register under
pub const ENTRY_TYPE: &str = "payment";
