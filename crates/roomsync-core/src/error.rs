//! Store-level errors.
//!
//! Stores tolerate duplicates and absent targets silently; the only
//! condition they reject is an operation that would break one of their
//! invariants.

use thiserror::Error;

/// Errors raised by the stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Operation would violate a store invariant. Nothing was changed.
    #[error("invalid operation: cannot {operation}: {reason}")]
    InvalidOperation {
        /// Operation that was attempted.
        operation: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}
