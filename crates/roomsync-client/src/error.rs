//! Error types for the synchronization coordinator.
//!
//! Command failures propagate to the immediate caller only. Push handling
//! failures ([`SyncError::MalformedPush`]) are logged and contained inside the
//! coordinator; they never end a subscription or touch unrelated rooms.

use roomsync_core::StoreError;
use thiserror::Error;

/// Errors surfaced by coordinator operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The hub rejected the request or it failed in transit.
    ///
    /// No store was mutated. The caller may retry.
    #[error("request failed: {operation}: {reason}")]
    RequestFailed {
        /// Hub operation that failed.
        operation: &'static str,
        /// Failure description from the hub.
        reason: String,
    },

    /// The command was rejected locally before any request was issued.
    #[error("invalid operation: cannot {operation}: {reason}")]
    InvalidOperation {
        /// Operation that was attempted.
        operation: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A push payload could not be decoded or failed validation.
    #[error("malformed push {event:?}: {reason}")]
    MalformedPush {
        /// Event name as received.
        event: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl SyncError {
    /// Returns true if retrying the same command may succeed.
    ///
    /// Only hub failures are retryable; local rejections will be rejected
    /// again until the local state changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RequestFailed { .. })
    }

    pub(crate) fn invalid(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOperation { operation, reason: reason.into() }
    }

    pub(crate) fn malformed(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPush { event: event.into(), reason: reason.into() }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidOperation { operation, reason } => {
                Self::InvalidOperation { operation, reason }
            },
        }
    }
}

/// Result of a command whose target may already be in the goal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The hub acknowledged the request and the stores were updated.
    Applied,
    /// Nothing to do. Either the target was already in the goal state and no
    /// request was sent, or a push made the acknowledged result moot.
    AlreadyResolved,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_request_failures_are_retryable() {
        assert!(
            SyncError::RequestFailed { operation: "SendMessage", reason: "timeout".into() }
                .is_retryable()
        );
        assert!(!SyncError::invalid("send message", "room not joined").is_retryable());
        assert!(!SyncError::malformed("message-created", "missing id").is_retryable());
    }

    #[test]
    fn store_errors_convert_to_invalid_operation() {
        let err: SyncError = StoreError::InvalidOperation {
            operation: "set active room",
            reason: "room r1 is not joined".into(),
        }
        .into();

        assert_eq!(err, SyncError::invalid("set active room", "room r1 is not joined"));
        assert_eq!(
            err.to_string(),
            "invalid operation: cannot set active room: room r1 is not joined"
        );
    }
}
