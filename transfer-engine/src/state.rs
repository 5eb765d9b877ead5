//! Transfer state machine
//!
//! ```text
//! Pending → Locking → Validating → Completed
//!                        │       → Failed            (insufficient funds)
//!                        │       → AbortedFatal
//!                        └──────→ AbortedRetryable → Locking (next attempt)
//! ```
//!
//! `Locking` may also abort directly (lock timeout, deadlock, missing row).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// Accepted, nothing locked yet
    Pending,
    /// Acquiring row locks in resolved order
    Locking,
    /// Both rows locked, checking invariants
    Validating,
    /// Committed (terminal)
    Completed,
    /// Business rule rejected the transfer (terminal)
    Failed,
    /// Transient contention; the retry controller may loop back to `Locking`
    AbortedRetryable,
    /// Unrecoverable error (terminal)
    AbortedFatal,
}

impl TransferState {
    /// Check if state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Failed | TransferState::AbortedFatal
        )
    }

    /// Whether `next` is a legal successor
    pub fn can_transition_to(&self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (Pending, Locking)
                | (Pending, AbortedFatal)
                | (Locking, Validating)
                | (Locking, AbortedRetryable)
                | (Locking, AbortedFatal)
                | (Validating, Completed)
                | (Validating, Failed)
                | (Validating, AbortedRetryable)
                | (Validating, AbortedFatal)
                | (AbortedRetryable, Locking)
                | (AbortedRetryable, AbortedFatal)
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferState::Pending => "pending",
            TransferState::Locking => "locking",
            TransferState::Validating => "validating",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
            TransferState::AbortedRetryable => "aborted_retryable",
            TransferState::AbortedFatal => "aborted_fatal",
        };
        f.write_str(name)
    }
}
