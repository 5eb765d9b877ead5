//! Error types for the transfer engine
//!
//! Contention errors (deadlock, serialization failure, lock-wait timeout) are
//! retryable; everything else is final for the request that produced it. The
//! store decides which is which, the engine only maps its signals.

use ledger_core::{AccountId, TxnId};
use thiserror::Error;

/// Result type for transfer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transfer engine errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request, rejected before any lock is taken
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced account does not exist
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Source balance below the requested amount; nothing was written
    #[error("Insufficient funds in {account}: required {required}, available {available}")]
    InsufficientFunds {
        /// Debited account
        account: AccountId,
        /// Requested amount
        required: i64,
        /// Balance under lock
        available: i64,
    },

    /// Store broke a wait-for cycle by aborting this transaction
    #[error("Deadlock detected: {txn} aborted waiting for {account}")]
    DeadlockDetected {
        /// Aborted transaction
        txn: TxnId,
        /// Row being waited for
        account: AccountId,
    },

    /// Store rejected the transaction on a snapshot conflict
    #[error("Serialization failure: {txn} conflicts on {account}")]
    SerializationFailure {
        /// Aborted transaction
        txn: TxnId,
        /// Conflicting row
        account: AccountId,
    },

    /// Row lock not granted within the store's wait limit
    #[error("Lock wait timeout: {txn} waited {waited_ms}ms for {account}")]
    LockWaitTimeout {
        /// Waiting transaction
        txn: TxnId,
        /// Requested row
        account: AccountId,
        /// Time spent waiting
        waited_ms: u64,
    },

    /// Retry budget spent; wraps the last retryable failure
    #[error("Retries exhausted after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
        /// Last retryable cause
        #[source]
        last: Box<Error>,
    },

    /// Deadline passed or token cancelled before work could start
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Any other store failure (fatal)
    #[error("Ledger error: {0}")]
    Ledger(#[source] ledger_core::Error),

    /// Anomaly harness coordination failure
    #[error("Harness error: {0}")]
    Harness(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transient contention that a retry may clear
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::DeadlockDetected { .. }
                | Error::SerializationFailure { .. }
                | Error::LockWaitTimeout { .. }
        )
    }

    /// Whether this error is, or wraps, a deadlock signal
    pub fn is_deadlock(&self) -> bool {
        match self {
            Error::DeadlockDetected { .. } => true,
            Error::RetriesExhausted { last, .. } => last.is_deadlock(),
            _ => false,
        }
    }
}

impl From<ledger_core::Error> for Error {
    fn from(err: ledger_core::Error) -> Self {
        match err {
            ledger_core::Error::AccountNotFound(id) => Error::AccountNotFound(id),
            ledger_core::Error::DeadlockDetected { txn, account } => {
                Error::DeadlockDetected { txn, account }
            }
            ledger_core::Error::SerializationFailure { txn, account } => {
                Error::SerializationFailure { txn, account }
            }
            ledger_core::Error::LockWaitTimeout {
                txn,
                account,
                waited_ms,
            } => Error::LockWaitTimeout {
                txn,
                account,
                waited_ms,
            },
            other => Error::Ledger(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_contention_maps_to_retryable() {
        let txn = TxnId::new(3);
        let account = AccountId::new(1);

        let err: Error = ledger_core::Error::DeadlockDetected { txn, account }.into();
        assert!(err.is_retryable());
        assert!(err.is_deadlock());

        let err: Error = ledger_core::Error::SerializationFailure { txn, account }.into();
        assert!(err.is_retryable());

        let err: Error = ledger_core::Error::LockWaitTimeout {
            txn,
            account,
            waited_ms: 10,
        }
        .into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_fatal_errors() {
        let err: Error = ledger_core::Error::AccountNotFound(AccountId::new(9)).into();
        assert!(matches!(err, Error::AccountNotFound(_)));
        assert!(!err.is_retryable());

        let err: Error = ledger_core::Error::TransactionAborted(TxnId::new(1)).into();
        assert!(matches!(err, Error::Ledger(_)));
        assert!(!err.is_retryable());
        let source = std::error::Error::source(&err).expect("store cause kept");
        assert!(source.to_string().contains(&TxnId::new(1).to_string()));

        assert!(!Error::Validation("amount".to_string()).is_retryable());
        assert!(!Error::InsufficientFunds {
            account: AccountId::new(1),
            required: 10,
            available: 5,
        }
        .is_retryable());
    }

    #[test]
    fn test_retries_exhausted_preserves_cause() {
        let last = Error::DeadlockDetected {
            txn: TxnId::new(8),
            account: AccountId::new(2),
        };
        let err = Error::RetriesExhausted {
            attempts: 3,
            last: Box::new(last),
        };
        assert!(!err.is_retryable());
        assert!(err.is_deadlock());
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("after 3 attempt(s)"));
    }
}
