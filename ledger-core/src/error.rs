//! Error types for the ledger store

use crate::types::{AccountId, TxnId};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Account row does not exist (or is not visible to the transaction)
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Account id or account number already taken
    #[error("Duplicate account: {0}")]
    DuplicateAccount(String),

    /// Lock request would close a wait-for cycle; the requester was rolled back
    #[error("Deadlock detected: {txn} rolled back while waiting for {account}")]
    DeadlockDetected {
        /// Victim transaction
        txn: TxnId,
        /// Row the victim was waiting for
        account: AccountId,
    },

    /// Snapshot conflict; the transaction was rolled back
    #[error("Serialization failure: {txn} conflicts on {account}")]
    SerializationFailure {
        /// Aborted transaction
        txn: TxnId,
        /// Row changed by a concurrent commit
        account: AccountId,
    },

    /// Row lock not granted within the store's lock-wait timeout
    #[error("Lock wait timeout: {txn} waited {waited_ms}ms for {account}")]
    LockWaitTimeout {
        /// Waiting transaction
        txn: TxnId,
        /// Requested row
        account: AccountId,
        /// Time spent waiting
        waited_ms: u64,
    },

    /// Write attempted on a row the transaction does not hold the lock for
    #[error("Row {account} is not locked by {txn}")]
    RowNotLocked {
        /// Writing transaction
        txn: TxnId,
        /// Unlocked row
        account: AccountId,
    },

    /// Transaction was already rolled back by the store
    #[error("Transaction aborted: {0}")]
    TransactionAborted(TxnId),

    /// Committed balances may never go below zero
    #[error("Negative balance for {account}: {balance}")]
    NegativeBalance {
        /// Offending row
        account: AccountId,
        /// Rejected balance
        balance: i64,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Transient contention signal: deadlock, serialization failure or
    /// lock-wait timeout. Everything else is a definitive failure.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            Error::DeadlockDetected { .. }
                | Error::SerializationFailure { .. }
                | Error::LockWaitTimeout { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contention_classification() {
        let txn = TxnId::new(1);
        let account = AccountId::new(1);
        assert!(Error::DeadlockDetected { txn, account }.is_contention());
        assert!(Error::SerializationFailure { txn, account }.is_contention());
        assert!(Error::LockWaitTimeout { txn, account, waited_ms: 5 }.is_contention());
        assert!(!Error::AccountNotFound(account).is_contention());
        assert!(!Error::RowNotLocked { txn, account }.is_contention());
    }
}
