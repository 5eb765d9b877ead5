//! Core types for the ledger
//!
//! Rows held by the store are plain values: callers receive copies and write
//! them back through a transaction. Money is always an `i64` count of minor
//! currency units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Account identifier
///
/// Identifiers are totally ordered; that order is what lock ordering relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(u64);

impl AccountId {
    /// Create new account ID
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw numeric value
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acc-{}", self.0)
    }
}

impl From<u64> for AccountId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Store-assigned transaction identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(u64);

impl TxnId {
    /// Create new transaction ID
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Account row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique, orderable identifier
    pub id: AccountId,

    /// Display account number (unique)
    pub account_number: String,

    /// Balance in minor currency units; never negative once committed
    pub balance: i64,

    /// Owner name
    pub owner: String,
}

impl Account {
    /// Create a new account row
    pub fn new(
        id: AccountId,
        account_number: impl Into<String>,
        owner: impl Into<String>,
        balance: i64,
    ) -> Self {
        Self {
            id,
            account_number: account_number.into(),
            balance,
            owner: owner.into(),
        }
    }
}

/// Transfer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Not yet applied
    Pending,
    /// Applied and committed (terminal, immutable)
    Completed,
    /// Rejected (terminal)
    Failed,
}

/// Kind of balance movement a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    /// Account to account
    Transfer,
    /// External funds credited to one account
    Deposit,
    /// Funds debited from one account to the outside
    Withdrawal,
}

/// Record of a completed balance movement
///
/// Deposits and withdrawals reference the same account as `from` and `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Unique record ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Debited account
    pub from: AccountId,

    /// Credited account
    pub to: AccountId,

    /// Amount in minor units (always positive)
    pub amount: i64,

    /// Record status
    pub status: TransferStatus,

    /// Movement kind
    pub kind: TransferKind,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl TransferRecord {
    /// Build a completed record stamped with the current time
    pub fn completed(from: AccountId, to: AccountId, amount: i64, kind: TransferKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            from,
            to,
            amount,
            status: TransferStatus::Completed,
            kind,
            created_at: Utc::now(),
        }
    }

    /// Whether the record touches `account` on either side
    pub fn involves(&self, account: AccountId) -> bool {
        self.from == account || self.to == account
    }
}

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Uncommitted writes of other transactions are visible
    ReadUncommitted,
    /// Only committed data is visible, as of each statement
    ReadCommitted,
    /// Reads come from a snapshot taken when the transaction began
    Serializable,
}

impl IsolationLevel {
    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "read_uncommitted",
            IsolationLevel::ReadCommitted => "read_committed",
            IsolationLevel::Serializable => "serializable",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationLevel {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "read_uncommitted" => Ok(IsolationLevel::ReadUncommitted),
            "read_committed" => Ok(IsolationLevel::ReadCommitted),
            "serializable" => Ok(IsolationLevel::Serializable),
            other => Err(crate::Error::Config(format!(
                "Unknown isolation level: {}",
                other
            ))),
        }
    }
}
