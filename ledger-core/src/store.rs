//! Ledger store contract
//!
//! The transfer engine only ever talks to storage through these two traits.
//! Implementations own the rows, the row locks and the isolation semantics;
//! callers own nothing across calls.

use crate::{
    types::{Account, AccountId, IsolationLevel, TransferRecord, TxnId},
    Result,
};

/// Row filter used by range queries
pub type Predicate<'p> = &'p dyn Fn(&Account) -> bool;

/// Transactional account store
pub trait LedgerStore: Send + Sync {
    /// Open a transaction at the given isolation level
    fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn StoreTransaction + '_>>;

    /// Read one committed account (no lock held beyond the read)
    fn get_account(&self, id: AccountId) -> Result<Account>;

    /// All committed accounts, ordered by id
    fn list_accounts(&self) -> Vec<Account>;

    /// Committed accounts matching `predicate`, ordered by id
    fn query(&self, predicate: Predicate<'_>) -> Vec<Account>;

    /// All committed transfer records, in commit order
    fn transfers(&self) -> Vec<TransferRecord>;

    /// Committed transfer records touching `account`
    fn transfers_for(&self, account: AccountId) -> Vec<TransferRecord> {
        self.transfers()
            .into_iter()
            .filter(|record| record.involves(account))
            .collect()
    }

    /// Create and commit a new account with a store-assigned id
    fn open_account(&self, account_number: &str, owner: &str, balance: i64) -> Result<Account>;
}

/// One open transaction
///
/// A transaction that is dropped without `commit` or `rollback` is rolled back.
pub trait StoreTransaction: Send {
    /// Transaction id
    fn id(&self) -> TxnId;

    /// Isolation level the transaction was opened with
    fn isolation(&self) -> IsolationLevel;

    /// Acquire the exclusive row lock and return the current row.
    ///
    /// Blocks until the lock is free, a deadlock is detected, or the store's
    /// lock-wait timeout fires.
    fn lock_row_for_update(&mut self, id: AccountId) -> Result<Account>;

    /// Non-locking read; what is visible depends on the isolation level
    fn read(&mut self, id: AccountId) -> Result<Account>;

    /// Write back a row. The row lock must be held.
    fn save(&mut self, row: &Account) -> Result<()>;

    /// Insert a new row; the inserting transaction holds its lock until it ends
    fn insert_account(&mut self, row: Account) -> Result<()>;

    /// Append a transfer record, made durable on commit
    fn append_transfer(&mut self, record: TransferRecord) -> Result<()>;

    /// Range query; what is visible depends on the isolation level
    fn query(&mut self, predicate: Predicate<'_>) -> Result<Vec<Account>>;

    /// Make all writes visible atomically and release every lock
    fn commit(self: Box<Self>) -> Result<()>;

    /// Discard all writes and release every lock
    fn rollback(self: Box<Self>) -> Result<()>;
}
