//! Fault injection for contention testing
//!
//! Wraps any [`LedgerStore`] and turns the next N commits into a configured
//! failure. The failing transaction is rolled back on the inner store first,
//! so the outcome is the same as a real store aborting a transaction.

use crate::{
    error::{Error, Result},
    store::{LedgerStore, Predicate, StoreTransaction},
    types::{Account, AccountId, IsolationLevel, TransferRecord, TxnId},
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

/// Store wrapper that fails a fixed number of commits
#[derive(Debug)]
pub struct FaultInjectingStore<S> {
    inner: S,
    remaining_failures: AtomicU32,
    commit_attempts: AtomicU32,
    fault: Mutex<Error>,
}

impl<S: LedgerStore> FaultInjectingStore<S> {
    /// Wrap `inner` without any pending faults
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            remaining_failures: AtomicU32::new(0),
            commit_attempts: AtomicU32::new(0),
            fault: Mutex::new(Error::Other("injected fault".to_string())),
        }
    }

    /// Fail the next `count` commits with `fault`
    pub fn fail_commits(&self, count: u32, fault: Error) {
        *self.fault.lock() = fault;
        self.remaining_failures.store(count, Ordering::SeqCst);
    }

    /// Commits attempted through this wrapper, failed or not
    pub fn commit_attempts(&self) -> u32 {
        self.commit_attempts.load(Ordering::SeqCst)
    }

    /// Wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn take_fault(&self, txn: TxnId) -> Option<Error> {
        self.remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()
            .map(|_| with_txn(self.fault.lock().clone(), txn))
    }
}

/// Re-target a configured fault at the transaction it is injected into
fn with_txn(fault: Error, txn: TxnId) -> Error {
    match fault {
        Error::DeadlockDetected { account, .. } => Error::DeadlockDetected { txn, account },
        Error::SerializationFailure { account, .. } => Error::SerializationFailure { txn, account },
        Error::LockWaitTimeout {
            account, waited_ms, ..
        } => Error::LockWaitTimeout {
            txn,
            account,
            waited_ms,
        },
        other => other,
    }
}

impl<S: LedgerStore> LedgerStore for FaultInjectingStore<S> {
    fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn StoreTransaction + '_>> {
        Ok(Box::new(FaultyTransaction {
            inner: self.inner.begin(isolation)?,
            store: self,
        }))
    }

    fn get_account(&self, id: AccountId) -> Result<Account> {
        self.inner.get_account(id)
    }

    fn list_accounts(&self) -> Vec<Account> {
        self.inner.list_accounts()
    }

    fn query(&self, predicate: Predicate<'_>) -> Vec<Account> {
        self.inner.query(predicate)
    }

    fn transfers(&self) -> Vec<TransferRecord> {
        self.inner.transfers()
    }

    fn open_account(&self, account_number: &str, owner: &str, balance: i64) -> Result<Account> {
        self.inner.open_account(account_number, owner, balance)
    }
}

struct FaultyTransaction<'a, S> {
    inner: Box<dyn StoreTransaction + 'a>,
    store: &'a FaultInjectingStore<S>,
}

impl<'a, S: LedgerStore> StoreTransaction for FaultyTransaction<'a, S> {
    fn id(&self) -> TxnId {
        self.inner.id()
    }

    fn isolation(&self) -> IsolationLevel {
        self.inner.isolation()
    }

    fn lock_row_for_update(&mut self, id: AccountId) -> Result<Account> {
        self.inner.lock_row_for_update(id)
    }

    fn read(&mut self, id: AccountId) -> Result<Account> {
        self.inner.read(id)
    }

    fn save(&mut self, row: &Account) -> Result<()> {
        self.inner.save(row)
    }

    fn insert_account(&mut self, row: Account) -> Result<()> {
        self.inner.insert_account(row)
    }

    fn append_transfer(&mut self, record: TransferRecord) -> Result<()> {
        self.inner.append_transfer(record)
    }

    fn query(&mut self, predicate: Predicate<'_>) -> Result<Vec<Account>> {
        self.inner.query(predicate)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let FaultyTransaction { inner, store } = *self;
        let txn = inner.id();
        store.commit_attempts.fetch_add(1, Ordering::SeqCst);
        match store.take_fault(txn) {
            Some(fault) => {
                debug!(txn = %txn, error = %fault, "Injecting commit failure");
                inner.rollback()?;
                Err(fault)
            }
            None => inner.commit(),
        }
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        let FaultyTransaction { inner, .. } = *self;
        inner.rollback()
    }
}
