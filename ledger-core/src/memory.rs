//! In-memory transactional store
//!
//! # Locking
//!
//! Every row has at most one exclusive lock holder. A transaction asking for
//! a held row registers itself in the wait-for relation and blocks on a
//! condition variable that is signalled whenever any lock is released.
//!
//! ```text
//!   T1 holds A ──waits for──▶ B held by T2 ──waits for──▶ A   => cycle
//! ```
//!
//! Before blocking, the requester follows holder → awaited row → holder. If the
//! walk comes back to the requester, waiting would never end: the requester is
//! rolled back on the spot and receives `DeadlockDetected`.
//!
//! # Visibility
//!
//! Uncommitted writes live in a per-row "dirty" slot owned by the lock holder.
//!
//! | level            | non-locking reads and queries see          |
//! |------------------|--------------------------------------------|
//! | ReadUncommitted  | dirty slot if any, else last committed     |
//! | ReadCommitted    | last committed at the time of the call     |
//! | Serializable     | snapshot taken at `begin`                  |
//!
//! Serializable transactions use first-updater-wins: locking a row committed
//! after the snapshot, or committing after a row they read has changed, fails
//! with `SerializationFailure`.

use crate::{
    error::{Error, Result},
    store::{LedgerStore, Predicate, StoreTransaction},
    types::{Account, AccountId, IsolationLevel, TransferRecord, TxnId},
    Config,
};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct CommittedRow {
    row: Account,
    /// Commit sequence number of the last write
    version: u64,
}

#[derive(Debug)]
struct DirtyRow {
    txn: TxnId,
    row: Account,
}

#[derive(Debug, Default)]
struct StoreState {
    rows: BTreeMap<AccountId, CommittedRow>,
    dirty: HashMap<AccountId, DirtyRow>,
    locks: HashMap<AccountId, TxnId>,
    waiting: HashMap<TxnId, AccountId>,
    transfers: Vec<TransferRecord>,
    commit_seq: u64,
}

impl StoreState {
    /// Would `txn` waiting on `account` close a wait-for cycle?
    fn closes_cycle(&self, txn: TxnId, account: AccountId) -> bool {
        let mut row = account;
        // Each step follows a distinct waiter, so the walk is bounded.
        for _ in 0..=self.waiting.len() {
            let Some(&holder) = self.locks.get(&row) else {
                return false;
            };
            if holder == txn {
                return true;
            }
            match self.waiting.get(&holder) {
                Some(&next) => row = next,
                None => return false,
            }
        }
        false
    }

    fn account_number_taken(&self, number: &str) -> bool {
        self.rows.values().any(|r| r.row.account_number == number)
            || self.dirty.values().any(|d| d.row.account_number == number)
    }

    fn next_account_id(&self) -> AccountId {
        let committed = self.rows.keys().next_back().map(|id| id.value());
        let dirty = self.dirty.keys().map(|id| id.value()).max();
        AccountId::new(committed.max(dirty).map_or(1, |max| max + 1))
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    seq: u64,
    rows: BTreeMap<AccountId, Account>,
}

/// In-memory ledger store with row locks, deadlock detection and three
/// isolation levels
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    lock_released: Condvar,
    next_txn: AtomicU64,
    config: Config,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new(config: Config) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            lock_released: Condvar::new(),
            next_txn: AtomicU64::new(1),
            config,
        }
    }

    /// Create a store seeded with committed accounts
    pub fn with_accounts(
        config: Config,
        accounts: impl IntoIterator<Item = Account>,
    ) -> Result<Self> {
        let store = Self::new(config);
        {
            let mut state = store.state.lock();
            for account in accounts {
                if state.rows.contains_key(&account.id) {
                    return Err(Error::DuplicateAccount(account.id.to_string()));
                }
                if state.account_number_taken(&account.account_number) {
                    return Err(Error::DuplicateAccount(account.account_number));
                }
                if account.balance < 0 {
                    return Err(Error::NegativeBalance {
                        account: account.id,
                        balance: account.balance,
                    });
                }
                state.commit_seq += 1;
                let version = state.commit_seq;
                state.rows.insert(account.id, CommittedRow { row: account, version });
            }
        }
        Ok(store)
    }

    /// Store configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sum of all committed balances
    pub fn total_balance(&self) -> i64 {
        self.state.lock().rows.values().map(|r| r.row.balance).sum()
    }

    /// Number of row locks currently held by open transactions
    pub fn held_locks(&self) -> usize {
        self.state.lock().locks.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl LedgerStore for MemoryStore {
    fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn StoreTransaction + '_>> {
        let id = TxnId::new(self.next_txn.fetch_add(1, Ordering::SeqCst));

        let snapshot = match isolation {
            IsolationLevel::Serializable => {
                let state = self.state.lock();
                Some(Snapshot {
                    seq: state.commit_seq,
                    rows: state
                        .rows
                        .iter()
                        .map(|(id, committed)| (*id, committed.row.clone()))
                        .collect(),
                })
            }
            _ => None,
        };

        debug!(txn = %id, isolation = %isolation, "Transaction started");

        Ok(Box::new(MemoryTransaction {
            store: self,
            id,
            isolation,
            snapshot,
            writes: BTreeMap::new(),
            held: BTreeSet::new(),
            read_set: BTreeSet::new(),
            transfers: Vec::new(),
            status: TxnStatus::Active,
        }))
    }

    fn get_account(&self, id: AccountId) -> Result<Account> {
        self.state
            .lock()
            .rows
            .get(&id)
            .map(|committed| committed.row.clone())
            .ok_or(Error::AccountNotFound(id))
    }

    fn list_accounts(&self) -> Vec<Account> {
        self.state
            .lock()
            .rows
            .values()
            .map(|committed| committed.row.clone())
            .collect()
    }

    fn query(&self, predicate: Predicate<'_>) -> Vec<Account> {
        self.state
            .lock()
            .rows
            .values()
            .filter(|committed| predicate(&committed.row))
            .map(|committed| committed.row.clone())
            .collect()
    }

    fn transfers(&self) -> Vec<TransferRecord> {
        self.state.lock().transfers.clone()
    }

    fn open_account(&self, account_number: &str, owner: &str, balance: i64) -> Result<Account> {
        let mut state = self.state.lock();
        if state.account_number_taken(account_number) {
            return Err(Error::DuplicateAccount(account_number.to_string()));
        }
        let id = state.next_account_id();
        if balance < 0 {
            return Err(Error::NegativeBalance { account: id, balance });
        }

        let account = Account::new(id, account_number, owner, balance);
        state.commit_seq += 1;
        let version = state.commit_seq;
        state.rows.insert(
            id,
            CommittedRow {
                row: account.clone(),
                version,
            },
        );
        debug!(account = %id, balance, "Account opened");
        Ok(account)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnStatus {
    Active,
    Aborted,
    Finished,
}

/// Transaction handle returned by [`MemoryStore::begin`]
#[derive(Debug)]
pub struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    id: TxnId,
    isolation: IsolationLevel,
    snapshot: Option<Snapshot>,
    /// Own writes, also published in the store's dirty slots
    writes: BTreeMap<AccountId, Account>,
    held: BTreeSet<AccountId>,
    /// Rows read without a lock (serializable validation)
    read_set: BTreeSet<AccountId>,
    transfers: Vec<TransferRecord>,
    status: TxnStatus,
}

impl<'a> MemoryTransaction<'a> {
    fn ensure_active(&self) -> Result<()> {
        match self.status {
            TxnStatus::Active => Ok(()),
            _ => Err(Error::TransactionAborted(self.id)),
        }
    }

    /// Discard writes, release locks and wake waiters
    fn abort_locked(&mut self, state: &mut StoreState) {
        for id in self.writes.keys() {
            if state.dirty.get(id).is_some_and(|d| d.txn == self.id) {
                state.dirty.remove(id);
            }
        }
        self.release_locked(state);
        self.writes.clear();
        self.transfers.clear();
        self.status = TxnStatus::Aborted;
    }

    fn release_locked(&mut self, state: &mut StoreState) {
        for id in std::mem::take(&mut self.held) {
            if state.locks.get(&id) == Some(&self.id) {
                state.locks.remove(&id);
            }
        }
        state.waiting.remove(&self.id);
        self.store.lock_released.notify_all();
    }

    fn visible_row(&self, state: &StoreState, id: AccountId) -> Option<Account> {
        if let Some(row) = self.writes.get(&id) {
            return Some(row.clone());
        }
        match self.isolation {
            IsolationLevel::ReadUncommitted => state
                .dirty
                .get(&id)
                .map(|d| d.row.clone())
                .or_else(|| state.rows.get(&id).map(|c| c.row.clone())),
            IsolationLevel::ReadCommitted => state.rows.get(&id).map(|c| c.row.clone()),
            IsolationLevel::Serializable => self
                .snapshot
                .as_ref()
                .and_then(|snapshot| snapshot.rows.get(&id).cloned()),
        }
    }

    fn visible_rows(&self, state: &StoreState) -> BTreeMap<AccountId, Account> {
        let mut rows: BTreeMap<AccountId, Account> = match self.isolation {
            IsolationLevel::ReadUncommitted => {
                let mut rows: BTreeMap<_, _> = state
                    .rows
                    .iter()
                    .map(|(id, c)| (*id, c.row.clone()))
                    .collect();
                for (id, dirty) in &state.dirty {
                    rows.insert(*id, dirty.row.clone());
                }
                rows
            }
            IsolationLevel::ReadCommitted => state
                .rows
                .iter()
                .map(|(id, c)| (*id, c.row.clone()))
                .collect(),
            IsolationLevel::Serializable => self
                .snapshot
                .as_ref()
                .map(|snapshot| snapshot.rows.clone())
                .unwrap_or_default(),
        };
        for (id, row) in &self.writes {
            rows.insert(*id, row.clone());
        }
        rows
    }

    fn serialization_failure(&mut self, state: &mut StoreState, account: AccountId) -> Error {
        self.abort_locked(state);
        warn!(txn = %self.id, account = %account, "Serialization failure, transaction rolled back");
        Error::SerializationFailure {
            txn: self.id,
            account,
        }
    }
}

impl<'a> StoreTransaction for MemoryTransaction<'a> {
    fn id(&self) -> TxnId {
        self.id
    }

    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    fn lock_row_for_update(&mut self, id: AccountId) -> Result<Account> {
        self.ensure_active()?;
        let store = self.store;
        let mut state = store.state.lock();
        let started = Instant::now();
        let deadline = started + store.config.lock_wait_timeout();

        loop {
            match state.locks.get(&id).copied() {
                Some(holder) if holder == self.id => break,
                None => {
                    if !state.rows.contains_key(&id) {
                        return Err(Error::AccountNotFound(id));
                    }
                    state.locks.insert(id, self.id);
                    self.held.insert(id);
                    break;
                }
                Some(holder) => {
                    if store.config.deadlock_detection && state.closes_cycle(self.id, id) {
                        self.abort_locked(&mut state);
                        warn!(
                            txn = %self.id,
                            account = %id,
                            holder = %holder,
                            "Deadlock detected, requester rolled back"
                        );
                        return Err(Error::DeadlockDetected { txn: self.id, account: id });
                    }
                    if Instant::now() >= deadline {
                        let waited_ms = started.elapsed().as_millis() as u64;
                        warn!(txn = %self.id, account = %id, waited_ms, "Lock wait timeout");
                        return Err(Error::LockWaitTimeout {
                            txn: self.id,
                            account: id,
                            waited_ms,
                        });
                    }

                    state.waiting.insert(self.id, id);
                    let _ = store.lock_released.wait_until(&mut state, deadline);
                    state.waiting.remove(&self.id);
                }
            }
        }

        if let Some(row) = self.writes.get(&id) {
            return Ok(row.clone());
        }

        let Some(committed) = state.rows.get(&id).cloned() else {
            return Err(Error::AccountNotFound(id));
        };

        if let Some(snapshot) = &self.snapshot {
            if committed.version > snapshot.seq {
                return Err(self.serialization_failure(&mut state, id));
            }
        }

        Ok(committed.row)
    }

    fn read(&mut self, id: AccountId) -> Result<Account> {
        self.ensure_active()?;
        let store = self.store;
        let state = store.state.lock();
        let row = self.visible_row(&state, id).ok_or(Error::AccountNotFound(id))?;
        if self.isolation == IsolationLevel::Serializable && !self.held.contains(&id) {
            self.read_set.insert(id);
        }
        Ok(row)
    }

    fn save(&mut self, row: &Account) -> Result<()> {
        self.ensure_active()?;
        if !self.held.contains(&row.id) {
            return Err(Error::RowNotLocked {
                txn: self.id,
                account: row.id,
            });
        }
        if row.balance < 0 {
            return Err(Error::NegativeBalance {
                account: row.id,
                balance: row.balance,
            });
        }

        let store = self.store;
        let mut state = store.state.lock();
        state.dirty.insert(
            row.id,
            DirtyRow {
                txn: self.id,
                row: row.clone(),
            },
        );
        self.writes.insert(row.id, row.clone());
        Ok(())
    }

    fn insert_account(&mut self, row: Account) -> Result<()> {
        self.ensure_active()?;
        if row.balance < 0 {
            return Err(Error::NegativeBalance {
                account: row.id,
                balance: row.balance,
            });
        }

        let store = self.store;
        let mut state = store.state.lock();
        if state.rows.contains_key(&row.id)
            || state.dirty.contains_key(&row.id)
            || state.locks.contains_key(&row.id)
        {
            return Err(Error::DuplicateAccount(row.id.to_string()));
        }
        if state.account_number_taken(&row.account_number) {
            return Err(Error::DuplicateAccount(row.account_number));
        }

        state.locks.insert(row.id, self.id);
        state.dirty.insert(
            row.id,
            DirtyRow {
                txn: self.id,
                row: row.clone(),
            },
        );
        self.held.insert(row.id);
        self.writes.insert(row.id, row);
        Ok(())
    }

    fn append_transfer(&mut self, record: TransferRecord) -> Result<()> {
        self.ensure_active()?;
        self.transfers.push(record);
        Ok(())
    }

    fn query(&mut self, predicate: Predicate<'_>) -> Result<Vec<Account>> {
        self.ensure_active()?;
        let store = self.store;
        let state = store.state.lock();
        let matched: Vec<Account> = self
            .visible_rows(&state)
            .into_values()
            .filter(|row| predicate(row))
            .collect();
        if self.isolation == IsolationLevel::Serializable {
            self.read_set.extend(matched.iter().map(|row| row.id));
        }
        Ok(matched)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let mut txn = *self;
        txn.ensure_active()?;
        let store = txn.store;
        let mut state = store.state.lock();

        if let Some(snapshot_seq) = txn.snapshot.as_ref().map(|s| s.seq) {
            let stale = txn
                .read_set
                .iter()
                .copied()
                .filter(|id| !txn.writes.contains_key(id))
                .find(|id| {
                    state
                        .rows
                        .get(id)
                        .map_or(true, |committed| committed.version > snapshot_seq)
                });
            if let Some(account) = stale {
                return Err(txn.serialization_failure(&mut state, account));
            }
        }

        state.commit_seq += 1;
        let version = state.commit_seq;
        for (id, row) in std::mem::take(&mut txn.writes) {
            state.dirty.remove(&id);
            state.rows.insert(id, CommittedRow { row, version });
        }
        let records = std::mem::take(&mut txn.transfers);
        let record_count = records.len();
        state.transfers.extend(records);
        txn.release_locked(&mut state);
        txn.status = TxnStatus::Finished;

        debug!(txn = %txn.id, version, records = record_count, "Transaction committed");
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        let mut txn = *self;
        if txn.status == TxnStatus::Active {
            let store = txn.store;
            let mut state = store.state.lock();
            txn.abort_locked(&mut state);
            debug!(txn = %txn.id, "Transaction rolled back");
        }
        txn.status = TxnStatus::Finished;
        Ok(())
    }
}

impl<'a> Drop for MemoryTransaction<'a> {
    fn drop(&mut self) {
        if self.status == TxnStatus::Active {
            let store = self.store;
            let mut state = store.state.lock();
            self.abort_locked(&mut state);
            debug!(txn = %self.id, "Transaction dropped while open, rolled back");
        }
    }
}
