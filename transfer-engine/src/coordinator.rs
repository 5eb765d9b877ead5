//! Transfer Coordinator
//!
//! Runs one attempt of a balance movement inside one store transaction:
//!
//! 1. resolve lock order
//! 2. begin at the requested isolation level
//! 3. lock the lower id, then the higher id (never both at once)
//! 4. re-read balances under lock
//! 5. reject if the source cannot cover the amount
//! 6. debit, credit, append a `Completed` record
//! 7. commit
//!
//! Any failure after `begin` rolls the transaction back before the error is
//! returned. Retrying is not this module's business; see [`crate::retry`].

use crate::{
    cancel::CancellationToken,
    ordering::lock_order,
    state::TransferState,
    types::{validate_amount, TransferRequest},
    Error, Result,
};
use ledger_core::{
    Account, AccountId, IsolationLevel, LedgerStore, StoreTransaction, TransferKind,
    TransferRecord,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Orchestrates single-attempt transfers against a ledger store
#[derive(Clone)]
pub struct TransferCoordinator {
    store: Arc<dyn LedgerStore>,
}

impl std::fmt::Debug for TransferCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferCoordinator").finish_non_exhaustive()
    }
}

/// Tracks the state machine of one attempt and logs each step
struct Progress {
    state: TransferState,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: TransferState::Pending,
        }
    }

    fn advance(&mut self, next: TransferState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "Transfer state");
        self.state = next;
    }

    /// Map an error to its terminal/transient state
    fn abort(&mut self, err: &Error) {
        let next = match err {
            Error::InsufficientFunds { .. } => TransferState::Failed,
            e if e.is_retryable() => TransferState::AbortedRetryable,
            _ => TransferState::AbortedFatal,
        };
        self.advance(next);
    }
}

impl TransferCoordinator {
    /// Create a new coordinator
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Execute one transfer attempt
    pub fn execute(
        &self,
        request: &TransferRequest,
        isolation: IsolationLevel,
        token: &CancellationToken,
    ) -> Result<TransferRecord> {
        request.validate()?;
        let (first, second) = lock_order(request.from, request.to);
        self.execute_locking(request, isolation, token, [first, second], |_| Ok(()))
    }

    /// One attempt that locks rows in exactly the order given.
    ///
    /// `after_first_lock` runs while only the first row is held. Only
    /// [`Self::execute`] (ordered) and the anomaly harness call this.
    pub(crate) fn execute_locking<H>(
        &self,
        request: &TransferRequest,
        isolation: IsolationLevel,
        token: &CancellationToken,
        order: [AccountId; 2],
        after_first_lock: H,
    ) -> Result<TransferRecord>
    where
        H: FnOnce(AccountId) -> Result<()>,
    {
        request.validate()?;
        let [first, second] = order;

        self.run(isolation, token, |tx, progress| {
            progress.advance(TransferState::Locking);
            let first_row = lock_row(tx, first, token)?;
            after_first_lock(first)?;
            let second_row = lock_row(tx, second, token)?;
            let (mut source, mut destination) = if first == request.from {
                (first_row, second_row)
            } else {
                (second_row, first_row)
            };

            progress.advance(TransferState::Validating);
            if source.balance < request.amount {
                return Err(Error::InsufficientFunds {
                    account: source.id,
                    required: request.amount,
                    available: source.balance,
                });
            }
            destination.balance = destination
                .balance
                .checked_add(request.amount)
                .ok_or_else(|| {
                    Error::Validation(format!("Balance overflow on {}", destination.id))
                })?;
            source.balance -= request.amount;

            tx.save(&source)?;
            tx.save(&destination)?;
            let record = TransferRecord::completed(
                request.from,
                request.to,
                request.amount,
                TransferKind::Transfer,
            );
            tx.append_transfer(record.clone())?;
            Ok(record)
        })
    }

    /// Credit external funds to one account
    pub fn deposit(
        &self,
        account: AccountId,
        amount: i64,
        isolation: IsolationLevel,
        token: &CancellationToken,
    ) -> Result<TransferRecord> {
        validate_amount(amount)?;
        self.run(isolation, token, |tx, progress| {
            progress.advance(TransferState::Locking);
            let mut row = lock_row(tx, account, token)?;

            progress.advance(TransferState::Validating);
            row.balance = row.balance.checked_add(amount).ok_or_else(|| {
                Error::Validation(format!("Balance overflow on {}", account))
            })?;
            tx.save(&row)?;
            let record = TransferRecord::completed(account, account, amount, TransferKind::Deposit);
            tx.append_transfer(record.clone())?;
            Ok(record)
        })
    }

    /// Debit funds from one account to the outside
    pub fn withdraw(
        &self,
        account: AccountId,
        amount: i64,
        isolation: IsolationLevel,
        token: &CancellationToken,
    ) -> Result<TransferRecord> {
        validate_amount(amount)?;
        self.run(isolation, token, |tx, progress| {
            progress.advance(TransferState::Locking);
            let mut row = lock_row(tx, account, token)?;

            progress.advance(TransferState::Validating);
            if row.balance < amount {
                return Err(Error::InsufficientFunds {
                    account,
                    required: amount,
                    available: row.balance,
                });
            }
            row.balance -= amount;
            tx.save(&row)?;
            let record =
                TransferRecord::completed(account, account, amount, TransferKind::Withdrawal);
            tx.append_transfer(record.clone())?;
            Ok(record)
        })
    }

    /// Begin, run `body`, then commit or roll back
    fn run<F>(
        &self,
        isolation: IsolationLevel,
        token: &CancellationToken,
        body: F,
    ) -> Result<TransferRecord>
    where
        F: FnOnce(&mut dyn StoreTransaction, &mut Progress) -> Result<TransferRecord>,
    {
        let mut progress = Progress::new();
        if token.is_cancelled() {
            let err = Error::Cancelled("deadline passed before transaction start".to_string());
            progress.abort(&err);
            return Err(err);
        }

        let mut tx = self.store.begin(isolation)?;
        let txn = tx.id();

        let outcome = body(&mut *tx, &mut progress).and_then(|record| {
            if token.is_cancelled() {
                return Err(Error::Cancelled(
                    "deadline passed before commit".to_string(),
                ));
            }
            Ok(record)
        });

        let record = match outcome {
            Ok(record) => record,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(txn = %txn, error = %rollback_err, "Rollback failed");
                }
                progress.abort(&err);
                debug!(txn = %txn, error = %err, "Transfer attempt rolled back");
                return Err(err);
            }
        };

        if let Err(err) = tx.commit() {
            let err = Error::from(err);
            progress.abort(&err);
            warn!(txn = %txn, error = %err, "Commit failed");
            return Err(err);
        }

        progress.advance(TransferState::Completed);
        info!(
            txn = %txn,
            transfer_id = %record.id,
            from = %record.from,
            to = %record.to,
            amount = record.amount,
            kind = ?record.kind,
            isolation = %isolation,
            "Transfer committed"
        );
        Ok(record)
    }
}

/// Lock one row, refusing to start the request once the token has expired
fn lock_row(
    tx: &mut dyn StoreTransaction,
    account: AccountId,
    token: &CancellationToken,
) -> Result<Account> {
    if token.is_cancelled() {
        return Err(Error::Cancelled(format!(
            "deadline passed before locking {}",
            account
        )));
    }
    Ok(tx.lock_row_for_update(account)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{Config, FaultInjectingStore, MemoryStore, TransferStatus, TxnId};

    fn store() -> Arc<MemoryStore> {
        Arc::new(
            MemoryStore::with_accounts(
                Config::default(),
                vec![
                    Account::new(AccountId::new(1), "ACC-001", "alice", 100_000),
                    Account::new(AccountId::new(2), "ACC-002", "bob", 50_000),
                ],
            )
            .unwrap(),
        )
    }

    const A: AccountId = AccountId::new(1);
    const B: AccountId = AccountId::new(2);

    #[test]
    fn test_transfer_completes() {
        let store = store();
        let coordinator = TransferCoordinator::new(store.clone());
        let record = coordinator
            .execute(
                &TransferRequest::new(A, B, 1_000),
                IsolationLevel::ReadCommitted,
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(record.status, TransferStatus::Completed);
        assert_eq!(record.kind, TransferKind::Transfer);
        assert_eq!(store.get_account(A).unwrap().balance, 99_000);
        assert_eq!(store.get_account(B).unwrap().balance, 51_000);
        assert_eq!(store.transfers(), vec![record]);
    }

    #[test]
    fn test_reverse_direction_uses_same_lock_order() {
        let store = store();
        let coordinator = TransferCoordinator::new(store.clone());
        coordinator
            .execute(
                &TransferRequest::new(B, A, 300),
                IsolationLevel::Serializable,
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(store.get_account(A).unwrap().balance, 100_300);
        assert_eq!(store.get_account(B).unwrap().balance, 49_700);
    }

    #[test]
    fn test_insufficient_funds_writes_nothing() {
        let store = store();
        let coordinator = TransferCoordinator::new(store.clone());
        let err = coordinator
            .execute(
                &TransferRequest::new(A, B, 999_999),
                IsolationLevel::ReadCommitted,
                &CancellationToken::new(),
            )
            .unwrap_err();

        assert!(matches!(
            err,
            Error::InsufficientFunds { account, required: 999_999, available: 100_000 } if account == A
        ));
        assert_eq!(store.get_account(A).unwrap().balance, 100_000);
        assert_eq!(store.get_account(B).unwrap().balance, 50_000);
        assert!(store.transfers().is_empty());
        assert_eq!(store.held_locks(), 0);
    }

    #[test]
    fn test_validation_happens_before_locking() {
        let store = store();
        let coordinator = TransferCoordinator::new(store.clone());
        let err = coordinator
            .execute(
                &TransferRequest::new(A, A, 10),
                IsolationLevel::ReadCommitted,
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_unknown_account() {
        let store = store();
        let coordinator = TransferCoordinator::new(store.clone());
        let err = coordinator
            .execute(
                &TransferRequest::new(A, AccountId::new(42), 10),
                IsolationLevel::ReadCommitted,
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::AccountNotFound(id) if id == AccountId::new(42)));
        assert_eq!(store.held_locks(), 0);
    }

    #[test]
    fn test_cancelled_token_starts_nothing() {
        let store = store();
        let coordinator = TransferCoordinator::new(store.clone());
        let token = CancellationToken::new();
        token.cancel();
        let err = coordinator
            .execute(&TransferRequest::new(A, B, 10), IsolationLevel::ReadCommitted, &token)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        assert_eq!(store.get_account(A).unwrap().balance, 100_000);
    }

    #[test]
    fn test_commit_contention_is_retryable() {
        let store = Arc::new(FaultInjectingStore::new(
            MemoryStore::with_accounts(
                Config::default(),
                vec![
                    Account::new(A, "ACC-001", "alice", 100),
                    Account::new(B, "ACC-002", "bob", 0),
                ],
            )
            .unwrap(),
        ));
        store.fail_commits(
            1,
            ledger_core::Error::SerializationFailure {
                txn: TxnId::new(0),
                account: A,
            },
        );
        let coordinator = TransferCoordinator::new(store.clone());

        let err = coordinator
            .execute(
                &TransferRequest::new(A, B, 40),
                IsolationLevel::Serializable,
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.get_account(A).unwrap().balance, 100);

        coordinator
            .execute(
                &TransferRequest::new(A, B, 40),
                IsolationLevel::Serializable,
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(store.get_account(B).unwrap().balance, 40);
    }

    #[test]
    fn test_deposit_and_withdraw() {
        let store = store();
        let coordinator = TransferCoordinator::new(store.clone());
        let token = CancellationToken::new();

        let deposit = coordinator
            .deposit(B, 500, IsolationLevel::ReadCommitted, &token)
            .unwrap();
        assert_eq!(deposit.kind, TransferKind::Deposit);
        assert_eq!((deposit.from, deposit.to), (B, B));
        assert_eq!(store.get_account(B).unwrap().balance, 50_500);

        let withdrawal = coordinator
            .withdraw(B, 50_500, IsolationLevel::ReadCommitted, &token)
            .unwrap();
        assert_eq!(withdrawal.kind, TransferKind::Withdrawal);
        assert_eq!(store.get_account(B).unwrap().balance, 0);

        let err = coordinator
            .withdraw(B, 1, IsolationLevel::ReadCommitted, &token)
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { .. }));
        assert!(matches!(
            coordinator.deposit(B, 0, IsolationLevel::ReadCommitted, &token),
            Err(Error::Validation(_))
        ));
        assert_eq!(store.transfers_for(B).len(), 2);
    }
}
