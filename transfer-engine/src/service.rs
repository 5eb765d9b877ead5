//! Caller-facing transfer service
//!
//! [`TransferService::transfer_funds`] is the single production entry point
//! for moving money between accounts: request validation, lock ordering,
//! one coordinator attempt per try, and the retry/backoff loop around it.

use crate::{
    cancel::CancellationToken,
    config::Config,
    coordinator::TransferCoordinator,
    metrics::Metrics,
    retry::{RetryController, RetryPolicy},
    types::TransferRequest,
    Error, Result,
};
use ledger_core::{Account, AccountId, IsolationLevel, LedgerStore, TransferRecord};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Transfer service
#[derive(Clone)]
pub struct TransferService {
    store: Arc<dyn LedgerStore>,
    coordinator: TransferCoordinator,
    metrics: Metrics,
    default_isolation: IsolationLevel,
    default_policy: RetryPolicy,
}

impl std::fmt::Debug for TransferService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferService")
            .field("default_isolation", &self.default_isolation)
            .field("default_policy", &self.default_policy)
            .finish_non_exhaustive()
    }
}

impl TransferService {
    /// Create a new service over `store`
    pub fn new(store: Arc<dyn LedgerStore>, config: &Config) -> Result<Self> {
        config.retry.validate()?;
        let metrics = Metrics::new()?;

        info!(
            service = %config.service_name,
            isolation = %config.default_isolation,
            max_attempts = config.retry.max_attempts,
            "Transfer service initialized"
        );

        Ok(Self {
            coordinator: TransferCoordinator::new(Arc::clone(&store)),
            store,
            metrics,
            default_isolation: config.default_isolation,
            default_policy: config.retry.clone(),
        })
    }

    /// Move `request.amount` from `request.from` to `request.to`
    pub fn transfer_funds(
        &self,
        request: &TransferRequest,
        isolation: IsolationLevel,
        policy: &RetryPolicy,
    ) -> Result<TransferRecord> {
        self.transfer_funds_until(request, isolation, policy, &CancellationToken::new())
    }

    /// [`Self::transfer_funds`] bounded by a caller token
    pub fn transfer_funds_until(
        &self,
        request: &TransferRequest,
        isolation: IsolationLevel,
        policy: &RetryPolicy,
        token: &CancellationToken,
    ) -> Result<TransferRecord> {
        let started = Instant::now();
        let outcome = self
            .controller(policy)
            .run("transfer", token, |attempt, token| {
                debug!(
                    attempt,
                    from = %request.from,
                    to = %request.to,
                    amount = request.amount,
                    "Transfer attempt"
                );
                self.coordinator.execute(request, isolation, token)
            });
        self.finish("transfer", started, outcome)
    }

    /// Transfer with the configured isolation level and retry policy
    pub fn transfer(&self, request: &TransferRequest) -> Result<TransferRecord> {
        self.transfer_funds(request, self.default_isolation, &self.default_policy)
    }

    /// Credit `amount` to `account`
    pub fn deposit(&self, account: AccountId, amount: i64) -> Result<TransferRecord> {
        let started = Instant::now();
        let outcome = self.controller(&self.default_policy).run(
            "deposit",
            &CancellationToken::new(),
            |_, token| {
                self.coordinator
                    .deposit(account, amount, self.default_isolation, token)
            },
        );
        self.finish("deposit", started, outcome)
    }

    /// Debit `amount` from `account`
    pub fn withdraw(&self, account: AccountId, amount: i64) -> Result<TransferRecord> {
        let started = Instant::now();
        let outcome = self.controller(&self.default_policy).run(
            "withdraw",
            &CancellationToken::new(),
            |_, token| {
                self.coordinator
                    .withdraw(account, amount, self.default_isolation, token)
            },
        );
        self.finish("withdraw", started, outcome)
    }

    /// Read one account
    pub fn get_account(&self, id: AccountId) -> Result<Account> {
        Ok(self.store.get_account(id)?)
    }

    /// All accounts, ordered by id
    pub fn list_accounts(&self) -> Vec<Account> {
        self.store.list_accounts()
    }

    /// Open a new account with a store-assigned id
    pub fn open_account(&self, account_number: &str, owner: &str, balance: i64) -> Result<Account> {
        if balance < 0 {
            return Err(Error::Validation(format!(
                "Opening balance must not be negative, got {}",
                balance
            )));
        }
        if account_number.trim().is_empty() {
            return Err(Error::Validation("Account number is empty".to_string()));
        }
        let account = self.store.open_account(account_number, owner, balance)?;
        info!(account = %account.id, number = %account.account_number, "Account opened");
        Ok(account)
    }

    /// Committed records touching `account`, in commit order
    pub fn history(&self, account: AccountId) -> Result<Vec<TransferRecord>> {
        self.store.get_account(account)?;
        Ok(self.store.transfers_for(account))
    }

    /// Sum of all committed balances
    pub fn total_balance(&self) -> i64 {
        self.store
            .list_accounts()
            .iter()
            .map(|account| account.balance)
            .sum()
    }

    /// Service metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    fn controller(&self, policy: &RetryPolicy) -> RetryController {
        RetryController::new(policy.clone()).with_metrics(self.metrics.clone())
    }

    fn finish(
        &self,
        operation: &str,
        started: Instant,
        outcome: Result<TransferRecord>,
    ) -> Result<TransferRecord> {
        let elapsed = started.elapsed().as_secs_f64();
        match &outcome {
            Ok(record) => {
                self.metrics.record_completed(elapsed);
                debug!(operation, transfer_id = %record.id, elapsed, "Operation completed");
            }
            Err(e) => {
                self.metrics.record_failed(elapsed);
                warn!(operation, error = %e, elapsed, "Operation failed");
            }
        }
        outcome
    }
}
