//! Deadlock demonstration
//!
//! Two transfers over the same pair run in opposite directions, each
//! locking its own source first. Both take their first lock, meet at a
//! rendezvous, then ask for the row the other holds. The second request
//! closes a wait-for cycle and the store aborts it with `DeadlockDetected`.

use super::{await_signal, ensure_live, join, signal, unordered::transfer_unordered, SideOutcome};
use crate::{
    cancel::CancellationToken,
    coordinator::TransferCoordinator,
    retry::{RetryController, RetryPolicy},
    types::TransferRequest,
    Error, Result,
};
use crossbeam::channel::{self, Receiver, Sender};
use ledger_core::{AccountId, IsolationLevel, LedgerStore, TransferRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Deadlock inputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlockParams {
    /// Source of the forward transfer, destination of the reverse one
    pub first: AccountId,
    /// Destination of the forward transfer, source of the reverse one
    pub second: AccountId,
    /// Amount moved by each side
    pub amount: i64,
    /// Isolation for both sides
    pub isolation: IsolationLevel,
    /// Longest a side waits at the rendezvous
    pub rendezvous_timeout: Duration,
}

impl DeadlockParams {
    /// Create params
    pub fn new(first: AccountId, second: AccountId, amount: i64, isolation: IsolationLevel) -> Self {
        Self {
            first,
            second,
            amount,
            isolation,
            rendezvous_timeout: Duration::from_secs(2),
        }
    }
}

/// Deadlock outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlockReport {
    /// Isolation used by both sides
    pub isolation: IsolationLevel,
    /// `first -> second`
    pub forward: SideOutcome,
    /// `second -> first`
    pub reverse: SideOutcome,
    /// At least one side was aborted as a deadlock victim
    pub deadlock_detected: bool,
    /// Committed balances of `first` and `second` afterwards
    pub balances_after: (i64, i64),
}

/// Run both sides once, without retry
pub fn run_deadlock(
    store: &Arc<dyn LedgerStore>,
    params: &DeadlockParams,
    token: &CancellationToken,
) -> Result<DeadlockReport> {
    run_pair(store, params, token, None)
}

/// Run both sides under `policy`; the rendezvous only happens on the first
/// attempt, so the victim's retry can complete once the survivor commits
pub fn run_deadlock_with_retry(
    store: &Arc<dyn LedgerStore>,
    params: &DeadlockParams,
    policy: &RetryPolicy,
    token: &CancellationToken,
) -> Result<DeadlockReport> {
    run_pair(store, params, token, Some(policy))
}

fn run_pair(
    store: &Arc<dyn LedgerStore>,
    params: &DeadlockParams,
    token: &CancellationToken,
    policy: Option<&RetryPolicy>,
) -> Result<DeadlockReport> {
    ensure_live(token, "deadlock demo")?;
    if params.first == params.second {
        return Err(Error::Validation(
            "deadlock demo needs two distinct accounts".to_string(),
        ));
    }

    let coordinator = TransferCoordinator::new(Arc::clone(store));
    let forward_request = TransferRequest::new(params.first, params.second, params.amount);
    let reverse_request = TransferRequest::new(params.second, params.first, params.amount);
    let (forward_tx, forward_rx) = channel::bounded::<()>(1);
    let (reverse_tx, reverse_rx) = channel::bounded::<()>(1);

    let (forward, reverse) = std::thread::scope(|scope| {
        let coordinator = &coordinator;
        let forward = scope.spawn(move || -> Result<SideOutcome> {
            Ok(run_side(
                coordinator,
                &forward_request,
                params,
                token,
                policy,
                (&forward_tx, &reverse_rx),
            ))
        });
        let reverse = scope.spawn(move || -> Result<SideOutcome> {
            Ok(run_side(
                coordinator,
                &reverse_request,
                params,
                token,
                policy,
                (&reverse_tx, &forward_rx),
            ))
        });

        let forward = join(forward, "forward")?;
        let reverse = join(reverse, "reverse")?;
        Ok::<_, Error>((forward, reverse))
    })?;

    let report = DeadlockReport {
        isolation: params.isolation,
        deadlock_detected: forward.is_deadlocked() || reverse.is_deadlocked(),
        forward,
        reverse,
        balances_after: (
            store.get_account(params.first)?.balance,
            store.get_account(params.second)?.balance,
        ),
    };

    info!(
        isolation = %report.isolation,
        deadlock = report.deadlock_detected,
        retried = policy.is_some(),
        "Deadlock demo finished"
    );
    Ok(report)
}

fn run_side(
    coordinator: &TransferCoordinator,
    request: &TransferRequest,
    params: &DeadlockParams,
    token: &CancellationToken,
    policy: Option<&RetryPolicy>,
    (mine, theirs): (&Sender<()>, &Receiver<()>),
) -> SideOutcome {
    let rendezvous = |_: AccountId| -> Result<()> {
        signal(mine, ());
        await_signal(theirs, params.rendezvous_timeout, "waiting for peer's first lock")
    };

    let Some(policy) = policy else {
        let result =
            transfer_unordered(coordinator, request, params.isolation, token, rendezvous);
        return SideOutcome::from_result(&result, 1);
    };

    let mut attempts = 0;
    let result: Result<TransferRecord> = RetryController::new(policy.clone()).run(
        "deadlock demo",
        token,
        |attempt, token| {
            attempts = attempt;
            if attempt == 1 {
                transfer_unordered(coordinator, request, params.isolation, token, rendezvous)
            } else {
                transfer_unordered(coordinator, request, params.isolation, token, |_| Ok(()))
            }
        },
    );
    SideOutcome::from_result(&result, attempts)
}
