//! Property-based tests for concurrent transfers
//!
//! These tests use proptest to verify:
//! - Conservation: Σ(balances) is unchanged by any concurrent workload
//! - Non-negativity: no committed balance ever drops below zero
//! - Deadlock freedom: ordered transfers never see `DeadlockDetected`
//! - Deadlock reproducibility: inverted lock order does

use ledger_core::{
    Account, AccountId, Config as StoreConfig, IsolationLevel, LedgerStore, MemoryStore,
    TransferKind,
};
use proptest::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use transfer_engine::{
    harness::{run_deadlock, DeadlockParams},
    CancellationToken, Config, Error, RetryPolicy, TransferRequest, TransferService,
};

const ACCOUNTS: u64 = 6;
const INITIAL_BALANCE: i64 = 10_000;

fn seeded_store() -> Arc<dyn LedgerStore> {
    let config = StoreConfig {
        lock_wait_timeout_ms: 5_000,
        ..StoreConfig::default()
    };
    Arc::new(
        MemoryStore::with_accounts(
            config,
            (1..=ACCOUNTS).map(|n| {
                Account::new(
                    AccountId::new(n),
                    format!("ACC-{:03}", n),
                    format!("owner-{}", n),
                    INITIAL_BALANCE,
                )
            }),
        )
        .unwrap(),
    )
}

/// (from, to, amount) with from != to
fn request_strategy() -> impl Strategy<Value = TransferRequest> {
    (1..=ACCOUNTS, 1..ACCOUNTS, 1i64..4_000).prop_map(|(from, to, amount)| {
        let to = if to >= from { to + 1 } else { to };
        TransferRequest::new(from, to, amount)
    })
}

fn isolation_strategy() -> impl Strategy<Value = IsolationLevel> {
    prop_oneof![
        Just(IsolationLevel::ReadUncommitted),
        Just(IsolationLevel::ReadCommitted),
        Just(IsolationLevel::Serializable),
    ]
}

/// Run `requests` split across `threads` workers released together
fn run_concurrently(
    service: &Arc<TransferService>,
    requests: Vec<TransferRequest>,
    threads: usize,
    isolation: IsolationLevel,
    policy: &RetryPolicy,
) -> Vec<transfer_engine::Result<ledger_core::TransferRecord>> {
    let chunk = requests.len().div_ceil(threads).max(1);
    let chunks: Vec<Vec<TransferRequest>> = requests.chunks(chunk).map(<[_]>::to_vec).collect();
    let barrier = Arc::new(Barrier::new(chunks.len()));

    let handles: Vec<_> = chunks
        .into_iter()
        .map(|chunk| {
            let service = Arc::clone(service);
            let barrier = Arc::clone(&barrier);
            let policy = policy.clone();
            thread::spawn(move || {
                barrier.wait();
                chunk
                    .iter()
                    .map(|request| service.transfer_funds(request, isolation, &policy))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: total is conserved and no balance goes negative, however
    /// many attempts were retried
    #[test]
    fn prop_conservation_under_concurrency(
        requests in prop::collection::vec(request_strategy(), 1..60),
        threads in 2usize..6,
        isolation in isolation_strategy(),
    ) {
        let store = seeded_store();
        let service = Arc::new(TransferService::new(Arc::clone(&store), &Config::default()).unwrap());
        let total_before = service.total_balance();
        let policy = RetryPolicy::new(50, Duration::from_millis(1), Duration::from_secs(30));

        let results = run_concurrently(&service, requests, threads, isolation, &policy);

        prop_assert_eq!(service.total_balance(), total_before);
        for account in service.list_accounts() {
            prop_assert!(account.balance >= 0, "{} went negative", account.id);
        }

        let completed = results.iter().filter(|r| r.is_ok()).count();
        let recorded = store
            .transfers()
            .iter()
            .filter(|record| record.kind == TransferKind::Transfer)
            .count();
        prop_assert_eq!(completed, recorded);

        for result in &results {
            if let Err(e) = result {
                prop_assert!(
                    matches!(e, Error::InsufficientFunds { .. } | Error::RetriesExhausted { .. }),
                    "unexpected error: {}", e
                );
            }
        }
    }

    /// Property: with ordered locking and no retries, no attempt is ever a
    /// deadlock victim
    #[test]
    fn prop_deadlock_freedom_under_ordering(
        requests in prop::collection::vec(request_strategy(), 2..60),
        threads in 2usize..8,
    ) {
        let store = seeded_store();
        let service = Arc::new(TransferService::new(Arc::clone(&store), &Config::default()).unwrap());
        let single_attempt = RetryPolicy::new(1, Duration::from_millis(1), Duration::from_secs(30));

        let results = run_concurrently(
            &service,
            requests,
            threads,
            IsolationLevel::ReadCommitted,
            &single_attempt,
        );

        for result in &results {
            if let Err(e) = result {
                prop_assert!(!e.is_deadlock(), "deadlock under ordering: {}", e);
                prop_assert!(matches!(e, Error::InsufficientFunds { .. }), "unexpected error: {}", e);
            }
        }
        prop_assert_eq!(service.metrics().contention_total.get(), 0);
    }
}

#[test]
fn test_deadlock_reproducible_without_ordering() {
    for round in 0..10u64 {
        let store = seeded_store();
        let first = AccountId::new(1 + round % (ACCOUNTS - 1));
        let second = AccountId::new(first.value() + 1);
        let params = DeadlockParams::new(first, second, 10, IsolationLevel::ReadCommitted);

        let report = run_deadlock(&store, &params, &CancellationToken::new()).unwrap();

        assert!(report.deadlock_detected, "round {}", round);
        let (a, b) = report.balances_after;
        assert_eq!(a + b, 2 * INITIAL_BALANCE);
    }
}
