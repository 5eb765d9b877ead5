//! Transfer Engine Demo
//!
//! Seeds an in-memory ledger, fires concurrent random transfers, runs the
//! anomaly demonstrations and prints a JSON report.

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use crossbeam::channel;
use ledger_core::{Account, AccountId, IsolationLevel, LedgerStore, MemoryStore};
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use transfer_engine::{
    harness::{
        run_deadlock, run_deadlock_with_retry, run_dirty_read, run_phantom_read, DeadlockParams,
        DeadlockReport, DirtyReadParams, DirtyReadReport, PhantomParams, PhantomReport,
    },
    telemetry, CancellationToken, Config, Error, TransferRequest, TransferService,
};

#[derive(Debug, Serialize)]
struct Report {
    generated_at: DateTime<Utc>,
    service_name: String,
    workload: WorkloadReport,
    dirty_read: Vec<DirtyReadReport>,
    phantom_read: Vec<PhantomReport>,
    deadlock: Vec<DeadlockReport>,
    metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
struct WorkloadReport {
    isolation: IsolationLevel,
    threads: usize,
    transfers: usize,
    completed: u64,
    insufficient_funds: u64,
    failed: u64,
    total_before: i64,
    total_after: i64,
    conserved: bool,
    elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
struct MetricsSnapshot {
    completed: u64,
    failed: u64,
    retries: u64,
    contention: u64,
}

fn main() -> anyhow::Result<()> {
    let config = if let Ok(config_path) = std::env::var("TRANSFER_ENGINE_CONFIG") {
        Config::from_file(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path))?
    } else {
        Config::from_env().context("Failed to load config from environment")?
    };

    telemetry::init_tracing(&config.logging)?;
    info!(service = %config.service_name, "Starting transfer engine demo");

    let demo = &config.demo;
    let accounts = (1..=demo.accounts).map(|i| {
        Account::new(
            AccountId::new(i),
            format!("ACC-{:03}", i),
            format!("owner-{}", i),
            demo.initial_balance,
        )
    });
    let store: Arc<dyn LedgerStore> =
        Arc::new(MemoryStore::with_accounts(config.store.clone(), accounts)?);
    let service = TransferService::new(Arc::clone(&store), &config)?;

    let workload = run_workload(&service, &config)?;
    if !workload.conserved {
        bail!(
            "Conservation violated: {} before, {} after",
            workload.total_before,
            workload.total_after
        );
    }

    let token = CancellationToken::with_timeout(Duration::from_secs(30));
    let pause = Duration::from_millis(200);
    let first = AccountId::new(1);
    let second = AccountId::new(2);

    let dirty_read = [IsolationLevel::ReadUncommitted, IsolationLevel::ReadCommitted]
        .into_iter()
        .map(|isolation| {
            let params = DirtyReadParams::new(first, demo.max_amount, isolation, pause);
            run_dirty_read(store.as_ref(), &params, &token)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let threshold = demo.initial_balance * 5;
    let phantom_read = [IsolationLevel::ReadCommitted, IsolationLevel::Serializable]
        .into_iter()
        .enumerate()
        .map(|(i, isolation)| {
            let id = demo.accounts + 1 + i as u64;
            let insert = Account::new(
                AccountId::new(id),
                format!("ACC-{:03}", id),
                "phantom",
                threshold * 2,
            );
            run_phantom_read(
                store.as_ref(),
                &PhantomParams::new(threshold, isolation, insert, pause),
                &token,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    let deadlock_params = DeadlockParams::new(first, second, 1, IsolationLevel::ReadCommitted);
    let deadlock = vec![
        run_deadlock(&store, &deadlock_params, &token)?,
        run_deadlock_with_retry(&store, &deadlock_params, &config.retry, &token)?,
    ];

    let metrics = service.metrics();
    let report = Report {
        generated_at: Utc::now(),
        service_name: config.service_name.clone(),
        workload,
        dirty_read,
        phantom_read,
        deadlock,
        metrics: MetricsSnapshot {
            completed: metrics.completed_total.get(),
            failed: metrics.failed_total.get(),
            retries: metrics.retries_total.get(),
            contention: metrics.contention_total.get(),
        },
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    info!("Demo finished");
    Ok(())
}

fn run_workload(service: &TransferService, config: &Config) -> anyhow::Result<WorkloadReport> {
    let demo = &config.demo;
    let mut rng = rand::thread_rng();
    let requests: Vec<TransferRequest> = (0..demo.transfers)
        .map(|_| {
            let from = rng.gen_range(1..=demo.accounts);
            let mut to = rng.gen_range(1..=demo.accounts - 1);
            if to >= from {
                to += 1;
            }
            TransferRequest::new(from, to, rng.gen_range(1..=demo.max_amount))
        })
        .collect();

    let (work_tx, work_rx) = channel::unbounded();
    for request in requests {
        work_tx.send(request)?;
    }
    drop(work_tx);

    let completed = AtomicU64::new(0);
    let insufficient = AtomicU64::new(0);
    let failed = AtomicU64::new(0);
    let total_before = service.total_balance();
    let started = Instant::now();

    std::thread::scope(|scope| {
        for _ in 0..demo.threads {
            let work_rx = work_rx.clone();
            let (completed, insufficient, failed) = (&completed, &insufficient, &failed);
            scope.spawn(move || {
                for request in work_rx.iter() {
                    match service.transfer_funds(&request, config.default_isolation, &config.retry)
                    {
                        Ok(_) => completed.fetch_add(1, Ordering::Relaxed),
                        Err(Error::InsufficientFunds { .. }) => {
                            insufficient.fetch_add(1, Ordering::Relaxed)
                        }
                        Err(e) => {
                            warn!(error = %e, "Transfer failed");
                            failed.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                }
            });
        }
    });

    let total_after = service.total_balance();
    let report = WorkloadReport {
        isolation: config.default_isolation,
        threads: demo.threads,
        transfers: demo.transfers,
        completed: completed.into_inner(),
        insufficient_funds: insufficient.into_inner(),
        failed: failed.into_inner(),
        total_before,
        total_after,
        conserved: total_before == total_after,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        completed = report.completed,
        insufficient_funds = report.insufficient_funds,
        failed = report.failed,
        elapsed_ms = report.elapsed_ms,
        "Workload finished"
    );
    Ok(report)
}
