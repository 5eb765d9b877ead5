//! Dirty read demonstration
//!
//! The writer locks a row, writes `balance + delta` without committing,
//! holds it for up to `pause`, then rolls back. The reader reads the same
//! row while the write is in flight. At read uncommitted it sees the
//! doomed value; at any stricter level it sees the committed one.

use super::{await_signal, ensure_live, join, signal};
use crate::{cancel::CancellationToken, Error, Result};
use crossbeam::channel;
use ledger_core::{AccountId, IsolationLevel, LedgerStore};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Dirty read inputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirtyReadParams {
    /// Row written and read
    pub account: AccountId,
    /// Uncommitted change applied by the writer
    pub delta: i64,
    /// Writer isolation
    pub writer_isolation: IsolationLevel,
    /// Reader isolation
    pub reader_isolation: IsolationLevel,
    /// Longest the writer holds its uncommitted write
    pub pause: Duration,
}

impl DirtyReadParams {
    /// Both sides at `isolation`
    pub fn new(account: AccountId, delta: i64, isolation: IsolationLevel, pause: Duration) -> Self {
        Self {
            account,
            delta,
            writer_isolation: isolation,
            reader_isolation: isolation,
            pause,
        }
    }
}

/// Dirty read outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtyReadReport {
    /// Reader isolation
    pub isolation: IsolationLevel,
    /// Committed balance before the demo
    pub committed_balance: i64,
    /// Value the writer held uncommitted
    pub in_flight_balance: i64,
    /// Value the reader saw
    pub observed_balance: i64,
    /// Committed balance after the writer rolled back
    pub final_balance: i64,
    /// Reader saw a value that never committed
    pub anomaly_observed: bool,
}

/// Run the dirty read demonstration
pub fn run_dirty_read(
    store: &dyn LedgerStore,
    params: &DirtyReadParams,
    token: &CancellationToken,
) -> Result<DirtyReadReport> {
    ensure_live(token, "dirty read")?;
    if params.delta == 0 {
        return Err(Error::Validation("delta must be non-zero".to_string()));
    }
    let committed_balance = store.get_account(params.account)?.balance;

    let (written_tx, written_rx) = channel::bounded::<i64>(1);
    let (read_tx, read_rx) = channel::bounded::<()>(1);

    let (in_flight_balance, observed_balance) = std::thread::scope(|scope| {
        let writer = scope.spawn(move || -> Result<i64> {
            ensure_live(token, "dirty read writer")?;
            let mut tx = store.begin(params.writer_isolation)?;
            let mut row = tx.lock_row_for_update(params.account)?;
            row.balance = row.balance.checked_add(params.delta).ok_or_else(|| {
                Error::Validation(format!("Balance overflow on {}", params.account))
            })?;
            tx.save(&row)?;
            signal(&written_tx, row.balance);

            // simulated work; returns early once the reader is done
            let _ = read_rx.recv_timeout(params.pause);
            tx.rollback()?;
            Ok(row.balance)
        });

        let reader = scope.spawn(move || -> Result<i64> {
            await_signal(
                &written_rx,
                params.pause.saturating_mul(2),
                "waiting for uncommitted write",
            )?;
            ensure_live(token, "dirty read reader")?;
            let mut tx = store.begin(params.reader_isolation)?;
            let observed = tx.read(params.account)?.balance;
            tx.commit()?;
            signal(&read_tx, ());
            Ok(observed)
        });

        let written = join(writer, "writer");
        let observed = join(reader, "reader");
        Ok::<_, Error>((written?, observed?))
    })?;

    let final_balance = store.get_account(params.account)?.balance;
    let report = DirtyReadReport {
        isolation: params.reader_isolation,
        committed_balance,
        in_flight_balance,
        observed_balance,
        final_balance,
        anomaly_observed: observed_balance == in_flight_balance
            && observed_balance != final_balance,
    };

    info!(
        isolation = %report.isolation,
        observed = report.observed_balance,
        in_flight = report.in_flight_balance,
        final_balance = report.final_balance,
        anomaly = report.anomaly_observed,
        "Dirty read demo finished"
    );
    Ok(report)
}
