//! Phantom read demonstration
//!
//! The reader runs a range query (`balance >= threshold`), then waits while
//! the inserter commits a new qualifying row, then repeats the query in the
//! same transaction. Read committed sees the extra row; serializable reads
//! from its snapshot and does not.

use super::{await_signal, ensure_live, join, signal};
use crate::{cancel::CancellationToken, Error, Result};
use crossbeam::channel;
use ledger_core::{Account, AccountId, IsolationLevel, LedgerStore};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Phantom read inputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhantomParams {
    /// Query matches rows with `balance >= threshold`
    pub threshold: i64,
    /// Reader isolation
    pub reader_isolation: IsolationLevel,
    /// Inserter isolation
    pub writer_isolation: IsolationLevel,
    /// Row committed between the two queries; must qualify
    pub insert: Account,
    /// Longest either side waits for the other
    pub pause: Duration,
}

impl PhantomParams {
    /// Reader at `isolation`, inserter at read committed
    pub fn new(threshold: i64, isolation: IsolationLevel, insert: Account, pause: Duration) -> Self {
        Self {
            threshold,
            reader_isolation: isolation,
            writer_isolation: IsolationLevel::ReadCommitted,
            insert,
            pause,
        }
    }
}

/// Phantom read outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhantomReport {
    /// Reader isolation
    pub isolation: IsolationLevel,
    /// Matches in the first query
    pub first_count: usize,
    /// Matches in the repeated query
    pub second_count: usize,
    /// Matches outside any transaction afterwards
    pub committed_count: usize,
    /// Row inserted between the queries
    pub inserted: AccountId,
    /// The repeated query returned a different row set
    pub phantom_observed: bool,
}

/// Run the phantom read demonstration
pub fn run_phantom_read(
    store: &dyn LedgerStore,
    params: &PhantomParams,
    token: &CancellationToken,
) -> Result<PhantomReport> {
    ensure_live(token, "phantom read")?;
    if params.insert.balance < params.threshold {
        return Err(Error::Validation(format!(
            "Inserted row balance {} does not reach threshold {}",
            params.insert.balance, params.threshold
        )));
    }
    let threshold = params.threshold;
    let qualifies = move |account: &Account| account.balance >= threshold;

    let (queried_tx, queried_rx) = channel::bounded::<()>(1);
    let (inserted_tx, inserted_rx) = channel::bounded::<()>(1);

    let (first, second) = std::thread::scope(|scope| {
        let reader = scope.spawn(move || -> Result<(Vec<Account>, Vec<Account>)> {
            ensure_live(token, "phantom reader")?;
            let mut tx = store.begin(params.reader_isolation)?;
            let first = tx.query(&qualifies)?;
            signal(&queried_tx, ());

            // simulated work while the inserter commits
            let _ = inserted_rx.recv_timeout(params.pause);
            let second = tx.query(&qualifies)?;
            tx.commit()?;
            Ok((first, second))
        });

        let inserter = scope.spawn(move || -> Result<()> {
            await_signal(
                &queried_rx,
                params.pause.saturating_mul(2),
                "waiting for first query",
            )?;
            ensure_live(token, "phantom inserter")?;
            let mut tx = store.begin(params.writer_isolation)?;
            tx.insert_account(params.insert.clone())?;
            tx.commit()?;
            signal(&inserted_tx, ());
            Ok(())
        });

        let queries = join(reader, "reader")?;
        join(inserter, "inserter")?;
        Ok::<_, Error>(queries)
    })?;

    let committed_count = store.query(&qualifies).len();
    let ids = |rows: &[Account]| rows.iter().map(|row| row.id).collect::<Vec<_>>();
    let report = PhantomReport {
        isolation: params.reader_isolation,
        first_count: first.len(),
        second_count: second.len(),
        committed_count,
        inserted: params.insert.id,
        phantom_observed: ids(&first) != ids(&second),
    };

    info!(
        isolation = %report.isolation,
        first = report.first_count,
        second = report.second_count,
        phantom = report.phantom_observed,
        "Phantom read demo finished"
    );
    Ok(report)
}
