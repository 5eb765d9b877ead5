//! Anomaly Harness
//!
//! Reproducible demonstrations of isolation anomalies, used by tests and the
//! demo binary. None of this is reachable from [`crate::TransferService`].
//!
//! Every entry point takes explicit isolation levels, synthetic pause
//! lengths and a [`CancellationToken`]. Threads coordinate through
//! rendezvous channels rather than sleeps, so the interleaving each demo
//! needs is forced, not hoped for. Pauses only bound how long a side waits
//! for the other.

pub mod deadlock;
pub mod dirty_read;
pub mod phantom;
pub mod unordered;

pub use deadlock::{run_deadlock, run_deadlock_with_retry, DeadlockParams, DeadlockReport};
pub use dirty_read::{run_dirty_read, DirtyReadParams, DirtyReadReport};
pub use phantom::{run_phantom_read, PhantomParams, PhantomReport};
pub use unordered::transfer_unordered;

use crate::{cancel::CancellationToken, Error, Result};
use crossbeam::channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::thread::ScopedJoinHandle;
use std::time::Duration;
use uuid::Uuid;

/// How one side of a two-party demo ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SideOutcome {
    /// Committed
    Completed {
        /// Committed transfer record id
        transfer_id: Uuid,
        /// Attempts used
        attempts: u32,
    },
    /// The store picked this side as the deadlock victim
    Deadlocked {
        /// Error text
        error: String,
        /// Attempts used
        attempts: u32,
    },
    /// Any other error
    Failed {
        /// Error text
        error: String,
        /// Attempts used
        attempts: u32,
    },
}

impl SideOutcome {
    pub(crate) fn from_result(
        result: &Result<ledger_core::TransferRecord>,
        attempts: u32,
    ) -> Self {
        match result {
            Ok(record) => SideOutcome::Completed {
                transfer_id: record.id,
                attempts,
            },
            Err(e) if e.is_deadlock() => SideOutcome::Deadlocked {
                error: e.to_string(),
                attempts,
            },
            Err(e) => SideOutcome::Failed {
                error: e.to_string(),
                attempts,
            },
        }
    }

    /// Side committed
    pub fn is_completed(&self) -> bool {
        matches!(self, SideOutcome::Completed { .. })
    }

    /// Side was a deadlock victim
    pub fn is_deadlocked(&self) -> bool {
        matches!(self, SideOutcome::Deadlocked { .. })
    }
}

/// Refuse to start a demo step once the token has expired
pub(crate) fn ensure_live(token: &CancellationToken, step: &str) -> Result<()> {
    if token.is_cancelled() {
        return Err(Error::Cancelled(format!("{} not started: deadline passed", step)));
    }
    Ok(())
}

/// Signal the other side; a vanished peer is not an error for the sender
pub(crate) fn signal<T>(tx: &Sender<T>, value: T) {
    let _ = tx.send(value);
}

/// Wait for the other side's signal, bounded by `timeout`
pub(crate) fn await_signal<T>(rx: &Receiver<T>, timeout: Duration, step: &str) -> Result<T> {
    rx.recv_timeout(timeout)
        .map_err(|e| Error::Harness(format!("{}: {}", step, e)))
}

/// Join a scoped worker, turning a panic into a harness error
pub(crate) fn join<T>(handle: ScopedJoinHandle<'_, Result<T>>, side: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| Error::Harness(format!("{} thread panicked", side)))?
}
