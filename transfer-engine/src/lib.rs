//! DelTran Transfer Engine
//!
//! Concurrent fund transfers between ledger accounts with deterministic lock
//! ordering, bounded retries and reproducible isolation-anomaly demos.
//!
//! # Architecture
//!
//! - **Lock ordering**: every production transfer locks the lower account id
//!   first, so two transfers over the same pair can never wait on each other
//!   in a cycle
//! - **Coordinator**: one attempt = one store transaction; lock, re-read,
//!   check, write, commit, or roll back on any error
//! - **Retry/backoff**: contention signals from the store are retried with
//!   exponential backoff and jitter inside one overall deadline
//! - **Anomaly harness**: dirty read, phantom read and deadlock demos for
//!   verification, kept apart from the production path
//!
//! # Invariants
//!
//! - Money conservation: Σ(balances) is unchanged by any set of transfers
//! - No committed balance is ever negative
//! - A caller gets a completed record or a typed error, never "maybe applied"
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ledger_core::{Account, AccountId, IsolationLevel, MemoryStore};
//! use transfer_engine::{Config, RetryPolicy, TransferRequest, TransferService};
//!
//! fn main() -> transfer_engine::Result<()> {
//!     let store = MemoryStore::with_accounts(
//!         Default::default(),
//!         vec![
//!             Account::new(AccountId::new(1), "ACC-001", "alice", 100_000),
//!             Account::new(AccountId::new(2), "ACC-002", "bob", 50_000),
//!         ],
//!     )?;
//!     let service = TransferService::new(Arc::new(store), &Config::default())?;
//!
//!     let record = service.transfer_funds(
//!         &TransferRequest::new(1u64, 2u64, 1_000),
//!         IsolationLevel::ReadCommitted,
//!         &RetryPolicy::default(),
//!     )?;
//!     println!("Transfer {} completed", record.id);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod harness;
pub mod metrics;
pub mod ordering;
pub mod retry;
pub mod service;
pub mod state;
pub mod telemetry;
pub mod types;

// Re-exports
pub use cancel::CancellationToken;
pub use config::{Config, DemoConfig, LoggingConfig};
pub use coordinator::TransferCoordinator;
pub use error::{Error, Result};
pub use metrics::Metrics;
pub use ordering::lock_order;
pub use retry::{run_with_retry, RetryController, RetryPolicy};
pub use service::TransferService;
pub use state::TransferState;
pub use types::TransferRequest;
