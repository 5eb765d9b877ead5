//! DelTran Ledger Core
//!
//! Transactional account store consumed by the transfer engine.
//!
//! # Architecture
//!
//! - **Contract**: [`LedgerStore`] / [`StoreTransaction`] are the only way
//!   callers touch rows
//! - **Row locks**: exclusive, held until commit or rollback
//! - **Deadlock detection**: wait-for walk before every blocking lock request
//! - **Isolation**: read uncommitted, read committed, serializable (snapshot,
//!   first updater wins)
//!
//! # Invariants
//!
//! - Committed balances are never negative
//! - A transaction's writes become visible all at once, or never
//! - No lock outlives the transaction that took it

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod fault;
pub mod memory;
pub mod store;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use fault::FaultInjectingStore;
pub use memory::{MemoryStore, MemoryTransaction};
pub use store::{LedgerStore, Predicate, StoreTransaction};
pub use types::{
    Account, AccountId, IsolationLevel, TransferKind, TransferRecord, TransferStatus, TxnId,
};
