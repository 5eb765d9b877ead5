//! Deliberately unordered transfer
//!
//! Locks `from` first and `to` second, whatever their ids. Two of these
//! running in opposite directions over the same pair can deadlock, which is
//! exactly what the deadlock demo needs. Production transfers go through
//! [`crate::TransferCoordinator::execute`] instead.

use crate::{
    cancel::CancellationToken, coordinator::TransferCoordinator, types::TransferRequest, Result,
};
use ledger_core::{AccountId, IsolationLevel, TransferRecord};

/// One transfer attempt locking `from` before `to`.
///
/// `after_first_lock` runs while only `from` is locked; the deadlock demo
/// uses it as a rendezvous point.
pub fn transfer_unordered<H>(
    coordinator: &TransferCoordinator,
    request: &TransferRequest,
    isolation: IsolationLevel,
    token: &CancellationToken,
    after_first_lock: H,
) -> Result<TransferRecord>
where
    H: FnOnce(AccountId) -> Result<()>,
{
    coordinator.execute_locking(
        request,
        isolation,
        token,
        [request.from, request.to],
        after_first_lock,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{Account, Config, LedgerStore, MemoryStore};
    use std::sync::Arc;

    #[test]
    fn test_locks_source_first() {
        let store = Arc::new(
            MemoryStore::with_accounts(
                Config::default(),
                vec![
                    Account::new(AccountId::new(1), "ACC-001", "alice", 100),
                    Account::new(AccountId::new(2), "ACC-002", "bob", 100),
                ],
            )
            .unwrap(),
        );
        let coordinator = TransferCoordinator::new(store.clone());
        let mut first_locked = None;

        transfer_unordered(
            &coordinator,
            &TransferRequest::new(2u64, 1u64, 30),
            IsolationLevel::ReadCommitted,
            &CancellationToken::new(),
            |account| {
                first_locked = Some(account);
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(first_locked, Some(AccountId::new(2)));
        assert_eq!(store.get_account(AccountId::new(1)).unwrap().balance, 130);
        assert_eq!(store.held_locks(), 0);
    }
}
