//! Lock ordering
//!
//! Every multi-row lock acquisition in the production path goes through
//! [`lock_order`]. Two transfers touching the same pair therefore always ask
//! for the lower id first, and no wait-for cycle can form between them.

use ledger_core::AccountId;

/// Order two account ids so that `first <= second`
pub fn lock_order(a: AccountId, b: AccountId) -> (AccountId, AccountId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
