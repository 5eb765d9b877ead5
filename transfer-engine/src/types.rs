//! Request types accepted by the engine

use crate::{Error, Result};
use ledger_core::AccountId;
use serde::{Deserialize, Serialize};

/// Account-to-account transfer request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Debited account
    pub from: AccountId,
    /// Credited account
    pub to: AccountId,
    /// Amount in minor units
    pub amount: i64,
}

impl TransferRequest {
    /// Create a new request
    pub fn new(from: impl Into<AccountId>, to: impl Into<AccountId>, amount: i64) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            amount,
        }
    }

    /// Reject malformed requests before any lock is attempted
    pub fn validate(&self) -> Result<()> {
        if self.amount <= 0 {
            return Err(Error::Validation(format!(
                "Amount must be positive, got {}",
                self.amount
            )));
        }
        if self.from == self.to {
            return Err(Error::Validation(format!(
                "Source and destination are the same account: {}",
                self.from
            )));
        }
        Ok(())
    }
}

/// Validate a single-account movement amount
pub(crate) fn validate_amount(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(Error::Validation(format!(
            "Amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}
