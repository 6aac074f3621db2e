use thiserror::Error;

use pharmastock_core::DomainError;
use pharmastock_inventory::{PersistenceError, StockError};

pub type PurchasingResult<T> = Result<T, PurchasingError>;

/// Failure of a purchasing or receiving operation.
///
/// Unknown ids are not errors: operations report them as `false` / `None`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PurchasingError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The stock ledger refused the receipt.
    #[error(transparent)]
    Stock(#[from] StockError),

    /// The recorder failed; the in-memory change was rolled back.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl PurchasingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Domain(DomainError::validation(msg))
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Domain(DomainError::invariant(msg))
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Domain(DomainError::conflict(msg))
    }
}
