use thiserror::Error;

use pharmastock_core::DomainError;
use pharmastock_inventory::{PersistenceError, StockError};
use pharmastock_purchasing::PurchasingError;

use crate::config::ConfigError;

/// Error surfaced by [`crate::StockService`] operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Stock(#[from] StockError),

    #[error(transparent)]
    Purchasing(#[from] PurchasingError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ServiceError {
    /// Whether the failure was a record-store write that got rolled back.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            Self::Persistence(_)
                | Self::Stock(StockError::Persistence(_))
                | Self::Purchasing(PurchasingError::Persistence(_))
                | Self::Purchasing(PurchasingError::Stock(StockError::Persistence(_)))
        )
    }
}
