//! Infrastructure layer: configuration, the record store and the service
//! context that wires the inventory and purchasing components together.

pub mod config;
pub mod error;
pub mod record_store;
pub mod service;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, StockConfig};
pub use error::ServiceError;
pub use record_store::{
    InMemoryRecordStore, RecordBody, RecordStore, RecoveredState, StockRecord, StoreRecorder,
    StoredRecord,
};
pub use service::StockService;
