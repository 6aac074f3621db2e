use std::sync::Arc;

use pharmastock_inventory::{PersistenceError, StockEntry};

use super::record::{StockRecord, StoredRecord};

/// Durable, append-only home of stock and purchasing records.
///
/// `persist` is called after the in-memory transition succeeded and before
/// any subscriber is told about it. It must be all-or-nothing: an `Err`
/// means nothing was recorded, and the caller rolls its state back.
pub trait RecordStore: Send + Sync {
    /// Append a record. Returns its sequence number.
    fn persist(&self, record: StockRecord) -> Result<u64, PersistenceError>;

    /// Last persisted quantity of every medicine the ledger has touched.
    fn load_ledger_snapshot(&self) -> Result<Vec<StockEntry>, PersistenceError>;

    /// Every record, in sequence order.
    fn load_records(&self) -> Result<Vec<StoredRecord>, PersistenceError>;
}

impl<S> RecordStore for Arc<S>
where
    S: RecordStore + ?Sized,
{
    fn persist(&self, record: StockRecord) -> Result<u64, PersistenceError> {
        (**self).persist(record)
    }

    fn load_ledger_snapshot(&self) -> Result<Vec<StockEntry>, PersistenceError> {
        (**self).load_ledger_snapshot()
    }

    fn load_records(&self) -> Result<Vec<StoredRecord>, PersistenceError> {
        (**self).load_records()
    }
}
