use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::Utc;

use pharmastock_core::MedicineId;
use pharmastock_inventory::{PersistenceError, StockEntry};

use super::record::{StockRecord, StoredRecord};
use super::r#trait::RecordStore;

#[derive(Debug, Default)]
struct Inner {
    records: Vec<StoredRecord>,
    levels: HashMap<MedicineId, i64>,
}

impl Inner {
    fn apply_levels(&mut self, record: &StockRecord) {
        for change in record.stock_changes() {
            self.levels.insert(change.medicine_id, change.new_quantity);
        }
    }
}

/// In-memory append-only record store.
///
/// Intended for tests, dry runs and the CLI, which moves its contents in and
/// out of a JSON file. Writes can be switched off to exercise rollback paths.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    inner: RwLock<Inner>,
    unavailable: AtomicBool,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `persist` fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize every stored record as a JSON array.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_string_pretty(&inner.records)
    }

    /// Rebuild a store from [`InMemoryRecordStore::to_json`] output.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut records: Vec<StoredRecord> = serde_json::from_str(json)?;
        records.sort_by_key(|r| r.sequence_number());

        let mut inner = Inner::default();
        for record in &records {
            inner.apply_levels(record.payload());
        }
        inner.records = records;

        Ok(Self {
            inner: RwLock::new(inner),
            unavailable: AtomicBool::new(false),
        })
    }
}

impl RecordStore for InMemoryRecordStore {
    fn persist(&self, record: StockRecord) -> Result<u64, PersistenceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PersistenceError::new("record store unavailable"));
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let sequence_number = inner
            .records
            .last()
            .map(|r| r.sequence_number())
            .unwrap_or(0)
            + 1;
        inner.apply_levels(&record);
        inner
            .records
            .push(StoredRecord::wrap(sequence_number, Utc::now(), record));
        Ok(sequence_number)
    }

    fn load_ledger_snapshot(&self) -> Result<Vec<StockEntry>, PersistenceError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<StockEntry> = inner
            .levels
            .iter()
            .map(|(medicine_id, quantity)| StockEntry {
                medicine_id: *medicine_id,
                quantity: *quantity,
            })
            .collect();
        entries.sort_by_key(|e| e.medicine_id);
        Ok(entries)
    }

    fn load_records(&self) -> Result<Vec<StoredRecord>, PersistenceError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.records.clone())
    }
}
