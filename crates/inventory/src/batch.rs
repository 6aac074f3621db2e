//! Batch (lot) registry.
//!
//! Batches record dated receipts for expiry tracking. The ledger quantity is
//! authoritative for availability; batch sums are allowed to drift from it
//! (manual edits and sales move the ledger without touching batches) and the
//! drift is reported by `StockReconciler::batch_drift`, never auto-corrected.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use pharmastock_core::{DomainError, DomainResult, MedicineId};

/// A dated, quantity-bounded receipt of one medicine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub medicine_id: MedicineId,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    pub quantity: i64,
    pub received_date: DateTime<Utc>,
}

impl Batch {
    pub fn validate(&self) -> DomainResult<()> {
        if self.batch_number.trim().is_empty() {
            return Err(DomainError::validation("batch number cannot be empty"));
        }
        if self.quantity <= 0 {
            return Err(DomainError::validation(format!(
                "batch {} quantity must be positive",
                self.batch_number
            )));
        }
        Ok(())
    }
}

/// Per-medicine list of batches, in receipt order.
#[derive(Debug, Default)]
pub struct BatchRegistry {
    inner: RwLock<HashMap<MedicineId, Vec<Batch>>>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, batch: Batch) -> DomainResult<()> {
        self.add_all(vec![batch])
    }

    /// Append several batches; nothing is added unless all are valid.
    pub fn add_all(&self, batches: Vec<Batch>) -> DomainResult<()> {
        for batch in &batches {
            batch.validate()?;
        }

        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for batch in batches {
            map.entry(batch.medicine_id).or_default().push(batch);
        }
        Ok(())
    }

    pub fn batches_for(&self, medicine_id: MedicineId) -> Vec<Batch> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(&medicine_id).cloned().unwrap_or_default()
    }

    /// Sum of batch quantities for one medicine.
    pub fn total_for(&self, medicine_id: MedicineId) -> i64 {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(&medicine_id)
            .map(|batches| batches.iter().map(|b| b.quantity).sum())
            .unwrap_or(0)
    }

    /// Medicines with at least one batch.
    pub fn medicine_ids(&self) -> Vec<MedicineId> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<MedicineId> = map.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn all(&self) -> Vec<Batch> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<Batch> = map.values().flatten().cloned().collect();
        all.sort_by(|a, b| {
            a.medicine_id
                .cmp(&b.medicine_id)
                .then(a.received_date.cmp(&b.received_date))
        });
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(medicine_id: MedicineId, number: &str, quantity: i64) -> Batch {
        Batch {
            medicine_id,
            batch_number: number.to_string(),
            expiry_date: NaiveDate::from_ymd_opt(2027, 1, 31).unwrap(),
            quantity,
            received_date: Utc::now(),
        }
    }

    #[test]
    fn batches_accumulate_per_medicine() {
        let registry = BatchRegistry::new();
        let id = MedicineId::new();

        registry.add(batch(id, "LOT-1", 60)).unwrap();
        registry.add(batch(id, "LOT-2", 40)).unwrap();

        assert_eq!(registry.batches_for(id).len(), 2);
        assert_eq!(registry.total_for(id), 100);
        assert_eq!(registry.medicine_ids(), vec![id]);
    }

    #[test]
    fn invalid_batch_rejects_the_whole_group() {
        let registry = BatchRegistry::new();
        let id = MedicineId::new();

        let err = registry
            .add_all(vec![batch(id, "LOT-1", 10), batch(id, " ", 5)])
            .unwrap_err();

        assert!(matches!(err, DomainError::Validation(_)));
        assert!(registry.all().is_empty());
    }

    #[test]
    fn unknown_medicine_has_no_batches() {
        let registry = BatchRegistry::new();
        assert!(registry.batches_for(MedicineId::new()).is_empty());
        assert_eq!(registry.total_for(MedicineId::new()), 0);
    }
}
