//! Catalog collaborator port.
//!
//! The catalog owns medicine identity and pricing. This subsystem only reads
//! it and never invents catalog fields.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pharmastock_core::MedicineId;

/// A catalog medicine as seen by the stock subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medicine {
    pub id: MedicineId,
    pub name: String,
    pub category: String,
    pub purchase_price: Decimal,
    pub sale_price: Decimal,
}

/// Read-only access to the medicine catalog.
pub trait CatalogService: Send + Sync {
    fn get_medicine(&self, id: MedicineId) -> Option<Medicine>;

    /// Every medicine in the catalog, in a stable order.
    fn medicines(&self) -> Vec<Medicine>;
}

impl<S> CatalogService for Arc<S>
where
    S: CatalogService + ?Sized,
{
    fn get_medicine(&self, id: MedicineId) -> Option<Medicine> {
        (**self).get_medicine(id)
    }

    fn medicines(&self) -> Vec<Medicine> {
        (**self).medicines()
    }
}

/// In-memory catalog for tests, seeding and the CLI.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    inner: RwLock<HashMap<MedicineId, Medicine>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_medicines(medicines: impl IntoIterator<Item = Medicine>) -> Self {
        let catalog = Self::new();
        for medicine in medicines {
            catalog.upsert(medicine);
        }
        catalog
    }

    pub fn upsert(&self, medicine: Medicine) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(medicine.id, medicine);
    }
}

impl CatalogService for InMemoryCatalog {
    fn get_medicine(&self, id: MedicineId) -> Option<Medicine> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(&id).cloned()
    }

    fn medicines(&self) -> Vec<Medicine> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<Medicine> = map.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        all
    }
}
