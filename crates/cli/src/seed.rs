//! Catalog and supplier seed file, plus the record-store file.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use pharmastock_core::SupplierId;
use pharmastock_infra::InMemoryRecordStore;
use pharmastock_inventory::{InMemoryCatalog, Medicine};
use pharmastock_purchasing::InMemorySupplierDirectory;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub medicines: Vec<Medicine>,
    #[serde(default)]
    pub suppliers: Vec<SupplierSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierSeed {
    pub id: SupplierId,
    pub name: String,
}

impl Seed {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading seed file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing seed file {}", path.display()))
    }

    pub fn catalog(&self) -> Arc<InMemoryCatalog> {
        Arc::new(InMemoryCatalog::with_medicines(self.medicines.iter().cloned()))
    }

    pub fn suppliers(&self) -> Arc<InMemorySupplierDirectory> {
        let directory = InMemorySupplierDirectory::new();
        for supplier in &self.suppliers {
            directory.insert(supplier.id, supplier.name.clone());
        }
        Arc::new(directory)
    }
}

/// Load the record store from `path`; a missing file is an empty store.
pub fn load_store(path: &Path) -> Result<InMemoryRecordStore> {
    if !path.exists() {
        return Ok(InMemoryRecordStore::new());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading record store {}", path.display()))?;
    InMemoryRecordStore::from_json(&raw)
        .with_context(|| format!("parsing record store {}", path.display()))
}

pub fn save_store(store: &InMemoryRecordStore, path: &Path) -> Result<()> {
    let json = store.to_json().context("serializing record store")?;
    fs::write(path, json).with_context(|| format!("writing record store {}", path.display()))
}
