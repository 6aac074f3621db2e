//! Supplier directory port.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use pharmastock_core::SupplierId;

/// Resolves supplier ids to display names.
pub trait SupplierDirectory: Send + Sync {
    fn supplier_name(&self, id: SupplierId) -> Option<String>;
}

impl<S> SupplierDirectory for Arc<S>
where
    S: SupplierDirectory + ?Sized,
{
    fn supplier_name(&self, id: SupplierId) -> Option<String> {
        (**self).supplier_name(id)
    }
}

#[derive(Debug, Default)]
pub struct InMemorySupplierDirectory {
    inner: RwLock<HashMap<SupplierId, String>>,
}

impl InMemorySupplierDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: SupplierId, name: impl Into<String>) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(id, name.into());
    }
}

impl SupplierDirectory for InMemorySupplierDirectory {
    fn supplier_name(&self, id: SupplierId) -> Option<String> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(&id).cloned()
    }
}
