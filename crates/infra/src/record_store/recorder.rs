use std::sync::Arc;

use pharmastock_inventory::PersistenceError;
use pharmastock_purchasing::{
    Grn, PurchaseOrder, PurchasingRecorder, ReceiptEntry, ReceiptRecord, ReorderRule,
};

use super::record::{RecordBody, StockRecord};
use super::r#trait::RecordStore;

/// [`PurchasingRecorder`] that appends to a [`RecordStore`].
#[derive(Clone)]
pub struct StoreRecorder {
    store: Arc<dyn RecordStore>,
}

impl core::fmt::Debug for StoreRecorder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StoreRecorder").finish_non_exhaustive()
    }
}

impl StoreRecorder {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    fn append(&self, body: RecordBody) -> Result<(), PersistenceError> {
        self.store.persist(StockRecord::now(body)).map(|_| ())
    }
}

impl PurchasingRecorder for StoreRecorder {
    fn order_saved(&self, order: &PurchaseOrder) -> Result<(), PersistenceError> {
        self.append(RecordBody::OrderSaved(order.clone()))
    }

    fn rule_saved(&self, rule: &ReorderRule) -> Result<(), PersistenceError> {
        self.append(RecordBody::RuleSaved(rule.clone()))
    }

    fn grn_saved(&self, grn: &Grn) -> Result<(), PersistenceError> {
        self.append(RecordBody::GrnSaved(grn.clone()))
    }

    fn receipt_staged(&self, entry: &ReceiptEntry) -> Result<(), PersistenceError> {
        self.append(RecordBody::ReceiptStaged(entry.clone()))
    }

    fn receipt_committed(&self, receipt: &ReceiptRecord) -> Result<(), PersistenceError> {
        self.append(RecordBody::ReceiptCommitted(receipt.clone()))
    }
}
