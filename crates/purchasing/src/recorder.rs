//! Durability port for purchasing state.
//!
//! Every call happens after the in-memory transition succeeded. An `Err`
//! makes the caller roll the transition back, so implementations must not
//! leave a partial write behind when they fail.

use std::sync::Arc;

use pharmastock_inventory::PersistenceError;

use crate::grn::{Grn, ReceiptEntry, ReceiptRecord};
use crate::order::PurchaseOrder;
use crate::reorder::ReorderRule;

pub trait PurchasingRecorder: Send + Sync {
    /// A purchase order was created or changed status.
    fn order_saved(&self, order: &PurchaseOrder) -> Result<(), PersistenceError>;

    /// A reorder rule was created, deactivated or triggered.
    fn rule_saved(&self, rule: &ReorderRule) -> Result<(), PersistenceError>;

    /// A goods-received-note was created.
    fn grn_saved(&self, grn: &Grn) -> Result<(), PersistenceError>;

    /// A receipt was staged in the journal, before any stock moved.
    fn receipt_staged(&self, entry: &ReceiptEntry) -> Result<(), PersistenceError>;

    /// A receipt's stock, batch and order-status effects, as one record.
    fn receipt_committed(&self, receipt: &ReceiptRecord) -> Result<(), PersistenceError>;
}

impl<R> PurchasingRecorder for Arc<R>
where
    R: PurchasingRecorder + ?Sized,
{
    fn order_saved(&self, order: &PurchaseOrder) -> Result<(), PersistenceError> {
        (**self).order_saved(order)
    }

    fn rule_saved(&self, rule: &ReorderRule) -> Result<(), PersistenceError> {
        (**self).rule_saved(rule)
    }

    fn grn_saved(&self, grn: &Grn) -> Result<(), PersistenceError> {
        (**self).grn_saved(grn)
    }

    fn receipt_staged(&self, entry: &ReceiptEntry) -> Result<(), PersistenceError> {
        (**self).receipt_staged(entry)
    }

    fn receipt_committed(&self, receipt: &ReceiptRecord) -> Result<(), PersistenceError> {
        (**self).receipt_committed(receipt)
    }
}

/// Recorder for purely in-memory use (tests, dry runs).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl PurchasingRecorder for NoopRecorder {
    fn order_saved(&self, _order: &PurchaseOrder) -> Result<(), PersistenceError> {
        Ok(())
    }

    fn rule_saved(&self, _rule: &ReorderRule) -> Result<(), PersistenceError> {
        Ok(())
    }

    fn grn_saved(&self, _grn: &Grn) -> Result<(), PersistenceError> {
        Ok(())
    }

    fn receipt_staged(&self, _entry: &ReceiptEntry) -> Result<(), PersistenceError> {
        Ok(())
    }

    fn receipt_committed(&self, _receipt: &ReceiptRecord) -> Result<(), PersistenceError> {
        Ok(())
    }
}
