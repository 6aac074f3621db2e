//! Purchasing domain module: purchase orders, reorder rules and goods receiving.
//!
//! - [`PurchaseOrderManager`] owns the purchase-order lifecycle.
//! - [`ReorderEngine`] evaluates reorder rules against the stock ledger and
//!   hands draft orders to the manager.
//! - [`GrnProcessor`] owns goods-received-notes and is the only receiving path
//!   that increments stock.
//!
//! Durability is delegated to a [`PurchasingRecorder`] supplied by the host.

pub mod error;
pub mod grn;
pub mod order;
pub mod recorder;
pub mod reorder;
pub mod supplier;

pub use error::{PurchasingError, PurchasingResult};
pub use grn::{
    Grn, GrnItem, GrnProcessor, GrnStatus, ItemCondition, NewGrn, ReceiptEntry, ReceiptJournal,
    ReceiptRecord, ReceiptState,
};
pub use order::{
    NewPurchaseOrder, NewPurchaseOrderItem, OrderOrigin, PurchaseOrder, PurchaseOrderItem,
    PurchaseOrderManager, PurchaseOrderStatus,
};
pub use recorder::{NoopRecorder, PurchasingRecorder};
pub use reorder::{
    DEFAULT_PURCHASE_TAX_PERCENT, NewReorderRule, ReorderAlert, ReorderEngine, ReorderRule,
};
pub use supplier::{InMemorySupplierDirectory, SupplierDirectory};
