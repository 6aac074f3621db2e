//! Inventory domain module: the stock ledger and its read-side consumers.
//!
//! - [`StockLedger`] is the single authoritative quantity per medicine.
//! - [`BatchRegistry`] tracks received lots for expiry; it is auxiliary to the
//!   ledger, never authoritative for availability.
//! - [`ValuationCalculator`], [`ExpiryTracker`] and [`StockReconciler`] only
//!   read ledger and batch state.
//!
//! No IO, no HTTP, no storage: persistence is threaded in by callers through
//! the `persist` callbacks on the ledger's durable entry points.

pub mod batch;
pub mod catalog;
pub mod expiry;
pub mod ledger;
pub mod reconcile;
pub mod valuation;

pub use batch::{Batch, BatchRegistry};
pub use catalog::{CatalogService, InMemoryCatalog, Medicine};
pub use expiry::{DEFAULT_EXPIRY_WINDOW_DAYS, ExpiringBatch, ExpiryTracker};
pub use ledger::{
    PersistenceError, StockChanged, StockDelta, StockEntry, StockError, StockLedger,
    StockListener, StockReason, StockSubscription,
};
pub use reconcile::{BatchDrift, Discrepancy, PhysicalCount, ReconciliationReport, StockReconciler};
pub use valuation::{
    InventoryValuation, ValuationCalculator, ValuationItem, ValuationLine, ValuationMethod,
};
