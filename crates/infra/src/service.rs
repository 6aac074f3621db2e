//! Application service context.
//!
//! `StockService` wires one ledger, batch registry, order manager, reorder
//! engine and GRN processor around a record store, restores them from it on
//! open and exposes the query and command surface a host (HTTP, CLI, UI)
//! fronts.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

use pharmastock_core::{
    DomainError, DomainResult, GrnId, MedicineId, PurchaseOrderId, ReorderRuleId,
};
use pharmastock_inventory::{
    BatchDrift, BatchRegistry, CatalogService, ExpiringBatch, ExpiryTracker, InventoryValuation,
    PersistenceError, PhysicalCount, ReconciliationReport, StockChanged, StockDelta, StockEntry,
    StockLedger, StockReason, StockReconciler, StockSubscription, ValuationCalculator,
    ValuationMethod,
};
use pharmastock_purchasing::{
    Grn, GrnProcessor, NewGrn, NewPurchaseOrder, NewReorderRule, PurchaseOrder,
    PurchaseOrderManager, PurchaseOrderStatus, PurchasingRecorder, ReorderAlert, ReorderEngine,
    ReorderRule, SupplierDirectory,
};

use crate::config::StockConfig;
use crate::error::ServiceError;
use crate::record_store::{RecordBody, RecordStore, RecoveredState, StockRecord, StoreRecorder};

pub struct StockService {
    config: StockConfig,
    catalog: Arc<dyn CatalogService>,
    store: Arc<dyn RecordStore>,
    ledger: Arc<StockLedger>,
    batches: Arc<BatchRegistry>,
    orders: Arc<PurchaseOrderManager>,
    reorder: Arc<ReorderEngine>,
    receiving: GrnProcessor,
    expiry: ExpiryTracker,
    reorder_subscription: Option<StockSubscription>,
}

impl core::fmt::Debug for StockService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StockService")
            .field("config", &self.config)
            .field("orders", &self.orders)
            .field("receiving", &self.receiving)
            .finish_non_exhaustive()
    }
}

impl StockService {
    /// Build every component and restore it from `store`.
    ///
    /// Receipts that were staged but never committed are replayed before the
    /// service is returned.
    pub fn open(
        config: StockConfig,
        catalog: Arc<dyn CatalogService>,
        suppliers: Arc<dyn SupplierDirectory>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self, ServiceError> {
        let ledger = Arc::new(StockLedger::from_snapshot(store.load_ledger_snapshot()?)?);
        let recovered = RecoveredState::from_records(&store.load_records()?);
        let pending = recovered.pending_receipts();

        let recorder: Arc<dyn PurchasingRecorder> = Arc::new(StoreRecorder::new(store.clone()));

        let batches = Arc::new(BatchRegistry::new());
        batches.add_all(recovered.batches)?;

        let orders = Arc::new(PurchaseOrderManager::new(suppliers, recorder.clone()));
        orders.restore(recovered.orders);

        let reorder = Arc::new(
            ReorderEngine::new(ledger.clone(), orders.clone(), recorder.clone())
                .with_tax_rate(config.reorder_tax_rate)
                .with_auto_send(config.auto_send_reorders),
        );
        reorder.restore(recovered.rules);

        let receiving = GrnProcessor::new(ledger.clone(), batches.clone(), orders.clone(), recorder);
        receiving.restore(recovered.grns, recovered.journal);

        let reorder_subscription = config
            .reorder_on_change
            .then(|| watch_stock(&ledger, &reorder, catalog.clone()));

        let replayed = receiving.replay_pending();
        if replayed < pending {
            warn!(pending, replayed, "some staged receipts could not be replayed");
        }

        info!(
            medicines = ledger.snapshot().len(),
            orders = orders.list().len(),
            rules = reorder.rules().len(),
            replayed,
            "stock service opened"
        );

        Ok(Self {
            expiry: ExpiryTracker::new(config.expiry_window_days),
            config,
            catalog,
            store,
            ledger,
            batches,
            orders,
            reorder,
            receiving,
            reorder_subscription,
        })
    }

    pub fn config(&self) -> &StockConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<StockLedger> {
        &self.ledger
    }

    // Queries

    pub fn stock(&self, medicine_id: MedicineId) -> i64 {
        self.ledger.get_quantity(medicine_id)
    }

    pub fn stock_levels(&self) -> Vec<StockEntry> {
        self.ledger.snapshot()
    }

    pub fn valuation(&self, method: ValuationMethod) -> InventoryValuation {
        ValuationCalculator::valuate_ledger(&self.ledger, &self.catalog.medicines(), method)
    }

    pub fn reorder_alerts(&self) -> Vec<ReorderAlert> {
        self.reorder.alerts(&self.catalog.medicines())
    }

    pub fn reorder_rules(&self) -> Vec<ReorderRule> {
        self.reorder.rules()
    }

    pub fn purchase_orders(&self) -> Vec<PurchaseOrder> {
        self.orders.list()
    }

    pub fn purchase_orders_by_status(&self, status: PurchaseOrderStatus) -> Vec<PurchaseOrder> {
        self.orders.list_by_status(status)
    }

    pub fn purchase_order(&self, id: PurchaseOrderId) -> Option<PurchaseOrder> {
        self.orders.get(id)
    }

    pub fn grns(&self) -> Vec<Grn> {
        self.receiving.list_grns()
    }

    pub fn grn(&self, id: GrnId) -> Option<Grn> {
        self.receiving.get_grn(id)
    }

    pub fn grns_for_order(&self, id: PurchaseOrderId) -> Vec<Grn> {
        self.receiving.grns_for_order(id)
    }

    /// Batches within the configured expiry window of `today`.
    pub fn expiring_batches(&self, today: NaiveDate) -> Vec<ExpiringBatch> {
        ExpiryTracker::batches_near_expiry(
            &self.batches,
            &self.catalog.medicines(),
            self.expiry.window_days(),
            today,
        )
    }

    pub fn expired_batches(&self, today: NaiveDate) -> Vec<ExpiringBatch> {
        ExpiryTracker::expired_batches(&self.batches, &self.catalog.medicines(), today)
    }

    /// Compare a physical count with the ledger without changing anything.
    pub fn reconciliation_report(&self, counts: &[PhysicalCount]) -> DomainResult<ReconciliationReport> {
        StockReconciler::reconcile(&self.ledger, counts)
    }

    pub fn batch_drift(&self) -> Vec<BatchDrift> {
        StockReconciler::batch_drift(&self.ledger, &self.batches)
    }

    // Commands

    /// Adjust stock for a sale, return or manual edit. Returns the new quantity.
    ///
    /// Receipts go through GRN processing and reconciliations through
    /// [`StockService::confirm_reconciliation`]; both reasons are refused here.
    pub fn adjust_stock(
        &self,
        medicine_id: MedicineId,
        delta: i64,
        reason: StockReason,
    ) -> Result<i64, ServiceError> {
        if matches!(reason, StockReason::Receipt | StockReason::Reconciliation) {
            return Err(DomainError::validation(format!(
                "{reason} adjustments cannot be made directly"
            ))
            .into());
        }
        if self.catalog.get_medicine(medicine_id).is_none() {
            return Err(DomainError::validation(format!("unknown medicine {medicine_id}")).into());
        }

        let quantity = self.ledger.adjust_durable(medicine_id, delta, reason, |change| {
            self.persist_changes(std::slice::from_ref(change))
        })?;
        Ok(quantity)
    }

    pub fn create_purchase_order(&self, new: NewPurchaseOrder) -> Result<PurchaseOrder, ServiceError> {
        Ok(self.orders.create(new)?)
    }

    /// `Ok(false)` for unknown orders.
    pub fn update_order_status(
        &self,
        id: PurchaseOrderId,
        status: PurchaseOrderStatus,
    ) -> Result<bool, ServiceError> {
        Ok(self.orders.update_status(id, status)?)
    }

    /// `Ok(false)` for unknown orders.
    pub fn cancel_purchase_order(&self, id: PurchaseOrderId) -> Result<bool, ServiceError> {
        Ok(self.orders.cancel(id)?)
    }

    /// Record a delivery without applying it.
    pub fn record_delivery(&self, new: NewGrn) -> Result<Grn, ServiceError> {
        Ok(self.receiving.create_grn(new)?)
    }

    /// Apply a recorded delivery. `Ok(false)` for unknown GRNs.
    pub fn process_grn(&self, id: GrnId) -> Result<bool, ServiceError> {
        Ok(self.receiving.process(id, self.catalog.as_ref())?)
    }

    /// Record and apply a delivery in one call.
    ///
    /// If processing fails the GRN stays recorded and can be processed again.
    pub fn receive_goods(&self, new: NewGrn) -> Result<Grn, ServiceError> {
        let grn = self.receiving.create_grn(new)?;
        self.receiving.process(grn.id, self.catalog.as_ref())?;
        Ok(grn)
    }

    pub fn create_reorder_rule(&self, new: NewReorderRule) -> Result<ReorderRule, ServiceError> {
        if self.catalog.get_medicine(new.medicine_id).is_none() {
            return Err(DomainError::validation(format!("unknown medicine {}", new.medicine_id)).into());
        }
        Ok(self.reorder.create_rule(new)?)
    }

    /// `Ok(false)` for unknown rules.
    pub fn deactivate_reorder_rule(&self, id: ReorderRuleId) -> Result<bool, ServiceError> {
        Ok(self.reorder.deactivate_rule(id)?)
    }

    /// Evaluate every rule against the whole catalog.
    pub fn run_reorder(&self, now: DateTime<Utc>) -> Vec<PurchaseOrder> {
        self.reorder.evaluate(&self.catalog.medicines(), now)
    }

    /// Bring the ledger in line with a physical count.
    ///
    /// Every discrepancy becomes a `Reconciliation` adjustment, committed and
    /// persisted together. Returns the report the adjustments came from.
    pub fn confirm_reconciliation(
        &self,
        counts: &[PhysicalCount],
    ) -> Result<ReconciliationReport, ServiceError> {
        let report = StockReconciler::reconcile(&self.ledger, counts)?;
        let deltas: Vec<StockDelta> = report
            .discrepancies
            .iter()
            .map(|d| StockDelta {
                medicine_id: d.medicine_id,
                delta: d.variance,
            })
            .collect();

        let changes = self
            .ledger
            .apply_batch(&deltas, StockReason::Reconciliation, |changes| {
                self.persist_changes(changes)
            })?;
        info!(adjustments = changes.len(), "reconciliation confirmed");
        Ok(report)
    }

    fn persist_changes(&self, changes: &[StockChanged]) -> Result<(), PersistenceError> {
        self.store
            .persist(StockRecord::now(RecordBody::StockChanged(changes.to_vec())))
            .map(|_| ())
    }
}

impl Drop for StockService {
    fn drop(&mut self) {
        if let Some(subscription) = self.reorder_subscription.take() {
            subscription.unsubscribe();
        }
    }
}

/// Re-evaluate a medicine's reorder rule whenever its stock drops.
fn watch_stock(
    ledger: &StockLedger,
    reorder: &Arc<ReorderEngine>,
    catalog: Arc<dyn CatalogService>,
) -> StockSubscription {
    let engine = Arc::downgrade(reorder);
    ledger.subscribe(move |change| {
        if !change.is_decrease() {
            return Ok(());
        }
        let Some(engine) = engine.upgrade() else {
            return Ok(());
        };
        let Some(medicine) = catalog.get_medicine(change.medicine_id) else {
            return Ok(());
        };
        if let Some(order) = engine.evaluate_change(change, &medicine, Utc::now())? {
            info!(order_id = %order.id, medicine_id = %medicine.id, "low stock reorder drafted");
        }
        Ok(())
    })
}
