//! Reorder rules and their evaluation against the stock ledger.
//!
//! A rule fires whenever the ledger quantity is at or below its minimum
//! threshold. Firing drafts one purchase order for the rule's reorder
//! quantity and stamps `last_triggered`. The stamp only lets the UI avoid
//! re-surfacing the same alert: a later evaluation that still finds low stock
//! drafts another order, so genuinely low stock is never suppressed.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use pharmastock_core::{Entity, MedicineId, ReorderRuleId, SupplierId};
use pharmastock_inventory::{Medicine, StockChanged, StockLedger};

use crate::error::{PurchasingError, PurchasingResult};
use crate::order::{
    NewPurchaseOrder, NewPurchaseOrderItem, OrderOrigin, PurchaseOrder, PurchaseOrderManager,
    PurchaseOrderStatus,
};
use crate::recorder::PurchasingRecorder;

/// Flat purchase-side tax applied to reorder subtotals, in percent.
pub const DEFAULT_PURCHASE_TAX_PERCENT: i64 = 17;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderRule {
    pub id: ReorderRuleId,
    pub medicine_id: MedicineId,
    pub min_threshold: i64,
    pub max_threshold: i64,
    pub reorder_quantity: i64,
    pub supplier_id: SupplierId,
    pub is_active: bool,
    pub last_triggered: Option<DateTime<Utc>>,
}

impl ReorderRule {
    pub fn is_triggered_by(&self, quantity: i64) -> bool {
        self.is_active && quantity <= self.min_threshold
    }
}

impl Entity for ReorderRule {
    type Id = ReorderRuleId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReorderRule {
    pub medicine_id: MedicineId,
    pub min_threshold: i64,
    pub max_threshold: i64,
    pub reorder_quantity: i64,
    pub supplier_id: SupplierId,
}

/// Read-only low-stock view for the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderAlert {
    pub rule_id: ReorderRuleId,
    pub medicine_id: MedicineId,
    pub medicine_name: String,
    pub current_quantity: i64,
    pub min_threshold: i64,
    pub reorder_quantity: i64,
    pub last_triggered: Option<DateTime<Utc>>,
}

pub struct ReorderEngine {
    ledger: Arc<StockLedger>,
    orders: Arc<PurchaseOrderManager>,
    recorder: Arc<dyn PurchasingRecorder>,
    rules: RwLock<HashMap<ReorderRuleId, ReorderRule>>,
    tax_rate: Decimal,
    auto_send: bool,
}

impl core::fmt::Debug for ReorderEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReorderEngine")
            .field("tax_rate", &self.tax_rate)
            .field("auto_send", &self.auto_send)
            .finish_non_exhaustive()
    }
}

impl ReorderEngine {
    pub fn new(
        ledger: Arc<StockLedger>,
        orders: Arc<PurchaseOrderManager>,
        recorder: Arc<dyn PurchasingRecorder>,
    ) -> Self {
        Self {
            ledger,
            orders,
            recorder,
            rules: RwLock::new(HashMap::new()),
            tax_rate: Decimal::new(DEFAULT_PURCHASE_TAX_PERCENT, 2),
            auto_send: false,
        }
    }

    /// Override the flat purchase tax rate (fraction, e.g. `0.17`).
    pub fn with_tax_rate(mut self, tax_rate: Decimal) -> Self {
        self.tax_rate = tax_rate;
        self
    }

    /// Promote generated orders straight from `draft` to `sent`.
    pub fn with_auto_send(mut self, auto_send: bool) -> Self {
        self.auto_send = auto_send;
        self
    }

    pub fn restore(&self, rules: impl IntoIterator<Item = ReorderRule>) {
        let mut map = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        for rule in rules {
            map.insert(rule.id, rule);
        }
    }

    /// Create an active rule. At most one active rule per medicine.
    pub fn create_rule(&self, new: NewReorderRule) -> PurchasingResult<ReorderRule> {
        if new.min_threshold < 0 {
            return Err(PurchasingError::validation("minimum threshold cannot be negative"));
        }
        if new.max_threshold < new.min_threshold {
            return Err(PurchasingError::validation(
                "maximum threshold cannot be below the minimum threshold",
            ));
        }
        if new.reorder_quantity <= 0 {
            return Err(PurchasingError::validation("reorder quantity must be positive"));
        }

        let rule = {
            let mut rules = self.write();
            if rules
                .values()
                .any(|r| r.is_active && r.medicine_id == new.medicine_id)
            {
                return Err(PurchasingError::conflict(format!(
                    "medicine {} already has an active reorder rule",
                    new.medicine_id
                )));
            }

            let rule = ReorderRule {
                id: ReorderRuleId::new(),
                medicine_id: new.medicine_id,
                min_threshold: new.min_threshold,
                max_threshold: new.max_threshold,
                reorder_quantity: new.reorder_quantity,
                supplier_id: new.supplier_id,
                is_active: true,
                last_triggered: None,
            };
            rules.insert(rule.id, rule.clone());
            rule
        };

        if let Err(err) = self.recorder.rule_saved(&rule) {
            self.write().remove(&rule.id);
            error!(rule_id = %rule.id, error = %err, "reorder rule creation rolled back");
            return Err(err.into());
        }
        info!(rule_id = %rule.id, medicine_id = %rule.medicine_id, "reorder rule created");
        Ok(rule)
    }

    /// Deactivate a rule. `Ok(false)` if the id is unknown.
    pub fn deactivate_rule(&self, id: ReorderRuleId) -> PurchasingResult<bool> {
        let deactivated = {
            let mut rules = self.write();
            let Some(rule) = rules.get_mut(&id) else {
                return Ok(false);
            };
            if !rule.is_active {
                return Ok(true);
            }
            rule.is_active = false;
            rule.clone()
        };

        if let Err(err) = self.recorder.rule_saved(&deactivated) {
            if let Some(rule) = self.write().get_mut(&id) {
                rule.is_active = true;
            }
            error!(rule_id = %id, error = %err, "reorder rule deactivation rolled back");
            return Err(err.into());
        }
        info!(rule_id = %id, "reorder rule deactivated");
        Ok(true)
    }

    pub fn rule(&self, id: ReorderRuleId) -> Option<ReorderRule> {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        rules.get(&id).cloned()
    }

    pub fn rules(&self) -> Vec<ReorderRule> {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<ReorderRule> = rules.values().cloned().collect();
        all.sort_by_key(|r| r.id);
        all
    }

    /// Active rules currently at or below threshold. Creates nothing.
    pub fn alerts(&self, medicines: &[Medicine]) -> Vec<ReorderAlert> {
        let by_id: HashMap<MedicineId, &Medicine> = medicines.iter().map(|m| (m.id, m)).collect();
        self.rules()
            .into_iter()
            .filter_map(|rule| {
                let medicine = by_id.get(&rule.medicine_id)?;
                let current_quantity = self.ledger.get_quantity(rule.medicine_id);
                rule.is_triggered_by(current_quantity).then(|| ReorderAlert {
                    rule_id: rule.id,
                    medicine_id: rule.medicine_id,
                    medicine_name: medicine.name.clone(),
                    current_quantity,
                    min_threshold: rule.min_threshold,
                    reorder_quantity: rule.reorder_quantity,
                    last_triggered: rule.last_triggered,
                })
            })
            .collect()
    }

    /// Draft one purchase order per triggered rule.
    ///
    /// Rules whose medicine is missing from `medicines` are skipped, since the
    /// purchase price would be unknown. A rule whose order cannot be created
    /// is logged and skipped; the remaining rules are still evaluated.
    pub fn evaluate(&self, medicines: &[Medicine], now: DateTime<Utc>) -> Vec<PurchaseOrder> {
        let by_id: HashMap<MedicineId, &Medicine> = medicines.iter().map(|m| (m.id, m)).collect();
        let mut generated = Vec::new();

        for rule in self.rules().into_iter().filter(|r| r.is_active) {
            let Some(medicine) = by_id.get(&rule.medicine_id) else {
                debug!(rule_id = %rule.id, "reorder rule skipped: medicine not in evaluation set");
                continue;
            };
            match self.fire(&rule, medicine, now) {
                Ok(Some(order)) => generated.push(order),
                Ok(None) => {}
                Err(err) => {
                    warn!(rule_id = %rule.id, error = %err, "reorder rule could not draft an order");
                }
            }
        }

        generated
    }

    /// Evaluate the active rule for a single medicine.
    pub fn evaluate_medicine(
        &self,
        medicine: &Medicine,
        now: DateTime<Utc>,
    ) -> PurchasingResult<Option<PurchaseOrder>> {
        let rule = self
            .rules()
            .into_iter()
            .find(|r| r.is_active && r.medicine_id == medicine.id);
        match rule {
            Some(rule) => self.fire(&rule, medicine, now),
            None => Ok(None),
        }
    }

    /// On-change evaluation: every stock decrease that leaves the medicine at
    /// or below its rule's minimum drafts an order. Increases never fire.
    pub fn evaluate_change(
        &self,
        change: &StockChanged,
        medicine: &Medicine,
        now: DateTime<Utc>,
    ) -> PurchasingResult<Option<PurchaseOrder>> {
        if !change.is_decrease() {
            return Ok(None);
        }
        let rule = self
            .rules()
            .into_iter()
            .find(|r| r.is_active && r.medicine_id == change.medicine_id);
        match rule {
            Some(rule) if rule.is_triggered_by(change.new_quantity) => {
                self.fire(&rule, medicine, now)
            }
            _ => Ok(None),
        }
    }

    fn fire(
        &self,
        rule: &ReorderRule,
        medicine: &Medicine,
        now: DateTime<Utc>,
    ) -> PurchasingResult<Option<PurchaseOrder>> {
        let quantity = self.ledger.get_quantity(rule.medicine_id);
        if !rule.is_triggered_by(quantity) {
            return Ok(None);
        }

        let subtotal = Decimal::from(rule.reorder_quantity) * medicine.purchase_price;
        let order = self.orders.create(NewPurchaseOrder {
            supplier_id: rule.supplier_id,
            items: vec![NewPurchaseOrderItem {
                medicine_id: rule.medicine_id,
                quantity: rule.reorder_quantity,
                unit_price: medicine.purchase_price,
            }],
            tax: subtotal * self.tax_rate,
            expected_delivery: None,
            notes: Some(format!(
                "Auto reorder for {}: {} on hand, threshold {}",
                medicine.name, quantity, rule.min_threshold
            )),
            origin: OrderOrigin::Reorder { rule_id: rule.id },
        })?;

        let triggered = {
            let mut rules = self.write();
            rules.get_mut(&rule.id).map(|stored| {
                stored.last_triggered = Some(now);
                stored.clone()
            })
        };
        if let Some(triggered) = triggered {
            // The order is already durable; a lost stamp only re-surfaces the alert.
            if let Err(err) = self.recorder.rule_saved(&triggered) {
                warn!(rule_id = %rule.id, error = %err, "reorder trigger time not persisted");
            }
        }

        info!(
            rule_id = %rule.id,
            medicine_id = %rule.medicine_id,
            order_id = %order.id,
            on_hand = quantity,
            "reorder rule triggered"
        );

        if self.auto_send {
            match self.orders.update_status(order.id, PurchaseOrderStatus::Sent) {
                Ok(_) => return Ok(self.orders.get(order.id).or(Some(order))),
                Err(err) => {
                    warn!(order_id = %order.id, error = %err, "generated order left in draft");
                }
            }
        }
        Ok(Some(order))
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ReorderRuleId, ReorderRule>> {
        self.rules.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grn::{Grn, ReceiptEntry, ReceiptRecord};
    use crate::recorder::NoopRecorder;
    use crate::supplier::InMemorySupplierDirectory;
    use pharmastock_core::DomainError;
    use pharmastock_inventory::{PersistenceError, StockReason};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, OnceLock};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    struct Fixture {
        ledger: Arc<StockLedger>,
        orders: Arc<PurchaseOrderManager>,
        engine: ReorderEngine,
        medicine: Medicine,
        supplier_id: SupplierId,
    }

    fn fixture() -> Fixture {
        let suppliers = Arc::new(InMemorySupplierDirectory::new());
        let supplier_id = SupplierId::new();
        suppliers.insert(supplier_id, "MedSupply Co");

        let ledger = Arc::new(StockLedger::new());
        let orders = Arc::new(PurchaseOrderManager::new(suppliers, Arc::new(NoopRecorder)));
        let engine = ReorderEngine::new(ledger.clone(), orders.clone(), Arc::new(NoopRecorder));
        let medicine = Medicine {
            id: MedicineId::new(),
            name: "Metformin 500mg".to_string(),
            category: "antidiabetic".to_string(),
            purchase_price: dec!(100),
            sale_price: dec!(130),
        };

        Fixture {
            ledger,
            orders,
            engine,
            medicine,
            supplier_id,
        }
    }

    fn rule_for(f: &Fixture, min_threshold: i64) -> ReorderRule {
        f.engine
            .create_rule(NewReorderRule {
                medicine_id: f.medicine.id,
                min_threshold,
                max_threshold: 100,
                reorder_quantity: 50,
                supplier_id: f.supplier_id,
            })
            .unwrap()
    }

    fn stock(f: &Fixture, quantity: i64) {
        if quantity > 0 {
            f.ledger
                .adjust(f.medicine.id, quantity, StockReason::Opening)
                .unwrap();
        }
    }

    #[test]
    fn quantity_at_threshold_drafts_one_order() {
        let f = fixture();
        let rule = rule_for(&f, 10);
        stock(&f, 10);
        let now = Utc::now();

        let orders = f.engine.evaluate(std::slice::from_ref(&f.medicine), now);

        assert_eq!(orders.len(), 1);
        let order = &orders[0];
        assert_eq!(order.status, PurchaseOrderStatus::Draft);
        assert_eq!(order.items[0].quantity, 50);
        assert_eq!(order.items[0].unit_price, dec!(100));
        assert_eq!(order.subtotal, dec!(5000));
        assert_eq!(order.tax, dec!(850));
        assert_eq!(order.total, dec!(5850));
        assert_eq!(order.origin, OrderOrigin::Reorder { rule_id: rule.id });
        assert_eq!(f.engine.rule(rule.id).unwrap().last_triggered, Some(now));
        assert_eq!(f.orders.list().len(), 1);
    }

    #[test]
    fn quantity_above_threshold_drafts_nothing() {
        let f = fixture();
        let rule = rule_for(&f, 10);
        stock(&f, 11);

        assert!(f.engine.evaluate(std::slice::from_ref(&f.medicine), Utc::now()).is_empty());
        assert_eq!(f.engine.rule(rule.id).unwrap().last_triggered, None);
    }

    #[test]
    fn quantity_below_threshold_drafts_one_order() {
        let f = fixture();
        rule_for(&f, 10);
        stock(&f, 9);

        assert_eq!(f.engine.evaluate(std::slice::from_ref(&f.medicine), Utc::now()).len(), 1);
    }

    #[test]
    fn repeated_low_stock_evaluations_draft_again() {
        let f = fixture();
        rule_for(&f, 10);

        f.engine.evaluate(std::slice::from_ref(&f.medicine), Utc::now());
        f.engine.evaluate(std::slice::from_ref(&f.medicine), Utc::now());

        assert_eq!(f.orders.list().len(), 2);
    }

    #[test]
    fn inactive_rules_never_fire() {
        let f = fixture();
        let rule = rule_for(&f, 10);
        assert!(f.engine.deactivate_rule(rule.id).unwrap());
        assert!(!f.engine.deactivate_rule(ReorderRuleId::new()).unwrap());

        assert!(f.engine.evaluate(std::slice::from_ref(&f.medicine), Utc::now()).is_empty());
        assert!(f.engine.alerts(std::slice::from_ref(&f.medicine)).is_empty());
    }

    #[test]
    fn alerts_do_not_create_orders() {
        let f = fixture();
        rule_for(&f, 10);
        stock(&f, 4);

        let alerts = f.engine.alerts(std::slice::from_ref(&f.medicine));

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].current_quantity, 4);
        assert_eq!(alerts[0].medicine_name, "Metformin 500mg");
        assert!(f.orders.list().is_empty());
    }

    #[test]
    fn auto_send_promotes_generated_orders() {
        let f = fixture();
        let engine = ReorderEngine::new(f.ledger.clone(), f.orders.clone(), Arc::new(NoopRecorder))
            .with_auto_send(true);
        engine
            .create_rule(NewReorderRule {
                medicine_id: f.medicine.id,
                min_threshold: 5,
                max_threshold: 20,
                reorder_quantity: 10,
                supplier_id: f.supplier_id,
            })
            .unwrap();

        let order = engine
            .evaluate_medicine(&f.medicine, Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(order.status, PurchaseOrderStatus::Sent);
    }

    #[test]
    fn every_decrease_at_or_below_threshold_drafts_an_order() {
        let f = fixture();
        rule_for(&f, 10);
        stock(&f, 8);

        let sale = StockChanged {
            medicine_id: f.medicine.id,
            previous_quantity: 12,
            new_quantity: 10,
            delta: -2,
            reason: StockReason::Sale,
            occurred_at: Utc::now(),
        };
        let below = StockChanged {
            previous_quantity: 9,
            new_quantity: 8,
            delta: -1,
            ..sale.clone()
        };
        let above = StockChanged {
            previous_quantity: 13,
            new_quantity: 12,
            delta: -1,
            ..sale.clone()
        };
        let restock = StockChanged {
            previous_quantity: 8,
            new_quantity: 9,
            delta: 1,
            reason: StockReason::CustomerReturn,
            ..sale.clone()
        };

        assert!(f.engine.evaluate_change(&sale, &f.medicine, Utc::now()).unwrap().is_some());
        assert!(f.engine.evaluate_change(&below, &f.medicine, Utc::now()).unwrap().is_some());
        assert!(f.engine.evaluate_change(&restock, &f.medicine, Utc::now()).unwrap().is_none());
        assert!(f.engine.evaluate_change(&above, &f.medicine, Utc::now()).unwrap().is_none());
        assert_eq!(f.orders.list().len(), 2);
    }

    #[derive(Default)]
    struct ScriptedRecorder {
        fail_rules: AtomicBool,
        fail_status_updates: AtomicBool,
        engine: OnceLock<Arc<ReorderEngine>>,
        rules_seen_while_saving: Mutex<Vec<usize>>,
    }

    impl PurchasingRecorder for ScriptedRecorder {
        fn order_saved(&self, order: &PurchaseOrder) -> Result<(), PersistenceError> {
            if order.status != PurchaseOrderStatus::Draft
                && self.fail_status_updates.load(Ordering::SeqCst)
            {
                return Err(PersistenceError::new("store offline"));
            }
            Ok(())
        }
        fn rule_saved(&self, _rule: &ReorderRule) -> Result<(), PersistenceError> {
            if let Some(engine) = self.engine.get() {
                self.rules_seen_while_saving
                    .lock()
                    .unwrap()
                    .push(engine.rules().len());
            }
            if self.fail_rules.load(Ordering::SeqCst) {
                return Err(PersistenceError::new("store offline"));
            }
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

    fn scripted(f: &Fixture, auto_send: bool) -> (Arc<ScriptedRecorder>, Arc<ReorderEngine>) {
        let recorder = Arc::new(ScriptedRecorder::default());
        let suppliers = Arc::new(InMemorySupplierDirectory::new());
        suppliers.insert(f.supplier_id, "MedSupply Co");
        let orders = Arc::new(PurchaseOrderManager::new(suppliers, recorder.clone()));
        let engine = Arc::new(
            ReorderEngine::new(f.ledger.clone(), orders, recorder.clone()).with_auto_send(auto_send),
        );
        assert!(recorder.engine.set(engine.clone()).is_ok());
        (recorder, engine)
    }

    fn new_rule(f: &Fixture) -> NewReorderRule {
        NewReorderRule {
            medicine_id: f.medicine.id,
            min_threshold: 5,
            max_threshold: 20,
            reorder_quantity: 10,
            supplier_id: f.supplier_id,
        }
    }

    #[test]
    fn rule_changes_persist_outside_the_rules_lock_and_roll_back() {
        let f = fixture();
        let (recorder, engine) = scripted(&f, false);

        recorder.fail_rules.store(true, Ordering::SeqCst);
        let err = engine.create_rule(new_rule(&f)).unwrap_err();
        assert!(matches!(err, PurchasingError::Persistence(_)));
        assert!(engine.rules().is_empty());

        recorder.fail_rules.store(false, Ordering::SeqCst);
        let rule = engine.create_rule(new_rule(&f)).unwrap();

        recorder.fail_rules.store(true, Ordering::SeqCst);
        assert!(engine.deactivate_rule(rule.id).is_err());
        assert!(engine.rule(rule.id).unwrap().is_active);

        // Each save could read the rule table while it ran.
        assert_eq!(*recorder.rules_seen_while_saving.lock().unwrap(), vec![1, 1, 1]);
    }

    #[test]
    fn failed_auto_send_still_returns_the_draft() {
        let f = fixture();
        let (recorder, engine) = scripted(&f, true);
        engine.create_rule(new_rule(&f)).unwrap();
        recorder.fail_status_updates.store(true, Ordering::SeqCst);

        let generated = engine.evaluate(std::slice::from_ref(&f.medicine), Utc::now());

        assert_eq!(generated.len(), 1);
        assert_eq!(generated[0].status, PurchaseOrderStatus::Draft);
    }

    #[test]
    fn second_active_rule_for_a_medicine_is_a_conflict() {
        let f = fixture();
        rule_for(&f, 10);

        let err = f
            .engine
            .create_rule(NewReorderRule {
                medicine_id: f.medicine.id,
                min_threshold: 5,
                max_threshold: 50,
                reorder_quantity: 10,
                supplier_id: f.supplier_id,
            })
            .unwrap_err();
        assert!(matches!(err, PurchasingError::Domain(DomainError::Conflict(_))));
    }

    #[test]
    fn malformed_rules_are_rejected() {
        let f = fixture();
        let bad = NewReorderRule {
            medicine_id: f.medicine.id,
            min_threshold: 20,
            max_threshold: 10,
            reorder_quantity: 5,
            supplier_id: f.supplier_id,
        };
        assert!(f.engine.create_rule(bad).is_err());
        assert!(f.engine.rules().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: a rule fires exactly when stock is at or below its minimum.
        #[test]
        fn fires_exactly_at_or_below_threshold(min in 0i64..200, on_hand in 0i64..400) {
            let f = fixture();
            rule_for(&f, min);
            stock(&f, on_hand);

            let orders = f.engine.evaluate(std::slice::from_ref(&f.medicine), Utc::now());
            prop_assert_eq!(orders.len(), usize::from(on_hand <= min));
        }
    }
}
