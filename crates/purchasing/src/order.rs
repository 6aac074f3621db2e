use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use pharmastock_core::{Entity, MedicineId, PurchaseOrderId, ReorderRuleId, SupplierId};

use crate::error::{PurchasingError, PurchasingResult};
use crate::recorder::PurchasingRecorder;
use crate::supplier::SupplierDirectory;

/// Purchase order status lifecycle.
///
/// ```text
/// draft -> sent -> confirmed -> { received | partially_delivered }
/// partially_delivered -> received
/// any state except received/cancelled -> cancelled
/// ```
///
/// `received` and `partially_delivered` are reached only through goods
/// receiving, never through a manual status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Sent,
    Confirmed,
    PartiallyDelivered,
    Received,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PurchaseOrderStatus::Received | PurchaseOrderStatus::Cancelled)
    }

    /// Whether a manual status update may move an order from `self` to `next`.
    pub fn can_transition_to(&self, next: PurchaseOrderStatus) -> bool {
        use PurchaseOrderStatus::*;
        match (self, next) {
            (Draft, Sent) | (Sent, Confirmed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Whether goods can still be received against the order.
    pub fn is_receivable(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "draft",
            PurchaseOrderStatus::Sent => "sent",
            PurchaseOrderStatus::Confirmed => "confirmed",
            PurchaseOrderStatus::PartiallyDelivered => "partially_delivered",
            PurchaseOrderStatus::Received => "received",
            PurchaseOrderStatus::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an order came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderOrigin {
    Manual,
    Reorder { rule_id: ReorderRuleId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderItem {
    pub medicine_id: MedicineId,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: PurchaseOrderId,
    pub supplier_id: SupplierId,
    pub supplier_name: String,
    pub status: PurchaseOrderStatus,
    pub items: Vec<PurchaseOrderItem>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub expected_delivery: Option<NaiveDate>,
    pub notes: Option<String>,
    pub origin: OrderOrigin,
}

impl PurchaseOrder {
    /// Ordered quantity per medicine (lines for the same medicine are summed).
    pub fn ordered_quantities(&self) -> HashMap<MedicineId, i64> {
        let mut ordered = HashMap::new();
        for item in &self.items {
            *ordered.entry(item.medicine_id).or_insert(0) += item.quantity;
        }
        ordered
    }
}

impl Entity for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseOrderItem {
    pub medicine_id: MedicineId,
    pub quantity: i64,
    pub unit_price: Decimal,
}

/// Input for [`PurchaseOrderManager::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseOrder {
    pub supplier_id: SupplierId,
    pub items: Vec<NewPurchaseOrderItem>,
    #[serde(default)]
    pub tax: Decimal,
    #[serde(default)]
    pub expected_delivery: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "manual_origin")]
    pub origin: OrderOrigin,
}

fn manual_origin() -> OrderOrigin {
    OrderOrigin::Manual
}

impl NewPurchaseOrder {
    pub fn manual(supplier_id: SupplierId, items: Vec<NewPurchaseOrderItem>) -> Self {
        Self {
            supplier_id,
            items,
            tax: Decimal::ZERO,
            expected_delivery: None,
            notes: None,
            origin: OrderOrigin::Manual,
        }
    }

    fn validate(&self) -> PurchasingResult<()> {
        if self.items.is_empty() {
            return Err(PurchasingError::validation(
                "purchase order needs at least one item",
            ));
        }
        for item in &self.items {
            if item.quantity <= 0 {
                return Err(PurchasingError::validation(format!(
                    "quantity for medicine {} must be positive",
                    item.medicine_id
                )));
            }
            if item.unit_price.is_sign_negative() {
                return Err(PurchasingError::validation(format!(
                    "unit price for medicine {} cannot be negative",
                    item.medicine_id
                )));
            }
        }
        if self.tax.is_sign_negative() {
            return Err(PurchasingError::validation("tax cannot be negative"));
        }
        Ok(())
    }
}

/// Owns purchase orders and their status machine.
///
/// Never touches stock: stock only moves when goods are received.
pub struct PurchaseOrderManager {
    suppliers: Arc<dyn SupplierDirectory>,
    recorder: Arc<dyn PurchasingRecorder>,
    commit: Mutex<()>,
    orders: RwLock<HashMap<PurchaseOrderId, PurchaseOrder>>,
    // Orders with a receipt between its receivability check and status write.
    receiving: Mutex<HashSet<PurchaseOrderId>>,
}

impl core::fmt::Debug for PurchaseOrderManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let count = self.orders.read().map(|o| o.len()).unwrap_or(0);
        f.debug_struct("PurchaseOrderManager")
            .field("orders", &count)
            .finish()
    }
}

impl PurchaseOrderManager {
    pub fn new(
        suppliers: Arc<dyn SupplierDirectory>,
        recorder: Arc<dyn PurchasingRecorder>,
    ) -> Self {
        Self {
            suppliers,
            recorder,
            commit: Mutex::new(()),
            orders: RwLock::new(HashMap::new()),
            receiving: Mutex::new(HashSet::new()),
        }
    }

    /// Reload previously persisted orders (process restart).
    pub fn restore(&self, orders: impl IntoIterator<Item = PurchaseOrder>) {
        let mut map = self.orders.write().unwrap_or_else(PoisonError::into_inner);
        for order in orders {
            map.insert(order.id, order);
        }
    }

    /// Create a draft order. Totals are computed from the items.
    pub fn create(&self, new: NewPurchaseOrder) -> PurchasingResult<PurchaseOrder> {
        new.validate()?;
        let supplier_name = self.suppliers.supplier_name(new.supplier_id).ok_or_else(|| {
            PurchasingError::validation(format!("unknown supplier {}", new.supplier_id))
        })?;

        let items: Vec<PurchaseOrderItem> = new
            .items
            .iter()
            .map(|item| PurchaseOrderItem {
                medicine_id: item.medicine_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
                total: Decimal::from(item.quantity) * item.unit_price,
            })
            .collect();
        let subtotal: Decimal = items.iter().map(|i| i.total).sum();

        let order = PurchaseOrder {
            id: PurchaseOrderId::new(),
            supplier_id: new.supplier_id,
            supplier_name,
            status: PurchaseOrderStatus::Draft,
            items,
            subtotal,
            tax: new.tax,
            total: subtotal + new.tax,
            created_at: Utc::now(),
            expected_delivery: new.expected_delivery,
            notes: new.notes,
            origin: new.origin,
        };

        let _commit = self.commit.lock().unwrap_or_else(PoisonError::into_inner);
        self.write().insert(order.id, order.clone());

        if let Err(err) = self.recorder.order_saved(&order) {
            self.write().remove(&order.id);
            error!(order_id = %order.id, error = %err, "purchase order creation rolled back");
            return Err(err.into());
        }

        info!(
            order_id = %order.id,
            supplier_id = %order.supplier_id,
            total = %order.total,
            "purchase order created"
        );
        Ok(order)
    }

    pub fn get(&self, id: PurchaseOrderId) -> Option<PurchaseOrder> {
        self.read().get(&id).cloned()
    }

    /// All orders, oldest first.
    pub fn list(&self) -> Vec<PurchaseOrder> {
        let mut orders: Vec<PurchaseOrder> = self.read().values().cloned().collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        orders
    }

    pub fn list_by_status(&self, status: PurchaseOrderStatus) -> Vec<PurchaseOrder> {
        self.list()
            .into_iter()
            .filter(|o| o.status == status)
            .collect()
    }

    /// Manually move an order along its lifecycle.
    ///
    /// Returns `Ok(false)` for an unknown id. Illegal transitions, including
    /// any attempt to set a receipt status by hand, are invariant violations.
    pub fn update_status(
        &self,
        id: PurchaseOrderId,
        status: PurchaseOrderStatus,
    ) -> PurchasingResult<bool> {
        let _commit = self.commit.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(current) = self.read().get(&id).map(|o| o.status) else {
            return Ok(false);
        };

        if self.receiving().contains(&id) {
            warn!(order_id = %id, to = %status, "purchase order transition rejected: goods are being received");
            return Err(PurchasingError::conflict(format!(
                "purchase order {id} is receiving goods"
            )));
        }
        if !current.can_transition_to(status) {
            warn!(order_id = %id, from = %current, to = %status, "purchase order transition rejected");
            return Err(PurchasingError::invariant(format!(
                "cannot move purchase order from {current} to {status}"
            )));
        }

        self.set_status_locked(id, current, status)?;
        Ok(true)
    }

    /// Cancel an order. `Ok(false)` for unknown ids.
    pub fn cancel(&self, id: PurchaseOrderId) -> PurchasingResult<bool> {
        self.update_status(id, PurchaseOrderStatus::Cancelled)
    }

    /// Reserve `id` for a goods receipt.
    ///
    /// Fails unless the order can still receive goods. While the returned
    /// guard lives, manual status changes on the order are refused, so the
    /// receipt's status write cannot land on a cancelled order.
    pub(crate) fn begin_receipt(&self, id: PurchaseOrderId) -> PurchasingResult<ReceiptGuard<'_>> {
        let _commit = self.commit.lock().unwrap_or_else(PoisonError::into_inner);
        let order = self
            .get(id)
            .ok_or_else(|| PurchasingError::validation(format!("unknown purchase order {id}")))?;
        if !order.status.is_receivable() {
            return Err(PurchasingError::invariant(format!(
                "cannot receive goods against a {} purchase order",
                order.status
            )));
        }
        if !self.receiving().insert(id) {
            return Err(PurchasingError::conflict(format!(
                "purchase order {id} is already receiving goods"
            )));
        }
        Ok(ReceiptGuard {
            orders: self,
            order,
        })
    }

    fn apply_receipt_status(&self, id: PurchaseOrderId, status: PurchaseOrderStatus) {
        let _commit = self.commit.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(order) = self.write().get_mut(&id) {
            info!(order_id = %id, from = %order.status, to = %status, "purchase order status changed by receipt");
            order.status = status;
        }
    }

    fn set_status_locked(
        &self,
        id: PurchaseOrderId,
        previous: PurchaseOrderStatus,
        status: PurchaseOrderStatus,
    ) -> PurchasingResult<()> {
        let updated = {
            let mut orders = self.write();
            let Some(order) = orders.get_mut(&id) else {
                return Ok(());
            };
            order.status = status;
            order.clone()
        };

        if let Err(err) = self.recorder.order_saved(&updated) {
            if let Some(order) = self.write().get_mut(&id) {
                order.status = previous;
            }
            error!(order_id = %id, error = %err, "purchase order status change rolled back");
            return Err(err.into());
        }

        info!(order_id = %id, from = %previous, to = %status, "purchase order status changed");
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PurchaseOrderId, PurchaseOrder>> {
        self.orders.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PurchaseOrderId, PurchaseOrder>> {
        self.orders.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn receiving(&self) -> std::sync::MutexGuard<'_, HashSet<PurchaseOrderId>> {
        self.receiving.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An order reserved for one goods receipt; released on drop.
pub(crate) struct ReceiptGuard<'a> {
    orders: &'a PurchaseOrderManager,
    order: PurchaseOrder,
}

impl ReceiptGuard<'_> {
    /// The order as it was when the receipt began.
    pub(crate) fn order(&self) -> &PurchaseOrder {
        &self.order
    }

    /// Status to record once every item's cumulative good receipts are known.
    pub(crate) fn status_for(&self, fully_received: bool) -> PurchaseOrderStatus {
        if fully_received {
            PurchaseOrderStatus::Received
        } else {
            PurchaseOrderStatus::PartiallyDelivered
        }
    }

    /// Apply a receipt-driven status that was already persisted with the receipt.
    pub(crate) fn apply(&self, status: PurchaseOrderStatus) {
        self.orders.apply_receipt_status(self.order.id, status);
    }
}

impl Drop for ReceiptGuard<'_> {
    fn drop(&mut self) {
        self.orders.receiving().remove(&self.order.id);
    }
}
