//! Goods-received-notes and the receipt journal.
//!
//! A GRN is stored verbatim when the delivery is recorded and has no stock
//! effect until it is processed. Processing stages a journal entry, commits
//! every good item to the ledger in one `apply_batch`, appends the matching
//! batches and finally moves the owning purchase order. Staged entries that
//! never reached `Committed` are replayed after a restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use pharmastock_core::{Entity, GrnId, MedicineId, PurchaseOrderId};
use pharmastock_inventory::{
    Batch, BatchRegistry, CatalogService, PersistenceError, StockChanged, StockDelta,
    StockLedger, StockReason,
};

use crate::error::{PurchasingError, PurchasingResult};
use crate::order::{PurchaseOrderManager, PurchaseOrderStatus, ReceiptGuard};
use crate::recorder::PurchasingRecorder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrnStatus {
    Partial,
    Complete,
}

/// Condition of received goods. Only `Good` items restock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemCondition {
    Good,
    Damaged,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrnItem {
    pub medicine_id: MedicineId,
    pub ordered_quantity: i64,
    pub received_quantity: i64,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    pub condition: ItemCondition,
}

impl GrnItem {
    fn restocks(&self) -> bool {
        self.condition == ItemCondition::Good && self.received_quantity > 0
    }
}

/// A delivery recorded against a purchase order. Immutable once created;
/// corrections are new GRNs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grn {
    pub id: GrnId,
    pub purchase_order_id: PurchaseOrderId,
    pub received_by: String,
    pub received_at: DateTime<Utc>,
    pub items: Vec<GrnItem>,
    pub status: GrnStatus,
    pub notes: Option<String>,
}

impl Entity for Grn {
    type Id = GrnId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGrn {
    pub purchase_order_id: PurchaseOrderId,
    pub received_by: String,
    pub received_at: DateTime<Utc>,
    pub items: Vec<GrnItem>,
    pub notes: Option<String>,
}

impl NewGrn {
    fn validate(&self) -> PurchasingResult<()> {
        if self.received_by.trim().is_empty() {
            return Err(PurchasingError::validation("received_by cannot be empty"));
        }
        if self.items.is_empty() {
            return Err(PurchasingError::validation("a GRN needs at least one item"));
        }
        for item in &self.items {
            if item.received_quantity < 0 || item.ordered_quantity < 0 {
                return Err(PurchasingError::validation(format!(
                    "quantities for medicine {} cannot be negative",
                    item.medicine_id
                )));
            }
            if item.restocks() && item.batch_number.trim().is_empty() {
                return Err(PurchasingError::validation(format!(
                    "good item for medicine {} needs a batch number",
                    item.medicine_id
                )));
            }
        }
        Ok(())
    }

    fn derived_status(&self) -> GrnStatus {
        let complete = self.items.iter().all(|item| {
            item.condition == ItemCondition::Good && item.received_quantity >= item.ordered_quantity
        });
        if complete {
            GrnStatus::Complete
        } else {
            GrnStatus::Partial
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptState {
    Staged,
    Committed,
    RolledBack,
}

/// Write-ahead record of one GRN's effects, staged before any stock moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptEntry {
    pub grn_id: GrnId,
    pub purchase_order_id: PurchaseOrderId,
    pub deltas: Vec<StockDelta>,
    pub batches: Vec<Batch>,
    pub state: ReceiptState,
    pub staged_at: DateTime<Utc>,
}

/// Everything a committed receipt changed, persisted as a single record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptRecord {
    pub grn_id: GrnId,
    pub purchase_order_id: PurchaseOrderId,
    pub changes: Vec<StockChanged>,
    pub batches: Vec<Batch>,
    /// `None` when nothing good has been received against the order yet.
    pub order_status: Option<PurchaseOrderStatus>,
}

/// In-memory receipt journal, in staging order.
#[derive(Debug, Default)]
pub struct ReceiptJournal {
    entries: RwLock<Vec<ReceiptEntry>>,
}

impl ReceiptJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self, entry: ReceiptEntry) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.push(entry);
    }

    /// Move the latest staged entry for `grn_id` to `state`.
    pub fn mark(&self, grn_id: GrnId, state: ReceiptState) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries
            .iter_mut()
            .rev()
            .find(|e| e.grn_id == grn_id && e.state == ReceiptState::Staged)
        {
            Some(entry) => {
                entry.state = state;
                true
            }
            None => false,
        }
    }

    /// Latest entry for `grn_id`, whatever its state.
    pub fn entry_for(&self, grn_id: GrnId) -> Option<ReceiptEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().rev().find(|e| e.grn_id == grn_id).cloned()
    }

    pub fn is_committed(&self, grn_id: GrnId) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .any(|e| e.grn_id == grn_id && e.state == ReceiptState::Committed)
    }

    pub fn pending(&self) -> Vec<ReceiptEntry> {
        self.with_state(ReceiptState::Staged)
    }

    pub fn entries(&self) -> Vec<ReceiptEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.clone()
    }

    /// Good quantities committed against `order_id`, per medicine.
    pub fn committed_quantities(&self, order_id: PurchaseOrderId) -> HashMap<MedicineId, i64> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut received = HashMap::new();
        for entry in entries
            .iter()
            .filter(|e| e.purchase_order_id == order_id && e.state == ReceiptState::Committed)
        {
            for d in &entry.deltas {
                *received.entry(d.medicine_id).or_insert(0) += d.delta;
            }
        }
        received
    }

    fn with_state(&self, state: ReceiptState) -> Vec<ReceiptEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().filter(|e| e.state == state).cloned().collect()
    }
}

/// Owns GRNs; the only receiving path that moves stock and batches.
pub struct GrnProcessor {
    ledger: Arc<StockLedger>,
    batches: Arc<BatchRegistry>,
    orders: Arc<PurchaseOrderManager>,
    recorder: Arc<dyn PurchasingRecorder>,
    journal: ReceiptJournal,
    commit: Mutex<()>,
    grns: RwLock<HashMap<GrnId, Grn>>,
}

impl core::fmt::Debug for GrnProcessor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let count = self.grns.read().map(|g| g.len()).unwrap_or(0);
        f.debug_struct("GrnProcessor")
            .field("grns", &count)
            .field("journal", &self.journal)
            .finish_non_exhaustive()
    }
}

impl GrnProcessor {
    pub fn new(
        ledger: Arc<StockLedger>,
        batches: Arc<BatchRegistry>,
        orders: Arc<PurchaseOrderManager>,
        recorder: Arc<dyn PurchasingRecorder>,
    ) -> Self {
        Self {
            ledger,
            batches,
            orders,
            recorder,
            journal: ReceiptJournal::new(),
            commit: Mutex::new(()),
            grns: RwLock::new(HashMap::new()),
        }
    }

    /// Reload persisted GRNs and journal entries (process restart).
    ///
    /// Call [`GrnProcessor::replay_pending`] afterwards to finish receipts that
    /// were staged but never committed.
    pub fn restore(
        &self,
        grns: impl IntoIterator<Item = Grn>,
        entries: impl IntoIterator<Item = ReceiptEntry>,
    ) {
        {
            let mut map = self.grns.write().unwrap_or_else(PoisonError::into_inner);
            for grn in grns {
                map.insert(grn.id, grn);
            }
        }
        for entry in entries {
            self.journal.stage(entry);
        }
    }

    pub fn journal(&self) -> &ReceiptJournal {
        &self.journal
    }

    /// Record a delivery. No stock effect until [`GrnProcessor::process`].
    pub fn create_grn(&self, new: NewGrn) -> PurchasingResult<Grn> {
        new.validate()?;

        let order = self.orders.get(new.purchase_order_id).ok_or_else(|| {
            PurchasingError::validation(format!(
                "unknown purchase order {}",
                new.purchase_order_id
            ))
        })?;
        if !order.status.is_receivable() {
            return Err(PurchasingError::validation(format!(
                "purchase order {} is {} and cannot receive goods",
                order.id, order.status
            )));
        }
        let ordered = order.ordered_quantities();
        if let Some(item) = new.items.iter().find(|i| !ordered.contains_key(&i.medicine_id)) {
            return Err(PurchasingError::validation(format!(
                "medicine {} is not on purchase order {}",
                item.medicine_id, order.id
            )));
        }

        let grn = Grn {
            id: GrnId::new(),
            status: new.derived_status(),
            purchase_order_id: new.purchase_order_id,
            received_by: new.received_by,
            received_at: new.received_at,
            items: new.items,
            notes: new.notes,
        };

        self.write().insert(grn.id, grn.clone());
        if let Err(err) = self.recorder.grn_saved(&grn) {
            self.write().remove(&grn.id);
            error!(grn_id = %grn.id, error = %err, "GRN creation rolled back");
            return Err(err.into());
        }

        info!(
            grn_id = %grn.id,
            order_id = %grn.purchase_order_id,
            items = grn.items.len(),
            status = ?grn.status,
            "GRN recorded"
        );
        Ok(grn)
    }

    pub fn get_grn(&self, id: GrnId) -> Option<Grn> {
        self.read().get(&id).cloned()
    }

    /// All GRNs, oldest delivery first.
    pub fn list_grns(&self) -> Vec<Grn> {
        let mut grns: Vec<Grn> = self.read().values().cloned().collect();
        grns.sort_by(|a, b| a.received_at.cmp(&b.received_at).then(a.id.cmp(&b.id)));
        grns
    }

    pub fn grns_for_order(&self, order_id: PurchaseOrderId) -> Vec<Grn> {
        self.list_grns()
            .into_iter()
            .filter(|g| g.purchase_order_id == order_id)
            .collect()
    }

    /// Good quantities received so far against an order, per medicine.
    pub fn received_quantities(&self, order_id: PurchaseOrderId) -> HashMap<MedicineId, i64> {
        self.journal.committed_quantities(order_id)
    }

    /// Apply a GRN to stock, batches and the owning order.
    ///
    /// `Ok(false)` if the GRN is unknown; `Ok(true)` once it is applied,
    /// including when it had already been applied before.
    pub fn process(&self, grn_id: GrnId, catalog: &dyn CatalogService) -> PurchasingResult<bool> {
        self.process_with(grn_id, catalog, |_| Ok(()))
    }

    /// [`GrnProcessor::process`] with an extra persistence step that runs after
    /// the recorder, inside the same commit.
    pub fn process_with<F>(
        &self,
        grn_id: GrnId,
        catalog: &dyn CatalogService,
        persist: F,
    ) -> PurchasingResult<bool>
    where
        F: FnOnce(&ReceiptRecord) -> Result<(), PersistenceError>,
    {
        let _commit = self.commit.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(grn) = self.get_grn(grn_id) else {
            return Ok(false);
        };
        if self.journal.is_committed(grn_id) {
            info!(grn_id = %grn_id, "GRN already processed");
            return Ok(true);
        }

        if let Some(item) = grn
            .items
            .iter()
            .find(|i| catalog.get_medicine(i.medicine_id).is_none())
        {
            warn!(grn_id = %grn_id, medicine_id = %item.medicine_id, "GRN rejected: medicine not in catalog");
            return Err(PurchasingError::validation(format!(
                "medicine {} is not in the catalog",
                item.medicine_id
            )));
        }

        let (deltas, batches) = receipt_effects(&grn);
        for batch in &batches {
            batch.validate()?;
        }

        let entry = ReceiptEntry {
            grn_id,
            purchase_order_id: grn.purchase_order_id,
            deltas,
            batches,
            state: ReceiptState::Staged,
            staged_at: Utc::now(),
        };
        self.recorder.receipt_staged(&entry)?;
        self.journal.stage(entry.clone());

        self.commit_entry(&entry, persist)
    }

    /// Re-apply journal entries that were staged but never committed.
    ///
    /// Returns how many receipts were committed. Entries that fail again are
    /// marked rolled back and logged.
    pub fn replay_pending(&self) -> usize {
        let _commit = self.commit.lock().unwrap_or_else(PoisonError::into_inner);
        let mut replayed = 0;

        for entry in self.journal.pending() {
            if self.journal.is_committed(entry.grn_id) {
                self.journal.mark(entry.grn_id, ReceiptState::RolledBack);
                continue;
            }
            match self.commit_entry(&entry, |_| Ok(())) {
                Ok(_) => {
                    replayed += 1;
                    info!(grn_id = %entry.grn_id, "staged receipt replayed");
                }
                Err(err) => {
                    warn!(grn_id = %entry.grn_id, error = %err, "staged receipt could not be replayed");
                }
            }
        }
        replayed
    }

    /// Commit a staged entry. Caller holds `self.commit`.
    fn commit_entry<F>(&self, entry: &ReceiptEntry, persist: F) -> PurchasingResult<bool>
    where
        F: FnOnce(&ReceiptRecord) -> Result<(), PersistenceError>,
    {
        let receipt = match self.orders.begin_receipt(entry.purchase_order_id) {
            Ok(receipt) => receipt,
            Err(err) => {
                self.journal.mark(entry.grn_id, ReceiptState::RolledBack);
                return Err(err);
            }
        };
        let order_status = self.next_order_status(entry, &receipt);

        let mut committed: Option<ReceiptRecord> = None;
        let record_commit = |changes: &[StockChanged]| -> Result<(), PersistenceError> {
            let record = ReceiptRecord {
                grn_id: entry.grn_id,
                purchase_order_id: entry.purchase_order_id,
                changes: changes.to_vec(),
                batches: entry.batches.clone(),
                order_status,
            };
            self.recorder.receipt_committed(&record)?;
            persist(&record)?;
            committed = Some(record);
            Ok(())
        };

        let outcome = if entry.deltas.is_empty() {
            record_commit(&[]).map_err(PurchasingError::from)
        } else {
            self.ledger
                .apply_batch(&entry.deltas, StockReason::Receipt, record_commit)
                .map(|_| ())
                .map_err(PurchasingError::from)
        };

        if let Err(err) = outcome {
            self.journal.mark(entry.grn_id, ReceiptState::RolledBack);
            error!(grn_id = %entry.grn_id, error = %err, "receipt rolled back");
            return Err(err);
        }

        if let Err(err) = self.batches.add_all(entry.batches.clone()) {
            error!(grn_id = %entry.grn_id, error = %err, "receipt batches not registered");
        }
        self.journal.mark(entry.grn_id, ReceiptState::Committed);
        if let Some(status) = order_status {
            receipt.apply(status);
        }

        info!(
            grn_id = %entry.grn_id,
            order_id = %entry.purchase_order_id,
            restocked = committed.as_ref().map(|r| r.changes.len()).unwrap_or(0),
            order_status = ?order_status,
            "receipt committed"
        );
        Ok(true)
    }

    /// Order status once `entry` is counted with earlier committed receipts.
    fn next_order_status(
        &self,
        entry: &ReceiptEntry,
        receipt: &ReceiptGuard<'_>,
    ) -> Option<PurchaseOrderStatus> {
        let order = receipt.order();
        let mut received = self.journal.committed_quantities(order.id);
        for d in &entry.deltas {
            *received.entry(d.medicine_id).or_insert(0) += d.delta;
        }
        if received.values().all(|q| *q <= 0) {
            return None;
        }

        let fully_received = order
            .ordered_quantities()
            .iter()
            .all(|(medicine_id, ordered)| received.get(medicine_id).copied().unwrap_or(0) >= *ordered);
        Some(receipt.status_for(fully_received))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<GrnId, Grn>> {
        self.grns.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<GrnId, Grn>> {
        self.grns.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn receipt_effects(grn: &Grn) -> (Vec<StockDelta>, Vec<Batch>) {
    grn.items
        .iter()
        .filter(|item| item.restocks())
        .map(|item| {
            (
                StockDelta {
                    medicine_id: item.medicine_id,
                    delta: item.received_quantity,
                },
                Batch {
                    medicine_id: item.medicine_id,
                    batch_number: item.batch_number.clone(),
                    expiry_date: item.expiry_date,
                    quantity: item.received_quantity,
                    received_date: grn.received_at,
                },
            )
        })
        .unzip()
}
