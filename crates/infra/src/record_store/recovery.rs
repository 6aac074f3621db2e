//! Folds stored records back into component state after a restart.

use std::collections::{HashMap, HashSet};

use pharmastock_core::{Entity, GrnId, PurchaseOrderId, ReorderRuleId};
use pharmastock_inventory::{Batch, StockDelta};
use pharmastock_purchasing::{
    Grn, PurchaseOrder, ReceiptEntry, ReceiptRecord, ReceiptState, ReorderRule,
};

use super::record::{RecordBody, StoredRecord};

/// Purchasing and batch state rebuilt from the record stream.
///
/// Ledger quantities are not part of it: they come from the store's ledger
/// snapshot.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveredState {
    pub orders: Vec<PurchaseOrder>,
    pub rules: Vec<ReorderRule>,
    pub grns: Vec<Grn>,
    /// Batches of committed receipts, in receipt order.
    pub batches: Vec<Batch>,
    /// Receipt journal; entries still `Staged` need a replay.
    pub journal: Vec<ReceiptEntry>,
}

impl RecoveredState {
    pub fn from_records(records: &[StoredRecord]) -> Self {
        let mut ordered: Vec<&StoredRecord> = records.iter().collect();
        ordered.sort_by_key(|r| r.sequence_number());

        let mut orders: HashMap<PurchaseOrderId, PurchaseOrder> = HashMap::new();
        let mut rules: HashMap<ReorderRuleId, ReorderRule> = HashMap::new();
        let mut grns: HashMap<GrnId, Grn> = HashMap::new();
        let mut batches = Vec::new();
        let mut journal: Vec<ReceiptEntry> = Vec::new();

        for record in ordered {
            match &record.payload().body {
                RecordBody::StockChanged(_) => {}
                RecordBody::OrderSaved(order) => upsert(&mut orders, order),
                RecordBody::RuleSaved(rule) => upsert(&mut rules, rule),
                RecordBody::GrnSaved(grn) => upsert(&mut grns, grn),
                RecordBody::ReceiptStaged(entry) => journal.push(entry.clone()),
                RecordBody::ReceiptCommitted(receipt) => {
                    if let Some(status) = receipt.order_status {
                        if let Some(order) = orders.get_mut(&receipt.purchase_order_id) {
                            order.status = status;
                        }
                    }
                    batches.extend(receipt.batches.iter().cloned());
                    commit_entry(&mut journal, receipt, record.recorded_at());
                }
            }
        }

        // Retries leave older staged entries behind once a later attempt commits.
        let committed: HashSet<GrnId> = journal
            .iter()
            .filter(|e| e.state == ReceiptState::Committed)
            .map(|e| e.grn_id)
            .collect();
        for entry in &mut journal {
            if entry.state == ReceiptState::Staged && committed.contains(&entry.grn_id) {
                entry.state = ReceiptState::RolledBack;
            }
        }

        let mut orders: Vec<PurchaseOrder> = orders.into_values().collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let mut rules: Vec<ReorderRule> = rules.into_values().collect();
        rules.sort_by_key(|r| r.id);
        let mut grns: Vec<Grn> = grns.into_values().collect();
        grns.sort_by(|a, b| a.received_at.cmp(&b.received_at).then(a.id.cmp(&b.id)));

        Self {
            orders,
            rules,
            grns,
            batches,
            journal,
        }
    }

    /// Receipts staged but never committed.
    pub fn pending_receipts(&self) -> usize {
        self.journal
            .iter()
            .filter(|e| e.state == ReceiptState::Staged)
            .count()
    }
}

/// Later saves of the same entity replace earlier ones.
fn upsert<T: Entity + Clone>(latest: &mut HashMap<T::Id, T>, saved: &T) {
    latest.insert(saved.id(), saved.clone());
}

fn commit_entry(
    journal: &mut Vec<ReceiptEntry>,
    receipt: &ReceiptRecord,
    recorded_at: chrono::DateTime<chrono::Utc>,
) {
    let staged = journal
        .iter_mut()
        .rev()
        .find(|e| e.grn_id == receipt.grn_id && e.state == ReceiptState::Staged);
    match staged {
        Some(entry) => entry.state = ReceiptState::Committed,
        None => journal.push(ReceiptEntry {
            grn_id: receipt.grn_id,
            purchase_order_id: receipt.purchase_order_id,
            deltas: receipt
                .changes
                .iter()
                .map(|c| StockDelta {
                    medicine_id: c.medicine_id,
                    delta: c.delta,
                })
                .collect(),
            batches: receipt.batches.clone(),
            state: ReceiptState::Committed,
            staged_at: recorded_at,
        }),
    }
}
