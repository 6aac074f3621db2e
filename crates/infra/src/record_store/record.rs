use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pharmastock_events::{Event, EventEnvelope};
use pharmastock_inventory::StockChanged;
use pharmastock_purchasing::{Grn, PurchaseOrder, ReceiptEntry, ReceiptRecord, ReorderRule};

/// A record as stored: sequence number and recording time around the payload.
pub type StoredRecord = EventEnvelope<StockRecord>;

/// One durable state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub occurred_at: DateTime<Utc>,
    pub body: RecordBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum RecordBody {
    /// Ledger changes committed together (one adjustment or one reconciliation).
    StockChanged(Vec<StockChanged>),
    OrderSaved(PurchaseOrder),
    RuleSaved(ReorderRule),
    GrnSaved(Grn),
    ReceiptStaged(ReceiptEntry),
    ReceiptCommitted(ReceiptRecord),
}

impl StockRecord {
    pub fn now(body: RecordBody) -> Self {
        Self {
            occurred_at: Utc::now(),
            body,
        }
    }

    /// Ledger changes carried by this record, if any.
    pub fn stock_changes(&self) -> &[StockChanged] {
        match &self.body {
            RecordBody::StockChanged(changes) => changes.as_slice(),
            RecordBody::ReceiptCommitted(receipt) => receipt.changes.as_slice(),
            _ => &[],
        }
    }
}

impl Event for StockRecord {
    fn event_type(&self) -> &'static str {
        match self.body {
            RecordBody::StockChanged(_) => "inventory.stock.changed",
            RecordBody::OrderSaved(_) => "purchasing.order.saved",
            RecordBody::RuleSaved(_) => "purchasing.reorder_rule.saved",
            RecordBody::GrnSaved(_) => "purchasing.grn.saved",
            RecordBody::ReceiptStaged(_) => "purchasing.receipt.staged",
            RecordBody::ReceiptCommitted(_) => "purchasing.receipt.committed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
