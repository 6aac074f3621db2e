//! Stock ledger: the single authoritative quantity per medicine.
//!
//! Every stock movement (sale, customer return, supplier return, manual edit,
//! goods receipt, reconciliation) routes through [`StockLedger::adjust`] or one
//! of its durable variants. The ledger enforces one invariant: a committed
//! quantity is never negative. An adjustment that would break it is rejected
//! and leaves the ledger untouched.
//!
//! ## Locking
//!
//! Two locks are involved:
//!
//! - `commit` serializes writers for the whole read-modify-write, including the
//!   persistence callback and listener notification. Notification order is
//!   therefore mutation order.
//! - `levels` guards the quantity map and is only held for the in-memory
//!   update itself, so readers never wait on persistence.
//!
//! Listeners run synchronously on the writer's thread while `commit` is held.
//! A slow listener stalls every writer, and a listener that calls back into
//! `adjust` deadlocks. Consumers with either need should use
//! [`StockLedger::forward_to`] and drain the bus on their own thread.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use pharmastock_core::MedicineId;
use pharmastock_events::{Event, EventBus};

/// Why a stock movement happened. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockReason {
    Opening,
    Sale,
    CustomerReturn,
    SupplierReturn,
    ManualEdit,
    Receipt,
    Reconciliation,
}

impl StockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockReason::Opening => "opening",
            StockReason::Sale => "sale",
            StockReason::CustomerReturn => "customer_return",
            StockReason::SupplierReturn => "supplier_return",
            StockReason::ManualEdit => "manual_edit",
            StockReason::Receipt => "receipt",
            StockReason::Reconciliation => "reconciliation",
        }
    }
}

impl core::fmt::Display for StockReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current quantity of one medicine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockEntry {
    pub medicine_id: MedicineId,
    pub quantity: i64,
}

/// A requested change for one medicine, used by multi-medicine commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub medicine_id: MedicineId,
    pub delta: i64,
}

/// Event: a committed stock change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChanged {
    pub medicine_id: MedicineId,
    pub previous_quantity: i64,
    pub new_quantity: i64,
    pub delta: i64,
    pub reason: StockReason,
    pub occurred_at: DateTime<Utc>,
}

impl StockChanged {
    pub fn is_decrease(&self) -> bool {
        self.delta < 0
    }
}

impl Event for StockChanged {
    fn event_type(&self) -> &'static str {
        "inventory.stock.changed"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// Record-store write failure reported by a `persist` callback.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("record store write failed: {0}")]
pub struct PersistenceError(pub String);

impl PersistenceError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    /// The adjustment would make the quantity negative.
    #[error("insufficient stock for medicine {medicine_id}: available {available}, requested change {delta}")]
    InsufficientStock {
        medicine_id: MedicineId,
        available: i64,
        delta: i64,
    },

    /// Malformed input, rejected before any mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Persisting the change failed; the in-memory change was rolled back.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Callback invoked after every committed change.
pub type StockListener = Arc<dyn Fn(&StockChanged) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, StockListener)>,
}

/// Handle returned by [`StockLedger::subscribe`].
///
/// Dropping the handle does not unsubscribe; call [`StockSubscription::unsubscribe`].
#[derive(Debug)]
pub struct StockSubscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl StockSubscription {
    /// Remove the listener. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(listeners) = self.listeners.upgrade() else {
            return false;
        };
        let mut listeners = listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.entries.len();
        listeners.entries.retain(|(id, _)| *id != self.id);
        listeners.entries.len() != before
    }
}

impl core::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Listeners")
            .field("next_id", &self.next_id)
            .field("count", &self.entries.len())
            .finish()
    }
}

/// Authoritative per-medicine stock quantities.
///
/// Construct one per process and share it by `Arc`; the host wiring owns that
/// expectation.
#[derive(Debug, Default)]
pub struct StockLedger {
    commit: Mutex<()>,
    levels: RwLock<HashMap<MedicineId, i64>>,
    listeners: Arc<Mutex<Listeners>>,
}

impl StockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the ledger from a durable snapshot (process restart).
    pub fn from_snapshot(entries: impl IntoIterator<Item = StockEntry>) -> Result<Self, StockError> {
        let mut levels = HashMap::new();
        for entry in entries {
            if entry.quantity < 0 {
                return Err(StockError::Validation(format!(
                    "snapshot quantity for medicine {} is negative ({})",
                    entry.medicine_id, entry.quantity
                )));
            }
            if levels.insert(entry.medicine_id, entry.quantity).is_some() {
                return Err(StockError::Validation(format!(
                    "snapshot lists medicine {} twice",
                    entry.medicine_id
                )));
            }
        }

        info!(medicines = levels.len(), "stock ledger loaded from snapshot");
        Ok(Self {
            commit: Mutex::new(()),
            levels: RwLock::new(levels),
            listeners: Arc::new(Mutex::new(Listeners::default())),
        })
    }

    /// Current quantity; `0` for medicines the ledger has never seen.
    pub fn get_quantity(&self, medicine_id: MedicineId) -> i64 {
        let levels = self.levels.read().unwrap_or_else(PoisonError::into_inner);
        levels.get(&medicine_id).copied().unwrap_or(0)
    }

    /// All tracked quantities, ordered by medicine id.
    pub fn snapshot(&self) -> Vec<StockEntry> {
        let levels = self.levels.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<StockEntry> = levels
            .iter()
            .map(|(medicine_id, quantity)| StockEntry {
                medicine_id: *medicine_id,
                quantity: *quantity,
            })
            .collect();
        entries.sort_by_key(|e| e.medicine_id);
        entries
    }

    /// Apply `delta` and notify listeners. Returns the new quantity.
    pub fn adjust(
        &self,
        medicine_id: MedicineId,
        delta: i64,
        reason: StockReason,
    ) -> Result<i64, StockError> {
        self.adjust_durable(medicine_id, delta, reason, |_| Ok(()))
    }

    /// Apply `delta`, persist it, then notify listeners.
    ///
    /// `persist` runs after the in-memory update, outside the quantity lock.
    /// If it fails the change is rolled back and no listener is notified.
    pub fn adjust_durable<F>(
        &self,
        medicine_id: MedicineId,
        delta: i64,
        reason: StockReason,
        persist: F,
    ) -> Result<i64, StockError>
    where
        F: FnOnce(&StockChanged) -> Result<(), PersistenceError>,
    {
        let changes = self.commit_deltas(
            &[StockDelta { medicine_id, delta }],
            reason,
            |changes| persist(&changes[0]),
        )?;
        Ok(changes[0].new_quantity)
    }

    /// Apply several deltas all-or-nothing under one commit.
    ///
    /// Either every delta is applied, persisted and notified (in input order),
    /// or none is. Deltas for the same medicine are applied cumulatively.
    pub fn apply_batch<F>(
        &self,
        deltas: &[StockDelta],
        reason: StockReason,
        persist: F,
    ) -> Result<Vec<StockChanged>, StockError>
    where
        F: FnOnce(&[StockChanged]) -> Result<(), PersistenceError>,
    {
        if deltas.is_empty() {
            return Ok(Vec::new());
        }
        self.commit_deltas(deltas, reason, persist)
    }

    fn commit_deltas<F>(
        &self,
        deltas: &[StockDelta],
        reason: StockReason,
        persist: F,
    ) -> Result<Vec<StockChanged>, StockError>
    where
        F: FnOnce(&[StockChanged]) -> Result<(), PersistenceError>,
    {
        if let Some(zero) = deltas.iter().find(|d| d.delta == 0) {
            return Err(StockError::Validation(format!(
                "delta for medicine {} cannot be zero",
                zero.medicine_id
            )));
        }

        let _commit = self.commit.lock().unwrap_or_else(PoisonError::into_inner);
        let occurred_at = Utc::now();

        let (changes, originals) = {
            let mut levels = self.levels.write().unwrap_or_else(PoisonError::into_inner);

            // Stage against a scratch view so a late rejection leaves `levels` untouched.
            let mut staged: HashMap<MedicineId, i64> = HashMap::new();
            let mut originals: Vec<(MedicineId, Option<i64>)> = Vec::new();
            let mut changes = Vec::with_capacity(deltas.len());

            for d in deltas {
                let previous = match staged.get(&d.medicine_id) {
                    Some(q) => *q,
                    None => {
                        let original = levels.get(&d.medicine_id).copied();
                        originals.push((d.medicine_id, original));
                        original.unwrap_or(0)
                    }
                };
                let new_quantity = previous.checked_add(d.delta).ok_or_else(|| {
                    StockError::Validation(format!(
                        "quantity overflow for medicine {}",
                        d.medicine_id
                    ))
                })?;
                if new_quantity < 0 {
                    warn!(
                        medicine_id = %d.medicine_id,
                        available = previous,
                        delta = d.delta,
                        reason = %reason,
                        "stock adjustment rejected: insufficient stock"
                    );
                    return Err(StockError::InsufficientStock {
                        medicine_id: d.medicine_id,
                        available: previous,
                        delta: d.delta,
                    });
                }
                staged.insert(d.medicine_id, new_quantity);
                changes.push(StockChanged {
                    medicine_id: d.medicine_id,
                    previous_quantity: previous,
                    new_quantity,
                    delta: d.delta,
                    reason,
                    occurred_at,
                });
            }

            levels.extend(staged);
            (changes, originals)
        };

        if let Err(err) = persist(&changes) {
            self.restore(&originals);
            error!(
                error = %err,
                changes = changes.len(),
                reason = %reason,
                "stock change rolled back after persistence failure"
            );
            return Err(err.into());
        }

        for change in &changes {
            info!(
                medicine_id = %change.medicine_id,
                delta = change.delta,
                quantity = change.new_quantity,
                reason = %change.reason,
                "stock adjusted"
            );
        }

        self.notify(&changes);
        Ok(changes)
    }

    fn restore(&self, originals: &[(MedicineId, Option<i64>)]) {
        let mut levels = self.levels.write().unwrap_or_else(PoisonError::into_inner);
        for (medicine_id, original) in originals {
            match original {
                Some(q) => {
                    levels.insert(*medicine_id, *q);
                }
                None => {
                    levels.remove(medicine_id);
                }
            }
        }
    }

    /// Register a listener for committed changes.
    ///
    /// Listeners are called in registration order. One that returns `Err` or
    /// panics is logged and skipped; the rest still receive the change.
    pub fn subscribe<F>(&self, listener: F) -> StockSubscription
    where
        F: Fn(&StockChanged) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(listener)));
        debug!(subscription = id, "stock listener registered");

        StockSubscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Asynchronous notification mode: publish every committed change into `bus`.
    ///
    /// Publishing happens inside the commit, so the bus sees changes in
    /// mutation order while consumers process them on their own threads.
    pub fn forward_to<B>(&self, bus: B) -> StockSubscription
    where
        B: EventBus<StockChanged> + 'static,
    {
        self.subscribe(move |change| {
            bus.publish(change.clone())
                .map_err(|e| anyhow::anyhow!("stock change publish failed: {e:?}"))
        })
    }

    fn notify(&self, changes: &[StockChanged]) {
        // Snapshot so a listener may unsubscribe itself without deadlocking.
        let listeners: Vec<(u64, StockListener)> = {
            let guard = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            guard.entries.clone()
        };

        for change in changes {
            for (id, listener) in &listeners {
                match catch_unwind(AssertUnwindSafe(|| listener(change))) {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        error!(
                            subscription = id,
                            medicine_id = %change.medicine_id,
                            error = %err,
                            "stock listener failed"
                        );
                    }
                    Err(_) => {
                        error!(
                            subscription = id,
                            medicine_id = %change.medicine_id,
                            "stock listener panicked"
                        );
                    }
                }
            }
        }
    }
}
