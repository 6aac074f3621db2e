//! Physical count reconciliation.
//!
//! The reconciler only reports. Correcting the ledger is a separate,
//! operator-confirmed action that calls `StockLedger::adjust` with
//! `StockReason::Reconciliation`.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use pharmastock_core::{DomainError, DomainResult, MedicineId};

use crate::batch::BatchRegistry;
use crate::ledger::StockLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalCount {
    pub medicine_id: MedicineId,
    pub physical_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub medicine_id: MedicineId,
    pub system_count: i64,
    pub physical_count: i64,
    /// `physical_count - system_count`.
    pub variance: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub discrepancies: Vec<Discrepancy>,
    /// Number of ledger adjustments needed to match the count.
    pub adjustments: usize,
}

/// Ledger quantity vs. batch sum for one medicine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDrift {
    pub medicine_id: MedicineId,
    pub ledger_quantity: i64,
    pub batch_quantity: i64,
    /// `batch_quantity - ledger_quantity`.
    pub drift: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StockReconciler;

impl StockReconciler {
    /// Compare a physical count against the ledger.
    ///
    /// Zero-variance lines are left out of the report. Negative or duplicate
    /// counts are rejected.
    pub fn reconcile(
        ledger: &StockLedger,
        counts: &[PhysicalCount],
    ) -> DomainResult<ReconciliationReport> {
        let mut seen = HashSet::with_capacity(counts.len());
        for count in counts {
            if count.physical_count < 0 {
                return Err(DomainError::validation(format!(
                    "physical count for medicine {} cannot be negative",
                    count.medicine_id
                )));
            }
            if !seen.insert(count.medicine_id) {
                return Err(DomainError::validation(format!(
                    "medicine {} counted twice",
                    count.medicine_id
                )));
            }
        }

        let discrepancies: Vec<Discrepancy> = counts
            .iter()
            .filter_map(|count| {
                let system_count = ledger.get_quantity(count.medicine_id);
                let variance = count.physical_count - system_count;
                (variance != 0).then_some(Discrepancy {
                    medicine_id: count.medicine_id,
                    system_count,
                    physical_count: count.physical_count,
                    variance,
                })
            })
            .collect();

        Ok(ReconciliationReport {
            adjustments: discrepancies.len(),
            discrepancies,
        })
    }

    /// Medicines whose batch sum differs from the ledger quantity.
    pub fn batch_drift(ledger: &StockLedger, registry: &BatchRegistry) -> Vec<BatchDrift> {
        let ids: BTreeSet<MedicineId> = ledger
            .snapshot()
            .into_iter()
            .map(|e| e.medicine_id)
            .chain(registry.medicine_ids())
            .collect();

        ids.into_iter()
            .filter_map(|medicine_id| {
                let ledger_quantity = ledger.get_quantity(medicine_id);
                let batch_quantity = registry.total_for(medicine_id);
                let drift = batch_quantity - ledger_quantity;
                (drift != 0).then_some(BatchDrift {
                    medicine_id,
                    ledger_quantity,
                    batch_quantity,
                    drift,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Batch;
    use crate::ledger::StockReason;
    use chrono::{NaiveDate, Utc};

    #[test]
    fn surplus_is_reported_with_positive_variance() {
        let ledger = StockLedger::new();
        let id = MedicineId::new();
        ledger.adjust(id, 42, StockReason::Opening).unwrap();

        let report = StockReconciler::reconcile(
            &ledger,
            &[PhysicalCount {
                medicine_id: id,
                physical_count: 50,
            }],
        )
        .unwrap();

        assert_eq!(
            report.discrepancies,
            vec![Discrepancy {
                medicine_id: id,
                system_count: 42,
                physical_count: 50,
                variance: 8,
            }]
        );
        assert_eq!(report.adjustments, 1);
    }

    #[test]
    fn matching_counts_are_excluded() {
        let ledger = StockLedger::new();
        let matched = MedicineId::new();
        let short = MedicineId::new();
        ledger.adjust(matched, 12, StockReason::Opening).unwrap();
        ledger.adjust(short, 12, StockReason::Opening).unwrap();

        let report = StockReconciler::reconcile(
            &ledger,
            &[
                PhysicalCount {
                    medicine_id: matched,
                    physical_count: 12,
                },
                PhysicalCount {
                    medicine_id: short,
                    physical_count: 9,
                },
            ],
        )
        .unwrap();

        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(report.discrepancies[0].medicine_id, short);
        assert_eq!(report.discrepancies[0].variance, -3);
    }

    #[test]
    fn reconcile_never_touches_the_ledger() {
        let ledger = StockLedger::new();
        let id = MedicineId::new();
        ledger.adjust(id, 5, StockReason::Opening).unwrap();

        StockReconciler::reconcile(
            &ledger,
            &[PhysicalCount {
                medicine_id: id,
                physical_count: 0,
            }],
        )
        .unwrap();

        assert_eq!(ledger.get_quantity(id), 5);
    }

    #[test]
    fn negative_and_duplicate_counts_are_rejected() {
        let ledger = StockLedger::new();
        let id = MedicineId::new();

        let negative = StockReconciler::reconcile(
            &ledger,
            &[PhysicalCount {
                medicine_id: id,
                physical_count: -1,
            }],
        );
        assert!(matches!(negative, Err(DomainError::Validation(_))));

        let count = PhysicalCount {
            medicine_id: id,
            physical_count: 1,
        };
        let duplicate = StockReconciler::reconcile(&ledger, &[count, count]);
        assert!(matches!(duplicate, Err(DomainError::Validation(_))));
    }

    #[test]
    fn drift_reports_manual_stock_without_batches_and_sales_from_batches() {
        let ledger = StockLedger::new();
        let registry = BatchRegistry::new();
        let received = MedicineId::new();
        let manual = MedicineId::new();

        ledger.adjust(received, 60, StockReason::Receipt).unwrap();
        registry
            .add(Batch {
                medicine_id: received,
                batch_number: "LOT-1".to_string(),
                expiry_date: NaiveDate::from_ymd_opt(2027, 6, 30).unwrap(),
                quantity: 60,
                received_date: Utc::now(),
            })
            .unwrap();
        ledger.adjust(received, -10, StockReason::Sale).unwrap();
        ledger.adjust(manual, 5, StockReason::ManualEdit).unwrap();

        let mut drift = StockReconciler::batch_drift(&ledger, &registry);
        drift.sort_by_key(|d| d.ledger_quantity);

        assert_eq!(drift.len(), 2);
        assert_eq!(drift[0].medicine_id, manual);
        assert_eq!(drift[0].drift, -5);
        assert_eq!(drift[1].medicine_id, received);
        assert_eq!(drift[1].drift, 10);
    }
}
