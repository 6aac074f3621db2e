//! Batch expiry risk.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use pharmastock_core::MedicineId;

use crate::batch::BatchRegistry;
use crate::catalog::Medicine;

pub const DEFAULT_EXPIRY_WINDOW_DAYS: i64 = 30;

/// A batch at or inside the expiry window.
///
/// `days_until_expiry` is negative for batches that have already expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiringBatch {
    pub medicine_id: MedicineId,
    pub medicine_name: String,
    pub batch_number: String,
    pub expiry_date: NaiveDate,
    pub quantity: i64,
    pub days_until_expiry: i64,
}

/// Scans the batch registry for lots nearing expiry.
#[derive(Debug, Clone, Copy)]
pub struct ExpiryTracker {
    window_days: i64,
}

impl Default for ExpiryTracker {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRY_WINDOW_DAYS)
    }
}

impl ExpiryTracker {
    pub fn new(window_days: i64) -> Self {
        Self { window_days }
    }

    pub fn window_days(&self) -> i64 {
        self.window_days
    }

    /// Batches with `expiry_date <= today + days`, soonest first.
    ///
    /// Already expired batches are included and sort ahead of the rest.
    pub fn batches_near_expiry(
        registry: &BatchRegistry,
        medicines: &[Medicine],
        days: i64,
        today: NaiveDate,
    ) -> Vec<ExpiringBatch> {
        let mut expiring: Vec<ExpiringBatch> = medicines
            .iter()
            .flat_map(|medicine| {
                registry
                    .batches_for(medicine.id)
                    .into_iter()
                    .map(move |batch| ExpiringBatch {
                        medicine_id: medicine.id,
                        medicine_name: medicine.name.clone(),
                        days_until_expiry: (batch.expiry_date - today).num_days(),
                        batch_number: batch.batch_number,
                        expiry_date: batch.expiry_date,
                        quantity: batch.quantity,
                    })
            })
            .filter(|b| b.days_until_expiry <= days)
            .collect();

        expiring.sort_by(|a, b| {
            a.days_until_expiry
                .cmp(&b.days_until_expiry)
                .then_with(|| a.medicine_name.cmp(&b.medicine_name))
                .then_with(|| a.batch_number.cmp(&b.batch_number))
        });
        expiring
    }

    /// Batches whose expiry date is before `today`.
    pub fn expired_batches(
        registry: &BatchRegistry,
        medicines: &[Medicine],
        today: NaiveDate,
    ) -> Vec<ExpiringBatch> {
        Self::batches_near_expiry(registry, medicines, -1, today)
    }
}
