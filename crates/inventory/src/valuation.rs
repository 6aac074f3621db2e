//! Inventory valuation under a stated costing convention.
//!
//! The conventions are heuristics, not lot-matched costing: every unit of a
//! medicine is valued at its catalog purchase price times a fixed multiplier.
//!
//! | method | unit cost |
//! |---|---|
//! | FIFO | purchase price |
//! | LIFO | purchase price × 1.05 |
//! | Weighted average | purchase price × 1.025 |
//!
//! A real costing engine (tracking the cost of each received lot) is a
//! separate, larger undertaking.

use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use pharmastock_core::{DomainError, MedicineId};

use crate::catalog::Medicine;
use crate::ledger::StockLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuationMethod {
    Fifo,
    Lifo,
    WeightedAverage,
}

impl ValuationMethod {
    /// Multiplier applied to the purchase price.
    pub fn multiplier(&self) -> Decimal {
        match self {
            ValuationMethod::Fifo => Decimal::ONE,
            ValuationMethod::Lifo => Decimal::new(105, 2),
            ValuationMethod::WeightedAverage => Decimal::new(1025, 3),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValuationMethod::Fifo => "fifo",
            ValuationMethod::Lifo => "lifo",
            ValuationMethod::WeightedAverage => "weighted_average",
        }
    }
}

impl FromStr for ValuationMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(ValuationMethod::Fifo),
            "lifo" => Ok(ValuationMethod::Lifo),
            "weighted_average" | "weighted-average" | "weightedaverage" | "average" => {
                Ok(ValuationMethod::WeightedAverage)
            }
            other => Err(DomainError::validation(format!(
                "unknown valuation method '{other}'"
            ))),
        }
    }
}

/// One medicine to value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationItem {
    pub medicine_id: MedicineId,
    pub name: String,
    pub quantity: i64,
    pub purchase_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationLine {
    pub medicine_id: MedicineId,
    pub medicine_name: String,
    pub quantity: i64,
    pub average_cost: Decimal,
    pub total_value: Decimal,
}

/// Derived report; never persisted as a source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryValuation {
    pub method: ValuationMethod,
    pub total_value: Decimal,
    pub breakdown: Vec<ValuationLine>,
}

/// Stateless valuation functions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValuationCalculator;

impl ValuationCalculator {
    pub fn valuate(items: &[ValuationItem], method: ValuationMethod) -> InventoryValuation {
        let multiplier = method.multiplier();
        let mut total_value = Decimal::ZERO;
        let mut breakdown = Vec::with_capacity(items.len());

        for item in items {
            // Negative inputs are valued at zero so the total never goes negative.
            let quantity = item.quantity.max(0);
            let price = if item.purchase_price.is_sign_negative() {
                warn!(
                    medicine_id = %item.medicine_id,
                    price = %item.purchase_price,
                    "negative purchase price valued at zero"
                );
                Decimal::ZERO
            } else {
                item.purchase_price
            };

            let average_cost = price * multiplier;
            let line_value = Decimal::from(quantity) * average_cost;
            total_value += line_value;

            breakdown.push(ValuationLine {
                medicine_id: item.medicine_id,
                medicine_name: item.name.clone(),
                quantity,
                average_cost,
                total_value: line_value,
            });
        }

        InventoryValuation {
            method,
            total_value,
            breakdown,
        }
    }

    /// Value current ledger quantities at catalog purchase prices.
    pub fn valuate_ledger(
        ledger: &StockLedger,
        medicines: &[Medicine],
        method: ValuationMethod,
    ) -> InventoryValuation {
        let items: Vec<ValuationItem> = medicines
            .iter()
            .map(|m| ValuationItem {
                medicine_id: m.id,
                name: m.name.clone(),
                quantity: ledger.get_quantity(m.id),
                purchase_price: m.purchase_price,
            })
            .collect();
        Self::valuate(&items, method)
    }
}
