use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use pharmastock_core::{GrnId, MedicineId, PurchaseOrderId, ReorderRuleId, SupplierId};
use pharmastock_infra::{StockConfig, StockService};
use pharmastock_inventory::{PhysicalCount, StockReason, ValuationMethod};
use pharmastock_purchasing::{
    GrnItem, ItemCondition, NewGrn, NewReorderRule, PurchaseOrderStatus,
};

mod seed;

use seed::Seed;

#[derive(Parser)]
#[command(name = "pharmastock")]
#[command(about = "Pharmacy stock ledger and replenishment", long_about = None)]
struct Cli {
    /// Catalog and supplier seed (JSON)
    #[arg(long, env = "PHARMASTOCK_SEED", default_value = "pharmastock-seed.json")]
    seed: PathBuf,

    /// Record store file (JSON); created on first write
    #[arg(long, env = "PHARMASTOCK_STORE", default_value = "pharmastock-store.json")]
    store: PathBuf,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print stock levels (one medicine, or all)
    Stock {
        #[arg(long)]
        medicine: Option<MedicineId>,
    },

    /// Adjust stock for a sale, return or manual edit
    Adjust {
        #[arg(long)]
        medicine: MedicineId,
        /// Signed quantity change
        #[arg(long, allow_hyphen_values = true)]
        delta: i64,
        #[arg(long, value_enum)]
        reason: ReasonArg,
    },

    /// Inventory valuation report
    Valuation {
        /// fifo | lifo | weighted_average
        #[arg(long, default_value = "fifo")]
        method: ValuationMethod,
    },

    /// Low-stock alerts (creates nothing)
    Alerts,

    /// Create a reorder rule
    RuleAdd {
        #[arg(long)]
        medicine: MedicineId,
        #[arg(long)]
        min: i64,
        #[arg(long)]
        max: i64,
        #[arg(long)]
        quantity: i64,
        #[arg(long)]
        supplier: SupplierId,
    },

    /// Deactivate a reorder rule
    RuleDeactivate {
        #[arg(long)]
        rule: ReorderRuleId,
    },

    /// List reorder rules
    Rules,

    /// Evaluate every reorder rule and draft orders for low stock
    Reorder,

    /// List purchase orders
    Orders {
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },

    /// Move a purchase order along its lifecycle
    OrderStatus {
        #[arg(long)]
        order: PurchaseOrderId,
        #[arg(long, value_enum)]
        status: StatusArg,
    },

    /// Record and apply a single-item delivery against an order
    Receive {
        #[arg(long)]
        order: PurchaseOrderId,
        /// Defaults to the order's first item
        #[arg(long)]
        medicine: Option<MedicineId>,
        #[arg(long)]
        quantity: i64,
        #[arg(long)]
        batch: String,
        /// YYYY-MM-DD
        #[arg(long)]
        expiry: NaiveDate,
        #[arg(long, value_enum, default_value = "good")]
        condition: ConditionArg,
        #[arg(long = "by")]
        received_by: String,
    },

    /// Process a recorded GRN
    Process {
        #[arg(long)]
        grn: GrnId,
    },

    /// List goods-received-notes
    Grns {
        #[arg(long)]
        order: Option<PurchaseOrderId>,
    },

    /// Batches expiring within the configured window
    Expiring {
        /// Include only already expired batches
        #[arg(long, default_value_t = false)]
        expired: bool,
    },

    /// Compare a physical count with the ledger
    Reconcile {
        /// MEDICINE_ID=COUNT, repeatable
        #[arg(long = "count", required = true, value_parser = parse_count)]
        counts: Vec<PhysicalCount>,
        /// Apply the variances to the ledger
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },

    /// Medicines whose batch total differs from the ledger
    Drift,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReasonArg {
    Opening,
    Sale,
    CustomerReturn,
    SupplierReturn,
    ManualEdit,
}

impl From<ReasonArg> for StockReason {
    fn from(arg: ReasonArg) -> Self {
        match arg {
            ReasonArg::Opening => StockReason::Opening,
            ReasonArg::Sale => StockReason::Sale,
            ReasonArg::CustomerReturn => StockReason::CustomerReturn,
            ReasonArg::SupplierReturn => StockReason::SupplierReturn,
            ReasonArg::ManualEdit => StockReason::ManualEdit,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Draft,
    Sent,
    Confirmed,
    PartiallyDelivered,
    Received,
    Cancelled,
}

impl From<StatusArg> for PurchaseOrderStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Draft => PurchaseOrderStatus::Draft,
            StatusArg::Sent => PurchaseOrderStatus::Sent,
            StatusArg::Confirmed => PurchaseOrderStatus::Confirmed,
            StatusArg::PartiallyDelivered => PurchaseOrderStatus::PartiallyDelivered,
            StatusArg::Received => PurchaseOrderStatus::Received,
            StatusArg::Cancelled => PurchaseOrderStatus::Cancelled,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ConditionArg {
    Good,
    Damaged,
    Expired,
}

impl From<ConditionArg> for ItemCondition {
    fn from(arg: ConditionArg) -> Self {
        match arg {
            ConditionArg::Good => ItemCondition::Good,
            ConditionArg::Damaged => ItemCondition::Damaged,
            ConditionArg::Expired => ItemCondition::Expired,
        }
    }
}

fn parse_count(raw: &str) -> Result<PhysicalCount, String> {
    let (id, count) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected MEDICINE_ID=COUNT, got '{raw}'"))?;
    Ok(PhysicalCount {
        medicine_id: id.trim().parse().map_err(|e| format!("{e}"))?,
        physical_count: count.trim().parse().map_err(|e| format!("{e}"))?,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    pharmastock_observability::init();
    let cli = Cli::parse();

    let config = StockConfig::from_env().context("loading configuration")?;
    let seed = Seed::load(&cli.seed)?;
    let store = Arc::new(seed::load_store(&cli.store)?);
    let service = StockService::open(config, seed.catalog(), seed.suppliers(), store.clone())
        .context("opening stock service")?;

    let writes = store.len();
    run(&service, cli.cmd)?;

    if store.len() != writes {
        seed::save_store(&store, &cli.store)?;
        tracing::info!(records = store.len(), path = %cli.store.display(), "record store saved");
    }
    Ok(())
}

fn run(service: &StockService, cmd: Commands) -> Result<()> {
    let today = Utc::now().date_naive();

    match cmd {
        Commands::Stock { medicine: Some(id) } => print_json(&service.stock(id)),
        Commands::Stock { medicine: None } => print_json(&service.stock_levels()),
        Commands::Adjust {
            medicine,
            delta,
            reason,
        } => {
            let quantity = service.adjust_stock(medicine, delta, reason.into())?;
            print_json(&quantity)
        }
        Commands::Valuation { method } => print_json(&service.valuation(method)),
        Commands::Alerts => print_json(&service.reorder_alerts()),
        Commands::RuleAdd {
            medicine,
            min,
            max,
            quantity,
            supplier,
        } => {
            let rule = service.create_reorder_rule(NewReorderRule {
                medicine_id: medicine,
                min_threshold: min,
                max_threshold: max,
                reorder_quantity: quantity,
                supplier_id: supplier,
            })?;
            print_json(&rule)
        }
        Commands::RuleDeactivate { rule } => {
            if !service.deactivate_reorder_rule(rule)? {
                bail!("unknown reorder rule {rule}");
            }
            Ok(())
        }
        Commands::Rules => print_json(&service.reorder_rules()),
        Commands::Reorder => print_json(&service.run_reorder(Utc::now())),
        Commands::Orders { status: Some(status) } => {
            print_json(&service.purchase_orders_by_status(status.into()))
        }
        Commands::Orders { status: None } => print_json(&service.purchase_orders()),
        Commands::OrderStatus { order, status } => {
            if !service.update_order_status(order, status.into())? {
                bail!("unknown purchase order {order}");
            }
            print_json(&service.purchase_order(order))
        }
        Commands::Receive {
            order,
            medicine,
            quantity,
            batch,
            expiry,
            condition,
            received_by,
        } => {
            let po = service
                .purchase_order(order)
                .ok_or_else(|| anyhow!("unknown purchase order {order}"))?;
            let item = match medicine {
                Some(id) => po.items.iter().find(|i| i.medicine_id == id),
                None => po.items.first(),
            }
            .ok_or_else(|| anyhow!("medicine is not on purchase order {order}"))?;

            let grn = service.receive_goods(NewGrn {
                purchase_order_id: order,
                received_by,
                received_at: Utc::now(),
                items: vec![GrnItem {
                    medicine_id: item.medicine_id,
                    ordered_quantity: item.quantity,
                    received_quantity: quantity,
                    batch_number: batch,
                    expiry_date: expiry,
                    condition: condition.into(),
                }],
                notes: None,
            })?;
            print_json(&grn)
        }
        Commands::Process { grn } => {
            if !service.process_grn(grn)? {
                bail!("unknown GRN {grn}");
            }
            Ok(())
        }
        Commands::Grns { order: Some(order) } => print_json(&service.grns_for_order(order)),
        Commands::Grns { order: None } => print_json(&service.grns()),
        Commands::Expiring { expired: true } => print_json(&service.expired_batches(today)),
        Commands::Expiring { expired: false } => print_json(&service.expiring_batches(today)),
        Commands::Reconcile { counts, confirm } => {
            let report = if confirm {
                service.confirm_reconciliation(&counts)?
            } else {
                service.reconciliation_report(&counts)?
            };
            print_json(&report)
        }
        Commands::Drift => print_json(&service.batch_drift()),
    }
}
