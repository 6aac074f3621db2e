//! Integration tests for the full stock pipeline.
//!
//! Tests: StockService → ledger / purchasing components → RecordStore → restart
//!
//! Verifies:
//! - sales, reorders and receipts keep the ledger, batches and orders aligned
//! - a failed record-store write leaves no trace and notifies nobody
//! - reopening on the same store restores state and replays staged receipts

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use chrono::{Duration, NaiveDate, Utc};
    use rust_decimal_macros::dec;

    use pharmastock_core::{GrnId, MedicineId, SupplierId};
    use pharmastock_inventory::{
        Batch, InMemoryCatalog, Medicine, PhysicalCount, StockDelta, StockReason, ValuationMethod,
    };
    use pharmastock_purchasing::{
        GrnItem, InMemorySupplierDirectory, ItemCondition, NewGrn, NewPurchaseOrder,
        NewPurchaseOrderItem, NewReorderRule, OrderOrigin, PurchaseOrder, PurchaseOrderStatus,
        ReceiptEntry, ReceiptState,
    };

    use crate::config::StockConfig;
    use crate::record_store::{InMemoryRecordStore, RecordBody, RecordStore, StockRecord};
    use crate::service::StockService;

    struct Pharmacy {
        catalog: Arc<InMemoryCatalog>,
        suppliers: Arc<InMemorySupplierDirectory>,
        store: Arc<InMemoryRecordStore>,
        paracetamol: Medicine,
        supplier_id: SupplierId,
    }

    fn test_pharmacy() -> Pharmacy {
        let paracetamol = Medicine {
            id: MedicineId::new(),
            name: "Paracetamol 500mg".to_string(),
            category: "analgesic".to_string(),
            purchase_price: dec!(100),
            sale_price: dec!(140),
        };
        let suppliers = Arc::new(InMemorySupplierDirectory::new());
        let supplier_id = SupplierId::new();
        suppliers.insert(supplier_id, "MedSupply Co");

        Pharmacy {
            catalog: Arc::new(InMemoryCatalog::with_medicines([paracetamol.clone()])),
            suppliers,
            store: Arc::new(InMemoryRecordStore::new()),
            paracetamol,
            supplier_id,
        }
    }

    fn open(p: &Pharmacy, config: StockConfig) -> StockService {
        StockService::open(
            config,
            p.catalog.clone(),
            p.suppliers.clone(),
            p.store.clone(),
        )
        .unwrap()
    }

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2027, 3, 31).unwrap()
    }

    fn delivery(order: &PurchaseOrder, medicine_id: MedicineId, received: i64, lot: &str) -> NewGrn {
        NewGrn {
            purchase_order_id: order.id,
            received_by: "pharmacist on duty".to_string(),
            received_at: Utc::now(),
            items: vec![GrnItem {
                medicine_id,
                ordered_quantity: order.items[0].quantity,
                received_quantity: received,
                batch_number: lot.to_string(),
                expiry_date: expiry(),
                condition: ItemCondition::Good,
            }],
            notes: None,
        }
    }

    #[test]
    fn low_stock_reorder_then_receipt_restocks() {
        let p = test_pharmacy();
        let service = open(&p, StockConfig::default());
        let id = p.paracetamol.id;

        service
            .create_reorder_rule(NewReorderRule {
                medicine_id: id,
                min_threshold: 10,
                max_threshold: 200,
                reorder_quantity: 100,
                supplier_id: p.supplier_id,
            })
            .unwrap();
        service.adjust_stock(id, 15, StockReason::Opening).unwrap();

        // 15 -> 12 stays above the threshold, 12 -> 8 falls below it.
        service.adjust_stock(id, -3, StockReason::Sale).unwrap();
        assert!(service.purchase_orders().is_empty());
        service.adjust_stock(id, -4, StockReason::Sale).unwrap();

        let orders = service.purchase_orders();
        assert_eq!(orders.len(), 1);
        let order = &orders[0];
        assert!(matches!(order.origin, OrderOrigin::Reorder { .. }));
        assert_eq!(order.total, dec!(11700));
        assert_eq!(service.reorder_alerts().len(), 1);

        assert!(service.update_order_status(order.id, PurchaseOrderStatus::Sent).unwrap());
        assert!(service.update_order_status(order.id, PurchaseOrderStatus::Confirmed).unwrap());

        service.receive_goods(delivery(order, id, 60, "PCM-A")).unwrap();
        assert_eq!(service.stock(id), 68);
        assert_eq!(
            service.purchase_order(order.id).unwrap().status,
            PurchaseOrderStatus::PartiallyDelivered
        );

        service.receive_goods(delivery(order, id, 40, "PCM-B")).unwrap();
        assert_eq!(service.stock(id), 108);
        assert_eq!(
            service.purchase_order(order.id).unwrap().status,
            PurchaseOrderStatus::Received
        );
        assert_eq!(service.grns_for_order(order.id).len(), 2);
        assert!(service.reorder_alerts().is_empty());

        let valuation = service.valuation(ValuationMethod::Lifo);
        assert_eq!(valuation.total_value, dec!(11340));

        // Opening stock and sales never created batches.
        let drift = service.batch_drift();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].drift, -8);

        let window_start = expiry() - Duration::days(10);
        assert_eq!(service.expiring_batches(window_start).len(), 2);
        assert!(service.expired_batches(window_start).is_empty());
    }

    #[test]
    fn every_sale_below_threshold_drafts_another_order() {
        let p = test_pharmacy();
        let service = open(&p, StockConfig::default());
        let id = p.paracetamol.id;
        service
            .create_reorder_rule(NewReorderRule {
                medicine_id: id,
                min_threshold: 10,
                max_threshold: 200,
                reorder_quantity: 100,
                supplier_id: p.supplier_id,
            })
            .unwrap();
        service.adjust_stock(id, 9, StockReason::Opening).unwrap();
        assert!(service.purchase_orders().is_empty());

        service.adjust_stock(id, -1, StockReason::Sale).unwrap();
        assert_eq!(service.purchase_orders().len(), 1);
        service.adjust_stock(id, -1, StockReason::Sale).unwrap();
        assert_eq!(service.purchase_orders().len(), 2);

        service.adjust_stock(id, 1, StockReason::CustomerReturn).unwrap();
        assert_eq!(service.purchase_orders().len(), 2);
    }

    #[test]
    fn failed_store_write_rolls_back_and_notifies_nobody() {
        let p = test_pharmacy();
        let service = open(&p, StockConfig::default());
        let id = p.paracetamol.id;
        service
            .create_reorder_rule(NewReorderRule {
                medicine_id: id,
                min_threshold: 5,
                max_threshold: 50,
                reorder_quantity: 20,
                supplier_id: p.supplier_id,
            })
            .unwrap();
        service.adjust_stock(id, 10, StockReason::Opening).unwrap();
        let records = p.store.len();

        p.store.set_unavailable(true);
        let err = service.adjust_stock(id, -8, StockReason::Sale).unwrap_err();

        assert!(err.is_persistence());
        assert_eq!(service.stock(id), 10);
        assert!(service.purchase_orders().is_empty());
        assert_eq!(p.store.len(), records);
    }

    #[test]
    fn receipts_and_direct_reconciliations_are_refused_outside_their_paths() {
        let p = test_pharmacy();
        let service = open(&p, StockConfig::default());

        assert!(service
            .adjust_stock(p.paracetamol.id, 5, StockReason::Receipt)
            .is_err());
        assert!(service
            .adjust_stock(p.paracetamol.id, 5, StockReason::Reconciliation)
            .is_err());
        assert!(service
            .adjust_stock(MedicineId::new(), 5, StockReason::Opening)
            .is_err());
        assert!(p.store.is_empty());
    }

    #[test]
    fn confirmed_reconciliation_sets_the_ledger_to_the_count() {
        let p = test_pharmacy();
        let service = open(&p, StockConfig::default());
        let id = p.paracetamol.id;
        service.adjust_stock(id, 42, StockReason::Opening).unwrap();

        let counts = [PhysicalCount {
            medicine_id: id,
            physical_count: 50,
        }];
        let preview = service.reconciliation_report(&counts).unwrap();
        assert_eq!(preview.discrepancies[0].variance, 8);
        assert_eq!(service.stock(id), 42);

        let report = service.confirm_reconciliation(&counts).unwrap();
        assert_eq!(report.adjustments, 1);
        assert_eq!(service.stock(id), 50);
        assert!(service.reconciliation_report(&counts).unwrap().discrepancies.is_empty());
    }

    #[test]
    fn reopening_restores_stock_orders_rules_and_batches() {
        let p = test_pharmacy();
        let id = p.paracetamol.id;
        let order_id = {
            let service = open(&p, StockConfig::default());
            service.adjust_stock(id, 30, StockReason::Opening).unwrap();
            service
                .create_reorder_rule(NewReorderRule {
                    medicine_id: id,
                    min_threshold: 5,
                    max_threshold: 60,
                    reorder_quantity: 25,
                    supplier_id: p.supplier_id,
                })
                .unwrap();
            let order = service
                .create_purchase_order(NewPurchaseOrder::manual(
                    p.supplier_id,
                    vec![NewPurchaseOrderItem {
                        medicine_id: id,
                        quantity: 50,
                        unit_price: dec!(95),
                    }],
                ))
                .unwrap();
            service.receive_goods(delivery(&order, id, 20, "PCM-R")).unwrap();
            service.adjust_stock(id, -5, StockReason::Sale).unwrap();
            order.id
        };

        let reopened = open(&p, StockConfig::default());

        assert_eq!(reopened.stock(id), 45);
        assert_eq!(reopened.reorder_rules().len(), 1);
        assert_eq!(
            reopened.purchase_order(order_id).unwrap().status,
            PurchaseOrderStatus::PartiallyDelivered
        );
        assert_eq!(reopened.grns().len(), 1);
        assert_eq!(reopened.expiring_batches(expiry()).len(), 1);
    }

    #[test]
    fn staged_receipt_is_replayed_on_open() {
        let p = test_pharmacy();
        let id = p.paracetamol.id;
        let (order, grn) = {
            let service = open(&p, StockConfig::default());
            let order = service
                .create_purchase_order(NewPurchaseOrder::manual(
                    p.supplier_id,
                    vec![NewPurchaseOrderItem {
                        medicine_id: id,
                        quantity: 40,
                        unit_price: dec!(100),
                    }],
                ))
                .unwrap();
            let grn = service.record_delivery(delivery(&order, id, 40, "PCM-S")).unwrap();
            (order, grn)
        };

        // Crash after staging: the journal entry is durable, the commit is not.
        p.store
            .persist(StockRecord::now(RecordBody::ReceiptStaged(ReceiptEntry {
                grn_id: grn.id,
                purchase_order_id: order.id,
                deltas: vec![StockDelta {
                    medicine_id: id,
                    delta: 40,
                }],
                batches: vec![Batch {
                    medicine_id: id,
                    batch_number: "PCM-S".to_string(),
                    expiry_date: expiry(),
                    quantity: 40,
                    received_date: grn.received_at,
                }],
                state: ReceiptState::Staged,
                staged_at: Utc::now(),
            })))
            .unwrap();

        let reopened = open(&p, StockConfig::default());

        assert_eq!(reopened.stock(id), 40);
        assert_eq!(
            reopened.purchase_order(order.id).unwrap().status,
            PurchaseOrderStatus::Received
        );
        assert!(reopened.process_grn(grn.id).unwrap());
        assert_eq!(reopened.stock(id), 40);
        assert!(!reopened.process_grn(GrnId::new()).unwrap());

        // The replayed commit is durable too.
        let again = open(&p, StockConfig::default());
        assert_eq!(again.stock(id), 40);
    }

    #[test]
    fn concurrent_sales_never_oversell() {
        let p = test_pharmacy();
        let config = StockConfig {
            reorder_on_change: false,
            ..StockConfig::default()
        };
        let service = Arc::new(open(&p, config));
        let id = p.paracetamol.id;
        service.adjust_stock(id, 100, StockReason::Opening).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                thread::spawn(move || {
                    (0..20)
                        .filter(|_| service.adjust_stock(id, -1, StockReason::Sale).is_ok())
                        .count()
                })
            })
            .collect();
        let sold: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(sold, 100);
        assert_eq!(service.stock(id), 0);
        let snapshot = p.store.load_ledger_snapshot().unwrap();
        assert_eq!(snapshot[0].quantity, 0);
    }
}
