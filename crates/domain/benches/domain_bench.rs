use common::{CreditTierId, OrderLineId, ShipmentId, ShipmentLineId};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use domain::{Money, ReceiveStatus, ShipmentLine, TierTable, apportion_receipt};

fn shipment_lines(count: i64) -> Vec<ShipmentLine> {
    (1..=count)
        .rev()
        .map(|i| ShipmentLine {
            id: ShipmentLineId::new(i),
            shipment_id: ShipmentId::new(i),
            order_line_id: OrderLineId::new(1),
            ship_quantity: 3,
            receive_status: ReceiveStatus::Pending,
            received_quantity: 0,
            received_time: None,
        })
        .collect()
}

fn bench_apportion_receipt(c: &mut Criterion) {
    let lines = shipment_lines(50);

    c.bench_function("domain/apportion_receipt_50_shipments", |b| {
        b.iter(|| {
            apportion_receipt(black_box(&lines), OrderLineId::new(1), black_box(100)).unwrap()
        });
    });
}

fn bench_tier_upgrade(c: &mut Criterion) {
    let table = TierTable::bookstore_default();

    c.bench_function("domain/tier_upgrade", |b| {
        b.iter(|| {
            table.upgrade_for(
                black_box(CreditTierId::new(2)),
                black_box(Money::from_units(7_500)),
            )
        });
    });
}

criterion_group!(benches, bench_apportion_receipt, bench_tier_upgrade);
criterion_main!(benches);
