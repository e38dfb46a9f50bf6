use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Meter};
use trellis::metrics::Collector;

pub const ORDERS_PLACED_TOTAL: &str = "orders_placed_total";
pub const ORDERS_REJECTED_TOTAL: &str = "orders_rejected_total";
pub const ORDER_QUANTITY_TOTAL: &str = "order_quantity_total";

/// Business counters of the orders module.
#[derive(Debug, Clone)]
pub struct OrderMetrics {
    placed: Counter<u64>,
    rejected: Counter<u64>,
    quantity: Counter<u64>,
}

impl OrderMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            placed: meter
                .u64_counter(ORDERS_PLACED_TOTAL)
                .with_description("Orders accepted into the store")
                .build(),
            rejected: meter
                .u64_counter(ORDERS_REJECTED_TOTAL)
                .with_description("Orders rejected, by reason")
                .build(),
            quantity: meter
                .u64_counter(ORDER_QUANTITY_TOTAL)
                .with_description("Units ordered across accepted orders")
                .build(),
        }
    }

    pub fn placed(&self, quantity: u32) {
        self.placed.add(1, &[]);
        self.quantity.add(u64::from(quantity), &[]);
    }

    pub fn rejected(&self, reason: &'static str) {
        self.rejected.add(1, &[KeyValue::new("reason", reason)]);
    }
}

impl Collector for OrderMetrics {
    fn names(&self) -> Vec<String> {
        [ORDERS_PLACED_TOTAL, ORDERS_REJECTED_TOTAL, ORDER_QUANTITY_TOTAL]
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}
