//! In-memory order storage and its health probe.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tonic::Status;
use trellis::{Probe, ProbeStatus};
use trellis_proto::proto::Order;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("order id must not be empty")]
    EmptyId,
    #[error("item must not be empty")]
    EmptyItem,
    #[error("quantity {quantity} is outside 1..={max}")]
    InvalidQuantity { quantity: u32, max: u32 },
    #[error("order `{0}` not found")]
    NotFound(String),
    #[error("order store is full ({0} orders)")]
    Full(usize),
}

impl From<OrderError> for Status {
    fn from(err: OrderError) -> Self {
        let message = err.to_string();
        match err {
            OrderError::EmptyId | OrderError::EmptyItem => Status::invalid_argument(message),
            OrderError::InvalidQuantity { .. } => Status::out_of_range(message),
            OrderError::NotFound(_) => Status::not_found(message),
            OrderError::Full(_) => Status::resource_exhausted(message),
        }
    }
}

#[derive(Debug, Default)]
struct Orders {
    next_id: u64,
    by_id: BTreeMap<u64, Order>,
}

/// Bounded, insertion-ordered order book.
#[derive(Debug)]
pub struct OrderStore {
    capacity: usize,
    orders: RwLock<Orders>,
}

impl OrderStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            orders: RwLock::new(Orders::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.orders.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores a new order and returns it with its assigned id.
    pub fn insert(&self, item: String, quantity: u32) -> Result<Order, OrderError> {
        let mut orders = self.orders.write();
        if orders.by_id.len() >= self.capacity {
            return Err(OrderError::Full(self.capacity));
        }

        orders.next_id += 1;
        let id = orders.next_id;
        let order = Order {
            order_id: format_id(id),
            item,
            quantity,
        };
        orders.by_id.insert(id, order.clone());
        Ok(order)
    }

    pub fn get(&self, order_id: &str) -> Result<Order, OrderError> {
        let orders = self.orders.read();
        parse_id(order_id)
            .and_then(|id| orders.by_id.get(&id))
            .cloned()
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))
    }

    /// Up to `limit` orders, oldest first. Zero means all of them.
    pub fn list(&self, limit: usize) -> Vec<Order> {
        let limit = if limit == 0 { usize::MAX } else { limit };
        self.orders.read().by_id.values().take(limit).cloned().collect()
    }
}

fn format_id(id: u64) -> String {
    format!("o-{id}")
}

fn parse_id(order_id: &str) -> Option<u64> {
    order_id.strip_prefix("o-")?.parse().ok()
}

/// Reports the store unhealthy once it is full.
#[derive(Debug, Clone)]
pub struct StoreProbe {
    store: Arc<OrderStore>,
}

impl StoreProbe {
    pub fn new(store: Arc<OrderStore>) -> Self {
        Self { store }
    }
}

impl Probe for StoreProbe {
    fn check(&self) -> ProbeStatus {
        let len = self.store.len();
        if len < self.store.capacity() {
            ProbeStatus::healthy(format!("{len}/{} orders", self.store.capacity()))
        } else {
            ProbeStatus::unhealthy(format!("store full at {len} orders"))
        }
    }
}
