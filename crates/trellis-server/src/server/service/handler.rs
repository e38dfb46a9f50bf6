//! gRPC implementation of the `trellis.orders.v1.OrderService`.
//!
//! [`OrderHandler`] validates requests, delegates to the shared
//! [`OrderStore`] and converts [`OrderError`]s into `tonic::Status` at the
//! boundary.

use super::metrics::OrderMetrics;
use super::store::{OrderError, OrderStore};
use crate::server::config::OrdersConfig;
use core::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tonic::{Request, Response, Status};
use trellis_proto::OrderService;
use trellis_proto::proto::{GetOrderRequest, Order, PlaceOrderRequest, WatchOrdersRequest};

#[derive(Debug, Clone)]
pub struct OrderHandler {
    config: OrdersConfig,
    store: Arc<OrderStore>,
    metrics: Arc<OrderMetrics>,
}

impl OrderHandler {
    pub fn new(config: OrdersConfig, store: Arc<OrderStore>, metrics: Arc<OrderMetrics>) -> Self {
        Self {
            config,
            store,
            metrics,
        }
    }

    fn validate(&self, request: &PlaceOrderRequest) -> Result<(), OrderError> {
        if request.item.trim().is_empty() {
            return Err(OrderError::EmptyItem);
        }
        if request.quantity == 0 || request.quantity > self.config.max_quantity {
            return Err(OrderError::InvalidQuantity {
                quantity: request.quantity,
                max: self.config.max_quantity,
            });
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl OrderService for OrderHandler {
    type WatchOrdersStream = Pin<Box<dyn Stream<Item = Result<Order, Status>> + Send>>;

    async fn get_order(&self, request: Request<GetOrderRequest>) -> Result<Response<Order>, Status> {
        let order_id = request.into_inner().order_id;
        if order_id.is_empty() {
            return Err(OrderError::EmptyId.into());
        }
        Ok(Response::new(self.store.get(&order_id)?))
    }

    async fn place_order(
        &self,
        request: Request<PlaceOrderRequest>,
    ) -> Result<Response<Order>, Status> {
        let request = request.into_inner();
        if let Err(err) = self.validate(&request) {
            self.metrics.rejected("invalid");
            return Err(err.into());
        }

        let order = self
            .store
            .insert(request.item, request.quantity)
            .inspect_err(|_| self.metrics.rejected("capacity"))?;
        self.metrics.placed(order.quantity);
        tracing::debug!(order_id = %order.order_id, "placed order");
        Ok(Response::new(order))
    }

    async fn watch_orders(
        &self,
        request: Request<WatchOrdersRequest>,
    ) -> Result<Response<Self::WatchOrdersStream>, Status> {
        let limit = request.into_inner().limit as usize;
        let orders = self.store.list(limit);
        Ok(Response::new(Box::pin(tokio_stream::iter(
            orders.into_iter().map(Ok),
        ))))
    }
}
