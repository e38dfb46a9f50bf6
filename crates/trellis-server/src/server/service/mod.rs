//! The orders feature module.
//!
//! One [`OrdersModule`] contributes to every collection point of the
//! assembly: the gRPC service, a store probe, an audit interceptor and its
//! business metrics.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`OrderHandler`).
//! - [`store`] - in-memory order book and its health probe.
//! - [`audit`] - unary audit interceptor.
//! - [`metrics`] - order counters, registered as one collector.

pub mod audit;
pub mod handler;
pub mod metrics;
pub mod store;

use crate::server::config::OrdersConfig;
use crate::server::telemetry::SERVICE_NAME;
use audit::AuditInterceptor;
use handler::OrderHandler;
use metrics::OrderMetrics;
use std::sync::Arc;
use store::{OrderStore, StoreProbe};
use trellis::{Assembly, Module, ProbeKinds, ServiceDescriptor};
use trellis_proto::OrderServiceServer;
use trellis_proto::proto::FILE_DESCRIPTOR_SET;

/// How the order service is mounted.
pub fn order_service_descriptor() -> ServiceDescriptor {
    ServiceDescriptor::new(OrderServiceServer::<OrderHandler>::from_arc)
        .unary("GetOrder")
        .unary("PlaceOrder")
        .server_streaming("WatchOrders")
        .with_file_descriptor_set(FILE_DESCRIPTOR_SET)
}

#[derive(Debug, Clone, Copy)]
pub struct OrdersModule {
    config: OrdersConfig,
}

impl OrdersModule {
    pub fn new(config: OrdersConfig) -> Self {
        Self { config }
    }
}

impl Module for OrdersModule {
    fn name(&self) -> &'static str {
        "orders"
    }

    fn register(&self, assembly: &mut Assembly) -> trellis::Result<()> {
        let store = Arc::new(OrderStore::with_capacity(self.config.capacity));
        let metrics = Arc::new(OrderMetrics::new(&opentelemetry::global::meter(SERVICE_NAME)));

        assembly
            .register_service(
                OrderHandler::new(self.config, Arc::clone(&store), Arc::clone(&metrics)),
                order_service_descriptor(),
            )
            .register_probe(StoreProbe::new(store), ProbeKinds::all())
            .register_unary_interceptor(AuditInterceptor)
            .register_collector(metrics);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis::{HealthChecker, ProbeKind, ServerComposer, ServerConfig};
    use trellis_proto::OrderServiceClient;
    use trellis_proto::proto::{GetOrderRequest, PlaceOrderRequest};

    fn module() -> OrdersModule {
        OrdersModule::new(OrdersConfig {
            max_quantity: 10,
            capacity: 2,
        })
    }

    #[test]
    fn module_contributes_probes_for_every_kind() {
        let mut assembly = Assembly::new();
        assembly.install(&module()).unwrap();
        let components = assembly.build();

        assert_eq!(components.server.interceptors.unary().len(), 1);
        assert!(components.server.interceptors.stream().is_empty());
        assert_eq!(components.server.collectors.len(), 1);

        let checker = HealthChecker::compose(components.probes).unwrap();
        for kind in ProbeKind::ALL {
            assert!(checker.check(kind).success, "{kind} failed");
        }
    }

    #[tokio::test]
    async fn module_serves_orders_in_process() {
        let mut assembly = Assembly::new();
        assembly.install(&module()).unwrap();

        let server = ServerComposer::new(ServerConfig::in_process(), assembly.build().server)
            .assemble()
            .unwrap()
            .start()
            .await;
        let channel = server.dialer().unwrap().channel().await.unwrap();
        let mut client = OrderServiceClient::new(channel);

        let placed = client
            .place_order(PlaceOrderRequest {
                item: "widget".into(),
                quantity: 2,
            })
            .await
            .unwrap()
            .into_inner();
        let fetched = client
            .get_order(GetOrderRequest {
                order_id: placed.order_id.clone(),
            })
            .await
            .unwrap()
            .into_inner();
        assert_eq!(fetched, placed);

        drop(client);
        server.stop().await.unwrap();
    }
}
