//! Generated bindings for the `trellis.orders.v1` protocol.
//!
//! The service is deliberately small: two unary calls and one
//! server-streaming call, enough to exercise both interceptor chains of a
//! composed server.

/// gRPC service and message definitions generated from
/// `proto/trellis/orders/v1/orders.proto`.
///
/// ## Service
///
/// - `OrderService.GetOrder` - unary lookup by id.
/// - `OrderService.PlaceOrder` - unary insert.
/// - `OrderService.WatchOrders` - server-streaming listing.
pub mod proto {
    tonic::include_proto!("trellis.orders.v1");

    /// Encoded `FileDescriptorSet` for the order protocol, suitable for
    /// registration with `tonic-reflection`.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("orders_descriptor");
}

pub use proto::order_service_client::OrderServiceClient;
pub use proto::order_service_server::{OrderService, OrderServiceServer};
