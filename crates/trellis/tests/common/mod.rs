#![allow(dead_code)]

use core::pin::Pin;
use core::task::Poll;
use futures::stream::{self, StreamExt};
use std::sync::{Arc, Mutex};
use tokio_stream::Stream;
use tonic::transport::Channel;
use tonic::{Request, Response, Status};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use trellis::server::middleware::CallContext;
use trellis::server::{RunningServer, ServerComposer, ServiceDescriptor};
use trellis::{Assembly, ServerConfig};
use trellis_proto::proto::{GetOrderRequest, Order, PlaceOrderRequest, WatchOrdersRequest};
use trellis_proto::{OrderService, OrderServiceClient, OrderServiceServer};

pub const ORDER_SERVICE: &str = "trellis.orders.v1.OrderService";

/// How a `WatchOrders` stream ends after its orders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamEnd {
    #[default]
    Complete,
    Fail,
    Panic,
}

/// Order service used across the integration tests.
///
/// `GetOrder` panics for the id `panic` and fails with `NOT_FOUND` for
/// `missing`. Request ids seen through the call context are recorded.
/// `WatchOrders` streams `limit` orders, then ends as `stream_end` says.
#[derive(Debug, Clone, Default)]
pub struct TestOrders {
    pub request_ids: Arc<Mutex<Vec<String>>>,
    pub stream_end: StreamEnd,
}

impl TestOrders {
    pub fn ending_with(stream_end: StreamEnd) -> Self {
        Self {
            stream_end,
            ..Self::default()
        }
    }
}

#[tonic::async_trait]
impl OrderService for TestOrders {
    type WatchOrdersStream = Pin<Box<dyn Stream<Item = Result<Order, Status>> + Send>>;

    async fn get_order(&self, request: Request<GetOrderRequest>) -> Result<Response<Order>, Status> {
        if let Some(context) = request.extensions().get::<CallContext>() {
            self.request_ids
                .lock()
                .unwrap()
                .push(context.request_id().to_string());
        }

        let order_id = request.into_inner().order_id;
        match order_id.as_str() {
            "panic" => panic!("handler exploded"),
            "missing" => Err(Status::not_found("no such order")),
            _ => Ok(Response::new(Order {
                order_id,
                item: "widget".to_string(),
                quantity: 1,
            })),
        }
    }

    async fn place_order(
        &self,
        request: Request<PlaceOrderRequest>,
    ) -> Result<Response<Order>, Status> {
        let request = request.into_inner();
        Ok(Response::new(Order {
            order_id: "o-1".to_string(),
            item: request.item,
            quantity: request.quantity,
        }))
    }

    async fn watch_orders(
        &self,
        request: Request<WatchOrdersRequest>,
    ) -> Result<Response<Self::WatchOrdersStream>, Status> {
        let limit = request.into_inner().limit;
        let orders = (0..limit).map(|i| {
            Ok(Order {
                order_id: format!("o-{i}"),
                item: "widget".to_string(),
                quantity: i,
            })
        });
        let orders = stream::iter(orders);
        let stream: Self::WatchOrdersStream = match self.stream_end {
            StreamEnd::Complete => Box::pin(orders),
            StreamEnd::Fail => Box::pin(orders.chain(stream::once(async {
                Err(Status::internal("order feed broke"))
            }))),
            StreamEnd::Panic => Box::pin(orders.chain(stream::poll_fn(
                |_| -> Poll<Option<Result<Order, Status>>> { panic!("order feed exploded") },
            ))),
        };
        Ok(Response::new(stream))
    }
}

pub fn order_descriptor() -> ServiceDescriptor {
    ServiceDescriptor::new(OrderServiceServer::<TestOrders>::from_arc)
        .unary("GetOrder")
        .unary("PlaceOrder")
        .server_streaming("WatchOrders")
        .with_file_descriptor_set(trellis_proto::proto::FILE_DESCRIPTOR_SET)
}

/// An assembly with `orders` registered.
pub fn orders_assembly(orders: TestOrders) -> Assembly {
    let mut assembly = Assembly::new();
    assembly.register_service(orders, order_descriptor());
    assembly
}

/// Assembles and starts an in-process server from `assembly`.
pub async fn start_in_process(config: ServerConfig, assembly: Assembly) -> RunningServer {
    let components = assembly.build();
    ServerComposer::new(config, components.server)
        .assemble()
        .expect("assemble")
        .start()
        .await
}

pub async fn client(server: &RunningServer) -> OrderServiceClient<Channel> {
    let channel = server
        .dialer()
        .expect("in-process server")
        .channel()
        .await
        .expect("channel");
    OrderServiceClient::new(channel)
}

/// A captured span or event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Captured {
    Span { name: String, fields: Vec<(String, String)> },
    Event { message: String, level: tracing::Level },
}

/// Records span creations and event messages.
#[derive(Clone, Default)]
pub struct CaptureLayer {
    pub captured: Arc<Mutex<Vec<Captured>>>,
}

impl CaptureLayer {
    pub fn spans(&self, name: &str) -> Vec<Vec<(String, String)>> {
        self.captured
            .lock()
            .unwrap()
            .iter()
            .filter_map(|captured| match captured {
                Captured::Span { name: n, fields } if n == name => Some(fields.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self, message: &str) -> Vec<tracing::Level> {
        self.captured
            .lock()
            .unwrap()
            .iter()
            .filter_map(|captured| match captured {
                Captured::Event { message: m, level } if m == message => Some(*level),
                _ => None,
            })
            .collect()
    }
}

#[derive(Default)]
struct FieldVisitor {
    fields: Vec<(String, String)>,
    message: Option<String>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn core::fmt::Debug) {
        let value = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        self.captured.lock().unwrap().push(Captured::Span {
            name: attrs.metadata().name().to_string(),
            fields: visitor.fields,
        });
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        if let Some(message) = visitor.message {
            self.captured.lock().unwrap().push(Captured::Event {
                message,
                level: *event.metadata().level(),
            });
        }
    }
}
