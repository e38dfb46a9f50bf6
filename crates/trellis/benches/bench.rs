use core::{fmt, hint::black_box, pin::Pin};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::stream::FuturesUnordered;
use std::time::Instant;
use tokio::runtime::Builder;
use tokio_stream::{Stream, StreamExt};
use tonic::transport::Channel;
use tonic::{Request, Response, Status};
use trellis::config::{MetricsConfig, TracingConfig};
use trellis::server::RunningServer;
use trellis::{Assembly, ServerComposer, ServerConfig, ServiceDescriptor};
use trellis_proto::proto::{GetOrderRequest, Order, PlaceOrderRequest, WatchOrdersRequest};
use trellis_proto::{OrderService, OrderServiceClient, OrderServiceServer};

#[derive(Debug, Default)]
struct Orders;

#[tonic::async_trait]
impl OrderService for Orders {
    type WatchOrdersStream = Pin<Box<dyn Stream<Item = Result<Order, Status>> + Send>>;

    async fn get_order(&self, request: Request<GetOrderRequest>) -> Result<Response<Order>, Status> {
        Ok(Response::new(Order {
            order_id: request.into_inner().order_id,
            item: "widget".to_string(),
            quantity: 1,
        }))
    }

    async fn place_order(
        &self,
        _request: Request<PlaceOrderRequest>,
    ) -> Result<Response<Order>, Status> {
        Err(Status::unimplemented("read-only"))
    }

    async fn watch_orders(
        &self,
        _request: Request<WatchOrdersRequest>,
    ) -> Result<Response<Self::WatchOrdersStream>, Status> {
        Err(Status::unimplemented("read-only"))
    }
}

/// Which middleware stages run in front of the handler.
#[derive(Clone, Copy, Debug)]
enum Stages {
    /// Recovery and logging only.
    Base,
    /// Every built-in stage.
    Full,
}

impl fmt::Display for Stages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stages::Base => write!(f, "base"),
            Stages::Full => write!(f, "full"),
        }
    }
}

impl Stages {
    fn config(self) -> ServerConfig {
        let enabled = matches!(self, Stages::Full);
        ServerConfig {
            tracing: TracingConfig {
                enabled,
                ..TracingConfig::default()
            },
            metrics: MetricsConfig {
                enabled,
                ..MetricsConfig::default()
            },
            ..ServerConfig::in_process()
        }
    }
}

async fn start(stages: Stages) -> RunningServer {
    let mut assembly = Assembly::new();
    assembly.register_service(
        Orders,
        ServiceDescriptor::new(OrderServiceServer::<Orders>::from_arc)
            .unary("GetOrder")
            .unary("PlaceOrder")
            .server_streaming("WatchOrders"),
    );

    ServerComposer::new(stages.config(), assembly.build().server)
        .assemble()
        .expect("assemble")
        .start()
        .await
}

async fn run_unary_calls(channel: &Channel, concurrency: usize) {
    let mut tasks = FuturesUnordered::new();
    for i in 0..concurrency {
        let mut client = OrderServiceClient::new(channel.clone());
        tasks.push(tokio::spawn(async move {
            let order = client
                .get_order(GetOrderRequest {
                    order_id: format!("o-{i}"),
                })
                .await
                .expect("unary call failed")
                .into_inner();
            black_box(order);
        }));
    }

    while let Some(res) = tasks.next().await {
        res.unwrap();
    }
}

fn bench_in_process_unary(c: &mut Criterion) {
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();
    let concurrency_cases = [1, 8, 64];

    for stages in [Stages::Base, Stages::Full] {
        let server = rt.block_on(start(stages));
        let channel = rt
            .block_on(server.dialer().expect("in-process").channel())
            .expect("channel");

        let mut group = c.benchmark_group(format!("in_process/unary/{stages}"));
        for concurrency in concurrency_cases {
            group.throughput(Throughput::Elements(concurrency as u64));
            group.bench_function(format!("conc/{concurrency}"), |b| {
                b.to_async(&rt).iter_custom(|iters| {
                    let channel = channel.clone();
                    async move {
                        let start = Instant::now();
                        for _ in 0..iters {
                            run_unary_calls(&channel, concurrency).await;
                        }
                        start.elapsed()
                    }
                });
            });
        }
        group.finish();

        drop(channel);
        if let Err(err) = rt.block_on(server.stop()) {
            eprintln!("failed to stop server: {err}");
        }
    }
}

criterion_group!(benches, bench_in_process_unary);
criterion_main!(benches);
