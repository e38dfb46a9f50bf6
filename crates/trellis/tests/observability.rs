mod common;

use common::{CaptureLayer, StreamEnd, TestOrders, client, orders_assembly, start_in_process};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use trellis::ServerConfig;
use trellis::config::{LoggingConfig, TracingConfig};
use tonic::Code;
use trellis_proto::proto::{GetOrderRequest, PlaceOrderRequest, WatchOrdersRequest};

const GET_ORDER: &str = "/trellis.orders.v1.OrderService/GetOrder";

fn field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

#[tokio::test]
async fn calls_are_traced_and_logged() {
    let capture = CaptureLayer::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let config = ServerConfig {
        tracing: TracingConfig {
            enabled: true,
            ..TracingConfig::default()
        },
        logging: LoggingConfig {
            metadata_keys: vec!["x-tenant".to_string()],
            excluded_methods: vec![GET_ORDER.to_string()],
        },
        ..ServerConfig::in_process()
    };
    let server = start_in_process(config, orders_assembly(TestOrders::default())).await;
    let mut client = client(&server).await;

    let mut request = tonic::Request::new(PlaceOrderRequest {
        item: "widget".to_string(),
        quantity: 2,
    });
    request.metadata_mut().insert("x-tenant", "acme".parse().unwrap());
    client.place_order(request).await.unwrap();

    client
        .get_order(GetOrderRequest {
            order_id: "1".to_string(),
        })
        .await
        .unwrap();
    client
        .get_order(GetOrderRequest {
            order_id: "missing".to_string(),
        })
        .await
        .unwrap_err();
    client
        .get_order(GetOrderRequest {
            order_id: "panic".to_string(),
        })
        .await
        .unwrap_err();

    // One server span per call.
    let server_spans = capture.spans("grpc.server");
    assert_eq!(server_spans.len(), 4);
    assert_eq!(field(&server_spans[0], "rpc.system"), Some("grpc"));
    assert_eq!(
        field(&server_spans[0], "rpc.service"),
        Some("trellis.orders.v1.OrderService")
    );
    assert_eq!(field(&server_spans[0], "rpc.method"), Some("PlaceOrder"));
    assert_eq!(field(&server_spans[0], "otel.kind"), Some("server"));

    // One logging span per call, carrying the configured metadata.
    let log_spans = capture.spans("grpc");
    assert_eq!(log_spans.len(), 4);
    assert_eq!(field(&log_spans[0], "metadata"), Some("x-tenant=acme"));
    assert_eq!(field(&log_spans[1], "metadata"), Some(""));
    assert!(field(&log_spans[0], "request_id").is_some_and(|id| id.len() == 36));

    // Excluded GetOrder calls only log their failures.
    assert_eq!(capture.events("started call"), vec![Level::INFO]);
    assert_eq!(
        capture.events("finished call"),
        vec![Level::INFO, Level::WARN, Level::ERROR]
    );
    assert_eq!(
        capture.events("recovered from panic in call"),
        vec![Level::ERROR]
    );

    drop(client);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn excluded_methods_get_no_server_span() {
    let capture = CaptureLayer::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let config = ServerConfig {
        tracing: TracingConfig {
            enabled: true,
            excluded_methods: vec![GET_ORDER.to_string()],
        },
        ..ServerConfig::in_process()
    };
    let server = start_in_process(config, orders_assembly(TestOrders::default())).await;
    let mut client = client(&server).await;

    client
        .get_order(GetOrderRequest {
            order_id: "1".to_string(),
        })
        .await
        .unwrap();

    assert!(capture.spans("grpc.server").is_empty());
    assert_eq!(capture.spans("grpc").len(), 1);

    drop(client);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn failed_streams_are_logged_when_they_end() {
    let capture = CaptureLayer::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let server = start_in_process(
        ServerConfig::in_process(),
        orders_assembly(TestOrders::ending_with(StreamEnd::Fail)),
    )
    .await;
    let mut client = client(&server).await;

    let mut stream = client
        .watch_orders(WatchOrdersRequest { limit: 2 })
        .await
        .unwrap()
        .into_inner();
    assert!(stream.message().await.unwrap().is_some());
    assert!(stream.message().await.unwrap().is_some());
    let status = stream.message().await.unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert_eq!(status.message(), "order feed broke");

    assert_eq!(capture.events("finished call"), vec![Level::ERROR]);

    drop(stream);
    drop(client);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn panicking_streams_are_recovered_without_dropping_the_connection() {
    let capture = CaptureLayer::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let config = ServerConfig {
        tracing: TracingConfig {
            enabled: true,
            ..TracingConfig::default()
        },
        ..ServerConfig::in_process()
    };
    let server = start_in_process(config, orders_assembly(TestOrders::ending_with(StreamEnd::Panic))).await;
    let mut client = client(&server).await;

    let mut stream = client
        .watch_orders(WatchOrdersRequest { limit: 1 })
        .await
        .unwrap()
        .into_inner();
    assert!(stream.message().await.unwrap().is_some());
    let status = stream.message().await.unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    drop(stream);

    assert_eq!(capture.events("finished call"), vec![Level::ERROR]);
    assert_eq!(
        capture.events("recovered from panic in call"),
        vec![Level::ERROR]
    );

    // Same connection, next call.
    client
        .get_order(GetOrderRequest {
            order_id: "1".to_string(),
        })
        .await
        .unwrap();

    drop(client);
    server.stop().await.unwrap();
}
