use super::{CallInfo, Interceptor, Next, Outcome, Request, Response, code_label, observe};
use crate::config::MetricsConfig;
use crate::metrics::Collector;
use futures::future::BoxFuture;
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use std::time::Instant;

/// Base name of the started-calls counter.
pub const STARTED_TOTAL: &str = "grpc_server_started_total";
/// Base name of the completed-calls counter.
pub const HANDLED_TOTAL: &str = "grpc_server_handled_total";
/// Base name of the call latency histogram.
pub const HANDLING_SECONDS: &str = "grpc_server_handling_seconds";

/// Server-side RPC counters and latency histogram.
///
/// Every instrument carries `grpc_service`, `grpc_method` and `grpc_type`;
/// completed calls also carry `grpc_code`.
#[derive(Debug, Clone)]
pub struct MetricsInterceptor {
    started: Counter<u64>,
    handled: Counter<u64>,
    handling: Histogram<f64>,
    names: [String; 3],
}

impl MetricsInterceptor {
    pub fn new(config: &MetricsConfig, meter: &Meter) -> Self {
        let names = [
            config.metric_name(STARTED_TOTAL),
            config.metric_name(HANDLED_TOTAL),
            config.metric_name(HANDLING_SECONDS),
        ];

        let started = meter
            .u64_counter(names[0].clone())
            .with_description("Total number of RPCs started on the server")
            .build();
        let handled = meter
            .u64_counter(names[1].clone())
            .with_description("Total number of RPCs completed on the server, regardless of outcome")
            .build();
        let handling = meter
            .f64_histogram(names[2].clone())
            .with_unit("s")
            .with_description("Latency of RPCs handled by the server")
            .with_boundaries(config.buckets())
            .build();

        Self {
            started,
            handled,
            handling,
            names,
        }
    }
}

impl Collector for MetricsInterceptor {
    fn names(&self) -> Vec<String> {
        self.names.to_vec()
    }
}

impl Interceptor for MetricsInterceptor {
    fn intercept(&self, call: CallInfo, request: Request, next: Next) -> BoxFuture<'static, Response> {
        let mut labels = vec![
            KeyValue::new("grpc_service", call.service().to_string()),
            KeyValue::new("grpc_method", call.method().to_string()),
            KeyValue::new("grpc_type", call.kind().as_str()),
        ];
        self.started.add(1, &labels);

        let handled = self.handled.clone();
        let handling = self.handling.clone();
        let started = Instant::now();
        observe(next, request, move |outcome: Outcome| {
            let elapsed = started.elapsed().as_secs_f64();
            labels.push(KeyValue::new("grpc_code", code_label(outcome.code())));
            handled.add(1, &labels);
            handling.record(elapsed, &labels);
        })
    }
}
