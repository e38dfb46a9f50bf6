use super::{CallInfo, Interceptor, Next, Outcome, Request, Response, observe};
use crate::config::TracingConfig;
use futures::future::BoxFuture;
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use std::collections::HashSet;
use tonic::codegen::http::HeaderMap;
use tracing::{Instrument, field::Empty};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Opens one `grpc.server` span per call.
///
/// The parent context is extracted from the request headers with the globally
/// installed text-map propagator, so the span joins the caller's trace when
/// one is propagated. Span fields follow the OpenTelemetry RPC semantic
/// conventions.
#[derive(Debug, Clone)]
pub struct TracingInterceptor {
    excluded: HashSet<String>,
}

impl TracingInterceptor {
    pub fn new(config: &TracingConfig) -> Self {
        Self {
            excluded: config.excluded_methods.iter().cloned().collect(),
        }
    }
}

impl Interceptor for TracingInterceptor {
    fn intercept(&self, call: CallInfo, request: Request, next: Next) -> BoxFuture<'static, Response> {
        if self.excluded.contains(call.path()) {
            return next.run(request);
        }

        let parent = opentelemetry::global::get_text_map_propagator(|propagator| {
            propagator.extract(&HeaderExtractor(request.headers()))
        });
        let span = tracing::info_span!(
            "grpc.server",
            otel.name = %call.path().trim_start_matches('/'),
            otel.kind = "server",
            rpc.system = "grpc",
            rpc.service = %call.service(),
            rpc.method = %call.method(),
            rpc.grpc.status_code = Empty,
            otel.status_code = Empty,
        );
        if let Err(err) = span.set_parent(parent) {
            tracing::debug!(error = %err, "propagated parent context not attached");
        }

        let recorder = span.clone();
        let downstream = span.in_scope(|| {
            observe(next, request, move |outcome: Outcome| {
                recorder.record("rpc.grpc.status_code", i32::from(outcome.code()));
                if !outcome.is_ok() {
                    recorder.record("otel.status_code", "ERROR");
                }
            })
        });
        Box::pin(downstream.instrument(span))
    }
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|key| key.as_str()).collect()
    }
}
