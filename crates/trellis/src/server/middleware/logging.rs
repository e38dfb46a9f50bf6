use super::{CallInfo, Interceptor, Next, Outcome, Request, Response, observe};
use crate::config::LoggingConfig;
use core::fmt;
use futures::future::BoxFuture;
use opentelemetry::trace::TraceContextExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tonic::Code;
use tonic::codegen::http::HeaderValue;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use uuid::Uuid;

/// Request header carrying the caller's request id. Echoed on the response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-call logging context, inserted into the request extensions.
///
/// Handlers reach it through `tonic::Request::extensions`:
///
/// ```ignore
/// let context = request.extensions().get::<CallContext>();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    request_id: String,
    trace_id: Option<String>,
    metadata: Vec<(String, String)>,
}

impl CallContext {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Hex trace id of the active OpenTelemetry span, if any.
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// Configured metadata keys that were present on the request.
    pub fn metadata(&self) -> &[(String, String)] {
        &self.metadata
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

struct MetadataFields<'a>(&'a [(String, String)]);

impl fmt::Display for MetadataFields<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// Structured call logging.
///
/// Every call gets a `grpc` span carrying the request id, trace id and the
/// configured metadata keys, wrapped around everything downstream. Start and
/// success lines are skipped for excluded methods; failures are always
/// logged.
#[derive(Debug, Clone)]
pub struct LoggingInterceptor {
    metadata_keys: Arc<[String]>,
    excluded: Arc<HashSet<String>>,
}

impl LoggingInterceptor {
    pub fn new(config: &LoggingConfig) -> Self {
        Self {
            metadata_keys: config
                .metadata_keys
                .iter()
                .map(|key| key.to_ascii_lowercase())
                .collect(),
            excluded: Arc::new(config.excluded_methods.iter().cloned().collect()),
        }
    }

    fn context(&self, request: &Request) -> CallContext {
        let headers = request.headers();
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_owned);

        let metadata = self
            .metadata_keys
            .iter()
            .filter_map(|key| {
                let value = headers.get(key.as_str())?.to_str().ok()?;
                Some((key.clone(), value.to_owned()))
            })
            .collect();

        CallContext {
            request_id,
            trace_id: current_trace_id(),
            metadata,
        }
    }
}

impl Interceptor for LoggingInterceptor {
    fn intercept(&self, call: CallInfo, mut request: Request, next: Next) -> BoxFuture<'static, Response> {
        let context = self.context(&request);
        let span = tracing::info_span!(
            "grpc",
            request_id = %context.request_id,
            trace_id = context.trace_id.as_deref().unwrap_or_default(),
            metadata = %MetadataFields(&context.metadata),
            grpc.method = %call.path(),
            grpc.kind = call.kind().as_str(),
        );
        let echo = HeaderValue::from_str(&context.request_id).ok();
        let quiet = self.excluded.contains(call.path());
        request.extensions_mut().insert(context);

        let started = Instant::now();
        let finished = span.clone();
        let finish = move |outcome: Outcome| {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            finished.in_scope(|| log_finished(quiet, &outcome, elapsed_ms));
        };

        Box::pin(
            async move {
                if !quiet {
                    tracing::info!("started call");
                }
                let mut response = observe(next, request, finish).await;
                if let Some(value) = echo {
                    response.headers_mut().insert(REQUEST_ID_HEADER, value);
                }
                response
            }
            .instrument(span),
        )
    }
}

fn log_finished(quiet: bool, outcome: &Outcome, elapsed_ms: f64) {
    let code = outcome.code();
    if outcome.is_ok() {
        if !quiet {
            tracing::info!(grpc.code = ?code, elapsed_ms, "finished call");
        }
    } else if is_client_error(code) {
        tracing::warn!(grpc.code = ?code, grpc.message = outcome.message(), elapsed_ms, "finished call");
    } else {
        tracing::error!(grpc.code = ?code, grpc.message = outcome.message(), elapsed_ms, "finished call");
    }
}

fn is_client_error(code: Code) -> bool {
    matches!(
        code,
        Code::Cancelled
            | Code::InvalidArgument
            | Code::NotFound
            | Code::AlreadyExists
            | Code::PermissionDenied
            | Code::FailedPrecondition
            | Code::OutOfRange
            | Code::Unauthenticated
    )
}

fn current_trace_id() -> Option<String> {
    let context = tracing::Span::current().context();
    let span = context.span();
    let span_context = span.span_context();
    span_context
        .is_valid()
        .then(|| span_context.trace_id().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_fields_render_as_pairs() {
        let metadata = vec![
            ("x-tenant".to_string(), "acme".to_string()),
            ("x-region".to_string(), "eu".to_string()),
        ];
        assert_eq!(
            MetadataFields(&metadata).to_string(),
            "x-tenant=acme x-region=eu"
        );
        assert_eq!(MetadataFields(&[]).to_string(), "");
    }

    #[test]
    fn request_id_is_read_or_generated() {
        let interceptor = LoggingInterceptor::new(&LoggingConfig {
            metadata_keys: vec!["X-Tenant".into()],
            excluded_methods: vec![],
        });

        let request = tonic::codegen::http::Request::builder()
            .header(REQUEST_ID_HEADER, "abc")
            .header("x-tenant", "acme")
            .body(tonic::body::Body::empty())
            .unwrap();
        let context = interceptor.context(&request);
        assert_eq!(context.request_id(), "abc");
        assert_eq!(context.get("x-tenant"), Some("acme"));
        assert_eq!(context.trace_id(), None);

        let request = tonic::codegen::http::Request::builder()
            .body(tonic::body::Body::empty())
            .unwrap();
        let context = interceptor.context(&request);
        assert!(Uuid::parse_str(context.request_id()).is_ok());
        assert!(context.metadata().is_empty());
    }
}
