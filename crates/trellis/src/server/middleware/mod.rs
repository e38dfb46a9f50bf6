//! # Middleware chain
//!
//! Every call passes through an ordered chain of [`Interceptor`]s before it
//! reaches the tonic router. Two chains exist, one for unary and one for
//! streaming methods; the method kind is looked up in the [`MethodTable`]
//! built from every mounted service.
//!
//! ## Order
//!
//! The order is fixed by [`MiddlewareChain::build`]:
//!
//! 1. [`RecoveryInterceptor`] (always)
//! 2. [`TracingInterceptor`] (when `tracing.enabled`)
//! 3. [`LoggingInterceptor`] (always)
//! 4. [`MetricsInterceptor`] (when `metrics.enabled`)
//! 5. Contributed interceptors, in contribution order
//!
//! Interceptors see raw HTTP requests and responses. A gRPC failure is a
//! trailers-only response whose `grpc-status` header carries the code, so the
//! chain itself is infallible. Streaming responses end with trailers after the
//! chain has returned; interceptors that need the final code use [`observe`].

mod logging;
mod metrics;
mod outcome;
mod recovery;
mod trace;

pub use logging::{CallContext, LoggingInterceptor, REQUEST_ID_HEADER};
pub use metrics::{HANDLED_TOTAL, HANDLING_SECONDS, MetricsInterceptor, STARTED_TOTAL};
pub use outcome::{Outcome, observe};
pub(crate) use outcome::run_catching;
pub use recovery::RecoveryInterceptor;
pub(crate) use recovery::panic_message;
pub use trace::TracingInterceptor;

use super::service::{MethodKind, MethodTable};
use crate::{Result, config::ServerConfig, metrics::MetricsRegistry};
use core::convert::Infallible;
use core::fmt;
use core::task::{Context, Poll};
use futures::future::BoxFuture;
use std::sync::Arc;
use tonic::Code;
use tonic::body::Body;
use tonic::codegen::http;
use tower::util::BoxCloneService;
use tower::{Layer, Service, ServiceExt};

pub type Request = http::Request<Body>;
pub type Response = http::Response<Body>;

type Endpoint = BoxCloneService<Request, Response, Infallible>;
type Interceptors = Arc<[Arc<dyn Interceptor>]>;

/// A step in the middleware chain.
///
/// Implementations either forward with [`Next::run`] or answer the call
/// themselves.
pub trait Interceptor: Send + Sync + 'static {
    fn intercept(&self, call: CallInfo, request: Request, next: Next) -> BoxFuture<'static, Response>;

    /// Name used in diagnostics.
    fn name(&self) -> &'static str {
        core::any::type_name::<Self>()
    }
}

/// An [`Interceptor`] backed by a closure. See [`interceptor_fn`].
#[derive(Clone)]
pub struct InterceptorFn<F> {
    f: F,
}

/// Builds an [`Interceptor`] from an async closure.
///
/// ```ignore
/// let audit = interceptor_fn(|call, request, next| async move {
///     tracing::info!(method = %call.method(), "audit");
///     next.run(request).await
/// });
/// ```
pub fn interceptor_fn<F, Fut>(f: F) -> InterceptorFn<F>
where
    F: Fn(CallInfo, Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    InterceptorFn { f }
}

impl<F, Fut> Interceptor for InterceptorFn<F>
where
    F: Fn(CallInfo, Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn intercept(&self, call: CallInfo, request: Request, next: Next) -> BoxFuture<'static, Response> {
        Box::pin((self.f)(call, request, next))
    }

    fn name(&self) -> &'static str {
        core::any::type_name::<F>()
    }
}

/// What an interceptor knows about the call in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    path: Arc<str>,
    service: Arc<str>,
    method: Arc<str>,
    kind: MethodKind,
}

impl CallInfo {
    /// Parses `/package.Service/Method`. Paths missing from `methods` are
    /// treated as unary.
    pub fn new(path: &str, methods: &MethodTable) -> Self {
        let kind = methods.kind(path).unwrap_or(MethodKind::Unary);
        let (service, method) = path
            .strip_prefix('/')
            .and_then(|rest| rest.split_once('/'))
            .unwrap_or(("unknown", path));

        Self {
            path: Arc::from(path),
            service: Arc::from(service),
            method: Arc::from(method),
            kind,
        }
    }

    /// Full method path, e.g. `/trellis.orders.v1.OrderService/GetOrder`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn kind(&self) -> MethodKind {
        self.kind
    }
}

/// The remainder of the chain.
pub struct Next {
    call: CallInfo,
    interceptors: Interceptors,
    position: usize,
    endpoint: Endpoint,
}

impl Next {
    /// Runs the next interceptor, or the router once the chain is exhausted.
    pub fn run(mut self, request: Request) -> BoxFuture<'static, Response> {
        match self.interceptors.get(self.position).cloned() {
            Some(interceptor) => {
                self.position += 1;
                let call = self.call.clone();
                interceptor.intercept(call, request, self)
            }
            None => {
                let endpoint = self.endpoint;
                Box::pin(async move {
                    match endpoint.oneshot(request).await {
                        Ok(response) => response,
                        Err(never) => match never {},
                    }
                })
            }
        }
    }
}

#[cfg(test)]
impl Next {
    /// A chain with nothing left but `endpoint`.
    pub(crate) fn endpoint(endpoint: Endpoint) -> Self {
        Self {
            call: CallInfo::new("/pkg.Svc/Watch", &MethodTable::default()),
            interceptors: Arc::from(Vec::new()),
            position: 0,
            endpoint,
        }
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("call", &self.call)
            .field("remaining", &(self.interceptors.len() - self.position))
            .finish_non_exhaustive()
    }
}

/// Interceptors contributed by feature modules, in contribution order.
#[derive(Clone, Default)]
pub struct ContributedInterceptors {
    pub(crate) unary: Vec<Arc<dyn Interceptor>>,
    pub(crate) stream: Vec<Arc<dyn Interceptor>>,
}

impl ContributedInterceptors {
    pub fn push_unary(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.unary.push(interceptor);
    }

    pub fn push_stream(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.stream.push(interceptor);
    }

    pub fn unary(&self) -> &[Arc<dyn Interceptor>] {
        &self.unary
    }

    pub fn stream(&self) -> &[Arc<dyn Interceptor>] {
        &self.stream
    }

    pub fn len(&self) -> usize {
        self.unary.len() + self.stream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unary.is_empty() && self.stream.is_empty()
    }
}

impl fmt::Debug for ContributedInterceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContributedInterceptors")
            .field("unary", &names(&self.unary))
            .field("stream", &names(&self.stream))
            .finish()
    }
}

/// The two ordered interceptor sequences installed on a server.
#[derive(Clone)]
pub struct MiddlewareChain {
    unary: Interceptors,
    stream: Interceptors,
}

impl MiddlewareChain {
    /// Builds both chains from configuration and contributions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateCollector`](crate::Error::DuplicateCollector)
    /// if the server metrics collide with an already registered collector.
    pub fn build(
        config: &ServerConfig,
        registry: &mut MetricsRegistry,
        contributed: ContributedInterceptors,
    ) -> Result<Self> {
        let mut base: Vec<Arc<dyn Interceptor>> = Vec::with_capacity(4);
        base.push(Arc::new(RecoveryInterceptor::new(config.debug)));
        if config.tracing.enabled {
            base.push(Arc::new(TracingInterceptor::new(&config.tracing)));
        }
        base.push(Arc::new(LoggingInterceptor::new(&config.logging)));
        if config.metrics.enabled {
            let metrics = Arc::new(MetricsInterceptor::new(&config.metrics, registry.meter()));
            registry.register(metrics.clone())?;
            base.push(metrics);
        }

        let unary: Interceptors = base.iter().cloned().chain(contributed.unary).collect();
        let stream: Interceptors = base.into_iter().chain(contributed.stream).collect();
        tracing::debug!(
            unary = ?names(&unary),
            stream = ?names(&stream),
            "built middleware chain"
        );
        Ok(Self { unary, stream })
    }

    pub fn unary(&self) -> &[Arc<dyn Interceptor>] {
        &self.unary
    }

    pub fn stream(&self) -> &[Arc<dyn Interceptor>] {
        &self.stream
    }

    fn for_kind(&self, kind: MethodKind) -> Interceptors {
        if kind.is_streaming() {
            Arc::clone(&self.stream)
        } else {
            Arc::clone(&self.unary)
        }
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("unary", &names(&self.unary))
            .field("stream", &names(&self.stream))
            .finish()
    }
}

fn names(interceptors: &[Arc<dyn Interceptor>]) -> Vec<&'static str> {
    interceptors.iter().map(|i| i.name()).collect()
}

/// Installs a [`MiddlewareChain`] in front of the router.
#[derive(Debug, Clone)]
pub struct ChainLayer {
    chain: MiddlewareChain,
    methods: Arc<MethodTable>,
}

impl ChainLayer {
    pub fn new(chain: MiddlewareChain, methods: MethodTable) -> Self {
        Self {
            chain,
            methods: Arc::new(methods),
        }
    }
}

impl<S> Layer<S> for ChainLayer {
    type Service = ChainService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ChainService {
            inner,
            chain: self.chain.clone(),
            methods: Arc::clone(&self.methods),
        }
    }
}

#[derive(Clone)]
pub struct ChainService<S> {
    inner: S,
    chain: MiddlewareChain,
    methods: Arc<MethodTable>,
}

impl<S> Service<Request> for ChainService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, core::result::Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<core::result::Result<(), Infallible>> {
        // Readiness of the router is awaited by `oneshot` at the end of the
        // chain.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let call = CallInfo::new(request.uri().path(), &self.methods);
        let interceptors = self.chain.for_kind(call.kind());
        let next = Next {
            call,
            interceptors,
            position: 0,
            endpoint: BoxCloneService::new(self.inner.clone()),
        };
        let response = next.run(request);
        Box::pin(async move { Ok(response.await) })
    }
}

/// The gRPC outcome of a response: the `grpc-status` header when present,
/// otherwise derived from the HTTP status.
pub fn status_code(response: &Response) -> Code {
    if let Some(value) = response.headers().get("grpc-status") {
        return Code::from_bytes(value.as_bytes());
    }
    match response.status() {
        http::StatusCode::OK => Code::Ok,
        http::StatusCode::BAD_REQUEST => Code::Internal,
        http::StatusCode::UNAUTHORIZED => Code::Unauthenticated,
        http::StatusCode::FORBIDDEN => Code::PermissionDenied,
        http::StatusCode::NOT_FOUND => Code::Unimplemented,
        http::StatusCode::TOO_MANY_REQUESTS
        | http::StatusCode::BAD_GATEWAY
        | http::StatusCode::SERVICE_UNAVAILABLE
        | http::StatusCode::GATEWAY_TIMEOUT => Code::Unavailable,
        _ => Code::Unknown,
    }
}

/// Upper snake case name of `code`, as used in metric labels.
pub fn code_label(code: Code) -> &'static str {
    const LABELS: [&str; 17] = [
        "OK",
        "CANCELLED",
        "UNKNOWN",
        "INVALID_ARGUMENT",
        "DEADLINE_EXCEEDED",
        "NOT_FOUND",
        "ALREADY_EXISTS",
        "PERMISSION_DENIED",
        "RESOURCE_EXHAUSTED",
        "FAILED_PRECONDITION",
        "ABORTED",
        "OUT_OF_RANGE",
        "UNIMPLEMENTED",
        "INTERNAL",
        "UNAVAILABLE",
        "DATA_LOSS",
        "UNAUTHENTICATED",
    ];
    usize::try_from(i32::from(code))
        .ok()
        .and_then(|index| LABELS.get(index).copied())
        .unwrap_or("UNKNOWN")
}
