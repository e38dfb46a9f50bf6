use futures::future::BoxFuture;
use trellis::server::middleware::{
    CallContext, CallInfo, Interceptor, Next, Outcome, Request, Response, code_label, observe,
};

/// Writes one `audit` line per unary call with the caller's request id and the
/// outcome. Runs after the built-in stages, so the call context is present.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditInterceptor;

impl Interceptor for AuditInterceptor {
    fn intercept(&self, call: CallInfo, request: Request, next: Next) -> BoxFuture<'static, Response> {
        let request_id = request
            .extensions()
            .get::<CallContext>()
            .map(|context| context.request_id().to_owned())
            .unwrap_or_default();

        observe(next, request, move |outcome: Outcome| {
            tracing::info!(
                target: "audit",
                request_id,
                method = %call.path(),
                code = code_label(outcome.code()),
                "audited call"
            );
        })
    }
}
