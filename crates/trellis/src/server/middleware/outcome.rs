//! Call completion tracking.
//!
//! A call is not over when its response headers arrive: streaming responses
//! keep producing frames and carry their final `grpc-status` in the trailers.
//! [`observe`] reports the outcome once the call has really ended.

use super::{Next, Request, Response, status_code};
use bytes::Bytes;
use core::panic::AssertUnwindSafe;
use core::pin::Pin;
use core::task::{Context, Poll};
use futures::FutureExt;
use futures::future::BoxFuture;
use http_body::{Body as HttpBody, Frame, SizeHint};
use tonic::body::Body;
use tonic::codegen::http::{HeaderMap, StatusCode};
use tonic::{Code, Status};

/// How a call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    code: Code,
    message: String,
}

impl Outcome {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    pub(crate) fn panicked() -> Self {
        Self::new(Code::Internal, "panic")
    }

    fn cancelled() -> Self {
        Self::new(Code::Cancelled, "response dropped before completion")
    }

    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        Status::from_header_map(headers).map(|status| Self::new(status.code(), status.message()))
    }
}

/// Runs the rest of the chain and reports how the call ended.
///
/// `finish` runs exactly once:
///
/// - with the header status of a trailers-only response,
/// - with the trailer status once a response body ends,
/// - with `CANCELLED` if the call or its body is dropped before that,
/// - with `INTERNAL` if anything downstream panics. The panic keeps unwinding.
pub fn observe<F>(next: Next, request: Request, finish: F) -> BoxFuture<'static, Response>
where
    F: FnOnce(Outcome) + Send + 'static,
{
    let downstream = run_catching(next, request);
    let mut completion = Completion::new(finish);
    Box::pin(async move {
        match downstream.await {
            Ok(response) => on_finish(response, completion),
            Err(payload) => {
                completion.complete(Outcome::panicked());
                std::panic::resume_unwind(payload)
            }
        }
    })
}

/// Runs the rest of the chain, catching a panic raised while building or
/// polling it.
pub(crate) fn run_catching(
    next: Next,
    request: Request,
) -> BoxFuture<'static, std::thread::Result<Response>> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| next.run(request))) {
        Ok(downstream) => Box::pin(AssertUnwindSafe(downstream).catch_unwind()),
        Err(payload) => Box::pin(futures::future::ready(Err(payload))),
    }
}

fn on_finish(response: Response, mut completion: Completion) -> Response {
    if let Some(outcome) = Outcome::from_headers(response.headers()) {
        completion.complete(outcome);
        return response;
    }
    if response.status() != StatusCode::OK {
        let outcome = Outcome::new(status_code(&response), response.status().to_string());
        completion.complete(outcome);
        return response;
    }
    response.map(|inner| Body::new(ObservedBody { inner, completion }))
}

struct Completion(Option<Box<dyn FnOnce(Outcome) + Send>>);

impl Completion {
    fn new<F>(finish: F) -> Self
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        Self(Some(Box::new(finish)))
    }

    fn complete(&mut self, outcome: Outcome) {
        if let Some(finish) = self.0.take() {
            finish(outcome);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.complete(Outcome::cancelled());
    }
}

/// Response body that completes the call when its trailers arrive.
struct ObservedBody {
    inner: Body,
    completion: Completion,
}

impl HttpBody for ObservedBody {
    type Data = Bytes;
    type Error = Status;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Status>>> {
        let this = self.get_mut();
        let inner = &mut this.inner;
        let polled = std::panic::catch_unwind(AssertUnwindSafe(|| Pin::new(inner).poll_frame(cx)));

        match polled {
            Ok(Poll::Ready(Some(Ok(frame)))) => {
                if let Some(trailers) = frame.trailers_ref() {
                    let outcome =
                        Outcome::from_headers(trailers).unwrap_or_else(|| Outcome::new(Code::Ok, ""));
                    this.completion.complete(outcome);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Ok(Poll::Ready(Some(Err(status)))) => {
                this.completion
                    .complete(Outcome::new(status.code(), status.message()));
                Poll::Ready(Some(Err(status)))
            }
            Ok(Poll::Ready(None)) => {
                this.completion.complete(Outcome::new(Code::Ok, ""));
                Poll::Ready(None)
            }
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => {
                this.completion.complete(Outcome::panicked());
                std::panic::resume_unwind(payload)
            }
        }
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
