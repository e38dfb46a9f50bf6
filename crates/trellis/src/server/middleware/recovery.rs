use super::{CallInfo, Interceptor, Next, Request, Response, run_catching};
use bytes::Bytes;
use core::any::Any;
use core::panic::AssertUnwindSafe;
use core::pin::Pin;
use core::task::{Context, Poll};
use futures::future::BoxFuture;
use http_body::{Body as HttpBody, Frame, SizeHint};
use tonic::body::Body;
use tonic::codegen::http::{HeaderMap, HeaderValue};
use tonic::{Code, Status};

/// Converts a panic anywhere downstream into an `INTERNAL` status.
///
/// Panics raised while building the downstream future, while polling it and
/// while streaming the response body are all caught. A panic in the body
/// after the headers went out ends the stream with `INTERNAL` trailers. The
/// payload is logged; it is only returned to the caller when `debug` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryInterceptor {
    debug: bool,
}

impl RecoveryInterceptor {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    fn recover(&self, call: &CallInfo, payload: &(dyn Any + Send)) -> Status {
        let message = panic_message(payload);
        tracing::error!(
            grpc.method = %call.path(),
            panic = %message,
            "recovered from panic in call"
        );
        if self.debug {
            Status::internal(format!("panic: {message}"))
        } else {
            Status::internal("internal error")
        }
    }
}

impl Interceptor for RecoveryInterceptor {
    fn intercept(&self, call: CallInfo, request: Request, next: Next) -> BoxFuture<'static, Response> {
        let recovery = *self;
        let downstream = run_catching(next, request);

        Box::pin(async move {
            match downstream.await {
                Ok(response) => response.map(|inner| {
                    Body::new(RecoveredBody {
                        inner: Some(inner),
                        recovery,
                        call,
                    })
                }),
                Err(payload) => recovery.recover(&call, payload.as_ref()).into_http::<Body>(),
            }
        })
    }
}

/// Response body that turns a panic while streaming into `INTERNAL` trailers.
struct RecoveredBody {
    inner: Option<Body>,
    recovery: RecoveryInterceptor,
    call: CallInfo,
}

impl HttpBody for RecoveredBody {
    type Data = Bytes;
    type Error = Status;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Status>>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match std::panic::catch_unwind(AssertUnwindSafe(|| Pin::new(inner).poll_frame(cx))) {
            Ok(polled) => polled,
            Err(payload) => {
                this.inner = None;
                let status = this.recovery.recover(&this.call, payload.as_ref());
                Poll::Ready(Some(Ok(Frame::trailers(trailers(&status)))))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.as_ref().is_none_or(HttpBody::is_end_stream)
    }

    fn size_hint(&self) -> SizeHint {
        self.inner
            .as_ref()
            .map_or_else(|| SizeHint::with_exact(0), HttpBody::size_hint)
    }
}

fn trailers(status: &Status) -> HeaderMap {
    let mut map = HeaderMap::new();
    if status.add_header(&mut map).is_err() {
        map.insert("grpc-status", HeaderValue::from(i32::from(Code::Internal)));
    }
    map
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
