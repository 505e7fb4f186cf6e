//! Send tracing middleware.
//!
//! Opens one `send` span per call and emits a single completion event carrying
//! the call's duration and outcome.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};
use waypost_core::{Payload, RouteError};

use crate::client::SendCall;

// ---------------------------------------------------------------------------
// TraceLayer
// ---------------------------------------------------------------------------

/// Tower layer that wraps Send calls in a `tracing` span.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceLayer;

impl<S> Layer<S> for TraceLayer {
    type Service = TraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceService { inner }
    }
}

// ---------------------------------------------------------------------------
// TraceService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TraceService<S> {
    inner: S,
}

impl<S> Service<SendCall> for TraceService<S>
where
    S: Service<SendCall, Response = Option<Payload>, Error = RouteError> + Send,
    S::Future: Send + 'static,
{
    type Response = Option<Payload>;
    type Error = RouteError;
    type Future = Pin<Box<dyn Future<Output = Result<Option<Payload>, RouteError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: SendCall) -> Self::Future {
        let path = call.path.clone();
        let request_type = call.request.as_ref().map_or("<absent>", Payload::type_name);
        let result_type = call.result_type.map_or("<none>", |handle| handle.name());

        let span = info_span!(
            "send",
            path = %path,
            request_type,
            result_type,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(call);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;

                let outcome = match &result {
                    Ok(Some(_)) => "ok",
                    Ok(None) => "empty",
                    Err(_) => "error",
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                match &result {
                    Err(error) => tracing::info!(
                        path = %path,
                        duration_ms,
                        outcome,
                        error = %error,
                        "send complete"
                    ),
                    Ok(_) => tracing::info!(path = %path, duration_ms, outcome, "send complete"),
                }

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use super::*;

    /// Echoes the request back, or fails for the `/fail` path.
    struct EchoService;

    impl Service<SendCall> for EchoService {
        type Response = Option<Payload>;
        type Error = RouteError;
        type Future = Pin<Box<dyn Future<Output = Result<Option<Payload>, RouteError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, call: SendCall) -> Self::Future {
            Box::pin(async move {
                if call.path == "/fail" {
                    return Err(RouteError::ReceiverNotFound { path: call.path });
                }
                Ok(call.request)
            })
        }
    }

    #[tokio::test]
    async fn trace_layer_passes_through_response() {
        let svc = TraceLayer.layer(EchoService);
        let call = SendCall::new("/echo", Some(Payload::new(7_u32)), None);

        let response = svc.oneshot(call).await.unwrap().unwrap();
        assert_eq!(response.downcast::<u32>().unwrap(), 7);
    }

    #[tokio::test]
    async fn trace_layer_passes_through_errors() {
        let svc = TraceLayer.layer(EchoService);
        let err = svc
            .oneshot(SendCall::new("/fail", None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::ReceiverNotFound { ref path } if path == "/fail"));
    }
}
