//! Tower middleware driving [`MetricsOps`] for every request.
//!
//! Works on any `Service<http::Request<_>, Response = http::Response<_>>`,
//! so the same layer instruments an axum server and a hyper client.
//!
//! | Event | Hooks |
//! |-------|-------|
//! | request accepted | `increase_active_requests` |
//! | response headers | `record_headers_time` |
//! | body end of stream | `record_total_time`, `decrease_active_requests` |
//! | body error | `record_abnormal_termination` (abnormal), `decrease_active_requests` |
//! | body dropped early | `record_abnormal_termination` (cancel), `decrease_active_requests` |
//! | inner service error | `record_abnormal_termination` (timeout or error), `decrease_active_requests` |
//! | dropped before headers | `record_abnormal_termination` (cancel), `decrease_active_requests` |
//!
//! Failing hooks are logged and never fail the request.

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::future::BoxFuture;
use http::request::Parts;
use http::{Request, Response};
use http_body::Body;
use reqgauge_core::error::BoxError;
use reqgauge_core::ops::{Cause, MetricsOps, TerminationKind};
use tower::timeout::error::Elapsed;
use tower::{Layer, Service};
use tracing::warn;

use crate::body::{
    MetricsBody, RequestTiming, elapsed_nanos, record_termination, spawn_recording,
};

/// Maps a request head to its `classifier` label value.
pub type Classifier = Arc<dyn Fn(&Parts) -> Option<String> + Send + Sync>;

/// Names the `cause` of an inner service error. `None` falls back to the
/// service's error type name.
pub type CauseExtractor = Arc<dyn Fn(&BoxError) -> Option<Cause> + Send + Sync>;

/// Layer producing [`MetricsService`].
#[derive(Clone)]
pub struct MetricsLayer {
    ops: Arc<dyn MetricsOps>,
    classifier: Option<Classifier>,
    cause: Option<CauseExtractor>,
}

impl MetricsLayer {
    pub fn new(ops: impl MetricsOps + 'static) -> Self {
        Self::from_shared(Arc::new(ops))
    }

    pub fn from_shared(ops: Arc<dyn MetricsOps>) -> Self {
        Self {
            ops,
            classifier: None,
            cause: None,
        }
    }

    /// Label requests with the value `f` returns; `None` means no classifier.
    pub fn with_classifier<F>(mut self, f: F) -> Self
    where
        F: Fn(&Parts) -> Option<String> + Send + Sync + 'static,
    {
        self.classifier = Some(Arc::new(f));
        self
    }

    /// Name error causes with `f`, typically by downcasting the boxed error.
    ///
    /// Stacks whose inner service already boxes its errors (a `TimeoutLayer`
    /// for one) otherwise only ever report the box type.
    pub fn with_cause_extractor<F>(mut self, f: F) -> Self
    where
        F: Fn(&BoxError) -> Option<Cause> + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for MetricsLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsLayer")
            .field("classifier", &self.classifier.is_some())
            .field("cause_extractor", &self.cause.is_some())
            .finish_non_exhaustive()
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            ops: self.ops.clone(),
            classifier: self.classifier.clone(),
            cause: self.cause.clone(),
        }
    }
}

/// Service recording request metrics around `S`.
#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    ops: Arc<dyn MetricsOps>,
    classifier: Option<Classifier>,
    cause: Option<CauseExtractor>,
}

/// Holds an accepted request's gauge slot until its response head is known.
///
/// Dropped while armed, for example when the client goes away before the
/// inner service answers, it records a cancellation.
struct InFlight {
    ops: Arc<dyn MetricsOps>,
    start: Instant,
    classifier: Option<String>,
    armed: bool,
}

impl InFlight {
    /// Hand the slot over to whoever finishes the request.
    fn disarm(mut self) -> (Arc<dyn MetricsOps>, Option<String>) {
        self.armed = false;
        (self.ops.clone(), self.classifier.take())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.armed {
            spawn_recording(Box::pin(record_termination(
                self.ops.clone(),
                elapsed_nanos(self.start),
                TerminationKind::Canceled,
                self.classifier.take(),
            )));
        }
    }
}

impl<S, ReqB, ResB> Service<Request<ReqB>> for MetricsService<S>
where
    S: Service<Request<ReqB>, Response = Response<ResB>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Send,
    ReqB: Send + 'static,
    ResB: Body + Send + 'static,
{
    type Response = Response<MetricsBody<ResB>>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqB>) -> Self::Future {
        let start = Instant::now();
        // The clone is not driven to readiness; the original is.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let ops = self.ops.clone();
        let cause_extractor = self.cause.clone();

        let (parts, body) = req.into_parts();
        let classifier = self.classifier.as_ref().and_then(|f| f(&parts));
        let method = parts.method.clone();
        let req = Request::from_parts(parts, body);

        Box::pin(async move {
            if let Err(e) = ops.increase_active_requests(classifier.as_deref()).await {
                warn!(error = %e, "Failed to increase active requests");
            }
            let in_flight = InFlight {
                ops,
                start,
                classifier,
                armed: true,
            };

            match inner.call(req).await {
                Ok(response) => {
                    if let Err(e) = in_flight
                        .ops
                        .record_headers_time(
                            &method,
                            elapsed_nanos(start),
                            in_flight.classifier.as_deref(),
                        )
                        .await
                    {
                        warn!(error = %e, "Failed to record headers time");
                    }
                    let (ops, classifier) = in_flight.disarm();
                    let timing = RequestTiming {
                        ops,
                        method,
                        status: response.status(),
                        start,
                        classifier,
                    };
                    Ok(response.map(|body| MetricsBody::new(body, timing)))
                }
                Err(err) => {
                    let fallback = Cause::of(&err);
                    let err: BoxError = err.into();
                    let kind = if err.is::<Elapsed>() {
                        TerminationKind::Timeout
                    } else {
                        let cause = cause_extractor.and_then(|f| f(&err));
                        TerminationKind::Error(Some(cause.unwrap_or(fallback)))
                    };
                    let (ops, classifier) = in_flight.disarm();
                    record_termination(ops, elapsed_nanos(start), kind, classifier).await;
                    Err(err)
                }
            }
        })
    }
}

impl<S: fmt::Debug> fmt::Debug for MetricsService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsService")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}
