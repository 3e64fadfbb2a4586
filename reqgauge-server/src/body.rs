//! Response body wrapper that finishes request metrics at end of stream.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Instant;

use futures_util::future::BoxFuture;
use http::{Method, StatusCode};
use http_body::{Body, Frame};
use reqgauge_core::error::BoxError;
use reqgauge_core::ops::{Cause, MetricsOps, TerminationKind};
use tracing::warn;

/// Everything needed to finish the metrics of one request.
pub(crate) struct RequestTiming {
    pub(crate) ops: Arc<dyn MetricsOps>,
    pub(crate) method: Method,
    pub(crate) status: StatusCode,
    pub(crate) start: Instant,
    pub(crate) classifier: Option<String>,
}

/// Nanoseconds since `start`, saturating.
pub(crate) fn elapsed_nanos(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

impl RequestTiming {
    /// HEAD responses and 1xx, 204 and 304 statuses carry no body, so the
    /// server may drop it without polling.
    fn expects_body(&self) -> bool {
        self.method != Method::HEAD
            && !self.status.is_informational()
            && self.status != StatusCode::NO_CONTENT
            && self.status != StatusCode::NOT_MODIFIED
    }

    /// Body completed: total time, status count, then the gauge.
    fn completed(self) -> BoxFuture<'static, ()> {
        let elapsed = elapsed_nanos(self.start);
        Box::pin(async move {
            let classifier = self.classifier.as_deref();
            if let Err(e) = self
                .ops
                .record_total_time(&self.method, self.status, elapsed, classifier)
                .await
            {
                warn!(error = %e, "Failed to record total time");
            }
            decrease(&*self.ops, classifier).await;
        })
    }

    /// Body ended without completing.
    fn terminated(self, kind: TerminationKind) -> BoxFuture<'static, ()> {
        let elapsed = elapsed_nanos(self.start);
        Box::pin(record_termination(self.ops, elapsed, kind, self.classifier))
    }
}

/// Abnormal termination followed by the gauge decrement.
pub(crate) async fn record_termination(
    ops: Arc<dyn MetricsOps>,
    elapsed_nanos: u64,
    kind: TerminationKind,
    classifier: Option<String>,
) {
    let classifier = classifier.as_deref();
    if let Err(e) = ops
        .record_abnormal_termination(elapsed_nanos, kind, classifier)
        .await
    {
        warn!(error = %e, "Failed to record abnormal termination");
    }
    decrease(&*ops, classifier).await;
}

/// Runs a recording from a `Drop` impl on the current runtime.
pub(crate) fn spawn_recording(future: BoxFuture<'static, ()>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => warn!("Request dropped outside a runtime, request metrics lost"),
    }
}

pub(crate) async fn decrease(ops: &dyn MetricsOps, classifier: Option<&str>) {
    if let Err(e) = ops.decrease_active_requests(classifier).await {
        warn!(error = %e, "Failed to decrease active requests");
    }
}

/// What to hand back to the caller once the finishing recording is done.
enum Pending<E> {
    End,
    Error(E),
}

/// Body wrapper that forwards frames untouched and records the end of the
/// response.
///
/// - end of stream: `record_total_time`, then `decrease_active_requests`
/// - body error: abnormal termination with the error's type as cause
/// - dropped before either: cancellation, recorded from a spawned task,
///   unless the response carries no body (HEAD, 1xx, 204, 304) or the body
///   was already empty, in which case the request counts as completed
///
/// The end of stream is only reported to the caller once the recording has
/// finished, so a scrape issued after the response was fully read observes it.
pub struct MetricsBody<B> {
    inner: B,
    timing: Option<RequestTiming>,
    finishing: Option<(BoxFuture<'static, ()>, Pending<BoxError>)>,
    bodiless: bool,
}

impl<B: Body> MetricsBody<B> {
    pub(crate) fn new(inner: B, timing: RequestTiming) -> Self {
        let bodiless = !timing.expects_body() || inner.is_end_stream();
        Self {
            inner,
            timing: Some(timing),
            finishing: None,
            bodiless,
        }
    }
}

impl<B> MetricsBody<B> {
    /// Whether the request's metrics have been fully recorded.
    pub fn is_recorded(&self) -> bool {
        self.timing.is_none() && self.finishing.is_none()
    }
}

impl<B> Body for MetricsBody<B>
where
    B: Body + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = B::Data;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        loop {
            if let Some((future, _)) = this.finishing.as_mut() {
                ready!(future.as_mut().poll(cx));
                return match this.finishing.take() {
                    Some((_, Pending::Error(e))) => Poll::Ready(Some(Err(e))),
                    _ => Poll::Ready(None),
                };
            }

            let Some(timing) = this.timing.take() else {
                return match Pin::new(&mut this.inner).poll_frame(cx) {
                    Poll::Ready(Some(Ok(frame))) => Poll::Ready(Some(Ok(frame))),
                    Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e.into()))),
                    Poll::Ready(None) => Poll::Ready(None),
                    Poll::Pending => Poll::Pending,
                };
            };

            match Pin::new(&mut this.inner).poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    this.timing = Some(timing);
                    return Poll::Ready(Some(Ok(frame)));
                }
                Poll::Ready(Some(Err(e))) => {
                    let kind = TerminationKind::Abnormal(Some(Cause::of(&e)));
                    this.finishing = Some((timing.terminated(kind), Pending::Error(e.into())));
                }
                Poll::Ready(None) => {
                    this.finishing = Some((timing.completed(), Pending::End));
                }
                Poll::Pending => {
                    this.timing = Some(timing);
                    return Poll::Pending;
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.is_recorded() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> http_body::SizeHint {
        self.inner.size_hint()
    }
}

impl<B: fmt::Debug> fmt::Debug for MetricsBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsBody")
            .field("inner", &self.inner)
            .field("recorded", &self.is_recorded())
            .finish()
    }
}

impl<B> Drop for MetricsBody<B> {
    fn drop(&mut self) {
        let future = match (self.timing.take(), self.finishing.take()) {
            (Some(timing), _) if self.bodiless => timing.completed(),
            (Some(timing), _) => timing.terminated(TerminationKind::Canceled),
            (None, Some((future, _))) => future,
            (None, None) => return,
        };
        spawn_recording(future);
    }
}
