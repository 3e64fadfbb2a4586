//! Backend-neutral metrics facade consumed by HTTP middleware.
//!
//! Middleware measures timings and classifies outcomes, then reports them
//! through [`MetricsOps`]. Backends (see [`crate::prometheus`]) translate the
//! hook calls into instrument updates.
//!
//! # Hooks
//!
//! | Hook | When |
//! |------|------|
//! | `increase_active_requests` | request accepted |
//! | `decrease_active_requests` | request finished, successfully or not |
//! | `record_headers_time` | response headers available |
//! | `record_total_time` | response body fully sent |
//! | `record_abnormal_termination` | request failed, timed out or was cancelled |

use std::borrow::Cow;
use std::fmt;

use async_trait::async_trait;
use http::{Method, StatusCode};

use crate::error::MetricsResult;

/// Lifecycle hooks reported by HTTP middleware.
///
/// Every hook is a single unit of work. Errors are not expected in steady
/// state; when one occurs (for example a failing exemplar sampler) it must be
/// propagated rather than swallowed.
#[async_trait]
pub trait MetricsOps: Send + Sync {
    /// A request became active.
    async fn increase_active_requests(&self, classifier: Option<&str>) -> MetricsResult<()>;

    /// A request stopped being active.
    async fn decrease_active_requests(&self, classifier: Option<&str>) -> MetricsResult<()>;

    /// Time from request start until the response headers were produced.
    async fn record_headers_time(
        &self,
        method: &Method,
        elapsed_nanos: u64,
        classifier: Option<&str>,
    ) -> MetricsResult<()>;

    /// Time from request start until the response body completed.
    ///
    /// Also counts the response under its status class. The two updates are
    /// independent; a concurrent scrape may see one without the other.
    async fn record_total_time(
        &self,
        method: &Method,
        status: StatusCode,
        elapsed_nanos: u64,
        classifier: Option<&str>,
    ) -> MetricsResult<()>;

    /// The request ended without a complete response.
    async fn record_abnormal_termination(
        &self,
        elapsed_nanos: u64,
        kind: TerminationKind,
        classifier: Option<&str>,
    ) -> MetricsResult<()>;
}

/// Implementation that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopOps;

#[async_trait]
impl MetricsOps for NoopOps {
    async fn increase_active_requests(&self, _classifier: Option<&str>) -> MetricsResult<()> {
        Ok(())
    }

    async fn decrease_active_requests(&self, _classifier: Option<&str>) -> MetricsResult<()> {
        Ok(())
    }

    async fn record_headers_time(
        &self,
        _method: &Method,
        _elapsed_nanos: u64,
        _classifier: Option<&str>,
    ) -> MetricsResult<()> {
        Ok(())
    }

    async fn record_total_time(
        &self,
        _method: &Method,
        _status: StatusCode,
        _elapsed_nanos: u64,
        _classifier: Option<&str>,
    ) -> MetricsResult<()> {
        Ok(())
    }

    async fn record_abnormal_termination(
        &self,
        _elapsed_nanos: u64,
        _kind: TerminationKind,
        _classifier: Option<&str>,
    ) -> MetricsResult<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Termination kinds
// ─────────────────────────────────────────────────────────────────────────────

/// Fully qualified type name of the error that ended a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cause(Cow<'static, str>);

impl Cause {
    /// Cause named after the concrete type of `err`.
    pub fn of<E: ?Sized>(err: &E) -> Self {
        Self(Cow::Borrowed(std::any::type_name_of_val(err)))
    }

    /// Cause named after the type `E`.
    pub fn of_type<E: ?Sized>() -> Self {
        Self(Cow::Borrowed(std::any::type_name::<E>()))
    }

    /// Cause with an explicit name.
    pub fn named(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a request ended without a complete response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationKind {
    /// The response started but its body failed.
    Abnormal(Option<Cause>),
    /// The handler failed before producing a response.
    Error(Option<Cause>),
    /// The caller went away.
    Canceled,
    /// A deadline elapsed.
    Timeout,
}

impl TerminationKind {
    /// `termination_type` label value.
    pub fn label(&self) -> &'static str {
        match self {
            TerminationKind::Abnormal(_) => "abnormal",
            TerminationKind::Error(_) => "error",
            TerminationKind::Canceled => "cancel",
            TerminationKind::Timeout => "timeout",
        }
    }

    /// `cause` label value; empty when no cause is known.
    pub fn cause(&self) -> &str {
        match self {
            TerminationKind::Abnormal(Some(cause)) | TerminationKind::Error(Some(cause)) => {
                cause.as_str()
            }
            TerminationKind::Abnormal(None)
            | TerminationKind::Error(None)
            | TerminationKind::Canceled
            | TerminationKind::Timeout => "",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Label value mapping
// ─────────────────────────────────────────────────────────────────────────────

/// Status class of a response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
}

impl StatusClass {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusClass::Informational => "1xx",
            StatusClass::Success => "2xx",
            StatusClass::Redirection => "3xx",
            StatusClass::ClientError => "4xx",
            StatusClass::ServerError => "5xx",
        }
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a numeric status code; first matching upper bound wins.
pub fn status_class(code: u16) -> StatusClass {
    if code < 200 {
        StatusClass::Informational
    } else if code < 300 {
        StatusClass::Success
    } else if code < 400 {
        StatusClass::Redirection
    } else if code < 500 {
        StatusClass::ClientError
    } else {
        StatusClass::ServerError
    }
}

/// `method` label value. Methods outside the known set map to `other`.
pub fn method_label(method: &Method) -> &'static str {
    match method.as_str() {
        "GET" => "get",
        "HEAD" => "head",
        "POST" => "post",
        "PUT" => "put",
        "PATCH" => "patch",
        "DELETE" => "delete",
        "CONNECT" => "connect",
        "OPTIONS" => "options",
        "TRACE" => "trace",
        "MOVE" => "move",
        _ => "other",
    }
}

/// Convert elapsed nanoseconds to seconds.
pub fn nanos_to_seconds(elapsed_nanos: u64) -> f64 {
    elapsed_nanos as f64 / 1_000_000_000.0
}
