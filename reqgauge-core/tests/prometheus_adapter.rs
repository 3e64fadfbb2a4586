//! End-to-end scenarios for the Prometheus adapter: build, record through the
//! facade, scrape.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use http::{Method, StatusCode};
use reqgauge_core::exemplar::{ExemplarLabels, sampler_fn};
use reqgauge_core::{
    BoxError, Cause, MetricRegistry, MetricsError, MetricsOps, PrometheusConfig, TerminationKind,
};

const MS: u64 = 1_000_000;

#[tokio::test]
async fn test_get_200_request_lifecycle() {
    let registry = MetricRegistry::new();
    let metrics = PrometheusConfig::new(registry.clone()).build().unwrap();
    let ops = metrics.ops();

    ops.increase_active_requests(None).await.unwrap();
    ops.record_headers_time(&Method::GET, 50 * MS, None)
        .await
        .unwrap();
    ops.record_total_time(&Method::GET, StatusCode::OK, 100 * MS, None)
        .await
        .unwrap();
    ops.decrease_active_requests(None).await.unwrap();

    let snapshot = registry.scrape().unwrap();
    assert_eq!(
        snapshot.value(r#"http_server_request_count_total{classifier="",method="get",status="2xx"}"#),
        Some(1.0)
    );
    assert_eq!(
        snapshot.value(
            r#"http_server_response_duration_seconds_sum{classifier="",method="get",phase="headers"}"#
        ),
        Some(0.05)
    );
    assert_eq!(
        snapshot.value(
            r#"http_server_response_duration_seconds_sum{classifier="",method="get",phase="body"}"#
        ),
        Some(0.1)
    );
    assert_eq!(
        snapshot.value(r#"http_server_active_request_count{classifier=""}"#),
        Some(0.0)
    );
}

#[tokio::test]
async fn test_failed_request_with_io_error_cause() {
    let registry = MetricRegistry::new();
    let metrics = PrometheusConfig::new(registry.clone()).build().unwrap();
    let ops = metrics.ops();

    let err = std::io::Error::other("connection reset");
    ops.increase_active_requests(None).await.unwrap();
    ops.record_abnormal_termination(
        50 * MS,
        TerminationKind::Error(Some(Cause::of(&err))),
        None,
    )
    .await
    .unwrap();
    ops.decrease_active_requests(None).await.unwrap();

    let cause = std::any::type_name::<std::io::Error>();
    let labels = format!(r#"{{classifier="",termination_type="error",cause="{cause}"}}"#);
    let snapshot = registry.scrape().unwrap();
    assert_eq!(
        snapshot.value(&format!("http_server_abnormal_terminations_count{labels}")),
        Some(1.0)
    );
    assert_eq!(
        snapshot.value(&format!("http_server_abnormal_terminations_sum{labels}")),
        Some(0.05)
    );
    assert_eq!(
        snapshot.value(r#"http_server_active_request_count{classifier=""}"#),
        Some(0.0)
    );
}

#[tokio::test]
async fn test_exemplar_attached_to_counter() {
    let registry = MetricRegistry::new();
    let metrics = PrometheusConfig::new(registry.clone())
        .with_exemplar_sampler(sampler_fn(|| async {
            Ok(Some(ExemplarLabels::from([(
                "trace_id".to_string(),
                "123".to_string(),
            )])))
        }))
        .build()
        .unwrap();

    metrics
        .ops()
        .record_total_time(&Method::GET, StatusCode::OK, 100 * MS, None)
        .await
        .unwrap();

    let snapshot = registry.scrape().unwrap();
    let series = r#"http_server_request_count_total{classifier="",method="get",status="2xx"}"#;
    assert_eq!(snapshot.exemplar(series), Some(r#"{trace_id="123"}"#));

    // Legacy text exposition carries no exemplars.
    let text = snapshot.to_text_format();
    assert!(text.contains(series));
    assert!(!text.contains("trace_id"));
}

fn exemplar_bucket<'a>(text: &'a str, family: &str, label: &str) -> Option<&'a str> {
    let prefix = format!("{family}_bucket{{");
    text.lines()
        .find(|line| line.starts_with(&prefix) && line.contains(label) && line.contains(" # {"))
}

#[tokio::test]
async fn test_exemplar_attached_to_histograms() {
    let registry = MetricRegistry::new();
    let metrics = PrometheusConfig::new(registry.clone())
        .with_exemplar_sampler(sampler_fn(|| async {
            Ok(Some(ExemplarLabels::from([(
                "trace_id".to_string(),
                "123".to_string(),
            )])))
        }))
        .build()
        .unwrap();
    let ops = metrics.ops();

    ops.record_headers_time(&Method::GET, 50 * MS, None)
        .await
        .unwrap();
    ops.record_total_time(&Method::GET, StatusCode::OK, 100 * MS, None)
        .await
        .unwrap();
    ops.record_abnormal_termination(20 * MS, TerminationKind::Timeout, None)
        .await
        .unwrap();

    let snapshot = registry.scrape().unwrap();
    let text = snapshot.as_openmetrics();
    for phase in [r#"phase="headers""#, r#"phase="body""#] {
        let line = exemplar_bucket(text, "http_server_response_duration_seconds", phase)
            .unwrap_or_else(|| panic!("no exemplar on {phase} bucket:\n{text}"));
        assert!(line.contains(r#"# {trace_id="123"}"#), "{line}");
    }
    let line = exemplar_bucket(
        text,
        "http_server_abnormal_terminations",
        r#"termination_type="timeout""#,
    )
    .unwrap_or_else(|| panic!("no exemplar on termination bucket:\n{text}"));
    assert!(line.contains(r#"# {trace_id="123"}"#), "{line}");

    // The exemplar sits on the bucket holding the observation.
    let body = exemplar_bucket(text, "http_server_response_duration_seconds", r#"phase="body""#)
        .unwrap();
    assert!(body.contains(r#"le="0.1""#), "{body}");
}

#[tokio::test]
async fn test_sampler_invoked_once_per_write_hook() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let registry = MetricRegistry::new();
    let metrics = PrometheusConfig::new(registry.clone())
        .with_exemplar_sampler(sampler_fn(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Ok(None) }
        }))
        .build()
        .unwrap();
    let ops = metrics.ops();

    ops.increase_active_requests(None).await.unwrap();
    ops.record_headers_time(&Method::GET, MS, None).await.unwrap();
    ops.record_total_time(&Method::GET, StatusCode::OK, MS, None)
        .await
        .unwrap();
    ops.record_abnormal_termination(MS, TerminationKind::Canceled, None)
        .await
        .unwrap();
    ops.decrease_active_requests(None).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_sampler_error_propagates_without_write() {
    let registry = MetricRegistry::new();
    let metrics = PrometheusConfig::new(registry.clone())
        .with_exemplar_sampler(sampler_fn(|| async {
            Err::<Option<ExemplarLabels>, BoxError>("span store unavailable".into())
        }))
        .build()
        .unwrap();

    let err = metrics
        .ops()
        .record_total_time(&Method::GET, StatusCode::OK, MS, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MetricsError::Sampler(_)));
    assert_eq!(
        std::error::Error::source(&err).map(ToString::to_string),
        Some("span store unavailable".to_string())
    );

    let snapshot = registry.scrape().unwrap();
    assert_eq!(
        snapshot.value(r#"http_server_request_count_total{classifier="",method="get",status="2xx"}"#),
        None
    );
}

#[test]
fn test_label_arity_fails_before_registration() {
    let registry = MetricRegistry::new();
    let err = PrometheusConfig::new(registry.clone())
        .with_custom_labels(["a", "b"], ["1", "2", "3"])
        .build()
        .unwrap_err();

    assert!(matches!(err, MetricsError::LabelArity { names: 2, values: 3 }));
    assert!(err.is_config());
    assert!(registry.is_empty());
}

#[test]
fn test_release_then_rebuild() {
    let registry = MetricRegistry::new();
    let config = PrometheusConfig::new(registry.clone()).with_prefix("cycle");

    let first = config.build().unwrap();
    assert_eq!(registry.len(), 4);
    first.release();
    assert!(registry.is_empty());

    let second = config.build().unwrap();
    assert_eq!(registry.len(), 4);
    drop(second);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_duplicate_prefix_leaves_first_adapter_intact() {
    let registry = MetricRegistry::new();
    let config = PrometheusConfig::new(registry.clone());

    let first = config.build().unwrap();
    let err = config.build().unwrap_err();
    assert!(matches!(err, MetricsError::DuplicateMetric { .. }));
    assert_eq!(registry.len(), 4);

    first
        .ops()
        .record_total_time(&Method::DELETE, StatusCode::NO_CONTENT, MS, Some("admin"))
        .await
        .unwrap();
    let snapshot = registry.scrape().unwrap();
    assert_eq!(
        snapshot.value(
            r#"http_server_request_count_total{classifier="admin",method="delete",status="2xx"}"#
        ),
        Some(1.0)
    );
}

#[tokio::test]
async fn test_two_prefixes_share_a_registry() {
    let registry = MetricRegistry::new();
    let server = PrometheusConfig::new(registry.clone()).build().unwrap();
    let client = PrometheusConfig::new(registry.clone())
        .with_prefix("http_client")
        .build()
        .unwrap();
    assert_eq!(registry.len(), 8);

    server.ops().increase_active_requests(None).await.unwrap();
    client.ops().increase_active_requests(None).await.unwrap();
    client.ops().increase_active_requests(None).await.unwrap();

    let snapshot = registry.scrape().unwrap();
    assert_eq!(
        snapshot.value(r#"http_server_active_request_count{classifier=""}"#),
        Some(1.0)
    );
    assert_eq!(
        snapshot.value(r#"http_client_active_request_count{classifier=""}"#),
        Some(2.0)
    );
}

#[tokio::test]
async fn test_concurrent_recording() {
    let registry = MetricRegistry::new();
    let metrics = PrometheusConfig::new(registry.clone()).build().unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let ops = metrics.ops();
        handles.push(tokio::spawn(async move {
            for _ in 0..100 {
                ops.record_total_time(&Method::GET, StatusCode::OK, MS, None)
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let snapshot = registry.scrape().unwrap();
    assert_eq!(
        snapshot.value(r#"http_server_request_count_total{classifier="",method="get",status="2xx"}"#),
        Some(800.0)
    );
}

#[test]
fn test_settings_file_to_adapter() {
    let settings = reqgauge_core::config::parse_settings(
        "prefix: svc\ncustom_labels:\n  - name: region\n    value: west\n",
    )
    .unwrap();
    let registry = MetricRegistry::new();
    let metrics = settings.into_config(registry.clone()).build().unwrap();

    assert_eq!(metrics.names().request_count, "svc_request_count");
    assert!(registry.contains("svc_response_duration_seconds"));
}
