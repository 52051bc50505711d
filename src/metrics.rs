use crate::job_queue::OperationType;
use anyhow::{Context, Result};
use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Metric name prefix for all queue metrics
const PREFIX: &str = "operations_queue";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref JOBS_ENQUEUED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_enqueued_total"), "Total number of enqueued jobs"),
        &["operation_type"]
    ).expect("Failed to create jobs_enqueued_total metric");

    /// outcome is one of completed, retried, failed, stalled
    pub static ref JOBS_FINISHED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_jobs_finished_total"), "Job executions by outcome"),
        &["operation_type", "outcome"]
    ).expect("Failed to create jobs_finished_total metric");

    pub static ref JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_job_duration_seconds"),
            "Handler execution time in seconds"
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]),
        &["operation_type"]
    ).expect("Failed to create job_duration_seconds metric");

    pub static ref JOBS_IN_FLIGHT: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_jobs_in_flight"), "Jobs currently held by a worker"),
        &["operation_type"]
    ).expect("Failed to create jobs_in_flight metric");

    pub static ref TRACKER_WRITE_ERRORS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_tracker_write_errors_total"),
        "Operation status writes that failed"
    ).expect("Failed to create tracker_write_errors_total metric");
}

/// Register all metrics with the registry. Safe to call more than once.
pub fn init_metrics() {
    let _ = REGISTRY.register(Box::new(JOBS_ENQUEUED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_FINISHED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(JOBS_IN_FLIGHT.clone()));
    let _ = REGISTRY.register(Box::new(TRACKER_WRITE_ERRORS_TOTAL.clone()));

    tracing::debug!("Metrics registered");
}

pub fn record_job_enqueued(operation_type: OperationType) {
    JOBS_ENQUEUED_TOTAL
        .with_label_values(&[operation_type.as_str()])
        .inc();
}

pub fn record_job_finished(operation_type: OperationType, outcome: &str) {
    JOBS_FINISHED_TOTAL
        .with_label_values(&[operation_type.as_str(), outcome])
        .inc();
}

pub fn record_job_duration(operation_type: OperationType, duration: Duration) {
    JOB_DURATION_SECONDS
        .with_label_values(&[operation_type.as_str()])
        .observe(duration.as_secs_f64());
}

pub fn set_jobs_in_flight(operation_type: OperationType, count: usize) {
    JOBS_IN_FLIGHT
        .with_label_values(&[operation_type.as_str()])
        .set(count as f64);
}

pub fn record_tracker_write_error() {
    TRACKER_WRITE_ERRORS_TOTAL.inc();
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Serve /metrics on the given port until the token is cancelled.
pub async fn run_metrics_server(port: u16, shutdown: CancellationToken) -> Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics port {}", port))?;
    tracing::info!("Metrics available at port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Metrics server failed")
}
