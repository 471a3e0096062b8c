//! Prometheus metrics.
//!
//! Thin wrappers around the `metrics` facade so call sites stay one line.
//! The recorder is process-global and installed at most once.

use ::metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

static RECORDER: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the Prometheus recorder, or return the already installed handle.
///
/// Returns `None` if another recorder was installed by someone else.
pub fn install() -> Option<PrometheusHandle> {
    RECORDER
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to install Prometheus recorder: {}", e);
                None
            }
        })
        .clone()
}

/// Count a finished proxy request.
///
/// `outcome` is one of `playlist`, `passthrough`, `invalid` or `error`.
pub fn record_request(outcome: &'static str, status: u16) {
    counter!(
        "hls_proxy_requests_total",
        "outcome" => outcome,
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_duration(outcome: &'static str, start: Instant) {
    histogram!("hls_proxy_request_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

/// Count a failed upstream fetch, `kind` being `status` or `transport`.
pub fn record_upstream_error(kind: &'static str) {
    counter!("hls_proxy_upstream_errors_total", "kind" => kind).increment(1);
}

/// Depth at which a playlist chain produced its final media playlist.
pub fn record_resolution_depth(depth: u32) {
    histogram!("hls_proxy_resolution_depth").record(f64::from(depth));
}
