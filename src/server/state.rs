use crate::{
    config::Config,
    fetch::{ContentFetcher, ReqwestTransport, Transport},
    metrics,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Upstream fetcher sharing one pooled HTTP client
    pub fetcher: ContentFetcher,
    /// Prometheus handle, `None` if a foreign recorder is installed
    pub metrics: Option<PrometheusHandle>,
    pub started_at: Instant,
}

impl AppState {
    /// Create a new AppState fetching through a pooled `reqwest` client
    pub fn new(config: Config) -> Result<Self, reqwest::Error> {
        let transport =
            ReqwestTransport::new(Duration::from_secs(config.upstream_timeout_secs))?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a new AppState fetching through the given transport
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        let fetcher = ContentFetcher::new(transport, config.user_agents.clone());

        Self {
            config: Arc::new(config),
            fetcher,
            metrics: metrics::install(),
            started_at: Instant::now(),
        }
    }
}
