use std::{env, net::SocketAddr, sync::Arc};

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::hydrate_env_file;

static SUBSCRIBER_INSTALLED: OnceCell<()> = OnceCell::new();
static METRICS_HANDLE: OnceCell<Arc<PrometheusHandle>> = OnceCell::new();

pub const METRIC_BLOCKS_SCANNED: &str = "monitor_blocks_scanned_total";
pub const METRIC_CURSOR_HEIGHT: &str = "monitor_cursor_height";
pub const METRIC_CHAIN_HEAD: &str = "monitor_chain_head";
pub const METRIC_EVENTS_MATCHED: &str = "monitor_events_matched_total";
pub const METRIC_REORGS: &str = "monitor_reorgs_total";
pub const METRIC_REORG_DEPTH: &str = "monitor_reorg_depth";
pub const METRIC_RPC_ERRORS: &str = "monitor_rpc_errors_total";
pub const METRIC_TRANSITIONS: &str = "intent_transitions_total";
pub const METRIC_SETTLEMENT_ATTEMPTS: &str = "settlement_attempts_total";
pub const METRIC_NOTIFICATIONS_DROPPED: &str = "notifications_dropped_total";
pub const METRIC_API_REQUESTS: &str = "api_requests_total";

/// Shared observability options for binaries.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    log_filter: String,
    metrics_address: Option<String>,
}

impl TelemetryConfig {
    /// Reads `<PREFIX>_LOG_FILTER` and `<PREFIX>_METRICS_ADDRESS`, e.g.
    /// `MONITOR_LOG_FILTER`. Both are optional.
    pub fn from_env(prefix: &str) -> Self {
        let _ = hydrate_env_file();
        let upper = prefix.trim().to_ascii_uppercase();

        let log_filter =
            env::var(format!("{upper}_LOG_FILTER")).unwrap_or_else(|_| "info".to_string());
        let metrics_address = env::var(format!("{upper}_METRICS_ADDRESS"))
            .ok()
            .filter(|value| !value.trim().is_empty());

        Self {
            log_filter,
            metrics_address,
        }
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    pub fn metrics_address(&self) -> Option<&str> {
        self.metrics_address.as_deref()
    }
}

/// Guard returned after telemetry initialization.
#[derive(Clone)]
pub struct TelemetryGuard {
    metrics: Arc<PrometheusHandle>,
}

impl TelemetryGuard {
    pub fn render_metrics(&self) -> String {
        self.metrics.render()
    }
}

/// Wires up tracing and the Prometheus recorder once per process.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    install_tracing(config)?;
    let metrics = install_metrics(config)?;
    describe_metrics();

    Ok(TelemetryGuard { metrics })
}

fn install_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    if SUBSCRIBER_INSTALLED.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_new(config.log_filter())
        .map_err(|err| TelemetryError::InvalidLogFilter(err.to_string()))?;

    if SUBSCRIBER_INSTALLED.set(()).is_ok() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .map_err(|err| TelemetryError::Tracing(err.to_string()))?;
    }

    Ok(())
}

fn install_metrics(config: &TelemetryConfig) -> Result<Arc<PrometheusHandle>, TelemetryError> {
    METRICS_HANDLE
        .get_or_try_init(|| {
            let mut builder = PrometheusBuilder::new();
            if let Some(addr) = config.metrics_address() {
                let socket: SocketAddr =
                    addr.parse().map_err(|err: std::net::AddrParseError| {
                        TelemetryError::InvalidMetricsAddress(addr.to_string(), err.to_string())
                    })?;
                builder = builder.with_http_listener(socket);
            }

            builder
                .install_recorder()
                .map(Arc::new)
                .map_err(|err| TelemetryError::Metrics(err.to_string()))
        })
        .cloned()
}

fn describe_metrics() {
    describe_counter!(METRIC_BLOCKS_SCANNED, "Blocks committed per chain");
    describe_gauge!(METRIC_CURSOR_HEIGHT, "Next height the scanner will process");
    describe_gauge!(METRIC_CHAIN_HEAD, "Latest head reported by the chain node");
    describe_counter!(METRIC_EVENTS_MATCHED, "Transfers matched against open intents");
    describe_counter!(METRIC_REORGS, "Chain reorganizations handled");
    describe_histogram!(METRIC_REORG_DEPTH, Unit::Count, "Depth of handled reorgs");
    describe_counter!(METRIC_RPC_ERRORS, "Failed chain node calls");
    describe_counter!(METRIC_TRANSITIONS, "Intent state transitions");
    describe_counter!(METRIC_SETTLEMENT_ATTEMPTS, "Settlement gateway calls by outcome");
    describe_counter!(METRIC_NOTIFICATIONS_DROPPED, "Notifications dropped on a full queue");
    describe_counter!(METRIC_API_REQUESTS, "HTTP requests by route and outcome");
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    InvalidLogFilter(String),
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),
    #[error("invalid metrics address `{0}`: {1}")]
    InvalidMetricsAddress(String, String),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}
