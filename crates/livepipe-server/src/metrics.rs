//! Prometheus exporter for the counters recorded by the livepipe crates.

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and, when `listen` is set, serve the
/// scrape endpoint on that address.
///
/// Must run inside the tokio runtime. Returns `true` if the recorder was
/// installed by this call.
pub fn init_metrics(config: &MetricsConfig) -> bool {
    if !config.enabled {
        tracing::info!("Metrics disabled");
        return false;
    }
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    let handle = match config.listen.as_deref() {
        Some(listen) => match serve(listen) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, listen, "Failed to start Prometheus exporter");
                return false;
            }
        },
        None => match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install Prometheus recorder");
                return false;
            }
        },
    };

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
        return false;
    }
    tracing::info!("Prometheus metrics initialized");
    true
}

fn serve(listen: &str) -> anyhow::Result<PrometheusHandle> {
    let addr: SocketAddr = listen.parse()?;
    let (recorder, exporter) = PrometheusBuilder::new().with_http_listener(addr).build()?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| anyhow::anyhow!("metrics recorder already installed: {e}"))?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!(error = ?e, "Prometheus exporter stopped");
        }
    });
    tracing::info!(%addr, "Serving Prometheus metrics");
    Ok(handle)
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}
