//! Prometheus metrics.
//!
//! Counters recorded across the relay:
//!
//! | Name | Labels |
//! |------|--------|
//! | `webhook_deliveries_total` | `event`, `outcome` |
//! | `webhook_dispatch_failures_total` | `reason` |
//! | `notifications_sent_total` | `kind` |
//! | `connections_constructed_total` | |
//! | `connection_failures_total` | `operation` |
//! | `malformed_payloads_total` | `event` |
//! | `setups_created_total` | |
//! | `secret_decrypt_failures_total` | `field` |
//! | `sqlite_mutex_poison_recovery_total` | |

use crate::config::MetricsConfig;
use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Handle to the installed Prometheus recorder.
#[derive(Clone)]
pub struct MetricsHandle {
    prometheus: PrometheusHandle,
    listen_addr: SocketAddr,
}

impl std::fmt::Debug for MetricsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsHandle")
            .field("listen_addr", &self.listen_addr)
            .finish_non_exhaustive()
    }
}

impl MetricsHandle {
    /// Renders the current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus.render()
    }

    /// Returns the exporter listen address.
    #[must_use]
    pub const fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }
}

/// Installs the Prometheus recorder and HTTP listener when enabled.
///
/// Must be called from within a tokio runtime; the exporter runs as a task
/// on it.
///
/// # Errors
///
/// Returns [`Error::Config`] if the exporter cannot be built or a global
/// recorder is already installed.
pub fn install_prometheus(config: &MetricsConfig) -> Result<Option<MetricsHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let listen_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port);
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| Error::Config(format!("metrics exporter needs a tokio runtime: {e}")))?;

    let (recorder, exporter) = {
        let _guard = runtime.enter();
        PrometheusBuilder::new()
            .with_http_listener(listen_addr)
            .build()
            .map_err(|e| Error::Config(format!("metrics exporter build failed: {e}")))?
    };
    let prometheus = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| Error::Config(format!("metrics recorder install failed: {e}")))?;
    runtime.spawn(exporter);

    tracing::info!(addr = %listen_addr, "Prometheus exporter listening");

    Ok(Some(MetricsHandle {
        prometheus,
        listen_addr,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_installs_nothing() {
        let config = MetricsConfig {
            enabled: false,
            port: 9090,
        };
        assert!(install_prometheus(&config).unwrap().is_none());
    }

    #[test]
    fn test_enabled_requires_runtime() {
        let config = MetricsConfig {
            enabled: true,
            port: 0,
        };
        assert!(matches!(install_prometheus(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_metrics_registry_smoke() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("notifications_sent_total", "kind" => "event").increment(1);
        });
        assert!(handle.render().contains("notifications_sent_total"));
    }
}
