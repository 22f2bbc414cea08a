//! Prometheus metrics for the container.
//!
//! Every level records through the `metrics` facade; nothing is collected
//! unless the host installs a recorder. [`MetricsExporter`] installs the
//! Prometheus one and renders the scrape text, leaving the HTTP side to the
//! host.
//!
//! # Example
//!
//! ```rust,no_run
//! use bindlet_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! if let Some(text) = exporter.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use bindlet_core::{ComponentEvent, ComponentListener};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Events dispatched into a domain
pub const DISPATCH_TOTAL: &str = "bindlet.dispatch.total";
/// Events no context accepted
pub const DISPATCH_UNHANDLED: &str = "bindlet.dispatch.unhandled";
/// Handler instances built
pub const HANDLER_CREATED: &str = "bindlet.handler.created";
/// Handler construction or `process` failures
pub const HANDLER_FAILED: &str = "bindlet.handler.failed";
/// Accepted lifecycle transitions
pub const LIFECYCLE_TRANSITIONS: &str = "bindlet.lifecycle.transitions";
pub use bindlet_rpc::{RPC_CALLS, RPC_DURATION, RPC_FAILURES};

/// Errors from installing the exporter.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder owned by the host process
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// An exporter that has not been installed yet
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe every metric and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or another
    /// recorder rejects the installation. An already installed recorder is
    /// tolerated with a warning; [`render`](Self::render) then stays `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Whether this exporter owns the installed recorder
    #[must_use]
    pub const fn is_installed(&self) -> bool {
        self.handle.is_some()
    }

    /// Current metrics in Prometheus text format
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(DISPATCH_TOTAL, "Total number of events dispatched into a domain");
    describe_counter!(DISPATCH_UNHANDLED, "Total number of events no context accepted");
    describe_counter!(HANDLER_CREATED, "Total number of handler instances built");
    describe_counter!(HANDLER_FAILED, "Total number of handler construction or process failures");
    describe_counter!(LIFECYCLE_TRANSITIONS, "Total number of accepted lifecycle transitions");
    describe_counter!(RPC_CALLS, "Total number of RPC calls");
    describe_counter!(RPC_FAILURES, "Total number of failed RPC calls");
    describe_histogram!(RPC_DURATION, "Time taken to run an RPC call");
}

/// Listener counting accepted transitions per component and target state
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionCounter;

impl ComponentListener for TransitionCounter {
    fn on_event(&self, event: &ComponentEvent) {
        if let ComponentEvent::StateChanged { component, to, .. } = event {
            metrics::counter!(
                LIFECYCLE_TRANSITIONS,
                "component" => component.clone(),
                "to" => to.as_str()
            )
            .increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindlet_core::LifecycleState;

    #[test]
    fn test_exporter_starts_uninstalled() {
        let exporter = MetricsExporter::new();
        assert!(!exporter.is_installed());
        assert!(exporter.render().is_none());
    }

    #[test]
    fn test_metric_names_are_unique_and_namespaced() {
        let names = [
            DISPATCH_TOTAL,
            DISPATCH_UNHANDLED,
            HANDLER_CREATED,
            HANDLER_FAILED,
            LIFECYCLE_TRANSITIONS,
            RPC_CALLS,
            RPC_FAILURES,
            RPC_DURATION,
        ];
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        assert!(names.iter().all(|name| name.starts_with("bindlet.")));
        assert_eq!(RPC_CALLS, bindlet_rpc::runner::RPC_CALLS);
    }

    #[test]
    fn test_counter_ignores_owner_events() {
        // No recorder installed: recording is a no-op and must not panic
        TransitionCounter.on_event(&ComponentEvent::OwnerChanged {
            component: "ctx".to_string(),
            previous: None,
            current: Some("svc".to_string()),
        });
        TransitionCounter.on_event(&ComponentEvent::StateChanged {
            component: "ctx".to_string(),
            from: LifecycleState::New,
            to: LifecycleState::Started,
        });
    }
}
