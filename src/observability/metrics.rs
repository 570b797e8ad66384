//! Prometheus metrics.

use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Buckets for `riskwatch_fraud_probability`.
const PROBABILITY_BUCKETS: &[f64] = &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 0.95, 0.99];

/// Renders the text exposition served at `/metrics`.
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    prometheus: PrometheusHandle,
}

impl MetricsHandle {
    /// Builds a recorder that is not installed globally. Renders only what is
    /// recorded through it, which outside tests is nothing.
    #[must_use]
    pub fn standalone() -> Self {
        let recorder = builder().build_recorder();
        Self {
            prometheus: recorder.handle(),
        }
    }

    /// Current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus.render()
    }
}

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("riskwatch_fraud_probability".to_string()),
            PROBABILITY_BUCKETS,
        )
        .unwrap_or_else(|_| PrometheusBuilder::new())
}

/// Installs the global Prometheus recorder.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if a recorder is already installed.
pub fn install_prometheus(enabled: bool) -> Result<Option<MetricsHandle>> {
    if !enabled {
        return Ok(None);
    }

    let prometheus = builder()
        .install_recorder()
        .map_err(|e| Error::operation("metrics_recorder_install", e))?;
    describe();
    Ok(Some(MetricsHandle { prometheus }))
}

fn describe() {
    metrics::describe_counter!("riskwatch_predictions_total", "Predictions served");
    metrics::describe_counter!("riskwatch_fraud_flags_total", "Predictions labeled fraud");
    metrics::describe_histogram!("riskwatch_fraud_probability", "Predicted fraud probability");
    metrics::describe_counter!("riskwatch_retrain_total", "Retrain cycles by outcome");
    metrics::describe_counter!("riskwatch_rollbacks_total", "Operator rollbacks");
    metrics::describe_gauge!("riskwatch_active_model_version", "Version currently serving");
    metrics::describe_gauge!("riskwatch_fairness_gap", "Latest outcome gap per attribute");
    metrics::describe_counter!(
        "riskwatch_alert_deliveries_total",
        "Alert delivery attempts by channel and status"
    );
    metrics::describe_gauge!("riskwatch_incident_subscribers", "Live incident subscribers");
    metrics::describe_counter!("riskwatch_incident_broadcasts_total", "Incident broadcasts");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_installs_nothing() {
        assert!(install_prometheus(false).expect("disabled").is_none());
    }

    #[test]
    fn test_standalone_renders() {
        let handle = MetricsHandle::standalone();
        assert!(handle.render().is_empty() || handle.render().starts_with('#'));
    }
}
