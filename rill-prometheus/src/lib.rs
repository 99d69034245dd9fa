//! Prometheus-backed metric provider.
//!
//! Every metric update a processor makes is mirrored into an
//! [`prometheus::Registry`] as an integer gauge named
//! `{workflow_id}_{processor_id}_{metric_name}` (Prometheus has no dots in
//! metric names, so scope separators become underscores).

use std::collections::HashMap;
use std::sync::Mutex;

use prometheus::{Encoder, IntGauge, Opts, Registry, TextEncoder};

use rill_core::metric::{Metric, MetricProvider};

/// A [`MetricProvider`] publishing into a Prometheus registry.
pub struct PrometheusProvider {
    registry: Registry,
    gauges: Mutex<HashMap<String, IntGauge>>,
}

impl PrometheusProvider {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            gauges: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every exported metric in the Prometheus text format.
    pub fn encode_metrics(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %err, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for PrometheusProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Restrict a name to the Prometheus charset.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl MetricProvider for PrometheusProvider {
    fn record(&self, scope: &str, metric: &Metric) {
        let name = sanitize(&format!("{scope}.{}", metric.name));
        let mut gauges = self.gauges.lock().unwrap();
        let gauge = match gauges.get(&name) {
            Some(gauge) => gauge.clone(),
            None => {
                let help = if metric.description.is_empty() {
                    name.clone()
                } else {
                    metric.description.clone()
                };
                let gauge = match IntGauge::with_opts(Opts::new(name.clone(), help)) {
                    Ok(gauge) => gauge,
                    Err(err) => {
                        tracing::warn!(metric = %name, error = %err, "Failed to create gauge");
                        return;
                    }
                };
                if let Err(err) = self.registry.register(Box::new(gauge.clone())) {
                    tracing::warn!(metric = %name, error = %err, "Failed to register gauge");
                    return;
                }
                gauges.insert(name, gauge.clone());
                gauge
            }
        };
        gauge.set(metric.value);
    }
}
