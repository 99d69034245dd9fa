//! Per-processor metrics with a pluggable export provider.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

/// Payloads received by a processor.
pub const METRIC_PAYLOADS_IN: &str = "payloads_in";
/// Payloads published on a processor's egress.
pub const METRIC_PAYLOADS_OUT: &str = "payloads_out";
/// Per-payload failures reported by a processor.
pub const METRIC_FAILURES: &str = "failures";
/// Failure envelopes dropped because nobody could receive them.
pub const METRIC_FAILURES_DROPPED: &str = "failures_dropped";

/// A single named counter or gauge with its last update time.
#[derive(Debug, Clone, Serialize)]
pub struct Metric {
    pub name: String,
    pub description: String,
    pub value: i64,
    pub updated_at: DateTime<Utc>,
}

/// Receives every metric update for external export.
///
/// `scope` is composed by the workflow as `{workflow-id}.{processor-id}`,
/// so exported names read `{workflow-id}.{processor-id}.{metric-name}`.
pub trait MetricProvider: Send + Sync {
    fn record(&self, scope: &str, metric: &Metric);
}

/// Default provider: keeps the latest value of every scoped metric in memory.
#[derive(Default)]
pub struct InMemoryProvider {
    entries: Mutex<HashMap<String, Metric>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, scoped_name: &str) -> Option<Metric> {
        self.entries.lock().unwrap().get(scoped_name).cloned()
    }

    pub fn all(&self) -> Vec<(String, Metric)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl MetricProvider for InMemoryProvider {
    fn record(&self, scope: &str, metric: &Metric) {
        let key = format!("{scope}.{}", metric.name);
        self.entries.lock().unwrap().insert(key, metric.clone());
    }
}

struct Inner {
    scope: String,
    entries: IndexMap<String, Metric>,
    provider: Arc<dyn MetricProvider>,
}

/// The metric set owned by one processor.
///
/// Internally synchronized: the worker task updates it through a shared
/// reference while the outside reads snapshots.
pub struct Metrics {
    inner: Mutex<Inner>,
}

impl Metrics {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                scope: scope.into(),
                entries: IndexMap::new(),
                provider: Arc::new(InMemoryProvider::new()),
            }),
        }
    }

    /// Install an export provider and the scope prefix used for it.
    pub fn set_provider(&self, provider: Arc<dyn MetricProvider>, scope: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.provider = provider;
        inner.scope = scope.into();
    }

    pub fn set_scope(&self, scope: impl Into<String>) {
        self.inner.lock().unwrap().scope = scope.into();
    }

    /// Create-or-increment a metric and forward the update to the provider.
    pub fn add(&self, name: &str, description: &str, delta: i64) {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let metric = inner
            .entries
            .entry(name.to_string())
            .or_insert_with(|| Metric {
                name: name.to_string(),
                description: description.to_string(),
                value: 0,
                updated_at: now,
            });
        metric.value += delta;
        metric.updated_at = now;
        let metric = metric.clone();
        let (scope, provider) = (inner.scope.clone(), Arc::clone(&inner.provider));
        drop(inner);
        provider.record(&scope, &metric);
    }

    /// Create-or-set a gauge value.
    pub fn set(&self, name: &str, value: i64) {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let metric = inner
            .entries
            .entry(name.to_string())
            .or_insert_with(|| Metric {
                name: name.to_string(),
                description: String::new(),
                value: 0,
                updated_at: now,
            });
        metric.value = value;
        metric.updated_at = now;
        let metric = metric.clone();
        let (scope, provider) = (inner.scope.clone(), Arc::clone(&inner.provider));
        drop(inner);
        provider.record(&scope, &metric);
    }

    pub fn get(&self, name: &str) -> Option<Metric> {
        self.inner.lock().unwrap().entries.get(name).cloned()
    }

    pub fn all(&self) -> Vec<Metric> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .values()
            .cloned()
            .collect()
    }

    /// Wire-form snapshot of every metric in this set.
    pub fn snapshot(&self, processor: &str) -> MetricSnapshot {
        MetricSnapshot {
            processor: processor.to_string(),
            metrics: self.all(),
        }
    }
}

/// `{processor, metrics: [...]}` as exposed to external consumers.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSnapshot {
    pub processor: String,
    pub metrics: Vec<Metric>,
}
