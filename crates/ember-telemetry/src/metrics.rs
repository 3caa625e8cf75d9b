// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory metrics storage.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ember_core::telemetry::{MetricId, MetricValue};
use ember_jobs::{JobClass, JobStats};
use serde::Serialize;

/// Namespace of every metric published by [`publish_job_stats`].
pub const JOBS_NAMESPACE: &str = "jobs";

/// One exported metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    /// Rendered id, e.g. `jobs:queue_depth[class=low]`.
    pub id: String,
    /// `"counter"` or `"gauge"`.
    pub kind: &'static str,
    /// Current value.
    pub value: f64,
}

/// Central, thread-safe store of the latest value of each metric.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    values: RwLock<BTreeMap<MetricId, MetricValue>>,
}

impl MetricsRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<MetricId, MetricValue>> {
        self.values.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<MetricId, MetricValue>> {
        self.values.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `by` to a counter, creating it at zero first.
    ///
    /// A gauge registered under the same id is replaced by the counter.
    pub fn increment_counter(&self, id: &MetricId, by: u64) {
        let mut values = self.write();
        let current = values
            .get(id)
            .and_then(MetricValue::as_counter)
            .unwrap_or_default();
        values.insert(id.clone(), MetricValue::Counter(current.saturating_add(by)));
    }

    /// Overwrites a counter with a cumulative value read elsewhere.
    pub fn set_counter(&self, id: &MetricId, value: u64) {
        self.write().insert(id.clone(), MetricValue::Counter(value));
    }

    /// Sets a gauge.
    pub fn set_gauge(&self, id: &MetricId, value: f64) {
        self.write().insert(id.clone(), MetricValue::Gauge(value));
    }

    /// The current value of `id`, if it was ever recorded.
    pub fn get(&self, id: &MetricId) -> Option<MetricValue> {
        self.read().get(id).copied()
    }

    /// Every metric of `namespace`, sorted by id.
    pub fn namespace(&self, namespace: &str) -> Vec<(MetricId, MetricValue)> {
        self.read()
            .iter()
            .filter(|(id, _)| id.namespace == namespace)
            .map(|(id, value)| (id.clone(), *value))
            .collect()
    }

    /// Every metric, sorted by id.
    pub fn snapshot(&self) -> Vec<MetricSample> {
        self.read()
            .iter()
            .map(|(id, value)| MetricSample {
                id: id.to_string(),
                kind: match value {
                    MetricValue::Counter(_) => "counter",
                    MetricValue::Gauge(_) => "gauge",
                },
                value: value.as_f64(),
            })
            .collect()
    }

    /// The snapshot as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    /// Number of metrics recorded.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` when nothing was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Forgets every metric.
    pub fn clear(&self) {
        self.write().clear();
    }
}

/// Copies a [`JobStats`] snapshot into `registry` under [`JOBS_NAMESPACE`].
///
/// Cumulative counts become counters; queue depths, deferred jobs, jobs in
/// flight and the worker count become gauges. Queue depths carry a `class`
/// label.
pub fn publish_job_stats(registry: &MetricsRegistry, stats: &JobStats) {
    let counter = |name: &str, value: u64| {
        registry.set_counter(&MetricId::new(JOBS_NAMESPACE, name), value);
    };
    counter("submitted", stats.submitted);
    counter("executed", stats.executed);
    counter("completed", stats.completed);
    counter("panicked", stats.panicked);

    for class in JobClass::ALL {
        let depth = match class {
            JobClass::HighPriority => stats.queued_high,
            JobClass::LowPriority => stats.queued_low,
            JobClass::MainThread => stats.queued_main,
        };
        let id = MetricId::new(JOBS_NAMESPACE, "queue_depth").with_label("class", class.label());
        registry.set_gauge(&id, depth as f64);
    }

    let gauge = |name: &str, value: f64| {
        registry.set_gauge(&MetricId::new(JOBS_NAMESPACE, name), value);
    };
    gauge("deferred", stats.deferred as f64);
    gauge("in_flight", stats.in_flight() as f64);
    gauge("workers", stats.workers as f64);
}
