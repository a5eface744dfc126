//! Metric Record - one evaluated metric of one run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::Metric;

/// Metric Record represents a single metric value of a run.
///
/// Metrics of a failed run are recorded as NaN so every planned run has a
/// complete row in the result tables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRecord {
    run_id: String,
    metric: Metric,
    split_index: usize,
    value: f64,
    timestamp: DateTime<Utc>,
}

impl MetricRecord {
    /// Create a new metric record.
    ///
    /// # Arguments
    ///
    /// * `run_id` - Rendered key of the parent run
    /// * `metric` - Evaluated metric
    /// * `split_index` - Outer fold the run belongs to
    /// * `value` - Metric value (NaN if not computed)
    #[must_use]
    pub fn new(run_id: impl Into<String>, metric: Metric, split_index: usize, value: f64) -> Self {
        Self {
            run_id: run_id.into(),
            metric,
            split_index,
            value,
            timestamp: Utc::now(),
        }
    }

    /// Create a builder for constructing a metric record with optional fields.
    #[must_use]
    pub fn builder(
        run_id: impl Into<String>,
        metric: Metric,
        split_index: usize,
        value: f64,
    ) -> MetricRecordBuilder {
        MetricRecordBuilder::new(run_id, metric, split_index, value)
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the metric.
    #[must_use]
    pub const fn metric(&self) -> Metric {
        self.metric
    }

    /// Get the outer fold index.
    #[must_use]
    pub const fn split_index(&self) -> usize {
        self.split_index
    }

    /// Get the metric value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Whether the metric could not be computed.
    #[must_use]
    pub fn is_nan(&self) -> bool {
        self.value.is_nan()
    }

    /// Get the timestamp when the metric was recorded.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Builder for `MetricRecord`.
#[derive(Debug)]
pub struct MetricRecordBuilder {
    run_id: String,
    metric: Metric,
    split_index: usize,
    value: f64,
    timestamp: DateTime<Utc>,
}

impl MetricRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(run_id: impl Into<String>, metric: Metric, split_index: usize, value: f64) -> Self {
        Self {
            run_id: run_id.into(),
            metric,
            split_index,
            value,
            timestamp: Utc::now(),
        }
    }

    /// Set a custom timestamp.
    #[must_use]
    pub const fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Build the `MetricRecord`.
    #[must_use]
    pub fn build(self) -> MetricRecord {
        MetricRecord {
            run_id: self.run_id,
            metric: self.metric,
            split_index: self.split_index,
            value: self.value,
            timestamp: self.timestamp,
        }
    }
}
