//! Experiment Record - one benchmarking run over a dataset

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Experiment Record is the root of the tracking schema.
///
/// One record per `run_id`; every fold run references it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentRecord {
    experiment_id: String,
    dataset_name: String,
    algorithms: Vec<String>,
    created_at: DateTime<Utc>,
    config: Option<serde_json::Value>,
}

impl ExperimentRecord {
    /// Create a new experiment record for a dataset.
    #[must_use]
    pub fn new(experiment_id: impl Into<String>, dataset_name: impl Into<String>) -> Self {
        Self::builder(experiment_id, dataset_name).build()
    }

    /// Create a builder for constructing an experiment record with optional fields.
    #[must_use]
    pub fn builder(
        experiment_id: impl Into<String>,
        dataset_name: impl Into<String>,
    ) -> ExperimentRecordBuilder {
        ExperimentRecordBuilder::new(experiment_id, dataset_name)
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the benchmarked dataset.
    #[must_use]
    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    /// Get the names of all models and baselines in the experiment.
    #[must_use]
    pub fn algorithms(&self) -> &[String] {
        &self.algorithms
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the serialized run configuration, if any.
    #[must_use]
    pub const fn config(&self) -> Option<&serde_json::Value> {
        self.config.as_ref()
    }
}

/// Builder for `ExperimentRecord`.
#[derive(Debug)]
pub struct ExperimentRecordBuilder {
    experiment_id: String,
    dataset_name: String,
    algorithms: Vec<String>,
    created_at: DateTime<Utc>,
    config: Option<serde_json::Value>,
}

impl ExperimentRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(experiment_id: impl Into<String>, dataset_name: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            dataset_name: dataset_name.into(),
            algorithms: Vec::new(),
            created_at: Utc::now(),
            config: None,
        }
    }

    /// Set the benchmarked algorithms.
    #[must_use]
    pub fn algorithms<I, S>(mut self, algorithms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.algorithms = algorithms.into_iter().map(Into::into).collect();
        self
    }

    /// Set the run configuration.
    #[must_use]
    pub fn config(mut self, config: serde_json::Value) -> Self {
        self.config = Some(config);
        self
    }

    /// Set a custom creation timestamp.
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Build the `ExperimentRecord`.
    #[must_use]
    pub fn build(self) -> ExperimentRecord {
        ExperimentRecord {
            experiment_id: self.experiment_id,
            dataset_name: self.dataset_name,
            algorithms: self.algorithms,
            created_at: self.created_at,
            config: self.config,
        }
    }
}
