//! Run Record - one tracked (model, setting, split mode, fold, trial) run

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Hyperparameters;
use crate::splitter::SplitMode;

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run is planned but not yet started.
    Pending,
    /// Run is currently executing.
    Running,
    /// Run produced predictions.
    Success,
    /// Predictions were loaded from a previous run's output.
    Resumed,
    /// Training or prediction failed; metrics are NaN.
    Failed,
}

impl RunStatus {
    /// Whether the run has predictions to evaluate.
    #[must_use]
    pub const fn has_predictions(self) -> bool {
        matches!(self, Self::Success | Self::Resumed)
    }
}

/// What a run predicts with and on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Setting {
    /// Final model on the fold's test set
    Predictions,
    /// Final model on another dataset
    CrossStudy(String),
    /// Retrained on randomized features (test name, e.g. `SVRC_gene_expression`)
    Randomization(String),
    /// Retrained with another seed
    Robustness,
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Predictions => f.write_str("predictions"),
            Self::CrossStudy(dataset) => write!(f, "cross-study-{dataset}"),
            Self::Randomization(test) => write!(f, "randomize-{test}"),
            Self::Robustness => f.write_str("robustness"),
        }
    }
}

/// Composite run identifier.
///
/// Rendered as `{algorithm}_{setting}_{split_mode}_{split_index}_{cv_index}`,
/// where `split_index` is the outer fold and `cv_index` the robustness trial
/// (0 for runs that are not repeated).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunKey {
    /// Model name
    pub algorithm: String,
    /// Run setting
    pub setting: Setting,
    /// Split mode
    pub split_mode: SplitMode,
    /// Outer fold index
    pub split_index: usize,
    /// Trial index
    pub cv_index: usize,
}

impl RunKey {
    /// Key of a fold's test predictions.
    #[must_use]
    pub fn predictions(
        algorithm: impl Into<String>,
        split_mode: SplitMode,
        split_index: usize,
    ) -> Self {
        Self {
            algorithm: algorithm.into(),
            setting: Setting::Predictions,
            split_mode,
            split_index,
            cv_index: 0,
        }
    }

    /// Same fold, other setting.
    #[must_use]
    pub fn with_setting(&self, setting: Setting, cv_index: usize) -> Self {
        Self {
            algorithm: self.algorithm.clone(),
            setting,
            split_mode: self.split_mode,
            split_index: self.split_index,
            cv_index,
        }
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}_{}",
            self.algorithm, self.setting, self.split_mode, self.split_index, self.cv_index
        )
    }
}

/// Run Record tracks the lifecycle of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    key: RunKey,
    experiment_id: String,
    status: RunStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    hyperparameters: Option<Hyperparameters>,
    error: Option<String>,
}

impl RunRecord {
    /// Create a new run record in Pending status.
    #[must_use]
    pub fn new(key: RunKey, experiment_id: impl Into<String>) -> Self {
        Self {
            key,
            experiment_id: experiment_id.into(),
            status: RunStatus::Pending,
            started_at: None,
            ended_at: None,
            hyperparameters: None,
            error: None,
        }
    }

    /// Create a builder for constructing a run record with optional fields.
    #[must_use]
    pub fn builder(key: RunKey, experiment_id: impl Into<String>) -> RunRecordBuilder {
        RunRecordBuilder::new(key, experiment_id)
    }

    /// Get the run key.
    #[must_use]
    pub const fn key(&self) -> &RunKey {
        &self.key
    }

    /// Get the rendered run key.
    #[must_use]
    pub fn run_id(&self) -> String {
        self.key.to_string()
    }

    /// Get the parent experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the current run status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Get the start timestamp, if the run has started.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Get the end timestamp, if the run has completed.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Get the hyperparameters the run was trained with.
    #[must_use]
    pub const fn hyperparameters(&self) -> Option<&Hyperparameters> {
        self.hyperparameters.as_ref()
    }

    /// Get the failure message of a failed run.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Record the hyperparameters chosen for this run.
    pub fn set_hyperparameters(&mut self, hyperparameters: Hyperparameters) {
        self.hyperparameters = Some(hyperparameters);
    }

    /// Start the run, transitioning from Pending to Running.
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Complete the run with the given final status.
    pub fn complete(&mut self, status: RunStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }

    /// Complete the run as failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.complete(RunStatus::Failed);
    }
}

/// Builder for `RunRecord`.
#[derive(Debug)]
pub struct RunRecordBuilder {
    key: RunKey,
    experiment_id: String,
    hyperparameters: Option<Hyperparameters>,
}

impl RunRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(key: RunKey, experiment_id: impl Into<String>) -> Self {
        Self {
            key,
            experiment_id: experiment_id.into(),
            hyperparameters: None,
        }
    }

    /// Set the hyperparameters.
    #[must_use]
    pub fn hyperparameters(mut self, hyperparameters: Hyperparameters) -> Self {
        self.hyperparameters = Some(hyperparameters);
        self
    }

    /// Build the `RunRecord`.
    #[must_use]
    pub fn build(self) -> RunRecord {
        RunRecord {
            key: self.key,
            experiment_id: self.experiment_id,
            status: RunStatus::Pending,
            started_at: None,
            ended_at: None,
            hyperparameters: self.hyperparameters,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> RunKey {
        RunKey::predictions("NaivePredictor", SplitMode::Lco, 3)
    }

    #[test]
    fn test_run_key_format() {
        assert_eq!(key().to_string(), "NaivePredictor_predictions_LCO_3_0");
        let setting = Setting::Randomization("SVRC_gene_expression".into());
        let randomized = key().with_setting(setting, 0);
        assert_eq!(
            randomized.to_string(),
            "NaivePredictor_randomize-SVRC_gene_expression_LCO_3_0"
        );
        assert_eq!(
            key().with_setting(Setting::Robustness, 2).to_string(),
            "NaivePredictor_robustness_LCO_3_2"
        );
    }

    #[test]
    fn test_run_status_default() {
        let run = RunRecord::new(key(), "exp-1");
        assert_eq!(run.status(), RunStatus::Pending);
        assert!(run.started_at().is_none());
    }

    #[test]
    fn test_run_lifecycle() {
        let mut run = RunRecord::new(key(), "exp-1");
        run.start();
        assert_eq!(run.status(), RunStatus::Running);
        run.complete(RunStatus::Success);
        assert_eq!(run.status(), RunStatus::Success);
        assert!(run.ended_at().is_some());
    }

    #[test]
    fn test_run_failure_keeps_message() {
        let mut run = RunRecord::builder(key(), "exp-1")
            .hyperparameters(Hyperparameters::new())
            .build();
        run.start();
        run.fail("boom");
        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.error(), Some("boom"));
        assert!(!run.status().has_predictions());
    }
}
