//! Experiment Store - in-memory tracking of experiments, runs, metrics and artifacts
//!
//! Runs are kept ordered by [`RunKey`] so every query (and every table built
//! from the store) is deterministic regardless of the order in which parallel
//! folds finished.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use super::{ArtifactRecord, ExperimentRecord, MetricRecord, RunKey, RunRecord, RunStatus, Setting};
use crate::metrics::Metric;
use crate::splitter::SplitMode;

/// In-memory store for experiment tracking data.
#[derive(Debug, Default)]
pub struct ExperimentStore {
    experiments: FxHashMap<String, ExperimentRecord>,
    runs: BTreeMap<RunKey, RunRecord>,
    metrics: Vec<MetricRecord>,
    artifacts: Vec<ArtifactRecord>,
}

impl ExperimentStore {
    /// Create a new empty experiment store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
            && self.runs.is_empty()
            && self.metrics.is_empty()
            && self.artifacts.is_empty()
    }

    /// Get the number of experiments in the store.
    #[must_use]
    pub fn experiment_count(&self) -> usize {
        self.experiments.len()
    }

    /// Get the number of runs in the store.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Get the number of metrics in the store.
    #[must_use]
    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }

    /// Add an experiment to the store.
    pub fn add_experiment(&mut self, experiment: ExperimentRecord) {
        self.experiments
            .insert(experiment.experiment_id().to_string(), experiment);
    }

    /// Get an experiment by ID.
    #[must_use]
    pub fn get_experiment(&self, experiment_id: &str) -> Option<&ExperimentRecord> {
        self.experiments.get(experiment_id)
    }

    /// Add a run to the store, replacing a run with the same key.
    pub fn add_run(&mut self, run: RunRecord) {
        self.runs.insert(run.key().clone(), run);
    }

    /// Get a run by key.
    #[must_use]
    pub fn get_run(&self, key: &RunKey) -> Option<&RunRecord> {
        self.runs.get(key)
    }

    /// All runs, ordered by key.
    pub fn runs(&self) -> impl Iterator<Item = &RunRecord> {
        self.runs.values()
    }

    /// Get all runs of an experiment.
    #[must_use]
    pub fn get_runs_for_experiment(&self, experiment_id: &str) -> Vec<&RunRecord> {
        self.runs
            .values()
            .filter(|run| run.experiment_id() == experiment_id)
            .collect()
    }

    /// Get all runs that ended with `status`.
    #[must_use]
    pub fn runs_with_status(&self, status: RunStatus) -> Vec<&RunRecord> {
        self.runs.values().filter(|run| run.status() == status).collect()
    }

    /// Add a metric to the store.
    pub fn add_metric(&mut self, metric: MetricRecord) {
        self.metrics.push(metric);
    }

    /// Get the metrics of one run, ordered by metric.
    #[must_use]
    pub fn get_metrics_for_run(&self, run_id: &str) -> Vec<MetricRecord> {
        let mut metrics: Vec<MetricRecord> = self
            .metrics
            .iter()
            .filter(|m| m.run_id() == run_id)
            .cloned()
            .collect();
        metrics.sort_by_key(MetricRecord::metric);
        metrics
    }

    /// One metric of one model across the folds of a split mode.
    ///
    /// Only trial 0 is considered; values are ordered by fold.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use drp_eval::experiment::{ExperimentStore, MetricRecord, RunKey, RunRecord, Setting};
    /// use drp_eval::metrics::Metric;
    /// use drp_eval::splitter::SplitMode;
    ///
    /// let mut store = ExperimentStore::new();
    /// for fold in (0..3).rev() {
    ///     let key = RunKey::predictions("NaivePredictor", SplitMode::Lpo, fold);
    ///     store.add_metric(MetricRecord::new(key.to_string(), Metric::Rmse, fold, fold as f64));
    ///     store.add_run(RunRecord::new(key, "my_run"));
    /// }
    ///
    /// let setting = Setting::Predictions;
    /// let series = store.metric_series("NaivePredictor", &setting, SplitMode::Lpo, Metric::Rmse);
    /// assert_eq!(series, vec![0.0, 1.0, 2.0]);
    /// ```
    #[must_use]
    pub fn metric_series(
        &self,
        algorithm: &str,
        setting: &Setting,
        split_mode: SplitMode,
        metric: Metric,
    ) -> Vec<f64> {
        let mut series: Vec<(usize, f64)> = self
            .runs
            .keys()
            .filter(|key| {
                key.algorithm == algorithm
                    && &key.setting == setting
                    && key.split_mode == split_mode
                    && key.cv_index == 0
            })
            .filter_map(|key| {
                let run_id = key.to_string();
                self.metrics
                    .iter()
                    .find(|m| m.run_id() == run_id && m.metric() == metric)
                    .map(|m| (key.split_index, m.value()))
            })
            .collect();
        series.sort_by_key(|(fold, _)| *fold);
        series.into_iter().map(|(_, value)| value).collect()
    }

    /// Add an artifact to the store.
    pub fn add_artifact(&mut self, artifact: ArtifactRecord) {
        self.artifacts.push(artifact);
    }

    /// All recorded artifacts in insertion order.
    #[must_use]
    pub fn artifacts(&self) -> &[ArtifactRecord] {
        &self.artifacts
    }
}
