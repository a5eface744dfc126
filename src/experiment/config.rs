//! Run configuration
//!
//! [`RunConfig`] is plain serde data so it can be loaded from JSON, stored in
//! the [`ExperimentRecord`](super::ExperimentRecord) and persisted next to the
//! results. Missing JSON fields take their defaults. Model names stay strings
//! until [`RunConfig::validate`] so an unknown name is reported as a
//! configuration error naming the available models.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::metrics::Metric;
use crate::model::ModelKind;
use crate::randomization::{RandomizationMode, RandomizationType};
use crate::splitter::SplitMode;
use crate::transform::ResponseTransformation;
use crate::{Error, Result};

/// Baselines every experiment is compared against.
pub const MANDATORY_BASELINES: [ModelKind; 2] =
    [ModelKind::NaivePredictor, ModelKind::NaiveMeanEffectsPredictor];

/// Everything that defines one benchmarking run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Run identifier, names the output directory
    pub run_id: String,
    /// Dataset to benchmark on
    pub dataset_name: String,
    /// Directory holding `{dataset_name}/response.csv` and feature views
    pub data_path: PathBuf,
    /// Models to benchmark
    pub models: Vec<String>,
    /// Baselines (naive models are always added)
    pub baselines: Vec<String>,
    /// Split modes to evaluate
    pub test_modes: Vec<SplitMode>,
    /// Randomization ablations
    pub randomization_modes: Vec<RandomizationMode>,
    /// How randomized views are generated
    pub randomization_type: RandomizationType,
    /// Number of outer folds
    pub n_cv_splits: usize,
    /// Response scaling around training
    pub response_transformation: ResponseTransformation,
    /// Metric used for hyperparameter tuning
    pub optim_metric: Metric,
    /// Number of robustness retrainings per fold
    pub n_trials_robustness: usize,
    /// Datasets to predict with every final model
    pub cross_study_datasets: Vec<String>,
    /// Output directory; nothing is written when unset
    pub path_out: Option<PathBuf>,
    /// Recompute runs whose prediction table already exists
    pub overwrite: bool,
    /// Run folds in parallel
    pub multiprocessing: bool,
    /// Base seed for splitting, training and randomization
    pub seed: u64,
    /// Share of the training set held out for validation
    pub validation_ratio: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_id: "my_run".to_string(),
            dataset_name: "GDSC1".to_string(),
            data_path: PathBuf::from("data"),
            models: Vec::new(),
            baselines: Vec::new(),
            test_modes: vec![SplitMode::Lpo],
            randomization_modes: Vec::new(),
            randomization_type: RandomizationType::Permutation,
            n_cv_splits: 5,
            response_transformation: ResponseTransformation::None,
            optim_metric: Metric::Rmse,
            n_trials_robustness: 0,
            cross_study_datasets: Vec::new(),
            path_out: None,
            overwrite: false,
            multiprocessing: false,
            seed: 42,
            validation_ratio: 0.1,
        }
    }
}

impl RunConfig {
    /// Create a configuration with defaults for everything but the essentials.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        dataset_name: impl Into<String>,
        data_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            dataset_name: dataset_name.into(),
            data_path: data_path.into(),
            ..Self::default()
        }
    }

    /// Load and validate a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, is not valid JSON for this
    /// schema, or fails [`RunConfig::validate`].
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the models to benchmark.
    #[must_use]
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    /// Set additional baselines.
    #[must_use]
    pub fn with_baselines<I, S>(mut self, baselines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.baselines = baselines.into_iter().map(Into::into).collect();
        self
    }

    /// Set the split modes.
    #[must_use]
    pub fn with_test_modes(mut self, modes: impl Into<Vec<SplitMode>>) -> Self {
        self.test_modes = modes.into();
        self
    }

    /// Set the randomization modes and how views are randomized.
    #[must_use]
    pub fn with_randomization(
        mut self,
        modes: impl Into<Vec<RandomizationMode>>,
        randomization_type: RandomizationType,
    ) -> Self {
        self.randomization_modes = modes.into();
        self.randomization_type = randomization_type;
        self
    }

    /// Set the number of outer folds.
    #[must_use]
    pub const fn with_n_cv_splits(mut self, n_cv_splits: usize) -> Self {
        self.n_cv_splits = n_cv_splits;
        self
    }

    /// Set the response transformation.
    #[must_use]
    pub const fn with_response_transformation(
        mut self,
        transformation: ResponseTransformation,
    ) -> Self {
        self.response_transformation = transformation;
        self
    }

    /// Set the tuning metric.
    #[must_use]
    pub const fn with_optim_metric(mut self, metric: Metric) -> Self {
        self.optim_metric = metric;
        self
    }

    /// Set the number of robustness trials.
    #[must_use]
    pub const fn with_robustness_trials(mut self, n_trials: usize) -> Self {
        self.n_trials_robustness = n_trials;
        self
    }

    /// Set the cross-study datasets.
    #[must_use]
    pub fn with_cross_study_datasets<I, S>(mut self, datasets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cross_study_datasets = datasets.into_iter().map(Into::into).collect();
        self
    }

    /// Persist results under `path_out`.
    #[must_use]
    pub fn with_path_out(mut self, path_out: impl Into<PathBuf>, overwrite: bool) -> Self {
        self.path_out = Some(path_out.into());
        self.overwrite = overwrite;
        self
    }

    /// Run folds in parallel.
    #[must_use]
    pub const fn with_multiprocessing(mut self, multiprocessing: bool) -> Self {
        self.multiprocessing = multiprocessing;
        self
    }

    /// Set the base seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the validation share.
    #[must_use]
    pub const fn with_validation_ratio(mut self, ratio: f64) -> Self {
        self.validation_ratio = ratio;
        self
    }

    /// Check the configuration before any work starts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if [`RunConfig::validate_settings`]
    /// fails, no model is listed or a model/baseline name is unknown.
    pub fn validate(&self) -> Result<()> {
        self.validate_settings()?;
        if self.models.is_empty() {
            return Err(Error::Configuration("at least one model is required".to_string()));
        }
        self.model_kinds()?;
        self.baseline_kinds()?;
        Ok(())
    }

    /// Check everything but the model lists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an empty run id or dataset name,
    /// no split modes, `n_cv_splits <= 1`, a validation ratio outside
    /// `(0, 1)` or the benchmark dataset listed as a cross-study dataset.
    pub fn validate_settings(&self) -> Result<()> {
        if self.run_id.trim().is_empty() {
            return Err(Error::Configuration("run_id must not be empty".to_string()));
        }
        if self.dataset_name.trim().is_empty() {
            return Err(Error::Configuration("dataset_name must not be empty".to_string()));
        }
        if self.test_modes.is_empty() {
            return Err(Error::Configuration("at least one test mode is required".to_string()));
        }
        if self.n_cv_splits <= 1 {
            return Err(Error::Configuration(format!(
                "n_cv_splits must be larger than 1, got {}",
                self.n_cv_splits
            )));
        }
        if !(self.validation_ratio > 0.0 && self.validation_ratio < 1.0) {
            return Err(Error::Configuration(format!(
                "validation_ratio must be in (0, 1), got {}",
                self.validation_ratio
            )));
        }
        if self.cross_study_datasets.contains(&self.dataset_name) {
            return Err(Error::Configuration(format!(
                "{} is both the benchmark and a cross-study dataset",
                self.dataset_name
            )));
        }
        Ok(())
    }

    /// The configured models.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an unknown model name.
    pub fn model_kinds(&self) -> Result<Vec<ModelKind>> {
        parse_unique(&self.models)
    }

    /// The configured baselines plus [`MANDATORY_BASELINES`], without
    /// duplicates and without models already listed in `models`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an unknown baseline name.
    pub fn baseline_kinds(&self) -> Result<Vec<ModelKind>> {
        let models = self.model_kinds()?;
        let mut baselines = parse_unique(&self.baselines)?;
        for kind in MANDATORY_BASELINES {
            if !baselines.contains(&kind) {
                baselines.push(kind);
            }
        }
        baselines.retain(|kind| !models.contains(kind));
        Ok(baselines)
    }
}

fn parse_unique(names: &[String]) -> Result<Vec<ModelKind>> {
    let mut kinds: Vec<ModelKind> = Vec::with_capacity(names.len());
    for name in names {
        let kind: ModelKind = name.parse()?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> RunConfig {
        RunConfig::new("test_run", "Toy", "data").with_models(["LinearRegression"])
    }

    #[test]
    fn test_valid_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_n_cv_splits_must_exceed_one() {
        let err = valid().with_n_cv_splits(1).validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_unknown_model_rejected() {
        let err = valid().with_models(["NoSuchModel"]).validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_mandatory_baselines_added_once() {
        let config = valid().with_baselines(["NaiveDrugMeanPredictor", "NaivePredictor"]);
        assert_eq!(
            config.baseline_kinds().unwrap(),
            vec![
                ModelKind::NaiveDrugMeanPredictor,
                ModelKind::NaivePredictor,
                ModelKind::NaiveMeanEffectsPredictor,
            ]
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RunConfig = serde_json::from_str(
            r#"{"run_id": "r", "models": ["NaivePredictor"], "test_modes": ["LCO", "LDO"]}"#,
        )
        .unwrap();
        assert_eq!(config.test_modes, vec![SplitMode::Lco, SplitMode::Ldo]);
        assert_eq!(config.n_cv_splits, 5);
        assert_eq!(config.optim_metric, Metric::Rmse);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_mode_in_json_is_rejected() {
        let parsed: std::result::Result<RunConfig, _> =
            serde_json::from_str(r#"{"test_modes": ["LOO"]}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config =
            valid().with_randomization([RandomizationMode::Svrc], RandomizationType::Invariant);
        fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        assert_eq!(RunConfig::from_json_file(&path).unwrap(), config);
    }
}
