//! Model adapter contract and the built-in model registry
//!
//! Every prediction model plugs into the experiment driver through
//! [`DrugResponseModel`]. The driver never names a concrete model: it asks a
//! [`ModelFactory`] for fresh instances (one per fold, per hyperparameter
//! combination and, for single-drug models, per drug).
//!
//! ## Degenerate data
//!
//! All adapters follow the same policy:
//! - `train` on an empty dataset leaves the model in a no-data state and
//!   `predict` returns NaN for every requested pair.
//! - `train` on fewer records than the model's minimum batch size keeps
//!   randomly initialized parameters; `predict` still answers
//!   deterministically.
//!
//! ## Example
//!
//! ```rust
//! use drp_eval::dataset::{FeatureDataset, ResponseDataset};
//! use drp_eval::model::{ModelFactory, ModelKind};
//!
//! let mut model = ModelKind::NaivePredictor.instantiate();
//! let hyperparameters = model.hyperparameter_set().remove(0);
//! model.build_model(&hyperparameters, 42).unwrap();
//!
//! let features = FeatureDataset::new();
//! model.train(&ResponseDataset::empty("toy"), &features, None, None).unwrap();
//!
//! let ids: Vec<String> = (0..5).map(|i| format!("CL{i}")).collect();
//! let drugs = vec!["D0".to_string(); 5];
//! let predictions = model.predict(&ids, &drugs, &features, None).unwrap();
//! assert_eq!(predictions.len(), 5);
//! assert!(predictions.iter().all(|p| p.is_nan()));
//! ```

mod linear;
mod naive;

pub use linear::LinearRegression;
pub use naive::{
    NaiveCellLineMeanPredictor, NaiveDrugMeanPredictor, NaiveMeanEffectsPredictor, NaivePredictor,
};

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dataset::{load_feature_csv, merge_views, FeatureDataset, ResponseDataset};
use crate::{Error, Result};

/// One hyperparameter combination.
pub type Hyperparameters = BTreeMap<String, serde_json::Value>;

/// The capability set every pluggable drug response model implements.
///
/// Feature loading has default implementations that read one CSV per declared
/// view; override them for models with custom feature preparation.
pub trait DrugResponseModel: Send + Sync {
    /// Model name used in run keys and result tables.
    fn model_name(&self) -> &str;

    /// Cell line feature views the model consumes.
    fn cell_line_views(&self) -> &[&'static str];

    /// Drug feature views the model consumes.
    fn drug_views(&self) -> &[&'static str] {
        &[]
    }

    /// Whether `train` uses an early-stopping dataset.
    fn early_stopping(&self) -> bool {
        false
    }

    /// Whether the driver must fit one instance per drug.
    fn is_single_drug_model(&self) -> bool {
        false
    }

    /// The hyperparameter grid to search. Never empty.
    fn hyperparameter_set(&self) -> Vec<Hyperparameters>;

    /// Reset to a fresh, untrained model for the given hyperparameters.
    ///
    /// # Errors
    ///
    /// Returns error if a required hyperparameter is missing or malformed.
    fn build_model(&mut self, hyperparameters: &Hyperparameters, seed: u64) -> anyhow::Result<()>;

    /// Fit on `output`'s records.
    ///
    /// # Errors
    ///
    /// Returns error if features are missing or the model was not built.
    fn train(
        &mut self,
        output: &ResponseDataset,
        cell_line_input: &FeatureDataset,
        drug_input: Option<&FeatureDataset>,
        output_earlystopping: Option<&ResponseDataset>,
    ) -> anyhow::Result<()>;

    /// Predict one response per (cell line, drug) pair, in input order.
    ///
    /// # Errors
    ///
    /// Returns error if features are missing or the model was not trained.
    fn predict(
        &self,
        cell_line_ids: &[String],
        drug_ids: &[String],
        cell_line_input: &FeatureDataset,
        drug_input: Option<&FeatureDataset>,
    ) -> anyhow::Result<Vec<f64>>;

    /// Load the cell line features of a dataset.
    ///
    /// # Errors
    ///
    /// Returns error if a view file cannot be read.
    fn load_cell_line_features(
        &self,
        data_path: &Path,
        dataset_name: &str,
    ) -> Result<FeatureDataset> {
        load_views(data_path, dataset_name, self.cell_line_views())
    }

    /// Load the drug features of a dataset, `None` if the model uses none.
    ///
    /// # Errors
    ///
    /// Returns error if a view file cannot be read.
    fn load_drug_features(
        &self,
        data_path: &Path,
        dataset_name: &str,
    ) -> Result<Option<FeatureDataset>> {
        if self.drug_views().is_empty() {
            return Ok(None);
        }
        load_views(data_path, dataset_name, self.drug_views()).map(Some)
    }
}

/// Source of fresh model instances.
///
/// Implemented by [`ModelKind`] for the built-in models; implement it for
/// out-of-tree models to run them through the driver.
pub trait ModelFactory: Sync {
    /// Name of the produced model.
    fn name(&self) -> &str;

    /// A new, unbuilt model instance.
    fn instantiate(&self) -> Box<dyn DrugResponseModel>;

    /// Baseline-only models skip randomization and robustness runs.
    fn is_baseline_only(&self) -> bool {
        false
    }
}

/// Built-in models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelKind {
    /// Predicts the training mean
    NaivePredictor,
    /// Predicts the training mean of the drug
    NaiveDrugMeanPredictor,
    /// Predicts the training mean of the cell line
    NaiveCellLineMeanPredictor,
    /// Predicts mean + drug effect + cell line effect
    NaiveMeanEffectsPredictor,
    /// Linear model on gene expression and fingerprints
    LinearRegression,
    /// Linear model on gene expression, one per drug
    SingleDrugLinearRegression,
}

impl ModelKind {
    /// Every built-in model.
    pub const ALL: [Self; 6] = [
        Self::NaivePredictor,
        Self::NaiveDrugMeanPredictor,
        Self::NaiveCellLineMeanPredictor,
        Self::NaiveMeanEffectsPredictor,
        Self::LinearRegression,
        Self::SingleDrugLinearRegression,
    ];

    /// Registry name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NaivePredictor => "NaivePredictor",
            Self::NaiveDrugMeanPredictor => "NaiveDrugMeanPredictor",
            Self::NaiveCellLineMeanPredictor => "NaiveCellLineMeanPredictor",
            Self::NaiveMeanEffectsPredictor => "NaiveMeanEffectsPredictor",
            Self::LinearRegression => "LinearRegression",
            Self::SingleDrugLinearRegression => "SingleDrugLinearRegression",
        }
    }

    /// Naive models are only run as baselines (no randomization/robustness).
    #[must_use]
    pub const fn is_naive(self) -> bool {
        matches!(
            self,
            Self::NaivePredictor
                | Self::NaiveDrugMeanPredictor
                | Self::NaiveCellLineMeanPredictor
                | Self::NaiveMeanEffectsPredictor
        )
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                let available: Vec<&str> = Self::ALL.iter().map(|k| k.as_str()).collect();
                Error::Configuration(format!(
                    "invalid model name '{s}', available models are {}",
                    available.join(", ")
                ))
            })
    }
}

impl ModelFactory for ModelKind {
    fn name(&self) -> &str {
        self.as_str()
    }

    fn instantiate(&self) -> Box<dyn DrugResponseModel> {
        match self {
            Self::NaivePredictor => Box::new(NaivePredictor::default()),
            Self::NaiveDrugMeanPredictor => Box::new(NaiveDrugMeanPredictor::default()),
            Self::NaiveCellLineMeanPredictor => Box::new(NaiveCellLineMeanPredictor::default()),
            Self::NaiveMeanEffectsPredictor => Box::new(NaiveMeanEffectsPredictor::default()),
            Self::LinearRegression => Box::new(LinearRegression::multi_drug()),
            Self::SingleDrugLinearRegression => Box::new(LinearRegression::single_drug()),
        }
    }

    fn is_baseline_only(&self) -> bool {
        self.is_naive()
    }
}

/// Load `{data_path}/{dataset_name}/{view}.csv` for every view and merge them.
///
/// # Errors
///
/// Returns error if a view file cannot be read.
pub fn load_views(data_path: &Path, dataset_name: &str, views: &[&str]) -> Result<FeatureDataset> {
    let dir = data_path.join(dataset_name);
    let parts = views
        .iter()
        .map(|view| load_feature_csv(dir.join(format!("{view}.csv")), view))
        .collect::<Result<Vec<_>>>()?;
    Ok(merge_views(parts))
}

/// Row-wise concatenation of the requested vector views.
///
/// Row `i` is the cell line views of `cell_line_ids[i]` followed by the drug
/// views of `drug_ids[i]`.
///
/// # Errors
///
/// Returns error if an entity lacks one of the views.
pub fn concatenated_features(
    cell_line_ids: &[String],
    drug_ids: &[String],
    cell_line_input: &FeatureDataset,
    drug_input: Option<&FeatureDataset>,
    cell_line_views: &[&str],
    drug_views: &[&str],
) -> Result<Vec<Vec<f64>>> {
    if !drug_views.is_empty() && drug_ids.len() != cell_line_ids.len() {
        return Err(Error::length_mismatch(
            "drug_ids vs cell_line_ids",
            cell_line_ids.len(),
            drug_ids.len(),
        ));
    }
    let mut rows = Vec::with_capacity(cell_line_ids.len());
    for (i, cell_line) in cell_line_ids.iter().enumerate() {
        let mut row = Vec::new();
        for view in cell_line_views {
            row.extend_from_slice(cell_line_input.vector(cell_line, view)?);
        }
        if !drug_views.is_empty() {
            let drug_input = drug_input.ok_or_else(|| {
                Error::InvalidArgument("model needs drug features but none were given".to_string())
            })?;
            for view in drug_views {
                row.extend_from_slice(drug_input.vector(&drug_ids[i], view)?);
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

pub(crate) fn hp_f64(hyperparameters: &Hyperparameters, key: &str) -> anyhow::Result<f64> {
    hyperparameters
        .get(key)
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| anyhow::anyhow!("hyperparameter '{key}' missing or not a number"))
}

pub(crate) fn hp_usize(hyperparameters: &Hyperparameters, key: &str) -> anyhow::Result<usize> {
    hyperparameters
        .get(key)
        .and_then(serde_json::Value::as_u64)
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| anyhow::anyhow!("hyperparameter '{key}' missing or not a positive integer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_roundtrip() {
        for kind in ModelKind::ALL {
            assert_eq!(kind.as_str().parse::<ModelKind>().unwrap(), kind);
            let model = kind.instantiate();
            assert_eq!(model.model_name(), kind.as_str());
            assert!(!model.hyperparameter_set().is_empty());
        }
    }

    #[test]
    fn test_unknown_model_is_configuration_error() {
        let err = "DeepMagic".parse::<ModelKind>().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("NaivePredictor"));
    }

    #[test]
    fn test_single_drug_flag() {
        assert!(ModelKind::SingleDrugLinearRegression.instantiate().is_single_drug_model());
        assert!(!ModelKind::LinearRegression.instantiate().is_single_drug_model());
    }

    #[test]
    fn test_concatenated_features() {
        let mut cells = FeatureDataset::new();
        cells.insert("A", "gene_expression", vec![1.0, 2.0].into());
        let mut drugs = FeatureDataset::new();
        drugs.insert("X", "fingerprints", vec![0.0, 1.0, 1.0].into());
        let rows = concatenated_features(
            &["A".to_string()],
            &["X".to_string()],
            &cells,
            Some(&drugs),
            &["gene_expression"],
            &["fingerprints"],
        )
        .unwrap();
        assert_eq!(rows, vec![vec![1.0, 2.0, 0.0, 1.0, 1.0]]);
    }

    #[test]
    fn test_default_loader_without_views_does_no_io() {
        let model = ModelKind::NaivePredictor.instantiate();
        let features = model
            .load_cell_line_features(Path::new("/nonexistent"), "GDSC1")
            .unwrap();
        assert!(features.is_empty());
        assert!(model
            .load_drug_features(Path::new("/nonexistent"), "GDSC1")
            .unwrap()
            .is_none());
    }
}
