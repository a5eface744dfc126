//! Result persistence
//!
//! Layout under `{path_out}/{run_id}/`:
//!
//! ```text
//! config.json
//! {split_mode}/predictions/{run_key}.csv
//! {split_mode}/evaluation_results.csv
//! {split_mode}/evaluation_results_per_drug.csv
//! {split_mode}/evaluation_results_per_cell_line.csv
//! {split_mode}/evaluation_results_mean_per_drug.csv
//! {split_mode}/evaluation_results_mean_per_cell_line.csv
//! {split_mode}/evaluation_results_normalized.csv
//! {split_mode}/true_vs_pred.csv
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::evaluation::{EvaluationRow, GroupEvaluationRow};
use super::{ArtifactRecord, RunConfig, RunKey};
use crate::dataset::{read_predictions_csv, write_predictions_csv, ResponseDataset};
use crate::metrics::Metric;
use crate::splitter::SplitMode;
use crate::{Error, Result};

/// Writes and reads the artifacts of one run directory.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    experiment_id: String,
    root: PathBuf,
}

impl ResultWriter {
    /// Writer for `{path_out}/{run_id}`.
    #[must_use]
    pub fn new(path_out: &Path, run_id: &str) -> Self {
        Self {
            experiment_id: run_id.to_string(),
            root: path_out.join(run_id),
        }
    }

    /// The run directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one split mode.
    #[must_use]
    pub fn mode_dir(&self, split_mode: SplitMode) -> PathBuf {
        self.root.join(split_mode.as_str())
    }

    /// Where the predictions of a run are stored.
    #[must_use]
    pub fn prediction_path(&self, key: &RunKey) -> PathBuf {
        self.mode_dir(key.split_mode)
            .join("predictions")
            .join(format!("{key}.csv"))
    }

    fn artifact(&self, path: &Path) -> Result<ArtifactRecord> {
        let size = fs::metadata(path)?.len();
        let key = path
            .strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();
        debug!(artifact = %key, size, "wrote artifact");
        Ok(ArtifactRecord::new(&self.experiment_id, key, path, size))
    }

    /// Persist the configuration.
    ///
    /// An existing `config.json` that differs from `config` is only replaced
    /// when `config.overwrite` is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the run directory holds a
    /// different configuration and overwriting is off, or an IO/JSON error.
    pub fn write_config(&self, config: &RunConfig) -> Result<ArtifactRecord> {
        let path = self.root.join("config.json");
        if path.exists() && !config.overwrite {
            let previous: RunConfig = serde_json::from_str(&fs::read_to_string(&path)?)?;
            if &previous != config {
                return Err(Error::Configuration(format!(
                    "{} holds results of a different configuration, set overwrite to replace them",
                    self.root.display()
                )));
            }
        }
        fs::create_dir_all(&self.root)?;
        fs::write(&path, serde_json::to_string_pretty(config)?)?;
        self.artifact(&path)
    }

    /// Persist the predictions of one run.
    ///
    /// # Errors
    ///
    /// Returns error if the dataset has no predictions or writing fails.
    pub fn write_predictions(
        &self,
        key: &RunKey,
        predictions: &ResponseDataset,
    ) -> Result<ArtifactRecord> {
        let path = self.prediction_path(key);
        write_predictions_csv(&path, predictions)?;
        self.artifact(&path)
    }

    /// Load previously persisted predictions of a run, if present.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be parsed.
    pub fn read_predictions(
        &self,
        key: &RunKey,
        dataset_name: &str,
    ) -> Result<Option<ResponseDataset>> {
        let path = self.prediction_path(key);
        if !path.exists() {
            return Ok(None);
        }
        read_predictions_csv(&path, dataset_name).map(Some)
    }

    /// Write `evaluation_results*.csv` style tables.
    ///
    /// # Errors
    ///
    /// Returns error if writing fails.
    pub fn write_evaluation(
        &self,
        split_mode: SplitMode,
        file_name: &str,
        rows: &[&EvaluationRow],
        metrics: &[Metric],
    ) -> Result<ArtifactRecord> {
        let path = self.mode_dir(split_mode).join(file_name);
        fs::create_dir_all(self.mode_dir(split_mode))?;
        let mut writer = csv::Writer::from_path(&path)?;

        let mut header = key_header();
        header.push("status".to_string());
        header.extend(metrics.iter().map(|m| m.as_str().to_string()));
        writer.write_record(&header)?;

        for row in rows {
            let mut record = key_fields(&row.key);
            record.push(format!("{:?}", row.status));
            record.extend(metrics.iter().map(|m| format_value(row.metrics.get(m).copied())));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        self.artifact(&path)
    }

    /// Write per-drug or per-cell-line tables.
    ///
    /// # Errors
    ///
    /// Returns error if writing fails.
    pub fn write_group_evaluation(
        &self,
        split_mode: SplitMode,
        file_name: &str,
        group_column: &str,
        rows: &[&GroupEvaluationRow],
        metrics: &[Metric],
    ) -> Result<ArtifactRecord> {
        let path = self.mode_dir(split_mode).join(file_name);
        fs::create_dir_all(self.mode_dir(split_mode))?;
        let mut writer = csv::Writer::from_path(&path)?;

        let mut header = key_header();
        header.push(group_column.to_string());
        header.push("n_records".to_string());
        header.extend(metrics.iter().map(|m| m.as_str().to_string()));
        writer.write_record(&header)?;

        for row in rows {
            let mut record = key_fields(&row.key);
            record.push(row.group_id.clone());
            record.push(row.n_records.to_string());
            record.extend(metrics.iter().map(|m| format_value(row.metrics.get(m).copied())));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        self.artifact(&path)
    }

    /// Write every test prediction of a split mode in one long table.
    ///
    /// # Errors
    ///
    /// Returns error if writing fails.
    pub fn write_true_vs_pred(
        &self,
        split_mode: SplitMode,
        runs: &[(&RunKey, &ResponseDataset)],
    ) -> Result<ArtifactRecord> {
        let path = self.mode_dir(split_mode).join("true_vs_pred.csv");
        fs::create_dir_all(self.mode_dir(split_mode))?;
        let mut writer = csv::Writer::from_path(&path)?;

        let mut header = key_header();
        header.extend(
            ["cell_line_id", "drug_id", "response", "prediction"]
                .iter()
                .map(|s| (*s).to_string()),
        );
        writer.write_record(&header)?;

        for (key, dataset) in runs {
            let Some(predictions) = dataset.predictions() else {
                continue;
            };
            let fields = key_fields(key);
            for i in 0..dataset.len() {
                let mut record = fields.clone();
                record.push(dataset.cell_line_ids()[i].clone());
                record.push(dataset.drug_ids()[i].clone());
                record.push(dataset.response()[i].to_string());
                record.push(format_value(Some(predictions[i])));
                writer.write_record(&record)?;
            }
        }
        writer.flush()?;
        self.artifact(&path)
    }
}

fn key_header() -> Vec<String> {
    ["run_key", "algorithm", "setting", "split_mode", "split_index", "cv_index"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn key_fields(key: &RunKey) -> Vec<String> {
    vec![
        key.to_string(),
        key.algorithm.clone(),
        key.setting.to_string(),
        key.split_mode.to_string(),
        key.split_index.to_string(),
        key.cv_index.to_string(),
    ]
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) if !v.is_nan() => v.to_string(),
        _ => "NaN".to_string(),
    }
}
