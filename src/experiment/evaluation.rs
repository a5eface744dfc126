//! Result tables
//!
//! Turns per-run predictions into evaluation rows: one row per run, one row
//! per (run, drug) and per (run, cell line), the mean over those groups, and
//! rows normalized against a naive baseline. Failed runs still get a row, with every metric NaN.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{RunKey, RunStatus, Setting};
use crate::dataset::ResponseDataset;
use crate::metrics::{evaluate, evaluate_grouped, mean_over_groups, nan_mean, Metric, MetricValues};
use crate::splitter::{GroupBy, SplitMode};
use crate::Result;

/// Metrics of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRow {
    /// Run identifier
    pub key: RunKey,
    /// Final run status
    pub status: RunStatus,
    /// Metric values, NaN where not computed
    pub metrics: MetricValues,
}

/// Metrics of one run restricted to one drug or cell line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupEvaluationRow {
    /// Run identifier
    pub key: RunKey,
    /// Drug or cell line id
    pub group_id: String,
    /// Number of records of the group
    pub n_records: usize,
    /// Metric values
    pub metrics: MetricValues,
}

/// Mean metrics of one (algorithm, setting, split mode) over folds and trials.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    /// Model name
    pub algorithm: String,
    /// Run setting
    pub setting: Setting,
    /// Split mode
    pub split_mode: SplitMode,
    /// Runs that produced predictions
    pub n_successful: usize,
    /// Runs that failed
    pub n_failed: usize,
    /// NaN-skipping means
    pub metrics: MetricValues,
}

/// Evaluate one run; failed runs (no predictions) get NaN for every metric.
///
/// # Errors
///
/// Propagates [`evaluate`] errors for a dataset without predictions.
pub fn evaluate_run(
    key: RunKey,
    status: RunStatus,
    predictions: Option<&ResponseDataset>,
    metrics: &[Metric],
) -> Result<EvaluationRow> {
    let values = match predictions {
        Some(dataset) if status.has_predictions() => evaluate(dataset, metrics)?,
        _ => metrics.iter().map(|&m| (m, f64::NAN)).collect(),
    };
    Ok(EvaluationRow {
        key,
        status,
        metrics: values,
    })
}

/// Group axes that are meaningful for a split mode.
///
/// Per-drug metrics need more than one cell line per drug in the test set,
/// which LDO never has; likewise per-cell-line metrics under LCO.
#[must_use]
pub fn group_axes(split_mode: SplitMode) -> Vec<GroupBy> {
    match split_mode {
        SplitMode::Lpo => vec![GroupBy::Drug, GroupBy::CellLine],
        SplitMode::Lco => vec![GroupBy::Drug],
        SplitMode::Ldo => vec![GroupBy::CellLine],
    }
}

/// Evaluate one run per drug or per cell line.
///
/// # Errors
///
/// Propagates [`evaluate_grouped`] errors for a dataset without predictions.
pub fn evaluate_run_grouped(
    key: &RunKey,
    predictions: &ResponseDataset,
    group: GroupBy,
    metrics: &[Metric],
) -> Result<Vec<GroupEvaluationRow>> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for id in group.ids(predictions) {
        *counts.entry(id.as_str()).or_default() += 1;
    }
    Ok(evaluate_grouped(predictions, group, metrics)?
        .into_iter()
        .map(|(group_id, values)| GroupEvaluationRow {
            key: key.clone(),
            n_records: counts.get(group_id.as_str()).copied().unwrap_or(0),
            group_id,
            metrics: values,
        })
        .collect())
}

/// Mean over the groups of one run; groups where a metric is NaN (a drug
/// with a single test record has no correlation) do not count for it.
#[must_use]
pub fn group_mean(
    key: RunKey,
    status: RunStatus,
    rows: &[GroupEvaluationRow],
    metrics: &[Metric],
) -> EvaluationRow {
    let grouped: BTreeMap<String, MetricValues> = rows
        .iter()
        .filter(|row| row.key == key)
        .map(|row| (row.group_id.clone(), row.metrics.clone()))
        .collect();
    EvaluationRow {
        key,
        status,
        metrics: mean_over_groups(&grouped, metrics),
    }
}

/// Subtract a baseline's metrics from every other model's rows.
///
/// The baseline row is the one with the same split mode and fold, and the
/// same setting when the baseline has it (cross-study) or its test
/// predictions otherwise. Only correlations and R² are normalized; error
/// metrics are copied unchanged. Without a matching baseline row the
/// normalizable metrics become NaN.
#[must_use]
pub fn normalize_against(rows: &[EvaluationRow], baseline: &str) -> Vec<EvaluationRow> {
    let baseline_rows: BTreeMap<(&Setting, SplitMode, usize), &MetricValues> = rows
        .iter()
        .filter(|row| row.key.algorithm == baseline)
        .map(|row| ((&row.key.setting, row.key.split_mode, row.key.split_index), &row.metrics))
        .collect();

    rows.iter()
        .filter(|row| row.key.algorithm != baseline)
        .map(|row| {
            let key = &row.key;
            let reference = baseline_rows
                .get(&(&key.setting, key.split_mode, key.split_index))
                .or_else(|| {
                    baseline_rows.get(&(&Setting::Predictions, key.split_mode, key.split_index))
                });
            let metrics = row
                .metrics
                .iter()
                .map(|(&metric, &value)| {
                    if !metric.is_normalizable() {
                        return (metric, value);
                    }
                    let base = reference
                        .and_then(|values| values.get(&metric))
                        .copied()
                        .unwrap_or(f64::NAN);
                    (metric, value - base)
                })
                .collect();
            EvaluationRow {
                key: key.clone(),
                status: row.status,
                metrics,
            }
        })
        .collect()
}

/// Mean metrics per (algorithm, setting, split mode), ordered by that triple.
#[must_use]
pub fn summarize(rows: &[EvaluationRow]) -> Vec<SummaryRow> {
    let mut groups: BTreeMap<(&str, &Setting, SplitMode), Vec<&EvaluationRow>> = BTreeMap::new();
    for row in rows {
        groups
            .entry((row.key.algorithm.as_str(), &row.key.setting, row.key.split_mode))
            .or_default()
            .push(row);
    }

    groups
        .into_iter()
        .map(|((algorithm, setting, split_mode), members)| {
            let n_successful = members.iter().filter(|r| r.status.has_predictions()).count();
            let mut metrics = MetricValues::new();
            for member in &members {
                for &metric in member.metrics.keys() {
                    metrics.entry(metric).or_insert(f64::NAN);
                }
            }
            for (metric, mean) in &mut metrics {
                let values: Vec<f64> = members
                    .iter()
                    .filter_map(|r| r.metrics.get(metric).copied())
                    .collect();
                *mean = nan_mean(&values);
            }
            SummaryRow {
                algorithm: algorithm.to_string(),
                setting: setting.clone(),
                split_mode,
                n_successful,
                n_failed: members.len() - n_successful,
                metrics,
            }
        })
        .collect()
}
