//! Evaluation metrics
//!
//! All metrics drop (truth, prediction) pairs where either side is NaN, so a
//! fold with partially failed predictions (e.g. one single-drug model without
//! data) is still scored on what was predicted. Correlations are NaN, not an
//! error, when fewer than two pairs remain or either side has zero variance.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::dataset::ResponseDataset;
use crate::splitter::GroupBy;
use crate::{Error, Result};

/// Supported evaluation metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    /// Root mean squared error
    #[serde(rename = "RMSE")]
    Rmse,
    /// Mean squared error
    #[serde(rename = "MSE")]
    Mse,
    /// Mean absolute error
    #[serde(rename = "MAE")]
    Mae,
    /// Coefficient of determination
    #[serde(rename = "R^2")]
    R2,
    /// Pearson correlation coefficient
    Pearson,
    /// Spearman rank correlation coefficient
    Spearman,
}

impl Metric {
    /// Every supported metric.
    pub const ALL: [Self; 6] = [
        Self::Rmse,
        Self::Mse,
        Self::Mae,
        Self::R2,
        Self::Pearson,
        Self::Spearman,
    ];

    /// Display name, also used as table column header.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rmse => "RMSE",
            Self::Mse => "MSE",
            Self::Mae => "MAE",
            Self::R2 => "R^2",
            Self::Pearson => "Pearson",
            Self::Spearman => "Spearman",
        }
    }

    /// Whether larger values indicate a better model.
    #[must_use]
    pub const fn higher_is_better(self) -> bool {
        matches!(self, Self::R2 | Self::Pearson | Self::Spearman)
    }

    /// Whether the metric is normalized by subtracting a baseline's value.
    #[must_use]
    pub const fn is_normalizable(self) -> bool {
        self.higher_is_better()
    }

    /// Compute the metric, ignoring pairs with a NaN on either side.
    ///
    /// Returns NaN when no pair is left (or for correlations, fewer than two
    /// pairs or zero variance).
    #[must_use]
    pub fn compute(self, y_true: &[f64], y_pred: &[f64]) -> f64 {
        let (t, p): (Vec<f64>, Vec<f64>) = y_true
            .iter()
            .zip(y_pred)
            .filter(|(a, b)| !a.is_nan() && !b.is_nan())
            .map(|(a, b)| (*a, *b))
            .unzip();
        if t.is_empty() {
            return f64::NAN;
        }
        match self {
            Self::Mse => mse(&t, &p),
            Self::Rmse => mse(&t, &p).sqrt(),
            Self::Mae => {
                #[allow(clippy::cast_precision_loss)]
                let n = t.len() as f64;
                t.iter().zip(&p).map(|(a, b)| (a - b).abs()).sum::<f64>() / n
            }
            Self::R2 => r2(&t, &p),
            Self::Pearson => pearson(&t, &p),
            Self::Spearman => spearman(&t, &p),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "invalid metric '{s}', choose from RMSE, MSE, MAE, R^2, Pearson, Spearman"
                ))
            })
    }
}

/// Metric values of one evaluation unit (fold, drug, cell line).
pub type MetricValues = BTreeMap<Metric, f64>;

/// Evaluate a dataset's predictions against its responses.
///
/// # Errors
///
/// Returns [`Error::Other`] if the dataset carries no predictions.
pub fn evaluate(dataset: &ResponseDataset, metrics: &[Metric]) -> Result<MetricValues> {
    let predictions = dataset
        .predictions()
        .ok_or_else(|| Error::Other("cannot evaluate a dataset without predictions".to_string()))?;
    Ok(metrics
        .iter()
        .map(|&m| (m, m.compute(dataset.response(), predictions)))
        .collect())
}

/// Evaluate separately for every drug (or cell line) of the dataset.
///
/// Groups are returned in id order.
///
/// # Errors
///
/// Returns [`Error::Other`] if the dataset carries no predictions.
pub fn evaluate_grouped(
    dataset: &ResponseDataset,
    group: GroupBy,
    metrics: &[Metric],
) -> Result<BTreeMap<String, MetricValues>> {
    let predictions = dataset
        .predictions()
        .ok_or_else(|| Error::Other("cannot evaluate a dataset without predictions".to_string()))?;

    let mut groups: FxHashMap<&str, (Vec<f64>, Vec<f64>)> = FxHashMap::default();
    for (i, id) in group.ids(dataset).iter().enumerate() {
        let entry = groups.entry(id.as_str()).or_default();
        entry.0.push(dataset.response()[i]);
        entry.1.push(predictions[i]);
    }

    Ok(groups
        .into_iter()
        .map(|(id, (t, p))| {
            let values = metrics.iter().map(|&m| (m, m.compute(&t, &p))).collect();
            (id.to_string(), values)
        })
        .collect())
}

/// Mean over the finite entries; NaN if there are none.
#[must_use]
pub fn nan_mean(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = finite.len() as f64;
    finite.iter().sum::<f64>() / n
}

/// Mean of each metric over groups, dropping groups where it is NaN.
#[must_use]
pub fn mean_over_groups(
    grouped: &BTreeMap<String, MetricValues>,
    metrics: &[Metric],
) -> MetricValues {
    metrics
        .iter()
        .map(|&m| {
            let values: Vec<f64> = grouped
                .values()
                .filter_map(|v| v.get(&m).copied())
                .collect();
            (m, nan_mean(&values))
        })
        .collect()
}

fn mean(xs: &[f64]) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let n = xs.len() as f64;
    xs.iter().sum::<f64>() / n
}

fn mse(t: &[f64], p: &[f64]) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let n = t.len() as f64;
    t.iter().zip(p).map(|(a, b)| (a - b).powi(2)).sum::<f64>() / n
}

fn r2(t: &[f64], p: &[f64]) -> f64 {
    let t_mean = mean(t);
    let ss_res: f64 = t.iter().zip(p).map(|(a, b)| (a - b).powi(2)).sum();
    let ss_tot: f64 = t.iter().map(|a| (a - t_mean).powi(2)).sum();
    if ss_tot == 0.0 || !ss_tot.is_finite() {
        return f64::NAN;
    }
    1.0 - ss_res / ss_tot
}

fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    if xs.len() != ys.len() || xs.len() < 2 {
        return f64::NAN;
    }
    let mx = mean(xs);
    let my = mean(ys);

    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mx;
        let dy = y - my;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }

    let denom = (sxx * syy).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return f64::NAN;
    }
    sxy / denom
}

fn spearman(xs: &[f64], ys: &[f64]) -> f64 {
    if xs.len() != ys.len() || xs.len() < 2 {
        return f64::NAN;
    }
    pearson(&ranks_average_ties(xs), &ranks_average_ties(ys))
}

fn ranks_average_ties(xs: &[f64]) -> Vec<f64> {
    let n = xs.len();
    let mut idx: Vec<usize> = (0..n).collect();
    idx.sort_by(|&a, &b| xs[a].total_cmp(&xs[b]));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let start = i;
        let v = xs[idx[i]];
        i += 1;
        while i < n && xs[idx[i]] == v {
            i += 1;
        }
        // 1-based ranks, ties share the average
        #[allow(clippy::cast_precision_loss)]
        let avg_rank = (start + 1 + i) as f64 * 0.5;
        for &j in &idx[start..i] {
            ranks[j] = avg_rank;
        }
    }
    ranks
}
