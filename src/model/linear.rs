//! Linear reference models
//!
//! Ridge-penalized linear regression fitted by mini-batch gradient descent on
//! standardized features. The multi-drug variant concatenates cell line gene
//! expression with drug fingerprints; the single-drug variant uses gene
//! expression only and is fitted once per drug by the driver.
//!
//! Both variants use the early-stopping dataset when the driver supplies one
//! with at least two records: after each epoch the early-stopping MSE is
//! checked and the best weights are restored once `patience` epochs pass
//! without improvement.

use anyhow::{anyhow, bail};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde_json::json;
use tracing::{debug, warn};

use super::{concatenated_features, hp_f64, hp_usize, DrugResponseModel, Hyperparameters};
use crate::dataset::{FeatureDataset, ResponseDataset};

const GENE_EXPRESSION: &str = "gene_expression";
const FINGERPRINTS: &str = "fingerprints";

#[derive(Debug, Clone, Copy)]
struct LinearConfig {
    learning_rate: f64,
    l2: f64,
    epochs: usize,
    batch_size: usize,
    patience: usize,
    seed: u64,
}

/// Per-column standardization fitted on training features.
#[derive(Debug, Clone)]
struct ColumnScaler {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl ColumnScaler {
    fn fit(rows: &[Vec<f64>]) -> Self {
        let width = rows.first().map_or(0, Vec::len);
        #[allow(clippy::cast_precision_loss)]
        let n = rows.len().max(1) as f64;
        let mut mean = vec![0.0; width];
        for row in rows {
            for (m, x) in mean.iter_mut().zip(row) {
                *m += x / n;
            }
        }
        let mut std = vec![0.0; width];
        for row in rows {
            for ((s, x), m) in std.iter_mut().zip(row).zip(&mean) {
                *s += (x - m).powi(2) / n;
            }
        }
        for s in &mut std {
            *s = if *s > 0.0 { s.sqrt() } else { 1.0 };
        }
        Self { mean, std }
    }

    fn apply(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }
}

#[derive(Debug, Clone)]
struct LinearFit {
    weights: Vec<f64>,
    bias: f64,
    scaler: ColumnScaler,
    randomly_initialized: bool,
}

impl LinearFit {
    fn predict_row(&self, scaled: &[f64]) -> f64 {
        scaled
            .iter()
            .zip(&self.weights)
            .fold(self.bias, |acc, (x, w)| x.mul_add(*w, acc))
    }

    fn mse(&self, rows: &[Vec<f64>], y: &[f64]) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let n = rows.len() as f64;
        rows.iter()
            .zip(y)
            .map(|(row, t)| (self.predict_row(row) - t).powi(2))
            .sum::<f64>()
            / n
    }
}

#[derive(Debug, Clone, Default)]
enum FitState {
    #[default]
    Untrained,
    NoData,
    Fitted(LinearFit),
}

/// Linear regression on concatenated feature views.
#[derive(Debug, Clone)]
pub struct LinearRegression {
    name: &'static str,
    cell_line_views: &'static [&'static str],
    drug_views: &'static [&'static str],
    single_drug: bool,
    config: Option<LinearConfig>,
    state: FitState,
}

impl LinearRegression {
    /// Gene expression + fingerprints, one model for all drugs.
    #[must_use]
    pub const fn multi_drug() -> Self {
        Self {
            name: "LinearRegression",
            cell_line_views: &[GENE_EXPRESSION],
            drug_views: &[FINGERPRINTS],
            single_drug: false,
            config: None,
            state: FitState::Untrained,
        }
    }

    /// Gene expression only, fitted per drug.
    #[must_use]
    pub const fn single_drug() -> Self {
        Self {
            name: "SingleDrugLinearRegression",
            cell_line_views: &[GENE_EXPRESSION],
            drug_views: &[],
            single_drug: true,
            config: None,
            state: FitState::Untrained,
        }
    }

    /// Whether the last `train` fell back to random initialization because
    /// there were fewer records than the batch size.
    #[must_use]
    pub fn is_randomly_initialized(&self) -> bool {
        matches!(&self.state, FitState::Fitted(fit) if fit.randomly_initialized)
    }

    fn features(
        &self,
        cell_line_ids: &[String],
        drug_ids: &[String],
        cell_line_input: &FeatureDataset,
        drug_input: Option<&FeatureDataset>,
    ) -> anyhow::Result<Vec<Vec<f64>>> {
        Ok(concatenated_features(
            cell_line_ids,
            drug_ids,
            cell_line_input,
            drug_input,
            self.cell_line_views,
            self.drug_views,
        )?)
    }
}

fn random_init(width: usize, rng: &mut ChaCha8Rng) -> anyhow::Result<(Vec<f64>, f64)> {
    let normal = Normal::new(0.0, 0.01)?;
    let weights = (0..width).map(|_| normal.sample(rng)).collect();
    Ok((weights, normal.sample(rng)))
}

/// One epoch of mini-batch gradient descent on squared loss with L2 penalty.
fn epoch(
    fit: &mut LinearFit,
    rows: &[Vec<f64>],
    y: &[f64],
    order: &[usize],
    config: &LinearConfig,
) {
    for batch in order.chunks(config.batch_size) {
        #[allow(clippy::cast_precision_loss)]
        let m = batch.len() as f64;
        let mut grad_w = vec![0.0; fit.weights.len()];
        let mut grad_b = 0.0;
        for &i in batch {
            let residual = fit.predict_row(&rows[i]) - y[i];
            for (g, x) in grad_w.iter_mut().zip(&rows[i]) {
                *g += residual * x;
            }
            grad_b += residual;
        }
        for (w, g) in fit.weights.iter_mut().zip(&grad_w) {
            *w -= config.learning_rate * (2.0 * g / m + 2.0 * config.l2 * *w);
        }
        fit.bias -= config.learning_rate * 2.0 * grad_b / m;
    }
}

impl DrugResponseModel for LinearRegression {
    fn model_name(&self) -> &str {
        self.name
    }

    fn cell_line_views(&self) -> &[&'static str] {
        self.cell_line_views
    }

    fn drug_views(&self) -> &[&'static str] {
        self.drug_views
    }

    fn early_stopping(&self) -> bool {
        true
    }

    fn is_single_drug_model(&self) -> bool {
        self.single_drug
    }

    fn hyperparameter_set(&self) -> Vec<Hyperparameters> {
        let mut grid = Vec::new();
        for learning_rate in [0.01, 0.05] {
            for l2 in [0.0, 0.1] {
                let mut hp = Hyperparameters::new();
                hp.insert("learning_rate".to_string(), json!(learning_rate));
                hp.insert("l2".to_string(), json!(l2));
                hp.insert("epochs".to_string(), json!(100));
                hp.insert("batch_size".to_string(), json!(8));
                hp.insert("patience".to_string(), json!(5));
                grid.push(hp);
            }
        }
        grid
    }

    fn build_model(&mut self, hyperparameters: &Hyperparameters, seed: u64) -> anyhow::Result<()> {
        let batch_size = hp_usize(hyperparameters, "batch_size")?;
        if batch_size == 0 {
            bail!("batch_size must be positive");
        }
        self.config = Some(LinearConfig {
            learning_rate: hp_f64(hyperparameters, "learning_rate")?,
            l2: hp_f64(hyperparameters, "l2")?,
            epochs: hp_usize(hyperparameters, "epochs")?,
            batch_size,
            patience: hp_usize(hyperparameters, "patience")?,
            seed,
        });
        self.state = FitState::Untrained;
        Ok(())
    }

    fn train(
        &mut self,
        output: &ResponseDataset,
        cell_line_input: &FeatureDataset,
        drug_input: Option<&FeatureDataset>,
        output_earlystopping: Option<&ResponseDataset>,
    ) -> anyhow::Result<()> {
        let config = self
            .config
            .ok_or_else(|| anyhow!("{}: train called before build_model", self.name))?;
        if output.is_empty() {
            warn!(model = self.name, "no training records, predictions will be NaN");
            self.state = FitState::NoData;
            return Ok(());
        }

        let raw = self.features(
            output.cell_line_ids(),
            output.drug_ids(),
            cell_line_input,
            drug_input,
        )?;
        let scaler = ColumnScaler::fit(&raw);
        let rows: Vec<Vec<f64>> = raw.iter().map(|row| scaler.apply(row)).collect();
        let y = output.response();

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let (weights, bias) = random_init(scaler.mean.len(), &mut rng)?;
        let mut fit = LinearFit {
            weights,
            bias,
            scaler,
            randomly_initialized: false,
        };

        if output.len() < config.batch_size {
            warn!(
                model = self.name,
                records = output.len(),
                batch_size = config.batch_size,
                "fewer records than batch size, keeping random initialization"
            );
            fit.randomly_initialized = true;
            self.state = FitState::Fitted(fit);
            return Ok(());
        }

        let early_stopping = match output_earlystopping {
            Some(es) if es.len() >= 2 => {
                let raw =
                    self.features(es.cell_line_ids(), es.drug_ids(), cell_line_input, drug_input)?;
                let rows: Vec<Vec<f64>> = raw.iter().map(|row| fit.scaler.apply(row)).collect();
                Some((rows, es.response().to_vec()))
            }
            _ => None,
        };

        let mut order: Vec<usize> = (0..rows.len()).collect();
        let mut best: Option<(f64, LinearFit)> = None;
        let mut stale = 0;
        for epoch_index in 0..config.epochs {
            order.shuffle(&mut rng);
            epoch(&mut fit, &rows, y, &order, &config);

            let Some((es_rows, es_y)) = &early_stopping else {
                continue;
            };
            let loss = fit.mse(es_rows, es_y);
            if best.as_ref().map_or(true, |(b, _)| loss < *b) {
                best = Some((loss, fit.clone()));
                stale = 0;
            } else {
                stale += 1;
                if stale >= config.patience {
                    debug!(model = self.name, epoch = epoch_index, "early stopping");
                    break;
                }
            }
        }

        if let Some((_, best_fit)) = best {
            fit = best_fit;
        }
        if fit.weights.iter().any(|w| !w.is_finite()) || !fit.bias.is_finite() {
            bail!("{}: training diverged, lower the learning rate", self.name);
        }
        self.state = FitState::Fitted(fit);
        Ok(())
    }

    fn predict(
        &self,
        cell_line_ids: &[String],
        drug_ids: &[String],
        cell_line_input: &FeatureDataset,
        drug_input: Option<&FeatureDataset>,
    ) -> anyhow::Result<Vec<f64>> {
        match &self.state {
            FitState::Untrained => bail!("{}: predict called before train", self.name),
            FitState::NoData => Ok(vec![f64::NAN; cell_line_ids.len()]),
            FitState::Fitted(fit) => {
                let raw = self.features(cell_line_ids, drug_ids, cell_line_input, drug_input)?;
                Ok(raw
                    .iter()
                    .map(|row| fit.predict_row(&fit.scaler.apply(row)))
                    .collect())
            }
        }
    }
}
