//! Naive baselines
//!
//! Mean-based predictors that need no features. Every real model is compared
//! against them: a model that cannot beat [`NaiveMeanEffectsPredictor`] has
//! learned nothing beyond per-drug and per-cell-line averages.

use rustc_hash::FxHashMap;

use super::{DrugResponseModel, Hyperparameters};
use crate::dataset::{FeatureDataset, ResponseDataset};
use crate::metrics::nan_mean;

/// Group means of the training responses.
#[derive(Debug, Clone, Default)]
struct GroupMeans {
    means: FxHashMap<String, f64>,
}

impl GroupMeans {
    fn fit(ids: &[String], response: &[f64]) -> Self {
        let mut sums: FxHashMap<&str, (f64, usize)> = FxHashMap::default();
        for (id, &y) in ids.iter().zip(response) {
            let entry = sums.entry(id.as_str()).or_insert((0.0, 0));
            entry.0 += y;
            entry.1 += 1;
        }
        let means = sums
            .into_iter()
            .map(|(id, (sum, n))| {
                #[allow(clippy::cast_precision_loss)]
                let mean = sum / n as f64;
                (id.to_string(), mean)
            })
            .collect();
        Self { means }
    }

    fn get(&self, id: &str) -> Option<f64> {
        self.means.get(id).copied()
    }
}

/// Training state shared by the naive predictors.
#[derive(Debug, Clone, Default)]
enum NaiveState {
    #[default]
    Untrained,
    NoData,
    Fitted {
        dataset_mean: f64,
        drug_means: GroupMeans,
        cell_line_means: GroupMeans,
    },
}

impl NaiveState {
    fn fit(output: &ResponseDataset) -> Self {
        if output.is_empty() {
            return Self::NoData;
        }
        Self::Fitted {
            dataset_mean: nan_mean(output.response()),
            drug_means: GroupMeans::fit(output.drug_ids(), output.response()),
            cell_line_means: GroupMeans::fit(output.cell_line_ids(), output.response()),
        }
    }

    /// Predict with `rule`, or NaN for every pair if there was no data.
    fn predict<F>(
        &self,
        cell_line_ids: &[String],
        drug_ids: &[String],
        rule: F,
    ) -> anyhow::Result<Vec<f64>>
    where
        F: Fn(f64, &GroupMeans, &GroupMeans, &str, &str) -> f64,
    {
        if drug_ids.len() != cell_line_ids.len() {
            anyhow::bail!(
                "got {} cell line ids but {} drug ids",
                cell_line_ids.len(),
                drug_ids.len()
            );
        }
        match self {
            Self::Untrained => anyhow::bail!("predict called before train"),
            Self::NoData => Ok(vec![f64::NAN; cell_line_ids.len()]),
            Self::Fitted {
                dataset_mean,
                drug_means,
                cell_line_means,
            } => Ok(cell_line_ids
                .iter()
                .zip(drug_ids)
                .map(|(cl, drug)| rule(*dataset_mean, drug_means, cell_line_means, cl, drug))
                .collect()),
        }
    }
}

macro_rules! naive_model {
    ($(#[$doc:meta])* $name:ident, $label:literal, $rule:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default)]
        pub struct $name {
            state: NaiveState,
        }

        impl DrugResponseModel for $name {
            fn model_name(&self) -> &str {
                $label
            }

            fn cell_line_views(&self) -> &[&'static str] {
                &[]
            }

            fn hyperparameter_set(&self) -> Vec<Hyperparameters> {
                vec![Hyperparameters::new()]
            }

            fn build_model(
                &mut self,
                _hyperparameters: &Hyperparameters,
                _seed: u64,
            ) -> anyhow::Result<()> {
                self.state = NaiveState::Untrained;
                Ok(())
            }

            fn train(
                &mut self,
                output: &ResponseDataset,
                _cell_line_input: &FeatureDataset,
                _drug_input: Option<&FeatureDataset>,
                _output_earlystopping: Option<&ResponseDataset>,
            ) -> anyhow::Result<()> {
                self.state = NaiveState::fit(output);
                Ok(())
            }

            fn predict(
                &self,
                cell_line_ids: &[String],
                drug_ids: &[String],
                _cell_line_input: &FeatureDataset,
                _drug_input: Option<&FeatureDataset>,
            ) -> anyhow::Result<Vec<f64>> {
                self.state.predict(cell_line_ids, drug_ids, $rule)
            }
        }
    };
}

naive_model!(
    /// Predicts the overall training mean for every pair.
    NaivePredictor,
    "NaivePredictor",
    |mean, _, _, _, _| mean
);

naive_model!(
    /// Predicts the drug's training mean; unseen drugs get the overall mean.
    NaiveDrugMeanPredictor,
    "NaiveDrugMeanPredictor",
    |mean, drugs: &GroupMeans, _, _, drug| drugs.get(drug).unwrap_or(mean)
);

naive_model!(
    /// Predicts the cell line's training mean; unseen cell lines get the
    /// overall mean.
    NaiveCellLineMeanPredictor,
    "NaiveCellLineMeanPredictor",
    |mean, _, cells: &GroupMeans, cl, _| cells.get(cl).unwrap_or(mean)
);

naive_model!(
    /// Additive model: overall mean plus the drug effect plus the cell line
    /// effect. Unseen entities contribute no effect.
    NaiveMeanEffectsPredictor,
    "NaiveMeanEffectsPredictor",
    |mean, drugs: &GroupMeans, cells: &GroupMeans, cl, drug| {
        let drug_effect = drugs.get(drug).map_or(0.0, |m| m - mean);
        let cell_line_effect = cells.get(cl).map_or(0.0, |m| m - mean);
        mean + drug_effect + cell_line_effect
    }
);
