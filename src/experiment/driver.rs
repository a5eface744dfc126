//! Experiment driver
//!
//! Runs the {split mode × model × fold} matrix:
//!
//! ```text
//! INIT → SPLIT → for each model, for each fold:
//!                  resume? → tune → fit final → predict test / cross-study
//!                  → randomization tests → robustness trials
//!        → EVALUATE → AGGREGATE (tables, normalization) → DONE
//! ```
//!
//! ## Failure isolation (Jidoka)
//!
//! Splitting and configuration problems stop the run before any model is
//! trained. Everything after that is isolated per run: adapter errors and
//! panics are caught, logged, and the run is recorded as
//! [`RunStatus::Failed`] with NaN metrics while sibling runs continue.
//!
//! ## Determinism
//!
//! Folds are split once per mode and shared by every model. Each fold derives
//! its own seed from the run seed, so a fold's results do not depend on
//! whether folds run sequentially or in parallel, nor in which order workers
//! finish; results are reassembled in fold order.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use anyhow::{anyhow, bail};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashSet;
use tracing::{debug, info, info_span, warn};

use super::evaluation::{
    evaluate_run, evaluate_run_grouped, group_axes, group_mean, normalize_against, summarize,
    EvaluationRow, GroupEvaluationRow, SummaryRow,
};
use super::writer::ResultWriter;
use super::{
    ArtifactRecord, ExperimentRecord, ExperimentStore, MetricRecord, RunConfig, RunKey, RunRecord,
    RunStatus, Setting,
};
use crate::dataset::{load_response_csv, FeatureDataset, ResponseDataset};
use crate::metrics::Metric;
use crate::model::{DrugResponseModel, Hyperparameters, ModelFactory, ModelKind};
use crate::randomization::{
    derive_seed, randomization_test_views, randomize_views, EntityKind, RandomizationTest,
};
use crate::splitter::{split_dataset, CvFold, GroupBy, SplitMode, SplitOptions};
use crate::transform::FittedTransformation;
use crate::{Error, Result};

/// Everything an experiment produced.
#[derive(Debug, Default)]
pub struct ExperimentOutcome {
    /// Experiment, run, metric and artifact records
    pub store: ExperimentStore,
    /// Predictions of every successful run
    pub predictions: BTreeMap<RunKey, ResponseDataset>,
    /// One row per run
    pub evaluation: Vec<EvaluationRow>,
    /// Test predictions evaluated per drug
    pub evaluation_per_drug: Vec<GroupEvaluationRow>,
    /// Test predictions evaluated per cell line
    pub evaluation_per_cell_line: Vec<GroupEvaluationRow>,
    /// Per run, the mean of the per-drug rows
    pub evaluation_mean_per_drug: Vec<EvaluationRow>,
    /// Per run, the mean of the per-cell-line rows
    pub evaluation_mean_per_cell_line: Vec<EvaluationRow>,
    /// Rows normalized against `NaiveMeanEffectsPredictor`
    pub evaluation_normalized: Vec<EvaluationRow>,
}

impl ExperimentOutcome {
    /// Mean metrics per (model, setting, split mode).
    #[must_use]
    pub fn summary(&self) -> Vec<SummaryRow> {
        summarize(&self.evaluation)
    }

    /// Mean over folds of the per-drug (or per-cell-line) means.
    #[must_use]
    pub fn group_summary(&self, group: GroupBy) -> Vec<SummaryRow> {
        match group {
            GroupBy::Drug => summarize(&self.evaluation_mean_per_drug),
            GroupBy::CellLine => summarize(&self.evaluation_mean_per_cell_line),
        }
    }

    /// Rows of failed runs.
    pub fn failed(&self) -> impl Iterator<Item = &EvaluationRow> {
        self.evaluation
            .iter()
            .filter(|row| row.status == RunStatus::Failed)
    }
}

/// Load the datasets named in `config` and run the configured built-in models.
///
/// # Errors
///
/// Returns error for an invalid configuration, unreadable datasets or
/// feature files, splitting failures, or failures writing results. Failures
/// of individual runs are recorded, not returned.
pub fn run_experiment(config: &RunConfig) -> Result<ExperimentOutcome> {
    config.validate()?;
    let response = load_dataset(config, &config.dataset_name)?;
    let cross_study = config
        .cross_study_datasets
        .iter()
        .map(|name| load_dataset(config, name))
        .collect::<Result<Vec<_>>>()?;

    let models = config.model_kinds()?;
    let baselines = config.baseline_kinds()?;
    let models: Vec<&dyn ModelFactory> = models.iter().map(|k| k as &dyn ModelFactory).collect();
    let baselines: Vec<&dyn ModelFactory> =
        baselines.iter().map(|k| k as &dyn ModelFactory).collect();

    drug_response_experiment(config, &response, &cross_study, &models, &baselines)
}

fn load_dataset(config: &RunConfig, name: &str) -> Result<ResponseDataset> {
    let path = config.data_path.join(name).join("response.csv");
    let dataset = load_response_csv(&path, name)?;
    info!(dataset = name, records = dataset.len(), "loaded response data");
    Ok(dataset)
}

/// Run an experiment on already loaded data with arbitrary model factories.
///
/// `config.models` and `config.baselines` are ignored here; `models` and
/// `baselines` are used instead. Baselines skip randomization and robustness
/// runs, as do models whose factory reports [`ModelFactory::is_baseline_only`].
///
/// # Errors
///
/// See [`run_experiment`].
pub fn drug_response_experiment(
    config: &RunConfig,
    response: &ResponseDataset,
    cross_study: &[ResponseDataset],
    models: &[&dyn ModelFactory],
    baselines: &[&dyn ModelFactory],
) -> Result<ExperimentOutcome> {
    config.validate_settings()?;
    if models.is_empty() {
        return Err(Error::Configuration("at least one model is required".to_string()));
    }

    let writer = config
        .path_out
        .as_deref()
        .map(|path_out| ResultWriter::new(path_out, &config.run_id));

    let plans: Vec<ModelPlan<'_>> = models
        .iter()
        .map(|&factory| ModelPlan {
            factory,
            baseline: factory.is_baseline_only(),
        })
        .chain(baselines.iter().map(|&factory| ModelPlan {
            factory,
            baseline: true,
        }))
        .collect();

    let mut store = ExperimentStore::new();
    store.add_experiment(
        ExperimentRecord::builder(&config.run_id, &config.dataset_name)
            .algorithms(plans.iter().map(|plan| plan.factory.name().to_string()))
            .config(serde_json::to_value(config)?)
            .build(),
    );
    if let Some(writer) = &writer {
        store.add_artifact(writer.write_config(config)?);
    }

    let options = SplitOptions {
        n_splits: config.n_cv_splits,
        split_validation: true,
        split_early_stopping: true,
        validation_ratio: config.validation_ratio,
        seed: config.seed,
    };

    let splits = config
        .test_modes
        .iter()
        .map(|&split_mode| -> Result<(SplitMode, Vec<CvFold>)> {
            let folds = split_dataset(split_mode, response, &options)?;
            info!(%split_mode, folds = folds.len(), "split response data");
            Ok((split_mode, folds))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut runs = Vec::new();
    for plan in &plans {
        let inputs = ModelInputs::load(plan, config, cross_study)?;
        for (split_mode, folds) in &splits {
            let ctx = FoldContext {
                config,
                plan,
                inputs: &inputs,
                split_mode: *split_mode,
                writer: writer.as_ref(),
            };
            info!(model = plan.factory.name(), %split_mode, "running folds");
            runs.extend(run_folds(&ctx, folds).into_iter().flatten());
        }
    }

    collate(config, store, runs, writer.as_ref())
}

struct ModelPlan<'a> {
    factory: &'a dyn ModelFactory,
    baseline: bool,
}

/// Per-model data shared read-only by all folds.
struct ModelInputs {
    cell_line_views: Vec<String>,
    drug_views: Vec<String>,
    early_stopping: bool,
    single_drug: bool,
    hyperparameter_set: Vec<Hyperparameters>,
    randomization_tests: Vec<RandomizationTest>,
    cell_line_features: FeatureDataset,
    drug_features: Option<FeatureDataset>,
    cross_study: Vec<CrossStudyInput>,
}

struct CrossStudyInput {
    dataset: ResponseDataset,
    cell_line_features: FeatureDataset,
    drug_features: Option<FeatureDataset>,
}

impl ModelInputs {
    fn load(
        plan: &ModelPlan<'_>,
        config: &RunConfig,
        cross_study: &[ResponseDataset],
    ) -> Result<Self> {
        let template = plan.factory.instantiate();
        let cell_line_views: Vec<&str> = template.cell_line_views().to_vec();
        let drug_views: Vec<&str> = template.drug_views().to_vec();

        let randomization_tests = if plan.baseline {
            Vec::new()
        } else {
            randomization_test_views(&config.randomization_modes, &cell_line_views, &drug_views)
        };

        let mut inputs = Self {
            cell_line_views: cell_line_views.iter().map(|v| (*v).to_string()).collect(),
            drug_views: drug_views.iter().map(|v| (*v).to_string()).collect(),
            early_stopping: template.early_stopping(),
            single_drug: template.is_single_drug_model(),
            hyperparameter_set: template.hyperparameter_set(),
            randomization_tests,
            cell_line_features: template
                .load_cell_line_features(&config.data_path, &config.dataset_name)?,
            drug_features: template.load_drug_features(&config.data_path, &config.dataset_name)?,
            cross_study: Vec::with_capacity(cross_study.len()),
        };

        for dataset in cross_study {
            let name = dataset.dataset_name();
            let cell_line_features = template.load_cell_line_features(&config.data_path, name)?;
            let drug_features = template.load_drug_features(&config.data_path, name)?;
            let dataset = inputs.restrict(dataset, &cell_line_features, drug_features.as_ref())?;
            inputs.cross_study.push(CrossStudyInput {
                dataset,
                cell_line_features,
                drug_features,
            });
        }
        Ok(inputs)
    }

    /// Keep only records whose cell line and drug have every required view.
    fn restrict(
        &self,
        dataset: &ResponseDataset,
        cell_line_features: &FeatureDataset,
        drug_features: Option<&FeatureDataset>,
    ) -> Result<ResponseDataset> {
        let keep: Vec<bool> = dataset
            .cell_line_ids()
            .iter()
            .zip(dataset.drug_ids())
            .map(|(cell_line, drug)| {
                cell_line_features.covers(cell_line, &self.cell_line_views)
                    && drug_features.map_or(self.drug_views.is_empty(), |features| {
                        features.covers(drug, &self.drug_views)
                    })
            })
            .collect();
        let mut restricted = dataset.clone();
        restricted.mask(&keep)?;
        if restricted.len() < dataset.len() {
            debug!(
                dataset = dataset.dataset_name(),
                dropped = dataset.len() - restricted.len(),
                "dropped records without features"
            );
        }
        Ok(restricted)
    }

    fn restrict_own(&self, dataset: &ResponseDataset) -> Result<ResponseDataset> {
        self.restrict(dataset, &self.cell_line_features, self.drug_features.as_ref())
    }
}

struct FoldContext<'a> {
    config: &'a RunConfig,
    plan: &'a ModelPlan<'a>,
    inputs: &'a ModelInputs,
    split_mode: SplitMode,
    writer: Option<&'a ResultWriter>,
}

/// Datasets of one fold as seen by one model.
struct FoldData {
    train: ResponseDataset,
    validation: Option<ResponseDataset>,
    early_stopping: Option<ResponseDataset>,
    final_train: ResponseDataset,
    test: ResponseDataset,
}

impl FoldData {
    /// Early-stopping models tune on `validation_es` and stop on
    /// `early_stopping`; the final model trains on train plus whichever
    /// validation set was used for tuning.
    fn prepare(inputs: &ModelInputs, fold: &CvFold) -> anyhow::Result<Self> {
        let train = inputs.restrict_own(&fold.train)?;
        let test = inputs.restrict_own(&fold.test)?;
        let (validation, early_stopping) = if inputs.early_stopping {
            (fold.validation_es.as_ref(), fold.early_stopping.as_ref())
        } else {
            (fold.validation.as_ref(), None)
        };
        let validation = validation.map(|v| inputs.restrict_own(v)).transpose()?;
        let early_stopping = early_stopping.map(|v| inputs.restrict_own(v)).transpose()?;
        let final_train = match &validation {
            Some(validation) => ResponseDataset::union(&[&train, validation])?,
            None => train.clone(),
        };
        Ok(Self {
            train,
            validation,
            early_stopping,
            final_train,
            test,
        })
    }
}

/// A trained model (or one per drug) plus the response scaling it was fit in.
struct FittedModel {
    transformation: FittedTransformation,
    models: Fitted,
}

enum Fitted {
    Global(Box<dyn DrugResponseModel>),
    /// `None` marks a drug whose model failed to train.
    PerDrug(BTreeMap<String, Option<Box<dyn DrugResponseModel>>>),
}

impl FittedModel {
    fn predict(
        &self,
        target: &ResponseDataset,
        cell_line_features: &FeatureDataset,
        drug_features: Option<&FeatureDataset>,
    ) -> anyhow::Result<ResponseDataset> {
        let raw = match &self.models {
            Fitted::Global(model) => model.predict(
                target.cell_line_ids(),
                target.drug_ids(),
                cell_line_features,
                drug_features,
            )?,
            Fitted::PerDrug(models) => {
                let mut by_drug: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
                for (i, drug) in target.drug_ids().iter().enumerate() {
                    by_drug.entry(drug.as_str()).or_default().push(i);
                }
                let mut out = vec![f64::NAN; target.len()];
                for (drug, indices) in by_drug {
                    let Some(Some(model)) = models.get(drug) else {
                        continue;
                    };
                    let subset = target.select(&indices);
                    let predicted = guarded(|| {
                        model.predict(
                            subset.cell_line_ids(),
                            subset.drug_ids(),
                            cell_line_features,
                            drug_features,
                        )
                    });
                    match predicted {
                        Ok(values) if values.len() == indices.len() => {
                            for (&i, value) in indices.iter().zip(values) {
                                out[i] = value;
                            }
                        }
                        Ok(values) => warn!(
                            drug,
                            expected = indices.len(),
                            got = values.len(),
                            "single-drug model returned wrong number of predictions"
                        ),
                        Err(e) => warn!(drug, error = %e, "single-drug prediction failed"),
                    }
                }
                out
            }
        };
        if raw.len() != target.len() {
            bail!(
                "model returned {} predictions for {} pairs",
                raw.len(),
                target.len()
            );
        }
        let mut result = target.clone();
        result.set_predictions(self.transformation.inverse_transform(&raw))?;
        Ok(result)
    }
}

fn transformed(
    dataset: &ResponseDataset,
    transformation: &FittedTransformation,
) -> anyhow::Result<ResponseDataset> {
    let mut out = dataset.clone();
    out.set_response(transformation.transform(dataset.response()))?;
    Ok(out)
}

fn fit(
    ctx: &FoldContext<'_>,
    hyperparameters: &Hyperparameters,
    seed: u64,
    train: &ResponseDataset,
    early_stopping: Option<&ResponseDataset>,
    cell_line_features: &FeatureDataset,
    drug_features: Option<&FeatureDataset>,
) -> anyhow::Result<FittedModel> {
    let transformation = ctx.config.response_transformation.fit(train.response());
    let train = transformed(train, &transformation)?;
    let early_stopping = early_stopping
        .filter(|_| ctx.inputs.early_stopping)
        .map(|es| transformed(es, &transformation))
        .transpose()?;

    let build_and_train = |output: &ResponseDataset,
                           es: Option<&ResponseDataset>|
     -> anyhow::Result<Box<dyn DrugResponseModel>> {
        let mut model = ctx.plan.factory.instantiate();
        model.build_model(hyperparameters, seed)?;
        model.train(output, cell_line_features, drug_features, es)?;
        Ok(model)
    };

    let models = if ctx.inputs.single_drug {
        let mut per_drug = BTreeMap::new();
        for drug in train.unique_drugs() {
            let mut drug_train = train.clone();
            drug_train.mask(&train.drug_mask(&drug))?;
            let drug_es = match &early_stopping {
                Some(es) => {
                    let mut subset = es.clone();
                    subset.mask(&es.drug_mask(&drug))?;
                    Some(subset)
                }
                None => None,
            };
            let model = match guarded(|| build_and_train(&drug_train, drug_es.as_ref())) {
                Ok(model) => Some(model),
                Err(e) => {
                    warn!(
                        drug = %drug,
                        error = %e,
                        "single-drug model failed, its predictions will be NaN"
                    );
                    None
                }
            };
            per_drug.insert(drug, model);
        }
        Fitted::PerDrug(per_drug)
    } else {
        Fitted::Global(build_and_train(&train, early_stopping.as_ref())?)
    };

    Ok(FittedModel {
        transformation,
        models,
    })
}

/// Whether `score` beats the current best under `metric`.
///
/// The first candidate always wins an empty race, ties keep the incumbent,
/// and NaN never beats a number.
fn is_better(score: f64, current: Option<f64>, metric: Metric) -> bool {
    match current {
        None => true,
        Some(best) if best.is_nan() => !score.is_nan(),
        Some(best) => {
            !score.is_nan()
                && if metric.higher_is_better() {
                    score > best
                } else {
                    score < best
                }
        }
    }
}

fn tune(ctx: &FoldContext<'_>, data: &FoldData, seed: u64) -> anyhow::Result<Hyperparameters> {
    let grid = &ctx.inputs.hyperparameter_set;
    let first = grid
        .first()
        .cloned()
        .ok_or_else(|| anyhow!("{} has an empty hyperparameter set", ctx.plan.factory.name()))?;
    let validation = match &data.validation {
        Some(validation) if grid.len() > 1 && !validation.is_empty() => validation,
        _ => return Ok(first),
    };

    let metric = ctx.config.optim_metric;
    let inputs = ctx.inputs;
    let mut best: Option<(f64, &Hyperparameters)> = None;
    for hyperparameters in grid {
        let scored = guarded(|| {
            fit(
                ctx,
                hyperparameters,
                seed,
                &data.train,
                data.early_stopping.as_ref(),
                &inputs.cell_line_features,
                inputs.drug_features.as_ref(),
            )?
            .predict(validation, &inputs.cell_line_features, inputs.drug_features.as_ref())
        });
        let score = match scored {
            Ok(predicted) => predicted
                .predictions()
                .map_or(f64::NAN, |p| metric.compute(predicted.response(), p)),
            Err(e) => {
                warn!(error = %e, "hyperparameter combination failed");
                f64::NAN
            }
        };
        debug!(?hyperparameters, %metric, score, "scored hyperparameters");
        if is_better(score, best.map(|(s, _)| s), metric) {
            best = Some((score, hyperparameters));
        }
    }
    Ok(best.map_or(first, |(_, hyperparameters)| hyperparameters.clone()))
}

/// Cross-study records that were not seen in training under `split_mode`.
fn exclude_seen(
    dataset: &ResponseDataset,
    train: &ResponseDataset,
    split_mode: SplitMode,
) -> Result<ResponseDataset> {
    let keep: Vec<bool> = match split_mode.group() {
        None => {
            let seen: FxHashSet<(&str, &str)> = train
                .cell_line_ids()
                .iter()
                .zip(train.drug_ids())
                .map(|(c, d)| (c.as_str(), d.as_str()))
                .collect();
            dataset
                .cell_line_ids()
                .iter()
                .zip(dataset.drug_ids())
                .map(|(c, d)| !seen.contains(&(c.as_str(), d.as_str())))
                .collect()
        }
        Some(group) => {
            let seen: FxHashSet<&str> = group.ids(train).iter().map(String::as_str).collect();
            group
                .ids(dataset)
                .iter()
                .map(|id| !seen.contains(id.as_str()))
                .collect()
        }
    };
    let mut out = dataset.clone();
    out.mask(&keep)?;
    Ok(out)
}

/// Run `f`, turning a panic into an error.
fn guarded<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Err(anyhow!("model panicked: {message}"))
    })
}

/// Re-raise a shared failure for each run that depends on it.
fn replay(error: &anyhow::Error) -> anyhow::Error {
    anyhow!("{error:#}")
}

fn trained(model: Option<&anyhow::Result<FittedModel>>) -> anyhow::Result<&FittedModel> {
    match model {
        Some(Ok(model)) => Ok(model),
        Some(Err(e)) => Err(replay(e)),
        None => Err(anyhow!("final model was not trained")),
    }
}

/// One run of a fold and what it produced.
struct RunOutput {
    record: RunRecord,
    predictions: Option<ResponseDataset>,
    artifact: Option<ArtifactRecord>,
}

#[derive(Debug, Clone, Copy)]
enum Job {
    Test,
    CrossStudy(usize),
    Randomization(usize),
    Robustness(usize),
}

impl Job {
    const fn needs_final_model(self) -> bool {
        matches!(self, Self::Test | Self::CrossStudy(_))
    }
}

fn plan_jobs(ctx: &FoldContext<'_>, base: &RunKey) -> Vec<(RunKey, Job)> {
    let mut jobs = vec![(base.clone(), Job::Test)];
    for (i, cross) in ctx.inputs.cross_study.iter().enumerate() {
        let setting = Setting::CrossStudy(cross.dataset.dataset_name().to_string());
        jobs.push((base.with_setting(setting, 0), Job::CrossStudy(i)));
    }
    if !ctx.plan.baseline {
        for (i, test) in ctx.inputs.randomization_tests.iter().enumerate() {
            let setting = Setting::Randomization(test.name.clone());
            jobs.push((base.with_setting(setting, 0), Job::Randomization(i)));
        }
        for trial in 0..ctx.config.n_trials_robustness {
            jobs.push((base.with_setting(Setting::Robustness, trial), Job::Robustness(trial)));
        }
    }
    jobs
}

fn run_folds(ctx: &FoldContext<'_>, folds: &[CvFold]) -> Vec<Vec<RunOutput>> {
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        if ctx.config.multiprocessing {
            return folds
                .par_iter()
                .enumerate()
                .map(|(split_index, fold)| run_fold(ctx, split_index, fold))
                .collect();
        }
    }
    #[cfg(not(feature = "rayon"))]
    {
        if ctx.config.multiprocessing {
            warn!("built without the rayon feature, running folds sequentially");
        }
    }
    folds
        .iter()
        .enumerate()
        .map(|(split_index, fold)| run_fold(ctx, split_index, fold))
        .collect()
}

fn run_fold(ctx: &FoldContext<'_>, split_index: usize, fold: &CvFold) -> Vec<RunOutput> {
    let algorithm = ctx.plan.factory.name();
    let span = info_span!("fold", model = algorithm, split_mode = %ctx.split_mode, split_index);
    let _enter = span.enter();

    let base = RunKey::predictions(algorithm, ctx.split_mode, split_index);
    let experiment_id = ctx.config.run_id.as_str();
    let mut outputs = Vec::new();
    let mut pending = Vec::new();

    for (key, job) in plan_jobs(ctx, &base) {
        match resume(ctx, &key) {
            Some(output) => outputs.push(output),
            None => pending.push((key, job)),
        }
    }
    if pending.is_empty() {
        info!("all runs resumed from disk");
        return outputs;
    }

    let fold_seed = derive_seed(ctx.config.seed, split_index as u64);
    let inputs = ctx.inputs;
    let cell_line_features = &inputs.cell_line_features;
    let drug_features = inputs.drug_features.as_ref();

    let setup = guarded(|| {
        let data = FoldData::prepare(inputs, fold)?;
        let hyperparameters = tune(ctx, &data, fold_seed)?;
        Ok((data, hyperparameters))
    });
    let final_model = pending
        .iter()
        .any(|(_, job)| job.needs_final_model())
        .then(|| -> anyhow::Result<FittedModel> {
            let (data, hyperparameters) = setup.as_ref().map_err(replay)?;
            guarded(|| {
                fit(
                    ctx,
                    hyperparameters,
                    fold_seed,
                    &data.final_train,
                    data.early_stopping.as_ref(),
                    cell_line_features,
                    drug_features,
                )
            })
        });

    for (key, job) in pending {
        let mut record = RunRecord::new(key, experiment_id);
        record.start();
        if let Ok((_, hyperparameters)) = &setup {
            record.set_hyperparameters(hyperparameters.clone());
        }

        let result = guarded(|| {
            let (data, hyperparameters) = setup.as_ref().map_err(replay)?;
            match job {
                Job::Test => trained(final_model.as_ref())?.predict(
                    &data.test,
                    cell_line_features,
                    drug_features,
                ),
                Job::CrossStudy(i) => {
                    let cross = &inputs.cross_study[i];
                    let target = exclude_seen(&cross.dataset, &data.final_train, ctx.split_mode)?;
                    trained(final_model.as_ref())?.predict(
                        &target,
                        &cross.cell_line_features,
                        cross.drug_features.as_ref(),
                    )
                }
                Job::Randomization(i) => {
                    let test = &inputs.randomization_tests[i];
                    let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(fold_seed, i as u64 + 1));
                    let randomization_type = ctx.config.randomization_type;
                    let (cells, drugs): (Cow<'_, FeatureDataset>, Option<Cow<'_, FeatureDataset>>) =
                        match test.target {
                            EntityKind::CellLine => (
                                Cow::Owned(randomize_views(
                                    cell_line_features,
                                    &test.views,
                                    randomization_type,
                                    &mut rng,
                                )?),
                                drug_features.map(Cow::Borrowed),
                            ),
                            EntityKind::Drug => {
                                let features = drug_features.ok_or_else(|| {
                                    anyhow!("{} has no drug features to randomize", test.name)
                                })?;
                                (
                                    Cow::Borrowed(cell_line_features),
                                    Some(Cow::Owned(randomize_views(
                                        features,
                                        &test.views,
                                        randomization_type,
                                        &mut rng,
                                    )?)),
                                )
                            }
                        };
                    fit(
                        ctx,
                        hyperparameters,
                        fold_seed,
                        &data.final_train,
                        data.early_stopping.as_ref(),
                        &cells,
                        drugs.as_deref(),
                    )?
                    .predict(&data.test, &cells, drugs.as_deref())
                }
                Job::Robustness(trial) => fit(
                    ctx,
                    hyperparameters,
                    trial as u64,
                    &data.final_train,
                    data.early_stopping.as_ref(),
                    cell_line_features,
                    drug_features,
                )?
                .predict(&data.test, cell_line_features, drug_features),
            }
        });
        outputs.push(finish(ctx, record, result));
    }
    outputs
}

fn resume(ctx: &FoldContext<'_>, key: &RunKey) -> Option<RunOutput> {
    let writer = ctx.writer?;
    if ctx.config.overwrite {
        return None;
    }
    let dataset_name = match &key.setting {
        Setting::CrossStudy(dataset) => dataset.as_str(),
        _ => ctx.config.dataset_name.as_str(),
    };
    match writer.read_predictions(key, dataset_name) {
        Ok(Some(predictions)) => {
            debug!(run = %key, "resumed from existing predictions");
            let mut record = RunRecord::new(key.clone(), &ctx.config.run_id);
            record.complete(RunStatus::Resumed);
            Some(RunOutput {
                record,
                predictions: Some(predictions),
                artifact: None,
            })
        }
        Ok(None) => None,
        Err(e) => {
            warn!(run = %key, error = %e, "unreadable prediction file, recomputing");
            None
        }
    }
}

fn finish(
    ctx: &FoldContext<'_>,
    mut record: RunRecord,
    result: anyhow::Result<ResponseDataset>,
) -> RunOutput {
    let result = result.and_then(|predictions| {
        let artifact = match ctx.writer {
            Some(writer) => Some(writer.write_predictions(record.key(), &predictions)?),
            None => None,
        };
        Ok((predictions, artifact))
    });
    match result {
        Ok((predictions, artifact)) => {
            record.complete(RunStatus::Success);
            debug!(run = %record.key(), records = predictions.len(), "run finished");
            RunOutput {
                record,
                predictions: Some(predictions),
                artifact,
            }
        }
        Err(source) => {
            let error = Error::FoldExecution {
                run_key: record.run_id(),
                source,
            };
            warn!(error = %error, "run failed");
            record.fail(error.to_string());
            RunOutput {
                record,
                predictions: None,
                artifact: None,
            }
        }
    }
}

fn collate(
    config: &RunConfig,
    mut store: ExperimentStore,
    runs: Vec<RunOutput>,
    writer: Option<&ResultWriter>,
) -> Result<ExperimentOutcome> {
    let metrics = Metric::ALL;
    let mut outcome = ExperimentOutcome::default();

    for run in runs {
        let key = run.record.key().clone();
        let status = run.record.status();
        let row = evaluate_run(key.clone(), status, run.predictions.as_ref(), &metrics)?;
        let run_id = key.to_string();
        for (&metric, &value) in &row.metrics {
            store.add_metric(MetricRecord::new(&run_id, metric, key.split_index, value));
        }

        if let Some(predictions) = &run.predictions {
            if key.setting == Setting::Predictions {
                for axis in group_axes(key.split_mode) {
                    let rows = evaluate_run_grouped(&key, predictions, axis, &metrics)?;
                    let mean = group_mean(key.clone(), status, &rows, &metrics);
                    match axis {
                        GroupBy::Drug => {
                            outcome.evaluation_per_drug.extend(rows);
                            outcome.evaluation_mean_per_drug.push(mean);
                        }
                        GroupBy::CellLine => {
                            outcome.evaluation_per_cell_line.extend(rows);
                            outcome.evaluation_mean_per_cell_line.push(mean);
                        }
                    }
                }
            }
        }

        if let Some(artifact) = run.artifact {
            store.add_artifact(artifact);
        }
        if let Some(predictions) = run.predictions {
            outcome.predictions.insert(key, predictions);
        }
        outcome.evaluation.push(row);
        store.add_run(run.record);
    }

    outcome.evaluation.sort_by(|a, b| a.key.cmp(&b.key));
    outcome.evaluation_mean_per_drug.sort_by(|a, b| a.key.cmp(&b.key));
    outcome.evaluation_mean_per_cell_line.sort_by(|a, b| a.key.cmp(&b.key));
    let by_key_and_group = |a: &GroupEvaluationRow, b: &GroupEvaluationRow| {
        a.key.cmp(&b.key).then_with(|| a.group_id.cmp(&b.group_id))
    };
    outcome.evaluation_per_drug.sort_by(by_key_and_group);
    outcome.evaluation_per_cell_line.sort_by(by_key_and_group);
    outcome.evaluation_normalized =
        normalize_against(&outcome.evaluation, ModelKind::NaiveMeanEffectsPredictor.as_str());

    let failed = outcome.failed().count();
    info!(
        runs = outcome.evaluation.len(),
        failed,
        "experiment finished"
    );

    if let Some(writer) = writer {
        for &split_mode in &config.test_modes {
            write_tables(writer, &mut store, &outcome, split_mode, &metrics)?;
        }
    }
    outcome.store = store;
    Ok(outcome)
}

fn write_tables(
    writer: &ResultWriter,
    store: &mut ExperimentStore,
    outcome: &ExperimentOutcome,
    split_mode: SplitMode,
    metrics: &[Metric],
) -> Result<()> {
    let in_mode = |key: &RunKey| key.split_mode == split_mode;

    let run_tables = [
        ("evaluation_results.csv", &outcome.evaluation),
        ("evaluation_results_normalized.csv", &outcome.evaluation_normalized),
        ("evaluation_results_mean_per_drug.csv", &outcome.evaluation_mean_per_drug),
        ("evaluation_results_mean_per_cell_line.csv", &outcome.evaluation_mean_per_cell_line),
    ];
    for (file_name, table) in run_tables {
        let rows: Vec<&EvaluationRow> = table.iter().filter(|r| in_mode(&r.key)).collect();
        store.add_artifact(writer.write_evaluation(split_mode, file_name, &rows, metrics)?);
    }

    let rows: Vec<&GroupEvaluationRow> = outcome
        .evaluation_per_drug
        .iter()
        .filter(|r| in_mode(&r.key))
        .collect();
    store.add_artifact(writer.write_group_evaluation(
        split_mode,
        "evaluation_results_per_drug.csv",
        "drug_id",
        &rows,
        metrics,
    )?);

    let rows: Vec<&GroupEvaluationRow> = outcome
        .evaluation_per_cell_line
        .iter()
        .filter(|r| in_mode(&r.key))
        .collect();
    store.add_artifact(writer.write_group_evaluation(
        split_mode,
        "evaluation_results_per_cell_line.csv",
        "cell_line_id",
        &rows,
        metrics,
    )?);

    let test_runs: Vec<(&RunKey, &ResponseDataset)> = outcome
        .predictions
        .iter()
        .filter(|(key, _)| in_mode(key) && key.setting == Setting::Predictions)
        .collect();
    store.add_artifact(writer.write_true_vs_pred(split_mode, &test_runs)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_better_rules() {
        assert!(is_better(f64::NAN, None, Metric::Rmse));
        assert!(is_better(1.0, Some(f64::NAN), Metric::Rmse));
        assert!(!is_better(f64::NAN, Some(1.0), Metric::Rmse));
        assert!(is_better(0.5, Some(1.0), Metric::Rmse));
        assert!(!is_better(1.0, Some(1.0), Metric::Rmse));
        assert!(is_better(0.9, Some(0.5), Metric::Pearson));
        assert!(!is_better(0.1, Some(0.5), Metric::Pearson));
    }

    #[test]
    fn test_guarded_catches_panics() {
        let result: anyhow::Result<()> = guarded(|| panic!("exploded"));
        let message = result.unwrap_err().to_string();
        assert!(message.contains("exploded"), "{message}");
    }

    fn toy(cells: &[&str], drugs: &[&str]) -> ResponseDataset {
        let response = vec![0.0; cells.len()];
        ResponseDataset::new(
            "Other",
            cells.iter().map(|s| (*s).to_string()).collect(),
            drugs.iter().map(|s| (*s).to_string()).collect(),
            response,
        )
        .unwrap()
    }

    #[test]
    fn test_exclude_seen_per_mode() {
        let train = toy(&["A", "B"], &["X", "Y"]);
        let other = toy(&["A", "A", "C"], &["X", "Y", "X"]);

        let lpo = exclude_seen(&other, &train, SplitMode::Lpo).unwrap();
        assert_eq!(lpo.len(), 2);

        let lco = exclude_seen(&other, &train, SplitMode::Lco).unwrap();
        assert_eq!(lco.cell_line_ids(), &["C".to_string()]);

        let ldo = exclude_seen(&other, &train, SplitMode::Ldo).unwrap();
        assert!(ldo.is_empty());
    }
}
