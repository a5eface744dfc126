//! Experiment driver integration tests
//!
//! Builds a small on-disk dataset (6 cell lines × 4 drugs, plus a second
//! study) and drives whole experiments through it.
//!
//! Toyota Way: Jidoka (a failing model never stops its siblings)

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use drp_eval::dataset::{FeatureDataset, ResponseDataset};
use drp_eval::experiment::{
    drug_response_experiment, run_experiment, RunConfig, RunKey, RunStatus, Setting,
};
use drp_eval::metrics::Metric;
use drp_eval::model::{DrugResponseModel, Hyperparameters, ModelFactory, ModelKind};
use drp_eval::randomization::{RandomizationMode, RandomizationType};
use drp_eval::splitter::{GroupBy, SplitMode};
use drp_eval::Error;

fn write_dataset(root: &Path, name: &str, cells: &[usize], drugs: &[usize]) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();

    let mut response = String::from("cell_line_id,drug_id,response\n");
    for &c in cells {
        for &d in drugs {
            let noise = 0.1 * ((c * 7 + d * 3) % 5) as f64;
            let value = c as f64 * 0.5 - d as f64 + noise;
            writeln!(response, "CL{c},D{d},{value}").unwrap();
        }
    }
    fs::write(dir.join("response.csv"), response).unwrap();

    let mut gex = String::from("cell_line_id,g0,g1,g2\n");
    for &c in cells {
        let (x, y, z) = (c as f64, ((c * c) % 7) as f64, 1.0 / (c as f64 + 1.0));
        writeln!(gex, "CL{c},{x},{y},{z}").unwrap();
    }
    fs::write(dir.join("gene_expression.csv"), gex).unwrap();

    let mut fingerprints = String::from("drug_id,f0,f1,f2\n");
    for &d in drugs {
        writeln!(fingerprints, "D{d},{},{},{}", d % 2, (d / 2) % 2, d as f64).unwrap();
    }
    fs::write(dir.join("fingerprints.csv"), fingerprints).unwrap();
}

fn fixture() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_dataset(dir.path(), "Toy", &[0, 1, 2, 3, 4, 5], &[0, 1, 2, 3]);
    // Overlaps Toy on CL4/CL5 and D0-D2, adds two unseen cell lines.
    write_dataset(dir.path(), "Other", &[4, 5, 8, 9], &[0, 1, 2]);
    dir
}

fn same(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || (a - b).abs() < 1e-12
}

#[test]
fn test_full_experiment_writes_results_and_resumes() {
    let data = fixture();
    let out = tempfile::tempdir().unwrap();
    let config = RunConfig::new("e2e", "Toy", data.path())
        .with_models(["LinearRegression"])
        .with_test_modes([SplitMode::Lco])
        .with_n_cv_splits(3)
        .with_randomization(
            [RandomizationMode::Svrc, RandomizationMode::Svrd],
            RandomizationType::Permutation,
        )
        .with_robustness_trials(2)
        .with_cross_study_datasets(["Other"])
        .with_path_out(out.path(), false);

    let outcome = run_experiment(&config).unwrap();

    // LinearRegression: test + cross-study + 2 randomizations + 2 trials per fold;
    // the two mandatory baselines: test + cross-study per fold.
    assert_eq!(outcome.evaluation.len(), 3 * 6 + 2 * 3 * 2);
    assert_eq!(outcome.failed().count(), 0);
    assert_eq!(outcome.store.run_count(), outcome.evaluation.len());
    assert_eq!(outcome.store.metric_count(), outcome.evaluation.len() * Metric::ALL.len());

    // LCO tests unseen cell lines: only per-drug breakdowns make sense.
    assert!(!outcome.evaluation_per_drug.is_empty());
    assert!(outcome.evaluation_per_cell_line.is_empty());
    assert_eq!(outcome.evaluation_mean_per_drug.len(), 3 * 3);
    assert!(outcome.evaluation_mean_per_cell_line.is_empty());
    assert_eq!(outcome.group_summary(GroupBy::Drug).len(), 3);
    assert_eq!(outcome.evaluation_normalized.len(), outcome.evaluation.len() - 6);
    assert!(outcome
        .evaluation_normalized
        .iter()
        .all(|row| row.key.algorithm != "NaiveMeanEffectsPredictor"));

    let cross = RunKey::predictions("LinearRegression", SplitMode::Lco, 0)
        .with_setting(Setting::CrossStudy("Other".into()), 0);
    let cross_predictions = &outcome.predictions[&cross];
    assert!(cross_predictions.cell_line_ids().iter().any(|c| c == "CL8"));

    let root = out.path().join("e2e");
    for file in [
        "config.json",
        "LCO/evaluation_results.csv",
        "LCO/evaluation_results_normalized.csv",
        "LCO/evaluation_results_per_drug.csv",
        "LCO/evaluation_results_per_cell_line.csv",
        "LCO/evaluation_results_mean_per_drug.csv",
        "LCO/evaluation_results_mean_per_cell_line.csv",
        "LCO/true_vs_pred.csv",
        "LCO/predictions/LinearRegression_predictions_LCO_0_0.csv",
        "LCO/predictions/LinearRegression_randomize-SVRC_gene_expression_LCO_1_0.csv",
        "LCO/predictions/LinearRegression_robustness_LCO_2_1.csv",
        "LCO/predictions/NaivePredictor_cross-study-Other_LCO_0_0.csv",
    ] {
        assert!(root.join(file).exists(), "missing {file}");
    }

    // Second invocation picks every run up from disk.
    let resumed = run_experiment(&config).unwrap();
    assert_eq!(resumed.evaluation.len(), outcome.evaluation.len());
    for (before, after) in outcome.evaluation.iter().zip(&resumed.evaluation) {
        assert_eq!(before.key, after.key);
        assert_eq!(after.status, RunStatus::Resumed);
        for (metric, value) in &before.metrics {
            assert!(same(*value, after.metrics[metric]), "{} {metric:?}", before.key);
        }
    }
}

#[test]
fn test_changed_config_needs_overwrite() {
    let data = fixture();
    let out = tempfile::tempdir().unwrap();
    let config = RunConfig::new("guarded", "Toy", data.path())
        .with_models(["NaiveDrugMeanPredictor"])
        .with_n_cv_splits(2)
        .with_path_out(out.path(), false);
    run_experiment(&config).unwrap();

    let changed = config.clone().with_seed(1);
    assert!(matches!(run_experiment(&changed).unwrap_err(), Error::Configuration(_)));

    let forced = changed.with_path_out(out.path(), true);
    let outcome = run_experiment(&forced).unwrap();
    assert!(outcome.evaluation.iter().all(|row| row.status == RunStatus::Success));
}

#[test]
fn test_parallel_folds_match_sequential() {
    let data = fixture();
    let config = RunConfig::new("par", "Toy", data.path())
        .with_models(["LinearRegression"])
        .with_test_modes([SplitMode::Lpo, SplitMode::Ldo])
        .with_n_cv_splits(2)
        .with_robustness_trials(1);

    let sequential = run_experiment(&config).unwrap();
    let parallel = run_experiment(&config.clone().with_multiprocessing(true)).unwrap();

    assert_eq!(sequential.predictions, parallel.predictions);
    let keys = |o: &drp_eval::experiment::ExperimentOutcome| -> Vec<RunKey> {
        o.evaluation.iter().map(|r| r.key.clone()).collect()
    };
    assert_eq!(keys(&sequential), keys(&parallel));
}

#[test]
fn test_single_drug_model_predicts_per_drug() {
    let data = fixture();
    let config = RunConfig::new("single", "Toy", data.path())
        .with_models(["SingleDrugLinearRegression"])
        .with_n_cv_splits(2);
    let outcome = run_experiment(&config).unwrap();

    let key = RunKey::predictions("SingleDrugLinearRegression", SplitMode::Lpo, 0);
    assert_eq!(outcome.store.get_run(&key).unwrap().status(), RunStatus::Success);
    let predictions = &outcome.predictions[&key];
    assert!(!predictions.is_empty());
    assert!(predictions.predictions().unwrap().iter().any(|p| p.is_finite()));
}

// ============================================================================
// Failure isolation
// ============================================================================

/// Fails in `train` or panics in `predict`.
struct Faulty {
    name: &'static str,
    panic_in_predict: bool,
}

impl DrugResponseModel for Faulty {
    fn model_name(&self) -> &str {
        self.name
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
        Ok(())
    }

    fn train(
        &mut self,
        _output: &ResponseDataset,
        _cell_line_input: &FeatureDataset,
        _drug_input: Option<&FeatureDataset>,
        _output_earlystopping: Option<&ResponseDataset>,
    ) -> anyhow::Result<()> {
        if self.panic_in_predict {
            Ok(())
        } else {
            anyhow::bail!("training exploded")
        }
    }

    fn predict(
        &self,
        cell_line_ids: &[String],
        _drug_ids: &[String],
        _cell_line_input: &FeatureDataset,
        _drug_input: Option<&FeatureDataset>,
    ) -> anyhow::Result<Vec<f64>> {
        assert!(!self.panic_in_predict, "boom");
        Ok(vec![0.0; cell_line_ids.len()])
    }
}

struct FaultyFactory(&'static str, bool);

impl ModelFactory for FaultyFactory {
    fn name(&self) -> &str {
        self.0
    }

    fn instantiate(&self) -> Box<dyn DrugResponseModel> {
        Box::new(Faulty {
            name: self.0,
            panic_in_predict: self.1,
        })
    }
}

fn in_memory_response() -> ResponseDataset {
    let mut cells = Vec::new();
    let mut drugs = Vec::new();
    let mut response = Vec::new();
    for c in 0..5 {
        for d in 0..3 {
            cells.push(format!("CL{c}"));
            drugs.push(format!("D{d}"));
            response.push(f64::from(c) - f64::from(d));
        }
    }
    ResponseDataset::new("Mem", cells, drugs, response).unwrap()
}

#[test]
fn test_failing_models_do_not_abort_siblings() {
    let config = RunConfig::new("faults", "Mem", "unused")
        .with_test_modes([SplitMode::Lpo])
        .with_n_cv_splits(3)
        .with_robustness_trials(1);
    let erroring = FaultyFactory("Erroring", false);
    let panicking = FaultyFactory("Panicking", true);
    let baseline = ModelKind::NaivePredictor;

    let outcome = drug_response_experiment(
        &config,
        &in_memory_response(),
        &[],
        &[&erroring, &panicking],
        &[&baseline],
    )
    .unwrap();

    // 2 faulty models × 3 folds × (test + robustness) + baseline × 3 folds
    assert_eq!(outcome.evaluation.len(), 2 * 3 * 2 + 3);
    for row in &outcome.evaluation {
        if row.key.algorithm == "NaivePredictor" {
            assert_eq!(row.status, RunStatus::Success);
            assert!(row.metrics[&Metric::Rmse].is_finite());
        } else {
            assert_eq!(row.status, RunStatus::Failed, "{}", row.key);
            assert!(row.metrics.values().all(|v| v.is_nan()));
        }
    }

    let key = RunKey::predictions("Erroring", SplitMode::Lpo, 1);
    let error = outcome.store.get_run(&key).unwrap().error().unwrap();
    assert!(error.contains("training exploded"), "{error}");
    assert!(error.contains("Erroring_predictions_LPO_1_0"), "{error}");

    let key = RunKey::predictions("Panicking", SplitMode::Lpo, 0);
    let error = outcome.store.get_run(&key).unwrap().error().unwrap();
    assert!(error.contains("boom"), "{error}");

    let summary = outcome.summary();
    let erroring = summary
        .iter()
        .find(|row| row.algorithm == "Erroring" && row.setting == Setting::Predictions)
        .unwrap();
    assert_eq!(erroring.n_failed, 3);
    assert_eq!(erroring.n_successful, 0);
}

/// Predicts zero and counts how often its cell line features are loaded.
struct Counting {
    loads: Arc<AtomicUsize>,
}

impl DrugResponseModel for Counting {
    fn model_name(&self) -> &str {
        "Counting"
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
        Ok(())
    }

    fn train(
        &mut self,
        _output: &ResponseDataset,
        _cell_line_input: &FeatureDataset,
        _drug_input: Option<&FeatureDataset>,
        _output_earlystopping: Option<&ResponseDataset>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn predict(
        &self,
        cell_line_ids: &[String],
        _drug_ids: &[String],
        _cell_line_input: &FeatureDataset,
        _drug_input: Option<&FeatureDataset>,
    ) -> anyhow::Result<Vec<f64>> {
        Ok(vec![0.0; cell_line_ids.len()])
    }

    fn load_cell_line_features(
        &self,
        _data_path: &Path,
        _dataset_name: &str,
    ) -> drp_eval::Result<FeatureDataset> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(FeatureDataset::new())
    }
}

struct CountingFactory(Arc<AtomicUsize>);

impl ModelFactory for CountingFactory {
    fn name(&self) -> &str {
        "Counting"
    }

    fn instantiate(&self) -> Box<dyn DrugResponseModel> {
        Box::new(Counting {
            loads: Arc::clone(&self.0),
        })
    }
}

#[test]
fn test_features_load_once_per_model() {
    let config = RunConfig::new("loads", "Mem", "unused")
        .with_test_modes([SplitMode::Lpo, SplitMode::Lco])
        .with_n_cv_splits(3);
    let loads = Arc::new(AtomicUsize::new(0));
    let counting = CountingFactory(Arc::clone(&loads));

    let outcome =
        drug_response_experiment(&config, &in_memory_response(), &[], &[&counting], &[]).unwrap();

    assert_eq!(outcome.evaluation.len(), 2 * 3);
    assert_eq!(outcome.failed().count(), 0);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[test]
fn test_split_errors_are_fatal() {
    let config = RunConfig::new("fatal", "Mem", "unused")
        .with_test_modes([SplitMode::Ldo])
        .with_n_cv_splits(5);
    let baseline = ModelKind::NaivePredictor;
    let err = drug_response_experiment(&config, &in_memory_response(), &[], &[&baseline], &[])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
}
