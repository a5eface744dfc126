//! Experiment Schema Tests
//!
//! Records, run keys and the in-memory store, independent of the driver.

use drp_eval::experiment::{
    ArtifactRecord, ExperimentRecord, ExperimentStore, MetricRecord, RunKey, RunRecord, RunStatus,
    Setting,
};
use drp_eval::metrics::Metric;
use drp_eval::splitter::SplitMode;

// =============================================================================
// ExperimentRecord Tests
// =============================================================================

#[test]
fn test_experiment_record_creation() {
    let record = ExperimentRecord::new("my_run", "GDSC1");

    assert_eq!(record.experiment_id(), "my_run");
    assert_eq!(record.dataset_name(), "GDSC1");
    assert!(record.algorithms().is_empty());
    assert!(record.created_at().timestamp() > 0);
    assert!(record.config().is_none());
}

#[test]
fn test_experiment_record_with_config() {
    let config = serde_json::json!({
        "n_cv_splits": 5,
        "test_mode": ["LPO", "LDO"],
    });

    let record = ExperimentRecord::builder("my_run", "GDSC2")
        .algorithms(["LinearRegression", "NaivePredictor"])
        .config(config.clone())
        .build();

    assert_eq!(record.algorithms(), ["LinearRegression", "NaivePredictor"]);
    assert_eq!(record.config(), Some(&config));
}

#[test]
fn test_experiment_record_serialization() {
    let record = ExperimentRecord::new("my_run", "CCLE");

    let json = serde_json::to_string(&record).expect("serialization failed");
    let deserialized: ExperimentRecord =
        serde_json::from_str(&json).expect("deserialization failed");

    assert_eq!(record, deserialized);
}

// =============================================================================
// RunKey / RunRecord Tests
// =============================================================================

#[test]
fn test_run_key_rendering() {
    let key = RunKey::predictions("LinearRegression", SplitMode::Lpo, 3);
    assert_eq!(key.to_string(), "LinearRegression_predictions_LPO_3_0");

    let cross = key.with_setting(Setting::CrossStudy("CTRPv2".into()), 0);
    assert_eq!(cross.to_string(), "LinearRegression_cross-study-CTRPv2_LPO_3_0");

    let randomized = key.with_setting(Setting::Randomization("SVRD_fingerprints".into()), 0);
    assert_eq!(
        randomized.to_string(),
        "LinearRegression_randomize-SVRD_fingerprints_LPO_3_0"
    );

    let trial = key.with_setting(Setting::Robustness, 4);
    assert_eq!(trial.to_string(), "LinearRegression_robustness_LPO_3_4");
}

#[test]
fn test_run_keys_order_by_algorithm_then_setting_then_fold() {
    let mut keys = vec![
        RunKey::predictions("B", SplitMode::Lpo, 0),
        RunKey::predictions("A", SplitMode::Lpo, 1).with_setting(Setting::Robustness, 0),
        RunKey::predictions("A", SplitMode::Lpo, 1),
        RunKey::predictions("A", SplitMode::Lpo, 0),
    ];
    keys.sort();
    let rendered: Vec<String> = keys.iter().map(ToString::to_string).collect();
    assert_eq!(
        rendered,
        [
            "A_predictions_LPO_0_0",
            "A_predictions_LPO_1_0",
            "A_robustness_LPO_1_0",
            "B_predictions_LPO_0_0",
        ]
    );
}

#[test]
fn test_run_record_lifecycle() {
    let key = RunKey::predictions("NaivePredictor", SplitMode::Ldo, 0);
    let mut run = RunRecord::new(key.clone(), "my_run");

    assert_eq!(run.key(), &key);
    assert_eq!(run.run_id(), "NaivePredictor_predictions_LDO_0_0");
    assert_eq!(run.status(), RunStatus::Pending);
    assert!(run.started_at().is_none());

    run.start();
    assert_eq!(run.status(), RunStatus::Running);
    assert!(run.started_at().is_some());
    assert!(run.ended_at().is_none());

    run.complete(RunStatus::Success);
    assert_eq!(run.status(), RunStatus::Success);
    assert!(run.ended_at().unwrap() >= run.started_at().unwrap());
    assert!(run.error().is_none());
}

#[test]
fn test_run_record_failure_keeps_message() {
    let mut run = RunRecord::new(RunKey::predictions("M", SplitMode::Lco, 2), "my_run");
    run.start();
    run.fail("feature view 'gene_expression' missing");

    assert_eq!(run.status(), RunStatus::Failed);
    assert_eq!(run.error(), Some("feature view 'gene_expression' missing"));
    assert!(!run.status().has_predictions());
}

#[test]
fn test_run_record_serialization() {
    let mut hyperparameters = drp_eval::model::Hyperparameters::new();
    hyperparameters.insert("learning_rate".into(), serde_json::json!(0.01));
    let mut run = RunRecord::builder(RunKey::predictions("M", SplitMode::Lpo, 0), "my_run")
        .hyperparameters(hyperparameters.clone())
        .build();
    run.start();

    let json = serde_json::to_string(&run).expect("serialization failed");
    let deserialized: RunRecord = serde_json::from_str(&json).expect("deserialization failed");

    assert_eq!(run, deserialized);
    assert_eq!(deserialized.hyperparameters(), Some(&hyperparameters));
}

// =============================================================================
// MetricRecord / ArtifactRecord Tests
// =============================================================================

#[test]
fn test_metric_record_with_explicit_timestamp() {
    use chrono::{TimeZone, Utc};
    let ts = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();

    let metric = MetricRecord::builder("run", Metric::Spearman, 1, 0.42)
        .timestamp(ts)
        .build();

    assert_eq!(metric.timestamp(), ts);
    assert_eq!(metric.metric(), Metric::Spearman);
    assert_eq!(metric.split_index(), 1);
}

#[test]
fn test_nan_metric_survives_in_memory() {
    let metric = MetricRecord::new("run", Metric::Pearson, 0, f64::NAN);
    assert!(metric.is_nan());
}

#[test]
fn test_artifact_record_creation() {
    let artifact = ArtifactRecord::new(
        "my_run",
        "LPO/evaluation_results.csv",
        "/results/my_run/LPO/evaluation_results.csv",
        2048,
    );

    assert_eq!(artifact.experiment_id(), "my_run");
    assert_eq!(artifact.key(), "LPO/evaluation_results.csv");
    assert_eq!(artifact.size_bytes(), 2048);
    assert!(artifact.path().is_absolute());
}

// =============================================================================
// ExperimentStore Tests
// =============================================================================

#[test]
fn test_experiment_store_queries() {
    let mut store = ExperimentStore::new();
    store.add_experiment(ExperimentRecord::new("my_run", "GDSC1"));

    for fold in 0..3 {
        let key = RunKey::predictions("LinearRegression", SplitMode::Lco, fold);
        let mut run = RunRecord::new(key.clone(), "my_run");
        if fold == 1 {
            run.fail("diverged");
        } else {
            run.complete(RunStatus::Success);
        }
        store.add_metric(MetricRecord::new(key.to_string(), Metric::Rmse, fold, 1.0 + fold as f64));
        store.add_run(run);
    }

    assert_eq!(store.experiment_count(), 1);
    assert_eq!(store.get_runs_for_experiment("my_run").len(), 3);
    assert_eq!(store.runs_with_status(RunStatus::Failed).len(), 1);
    assert_eq!(
        store.metric_series(
            "LinearRegression",
            &Setting::Predictions,
            SplitMode::Lco,
            Metric::Rmse
        ),
        vec![1.0, 2.0, 3.0]
    );
    assert!(store
        .metric_series("LinearRegression", &Setting::Robustness, SplitMode::Lco, Metric::Rmse)
        .is_empty());
}
