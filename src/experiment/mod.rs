//! Experiment tracking and execution
//!
//! Records what an experiment ran and how each run ended, and drives the
//! cross-validation matrix that produces them.
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentRecord (1) ──< RunRecord (N)  keyed by RunKey
//!                              │           {algorithm}_{setting}_{mode}_{split}_{cv}
//!                              ├──< MetricRecord (N)
//!                              └──< ArtifactRecord (N) [files under {path_out}/{run_id}]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use drp_eval::experiment::{ExperimentRecord, MetricRecord, RunKey, RunRecord, RunStatus};
//! use drp_eval::metrics::Metric;
//! use drp_eval::splitter::SplitMode;
//!
//! let experiment = ExperimentRecord::new("my_run", "GDSC1");
//!
//! let key = RunKey::predictions("NaivePredictor", SplitMode::Lco, 0);
//! let mut run = RunRecord::new(key, experiment.experiment_id());
//! run.start();
//!
//! let metric = MetricRecord::new(run.run_id(), Metric::Pearson, 0, 0.12);
//! assert_eq!(metric.run_id(), "NaivePredictor_predictions_LCO_0_0");
//!
//! run.complete(RunStatus::Success);
//! ```

mod artifact_record;
mod config;
mod driver;
pub mod evaluation;
mod experiment_record;
mod metric_record;
mod run_record;
mod store;
mod writer;

pub use artifact_record::ArtifactRecord;
pub use config::{RunConfig, MANDATORY_BASELINES};
pub use driver::{drug_response_experiment, run_experiment, ExperimentOutcome};
pub use experiment_record::{ExperimentRecord, ExperimentRecordBuilder};
pub use metric_record::{MetricRecord, MetricRecordBuilder};
pub use run_record::{RunKey, RunRecord, RunRecordBuilder, RunStatus, Setting};
pub use store::ExperimentStore;
pub use writer::ResultWriter;
