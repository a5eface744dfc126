//! # drp-eval: Drug Response Prediction Benchmarking
//!
//! **Version**: 0.1.0
//!
//! drp-eval evaluates models that predict how strongly a drug inhibits a
//! cancer cell line. It splits response data so that pairs, cell lines or
//! drugs are unseen at test time, tunes and trains every model per fold,
//! probes models with feature randomization and seed robustness runs, and
//! writes per-run, per-drug and per-cell-line metric tables.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Poka-Yoke safety**: split invariants (disjoint, leakage free) are
//!   checked by the splitter and by property tests
//! - **Jidoka**: a failing model run is recorded as failed with NaN metrics;
//!   configuration and splitting errors stop the experiment up front
//! - **Genchi Genbutsu**: every random choice takes an explicit seed, so a
//!   run is reproducible fold by fold, sequential or parallel
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use drp_eval::experiment::{run_experiment, RunConfig};
//! use drp_eval::splitter::SplitMode;
//!
//! let config = RunConfig::new("my_run", "GDSC1", "data")
//!     .with_models(["LinearRegression"])
//!     .with_test_modes([SplitMode::Lpo, SplitMode::Ldo])
//!     .with_path_out("results", false);
//!
//! let outcome = run_experiment(&config)?;
//! for row in outcome.summary() {
//!     println!("{} {} {}: {:?}", row.algorithm, row.setting, row.split_mode, row.metrics);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod dataset;
pub mod error;
pub mod experiment;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod randomization;
pub mod splitter;
pub mod transform;

pub use error::{Error, Result};
