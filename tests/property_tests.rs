//! Property-based tests for drp-eval
//!
//! - Split invariants: partition, disjointness, no group leakage, determinism
//! - Randomization invariants: permutations keep the value multiset and leave
//!   untouched views alone
//! - Run with `ProptestConfig::with_cases(64)`

use std::collections::BTreeSet;

use drp_eval::dataset::{FeatureDataset, FeatureValue, ResponseDataset};
use drp_eval::metrics::Metric;
use drp_eval::randomization::permute_features;
use drp_eval::splitter::{split_dataset, GroupBy, SplitMode, SplitOptions};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Sparse (cell line × drug) response matrix with unique pairs.
fn arb_dataset() -> impl Strategy<Value = ResponseDataset> {
    (4usize..10, 4usize..8)
        .prop_flat_map(|(n_cells, n_drugs)| {
            proptest::collection::vec(
                proptest::option::weighted(0.8, -5.0f64..5.0),
                n_cells * n_drugs,
            )
            .prop_map(move |cells| (n_drugs, cells))
        })
        .prop_map(|(n_drugs, values)| {
            let mut cell_line_ids = Vec::new();
            let mut drug_ids = Vec::new();
            let mut response = Vec::new();
            for (i, value) in values.into_iter().enumerate() {
                if let Some(value) = value {
                    cell_line_ids.push(format!("CL{}", i / n_drugs));
                    drug_ids.push(format!("D{}", i % n_drugs));
                    response.push(value);
                }
            }
            ResponseDataset::new("prop", cell_line_ids, drug_ids, response).unwrap()
        })
}

fn arb_mode() -> impl Strategy<Value = SplitMode> {
    prop_oneof![Just(SplitMode::Lpo), Just(SplitMode::Lco), Just(SplitMode::Ldo)]
}

fn pairs(dataset: &ResponseDataset) -> Vec<(String, String)> {
    dataset
        .cell_line_ids()
        .iter()
        .cloned()
        .zip(dataset.drug_ids().iter().cloned())
        .collect()
}

fn units(mode: SplitMode, dataset: &ResponseDataset) -> usize {
    match mode.group() {
        None => dataset.len(),
        Some(GroupBy::CellLine) => dataset.unique_cell_lines().len(),
        Some(GroupBy::Drug) => dataset.unique_drugs().len(),
    }
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: test sets are disjoint and together cover every record
    #[test]
    fn prop_test_sets_partition(data in arb_dataset(), mode in arb_mode(), seed in any::<u64>()) {
        prop_assume!(units(mode, &data) >= 3);
        let options = SplitOptions {
            n_splits: 3,
            split_validation: true,
            split_early_stopping: true,
            validation_ratio: 0.2,
            seed,
        };
        let folds = split_dataset(mode, &data, &options).unwrap();

        let mut all: Vec<(String, String)> = folds.iter().flat_map(|f| pairs(&f.test)).collect();
        prop_assert_eq!(all.len(), data.len());
        all.sort();
        all.dedup();
        prop_assert_eq!(all.len(), data.len());
    }

    /// Property: train, validation and test never share a pair; group modes
    /// never share a group between test, train and the validation sets
    #[test]
    fn prop_no_leakage(data in arb_dataset(), mode in arb_mode(), seed in any::<u64>()) {
        prop_assume!(units(mode, &data) >= 3);
        let options = SplitOptions {
            n_splits: 3,
            split_validation: true,
            split_early_stopping: true,
            validation_ratio: 0.2,
            seed,
        };
        for fold in split_dataset(mode, &data, &options).unwrap() {
            let test: BTreeSet<(String, String)> = pairs(&fold.test).into_iter().collect();
            for (name, dataset) in fold.datasets().filter(|(name, _)| *name != "test") {
                for pair in pairs(dataset) {
                    prop_assert!(!test.contains(&pair), "{} shares {:?} with test", name, pair);
                }
            }
            if let Some(group) = mode.group() {
                prop_assert!(fold.leaked_groups(group).is_empty());

                let groups = |d: &ResponseDataset| -> BTreeSet<String> {
                    group.ids(d).iter().cloned().collect()
                };
                let train = groups(&fold.train);
                for (name, dataset) in fold.datasets() {
                    if name != "train" && name != "test" {
                        let held_out = groups(dataset);
                        prop_assert!(
                            train.is_disjoint(&held_out),
                            "train shares a group with {}",
                            name
                        );
                    }
                }
                if let (Some(es), Some(val_es)) = (&fold.early_stopping, &fold.validation_es) {
                    prop_assert!(groups(val_es).is_disjoint(&groups(es)));
                }
            }
        }
    }

    /// Property: same seed, same folds
    #[test]
    fn prop_split_deterministic(data in arb_dataset(), mode in arb_mode(), seed in any::<u64>()) {
        prop_assume!(units(mode, &data) >= 2);
        let options = SplitOptions {
            n_splits: 2,
            split_validation: true,
            split_early_stopping: false,
            validation_ratio: 0.25,
            seed,
        };
        let a = split_dataset(mode, &data, &options).unwrap();
        let b = split_dataset(mode, &data, &options).unwrap();
        prop_assert_eq!(a, b);
    }

    /// Property: permuting a view keeps its multiset and leaves other views alone
    #[test]
    fn prop_permutation_keeps_values(
        gex in proptest::collection::vec(-100i32..100, 2..12),
        seed in any::<u64>(),
    ) {
        let mut features = FeatureDataset::new();
        let identifiers: Vec<String> = (0..gex.len()).map(|i| format!("CL{i}")).collect();
        for (i, id) in identifiers.iter().enumerate() {
            features.insert(id, "gex", FeatureValue::Vector(vec![f64::from(gex[i])]));
            features.insert(id, "mut", FeatureValue::Vector(vec![i as f64]));
        }
        let views = vec!["gex".to_string(), "mut".to_string()];
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let permuted =
            permute_features(&features, &identifiers, &views[..1], &views, &mut rng).unwrap();

        let gex = |data: &FeatureDataset, id: &String| data.vector(id, "gex").unwrap()[0];
        let mut before: Vec<f64> = identifiers.iter().map(|id| gex(&features, id)).collect();
        let mut after: Vec<f64> = identifiers.iter().map(|id| gex(&permuted, id)).collect();
        before.sort_by(f64::total_cmp);
        after.sort_by(f64::total_cmp);
        prop_assert_eq!(before, after);

        for id in &identifiers {
            prop_assert_eq!(
                permuted.vector(id, "mut").unwrap(),
                features.vector(id, "mut").unwrap()
            );
        }
    }

    /// Property: error metrics are never negative, and zero on perfect predictions
    #[test]
    fn prop_error_metrics_non_negative(values in proptest::collection::vec(-10.0f64..10.0, 2..30)) {
        let shifted: Vec<f64> = values.iter().map(|v| v + 0.5).collect();
        for metric in [Metric::Rmse, Metric::Mse, Metric::Mae] {
            prop_assert!(metric.compute(&values, &shifted) >= 0.0);
            prop_assert!(metric.compute(&values, &values).abs() < 1e-12);
        }
    }
}
