//! Cross-validation splitting: Leave-Pairs-Out, Leave-Cell-line-Out, Leave-Drug-Out
//!
//! **Problem**: a test cell line (or drug) that also appears in training
//! leaks information and inflates every metric computed on that fold.
//!
//! **Solution**: group k-fold over whole cell lines / drugs, with validation
//! and early-stopping sets carved out at the group level as well.
//!
//! Poka-Yoke: every split is driven by an explicit seed through a
//! platform-stable RNG (`ChaCha8Rng`), so the same input and seed give the
//! same folds everywhere.

use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::ResponseDataset;
use crate::{Error, Result};

/// Number of sub-folds used to carve the early-stopping set out of validation.
const EARLY_STOPPING_SUBFOLDS: usize = 4;

/// Cross-validation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SplitMode {
    /// Leave random pairs out
    #[serde(rename = "LPO")]
    Lpo,
    /// Leave cell lines out
    #[serde(rename = "LCO")]
    Lco,
    /// Leave drugs out
    #[serde(rename = "LDO")]
    Ldo,
}

impl SplitMode {
    /// Short name used in run keys and output paths.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lpo => "LPO",
            Self::Lco => "LCO",
            Self::Ldo => "LDO",
        }
    }

    /// Entity held out by this mode, if any.
    #[must_use]
    pub const fn group(self) -> Option<GroupBy> {
        match self {
            Self::Lpo => None,
            Self::Lco => Some(GroupBy::CellLine),
            Self::Ldo => Some(GroupBy::Drug),
        }
    }
}

impl fmt::Display for SplitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SplitMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LPO" => Ok(Self::Lpo),
            "LCO" => Ok(Self::Lco),
            "LDO" => Ok(Self::Ldo),
            other => Err(Error::Configuration(format!(
                "invalid split mode '{other}', available modes are LPO, LCO, LDO"
            ))),
        }
    }
}

/// Entity used for group-leave-out splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupBy {
    /// Group by cell line ID
    CellLine,
    /// Group by drug ID
    Drug,
}

impl GroupBy {
    /// Group identifiers of `dataset`, one per record.
    #[must_use]
    pub fn ids(self, dataset: &ResponseDataset) -> &[String] {
        match self {
            Self::CellLine => dataset.cell_line_ids(),
            Self::Drug => dataset.drug_ids(),
        }
    }
}

impl FromStr for GroupBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cell_line" => Ok(Self::CellLine),
            "drug" => Ok(Self::Drug),
            other => Err(Error::InvalidArgument(format!(
                "group must be 'cell_line' or 'drug', but is '{other}'"
            ))),
        }
    }
}

/// One cross-validation fold.
#[derive(Debug, Clone, PartialEq)]
pub struct CvFold {
    /// Training records
    pub train: ResponseDataset,
    /// Held-out test records
    pub test: ResponseDataset,
    /// Held-out tuning records
    pub validation: Option<ResponseDataset>,
    /// Part of validation used for scoring when early stopping is active
    pub validation_es: Option<ResponseDataset>,
    /// Part of validation used to decide when to stop training
    pub early_stopping: Option<ResponseDataset>,
}

impl CvFold {
    /// All datasets of the fold with their role names.
    pub fn datasets(&self) -> impl Iterator<Item = (&'static str, &ResponseDataset)> {
        [
            ("train", Some(&self.train)),
            ("test", Some(&self.test)),
            ("validation", self.validation.as_ref()),
            ("validation_es", self.validation_es.as_ref()),
            ("early_stopping", self.early_stopping.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, dataset)| dataset.map(|d| (name, d)))
    }

    /// Group ids shared between `test` and any non-test set of this fold.
    #[must_use]
    pub fn leaked_groups(&self, group: GroupBy) -> Vec<String> {
        let test: FxHashSet<&str> = group.ids(&self.test).iter().map(String::as_str).collect();
        let mut leaked: Vec<String> = self
            .datasets()
            .filter(|(name, _)| *name != "test")
            .flat_map(|(_, dataset)| group.ids(dataset).iter())
            .filter(|id| test.contains(id.as_str()))
            .cloned()
            .collect();
        leaked.sort();
        leaked.dedup();
        leaked
    }
}

/// Options for [`split_dataset`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitOptions {
    /// Number of folds (at least 2)
    pub n_splits: usize,
    /// Carve a validation set out of each training fold
    pub split_validation: bool,
    /// Further split validation into validation_es / early_stopping
    pub split_early_stopping: bool,
    /// Fraction of training records (LPO) or groups (LCO/LDO) for validation
    pub validation_ratio: f64,
    /// Seed for every shuffle
    pub seed: u64,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            n_splits: 5,
            split_validation: true,
            split_early_stopping: true,
            validation_ratio: 0.1,
            seed: 42,
        }
    }
}

/// Split `dataset` into folds according to `mode`.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] for impossible split requests (too few
/// records or groups, early stopping without validation).
pub fn split_dataset(
    mode: SplitMode,
    dataset: &ResponseDataset,
    options: &SplitOptions,
) -> Result<Vec<CvFold>> {
    if options.split_early_stopping && !options.split_validation {
        return Err(Error::InvalidArgument(
            "early stopping sets require split_validation".to_string(),
        ));
    }

    let mut folds = match mode.group() {
        None => leave_pair_out(
            options.n_splits,
            dataset,
            options.split_validation,
            options.validation_ratio,
            options.seed,
        )?,
        Some(group) => leave_group_out(
            group,
            options.n_splits,
            dataset,
            options.split_validation,
            options.validation_ratio,
            options.seed,
        )?,
    };

    if options.split_early_stopping {
        for fold in &mut folds {
            if let Some(validation) = fold.validation.as_ref() {
                let (validation_es, early_stopping) =
                    split_early_stopping(validation, mode, options.seed)?;
                fold.validation_es = Some(validation_es);
                fold.early_stopping = Some(early_stopping);
            }
        }
    }

    debug!(
        mode = %mode,
        n_folds = folds.len(),
        records = dataset.len(),
        "split dataset"
    );
    Ok(folds)
}

/// Randomized k-fold over individual (cell line, drug) pairs.
///
/// Test partitions are pairwise disjoint and cover every record. The optional
/// validation set is disjoint from train at the pair level only.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `n_splits < 2` or exceeds the number
/// of records.
pub fn leave_pair_out(
    n_splits: usize,
    dataset: &ResponseDataset,
    split_validation: bool,
    validation_ratio: f64,
    seed: u64,
) -> Result<Vec<CvFold>> {
    check_n_splits(n_splits, dataset.len(), "records")?;
    check_ratio(validation_ratio)?;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let test_chunks = kfold_test_chunks(dataset.len(), n_splits, &mut rng);

    let mut folds = Vec::with_capacity(n_splits);
    for test_indices in test_chunks {
        let in_test: FxHashSet<usize> = test_indices.iter().copied().collect();
        let train_indices: Vec<usize> =
            (0..dataset.len()).filter(|i| !in_test.contains(i)).collect();

        let (train_indices, validation) = if split_validation {
            let (train, validation) = train_test_split(&train_indices, validation_ratio, &mut rng);
            (train, Some(dataset.select(&validation)))
        } else {
            (train_indices, None)
        };

        folds.push(CvFold {
            train: dataset.select(&train_indices),
            test: dataset.select(&test_indices),
            validation,
            validation_es: None,
            early_stopping: None,
        });
    }
    Ok(folds)
}

/// Group k-fold: whole cell lines or drugs are held out together.
///
/// Records are shuffled first so that groups of equal size are not always
/// assigned in input order. With `split_validation`, validation is built from
/// whole training groups as well.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `n_splits < 2` or exceeds the number
/// of distinct groups.
pub fn leave_group_out(
    group: GroupBy,
    n_splits: usize,
    dataset: &ResponseDataset,
    split_validation: bool,
    validation_ratio: f64,
    seed: u64,
) -> Result<Vec<CvFold>> {
    check_ratio(validation_ratio)?;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut shuffled = dataset.clone();
    shuffled.shuffle(&mut rng);
    let group_ids = group.ids(&shuffled);

    // Groups in order of first appearance in the shuffled records.
    let mut group_index: FxHashMap<&str, usize> = FxHashMap::default();
    let mut group_sizes: Vec<usize> = Vec::new();
    let mut record_group: Vec<usize> = Vec::with_capacity(group_ids.len());
    for id in group_ids {
        let next = group_sizes.len();
        let g = *group_index.entry(id.as_str()).or_insert(next);
        if g == next {
            group_sizes.push(0);
        }
        group_sizes[g] += 1;
        record_group.push(g);
    }
    check_n_splits(n_splits, group_sizes.len(), "groups")?;

    // Largest group first, each into the currently lightest fold.
    let mut order: Vec<usize> = (0..group_sizes.len()).collect();
    order.sort_by(|&a, &b| group_sizes[b].cmp(&group_sizes[a]));
    let mut fold_weight = vec![0usize; n_splits];
    let mut group_fold = vec![0usize; group_sizes.len()];
    for g in order {
        let lightest = (0..n_splits)
            .min_by_key(|&f| fold_weight[f])
            .unwrap_or_default();
        fold_weight[lightest] += group_sizes[g];
        group_fold[g] = lightest;
    }

    let mut folds = Vec::with_capacity(n_splits);
    for fold in 0..n_splits {
        let (test_indices, train_indices): (Vec<usize>, Vec<usize>) =
            (0..shuffled.len()).partition(|&i| group_fold[record_group[i]] == fold);

        let mut cv_fold = CvFold {
            train: shuffled.select(&train_indices),
            test: shuffled.select(&test_indices),
            validation: None,
            validation_es: None,
            early_stopping: None,
        };

        if split_validation {
            let unique_train_groups = cv_fold.train_unique(group);
            let (train_groups, validation_groups) =
                train_test_split(&unique_train_groups, validation_ratio, &mut rng);
            let train_groups: FxHashSet<&str> = train_groups.iter().map(String::as_str).collect();
            let validation_groups: FxHashSet<&str> =
                validation_groups.iter().map(String::as_str).collect();

            let pick = |groups: &FxHashSet<&str>| -> Vec<usize> {
                (0..shuffled.len())
                    .filter(|&i| groups.contains(group_ids[i].as_str()))
                    .collect()
            };
            cv_fold.train = shuffled.select(&pick(&train_groups));
            cv_fold.validation = Some(shuffled.select(&pick(&validation_groups)));
        }

        folds.push(cv_fold);
    }
    Ok(folds)
}

/// Split a validation set into (`validation_es`, `early_stopping`).
///
/// Takes the first fold of a 4-fold split in the same mode: three quarters
/// stay for scoring, one quarter decides when to stop. With fewer than two
/// records (or groups) nothing is carved out and `early_stopping` is empty.
///
/// # Errors
///
/// Propagates splitter errors (none expected for valid inputs).
pub fn split_early_stopping(
    validation: &ResponseDataset,
    mode: SplitMode,
    seed: u64,
) -> Result<(ResponseDataset, ResponseDataset)> {
    let units = match mode.group() {
        None => validation.len(),
        Some(group) => unique_count(group.ids(validation)),
    };
    if units < 2 {
        return Ok((validation.clone(), ResponseDataset::empty(validation.dataset_name())));
    }
    let n_splits = units.min(EARLY_STOPPING_SUBFOLDS);

    let mut folds = match mode.group() {
        None => leave_pair_out(n_splits, validation, false, 0.0, seed)?,
        Some(group) => leave_group_out(group, n_splits, validation, false, 0.0, seed)?,
    };
    let first = folds.swap_remove(0);
    Ok((first.train, first.test))
}

impl CvFold {
    fn train_unique(&self, group: GroupBy) -> Vec<String> {
        match group {
            GroupBy::CellLine => self.train.unique_cell_lines(),
            GroupBy::Drug => self.train.unique_drugs(),
        }
    }
}

/// Permute `0..n` and cut it into `k` consecutive chunks; the first `n % k`
/// chunks are one element larger.
fn kfold_test_chunks<R: Rng + ?Sized>(n: usize, k: usize, rng: &mut R) -> Vec<Vec<usize>> {
    let mut permutation: Vec<usize> = (0..n).collect();
    permutation.shuffle(rng);

    let base = n / k;
    let remainder = n % k;
    let mut chunks = Vec::with_capacity(k);
    let mut start = 0;
    for fold in 0..k {
        let size = base + usize::from(fold < remainder);
        chunks.push(permutation[start..start + size].to_vec());
        start += size;
    }
    chunks
}

/// Shuffle `items` and split off `ceil(ratio * n)` of them.
///
/// Both sides keep at least one item when `n >= 2`; with fewer items
/// everything stays on the train side.
fn train_test_split<T: Clone, R: Rng + ?Sized>(
    items: &[T],
    ratio: f64,
    rng: &mut R,
) -> (Vec<T>, Vec<T>) {
    let n = items.len();
    if n < 2 || ratio <= 0.0 {
        return (items.to_vec(), Vec::new());
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let n_test = ((ratio * n as f64).ceil() as usize).clamp(1, n - 1);

    let mut permutation: Vec<usize> = (0..n).collect();
    permutation.shuffle(rng);
    let test = permutation[..n_test].iter().map(|&i| items[i].clone()).collect();
    let train = permutation[n_test..].iter().map(|&i| items[i].clone()).collect();
    (train, test)
}

fn unique_count(ids: &[String]) -> usize {
    ids.iter().map(String::as_str).collect::<FxHashSet<_>>().len()
}

fn check_n_splits(n_splits: usize, available: usize, unit: &str) -> Result<()> {
    if n_splits < 2 {
        return Err(Error::InvalidArgument(format!(
            "n_splits must be at least 2, got {n_splits}"
        )));
    }
    if n_splits > available {
        return Err(Error::InvalidArgument(format!(
            "cannot build {n_splits} folds from {available} {unit}"
        )));
    }
    Ok(())
}

fn check_ratio(ratio: f64) -> Result<()> {
    if (0.0..1.0).contains(&ratio) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "validation_ratio must be in [0, 1), got {ratio}"
        )))
    }
}
