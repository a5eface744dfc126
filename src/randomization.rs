//! Feature randomization for ablation experiments
//!
//! Two flavours of perturbation:
//! - **Permutation**: every entity receives another entity's value for the
//!   randomized views. Each view's marginal distribution is unchanged, the
//!   link between features and response is dissolved.
//! - **Invariant**: values are regenerated while a coarse statistic is kept
//!   (per-entity mean and standard deviation for vectors, the degree
//!   sequence for graphs).
//!
//! Every function takes its RNG explicitly; nothing here touches global
//! random state.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use petgraph::graph::NodeIndex;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::dataset::{Attributes, FeatureDataset, FeatureValue, MolGraph};
use crate::{Error, Result};

/// Randomization ablation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RandomizationMode {
    /// Single view constant (cell lines): randomize all other cell line views
    #[serde(rename = "SVCC")]
    Svcc,
    /// Single view random (cell lines): randomize only this cell line view
    #[serde(rename = "SVRC")]
    Svrc,
    /// Single view constant (drugs): randomize all other drug views
    #[serde(rename = "SVCD")]
    Svcd,
    /// Single view random (drugs): randomize only this drug view
    #[serde(rename = "SVRD")]
    Svrd,
}

impl RandomizationMode {
    /// Short name used in test names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Svcc => "SVCC",
            Self::Svrc => "SVRC",
            Self::Svcd => "SVCD",
            Self::Svrd => "SVRD",
        }
    }

    /// Which entity's features the mode perturbs.
    #[must_use]
    pub const fn target(self) -> EntityKind {
        match self {
            Self::Svcc | Self::Svrc => EntityKind::CellLine,
            Self::Svcd | Self::Svrd => EntityKind::Drug,
        }
    }

    const fn keeps_single_view_constant(self) -> bool {
        matches!(self, Self::Svcc | Self::Svcd)
    }
}

impl fmt::Display for RandomizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RandomizationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SVCC" => Ok(Self::Svcc),
            "SVRC" => Ok(Self::Svrc),
            "SVCD" => Ok(Self::Svcd),
            "SVRD" => Ok(Self::Svrd),
            other => Err(Error::Configuration(format!(
                "invalid randomization mode '{other}', available modes are SVCC, SVRC, SVCD, SVRD"
            ))),
        }
    }
}

/// How randomized views are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RandomizationType {
    /// Reassign values between entities
    #[default]
    Permutation,
    /// Regenerate values, preserving mean/std or degree distribution
    Invariant,
}

impl FromStr for RandomizationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "permutation" => Ok(Self::Permutation),
            "invariant" => Ok(Self::Invariant),
            other => Err(Error::Configuration(format!(
                "invalid randomization type '{other}', choose 'permutation' or 'invariant'"
            ))),
        }
    }
}

/// Entity kind whose features a randomization test perturbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Cell line features
    CellLine,
    /// Drug features
    Drug,
}

/// One planned randomization experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RandomizationTest {
    /// Test name, e.g. `SVRC_gene_expression`
    pub name: String,
    /// Which feature dataset is perturbed
    pub target: EntityKind,
    /// Views to randomize in that dataset
    pub views: Vec<String>,
}

/// Plan the randomization tests for a model's views.
///
/// One test per (mode, view). Tests that would randomize nothing (a
/// "constant" mode on a model with a single view) are skipped.
#[must_use]
pub fn randomization_test_views(
    modes: &[RandomizationMode],
    cell_line_views: &[&str],
    drug_views: &[&str],
) -> Vec<RandomizationTest> {
    let mut tests = Vec::new();
    for &mode in modes {
        let views = match mode.target() {
            EntityKind::CellLine => cell_line_views,
            EntityKind::Drug => drug_views,
        };
        for &view in views {
            let randomized: Vec<String> = if mode.keeps_single_view_constant() {
                views
                    .iter()
                    .filter(|&&v| v != view)
                    .map(|v| (*v).to_string())
                    .collect()
            } else {
                vec![view.to_string()]
            };
            if randomized.is_empty() {
                continue;
            }
            tests.push(RandomizationTest {
                name: format!("{mode}_{view}"),
                target: mode.target(),
                views: randomized,
            });
        }
    }
    tests
}

/// Permute the given views between entities.
///
/// One permutation of `identifiers` is drawn; entity `identifiers[i]` takes
/// the permuted views from `perm[i]` and keeps its own value for every other
/// view in `all_views`.
///
/// # Errors
///
/// Returns [`Error::MissingFeature`] if an entity lacks one of `all_views`.
pub fn permute_features<R: Rng + ?Sized>(
    features: &FeatureDataset,
    identifiers: &[String],
    views_to_permute: &[String],
    all_views: &[String],
    rng: &mut R,
) -> Result<FeatureDataset> {
    let mut partners = identifiers.to_vec();
    partners.shuffle(rng);
    permute_features_with(features, identifiers, &partners, views_to_permute, all_views)
}

/// [`permute_features`] with an explicit partner assignment.
///
/// # Errors
///
/// Returns [`Error::LengthMismatch`] if `partners` and `identifiers` differ in
/// length, or [`Error::MissingFeature`] for absent views.
pub fn permute_features_with(
    features: &FeatureDataset,
    identifiers: &[String],
    partners: &[String],
    views_to_permute: &[String],
    all_views: &[String],
) -> Result<FeatureDataset> {
    if partners.len() != identifiers.len() {
        return Err(Error::length_mismatch(
            "permutation partners vs identifiers",
            identifiers.len(),
            partners.len(),
        ));
    }

    identifiers
        .iter()
        .zip(partners)
        .map(|(entity, partner)| {
            let views = all_views
                .iter()
                .map(|view| {
                    let source = if views_to_permute.contains(view) {
                        partner
                    } else {
                        entity
                    };
                    features
                        .get(source, view)
                        .cloned()
                        .map(|value| (view.clone(), value))
                        .ok_or_else(|| Error::MissingFeature {
                            entity: source.clone(),
                            view: view.clone(),
                        })
                })
                .collect::<Result<BTreeMap<_, _>>>()?;
            Ok((entity.clone(), views))
        })
        .collect()
}

/// Regenerate the given views while keeping a per-entity statistic.
///
/// Vectors are redrawn from a normal distribution with the entity's own mean
/// and standard deviation; graphs go through [`randomize_graph`]. Other views
/// are copied unchanged.
///
/// # Errors
///
/// Returns error if a normal distribution cannot be built from the data
/// (non-finite statistics).
pub fn randomize_features_invariant<R: Rng + ?Sized>(
    features: &FeatureDataset,
    views_to_randomize: &[String],
    rng: &mut R,
) -> Result<FeatureDataset> {
    let mut randomized = features.clone();
    for id in features.identifiers() {
        for view in views_to_randomize {
            let Some(value) = features.get(&id, view) else {
                continue;
            };
            let replacement = match value {
                FeatureValue::Vector(values) => FeatureValue::Vector(redraw_vector(values, rng)?),
                FeatureValue::Graph(graph) => FeatureValue::Graph(randomize_graph(graph, rng)),
            };
            randomized.insert(id.clone(), view.clone(), replacement);
        }
    }
    Ok(randomized)
}

/// Randomize the given views of a feature dataset with the requested method.
///
/// # Errors
///
/// See [`permute_features`] and [`randomize_features_invariant`].
pub fn randomize_views<R: Rng + ?Sized>(
    features: &FeatureDataset,
    views: &[String],
    randomization_type: RandomizationType,
    rng: &mut R,
) -> Result<FeatureDataset> {
    match randomization_type {
        RandomizationType::Permutation => {
            let all_views = features.views();
            let identifiers = features.identifiers_with_views(&all_views);
            permute_features(features, &identifiers, views, &all_views, rng)
        }
        RandomizationType::Invariant => randomize_features_invariant(features, views, rng),
    }
}

fn redraw_vector<R: Rng + ?Sized>(values: &[f64], rng: &mut R) -> Result<Vec<f64>> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std == 0.0 {
        return Ok(vec![mean; values.len()]);
    }
    let normal = Normal::new(mean, std)
        .map_err(|e| Error::InvalidArgument(format!("cannot redraw feature vector: {e}")))?;
    Ok((0..values.len()).map(|_| normal.sample(rng)).collect())
}

/// Degree-preserving graph randomization.
///
/// Builds an expected-degree (Chung–Lu) random graph over the input's degree
/// sequence: every node pair `(u, v)` is joined with probability
/// `min(d_u * d_v / sum(d), 1)`. Node `i` of the result is node `i` of the
/// input (same index, attributes copied); edge attributes are drawn uniformly
/// with replacement from the input's edges. No self-loops are generated.
#[must_use]
pub fn randomize_graph<R: Rng + ?Sized>(graph: &MolGraph, rng: &mut R) -> MolGraph {
    let mut randomized = MolGraph::with_capacity(graph.node_count(), graph.edge_count());
    for node in graph.node_indices() {
        randomized.add_node(graph[node].clone());
    }

    let edge_attributes: Vec<&Attributes> = graph.edge_weights().collect();
    if edge_attributes.is_empty() {
        return randomized;
    }

    #[allow(clippy::cast_precision_loss)]
    let degrees: Vec<f64> = graph
        .node_indices()
        .map(|node| graph.edges(node).count() as f64)
        .collect();
    let total: f64 = degrees.iter().sum();

    for u in 0..degrees.len() {
        for v in (u + 1)..degrees.len() {
            let p = (degrees[u] * degrees[v] / total).min(1.0);
            if p > 0.0 && rng.gen::<f64>() < p {
                let attributes = edge_attributes[rng.gen_range(0..edge_attributes.len())].clone();
                randomized.add_edge(NodeIndex::new(u), NodeIndex::new(v), attributes);
            }
        }
    }
    randomized
}

/// Derive an independent seed for a sub-stream (fold, trial, test).
///
/// splitmix64 finalizer over `base + stream`.
#[must_use]
pub const fn derive_seed(base: u64, stream: u64) -> u64 {
    let mut z = base.wrapping_add(stream.wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
