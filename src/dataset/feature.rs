//! Feature datasets: entity → view → payload

use std::collections::BTreeMap;

use petgraph::graph::UnGraph;

use crate::{Error, Result};

/// Per-node or per-edge attributes of a feature graph.
pub type Attributes = BTreeMap<String, f64>;

/// Molecular (or any) feature graph with attributed nodes and edges.
pub type MolGraph = UnGraph<Attributes, Attributes>;

/// Payload of one feature view for one entity.
#[derive(Debug, Clone)]
pub enum FeatureValue {
    /// Dense numeric vector (gene expression, fingerprints, ...)
    Vector(Vec<f64>),
    /// Attributed graph (molecular graph, interaction network, ...)
    Graph(MolGraph),
}

impl FeatureValue {
    /// Borrow the vector payload, if this is a vector view.
    #[must_use]
    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            Self::Vector(values) => Some(values),
            Self::Graph(_) => None,
        }
    }

    /// Borrow the graph payload, if this is a graph view.
    #[must_use]
    pub const fn as_graph(&self) -> Option<&MolGraph> {
        match self {
            Self::Graph(graph) => Some(graph),
            Self::Vector(_) => None,
        }
    }
}

impl From<Vec<f64>> for FeatureValue {
    fn from(values: Vec<f64>) -> Self {
        Self::Vector(values)
    }
}

/// Mapping from entity identifier (cell line or drug) to its feature views.
///
/// Entities are kept in identifier order so that iteration, and therefore
/// every seeded randomization over it, is reproducible.
#[derive(Debug, Clone, Default)]
pub struct FeatureDataset {
    features: BTreeMap<String, BTreeMap<String, FeatureValue>>,
}

impl FeatureDataset {
    /// Create an empty feature dataset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether no entity is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Entity identifiers, sorted.
    #[must_use]
    pub fn identifiers(&self) -> Vec<String> {
        self.features.keys().cloned().collect()
    }

    /// Union of the view names present on any entity, sorted.
    #[must_use]
    pub fn views(&self) -> Vec<String> {
        let mut views: Vec<String> = self
            .features
            .values()
            .flat_map(|views| views.keys().cloned())
            .collect();
        views.sort();
        views.dedup();
        views
    }

    /// Insert (or replace) one view of one entity.
    pub fn insert(
        &mut self,
        entity: impl Into<String>,
        view: impl Into<String>,
        value: FeatureValue,
    ) {
        self.features
            .entry(entity.into())
            .or_default()
            .insert(view.into(), value);
    }

    /// Look up one view of one entity.
    #[must_use]
    pub fn get(&self, entity: &str, view: &str) -> Option<&FeatureValue> {
        self.features.get(entity).and_then(|views| views.get(view))
    }

    /// All views of one entity.
    #[must_use]
    pub fn entity(&self, entity: &str) -> Option<&BTreeMap<String, FeatureValue>> {
        self.features.get(entity)
    }

    /// Whether `entity` carries every view in `views` (vacuously true for none).
    #[must_use]
    pub fn covers<S: AsRef<str>>(&self, entity: &str, views: &[S]) -> bool {
        views.is_empty()
            || self
                .features
                .get(entity)
                .is_some_and(|present| views.iter().all(|v| present.contains_key(v.as_ref())))
    }

    /// Identifiers of the entities that carry every view in `views`.
    #[must_use]
    pub fn identifiers_with_views<S: AsRef<str>>(&self, views: &[S]) -> Vec<String> {
        self.features
            .keys()
            .filter(|id| self.covers(id, views))
            .cloned()
            .collect()
    }

    /// Look up a vector view, failing with [`Error::MissingFeature`].
    ///
    /// # Errors
    ///
    /// Returns an error if the entity or view is missing or the view is not a
    /// vector.
    pub fn vector(&self, entity: &str, view: &str) -> Result<&[f64]> {
        self.get(entity, view)
            .and_then(FeatureValue::as_vector)
            .ok_or_else(|| Error::MissingFeature {
                entity: entity.to_string(),
                view: view.to_string(),
            })
    }

    /// Stack the vector view of each requested entity into rows, in request order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingFeature`] for the first entity lacking the view.
    pub fn feature_matrix<S: AsRef<str>>(&self, ids: &[S], view: &str) -> Result<Vec<Vec<f64>>> {
        ids.iter()
            .map(|id| self.vector(id.as_ref(), view).map(<[f64]>::to_vec))
            .collect()
    }

    /// Apply `function` elementwise to every vector payload of `view`.
    pub fn apply<F: Fn(f64) -> f64>(&mut self, view: &str, function: F) {
        for views in self.features.values_mut() {
            if let Some(FeatureValue::Vector(values)) = views.get_mut(view) {
                for value in values.iter_mut() {
                    *value = function(*value);
                }
            }
        }
    }
}

impl FromIterator<(String, BTreeMap<String, FeatureValue>)> for FeatureDataset {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = (String, BTreeMap<String, FeatureValue>)>,
    {
        Self {
            features: iter.into_iter().collect(),
        }
    }
}
