//! Response and feature datasets
//!
//! ## Schema Overview
//!
//! ```text
//! ResponseDataset (parallel arrays)         FeatureDataset
//!   cell_line_ids[i] ─────────────────────>   entity ──< view ── FeatureValue
//!   drug_ids[i]      ─────────────────────>   entity ──< view ── FeatureValue
//!   response[i]
//!   predictions[i]?   (set after a model has run)
//! ```
//!
//! Response datasets are created once per experiment input and then copied
//! and masked per fold and per drug. Every copy is an owned value, so a fold
//! can never mutate the dataset another fold is reading.

mod feature;
mod io;

pub use feature::{Attributes, FeatureDataset, FeatureValue, MolGraph};
pub use io::{
    load_feature_csv, load_response_csv, merge_views, read_predictions_csv, write_predictions_csv,
};

use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use rand::Rng;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A single measured (cell line, drug) response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    cell_line_id: String,
    drug_id: String,
    response: f64,
    dataset_name: String,
}

impl ResponseRecord {
    /// Create a new response record.
    #[must_use]
    pub fn new(
        cell_line_id: impl Into<String>,
        drug_id: impl Into<String>,
        response: f64,
        dataset_name: impl Into<String>,
    ) -> Self {
        Self {
            cell_line_id: cell_line_id.into(),
            drug_id: drug_id.into(),
            response,
            dataset_name: dataset_name.into(),
        }
    }

    /// Get the cell line ID.
    #[must_use]
    pub fn cell_line_id(&self) -> &str {
        &self.cell_line_id
    }

    /// Get the drug ID.
    #[must_use]
    pub fn drug_id(&self) -> &str {
        &self.drug_id
    }

    /// Get the measured response.
    #[must_use]
    pub const fn response(&self) -> f64 {
        self.response
    }

    /// Get the name of the dataset the record belongs to.
    #[must_use]
    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }
}

/// Ordered collection of response records stored as parallel arrays.
///
/// Invariant: `cell_line_ids`, `drug_ids` and `response` always have equal
/// length, and so do `predictions` once set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawResponseDataset")]
pub struct ResponseDataset {
    dataset_name: String,
    cell_line_ids: Vec<String>,
    drug_ids: Vec<String>,
    response: Vec<f64>,
    predictions: Option<Vec<f64>>,
}

/// Wire form of [`ResponseDataset`], validated through [`ResponseDataset::new`].
#[derive(Deserialize)]
struct RawResponseDataset {
    dataset_name: String,
    cell_line_ids: Vec<String>,
    drug_ids: Vec<String>,
    response: Vec<f64>,
    #[serde(default)]
    predictions: Option<Vec<f64>>,
}

impl TryFrom<RawResponseDataset> for ResponseDataset {
    type Error = Error;

    fn try_from(raw: RawResponseDataset) -> Result<Self> {
        let mut dataset =
            Self::new(raw.dataset_name, raw.cell_line_ids, raw.drug_ids, raw.response)?;
        if let Some(predictions) = raw.predictions {
            dataset.set_predictions(predictions)?;
        }
        Ok(dataset)
    }
}

impl ResponseDataset {
    /// Create a dataset from parallel arrays.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthMismatch`] if the arrays differ in length.
    pub fn new(
        dataset_name: impl Into<String>,
        cell_line_ids: Vec<String>,
        drug_ids: Vec<String>,
        response: Vec<f64>,
    ) -> Result<Self> {
        if cell_line_ids.len() != response.len() {
            return Err(Error::length_mismatch(
                "cell_line_ids vs response",
                response.len(),
                cell_line_ids.len(),
            ));
        }
        if drug_ids.len() != response.len() {
            return Err(Error::length_mismatch(
                "drug_ids vs response",
                response.len(),
                drug_ids.len(),
            ));
        }
        Ok(Self {
            dataset_name: dataset_name.into(),
            cell_line_ids,
            drug_ids,
            response,
            predictions: None,
        })
    }

    /// Create an empty dataset.
    #[must_use]
    pub fn empty(dataset_name: impl Into<String>) -> Self {
        Self {
            dataset_name: dataset_name.into(),
            cell_line_ids: Vec::new(),
            drug_ids: Vec::new(),
            response: Vec::new(),
            predictions: None,
        }
    }

    /// Build a dataset from records.
    ///
    /// The dataset name is taken from the first record; an empty iterator
    /// yields an empty, unnamed dataset.
    #[must_use]
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = ResponseRecord>,
    {
        let mut dataset = Self::empty("");
        for record in records {
            if dataset.is_empty() {
                dataset.dataset_name.clone_from(&record.dataset_name);
            }
            dataset.cell_line_ids.push(record.cell_line_id);
            dataset.drug_ids.push(record.drug_id);
            dataset.response.push(record.response);
        }
        dataset
    }

    /// Get the dataset name.
    #[must_use]
    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.response.len()
    }

    /// Whether the dataset holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.response.is_empty()
    }

    /// Cell line IDs, one per record.
    #[must_use]
    pub fn cell_line_ids(&self) -> &[String] {
        &self.cell_line_ids
    }

    /// Drug IDs, one per record.
    #[must_use]
    pub fn drug_ids(&self) -> &[String] {
        &self.drug_ids
    }

    /// Measured responses, one per record.
    #[must_use]
    pub fn response(&self) -> &[f64] {
        &self.response
    }

    /// Predictions, if a model has produced them.
    #[must_use]
    pub fn predictions(&self) -> Option<&[f64]> {
        self.predictions.as_deref()
    }

    /// Iterate over the records.
    pub fn records(&self) -> impl Iterator<Item = ResponseRecord> + '_ {
        (0..self.len()).map(move |i| {
            ResponseRecord::new(
                self.cell_line_ids[i].clone(),
                self.drug_ids[i].clone(),
                self.response[i],
                self.dataset_name.clone(),
            )
        })
    }

    /// Sorted unique cell line IDs.
    #[must_use]
    pub fn unique_cell_lines(&self) -> Vec<String> {
        unique_sorted(&self.cell_line_ids)
    }

    /// Sorted unique drug IDs.
    #[must_use]
    pub fn unique_drugs(&self) -> Vec<String> {
        unique_sorted(&self.drug_ids)
    }

    /// Attach predictions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthMismatch`] if `predictions` has a different
    /// length than the dataset.
    pub fn set_predictions(&mut self, predictions: Vec<f64>) -> Result<()> {
        if predictions.len() != self.len() {
            return Err(Error::length_mismatch(
                "predictions vs response",
                self.len(),
                predictions.len(),
            ));
        }
        self.predictions = Some(predictions);
        Ok(())
    }

    /// Drop any attached predictions.
    pub fn clear_predictions(&mut self) {
        self.predictions = None;
    }

    /// Mask the dataset in place, keeping records where `mask` is true.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthMismatch`] if the mask length differs from the
    /// dataset length.
    pub fn mask(&mut self, mask: &[bool]) -> Result<()> {
        if mask.len() != self.len() {
            return Err(Error::length_mismatch("mask vs response", self.len(), mask.len()));
        }
        let keep = |values: &mut Vec<String>| {
            let mut flags = mask.iter();
            values.retain(|_| *flags.next().unwrap_or(&false));
        };
        keep(&mut self.cell_line_ids);
        keep(&mut self.drug_ids);
        let mut flags = mask.iter();
        self.response.retain(|_| *flags.next().unwrap_or(&false));
        if let Some(predictions) = self.predictions.as_mut() {
            let mut flags = mask.iter();
            predictions.retain(|_| *flags.next().unwrap_or(&false));
        }
        Ok(())
    }

    /// Copy of the records at `indices`, in the order given.
    ///
    /// # Panics
    ///
    /// Panics if an index is out of bounds.
    #[must_use]
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            dataset_name: self.dataset_name.clone(),
            cell_line_ids: indices.iter().map(|&i| self.cell_line_ids[i].clone()).collect(),
            drug_ids: indices.iter().map(|&i| self.drug_ids[i].clone()).collect(),
            response: indices.iter().map(|&i| self.response[i]).collect(),
            predictions: self
                .predictions
                .as_ref()
                .map(|p| indices.iter().map(|&i| p[i]).collect()),
        }
    }

    /// Keep only records whose cell line (and/or drug) is in the given sets.
    ///
    /// `None` leaves that axis unfiltered.
    pub fn reduce_to(&mut self, cell_line_ids: Option<&[String]>, drug_ids: Option<&[String]>) {
        let cell_lines: Option<FxHashSet<&str>> =
            cell_line_ids.map(|ids| ids.iter().map(String::as_str).collect());
        let drugs: Option<FxHashSet<&str>> =
            drug_ids.map(|ids| ids.iter().map(String::as_str).collect());

        let mask: Vec<bool> = (0..self.len())
            .map(|i| {
                cell_lines
                    .as_ref()
                    .map_or(true, |set| set.contains(self.cell_line_ids[i].as_str()))
                    && drugs
                        .as_ref()
                        .map_or(true, |set| set.contains(self.drug_ids[i].as_str()))
            })
            .collect();
        // Lengths match by construction.
        let _ = self.mask(&mask);
    }

    /// Mask selecting the records of one drug.
    #[must_use]
    pub fn drug_mask(&self, drug_id: &str) -> Vec<bool> {
        self.drug_ids.iter().map(|d| d == drug_id).collect()
    }

    /// Append the records of `other`. Predictions are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the dataset names differ.
    pub fn add_rows(&mut self, other: &Self) -> Result<()> {
        if !self.is_empty() && !other.is_empty() && self.dataset_name != other.dataset_name {
            return Err(Error::InvalidArgument(format!(
                "cannot merge datasets '{}' and '{}'",
                self.dataset_name, other.dataset_name
            )));
        }
        if self.is_empty() {
            self.dataset_name.clone_from(&other.dataset_name);
        }
        self.cell_line_ids.extend_from_slice(&other.cell_line_ids);
        self.drug_ids.extend_from_slice(&other.drug_ids);
        self.response.extend_from_slice(&other.response);
        self.predictions = None;
        Ok(())
    }

    /// Union of several datasets, in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the dataset names differ.
    pub fn union(datasets: &[&Self]) -> Result<Self> {
        let mut merged = Self::empty(datasets.first().map_or("", |d| d.dataset_name()));
        for dataset in datasets {
            merged.add_rows(dataset)?;
        }
        Ok(merged)
    }

    /// Shuffle all arrays by one shared permutation.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        *self = self.select(&order);
    }

    /// Replace the responses (used by response transformations).
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthMismatch`] on a length change.
    pub fn set_response(&mut self, response: Vec<f64>) -> Result<()> {
        if response.len() != self.len() {
            return Err(Error::length_mismatch("new response", self.len(), response.len()));
        }
        self.response = response;
        Ok(())
    }
}

fn unique_sorted(values: &[String]) -> Vec<String> {
    values
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| (*s).to_string()).collect()
    }

    fn sample() -> ResponseDataset {
        ResponseDataset::new(
            "toy",
            ids(&["A", "A", "B", "B"]),
            ids(&["X", "Y", "X", "Y"]),
            vec![1.0, 2.0, 3.0, 4.0],
        )
        .unwrap()
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err =
            ResponseDataset::new("toy", ids(&["A"]), ids(&["X", "Y"]), vec![1.0]).unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { .. }));
    }

    #[test]
    fn test_mask_keeps_arrays_parallel() {
        let mut dataset = sample();
        dataset.set_predictions(vec![0.1, 0.2, 0.3, 0.4]).unwrap();
        dataset.mask(&[true, false, false, true]).unwrap();
        assert_eq!(dataset.cell_line_ids(), ids(&["A", "B"]).as_slice());
        assert_eq!(dataset.drug_ids(), ids(&["X", "Y"]).as_slice());
        assert_eq!(dataset.response(), &[1.0, 4.0]);
        assert_eq!(dataset.predictions(), Some(&[0.1, 0.4][..]));
    }

    #[test]
    fn test_reduce_to_intersection() {
        let mut dataset = sample();
        dataset.reduce_to(Some(&ids(&["B"])), Some(&ids(&["X"])));
        assert_eq!(dataset.len(), 1);
        assert!((dataset.response()[0] - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_copy_is_independent() {
        let original = sample();
        let mut copy = original.clone();
        copy.mask(&[false, false, false, true]).unwrap();
        assert_eq!(original.len(), 4);
        assert_eq!(copy.len(), 1);
    }

    #[test]
    fn test_union_concatenates() {
        let a = sample();
        let b = sample().select(&[0]);
        let merged = ResponseDataset::union(&[&a, &b]).unwrap();
        assert_eq!(merged.len(), 5);
        assert_eq!(merged.unique_cell_lines(), ids(&["A", "B"]));
    }

    #[test]
    fn test_union_rejects_foreign_dataset() {
        let a = sample();
        let b = ResponseDataset::new("other", ids(&["C"]), ids(&["Z"]), vec![0.0]).unwrap();
        assert!(ResponseDataset::union(&[&a, &b]).is_err());
    }

    #[test]
    fn test_from_records_roundtrip() {
        let dataset = sample();
        let rebuilt = ResponseDataset::from_records(dataset.records());
        assert_eq!(rebuilt, dataset);
    }

    #[test]
    fn test_deserialize_checks_lengths() {
        let ragged = serde_json::json!({
            "dataset_name": "toy",
            "cell_line_ids": ["A"],
            "drug_ids": ["X", "Y"],
            "response": [1.0, 2.0],
            "predictions": null,
        });
        let error = serde_json::from_value::<ResponseDataset>(ragged).unwrap_err();
        assert!(error.to_string().contains("Length mismatch"), "{error}");

        let ragged_predictions = serde_json::json!({
            "dataset_name": "toy",
            "cell_line_ids": ["A"],
            "drug_ids": ["X"],
            "response": [1.0],
            "predictions": [1.0, 2.0],
        });
        assert!(serde_json::from_value::<ResponseDataset>(ragged_predictions).is_err());
    }

    #[test]
    fn test_serde_roundtrip_keeps_predictions() {
        let mut dataset = sample();
        dataset.set_predictions(vec![0.5, 1.5, 2.5, 3.5]).unwrap();
        let json = serde_json::to_string(&dataset).unwrap();
        let restored: ResponseDataset = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, dataset);
        assert_eq!(restored.records().count(), 4);
    }
}
