//! CSV loading and writing for response and feature tables
//!
//! Layout on disk: `{data_path}/{dataset_name}/response.csv` with header
//! `cell_line_id,drug_id,response`, and one `{view}.csv` per feature view
//! whose first column is the entity id.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{FeatureDataset, FeatureValue, ResponseDataset};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct ResponseRow {
    cell_line_id: String,
    drug_id: String,
    response: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PredictionRow {
    cell_line_id: String,
    drug_id: String,
    response: f64,
    prediction: f64,
}

/// Load a response table.
///
/// Rows whose response does not parse as a float (e.g. empty cells) are
/// skipped.
///
/// # Errors
///
/// Returns error if the file cannot be opened or a row is malformed.
pub fn load_response_csv<P: AsRef<Path>>(path: P, dataset_name: &str) -> Result<ResponseDataset> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;

    let mut cell_line_ids = Vec::new();
    let mut drug_ids = Vec::new();
    let mut response = Vec::new();
    let mut skipped = 0usize;

    for row in reader.deserialize() {
        let row: ResponseRow = row?;
        match row.response.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => {
                cell_line_ids.push(row.cell_line_id);
                drug_ids.push(row.drug_id);
                response.push(value);
            }
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(
            dataset = dataset_name,
            skipped, "skipped response rows without a numeric response"
        );
    }
    debug!(dataset = dataset_name, rows = response.len(), "loaded response table");

    ResponseDataset::new(dataset_name, cell_line_ids, drug_ids, response)
}

/// Load one feature view.
///
/// The first column holds the entity id, every other column must be numeric.
///
/// # Errors
///
/// Returns error if the file cannot be read or a value is not numeric.
pub fn load_feature_csv<P: AsRef<Path>>(path: P, view: &str) -> Result<FeatureDataset> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    let mut features = FeatureDataset::new();

    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let mut fields = record.iter();
        let Some(entity) = fields.next() else {
            continue;
        };
        let values = fields
            .map(|field| {
                field.trim().parse::<f64>().map_err(|e| {
                    Error::Other(format!(
                        "{}: row {}: non-numeric feature value '{field}': {e}",
                        path.as_ref().display(),
                        line + 1
                    ))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        features.insert(entity, view, FeatureValue::Vector(values));
    }

    debug!(view, entities = features.len(), "loaded feature view");
    Ok(features)
}

/// Merge several single-view feature datasets into one.
#[must_use]
pub fn merge_views(parts: Vec<FeatureDataset>) -> FeatureDataset {
    let mut merged: BTreeMap<String, BTreeMap<String, FeatureValue>> = BTreeMap::new();
    for part in parts {
        for id in part.identifiers() {
            if let Some(views) = part.entity(&id) {
                let slot = merged.entry(id).or_default();
                for (view, value) in views {
                    slot.insert(view.clone(), value.clone());
                }
            }
        }
    }
    merged.into_iter().collect()
}

/// Write a true-vs-predicted table for a dataset carrying predictions.
///
/// # Errors
///
/// Returns error if the dataset has no predictions or the file cannot be
/// written.
pub fn write_predictions_csv<P: AsRef<Path>>(path: P, dataset: &ResponseDataset) -> Result<()> {
    let predictions = dataset
        .predictions()
        .ok_or_else(|| Error::Other("dataset has no predictions to write".to_string()))?;

    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for (i, prediction) in predictions.iter().enumerate() {
        writer.serialize(PredictionRow {
            cell_line_id: dataset.cell_line_ids()[i].clone(),
            drug_id: dataset.drug_ids()[i].clone(),
            response: dataset.response()[i],
            prediction: *prediction,
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a table written by [`write_predictions_csv`].
///
/// # Errors
///
/// Returns error if the file cannot be read or is malformed.
pub fn read_predictions_csv<P: AsRef<Path>>(
    path: P,
    dataset_name: &str,
) -> Result<ResponseDataset> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    let mut cell_line_ids = Vec::new();
    let mut drug_ids = Vec::new();
    let mut response = Vec::new();
    let mut predictions = Vec::new();

    for row in reader.deserialize() {
        let row: PredictionRow = row?;
        cell_line_ids.push(row.cell_line_id);
        drug_ids.push(row.drug_id);
        response.push(row.response);
        predictions.push(row.prediction);
    }

    let mut dataset = ResponseDataset::new(dataset_name, cell_line_ids, drug_ids, response)?;
    dataset.set_predictions(predictions)?;
    Ok(dataset)
}
