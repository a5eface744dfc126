//! Artifact Record - a table persisted by an experiment

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Artifact Record represents one file written under the run directory.
///
/// `key` is the path relative to the run directory, e.g.
/// `LPO/predictions/NaivePredictor_predictions_LPO_0_0.csv`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    experiment_id: String,
    key: String,
    path: PathBuf,
    size_bytes: u64,
    created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    /// Create a new artifact record.
    ///
    /// # Arguments
    ///
    /// * `experiment_id` - ID of the experiment that wrote the file
    /// * `key` - Path relative to the run directory
    /// * `path` - Absolute (or caller-relative) path of the file
    /// * `size_bytes` - Size of the file in bytes
    #[must_use]
    pub fn new(
        experiment_id: impl Into<String>,
        key: impl Into<String>,
        path: impl Into<PathBuf>,
        size_bytes: u64,
    ) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            key: key.into(),
            path: path.into(),
            size_bytes,
            created_at: Utc::now(),
        }
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the artifact key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the artifact size in bytes.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
