//! Error taxonomy shared by every tscd crate
//!
//! "Not found" is never an error here: lookups return `Option`.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TscdError>;

#[derive(Debug, Error)]
pub enum TscdError {
    /// Missing or invalid compiler config. Fatal to one project only.
    #[error("project '{project}': {reason}")]
    Configuration { project: String, reason: String },

    /// Malformed manifest found while detecting the workspace.
    #[error("failed to read manifest {}: {reason}", path.display())]
    Scan { path: PathBuf, reason: String },

    /// Store and cache disagree. Should never happen.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("invalid pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TscdError {
    pub fn configuration(project: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            project: project.into(),
            reason: reason.into(),
        }
    }

    pub fn scan(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Scan {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
