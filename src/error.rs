//! Error types for image-space
//!
//! One enum for the whole crate. Schema problems have their own
//! [`SchemaIssue`] list because validation reports every problem at once.

use std::path::PathBuf;
use thiserror::Error;

use crate::naming::schema::SchemaIssue;

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    /// The naming schema failed validation
    #[error("Invalid naming schema: {}", join_issues(.0))]
    InvalidSchema(Vec<SchemaIssue>),

    /// One or more groups have neither a chart nor a fallback calibration
    #[error("Missing calibration for groups: {}", .0.join(", "))]
    MissingCalibration(Vec<String>),

    /// Charts were assigned but could not be measured. Carries the reason
    /// per failed group and any groups that are missing a calibration too.
    #[error("Calibration failed: {}", describe_failures(.failures, .missing))]
    CalibrationFailed {
        failures: Vec<(String, String)>,
        missing: Vec<String>,
    },

    /// The detector returned nothing usable for a group's chart
    #[error("Swatch extraction failed for group '{group}': {reason}")]
    SwatchExtraction { group: String, reason: String },

    /// A detection for this group is already running
    #[error("Chart detection already in progress for group '{0}'")]
    DetectionInProgress(String),

    /// The image is not part of the current session
    #[error("Unknown image: {}", .0.display())]
    UnknownImage(PathBuf),

    /// The corrector failed on a single image
    #[error("Processing failed for {}: {message}", .path.display())]
    Processing { path: PathBuf, message: String },

    /// A value in the export document cannot be represented as JSON
    #[error("Cannot serialize value at {path}: {reason}")]
    Serialization { path: String, reason: String },

    /// The selected input directory could not be read at all
    #[error("Cannot read input directory {}: {source}", .path.display())]
    InputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The worker pool could not be started
    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    /// RAW decoding errors
    #[error("Decode error: {0}")]
    Decode(String),

    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

fn join_issues(issues: &[SchemaIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_failures(failures: &[(String, String)], missing: &[String]) -> String {
    let mut parts: Vec<String> = failures.iter().map(|(_, reason)| reason.clone()).collect();
    if !missing.is_empty() {
        parts.push(format!("no calibration for groups: {}", missing.join(", ")));
    }
    parts.join("; ")
}
