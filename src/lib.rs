/// image-space: batch colour calibration and output naming for RAW photo sets
///
/// This crate handles:
/// - Collecting images into groups (state)
/// - Per-group colour calibration from reference charts (calibration)
/// - Exposure normalization across a set (exposure)
/// - Naming schemas and output paths (naming)
/// - Planning and running batches on a worker pool (batch)
/// - Decoding and encoding image files (raw)
/// - Settings and project export (config, export)

pub mod batch;
pub mod calibration;
pub mod color;
pub mod config;
pub mod error;
pub mod export;
pub mod exposure;
pub mod naming;
pub mod raw;
pub mod state;

pub use error::{Error, Result};
