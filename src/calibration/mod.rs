/// Colour calibration
///
/// This module handles:
/// - 24-swatch reference sets and calibration files (swatches.rs)
/// - Per-group resolution with chart detection and fallback (registry.rs)
/// - The swatch detector seam (detector.rs)

pub mod detector;
pub mod registry;
pub mod swatches;

pub use detector::{GridChartDetector, SwatchDetector};
pub use registry::{CalibrationEntry, CalibrationRegistry, CalibrationReport, Resolution};
pub use swatches::{SwatchSet, SWATCH_COUNT};
