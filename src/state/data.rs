/// Shared data structures for the working set
///
/// These structs represent the data model that flows between
/// collection, the batch dispatcher and the session.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Stable identity of an image within one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(pub usize);

/// Processing status of one image
///
/// Moves forward only: raw -> started/sent -> finished/error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    #[default]
    Raw,
    Started,
    /// Handed off to a remote processor
    Sent,
    Finished,
    Error,
}

impl ImageStatus {
    fn rank(self) -> u8 {
        match self {
            ImageStatus::Raw => 0,
            ImageStatus::Started | ImageStatus::Sent => 1,
            ImageStatus::Finished | ImageStatus::Error => 2,
        }
    }

    /// Whether a record in this status may move to `next`
    pub fn can_advance_to(self, next: ImageStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ImageStatus::Finished | ImageStatus::Error)
    }
}

/// Represents a single image in the working set
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub id: ImageId,
    /// Full path to the input file
    pub input_path: PathBuf,
    /// Path relative to the selected folder
    pub relative_path: PathBuf,
    /// Filename only (e.g., "DSC_0001.NEF")
    pub filename: String,
    pub group: String,
    pub status: ImageStatus,
    /// Where the processed image was written (None until finished)
    pub output_path: Option<PathBuf>,
    pub processing_time_ms: Option<u64>,
    /// Calibration file used for this image, if any
    pub calibration_ref: Option<PathBuf>,
    /// This image is its group's colour chart
    pub is_chart: bool,
    /// Reference image for exposure normalization
    pub average_source: bool,
    /// Exposure multiplier from the last normalization pass
    pub exposure_multiplier: Option<f32>,
    pub error: Option<String>,
}

impl ImageRecord {
    pub fn new(id: ImageId, input_path: PathBuf, relative_path: PathBuf, group: String) -> Self {
        let filename = input_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        Self {
            id,
            input_path,
            relative_path,
            filename,
            group,
            status: ImageStatus::Raw,
            output_path: None,
            processing_time_ms: None,
            calibration_ref: None,
            is_chart: false,
            average_source: false,
            exposure_multiplier: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_moves_forward() {
        assert!(ImageStatus::Raw.can_advance_to(ImageStatus::Started));
        assert!(ImageStatus::Started.can_advance_to(ImageStatus::Finished));
        assert!(ImageStatus::Started.can_advance_to(ImageStatus::Error));
        assert!(!ImageStatus::Finished.can_advance_to(ImageStatus::Started));
        assert!(!ImageStatus::Error.can_advance_to(ImageStatus::Finished));
        assert!(!ImageStatus::Started.can_advance_to(ImageStatus::Started));
    }

    #[test]
    fn test_new_record_takes_filename_from_path() {
        let record = ImageRecord::new(
            ImageId(0),
            PathBuf::from("/in/DSC_0001.NEF"),
            PathBuf::from("DSC_0001.NEF"),
            "All Images".to_string(),
        );
        assert_eq!(record.filename, "DSC_0001.NEF");
        assert_eq!(record.status, ImageStatus::Raw);
        assert!(!record.status.is_terminal());
    }
}
