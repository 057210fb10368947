/// Reference swatch sets and calibration files
///
/// A calibration is the measured RGB of the 24 patches of a colour chart.
/// Files are JSON: `{ "swatches": [[r, g, b], ...] }` with 24 rows.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Patches on a 24-swatch colour chart
pub const SWATCH_COUNT: usize = 24;

/// Index of the first neutral patch (white) on the bottom row
pub const FIRST_NEUTRAL: usize = 18;

/// 24x3 matrix, rows = swatches, columns = RGB
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SwatchFile", into = "SwatchFile")]
pub struct SwatchSet([[f32; 3]; SWATCH_COUNT]);

/// On-disk layout
#[derive(Serialize, Deserialize)]
struct SwatchFile {
    swatches: Vec<[f32; 3]>,
}

impl TryFrom<SwatchFile> for SwatchSet {
    type Error = String;

    fn try_from(file: SwatchFile) -> std::result::Result<Self, Self::Error> {
        SwatchSet::from_rows(&file.swatches)
            .ok_or_else(|| format!("expected {} swatches, found {}", SWATCH_COUNT, file.swatches.len()))
    }
}

impl From<SwatchSet> for SwatchFile {
    fn from(set: SwatchSet) -> Self {
        SwatchFile {
            swatches: set.0.to_vec(),
        }
    }
}

impl SwatchSet {
    pub fn new(rows: [[f32; 3]; SWATCH_COUNT]) -> Self {
        Self(rows)
    }

    /// Build from a list of rows; None unless there are exactly 24
    pub fn from_rows(rows: &[[f32; 3]]) -> Option<Self> {
        let rows: [[f32; 3]; SWATCH_COUNT] = rows.try_into().ok()?;
        Some(Self(rows))
    }

    pub fn rows(&self) -> &[[f32; 3]; SWATCH_COUNT] {
        &self.0
    }

    /// The six neutral patches, white to black
    pub fn neutrals(&self) -> &[[f32; 3]] {
        &self.0[FIRST_NEUTRAL..]
    }

    /// Row-major flat list of 72 values
    pub fn flattened(&self) -> Vec<f32> {
        self.0.iter().flatten().copied().collect()
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().flatten().all(|v| v.is_finite())
    }

    /// Write a calibration file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Read a calibration file; fails unless it holds exactly 24 swatches
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let file: SwatchFile = serde_json::from_str(&json)?;
        let count = file.swatches.len();
        SwatchSet::from_rows(&file.swatches).ok_or_else(|| Error::SwatchExtraction {
            group: path.display().to_string(),
            reason: format!("expected {SWATCH_COUNT} swatches, found {count}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn sample() -> SwatchSet {
        let mut rows = [[0.0f32; 3]; SWATCH_COUNT];
        for (i, row) in rows.iter_mut().enumerate() {
            let v = i as f32 / 23.0;
            *row = [v, v * 0.5 + 0.1, 1.0 / (i as f32 + 3.0)];
        }
        SwatchSet::new(rows)
    }

    #[test]
    fn test_save_load_is_exact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("charts/group.json");
        let set = sample();

        set.save(&path).unwrap();
        let restored = SwatchSet::load(&path).unwrap();

        assert_eq!(set, restored);
    }

    #[test]
    fn test_wrong_row_count_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.json");
        fs::write(&path, r#"{"swatches": [[0.1, 0.2, 0.3]]}"#).unwrap();

        let err = SwatchSet::load(&path).unwrap_err();
        assert!(err.to_string().contains("found 1"));
        assert!(SwatchSet::from_rows(&[[0.0; 3]; 23]).is_none());
    }

    #[test]
    fn test_neutrals_and_flatten() {
        let set = sample();
        assert_eq!(set.neutrals().len(), 6);
        assert_eq!(set.neutrals()[0], set.rows()[18]);
        assert_eq!(set.flattened().len(), 72);
        assert!(set.is_finite());
    }
}
