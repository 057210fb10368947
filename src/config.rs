/// Persistent settings
///
/// Stored as TOML under the platform config directory
/// (`~/.config/image-space/settings.toml` on Linux). A missing file means
/// defaults; a malformed one is an error.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::batch::NamingMode;
use crate::error::{Error, Result};
use crate::exposure::ExposureNormalizer;
use crate::state::edit::{OutputFormat, OutputSettings};
use crate::state::groups::GroupingRules;
use crate::state::library::CollectOptions;

/// All user-facing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // ========== Processing ==========
    pub thread_count: usize,
    /// Output extension, e.g. ".jpg"
    pub export_format: String,
    pub jpeg_quality: u8,
    pub tiff_bitdepth: u8,
    pub exr_colorspace: String,

    // ========== Import ==========
    pub use_import_rules: bool,
    pub look_in_subfolders: bool,
    pub group_by_subfolder: bool,
    pub group_by_prefix: bool,
    pub prefix_string: String,
    pub ignore_formats: bool,
    pub ignore_string: String,

    // ========== Naming ==========
    pub use_export_schema: bool,
    pub export_schema: String,
    pub custom_name: String,
    /// Digits for sequential numbering when the schema is off
    pub padding: usize,

    // ========== Calibration ==========
    /// Calibration file used for groups without their own chart
    pub default_chart: Option<PathBuf>,
    pub dont_use_chart: bool,

    // ========== Exposure ==========
    pub shadow_limit: f32,
    pub highlight_limit: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            thread_count: 4,
            export_format: ".jpg".to_string(),
            jpeg_quality: 100,
            tiff_bitdepth: 8,
            exr_colorspace: "sRGB".to_string(),
            use_import_rules: false,
            look_in_subfolders: false,
            group_by_subfolder: false,
            group_by_prefix: false,
            prefix_string: String::new(),
            ignore_formats: false,
            ignore_string: String::new(),
            use_export_schema: false,
            export_schema: "[r]/[o][n4][e]".to_string(),
            custom_name: String::new(),
            padding: 4,
            default_chart: None,
            dont_use_chart: false,
            shadow_limit: 0.05,
            highlight_limit: 0.98,
        }
    }
}

impl Settings {
    /// Default settings file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("image-space").join("settings.toml"))
    }

    /// Load from the default location, or defaults if there is none
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let settings = toml::from_str(&content)?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Serialization {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn grouping_rules(&self) -> GroupingRules {
        GroupingRules {
            group_by_subfolder: self.group_by_subfolder,
            group_by_prefix: self.group_by_prefix,
            prefix_separator: self.prefix_string.clone(),
        }
    }

    pub fn collect_options(&self) -> CollectOptions {
        CollectOptions {
            use_import_rules: self.use_import_rules,
            look_in_subfolders: self.look_in_subfolders,
            ignore_formats: self.ignore_formats,
            ignore_string: self.ignore_string.clone(),
        }
    }

    /// Unknown formats fall back to JPEG
    pub fn output_settings(&self) -> OutputSettings {
        OutputSettings {
            format: OutputFormat::parse(&self.export_format).unwrap_or_default(),
            jpeg_quality: self.jpeg_quality,
            bit_depth: self.tiff_bitdepth,
            exr_colorspace: self.exr_colorspace.clone(),
        }
    }

    pub fn naming_mode(&self) -> NamingMode {
        if self.use_export_schema {
            NamingMode::Schema {
                schema: self.export_schema.clone(),
            }
        } else {
            NamingMode::Sequential {
                padding: self.padding,
            }
        }
    }

    pub fn exposure(&self) -> ExposureNormalizer {
        ExposureNormalizer::new(self.shadow_limit, self.highlight_limit)
    }
}
