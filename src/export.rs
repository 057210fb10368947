/// Project export
///
/// Writes the working set, its calibrations and the run settings as one
/// JSON document. Every string is reduced to a plain ASCII character set and
/// swatch values are rounded to 6 decimals. The file is written next to its
/// destination and renamed into place, so a failed export leaves nothing
/// behind.

use chrono::Local;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::calibration::CalibrationEntry;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::state::edit::Adjustments;
use crate::state::Session;

pub const EXPORT_FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Serialize)]
pub struct ProjectDocument {
    pub metadata: Metadata,
    pub processing_settings: ProcessingSettings,
    pub chart_configuration: ChartConfiguration,
    pub import_export_settings: ImportExportSettings,
    pub images: Vec<ImageEntry>,
    pub image_groups: BTreeMap<String, GroupEntry>,
    pub raw_images_directory: String,
    pub total_images: usize,
    pub selected_images: usize,
}

#[derive(Debug, Serialize)]
pub struct Metadata {
    pub export_date: String,
    pub software: String,
    pub software_version: String,
    pub platform: String,
    pub export_format_version: String,
}

#[derive(Debug, Serialize)]
pub struct ProcessingSettings {
    pub output_directory: String,
    pub export_format: String,
    pub thread_count: usize,
    pub jpeg_quality: u8,
    pub tiff_bitdepth: u8,
    pub exr_colorspace: String,
    pub dont_use_chart: bool,
    pub export_schema: String,
    pub use_export_schema: bool,
    pub custom_name: String,
    pub root_folder: String,
    pub exposure_adj: f32,
    pub shadow_adj: f32,
    pub highlight_adj: f32,
    pub white_balance_adj: Option<u32>,
    pub denoise_strength: f32,
    pub sharpen_amount: f32,
}

#[derive(Debug, Serialize)]
pub struct ChartConfiguration {
    pub use_precalculated_charts: bool,
    pub selected_precalc_chart: String,
    pub manual_chart_path: Option<String>,
    pub has_chart_swatches: bool,
}

#[derive(Debug, Serialize)]
pub struct ImportExportSettings {
    pub look_in_subfolders: bool,
    pub group_by_subfolder: bool,
    pub group_by_prefix: bool,
    pub prefix_string: String,
    pub ignore_formats: bool,
    pub ignore_string: String,
    pub use_import_rules: bool,
}

#[derive(Debug, Serialize)]
pub struct ImageEntry {
    pub index: usize,
    pub filename: String,
    pub full_path: String,
    pub group: String,
    pub selected: bool,
    pub has_user_data: bool,
    pub user_data_keys: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct GroupEntry {
    pub has_calibration: bool,
    pub chart_file: String,
    pub chart_swatches: Vec<[f64; 3]>,
    pub chart_swatches_count: usize,
    pub using_fallback_calibration: bool,
}

impl GroupEntry {
    fn uncalibrated() -> Self {
        Self {
            has_calibration: false,
            chart_file: String::new(),
            chart_swatches: Vec::new(),
            chart_swatches_count: 0,
            using_fallback_calibration: false,
        }
    }

    fn from_calibration(group: &str, entry: &CalibrationEntry) -> Result<Self> {
        let mut swatches = Vec::with_capacity(entry.swatches.rows().len());
        for (i, row) in entry.swatches.rows().iter().enumerate() {
            let mut out = [0.0f64; 3];
            for (j, v) in row.iter().enumerate() {
                if !v.is_finite() {
                    return Err(Error::Serialization {
                        path: format!("image_groups.{group}.chart_swatches[{i}][{j}]"),
                        reason: format!("non-finite value {v}"),
                    });
                }
                out[j] = round6(*v);
            }
            swatches.push(out);
        }

        Ok(Self {
            has_calibration: true,
            chart_file: entry
                .source_file
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            chart_swatches_count: swatches.len(),
            chart_swatches: swatches,
            using_fallback_calibration: entry.is_fallback,
        })
    }
}

fn round6(v: f32) -> f64 {
    (v as f64 * 1e6).round() / 1e6
}

/// Inputs that are not part of the session itself
#[derive(Debug, Clone, Default)]
pub struct ExportContext<'a> {
    pub output_dir: Option<&'a Path>,
    pub adjustments: Adjustments,
}

/// Build the export document for a session
pub fn build_document(session: &Session, settings: &Settings, ctx: &ExportContext<'_>) -> Result<ProjectDocument> {
    let root = session.input_root().unwrap_or(Path::new(""));
    let root_folder = root
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let images: Vec<ImageEntry> = session
        .images
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let mut keys = Vec::new();
            if record.exposure_multiplier.is_some() {
                keys.push("average_exposure".to_string());
            }
            if record.average_source {
                keys.push("average_source".to_string());
            }
            if record.is_chart {
                keys.push("is_chart".to_string());
            }
            if record.output_path.is_some() {
                keys.push("output_path".to_string());
            }
            ImageEntry {
                index,
                filename: record.filename.clone(),
                full_path: record.input_path.display().to_string(),
                group: record.group.clone(),
                selected: true,
                has_user_data: !keys.is_empty(),
                user_data_keys: keys,
            }
        })
        .collect();

    let fallback = session.calibration.fallback();
    let mut image_groups = BTreeMap::new();
    for image in &images {
        if image_groups.contains_key(&image.group) {
            continue;
        }
        let calibration = if settings.dont_use_chart {
            None
        } else {
            session
                .calibration
                .entry(&image.group)
                .or_else(|| fallback.clone())
        };
        let entry = match calibration {
            Some(entry) => GroupEntry::from_calibration(&image.group, &entry)?,
            None => GroupEntry::uncalibrated(),
        };
        debug!(
            "Export group '{}': calibrated={}, fallback={}",
            image.group, entry.has_calibration, entry.using_fallback_calibration
        );
        image_groups.insert(image.group.clone(), entry);
    }

    let total_images = images.len();
    let selected_images = images.iter().filter(|i| i.selected).count();
    let adjustments = &ctx.adjustments;

    Ok(ProjectDocument {
        metadata: Metadata {
            export_date: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            software: "image-space".to_string(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
            export_format_version: EXPORT_FORMAT_VERSION.to_string(),
        },
        processing_settings: ProcessingSettings {
            output_directory: ctx
                .output_dir
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            export_format: settings.output_settings().format.extension().to_string(),
            thread_count: settings.thread_count,
            jpeg_quality: settings.jpeg_quality,
            tiff_bitdepth: settings.tiff_bitdepth,
            exr_colorspace: settings.exr_colorspace.clone(),
            dont_use_chart: settings.dont_use_chart,
            export_schema: settings.export_schema.clone(),
            use_export_schema: settings.use_export_schema,
            custom_name: settings.custom_name.clone(),
            root_folder,
            exposure_adj: adjustments.exposure,
            shadow_adj: adjustments.shadows,
            highlight_adj: adjustments.highlights,
            white_balance_adj: adjustments.white_balance,
            denoise_strength: adjustments.denoise,
            sharpen_amount: adjustments.sharpen,
        },
        chart_configuration: ChartConfiguration {
            use_precalculated_charts: settings.default_chart.is_some(),
            selected_precalc_chart: settings
                .default_chart
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            manual_chart_path: fallback
                .as_ref()
                .and_then(|f| f.source_file.as_deref())
                .map(|p| p.display().to_string()),
            has_chart_swatches: fallback.is_some(),
        },
        import_export_settings: ImportExportSettings {
            look_in_subfolders: settings.look_in_subfolders,
            group_by_subfolder: settings.group_by_subfolder,
            group_by_prefix: settings.group_by_prefix,
            prefix_string: settings.prefix_string.clone(),
            ignore_formats: settings.ignore_formats,
            ignore_string: settings.ignore_string.clone(),
            use_import_rules: settings.use_import_rules,
        },
        images,
        image_groups,
        raw_images_directory: root.display().to_string(),
        total_images,
        selected_images,
    })
}

fn disallowed_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"[^A-Za-z0-9_ \t\r\n.,!?:;\-()\[\]{}"'/\\]"#).expect("static regex")
    })
}

fn whitespace_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t\r\n]+").expect("static regex"))
}

/// Strip anything outside the allowed set and collapse whitespace
pub fn sanitize_string(text: &str) -> String {
    let kept = disallowed_chars().replace_all(text, "");
    whitespace_runs().replace_all(&kept, " ").trim().to_string()
}

/// Sanitize every string and object key in a JSON tree
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_string(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (sanitize_string(&k), sanitize_value(v)))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}

/// Build, sanitize and write the export document to `path`
pub fn export_project(
    session: &Session,
    settings: &Settings,
    ctx: &ExportContext<'_>,
    path: &Path,
) -> Result<ProjectDocument> {
    let document = build_document(session, settings, ctx)?;
    let value = sanitize_value(serde_json::to_value(&document)?);
    let json = serde_json::to_string_pretty(&value)?;
    write_atomically(path, json.as_bytes())?;

    info!(
        "Project exported to {} ({} images, {} groups)",
        path.display(),
        document.total_images,
        document.image_groups.len()
    );
    Ok(document)
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    if let Err(e) = fs::write(&tmp, contents).and_then(|_| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Default export file name, e.g. `ImageSpace_Project_20240101_120000.json`
pub fn default_file_name() -> String {
    format!("ImageSpace_Project_{}.json", Local::now().format("%Y%m%d_%H%M%S"))
}
