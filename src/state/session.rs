/// Working set for one folder of images
///
/// A session owns the image records, the groups and the calibrations that
/// belong to them. Records and groups are created together by `collect` and
/// dropped together by `reset` or the next `collect`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::data::{ImageRecord, ImageStatus};
use super::groups::{GroupRegistry, GroupingRules};
use super::images::ImageStore;
use super::library::Library;
use crate::batch::{BatchEvent, PlannedImage, Progress};
use crate::calibration::CalibrationRegistry;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct Session {
    pub images: ImageStore,
    pub groups: GroupRegistry,
    pub calibration: CalibrationRegistry,
    input_root: Option<PathBuf>,
    progress: Option<Progress>,
}

impl Session {
    pub fn new(rules: GroupingRules) -> Self {
        Self {
            groups: GroupRegistry::new(rules),
            ..Default::default()
        }
    }

    /// Drop every record, group and calibration; grouping rules stay
    pub fn reset(&mut self) {
        self.images.clear();
        self.groups.clear();
        self.calibration.clear();
        self.input_root = None;
        self.progress = None;
        debug!("Session reset");
    }

    pub fn input_root(&self) -> Option<&Path> {
        self.input_root.as_deref()
    }

    /// Scan `base` and replace the working set with what was found.
    /// Group calibrations go with the old groups; the default chart stays.
    pub fn collect(&mut self, base: &Path, library: &Library) -> Result<usize> {
        // Fails before touching the current working set
        std::fs::read_dir(base).map_err(|source| Error::InputDirectory {
            path: base.to_path_buf(),
            source,
        })?;

        self.images.clear();
        self.groups.clear();
        self.calibration.clear_groups();
        self.progress = None;

        let collected = library.collect(base, &mut self.groups)?;
        for image in collected {
            let relative = image
                .path
                .strip_prefix(base)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| image.path.clone());
            self.images.insert(image.path, relative, image.group);
        }
        self.input_root = Some(base.to_path_buf());

        info!(
            "Session holds {} images in {} groups",
            self.images.len(),
            self.groups.len()
        );
        Ok(self.images.len())
    }

    /// Make `image_path` the chart of its group.
    ///
    /// Clears the previous chart's flag and discards the group's calibration
    /// so the new chart is measured on the next resolve.
    pub fn set_chart(&mut self, image_path: &Path) -> Result<String> {
        let group = self
            .groups
            .group_of(image_path)
            .map(str::to_string)
            .ok_or_else(|| Error::UnknownImage(image_path.to_path_buf()))?;

        if let Some(previous) = self.groups.set_chart_assignment(&group, image_path) {
            if let Some(record) = self.images.by_path_mut(&previous) {
                record.is_chart = false;
            }
        }
        if let Some(record) = self.images.by_path_mut(image_path) {
            record.is_chart = true;
        }
        self.calibration.remove_group(&group);

        info!("Chart for group '{}': {}", group, image_path.display());
        Ok(group)
    }

    /// Remove the chart of a group along with its calibration
    pub fn clear_chart(&mut self, group: &str) {
        if let Some(previous) = self.groups.clear_chart_assignment(group) {
            if let Some(record) = self.images.by_path_mut(&previous) {
                record.is_chart = false;
            }
        }
        self.calibration.remove_group(group);
    }

    /// Mark the reference image for exposure normalization; only one at a time
    pub fn mark_average_source(&mut self, image_path: &Path) -> bool {
        if self.images.id_of(image_path).is_none() {
            return false;
        }
        for record in self.images.iter_mut() {
            record.average_source = record.input_path == image_path;
        }
        true
    }

    pub fn average_source(&self) -> Option<&Path> {
        self.images
            .iter()
            .find(|r| r.average_source)
            .map(|r| r.input_path.as_path())
    }

    /// Store exposure multipliers from a normalization pass
    pub fn apply_exposure(&mut self, multipliers: &HashMap<PathBuf, f32>) {
        for record in self.images.iter_mut() {
            record.exposure_multiplier = multipliers.get(&record.input_path).copied();
        }
    }

    pub fn clear_exposure(&mut self) {
        for record in self.images.iter_mut() {
            record.exposure_multiplier = None;
        }
    }

    /// Images ready for planning: group by group, groups in order of first
    /// appearance, collection order inside each group
    pub fn planned_images(&self) -> Vec<PlannedImage> {
        let mut group_order: HashMap<&str, usize> = HashMap::new();
        for record in self.images.iter() {
            let next = group_order.len();
            group_order.entry(record.group.as_str()).or_insert(next);
        }

        let mut records: Vec<&ImageRecord> = self.images.iter().collect();
        records.sort_by_key(|r| group_order.get(r.group.as_str()).copied().unwrap_or(usize::MAX));

        records
            .into_iter()
            .map(|record| PlannedImage {
                path: record.input_path.clone(),
                group: record.group.clone(),
                exposure_multiplier: record.exposure_multiplier,
            })
            .collect()
    }

    pub fn begin_run(&mut self, total: usize) {
        self.progress = Some(Progress::new(total));
    }

    pub fn progress(&self) -> Option<&Progress> {
        self.progress.as_ref()
    }

    /// Fold one worker event into the records. Backward status changes are
    /// ignored and do not count towards progress.
    pub fn apply_event(&mut self, event: &BatchEvent) {
        let accepted = match event {
            BatchEvent::Started {
                path, calibration, ..
            } => {
                let accepted = self.images.advance(path, ImageStatus::Started);
                if let Some(record) = self.images.by_path_mut(path).filter(|_| accepted) {
                    record.calibration_ref = calibration.clone();
                }
                accepted
            }
            BatchEvent::Finished {
                path,
                output,
                elapsed_ms,
            } => {
                let accepted = self.images.advance(path, ImageStatus::Finished);
                if let Some(record) = self.images.by_path_mut(path).filter(|_| accepted) {
                    record.output_path = Some(output.clone());
                    record.processing_time_ms = Some(*elapsed_ms);
                    record.error = None;
                }
                accepted
            }
            BatchEvent::Failed { path, message } => {
                let accepted = self.images.advance(path, ImageStatus::Error);
                if let Some(record) = self.images.by_path_mut(path).filter(|_| accepted) {
                    record.error = Some(message.clone());
                }
                accepted
            }
            BatchEvent::Skipped { .. } => true,
        };

        if !accepted {
            warn!("Ignoring out-of-order event: {:?}", event);
            return;
        }
        if let Some(progress) = self.progress.as_mut() {
            progress.record(event);
        }
    }

    /// Records that are neither raw nor terminal
    pub fn in_progress(&self) -> Vec<&ImageRecord> {
        self.images
            .iter()
            .filter(|r| r.status != ImageStatus::Raw && !r.status.is_terminal())
            .collect()
    }
}
