/// Per-group calibration lookup
///
/// Resolution order for a group: explicit entry, then detection on the
/// group's chart, then the global fallback, otherwise missing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use super::detector::SwatchDetector;
use super::swatches::{SwatchSet, SWATCH_COUNT};
use crate::error::{Error, Result};
use crate::state::groups::GroupRegistry;

/// Calibration data bound to a group
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationEntry {
    /// Chart image or calibration file the swatches came from
    pub source_file: Option<PathBuf>,
    pub swatches: SwatchSet,
    pub is_fallback: bool,
}

/// Outcome of resolving one group
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Group(Arc<CalibrationEntry>),
    Fallback(Arc<CalibrationEntry>),
    /// Calibration is disabled for this run
    NotRequired,
    Missing,
}

impl Resolution {
    pub fn entry(&self) -> Option<&Arc<CalibrationEntry>> {
        match self {
            Resolution::Group(entry) | Resolution::Fallback(entry) => Some(entry),
            Resolution::NotRequired | Resolution::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Resolution::Missing)
    }
}

/// Result of resolving every group before a run
#[derive(Debug, Default)]
pub struct CalibrationReport {
    pub resolved: BTreeMap<String, Resolution>,
    /// Groups with neither a chart nor a fallback
    pub missing: Vec<String>,
    /// Groups whose chart could not be measured
    pub failures: Vec<(String, Error)>,
}

impl CalibrationReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.failures.is_empty()
    }

    /// Calibration per group.
    ///
    /// Fails with `CalibrationFailed` when any chart could not be measured,
    /// keeping each group's reason, otherwise with `MissingCalibration`
    /// naming every group that has no calibration.
    pub fn into_result(self) -> Result<HashMap<String, Option<Arc<CalibrationEntry>>>> {
        let mut missing = self.missing;
        missing.sort();
        missing.dedup();

        if !self.failures.is_empty() {
            return Err(Error::CalibrationFailed {
                failures: self
                    .failures
                    .into_iter()
                    .map(|(group, e)| (group, e.to_string()))
                    .collect(),
                missing,
            });
        }
        if !missing.is_empty() {
            return Err(Error::MissingCalibration(missing));
        }
        Ok(self
            .resolved
            .into_iter()
            .map(|(group, resolution)| {
                let entry = resolution.entry().cloned();
                (group, entry)
            })
            .collect())
    }
}

/// Removes a group from the in-flight set when detection ends
struct DetectionGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    group: String,
}

impl Drop for DetectionGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.group);
    }
}

/// Owns one calibration entry per group plus an optional global fallback
#[derive(Debug, Default)]
pub struct CalibrationRegistry {
    entries: Mutex<HashMap<String, Arc<CalibrationEntry>>>,
    fallback: Option<Arc<CalibrationEntry>>,
    disabled: bool,
    in_flight: Mutex<HashSet<String>>,
}

impl CalibrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operator opt-out: every group resolves to `NotRequired`
    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Load the default chart used by groups without their own chart
    pub fn load_fallback(&mut self, path: &Path) -> Result<()> {
        let swatches = SwatchSet::load(path)?;
        info!("Loaded default calibration from {}", path.display());
        self.set_fallback(Some(path.to_path_buf()), swatches);
        Ok(())
    }

    pub fn set_fallback(&mut self, source_file: Option<PathBuf>, swatches: SwatchSet) {
        self.fallback = Some(Arc::new(CalibrationEntry {
            source_file,
            swatches,
            is_fallback: true,
        }));
    }

    pub fn fallback(&self) -> Option<Arc<CalibrationEntry>> {
        self.fallback.clone()
    }

    /// Store manually extracted swatches for a group, replacing any entry
    pub fn set_group_swatches(
        &self,
        group: &str,
        source_file: Option<PathBuf>,
        rows: &[[f32; 3]],
    ) -> Result<Arc<CalibrationEntry>> {
        let swatches = SwatchSet::from_rows(rows).ok_or_else(|| Error::SwatchExtraction {
            group: group.to_string(),
            reason: format!("expected {SWATCH_COUNT} swatches, found {}", rows.len()),
        })?;
        let entry = Arc::new(CalibrationEntry {
            source_file,
            swatches,
            is_fallback: false,
        });
        self.lock_entries()
            .insert(group.to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    pub fn entry(&self, group: &str) -> Option<Arc<CalibrationEntry>> {
        self.lock_entries().get(group).cloned()
    }

    /// Drop a group's entry, e.g. when a new chart is assigned
    pub fn remove_group(&self, group: &str) -> Option<Arc<CalibrationEntry>> {
        self.lock_entries().remove(group)
    }

    /// Forget every group entry and the fallback
    pub fn clear(&mut self) {
        self.clear_groups();
        self.fallback = None;
    }

    /// Forget every group entry; the fallback and the disabled flag stay
    pub fn clear_groups(&self) {
        self.lock_entries().clear();
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<CalibrationEntry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve the calibration for one group.
    ///
    /// Detection on the group's chart runs at most once at a time per group;
    /// a concurrent request for the same group fails with
    /// `DetectionInProgress`.
    pub fn resolve(
        &self,
        group: &str,
        groups: &GroupRegistry,
        detector: &dyn SwatchDetector,
    ) -> Result<Resolution> {
        if self.disabled {
            return Ok(Resolution::NotRequired);
        }

        if let Some(entry) = self.entry(group) {
            return Ok(Resolution::Group(entry));
        }

        if let Some(chart) = groups.chart_for(group) {
            let entry = self.detect(group, chart, detector)?;
            return Ok(Resolution::Group(entry));
        }

        if let Some(fallback) = &self.fallback {
            debug!("Group '{}' uses the default calibration", group);
            return Ok(Resolution::Fallback(Arc::clone(fallback)));
        }

        Ok(Resolution::Missing)
    }

    fn detect(
        &self,
        group: &str,
        chart: &Path,
        detector: &dyn SwatchDetector,
    ) -> Result<Arc<CalibrationEntry>> {
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if !in_flight.insert(group.to_string()) {
                return Err(Error::DetectionInProgress(group.to_string()));
            }
        }
        let _guard = DetectionGuard {
            in_flight: &self.in_flight,
            group: group.to_string(),
        };

        info!("Detecting chart for group '{}': {}", group, chart.display());
        let rows = detector
            .detect(chart)
            .map_err(|e| Error::SwatchExtraction {
                group: group.to_string(),
                reason: e.to_string(),
            })?;

        self.set_group_swatches(group, Some(chart.to_path_buf()), &rows)
    }

    /// Resolve every group, collecting problems instead of stopping at the
    /// first one.
    pub fn resolve_all(&self, groups: &GroupRegistry, detector: &dyn SwatchDetector) -> CalibrationReport {
        let mut report = CalibrationReport::default();
        for name in groups.names() {
            match self.resolve(&name, groups, detector) {
                Ok(Resolution::Missing) => {
                    warn!("No calibration for group '{}'", name);
                    report.missing.push(name.clone());
                    report.resolved.insert(name, Resolution::Missing);
                }
                Ok(resolution) => {
                    report.resolved.insert(name, resolution);
                }
                Err(e) => {
                    warn!("Calibration failed for group '{}': {}", name, e);
                    report.failures.push((name, e));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::groups::{GroupingRules, DEFAULT_GROUP};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FixedDetector {
        rows: usize,
        calls: AtomicUsize,
    }

    impl FixedDetector {
        fn new(rows: usize) -> Self {
            Self {
                rows,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl SwatchDetector for FixedDetector {
        fn detect(&self, _chart: &Path) -> Result<Vec<[f32; 3]>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![[0.5, 0.5, 0.5]; self.rows])
        }
    }

    fn groups_with(names: &[&str]) -> GroupRegistry {
        let mut groups = GroupRegistry::new(GroupingRules::default());
        for name in names {
            groups.add_member(name, Path::new(&format!("/in/{name}.nef")));
        }
        groups
    }

    #[test]
    fn test_fallback_is_marked() {
        let groups = groups_with(&[DEFAULT_GROUP]);
        let mut registry = CalibrationRegistry::new();
        registry.set_fallback(None, SwatchSet::new([[0.2; 3]; SWATCH_COUNT]));

        let resolution = registry
            .resolve(DEFAULT_GROUP, &groups, &FixedDetector::new(24))
            .unwrap();

        match resolution {
            Resolution::Fallback(entry) => assert!(entry.is_fallback),
            other => panic!("unexpected resolution {other:?}"),
        }
    }

    #[test]
    fn test_missing_without_fallback() {
        let groups = groups_with(&["A"]);
        let registry = CalibrationRegistry::new();

        let report = registry.resolve_all(&groups, &FixedDetector::new(24));

        assert_eq!(report.missing, vec!["A".to_string()]);
        assert!(matches!(
            report.into_result(),
            Err(Error::MissingCalibration(groups)) if groups == vec!["A".to_string()]
        ));
    }

    #[test]
    fn test_disabled_bypasses_resolution() {
        let groups = groups_with(&["A", "B"]);
        let mut registry = CalibrationRegistry::new();
        registry.set_disabled(true);

        let map = registry
            .resolve_all(&groups, &FixedDetector::new(24))
            .into_result()
            .unwrap();

        assert_eq!(map.len(), 2);
        assert!(map.values().all(Option::is_none));
    }

    #[test]
    fn test_chart_detection_is_cached() {
        let mut groups = groups_with(&["A"]);
        groups.set_chart_assignment("A", Path::new("/in/A.nef"));
        let registry = CalibrationRegistry::new();
        let detector = FixedDetector::new(24);

        let first = registry.resolve("A", &groups, &detector).unwrap();
        let second = registry.resolve("A", &groups, &detector).unwrap();

        assert_eq!(first, second);
        assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
        let entry = first.entry().expect("group entry");
        assert!(!entry.is_fallback);
        assert_eq!(entry.source_file.as_deref(), Some(Path::new("/in/A.nef")));
    }

    #[test]
    fn test_bad_swatch_count_is_scoped_to_group() {
        let mut groups = groups_with(&["A", "B"]);
        groups.set_chart_assignment("A", Path::new("/in/A.nef"));
        let mut registry = CalibrationRegistry::new();
        registry.set_fallback(None, SwatchSet::new([[0.2; 3]; SWATCH_COUNT]));

        let report = registry.resolve_all(&groups, &FixedDetector::new(23));

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "A");
        assert!(matches!(report.failures[0].1, Error::SwatchExtraction { .. }));
        assert!(matches!(report.resolved.get("B"), Some(Resolution::Fallback(_))));
    }

    #[test]
    fn test_detection_failure_keeps_reason() {
        let mut groups = groups_with(&["A", "B"]);
        groups.set_chart_assignment("A", Path::new("/in/A.nef"));
        let registry = CalibrationRegistry::new();

        let result = registry
            .resolve_all(&groups, &FixedDetector::new(23))
            .into_result();

        match result {
            Err(Error::CalibrationFailed { failures, missing }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "A");
                assert!(failures[0].1.contains("expected 24 swatches, found 23"));
                assert_eq!(missing, vec!["B".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_set_group_swatches_replaces_entry() {
        let registry = CalibrationRegistry::new();
        registry
            .set_group_swatches("A", None, &[[0.1; 3]; SWATCH_COUNT])
            .unwrap();
        registry
            .set_group_swatches("A", None, &[[0.9; 3]; SWATCH_COUNT])
            .unwrap();

        let entry = registry.entry("A").expect("entry");
        assert_eq!(entry.swatches.rows()[0], [0.9; 3]);
        assert!(registry.set_group_swatches("A", None, &[[0.1; 3]; 3]).is_err());
        assert!(registry.remove_group("A").is_some());
        assert!(registry.entry("A").is_none());
    }

    #[test]
    fn test_load_fallback_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("default.json");
        SwatchSet::new([[0.3; 3]; SWATCH_COUNT]).save(&path).unwrap();

        let mut registry = CalibrationRegistry::new();
        registry.load_fallback(&path).unwrap();

        let fallback = registry.fallback().expect("fallback");
        assert!(fallback.is_fallback);
        assert_eq!(fallback.source_file.as_deref(), Some(path.as_path()));
    }

    #[derive(Default)]
    struct BlockingDetector {
        entered: AtomicBool,
        release: AtomicBool,
    }

    impl SwatchDetector for BlockingDetector {
        fn detect(&self, _chart: &Path) -> Result<Vec<[f32; 3]>> {
            self.entered.store(true, Ordering::SeqCst);
            while !self.release.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(vec![[0.5; 3]; SWATCH_COUNT])
        }
    }

    #[test]
    fn test_concurrent_detection_is_rejected() {
        let mut groups = groups_with(&["A"]);
        groups.set_chart_assignment("A", Path::new("/in/A.nef"));
        let registry = CalibrationRegistry::new();
        let detector = BlockingDetector::default();

        thread::scope(|s| {
            let first = s.spawn(|| registry.resolve("A", &groups, &detector));
            while !detector.entered.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }

            let second = registry.resolve("A", &groups, &detector);
            detector.release.store(true, Ordering::SeqCst);

            assert!(matches!(second, Err(Error::DetectionInProgress(g)) if g == "A"));
            assert!(first.join().unwrap().is_ok());
        });

        // Guard released: the entry is now cached
        assert!(registry.entry("A").is_some());
    }
}
