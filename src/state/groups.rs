/// Group membership and chart assignment
///
/// Every collected image belongs to exactly one group. Groups share a
/// calibration context and at most one chart image.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Group for files at the top level when grouping by subfolder
pub const ROOT_FILES_GROUP: &str = "Root Files";

/// Group used when no grouping rule applies
pub const DEFAULT_GROUP: &str = "All Images";

/// How images are sorted into groups
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingRules {
    pub group_by_subfolder: bool,
    pub group_by_prefix: bool,
    /// Separator for prefix grouping; surrounding whitespace is ignored
    pub prefix_separator: String,
}

/// A named partition of images
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    /// Members in collection order
    pub members: Vec<PathBuf>,
    /// Image designated as this group's colour reference
    pub chart: Option<PathBuf>,
}

impl Group {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: Vec::new(),
            chart: None,
        }
    }
}

/// Tracks image -> group membership and per-group charts
#[derive(Debug, Default)]
pub struct GroupRegistry {
    rules: GroupingRules,
    groups: Vec<Group>,
    index: HashMap<String, usize>,
    membership: HashMap<PathBuf, String>,
}

impl GroupRegistry {
    pub fn new(rules: GroupingRules) -> Self {
        Self {
            rules,
            ..Default::default()
        }
    }

    pub fn rules(&self) -> &GroupingRules {
        &self.rules
    }

    /// Work out the group name for one image without recording it
    pub fn group_name_for(&self, relative_path: &Path, filename: &str) -> String {
        if self.rules.group_by_subfolder && !relative_path.as_os_str().is_empty() {
            let normalized = relative_path.to_string_lossy().replace('\\', "/");
            return normalized
                .split('/')
                .find(|part| !part.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| ROOT_FILES_GROUP.to_string());
        }

        let separator = self.rules.prefix_separator.trim();
        if self.rules.group_by_prefix && !separator.is_empty() {
            if let Some((prefix, _)) = filename.split_once(separator) {
                return prefix.to_string();
            }
            // No separator: the file becomes its own group
            return Path::new(filename)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| filename.to_string());
        }

        DEFAULT_GROUP.to_string()
    }

    /// Decide and record the group for one collected image.
    ///
    /// `relative_path` is the folder of the image relative to the selected
    /// input folder (empty for top-level files).
    pub fn assign_group(&mut self, image_path: &Path, relative_path: &Path, filename: &str) -> String {
        let name = self.group_name_for(relative_path, filename);
        debug!(
            "File: {}, relative_path: '{}', group: '{}'",
            filename,
            relative_path.display(),
            name
        );
        self.add_member(&name, image_path);
        name
    }

    /// Put an image into a named group, bypassing the rules
    pub fn add_member(&mut self, group: &str, image_path: &Path) {
        if let Some(previous) = self.membership.get(image_path) {
            if previous == group {
                return;
            }
            let previous = previous.clone();
            if let Some(old) = self.group_mut(&previous) {
                old.members.retain(|p| p != image_path);
            }
        }

        let idx = match self.index.get(group) {
            Some(idx) => *idx,
            None => {
                self.groups.push(Group::new(group));
                self.index.insert(group.to_string(), self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        self.groups[idx].members.push(image_path.to_path_buf());
        self.membership
            .insert(image_path.to_path_buf(), group.to_string());
    }

    /// Designate `image_path` as the chart for `group`.
    ///
    /// Returns the previously assigned chart so the caller can clear its flags.
    pub fn set_chart_assignment(&mut self, group: &str, image_path: &Path) -> Option<PathBuf> {
        if !self.index.contains_key(group) {
            self.groups.push(Group::new(group));
            self.index.insert(group.to_string(), self.groups.len() - 1);
        }
        let entry = self.group_mut(group)?;
        let previous = entry.chart.replace(image_path.to_path_buf());
        previous.filter(|p| p != image_path)
    }

    pub fn clear_chart_assignment(&mut self, group: &str) -> Option<PathBuf> {
        self.group_mut(group).and_then(|g| g.chart.take())
    }

    pub fn chart_for(&self, group: &str) -> Option<&Path> {
        self.group(group).and_then(|g| g.chart.as_deref())
    }

    pub fn group_of(&self, image_path: &Path) -> Option<&str> {
        self.membership.get(image_path).map(String::as_str)
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.index.get(name).map(|idx| &self.groups[*idx])
    }

    fn group_mut(&mut self, name: &str) -> Option<&mut Group> {
        let idx = *self.index.get(name)?;
        self.groups.get_mut(idx)
    }

    /// Groups in order of first appearance
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Drop all groups and charts; the rules stay
    pub fn clear(&mut self) {
        self.groups.clear();
        self.index.clear();
        self.membership.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(subfolder: bool, prefix: bool, separator: &str) -> GroupRegistry {
        GroupRegistry::new(GroupingRules {
            group_by_subfolder: subfolder,
            group_by_prefix: prefix,
            prefix_separator: separator.to_string(),
        })
    }

    #[test]
    fn test_subfolder_grouping_uses_first_component() {
        let mut groups = registry(true, true, "_");
        let name = groups.assign_group(
            Path::new("/in/vase/cross/IMG_1.NEF"),
            Path::new("vase/cross"),
            "IMG_1.NEF",
        );
        assert_eq!(name, "vase");
    }

    #[test]
    fn test_top_level_files_fall_through_to_prefix() {
        let groups = registry(true, true, "_");
        assert_eq!(groups.group_name_for(Path::new(""), "CAM01_IMG1.NEF"), "CAM01");
    }

    #[test]
    fn test_separator_only_relative_path_is_root_files() {
        let groups = registry(true, false, "");
        assert_eq!(groups.group_name_for(Path::new("/"), "a.nef"), ROOT_FILES_GROUP);
    }

    #[test]
    fn test_prefix_fallback_makes_single_file_group() {
        let groups = registry(false, true, " - ");
        assert_eq!(groups.group_name_for(Path::new(""), "left-01.NEF"), "left-01");
        assert_eq!(groups.group_name_for(Path::new(""), "left - 01.NEF"), "left");
    }

    #[test]
    fn test_default_group() {
        let groups = registry(false, true, "   ");
        assert_eq!(groups.group_name_for(Path::new("sub"), "a_b.nef"), DEFAULT_GROUP);
    }

    #[test]
    fn test_membership_keeps_collection_order() {
        let mut groups = registry(false, false, "");
        for name in ["c.nef", "a.nef", "b.nef"] {
            groups.assign_group(Path::new(name), Path::new(""), name);
        }
        let group = groups.group(DEFAULT_GROUP).expect("group exists");
        assert_eq!(
            group.members,
            vec![PathBuf::from("c.nef"), PathBuf::from("a.nef"), PathBuf::from("b.nef")]
        );
        assert_eq!(groups.group_of(Path::new("a.nef")), Some(DEFAULT_GROUP));
    }

    #[test]
    fn test_chart_assignment_replaces_previous() {
        let mut groups = registry(false, false, "");
        groups.assign_group(Path::new("a.nef"), Path::new(""), "a.nef");
        groups.assign_group(Path::new("b.nef"), Path::new(""), "b.nef");

        assert_eq!(groups.set_chart_assignment(DEFAULT_GROUP, Path::new("a.nef")), None);
        assert_eq!(
            groups.set_chart_assignment(DEFAULT_GROUP, Path::new("b.nef")),
            Some(PathBuf::from("a.nef"))
        );
        assert_eq!(groups.chart_for(DEFAULT_GROUP), Some(Path::new("b.nef")));
        // Re-assigning the same chart reports nothing to clear
        assert_eq!(groups.set_chart_assignment(DEFAULT_GROUP, Path::new("b.nef")), None);
    }
}
