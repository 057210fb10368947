use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::groups::GroupRegistry;
use crate::error::{Error, Result};

/// Supported RAW file extensions (common formats)
pub const RAW_EXTENSIONS: [&str; 16] = [
    "nef", "dng", "cr2", "cr3", "arw", "raf", "orf", "rw2",
    "pef", "srw", "erf", "kdc", "dcr", "mos", "raw", "rwl",
];

/// Check if this is a RAW file by extension
pub fn is_raw_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| RAW_EXTENSIONS.contains(&ext.as_str()))
}

/// Options controlling how a folder is scanned
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectOptions {
    /// Apply grouping rules and ignore strings; otherwise one flat group
    pub use_import_rules: bool,
    pub look_in_subfolders: bool,
    pub ignore_formats: bool,
    /// Comma-separated, case-insensitive substrings of names to skip
    pub ignore_string: String,
}

impl CollectOptions {
    fn ignore_strings(&self) -> Vec<String> {
        if !self.ignore_formats {
            return Vec::new();
        }
        self.ignore_string
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// One image found during collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedImage {
    pub path: PathBuf,
    /// Folder of the image relative to the selected folder
    pub relative_dir: PathBuf,
    pub group: String,
}

/// Scans an input folder for RAW images and sorts them into groups
#[derive(Debug, Clone, Default)]
pub struct Library {
    options: CollectOptions,
}

impl Library {
    pub fn new(options: CollectOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CollectOptions {
        &self.options
    }

    /// Collect every supported image under `base`, in sorted name order.
    ///
    /// Fails only when `base` itself cannot be read. Unreadable subfolders are
    /// logged and skipped.
    pub fn collect(&self, base: &Path, groups: &mut GroupRegistry) -> Result<Vec<CollectedImage>> {
        std::fs::read_dir(base).map_err(|source| Error::InputDirectory {
            path: base.to_path_buf(),
            source,
        })?;

        info!("Scanning folder: {}", base.display());

        let images = if self.options.use_import_rules {
            self.collect_with_rules(base, groups)
        } else {
            Self::collect_flat(base, groups)
        };

        info!("Collected {} images in {} groups", images.len(), groups.len());
        Ok(images)
    }

    /// Top level only, every image in a group named after the folder
    fn collect_flat(base: &Path, groups: &mut GroupRegistry) -> Vec<CollectedImage> {
        let group = base
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| base.display().to_string());

        let mut images = Vec::new();
        for entry in WalkDir::new(base)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() || !is_raw_file(path) {
                continue;
            }
            groups.add_member(&group, path);
            images.push(CollectedImage {
                path: path.to_path_buf(),
                relative_dir: PathBuf::new(),
                group: group.clone(),
            });
        }
        images
    }

    fn collect_with_rules(&self, base: &Path, groups: &mut GroupRegistry) -> Vec<CollectedImage> {
        let ignore = self.options.ignore_strings();
        let max_depth = if self.options.look_in_subfolders {
            usize::MAX
        } else {
            1
        };

        let mut images = Vec::new();
        for entry in WalkDir::new(base)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Error accessing folder: {}", e);
                    continue;
                }
            };

            let path = entry.path();
            if !entry.file_type().is_file() || !is_raw_file(path) {
                continue;
            }

            let filename = entry.file_name().to_string_lossy().to_string();
            let full = path.to_string_lossy().to_lowercase();
            let lower_name = filename.to_lowercase();
            if ignore
                .iter()
                .any(|s| lower_name.contains(s.as_str()) || full.contains(s.as_str()))
            {
                debug!("Ignoring file: {}", filename);
                continue;
            }

            let relative_dir = path
                .parent()
                .and_then(|parent| parent.strip_prefix(base).ok())
                .map(Path::to_path_buf)
                .unwrap_or_default();

            let group = groups.assign_group(path, &relative_dir, &filename);
            images.push(CollectedImage {
                path: path.to_path_buf(),
                relative_dir,
                group,
            });
        }
        images
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::groups::{GroupingRules, DEFAULT_GROUP, ROOT_FILES_GROUP};
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, rel: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().expect("has parent")).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "b_002.NEF");
        touch(dir.path(), "a_001.nef");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "preview_skip.nef");
        touch(dir.path(), "vase/IMG_1.CR2");
        touch(dir.path(), "vase/deep/IMG_2.dng");
        dir
    }

    fn names(images: &[CollectedImage]) -> Vec<String> {
        images
            .iter()
            .map(|i| i.path.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_is_raw_file() {
        assert!(is_raw_file(Path::new("x/DSC_1.NEF")));
        assert!(is_raw_file(Path::new("a.rw2")));
        assert!(!is_raw_file(Path::new("a.jpg")));
        assert!(!is_raw_file(Path::new("nef")));
    }

    #[test]
    fn test_flat_collection_uses_folder_name() {
        let dir = fixture();
        let mut groups = GroupRegistry::new(GroupingRules::default());
        let images = Library::new(CollectOptions::default())
            .collect(dir.path(), &mut groups)
            .unwrap();

        assert_eq!(names(&images), vec!["a_001.nef", "b_002.NEF", "preview_skip.nef"]);
        let folder = dir.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(images.iter().all(|i| i.group == folder));
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn test_rules_with_subfolders_and_ignore() {
        let dir = fixture();
        let mut groups = GroupRegistry::new(GroupingRules {
            group_by_subfolder: true,
            ..Default::default()
        });
        let options = CollectOptions {
            use_import_rules: true,
            look_in_subfolders: true,
            ignore_formats: true,
            ignore_string: " skip , ".to_string(),
        };
        let images = Library::new(options).collect(dir.path(), &mut groups).unwrap();

        assert_eq!(
            names(&images),
            vec!["a_001.nef", "b_002.NEF", "IMG_1.CR2", "IMG_2.dng"]
        );
        assert_eq!(images[0].group, DEFAULT_GROUP);
        assert_eq!(images[2].group, "vase");
        assert_eq!(images[3].group, "vase");
        assert_eq!(images[3].relative_dir, PathBuf::from("vase/deep"));
        assert_ne!(images[0].group, ROOT_FILES_GROUP);
    }

    #[test]
    fn test_rules_without_subfolders_stay_top_level() {
        let dir = fixture();
        let mut groups = GroupRegistry::new(GroupingRules {
            group_by_prefix: true,
            prefix_separator: "_".to_string(),
            ..Default::default()
        });
        let options = CollectOptions {
            use_import_rules: true,
            ..Default::default()
        };
        let images = Library::new(options).collect(dir.path(), &mut groups).unwrap();

        assert_eq!(names(&images), vec!["a_001.nef", "b_002.NEF", "preview_skip.nef"]);
        assert_eq!(groups.names(), vec!["a", "b", "preview"]);
    }

    #[test]
    fn test_missing_folder_is_fatal() {
        let mut groups = GroupRegistry::default();
        let result = Library::default().collect(Path::new("/definitely/not/here"), &mut groups);
        assert!(matches!(result, Err(Error::InputDirectory { .. })));
    }
}
