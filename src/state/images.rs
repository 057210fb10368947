use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::data::{ImageId, ImageRecord, ImageStatus};

/// Arena of image records in collection order, indexed by input path
#[derive(Debug, Default)]
pub struct ImageStore {
    records: Vec<ImageRecord>,
    by_path: HashMap<PathBuf, ImageId>,
}

impl ImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an image. Returns the existing id if the path is already known.
    pub fn insert(&mut self, input_path: PathBuf, relative_path: PathBuf, group: String) -> ImageId {
        if let Some(id) = self.by_path.get(&input_path) {
            return *id;
        }
        let id = ImageId(self.records.len());
        self.by_path.insert(input_path.clone(), id);
        self.records
            .push(ImageRecord::new(id, input_path, relative_path, group));
        id
    }

    pub fn get(&self, id: ImageId) -> Option<&ImageRecord> {
        self.records.get(id.0)
    }

    pub fn get_mut(&mut self, id: ImageId) -> Option<&mut ImageRecord> {
        self.records.get_mut(id.0)
    }

    pub fn id_of(&self, path: &Path) -> Option<ImageId> {
        self.by_path.get(path).copied()
    }

    pub fn by_path(&self, path: &Path) -> Option<&ImageRecord> {
        self.id_of(path).and_then(|id| self.get(id))
    }

    pub fn by_path_mut(&mut self, path: &Path) -> Option<&mut ImageRecord> {
        let id = self.id_of(path)?;
        self.get_mut(id)
    }

    /// Move an image to a new status if that is a forward step.
    /// Returns false when the transition was refused.
    pub fn advance(&mut self, path: &Path, status: ImageStatus) -> bool {
        match self.by_path_mut(path) {
            Some(record) if record.status.can_advance_to(status) => {
                record.status = status;
                true
            }
            _ => false,
        }
    }

    /// Records in collection order
    pub fn iter(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ImageRecord> {
        self.records.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.by_path.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent_per_path() {
        let mut store = ImageStore::new();
        let a = store.insert("/a.nef".into(), "a.nef".into(), "G".into());
        let b = store.insert("/b.nef".into(), "b.nef".into(), "G".into());
        let again = store.insert("/a.nef".into(), "a.nef".into(), "Other".into());

        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(a).map(|r| r.group.as_str()), Some("G"));
    }

    #[test]
    fn test_advance_refuses_backward_steps() {
        let mut store = ImageStore::new();
        store.insert("/a.nef".into(), "a.nef".into(), "G".into());
        let path = Path::new("/a.nef");

        assert!(store.advance(path, ImageStatus::Started));
        assert!(store.advance(path, ImageStatus::Finished));
        assert!(!store.advance(path, ImageStatus::Started));
        assert!(!store.advance(Path::new("/missing.nef"), ImageStatus::Started));
        assert_eq!(store.by_path(path).map(|r| r.status), Some(ImageStatus::Finished));
    }
}
