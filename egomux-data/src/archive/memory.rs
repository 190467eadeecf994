//! In-memory archive backend.
//!
//! Mirrors the group/dataset/attribute layout of the on-disk archive so the
//! assembler can run against synthetic takes.

use super::{ArchiveError, ArchiveReader, ArchiveStore};
use ndarray::{ArrayD, Axis};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A group attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

/// Datasets and group attributes keyed by slash-separated path.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    datasets: HashMap<String, ArrayD<f32>>,
    attrs: HashMap<String, HashMap<String, AttrValue>>,
    groups: HashSet<String>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    fn register_parents(&mut self, path: &str) {
        let mut prefix = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            self.groups.insert(prefix.clone());
        }
    }

    /// Store a dataset; parent groups are created implicitly.
    pub fn insert_dataset(&mut self, path: &str, data: ArrayD<f32>) {
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.register_parents(parent);
        }
        self.datasets.insert(path.to_string(), data);
    }

    /// Set an attribute on a group, creating the group if needed.
    pub fn set_attr(&mut self, group: &str, name: &str, value: impl Into<AttrValue>) {
        self.register_parents(group);
        self.attrs
            .entry(group.to_string())
            .or_default()
            .insert(name.to_string(), value.into());
    }

    pub fn into_store(self) -> MemoryStore {
        MemoryStore {
            archive: Arc::new(self),
        }
    }
}

impl ArchiveReader for MemoryArchive {
    fn contains(&self, path: &str) -> bool {
        self.datasets.contains_key(path) || self.groups.contains(path)
    }

    fn attr_usize(&self, group: &str, name: &str) -> Result<Option<usize>, ArchiveError> {
        match self.attrs.get(group).and_then(|a| a.get(name)) {
            None => Ok(None),
            Some(AttrValue::Int(v)) if *v >= 0 => Ok(Some(*v as usize)),
            Some(_) => Err(ArchiveError::AttributeType {
                group: group.to_string(),
                name: name.to_string(),
            }),
        }
    }

    fn attr_string(&self, group: &str, name: &str) -> Result<Option<String>, ArchiveError> {
        match self.attrs.get(group).and_then(|a| a.get(name)) {
            None => Ok(None),
            Some(AttrValue::Text(s)) => Ok(Some(s.clone())),
            Some(AttrValue::Bytes(b)) => Ok(Some(String::from_utf8_lossy(b).into_owned())),
            Some(AttrValue::Int(_)) => Err(ArchiveError::AttributeType {
                group: group.to_string(),
                name: name.to_string(),
            }),
        }
    }

    fn read_row(&self, dataset: &str, index: usize) -> Result<ArrayD<f32>, ArchiveError> {
        let data = self
            .datasets
            .get(dataset)
            .ok_or_else(|| ArchiveError::MissingDataset(dataset.to_string()))?;
        let len = data.shape().first().copied().unwrap_or(0);
        if data.ndim() == 0 || index >= len {
            return Err(ArchiveError::IndexOutOfBounds {
                dataset: dataset.to_string(),
                index,
                len,
            });
        }
        Ok(data.index_axis(Axis(0), index).to_owned())
    }
}

/// Shares one [`MemoryArchive`] across fetches.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    archive: Arc<MemoryArchive>,
}

struct MemoryHandle(Arc<MemoryArchive>);

impl ArchiveReader for MemoryHandle {
    fn contains(&self, path: &str) -> bool {
        self.0.contains(path)
    }

    fn attr_usize(&self, group: &str, name: &str) -> Result<Option<usize>, ArchiveError> {
        self.0.attr_usize(group, name)
    }

    fn attr_string(&self, group: &str, name: &str) -> Result<Option<String>, ArchiveError> {
        self.0.attr_string(group, name)
    }

    fn read_row(&self, dataset: &str, index: usize) -> Result<ArrayD<f32>, ArchiveError> {
        self.0.read_row(dataset, index)
    }
}

impl ArchiveStore for MemoryStore {
    fn open(&self) -> Result<Box<dyn ArchiveReader>, ArchiveError> {
        Ok(Box::new(MemoryHandle(Arc::clone(&self.archive))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, IxDyn};

    #[test]
    fn test_groups_created_implicitly() {
        let mut archive = MemoryArchive::new();
        archive.insert_dataset("data/a/1/take/1/eye_gaze/coordinates", ArrayD::zeros(IxDyn(&[2, 3, 3])));
        assert!(archive.contains("data/a/1/take/1"));
        assert!(archive.contains("data/a/1/take/1/eye_gaze"));
        assert!(archive.contains("data/a/1/take/1/eye_gaze/coordinates"));
        assert!(!archive.contains("data/a/1/take/1/audio"));
    }

    #[test]
    fn test_read_row() {
        let mut archive = MemoryArchive::new();
        let data = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        archive.insert_dataset("x/values", data.into_dyn());
        let row = archive.read_row("x/values", 1).unwrap();
        assert_eq!(row.as_slice().unwrap(), &[3.0, 4.0]);
        assert!(matches!(
            archive.read_row("x/values", 2),
            Err(ArchiveError::IndexOutOfBounds { len: 2, .. })
        ));
        assert!(matches!(archive.read_row("x/other", 0), Err(ArchiveError::MissingDataset(_))));
    }

    #[test]
    fn test_attributes() {
        let mut archive = MemoryArchive::new();
        archive.set_attr("t/sources", "source_count", 2_i64);
        archive.set_attr("t/sources", "source_0", "head_surgeon");
        archive.set_attr("t/sources", "source_1", AttrValue::Bytes(b"or_light".to_vec()));

        assert_eq!(archive.attr_usize("t/sources", "source_count").unwrap(), Some(2));
        assert_eq!(archive.attr_string("t/sources", "source_1").unwrap().as_deref(), Some("or_light"));
        assert_eq!(archive.attr_string("t/sources", "source_9").unwrap(), None);
        assert!(archive.attr_usize("t/sources", "source_0").is_err());
    }

    #[test]
    fn test_store_opens_independent_handles() {
        let mut archive = MemoryArchive::new();
        archive.set_attr("g", "n", 1_i64);
        let store = archive.into_store();
        let a = store.open().unwrap();
        let b = store.open().unwrap();
        assert!(a.contains("g"));
        assert!(b.contains("g"));
    }
}
