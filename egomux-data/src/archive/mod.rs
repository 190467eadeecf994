//! Schema-on-read access to the per-take hierarchical archive.
//!
//! The archive is opened once per sample fetch through [`ArchiveStore::open`]
//! and dropped when the fetch completes, so parallel workers never share a
//! handle.

mod memory;

#[cfg(feature = "hdf5")]
mod hdf5_store;

pub use memory::{AttrValue, MemoryArchive, MemoryStore};

#[cfg(feature = "hdf5")]
pub use hdf5_store::Hdf5Store;

use ndarray::ArrayD;
use std::fmt;
use thiserror::Error;

/// Errors raised while reading the archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to open archive {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Dataset not found: {0}")]
    MissingDataset(String),

    #[error("Index {index} out of bounds for dataset {dataset} of length {len}")]
    IndexOutOfBounds {
        dataset: String,
        index: usize,
        len: usize,
    },

    #[error("Failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Attribute {group}@{name} has unexpected type")]
    AttributeType { group: String, name: String },
}

/// Read-only view of an opened archive.
pub trait ArchiveReader {
    /// Whether a group or dataset exists at `path`.
    fn contains(&self, path: &str) -> bool;

    /// Integer attribute of a group, `None` if the attribute is absent.
    fn attr_usize(&self, group: &str, name: &str) -> Result<Option<usize>, ArchiveError>;

    /// String attribute of a group; byte strings are decoded as UTF-8.
    fn attr_string(&self, group: &str, name: &str) -> Result<Option<String>, ArchiveError>;

    /// Read `dataset[index]` along the first axis, converted to `f32`.
    fn read_row(&self, dataset: &str, index: usize) -> Result<ArrayD<f32>, ArchiveError>;
}

/// Opens fresh archive handles.
pub trait ArchiveStore: Send + Sync {
    fn open(&self) -> Result<Box<dyn ArchiveReader>, ArchiveError>;
}

/// Archive location of one take: `data/{surgery_type}/{procedure_id}/take/{take_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TakePath(String);

impl TakePath {
    pub fn new(surgery_type: &str, procedure_id: &str, take_id: &str) -> Self {
        Self(format!("data/{surgery_type}/{procedure_id}/take/{take_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path of a child group or dataset.
    pub fn child(&self, relative: &str) -> String {
        format!("{}/{}", self.0, relative)
    }

    pub fn sources(&self) -> String {
        self.child("sources")
    }

    pub fn frames(&self) -> String {
        self.child("frames/rgb")
    }
}

impl fmt::Display for TakePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
