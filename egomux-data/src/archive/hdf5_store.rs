//! HDF5 archive backend (requires the `hdf5` feature).

use super::{ArchiveError, ArchiveReader, ArchiveStore};
use hdf5::types::{VarLenAscii, VarLenUnicode};
use hdf5::{Conversion, File};
use ndarray::{ArrayD, IxDyn, SliceInfo, SliceInfoElem};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Opens the archive file read-only for every fetch.
#[derive(Debug, Clone)]
pub struct Hdf5Store {
    path: PathBuf,
}

impl Hdf5Store {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ArchiveStore for Hdf5Store {
    fn open(&self) -> Result<Box<dyn ArchiveReader>, ArchiveError> {
        debug!("Opening HDF5 archive: {}", self.path.display());
        let file = File::open(&self.path).map_err(|e| ArchiveError::Open {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(Hdf5Reader { file }))
    }
}

struct Hdf5Reader {
    file: File,
}

fn read_error(path: &str, e: impl ToString) -> ArchiveError {
    ArchiveError::Read {
        path: path.to_string(),
        reason: e.to_string(),
    }
}

impl Hdf5Reader {
    fn attribute(&self, group: &str, name: &str) -> Result<Option<hdf5::Attribute>, ArchiveError> {
        if !self.contains(group) {
            return Ok(None);
        }
        let group_handle = self.file.group(group).map_err(|e| read_error(group, e))?;
        let names = group_handle.attr_names().map_err(|e| read_error(group, e))?;
        if !names.iter().any(|n| n == name) {
            return Ok(None);
        }
        group_handle
            .attr(name)
            .map(Some)
            .map_err(|e| read_error(group, e))
    }
}

impl ArchiveReader for Hdf5Reader {
    fn contains(&self, path: &str) -> bool {
        // Intermediate links must exist before a nested lookup is valid.
        let mut prefix = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            if !self.file.link_exists(&prefix) {
                return false;
            }
        }
        true
    }

    fn attr_usize(&self, group: &str, name: &str) -> Result<Option<usize>, ArchiveError> {
        let Some(attr) = self.attribute(group, name)? else {
            return Ok(None);
        };
        let value: i64 = attr.read_scalar().map_err(|_| ArchiveError::AttributeType {
            group: group.to_string(),
            name: name.to_string(),
        })?;
        Ok(usize::try_from(value).ok())
    }

    fn attr_string(&self, group: &str, name: &str) -> Result<Option<String>, ArchiveError> {
        let Some(attr) = self.attribute(group, name)? else {
            return Ok(None);
        };
        if let Ok(value) = attr.read_scalar::<VarLenUnicode>() {
            return Ok(Some(value.as_str().to_string()));
        }
        if let Ok(value) = attr.read_scalar::<VarLenAscii>() {
            return Ok(Some(value.as_str().to_string()));
        }
        let bytes: Vec<u8> = attr.read_raw().map_err(|_| ArchiveError::AttributeType {
            group: group.to_string(),
            name: name.to_string(),
        })?;
        Ok(Some(String::from_utf8_lossy(&bytes).trim_end_matches('\0').to_string()))
    }

    fn read_row(&self, dataset: &str, index: usize) -> Result<ArrayD<f32>, ArchiveError> {
        if !self.contains(dataset) {
            return Err(ArchiveError::MissingDataset(dataset.to_string()));
        }
        let ds = self.file.dataset(dataset).map_err(|e| read_error(dataset, e))?;
        let shape = ds.shape();
        let len = shape.first().copied().unwrap_or(0);
        if shape.is_empty() || index >= len {
            return Err(ArchiveError::IndexOutOfBounds {
                dataset: dataset.to_string(),
                index,
                len,
            });
        }

        let mut elems = vec![SliceInfoElem::Index(index as isize)];
        elems.extend((1..shape.len()).map(|_| SliceInfoElem::from(..)));
        let selection = SliceInfo::<Vec<SliceInfoElem>, IxDyn, IxDyn>::try_from(elems)
            .map_err(|e| read_error(dataset, e))?;

        ds.as_reader()
            .conversion(Conversion::Hard)
            .read_slice::<f32, _, IxDyn>(selection)
            .map_err(|e| read_error(dataset, e))
    }
}
