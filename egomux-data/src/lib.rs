//! Egomux Data Crate
//!
//! Data access for multi-sensor surgical recordings: sample manifests, the
//! hierarchical per-take archive, camera role classification and the CPU-side
//! payload types produced for each training sample.
//! This crate has no knowledge of tokenization or batching; those live in
//! egomux-train.

pub mod archive;
pub mod config;
pub mod manifest;
pub mod payload;
pub mod registry;
pub mod types;

pub use archive::{ArchiveError, ArchiveReader, ArchiveStore, AttrValue, MemoryArchive, MemoryStore, TakePath};
#[cfg(feature = "hdf5")]
pub use archive::Hdf5Store;
pub use config::{ConfigError, CropSize, DataConfig, DatasetProfile, GazeFixation};
pub use manifest::{ArchiveIndices, Manifest, ManifestEntry, ManifestError, SampleDescriptor, Speaker, Turn};
pub use payload::{
    AudioPayload, FrameBranch, GazeDepthPayload, GazePayload, HandPayload, PointCloudPayload,
};
pub use registry::{CameraRegistry, TakeSources};
pub use types::{CameraRole, Modality, ModalitySet, Point, SourceRange};
