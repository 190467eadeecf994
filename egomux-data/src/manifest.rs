//! Sample manifest loading.
//!
//! A manifest is a JSON array with one record per training example: the
//! conversation turns plus the archive coordinates of the frame it describes.

use crate::archive::TakePath;
use crate::types::ModalitySet;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Tokens reserved for the visual prefix when estimating sample length.
const IMAGE_TOKEN_BUDGET: usize = 128;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sample index {index} out of range for manifest of length {len}")]
    OutOfRange { index: usize, len: usize },
}

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Human,
    #[serde(alias = "gpt")]
    Assistant,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub from: Speaker,
    pub value: String,
}

impl Turn {
    pub fn human(value: impl Into<String>) -> Self {
        Self {
            from: Speaker::Human,
            value: value.into(),
        }
    }

    pub fn assistant(value: impl Into<String>) -> Self {
        Self {
            from: Speaker::Assistant,
            value: value.into(),
        }
    }
}

/// Archive coordinates of a sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveIndices {
    pub surgery_type: String,
    #[serde(deserialize_with = "string_or_number")]
    pub procedure_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub take_id: String,
    pub frame_idx: usize,
    #[serde(default)]
    pub available_modalities: Vec<String>,
}

/// Ids are written as either JSON strings or integers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Int(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Int(i) => i.to_string(),
    })
}

/// A raw manifest record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub conversations: Vec<Turn>,
    pub hdf5_indices: ArchiveIndices,
}

impl ManifestEntry {
    fn word_count(&self) -> usize {
        self.conversations
            .iter()
            .map(|t| t.value.split_whitespace().count())
            .sum()
    }

    fn has_image(&self) -> bool {
        self.conversations
            .first()
            .is_some_and(|t| t.value.contains("<image>"))
    }
}

/// Immutable reference to one training example.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleDescriptor {
    pub surgery_type: String,
    pub procedure_id: String,
    pub take_id: String,
    pub frame_index: usize,
    pub available: ModalitySet,
    pub turns: Vec<Turn>,
}

impl SampleDescriptor {
    pub fn take_path(&self) -> TakePath {
        TakePath::new(&self.surgery_type, &self.procedure_id, &self.take_id)
    }
}

impl From<&ManifestEntry> for SampleDescriptor {
    fn from(entry: &ManifestEntry) -> Self {
        let indices = &entry.hdf5_indices;
        Self {
            surgery_type: indices.surgery_type.clone(),
            procedure_id: indices.procedure_id.clone(),
            take_id: indices.take_id.clone(),
            frame_index: indices.frame_idx,
            available: ModalitySet::from_names(&indices.available_modalities),
            turns: entry.conversations.clone(),
        }
    }
}

/// All samples of a training split.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }

    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ManifestError> {
        debug!("Loading manifest from: {}", path.as_ref().display());
        let reader = BufReader::new(File::open(path.as_ref())?);
        let entries: Vec<ManifestEntry> = serde_json::from_reader(reader)?;
        info!("Manifest loaded: {} samples", entries.len());
        Ok(Self { entries })
    }

    pub fn from_json_str(json: &str) -> Result<Self, ManifestError> {
        Ok(Self {
            entries: serde_json::from_str(json)?,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn descriptor(&self, index: usize) -> Result<SampleDescriptor, ManifestError> {
        self.entries
            .get(index)
            .map(SampleDescriptor::from)
            .ok_or(ManifestError::OutOfRange {
                index,
                len: self.entries.len(),
            })
    }

    /// Approximate token length per sample, including the visual prefix.
    pub fn lengths(&self) -> Vec<usize> {
        self.entries
            .iter()
            .map(|e| e.word_count() + IMAGE_TOKEN_BUDGET)
            .collect()
    }

    /// Word count per sample, negated for samples without an image.
    pub fn modality_lengths(&self) -> Vec<i64> {
        self.entries
            .iter()
            .map(|e| {
                let len = e.word_count() as i64;
                if e.has_image() { len } else { -len }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Modality;

    const MANIFEST: &str = r#"[
        {
            "id": "a",
            "conversations": [
                {"from": "human", "value": "<image>\nDescribe the scene graph."},
                {"from": "gpt", "value": "head_surgeon holding drill"}
            ],
            "hdf5_indices": {
                "surgery_type": "MISS",
                "procedure_id": 1,
                "take_id": "3",
                "frame_idx": 42,
                "available_modalities": ["ego_frames", "exo_frames", "eye_gaze"]
            }
        },
        {
            "conversations": [
                {"from": "human", "value": "What happens next?"},
                {"from": "assistant", "value": "suturing"}
            ],
            "hdf5_indices": {
                "surgery_type": "Ultrasound",
                "procedure_id": "7",
                "take_id": 2,
                "frame_idx": 0
            }
        }
    ]"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = Manifest::from_json_str(MANIFEST).unwrap();
        assert_eq!(manifest.len(), 2);

        let first = manifest.descriptor(0).unwrap();
        assert_eq!(first.procedure_id, "1");
        assert_eq!(first.take_id, "3");
        assert_eq!(first.frame_index, 42);
        assert!(first.available.contains(Modality::EyeGaze));
        assert_eq!(first.turns[1].from, Speaker::Assistant);
        assert_eq!(first.take_path().as_str(), "data/MISS/1/take/3");

        let second = manifest.descriptor(1).unwrap();
        assert!(second.available.is_empty());
    }

    #[test]
    fn test_descriptor_out_of_range() {
        let manifest = Manifest::from_json_str(MANIFEST).unwrap();
        assert!(matches!(
            manifest.descriptor(5),
            Err(ManifestError::OutOfRange { index: 5, len: 2 })
        ));
    }

    #[test]
    fn test_unknown_speaker_rejected() {
        let json = r#"[{"conversations": [{"from": "narrator", "value": "x"}],
            "hdf5_indices": {"surgery_type": "a", "procedure_id": 1, "take_id": 1, "frame_idx": 0}}]"#;
        assert!(matches!(Manifest::from_json_str(json), Err(ManifestError::Json(_))));
    }

    #[test]
    fn test_length_hints() {
        let manifest = Manifest::from_json_str(MANIFEST).unwrap();
        // 5 + 3 words, then 3 + 1 words
        assert_eq!(manifest.lengths(), vec![8 + 128, 4 + 128]);
        assert_eq!(manifest.modality_lengths(), vec![8, -4]);
    }
}
