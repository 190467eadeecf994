//! Dataset configuration and dataset-mode profiles.

use crate::types::{Modality, ModalitySet, SourceRange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading or validating a [`DataConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown dataset name: {0}")]
    UnknownDataset(String),

    #[error("Drop probability must be within [0, 1], got {0}")]
    InvalidProbability(f64),

    #[error("Invalid dimension for {0}: must be non-zero")]
    InvalidDimension(&'static str),
}

/// How a dataset's modalities and frame branches participate in a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetProfile {
    /// Ego and exo frames stay in separate branches; every sensor is used.
    DualBranch,
    /// Frames only, with ego and exo merged into the exo branch.
    Merged,
    /// Gaze, gaze depth and hand tracking are removed; branches are merged.
    VisionOnly,
}

impl DatasetProfile {
    /// Resolve the profile for a configured dataset name.
    pub fn from_dataset_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "egoexor" | "dual_branch" => Ok(Self::DualBranch),
            "4dor" | "merged" => Ok(Self::Merged),
            "mmor" | "vision_only" => Ok(Self::VisionOnly),
            other => Err(ConfigError::UnknownDataset(other.to_string())),
        }
    }

    /// Whether ego frames are folded into the exo branch.
    pub fn merges_branches(self) -> bool {
        !matches!(self, Self::DualBranch)
    }

    /// Remove modalities the profile never extracts.
    pub fn filter_modalities(self, available: &mut ModalitySet) {
        match self {
            Self::DualBranch => {}
            Self::Merged => available.retain(|m| m.is_frames()),
            Self::VisionOnly => {
                available.remove(Modality::EyeGaze);
                available.remove(Modality::EyeGazeDepth);
                available.remove(Modality::HandTracking);
            }
        }
    }

    /// Whether a sensor modality can appear in a sample of this profile.
    pub fn allows(self, modality: Modality) -> bool {
        let mut probe = ModalitySet::from_iter([modality]);
        self.filter_modalities(&mut probe);
        !probe.is_empty()
    }

    /// Upper bound on the number of exocentric views kept after subsampling.
    pub fn max_exo_views(self) -> usize {
        match self {
            Self::DualBranch => 5,
            Self::Merged | Self::VisionOnly => 7,
        }
    }
}

/// Output size of the frame processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropSize {
    pub width: u32,
    pub height: u32,
}

impl Default for CropSize {
    fn default() -> Self {
        Self {
            width: 336,
            height: 336,
        }
    }
}

/// Known gaze calibration bias for specific (role, take) recordings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeFixation {
    /// Offset added to raw `(x, y)` gaze coordinates.
    pub offset: [f32; 2],
    /// Role name to the take paths that need the offset.
    pub takes: BTreeMap<String, Vec<String>>,
}

impl GazeFixation {
    pub fn needs_fixation(&self, role: &str, take_path: &str) -> bool {
        self.takes
            .get(role)
            .is_some_and(|takes| takes.iter().any(|t| t == take_path))
    }
}

/// Configuration for sample assembly, tokenization and collation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Selects the [`DatasetProfile`].
    pub dataset_name: String,
    pub is_multimodal: bool,
    /// Prompt style name (`plain`, `v1`, `llama_2`, `mpt`).
    pub prompt_style: String,
    pub model_max_length: usize,
    pub pad_token_id: i64,
    /// Wrap image placeholders in start/end tokens.
    pub mm_use_im_start_end: bool,

    pub ego_sources: Vec<String>,
    pub exo_sources: Vec<String>,
    /// Exo sources that only count when declared as an available modality.
    pub optional_exo_sources: Vec<String>,
    /// Global source id per camera name, as used to tag gaze samples.
    pub source_ids: BTreeMap<String, u32>,
    pub default_ego_range: SourceRange,
    pub default_exo_range: SourceRange,

    pub egocentric_features: Vec<String>,
    pub exocentric_features: Vec<String>,
    /// Cameras whose frames are stored with reversed channel order.
    pub reversed_channel_sources: Vec<String>,
    pub gaze_fixation: GazeFixation,

    /// Reference image size used to normalize gaze and hand coordinates.
    pub image_width: u32,
    pub image_height: u32,
    pub max_depth: f32,
    pub crop_size: CropSize,

    pub img_order_augment: bool,
    pub multimodal_augment: bool,
    pub multimodal_drop_prob: f64,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

const EGO_SOURCES: [&str; 4] = ["head_surgeon", "assistant", "circulator", "anesthetist"];
const EXO_SOURCES: [&str; 9] = [
    "or_light",
    "microscope",
    "external_1",
    "external_2",
    "external_3",
    "external_4",
    "external_5",
    "simstation",
    "ultrasound",
];

impl Default for DataConfig {
    fn default() -> Self {
        let source_ids = EGO_SOURCES
            .iter()
            .chain(EXO_SOURCES.iter())
            .enumerate()
            .map(|(id, name)| (name.to_string(), id as u32))
            .collect();

        let mut reversed = strings(&EGO_SOURCES);
        reversed.extend(strings(&["ultrasound", "simstation"]));

        Self {
            dataset_name: "egoexor".to_string(),
            is_multimodal: true,
            prompt_style: "v1".to_string(),
            model_max_length: 512,
            pad_token_id: 0,
            mm_use_im_start_end: false,
            ego_sources: strings(&EGO_SOURCES),
            exo_sources: strings(&EXO_SOURCES),
            optional_exo_sources: strings(&["ultrasound"]),
            source_ids,
            default_ego_range: SourceRange::new(0, 4),
            default_exo_range: SourceRange::new(4, 9),
            egocentric_features: strings(&["gaze", "gaze_depth", "hand"]),
            exocentric_features: strings(&["point_cloud", "audio"]),
            reversed_channel_sources: reversed,
            gaze_fixation: GazeFixation::default(),
            image_width: 336,
            image_height: 336,
            max_depth: 1.0,
            crop_size: CropSize::default(),
            img_order_augment: false,
            multimodal_augment: false,
            multimodal_drop_prob: 0.0,
        }
    }
}

impl DataConfig {
    /// Load a configuration from a JSON file; missing fields take defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        debug!("Loading data config from: {}", path.as_ref().display());
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.profile()?;
        if !(0.0..=1.0).contains(&self.multimodal_drop_prob) {
            return Err(ConfigError::InvalidProbability(self.multimodal_drop_prob));
        }
        if self.image_width == 0 || self.image_height == 0 {
            return Err(ConfigError::InvalidDimension("image size"));
        }
        if self.crop_size.width == 0 || self.crop_size.height == 0 {
            return Err(ConfigError::InvalidDimension("crop size"));
        }
        if self.max_depth <= 0.0 {
            return Err(ConfigError::InvalidDimension("max depth"));
        }
        Ok(())
    }

    pub fn profile(&self) -> Result<DatasetProfile, ConfigError> {
        DatasetProfile::from_dataset_name(&self.dataset_name)
    }

    pub fn with_dataset_name(mut self, name: impl Into<String>) -> Self {
        self.dataset_name = name.into();
        self
    }

    pub fn with_prompt_style(mut self, style: impl Into<String>) -> Self {
        self.prompt_style = style.into();
        self
    }

    pub fn with_multimodal(mut self, is_multimodal: bool) -> Self {
        self.is_multimodal = is_multimodal;
        self
    }

    pub fn with_model_max_length(mut self, max_length: usize) -> Self {
        self.model_max_length = max_length;
        self
    }

    pub fn with_pad_token_id(mut self, pad_token_id: i64) -> Self {
        self.pad_token_id = pad_token_id;
        self
    }

    /// Enable per-modality stochastic dropout with probability `prob`.
    pub fn with_multimodal_dropout(mut self, prob: f64) -> Self {
        self.multimodal_augment = prob > 0.0;
        self.multimodal_drop_prob = prob;
        self
    }

    pub fn with_gaze_fixation(mut self, fixation: GazeFixation) -> Self {
        self.gaze_fixation = fixation;
        self
    }

    pub fn with_crop_size(mut self, width: u32, height: u32) -> Self {
        self.crop_size = CropSize { width, height };
        self
    }

    pub fn source_id(&self, name: &str) -> Option<u32> {
        self.source_ids.get(name).copied()
    }

    /// Reverse lookup of [`Self::source_id`].
    pub fn source_name(&self, id: u32) -> Option<&str> {
        self.source_ids
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(name, _)| name.as_str())
    }

    pub fn has_ego_feature(&self, feature: &str) -> bool {
        self.egocentric_features.iter().any(|f| f == feature)
    }

    pub fn has_exo_feature(&self, feature: &str) -> bool {
        self.exocentric_features.iter().any(|f| f == feature)
    }

    pub fn reverses_channels(&self, source_name: &str) -> bool {
        self.reversed_channel_sources.iter().any(|s| s == source_name)
    }

    /// Whether stochastic modality dropout is active.
    pub fn drops_modalities(&self) -> bool {
        self.multimodal_augment && self.multimodal_drop_prob > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_profile_from_dataset_name() {
        assert_eq!(DatasetProfile::from_dataset_name("egoexor").unwrap(), DatasetProfile::DualBranch);
        assert_eq!(DatasetProfile::from_dataset_name("4dor").unwrap(), DatasetProfile::Merged);
        assert_eq!(DatasetProfile::from_dataset_name("mmor").unwrap(), DatasetProfile::VisionOnly);
        assert!(matches!(
            DatasetProfile::from_dataset_name("kitti"),
            Err(ConfigError::UnknownDataset(_))
        ));
    }

    #[test]
    fn test_vision_only_filters_ego_sensors() {
        let mut set = ModalitySet::from_names([
            "ego_frames",
            "eye_gaze",
            "eye_gaze_depth",
            "hand_tracking",
            "point_cloud",
        ]);
        DatasetProfile::VisionOnly.filter_modalities(&mut set);
        assert!(set.contains(Modality::EgoFrames));
        assert!(set.contains(Modality::PointCloud));
        assert!(!set.contains(Modality::EyeGaze));
        assert!(!set.contains(Modality::EyeGazeDepth));
        assert!(!set.contains(Modality::HandTracking));
    }

    #[test]
    fn test_merged_keeps_frames_only() {
        let mut set = ModalitySet::from_names(["ego_frames", "exo_frames", "audio", "ultrasound"]);
        DatasetProfile::Merged.filter_modalities(&mut set);
        assert_eq!(set.len(), 2);
        assert!(!DatasetProfile::Merged.allows(Modality::Audio));
        assert!(DatasetProfile::DualBranch.allows(Modality::Audio));
    }

    #[test]
    fn test_default_source_ids() {
        let config = DataConfig::default();
        assert_eq!(config.source_id("head_surgeon"), Some(0));
        assert_eq!(config.source_id("or_light"), Some(4));
        assert_eq!(config.source_name(3), Some("anesthetist"));
        assert_eq!(config.source_name(99), None);
    }

    #[test]
    fn test_gaze_fixation_lookup() {
        let mut fixation = GazeFixation::default();
        fixation
            .takes
            .insert("assistant".to_string(), vec!["data/MISS/1/take/2".to_string()]);
        assert!(fixation.needs_fixation("assistant", "data/MISS/1/take/2"));
        assert!(!fixation.needs_fixation("assistant", "data/MISS/1/take/3"));
        assert!(!fixation.needs_fixation("circulator", "data/MISS/1/take/2"));
    }

    #[test]
    fn test_from_json_partial_fields() {
        let config =
            DataConfig::from_json_str(r#"{"dataset_name": "mmor", "multimodal_drop_prob": 0.25}"#)
                .unwrap();
        assert_eq!(config.profile().unwrap(), DatasetProfile::VisionOnly);
        assert_eq!(config.model_max_length, 512);
        assert_eq!(config.default_exo_range, SourceRange::new(4, 9));
    }

    #[test]
    fn test_validate_rejects_bad_probability() {
        let config = DataConfig::default().with_multimodal_dropout(1.5);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidProbability(_))));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"dataset_name": "4dor", "prompt_style": "mpt"}}"#).unwrap();
        let config = DataConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.prompt_style, "mpt");
        assert_eq!(config.profile().unwrap(), DatasetProfile::Merged);
    }
}
