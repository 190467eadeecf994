//! Batch collation.
//!
//! Token sequences are right-padded into 2-D arrays. Modality payloads vary in
//! shape between samples, so each modality becomes a per-sample list of
//! optional payloads instead of a stacked tensor.

use crate::assemble::SampleRecord;
use crate::tokenize::IGNORE_INDEX;
use egomux_data::{
    AudioPayload, ConfigError, DataConfig, DatasetProfile, GazeDepthPayload, GazePayload, HandPayload, Modality,
    PointCloudPayload,
};
use ndarray::{Array2, Array4};
use tracing::debug;

/// One frame branch split into per-sample columns.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchColumns {
    pub frames: Vec<Option<Array4<f32>>>,
    pub source_names: Vec<Vec<String>>,
    pub source_ids: Vec<Vec<usize>>,
}

/// A collated batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub input_ids: Array2<i64>,
    pub labels: Array2<i64>,
    pub attention_mask: Array2<bool>,
    pub ego: Option<BranchColumns>,
    pub exo: Option<BranchColumns>,
    pub eye_gaze: Option<Vec<Option<GazePayload>>>,
    pub eye_gaze_depth: Option<Vec<Option<GazeDepthPayload>>>,
    pub hand_tracking: Option<Vec<Option<HandPayload>>>,
    pub point_cloud: Option<Vec<Option<PointCloudPayload>>>,
    pub audio: Option<Vec<Option<AudioPayload>>>,
}

impl Batch {
    pub fn batch_size(&self) -> usize {
        self.input_ids.nrows()
    }

    /// Names of the emitted fields, in a fixed order.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys = vec!["input_ids", "labels", "attention_mask"];
        if self.ego.is_some() {
            keys.extend(["ego_frames", "ego_source_names", "ego_source_ids"]);
        }
        if self.exo.is_some() {
            keys.extend(["exo_frames", "exo_source_names", "exo_source_ids"]);
        }
        let optional = [
            (Modality::EyeGaze, self.eye_gaze.is_some()),
            (Modality::EyeGazeDepth, self.eye_gaze_depth.is_some()),
            (Modality::HandTracking, self.hand_tracking.is_some()),
            (Modality::PointCloud, self.point_cloud.is_some()),
            (Modality::Audio, self.audio.is_some()),
        ];
        keys.extend(optional.iter().filter(|(_, on)| *on).map(|(m, _)| m.name()));
        keys
    }
}

/// Column for a field when at least one record carries it.
fn column<T: Clone>(records: &[SampleRecord], field: impl Fn(&SampleRecord) -> Option<&T>) -> Option<Vec<Option<T>>> {
    if records.iter().any(|r| field(r).is_some()) {
        Some(records.iter().map(|r| field(r).cloned()).collect())
    } else {
        None
    }
}

fn branch_columns(
    records: &[SampleRecord],
    field: impl Fn(&SampleRecord) -> Option<&egomux_data::FrameBranch>,
) -> Option<BranchColumns> {
    if !records.iter().any(|r| field(r).is_some()) {
        return None;
    }
    Some(BranchColumns {
        frames: records.iter().map(|r| field(r).map(|b| b.frames.clone())).collect(),
        source_names: records
            .iter()
            .map(|r| field(r).map(|b| b.source_names.clone()).unwrap_or_default())
            .collect(),
        source_ids: records
            .iter()
            .map(|r| field(r).map(|b| b.source_ids.clone()).unwrap_or_default())
            .collect(),
    })
}

/// Groups sample records into a [`Batch`].
#[derive(Debug, Clone)]
pub struct Collator {
    profile: DatasetProfile,
    pad_token_id: i64,
    model_max_length: usize,
}

impl Collator {
    pub fn new(config: &DataConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            profile: config.profile()?,
            pad_token_id: config.pad_token_id,
            model_max_length: config.model_max_length,
        })
    }

    pub fn collate(&self, records: &[SampleRecord]) -> Batch {
        let longest = records.iter().map(|r| r.input_ids.len()).max().unwrap_or(0);
        let width = longest.min(self.model_max_length);
        let rows = records.len();

        let mut input_ids = Array2::from_elem((rows, width), self.pad_token_id);
        let mut labels = Array2::from_elem((rows, width), IGNORE_INDEX);
        for (i, record) in records.iter().enumerate() {
            for (j, &id) in record.input_ids.iter().take(width).enumerate() {
                input_ids[[i, j]] = id;
            }
            for (j, &label) in record.labels.iter().take(width).enumerate() {
                labels[[i, j]] = label;
            }
        }
        let attention_mask = input_ids.mapv(|id| id != self.pad_token_id);

        let mut batch = Batch {
            input_ids,
            labels,
            attention_mask,
            ego: branch_columns(records, |r| r.ego.as_ref()),
            exo: branch_columns(records, |r| r.exo.as_ref()),
            eye_gaze: column(records, |r| r.gaze.as_ref()),
            eye_gaze_depth: column(records, |r| r.gaze_depth.as_ref()),
            hand_tracking: column(records, |r| r.hand.as_ref()),
            point_cloud: column(records, |r| r.point_cloud.as_ref()),
            audio: column(records, |r| r.audio.as_ref()),
        };
        self.prune(&mut batch);

        debug!("Collated {} samples, width {}, fields {:?}", rows, width, batch.keys());
        batch
    }

    fn prune(&self, batch: &mut Batch) {
        match self.profile {
            DatasetProfile::DualBranch => {}
            DatasetProfile::Merged => {
                batch.ego = None;
                batch.eye_gaze = None;
                batch.eye_gaze_depth = None;
                batch.hand_tracking = None;
                batch.point_cloud = None;
                batch.audio = None;
            }
            DatasetProfile::VisionOnly => {
                batch.ego = None;
                batch.eye_gaze = None;
                batch.eye_gaze_depth = None;
                batch.hand_tracking = None;
            }
        }
    }
}
