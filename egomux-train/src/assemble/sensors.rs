//! Non-frame sensor modalities.
//!
//! Each [`SensorKind`] has a fixed capability record naming its manifest
//! modality, feature gate, archive datasets and how its rows are aligned to
//! the ego frame order. Extraction reads one frame's rows, corrects and
//! normalizes them, and reorders camera-indexed rows to match the ego branch.

use super::AssembleError;
use crate::collaborators::AudioEmbedder;
use egomux_data::{
    ArchiveReader, AudioPayload, DataConfig, FrameBranch, GazeDepthPayload, GazePayload, HandPayload, Modality, Point,
    PointCloudPayload, SourceRange, TakePath,
};
use glam::Vec3;
use ndarray::{Array2, Array3, ArrayD, Axis, Dimension, Ix2, Ix3, s};
use std::collections::HashMap;
use tracing::debug;

/// Which camera perspective a sensor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perspective {
    Ego,
    Exo,
}

/// How rows of a sensor are aligned with the ego frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderPolicy {
    /// Rows carry a global source id in column 0.
    BySourceId,
    /// Row `i` belongs to camera `ego_range.start + i`.
    ByCameraIndex,
    /// Take-level data with no per-camera rows.
    Unordered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorCapability {
    pub modality: Modality,
    /// Name in `egocentric_features` / `exocentric_features`.
    pub feature: &'static str,
    pub perspective: Perspective,
    /// Datasets relative to the take path; all must exist.
    pub keys: &'static [&'static str],
    pub reorder: ReorderPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Gaze,
    GazeDepth,
    Hand,
    PointCloud,
    Audio,
}

impl SensorKind {
    /// Extraction order.
    pub const ALL: [SensorKind; 5] = [
        SensorKind::Gaze,
        SensorKind::GazeDepth,
        SensorKind::Hand,
        SensorKind::PointCloud,
        SensorKind::Audio,
    ];

    pub fn capability(self) -> SensorCapability {
        match self {
            SensorKind::Gaze => SensorCapability {
                modality: Modality::EyeGaze,
                feature: "gaze",
                perspective: Perspective::Ego,
                keys: &["eye_gaze/coordinates"],
                reorder: ReorderPolicy::BySourceId,
            },
            SensorKind::GazeDepth => SensorCapability {
                modality: Modality::EyeGazeDepth,
                feature: "gaze_depth",
                perspective: Perspective::Ego,
                keys: &["eye_gaze_depth/values"],
                reorder: ReorderPolicy::ByCameraIndex,
            },
            SensorKind::Hand => SensorCapability {
                modality: Modality::HandTracking,
                feature: "hand",
                perspective: Perspective::Ego,
                keys: &["hand_tracking/positions"],
                reorder: ReorderPolicy::ByCameraIndex,
            },
            SensorKind::PointCloud => SensorCapability {
                modality: Modality::PointCloud,
                feature: "point_cloud",
                perspective: Perspective::Exo,
                keys: &["point_cloud/coordinates", "point_cloud/colors"],
                reorder: ReorderPolicy::Unordered,
            },
            SensorKind::Audio => SensorCapability {
                modality: Modality::Audio,
                feature: "audio",
                perspective: Perspective::Exo,
                keys: &["audio/snippets"],
                reorder: ReorderPolicy::Unordered,
            },
        }
    }

    /// Whether the feature gate for this sensor is switched on.
    pub fn gated_on(self, config: &DataConfig) -> bool {
        let cap = self.capability();
        match cap.perspective {
            Perspective::Ego => config.has_ego_feature(cap.feature),
            Perspective::Exo => config.has_exo_feature(cap.feature),
        }
    }
}

/// Ego frame camera order, with lookups from global source id and from
/// take-local camera index to output position.
#[derive(Debug, Clone, Default)]
pub struct EgoOrder {
    cameras: Vec<usize>,
    by_source_id: HashMap<u32, usize>,
    by_camera: HashMap<usize, usize>,
}

impl EgoOrder {
    pub fn new(branch: Option<&FrameBranch>, config: &DataConfig) -> Self {
        let Some(branch) = branch else {
            return Self::default();
        };
        let cameras = branch.source_ids.clone();
        let mut by_source_id = HashMap::new();
        for (position, name) in branch.source_names.iter().enumerate() {
            if let Some(id) = config.source_id(name) {
                by_source_id.entry(id).or_insert(position);
            }
        }
        let by_camera = cameras.iter().enumerate().map(|(p, &c)| (c, p)).collect();

        Self {
            cameras,
            by_source_id,
            by_camera,
        }
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn position_of_source_id(&self, id: u32) -> Option<usize> {
        self.by_source_id.get(&id).copied()
    }

    pub fn position_of_camera(&self, camera: usize) -> Option<usize> {
        self.by_camera.get(&camera).copied()
    }

    /// Pair data rows with ego positions under `policy`, returning
    /// `(row, camera id)` in ego order. The first row matching a position
    /// wins. `source_id` reads a row's global source id for
    /// [`ReorderPolicy::BySourceId`].
    pub fn align(
        &self,
        policy: ReorderPolicy,
        ego_range: SourceRange,
        rows: usize,
        source_id: impl Fn(usize) -> Option<u32>,
    ) -> Vec<(usize, usize)> {
        if policy == ReorderPolicy::Unordered {
            return (0..rows).map(|row| (row, row)).collect();
        }
        let mut slots: Vec<Option<(usize, usize)>> = vec![None; self.len()];
        for row in 0..rows {
            let matched = match policy {
                ReorderPolicy::BySourceId => source_id(row)
                    .and_then(|id| Some((self.position_of_source_id(id)?, id as usize))),
                _ => {
                    let camera = ego_range.start + row;
                    self.position_of_camera(camera).map(|position| (position, camera))
                }
            };
            if let Some((position, id)) = matched {
                if slots[position].is_none() {
                    slots[position] = Some((row, id));
                }
            }
        }
        slots.into_iter().flatten().collect()
    }
}

/// Global source id stored in column 0 of a gaze row.
fn row_source_id(value: f32) -> Option<u32> {
    if !value.is_finite() || value < 0.0 {
        debug!("Skipping gaze row with source id {}", value);
        return None;
    }
    Some(value as u32)
}

fn sanitize(value: f32, nan: f32, pos_inf: f32, neg_inf: f32) -> f32 {
    if value.is_nan() {
        nan
    } else if value == f32::INFINITY {
        pos_inf
    } else if value == f32::NEG_INFINITY {
        neg_inf
    } else {
        value
    }
}

/// Map a raw pixel coordinate into `[0, 1]`.
pub fn normalize_gaze(x: f32, y: f32, width: f32, height: f32) -> [f32; 2] {
    let x = sanitize(x, 0.0, 1.0, 0.0);
    let y = sanitize(y, 0.0, 1.0, 0.0);
    [(x / width).clamp(0.0, 1.0), (y / height).clamp(0.0, 1.0)]
}

pub fn normalize_depth(value: f32, max_depth: f32) -> f32 {
    (sanitize(value, 0.0, max_depth, 0.0) / max_depth).clamp(0.0, 1.0)
}

/// Normalize interleaved x/y hand channels in place.
pub fn normalize_hand(positions: &mut Array2<f32>, width: f32, height: f32) {
    for mut row in positions.rows_mut() {
        for (channel, value) in row.iter_mut().enumerate() {
            let v = sanitize(*value, 0.0, 1.0, 0.0);
            let scale = if channel % 2 == 0 { width } else { height };
            *value = (v / scale).clamp(0.0, 1.0);
        }
    }
}

/// Divide each snippet/channel by its peak magnitude along the sample axis.
pub fn normalize_audio(snippets: &mut Array3<f32>) {
    for mut snippet in snippets.outer_iter_mut() {
        for mut channel in snippet.columns_mut() {
            let peak = channel.iter().fold(0.0_f32, |m, v| m.max(v.abs()));
            channel.mapv_inplace(|v| v / (peak + 1e-6));
        }
    }
}

/// Per-fetch extraction context.
pub(crate) struct Extraction<'a> {
    pub reader: &'a dyn ArchiveReader,
    pub take: &'a TakePath,
    pub frame_index: usize,
    pub config: &'a DataConfig,
    pub ego_range: SourceRange,
    pub ego_order: &'a EgoOrder,
}

fn into_dim<D: Dimension>(data: ArrayD<f32>, dataset: &str) -> Result<ndarray::Array<f32, D>, AssembleError> {
    let shape = data.shape().to_vec();
    data.into_dimensionality::<D>()
        .map_err(|_| AssembleError::UnexpectedShape {
            dataset: dataset.to_string(),
            shape,
        })
}

fn unexpected(dataset: &str, shape: &[usize]) -> AssembleError {
    AssembleError::UnexpectedShape {
        dataset: dataset.to_string(),
        shape: shape.to_vec(),
    }
}

impl Extraction<'_> {
    /// Whether every dataset the sensor needs exists in this take.
    pub fn has_datasets(&self, kind: SensorKind) -> bool {
        kind.capability()
            .keys
            .iter()
            .all(|key| self.reader.contains(&self.take.child(key)))
    }

    fn aligned(&self, kind: SensorKind, rows: usize, source_id: impl Fn(usize) -> Option<u32>) -> Vec<(usize, usize)> {
        self.ego_order
            .align(kind.capability().reorder, self.ego_range, rows, source_id)
    }

    fn read(&self, key: &str) -> Result<(String, ArrayD<f32>), AssembleError> {
        let path = self.take.child(key);
        let data = self.reader.read_row(&path, self.frame_index)?;
        Ok((path, data))
    }

    pub fn gaze(&self) -> Result<Option<GazePayload>, AssembleError> {
        let (path, raw) = self.read("eye_gaze/coordinates")?;
        let raw = into_dim::<Ix2>(raw, &path)?;
        if raw.ncols() < 3 {
            return Err(unexpected(&path, raw.shape()));
        }

        let fixation = &self.config.gaze_fixation;
        let (width, height) = (self.config.image_width as f32, self.config.image_height as f32);

        let aligned = self.aligned(SensorKind::Gaze, raw.nrows(), |row| row_source_id(raw[[row, 0]]));
        if aligned.is_empty() {
            debug!("No gaze rows match the ego cameras");
            return Ok(None);
        }
        let kept: Vec<(u32, [f32; 2])> = aligned
            .into_iter()
            .map(|(row, id)| {
                let id = id as u32;
                let (mut x, mut y) = (raw[[row, 1]], raw[[row, 2]]);
                let fixed = self
                    .config
                    .source_name(id)
                    .is_some_and(|role| fixation.needs_fixation(role, self.take.as_str()));
                if fixed {
                    x += fixation.offset[0];
                    y += fixation.offset[1];
                }
                (id, normalize_gaze(x, y, width, height))
            })
            .collect();
        let camera_ids = kept.iter().map(|(id, _)| *id).collect();
        let flat: Vec<f32> = kept.iter().flat_map(|(_, p)| *p).collect();
        let points = Array2::from_shape_vec((kept.len(), 2), flat)?;
        Ok(Some(GazePayload { points, camera_ids }))
    }

    pub fn gaze_depth(&self) -> Result<Option<GazeDepthPayload>, AssembleError> {
        let (path, raw) = self.read("eye_gaze_depth/values")?;
        if raw.ndim() == 0 {
            return Err(unexpected(&path, raw.shape()));
        }
        let max_depth = self.config.max_depth;
        let values = raw.mapv(|v| normalize_depth(v, max_depth));

        let (rows, camera_ids): (Vec<usize>, Vec<usize>) = self
            .aligned(SensorKind::GazeDepth, values.len_of(Axis(0)), |_| None)
            .into_iter()
            .unzip();
        if rows.is_empty() {
            debug!("No gaze depth rows match the ego cameras");
            return Ok(None);
        }
        Ok(Some(GazeDepthPayload {
            values: values.select(Axis(0), &rows),
            camera_ids,
        }))
    }

    pub fn hand(&self) -> Result<Option<HandPayload>, AssembleError> {
        let (path, raw) = self.read("hand_tracking/positions")?;
        let raw = into_dim::<Ix2>(raw, &path)?;
        if raw.ncols() < 2 {
            return Err(unexpected(&path, raw.shape()));
        }

        let mut positions = raw.slice(s![.., 1..]).to_owned();
        let nan_mask: Vec<bool> = positions
            .rows()
            .into_iter()
            .map(|row| row.iter().any(|v| v.is_nan()))
            .collect();
        normalize_hand(
            &mut positions,
            self.config.image_width as f32,
            self.config.image_height as f32,
        );

        let (rows, camera_ids): (Vec<usize>, Vec<usize>) = self
            .aligned(SensorKind::Hand, positions.nrows(), |_| None)
            .into_iter()
            .unzip();
        if rows.is_empty() {
            debug!("No hand tracking rows match the ego cameras");
            return Ok(None);
        }
        Ok(Some(HandPayload {
            positions: positions.select(Axis(0), &rows),
            nan_mask: rows.iter().map(|&r| nan_mask[r]).collect(),
            camera_ids,
        }))
    }

    pub fn point_cloud(&self) -> Result<Option<PointCloudPayload>, AssembleError> {
        let (coords_path, coords) = self.read("point_cloud/coordinates")?;
        let (colors_path, colors) = self.read("point_cloud/colors")?;
        let coords = into_dim::<Ix2>(coords, &coords_path)?;
        let colors = into_dim::<Ix2>(colors, &colors_path)?;
        if coords.ncols() != 3 {
            return Err(unexpected(&coords_path, coords.shape()));
        }
        if colors.ncols() != 3 || colors.nrows() != coords.nrows() {
            return Err(unexpected(&colors_path, colors.shape()));
        }

        let points: Vec<Point> = coords
            .rows()
            .into_iter()
            .zip(colors.rows())
            .map(|(p, c)| Point::new(Vec3::new(p[0], p[1], p[2]), Vec3::new(c[0], c[1], c[2])))
            .collect();
        Ok(Some(PointCloudPayload::from_points(&points)))
    }

    pub fn audio(&self, embedder: &dyn AudioEmbedder) -> Result<Option<AudioPayload>, AssembleError> {
        let (path, raw) = self.read("audio/snippets")?;
        let mut snippets = into_dim::<Ix3>(raw, &path)?;
        normalize_audio(&mut snippets);
        let batch = snippets.insert_axis(Axis(0));
        let features = embedder.embed(batch.view())?;
        Ok(Some(AudioPayload { features }))
    }
}
