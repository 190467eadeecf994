//! Per-modality payloads of an assembled sample.
//!
//! Payloads are plain owned arrays created fresh for every fetch.

use crate::config::CropSize;
use crate::types::Point;
use ndarray::{Array2, Array3, Array4, ArrayD, Axis, ShapeError, concatenate, stack};

/// Transformed frames of one camera branch with parallel id and name lists.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBranch {
    /// `views × 3 × H × W`.
    pub frames: Array4<f32>,
    /// Take-local camera index per view.
    pub source_ids: Vec<usize>,
    pub source_names: Vec<String>,
}

impl FrameBranch {
    /// Stack per-view `3 × H × W` arrays into one branch.
    pub fn from_views(
        views: Vec<Array3<f32>>,
        source_ids: Vec<usize>,
        source_names: Vec<String>,
    ) -> Result<Self, ShapeError> {
        let refs: Vec<_> = views.iter().map(|v| v.view()).collect();
        let frames = stack(Axis(0), &refs)?;
        Ok(Self {
            frames,
            source_ids,
            source_names,
        })
    }

    /// A single zero frame with empty id and name lists.
    pub fn blank(crop: CropSize) -> Self {
        Self {
            frames: Array4::zeros((1, 3, crop.height as usize, crop.width as usize)),
            source_ids: Vec::new(),
            source_names: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep the given views, in the given order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            frames: self.frames.select(Axis(0), indices),
            source_ids: indices.iter().map(|&i| self.source_ids[i]).collect(),
            source_names: indices.iter().map(|&i| self.source_names[i].clone()).collect(),
        }
    }

    /// Append another branch's views after this one's.
    pub fn concat(self, other: Self) -> Result<Self, ShapeError> {
        let frames = concatenate(Axis(0), &[self.frames.view(), other.frames.view()])?;
        let mut source_ids = self.source_ids;
        source_ids.extend(other.source_ids);
        let mut source_names = self.source_names;
        source_names.extend(other.source_names);
        Ok(Self {
            frames,
            source_ids,
            source_names,
        })
    }
}

/// Normalized gaze points in ego-frame camera order.
#[derive(Debug, Clone, PartialEq)]
pub struct GazePayload {
    /// `cameras × 2`, `(x, y)` in `[0, 1]`.
    pub points: Array2<f32>,
    /// Global source id per row.
    pub camera_ids: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GazeDepthPayload {
    /// First axis is the camera; values in `[0, 1]`.
    pub values: ArrayD<f32>,
    pub camera_ids: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandPayload {
    /// `cameras × channels`, alternating x/y normalized to `[0, 1]`.
    pub positions: Array2<f32>,
    /// Whether the row held any NaN before sanitization.
    pub nan_mask: Vec<bool>,
    pub camera_ids: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointCloudPayload {
    /// `N × 6`: xyz followed by rgb (0-255).
    pub points: Array2<f32>,
}

impl PointCloudPayload {
    pub fn from_points(points: &[Point]) -> Self {
        let flat: Vec<f32> = points.iter().flat_map(|p| p.to_channels()).collect();
        // 6 values per point
        let points = Array2::from_shape_vec((points.len(), 6), flat)
            .unwrap_or_else(|_| Array2::zeros((0, 6)));
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.points.nrows() == 0
    }
}

/// Audio embedding for the snippets of one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPayload {
    pub features: Array2<f32>,
}
