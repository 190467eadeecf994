//! Core data types for modalities, camera roles and point clouds.
//!
//! These are CPU-side representations shared by the registry, the assembler
//! and the collator.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;
use tracing::debug;

/// A modality as declared in a manifest's `available_modalities` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    EgoFrames,
    ExoFrames,
    EyeGaze,
    EyeGazeDepth,
    HandTracking,
    PointCloud,
    Audio,
    /// Ultrasound probe feed, stored as an exocentric camera source.
    Ultrasound,
}

impl Modality {
    pub const ALL: [Modality; 8] = [
        Modality::EgoFrames,
        Modality::ExoFrames,
        Modality::EyeGaze,
        Modality::EyeGazeDepth,
        Modality::HandTracking,
        Modality::PointCloud,
        Modality::Audio,
        Modality::Ultrasound,
    ];

    /// Manifest name of the modality.
    pub fn name(self) -> &'static str {
        match self {
            Modality::EgoFrames => "ego_frames",
            Modality::ExoFrames => "exo_frames",
            Modality::EyeGaze => "eye_gaze",
            Modality::EyeGazeDepth => "eye_gaze_depth",
            Modality::HandTracking => "hand_tracking",
            Modality::PointCloud => "point_cloud",
            Modality::Audio => "audio",
            Modality::Ultrasound => "ultrasound",
        }
    }

    /// Look up a modality by manifest name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// Whether this modality is a camera frame branch.
    pub fn is_frames(self) -> bool {
        matches!(self, Modality::EgoFrames | Modality::ExoFrames)
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The set of modalities available to one sample.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModalitySet(BTreeSet<Modality>);

impl ModalitySet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Build a set from manifest names. Unknown names are skipped.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for name in names {
            match Modality::from_name(name.as_ref()) {
                Some(modality) => {
                    set.insert(modality);
                }
                None => debug!("Ignoring unknown modality '{}'", name.as_ref()),
            }
        }
        set
    }

    pub fn contains(&self, modality: Modality) -> bool {
        self.0.contains(&modality)
    }

    /// Whether a modality with the given manifest name is present.
    pub fn contains_name(&self, name: &str) -> bool {
        Modality::from_name(name).is_some_and(|m| self.contains(m))
    }

    pub fn insert(&mut self, modality: Modality) -> bool {
        self.0.insert(modality)
    }

    pub fn remove(&mut self, modality: Modality) -> bool {
        self.0.remove(&modality)
    }

    pub fn retain(&mut self, f: impl FnMut(&Modality) -> bool) {
        self.0.retain(f);
    }

    pub fn iter(&self) -> impl Iterator<Item = Modality> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Modality> for ModalitySet {
    fn from_iter<T: IntoIterator<Item = Modality>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Perspective of a camera source within a take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraRole {
    /// Head-mounted, attached to a person.
    Ego,
    /// Fixed or external viewpoint.
    Exo,
    Unclassified,
}

/// Half-open range of take-local camera indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRange {
    pub start: usize,
    pub end: usize,
}

impl SourceRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Smallest range covering every index, or `None` for an empty slice.
    pub fn covering(indices: &[usize]) -> Option<Self> {
        let start = *indices.iter().min()?;
        let end = *indices.iter().max()? + 1;
        Some(Self { start, end })
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }

    /// Restrict the range to `0..count`, the way slicing a shorter block would.
    pub fn clamp_to(&self, count: usize) -> Self {
        let end = self.end.min(count);
        Self {
            start: self.start.min(end),
            end,
        }
    }

    pub fn indices(&self) -> Range<usize> {
        self.start..self.end
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A colored point from a take's aggregate point cloud.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Position in world space (meters).
    pub position: Vec3,
    /// RGB color as stored in the archive (0-255 range).
    pub color: Vec3,
}

impl Point {
    pub fn new(position: Vec3, color: Vec3) -> Self {
        Self { position, color }
    }

    /// Flatten to `[x, y, z, r, g, b]`.
    pub fn to_channels(&self) -> [f32; 6] {
        [
            self.position.x,
            self.position.y,
            self.position.z,
            self.color.x,
            self.color.y,
            self.color.z,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modality_names_round_trip() {
        for modality in Modality::ALL {
            assert_eq!(Modality::from_name(modality.name()), Some(modality));
        }
        assert_eq!(Modality::from_name("thermal"), None);
    }

    #[test]
    fn test_modality_set_skips_unknown_names() {
        let set = ModalitySet::from_names(["ego_frames", "lidar", "audio"]);
        assert_eq!(set.len(), 2);
        assert!(set.contains(Modality::EgoFrames));
        assert!(set.contains_name("audio"));
        assert!(!set.contains_name("lidar"));
    }

    #[test]
    fn test_source_range_covering() {
        assert_eq!(SourceRange::covering(&[5, 2, 3]), Some(SourceRange::new(2, 6)));
        assert_eq!(SourceRange::covering(&[]), None);
    }

    #[test]
    fn test_source_range_clamp() {
        let range = SourceRange::new(4, 9);
        assert_eq!(range.clamp_to(6), SourceRange::new(4, 6));
        assert!(range.clamp_to(3).is_empty());
        assert_eq!(range.clamp_to(20), range);
    }

    #[test]
    fn test_point_channels() {
        let p = Point::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(255.0, 0.0, 128.0));
        assert_eq!(p.to_channels(), [1.0, 2.0, 3.0, 255.0, 0.0, 128.0]);
    }
}
