//! Camera registry: classifies a take's sources into egocentric and
//! exocentric roles and derives the contiguous index range of each role.

use crate::archive::{ArchiveError, ArchiveReader, TakePath};
use crate::config::DataConfig;
use crate::types::{CameraRole, ModalitySet, SourceRange};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Source metadata stored under a take's `sources` group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TakeSources {
    names: BTreeMap<usize, String>,
}

impl TakeSources {
    pub fn new(names: impl IntoIterator<Item = (usize, String)>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }

    /// Read `source_count` and every `source_{i}` attribute.
    ///
    /// Returns `None` when the take has no `sources` group.
    pub fn read(reader: &dyn ArchiveReader, take: &TakePath) -> Result<Option<Self>, ArchiveError> {
        let group = take.sources();
        if !reader.contains(&group) {
            return Ok(None);
        }

        let count = reader.attr_usize(&group, "source_count")?.unwrap_or(0);
        let mut names = BTreeMap::new();
        for i in 0..count {
            if let Some(name) = reader.attr_string(&group, &format!("source_{i}"))? {
                names.insert(i, name);
            }
        }
        debug!("Read {} of {} source names for {}", names.len(), count, take);
        Ok(Some(Self { names }))
    }

    pub fn names(&self) -> &BTreeMap<usize, String> {
        &self.names
    }
}

/// Camera names, roles and role ranges for one take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraRegistry {
    names: BTreeMap<usize, String>,
    roles: BTreeMap<usize, CameraRole>,
    ego_indices: Vec<usize>,
    exo_indices: Vec<usize>,
    ego_range: SourceRange,
    exo_range: SourceRange,
}

impl CameraRegistry {
    /// Classify a take's sources.
    ///
    /// Optional exocentric sources (such as an ultrasound probe) only count
    /// toward the exo range when the sample declares them available. A role
    /// with no cameras falls back to the configured default range.
    pub fn classify(
        sources: Option<&TakeSources>,
        available: &ModalitySet,
        config: &DataConfig,
    ) -> Self {
        let names = sources.map(|s| s.names.clone()).unwrap_or_default();
        if sources.is_none() {
            warn!("No source metadata found, using default camera ranges");
        }

        let mut roles = BTreeMap::new();
        let mut ego_indices = Vec::new();
        let mut exo_indices = Vec::new();

        for (&index, name) in &names {
            let role = if config.ego_sources.contains(name) {
                ego_indices.push(index);
                CameraRole::Ego
            } else if config.exo_sources.contains(name) {
                let optional = config.optional_exo_sources.contains(name);
                if optional && !available.contains_name(name) {
                    debug!("Skipping optional exo source '{}' (not available)", name);
                    CameraRole::Unclassified
                } else {
                    exo_indices.push(index);
                    CameraRole::Exo
                }
            } else {
                CameraRole::Unclassified
            };
            roles.insert(index, role);
        }

        let ego_range = SourceRange::covering(&ego_indices).unwrap_or_else(|| {
            warn!(
                "No ego cameras found, using default range {}",
                config.default_ego_range
            );
            config.default_ego_range
        });
        let exo_range = SourceRange::covering(&exo_indices).unwrap_or_else(|| {
            warn!(
                "No exo cameras found, using default range {}",
                config.default_exo_range
            );
            config.default_exo_range
        });

        Self {
            names,
            roles,
            ego_indices,
            exo_indices,
            ego_range,
            exo_range,
        }
    }

    pub fn names(&self) -> &BTreeMap<usize, String> {
        &self.names
    }

    /// Stored camera name, or `source_{index}` when the index is unnamed.
    pub fn name_of(&self, index: usize) -> String {
        self.names
            .get(&index)
            .cloned()
            .unwrap_or_else(|| format!("source_{index}"))
    }

    pub fn role_of(&self, index: usize) -> CameraRole {
        self.roles
            .get(&index)
            .copied()
            .unwrap_or(CameraRole::Unclassified)
    }

    pub fn ego_indices(&self) -> &[usize] {
        &self.ego_indices
    }

    pub fn exo_indices(&self) -> &[usize] {
        &self.exo_indices
    }

    pub fn ego_range(&self) -> SourceRange {
        self.ego_range
    }

    pub fn exo_range(&self) -> SourceRange {
        self.exo_range
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchive;
    use crate::types::Modality;

    fn sources(names: &[&str]) -> TakeSources {
        TakeSources::new(names.iter().enumerate().map(|(i, n)| (i, n.to_string())))
    }

    #[test]
    fn test_classify_contiguous_ranges() {
        let config = DataConfig::default();
        let src = sources(&["head_surgeon", "assistant", "or_light", "external_1", "external_2"]);
        let registry = CameraRegistry::classify(Some(&src), &ModalitySet::new(), &config);

        assert_eq!(registry.ego_range(), SourceRange::new(0, 2));
        assert_eq!(registry.exo_range(), SourceRange::new(2, 5));
        assert_eq!(registry.role_of(0), CameraRole::Ego);
        assert_eq!(registry.role_of(4), CameraRole::Exo);
        assert_eq!(registry.name_of(3), "external_1");
        assert_eq!(registry.name_of(9), "source_9");
    }

    #[test]
    fn test_missing_sources_use_default_ranges() {
        let config = DataConfig::default();
        let registry = CameraRegistry::classify(None, &ModalitySet::new(), &config);
        assert_eq!(registry.ego_range(), SourceRange::new(0, 4));
        assert_eq!(registry.exo_range(), SourceRange::new(4, 9));
        assert!(registry.names().is_empty());
    }

    #[test]
    fn test_role_without_cameras_uses_default() {
        let config = DataConfig::default();
        let src = sources(&["or_light", "microscope"]);
        let registry = CameraRegistry::classify(Some(&src), &ModalitySet::new(), &config);
        assert_eq!(registry.ego_range(), config.default_ego_range);
        assert_eq!(registry.exo_range(), SourceRange::new(0, 2));
    }

    #[test]
    fn test_optional_exo_requires_availability() {
        let config = DataConfig::default();
        let src = sources(&["head_surgeon", "or_light", "microscope", "ultrasound"]);

        let without = CameraRegistry::classify(Some(&src), &ModalitySet::new(), &config);
        assert_eq!(without.exo_range(), SourceRange::new(1, 3));
        assert_eq!(without.role_of(3), CameraRole::Unclassified);

        let available = ModalitySet::from_iter([Modality::Ultrasound]);
        let with = CameraRegistry::classify(Some(&src), &available, &config);
        assert_eq!(with.exo_range(), SourceRange::new(1, 4));
    }

    #[test]
    fn test_unknown_names_are_unclassified() {
        let config = DataConfig::default();
        let src = sources(&["head_surgeon", "ceiling_cam", "or_light"]);
        let registry = CameraRegistry::classify(Some(&src), &ModalitySet::new(), &config);
        assert_eq!(registry.role_of(1), CameraRole::Unclassified);
        assert_eq!(registry.ego_indices(), &[0]);
        assert_eq!(registry.exo_indices(), &[2]);
    }

    #[test]
    fn test_read_take_sources() {
        let take = TakePath::new("MISS", "1", "1");
        let mut archive = MemoryArchive::new();
        archive.set_attr(&take.sources(), "source_count", 3_i64);
        archive.set_attr(&take.sources(), "source_0", "head_surgeon");
        archive.set_attr(&take.sources(), "source_2", "or_light");

        let src = TakeSources::read(&archive, &take).unwrap().unwrap();
        assert_eq!(src.names().len(), 2);
        assert_eq!(src.names()[&2], "or_light");

        let other = TakePath::new("MISS", "1", "2");
        assert!(TakeSources::read(&archive, &other).unwrap().is_none());
    }
}
