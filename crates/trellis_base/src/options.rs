//! Configuration for the base index.

use std::collections::BTreeSet;

use trellis_model::ResourceId;

use crate::level::IndexingLevel;

/// Configuration for a [`crate::BaseIndex`].
#[derive(Clone, Debug)]
pub struct BaseIndexOptions {
    /// Level applied to every class, feature and data type regardless of
    /// registration. `NONE` means registration mode.
    pub wildcard_level: IndexingLevel,

    /// Only derived features marked well-behaving are traversed and indexed.
    /// When false, other derived features are indexed too and must be
    /// refreshed with [`crate::BaseIndex::resample_derived_features`].
    pub traverse_only_well_behaving_derived_features: bool,

    /// Resources that are never indexed, even when added as roots.
    pub excluded_resources: BTreeSet<ResourceId>,
}

impl Default for BaseIndexOptions {
    fn default() -> Self {
        Self {
            wildcard_level: IndexingLevel::None,
            traverse_only_well_behaving_derived_features: true,
            excluded_resources: BTreeSet::new(),
        }
    }
}

impl BaseIndexOptions {
    /// Indexes everything at `FULL` level.
    #[must_use]
    pub fn wildcard() -> Self {
        Self {
            wildcard_level: IndexingLevel::Full,
            ..Self::default()
        }
    }

    /// Builder method to set the wildcard level.
    #[must_use]
    pub fn with_wildcard_level(mut self, level: IndexingLevel) -> Self {
        self.wildcard_level = level;
        self
    }

    /// Builder method to include derived features that are not well-behaving.
    #[must_use]
    pub fn with_traverse_only_well_behaving_derived_features(mut self, only: bool) -> Self {
        self.traverse_only_well_behaving_derived_features = only;
        self
    }

    /// Builder method to exclude a resource from indexing.
    #[must_use]
    pub fn with_excluded_resource(mut self, resource: ResourceId) -> Self {
        self.excluded_resources.insert(resource);
        self
    }

    /// Returns true if the wildcard level is above `NONE`.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.wildcard_level.is_some()
    }
}
