//! Set-backed storage of indexed instances, feature values and data type
//! occurrences.
//!
//! Every insert and remove is idempotent and reports whether the store
//! changed. A traversal that overlaps with notifications still being
//! dispatched therefore never double counts.

use std::collections::{BTreeSet, HashMap, HashSet};

use trellis_foundation::{ObjectId, Value};
use trellis_model::{ClassId, DataTypeId, FeatureId};

#[derive(Debug, Default)]
struct FeatureData {
    forward: HashMap<ObjectId, Vec<Value>>,
    reverse: HashMap<Value, BTreeSet<ObjectId>>,
    size: usize,
}

/// Storage behind a [`crate::BaseIndex`]. Classes are keyed by concrete
/// class; subtype aggregation is done by the caller.
#[derive(Debug, Default)]
pub(crate) struct IndexStore {
    instances: HashMap<ClassId, BTreeSet<ObjectId>>,
    features: HashMap<FeatureId, FeatureData>,
    data_types: HashMap<DataTypeId, HashMap<Value, HashSet<(ObjectId, FeatureId)>>>,
}

impl IndexStore {
    // -------------------------------------------------------------------------
    // Instances
    // -------------------------------------------------------------------------

    pub(crate) fn insert_instance(&mut self, class: ClassId, object: ObjectId) -> bool {
        self.instances.entry(class).or_default().insert(object)
    }

    pub(crate) fn remove_instance(&mut self, class: ClassId, object: ObjectId) -> bool {
        let Some(set) = self.instances.get_mut(&class) else {
            return false;
        };
        let removed = set.remove(&object);
        if set.is_empty() {
            self.instances.remove(&class);
        }
        removed
    }

    pub(crate) fn instances(&self, class: ClassId) -> impl Iterator<Item = ObjectId> + '_ {
        self.instances.get(&class).into_iter().flatten().copied()
    }

    pub(crate) fn count_instances(&self, class: ClassId) -> usize {
        self.instances.get(&class).map_or(0, BTreeSet::len)
    }

    pub(crate) fn has_instance(&self, class: ClassId, object: ObjectId) -> bool {
        self.instances.get(&class).is_some_and(|s| s.contains(&object))
    }

    pub(crate) fn drop_class(&mut self, class: ClassId) {
        self.instances.remove(&class);
    }

    // -------------------------------------------------------------------------
    // Features
    // -------------------------------------------------------------------------

    pub(crate) fn insert_feature(&mut self, feature: FeatureId, holder: ObjectId, value: Value) -> bool {
        let data = self.features.entry(feature).or_default();
        let values = data.forward.entry(holder).or_default();
        if values.contains(&value) {
            return false;
        }
        values.push(value.clone());
        data.reverse.entry(value).or_default().insert(holder);
        data.size += 1;
        true
    }

    pub(crate) fn remove_feature(&mut self, feature: FeatureId, holder: ObjectId, value: &Value) -> bool {
        let Some(data) = self.features.get_mut(&feature) else {
            return false;
        };
        let Some(values) = data.forward.get_mut(&holder) else {
            return false;
        };
        let Some(pos) = values.iter().position(|v| v == value) else {
            return false;
        };
        values.remove(pos);
        if values.is_empty() {
            data.forward.remove(&holder);
        }
        if let Some(holders) = data.reverse.get_mut(value) {
            holders.remove(&holder);
            if holders.is_empty() {
                data.reverse.remove(value);
            }
        }
        data.size -= 1;
        true
    }

    pub(crate) fn feature_values(&self, feature: FeatureId, holder: ObjectId) -> &[Value] {
        self.features
            .get(&feature)
            .and_then(|d| d.forward.get(&holder))
            .map_or(&[], Vec::as_slice)
    }

    pub(crate) fn feature_holders(&self, feature: FeatureId, value: &Value) -> impl Iterator<Item = ObjectId> + '_ {
        self.features
            .get(&feature)
            .and_then(|d| d.reverse.get(value))
            .into_iter()
            .flatten()
            .copied()
    }

    pub(crate) fn has_feature_value(&self, feature: FeatureId, holder: ObjectId, value: &Value) -> bool {
        self.feature_values(feature, holder).contains(value)
    }

    pub(crate) fn feature_pairs(&self, feature: FeatureId) -> impl Iterator<Item = (ObjectId, &Value)> + '_ {
        self.features
            .get(&feature)
            .into_iter()
            .flat_map(|d| d.forward.iter())
            .flat_map(|(h, vs)| vs.iter().map(move |v| (*h, v)))
    }

    pub(crate) fn holders_of_feature(&self, feature: FeatureId) -> impl Iterator<Item = ObjectId> + '_ {
        self.features
            .get(&feature)
            .into_iter()
            .flat_map(|d| d.forward.keys().copied())
    }

    pub(crate) fn count_feature(&self, feature: FeatureId) -> usize {
        self.features.get(&feature).map_or(0, |d| d.size)
    }

    pub(crate) fn drop_feature(&mut self, feature: FeatureId) {
        self.features.remove(&feature);
    }

    // -------------------------------------------------------------------------
    // Data types
    // -------------------------------------------------------------------------

    /// Records one occurrence of `value`. Returns `Some(first)` if the
    /// occurrence was new, `first` telling whether the value was absent.
    pub(crate) fn insert_data_type(&mut self, data_type: DataTypeId, value: Value, source: (ObjectId, FeatureId)) -> Option<bool> {
        let occurrences = self
            .data_types
            .entry(data_type)
            .or_default()
            .entry(value)
            .or_default();
        let first = occurrences.is_empty();
        occurrences.insert(source).then_some(first)
    }

    /// Drops one occurrence of `value`. Returns `Some(last)` if the
    /// occurrence existed, `last` telling whether the value disappeared.
    pub(crate) fn remove_data_type(&mut self, data_type: DataTypeId, value: &Value, source: (ObjectId, FeatureId)) -> Option<bool> {
        let values = self.data_types.get_mut(&data_type)?;
        let occurrences = values.get_mut(value)?;
        if !occurrences.remove(&source) {
            return None;
        }
        let last = occurrences.is_empty();
        if last {
            values.remove(value);
        }
        Some(last)
    }

    pub(crate) fn data_type_values(&self, data_type: DataTypeId) -> impl Iterator<Item = &Value> + '_ {
        self.data_types.get(&data_type).into_iter().flat_map(HashMap::keys)
    }

    pub(crate) fn has_data_type_value(&self, data_type: DataTypeId, value: &Value) -> bool {
        self.data_types
            .get(&data_type)
            .is_some_and(|m| m.contains_key(value))
    }

    pub(crate) fn count_data_type(&self, data_type: DataTypeId) -> usize {
        self.data_types.get(&data_type).map_or(0, HashMap::len)
    }

    pub(crate) fn drop_data_type(&mut self, data_type: DataTypeId) {
        self.data_types.remove(&data_type);
    }
}
