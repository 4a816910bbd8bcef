//! The in-memory object graph.
//!
//! `GraphModel` is plain data: every mutation validates against the
//! [`Metamodel`] and returns the [`ModelNotification`]s describing what
//! actually changed. Dispatching those to observers is the job of
//! [`crate::ModelHandle`]. Storage uses persistent maps, so cloning a model
//! to take a snapshot is cheap.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use im::{HashMap as ImHashMap, OrdSet, Vector};
use trellis_foundation::{Error, ErrorKind, ObjectId, Result, Value};

use crate::metamodel::{ClassId, FeatureId, FeatureKind, Metamodel};
use crate::store::ObjectStore;

/// Identifier of a resource (a partition of the model).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u32);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource#{}", self.0)
    }
}

/// Computes the current values of a derived feature for one holder.
pub type DerivedFn = Rc<dyn Fn(&GraphModel, ObjectId) -> Result<Vec<Value>>>;

/// A change that has been applied to the model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelNotification {
    /// An object was created.
    ObjectCreated {
        /// The new object.
        object: ObjectId,
        /// Its concrete class.
        class: ClassId,
        /// The resource it lives in.
        resource: ResourceId,
    },
    /// An object was deleted. Its values were removed beforehand.
    ObjectDeleted {
        /// The deleted object.
        object: ObjectId,
        /// Its concrete class.
        class: ClassId,
        /// The resource it lived in.
        resource: ResourceId,
    },
    /// A value was added to a feature slot.
    ValueAdded {
        /// Holder of the slot.
        holder: ObjectId,
        /// The feature.
        feature: FeatureId,
        /// The added value.
        value: Value,
    },
    /// A value was removed from a feature slot.
    ValueRemoved {
        /// Holder of the slot.
        holder: ObjectId,
        /// The feature.
        feature: FeatureId,
        /// The removed value.
        value: Value,
    },
    /// A resource started loading.
    ResourceLoadStarted(ResourceId),
    /// A resource finished loading.
    ResourceLoadFinished(ResourceId),
}

/// A named partition of model objects.
#[derive(Clone, Debug)]
pub struct Resource {
    /// Identifier.
    pub id: ResourceId,
    /// Name.
    pub name: String,
    loading: bool,
    objects: OrdSet<ObjectId>,
}

impl Resource {
    /// Returns true while the resource is being loaded.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Objects in this resource.
    pub fn objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.objects.iter().copied()
    }
}

#[derive(Clone, Debug)]
struct ObjectRecord {
    class: ClassId,
    resource: ResourceId,
    slots: ImHashMap<FeatureId, Vector<Value>>,
}

/// Observable object graph conforming to a metamodel.
#[derive(Clone)]
pub struct GraphModel {
    metamodel: Arc<Metamodel>,
    store: ObjectStore,
    objects: ImHashMap<ObjectId, ObjectRecord>,
    incoming: ImHashMap<ObjectId, Vector<(ObjectId, FeatureId)>>,
    resources: Vector<Resource>,
    derived: ImHashMap<FeatureId, DerivedFn>,
}

impl fmt::Debug for GraphModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphModel")
            .field("objects", &self.objects.len())
            .field("resources", &self.resources.len())
            .field("derived", &self.derived.len())
            .finish_non_exhaustive()
    }
}

impl GraphModel {
    /// Creates an empty model.
    #[must_use]
    pub fn new(metamodel: Arc<Metamodel>) -> Self {
        Self {
            metamodel,
            store: ObjectStore::new(),
            objects: ImHashMap::new(),
            incoming: ImHashMap::new(),
            resources: Vector::new(),
            derived: ImHashMap::new(),
        }
    }

    /// The metamodel this model conforms to.
    #[must_use]
    pub fn metamodel(&self) -> &Arc<Metamodel> {
        &self.metamodel
    }

    // -------------------------------------------------------------------------
    // Resources
    // -------------------------------------------------------------------------

    /// Creates an empty resource.
    pub fn create_resource(&mut self, name: &str) -> ResourceId {
        let id = ResourceId(u32::try_from(self.resources.len()).unwrap_or(u32::MAX));
        self.resources.push_back(Resource {
            id,
            name: name.to_string(),
            loading: false,
            objects: OrdSet::new(),
        });
        id
    }

    /// Looks up a resource.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidRoot`] for unknown resources.
    pub fn resource(&self, id: ResourceId) -> Result<&Resource> {
        self.resources
            .get(id.0 as usize)
            .ok_or_else(|| Error::new(ErrorKind::InvalidRoot(id.to_string())))
    }

    /// All resources.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> + '_ {
        self.resources.iter()
    }

    /// Returns true if any resource is being loaded.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.resources.iter().any(|r| r.loading)
    }

    /// Marks a resource as loading or loaded.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidRoot`] for unknown resources.
    pub fn set_loading(&mut self, id: ResourceId, loading: bool) -> Result<Vec<ModelNotification>> {
        let resource = self
            .resources
            .get_mut(id.0 as usize)
            .ok_or_else(|| Error::new(ErrorKind::InvalidRoot(id.to_string())))?;
        if resource.loading == loading {
            return Ok(Vec::new());
        }
        resource.loading = loading;
        Ok(vec![if loading {
            ModelNotification::ResourceLoadStarted(id)
        } else {
            ModelNotification::ResourceLoadFinished(id)
        }])
    }

    // -------------------------------------------------------------------------
    // Objects
    // -------------------------------------------------------------------------

    fn record(&self, id: ObjectId) -> Result<&ObjectRecord> {
        self.store.validate(id)?;
        self.objects
            .get(&id)
            .ok_or_else(|| Error::object_not_found(id))
    }

    /// Returns true if the object is alive.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.store.exists(id)
    }

    /// Concrete class of an object.
    ///
    /// # Errors
    ///
    /// Returns an error for dead or stale ids.
    pub fn class_of(&self, id: ObjectId) -> Result<ClassId> {
        Ok(self.record(id)?.class)
    }

    /// Resource of an object.
    ///
    /// # Errors
    ///
    /// Returns an error for dead or stale ids.
    pub fn resource_of(&self, id: ObjectId) -> Result<ResourceId> {
        Ok(self.record(id)?.resource)
    }

    /// All live objects in index order.
    pub fn objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.store.iter()
    }

    /// Number of live objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.store.len()
    }

    /// Creates an object of a concrete class in a resource.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown resources or abstract/unknown classes.
    pub fn create_object(&mut self, resource: ResourceId, class: ClassId) -> Result<(ObjectId, Vec<ModelNotification>)> {
        self.resource(resource)?;
        let schema = self.metamodel.class(class)?;
        if schema.is_abstract {
            return Err(Error::type_mismatch(
                "concrete class",
                format!("abstract class {}", schema.name),
            ));
        }
        let object = self.store.allocate();
        self.objects.insert(
            object,
            ObjectRecord {
                class,
                resource,
                slots: ImHashMap::new(),
            },
        );
        if let Some(r) = self.resources.get_mut(resource.0 as usize) {
            r.objects.insert(object);
        }
        Ok((
            object,
            vec![ModelNotification::ObjectCreated {
                object,
                class,
                resource,
            }],
        ))
    }

    /// Deletes an object, its contents and every reference to it.
    ///
    /// # Errors
    ///
    /// Returns an error for dead or stale ids.
    pub fn delete_object(&mut self, id: ObjectId) -> Result<Vec<ModelNotification>> {
        self.record(id)?;
        let mut out = Vec::new();
        self.delete_recursive(id, &mut out)?;
        Ok(out)
    }

    fn delete_recursive(&mut self, id: ObjectId, out: &mut Vec<ModelNotification>) -> Result<()> {
        let record = self.record(id)?.clone();

        for (feature, values) in &record.slots {
            let contains = matches!(
                self.metamodel.feature(*feature)?.kind,
                FeatureKind::Reference {
                    containment: true,
                    ..
                }
            );
            if contains {
                for child in values.iter().filter_map(Value::as_object) {
                    if self.store.exists(child) {
                        self.delete_recursive(child, out)?;
                    }
                }
            }
        }

        let incoming: Vec<(ObjectId, FeatureId)> = self
            .incoming
            .get(&id)
            .map(|v| v.iter().copied().collect())
            .unwrap_or_default();
        for (holder, feature) in incoming {
            self.remove_linked(holder, feature, &Value::Object(id), out)?;
        }

        let outgoing: Vec<(FeatureId, Value)> = self
            .record(id)?
            .slots
            .iter()
            .flat_map(|(f, vs)| vs.iter().map(move |v| (*f, v.clone())))
            .collect();
        for (feature, value) in outgoing {
            self.remove_linked(id, feature, &value, out)?;
        }

        self.objects.remove(&id);
        self.incoming.remove(&id);
        if let Some(r) = self.resources.get_mut(record.resource.0 as usize) {
            r.objects.remove(&id);
        }
        self.store.release(id)?;
        out.push(ModelNotification::ObjectDeleted {
            object: id,
            class: record.class,
            resource: record.resource,
        });
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Feature values
    // -------------------------------------------------------------------------

    /// Current values of a feature, computing derived features on demand.
    ///
    /// # Errors
    ///
    /// Returns an error for dead objects, features the object does not have,
    /// or a failing derived computation.
    pub fn values(&self, holder: ObjectId, feature: FeatureId) -> Result<Vec<Value>> {
        let record = self.record(holder)?;
        let schema = self.metamodel.feature(feature)?;
        if !self.metamodel.is_subclass_of(record.class, schema.host) {
            return Err(self.no_such_feature(record.class, feature));
        }
        if schema.derived {
            let Some(compute) = self.derived.get(&feature) else {
                return Ok(Vec::new());
            };
            return compute(self, holder);
        }
        Ok(record
            .slots
            .get(&feature)
            .map(|v| v.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Stored (non-derived) feature values of an object.
    ///
    /// # Errors
    ///
    /// Returns an error for dead or stale ids.
    pub fn stored_values(&self, holder: ObjectId) -> Result<Vec<(FeatureId, Value)>> {
        Ok(self
            .record(holder)?
            .slots
            .iter()
            .flat_map(|(f, vs)| vs.iter().map(move |v| (*f, v.clone())))
            .collect())
    }

    /// Installs the computation of a derived feature.
    ///
    /// # Errors
    ///
    /// Returns an error if the feature is unknown or not derived.
    pub fn set_derived(&mut self, feature: FeatureId, compute: DerivedFn) -> Result<()> {
        if !self.metamodel.feature(feature)?.derived {
            return Err(Error::new(ErrorKind::Unsupported(format!(
                "{} is not derived",
                self.metamodel.feature_name(feature)
            ))));
        }
        self.derived.insert(feature, compute);
        Ok(())
    }

    /// Adds a value to a feature slot.
    ///
    /// Adding a value already present is a no-op. Opposite references are
    /// kept in sync.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not conform to the feature, the
    /// feature is derived, or a single-valued slot is already set.
    pub fn add_value(&mut self, holder: ObjectId, feature: FeatureId, value: Value) -> Result<Vec<ModelNotification>> {
        self.check_assignable(holder, feature, &value)?;
        let mut out = Vec::new();
        if self.slot_contains(holder, feature, &value) {
            return Ok(out);
        }
        let schema = self.metamodel.feature(feature)?;
        if !schema.many && self.slot_len(holder, feature) > 0 {
            return Err(Error::new(ErrorKind::Multiplicity(
                self.metamodel.feature_name(feature),
            )));
        }
        self.add_linked(holder, feature, value, &mut out)?;
        Ok(out)
    }

    /// Removes a value from a feature slot. Absent values are a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error for dead objects, unknown or derived features.
    pub fn remove_value(&mut self, holder: ObjectId, feature: FeatureId, value: &Value) -> Result<Vec<ModelNotification>> {
        self.check_feature(holder, feature)?;
        let mut out = Vec::new();
        if self.slot_contains(holder, feature, value) {
            self.remove_linked(holder, feature, value, &mut out)?;
        }
        Ok(out)
    }

    /// Replaces the content of a single-valued slot; `None` clears it.
    ///
    /// # Errors
    ///
    /// Returns an error if the feature is many-valued or the value does not
    /// conform.
    pub fn set_value(&mut self, holder: ObjectId, feature: FeatureId, value: Option<Value>) -> Result<Vec<ModelNotification>> {
        self.check_feature(holder, feature)?;
        if self.metamodel.feature(feature)?.many {
            return Err(Error::new(ErrorKind::Unsupported(format!(
                "set on many-valued feature {}",
                self.metamodel.feature_name(feature)
            ))));
        }
        if let Some(v) = &value {
            self.check_assignable(holder, feature, v)?;
            if self.slot_contains(holder, feature, v) {
                return Ok(Vec::new());
            }
        }
        let mut out = Vec::new();
        let old: Vec<Value> = self.values(holder, feature)?;
        for v in &old {
            self.remove_linked(holder, feature, v, &mut out)?;
        }
        if let Some(v) = value {
            self.add_linked(holder, feature, v, &mut out)?;
        }
        Ok(out)
    }

    fn no_such_feature(&self, class: ClassId, feature: FeatureId) -> Error {
        Error::new(ErrorKind::UnknownFeature(format!(
            "{} has no feature {}",
            self.metamodel.class_name(class),
            self.metamodel.feature_name(feature)
        )))
    }

    fn check_feature(&self, holder: ObjectId, feature: FeatureId) -> Result<()> {
        let class = self.class_of(holder)?;
        let schema = self.metamodel.feature(feature)?;
        if !self.metamodel.is_subclass_of(class, schema.host) {
            return Err(self.no_such_feature(class, feature));
        }
        if schema.derived {
            return Err(Error::new(ErrorKind::Unsupported(format!(
                "derived feature {} is read-only",
                self.metamodel.feature_name(feature)
            ))));
        }
        Ok(())
    }

    fn check_assignable(&self, holder: ObjectId, feature: FeatureId, value: &Value) -> Result<()> {
        self.check_feature(holder, feature)?;
        let schema = self.metamodel.feature(feature)?;
        match (schema.kind, value) {
            (_, Value::Nil) => Err(Error::type_mismatch("a value", "nil")),
            (FeatureKind::Attribute(dt), v) => {
                if self.metamodel.accepts(dt, v) {
                    Ok(())
                } else {
                    Err(Error::type_mismatch(
                        self.metamodel.data_type_name(dt),
                        v.kind().to_string(),
                    ))
                }
            }
            (FeatureKind::Reference { target, .. }, Value::Object(o)) => {
                let class = self.class_of(*o)?;
                if self.metamodel.is_subclass_of(class, target) {
                    Ok(())
                } else {
                    Err(Error::type_mismatch(
                        self.metamodel.class_name(target),
                        self.metamodel.class_name(class),
                    ))
                }
            }
            (FeatureKind::Reference { target, .. }, v) => Err(Error::type_mismatch(
                self.metamodel.class_name(target),
                v.kind().to_string(),
            )),
        }
    }

    fn slot_contains(&self, holder: ObjectId, feature: FeatureId, value: &Value) -> bool {
        self.objects
            .get(&holder)
            .and_then(|r| r.slots.get(&feature))
            .is_some_and(|vs| vs.contains(value))
    }

    fn slot_len(&self, holder: ObjectId, feature: FeatureId) -> usize {
        self.objects
            .get(&holder)
            .and_then(|r| r.slots.get(&feature))
            .map_or(0, Vector::len)
    }

    fn raw_add(&mut self, holder: ObjectId, feature: FeatureId, value: Value, out: &mut Vec<ModelNotification>) {
        if let Some(target) = value.as_object() {
            self.incoming
                .entry(target)
                .or_default()
                .push_back((holder, feature));
        }
        if let Some(record) = self.objects.get_mut(&holder) {
            record
                .slots
                .entry(feature)
                .or_default()
                .push_back(value.clone());
        }
        out.push(ModelNotification::ValueAdded {
            holder,
            feature,
            value,
        });
    }

    fn raw_remove(&mut self, holder: ObjectId, feature: FeatureId, value: &Value, out: &mut Vec<ModelNotification>) {
        let Some(record) = self.objects.get_mut(&holder) else {
            return;
        };
        let Some(slot) = record.slots.get_mut(&feature) else {
            return;
        };
        let Some(pos) = slot.index_of(value) else {
            return;
        };
        slot.remove(pos);
        if slot.is_empty() {
            record.slots.remove(&feature);
        }
        if let Some(target) = value.as_object() {
            if let Some(refs) = self.incoming.get_mut(&target) {
                if let Some(pos) = refs.index_of(&(holder, feature)) {
                    refs.remove(pos);
                }
            }
        }
        out.push(ModelNotification::ValueRemoved {
            holder,
            feature,
            value: value.clone(),
        });
    }

    fn add_linked(&mut self, holder: ObjectId, feature: FeatureId, value: Value, out: &mut Vec<ModelNotification>) -> Result<()> {
        let opposite = self.metamodel.feature(feature)?.opposite;
        match (opposite, value.as_object()) {
            (Some(opp), Some(target)) => {
                let opp_schema = self.metamodel.feature(opp)?;
                let back = Value::Object(holder);
                if !opp_schema.many {
                    let previous: Vec<Value> = self
                        .objects
                        .get(&target)
                        .and_then(|r| r.slots.get(&opp))
                        .map(|v| v.iter().cloned().collect())
                        .unwrap_or_default();
                    for p in previous.into_iter().filter(|p| *p != back) {
                        self.remove_linked(target, opp, &p, out)?;
                    }
                }
                self.raw_add(holder, feature, value, out);
                if !self.slot_contains(target, opp, &back) {
                    self.raw_add(target, opp, back, out);
                }
            }
            _ => self.raw_add(holder, feature, value, out),
        }
        Ok(())
    }

    fn remove_linked(&mut self, holder: ObjectId, feature: FeatureId, value: &Value, out: &mut Vec<ModelNotification>) -> Result<()> {
        let opposite = self.metamodel.feature(feature)?.opposite;
        self.raw_remove(holder, feature, value, out);
        if let (Some(opp), Some(target)) = (opposite, value.as_object()) {
            self.raw_remove(target, opp, &Value::Object(holder), out);
        }
        Ok(())
    }
}
