//! The base index: an observer of a [`ModelHandle`] that maintains
//! instances, feature values and data type occurrences of registered types.
//!
//! # Reentrancy
//!
//! Listeners are never invoked while the index state is borrowed. Every
//! model notification is first applied to the store, producing a list of
//! events; the borrow is released and only then are the events dispatched.
//! Listeners may therefore query the index, register new types or add
//! listeners from inside their callbacks.
//!
//! # Coalescing
//!
//! Registrations made inside [`BaseIndex::coalesce_traversals`] are delayed
//! until the outermost call returns, and all types registered in between are
//! gathered by a single traversal of the model.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::mem;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use tracing::{debug, error, trace, warn};
use trellis_foundation::{Error, ErrorKind, ObjectId, Result, Value};
use trellis_model::{
    ClassId, DataTypeId, FeatureId, FeatureSchema, Metamodel, ModelHandle, ModelNotification,
    ModelObserver, ResourceId,
};

use crate::level::IndexingLevel;
use crate::listener::{
    BaseIndexChangeListener, DataTypeListener, FeatureListener, IndexingErrorListener,
    InstanceListener, Listeners,
};
use crate::options::BaseIndexOptions;
use crate::store::IndexStore;

// =============================================================================
// Events and gathers
// =============================================================================

/// A store change to be reported to listeners once the state is released.
#[derive(Debug)]
enum Event {
    Instance {
        class: ClassId,
        object: ObjectId,
        inserted: bool,
    },
    Feature {
        holder: ObjectId,
        feature: FeatureId,
        value: Value,
        inserted: bool,
    },
    DataType {
        data_type: DataTypeId,
        value: Value,
        inserted: bool,
        boundary: bool,
    },
}

/// Keys a traversal has to visit.
#[derive(Debug, Default)]
struct Gather {
    all: bool,
    classes: BTreeSet<ClassId>,
    features: BTreeSet<FeatureId>,
    data_types: BTreeSet<DataTypeId>,
}

impl Gather {
    fn everything() -> Self {
        Self {
            all: true,
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        !self.all && self.classes.is_empty() && self.features.is_empty() && self.data_types.is_empty()
    }

    fn absorb(&mut self, other: Gather) {
        self.all |= other.all;
        self.classes.extend(other.classes);
        self.features.extend(other.features);
        self.data_types.extend(other.data_types);
    }

    fn wants_class(&self, class: ClassId) -> bool {
        self.all || self.classes.contains(&class)
    }

    fn wants_feature(&self, schema: &FeatureSchema) -> bool {
        self.all
            || self.features.contains(&schema.id)
            || schema
                .data_type()
                .is_some_and(|dt| self.data_types.contains(&dt))
    }
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug)]
struct IndexState {
    options: BaseIndexOptions,
    roots: BTreeSet<ResourceId>,
    known: HashMap<ObjectId, (ClassId, ResourceId)>,
    loading: BTreeSet<ResourceId>,

    observed_classes: HashMap<ClassId, IndexingLevel>,
    observed_features: HashMap<FeatureId, IndexingLevel>,
    observed_data_types: HashMap<DataTypeId, IndexingLevel>,

    delayed_classes: HashMap<ClassId, IndexingLevel>,
    delayed_features: HashMap<FeatureId, IndexingLevel>,
    delayed_data_types: HashMap<DataTypeId, IndexingLevel>,
    pending_gather: Gather,
    delayed_proxies: Vec<(ObjectId, FeatureId, ObjectId)>,
    depth: usize,

    store: IndexStore,
    derived_cache: HashMap<(ObjectId, FeatureId), Vec<Value>>,
    changed: bool,
    traversal_count: usize,
    disposed: bool,
}

impl IndexState {
    fn new(options: BaseIndexOptions) -> Self {
        Self {
            options,
            roots: BTreeSet::new(),
            known: HashMap::new(),
            loading: BTreeSet::new(),
            observed_classes: HashMap::new(),
            observed_features: HashMap::new(),
            observed_data_types: HashMap::new(),
            delayed_classes: HashMap::new(),
            delayed_features: HashMap::new(),
            delayed_data_types: HashMap::new(),
            pending_gather: Gather::default(),
            delayed_proxies: Vec::new(),
            depth: 0,
            store: IndexStore::default(),
            derived_cache: HashMap::new(),
            changed: false,
            traversal_count: 0,
            disposed: false,
        }
    }

    fn class_level(&self, mm: &Metamodel, class: ClassId) -> IndexingLevel {
        mm.type_closure(class).fold(self.options.wildcard_level, |acc, c| {
            acc.merge(self.observed_classes.get(&c).copied().unwrap_or_default())
        })
    }

    fn feature_level(&self, feature: FeatureId) -> IndexingLevel {
        self.options
            .wildcard_level
            .merge(self.observed_features.get(&feature).copied().unwrap_or_default())
    }

    fn data_type_level(&self, data_type: DataTypeId) -> IndexingLevel {
        self.options
            .wildcard_level
            .merge(self.observed_data_types.get(&data_type).copied().unwrap_or_default())
    }

    fn traversable(&self, schema: &FeatureSchema) -> bool {
        !schema.derived || schema.well_behaving || !self.options.traverse_only_well_behaving_derived_features
    }

    fn has_delayed(&self) -> bool {
        !(self.delayed_classes.is_empty()
            && self.delayed_features.is_empty()
            && self.delayed_data_types.is_empty()
            && self.pending_gather.is_empty())
    }

    /// Merges delayed registrations into the observed levels and returns the
    /// keys whose level rose from `NONE`.
    fn take_delayed(&mut self, mm: &Metamodel) -> Gather {
        let mut gather = mem::take(&mut self.pending_gather);

        for (class, level) in mem::take(&mut self.delayed_classes) {
            let affected: Vec<ClassId> = std::iter::once(class)
                .chain(mm.all_subtypes(class).into_iter().flatten().copied())
                .collect();
            let before: Vec<IndexingLevel> = affected.iter().map(|c| self.class_level(mm, *c)).collect();
            let entry = self.observed_classes.entry(class).or_default();
            *entry = entry.merge(level);
            for (c, old) in affected.into_iter().zip(before) {
                if !old.is_some() && self.class_level(mm, c).is_some() {
                    gather.classes.insert(c);
                }
            }
        }
        for (feature, level) in mem::take(&mut self.delayed_features) {
            let old = self.feature_level(feature);
            let entry = self.observed_features.entry(feature).or_default();
            *entry = entry.merge(level);
            if !old.is_some() && self.feature_level(feature).is_some() {
                gather.features.insert(feature);
            }
        }
        for (data_type, level) in mem::take(&mut self.delayed_data_types) {
            let old = self.data_type_level(data_type);
            let entry = self.observed_data_types.entry(data_type).or_default();
            *entry = entry.merge(level);
            if !old.is_some() && self.data_type_level(data_type).is_some() {
                gather.data_types.insert(data_type);
            }
        }
        gather
    }

    fn apply_instance(&mut self, mm: &Metamodel, class: ClassId, object: ObjectId, inserted: bool, notify: bool, events: &mut Vec<Event>) {
        let level = self.class_level(mm, class);
        if !level.is_some() {
            return;
        }
        let changed = if inserted {
            self.store.insert_instance(class, object)
        } else {
            self.store.remove_instance(class, object)
        };
        if changed {
            self.changed = true;
            if notify && level.has_notifications() {
                events.push(Event::Instance {
                    class,
                    object,
                    inserted,
                });
            }
        }
    }

    fn apply_value(&mut self, schema: &FeatureSchema, holder: ObjectId, value: &Value, inserted: bool, notify: bool, events: &mut Vec<Event>) {
        let feature = schema.id;
        if schema.derived && !schema.well_behaving {
            let cached = self.derived_cache.entry((holder, feature)).or_default();
            if inserted {
                if !cached.contains(value) {
                    cached.push(value.clone());
                }
            } else {
                cached.retain(|v| v != value);
            }
        }

        let level = self.feature_level(feature);
        if level.is_some() {
            let changed = if inserted {
                self.store.insert_feature(feature, holder, value.clone())
            } else {
                self.store.remove_feature(feature, holder, value)
            };
            if changed {
                self.changed = true;
                if notify && level.has_notifications() {
                    events.push(Event::Feature {
                        holder,
                        feature,
                        value: value.clone(),
                        inserted,
                    });
                }
            }
        }

        let Some(data_type) = schema.data_type() else {
            return;
        };
        let level = self.data_type_level(data_type);
        if !level.is_some() {
            return;
        }
        let boundary = if inserted {
            self.store.insert_data_type(data_type, value.clone(), (holder, feature))
        } else {
            self.store.remove_data_type(data_type, value, (holder, feature))
        };
        if let Some(boundary) = boundary {
            self.changed = true;
            if notify && level.has_notifications() {
                events.push(Event::DataType {
                    data_type,
                    value: value.clone(),
                    inserted,
                    boundary,
                });
            }
        }
    }

    /// Removes everything indexed for derived features of a deleted holder.
    /// The model only reports removal of stored values.
    fn forget_derived(&mut self, mm: &Metamodel, class: ClassId, holder: ObjectId, events: &mut Vec<Event>) -> Result<()> {
        for &feature in mm.features_of(class)? {
            let schema = mm.feature(feature)?;
            if !schema.derived {
                continue;
            }
            let mut values = self.derived_cache.remove(&(holder, feature)).unwrap_or_default();
            for v in self.store.feature_values(feature, holder) {
                if !values.contains(v) {
                    values.push(v.clone());
                }
            }
            for v in &values {
                self.apply_value(schema, holder, v, false, true, events);
            }
            self.derived_cache.remove(&(holder, feature));
        }
        Ok(())
    }
}

// =============================================================================
// BaseIndex
// =============================================================================

/// Indexes a model incrementally according to registered indexing levels.
pub struct BaseIndex {
    model: ModelHandle,
    metamodel: Arc<Metamodel>,
    observer: Weak<dyn ModelObserver>,
    state: RefCell<IndexState>,
    listeners: RefCell<Listeners>,
}

impl std::fmt::Debug for BaseIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("BaseIndex")
            .field("roots", &state.roots)
            .field("known", &state.known.len())
            .field("wildcard", &state.options.wildcard_level)
            .field("traversals", &state.traversal_count)
            .finish_non_exhaustive()
    }
}

impl BaseIndex {
    /// Creates an index over `model` and subscribes it to model changes.
    ///
    /// Nothing is indexed until a resource is added with
    /// [`BaseIndex::add_root`].
    #[must_use]
    pub fn new(model: &ModelHandle, options: BaseIndexOptions) -> Rc<Self> {
        let mut state = IndexState::new(options);
        state.loading = model
            .read()
            .resources()
            .filter(|r| r.is_loading())
            .map(|r| r.id)
            .collect();
        let index = Rc::new_cyclic(|weak: &Weak<BaseIndex>| {
            let observer: Weak<dyn ModelObserver> = weak.clone();
            BaseIndex {
                model: model.clone(),
                metamodel: model.metamodel(),
                observer,
                state: RefCell::new(state),
                listeners: RefCell::new(Listeners::default()),
            }
        });
        model.add_observer(index.observer.clone());
        index
    }

    /// The indexed model.
    #[must_use]
    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    /// The metamodel of the indexed model.
    #[must_use]
    pub fn metamodel(&self) -> &Arc<Metamodel> {
        &self.metamodel
    }

    /// Current configuration.
    #[must_use]
    pub fn options(&self) -> BaseIndexOptions {
        self.state.borrow().options.clone()
    }

    fn check_live(&self) -> Result<()> {
        if self.state.borrow().disposed {
            return Err(Error::new(ErrorKind::Disposed));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Roots
    // -------------------------------------------------------------------------

    /// Starts indexing the objects of a resource.
    ///
    /// Existing objects are gathered at the current levels and reported to
    /// listeners. Adding a root twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidRoot`] for unknown or excluded resources.
    pub fn add_root(&self, resource: ResourceId) -> Result<()> {
        self.check_live()?;
        if self.state.borrow().options.excluded_resources.contains(&resource) {
            return Err(Error::new(ErrorKind::InvalidRoot(format!(
                "{resource} is excluded from indexing"
            ))));
        }
        let objects: Vec<(ObjectId, ClassId)> = {
            let model = self.model.read();
            model
                .resource(resource)?
                .objects()
                .map(|o| Ok((o, model.class_of(o)?)))
                .collect::<Result<_>>()?
        };
        self.coalesce_traversals(|| {
            {
                let mut state = self.state.borrow_mut();
                if !state.roots.insert(resource) {
                    return Ok(());
                }
                for (object, class) in &objects {
                    state.known.insert(*object, (*class, resource));
                }
            }
            debug!(%resource, objects = objects.len(), "root added");
            let ids: Vec<ObjectId> = objects.iter().map(|(o, _)| *o).collect();
            let events = self.traverse(Some(ids), &Gather::everything(), true)?;
            self.dispatch(events);
            Ok(())
        })
    }

    /// Resources currently indexed.
    #[must_use]
    pub fn roots(&self) -> Vec<ResourceId> {
        self.state.borrow().roots.iter().copied().collect()
    }

    // -------------------------------------------------------------------------
    // Coalescing
    // -------------------------------------------------------------------------

    /// Runs `f` with traversals deferred until the outermost call returns.
    ///
    /// All types registered while `f` runs are gathered in a single model
    /// traversal. Nested calls simply run `f`.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, or [`ErrorKind::Traversal`] if gathering
    /// the newly registered types failed. A traversal failure is reported to
    /// the indexing error listeners as fatal.
    pub fn coalesce_traversals<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let nested = {
            let mut state = self.state.borrow_mut();
            if state.disposed {
                return Err(Error::new(ErrorKind::Disposed));
            }
            state.depth += 1;
            state.depth > 1
        };
        let result = f();
        if nested {
            self.state.borrow_mut().depth -= 1;
            return result;
        }
        let flushed = self.flush_delayed();
        self.state.borrow_mut().depth -= 1;
        self.notify_change_listeners();
        let value = result?;
        flushed?;
        Ok(value)
    }

    /// Returns true inside [`BaseIndex::coalesce_traversals`].
    #[must_use]
    pub fn is_coalescing(&self) -> bool {
        self.state.borrow().depth > 0
    }

    fn flush_delayed(&self) -> Result<()> {
        loop {
            let gather = self.state.borrow_mut().take_delayed(&self.metamodel);
            let traversed = !gather.is_empty();
            if traversed {
                if let Err(e) = self.traverse(None, &gather, false) {
                    let description = "gathering newly registered types";
                    self.report_fatal(description, &e);
                    return Err(Error::new(ErrorKind::Traversal(format!("{description}: {e}"))));
                }
            }
            let resolved = self.resolve_proxies();
            if !traversed && !resolved && !self.state.borrow().has_delayed() {
                return Ok(());
            }
        }
    }

    /// Visits `objects` (all known objects when `None`) and applies the
    /// values of the gathered keys.
    fn traverse(&self, objects: Option<Vec<ObjectId>>, gather: &Gather, notify: bool) -> Result<Vec<Event>> {
        let mm = &*self.metamodel;
        let mut instances = Vec::new();
        let mut values = Vec::new();
        {
            let state = self.state.borrow();
            let model = self.model.read();
            let mut objects = objects.unwrap_or_else(|| state.known.keys().copied().collect());
            objects.sort_unstable();
            for object in objects {
                let Some(&(class, _)) = state.known.get(&object) else {
                    continue;
                };
                if gather.wants_class(class) {
                    instances.push((class, object));
                }
                for &feature in mm.features_of(class)? {
                    let schema = mm.feature(feature)?;
                    if !state.traversable(schema) || !gather.wants_feature(schema) {
                        continue;
                    }
                    for value in model.values(object, feature)? {
                        values.push((feature, object, value));
                    }
                }
            }
        }

        let mut state = self.state.borrow_mut();
        state.traversal_count += 1;
        debug!(
            traversal = state.traversal_count,
            instances = instances.len(),
            values = values.len(),
            "model traversal"
        );
        let mut events = Vec::new();
        for (class, object) in instances {
            state.apply_instance(mm, class, object, true, notify, &mut events);
        }
        for (feature, holder, value) in values {
            let schema = mm.feature(feature)?;
            state.apply_value(schema, holder, &value, true, notify, &mut events);
        }
        Ok(events)
    }

    /// Indexes delayed references once no resource is loading. Returns true
    /// if any proxy was handled.
    fn resolve_proxies(&self) -> bool {
        let proxies = {
            let mut state = self.state.borrow_mut();
            if !state.loading.is_empty() || state.delayed_proxies.is_empty() {
                return false;
            }
            mem::take(&mut state.delayed_proxies)
        };
        let live: Vec<(ObjectId, FeatureId, Value)> = {
            let model = self.model.read();
            proxies
                .into_iter()
                .map(|(holder, feature, target)| (holder, feature, Value::Object(target)))
                .filter(|(holder, feature, target)| {
                    model
                        .values(*holder, *feature)
                        .is_ok_and(|vs| vs.contains(target))
                })
                .collect()
        };
        debug!(resolved = live.len(), "delayed references resolved");
        let mut events = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            for (holder, feature, value) in &live {
                if let Ok(schema) = self.metamodel.feature(*feature) {
                    state.apply_value(schema, *holder, value, true, true, &mut events);
                }
            }
        }
        self.dispatch(events);
        true
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Requests indexing of classes (and their subclasses) at `level`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown classes or a failed traversal.
    pub fn register_classes(&self, classes: &[ClassId], level: IndexingLevel) -> Result<()> {
        self.register_observed_types(classes, &[], &[], level)
    }

    /// Requests indexing of features at `level`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown features or a failed traversal.
    pub fn register_features(&self, features: &[FeatureId], level: IndexingLevel) -> Result<()> {
        self.register_observed_types(&[], &[], features, level)
    }

    /// Requests indexing of data types at `level`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown data types or a failed traversal.
    pub fn register_data_types(&self, data_types: &[DataTypeId], level: IndexingLevel) -> Result<()> {
        self.register_observed_types(&[], data_types, &[], level)
    }

    /// Registers classes, data types and features in one traversal.
    ///
    /// A level already provided by the wildcard level is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown keys or a failed traversal.
    pub fn register_observed_types(&self, classes: &[ClassId], data_types: &[DataTypeId], features: &[FeatureId], level: IndexingLevel) -> Result<()> {
        for &c in classes {
            self.metamodel.class(c)?;
        }
        for &d in data_types {
            self.metamodel.data_type(d)?;
        }
        for &f in features {
            self.metamodel.feature(f)?;
        }
        self.coalesce_traversals(|| {
            let mut state = self.state.borrow_mut();
            if !level.is_some() || state.options.wildcard_level.covers(level) {
                return Ok(());
            }
            for &c in classes {
                let e = state.delayed_classes.entry(c).or_default();
                *e = e.merge(level);
            }
            for &d in data_types {
                let e = state.delayed_data_types.entry(d).or_default();
                *e = e.merge(level);
            }
            for &f in features {
                let e = state.delayed_features.entry(f).or_default();
                *e = e.merge(level);
            }
            trace!(
                classes = classes.len(),
                data_types = data_types.len(),
                features = features.len(),
                %level,
                "registration delayed"
            );
            Ok(())
        })
    }

    fn check_unregister(&self, listening: impl FnOnce(&Listeners) -> Option<String>) -> Result<()> {
        self.check_live()?;
        if self.state.borrow().options.is_wildcard() {
            return Err(Error::new(ErrorKind::WildcardMode("unregistering types".to_string())));
        }
        if let Some(key) = listening(&self.listeners.borrow()) {
            return Err(Error::new(ErrorKind::ListenersAttached(key)));
        }
        Ok(())
    }

    /// Stops indexing classes. Subclasses lose their level unless it is
    /// provided by another registration.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::WildcardMode`] in wildcard mode and
    /// [`ErrorKind::ListenersAttached`] while an instance listener is
    /// subscribed to one of the classes.
    pub fn unregister_classes(&self, classes: &[ClassId]) -> Result<()> {
        let mm = &*self.metamodel;
        self.check_unregister(|l| {
            classes
                .iter()
                .find(|c| l.listens_to_class(**c))
                .map(|c| mm.class_name(*c))
        })?;
        let mut state = self.state.borrow_mut();
        for &class in classes {
            state.observed_classes.remove(&class);
            state.delayed_classes.remove(&class);
            let affected = std::iter::once(class).chain(mm.all_subtypes(class).into_iter().flatten().copied());
            for c in affected {
                if !state.class_level(mm, c).is_some() {
                    state.store.drop_class(c);
                }
            }
        }
        Ok(())
    }

    /// Stops indexing features.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::WildcardMode`] in wildcard mode and
    /// [`ErrorKind::ListenersAttached`] while a feature listener is
    /// subscribed to one of the features.
    pub fn unregister_features(&self, features: &[FeatureId]) -> Result<()> {
        let mm = &*self.metamodel;
        self.check_unregister(|l| {
            features
                .iter()
                .find(|f| l.listens_to_feature(**f))
                .map(|f| mm.feature_name(*f))
        })?;
        let mut state = self.state.borrow_mut();
        for &feature in features {
            state.observed_features.remove(&feature);
            state.delayed_features.remove(&feature);
            state.store.drop_feature(feature);
        }
        Ok(())
    }

    /// Stops indexing data types.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::WildcardMode`] in wildcard mode and
    /// [`ErrorKind::ListenersAttached`] while a data type listener is
    /// subscribed to one of the data types.
    pub fn unregister_data_types(&self, data_types: &[DataTypeId]) -> Result<()> {
        let mm = &*self.metamodel;
        self.check_unregister(|l| {
            data_types
                .iter()
                .find(|d| l.listens_to_data_type(**d))
                .map(|d| mm.data_type_name(*d))
        })?;
        let mut state = self.state.borrow_mut();
        for &data_type in data_types {
            state.observed_data_types.remove(&data_type);
            state.delayed_data_types.remove(&data_type);
            state.store.drop_data_type(data_type);
        }
        Ok(())
    }

    /// Raises the wildcard level. Keys that were not indexed before are
    /// gathered by one traversal.
    ///
    /// # Errors
    ///
    /// Returns an error if the traversal fails.
    pub fn set_wildcard_level(&self, level: IndexingLevel) -> Result<()> {
        let mm = &*self.metamodel;
        self.coalesce_traversals(|| {
            let mut state = self.state.borrow_mut();
            let merged = state.options.wildcard_level.merge(level);
            if merged == state.options.wildcard_level {
                return Ok(());
            }
            let mut gather = Gather::default();
            let old_classes: Vec<(ClassId, bool)> = mm
                .classes()
                .map(|c| (c.id, state.class_level(mm, c.id).is_some()))
                .collect();
            let old_features: Vec<(FeatureId, bool)> = mm
                .features()
                .map(|f| (f.id, state.feature_level(f.id).is_some()))
                .collect();
            let old_data_types: Vec<(DataTypeId, bool)> = mm
                .data_types()
                .map(|d| (d.id, state.data_type_level(d.id).is_some()))
                .collect();
            state.options.wildcard_level = merged;
            gather
                .classes
                .extend(old_classes.into_iter().filter(|(_, was)| !was).map(|(c, _)| c));
            gather
                .features
                .extend(old_features.into_iter().filter(|(_, was)| !was).map(|(f, _)| f));
            gather
                .data_types
                .extend(old_data_types.into_iter().filter(|(_, was)| !was).map(|(d, _)| d));
            debug!(level = %merged, "wildcard level raised");
            state.pending_gather.absorb(gather);
            Ok(())
        })
    }

    /// Returns true if a wildcard level is in effect.
    #[must_use]
    pub fn is_in_wildcard_mode(&self) -> bool {
        self.state.borrow().options.is_wildcard()
    }

    /// Effective level of a class, including registrations of superclasses.
    #[must_use]
    pub fn class_indexing_level(&self, class: ClassId) -> IndexingLevel {
        self.state.borrow().class_level(&self.metamodel, class)
    }

    /// Effective level of a feature.
    #[must_use]
    pub fn feature_indexing_level(&self, feature: FeatureId) -> IndexingLevel {
        self.state.borrow().feature_level(feature)
    }

    /// Effective level of a data type.
    #[must_use]
    pub fn data_type_indexing_level(&self, data_type: DataTypeId) -> IndexingLevel {
        self.state.borrow().data_type_level(data_type)
    }

    /// Number of model traversals performed so far.
    #[must_use]
    pub fn traversal_count(&self) -> usize {
        self.state.borrow().traversal_count
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    fn require(&self, level: IndexingLevel, needs: fn(IndexingLevel) -> bool, key: impl FnOnce() -> String) -> Result<()> {
        self.check_live()?;
        if needs(level) {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::IllegalInputKey(format!(
                "{} is indexed at {level}",
                key()
            ))))
        }
    }

    fn require_class(&self, class: ClassId, needs: fn(IndexingLevel) -> bool) -> Result<()> {
        self.require(self.class_indexing_level(class), needs, || self.metamodel.class_name(class))
    }

    fn require_feature(&self, feature: FeatureId, needs: fn(IndexingLevel) -> bool) -> Result<()> {
        self.require(self.feature_indexing_level(feature), needs, || self.metamodel.feature_name(feature))
    }

    fn require_data_type(&self, data_type: DataTypeId, needs: fn(IndexingLevel) -> bool) -> Result<()> {
        self.require(self.data_type_indexing_level(data_type), needs, || {
            self.metamodel.data_type_name(data_type)
        })
    }

    fn subtype_closure(&self, class: ClassId) -> impl Iterator<Item = ClassId> + '_ {
        std::iter::once(class).chain(self.metamodel.all_subtypes(class).into_iter().flatten().copied())
    }

    /// Instances of `class` and its subclasses, in id order.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IllegalInputKey`] unless the class is indexed at
    /// `FULL`.
    pub fn all_instances(&self, class: ClassId) -> Result<Vec<ObjectId>> {
        self.require_class(class, IndexingLevel::has_instances)?;
        let state = self.state.borrow();
        let all: BTreeSet<ObjectId> = self
            .subtype_closure(class)
            .flat_map(|c| state.store.instances(c).collect::<Vec<_>>())
            .collect();
        Ok(all.into_iter().collect())
    }

    /// Instances whose concrete class is `class`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IllegalInputKey`] unless the class is indexed at
    /// `FULL`.
    pub fn direct_instances(&self, class: ClassId) -> Result<Vec<ObjectId>> {
        self.require_class(class, IndexingLevel::has_instances)?;
        Ok(self.state.borrow().store.instances(class).collect())
    }

    /// Returns true if `object` is an indexed instance of `class`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IllegalInputKey`] unless the class is indexed at
    /// `FULL`.
    pub fn is_instance_of(&self, object: ObjectId, class: ClassId) -> Result<bool> {
        self.require_class(class, IndexingLevel::has_instances)?;
        let state = self.state.borrow();
        Ok(self
            .subtype_closure(class)
            .any(|c| state.store.has_instance(c, object)))
    }

    /// Number of instances of `class` and its subclasses.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IllegalInputKey`] unless statistics are kept.
    pub fn count_all_instances(&self, class: ClassId) -> Result<usize> {
        self.require_class(class, IndexingLevel::has_statistics)?;
        let state = self.state.borrow();
        Ok(self
            .subtype_closure(class)
            .map(|c| state.store.count_instances(c))
            .sum())
    }

    /// Distinct values of a data type present in indexed slots.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IllegalInputKey`] unless the data type is
    /// indexed at `FULL`.
    pub fn data_type_instances(&self, data_type: DataTypeId) -> Result<Vec<Value>> {
        self.require_data_type(data_type, IndexingLevel::has_instances)?;
        let mut values: Vec<Value> = self
            .state
            .borrow()
            .store
            .data_type_values(data_type)
            .cloned()
            .collect();
        values.sort_by(Value::total_cmp);
        Ok(values)
    }

    /// Returns true if some indexed slot holds `value`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IllegalInputKey`] unless the data type is
    /// indexed at `FULL`.
    pub fn is_data_type_instance(&self, data_type: DataTypeId, value: &Value) -> Result<bool> {
        self.require_data_type(data_type, IndexingLevel::has_instances)?;
        Ok(self.state.borrow().store.has_data_type_value(data_type, value))
    }

    /// Number of distinct values of a data type.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IllegalInputKey`] unless statistics are kept.
    pub fn count_data_type_instances(&self, data_type: DataTypeId) -> Result<usize> {
        self.require_data_type(data_type, IndexingLevel::has_statistics)?;
        Ok(self.state.borrow().store.count_data_type(data_type))
    }

    /// All `(holder, value)` pairs of a feature, ordered by holder.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IllegalInputKey`] unless the feature is indexed
    /// at `FULL`.
    pub fn feature_instances(&self, feature: FeatureId) -> Result<Vec<(ObjectId, Value)>> {
        self.require_feature(feature, IndexingLevel::has_instances)?;
        let mut pairs: Vec<(ObjectId, Value)> = self
            .state
            .borrow()
            .store
            .feature_pairs(feature)
            .map(|(h, v)| (h, v.clone()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.total_cmp(&b.1)));
        Ok(pairs)
    }

    /// Values of `feature` held by `holder`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IllegalInputKey`] unless the feature is indexed
    /// at `FULL`.
    pub fn feature_targets(&self, holder: ObjectId, feature: FeatureId) -> Result<Vec<Value>> {
        self.require_feature(feature, IndexingLevel::has_instances)?;
        Ok(self.state.borrow().store.feature_values(feature, holder).to_vec())
    }

    /// Number of values of `feature` held by `holder`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IllegalInputKey`] unless the feature is indexed
    /// at `FULL`.
    pub fn count_feature_targets(&self, holder: ObjectId, feature: FeatureId) -> Result<usize> {
        self.require_feature(feature, IndexingLevel::has_instances)?;
        Ok(self.state.borrow().store.feature_values(feature, holder).len())
    }

    /// Holders whose `feature` contains `value`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IllegalInputKey`] unless the feature is indexed
    /// at `FULL`.
    pub fn find_by_feature_value(&self, value: &Value, feature: FeatureId) -> Result<Vec<ObjectId>> {
        self.require_feature(feature, IndexingLevel::has_instances)?;
        Ok(self.state.borrow().store.feature_holders(feature, value).collect())
    }

    /// Returns true if `feature` of `holder` contains `value`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IllegalInputKey`] unless the feature is indexed
    /// at `FULL`.
    pub fn has_feature_value(&self, holder: ObjectId, feature: FeatureId, value: &Value) -> Result<bool> {
        self.require_feature(feature, IndexingLevel::has_instances)?;
        Ok(self.state.borrow().store.has_feature_value(feature, holder, value))
    }

    /// Objects holding at least one value of `feature`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IllegalInputKey`] unless the feature is indexed
    /// at `FULL`.
    pub fn holders_of_feature(&self, feature: FeatureId) -> Result<Vec<ObjectId>> {
        self.require_feature(feature, IndexingLevel::has_instances)?;
        let mut holders: Vec<ObjectId> = self.state.borrow().store.holders_of_feature(feature).collect();
        holders.sort_unstable();
        Ok(holders)
    }

    /// Number of `(holder, value)` pairs of a feature.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IllegalInputKey`] unless statistics are kept.
    pub fn count_features(&self, feature: FeatureId) -> Result<usize> {
        self.require_feature(feature, IndexingLevel::has_statistics)?;
        Ok(self.state.borrow().store.count_feature(feature))
    }

    /// `(holder, attribute)` pairs holding `value`, over every attribute
    /// indexed at `FULL`.
    #[must_use]
    pub fn find_by_attribute_value(&self, value: &Value) -> Vec<(ObjectId, FeatureId)> {
        self.pairs_pointing_at(value, |schema| !schema.is_reference())
    }

    /// `(holder, reference)` pairs pointing at `target`, over every
    /// reference indexed at `FULL`.
    #[must_use]
    pub fn inverse_references(&self, target: ObjectId) -> Vec<(ObjectId, FeatureId)> {
        self.pairs_pointing_at(&Value::Object(target), FeatureSchema::is_reference)
    }

    fn pairs_pointing_at(&self, value: &Value, select: impl Fn(&FeatureSchema) -> bool) -> Vec<(ObjectId, FeatureId)> {
        let state = self.state.borrow();
        let mut out: Vec<(ObjectId, FeatureId)> = self
            .metamodel
            .features()
            .filter(|f| select(*f) && state.feature_level(f.id).has_instances())
            .flat_map(|f| {
                state
                    .store
                    .feature_holders(f.id, value)
                    .map(|h| (h, f.id))
                    .collect::<Vec<_>>()
            })
            .collect();
        out.sort_unstable();
        out
    }

    // -------------------------------------------------------------------------
    // Derived features
    // -------------------------------------------------------------------------

    /// Recomputes derived features that are not well-behaving and reports
    /// the differences to listeners as ordinary value changes.
    ///
    /// Does nothing when only well-behaving derived features are indexed.
    ///
    /// # Errors
    ///
    /// Returns an error if a derived computation fails.
    pub fn resample_derived_features(&self) -> Result<()> {
        if self.state.borrow().options.traverse_only_well_behaving_derived_features {
            return Ok(());
        }
        let mm = &*self.metamodel;
        self.coalesce_traversals(|| {
            let mut diffs: Vec<(FeatureId, ObjectId, Vec<Value>, Vec<Value>)> = Vec::new();
            {
                let state = self.state.borrow();
                let model = self.model.read();
                let mut holders: Vec<(ObjectId, ClassId)> =
                    state.known.iter().map(|(o, (c, _))| (*o, *c)).collect();
                holders.sort_unstable();
                for (holder, class) in holders {
                    for &feature in mm.features_of(class)? {
                        let schema = mm.feature(feature)?;
                        let indexed = state.feature_level(feature).is_some()
                            || schema
                                .data_type()
                                .is_some_and(|dt| state.data_type_level(dt).is_some());
                        if !schema.derived || schema.well_behaving || !indexed {
                            continue;
                        }
                        let fresh = model.values(holder, feature)?;
                        let cached = state
                            .derived_cache
                            .get(&(holder, feature))
                            .cloned()
                            .unwrap_or_default();
                        let removed: Vec<Value> = cached.iter().filter(|v| !fresh.contains(v)).cloned().collect();
                        let added: Vec<Value> = fresh.into_iter().filter(|v| !cached.contains(v)).collect();
                        if !(removed.is_empty() && added.is_empty()) {
                            diffs.push((feature, holder, removed, added));
                        }
                    }
                }
            }
            debug!(changed_slots = diffs.len(), "derived features resampled");
            let mut events = Vec::new();
            {
                let mut state = self.state.borrow_mut();
                for (feature, holder, removed, added) in &diffs {
                    let schema = mm.feature(*feature)?;
                    for v in removed {
                        state.apply_value(schema, *holder, v, false, true, &mut events);
                    }
                    for v in added {
                        state.apply_value(schema, *holder, v, true, true, &mut events);
                    }
                }
            }
            self.dispatch(events);
            Ok(())
        })
    }

    // -------------------------------------------------------------------------
    // Listeners
    // -------------------------------------------------------------------------

    /// Subscribes to instances of `classes`, registering them at
    /// `NOTIFICATIONS` level.
    ///
    /// # Errors
    ///
    /// Returns an error if registration fails.
    pub fn add_instance_listener(&self, classes: &[ClassId], listener: Rc<dyn InstanceListener>) -> Result<()> {
        self.register_classes(classes, IndexingLevel::Notifications)?;
        let mut listeners = self.listeners.borrow_mut();
        for &class in classes {
            listeners.add_instance(class, Rc::clone(&listener));
        }
        Ok(())
    }

    /// Unsubscribes an instance listener. Returns true if it was subscribed
    /// to any of the classes.
    pub fn remove_instance_listener(&self, classes: &[ClassId], listener: &Rc<dyn InstanceListener>) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        classes
            .iter()
            .fold(false, |acc, c| listeners.remove_instance(*c, listener) || acc)
    }

    /// Subscribes to values of `features`, registering them at
    /// `NOTIFICATIONS` level.
    ///
    /// # Errors
    ///
    /// Returns an error if registration fails.
    pub fn add_feature_listener(&self, features: &[FeatureId], listener: Rc<dyn FeatureListener>) -> Result<()> {
        self.register_features(features, IndexingLevel::Notifications)?;
        let mut listeners = self.listeners.borrow_mut();
        for &feature in features {
            listeners.add_feature(feature, Rc::clone(&listener));
        }
        Ok(())
    }

    /// Unsubscribes a feature listener.
    pub fn remove_feature_listener(&self, features: &[FeatureId], listener: &Rc<dyn FeatureListener>) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        features
            .iter()
            .fold(false, |acc, f| listeners.remove_feature(*f, listener) || acc)
    }

    /// Subscribes to occurrences of `data_types`, registering them at
    /// `NOTIFICATIONS` level.
    ///
    /// # Errors
    ///
    /// Returns an error if registration fails.
    pub fn add_data_type_listener(&self, data_types: &[DataTypeId], listener: Rc<dyn DataTypeListener>) -> Result<()> {
        self.register_data_types(data_types, IndexingLevel::Notifications)?;
        let mut listeners = self.listeners.borrow_mut();
        for &data_type in data_types {
            listeners.add_data_type(data_type, Rc::clone(&listener));
        }
        Ok(())
    }

    /// Unsubscribes a data type listener.
    pub fn remove_data_type_listener(&self, data_types: &[DataTypeId], listener: &Rc<dyn DataTypeListener>) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        data_types
            .iter()
            .fold(false, |acc, d| listeners.remove_data_type(*d, listener) || acc)
    }

    /// Subscribes to batch completion.
    pub fn add_base_index_change_listener(&self, listener: Rc<dyn BaseIndexChangeListener>) {
        self.listeners.borrow_mut().add_change(listener);
    }

    /// Unsubscribes a batch completion listener.
    pub fn remove_base_index_change_listener(&self, listener: &Rc<dyn BaseIndexChangeListener>) -> bool {
        self.listeners.borrow_mut().remove_change(listener)
    }

    /// Subscribes to indexing errors.
    pub fn add_indexing_error_listener(&self, listener: Rc<dyn IndexingErrorListener>) {
        self.listeners.borrow_mut().add_error(listener);
    }

    /// Unsubscribes from indexing errors.
    pub fn remove_indexing_error_listener(&self, listener: &Rc<dyn IndexingErrorListener>) -> bool {
        self.listeners.borrow_mut().remove_error(listener)
    }

    fn dispatch(&self, events: Vec<Event>) {
        let mm = &*self.metamodel;
        for event in events {
            trace!(?event, "index event");
            match event {
                Event::Instance {
                    class,
                    object,
                    inserted,
                } => {
                    let targets = self.listeners.borrow_mut().instance_listeners(mm, class);
                    for (listened, listener) in targets {
                        let result = if inserted {
                            listener.instance_inserted(listened, object)
                        } else {
                            listener.instance_deleted(listened, object)
                        };
                        if let Err(e) = result {
                            self.report_listener_failure(&format!("instance listener of {}", mm.class_name(listened)), &e);
                        }
                    }
                }
                Event::Feature {
                    holder,
                    feature,
                    value,
                    inserted,
                } => {
                    let targets = self.listeners.borrow().feature_listeners(feature);
                    for listener in targets {
                        let result = if inserted {
                            listener.feature_inserted(holder, feature, &value)
                        } else {
                            listener.feature_deleted(holder, feature, &value)
                        };
                        if let Err(e) = result {
                            self.report_listener_failure(&format!("feature listener of {}", mm.feature_name(feature)), &e);
                        }
                    }
                }
                Event::DataType {
                    data_type,
                    value,
                    inserted,
                    boundary,
                } => {
                    let targets = self.listeners.borrow().data_type_listeners(data_type);
                    for listener in targets {
                        let result = if inserted {
                            listener.data_type_inserted(data_type, &value, boundary)
                        } else {
                            listener.data_type_deleted(data_type, &value, boundary)
                        };
                        if let Err(e) = result {
                            self.report_listener_failure(
                                &format!("data type listener of {}", mm.data_type_name(data_type)),
                                &e,
                            );
                        }
                    }
                }
            }
        }
    }

    fn report_listener_failure(&self, description: &str, cause: &Error) {
        let wrapped = Error::new(ErrorKind::ListenerFailed(format!("{description}: {cause}")));
        self.report_error(description, &wrapped);
    }

    fn report_error(&self, description: &str, error: &Error) {
        warn!(description, %error, "indexing error");
        let targets = self.listeners.borrow().error_listeners();
        for listener in targets {
            listener.error(description, error);
        }
    }

    fn report_fatal(&self, description: &str, error: &Error) {
        error!(description, %error, "fatal indexing error");
        let targets = self.listeners.borrow().error_listeners();
        for listener in targets {
            listener.fatal(description, error);
        }
    }

    fn notify_change_listeners(&self) {
        let changed = mem::take(&mut self.state.borrow_mut().changed);
        let targets = self.listeners.borrow().change_listeners();
        for listener in targets {
            if changed || !listener.only_on_index_change() {
                listener.notify_changed(changed);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Model notifications
    // -------------------------------------------------------------------------

    fn process(&self, notification: &ModelNotification) -> Result<Vec<Event>> {
        let mm = &*self.metamodel;
        let mut events = Vec::new();
        match notification {
            ModelNotification::ObjectCreated {
                object,
                class,
                resource,
            } => {
                let mut state = self.state.borrow_mut();
                if state.roots.contains(resource) {
                    state.known.insert(*object, (*class, *resource));
                    state.apply_instance(mm, *class, *object, true, true, &mut events);
                }
            }
            ModelNotification::ObjectDeleted { object, class, .. } => {
                let mut state = self.state.borrow_mut();
                if state.known.remove(object).is_some() {
                    state.forget_derived(mm, *class, *object, &mut events)?;
                    state
                        .delayed_proxies
                        .retain(|(h, _, t)| h != object && t != object);
                    state.apply_instance(mm, *class, *object, false, true, &mut events);
                }
            }
            ModelNotification::ValueAdded {
                holder,
                feature,
                value,
            } => self.process_value(*holder, *feature, value, true, &mut events)?,
            ModelNotification::ValueRemoved {
                holder,
                feature,
                value,
            } => self.process_value(*holder, *feature, value, false, &mut events)?,
            ModelNotification::ResourceLoadStarted(resource) => {
                self.state.borrow_mut().loading.insert(*resource);
            }
            ModelNotification::ResourceLoadFinished(resource) => {
                self.state.borrow_mut().loading.remove(resource);
            }
        }
        Ok(events)
    }

    fn process_value(&self, holder: ObjectId, feature: FeatureId, value: &Value, inserted: bool, events: &mut Vec<Event>) -> Result<()> {
        let schema = self.metamodel.feature(feature)?;
        let target = value.as_object();
        let target_resource = match target {
            Some(t) if inserted => {
                let known = self.state.borrow().known.get(&t).map(|(_, r)| *r);
                known.or_else(|| self.model.read().resource_of(t).ok())
            }
            _ => None,
        };

        let mut state = self.state.borrow_mut();
        if !state.known.contains_key(&holder) || !state.traversable(schema) {
            return Ok(());
        }
        if let Some(t) = target {
            if inserted {
                if target_resource.is_some_and(|r| state.loading.contains(&r)) {
                    trace!(%holder, %t, "reference delayed until loading completes");
                    state.delayed_proxies.push((holder, feature, t));
                    return Ok(());
                }
            } else if let Some(pos) = state
                .delayed_proxies
                .iter()
                .position(|p| *p == (holder, feature, t))
            {
                state.delayed_proxies.remove(pos);
                return Ok(());
            }
        }
        state.apply_value(schema, holder, value, inserted, true, events);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Detaches the index from the model and drops its contents.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ListenersAttached`] while instance, feature or
    /// data type listeners remain.
    pub fn dispose(&self) -> Result<()> {
        if self.state.borrow().disposed {
            return Ok(());
        }
        if self.listeners.borrow().has_model_listeners() {
            return Err(Error::new(ErrorKind::ListenersAttached("base index".to_string())));
        }
        self.model.remove_observer(&self.observer);
        let mut state = self.state.borrow_mut();
        state.disposed = true;
        state.store = IndexStore::default();
        state.known.clear();
        state.derived_cache.clear();
        state.delayed_proxies.clear();
        debug!("base index disposed");
        Ok(())
    }

    /// Returns true after [`BaseIndex::dispose`].
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.state.borrow().disposed
    }
}

impl ModelObserver for BaseIndex {
    fn notify(&self, notification: &ModelNotification) {
        let (disposed, coalescing) = {
            let state = self.state.borrow();
            (state.disposed, state.depth > 0)
        };
        if disposed {
            return;
        }
        match self.process(notification) {
            Ok(events) => self.dispatch(events),
            Err(e) => self.report_error("processing model notification", &e),
        }
        if coalescing {
            return;
        }
        if matches!(notification, ModelNotification::ResourceLoadFinished(_)) {
            if let Err(e) = self.coalesce_traversals(|| Ok(())) {
                self.report_error("resolving delayed references", &e);
            }
        } else {
            self.notify_change_listeners();
        }
    }
}
