//! Runtime context over a [`BaseIndex`].
//!
//! Input keys map onto base index keys one to one: class keys enumerate
//! transitive instances, data type keys the distinct values present in
//! indexed slots, feature keys `(holder, value)` pairs. Tuple listeners are
//! wrapped in adapters that translate base index events into tuple deltas
//! and drop those disagreeing with the subscription seed.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, trace};
use trellis_base::{
    BaseIndex, DataTypeListener, FeatureListener, IndexingLevel, IndexingService, InstanceListener,
};
use trellis_foundation::{Direction, Error, ErrorKind, ObjectId, Result, Seed, Tuple, Value};
use trellis_matchers::{
    InputKey, MetaContext, ModelMetaContext, QueryRuntimeContext, TupleUpdateListener,
};
use trellis_model::{ClassId, DataTypeId, FeatureId};

// =============================================================================
// Listener adapters
// =============================================================================

struct InstanceAdapter {
    seed: Seed,
    listener: Rc<dyn TupleUpdateListener>,
}

impl InstanceListener for InstanceAdapter {
    fn instance_inserted(&self, _: ClassId, instance: ObjectId) -> Result<()> {
        forward(&self.seed, &*self.listener, Direction::Insert, vec![Value::Object(instance)])
    }

    fn instance_deleted(&self, _: ClassId, instance: ObjectId) -> Result<()> {
        forward(&self.seed, &*self.listener, Direction::Revoke, vec![Value::Object(instance)])
    }
}

struct FeatureAdapter {
    seed: Seed,
    listener: Rc<dyn TupleUpdateListener>,
}

impl FeatureListener for FeatureAdapter {
    fn feature_inserted(&self, holder: ObjectId, _: FeatureId, value: &Value) -> Result<()> {
        forward(&self.seed, &*self.listener, Direction::Insert, vec![Value::Object(holder), value.clone()])
    }

    fn feature_deleted(&self, holder: ObjectId, _: FeatureId, value: &Value) -> Result<()> {
        forward(&self.seed, &*self.listener, Direction::Revoke, vec![Value::Object(holder), value.clone()])
    }
}

/// Data type relations are sets of distinct values, so only first and last
/// occurrences are deltas.
struct DataTypeAdapter {
    seed: Seed,
    listener: Rc<dyn TupleUpdateListener>,
}

impl DataTypeListener for DataTypeAdapter {
    fn data_type_inserted(&self, _: DataTypeId, value: &Value, first_occurrence: bool) -> Result<()> {
        if !first_occurrence {
            return Ok(());
        }
        forward(&self.seed, &*self.listener, Direction::Insert, vec![value.clone()])
    }

    fn data_type_deleted(&self, _: DataTypeId, value: &Value, last_occurrence: bool) -> Result<()> {
        if !last_occurrence {
            return Ok(());
        }
        forward(&self.seed, &*self.listener, Direction::Revoke, vec![value.clone()])
    }
}

fn forward(seed: &Seed, listener: &dyn TupleUpdateListener, direction: Direction, values: Vec<Value>) -> Result<()> {
    let tuple = Tuple::from(values);
    if !seed.matches(&tuple) {
        return Ok(());
    }
    trace!(%direction, %tuple, "tuple update");
    listener.update(direction, &tuple)
}

enum Adapter {
    Instance(Rc<dyn InstanceListener>),
    Feature(Rc<dyn FeatureListener>),
    DataType(Rc<dyn DataTypeListener>),
}

struct Subscription {
    key: InputKey,
    seed: Seed,
    listener: Rc<dyn TupleUpdateListener>,
    adapter: Adapter,
}

// =============================================================================
// ModelRuntimeContext
// =============================================================================

/// [`QueryRuntimeContext`] backed by a [`BaseIndex`].
pub struct ModelRuntimeContext {
    index: Rc<BaseIndex>,
    meta: ModelMetaContext,
    services: RefCell<HashMap<InputKey, BTreeSet<IndexingService>>>,
    subscriptions: RefCell<Vec<Subscription>>,
}

impl ModelRuntimeContext {
    /// Creates a context over `index`.
    #[must_use]
    pub fn new(index: Rc<BaseIndex>) -> Self {
        let meta = ModelMetaContext::new(Arc::clone(index.metamodel()));
        Self {
            index,
            meta,
            services: RefCell::new(HashMap::new()),
            subscriptions: RefCell::new(Vec::new()),
        }
    }

    /// The underlying index.
    #[must_use]
    pub fn index(&self) -> &Rc<BaseIndex> {
        &self.index
    }

    /// Number of live tuple subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.borrow().len()
    }

    fn level(&self, key: &InputKey) -> IndexingLevel {
        match *key {
            InputKey::Class(c) => self.index.class_indexing_level(c),
            InputKey::DataType(d) => self.index.data_type_indexing_level(d),
            InputKey::Feature(f) => self.index.feature_indexing_level(f),
        }
    }

    fn check_seed(&self, key: &InputKey, seed: &Seed) -> Result<()> {
        if seed.arity() == key.arity() {
            Ok(())
        } else {
            Err(Error::illegal_seed(
                self.meta.key_name(key),
                format!("arity {} for a relation of arity {}", seed.arity(), key.arity()),
            ))
        }
    }
}

fn unary(value: Value) -> Tuple {
    Tuple::from(vec![value])
}

fn pair(holder: ObjectId, value: Value) -> Tuple {
    Tuple::from(vec![Value::Object(holder), value])
}

impl QueryRuntimeContext for ModelRuntimeContext {
    fn meta_context(&self) -> &dyn MetaContext {
        &self.meta
    }

    fn ensure_indexed(&self, key: &InputKey, service: IndexingService) -> Result<()> {
        let level = {
            let mut services = self.services.borrow_mut();
            let requested = services.entry(*key).or_default();
            if !requested.insert(service) {
                return Ok(());
            }
            IndexingLevel::from_services(requested.iter().copied())
        };
        debug!(key = %self.meta.key_name(key), ?service, %level, "indexing requested");
        match *key {
            InputKey::Class(c) => self.index.register_classes(&[c], level),
            InputKey::DataType(d) => self.index.register_data_types(&[d], level),
            InputKey::Feature(f) => self.index.register_features(&[f], level),
        }
    }

    fn is_indexed(&self, key: &InputKey, service: IndexingService) -> bool {
        let level = self.level(key);
        match service {
            IndexingService::Statistics => level.has_statistics(),
            IndexingService::Notifications => level.has_notifications(),
            IndexingService::Instances => level.has_instances(),
        }
    }

    fn contains_tuple(&self, key: &InputKey, tuple: &Tuple) -> Result<bool> {
        if tuple.len() != key.arity() {
            return Ok(false);
        }
        match *key {
            InputKey::Class(c) => match tuple.get(0).and_then(Value::as_object) {
                Some(o) => self.index.is_instance_of(o, c),
                None => Ok(false),
            },
            InputKey::DataType(d) => match tuple.get(0) {
                Some(v) => self.index.is_data_type_instance(d, v),
                None => Ok(false),
            },
            InputKey::Feature(f) => match (tuple.get(0).and_then(Value::as_object), tuple.get(1)) {
                (Some(h), Some(v)) => self.index.has_feature_value(h, f, v),
                _ => Ok(false),
            },
        }
    }

    fn enumerate_tuples(&self, key: &InputKey, seed: &Seed) -> Result<Vec<Tuple>> {
        self.check_seed(key, seed)?;
        if seed.is_fully_bound() {
            let tuple = seed.bound_values();
            return Ok(if self.contains_tuple(key, &tuple)? { vec![tuple] } else { Vec::new() });
        }
        let tuples = match *key {
            InputKey::Class(c) => self
                .index
                .all_instances(c)?
                .into_iter()
                .map(|o| unary(Value::Object(o)))
                .collect(),
            InputKey::DataType(d) => self.index.data_type_instances(d)?.into_iter().map(unary).collect(),
            InputKey::Feature(f) => match (seed.get(0), seed.get(1)) {
                (Some(holder), _) => match holder.as_object() {
                    Some(h) => self
                        .index
                        .feature_targets(h, f)?
                        .into_iter()
                        .map(|v| pair(h, v))
                        .collect(),
                    None => Vec::new(),
                },
                (None, Some(value)) => self
                    .index
                    .find_by_feature_value(value, f)?
                    .into_iter()
                    .map(|h| pair(h, value.clone()))
                    .collect(),
                (None, None) => self
                    .index
                    .feature_instances(f)?
                    .into_iter()
                    .map(|(h, v)| pair(h, v))
                    .collect(),
            },
        };
        Ok(tuples)
    }

    fn enumerate_values(&self, key: &InputKey, seed: &Seed) -> Result<Vec<Value>> {
        self.check_seed(key, seed)?;
        if seed.unbound_count() != 1 {
            return Err(Error::illegal_seed(
                self.meta.key_name(key),
                format!("{} unbound slots, expected exactly one", seed.unbound_count()),
            ));
        }
        let column = (0..seed.arity())
            .find(|&i| !seed.is_bound(i))
            .ok_or_else(|| Error::internal("seed has no unbound slot"))?;
        Ok(self
            .enumerate_tuples(key, seed)?
            .into_iter()
            .filter_map(|t| t.get(column).cloned())
            .collect())
    }

    fn count_tuples(&self, key: &InputKey, seed: &Seed) -> Result<usize> {
        self.check_seed(key, seed)?;
        if seed.unbound_count() == seed.arity() {
            self.ensure_indexed(key, IndexingService::Statistics)?;
            return match *key {
                InputKey::Class(c) => self.index.count_all_instances(c),
                InputKey::DataType(d) => self.index.count_data_type_instances(d),
                InputKey::Feature(f) => self.index.count_features(f),
            };
        }
        Ok(self.enumerate_tuples(key, seed)?.len())
    }

    fn add_update_listener(&self, key: &InputKey, seed: Seed, listener: Rc<dyn TupleUpdateListener>) -> Result<()> {
        self.check_seed(key, &seed)?;
        let adapter = match *key {
            InputKey::Class(c) => {
                let adapter: Rc<dyn InstanceListener> = Rc::new(InstanceAdapter {
                    seed: seed.clone(),
                    listener: Rc::clone(&listener),
                });
                self.index.add_instance_listener(&[c], Rc::clone(&adapter))?;
                Adapter::Instance(adapter)
            }
            InputKey::DataType(d) => {
                let adapter: Rc<dyn DataTypeListener> = Rc::new(DataTypeAdapter {
                    seed: seed.clone(),
                    listener: Rc::clone(&listener),
                });
                self.index.add_data_type_listener(&[d], Rc::clone(&adapter))?;
                Adapter::DataType(adapter)
            }
            InputKey::Feature(f) => {
                let adapter: Rc<dyn FeatureListener> = Rc::new(FeatureAdapter {
                    seed: seed.clone(),
                    listener: Rc::clone(&listener),
                });
                self.index.add_feature_listener(&[f], Rc::clone(&adapter))?;
                Adapter::Feature(adapter)
            }
        };
        self.subscriptions.borrow_mut().push(Subscription {
            key: *key,
            seed,
            listener,
            adapter,
        });
        Ok(())
    }

    fn remove_update_listener(&self, key: &InputKey, seed: &Seed, listener: &Rc<dyn TupleUpdateListener>) -> Result<()> {
        let subscription = {
            let mut subscriptions = self.subscriptions.borrow_mut();
            let position = subscriptions
                .iter()
                .position(|s| s.key == *key && s.seed == *seed && Rc::ptr_eq(&s.listener, listener))
                .ok_or_else(|| {
                    Error::new(ErrorKind::Internal(format!(
                        "no tuple listener subscribed to {}",
                        self.meta.key_name(key)
                    )))
                })?;
            subscriptions.remove(position)
        };
        match (subscription.key, &subscription.adapter) {
            (InputKey::Class(c), Adapter::Instance(a)) => {
                self.index.remove_instance_listener(&[c], a);
            }
            (InputKey::DataType(d), Adapter::DataType(a)) => {
                self.index.remove_data_type_listener(&[d], a);
            }
            (InputKey::Feature(f), Adapter::Feature(a)) => {
                self.index.remove_feature_listener(&[f], a);
            }
            _ => return Err(Error::internal("subscription adapter does not match its key")),
        }
        Ok(())
    }

    fn coalesce_traversals(&self, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.index.coalesce_traversals(f)
    }

    fn ensure_wildcard_indexing(&self, level: IndexingLevel) -> Result<()> {
        self.index.set_wildcard_level(level)
    }
}

impl std::fmt::Debug for ModelRuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRuntimeContext")
            .field("index", &self.index)
            .field("subscriptions", &self.subscriptions.borrow().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_base::BaseIndexOptions;
    use trellis_foundation::ValueKind;
    use trellis_model::{Metamodel, ModelHandle, ResourceId};

    struct Fixture {
        model: ModelHandle,
        res: ResourceId,
        person: ClassId,
        knows: FeatureId,
        name: FeatureId,
        string: DataTypeId,
        context: ModelRuntimeContext,
    }

    fn fixture() -> Fixture {
        let mut b = Metamodel::builder();
        let person = b.class("Person", &[]);
        let string = b.data_type("String", ValueKind::String);
        let knows = b.reference(person, "knows", person, true);
        let name = b.attribute(person, "name", string, false);
        let model = ModelHandle::new(Arc::new(b.build().unwrap()));
        let res = model.create_resource("r");
        let index = BaseIndex::new(&model, BaseIndexOptions::default());
        index.add_root(res).unwrap();
        Fixture {
            model,
            res,
            person,
            knows,
            name,
            string,
            context: ModelRuntimeContext::new(index),
        }
    }

    #[derive(Default)]
    struct Sink(RefCell<Vec<(Direction, Tuple)>>);

    impl TupleUpdateListener for Sink {
        fn update(&self, direction: Direction, tuple: &Tuple) -> Result<()> {
            self.0.borrow_mut().push((direction, tuple.clone()));
            Ok(())
        }
    }

    fn obj(o: ObjectId) -> Option<Value> {
        Some(Value::Object(o))
    }

    #[test]
    fn feature_enumeration_dispatches_on_the_seed() {
        let f = fixture();
        let a = f.model.create_object(f.res, f.person).unwrap();
        let b = f.model.create_object(f.res, f.person).unwrap();
        let c = f.model.create_object(f.res, f.person).unwrap();
        f.model.add_value(a, f.knows, b).unwrap();
        f.model.add_value(c, f.knows, b).unwrap();
        let key = InputKey::Feature(f.knows);
        f.context.ensure_indexed(&key, IndexingService::Instances).unwrap();

        assert_eq!(f.context.enumerate_tuples(&key, &Seed::unbound(2)).unwrap().len(), 2);
        let from_a = f.context.enumerate_tuples(&key, &Seed::new(vec![obj(a), None])).unwrap();
        assert_eq!(from_a, vec![pair(a, Value::Object(b))]);
        let into_b = f.context.enumerate_values(&key, &Seed::new(vec![None, obj(b)])).unwrap();
        assert_eq!(into_b, vec![Value::Object(a), Value::Object(c)]);
        assert_eq!(f.context.enumerate_tuples(&key, &Seed::new(vec![obj(b), obj(a)])).unwrap(), vec![]);
        assert_eq!(f.context.count_tuples(&key, &Seed::new(vec![obj(c), obj(b)])).unwrap(), 1);
    }

    #[test]
    fn enumerate_values_needs_exactly_one_free_slot() {
        let f = fixture();
        let key = InputKey::Feature(f.knows);
        f.context.ensure_indexed(&key, IndexingService::Instances).unwrap();
        let err = f.context.enumerate_values(&key, &Seed::unbound(2)).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::IllegalSeed { .. }));
        let err = f.context.enumerate_tuples(&key, &Seed::unbound(1)).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::IllegalSeed { .. }));
    }

    #[test]
    fn unseeded_count_only_needs_statistics() {
        let f = fixture();
        f.model.create_object(f.res, f.person).unwrap();
        let key = InputKey::Class(f.person);
        assert_eq!(f.context.count_tuples(&key, &Seed::unbound(1)).unwrap(), 1);
        assert!(f.context.is_indexed(&key, IndexingService::Statistics));
        assert!(!f.context.is_indexed(&key, IndexingService::Instances));
        assert!(f.context.enumerate_tuples(&key, &Seed::unbound(1)).is_err());
    }

    #[test]
    fn seeded_listeners_only_see_matching_deltas() {
        let f = fixture();
        let a = f.model.create_object(f.res, f.person).unwrap();
        let b = f.model.create_object(f.res, f.person).unwrap();
        let key = InputKey::Feature(f.knows);
        let sink = Rc::new(Sink::default());
        let listener: Rc<dyn TupleUpdateListener> = sink.clone();
        let seed = Seed::new(vec![obj(a), None]);
        f.context.add_update_listener(&key, seed.clone(), Rc::clone(&listener)).unwrap();

        f.model.add_value(a, f.knows, b).unwrap();
        f.model.add_value(b, f.knows, a).unwrap();
        f.model.remove_value(a, f.knows, b).unwrap();
        assert_eq!(
            *sink.0.borrow(),
            vec![
                (Direction::Insert, pair(a, Value::Object(b))),
                (Direction::Revoke, pair(a, Value::Object(b))),
            ]
        );

        f.context.remove_update_listener(&key, &seed, &listener).unwrap();
        assert_eq!(f.context.subscription_count(), 0);
        assert!(f.context.remove_update_listener(&key, &seed, &listener).is_err());
    }

    #[test]
    fn data_type_listeners_see_distinct_values() {
        let f = fixture();
        let key = InputKey::DataType(f.string);
        let sink = Rc::new(Sink::default());
        f.context.add_update_listener(&key, Seed::unbound(1), sink.clone()).unwrap();

        let a = f.model.create_object(f.res, f.person).unwrap();
        let b = f.model.create_object(f.res, f.person).unwrap();
        f.model.add_value(a, f.name, "ann").unwrap();
        f.model.add_value(b, f.name, "ann").unwrap();
        f.model.remove_value(a, f.name, "ann").unwrap();
        assert_eq!(*sink.0.borrow(), vec![(Direction::Insert, unary(Value::from("ann")))]);
    }
}
