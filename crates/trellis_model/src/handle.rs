//! Shared, observable access to a [`GraphModel`].
//!
//! Every mutation is applied with the model borrowed mutably, the borrow is
//! released, and only then are the resulting notifications dispatched. An
//! observer may therefore read the model, or even mutate it again, from
//! inside its callback.

use std::cell::{Ref, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use tracing::trace;
use trellis_foundation::{ObjectId, Result, Value};

use crate::graph::{DerivedFn, GraphModel, ModelNotification, ResourceId};
use crate::metamodel::{ClassId, FeatureId, Metamodel};

/// Receives every change applied through a [`ModelHandle`].
pub trait ModelObserver {
    /// Called once per applied change, in application order.
    fn notify(&self, notification: &ModelNotification);
}

struct Shared {
    model: RefCell<GraphModel>,
    observers: RefCell<Vec<Weak<dyn ModelObserver>>>,
}

/// Cloneable handle to a shared model.
#[derive(Clone)]
pub struct ModelHandle {
    shared: Rc<Shared>,
}

impl ModelHandle {
    /// Creates a handle to an empty model.
    #[must_use]
    pub fn new(metamodel: Arc<Metamodel>) -> Self {
        Self::from_model(GraphModel::new(metamodel))
    }

    /// Wraps an existing model.
    #[must_use]
    pub fn from_model(model: GraphModel) -> Self {
        Self {
            shared: Rc::new(Shared {
                model: RefCell::new(model),
                observers: RefCell::new(Vec::new()),
            }),
        }
    }

    /// The metamodel.
    #[must_use]
    pub fn metamodel(&self) -> Arc<Metamodel> {
        Arc::clone(self.shared.model.borrow().metamodel())
    }

    /// Borrows the model for reading.
    ///
    /// # Panics
    ///
    /// Panics if called while a mutation of this model is being applied,
    /// which cannot happen from observer callbacks.
    #[must_use]
    pub fn read(&self) -> Ref<'_, GraphModel> {
        self.shared.model.borrow()
    }

    /// Copies the current state.
    #[must_use]
    pub fn snapshot(&self) -> GraphModel {
        self.shared.model.borrow().clone()
    }

    /// Returns true if both handles share the same model.
    #[must_use]
    pub fn same_model(&self, other: &ModelHandle) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    /// Registers an observer. Dropped observers are pruned automatically.
    pub fn add_observer(&self, observer: Weak<dyn ModelObserver>) {
        self.shared.observers.borrow_mut().push(observer);
    }

    /// Unregisters an observer.
    pub fn remove_observer(&self, observer: &Weak<dyn ModelObserver>) {
        self.shared
            .observers
            .borrow_mut()
            .retain(|o| !Weak::ptr_eq(o, observer));
    }

    fn apply<R>(&self, f: impl FnOnce(&mut GraphModel) -> Result<(R, Vec<ModelNotification>)>) -> Result<R> {
        let (result, notifications) = {
            let mut model = self.shared.model.borrow_mut();
            f(&mut model)?
        };
        self.dispatch(&notifications);
        Ok(result)
    }

    fn dispatch(&self, notifications: &[ModelNotification]) {
        if notifications.is_empty() {
            return;
        }
        let observers: Vec<Rc<dyn ModelObserver>> = {
            let mut list = self.shared.observers.borrow_mut();
            list.retain(|o| o.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        for n in notifications {
            trace!(notification = ?n, "model change");
            for observer in &observers {
                observer.notify(n);
            }
        }
    }

    /// Creates an empty resource.
    pub fn create_resource(&self, name: &str) -> ResourceId {
        self.shared.model.borrow_mut().create_resource(name)
    }

    /// Marks a resource as loading. Observers see `ResourceLoadStarted`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown resources.
    pub fn begin_load(&self, resource: ResourceId) -> Result<()> {
        self.apply(|m| Ok(((), m.set_loading(resource, true)?)))
    }

    /// Marks a resource as loaded. Observers see `ResourceLoadFinished`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown resources.
    pub fn end_load(&self, resource: ResourceId) -> Result<()> {
        self.apply(|m| Ok(((), m.set_loading(resource, false)?)))
    }

    /// Creates an object.
    ///
    /// # Errors
    ///
    /// See [`GraphModel::create_object`].
    pub fn create_object(&self, resource: ResourceId, class: ClassId) -> Result<ObjectId> {
        self.apply(|m| m.create_object(resource, class))
    }

    /// Deletes an object with its contents and incoming references.
    ///
    /// # Errors
    ///
    /// See [`GraphModel::delete_object`].
    pub fn delete_object(&self, object: ObjectId) -> Result<()> {
        self.apply(|m| Ok(((), m.delete_object(object)?)))
    }

    /// Adds a value to a feature.
    ///
    /// # Errors
    ///
    /// See [`GraphModel::add_value`].
    pub fn add_value(&self, holder: ObjectId, feature: FeatureId, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.apply(|m| Ok(((), m.add_value(holder, feature, value)?)))
    }

    /// Removes a value from a feature.
    ///
    /// # Errors
    ///
    /// See [`GraphModel::remove_value`].
    pub fn remove_value(&self, holder: ObjectId, feature: FeatureId, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.apply(|m| Ok(((), m.remove_value(holder, feature, &value)?)))
    }

    /// Replaces the value of a single-valued feature.
    ///
    /// # Errors
    ///
    /// See [`GraphModel::set_value`].
    pub fn set_value(&self, holder: ObjectId, feature: FeatureId, value: Option<Value>) -> Result<()> {
        self.apply(|m| Ok(((), m.set_value(holder, feature, value)?)))
    }

    /// Installs the computation of a derived feature.
    ///
    /// # Errors
    ///
    /// See [`GraphModel::set_derived`].
    pub fn set_derived(&self, feature: FeatureId, compute: DerivedFn) -> Result<()> {
        self.shared.model.borrow_mut().set_derived(feature, compute)
    }

    /// Announces a change of a well-behaving derived feature.
    ///
    /// Observers receive `ValueRemoved` for values only in `old` and
    /// `ValueAdded` for values only in `new`.
    pub fn announce_derived_change(&self, holder: ObjectId, feature: FeatureId, old: &[Value], new: &[Value]) {
        let mut notifications = Vec::new();
        for v in old.iter().filter(|v| !new.contains(v)) {
            notifications.push(ModelNotification::ValueRemoved {
                holder,
                feature,
                value: v.clone(),
            });
        }
        for v in new.iter().filter(|v| !old.contains(v)) {
            notifications.push(ModelNotification::ValueAdded {
                holder,
                feature,
                value: v.clone(),
            });
        }
        self.dispatch(&notifications);
    }
}
