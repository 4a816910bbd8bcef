//! Listener interfaces of the base index and the subscription tables behind
//! them.

use std::collections::HashMap;
use std::rc::Rc;

use trellis_foundation::{Error, ObjectId, Result, Value};
use trellis_model::{ClassId, DataTypeId, FeatureId, Metamodel};

/// Receives instance changes of a class and its subclasses.
pub trait InstanceListener {
    /// `instance` became an instance of `class` (the class listened to, not
    /// necessarily the concrete class).
    ///
    /// # Errors
    ///
    /// Errors are reported to the indexing error listeners.
    fn instance_inserted(&self, class: ClassId, instance: ObjectId) -> Result<()>;

    /// `instance` stopped being an instance of `class`.
    ///
    /// # Errors
    ///
    /// Errors are reported to the indexing error listeners.
    fn instance_deleted(&self, class: ClassId, instance: ObjectId) -> Result<()>;
}

/// Receives value changes of a feature.
pub trait FeatureListener {
    /// `value` was added to `feature` of `holder`.
    ///
    /// # Errors
    ///
    /// Errors are reported to the indexing error listeners.
    fn feature_inserted(&self, holder: ObjectId, feature: FeatureId, value: &Value) -> Result<()>;

    /// `value` was removed from `feature` of `holder`.
    ///
    /// # Errors
    ///
    /// Errors are reported to the indexing error listeners.
    fn feature_deleted(&self, holder: ObjectId, feature: FeatureId, value: &Value) -> Result<()>;
}

/// Receives occurrences of data type values.
pub trait DataTypeListener {
    /// One more slot holds `value`. `first_occurrence` is true when no slot
    /// held it before.
    ///
    /// # Errors
    ///
    /// Errors are reported to the indexing error listeners.
    fn data_type_inserted(&self, data_type: DataTypeId, value: &Value, first_occurrence: bool) -> Result<()>;

    /// One slot less holds `value`. `last_occurrence` is true when no slot
    /// holds it anymore.
    ///
    /// # Errors
    ///
    /// Errors are reported to the indexing error listeners.
    fn data_type_deleted(&self, data_type: DataTypeId, value: &Value, last_occurrence: bool) -> Result<()>;
}

/// Notified after a batch of index changes has been processed.
pub trait BaseIndexChangeListener {
    /// Only call [`BaseIndexChangeListener::notify_changed`] when the index
    /// actually changed.
    fn only_on_index_change(&self) -> bool {
        true
    }

    /// Called after a model notification or a coalesced batch.
    fn notify_changed(&self, index_changed: bool);
}

/// Receives problems encountered while maintaining the index.
pub trait IndexingErrorListener {
    /// A recoverable problem, typically a failing listener.
    fn error(&self, description: &str, error: &Error);

    /// The index may be inconsistent from now on.
    fn fatal(&self, description: &str, error: &Error);
}

type InstanceTable = HashMap<ClassId, Vec<(ClassId, Rc<dyn InstanceListener>)>>;

/// All subscriptions of one index.
///
/// Instance listeners subscribe to a class but are triggered by instances of
/// its concrete subclasses. The table mapping concrete classes to the
/// listeners interested in them is rebuilt on demand after any subscription
/// change.
#[derive(Default)]
pub(crate) struct Listeners {
    instance: Vec<(ClassId, Rc<dyn InstanceListener>)>,
    feature: Vec<(FeatureId, Rc<dyn FeatureListener>)>,
    data_type: Vec<(DataTypeId, Rc<dyn DataTypeListener>)>,
    change: Vec<Rc<dyn BaseIndexChangeListener>>,
    error: Vec<Rc<dyn IndexingErrorListener>>,
    instance_table: Option<InstanceTable>,
}

fn remove_entry<K: PartialEq, L: ?Sized>(entries: &mut Vec<(K, Rc<L>)>, key: &K, listener: &Rc<L>) -> bool {
    let before = entries.len();
    entries.retain(|(k, l)| !(k == key && Rc::ptr_eq(l, listener)));
    entries.len() != before
}

impl Listeners {
    pub(crate) fn add_instance(&mut self, class: ClassId, listener: Rc<dyn InstanceListener>) {
        self.instance.push((class, listener));
        self.instance_table = None;
    }

    pub(crate) fn remove_instance(&mut self, class: ClassId, listener: &Rc<dyn InstanceListener>) -> bool {
        let removed = remove_entry(&mut self.instance, &class, listener);
        if removed {
            self.instance_table = None;
        }
        removed
    }

    pub(crate) fn add_feature(&mut self, feature: FeatureId, listener: Rc<dyn FeatureListener>) {
        self.feature.push((feature, listener));
    }

    pub(crate) fn remove_feature(&mut self, feature: FeatureId, listener: &Rc<dyn FeatureListener>) -> bool {
        remove_entry(&mut self.feature, &feature, listener)
    }

    pub(crate) fn add_data_type(&mut self, data_type: DataTypeId, listener: Rc<dyn DataTypeListener>) {
        self.data_type.push((data_type, listener));
    }

    pub(crate) fn remove_data_type(&mut self, data_type: DataTypeId, listener: &Rc<dyn DataTypeListener>) -> bool {
        remove_entry(&mut self.data_type, &data_type, listener)
    }

    pub(crate) fn add_change(&mut self, listener: Rc<dyn BaseIndexChangeListener>) {
        self.change.push(listener);
    }

    pub(crate) fn remove_change(&mut self, listener: &Rc<dyn BaseIndexChangeListener>) -> bool {
        let before = self.change.len();
        self.change.retain(|l| !Rc::ptr_eq(l, listener));
        self.change.len() != before
    }

    pub(crate) fn add_error(&mut self, listener: Rc<dyn IndexingErrorListener>) {
        self.error.push(listener);
    }

    pub(crate) fn remove_error(&mut self, listener: &Rc<dyn IndexingErrorListener>) -> bool {
        let before = self.error.len();
        self.error.retain(|l| !Rc::ptr_eq(l, listener));
        self.error.len() != before
    }

    /// Listeners triggered by instances of the concrete class `class`,
    /// paired with the class each one subscribed to.
    pub(crate) fn instance_listeners(&mut self, metamodel: &Metamodel, class: ClassId) -> Vec<(ClassId, Rc<dyn InstanceListener>)> {
        let subscriptions = &self.instance;
        let table = self.instance_table.get_or_insert_with(|| {
            let mut table = InstanceTable::new();
            for (listened, listener) in subscriptions {
                let subtypes = metamodel.all_subtypes(*listened).into_iter().flatten().copied();
                for concrete in std::iter::once(*listened).chain(subtypes) {
                    table
                        .entry(concrete)
                        .or_default()
                        .push((*listened, Rc::clone(listener)));
                }
            }
            table
        });
        table.get(&class).cloned().unwrap_or_default()
    }

    pub(crate) fn feature_listeners(&self, feature: FeatureId) -> Vec<Rc<dyn FeatureListener>> {
        self.feature
            .iter()
            .filter(|(f, _)| *f == feature)
            .map(|(_, l)| Rc::clone(l))
            .collect()
    }

    pub(crate) fn data_type_listeners(&self, data_type: DataTypeId) -> Vec<Rc<dyn DataTypeListener>> {
        self.data_type
            .iter()
            .filter(|(d, _)| *d == data_type)
            .map(|(_, l)| Rc::clone(l))
            .collect()
    }

    pub(crate) fn change_listeners(&self) -> Vec<Rc<dyn BaseIndexChangeListener>> {
        self.change.clone()
    }

    pub(crate) fn error_listeners(&self) -> Vec<Rc<dyn IndexingErrorListener>> {
        self.error.clone()
    }

    pub(crate) fn listens_to_class(&self, class: ClassId) -> bool {
        self.instance.iter().any(|(c, _)| *c == class)
    }

    pub(crate) fn listens_to_feature(&self, feature: FeatureId) -> bool {
        self.feature.iter().any(|(f, _)| *f == feature)
    }

    pub(crate) fn listens_to_data_type(&self, data_type: DataTypeId) -> bool {
        self.data_type.iter().any(|(d, _)| *d == data_type)
    }

    /// Returns true while any model listener is subscribed.
    pub(crate) fn has_model_listeners(&self) -> bool {
        !(self.instance.is_empty() && self.feature.is_empty() && self.data_type.is_empty())
    }

    #[cfg(test)]
    fn table_is_cached(&self) -> bool {
        self.instance_table.is_some()
    }
}
