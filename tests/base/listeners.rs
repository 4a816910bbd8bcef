//! Integration tests for index listeners and coalescing

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use trellis_base::{
    BaseIndex, BaseIndexChangeListener, BaseIndexOptions, FeatureListener, IndexingErrorListener,
    IndexingLevel, InstanceListener,
};
use trellis_foundation::{Error, ObjectId, Result, Value};
use trellis_model::{ClassId, FeatureId, Metamodel, ModelHandle};

#[derive(Default)]
struct Changes(Cell<usize>);

impl BaseIndexChangeListener for Changes {
    fn notify_changed(&self, _: bool) {
        self.0.set(self.0.get() + 1);
    }
}

#[derive(Default)]
struct Edges(RefCell<Vec<(bool, ObjectId, Value)>>);

impl FeatureListener for Edges {
    fn feature_inserted(&self, holder: ObjectId, _: FeatureId, value: &Value) -> Result<()> {
        self.0.borrow_mut().push((true, holder, value.clone()));
        Ok(())
    }

    fn feature_deleted(&self, holder: ObjectId, _: FeatureId, value: &Value) -> Result<()> {
        self.0.borrow_mut().push((false, holder, value.clone()));
        Ok(())
    }
}

struct Failing;

impl InstanceListener for Failing {
    fn instance_inserted(&self, _: ClassId, _: ObjectId) -> Result<()> {
        Err(Error::internal("listener refused the instance"))
    }

    fn instance_deleted(&self, _: ClassId, _: ObjectId) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Problems(RefCell<Vec<String>>);

impl IndexingErrorListener for Problems {
    fn error(&self, description: &str, _: &Error) {
        self.0.borrow_mut().push(description.to_string());
    }

    fn fatal(&self, description: &str, _: &Error) {
        self.0.borrow_mut().push(format!("fatal: {description}"));
    }
}

fn people() -> (ModelHandle, ClassId, FeatureId) {
    let mut b = Metamodel::builder();
    let person = b.class("Person", &[]);
    let knows = b.reference(person, "knows", person, true);
    (ModelHandle::new(Arc::new(b.build().unwrap())), person, knows)
}

#[test]
fn feature_listener_sees_edges_of_deleted_objects() {
    let (model, person, knows) = people();
    let res = model.create_resource("r");
    let index = BaseIndex::new(&model, BaseIndexOptions::default());
    index.add_root(res).unwrap();
    let edges = Rc::new(Edges::default());
    index.add_feature_listener(&[knows], edges.clone()).unwrap();

    let a = model.create_object(res, person).unwrap();
    let b = model.create_object(res, person).unwrap();
    model.add_value(a, knows, b).unwrap();
    model.delete_object(b).unwrap();

    assert_eq!(
        *edges.0.borrow(),
        vec![(true, a, Value::Object(b)), (false, a, Value::Object(b))]
    );

    let listener: Rc<dyn FeatureListener> = edges;
    assert!(index.remove_feature_listener(&[knows], &listener));
    assert!(!index.remove_feature_listener(&[knows], &listener));
}

#[test]
fn coalesced_batch_notifies_once() {
    let (model, person, knows) = people();
    let res = model.create_resource("r");
    let index = BaseIndex::new(&model, BaseIndexOptions::wildcard());
    index.add_root(res).unwrap();
    let changes = Rc::new(Changes::default());
    index.add_base_index_change_listener(changes.clone());

    index
        .coalesce_traversals(|| {
            let a = model.create_object(res, person)?;
            let b = model.create_object(res, person)?;
            model.add_value(a, knows, b)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(changes.0.get(), 1);

    model.create_object(res, person).unwrap();
    assert_eq!(changes.0.get(), 2);
}

#[test]
fn failing_listeners_are_reported() {
    let (model, person, _) = people();
    let res = model.create_resource("r");
    let index = BaseIndex::new(&model, BaseIndexOptions::default());
    index.add_root(res).unwrap();
    let problems = Rc::new(Problems::default());
    index.add_indexing_error_listener(problems.clone());
    index.add_instance_listener(&[person], Rc::new(Failing)).unwrap();
    index.register_classes(&[person], IndexingLevel::Full).unwrap();

    let p = model.create_object(res, person).unwrap();
    model.create_object(res, person).unwrap();
    assert_eq!(problems.0.borrow().len(), 2);
    assert!(problems.0.borrow().iter().all(|d| !d.starts_with("fatal")));
    assert!(index.is_instance_of(p, person).unwrap());
}
