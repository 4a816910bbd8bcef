//! Integration tests for model observers

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use trellis_foundation::{Value, ValueKind};
use trellis_model::{Metamodel, ModelHandle, ModelNotification, ModelObserver};

#[derive(Default)]
struct Recorder(RefCell<Vec<ModelNotification>>);

impl ModelObserver for Recorder {
    fn notify(&self, notification: &ModelNotification) {
        self.0.borrow_mut().push(notification.clone());
    }
}

fn observe(model: &ModelHandle) -> Rc<Recorder> {
    let recorder = Rc::new(Recorder::default());
    let observer: Rc<dyn ModelObserver> = recorder.clone();
    let weak: Weak<dyn ModelObserver> = Rc::downgrade(&observer);
    model.add_observer(weak);
    recorder
}

#[test]
fn value_changes_are_reported_in_order() {
    let mut b = Metamodel::builder();
    let person = b.class("Person", &[]);
    let int = b.data_type("Int", ValueKind::Int);
    let age = b.attribute(person, "age", int, false);
    let model = ModelHandle::new(Arc::new(b.build().unwrap()));
    let res = model.create_resource("r");
    let recorder = observe(&model);

    let p = model.create_object(res, person).unwrap();
    model.set_value(p, age, Some(Value::Int(1))).unwrap();
    model.set_value(p, age, Some(Value::Int(2))).unwrap();

    let seen = recorder.0.borrow();
    assert!(matches!(seen[0], ModelNotification::ObjectCreated { object, .. } if object == p));
    assert_eq!(
        seen[1..],
        [
            ModelNotification::ValueAdded { holder: p, feature: age, value: Value::Int(1) },
            ModelNotification::ValueRemoved { holder: p, feature: age, value: Value::Int(1) },
            ModelNotification::ValueAdded { holder: p, feature: age, value: Value::Int(2) },
        ]
    );
}

#[test]
fn dropped_observers_are_forgotten() {
    let mut b = Metamodel::builder();
    let person = b.class("Person", &[]);
    let model = ModelHandle::new(Arc::new(b.build().unwrap()));
    let res = model.create_resource("r");
    let recorder = observe(&model);
    drop(recorder);
    model.create_object(res, person).unwrap();
    assert_eq!(model.read().object_count(), 1);
}

#[test]
fn loading_brackets_are_reported() {
    let model = ModelHandle::new(Arc::new(Metamodel::builder().build().unwrap()));
    let res = model.create_resource("r");
    let recorder = observe(&model);
    model.begin_load(res).unwrap();
    assert!(model.read().is_loading());
    model.end_load(res).unwrap();
    assert_eq!(
        *recorder.0.borrow(),
        vec![
            ModelNotification::ResourceLoadStarted(res),
            ModelNotification::ResourceLoadFinished(res),
        ]
    );
}
