//! Integration tests for metamodel construction and object storage

use std::sync::Arc;

use trellis_foundation::{ErrorKind, Value, ValueKind};
use trellis_model::{Metamodel, ModelHandle};

// =============================================================================
// Metamodel
// =============================================================================

#[test]
fn subclasses_see_inherited_features() {
    let mut b = Metamodel::builder();
    let named = b.abstract_class("Named", &[]);
    let person = b.class("Person", &[named]);
    let string = b.data_type("String", ValueKind::String);
    let name = b.attribute(named, "name", string, false);
    let mm = b.build().unwrap();

    assert!(mm.is_subclass_of(person, named));
    assert!(mm.features_of(person).unwrap().contains(&name));
    assert_eq!(mm.feature_by_name(person, "name").unwrap(), name);
    assert_eq!(mm.class_by_name("Person").unwrap(), person);
}

#[test]
fn unknown_names_are_errors() {
    let mm = Metamodel::builder().build().unwrap();
    assert!(matches!(mm.class_by_name("Ghost").unwrap_err().kind, ErrorKind::UnknownClass(_)));
}

// =============================================================================
// Objects and values
// =============================================================================

#[test]
fn single_valued_features_reject_a_second_value() {
    let mut b = Metamodel::builder();
    let person = b.class("Person", &[]);
    let int = b.data_type("Int", ValueKind::Int);
    let age = b.attribute(person, "age", int, false);
    let model = ModelHandle::new(Arc::new(b.build().unwrap()));
    let res = model.create_resource("r");
    let p = model.create_object(res, person).unwrap();

    model.add_value(p, age, 30).unwrap();
    let err = model.add_value(p, age, 31).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Multiplicity(_)));

    model.set_value(p, age, Some(Value::Int(31))).unwrap();
    assert_eq!(model.read().values(p, age).unwrap(), vec![Value::Int(31)]);
}

#[test]
fn deleting_an_object_removes_references_to_it() {
    let mut b = Metamodel::builder();
    let person = b.class("Person", &[]);
    let knows = b.reference(person, "knows", person, true);
    let model = ModelHandle::new(Arc::new(b.build().unwrap()));
    let res = model.create_resource("r");
    let a = model.create_object(res, person).unwrap();
    let c = model.create_object(res, person).unwrap();
    model.add_value(a, knows, c).unwrap();

    model.delete_object(c).unwrap();
    assert!(model.read().values(a, knows).unwrap().is_empty());
    assert!(!model.read().contains(c));
    assert!(model.delete_object(c).is_err());
}

#[test]
fn snapshot_does_not_follow_later_changes() {
    let mut b = Metamodel::builder();
    let person = b.class("Person", &[]);
    let model = ModelHandle::new(Arc::new(b.build().unwrap()));
    let res = model.create_resource("r");
    model.create_object(res, person).unwrap();

    let before = model.snapshot();
    model.create_object(res, person).unwrap();
    assert_eq!(before.object_count(), 1);
    assert_eq!(model.read().object_count(), 2);
}
