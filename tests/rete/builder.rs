//! Integration tests for the network builder over a model runtime context

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use trellis_base::{BaseIndex, BaseIndexOptions};
use trellis_foundation::{ErrorKind, ObjectId, Tuple, Value, ValueKind};
use trellis_matchers::{
    GreedyPlanner, InputKey, ModelMetaContext, NormalizerOptions, PQuery, PQueryBuilder,
};
use trellis_model::{ClassId, FeatureId, Metamodel, ModelHandle, ResourceId};
use trellis_rete::{Logic, NodeId, ReteBuilder, ReteContainer, required_input_keys};
use trellis_runtime::ModelRuntimeContext;

struct Setup {
    model: ModelHandle,
    res: ResourceId,
    person: ClassId,
    knows: FeatureId,
    age: FeatureId,
    meta: ModelMetaContext,
    runtime: ModelRuntimeContext,
    container: Rc<RefCell<ReteContainer>>,
    builder: ReteBuilder,
}

fn setup() -> Setup {
    let mut b = Metamodel::builder();
    let person = b.class("Person", &[]);
    let int = b.data_type("Int", ValueKind::Int);
    let knows = b.reference(person, "knows", person, true);
    let age = b.attribute(person, "age", int, false);
    let metamodel = Arc::new(b.build().unwrap());
    let model = ModelHandle::new(Arc::clone(&metamodel));
    let res = model.create_resource("people");
    let index = BaseIndex::new(&model, BaseIndexOptions::default());
    index.add_root(res).unwrap();
    Setup {
        model,
        res,
        person,
        knows,
        age,
        meta: ModelMetaContext::new(metamodel),
        runtime: ModelRuntimeContext::new(index),
        container: Rc::new(RefCell::new(ReteContainer::new(Logic::Default))),
        builder: ReteBuilder::new(Box::new(GreedyPlanner)),
    }
}

fn knows_query(s: &Setup) -> Rc<PQuery> {
    let knows = s.knows;
    PQueryBuilder::new("people.knows")
        .parameter("a", Some(InputKey::Class(s.person)))
        .parameter("b", None)
        .body(move |b| {
            let a = b.variable_by_name("a")?;
            let bb = b.variable_by_name("b")?;
            b.type_constraint(InputKey::Feature(knows), &[a, bb])?;
            Ok(())
        })
        .build(&s.meta, &NormalizerOptions::default())
        .unwrap()
}

fn adults_query(s: &Setup) -> Rc<PQuery> {
    let (person, age) = (s.person, s.age);
    PQueryBuilder::new("people.forty")
        .parameter("p", Some(InputKey::Class(person)))
        .body(move |b| {
            let p = b.variable_by_name("p")?;
            let v = b.new_variable("v");
            b.type_constraint(InputKey::Feature(age), &[p, v])?;
            b.constant(v, 40)?;
            Ok(())
        })
        .build(&s.meta, &NormalizerOptions::default())
        .unwrap()
}

fn content(s: &Setup, node: NodeId) -> HashSet<Tuple> {
    s.container.borrow_mut().pull_into(node, true).unwrap().into_iter().collect()
}

fn edge(a: ObjectId, b: ObjectId) -> Tuple {
    Tuple::from(vec![Value::Object(a), Value::Object(b)])
}

#[test]
fn built_network_starts_with_existing_content() {
    let mut s = setup();
    let a = s.model.create_object(s.res, s.person).unwrap();
    let b = s.model.create_object(s.res, s.person).unwrap();
    s.model.add_value(a, s.knows, b).unwrap();

    let q = knows_query(&s);
    let production = s.builder.build(&s.container, &s.runtime, &q).unwrap();
    assert_eq!(content(&s, production), HashSet::from([edge(a, b)]));
    assert_eq!(s.builder.production("people.knows"), Some(production));
}

#[test]
fn model_changes_reach_the_production() {
    let mut s = setup();
    let q = knows_query(&s);
    let production = s.builder.build(&s.container, &s.runtime, &q).unwrap();

    let a = s.model.create_object(s.res, s.person).unwrap();
    let b = s.model.create_object(s.res, s.person).unwrap();
    s.model.add_value(a, s.knows, b).unwrap();
    s.model.add_value(b, s.knows, a).unwrap();
    assert_eq!(content(&s, production).len(), 2);

    s.model.delete_object(b).unwrap();
    assert!(content(&s, production).is_empty());
}

#[test]
fn constants_filter_enumerated_values() {
    let mut s = setup();
    let q = adults_query(&s);
    let production = s.builder.build(&s.container, &s.runtime, &q).unwrap();
    let a = s.model.create_object(s.res, s.person).unwrap();
    let b = s.model.create_object(s.res, s.person).unwrap();
    s.model.add_value(a, s.age, 40).unwrap();
    s.model.add_value(b, s.age, 41).unwrap();
    assert_eq!(content(&s, production), HashSet::from([Tuple::from(vec![Value::Object(a)])]));
}

#[test]
fn rebuilding_a_query_is_a_lookup() {
    let mut s = setup();
    let q = knows_query(&s);
    s.builder.build(&s.container, &s.runtime, &q).unwrap();
    let subscriptions = s.runtime.subscription_count();
    let nodes = s.container.borrow().len();

    let again = s.builder.build(&s.container, &s.runtime, &q).unwrap();
    assert_eq!(Some(again), s.builder.production("people.knows"));
    assert_eq!(s.container.borrow().len(), nodes);
    assert_eq!(s.runtime.subscription_count(), subscriptions);
    assert!(s.builder.input(&InputKey::Feature(s.knows)).is_some());
}

#[test]
fn required_keys_follow_calls() {
    let s = setup();
    let knows = knows_query(&s);
    let callee = Rc::clone(&knows);
    let fof = PQueryBuilder::new("people.fof")
        .parameter("a", None)
        .parameter("c", None)
        .body(move |b| {
            let a = b.variable_by_name("a")?;
            let c = b.variable_by_name("c")?;
            let mid = b.new_variable("mid");
            b.call(&callee, &[a, mid])?;
            b.call(&callee, &[mid, c])?;
            Ok(())
        })
        .build(&s.meta, &NormalizerOptions::default())
        .unwrap();
    assert_eq!(required_input_keys(&fof), required_input_keys(&knows));
    assert!(required_input_keys(&fof).contains(&InputKey::Feature(s.knows)));
}

#[test]
fn detached_builder_stops_listening() {
    let mut s = setup();
    let q = knows_query(&s);
    let production = s.builder.build(&s.container, &s.runtime, &q).unwrap();
    s.builder.detach(&s.runtime).unwrap();
    assert_eq!(s.runtime.subscription_count(), 0);

    let a = s.model.create_object(s.res, s.person).unwrap();
    s.model.add_value(a, s.knows, a).unwrap();
    assert!(content(&s, production).is_empty());
}

#[test]
fn planner_errors_name_the_pattern() {
    let mut s = setup();
    let q = PQueryBuilder::new("people.unbound")
        .parameter("p", None)
        .body(|_| Ok(()))
        .build(&s.meta, &NormalizerOptions::default())
        .unwrap();
    let err = s.builder.build(&s.container, &s.runtime, &q).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Planner { ref pattern, .. } if pattern == "people.unbound"));
    assert_eq!(s.builder.production("people.unbound"), None);
}
