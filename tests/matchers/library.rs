//! Integration tests for building and registering a query library

use std::rc::Rc;
use std::sync::Arc;

use trellis_foundation::{ErrorKind, ValueKind};
use trellis_matchers::{
    ConstraintTag, InputKey, ModelMetaContext, NormalizerOptions, PQuery, PQueryBuilder,
    QueryRegistry, RemovalReason,
};
use trellis_model::Metamodel;

pub struct Library {
    pub ctx: ModelMetaContext,
    pub person: InputKey,
    pub knows: InputKey,
    pub age: InputKey,
}

pub fn library() -> Library {
    let mut b = Metamodel::builder();
    let person = b.class("Person", &[]);
    let int = b.data_type("Int", ValueKind::Int);
    let knows = b.reference(person, "knows", person, true);
    let age = b.attribute(person, "age", int, false);
    Library {
        ctx: ModelMetaContext::new(Arc::new(b.build().unwrap())),
        person: InputKey::Class(person),
        knows: InputKey::Feature(knows),
        age: InputKey::Feature(age),
    }
}

pub fn knows(lib: &Library) -> Rc<PQuery> {
    let key = lib.knows;
    PQueryBuilder::new("people.knows")
        .parameter("a", Some(lib.person))
        .parameter("b", Some(lib.person))
        .body(move |b| {
            let a = b.variable_by_name("a")?;
            let bb = b.variable_by_name("b")?;
            b.type_constraint(key, &[a, bb])?;
            Ok(())
        })
        .build(&lib.ctx, &NormalizerOptions::default())
        .unwrap()
}

#[test]
fn declared_types_implied_by_features_are_dropped() {
    let lib = library();
    let q = knows(&lib);
    let body = &q.bodies()[0];
    assert_eq!(body.constraints_of(ConstraintTag::TypeConstraint).len(), 1);
    assert_eq!(q.trace().count(RemovalReason::TypeSubsumed), 2);
}

#[test]
fn minimal_options_keep_declared_types() {
    let lib = library();
    let key = lib.knows;
    let q = PQueryBuilder::new("people.knows_raw")
        .parameter("a", Some(lib.person))
        .parameter("b", None)
        .body(move |b| {
            let a = b.variable_by_name("a")?;
            let bb = b.variable_by_name("b")?;
            b.type_constraint(key, &[a, bb])?;
            Ok(())
        })
        .build(&lib.ctx, &NormalizerOptions::minimal())
        .unwrap();
    assert_eq!(q.bodies()[0].constraints_of(ConstraintTag::TypeConstraint).len(), 2);
    assert!(q.trace().removals().is_empty());
}

#[test]
fn equal_variables_collapse() {
    let lib = library();
    let key = lib.knows;
    let q = PQueryBuilder::new("people.self_aware")
        .parameter("a", None)
        .body(move |b| {
            let a = b.variable_by_name("a")?;
            let other = b.new_variable("other");
            b.type_constraint(key, &[a, other])?;
            b.equality(a, other)?;
            Ok(())
        })
        .build(&lib.ctx, &NormalizerOptions::default())
        .unwrap();
    let body = &q.bodies()[0];
    assert_eq!(body.constraints_of(ConstraintTag::Equality).len(), 0);
    let a = body.variable_by_name("a").unwrap();
    assert_eq!(body.representative(a), a);
}

#[test]
fn strong_self_inequality_fails_the_build() {
    let lib = library();
    let err = PQueryBuilder::new("people.paradox")
        .parameter("a", Some(lib.person))
        .body(|b| {
            let a = b.variable_by_name("a")?;
            b.inequality(a, a, false)?;
            Ok(())
        })
        .build(&lib.ctx, &NormalizerOptions::default())
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Rewriter { .. }));
    assert_eq!(err.context.and_then(|c| c.source).as_deref(), Some("people.paradox"));
}

#[test]
fn registry_rejects_second_definition() {
    let lib = library();
    let mut registry = QueryRegistry::new();
    registry.register(knows(&lib)).unwrap();
    let err = registry.register(knows(&lib)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DuplicateQuery(_)));
    assert_eq!(registry.get("people.knows").unwrap().arity(), 2);
}
