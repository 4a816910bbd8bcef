//! Integration tests for match retrieval and listeners

use std::rc::Rc;

use trellis_foundation::{ErrorKind, Seed, Value};
use trellis_runtime::{EngineOptions, Match, QueryEngine};

use crate::fixture::{Events, Social};

#[test]
fn seeded_queries_filter_on_bound_positions() {
    let s = Social::new();
    let (a, b, c) = (s.person(), s.person(), s.person());
    s.model.add_value(a, s.knows, b).unwrap();
    s.model.add_value(a, s.knows, c).unwrap();
    s.model.add_value(b, s.knows, c).unwrap();
    let engine = QueryEngine::on(&s.model, EngineOptions::default()).unwrap();
    let matcher = engine.matcher(&s.knows_query()).unwrap();

    let from_a = Seed::new(vec![Some(Value::Object(a)), None]);
    assert_eq!(matcher.count_matches_seeded(&from_a).unwrap(), 2);
    let edge = Seed::new(vec![Some(Value::Object(b)), Some(Value::Object(a))]);
    assert!(!matcher.has_match_seeded(&edge).unwrap());

    let err = matcher.count_matches_seeded(&Seed::unbound(3)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::IllegalSeed { .. }));
}

#[test]
fn partial_matches_select_by_name() {
    let s = Social::new();
    let (a, b) = (s.person(), s.person());
    s.model.add_value(a, s.age, 30).unwrap();
    s.model.add_value(b, s.age, 40).unwrap();
    let engine = QueryEngine::on(&s.model, EngineOptions::default()).unwrap();
    let matcher = engine.matcher(&s.age_query()).unwrap();

    let forty = Match::empty(Rc::clone(matcher.query())).with("years", 40).unwrap();
    let found = matcher.all_matches_like(&forty).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get_by_name("p"), Some(&Value::Object(b)));
    assert_eq!(matcher.pos_mapping()["years"], 1);
    assert_eq!(matcher.pattern_name(), "social.age");
}

#[test]
fn empty_results() {
    let s = Social::new();
    let engine = QueryEngine::on(&s.model, EngineOptions::default()).unwrap();
    let matcher = engine.matcher(&s.knows_query()).unwrap();
    assert!(!matcher.has_match().unwrap());
    assert!(matcher.one_arbitrary_match().unwrap().is_none());
    assert!(matcher.all_matches().unwrap().is_empty());
}

#[test]
fn one_arbitrary_match_is_a_current_match() {
    let s = Social::new();
    let (a, b) = (s.person(), s.person());
    s.model.add_value(a, s.knows, b).unwrap();
    s.model.add_value(b, s.knows, b).unwrap();
    let engine = QueryEngine::on(&s.model, EngineOptions::default()).unwrap();
    let matcher = engine.matcher(&s.knows_query()).unwrap();
    let one = matcher.one_arbitrary_match().unwrap().unwrap();
    assert!(matcher.all_matches().unwrap().contains(&one));
}

#[test]
fn listeners_follow_the_match_set() {
    let s = Social::new();
    let (a, b) = (s.person(), s.person());
    s.model.add_value(a, s.knows, b).unwrap();
    let engine = QueryEngine::on(&s.model, EngineOptions::default()).unwrap();
    let matcher = engine.matcher(&s.knows_query()).unwrap();

    let events = Rc::new(Events::default());
    let id = matcher.add_match_listener(events.clone(), true).unwrap();
    assert_eq!(events.take(), vec![format!("+{}", matcher.all_matches().unwrap()[0].to_tuple())]);

    s.model.add_value(b, s.knows, a).unwrap();
    s.model.delete_object(b).unwrap();
    let seen = events.take();
    assert_eq!(seen.len(), 3);
    assert!(seen[0].starts_with('+'));
    assert!(seen[1..].iter().all(|e| e.starts_with('-')));

    assert!(matcher.remove_match_listener(id));
    assert!(!matcher.remove_match_listener(id));
    let c = s.person();
    s.model.add_value(a, s.knows, c).unwrap();
    assert!(events.take().is_empty());
}

#[test]
fn listeners_without_fire_now_start_silent() {
    let s = Social::new();
    let a = s.person();
    s.model.add_value(a, s.age, 1).unwrap();
    let engine = QueryEngine::on(&s.model, EngineOptions::default()).unwrap();
    let matcher = engine.matcher(&s.age_query()).unwrap();
    let events = Rc::new(Events::default());
    matcher.add_match_listener(events.clone(), false).unwrap();
    assert!(events.take().is_empty());

    s.model.set_value(a, s.age, Some(Value::Int(2))).unwrap();
    let mut seen = events.take();
    seen.sort();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].starts_with('+') && seen[1].starts_with('-'));
}
