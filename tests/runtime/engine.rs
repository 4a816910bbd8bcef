//! Integration tests for engine lifecycle and batching

use std::rc::Rc;

use trellis_base::IndexingLevel;
use trellis_foundation::ErrorKind;
use trellis_rete::Logic;
use trellis_runtime::{EngineOptions, QueryEngine};

use crate::fixture::{Events, Social};

#[test]
fn existing_content_is_matched_at_startup() {
    let s = Social::new();
    let (a, b, c) = (s.person(), s.person(), s.person());
    s.model.add_value(a, s.knows, b).unwrap();
    s.model.add_value(b, s.knows, c).unwrap();

    let engine = QueryEngine::on(&s.model, EngineOptions::default()).unwrap();
    let matcher = engine.matcher(&s.knows_query()).unwrap();
    assert_eq!(matcher.count_matches().unwrap(), 2);

    s.model.remove_value(a, s.knows, b).unwrap();
    assert_eq!(matcher.count_matches().unwrap(), 1);
    assert!(engine.network_size() > 0);
}

#[test]
fn matchers_of_one_query_share_a_network() {
    let s = Social::new();
    let engine = QueryEngine::on(&s.model, EngineOptions::default()).unwrap();
    let q = s.knows_query();
    engine.matcher(&q).unwrap();
    let size = engine.network_size();
    engine.matcher(&q).unwrap();
    assert_eq!(engine.network_size(), size);
}

#[test]
fn coalesced_changes_are_netted() {
    let s = Social::new();
    let (a, b) = (s.person(), s.person());
    let engine = QueryEngine::on(&s.model, EngineOptions::default()).unwrap();
    let matcher = engine.matcher(&s.knows_query()).unwrap();
    let events = Rc::new(Events::default());
    matcher.add_match_listener(events.clone(), false).unwrap();

    engine
        .coalesce(|| {
            s.model.add_value(a, s.knows, b)?;
            s.model.add_value(b, s.knows, a)?;
            s.model.remove_value(a, s.knows, b)?;
            assert!(events.0.borrow().is_empty());
            Ok(())
        })
        .unwrap();
    assert_eq!(events.take().len(), 1);
    assert_eq!(matcher.count_matches().unwrap(), 1);
}

#[test]
fn delayed_engines_report_on_flush() {
    let s = Social::new();
    let (a, b) = (s.person(), s.person());
    let engine = QueryEngine::on(&s.model, EngineOptions::default().with_delay_updates(true)).unwrap();
    let matcher = engine.matcher(&s.knows_query()).unwrap();
    let events = Rc::new(Events::default());
    matcher.add_match_listener(events.clone(), false).unwrap();

    s.model.add_value(a, s.knows, b).unwrap();
    engine.flush().unwrap();
    assert_eq!(events.take().len(), 1);
}

#[test]
fn disposed_engines_refuse_work() {
    let s = Social::new();
    let engine = QueryEngine::on(&s.model, EngineOptions::default()).unwrap();
    let matcher = engine.matcher(&s.knows_query()).unwrap();
    engine.dispose().unwrap();
    engine.dispose().unwrap();

    assert!(engine.is_disposed());
    assert!(engine.index().is_disposed());
    assert!(matches!(matcher.count_matches().unwrap_err().kind, ErrorKind::Disposed));
    assert!(matches!(engine.matcher(&s.age_query()).unwrap_err().kind, ErrorKind::Disposed));
    // The model keeps working without the engine.
    let a = s.person();
    s.model.add_value(a, s.knows, a).unwrap();
}

#[test]
fn wildcard_engines_answer_from_the_first_traversal() {
    let s = Social::new();
    let a = s.person();
    s.model.add_value(a, s.age, 33).unwrap();
    let engine = QueryEngine::on(&s.model, EngineOptions::wildcard()).unwrap();
    assert_eq!(engine.options().base.wildcard_level, IndexingLevel::Full);

    let traversals = engine.index().traversal_count();
    let matcher = engine.matcher(&s.age_query()).unwrap();
    assert_eq!(engine.index().traversal_count(), traversals);
    assert_eq!(matcher.count_matches().unwrap(), 1);
}

#[test]
fn timely_logic_gives_the_same_matches() {
    let s = Social::new();
    let (a, b) = (s.person(), s.person());
    s.model.add_value(a, s.knows, b).unwrap();
    let default = QueryEngine::on(&s.model, EngineOptions::default()).unwrap();
    let timely = QueryEngine::on(&s.model, EngineOptions::default().with_logic(Logic::RecursiveTimely)).unwrap();
    let q = s.knows_query();
    s.model.add_value(b, s.knows, a).unwrap();
    assert_eq!(
        default.matcher(&q).unwrap().all_matches().unwrap(),
        timely.matcher(&q).unwrap().all_matches().unwrap()
    );
}
