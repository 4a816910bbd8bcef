//! End-to-end behavior of each constraint kind under model changes

use std::cell::RefCell;
use std::rc::Rc;

use trellis_foundation::Value;
use trellis_matchers::{InputKey, NormalizerOptions, PQueryBuilder};
use trellis_runtime::{EngineOptions, Match, MatchUpdateListener, PatternMatcher, QueryEngine};

use crate::network::{Network, pair};

fn rows(matcher: &PatternMatcher) -> Vec<Vec<Value>> {
    let mut rows: Vec<Vec<Value>> = matcher
        .all_matches()
        .unwrap()
        .into_iter()
        .map(|m| m.to_tuple().values().to_vec())
        .collect();
    rows.sort_by_key(|r| format!("{r:?}"));
    rows
}

#[derive(Default)]
struct Events(RefCell<Vec<(bool, Vec<Value>)>>);

impl MatchUpdateListener for Events {
    fn appeared(&self, m: &Match) {
        self.0.borrow_mut().push((true, m.to_tuple().values().to_vec()));
    }

    fn disappeared(&self, m: &Match) {
        self.0.borrow_mut().push((false, m.to_tuple().values().to_vec()));
    }
}

#[test]
fn distinct_acquaintances_are_revoked_one_edge_at_a_time() {
    let net = Network::new();
    let person = InputKey::Class(net.person);
    let knows = InputKey::Feature(net.knows);
    let query = PQueryBuilder::new("net.acquainted")
        .parameter("x", None)
        .parameter("y", None)
        .body(move |b| {
            let x = b.variable_by_name("x")?;
            let y = b.variable_by_name("y")?;
            b.type_constraint(person, &[x])?;
            b.type_constraint(person, &[y])?;
            b.inequality(x, y, false)?;
            b.type_constraint(knows, &[x, y])?;
            Ok(())
        })
        .build(&net.meta, &NormalizerOptions::default())
        .unwrap();

    let p = net.people(3);
    net.model.add_value(p[0], net.knows, p[1]).unwrap();
    net.model.add_value(p[1], net.knows, p[2]).unwrap();
    net.model.add_value(p[2], net.knows, p[2]).unwrap();
    let engine = QueryEngine::on(&net.model, EngineOptions::default()).unwrap();
    let acquainted = engine.matcher(&query).unwrap();
    assert_eq!(acquainted.count_matches().unwrap(), 2);

    let events = Rc::new(Events::default());
    acquainted.add_match_listener(events.clone(), false).unwrap();
    net.model.remove_value(p[0], net.knows, p[1]).unwrap();
    assert_eq!(*events.0.borrow(), vec![(false, pair(p[0], p[1]))]);
    assert_eq!(acquainted.count_matches().unwrap(), 1);
    assert_eq!(rows(&acquainted), vec![pair(p[1], p[2])]);
}

#[test]
fn degree_counts_include_people_without_friends() {
    let net = Network::new();
    let p = net.people(3);
    net.model.add_value(p[0], net.knows, p[1]).unwrap();
    net.model.add_value(p[0], net.knows, p[2]).unwrap();
    let engine = QueryEngine::on(&net.model, EngineOptions::default()).unwrap();
    let degree = engine.matcher(&net.library().degree).unwrap();

    let of = |who| {
        degree
            .all_matches()
            .unwrap()
            .into_iter()
            .find(|m| m.get_by_name("p") == Some(&Value::Object(who)))
            .and_then(|m| m.get_by_name("n").cloned())
    };
    assert_eq!(degree.count_matches().unwrap(), 3);
    assert_eq!(of(p[0]), Some(Value::Int(2)));
    assert_eq!(of(p[1]), Some(Value::Int(0)));

    net.model.remove_value(p[0], net.knows, p[2]).unwrap();
    net.model.add_value(p[1], net.knows, p[2]).unwrap();
    assert_eq!(of(p[0]), Some(Value::Int(1)));
    assert_eq!(of(p[1]), Some(Value::Int(1)));
    assert_eq!(degree.count_matches().unwrap(), 3);

    let q = net.people(1)[0];
    assert_eq!(of(q), Some(Value::Int(0)));
}

#[test]
fn reachability_shrinks_when_a_bridge_is_removed() {
    let net = Network::new();
    let p = net.people(4);
    for w in p.windows(2) {
        net.model.add_value(w[0], net.knows, w[1]).unwrap();
    }
    let engine = QueryEngine::on(&net.model, EngineOptions::default()).unwrap();
    let reach = engine.matcher(&net.library().reach).unwrap();
    assert_eq!(reach.count_matches().unwrap(), 6);

    net.model.remove_value(p[1], net.knows, p[2]).unwrap();
    assert_eq!(rows(&reach).len(), 2);
    assert!(rows(&reach).contains(&pair(p[0], p[1])));
    assert!(rows(&reach).contains(&pair(p[2], p[3])));

    net.model.add_value(p[3], net.knows, p[0]).unwrap();
    assert!(rows(&reach).contains(&pair(p[2], p[1])));
}

#[test]
fn negation_tracks_people_who_know_nobody() {
    let net = Network::new();
    let p = net.people(2);
    let engine = QueryEngine::on(&net.model, EngineOptions::default()).unwrap();
    let lonely = engine.matcher(&net.library().lonely).unwrap();
    assert_eq!(lonely.count_matches().unwrap(), 2);

    net.model.add_value(p[0], net.knows, p[1]).unwrap();
    assert_eq!(rows(&lonely), vec![vec![Value::Object(p[1])]]);

    net.model.delete_object(p[1]).unwrap();
    assert_eq!(rows(&lonely), vec![vec![Value::Object(p[0])]]);
}

#[test]
fn overlapping_bodies_match_once() {
    let net = Network::new();
    let p = net.people(2);
    let engine = QueryEngine::on(&net.model, EngineOptions::default()).unwrap();
    let linked = engine.matcher(&net.library().linked).unwrap();

    net.model.add_value(p[0], net.knows, p[1]).unwrap();
    assert_eq!(rows(&linked).len(), 2);
    net.model.add_value(p[1], net.knows, p[0]).unwrap();
    assert_eq!(rows(&linked).len(), 2);
    net.model.remove_value(p[0], net.knows, p[1]).unwrap();
    assert_eq!(rows(&linked).len(), 2);
    net.model.remove_value(p[1], net.knows, p[0]).unwrap();
    assert!(rows(&linked).is_empty());
}

#[test]
fn paths_follow_every_step() {
    let net = Network::new();
    let p = net.people(4);
    net.model.add_value(p[0], net.knows, p[1]).unwrap();
    net.model.add_value(p[1], net.knows, p[2]).unwrap();
    net.model.add_value(p[1], net.knows, p[3]).unwrap();
    let engine = QueryEngine::on(&net.model, EngineOptions::default()).unwrap();
    let fof = engine.matcher(&net.library().fof).unwrap();
    assert_eq!(rows(&fof), {
        let mut expected = vec![pair(p[0], p[2]), pair(p[0], p[3])];
        expected.sort_by_key(|r| format!("{r:?}"));
        expected
    });

    net.model.add_value(p[2], net.knows, p[0]).unwrap();
    assert!(rows(&fof).contains(&pair(p[1], p[0])));
    assert!(rows(&fof).contains(&pair(p[2], p[1])));
    net.model.remove_value(p[0], net.knows, p[1]).unwrap();
    assert_eq!(rows(&fof), vec![pair(p[1], p[0])]);
}
