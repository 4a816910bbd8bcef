//! Derived features that only change when resampled

use std::rc::Rc;

use trellis_base::BaseIndexOptions;
use trellis_runtime::{EngineOptions, Match, MatchUpdateListener, QueryEngine};

use crate::network::Network;

#[derive(Default)]
struct Appeared(std::cell::Cell<usize>);

impl MatchUpdateListener for Appeared {
    fn appeared(&self, _: &Match) {
        self.0.set(self.0.get() + 1);
    }

    fn disappeared(&self, _: &Match) {}
}

fn resampling_engine(net: &Network) -> Rc<QueryEngine> {
    let base = BaseIndexOptions::default().with_traverse_only_well_behaving_derived_features(false);
    QueryEngine::on(&net.model, EngineOptions::default().with_base(base)).unwrap()
}

#[test]
fn initial_traversal_computes_derived_values() {
    let net = Network::new();
    let p = net.people(2);
    net.model.add_value(p[0], net.knows, p[1]).unwrap();
    net.model.add_value(p[1], net.knows, p[0]).unwrap();
    let engine = resampling_engine(&net);
    let mutual = engine.matcher(&net.mutual_query()).unwrap();
    assert_eq!(mutual.count_matches().unwrap(), 2);
}

#[test]
fn resampling_reports_changed_derived_values() {
    let net = Network::new();
    let p = net.people(2);
    let engine = resampling_engine(&net);
    let mutual = engine.matcher(&net.mutual_query()).unwrap();
    let appeared = Rc::new(Appeared::default());
    mutual.add_match_listener(appeared.clone(), false).unwrap();

    net.model.add_value(p[0], net.knows, p[1]).unwrap();
    net.model.add_value(p[1], net.knows, p[0]).unwrap();
    assert_eq!(mutual.count_matches().unwrap(), 0);

    engine.index().resample_derived_features().unwrap();
    assert_eq!(mutual.count_matches().unwrap(), 2);
    assert_eq!(appeared.0.get(), 2);

    net.model.remove_value(p[1], net.knows, p[0]).unwrap();
    engine.index().resample_derived_features().unwrap();
    assert_eq!(mutual.count_matches().unwrap(), 0);
}

#[test]
fn well_behaving_only_engines_skip_resampling() {
    let net = Network::new();
    let p = net.people(2);
    let engine = QueryEngine::on(&net.model, EngineOptions::default()).unwrap();
    let mutual = engine.matcher(&net.mutual_query()).unwrap();
    net.model.add_value(p[0], net.knows, p[1]).unwrap();
    net.model.add_value(p[1], net.knows, p[0]).unwrap();
    engine.index().resample_derived_features().unwrap();
    assert_eq!(mutual.count_matches().unwrap(), 0);
}
