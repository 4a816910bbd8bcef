//! Incremental results agree with evaluation from scratch

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use trellis_foundation::{ObjectId, Value};
use trellis_runtime::{EngineOptions, Match, QueryEngine};

use crate::network::{Library, Network};

fn snapshot(engine: &std::rc::Rc<QueryEngine>, lib: &Library) -> Vec<Vec<Match>> {
    lib.all()
        .iter()
        .map(|q| engine.matcher(q).unwrap().all_matches().unwrap())
        .collect()
}

fn random_edit(net: &Network, rng: &mut ChaCha8Rng, people: &mut Vec<ObjectId>) {
    match rng.gen_range(0..10) {
        0 => people.push(net.people(1)[0]),
        1 if people.len() > 2 => {
            let victim = people.swap_remove(rng.gen_range(0..people.len()));
            net.model.delete_object(victim).unwrap();
        }
        _ => {
            let a = people[rng.gen_range(0..people.len())];
            let b = people[rng.gen_range(0..people.len())];
            let known = net.model.read().values(a, net.knows).unwrap().contains(&Value::Object(b));
            if known {
                net.model.remove_value(a, net.knows, b).unwrap();
            } else {
                net.model.add_value(a, net.knows, b).unwrap();
            }
        }
    }
}

#[test]
fn random_edits_agree_with_a_fresh_engine() {
    let net = Network::new();
    let lib = net.library();
    let mut people = net.people(6);
    let live = QueryEngine::on(&net.model, EngineOptions::default()).unwrap();
    snapshot(&live, &lib);

    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for round in 0..20 {
        for _ in 0..5 {
            random_edit(&net, &mut rng, &mut people);
        }
        let fresh = QueryEngine::on(&net.model, EngineOptions::default()).unwrap();
        assert_eq!(snapshot(&live, &lib), snapshot(&fresh, &lib), "diverged in round {round}");
        fresh.dispose().unwrap();
    }
}

#[test]
fn coalesced_random_edits_agree_with_a_fresh_engine() {
    let net = Network::new();
    let lib = net.library();
    let mut people = net.people(6);
    let live = QueryEngine::on(&net.model, EngineOptions::default()).unwrap();
    snapshot(&live, &lib);

    let mut rng = ChaCha8Rng::seed_from_u64(11);
    for _ in 0..5 {
        live.coalesce(|| {
            for _ in 0..10 {
                random_edit(&net, &mut rng, &mut people);
            }
            Ok(())
        })
        .unwrap();
        let fresh = QueryEngine::on(&net.model, EngineOptions::default()).unwrap();
        assert_eq!(snapshot(&live, &lib), snapshot(&fresh, &lib));
    }
}

#[test]
fn undoing_edits_restores_every_result() {
    let net = Network::new();
    let lib = net.library();
    let p = net.people(5);
    for w in p.windows(2) {
        net.model.add_value(w[0], net.knows, w[1]).unwrap();
    }
    let engine = QueryEngine::on(&net.model, EngineOptions::default()).unwrap();
    let before = snapshot(&engine, &lib);

    let edits = [(p[4], p[0]), (p[2], p[2]), (p[0], p[3])];
    for &(a, b) in &edits {
        net.model.add_value(a, net.knows, b).unwrap();
    }
    assert_ne!(snapshot(&engine, &lib), before);
    for &(a, b) in edits.iter().rev() {
        net.model.remove_value(a, net.knows, b).unwrap();
    }
    assert_eq!(snapshot(&engine, &lib), before);
}

#[test]
fn a_query_library_is_indexed_in_one_traversal() {
    let net = Network::new();
    let lib = net.library();
    net.people(3);
    let engine = QueryEngine::on(&net.model, EngineOptions::default()).unwrap();
    let before = engine.index().traversal_count();
    engine.matcher(&lib.degree).unwrap();
    assert_eq!(engine.index().traversal_count(), before + 1);

    for q in lib.all() {
        engine.matcher(&q).unwrap();
    }
    assert_eq!(engine.index().traversal_count(), before + 1);
}
