//! Benchmarks for incremental query maintenance.
//!
//! Run with: `cargo bench --package trellis_runtime`

use std::rc::Rc;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use trellis_foundation::ObjectId;
use trellis_matchers::{InputKey, ModelMetaContext, NormalizerOptions, PQuery, PQueryBuilder};
use trellis_model::{FeatureId, Metamodel, ModelHandle};
use trellis_runtime::{EngineOptions, QueryEngine};

// =============================================================================
// Helper Functions
// =============================================================================

struct Social {
    model: ModelHandle,
    people: Vec<ObjectId>,
    knows: FeatureId,
    reachable: Rc<PQuery>,
}

/// Creates `count` people, each knowing three random others, and a query
/// for who reaches whom through `knows`.
fn social_network(count: usize) -> Social {
    let mut b = Metamodel::builder();
    let person = b.class("Person", &[]);
    let knows = b.reference(person, "knows", person, true);
    let metamodel = Arc::new(b.build().unwrap());
    let model = ModelHandle::new(Arc::clone(&metamodel));
    let res = model.create_resource("people");

    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let people: Vec<ObjectId> = (0..count).map(|_| model.create_object(res, person).unwrap()).collect();
    for &p in &people {
        for _ in 0..3 {
            let other = people[rng.gen_range(0..count)];
            let _ = model.add_value(p, knows, other);
        }
    }

    let ctx = ModelMetaContext::new(metamodel);
    let knows_query = PQueryBuilder::new("bench.knows")
        .parameter("a", None)
        .parameter("b", None)
        .body(|body| {
            let a = body.variable_by_name("a")?;
            let bb = body.variable_by_name("b")?;
            body.type_constraint(InputKey::Feature(knows), &[a, bb])?;
            Ok(())
        })
        .build(&ctx, &NormalizerOptions::default())
        .unwrap();
    let reachable = PQueryBuilder::new("bench.reachable")
        .parameter("a", None)
        .parameter("b", None)
        .body(|body| {
            let a = body.variable_by_name("a")?;
            let bb = body.variable_by_name("b")?;
            body.transitive_closure(&knows_query, a, bb)?;
            Ok(())
        })
        .build(&ctx, &NormalizerOptions::default())
        .unwrap();

    Social {
        model,
        people,
        knows,
        reachable,
    }
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_initial_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("initial_build");
    for size in [50, 200] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_with_setup(
                || social_network(size),
                |social| {
                    let engine = QueryEngine::on(&social.model, EngineOptions::default()).unwrap();
                    let matcher = engine.matcher(&social.reachable).unwrap();
                    black_box(matcher.count_matches().unwrap())
                },
            );
        });
    }
    group.finish();
}

fn bench_edge_toggle(c: &mut Criterion) {
    let social = social_network(200);
    let engine = QueryEngine::on(&social.model, EngineOptions::default()).unwrap();
    let matcher = engine.matcher(&social.reachable).unwrap();
    let (a, b) = (social.people[0], social.people[1]);
    let _ = social.model.remove_value(a, social.knows, b);

    c.bench_function("edge_toggle", |bench| {
        bench.iter(|| {
            social.model.add_value(a, social.knows, b).unwrap();
            social.model.remove_value(a, social.knows, b).unwrap();
            black_box(matcher.count_matches().unwrap())
        });
    });
}

criterion_group!(benches, bench_initial_build, bench_edge_toggle);
criterion_main!(benches);
