//! Integration tests for planning query libraries

use std::rc::Rc;

use trellis_matchers::{
    Count, GreedyPlanner, NormalizerOptions, PQueryBuilder, PlanOperation, QueryPlanner,
};

use crate::library::{knows, library};

#[test]
fn callers_and_callees_both_plan() {
    let lib = library();
    let knows_q = knows(&lib);
    let callee = Rc::clone(&knows_q);
    let friend_of_friend = PQueryBuilder::new("people.fof")
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
        .build(&lib.ctx, &NormalizerOptions::default())
        .unwrap();

    assert_eq!(friend_of_friend.direct_callees().len(), 1);
    for q in [&knows_q, &friend_of_friend] {
        let plan = GreedyPlanner.construct(q).unwrap();
        assert_eq!(plan.bodies().len(), 1);
        let root = plan.bodies()[0].root().unwrap();
        assert!(matches!(root.operation(), PlanOperation::Project(_)));
        assert_eq!(root.variables().len(), 2);
    }
}

#[test]
fn every_body_is_planned_separately() {
    let lib = library();
    let (knows_key, age_key) = (lib.knows, lib.age);
    let q = PQueryBuilder::new("people.connected")
        .parameter("p", None)
        .body(move |b| {
            let p = b.variable_by_name("p")?;
            let o = b.new_variable("o");
            b.type_constraint(knows_key, &[p, o])?;
            Ok(())
        })
        .body(move |b| {
            let p = b.variable_by_name("p")?;
            let v = b.new_variable("v");
            b.type_constraint(age_key, &[p, v])?;
            b.constant(v, 18)?;
            Ok(())
        })
        .build(&lib.ctx, &NormalizerOptions::default())
        .unwrap();

    let plan = GreedyPlanner.construct(&q).unwrap();
    assert_eq!(plan.bodies().len(), 2);
    assert_eq!(plan.bodies()[1].body(), 1);
    assert!(plan.bodies()[1].to_string().starts_with("start -> enumerate"));
}

#[test]
fn count_of_callee_is_an_outer_aggregation() {
    let lib = library();
    let knows_q = knows(&lib);
    let q = PQueryBuilder::new("people.degree")
        .parameter("p", Some(lib.person))
        .parameter("n", None)
        .body(move |b| {
            let p = b.variable_by_name("p")?;
            let n = b.variable_by_name("n")?;
            let other = b.new_variable("other");
            b.aggregate(Rc::new(Count), &knows_q, &[p, other], None, n)?;
            Ok(())
        })
        .build(&lib.ctx, &NormalizerOptions::default())
        .unwrap();

    let plan = GreedyPlanner.construct(&q).unwrap();
    assert!(
        plan.bodies()[0]
            .steps()
            .iter()
            .any(|s| matches!(s.operation(), PlanOperation::Aggregate { outer: true, .. }))
    );
}
