//! Integration tests for hand-wired networks

use std::cell::RefCell;
use std::rc::Rc;

use trellis_foundation::{Delta, Direction, Result, Timestamp, Tuple, TupleMask, Value};
use trellis_matchers::Count;
use trellis_rete::{
    AggregatorNode, ClosureNode, FilterCondition, JoinNode, Logic, RemoteTarget, ReteContainer,
    ReteNode, Side,
};

fn t(values: &[i64]) -> Tuple {
    values.iter().copied().map(Value::Int).collect()
}

fn sorted(mut rows: Vec<Tuple>) -> Vec<Tuple> {
    rows.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
    rows
}

#[test]
fn closure_feeds_an_aggregation() {
    let mut net = ReteContainer::new(Logic::Default);
    let edges = net.add_node(ReteNode::input("edge", Vec::new()));
    let closure = net.add_node(ReteNode::TransitiveClosure(ClosureNode::new()));
    let reach = net.add_node(ReteNode::Aggregator(AggregatorNode::new(
        Rc::new(Count),
        TupleMask::new(vec![0], 2),
        None,
    )));
    let production = net.add_node(ReteNode::production("reach_count"));
    net.connect(edges, closure, Side::Primary).unwrap();
    net.connect(closure, reach, Side::Primary).unwrap();
    net.connect(reach, production, Side::Primary).unwrap();

    for (a, b) in [(1, 2), (2, 3), (3, 4)] {
        net.send_update(edges, Direction::Insert, t(&[a, b])).unwrap();
    }
    assert_eq!(sorted(net.pull_into(production, true).unwrap()), vec![t(&[1, 3]), t(&[2, 2]), t(&[3, 1])]);

    net.send_update(edges, Direction::Revoke, t(&[2, 3])).unwrap();
    assert_eq!(sorted(net.pull_into(production, true).unwrap()), vec![t(&[1, 1]), t(&[3, 1])]);
}

#[test]
fn production_changes_are_netted_per_batch() {
    let mut net = ReteContainer::new(Logic::Default);
    let input = net.add_node(ReteNode::input("n", Vec::new()));
    let positive = net.add_node(ReteNode::Filter(FilterCondition::Differ(0, 1)));
    let production = net.add_node(ReteNode::production("distinct_pairs"));
    net.connect(input, positive, Side::Primary).unwrap();
    net.connect(positive, production, Side::Primary).unwrap();
    net.set_delay_updates(true).unwrap();

    net.send_update(input, Direction::Insert, t(&[1, 2])).unwrap();
    net.send_update(input, Direction::Insert, t(&[3, 3])).unwrap();
    net.send_update(input, Direction::Revoke, t(&[1, 2])).unwrap();
    net.send_update(input, Direction::Insert, t(&[4, 5])).unwrap();
    assert!(net.has_pending_updates());
    net.flush_updates().unwrap();

    let changes: Vec<Delta> = net.take_production_deltas().into_iter().map(|(_, d)| d).collect();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].direction, Direction::Insert);
    assert_eq!(changes[0].tuple, t(&[4, 5]));
}

#[derive(Default)]
struct Journal(RefCell<Vec<(Direction, Timestamp)>>);

impl RemoteTarget for Journal {
    fn receive(&self, delta: &Delta) -> Result<()> {
        self.0.borrow_mut().push((delta.direction, delta.timestamp));
        Ok(())
    }
}

#[test]
fn timely_joins_carry_the_later_revision() {
    let mut net = ReteContainer::new(Logic::RecursiveTimely);
    let left = net.add_node(ReteNode::input("left", Vec::new()));
    let right = net.add_node(ReteNode::input("right", Vec::new()));
    let join = net.add_node(ReteNode::Join(JoinNode::new(
        TupleMask::new(vec![0], 1),
        TupleMask::new(vec![0], 1),
    )));
    let remote = net.add_node(ReteNode::RemoteReceiver { targets: Vec::new() });
    net.connect(left, join, Side::Primary).unwrap();
    net.connect(right, join, Side::Secondary).unwrap();
    net.connect(join, remote, Side::Primary).unwrap();
    let journal = Rc::new(Journal::default());
    net.add_remote_target(remote, journal.clone()).unwrap();

    net.send_update(left, Direction::Insert, t(&[7])).unwrap();
    net.send_update(right, Direction::Insert, t(&[7])).unwrap();
    let seen = journal.0.borrow();
    assert_eq!(seen.len(), 1);
    let rows = net.pull_into_with_timestamp(join, false).unwrap();
    assert_eq!(rows[0].1, seen[0].1);
    assert!(seen[0].1 > Timestamp::ZERO);
}
