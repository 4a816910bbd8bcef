//! Incremental transitive closure of a binary relation.

use std::collections::{HashMap, HashSet, VecDeque};

use trellis_foundation::{Delta, Direction, Error, Result, Timestamp, Tuple, Value};

/// Maintains the irreflexive-unless-cyclic transitive closure of the edges it
/// receives and emits reachability pairs `(source, target)` as they appear
/// and disappear.
///
/// Insertions extend the closure directly: every node reaching the edge
/// source now reaches everything the edge target reaches. Deletions
/// recompute reachability from the sources that could have used the edge.
#[derive(Clone, Debug, Default)]
pub struct ClosureNode {
    edges: HashMap<Value, HashMap<Value, usize>>,
    reach: HashMap<Value, HashMap<Value, Timestamp>>,
    reached_by: HashMap<Value, HashSet<Value>>,
}

fn endpoints(tuple: &Tuple) -> Result<(Value, Value)> {
    match tuple.values() {
        [s, t] => Ok((s.clone(), t.clone())),
        _ => Err(Error::internal(format!("closure edge {tuple} is not binary"))),
    }
}

impl ClosureNode {
    /// Creates an empty closure.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn reaches(&self, source: &Value, target: &Value) -> bool {
        self.reach.get(source).is_some_and(|r| r.contains_key(target))
    }

    fn successors(&self, source: &Value) -> HashSet<Value> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([source.clone()]);
        while let Some(node) = queue.pop_front() {
            if let Some(next) = self.edges.get(&node) {
                for target in next.keys() {
                    if seen.insert(target.clone()) {
                        queue.push_back(target.clone());
                    }
                }
            }
        }
        seen
    }

    fn link(&mut self, source: Value, target: Value, timestamp: Timestamp) -> bool {
        if self.reaches(&source, &target) {
            return false;
        }
        self.reached_by.entry(target.clone()).or_default().insert(source.clone());
        self.reach.entry(source).or_default().insert(target, timestamp);
        true
    }

    fn unlink(&mut self, source: &Value, target: &Value) {
        if let Some(r) = self.reach.get_mut(source) {
            r.remove(target);
            if r.is_empty() {
                self.reach.remove(source);
            }
        }
        if let Some(b) = self.reached_by.get_mut(target) {
            b.remove(source);
            if b.is_empty() {
                self.reached_by.remove(target);
            }
        }
    }

    fn insert_edge(&mut self, s: Value, t: Value, timestamp: Timestamp) -> Vec<Delta> {
        let count = self.edges.entry(s.clone()).or_default().entry(t.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            return Vec::new();
        }

        let mut sources: Vec<Value> = self
            .reached_by
            .get(&s)
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default();
        sources.push(s);
        let mut targets: Vec<Value> = self
            .reach
            .get(&t)
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        targets.push(t);

        let mut out = Vec::new();
        for a in &sources {
            for b in &targets {
                if self.link(a.clone(), b.clone(), timestamp) {
                    out.push(Delta::new(
                        Direction::Insert,
                        Tuple::from(vec![a.clone(), b.clone()]),
                        timestamp,
                    ));
                }
            }
        }
        out
    }

    fn remove_edge(&mut self, s: Value, t: &Value, timestamp: Timestamp) -> Result<Vec<Delta>> {
        let Some(count) = self.edges.get_mut(&s).and_then(|e| e.get_mut(t)) else {
            return Err(Error::internal(format!("revoked closure edge ({s}, {t}) is not present")));
        };
        *count -= 1;
        if *count > 0 {
            return Ok(Vec::new());
        }
        if let Some(e) = self.edges.get_mut(&s) {
            e.remove(t);
            if e.is_empty() {
                self.edges.remove(&s);
            }
        }

        let mut affected: Vec<Value> = self
            .reached_by
            .get(&s)
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default();
        affected.push(s);

        let mut out = Vec::new();
        for a in affected {
            let still = self.successors(&a);
            let lost: Vec<Value> = self
                .reach
                .get(&a)
                .map(|r| r.keys().filter(|b| !still.contains(*b)).cloned().collect())
                .unwrap_or_default();
            for b in lost {
                self.unlink(&a, &b);
                out.push(Delta::new(Direction::Revoke, Tuple::from(vec![a.clone(), b]), timestamp));
            }
        }
        Ok(out)
    }

    pub(crate) fn update(&mut self, delta: &Delta) -> Result<Vec<Delta>> {
        let (s, t) = endpoints(&delta.tuple)?;
        match delta.direction {
            Direction::Insert => Ok(self.insert_edge(s, t, delta.timestamp)),
            Direction::Revoke => self.remove_edge(s, &t, delta.timestamp),
        }
    }

    pub(crate) fn content(&self) -> Vec<(Tuple, Timestamp)> {
        self.reach
            .iter()
            .flat_map(|(a, r)| {
                r.iter()
                    .map(move |(b, ts)| (Tuple::from(vec![a.clone(), b.clone()]), *ts))
            })
            .collect()
    }
}
