//! Dual-input nodes: inner join, left outer join and existence.
//!
//! Each node keeps its own indexed copy of both parents, so a delta arriving
//! on one side is matched against exactly the opposite-side tuples that were
//! delivered before it. This keeps the result correct for any delivery order,
//! including self-joins fed twice by the same parent.

use trellis_foundation::{
    Delta, Direction, IndexChange, Result, Timestamp, Tuple, TupleIndex, TupleMask,
};

use super::{Logic, Side};

fn stamp(logic: Logic, incoming: Timestamp, partner: Timestamp) -> Timestamp {
    match logic {
        Logic::Default => incoming,
        Logic::RecursiveTimely => incoming.join(partner),
    }
}

fn apply(index: &mut TupleIndex, delta: &Delta) -> Result<IndexChange> {
    match delta.direction {
        Direction::Insert => Ok(index.insert(delta.tuple.clone(), delta.timestamp)),
        Direction::Revoke => index.remove(&delta.tuple),
    }
}

// =============================================================================
// Join
// =============================================================================

/// Inner join. Output rows are the primary tuple followed by the secondary
/// columns outside the join key.
#[derive(Clone, Debug)]
pub struct JoinNode {
    primary: TupleIndex,
    secondary: TupleIndex,
    complementer: TupleMask,
}

impl JoinNode {
    /// Creates a join matching `primary_mask` signatures of the primary side
    /// with `secondary_mask` signatures of the secondary side.
    #[must_use]
    pub fn new(primary_mask: TupleMask, secondary_mask: TupleMask) -> Self {
        let complementer = secondary_mask.complementer();
        Self {
            primary: TupleIndex::new(primary_mask),
            secondary: TupleIndex::new(secondary_mask),
            complementer,
        }
    }

    pub(crate) fn update(&mut self, side: Side, delta: &Delta, logic: Logic) -> Result<Vec<Delta>> {
        let mut out = Vec::new();
        match side {
            Side::Primary => {
                apply(&mut self.primary, delta)?;
                let signature = self.primary.mask().transform(&delta.tuple);
                if let Some(partners) = self.secondary.get(&signature) {
                    for (s, m) in partners.iter() {
                        out.push(Delta::new(
                            delta.direction,
                            delta.tuple.unify(s, &self.complementer),
                            stamp(logic, delta.timestamp, m.timestamp),
                        ));
                    }
                }
            }
            Side::Secondary => {
                apply(&mut self.secondary, delta)?;
                let signature = self.secondary.mask().transform(&delta.tuple);
                if let Some(partners) = self.primary.get(&signature) {
                    for (p, m) in partners.iter() {
                        out.push(Delta::new(
                            delta.direction,
                            p.unify(&delta.tuple, &self.complementer),
                            stamp(logic, delta.timestamp, m.timestamp),
                        ));
                    }
                }
            }
        }
        Ok(out)
    }

    pub(crate) fn content(&self, logic: Logic) -> Vec<(Tuple, Timestamp)> {
        let mut rows = Vec::new();
        for (p, pm) in self.primary.iter() {
            let signature = self.primary.mask().transform(p);
            if let Some(partners) = self.secondary.get(&signature) {
                for (s, sm) in partners.iter() {
                    rows.push((p.unify(s, &self.complementer), stamp(logic, pm.timestamp, sm.timestamp)));
                }
            }
        }
        rows
    }
}

// =============================================================================
// Outer join
// =============================================================================

/// Left outer join. Primary tuples without secondary partners are extended
/// with a fixed filler instead of being dropped, so every primary tuple is
/// represented in the output at all times.
#[derive(Clone, Debug)]
pub struct OuterJoinNode {
    primary: TupleIndex,
    secondary: TupleIndex,
    complementer: TupleMask,
    default: Tuple,
}

impl OuterJoinNode {
    /// Creates an outer join; `default` supplies the complementer columns of
    /// unmatched primary tuples.
    #[must_use]
    pub fn new(primary_mask: TupleMask, secondary_mask: TupleMask, default: Tuple) -> Self {
        let complementer = secondary_mask.complementer();
        debug_assert_eq!(complementer.len(), default.len());
        Self {
            primary: TupleIndex::new(primary_mask),
            secondary: TupleIndex::new(secondary_mask),
            complementer,
            default,
        }
    }

    pub(crate) fn update(&mut self, side: Side, delta: &Delta, logic: Logic) -> Result<Vec<Delta>> {
        let mut out = Vec::new();
        match side {
            Side::Primary => {
                apply(&mut self.primary, delta)?;
                let signature = self.primary.mask().transform(&delta.tuple);
                match self.secondary.get(&signature) {
                    Some(partners) if !partners.is_empty() => {
                        for (s, m) in partners.iter() {
                            out.push(Delta::new(
                                delta.direction,
                                delta.tuple.unify(s, &self.complementer),
                                stamp(logic, delta.timestamp, m.timestamp),
                            ));
                        }
                    }
                    _ => out.push(Delta::new(
                        delta.direction,
                        delta.tuple.concat(&self.default),
                        delta.timestamp,
                    )),
                }
            }
            Side::Secondary => {
                let change = apply(&mut self.secondary, delta)?;
                let signature = self.secondary.mask().transform(&delta.tuple);
                let Some(partners) = self.primary.get(&signature) else {
                    return Ok(out);
                };
                let inserted = delta.direction.is_insert();
                if inserted && change.signature_changed {
                    for (p, m) in partners.iter() {
                        out.push(Delta::new(Direction::Revoke, p.concat(&self.default), m.timestamp));
                    }
                }
                for (p, m) in partners.iter() {
                    out.push(Delta::new(
                        delta.direction,
                        p.unify(&delta.tuple, &self.complementer),
                        stamp(logic, delta.timestamp, m.timestamp),
                    ));
                }
                if !inserted && change.signature_changed {
                    for (p, m) in partners.iter() {
                        out.push(Delta::new(Direction::Insert, p.concat(&self.default), m.timestamp));
                    }
                }
            }
        }
        Ok(out)
    }

    pub(crate) fn content(&self, logic: Logic) -> Vec<(Tuple, Timestamp)> {
        let mut rows = Vec::new();
        for (p, pm) in self.primary.iter() {
            let signature = self.primary.mask().transform(p);
            match self.secondary.get(&signature) {
                Some(partners) if !partners.is_empty() => {
                    for (s, sm) in partners.iter() {
                        rows.push((p.unify(s, &self.complementer), stamp(logic, pm.timestamp, sm.timestamp)));
                    }
                }
                _ => rows.push((p.concat(&self.default), pm.timestamp)),
            }
        }
        rows
    }
}

// =============================================================================
// Existence
// =============================================================================

/// Semi-join (`negative == false`) or anti-join (`negative == true`): passes
/// primary tuples depending on whether a secondary tuple shares their
/// signature.
#[derive(Clone, Debug)]
pub struct ExistenceNode {
    primary: TupleIndex,
    secondary: TupleIndex,
    negative: bool,
}

impl ExistenceNode {
    /// Creates an existence check.
    #[must_use]
    pub fn new(primary_mask: TupleMask, secondary_mask: TupleMask, negative: bool) -> Self {
        Self {
            primary: TupleIndex::new(primary_mask),
            secondary: TupleIndex::new(secondary_mask),
            negative,
        }
    }

    fn passes(&self, signature: &Tuple) -> bool {
        (self.secondary.count_signature(signature) > 0) != self.negative
    }

    /// Stamp of a passing primary tuple: a semi-join row is as recent as the
    /// earliest secondary tuple witnessing it, an anti-join row has no
    /// witness.
    fn witnessed(&self, logic: Logic, signature: &Tuple, at: Timestamp) -> Timestamp {
        if self.negative {
            return at;
        }
        let earliest = self
            .secondary
            .get(signature)
            .and_then(|group| group.iter().map(|(_, m)| m.timestamp).min());
        match earliest {
            Some(witness) => stamp(logic, at, witness),
            None => at,
        }
    }

    pub(crate) fn update(&mut self, side: Side, delta: &Delta, logic: Logic) -> Result<Vec<Delta>> {
        let mut out = Vec::new();
        match side {
            Side::Primary => {
                apply(&mut self.primary, delta)?;
                let signature = self.primary.mask().transform(&delta.tuple);
                if self.passes(&signature) {
                    let at = self.witnessed(logic, &signature, delta.timestamp);
                    out.push(Delta::new(delta.direction, delta.tuple.clone(), at));
                }
            }
            Side::Secondary => {
                let change = apply(&mut self.secondary, delta)?;
                if !change.signature_changed {
                    return Ok(out);
                }
                let signature = self.secondary.mask().transform(&delta.tuple);
                let Some(partners) = self.primary.get(&signature) else {
                    return Ok(out);
                };
                // The group appeared (insert) or vanished (revoke).
                let direction = if delta.direction.is_insert() == self.negative {
                    Direction::Revoke
                } else {
                    Direction::Insert
                };
                for (p, m) in partners.iter() {
                    let at = match (logic, self.negative) {
                        (Logic::RecursiveTimely, true) => m.timestamp,
                        _ => stamp(logic, delta.timestamp, m.timestamp),
                    };
                    out.push(Delta::new(direction, p.clone(), at));
                }
            }
        }
        Ok(out)
    }

    pub(crate) fn content(&self, logic: Logic) -> Vec<(Tuple, Timestamp)> {
        let mut rows = Vec::new();
        for (p, m) in self.primary.iter() {
            let signature = self.primary.mask().transform(p);
            if self.passes(&signature) {
                rows.push((p.clone(), self.witnessed(logic, &signature, m.timestamp)));
            }
        }
        rows
    }
}
