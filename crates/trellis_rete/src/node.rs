//! Network nodes.
//!
//! A node receives deltas from its parents and returns the deltas it
//! forwards to its children. Stateful nodes keep counted memories so that a
//! tuple derived several ways disappears only with its last derivation;
//! stateless nodes answer pulls by asking their parents.

pub mod aggregator;
pub mod closure;
pub mod join;

use std::fmt;
use std::rc::Rc;

use trellis_foundation::{Delta, Direction, Result, Timestamp, Tuple, TupleMask, TupleMemory, Value};

pub use aggregator::AggregatorNode;
pub use closure::ClosureNode;
pub use join::{ExistenceNode, JoinNode, OuterJoinNode};

/// Which input of a dual-input node a delta arrives on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    /// Left input; single-input nodes only have this one.
    Primary,
    /// Right input of joins and existence checks.
    Secondary,
}

/// How timestamps travel through joins.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Logic {
    /// Deltas keep the timestamp of the update that caused them.
    #[default]
    Default,
    /// Join results are valid as of the later of the two joined tuples.
    RecursiveTimely,
}

/// Consumer of the deltas reaching a remote receiver node.
pub trait RemoteTarget {
    /// A delta reached the receiver.
    ///
    /// # Errors
    ///
    /// The error aborts the current flush.
    fn receive(&self, delta: &Delta) -> Result<()>;
}

/// Column condition of a filter node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterCondition {
    /// Two columns hold the same value.
    Equal(usize, usize),
    /// Two columns hold different values.
    Differ(usize, usize),
    /// A column holds a constant.
    EqualsConstant(usize, Value),
}

impl FilterCondition {
    /// Returns true if `tuple` passes.
    #[must_use]
    pub fn holds(&self, tuple: &Tuple) -> bool {
        match self {
            Self::Equal(i, j) => tuple.get(*i) == tuple.get(*j),
            Self::Differ(i, j) => tuple.get(*i) != tuple.get(*j),
            Self::EqualsConstant(i, v) => tuple.get(*i) == Some(v),
        }
    }
}

impl fmt::Display for FilterCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal(i, j) => write!(f, "#{i} == #{j}"),
            Self::Differ(i, j) => write!(f, "#{i} != #{j}"),
            Self::EqualsConstant(i, v) => write!(f, "#{i} == {v}"),
        }
    }
}

// =============================================================================
// ReteNode
// =============================================================================

/// A network node and its state.
pub enum ReteNode {
    /// Relation of an input key, fed from the base index. Set semantics:
    /// duplicate inserts and revokes of absent tuples are dropped.
    Input {
        /// Label for diagnostics.
        label: String,
        /// Current tuples.
        memory: TupleMemory,
    },
    /// Fixed tuples; never updated.
    Constant {
        /// The tuples.
        tuples: Vec<Tuple>,
    },
    /// Forwards everything unchanged.
    Transparent,
    /// Forwards tuples satisfying a condition.
    Filter(FilterCondition),
    /// Projects onto a mask, forwarding a projected tuple when its first
    /// preimage appears or its last one disappears.
    Projection {
        /// Kept columns.
        mask: TupleMask,
        /// Counted projected tuples.
        memory: TupleMemory,
    },
    /// Inner join.
    Join(JoinNode),
    /// Left outer join.
    OuterJoin(OuterJoinNode),
    /// Semi-join or anti-join.
    Existence(ExistenceNode),
    /// Grouped aggregation.
    Aggregator(AggregatorNode),
    /// Transitive closure of a binary relation.
    TransitiveClosure(ClosureNode),
    /// Union of the bodies of a query; the match set.
    Production {
        /// Fully qualified name of the query.
        name: String,
        /// Counted matches.
        memory: TupleMemory,
    },
    /// Hands deltas to consumers outside the network.
    RemoteReceiver {
        /// Registered consumers.
        targets: Vec<Rc<dyn RemoteTarget>>,
    },
}

impl ReteNode {
    /// Creates an input node holding `tuples`.
    #[must_use]
    pub fn input(label: impl Into<String>, tuples: impl IntoIterator<Item = Tuple>) -> Self {
        let mut memory = TupleMemory::new();
        for t in tuples {
            if !memory.contains(&t) {
                memory.insert(t, Timestamp::ZERO);
            }
        }
        Self::Input {
            label: label.into(),
            memory,
        }
    }

    /// Creates a projection node.
    #[must_use]
    pub fn projection(mask: TupleMask) -> Self {
        Self::Projection {
            mask,
            memory: TupleMemory::new(),
        }
    }

    /// Creates an empty production node.
    #[must_use]
    pub fn production(name: impl Into<String>) -> Self {
        Self::Production {
            name: name.into(),
            memory: TupleMemory::new(),
        }
    }

    /// Short kind name for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input { .. } => "input",
            Self::Constant { .. } => "constant",
            Self::Transparent => "transparent",
            Self::Filter(_) => "filter",
            Self::Projection { .. } => "projection",
            Self::Join(_) => "join",
            Self::OuterJoin(_) => "outer-join",
            Self::Existence(_) => "existence",
            Self::Aggregator(_) => "aggregator",
            Self::TransitiveClosure(_) => "closure",
            Self::Production { .. } => "production",
            Self::RemoteReceiver { .. } => "remote",
        }
    }

    /// Returns true for production nodes.
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production { .. })
    }

    /// Processes one delta, returning the deltas to forward.
    pub(crate) fn update(&mut self, side: Side, delta: &Delta, logic: Logic) -> Result<Vec<Delta>> {
        match self {
            Self::Input { memory, .. } => {
                let changed = match delta.direction {
                    Direction::Insert if !memory.contains(&delta.tuple) => {
                        memory.insert(delta.tuple.clone(), delta.timestamp)
                    }
                    Direction::Revoke if memory.contains(&delta.tuple) => memory.remove(&delta.tuple)?,
                    _ => false,
                };
                Ok(if changed { vec![delta.clone()] } else { Vec::new() })
            }
            Self::Constant { .. } => Ok(Vec::new()),
            Self::Transparent => Ok(vec![delta.clone()]),
            Self::Filter(condition) => Ok(if condition.holds(&delta.tuple) {
                vec![delta.clone()]
            } else {
                Vec::new()
            }),
            Self::Projection { mask, memory } => {
                let projected = mask.transform(&delta.tuple);
                counted(memory, delta.direction, projected, delta.timestamp)
            }
            Self::Production { memory, .. } => {
                counted(memory, delta.direction, delta.tuple.clone(), delta.timestamp)
            }
            Self::Join(join) => join.update(side, delta, logic),
            Self::OuterJoin(join) => join.update(side, delta, logic),
            Self::Existence(existence) => existence.update(side, delta, logic),
            Self::Aggregator(aggregator) => aggregator.update(delta),
            Self::TransitiveClosure(closure) => closure.update(delta),
            Self::RemoteReceiver { targets } => {
                for target in targets.iter() {
                    target.receive(delta)?;
                }
                Ok(Vec::new())
            }
        }
    }

    /// Content of a stateful node; `None` for nodes that must pull from
    /// their parents.
    pub(crate) fn memory_content(&self, logic: Logic) -> Option<Vec<(Tuple, Timestamp)>> {
        let rows = match self {
            Self::Input { memory, .. }
            | Self::Projection { memory, .. }
            | Self::Production { memory, .. } => {
                memory.iter().map(|(t, m)| (t.clone(), m.timestamp)).collect()
            }
            Self::Constant { tuples } => tuples.iter().map(|t| (t.clone(), Timestamp::ZERO)).collect(),
            Self::Join(join) => join.content(logic),
            Self::OuterJoin(join) => join.content(logic),
            Self::Existence(existence) => existence.content(logic),
            Self::Aggregator(aggregator) => aggregator.content(),
            Self::TransitiveClosure(closure) => closure.content(),
            Self::Transparent | Self::Filter(_) | Self::RemoteReceiver { .. } => return None,
        };
        Some(rows)
    }
}

fn counted(memory: &mut TupleMemory, direction: Direction, tuple: Tuple, timestamp: Timestamp) -> Result<Vec<Delta>> {
    let changed = match direction {
        Direction::Insert => memory.insert(tuple.clone(), timestamp),
        Direction::Revoke => memory.remove(&tuple)?,
    };
    Ok(if changed {
        vec![Delta::new(direction, tuple, timestamp)]
    } else {
        Vec::new()
    })
}

impl fmt::Debug for ReteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input { label, memory } => write!(f, "Input<{label}>[{}]", memory.len()),
            Self::Filter(condition) => write!(f, "Filter({condition})"),
            Self::Projection { mask, memory } => {
                write!(f, "Projection{:?}[{}]", mask.indices(), memory.len())
            }
            Self::Production { name, memory } => write!(f, "Production<{name}>[{}]", memory.len()),
            other => write!(f, "{}", other.kind()),
        }
    }
}
