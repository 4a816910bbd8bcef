//! Incremental RETE network for Trellis.
//!
//! This crate provides:
//! - [`ReteContainer`] - Owns network nodes and propagates deltas in FIFO order
//! - [`ReteNode`] - Inputs, filters, projections, joins, aggregators, closures
//!   and productions
//! - [`ReteBuilder`] - Compiles query plans into nodes and feeds input nodes
//!   from a [`QueryRuntimeContext`](trellis_matchers::QueryRuntimeContext)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod builder;
pub mod container;
pub mod node;

pub use builder::{InputFeeder, ReteBuilder, required_input_keys};
pub use container::{NodeId, ReteContainer};
pub use node::{
    AggregatorNode, ClosureNode, ExistenceNode, FilterCondition, JoinNode, Logic, OuterJoinNode,
    RemoteTarget, ReteNode, Side,
};
