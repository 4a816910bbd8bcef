//! Pattern system, normalization and planning for Trellis.
//!
//! This crate provides:
//! - [`PQuery`], [`PBody`], [`ConstraintKind`] - Queries as disjunctions of
//!   constraint bodies, built with [`PQueryBuilder`]
//! - [`MetaContext`] - The type system as seen by normalization and planning
//! - [`Normalizer`] - Rewrites bodies into planner-ready form
//! - [`QueryRegistry`] - Explicit, name-keyed query registry
//! - [`GreedyPlanner`] - Deterministic left-deep planning
//! - [`QueryRuntimeContext`] - What the network needs from the model

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod aggregation;
pub mod context;
pub mod normalizer;
pub mod planning;
pub mod psystem;
pub mod registry;
pub mod runtime;

pub use aggregation::{AggregationOperator, Count, Extremum, MAX, MIN, Sum};
pub use context::{InputKey, MetaContext, ModelMetaContext, TypeJudgement, type_closure};
pub use normalizer::{NormalizationTrace, Normalizer, NormalizerOptions, RemovalReason};
pub use planning::{
    BodyPlan, GreedyPlanner, PlanOperation, QueryPlan, QueryPlanner, SubPlan, SubPlanId,
};
pub use psystem::{
    BodyStatus, ConstraintId, ConstraintKind, ConstraintTag, PBody, PConstraint, PParameter,
    PQuery, PQueryBuilder, PVariable, VarId,
};
pub use registry::QueryRegistry;
pub use runtime::{QueryRuntimeContext, TupleUpdateListener};
