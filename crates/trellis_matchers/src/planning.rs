//! Query plans.
//!
//! A [`QueryPlan`] holds one left-deep [`BodyPlan`] per body. Each step of a
//! body plan extends the tuples of its parent step; the columns of a step are
//! the columns of its parent followed by the variables the step binds.

pub mod greedy;

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use trellis_foundation::Result;

use crate::psystem::{ConstraintId, PQuery, VarId};

pub use greedy::GreedyPlanner;

/// Index of a step within its body plan.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubPlanId(pub usize);

/// What a plan step does to the tuples of its parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlanOperation {
    /// The unit relation: one empty tuple.
    Start,
    /// Joins with the tuples of an enumerable constraint on shared variables.
    Enumerate(ConstraintId),
    /// Keeps tuples satisfying an inequality or equality.
    Filter(ConstraintId),
    /// Keeps tuples without a match of a negative call.
    AntiJoin(ConstraintId),
    /// Joins with the per-group aggregates of an aggregator constraint;
    /// `outer` keeps groups without matches, paired with the neutral value.
    Aggregate {
        /// The aggregator constraint.
        constraint: ConstraintId,
        /// Left outer join with the neutral value.
        outer: bool,
    },
    /// Trims the columns to the given variables.
    Project(Vec<VarId>),
}

/// One step of a body plan.
#[derive(Clone, Debug)]
pub struct SubPlan {
    id: SubPlanId,
    operation: PlanOperation,
    parent: Option<SubPlanId>,
    variables: Vec<VarId>,
}

impl SubPlan {
    /// Index within the body plan.
    #[must_use]
    pub fn id(&self) -> SubPlanId {
        self.id
    }

    /// What this step does.
    #[must_use]
    pub fn operation(&self) -> &PlanOperation {
        &self.operation
    }

    /// The step whose tuples this one extends; `None` for the start.
    #[must_use]
    pub fn parent(&self) -> Option<SubPlanId> {
        self.parent
    }

    /// Columns of the tuples this step produces.
    #[must_use]
    pub fn variables(&self) -> &[VarId] {
        &self.variables
    }

    /// Column of a variable.
    #[must_use]
    pub fn column_of(&self, variable: VarId) -> Option<usize> {
        self.variables.iter().position(|&v| v == variable)
    }
}

/// Left-deep plan of one body.
#[derive(Clone, Debug)]
pub struct BodyPlan {
    body: usize,
    steps: Vec<SubPlan>,
}

impl BodyPlan {
    pub(crate) fn new(body: usize) -> Self {
        Self {
            body,
            steps: Vec::new(),
        }
    }

    pub(crate) fn push(
        &mut self,
        operation: PlanOperation,
        parent: Option<SubPlanId>,
        variables: Vec<VarId>,
    ) -> SubPlanId {
        let id = SubPlanId(self.steps.len());
        self.steps.push(SubPlan {
            id,
            operation,
            parent,
            variables,
        });
        id
    }

    /// Index of the planned body within its query.
    #[must_use]
    pub fn body(&self) -> usize {
        self.body
    }

    /// A step.
    #[must_use]
    pub fn get(&self, id: SubPlanId) -> Option<&SubPlan> {
        self.steps.get(id.0)
    }

    /// Steps from the start to the root.
    #[must_use]
    pub fn steps(&self) -> &[SubPlan] {
        &self.steps
    }

    /// The final step, projecting onto the exported parameters.
    #[must_use]
    pub fn root(&self) -> Option<&SubPlan> {
        self.steps.last()
    }
}

impl fmt::Display for BodyPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            match &step.operation {
                PlanOperation::Start => write!(f, "start")?,
                PlanOperation::Enumerate(c) => write!(f, "enumerate {c}")?,
                PlanOperation::Filter(c) => write!(f, "filter {c}")?,
                PlanOperation::AntiJoin(c) => write!(f, "antijoin {c}")?,
                PlanOperation::Aggregate { constraint, outer } => {
                    let kind = if *outer { "outer " } else { "" };
                    write!(f, "{kind}aggregate {constraint}")?;
                }
                PlanOperation::Project(vars) => {
                    let vars: Vec<String> = vars.iter().map(ToString::to_string).collect();
                    write!(f, "project [{}]", vars.join(", "))?;
                }
            }
        }
        Ok(())
    }
}

/// Plans of every body of a query.
#[derive(Clone, Debug)]
pub struct QueryPlan {
    query: Rc<PQuery>,
    bodies: Vec<BodyPlan>,
}

impl QueryPlan {
    pub(crate) fn new(query: Rc<PQuery>, bodies: Vec<BodyPlan>) -> Self {
        Self { query, bodies }
    }

    /// The planned query.
    #[must_use]
    pub fn query(&self) -> &Rc<PQuery> {
        &self.query
    }

    /// One plan per body, in body order.
    #[must_use]
    pub fn bodies(&self) -> &[BodyPlan] {
        &self.bodies
    }
}

/// Turns a normalized query into executable plans.
pub trait QueryPlanner {
    /// Plans every body of `query`.
    ///
    /// # Errors
    ///
    /// Returns a `Planner` error if a body cannot be realized.
    fn construct(&self, query: &Rc<PQuery>) -> Result<QueryPlan>;

    /// Parameter name to tuple column of the plan roots.
    fn pos_mapping(&self, query: &PQuery) -> HashMap<String, usize> {
        query.pos_mapping()
    }
}
