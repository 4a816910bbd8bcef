//! Deterministic greedy planner.
//!
//! Each body is planned left-deep. Constant bindings go first, then the
//! enumerable constraint sharing the most variables with the plan so far,
//! ties broken by constraint id. After every step all deferred constraints
//! whose variables are bound are applied in id order.

use std::collections::BTreeSet;
use std::rc::Rc;

use tracing::debug;

use trellis_foundation::{Error, ErrorContext, Result};

use super::{BodyPlan, PlanOperation, QueryPlan, QueryPlanner, SubPlanId};
use crate::psystem::{ConstraintId, ConstraintKind, PBody, PQuery, VarId};

/// Rule-based left-deep planner.
#[derive(Clone, Copy, Debug, Default)]
pub struct GreedyPlanner;

impl GreedyPlanner {
    /// Creates a planner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl QueryPlanner for GreedyPlanner {
    fn construct(&self, query: &Rc<PQuery>) -> Result<QueryPlan> {
        let mut bodies = Vec::with_capacity(query.bodies().len());
        for (index, body) in query.bodies().iter().enumerate() {
            let plan = BodyPlanning::new(query.fqn(), index, body)
                .run()
                .map_err(|e| e.with_context(ErrorContext::new().with_source(query.fqn()).with_body(index)))?;
            debug!(pattern = query.fqn(), body = index, plan = %plan, "body planned");
            bodies.push(plan);
        }
        Ok(QueryPlan::new(Rc::clone(query), bodies))
    }
}

/// State of planning one body.
struct BodyPlanning<'a> {
    fqn: &'a str,
    body: &'a PBody,
    plan: BodyPlan,
    current: SubPlanId,
    columns: Vec<VarId>,
    enumerables: BTreeSet<ConstraintId>,
    deferred: BTreeSet<ConstraintId>,
}

impl<'a> BodyPlanning<'a> {
    fn new(fqn: &'a str, index: usize, body: &'a PBody) -> Self {
        let mut plan = BodyPlan::new(index);
        let current = plan.push(PlanOperation::Start, None, Vec::new());
        let mut enumerables = BTreeSet::new();
        let mut deferred = BTreeSet::new();
        for c in body.constraints() {
            match c.kind() {
                kind if kind.is_enumerable() => {
                    enumerables.insert(c.id());
                }
                ConstraintKind::ExportedParameter { .. } => {}
                _ => {
                    deferred.insert(c.id());
                }
            }
        }
        Self {
            fqn,
            body,
            plan,
            current,
            columns: Vec::new(),
            enumerables,
            deferred,
        }
    }

    fn kind(&self, id: ConstraintId) -> Result<&'a ConstraintKind> {
        self.body
            .constraint(id)
            .map(|c| c.kind())
            .ok_or_else(|| Error::internal(format!("constraint {id} vanished during planning")))
    }

    fn is_bound(&self, v: VarId) -> bool {
        self.columns.contains(&v)
    }

    fn run(mut self) -> Result<BodyPlan> {
        self.apply_deferred()?;
        while let Some(next) = self.choose()? {
            self.enumerables.remove(&next);
            let mut columns = self.columns.clone();
            for v in self.kind(next)?.variables() {
                if !columns.contains(&v) {
                    columns.push(v);
                }
            }
            debug!(pattern = self.fqn, constraint = %self.body.describe(next), "enumerating");
            self.step(PlanOperation::Enumerate(next), columns);
            self.apply_deferred()?;
        }

        if let Some(&stuck) = self.deferred.first() {
            return Err(Error::planner(
                self.fqn,
                format!("{} can never be applied: its variables are not bound", self.body.describe(stuck)),
            ));
        }

        let mut projection = Vec::new();
        for (name, v) in self.body.symbolic_parameters() {
            if !self.is_bound(v) {
                return Err(Error::planner(
                    self.fqn,
                    format!("parameter {name} is not bound by any enumerable constraint"),
                ));
            }
            projection.push(v);
        }
        self.step(PlanOperation::Project(projection.clone()), projection);
        Ok(self.plan)
    }

    fn step(&mut self, operation: PlanOperation, columns: Vec<VarId>) {
        self.current = self.plan.push(operation, Some(self.current), columns.clone());
        self.columns = columns;
    }

    /// Constants first, then most shared variables, then lowest id.
    fn choose(&self) -> Result<Option<ConstraintId>> {
        let mut best: Option<(bool, usize, ConstraintId)> = None;
        for &id in &self.enumerables {
            let kind = self.kind(id)?;
            let constant = matches!(kind, ConstraintKind::ConstantValue { .. });
            let shared = self.body.affected_variables(id).iter().filter(|v| self.is_bound(**v)).count();
            let better = match best {
                None => true,
                Some((best_constant, best_shared, _)) => {
                    (constant, shared) > (best_constant, best_shared)
                }
            };
            if better {
                best = Some((constant, shared, id));
            }
        }
        Ok(best.map(|(_, _, id)| id))
    }

    /// Applies every deferred constraint that became applicable, repeating
    /// until none is.
    fn apply_deferred(&mut self) -> Result<()> {
        loop {
            let mut applied = None;
            for &id in &self.deferred {
                if let Some(step) = self.deferred_step(id)? {
                    applied = Some((id, step));
                    break;
                }
            }
            let Some((id, (operation, columns))) = applied else {
                return Ok(());
            };
            self.deferred.remove(&id);
            debug!(pattern = self.fqn, constraint = %self.body.describe(id), "applying deferred constraint");
            self.step(operation, columns);
        }
    }

    fn deferred_step(&self, id: ConstraintId) -> Result<Option<(PlanOperation, Vec<VarId>)>> {
        let step = match self.kind(id)? {
            ConstraintKind::Inequality { who, with_whom, .. }
            | ConstraintKind::Equality { who, with_whom } => (self.is_bound(*who) && self.is_bound(*with_whom))
                .then(|| (PlanOperation::Filter(id), self.columns.clone())),
            ConstraintKind::NegativePatternCall { actuals, .. } => actuals
                .iter()
                .all(|v| self.is_bound(*v) || self.body.is_local_to(*v, id))
                .then(|| (PlanOperation::AntiJoin(id), self.columns.clone())),
            ConstraintKind::Aggregator {
                operator,
                actuals,
                aggregated_column,
                result,
                ..
            } => {
                let quantified = |(i, v): (usize, &VarId)| {
                    Some(i) == *aggregated_column || self.body.is_local_to(*v, id)
                };
                let ready = actuals
                    .iter()
                    .enumerate()
                    .all(|(i, v)| quantified((i, v)) || self.is_bound(*v));
                ready.then(|| {
                    let mut columns = self.columns.clone();
                    if !columns.contains(result) {
                        columns.push(*result);
                    }
                    let outer = operator.neutral().is_some();
                    (
                        PlanOperation::Aggregate {
                            constraint: id,
                            outer,
                        },
                        columns,
                    )
                })
            }
            _ => None,
        };
        Ok(step)
    }
}
