//! Compiles query plans into network nodes.
//!
//! Each body plan becomes a chain of nodes whose output columns follow the
//! plan's step variables. Bodies of a query share one production node; callee
//! productions, input nodes and closure nodes are shared between every query
//! built by the same builder.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::{Rc, Weak};

use tracing::{debug, info};
use trellis_base::IndexingService;
use trellis_foundation::{Direction, Error, ErrorContext, ErrorKind, Result, Seed, Tuple, TupleMask};
use trellis_matchers::{
    BodyPlan, ConstraintId, ConstraintKind, InputKey, PBody, PConstraint, PQuery, PlanOperation,
    QueryPlanner, QueryRuntimeContext, TupleUpdateListener, VarId,
};
use trellis_model::FeatureId;

use crate::container::{NodeId, ReteContainer};
use crate::node::{
    AggregatorNode, ClosureNode, ExistenceNode, FilterCondition, JoinNode, OuterJoinNode, ReteNode,
    Side,
};

// =============================================================================
// Input feeding
// =============================================================================

/// Forwards base index tuple updates of one input key into its input node.
pub struct InputFeeder {
    container: Weak<RefCell<ReteContainer>>,
    node: NodeId,
}

impl InputFeeder {
    /// The fed input node.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl TupleUpdateListener for InputFeeder {
    fn update(&self, direction: Direction, tuple: &Tuple) -> Result<()> {
        let container = self.container.upgrade().ok_or_else(|| Error::new(ErrorKind::Disposed))?;
        let mut net = container
            .try_borrow_mut()
            .map_err(|_| Error::internal("network updated while it is being read"))?;
        net.send_update(self.node, direction, tuple.clone())
    }
}

/// Every input key the network of `query` reads, including those of the
/// queries it calls.
#[must_use]
pub fn required_input_keys(query: &PQuery) -> BTreeSet<InputKey> {
    let mut keys = BTreeSet::new();
    collect_keys(query, &mut keys, &mut HashSet::new());
    keys
}

fn collect_keys(query: &PQuery, keys: &mut BTreeSet<InputKey>, visited: &mut HashSet<String>) {
    if !visited.insert(query.fqn().to_string()) {
        return;
    }
    for body in query.bodies() {
        for constraint in body.constraints() {
            match constraint.kind() {
                ConstraintKind::TypeConstraint { key, .. } => {
                    keys.insert(*key);
                }
                ConstraintKind::PathExpression { path, .. } => {
                    keys.extend(path.iter().map(|f| InputKey::Feature(*f)));
                }
                _ => {}
            }
        }
    }
    for callee in query.direct_callees() {
        collect_keys(&callee, keys, visited);
    }
}

// =============================================================================
// ReteBuilder
// =============================================================================

/// Builds and remembers the network nodes of queries.
pub struct ReteBuilder {
    planner: Box<dyn QueryPlanner>,
    inputs: HashMap<InputKey, NodeId>,
    feeders: Vec<(InputKey, Rc<dyn TupleUpdateListener>)>,
    productions: HashMap<String, NodeId>,
    closures: HashMap<NodeId, NodeId>,
    unit: Option<NodeId>,
}

/// Node of a partially compiled body with the variable of each column.
/// `node == None` stands for the unit relation.
#[derive(Clone, Debug)]
struct Stage {
    node: Option<NodeId>,
    columns: Vec<VarId>,
}

impl ReteBuilder {
    /// Creates a builder planning with `planner`.
    #[must_use]
    pub fn new(planner: Box<dyn QueryPlanner>) -> Self {
        Self {
            planner,
            inputs: HashMap::new(),
            feeders: Vec::new(),
            productions: HashMap::new(),
            closures: HashMap::new(),
            unit: None,
        }
    }

    /// The planner.
    #[must_use]
    pub fn planner(&self) -> &dyn QueryPlanner {
        self.planner.as_ref()
    }

    /// Production node of an already built query.
    #[must_use]
    pub fn production(&self, fqn: &str) -> Option<NodeId> {
        self.productions.get(fqn).copied()
    }

    /// Input node of a key.
    #[must_use]
    pub fn input(&self, key: &InputKey) -> Option<NodeId> {
        self.inputs.get(key).copied()
    }

    /// Builds the network of `query` and the queries it calls, returning its
    /// production node. Building an already built query is a lookup.
    ///
    /// Newly needed input keys are indexed in one coalesced traversal.
    ///
    /// # Errors
    ///
    /// Returns indexing errors of the runtime context and planner errors;
    /// the latter carry the offending pattern in their context.
    pub fn build(
        &mut self,
        container: &Rc<RefCell<ReteContainer>>,
        runtime: &dyn QueryRuntimeContext,
        query: &Rc<PQuery>,
    ) -> Result<NodeId> {
        if let Some(node) = self.production(query.fqn()) {
            return Ok(node);
        }

        let missing: Vec<InputKey> = required_input_keys(query)
            .into_iter()
            .filter(|k| !self.inputs.contains_key(k))
            .collect();
        runtime.coalesce_traversals(&mut || {
            for key in &missing {
                runtime.ensure_indexed(key, IndexingService::Instances)?;
            }
            Ok(())
        })?;
        for key in missing {
            self.attach_input(container, runtime, key)?;
        }

        let mut net = container
            .try_borrow_mut()
            .map_err(|_| Error::internal("network is busy"))?;
        let production = self.build_production(&mut net, query)?;
        info!(pattern = query.fqn(), nodes = net.len(), "built query network");
        Ok(production)
    }

    fn attach_input(
        &mut self,
        container: &Rc<RefCell<ReteContainer>>,
        runtime: &dyn QueryRuntimeContext,
        key: InputKey,
    ) -> Result<()> {
        let unbound = Seed::unbound(key.arity());
        let tuples = runtime.enumerate_tuples(&key, &unbound)?;
        let label = runtime.meta_context().key_name(&key);
        let node = container
            .try_borrow_mut()
            .map_err(|_| Error::internal("network is busy"))?
            .add_node(ReteNode::input(label.as_str(), tuples));
        let feeder: Rc<dyn TupleUpdateListener> = Rc::new(InputFeeder {
            container: Rc::downgrade(container),
            node,
        });
        runtime.add_update_listener(&key, unbound, Rc::clone(&feeder))?;
        debug!(key = %label, %node, "attached input node");
        self.inputs.insert(key, node);
        self.feeders.push((key, feeder));
        Ok(())
    }

    /// Unsubscribes every input node from the runtime context.
    ///
    /// # Errors
    ///
    /// Returns the first unsubscription failure.
    pub fn detach(&mut self, runtime: &dyn QueryRuntimeContext) -> Result<()> {
        for (key, feeder) in self.feeders.drain(..) {
            runtime.remove_update_listener(&key, &Seed::unbound(key.arity()), &feeder)?;
        }
        Ok(())
    }

    fn build_production(&mut self, net: &mut ReteContainer, query: &Rc<PQuery>) -> Result<NodeId> {
        if let Some(node) = self.production(query.fqn()) {
            return Ok(node);
        }
        for callee in query.direct_callees() {
            self.build_production(net, &callee)?;
        }

        let plan = self.planner.construct(query)?;
        let production = net.add_node(ReteNode::production(query.fqn()));
        for (index, body_plan) in plan.bodies().iter().enumerate() {
            let body = &query.bodies()[body_plan.body()];
            let root = self.compile_body(net, body, body_plan).map_err(|e| {
                e.with_context(ErrorContext::new().with_source(query.fqn()).with_body(index))
            })?;
            net.connect(root, production, Side::Primary)?;
        }
        debug!(pattern = query.fqn(), %production, bodies = plan.bodies().len(), "built production");
        self.productions.insert(query.fqn().to_string(), production);
        Ok(production)
    }

    // -------------------------------------------------------------------------
    // Body compilation
    // -------------------------------------------------------------------------

    fn unit(&mut self, net: &mut ReteContainer) -> NodeId {
        *self.unit.get_or_insert_with(|| {
            net.add_node(ReteNode::Constant {
                tuples: vec![Tuple::unit()],
            })
        })
    }

    fn materialize(&mut self, net: &mut ReteContainer, stage: &Stage) -> NodeId {
        match stage.node {
            Some(node) => node,
            None => self.unit(net),
        }
    }

    fn compile_body(&mut self, net: &mut ReteContainer, body: &PBody, plan: &BodyPlan) -> Result<NodeId> {
        let mut stage = Stage {
            node: None,
            columns: Vec::new(),
        };
        for step in plan.steps() {
            stage = match step.operation() {
                PlanOperation::Start => Stage {
                    node: None,
                    columns: Vec::new(),
                },
                PlanOperation::Enumerate(id) => self.enumerate(net, body, stage, constraint(body, *id)?)?,
                PlanOperation::Filter(id) => self.filter(net, stage, constraint(body, *id)?)?,
                PlanOperation::AntiJoin(id) => self.anti_join(net, stage, constraint(body, *id)?)?,
                PlanOperation::Aggregate { constraint: id, outer } => {
                    self.aggregate(net, stage, constraint(body, *id)?, *outer)?
                }
                PlanOperation::Project(variables) => {
                    let source = self.materialize(net, &stage);
                    let mask = mask_of(&stage.columns, variables)?;
                    let node = net.add_node(ReteNode::projection(mask));
                    net.connect(source, node, Side::Primary)?;
                    Stage {
                        node: Some(node),
                        columns: variables.clone(),
                    }
                }
            };
            debug_assert_eq!(stage.columns, step.variables());
        }
        stage
            .node
            .ok_or_else(|| Error::internal("body plan has no projection"))
    }

    fn enumerate(
        &mut self,
        net: &mut ReteContainer,
        body: &PBody,
        stage: Stage,
        kind: &ConstraintKind,
    ) -> Result<Stage> {
        let (node, variables) = match kind {
            ConstraintKind::ConstantValue { variable, value } => {
                if let Some(column) = stage.columns.iter().position(|v| v == variable) {
                    return self.filter_with(net, stage, FilterCondition::EqualsConstant(column, value.clone()));
                }
                let node = net.add_node(ReteNode::Constant {
                    tuples: vec![Tuple::from(vec![value.clone()])],
                });
                (node, vec![*variable])
            }
            ConstraintKind::TypeConstraint { key, variables } => {
                let node = self
                    .input(key)
                    .ok_or_else(|| Error::internal(format!("input key {key} has no node")))?;
                (node, variables.clone())
            }
            ConstraintKind::PositivePatternCall { query, actuals } => (self.callee(query)?, actuals.clone()),
            ConstraintKind::BinaryTransitiveClosure { query, source, target } => {
                let callee = self.callee(query)?;
                let node = match self.closures.get(&callee) {
                    Some(&node) => node,
                    None => {
                        let node = net.add_node(ReteNode::TransitiveClosure(ClosureNode::new()));
                        net.connect(callee, node, Side::Primary)?;
                        self.closures.insert(callee, node);
                        node
                    }
                };
                (node, vec![*source, *target])
            }
            ConstraintKind::PathExpression { source, target, path } => {
                (self.path(net, path)?, vec![*source, *target])
            }
            other => {
                return Err(Error::internal(format!(
                    "{} is not enumerable",
                    other.describe(|v| body.name_of(v).to_string())
                )));
            }
        };
        let (node, variables) = distinct_columns(net, node, &variables)?;
        self.join(net, stage, node, variables)
    }

    fn callee(&self, query: &PQuery) -> Result<NodeId> {
        self.production(query.fqn())
            .ok_or_else(|| Error::internal(format!("callee {} has no production", query.fqn())))
    }

    fn path(&self, net: &mut ReteContainer, path: &[FeatureId]) -> Result<NodeId> {
        let mut features = path.iter();
        let first = features
            .next()
            .ok_or_else(|| Error::internal("empty path expression"))?;
        let mut node = self
            .input(&InputKey::Feature(*first))
            .ok_or_else(|| Error::internal(format!("feature {first} has no input node")))?;
        let mut arity = 2;
        for feature in features {
            let next = self
                .input(&InputKey::Feature(*feature))
                .ok_or_else(|| Error::internal(format!("feature {feature} has no input node")))?;
            let join = net.add_node(ReteNode::Join(JoinNode::new(
                TupleMask::new(vec![arity - 1], arity),
                TupleMask::new(vec![0], 2),
            )));
            net.connect(node, join, Side::Primary)?;
            net.connect(next, join, Side::Secondary)?;
            node = join;
            arity += 1;
        }
        if arity == 2 {
            return Ok(node);
        }
        let ends = net.add_node(ReteNode::projection(TupleMask::new(vec![0, arity - 1], arity)));
        net.connect(node, ends, Side::Primary)?;
        Ok(ends)
    }

    /// Joins the stage with a node whose columns are distinct variables.
    fn join(&mut self, net: &mut ReteContainer, stage: Stage, node: NodeId, variables: Vec<VarId>) -> Result<Stage> {
        let Some(left) = stage.node else {
            if stage.columns.is_empty() {
                return Ok(Stage {
                    node: Some(node),
                    columns: variables,
                });
            }
            return Err(Error::internal("unit stage with columns"));
        };
        let shared: Vec<VarId> = variables.iter().filter(|v| stage.columns.contains(v)).copied().collect();
        let primary = mask_of(&stage.columns, &shared)?;
        let secondary = mask_of(&variables, &shared)?;
        let join = net.add_node(ReteNode::Join(JoinNode::new(primary, secondary)));
        net.connect(left, join, Side::Primary)?;
        net.connect(node, join, Side::Secondary)?;
        let mut columns = stage.columns;
        columns.extend(variables.into_iter().filter(|v| !shared.contains(v)));
        Ok(Stage {
            node: Some(join),
            columns,
        })
    }

    fn filter_with(&mut self, net: &mut ReteContainer, stage: Stage, condition: FilterCondition) -> Result<Stage> {
        let source = self.materialize(net, &stage);
        let node = net.add_node(ReteNode::Filter(condition));
        net.connect(source, node, Side::Primary)?;
        Ok(Stage {
            node: Some(node),
            columns: stage.columns,
        })
    }

    fn filter(&mut self, net: &mut ReteContainer, stage: Stage, kind: &ConstraintKind) -> Result<Stage> {
        let column = |v: &VarId| column_of(&stage.columns, *v);
        let condition = match kind {
            ConstraintKind::Inequality { who, with_whom, .. } => {
                FilterCondition::Differ(column(who)?, column(with_whom)?)
            }
            ConstraintKind::Equality { who, with_whom } => FilterCondition::Equal(column(who)?, column(with_whom)?),
            _ => return Err(Error::internal("filter step on a non-filter constraint")),
        };
        self.filter_with(net, stage, condition)
    }

    /// Prepares the tuples of a callee for a join on `actuals`: repeated
    /// actuals become equality filters, then the tuples are projected onto
    /// the first occurrence of each variable in `keep`.
    fn callee_side(net: &mut ReteContainer, callee: NodeId, actuals: &[VarId], keep: &[VarId]) -> Result<NodeId> {
        let mut node = callee;
        for (j, v) in actuals.iter().enumerate() {
            if let Some(i) = actuals[..j].iter().position(|w| w == v) {
                let filter = net.add_node(ReteNode::Filter(FilterCondition::Equal(i, j)));
                net.connect(node, filter, Side::Primary)?;
                node = filter;
            }
        }
        if keep == actuals {
            return Ok(node);
        }
        let project = net.add_node(ReteNode::projection(mask_of(actuals, keep)?));
        net.connect(node, project, Side::Primary)?;
        Ok(project)
    }

    fn anti_join(&mut self, net: &mut ReteContainer, stage: Stage, kind: &ConstraintKind) -> Result<Stage> {
        let ConstraintKind::NegativePatternCall { query, actuals } = kind else {
            return Err(Error::internal("anti-join step on a non-negative constraint"));
        };
        let callee = self.callee(query)?;
        let bound = distinct(actuals.iter().filter(|v| stage.columns.contains(v)).copied());
        let secondary = Self::callee_side(net, callee, actuals, &bound)?;
        let primary = self.materialize(net, &stage);
        let node = net.add_node(ReteNode::Existence(ExistenceNode::new(
            mask_of(&stage.columns, &bound)?,
            TupleMask::identity(bound.len()),
            true,
        )));
        net.connect(primary, node, Side::Primary)?;
        net.connect(secondary, node, Side::Secondary)?;
        Ok(Stage {
            node: Some(node),
            columns: stage.columns,
        })
    }

    fn aggregate(&mut self, net: &mut ReteContainer, stage: Stage, kind: &ConstraintKind, outer: bool) -> Result<Stage> {
        let ConstraintKind::Aggregator {
            operator,
            query,
            actuals,
            aggregated_column,
            result,
        } = kind
        else {
            return Err(Error::internal("aggregate step on a non-aggregator constraint"));
        };
        let callee = self.callee(query)?;
        let source = Self::callee_side(net, callee, actuals, actuals)?;

        let group = distinct(
            actuals
                .iter()
                .enumerate()
                .filter(|(i, v)| Some(*i) != *aggregated_column && stage.columns.contains(v))
                .map(|(_, v)| *v),
        );
        let aggregator = net.add_node(ReteNode::Aggregator(AggregatorNode::new(
            Rc::clone(operator),
            mask_of(actuals, &group)?,
            *aggregated_column,
        )));
        net.connect(source, aggregator, Side::Primary)?;

        let width = group.len();
        let primary_mask = mask_of(&stage.columns, &group)?;
        let secondary_mask = TupleMask::new((0..width).collect(), width + 1);
        let node = match operator.neutral() {
            Some(neutral) if outer => ReteNode::OuterJoin(OuterJoinNode::new(
                primary_mask,
                secondary_mask,
                Tuple::from(vec![neutral]),
            )),
            _ => ReteNode::Join(JoinNode::new(primary_mask, secondary_mask)),
        };
        let left = self.materialize(net, &stage);
        let join = net.add_node(node);
        net.connect(left, join, Side::Primary)?;
        net.connect(aggregator, join, Side::Secondary)?;

        let arity = stage.columns.len();
        let Some(bound) = stage.columns.iter().position(|v| v == result) else {
            let mut columns = stage.columns;
            columns.push(*result);
            return Ok(Stage {
                node: Some(join),
                columns,
            });
        };
        let check = net.add_node(ReteNode::Filter(FilterCondition::Equal(bound, arity)));
        net.connect(join, check, Side::Primary)?;
        let trim = net.add_node(ReteNode::projection(TupleMask::new((0..arity).collect(), arity + 1)));
        net.connect(check, trim, Side::Primary)?;
        Ok(Stage {
            node: Some(trim),
            columns: stage.columns,
        })
    }
}

impl std::fmt::Debug for ReteBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReteBuilder")
            .field("inputs", &self.inputs.len())
            .field("productions", &self.productions)
            .finish_non_exhaustive()
    }
}

// -----------------------------------------------------------------------------
// Column helpers
// -----------------------------------------------------------------------------

fn constraint(body: &PBody, id: ConstraintId) -> Result<&ConstraintKind> {
    body.constraint(id)
        .map(PConstraint::kind)
        .ok_or_else(|| Error::internal(format!("plan refers to deleted constraint {id}")))
}

fn column_of(columns: &[VarId], variable: VarId) -> Result<usize> {
    columns
        .iter()
        .position(|&v| v == variable)
        .ok_or_else(|| Error::internal(format!("variable {variable} is not bound")))
}

fn mask_of(columns: &[VarId], variables: &[VarId]) -> Result<TupleMask> {
    let indices = variables
        .iter()
        .map(|v| column_of(columns, *v))
        .collect::<Result<Vec<_>>>()?;
    Ok(TupleMask::new(indices, columns.len()))
}

fn distinct(variables: impl IntoIterator<Item = VarId>) -> Vec<VarId> {
    let mut out = Vec::new();
    for v in variables {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

/// Turns a node whose columns may repeat a variable into one with distinct
/// columns by filtering on equal values and dropping the repeats.
fn distinct_columns(net: &mut ReteContainer, node: NodeId, variables: &[VarId]) -> Result<(NodeId, Vec<VarId>)> {
    let unique = distinct(variables.iter().copied());
    if unique.len() == variables.len() {
        return Ok((node, unique));
    }
    let node = ReteBuilder::callee_side(net, node, variables, &unique)?;
    Ok((node, unique))
}
