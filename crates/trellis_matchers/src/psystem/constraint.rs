//! Constraint kinds of a pattern body.

use std::fmt;
use std::rc::Rc;

use trellis_foundation::Value;
use trellis_model::FeatureId;

use super::query::PQuery;
use super::{ConstraintId, VarId};
use crate::aggregation::AggregationOperator;
use crate::context::{InputKey, TypeJudgement};

/// What a constraint requires of its variables.
#[derive(Clone)]
pub enum ConstraintKind {
    /// Exposes `variable` as the parameter at `position`.
    ExportedParameter {
        /// The exposed variable.
        variable: VarId,
        /// Parameter name.
        parameter: String,
        /// Parameter position in the query signature.
        position: usize,
    },
    /// The variables form a tuple of the relation of `key`.
    TypeConstraint {
        /// The enumerated relation.
        key: InputKey,
        /// One variable per column.
        variables: Vec<VarId>,
    },
    /// Both variables denote the same value.
    Equality {
        /// Left-hand variable; kept by unification.
        who: VarId,
        /// Right-hand variable.
        with_whom: VarId,
    },
    /// The variables denote different values.
    ///
    /// A weak inequality between a variable and itself is trivially dropped;
    /// a strong one makes the body unsatisfiable.
    Inequality {
        /// Left-hand variable.
        who: VarId,
        /// Right-hand variable.
        with_whom: VarId,
        /// Whether a self-loop is tolerated.
        weak: bool,
    },
    /// The variable is bound to a constant.
    ConstantValue {
        /// The bound variable.
        variable: VarId,
        /// Its value.
        value: Value,
    },
    /// The actuals form a match of another query.
    PositivePatternCall {
        /// The callee.
        query: Rc<PQuery>,
        /// One variable per callee parameter.
        actuals: Vec<VarId>,
    },
    /// The actuals form no match of another query.
    NegativePatternCall {
        /// The callee.
        query: Rc<PQuery>,
        /// One variable per callee parameter.
        actuals: Vec<VarId>,
    },
    /// `target` is reachable from `source` along matches of a binary query.
    BinaryTransitiveClosure {
        /// The binary callee.
        query: Rc<PQuery>,
        /// Start of the path.
        source: VarId,
        /// End of the path.
        target: VarId,
    },
    /// `target` is reachable from `source` along the given features.
    PathExpression {
        /// Start of the path.
        source: VarId,
        /// End of the path.
        target: VarId,
        /// Navigated features, in order.
        path: Vec<FeatureId>,
    },
    /// `result` is the aggregate of the callee matches sharing the bound
    /// actuals.
    Aggregator {
        /// Folding operator.
        operator: Rc<dyn AggregationOperator>,
        /// The callee.
        query: Rc<PQuery>,
        /// One variable per callee parameter.
        actuals: Vec<VarId>,
        /// Callee column holding the aggregated value, if the operator
        /// reads one.
        aggregated_column: Option<usize>,
        /// Receives the aggregate.
        result: VarId,
    },
}

/// Discriminant of a [`ConstraintKind`], used to filter constraints.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConstraintTag {
    /// [`ConstraintKind::ExportedParameter`]
    ExportedParameter,
    /// [`ConstraintKind::TypeConstraint`]
    TypeConstraint,
    /// [`ConstraintKind::Equality`]
    Equality,
    /// [`ConstraintKind::Inequality`]
    Inequality,
    /// [`ConstraintKind::ConstantValue`]
    ConstantValue,
    /// [`ConstraintKind::PositivePatternCall`]
    PositivePatternCall,
    /// [`ConstraintKind::NegativePatternCall`]
    NegativePatternCall,
    /// [`ConstraintKind::BinaryTransitiveClosure`]
    BinaryTransitiveClosure,
    /// [`ConstraintKind::PathExpression`]
    PathExpression,
    /// [`ConstraintKind::Aggregator`]
    Aggregator,
}

impl ConstraintKind {
    /// The discriminant.
    #[must_use]
    pub fn tag(&self) -> ConstraintTag {
        match self {
            Self::ExportedParameter { .. } => ConstraintTag::ExportedParameter,
            Self::TypeConstraint { .. } => ConstraintTag::TypeConstraint,
            Self::Equality { .. } => ConstraintTag::Equality,
            Self::Inequality { .. } => ConstraintTag::Inequality,
            Self::ConstantValue { .. } => ConstraintTag::ConstantValue,
            Self::PositivePatternCall { .. } => ConstraintTag::PositivePatternCall,
            Self::NegativePatternCall { .. } => ConstraintTag::NegativePatternCall,
            Self::BinaryTransitiveClosure { .. } => ConstraintTag::BinaryTransitiveClosure,
            Self::PathExpression { .. } => ConstraintTag::PathExpression,
            Self::Aggregator { .. } => ConstraintTag::Aggregator,
        }
    }

    /// Every variable the constraint mentions, in column order. A variable
    /// may occur more than once.
    #[must_use]
    pub fn variables(&self) -> Vec<VarId> {
        match self {
            Self::ExportedParameter { variable, .. } | Self::ConstantValue { variable, .. } => {
                vec![*variable]
            }
            Self::TypeConstraint { variables, .. } => variables.clone(),
            Self::Equality { who, with_whom } | Self::Inequality { who, with_whom, .. } => {
                vec![*who, *with_whom]
            }
            Self::PositivePatternCall { actuals, .. } | Self::NegativePatternCall { actuals, .. } => {
                actuals.clone()
            }
            Self::BinaryTransitiveClosure { source, target, .. }
            | Self::PathExpression { source, target, .. } => vec![*source, *target],
            Self::Aggregator {
                actuals, result, ..
            } => actuals.iter().copied().chain([*result]).collect(),
        }
    }

    /// Rewrites every occurrence of `old` to `new`.
    pub fn replace_variable(&mut self, old: VarId, new: VarId) {
        let swap = |v: &mut VarId| {
            if *v == old {
                *v = new;
            }
        };
        match self {
            Self::ExportedParameter { variable, .. } | Self::ConstantValue { variable, .. } => {
                swap(variable);
            }
            Self::TypeConstraint { variables, .. } => variables.iter_mut().for_each(swap),
            Self::Equality { who, with_whom } | Self::Inequality { who, with_whom, .. } => {
                swap(who);
                swap(with_whom);
            }
            Self::PositivePatternCall { actuals, .. } | Self::NegativePatternCall { actuals, .. } => {
                actuals.iter_mut().for_each(swap);
            }
            Self::BinaryTransitiveClosure { source, target, .. }
            | Self::PathExpression { source, target, .. } => {
                swap(source);
                swap(target);
            }
            Self::Aggregator {
                actuals, result, ..
            } => {
                actuals.iter_mut().for_each(swap);
                swap(result);
            }
        }
    }

    /// Returns true for constraints the planner can start from or extend a
    /// plan with by enumeration.
    #[must_use]
    pub fn is_enumerable(&self) -> bool {
        matches!(
            self,
            Self::TypeConstraint { .. }
                | Self::ConstantValue { .. }
                | Self::PositivePatternCall { .. }
                | Self::BinaryTransitiveClosure { .. }
                | Self::PathExpression { .. }
        )
    }

    /// Returns true for constraints applied once their variables are bound.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        matches!(
            self,
            Self::Inequality { .. } | Self::NegativePatternCall { .. } | Self::Aggregator { .. }
        )
    }

    /// The judgement of a type constraint.
    #[must_use]
    pub fn judgement(&self) -> Option<TypeJudgement> {
        match self {
            Self::TypeConstraint { key, variables } => {
                Some(TypeJudgement::new(*key, variables.clone()))
            }
            _ => None,
        }
    }

    /// Called query, if any.
    #[must_use]
    pub fn callee(&self) -> Option<&Rc<PQuery>> {
        match self {
            Self::PositivePatternCall { query, .. }
            | Self::NegativePatternCall { query, .. }
            | Self::BinaryTransitiveClosure { query, .. }
            | Self::Aggregator { query, .. } => Some(query),
            _ => None,
        }
    }

    /// Renders the constraint with `name` resolving variables.
    pub fn describe(&self, name: impl Fn(VarId) -> String) -> String {
        let list = |vars: &[VarId]| vars.iter().map(|v| name(*v)).collect::<Vec<_>>().join(", ");
        match self {
            Self::ExportedParameter {
                variable,
                parameter,
                ..
            } => format!("Exported({}, \"{parameter}\")", name(*variable)),
            Self::TypeConstraint { key, variables } => format!("Type<{key}>({})", list(variables.as_slice())),
            Self::Equality { who, with_whom } => {
                format!("Equality({}, {})", name(*who), name(*with_whom))
            }
            Self::Inequality {
                who,
                with_whom,
                weak,
            } => {
                let prefix = if *weak { "Weak" } else { "" };
                format!("{prefix}Inequality({}, {})", name(*who), name(*with_whom))
            }
            Self::ConstantValue { variable, value } => {
                format!("Constant({}, {value})", name(*variable))
            }
            Self::PositivePatternCall { query, actuals } => {
                format!("Find<{}>({})", query.fqn(), list(actuals.as_slice()))
            }
            Self::NegativePatternCall { query, actuals } => {
                format!("Neg<{}>({})", query.fqn(), list(actuals.as_slice()))
            }
            Self::BinaryTransitiveClosure {
                query,
                source,
                target,
            } => format!("Closure<{}>({}, {})", query.fqn(), name(*source), name(*target)),
            Self::PathExpression {
                source,
                target,
                path,
            } => {
                let steps = path.iter().map(ToString::to_string).collect::<Vec<_>>().join(".");
                format!("Path<{steps}>({}, {})", name(*source), name(*target))
            }
            Self::Aggregator {
                operator,
                query,
                actuals,
                result,
                ..
            } => format!(
                "{}<{}>({}) -> {}",
                operator.name(),
                query.fqn(),
                list(actuals.as_slice()),
                name(*result)
            ),
        }
    }
}

impl fmt::Debug for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe(|v| v.to_string()))
    }
}

/// A constraint stored in a body.
#[derive(Clone, Debug)]
pub struct PConstraint {
    id: ConstraintId,
    kind: ConstraintKind,
}

impl PConstraint {
    pub(crate) fn new(id: ConstraintId, kind: ConstraintKind) -> Self {
        Self { id, kind }
    }

    /// Identifier within the body.
    #[must_use]
    pub fn id(&self) -> ConstraintId {
        self.id
    }

    /// What the constraint requires.
    #[must_use]
    pub fn kind(&self) -> &ConstraintKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut ConstraintKind {
        &mut self.kind
    }
}
