//! Pattern bodies: arenas of variables and constraints.

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use trellis_foundation::{Error, ErrorKind, Result, Value};
use trellis_model::FeatureId;

use super::constraint::{ConstraintKind, ConstraintTag, PConstraint};
use super::query::PQuery;
use super::{ConstraintId, VarId};
use crate::aggregation::AggregationOperator;
use crate::context::InputKey;

/// Lifecycle of a body. Only mutable bodies accept changes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BodyStatus {
    /// Under construction or normalization.
    #[default]
    Mutable,
    /// Normalized and frozen.
    Ok,
}

/// A variable of a body.
#[derive(Clone, Debug)]
pub struct PVariable {
    name: String,
    is_virtual: bool,
    unified_into: Option<VarId>,
    references: BTreeSet<ConstraintId>,
}

impl PVariable {
    /// Name of the variable; virtual variables get generated names.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true for variables introduced by the system rather than the
    /// pattern author.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    /// The variable this one was merged into, if any.
    #[must_use]
    pub fn unified_into(&self) -> Option<VarId> {
        self.unified_into
    }

    /// Constraints mentioning this variable.
    #[must_use]
    pub fn references(&self) -> &BTreeSet<ConstraintId> {
        &self.references
    }
}

/// One disjunct of a query: a conjunction of constraints over variables.
#[derive(Clone, Debug, Default)]
pub struct PBody {
    variables: Vec<PVariable>,
    by_name: HashMap<String, VarId>,
    constraints: Vec<Option<PConstraint>>,
    status: BodyStatus,
    virtual_count: u32,
}

impl PBody {
    /// Creates an empty mutable body.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Variables
    // -------------------------------------------------------------------------

    /// Returns the variable named `name`, creating it if needed.
    pub fn new_variable(&mut self, name: &str) -> VarId {
        if let Some(&id) = self.by_name.get(name) {
            return self.representative(id);
        }
        let id = self.push_variable(name.to_string(), false);
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Creates a fresh variable with a generated name.
    pub fn new_virtual_variable(&mut self) -> VarId {
        let name = format!(".virtual{{{}}}", self.virtual_count);
        self.virtual_count += 1;
        self.push_variable(name, true)
    }

    fn push_variable(&mut self, name: String, is_virtual: bool) -> VarId {
        let id = VarId(u32::try_from(self.variables.len()).unwrap_or(u32::MAX));
        self.variables.push(PVariable {
            name,
            is_virtual,
            unified_into: None,
            references: BTreeSet::new(),
        });
        id
    }

    /// Looks a named variable up, following unifications.
    ///
    /// # Errors
    ///
    /// Returns `UnknownVariable` if no variable has that name.
    pub fn variable_by_name(&self, name: &str) -> Result<VarId> {
        self.by_name
            .get(name)
            .map(|&id| self.representative(id))
            .ok_or_else(|| Error::new(ErrorKind::UnknownVariable(name.to_string())))
    }

    /// The variable with id `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not created by this body.
    #[must_use]
    pub fn variable(&self, id: VarId) -> &PVariable {
        &self.variables[id.0 as usize]
    }

    /// Name of a variable.
    #[must_use]
    pub fn name_of(&self, id: VarId) -> &str {
        self.variables.get(id.0 as usize).map_or("?", |v| v.name.as_str())
    }

    /// The variable `id` currently stands for after unifications.
    #[must_use]
    pub fn representative(&self, mut id: VarId) -> VarId {
        while let Some(next) = self.variables.get(id.0 as usize).and_then(|v| v.unified_into) {
            id = next;
        }
        id
    }

    /// Variables that have not been merged into another one.
    pub fn variables(&self) -> impl Iterator<Item = (VarId, &PVariable)> + '_ {
        self.variables
            .iter()
            .enumerate()
            .filter(|(_, v)| v.unified_into.is_none())
            .map(|(i, v)| (VarId(u32::try_from(i).unwrap_or(u32::MAX)), v))
    }

    /// Constraints mentioning `variable`.
    #[must_use]
    pub fn references_of(&self, variable: VarId) -> &BTreeSet<ConstraintId> {
        &self.variable(variable).references
    }

    /// Returns true if `constraint` is the only constraint mentioning
    /// `variable`.
    #[must_use]
    pub fn is_local_to(&self, variable: VarId, constraint: ConstraintId) -> bool {
        self.references_of(variable).iter().all(|&c| c == constraint)
    }

    // -------------------------------------------------------------------------
    // Constraints
    // -------------------------------------------------------------------------

    /// Adds a constraint. Variables are resolved to their representatives.
    ///
    /// # Errors
    ///
    /// Returns `Frozen` if the body is frozen and `UnknownVariable` if the
    /// constraint mentions a variable of another body.
    pub fn add_constraint(&mut self, mut kind: ConstraintKind) -> Result<ConstraintId> {
        self.check_mutability()?;
        for v in kind.variables() {
            if v.0 as usize >= self.variables.len() {
                return Err(Error::new(ErrorKind::UnknownVariable(v.to_string())));
            }
            let rep = self.representative(v);
            if rep != v {
                kind.replace_variable(v, rep);
            }
        }
        let id = ConstraintId(u32::try_from(self.constraints.len()).unwrap_or(u32::MAX));
        for v in kind.variables() {
            self.variables[v.0 as usize].references.insert(id);
        }
        self.constraints.push(Some(PConstraint::new(id, kind)));
        Ok(id)
    }

    /// Removes a constraint and returns it.
    ///
    /// # Errors
    ///
    /// Returns `Frozen` if the body is frozen and `Internal` if the
    /// constraint does not exist.
    pub fn delete_constraint(&mut self, id: ConstraintId) -> Result<PConstraint> {
        self.check_mutability()?;
        let removed = self
            .constraints
            .get_mut(id.0 as usize)
            .and_then(Option::take)
            .ok_or_else(|| Error::internal(format!("constraint {id} does not exist")))?;
        for v in removed.kind().variables() {
            self.variables[v.0 as usize].references.remove(&id);
        }
        Ok(removed)
    }

    /// The constraint with id `id`, unless it was deleted.
    #[must_use]
    pub fn constraint(&self, id: ConstraintId) -> Option<&PConstraint> {
        self.constraints.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Live constraints in id order.
    pub fn constraints(&self) -> impl Iterator<Item = &PConstraint> + '_ {
        self.constraints.iter().flatten()
    }

    /// Ids of the live constraints of one kind, in id order.
    #[must_use]
    pub fn constraints_of(&self, tag: ConstraintTag) -> Vec<ConstraintId> {
        self.constraints()
            .filter(|c| c.kind().tag() == tag)
            .map(PConstraint::id)
            .collect()
    }

    /// Distinct variables of a constraint.
    #[must_use]
    pub fn affected_variables(&self, id: ConstraintId) -> BTreeSet<VarId> {
        self.constraint(id)
            .map(|c| c.kind().variables().into_iter().collect())
            .unwrap_or_default()
    }

    /// Exported parameters as `(name, variable)`, in parameter order.
    #[must_use]
    pub fn symbolic_parameters(&self) -> Vec<(String, VarId)> {
        let mut exported: Vec<(usize, String, VarId)> = self
            .constraints()
            .filter_map(|c| match c.kind() {
                ConstraintKind::ExportedParameter {
                    variable,
                    parameter,
                    position,
                } => Some((*position, parameter.clone(), *variable)),
                _ => None,
            })
            .collect();
        exported.sort_by_key(|(position, _, _)| *position);
        exported.into_iter().map(|(_, name, v)| (name, v)).collect()
    }

    /// Rewrites every constraint mentioning `old` to mention `new` instead
    /// and records `old` as merged into `new`.
    ///
    /// # Errors
    ///
    /// Returns `Frozen` if the body is frozen.
    pub fn replace_variable(&mut self, old: VarId, new: VarId) -> Result<()> {
        self.check_mutability()?;
        if old == new {
            return Ok(());
        }
        let references = std::mem::take(&mut self.variables[old.0 as usize].references);
        for id in &references {
            if let Some(Some(c)) = self.constraints.get_mut(id.0 as usize) {
                c.kind_mut().replace_variable(old, new);
            }
        }
        self.variables[new.0 as usize].references.extend(references);
        self.variables[old.0 as usize].unified_into = Some(new);
        Ok(())
    }

    /// Merges `obsolete` into `remaining` and returns the surviving
    /// variable. A named variable survives over a virtual one.
    ///
    /// # Errors
    ///
    /// Returns `Frozen` if the body is frozen.
    pub fn unify_into(&mut self, obsolete: VarId, remaining: VarId) -> Result<VarId> {
        let obsolete = self.representative(obsolete);
        let remaining = self.representative(remaining);
        let (obsolete, remaining) =
            if self.variable(remaining).is_virtual && !self.variable(obsolete).is_virtual {
                (remaining, obsolete)
            } else {
                (obsolete, remaining)
            };
        self.replace_variable(obsolete, remaining)?;
        Ok(remaining)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Current status.
    #[must_use]
    pub fn status(&self) -> BodyStatus {
        self.status
    }

    /// Marks the body as normalized. Later changes fail.
    pub fn freeze(&mut self) {
        self.status = BodyStatus::Ok;
    }

    /// Fails unless the body is mutable.
    ///
    /// # Errors
    ///
    /// Returns `Frozen` for frozen bodies.
    pub fn check_mutability(&self) -> Result<()> {
        match self.status {
            BodyStatus::Mutable => Ok(()),
            BodyStatus::Ok => Err(Error::new(ErrorKind::Frozen(
                "body is already normalized".to_string(),
            ))),
        }
    }

    /// A mutable copy of this body.
    #[must_use]
    pub fn thawed_copy(&self) -> PBody {
        let mut copy = self.clone();
        copy.status = BodyStatus::Mutable;
        copy
    }

    /// Renders a constraint with variable names.
    #[must_use]
    pub fn describe(&self, id: ConstraintId) -> String {
        self.constraint(id).map_or_else(
            || format!("<deleted {id}>"),
            |c| c.kind().describe(|v| self.name_of(v).to_string()),
        )
    }

    // -------------------------------------------------------------------------
    // Constraint shorthands
    // -------------------------------------------------------------------------

    /// Adds `key(variables...)`.
    ///
    /// # Errors
    ///
    /// See [`PBody::add_constraint`].
    pub fn type_constraint(&mut self, key: InputKey, variables: &[VarId]) -> Result<ConstraintId> {
        self.add_constraint(ConstraintKind::TypeConstraint {
            key,
            variables: variables.to_vec(),
        })
    }

    /// Adds `who == with_whom`.
    ///
    /// # Errors
    ///
    /// See [`PBody::add_constraint`].
    pub fn equality(&mut self, who: VarId, with_whom: VarId) -> Result<ConstraintId> {
        self.add_constraint(ConstraintKind::Equality { who, with_whom })
    }

    /// Adds `who != with_whom`.
    ///
    /// # Errors
    ///
    /// See [`PBody::add_constraint`].
    pub fn inequality(&mut self, who: VarId, with_whom: VarId, weak: bool) -> Result<ConstraintId> {
        self.add_constraint(ConstraintKind::Inequality {
            who,
            with_whom,
            weak,
        })
    }

    /// Adds `variable == value`.
    ///
    /// # Errors
    ///
    /// See [`PBody::add_constraint`].
    pub fn constant(&mut self, variable: VarId, value: impl Into<Value>) -> Result<ConstraintId> {
        self.add_constraint(ConstraintKind::ConstantValue {
            variable,
            value: value.into(),
        })
    }

    /// Adds `find query(actuals...)`.
    ///
    /// # Errors
    ///
    /// See [`PBody::add_constraint`].
    pub fn call(&mut self, query: &Rc<PQuery>, actuals: &[VarId]) -> Result<ConstraintId> {
        self.add_constraint(ConstraintKind::PositivePatternCall {
            query: Rc::clone(query),
            actuals: actuals.to_vec(),
        })
    }

    /// Adds `neg find query(actuals...)`.
    ///
    /// # Errors
    ///
    /// See [`PBody::add_constraint`].
    pub fn negative_call(&mut self, query: &Rc<PQuery>, actuals: &[VarId]) -> Result<ConstraintId> {
        self.add_constraint(ConstraintKind::NegativePatternCall {
            query: Rc::clone(query),
            actuals: actuals.to_vec(),
        })
    }

    /// Adds `query+(source, target)`.
    ///
    /// # Errors
    ///
    /// See [`PBody::add_constraint`].
    pub fn transitive_closure(
        &mut self,
        query: &Rc<PQuery>,
        source: VarId,
        target: VarId,
    ) -> Result<ConstraintId> {
        self.add_constraint(ConstraintKind::BinaryTransitiveClosure {
            query: Rc::clone(query),
            source,
            target,
        })
    }

    /// Adds a feature path from `source` to `target`.
    ///
    /// # Errors
    ///
    /// See [`PBody::add_constraint`].
    pub fn path(&mut self, source: VarId, path: &[FeatureId], target: VarId) -> Result<ConstraintId> {
        self.add_constraint(ConstraintKind::PathExpression {
            source,
            target,
            path: path.to_vec(),
        })
    }

    /// Adds `result == operator query(actuals...)`.
    ///
    /// # Errors
    ///
    /// See [`PBody::add_constraint`].
    pub fn aggregate(
        &mut self,
        operator: Rc<dyn AggregationOperator>,
        query: &Rc<PQuery>,
        actuals: &[VarId],
        aggregated_column: Option<usize>,
        result: VarId,
    ) -> Result<ConstraintId> {
        self.add_constraint(ConstraintKind::Aggregator {
            operator,
            query: Rc::clone(query),
            actuals: actuals.to_vec(),
            aggregated_column,
            result,
        })
    }
}
