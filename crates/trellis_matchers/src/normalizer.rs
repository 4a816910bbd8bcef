//! Body normalization.
//!
//! Normalization rewrites a body into an equivalent one the planner can work
//! with, in a fixed order:
//!
//! 1. unify variables along equalities
//! 2. drop weak inequalities that became self-loops
//! 3. drop moot equalities
//! 4. optionally add weakened alternatives of type constraints
//! 5. drop type constraints implied by the rest of the body (or only exact
//!    duplicates when type inference is off)
//! 6. check that every remaining constraint is well formed
//!
//! Every removal and derivation is recorded in a [`NormalizationTrace`].

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use trellis_foundation::{Error, ErrorContext, ErrorKind, Result};

use crate::context::{InputKey, MetaContext, TypeJudgement, type_closure};
use crate::psystem::{ConstraintId, ConstraintKind, ConstraintTag, PBody};

// =============================================================================
// Options
// =============================================================================

/// Which optional rewrites the normalizer performs.
#[derive(Clone, Debug)]
pub struct NormalizerOptions {
    /// Remove type constraints implied by other constraints.
    pub calculate_implied_types: bool,
    /// Add the weakened alternatives offered by the meta context.
    pub expand_weakened_alternatives: bool,
}

impl Default for NormalizerOptions {
    fn default() -> Self {
        Self {
            calculate_implied_types: true,
            expand_weakened_alternatives: false,
        }
    }
}

impl NormalizerOptions {
    /// Only mandatory rewrites; duplicate type constraints are still merged.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            calculate_implied_types: false,
            expand_weakened_alternatives: false,
        }
    }

    /// Enables or disables type inference.
    #[must_use]
    pub fn with_calculate_implied_types(mut self, enabled: bool) -> Self {
        self.calculate_implied_types = enabled;
        self
    }

    /// Enables or disables weakened alternatives.
    #[must_use]
    pub fn with_expand_weakened_alternatives(mut self, enabled: bool) -> Self {
        self.expand_weakened_alternatives = enabled;
        self
    }
}

// =============================================================================
// Trace
// =============================================================================

/// Why a constraint was removed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RemovalReason {
    /// An equality between a variable and itself.
    MootEquality,
    /// A weak inequality between a variable and itself.
    WeakInequalitySelfLoop,
    /// A type constraint implied by the rest of the body.
    TypeSubsumed,
    /// A type constraint identical to another one.
    Duplicate,
}

/// A removed constraint.
#[derive(Clone, Debug)]
pub struct Removal {
    /// Body index.
    pub body: usize,
    /// Rendering of the constraint at removal time.
    pub constraint: String,
    /// Why.
    pub reason: RemovalReason,
}

/// A constraint added by normalization.
#[derive(Clone, Debug)]
pub struct Derivation {
    /// Body index.
    pub body: usize,
    /// The new constraint.
    pub constraint: ConstraintId,
    /// Rendering of the new constraint.
    pub description: String,
    /// Constraints it was derived from.
    pub origins: Vec<ConstraintId>,
}

/// Record of what normalization did to the bodies of one query.
#[derive(Clone, Debug, Default)]
pub struct NormalizationTrace {
    removals: Vec<Removal>,
    derivations: Vec<Derivation>,
}

impl NormalizationTrace {
    /// Removed constraints, in removal order.
    #[must_use]
    pub fn removals(&self) -> &[Removal] {
        &self.removals
    }

    /// Derived constraints, in derivation order.
    #[must_use]
    pub fn derivations(&self) -> &[Derivation] {
        &self.derivations
    }

    /// Number of removals with the given reason.
    #[must_use]
    pub fn count(&self, reason: RemovalReason) -> usize {
        self.removals.iter().filter(|r| r.reason == reason).count()
    }
}

// =============================================================================
// Normalizer
// =============================================================================

/// Rewrites bodies in place.
pub struct Normalizer<'a> {
    context: &'a dyn MetaContext,
    options: NormalizerOptions,
}

struct Pass<'n, 'b> {
    context: &'n dyn MetaContext,
    fqn: &'n str,
    index: usize,
    body: &'b mut PBody,
    trace: &'n mut NormalizationTrace,
}

impl<'a> Normalizer<'a> {
    /// Creates a normalizer.
    #[must_use]
    pub fn new(context: &'a dyn MetaContext, options: NormalizerOptions) -> Self {
        Self { context, options }
    }

    /// Normalizes body `index` of the query `fqn`.
    ///
    /// # Errors
    ///
    /// Returns a `Rewriter` error wrapping the underlying failure: an
    /// unsatisfiable strong inequality or a constraint failing its sanity
    /// check.
    pub fn normalize(
        &self,
        fqn: &str,
        index: usize,
        body: &mut PBody,
        trace: &mut NormalizationTrace,
    ) -> Result<()> {
        let mut pass = Pass {
            context: self.context,
            fqn,
            index,
            body,
            trace,
        };
        pass.run(&self.options).map_err(|e| {
            let message = e.to_string();
            Error::rewriter(fqn, message, Some(e))
                .with_context(ErrorContext::new().with_source(fqn).with_body(index))
        })
    }
}

impl Pass<'_, '_> {
    fn run(&mut self, options: &NormalizerOptions) -> Result<()> {
        self.body.check_mutability()?;
        self.unify_equalities()?;
        self.eliminate_weak_inequalities()?;
        self.remove_moot_equalities()?;
        if options.expand_weakened_alternatives {
            self.expand_weakened_alternatives()?;
        }
        if options.calculate_implied_types {
            self.eliminate_inferrable_types()?;
        } else {
            self.eliminate_duplicate_types()?;
        }
        self.check_sanity()
    }

    fn remove(&mut self, id: ConstraintId, reason: RemovalReason) -> Result<()> {
        let constraint = self.body.describe(id);
        debug!(pattern = self.fqn, body = self.index, %constraint, ?reason, "constraint removed");
        self.body.delete_constraint(id)?;
        self.trace.removals.push(Removal {
            body: self.index,
            constraint,
            reason,
        });
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Equalities and inequalities
    // -------------------------------------------------------------------------

    fn unify_equalities(&mut self) -> Result<()> {
        for id in self.body.constraints_of(ConstraintTag::Equality) {
            let Some(c) = self.body.constraint(id) else {
                continue;
            };
            if let ConstraintKind::Equality { who, with_whom } = *c.kind() {
                if who != with_whom {
                    self.body.unify_into(with_whom, who)?;
                }
            }
        }
        Ok(())
    }

    fn eliminate_weak_inequalities(&mut self) -> Result<()> {
        for id in self.body.constraints_of(ConstraintTag::Inequality) {
            let Some(c) = self.body.constraint(id) else {
                continue;
            };
            if let ConstraintKind::Inequality {
                who,
                with_whom,
                weak,
            } = *c.kind()
            {
                if who == with_whom {
                    if !weak {
                        return Err(Error::new(ErrorKind::Unsatisfiable {
                            pattern: self.fqn.to_string(),
                            constraint: self.body.describe(id),
                        }));
                    }
                    self.remove(id, RemovalReason::WeakInequalitySelfLoop)?;
                }
            }
        }
        Ok(())
    }

    fn remove_moot_equalities(&mut self) -> Result<()> {
        for id in self.body.constraints_of(ConstraintTag::Equality) {
            let moot = matches!(
                self.body.constraint(id).map(|c| c.kind()),
                Some(ConstraintKind::Equality { who, with_whom }) if who == with_whom
            );
            if moot {
                self.remove(id, RemovalReason::MootEquality)?;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Type constraints
    // -------------------------------------------------------------------------

    fn type_judgements(&self) -> Vec<(ConstraintId, TypeJudgement)> {
        self.body
            .constraints()
            .filter_map(|c| c.kind().judgement().map(|j| (c.id(), j)))
            .collect()
    }

    fn expand_weakened_alternatives(&mut self) -> Result<()> {
        let existing = self.type_judgements();
        let mut known: HashSet<TypeJudgement> = existing.iter().map(|(_, j)| j.clone()).collect();
        // Alternatives of alternatives are traced to the written constraint.
        let mut queue: VecDeque<(Vec<ConstraintId>, TypeJudgement)> =
            existing.into_iter().map(|(id, j)| (vec![id], j)).collect();
        while let Some((origins, judgement)) = queue.pop_front() {
            for alternative in self.context.weakened_alternatives(&judgement) {
                if !known.insert(alternative.clone()) {
                    continue;
                }
                let id = self
                    .body
                    .type_constraint(alternative.key(), alternative.variables())?;
                let description = self.body.describe(id);
                debug!(pattern = self.fqn, body = self.index, %description, ?origins, "weakened alternative added");
                self.trace.derivations.push(Derivation {
                    body: self.index,
                    constraint: id,
                    description,
                    origins: origins.clone(),
                });
                queue.push_back((origins.clone(), alternative));
            }
        }
        Ok(())
    }

    /// Judgements a non-type constraint guarantees for its variables.
    fn implied_by(&self, kind: &ConstraintKind) -> Vec<TypeJudgement> {
        let unary = |key: Option<InputKey>, v| key.map(|k| TypeJudgement::new(k, vec![v]));
        match kind {
            ConstraintKind::PositivePatternCall { query, actuals } => query
                .parameters()
                .iter()
                .zip(actuals)
                .filter_map(|(p, v)| unary(p.key(), *v))
                .collect(),
            ConstraintKind::BinaryTransitiveClosure {
                query,
                source,
                target,
            } => {
                let params = query.parameters();
                let mut implied = Vec::new();
                implied.extend(params.first().and_then(|p| unary(p.key(), *source)));
                implied.extend(params.get(1).and_then(|p| unary(p.key(), *target)));
                implied
            }
            ConstraintKind::PathExpression {
                source,
                target,
                path,
            } => {
                let mut implied = Vec::new();
                if let (Some(first), Some(last)) = (path.first(), path.last()) {
                    for j in self
                        .context
                        .implied_judgements(&TypeJudgement::new(InputKey::Feature(*first), vec![*source, *target]))
                    {
                        if j.variables() == [*source] {
                            implied.push(j);
                        }
                    }
                    for j in self
                        .context
                        .implied_judgements(&TypeJudgement::new(InputKey::Feature(*last), vec![*source, *target]))
                    {
                        if j.variables() == [*target] {
                            implied.push(j);
                        }
                    }
                }
                implied
            }
            _ => Vec::new(),
        }
    }

    fn eliminate_inferrable_types(&mut self) -> Result<()> {
        let mut retained: HashSet<TypeJudgement> = HashSet::new();
        for c in self.body.constraints() {
            let implied = self.implied_by(c.kind());
            if !implied.is_empty() {
                retained = type_closure(self.context, &retained, implied);
            }
        }

        let context = self.context;
        let mut candidates = self.type_judgements();
        candidates.sort_by(|(a_id, a), (b_id, b)| {
            match context.suggested_elimination_ordering(&a.key(), &b.key()) {
                Ordering::Equal => a_id.cmp(b_id),
                other => other,
            }
        });

        let mut pending: VecDeque<(ConstraintId, TypeJudgement)> = candidates.into_iter().collect();
        while let Some((id, judgement)) = pending.pop_front() {
            let mut subsumed = retained.contains(&judgement);
            if !subsumed {
                let mut by_remaining = HashSet::new();
                for (_, other) in &pending {
                    by_remaining = type_closure(context, &by_remaining, [other.clone()]);
                    if by_remaining.contains(&judgement) {
                        subsumed = true;
                        break;
                    }
                }
            }
            if subsumed {
                self.remove(id, RemovalReason::TypeSubsumed)?;
            } else {
                retained = type_closure(context, &retained, [judgement]);
            }
        }
        Ok(())
    }

    fn eliminate_duplicate_types(&mut self) -> Result<()> {
        let mut seen = HashSet::new();
        for (id, judgement) in self.type_judgements() {
            if !seen.insert(judgement) {
                self.remove(id, RemovalReason::Duplicate)?;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Sanity
    // -------------------------------------------------------------------------

    fn check_sanity(&self) -> Result<()> {
        let mut exported: HashMap<&str, ConstraintId> = HashMap::new();
        for c in self.body.constraints() {
            let id = c.id();
            let invalid = |message: String| Err(Error::invalid_constraint(self.body.describe(id), message));
            match c.kind() {
                ConstraintKind::ExportedParameter { parameter, .. } => {
                    if exported.insert(parameter.as_str(), id).is_some() {
                        return invalid(format!("parameter {parameter} is exported twice"));
                    }
                }
                ConstraintKind::TypeConstraint { key, variables } => {
                    if !self.context.is_enumerable(key) {
                        return invalid(format!("{} is not enumerable", self.context.key_name(key)));
                    }
                    let arity = self.context.arity(key);
                    if variables.len() != arity {
                        return invalid(format!("expected {arity} variables, found {}", variables.len()));
                    }
                }
                ConstraintKind::PositivePatternCall { query, actuals }
                | ConstraintKind::NegativePatternCall { query, actuals } => {
                    if actuals.len() != query.arity() {
                        return invalid(format!(
                            "{} takes {} parameters, {} given",
                            query.fqn(),
                            query.arity(),
                            actuals.len()
                        ));
                    }
                }
                ConstraintKind::BinaryTransitiveClosure { query, .. } => {
                    if query.arity() != 2 {
                        return invalid(format!("{} is not binary", query.fqn()));
                    }
                }
                ConstraintKind::PathExpression { path, .. } => {
                    if path.is_empty() {
                        return invalid("empty path".to_string());
                    }
                    if let Some(f) = path.iter().find(|f| !self.context.is_enumerable(&InputKey::Feature(**f))) {
                        return invalid(format!("{f} is not enumerable"));
                    }
                }
                ConstraintKind::Aggregator {
                    operator,
                    query,
                    actuals,
                    aggregated_column,
                    result,
                } => {
                    if actuals.len() != query.arity() {
                        return invalid(format!(
                            "{} takes {} parameters, {} given",
                            query.fqn(),
                            query.arity(),
                            actuals.len()
                        ));
                    }
                    if actuals.contains(result) {
                        return invalid("result variable is also a call argument".to_string());
                    }
                    match aggregated_column {
                        Some(col) if *col >= actuals.len() => {
                            return invalid(format!("aggregated column {col} out of range"));
                        }
                        None if operator.requires_column() => {
                            return invalid(format!("{} requires an aggregated column", operator.name()));
                        }
                        Some(_) if !operator.requires_column() => {
                            return invalid(format!("{} takes no aggregated column", operator.name()));
                        }
                        _ => {}
                    }
                }
                ConstraintKind::Equality { .. }
                | ConstraintKind::Inequality { .. }
                | ConstraintKind::ConstantValue { .. } => {}
            }
        }
        Ok(())
    }
}
