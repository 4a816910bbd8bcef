//! Input keys, type judgements and the meta context describing the type
//! system to the normalizer.

use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use trellis_model::{ClassId, DataTypeId, FeatureId, FeatureKind, Metamodel};

use crate::psystem::VarId;

// =============================================================================
// Input keys
// =============================================================================

/// A relation the base index can enumerate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InputKey {
    /// Transitive instances of a class. Arity 1.
    Class(ClassId),
    /// Values of a data type present in some slot. Arity 1.
    DataType(DataTypeId),
    /// `(holder, value)` pairs of a feature. Arity 2.
    Feature(FeatureId),
}

impl InputKey {
    /// Number of columns of the relation.
    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::Class(_) | Self::DataType(_) => 1,
            Self::Feature(_) => 2,
        }
    }
}

impl fmt::Display for InputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class(c) => write!(f, "{c}"),
            Self::DataType(d) => write!(f, "{d}"),
            Self::Feature(x) => write!(f, "{x}"),
        }
    }
}

/// The statement that a tuple of variables is in the relation of a key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeJudgement {
    key: InputKey,
    variables: Vec<VarId>,
}

impl TypeJudgement {
    /// Creates a judgement.
    #[must_use]
    pub fn new(key: InputKey, variables: Vec<VarId>) -> Self {
        Self { key, variables }
    }

    /// The judged relation.
    #[must_use]
    pub fn key(&self) -> InputKey {
        self.key
    }

    /// The judged variables, one per column.
    #[must_use]
    pub fn variables(&self) -> &[VarId] {
        &self.variables
    }
}

// =============================================================================
// Meta context
// =============================================================================

/// What the normalizer and planner need to know about the type system.
pub trait MetaContext {
    /// Returns true if the base index can enumerate the relation of `key`.
    fn is_enumerable(&self, key: &InputKey) -> bool;

    /// Arity of the relation of `key`.
    fn arity(&self, key: &InputKey) -> usize {
        key.arity()
    }

    /// Judgements that directly follow from `judgement`.
    fn implied_judgements(&self, judgement: &TypeJudgement) -> Vec<TypeJudgement>;

    /// Judgements that are implied by `judgement` and may help planning
    /// when added as extra constraints.
    fn weakened_alternatives(&self, judgement: &TypeJudgement) -> Vec<TypeJudgement>;

    /// Order in which type constraints are considered for elimination;
    /// keys ordered first are eliminated first.
    fn suggested_elimination_ordering(&self, a: &InputKey, b: &InputKey) -> Ordering;

    /// Human readable name of a key.
    fn key_name(&self, key: &InputKey) -> String {
        key.to_string()
    }
}

/// Extends `preexisting` with `added` and everything they imply.
#[must_use]
pub fn type_closure(context: &dyn MetaContext, preexisting: &HashSet<TypeJudgement>, added: impl IntoIterator<Item = TypeJudgement>) -> HashSet<TypeJudgement> {
    let mut closure = preexisting.clone();
    let mut queue: VecDeque<TypeJudgement> = added.into_iter().collect();
    while let Some(judgement) = queue.pop_front() {
        if closure.insert(judgement.clone()) {
            queue.extend(context.implied_judgements(&judgement));
        }
    }
    closure
}

/// Meta context over a [`Metamodel`].
///
/// Classes imply their direct supertypes; a feature implies its host class
/// on the holder column and its target class or data type on the value
/// column. A reference with an opposite offers the opposite reference, with
/// swapped columns, as weakened alternative.
#[derive(Clone, Debug)]
pub struct ModelMetaContext {
    metamodel: Arc<Metamodel>,
}

impl ModelMetaContext {
    /// Creates a meta context.
    #[must_use]
    pub fn new(metamodel: Arc<Metamodel>) -> Self {
        Self { metamodel }
    }

    /// The described metamodel.
    #[must_use]
    pub fn metamodel(&self) -> &Arc<Metamodel> {
        &self.metamodel
    }
}

fn rank(key: &InputKey) -> (u8, u32) {
    match key {
        InputKey::Class(c) => (0, c.0),
        InputKey::DataType(d) => (1, d.0),
        InputKey::Feature(f) => (2, f.0),
    }
}

impl MetaContext for ModelMetaContext {
    fn is_enumerable(&self, key: &InputKey) -> bool {
        match key {
            InputKey::Class(c) => self.metamodel.class(*c).is_ok(),
            InputKey::DataType(d) => self.metamodel.data_type(*d).is_ok(),
            InputKey::Feature(f) => self.metamodel.feature(*f).is_ok(),
        }
    }

    fn implied_judgements(&self, judgement: &TypeJudgement) -> Vec<TypeJudgement> {
        let vars = judgement.variables();
        match judgement.key() {
            InputKey::Class(c) => self
                .metamodel
                .class(c)
                .map(|schema| {
                    schema
                        .supertypes
                        .iter()
                        .map(|s| TypeJudgement::new(InputKey::Class(*s), vars.to_vec()))
                        .collect()
                })
                .unwrap_or_default(),
            InputKey::DataType(_) => Vec::new(),
            InputKey::Feature(f) => {
                let (Ok(schema), [holder, value]) = (self.metamodel.feature(f), vars) else {
                    return Vec::new();
                };
                let target = match schema.kind {
                    FeatureKind::Attribute(dt) => InputKey::DataType(dt),
                    FeatureKind::Reference { target, .. } => InputKey::Class(target),
                };
                vec![
                    TypeJudgement::new(InputKey::Class(schema.host), vec![*holder]),
                    TypeJudgement::new(target, vec![*value]),
                ]
            }
        }
    }

    fn weakened_alternatives(&self, judgement: &TypeJudgement) -> Vec<TypeJudgement> {
        let InputKey::Feature(f) = judgement.key() else {
            return Vec::new();
        };
        match (self.metamodel.feature(f), judgement.variables()) {
            (Ok(schema), [holder, value]) => schema
                .opposite
                .map(|o| TypeJudgement::new(InputKey::Feature(o), vec![*value, *holder]))
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }

    fn suggested_elimination_ordering(&self, a: &InputKey, b: &InputKey) -> Ordering {
        rank(a).cmp(&rank(b))
    }

    fn key_name(&self, key: &InputKey) -> String {
        match key {
            InputKey::Class(c) => self.metamodel.class_name(*c),
            InputKey::DataType(d) => self.metamodel.data_type_name(*d),
            InputKey::Feature(f) => self.metamodel.feature_name(*f),
        }
    }
}
