//! The pattern system: queries, bodies, variables and constraints.
//!
//! A [`PBody`] owns its variables and constraints in arenas addressed by
//! [`VarId`] and [`ConstraintId`]. Constraints refer to variables by id and
//! every variable records the constraints referring to it, so constraints
//! can be deleted and variables unified without dangling references.

pub mod body;
pub mod constraint;
pub mod query;

use std::fmt;

pub use body::{BodyStatus, PBody, PVariable};
pub use constraint::{ConstraintKind, ConstraintTag, PConstraint};
pub use query::{PParameter, PQuery, PQueryBuilder};

/// Index of a variable in its body.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Index of a constraint in its body. Ids grow monotonically and are used
/// for deterministic tie-breaking.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId(pub u32);

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}
