//! Matches of a pattern.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use trellis_foundation::{Tuple, Value};
use trellis_matchers::PQuery;

/// One row of a query result, addressable by parameter position or name.
///
/// A value of [`Value::Nil`] marks an unset position in a partial match
/// used to filter other matches with [`Match::is_compatible_with`].
#[derive(Clone)]
pub struct Match {
    query: Rc<PQuery>,
    tuple: Tuple,
}

impl Match {
    /// Wraps a result tuple of `query`.
    #[must_use]
    pub fn new(query: Rc<PQuery>, tuple: Tuple) -> Self {
        Self { query, tuple }
    }

    /// A partial match with every parameter unset.
    #[must_use]
    pub fn empty(query: Rc<PQuery>) -> Self {
        let tuple = std::iter::repeat_n(Value::Nil, query.arity()).collect();
        Self { query, tuple }
    }

    /// Value at a parameter position.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<&Value> {
        self.tuple.get(position)
    }

    /// Value of a named parameter.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.query.position_of(name).and_then(|i| self.tuple.get(i))
    }

    /// Returns a copy with the named parameter set to `value`, or `None`
    /// for an unknown name.
    #[must_use]
    pub fn with(&self, name: &str, value: impl Into<Value>) -> Option<Self> {
        let position = self.query.position_of(name)?;
        let mut values = self.tuple.values().to_vec();
        values[position] = value.into();
        Some(Self::new(Rc::clone(&self.query), Tuple::from(values)))
    }

    /// Fully qualified name of the pattern.
    #[must_use]
    pub fn pattern_name(&self) -> &str {
        self.query.fqn()
    }

    /// Parameter names in position order.
    #[must_use]
    pub fn parameter_names(&self) -> Vec<String> {
        self.query.parameter_names()
    }

    /// The pattern this match belongs to.
    #[must_use]
    pub fn query(&self) -> &Rc<PQuery> {
        &self.query
    }

    /// Returns true if both belong to the same pattern and agree on every
    /// position set in both.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Match) -> bool {
        self.pattern_name() == other.pattern_name()
            && self
                .tuple
                .values()
                .iter()
                .zip(other.tuple.values())
                .all(|(a, b)| a.is_nil() || b.is_nil() || a == b)
    }

    /// The underlying tuple.
    #[must_use]
    pub fn to_tuple(&self) -> Tuple {
        self.tuple.clone()
    }

    pub(crate) fn total_cmp(&self, other: &Self) -> Ordering {
        self.tuple
            .values()
            .iter()
            .zip(other.tuple.values())
            .map(|(a, b)| a.total_cmp(b))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialEq for Match {
    fn eq(&self, other: &Self) -> bool {
        self.pattern_name() == other.pattern_name() && self.tuple == other.tuple
    }
}

impl Eq for Match {}

impl Hash for Match {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pattern_name().hash(state);
        self.tuple.hash(state);
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Match<{}>{{", self.pattern_name())?;
        for (i, (name, value)) in self
            .query
            .parameter_names()
            .iter()
            .zip(self.tuple.values())
            .enumerate()
        {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "\"{name}\"={value}")?;
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
