//! Update directions, timestamps and deltas.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::tuple::Tuple;

/// Direction of an incremental change.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Direction {
    /// The tuple became present.
    Insert,
    /// The tuple is no longer present.
    Revoke,
}

impl Direction {
    /// Returns the opposite direction.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Insert => Self::Revoke,
            Self::Revoke => Self::Insert,
        }
    }

    /// Returns true for [`Direction::Insert`].
    #[must_use]
    pub const fn is_insert(self) -> bool {
        matches!(self, Self::Insert)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "+"),
            Self::Revoke => write!(f, "-"),
        }
    }
}

/// Monotonic input revision a tuple is valid as of.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The timestamp of content that predates any update.
    pub const ZERO: Self = Self(0);

    /// Returns the following revision.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the later of two timestamps.
    #[must_use]
    pub fn join(self, other: Self) -> Self {
        self.max(other)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// One incremental change: a direction, a tuple and the revision it belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Delta {
    /// Insert or revoke.
    pub direction: Direction,
    /// The affected tuple.
    pub tuple: Tuple,
    /// Revision of the change.
    pub timestamp: Timestamp,
}

impl Delta {
    /// Creates a delta.
    #[must_use]
    pub fn new(direction: Direction, tuple: Tuple, timestamp: Timestamp) -> Self {
        Self {
            direction,
            tuple,
            timestamp,
        }
    }

    /// Creates an insertion at [`Timestamp::ZERO`].
    #[must_use]
    pub fn insert(tuple: Tuple) -> Self {
        Self::new(Direction::Insert, tuple, Timestamp::ZERO)
    }

    /// Creates a revocation at [`Timestamp::ZERO`].
    #[must_use]
    pub fn revoke(tuple: Tuple) -> Self {
        Self::new(Direction::Revoke, tuple, Timestamp::ZERO)
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}@{}", self.direction, self.tuple, self.timestamp)
    }
}
