//! Aggregation operators used by aggregator constraints and nodes.
//!
//! An operator folds the values of one group. Invertible operators can
//! remove a value from an accumulator; the others are recomputed from the
//! retained values of the group after a removal.

use std::cmp::Ordering;
use std::fmt;

use trellis_foundation::{Error, ErrorKind, Result, Value};

/// Folds a multiset of values into one result.
pub trait AggregationOperator: fmt::Debug {
    /// Name used in diagnostics, e.g. `count`.
    fn name(&self) -> &str;

    /// Returns true if the operator reads an aggregated column. `count`
    /// does not.
    fn requires_column(&self) -> bool {
        true
    }

    /// Result reported for groups without values. `Some` makes the planner
    /// join with a left outer join so that empty groups are reported too.
    fn neutral(&self) -> Option<Value>;

    /// Returns true if [`AggregationOperator::remove`] is supported.
    fn is_invertible(&self) -> bool;

    /// Returns true if `value` can be folded into (or out of) `accumulator`
    /// in place. Otherwise the group is recomputed from its retained values,
    /// so that its result depends only on the multiset it holds.
    fn folds_in_place(&self, accumulator: Option<&Value>, value: &Value) -> bool {
        let _ = (accumulator, value);
        true
    }

    /// Adds a value to an accumulator (`None` for an empty group).
    ///
    /// # Errors
    ///
    /// Returns an error if the value has the wrong kind.
    fn insert(&self, accumulator: Option<&Value>, value: &Value) -> Result<Value>;

    /// Removes a value from an accumulator.
    ///
    /// # Errors
    ///
    /// Returns an error if the value has the wrong kind or the operator is
    /// not invertible.
    fn remove(&self, accumulator: &Value, value: &Value) -> Result<Value>;

    /// Folds a whole group from scratch; `None` for an empty group.
    ///
    /// # Errors
    ///
    /// Returns an error if a value has the wrong kind.
    fn recompute(&self, values: &mut dyn Iterator<Item = &Value>) -> Result<Option<Value>> {
        let mut accumulator: Option<Value> = None;
        for v in values {
            accumulator = Some(self.insert(accumulator.as_ref(), v)?);
        }
        Ok(accumulator)
    }
}

fn not_numeric(operator: &str, value: &Value) -> Error {
    Error::type_mismatch(format!("number for {operator}"), value.kind().to_string())
}

/// Number of matches in the group.
#[derive(Clone, Copy, Debug, Default)]
pub struct Count;

impl AggregationOperator for Count {
    fn name(&self) -> &str {
        "count"
    }

    fn requires_column(&self) -> bool {
        false
    }

    fn neutral(&self) -> Option<Value> {
        Some(Value::Int(0))
    }

    fn is_invertible(&self) -> bool {
        true
    }

    fn insert(&self, accumulator: Option<&Value>, _: &Value) -> Result<Value> {
        Ok(Value::Int(accumulator.and_then(Value::as_int).unwrap_or(0) + 1))
    }

    fn remove(&self, accumulator: &Value, _: &Value) -> Result<Value> {
        Ok(Value::Int(accumulator.as_int().unwrap_or(0) - 1))
    }
}

/// Sum of an integer or float column.
///
/// Integer groups are folded in place with checked arithmetic. A group
/// holding a float sums to a float and is always recomputed: the integers
/// exactly, the floats in [`Value::total_cmp`] order, so the result does not
/// depend on the order values arrived in.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sum;

fn overflow(a: i64, b: i64) -> Error {
    Error::new(ErrorKind::Overflow(format!("{a} plus {b}")))
}

impl AggregationOperator for Sum {
    fn name(&self) -> &str {
        "sum"
    }

    fn neutral(&self) -> Option<Value> {
        Some(Value::Int(0))
    }

    fn is_invertible(&self) -> bool {
        true
    }

    fn folds_in_place(&self, accumulator: Option<&Value>, value: &Value) -> bool {
        matches!(accumulator, None | Some(Value::Int(_))) && matches!(value, Value::Int(_))
    }

    fn insert(&self, accumulator: Option<&Value>, value: &Value) -> Result<Value> {
        match (accumulator, value) {
            (None, Value::Int(b)) => Ok(Value::Int(*b)),
            (Some(Value::Int(a)), Value::Int(b)) => a.checked_add(*b).map(Value::Int).ok_or_else(|| overflow(*a, *b)),
            (None, v) => Ok(self.recompute(&mut std::iter::once(v))?.unwrap_or(Value::Int(0))),
            (Some(acc), v) => Ok(self.recompute(&mut [acc, v].into_iter())?.unwrap_or(Value::Int(0))),
        }
    }

    fn remove(&self, accumulator: &Value, value: &Value) -> Result<Value> {
        match (accumulator, value) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_sub(*b)
                .map(Value::Int)
                .ok_or_else(|| Error::new(ErrorKind::Overflow(format!("{a} minus {b}")))),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => Err(Error::new(
                ErrorKind::Unsupported("float sums are recomputed, not inverted".into()),
            )),
            (_, v) => Err(not_numeric("sum", v)),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn recompute(&self, values: &mut dyn Iterator<Item = &Value>) -> Result<Option<Value>> {
        let mut any = false;
        let mut ints: i64 = 0;
        let mut floats: Vec<f64> = Vec::new();
        for v in values {
            any = true;
            match v {
                Value::Int(b) => ints = ints.checked_add(*b).ok_or_else(|| overflow(ints, *b))?,
                Value::Float(f) => floats.push(*f),
                other => return Err(not_numeric("sum", other)),
            }
        }
        if !any {
            return Ok(None);
        }
        if floats.is_empty() {
            return Ok(Some(Value::Int(ints)));
        }
        floats.sort_by(f64::total_cmp);
        Ok(Some(Value::Float(floats.into_iter().fold(ints as f64, |acc, f| acc + f))))
    }
}

/// Extremum of a column under [`Value::total_cmp`].
#[derive(Clone, Copy, Debug)]
pub struct Extremum {
    keep: Ordering,
}

/// Smallest value of the group.
pub const MIN: Extremum = Extremum {
    keep: Ordering::Less,
};

/// Largest value of the group.
pub const MAX: Extremum = Extremum {
    keep: Ordering::Greater,
};

impl AggregationOperator for Extremum {
    fn name(&self) -> &str {
        if self.keep == Ordering::Less { "min" } else { "max" }
    }

    fn neutral(&self) -> Option<Value> {
        None
    }

    fn is_invertible(&self) -> bool {
        false
    }

    fn insert(&self, accumulator: Option<&Value>, value: &Value) -> Result<Value> {
        Ok(match accumulator {
            Some(acc) if acc.total_cmp(value) != self.keep.reverse() => acc.clone(),
            _ => value.clone(),
        })
    }

    fn remove(&self, _: &Value, _: &Value) -> Result<Value> {
        Err(Error::new(ErrorKind::Unsupported(format!(
            "{} cannot remove values",
            self.name()
        ))))
    }
}
