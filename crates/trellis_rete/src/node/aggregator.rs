//! Grouped aggregation.

use std::collections::HashMap;
use std::rc::Rc;

use trellis_foundation::{Delta, Direction, Error, Result, Timestamp, Tuple, TupleMask, Value};
use trellis_matchers::AggregationOperator;

#[derive(Clone, Debug, Default)]
struct Group {
    tuples: usize,
    values: HashMap<Value, usize>,
    accumulator: Option<Value>,
    timestamp: Timestamp,
}

impl Group {
    fn retained(&self) -> impl Iterator<Item = &Value> + '_ {
        self.values
            .iter()
            .flat_map(|(v, n)| std::iter::repeat_n(v, *n))
    }
}

/// Folds the tuples of each group into one `(group..., result)` row.
///
/// A group's row is replaced (revoke old, insert new) whenever its result
/// changes, and revoked once the group has no tuples left.
#[derive(Debug)]
pub struct AggregatorNode {
    operator: Rc<dyn AggregationOperator>,
    group_mask: TupleMask,
    column: Option<usize>,
    groups: HashMap<Tuple, Group>,
}

impl AggregatorNode {
    /// Creates an aggregator grouping by `group_mask` and folding `column`
    /// (`None` for operators that only count).
    #[must_use]
    pub fn new(operator: Rc<dyn AggregationOperator>, group_mask: TupleMask, column: Option<usize>) -> Self {
        Self {
            operator,
            group_mask,
            column,
            groups: HashMap::new(),
        }
    }

    /// The operator.
    #[must_use]
    pub fn operator(&self) -> &Rc<dyn AggregationOperator> {
        &self.operator
    }

    fn row(group: &Tuple, result: &Value) -> Tuple {
        group.concat(&Tuple::from(vec![result.clone()]))
    }

    fn aggregated(&self, tuple: &Tuple) -> Result<Value> {
        match self.column {
            Some(c) => tuple
                .get(c)
                .cloned()
                .ok_or_else(|| Error::internal(format!("aggregated column {c} missing from {tuple}"))),
            None => Ok(Value::Nil),
        }
    }

    pub(crate) fn update(&mut self, delta: &Delta) -> Result<Vec<Delta>> {
        let key = self.group_mask.transform(&delta.tuple);
        let value = self.aggregated(&delta.tuple)?;
        let operator = Rc::clone(&self.operator);
        let group = self.groups.entry(key.clone()).or_default();
        let before = group.accumulator.clone();

        // The new accumulator is computed before the group changes, so a
        // failing operator leaves the group as it was.
        match delta.direction {
            Direction::Insert => {
                let computed = if operator.folds_in_place(before.as_ref(), &value) {
                    operator.insert(before.as_ref(), &value)
                } else {
                    operator
                        .recompute(&mut group.retained().chain(std::iter::once(&value)))
                        .and_then(|acc| acc.ok_or_else(|| Error::internal("recomputed a non-empty group to nothing")))
                };
                let accumulator = match computed {
                    Ok(accumulator) => accumulator,
                    Err(e) => {
                        if group.tuples == 0 {
                            self.groups.remove(&key);
                        }
                        return Err(e);
                    }
                };
                group.tuples += 1;
                *group.values.entry(value).or_insert(0) += 1;
                group.accumulator = Some(accumulator);
            }
            Direction::Revoke => {
                if !group.values.contains_key(&value) {
                    let message = format!("aggregated value {value} of {} was never inserted", delta.tuple);
                    if group.tuples == 0 {
                        self.groups.remove(&key);
                    }
                    return Err(Error::internal(message));
                }
                let accumulator = match &before {
                    _ if group.tuples == 1 => None,
                    Some(acc) if operator.is_invertible() && operator.folds_in_place(Some(acc), &value) => {
                        Some(operator.remove(acc, &value)?)
                    }
                    _ => {
                        let mut skipped = false;
                        let mut rest = group.retained().filter(|v| {
                            if !skipped && **v == value {
                                skipped = true;
                                false
                            } else {
                                true
                            }
                        });
                        operator.recompute(&mut rest)?
                    }
                };
                if let Some(n) = group.values.get_mut(&value) {
                    *n -= 1;
                    if *n == 0 {
                        group.values.remove(&value);
                    }
                }
                group.tuples -= 1;
                group.accumulator = accumulator;
            }
        }
        group.timestamp = delta.timestamp;

        let after = group.accumulator.clone();
        if group.tuples == 0 {
            self.groups.remove(&key);
        }

        let mut out = Vec::new();
        if before != after {
            if let Some(old) = before {
                out.push(Delta::new(Direction::Revoke, Self::row(&key, &old), delta.timestamp));
            }
            if let Some(new) = after {
                out.push(Delta::new(Direction::Insert, Self::row(&key, &new), delta.timestamp));
            }
        }
        Ok(out)
    }

    pub(crate) fn content(&self) -> Vec<(Tuple, Timestamp)> {
        self.groups
            .iter()
            .filter_map(|(key, g)| g.accumulator.as_ref().map(|acc| (Self::row(key, acc), g.timestamp)))
            .collect()
    }
}
