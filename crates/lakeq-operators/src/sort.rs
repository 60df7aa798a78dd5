//! Sort and top.
//!
//! Both are staged: nothing is emitted until the input is exhausted. The
//! sort is in memory.

use std::cmp::Ordering;

use lakeq_core::batch::{Batch, Puller};
use lakeq_core::dag::SortExpr;
use lakeq_core::error::Result;
use lakeq_core::eval;
use lakeq_core::expr::Expr;
use lakeq_core::sortkey::Order;
use lakeq_core::value::Value;

use crate::puller::Parent;

/// Compare two key values. Nulls (and missing) are placed first or last
/// regardless of direction; everything else follows `order`.
pub fn compare_keys(a: &Value, b: &Value, order: Order, nulls_first: bool) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) if nulls_first => Ordering::Less,
        (true, false) => Ordering::Greater,
        (false, true) if nulls_first => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => match order {
            Order::Asc => a.total_cmp(b),
            Order::Desc => b.total_cmp(a),
        },
    }
}

/// Sort keys with no explicit key sort the whole value ascending.
fn effective_keys(keys: &[SortExpr]) -> Vec<SortExpr> {
    if keys.is_empty() {
        vec![SortExpr::new(Expr::this(Vec::new()), Order::Asc)]
    } else {
        keys.to_vec()
    }
}

struct Keyed {
    keys: Vec<Value>,
    value: Value,
}

fn keyed(keys: &[SortExpr], value: Value, vars: &[Value]) -> Result<Keyed> {
    let keys = keys
        .iter()
        .map(|k| eval::eval(&k.key, &value, vars))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Keyed { keys, value })
}

fn cmp_keyed(keys: &[SortExpr], nulls_first: bool, a: &Keyed, b: &Keyed) -> Ordering {
    keys.iter()
        .zip(a.keys.iter().zip(&b.keys))
        .map(|(k, (x, y))| compare_keys(x, y, k.order, nulls_first))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

pub struct Sort {
    parent: Parent,
    keys: Vec<SortExpr>,
    nulls_first: bool,
    /// `Some(n)` keeps only the first `n` values (top).
    limit: Option<usize>,
    batch_size: usize,
    sorted: Option<std::vec::IntoIter<Value>>,
}

impl Sort {
    pub fn new(parent: Parent, keys: &[SortExpr], nulls_first: bool, batch_size: usize) -> Self {
        Self {
            parent,
            keys: effective_keys(keys),
            nulls_first,
            limit: None,
            batch_size: batch_size.max(1),
            sorted: None,
        }
    }

    pub fn top(
        parent: Parent,
        limit: usize,
        keys: &[SortExpr],
        nulls_first: bool,
        batch_size: usize,
    ) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new(parent, keys, nulls_first, batch_size)
        }
    }

    fn load(&mut self) -> Result<()> {
        let mut rows = Vec::new();
        while let Some(batch) = self.parent.pull(false)? {
            for v in batch.values {
                rows.push(keyed(&self.keys, v, &batch.vars)?);
            }
            if let Some(n) = self.limit {
                // Trim as we go so top stays bounded.
                if rows.len() > 2 * n.max(1) {
                    self.order(&mut rows);
                    rows.truncate(n);
                }
            }
        }
        self.order(&mut rows);
        if let Some(n) = self.limit {
            rows.truncate(n);
        }
        tracing::trace!(rows = rows.len(), "sort input consumed");
        self.sorted = Some(
            rows.into_iter()
                .map(|k| k.value)
                .collect::<Vec<_>>()
                .into_iter(),
        );
        Ok(())
    }

    fn order(&self, rows: &mut [Keyed]) {
        rows.sort_by(|a, b| cmp_keyed(&self.keys, self.nulls_first, a, b));
    }
}

impl Puller for Sort {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if done {
            if self.sorted.is_none() {
                self.parent.pull(true)?;
            }
            self.sorted = Some(Vec::new().into_iter());
            return Ok(None);
        }
        if self.sorted.is_none() {
            self.load()?;
        }
        let Some(it) = self.sorted.as_mut() else {
            return Ok(None);
        };
        let chunk: Vec<Value> = it.by_ref().take(self.batch_size).collect();
        if chunk.is_empty() {
            return Ok(None);
        }
        Ok(Some(Batch::new(chunk)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puller::{drain, Values};

    fn ints(vals: &[Option<i64>]) -> Vec<Value> {
        vals.iter()
            .map(|v| Value::record([("x", v.map(Value::Int).unwrap_or(Value::Null))]))
            .collect()
    }

    #[test]
    fn nulls_follow_the_flag_not_the_direction() {
        let input = ints(&[Some(2), None, Some(1), Some(3)]);
        let keys = [SortExpr::new(Expr::field("x"), Order::Desc)];
        let mut s = Sort::new(Box::new(Values::new(input.clone(), 2)), &keys, false, 10);
        assert_eq!(
            drain(&mut s).unwrap(),
            ints(&[Some(3), Some(2), Some(1), None])
        );
        let mut s = Sort::new(Box::new(Values::new(input, 2)), &keys, true, 10);
        assert_eq!(
            drain(&mut s).unwrap(),
            ints(&[None, Some(3), Some(2), Some(1)])
        );
    }

    #[test]
    fn top_keeps_the_smallest() {
        let input = ints(&(0..20).rev().map(Some).collect::<Vec<_>>());
        let keys = [SortExpr::new(Expr::field("x"), Order::Asc)];
        let mut t = Sort::top(Box::new(Values::new(input, 3)), 2, &keys, false, 10);
        assert_eq!(drain(&mut t).unwrap(), ints(&[Some(0), Some(1)]));
    }
}
