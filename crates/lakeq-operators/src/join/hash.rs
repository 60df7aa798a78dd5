//! Equi-join through an in-memory hash table on the probe side.

use std::collections::BTreeMap;

use lakeq_core::batch::Puller;
use lakeq_core::error::Result;
use lakeq_core::eval;
use lakeq_core::expr::Expr;
use lakeq_core::value::{OrdValue, Value};

use super::{Layout, Matcher};

/// Table of probe rows by key. Null and missing keys never match.
pub struct HashMatcher {
    driver_key: Expr,
    probe_key: Expr,
    table: BTreeMap<OrdValue, Vec<Value>>,
}

impl HashMatcher {
    /// Keys as declared on the DAG node; `swapped` when the right side
    /// drives.
    pub fn new(left_key: Expr, right_key: Expr, swapped: bool) -> Self {
        let (driver_key, probe_key) = if swapped {
            (right_key, left_key)
        } else {
            (left_key, right_key)
        };
        Self {
            driver_key,
            probe_key,
            table: BTreeMap::new(),
        }
    }
}

impl Matcher for HashMatcher {
    fn load(&mut self, probe: &mut dyn Puller) -> Result<()> {
        let mut rows = 0usize;
        while let Some(batch) = probe.pull(false)? {
            for v in batch.values {
                let k = eval::eval(&self.probe_key, &v, &batch.vars)?;
                if k.is_null() || k.is_error() {
                    continue;
                }
                rows += 1;
                self.table.entry(OrdValue(k)).or_default().push(v);
            }
        }
        tracing::trace!(rows, keys = self.table.len(), "hash join table built");
        Ok(())
    }

    fn probe(
        &self,
        row: &Value,
        vars: &[Value],
        layout: &Layout,
        out: &mut Vec<Value>,
    ) -> Result<bool> {
        let k = eval::eval(&self.driver_key, row, vars)?;
        if k.is_null() || k.is_error() {
            return Ok(false);
        }
        let Some(matches) = self.table.get(&OrdValue(k)) else {
            return Ok(false);
        };
        out.extend(matches.iter().map(|m| layout.compose(row, Some(m))));
        Ok(!matches.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::Join;
    use crate::puller::{drain, Values};
    use lakeq_core::dag::JoinStyle;

    fn users() -> Vec<Value> {
        vec![
            Value::record([("id", Value::Int(1)), ("name", Value::Str("ann".into()))]),
            Value::record([("id", Value::Int(2)), ("name", Value::Str("bob".into()))]),
        ]
    }

    fn orders() -> Vec<Value> {
        vec![
            Value::record([("uid", Value::Int(1)), ("n", Value::Int(10))]),
            Value::record([("uid", Value::Int(1)), ("n", Value::Int(11))]),
            Value::record([("uid", Value::Int(3)), ("n", Value::Int(12))]),
        ]
    }

    fn join(style: JoinStyle) -> Vec<Value> {
        let swapped = style == JoinStyle::Right;
        let matcher = HashMatcher::new(Expr::field("id"), Expr::field("uid"), swapped);
        let mut j = Join::new(
            style,
            Box::new(Values::new(users(), 1)),
            Box::new(Values::new(orders(), 2)),
            Some("u".into()),
            "o".into(),
            matcher,
        );
        drain(&mut j).unwrap()
    }

    #[test]
    fn inner_join_pairs_matching_rows() {
        let out = join(JoinStyle::Inner);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].deref_path(&["o".into(), "n".into()]), Value::Int(10));
        assert_eq!(out[1].deref_path(&["u".into(), "id".into()]), Value::Int(1));
    }

    #[test]
    fn outer_and_anti_keep_unmatched_driver_rows() {
        let left = join(JoinStyle::Left);
        assert_eq!(left.len(), 3);
        assert_eq!(left[2], Value::record([("u", users()[1].clone())]));

        let right = join(JoinStyle::Right);
        assert_eq!(right.len(), 3);
        assert_eq!(right[2], Value::record([("o", orders()[2].clone())]));

        assert_eq!(join(JoinStyle::Anti), vec![users()[1].clone()]);
    }
}
