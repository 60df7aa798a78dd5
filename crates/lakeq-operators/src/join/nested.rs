//! Join on an arbitrary condition: every probe row is tried against every
//! driver row. A missing condition makes it a cross product.

use lakeq_core::batch::Puller;
use lakeq_core::error::Result;
use lakeq_core::eval;
use lakeq_core::expr::Expr;
use lakeq_core::value::Value;

use super::{Layout, Matcher};

/// The condition is evaluated against the composed output row.
pub struct NestedMatcher {
    cond: Option<Expr>,
    rows: Vec<Value>,
}

impl NestedMatcher {
    pub fn new(cond: Option<Expr>) -> Self {
        Self {
            cond,
            rows: Vec::new(),
        }
    }
}

impl Matcher for NestedMatcher {
    fn load(&mut self, probe: &mut dyn Puller) -> Result<()> {
        while let Some(batch) = probe.pull(false)? {
            self.rows.extend(batch.values);
        }
        Ok(())
    }

    fn probe(
        &self,
        row: &Value,
        vars: &[Value],
        layout: &Layout,
        out: &mut Vec<Value>,
    ) -> Result<bool> {
        let mut hit = false;
        for p in &self.rows {
            let joined = layout.compose(row, Some(p));
            let keep = match &self.cond {
                Some(c) => eval::eval_bool(c, &joined, vars)?,
                None => true,
            };
            if keep {
                hit = true;
                out.push(joined);
            }
        }
        Ok(hit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::Join;
    use crate::puller::{drain, Values};
    use lakeq_core::dag::JoinStyle;
    use lakeq_core::expr::BinOp;

    fn ints(name: &str, vals: &[i64]) -> Vec<Value> {
        vals.iter()
            .map(|v| Value::record([(name, Value::Int(*v))]))
            .collect()
    }

    #[test]
    fn cross_join_pairs_everything() {
        let mut j = Join::new(
            JoinStyle::Cross,
            Box::new(Values::new(ints("a", &[1, 2]), 1)),
            Box::new(Values::new(ints("b", &[3, 4, 5]), 2)),
            Some("l".into()),
            "r".into(),
            NestedMatcher::new(None),
        );
        assert_eq!(drain(&mut j).unwrap().len(), 6);
    }

    #[test]
    fn condition_sees_the_joined_row() {
        let cond = Expr::binary(
            BinOp::Lt,
            Expr::path(&["l", "a"]),
            Expr::path(&["r", "b"]),
        );
        let mut j = Join::new(
            JoinStyle::Inner,
            Box::new(Values::new(ints("a", &[1, 4]), 1)),
            Box::new(Values::new(ints("b", &[2, 3]), 2)),
            Some("l".into()),
            "r".into(),
            NestedMatcher::new(Some(cond)),
        );
        assert_eq!(drain(&mut j).unwrap().len(), 2);
    }
}
