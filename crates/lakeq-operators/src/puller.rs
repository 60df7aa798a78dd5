//! Small pieces shared by the primitives.

use std::sync::Arc;

use lakeq_core::batch::{Batch, Puller};
use lakeq_core::error::{Error, Result};
use lakeq_core::expr::Expr;
use lakeq_core::value::Value;

/// Upstream handle of a primitive.
pub type Parent = Box<dyn Puller>;

/// Emits a fixed set of values in batches.
pub struct Values {
    values: std::vec::IntoIter<Value>,
    vars: Arc<[Value]>,
    batch_size: usize,
}

impl Values {
    pub fn new(values: Vec<Value>, batch_size: usize) -> Self {
        Self::with_vars(values, Arc::from(Vec::new()), batch_size)
    }

    pub fn with_vars(values: Vec<Value>, vars: Arc<[Value]>, batch_size: usize) -> Self {
        Self {
            values: values.into_iter(),
            vars,
            batch_size: batch_size.max(1),
        }
    }
}

impl Puller for Values {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if done {
            self.values = Vec::new().into_iter();
            return Ok(None);
        }
        let chunk: Vec<Value> = self.values.by_ref().take(self.batch_size).collect();
        if chunk.is_empty() {
            return Ok(None);
        }
        Ok(Some(Batch::with_vars(chunk, self.vars.clone())))
    }
}

/// Pull `p` to the end and return everything it produced.
pub fn drain(p: &mut dyn Puller) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    while let Some(batch) = p.pull(false)? {
        out.extend(batch.values);
    }
    Ok(out)
}

/// Field path an assignment writes to. The analyzer only produces path
/// left-hand sides, so anything else is a defect.
pub(crate) fn lhs_path(lhs: &Expr) -> Result<Vec<String>> {
    lhs.as_path()
        .map(<[String]>::to_vec)
        .ok_or_else(|| Error::internal(format!("assignment target is not a path: {lhs}")))
}

pub(crate) fn poisoned() -> Error {
    Error::Exec("shared operator state poisoned by a panicked worker".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_come_out_in_batches() {
        let mut p = Values::new((0..5).map(Value::Int).collect(), 2);
        let sizes: Vec<usize> = std::iter::from_fn(|| p.pull(false).ok().flatten())
            .map(|b| b.len())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }
}
