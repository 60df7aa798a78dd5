//! Row filter.

use lakeq_core::batch::{Batch, Puller};
use lakeq_core::error::Result;
use lakeq_core::eval;
use lakeq_core::expr::Expr;

use crate::puller::Parent;

/// Passes the values for which `expr` evaluates to `true`. Empty batches
/// are never emitted; the filter keeps pulling until something survives.
pub struct Filter {
    parent: Parent,
    expr: Expr,
}

impl Filter {
    pub fn new(parent: Parent, expr: Expr) -> Self {
        Self { parent, expr }
    }
}

impl Puller for Filter {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        loop {
            let Some(batch) = self.parent.pull(done)? else {
                return Ok(None);
            };
            let mut keep = Vec::with_capacity(batch.len());
            for v in batch.values {
                if eval::eval_bool(&self.expr, &v, &batch.vars)? {
                    keep.push(v);
                }
            }
            if !keep.is_empty() {
                return Ok(Some(Batch::with_vars(keep, batch.vars)));
            }
        }
    }
}
