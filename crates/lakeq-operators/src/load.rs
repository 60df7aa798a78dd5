//! Load sink: appends everything upstream to a pool branch.

use std::sync::Arc;

use lakeq_core::batch::{Batch, Puller};
use lakeq_core::error::Result;
use lakeq_core::lake::{DataAdaptor, PoolId};
use lakeq_core::value::Value;

use crate::puller::Parent;

/// Drains its input, commits it as one object, and emits the new commit
/// id as a single string value.
pub struct Load {
    parent: Parent,
    adaptor: Arc<dyn DataAdaptor>,
    pool: PoolId,
    branch: String,
    message: Option<String>,
    done: bool,
}

impl Load {
    pub fn new(
        parent: Parent,
        adaptor: Arc<dyn DataAdaptor>,
        pool: PoolId,
        branch: String,
        message: Option<String>,
    ) -> Self {
        Self {
            parent,
            adaptor,
            pool,
            branch,
            message,
            done: false,
        }
    }
}

impl Puller for Load {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        if done {
            self.parent.pull(true)?;
            return Ok(None);
        }
        let mut values = Vec::new();
        while let Some(batch) = self.parent.pull(false)? {
            values.extend(batch.values);
        }
        let rows = values.len();
        let commit = self
            .adaptor
            .load(self.pool, &self.branch, values, self.message.as_deref())
            .map_err(|e| e.with_context(format!("load into branch {}", self.branch)))?;
        tracing::debug!(pool = %self.pool, branch = %self.branch, rows, commit = %commit, "loaded");
        Ok(Some(Batch::new(vec![Value::Str(commit.to_string())])))
    }
}
