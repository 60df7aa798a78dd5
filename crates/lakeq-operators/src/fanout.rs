//! Fan-out of one upstream to several branches: fork, scatter, switch.
//!
//! The branches share the upstream through a mutex. A branch with nothing
//! queued pulls the upstream itself and routes what it gets: a fork queues
//! a copy for every live branch, a scatter keeps the whole batch for the
//! branch that asked, a switch splits the batch by case. The upstream is
//! released once every branch is done (or dropped).
//!
//! Fork and switch queues are unbounded. Outputs are drained one after
//! another on a single thread, so a branch that has not been pulled yet
//! holds everything its siblings have read; a bound would turn that into
//! a deadlock. A branch stops queueing as soon as it is released, and a
//! scatter never queues for a branch other than the one pulling.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use lakeq_core::batch::{Batch, Puller};
use lakeq_core::error::Result;
use lakeq_core::eval;
use lakeq_core::expr::Expr;
use lakeq_core::value::Value;

use crate::puller::{poisoned, Parent};

/// How a switch picks the branch for a value.
pub enum Cases {
    /// Compare the discriminant against each constant case key; a `None`
    /// key is the default.
    Values {
        expr: Expr,
        keys: Vec<Option<Value>>,
    },
    /// First case whose guard is true; a `None` guard is the default.
    Guards(Vec<Option<Expr>>),
}

impl Cases {
    fn len(&self) -> usize {
        match self {
            Cases::Values { keys, .. } => keys.len(),
            Cases::Guards(guards) => guards.len(),
        }
    }

    fn select(&self, v: &Value, vars: &[Value]) -> Result<Option<usize>> {
        match self {
            Cases::Values { expr, keys } => {
                let d = eval::eval(expr, v, vars)?;
                let hit = keys
                    .iter()
                    .position(|k| k.as_ref().map(|k| k.loose_eq(&d)).unwrap_or(false));
                Ok(hit.or_else(|| keys.iter().position(Option::is_none)))
            }
            Cases::Guards(guards) => {
                for (i, g) in guards.iter().enumerate() {
                    if let Some(g) = g {
                        if eval::eval_bool(g, v, vars)? {
                            return Ok(Some(i));
                        }
                    }
                }
                Ok(guards.iter().position(Option::is_none))
            }
        }
    }
}

enum Route {
    Broadcast,
    Deal,
    Switch(Cases),
}

struct Shared {
    parent: Parent,
    route: Route,
    queues: Vec<VecDeque<Batch>>,
    done: Vec<bool>,
    eof: bool,
}

impl Shared {
    fn route(&mut self, batch: Batch, requester: usize) -> Result<()> {
        match &self.route {
            Route::Broadcast => {
                for (q, done) in self.queues.iter_mut().zip(&self.done) {
                    if !done {
                        q.push_back(batch.clone());
                    }
                }
            }
            Route::Deal => self.queues[requester].push_back(batch),
            Route::Switch(cases) => {
                let mut parts: Vec<Vec<Value>> = vec![Vec::new(); self.queues.len()];
                for v in batch.values {
                    if let Some(i) = cases.select(&v, &batch.vars)? {
                        if !self.done[i] {
                            parts[i].push(v);
                        }
                    }
                }
                for (q, part) in self.queues.iter_mut().zip(parts) {
                    if !part.is_empty() {
                        q.push_back(Batch::with_vars(part, batch.vars.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    fn release(&mut self, i: usize) -> Result<()> {
        self.done[i] = true;
        self.queues[i].clear();
        if !self.eof && self.done.iter().all(|d| *d) {
            self.eof = true;
            self.parent.pull(true)?;
        }
        Ok(())
    }
}

/// One output of a fan-out.
pub struct Branch {
    shared: Arc<Mutex<Shared>>,
    index: usize,
    finished: bool,
}

impl Puller for Branch {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if self.finished {
            return Ok(None);
        }
        let mut shared = self.shared.lock().map_err(|_| poisoned())?;
        if done {
            self.finished = true;
            shared.release(self.index)?;
            return Ok(None);
        }
        loop {
            if let Some(batch) = shared.queues[self.index].pop_front() {
                return Ok(Some(batch));
            }
            if shared.eof {
                self.finished = true;
                return Ok(None);
            }
            match shared.parent.pull(false)? {
                Some(batch) => shared.route(batch, self.index)?,
                None => shared.eof = true,
            }
        }
    }
}

impl Drop for Branch {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Ok(mut shared) = self.shared.lock() {
            if let Err(e) = shared.release(self.index) {
                tracing::warn!(error = %e, "releasing fan-out upstream failed");
            }
        }
    }
}

fn branches(parent: Parent, n: usize, route: Route) -> Vec<Branch> {
    let shared = Arc::new(Mutex::new(Shared {
        parent,
        route,
        queues: (0..n).map(|_| VecDeque::new()).collect(),
        done: vec![false; n],
        eof: false,
    }));
    (0..n)
        .map(|index| Branch {
            shared: shared.clone(),
            index,
            finished: false,
        })
        .collect()
}

/// Every branch sees every value.
pub fn fork(parent: Parent, n: usize) -> Vec<Branch> {
    branches(parent, n, Route::Broadcast)
}

/// Each upstream batch goes to exactly one branch.
pub fn scatter(parent: Parent, n: usize) -> Vec<Branch> {
    branches(parent, n, Route::Deal)
}

/// One branch per case; each value goes to at most one of them.
pub fn switch(parent: Parent, cases: Cases) -> Vec<Branch> {
    let n = cases.len();
    branches(parent, n, Route::Switch(cases))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puller::{drain, Values};
    use lakeq_core::expr::BinOp;

    fn ints(vals: &[i64]) -> Vec<Value> {
        vals.iter().copied().map(Value::Int).collect()
    }

    fn queued(b: &Branch) -> Vec<usize> {
        let shared = b.shared.lock().unwrap();
        shared.queues.iter().map(VecDeque::len).collect()
    }

    #[test]
    fn fork_copies_to_every_branch() {
        let mut bs = fork(Box::new(Values::new(ints(&[1, 2, 3]), 2)), 2);
        let b = drain(&mut bs[1]).unwrap();
        let a = drain(&mut bs[0]).unwrap();
        assert_eq!(a, ints(&[1, 2, 3]));
        assert_eq!(b, a);
    }

    #[test]
    fn fork_buffers_only_for_live_branches() {
        let mut bs = fork(Box::new(Values::new(ints(&[1, 2, 3, 4, 5]), 2)), 3);
        let released = bs.pop().unwrap();
        drop(released);
        let a = drain(&mut bs[0]).unwrap();
        assert_eq!(a, ints(&[1, 2, 3, 4, 5]));
        // The idle branch holds all three batches, the released one none.
        assert_eq!(queued(&bs[0]), vec![0, 3, 0]);
        assert_eq!(drain(&mut bs[1]).unwrap(), a);
        assert_eq!(queued(&bs[0]), vec![0, 0, 0]);
    }

    #[test]
    fn scatter_splits_the_input() {
        let mut bs = scatter(Box::new(Values::new(ints(&[1, 2, 3, 4]), 1)), 2);
        let first = bs[0].pull(false).unwrap().unwrap();
        let second = bs[1].pull(false).unwrap().unwrap();
        assert_eq!(first.values, ints(&[1]));
        assert_eq!(second.values, ints(&[2]));
        let mut all = drain(&mut bs[0]).unwrap();
        all.extend(drain(&mut bs[1]).unwrap());
        assert_eq!(all, ints(&[3, 4]));
    }

    #[test]
    fn switch_routes_to_first_match_or_default() {
        let small = Expr::binary(BinOp::Lt, Expr::this(Vec::new()), Expr::lit(Value::Int(3)));
        let cases = Cases::Guards(vec![Some(small), None]);
        let mut bs = switch(Box::new(Values::new(ints(&[1, 5, 2, 7]), 4)), cases);
        assert_eq!(drain(&mut bs[0]).unwrap(), ints(&[1, 2]));
        assert_eq!(drain(&mut bs[1]).unwrap(), ints(&[5, 7]));

        let cases = Cases::Values {
            expr: Expr::this(Vec::new()),
            keys: vec![Some(Value::Int(5))],
        };
        let mut bs = switch(Box::new(Values::new(ints(&[1, 5]), 4)), cases);
        assert_eq!(drain(&mut bs[0]).unwrap(), ints(&[5]));
    }
}
