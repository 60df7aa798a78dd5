//! Rejoining parallel paths: unordered combine and ordered merge.
//!
//! With workers enabled each upstream is drained by its own thread into a
//! bounded channel, so the paths make progress side by side and the
//! combine or merge is the one point where their output is serialized.
//! Every blocking send and receive also watches the context for
//! cancellation.

use std::collections::VecDeque;

use crossbeam_channel::{bounded, select, Receiver, Sender};

use lakeq_core::batch::{Batch, Context, Puller};
use lakeq_core::error::{Error, Result};
use lakeq_core::eval;
use lakeq_core::expr::Expr;
use lakeq_core::sortkey::Order;
use lakeq_core::value::Value;

use crate::puller::Parent;
use crate::sort::compare_keys;

type Msg = (usize, Result<Option<Batch>>);

/// Pull `parent` to the end on a worker thread, sending each result on
/// `tx`. The worker stops early, releasing the upstream, when the receiver
/// goes away or the context is canceled.
fn spawn_drain(index: usize, mut parent: Parent, tx: Sender<Msg>, ctx: Context) -> Result<()> {
    std::thread::Builder::new()
        .name(format!("lakeq-drain-{index}"))
        .spawn(move || loop {
            let msg = parent.pull(false);
            let last = !matches!(msg, Ok(Some(_)));
            let sent = select! {
                send(tx, (index, msg)) -> r => r.is_ok(),
                recv(ctx.done()) -> _ => false,
            };
            if !sent {
                if let Err(e) = parent.pull(true) {
                    tracing::debug!(error = %e, "upstream release after stop failed");
                }
                return;
            }
            if last {
                return;
            }
        })
        .map(|_| ())
        .map_err(|e| Error::Exec(format!("spawn worker: {e}")))
}

/// Puller fed by a worker thread draining `parent`.
pub struct Worker {
    rx: Option<Receiver<Msg>>,
    ctx: Context,
}

impl Worker {
    pub fn spawn(parent: Parent, ctx: Context, capacity: usize) -> Result<Self> {
        let (tx, rx) = bounded(capacity.max(1));
        spawn_drain(0, parent, tx, ctx.clone())?;
        Ok(Self { rx: Some(rx), ctx })
    }
}

impl Puller for Worker {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if done {
            // Dropping the receiver stops the worker.
            self.rx = None;
            return Ok(None);
        }
        let Some(rx) = &self.rx else {
            return Ok(None);
        };
        let msg = select! {
            recv(rx) -> msg => msg,
            recv(self.ctx.done()) -> _ => return Err(Error::Canceled),
        };
        match msg {
            Ok((_, Ok(Some(batch)))) => Ok(Some(batch)),
            Ok((_, Ok(None))) | Err(_) => {
                self.rx = None;
                Ok(None)
            }
            Ok((_, Err(e))) => {
                self.rx = None;
                Err(e)
            }
        }
    }
}

enum Inputs {
    /// Round-robin over the upstreams on the caller's thread.
    Inline {
        parents: Vec<Option<Parent>>,
        next: usize,
    },
    Workers {
        rx: Option<Receiver<Msg>>,
        live: usize,
    },
}

/// Emits the batches of all upstreams in whatever order they arrive.
pub struct Combine {
    inputs: Inputs,
    ctx: Context,
}

impl Combine {
    pub fn new(parents: Vec<Parent>, ctx: Context) -> Self {
        Self {
            inputs: Inputs::Inline {
                parents: parents.into_iter().map(Some).collect(),
                next: 0,
            },
            ctx,
        }
    }

    pub fn with_workers(parents: Vec<Parent>, ctx: Context, capacity: usize) -> Result<Self> {
        let (tx, rx) = bounded(capacity.max(1));
        let live = parents.len();
        for (i, p) in parents.into_iter().enumerate() {
            spawn_drain(i, p, tx.clone(), ctx.clone())?;
        }
        tracing::trace!(workers = live, "combine started workers");
        Ok(Self {
            inputs: Inputs::Workers { rx: Some(rx), live },
            ctx,
        })
    }
}

impl Puller for Combine {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        match &mut self.inputs {
            Inputs::Inline { parents, next } => {
                if done {
                    for p in parents.iter_mut().filter_map(Option::as_mut) {
                        p.pull(true)?;
                    }
                    parents.clear();
                    return Ok(None);
                }
                self.ctx.check()?;
                let n = parents.len();
                for _ in 0..n {
                    let i = *next % n;
                    *next = (i + 1) % n;
                    let Some(p) = parents[i].as_mut() else {
                        continue;
                    };
                    match p.pull(false)? {
                        Some(batch) => return Ok(Some(batch)),
                        None => parents[i] = None,
                    }
                }
                Ok(None)
            }
            Inputs::Workers { rx, live } => {
                if done {
                    *rx = None;
                    return Ok(None);
                }
                let Some(chan) = rx.as_ref() else {
                    return Ok(None);
                };
                while *live > 0 {
                    let msg = select! {
                        recv(chan) -> msg => msg,
                        recv(self.ctx.done()) -> _ => return Err(Error::Canceled),
                    };
                    match msg {
                        Ok((_, Ok(Some(batch)))) => return Ok(Some(batch)),
                        Ok((_, Ok(None))) => *live -= 1,
                        Ok((i, Err(e))) => {
                            *rx = None;
                            return Err(e.with_context(format!("combine input {i}")));
                        }
                        Err(_) => break,
                    }
                }
                *rx = None;
                Ok(None)
            }
        }
    }
}

/// Order-preserving k-way merge. Every upstream must already be sorted by
/// `key` in `order`; missing keys compare as null and nulls come last.
pub struct Merge {
    parents: Vec<Parent>,
    heads: Vec<VecDeque<(Value, Value)>>,
    live: Vec<bool>,
    key: Expr,
    order: Order,
    batch_size: usize,
}

impl Merge {
    pub fn new(parents: Vec<Parent>, key: Expr, order: Order, batch_size: usize) -> Self {
        let n = parents.len();
        Self {
            parents,
            heads: (0..n).map(|_| VecDeque::new()).collect(),
            live: vec![true; n],
            key,
            order,
            batch_size: batch_size.max(1),
        }
    }

    fn refill(&mut self, i: usize) -> Result<()> {
        while self.live[i] && self.heads[i].is_empty() {
            match self.parents[i].pull(false)? {
                Some(batch) => {
                    for v in batch.values {
                        let k = eval::eval(&self.key, &v, &batch.vars)?;
                        self.heads[i].push_back((k, v));
                    }
                }
                None => self.live[i] = false,
            }
        }
        Ok(())
    }
}

impl Puller for Merge {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if done {
            for (p, live) in self.parents.iter_mut().zip(self.live.iter_mut()) {
                if *live {
                    *live = false;
                    p.pull(true)?;
                }
            }
            self.heads.iter_mut().for_each(VecDeque::clear);
            return Ok(None);
        }
        let mut out = Vec::with_capacity(self.batch_size);
        while out.len() < self.batch_size {
            for i in 0..self.parents.len() {
                self.refill(i)?;
            }
            let mut best: Option<usize> = None;
            for (i, head) in self.heads.iter().enumerate() {
                let Some((k, _)) = head.front() else {
                    continue;
                };
                let better = match best.and_then(|b| self.heads[b].front()) {
                    Some((bk, _)) => compare_keys(k, bk, self.order, false).is_lt(),
                    None => true,
                };
                if better {
                    best = Some(i);
                }
            }
            let Some(i) = best else {
                break;
            };
            if let Some((_, v)) = self.heads[i].pop_front() {
                out.push(v);
            }
        }
        if out.is_empty() {
            return Ok(None);
        }
        Ok(Some(Batch::new(out)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puller::{drain, Values};

    fn keyed(vals: &[i64]) -> Vec<Value> {
        vals.iter()
            .map(|v| Value::record([("k", Value::Int(*v))]))
            .collect()
    }

    fn parent(vals: &[i64], batch: usize) -> Parent {
        Box::new(Values::new(keyed(vals), batch))
    }

    #[test]
    fn merge_interleaves_sorted_inputs() {
        let mut m = Merge::new(
            vec![parent(&[1, 4, 6], 2), parent(&[2, 3, 7], 1), parent(&[], 1)],
            Expr::field("k"),
            Order::Asc,
            4,
        );
        assert_eq!(drain(&mut m).unwrap(), keyed(&[1, 2, 3, 4, 6, 7]));
    }

    #[test]
    fn merge_descending_puts_nulls_last() {
        let with_null = vec![Value::record([("k", Value::Int(5))]), Value::record([("x", Value::Int(0))])];
        let mut m = Merge::new(
            vec![Box::new(Values::new(with_null, 1)), parent(&[9, 1], 1)],
            Expr::field("k"),
            Order::Desc,
            10,
        );
        let out = drain(&mut m).unwrap();
        let keys: Vec<Value> = out.iter().map(|v| v.deref_path(&["k".to_string()])).collect();
        assert_eq!(
            keys,
            vec![Value::Int(9), Value::Int(5), Value::Int(1), Value::Missing]
        );
    }

    #[test]
    fn combine_yields_everything() {
        for workers in [false, true] {
            let parents = vec![parent(&[1, 2], 1), parent(&[3], 1), parent(&[4, 5, 6], 2)];
            let ctx = Context::new();
            let mut c = if workers {
                Combine::with_workers(parents, ctx, 2).unwrap()
            } else {
                Combine::new(parents, ctx)
            };
            let mut out = drain(&mut c).unwrap();
            out.sort_by(|a, b| a.total_cmp(b));
            assert_eq!(out, keyed(&[1, 2, 3, 4, 5, 6]));
        }
    }

    #[test]
    fn canceled_worker_reports_cancellation() {
        let ctx = Context::new();
        ctx.cancel();
        let mut w = Worker::spawn(parent(&[1], 1), ctx, 1).unwrap();
        // Data may still win the race, but the worker never blocks.
        let ended = (0..3).any(|_| matches!(w.pull(false), Ok(None) | Err(Error::Canceled)));
        assert!(ended);
    }
}
