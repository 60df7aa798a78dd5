//! Head, tail, uniq, and fuse.

use std::collections::VecDeque;

use lakeq_core::batch::{Batch, Puller};
use lakeq_core::error::Result;
use lakeq_core::value::Value;

use crate::puller::Parent;

/// First `count` values. Once satisfied the upstream is told it is done.
pub struct Head {
    parent: Parent,
    remaining: usize,
    finished: bool,
}

impl Head {
    pub fn new(parent: Parent, count: usize) -> Self {
        Self {
            parent,
            remaining: count,
            finished: false,
        }
    }
}

impl Puller for Head {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if self.finished {
            return Ok(None);
        }
        if done || self.remaining == 0 {
            self.finished = true;
            self.parent.pull(true)?;
            return Ok(None);
        }
        let Some(mut batch) = self.parent.pull(false)? else {
            self.finished = true;
            return Ok(None);
        };
        if batch.len() >= self.remaining {
            batch.values.truncate(self.remaining);
            self.remaining = 0;
        } else {
            self.remaining -= batch.len();
        }
        Ok(Some(batch))
    }
}

/// Last `count` values.
pub struct Tail {
    parent: Parent,
    count: usize,
    emitted: bool,
}

impl Tail {
    pub fn new(parent: Parent, count: usize) -> Self {
        Self {
            parent,
            count,
            emitted: false,
        }
    }
}

impl Puller for Tail {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if self.emitted {
            return Ok(None);
        }
        self.emitted = true;
        if done {
            self.parent.pull(true)?;
            return Ok(None);
        }
        let mut window: VecDeque<Value> = VecDeque::with_capacity(self.count);
        while let Some(batch) = self.parent.pull(false)? {
            for v in batch.values {
                if window.len() == self.count {
                    window.pop_front();
                }
                if self.count > 0 {
                    window.push_back(v);
                }
            }
        }
        if window.is_empty() {
            return Ok(None);
        }
        Ok(Some(Batch::new(window.into())))
    }
}

/// Drops values equal to their predecessor. With `cflag` each output is
/// `{value, count}` where count is the length of the run it replaced.
pub struct Uniq {
    parent: Parent,
    cflag: bool,
    last: Option<Value>,
    run: i64,
    eof: bool,
}

impl Uniq {
    pub fn new(parent: Parent, cflag: bool) -> Self {
        Self {
            parent,
            cflag,
            last: None,
            run: 0,
            eof: false,
        }
    }

    fn emit(&self, v: Value) -> Value {
        if self.cflag {
            Value::record([("value", v), ("count", Value::Int(self.run))])
        } else {
            v
        }
    }
}

impl Puller for Uniq {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if self.eof {
            return Ok(None);
        }
        if done {
            self.eof = true;
            self.parent.pull(true)?;
            return Ok(None);
        }
        loop {
            let Some(batch) = self.parent.pull(false)? else {
                self.eof = true;
                return Ok(match self.last.take() {
                    Some(v) => Some(Batch::new(vec![self.emit(v)])),
                    None => None,
                });
            };
            let mut out = Vec::new();
            for v in batch.values {
                if self.last.as_ref() == Some(&v) {
                    self.run += 1;
                    continue;
                }
                if let Some(prev) = self.last.replace(v) {
                    out.push(self.emit(prev));
                }
                self.run = 1;
            }
            if !out.is_empty() {
                return Ok(Some(Batch::with_vars(out, batch.vars)));
            }
        }
    }
}

/// Unifies the shapes of its input: every output record carries the union
/// of all top-level fields seen, in first-seen order, with absent fields
/// set to null. Non-record values pass through unchanged.
pub struct Fuse {
    parent: Parent,
    batch_size: usize,
    out: Option<std::vec::IntoIter<Value>>,
}

impl Fuse {
    pub fn new(parent: Parent, batch_size: usize) -> Self {
        Self {
            parent,
            batch_size: batch_size.max(1),
            out: None,
        }
    }

    fn load(&mut self) -> Result<Vec<Value>> {
        let mut rows = Vec::new();
        let mut columns: Vec<String> = Vec::new();
        while let Some(batch) = self.parent.pull(false)? {
            for v in batch.values {
                if let Value::Record(fields) = &v {
                    for (k, _) in fields {
                        if !columns.contains(k) {
                            columns.push(k.clone());
                        }
                    }
                }
                rows.push(v);
            }
        }
        Ok(rows
            .into_iter()
            .map(|v| match v {
                Value::Record(_) => Value::Record(
                    columns
                        .iter()
                        .map(|c| (c.clone(), v.field(c).cloned().unwrap_or(Value::Null)))
                        .collect(),
                ),
                other => other,
            })
            .collect())
    }
}

impl Puller for Fuse {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if done {
            if self.out.is_none() {
                self.parent.pull(true)?;
            }
            self.out = Some(Vec::new().into_iter());
            return Ok(None);
        }
        if self.out.is_none() {
            let rows = self.load()?;
            self.out = Some(rows.into_iter());
        }
        let Some(it) = self.out.as_mut() else {
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

    fn ints(vals: &[i64]) -> Vec<Value> {
        vals.iter().copied().map(Value::Int).collect()
    }

    #[test]
    fn head_stops_early() {
        let mut h = Head::new(Box::new(Values::new(ints(&[1, 2, 3, 4, 5]), 2)), 3);
        assert_eq!(drain(&mut h).unwrap(), ints(&[1, 2, 3]));
    }

    #[test]
    fn tail_keeps_the_end() {
        let mut t = Tail::new(Box::new(Values::new(ints(&[1, 2, 3, 4, 5]), 2)), 2);
        assert_eq!(drain(&mut t).unwrap(), ints(&[4, 5]));
    }

    #[test]
    fn uniq_counts_runs() {
        let input = ints(&[1, 1, 2, 2, 2, 1]);
        let mut u = Uniq::new(Box::new(Values::new(input.clone(), 4)), false);
        assert_eq!(drain(&mut u).unwrap(), ints(&[1, 2, 1]));
        let mut u = Uniq::new(Box::new(Values::new(input, 4)), true);
        let counts: Vec<Value> = drain(&mut u)
            .unwrap()
            .iter()
            .map(|v| v.deref_path(&["count".to_string()]))
            .collect();
        assert_eq!(counts, ints(&[2, 3, 1]));
    }

    #[test]
    fn fuse_fills_absent_fields() {
        let input = vec![
            Value::record([("a", Value::Int(1))]),
            Value::record([("b", Value::Int(2))]),
        ];
        let mut f = Fuse::new(Box::new(Values::new(input, 1)), 10);
        assert_eq!(
            drain(&mut f).unwrap(),
            vec![
                Value::record([("a", Value::Int(1)), ("b", Value::Null)]),
                Value::record([("a", Value::Null), ("b", Value::Int(2))]),
            ]
        );
    }
}
