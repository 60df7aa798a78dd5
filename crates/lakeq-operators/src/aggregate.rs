//! Grouped aggregation with partial states.
//!
//! [`Summarize`] keeps one [`Group`] per distinct key tuple, in first-seen
//! order. Each aggregate call found in an aggregation's right-hand side
//! owns an [`Accumulator`]. With `partials_out` the operator emits the
//! accumulators' re-combinable states instead of final values; with
//! `partials_in` it expects such states as input and merges them. A
//! parallelized summarize is one of each, on both sides of a merge.
//!
//! When the input is known to be sorted on the primary key, a group can
//! never reappear once that key moves on, so groups are flushed early.

use std::collections::{BTreeMap, VecDeque};

use lakeq_core::batch::{Batch, Puller};
use lakeq_core::error::{Error, Result};
use lakeq_core::eval;
use lakeq_core::expr::{Assignment, Expr};
use lakeq_core::sortkey::Order;
use lakeq_core::value::{OrdValue, Value};

use crate::puller::{lhs_path, Parent};
use crate::registry::Registry;

/// State of one aggregate function over one group.
pub trait Accumulator: Send {
    fn update(&mut self, v: Value);
    /// Fold in a state produced by [`Accumulator::partial`] elsewhere.
    fn merge(&mut self, partial: Value);
    fn partial(&self) -> Value;
    fn result(&self) -> Value;
}

#[derive(Default)]
pub struct Count(i64);

impl Accumulator for Count {
    fn update(&mut self, v: Value) {
        if !v.is_null() {
            self.0 += 1;
        }
    }

    fn merge(&mut self, partial: Value) {
        self.0 += partial.as_int().unwrap_or(0);
    }

    fn partial(&self) -> Value {
        Value::Int(self.0)
    }

    fn result(&self) -> Value {
        Value::Int(self.0)
    }
}

#[derive(Default)]
pub struct Sum(Option<Value>);

impl Accumulator for Sum {
    fn update(&mut self, v: Value) {
        if v.is_null() {
            return;
        }
        self.0 = Some(match self.0.take() {
            Some(acc) => add(&acc, &v),
            None => v,
        });
    }

    fn merge(&mut self, partial: Value) {
        self.update(partial)
    }

    fn partial(&self) -> Value {
        self.result()
    }

    fn result(&self) -> Value {
        self.0.clone().unwrap_or(Value::Null)
    }
}

fn add(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Error(_), _) => a.clone(),
        (_, Value::Error(_)) => b.clone(),
        (Value::Int(x), Value::Int(y)) => x
            .checked_add(*y)
            .map(Value::Int)
            .unwrap_or_else(|| Value::error("integer overflow")),
        (Value::Duration(x), Value::Duration(y)) => Value::Duration(x + y),
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => Value::Float(x + y),
            _ => Value::error(format!(
                "sum: cannot add {} and {}",
                a.type_name(),
                b.type_name()
            )),
        },
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

#[derive(Default)]
pub struct Avg {
    sum: f64,
    count: i64,
}

impl Accumulator for Avg {
    fn update(&mut self, v: Value) {
        if let Some(x) = as_f64(&v) {
            self.sum += x;
            self.count += 1;
        }
    }

    fn merge(&mut self, partial: Value) {
        if let (Some(sum), Some(count)) = (
            partial.field("sum").and_then(as_f64),
            partial.field("count").and_then(Value::as_int),
        ) {
            self.sum += sum;
            self.count += count;
        }
    }

    fn partial(&self) -> Value {
        Value::record([
            ("sum", Value::Float(self.sum)),
            ("count", Value::Int(self.count)),
        ])
    }

    fn result(&self) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            Value::Float(self.sum / self.count as f64)
        }
    }
}

pub struct MinMax {
    best: Option<Value>,
    keep: std::cmp::Ordering,
}

impl MinMax {
    pub fn min() -> Self {
        Self {
            best: None,
            keep: std::cmp::Ordering::Less,
        }
    }

    pub fn max() -> Self {
        Self {
            best: None,
            keep: std::cmp::Ordering::Greater,
        }
    }
}

impl Accumulator for MinMax {
    fn update(&mut self, v: Value) {
        if v.is_null() {
            return;
        }
        match &self.best {
            Some(b) if v.total_cmp(b) != self.keep => {}
            _ => self.best = Some(v),
        }
    }

    fn merge(&mut self, partial: Value) {
        self.update(partial)
    }

    fn partial(&self) -> Value {
        self.result()
    }

    fn result(&self) -> Value {
        self.best.clone().unwrap_or(Value::Null)
    }
}

#[derive(Default)]
pub struct Collect(Vec<Value>);

impl Accumulator for Collect {
    fn update(&mut self, v: Value) {
        if !v.is_missing() {
            self.0.push(v);
        }
    }

    fn merge(&mut self, partial: Value) {
        if let Value::Array(elems) = partial {
            self.0.extend(elems);
        }
    }

    fn partial(&self) -> Value {
        self.result()
    }

    fn result(&self) -> Value {
        Value::Array(self.0.clone())
    }
}

/// Some non-null value of the group.
#[derive(Default)]
pub struct Any(Option<Value>);

impl Accumulator for Any {
    fn update(&mut self, v: Value) {
        if self.0.is_none() && !v.is_null() {
            self.0 = Some(v);
        }
    }

    fn merge(&mut self, partial: Value) {
        self.update(partial)
    }

    fn partial(&self) -> Value {
        self.result()
    }

    fn result(&self) -> Value {
        self.0.clone().unwrap_or(Value::Null)
    }
}

#[derive(Default)]
pub struct First(Option<Value>);

impl Accumulator for First {
    fn update(&mut self, v: Value) {
        if self.0.is_none() && !v.is_missing() {
            self.0 = Some(v);
        }
    }

    fn merge(&mut self, partial: Value) {
        self.update(partial)
    }

    fn partial(&self) -> Value {
        self.result()
    }

    fn result(&self) -> Value {
        self.0.clone().unwrap_or(Value::Null)
    }
}

#[derive(Default)]
pub struct Last(Option<Value>);

impl Accumulator for Last {
    fn update(&mut self, v: Value) {
        if !v.is_missing() {
            self.0 = Some(v);
        }
    }

    fn merge(&mut self, partial: Value) {
        self.update(partial)
    }

    fn partial(&self) -> Value {
        self.result()
    }

    fn result(&self) -> Value {
        self.0.clone().unwrap_or(Value::Null)
    }
}

/// One aggregate call inside an aggregation expression.
struct AggCall {
    name: String,
    expr: Option<Expr>,
    filter: Option<Expr>,
}

/// `path := rhs` where `rhs` contains one or more aggregate calls.
struct AggSlot {
    path: Vec<String>,
    rhs: Expr,
    calls: Vec<AggCall>,
}

impl AggSlot {
    fn new(a: &Assignment) -> Result<Self> {
        let mut calls = Vec::new();
        a.rhs.walk(&mut |e| {
            if let Expr::Agg { name, expr, filter } = e {
                calls.push(AggCall {
                    name: name.clone(),
                    expr: expr.as_deref().cloned(),
                    filter: filter.as_deref().cloned(),
                });
            }
        });
        if calls.is_empty() {
            return Err(Error::internal(format!(
                "summarize: {} has no aggregate call",
                a.rhs
            )));
        }
        Ok(Self {
            path: lhs_path(&a.lhs)?,
            rhs: a.rhs.clone(),
            calls,
        })
    }

    /// A bare call carries its state as is; anything else carries an
    /// array with one state per call.
    fn is_bare(&self) -> bool {
        matches!(self.rhs, Expr::Agg { .. })
    }

    fn finish(&self, accs: &[Box<dyn Accumulator>]) -> Result<Value> {
        if self.is_bare() {
            return Ok(accs[0].result());
        }
        let mut results = accs.iter().map(|a| a.result());
        let e = self.rhs.clone().substitute(&mut |e| match e {
            Expr::Agg { .. } => results.next().map(Expr::lit),
            _ => None,
        });
        Ok(eval::eval(&e, &Value::Missing, &[])?)
    }

    fn partial(&self, accs: &[Box<dyn Accumulator>]) -> Value {
        if self.is_bare() {
            accs[0].partial()
        } else {
            Value::Array(accs.iter().map(|a| a.partial()).collect())
        }
    }

    fn merge(&self, accs: &mut [Box<dyn Accumulator>], state: Value) {
        if self.is_bare() {
            accs[0].merge(state);
        } else if let Value::Array(states) = state {
            for (acc, s) in accs.iter_mut().zip(states) {
                acc.merge(s);
            }
        }
    }
}

struct Group {
    keys: Vec<Value>,
    /// One accumulator list per slot.
    accs: Vec<Vec<Box<dyn Accumulator>>>,
}

/// Settings carried over from the DAG node.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummarizeOpts {
    /// With `partials_out`, flush the table whenever it reaches this many
    /// groups. Zero means unbounded.
    pub limit: usize,
    pub partials_in: bool,
    pub partials_out: bool,
    pub input_sort_dir: Option<Order>,
}

pub struct Summarize {
    parent: Parent,
    keys: Vec<(Vec<String>, Expr)>,
    slots: Vec<AggSlot>,
    registry: Registry,
    opts: SummarizeOpts,
    batch_size: usize,
    index: BTreeMap<Vec<OrdValue>, usize>,
    groups: Vec<Group>,
    /// Primary key of the most recent row, when flushing early.
    primary: Option<Value>,
    out: VecDeque<Value>,
    eof: bool,
}

impl Summarize {
    pub fn new(
        parent: Parent,
        keys: &[Assignment],
        aggs: &[Assignment],
        opts: SummarizeOpts,
        batch_size: usize,
    ) -> Result<Self> {
        let registry = Registry::new();
        let slots = aggs.iter().map(AggSlot::new).collect::<Result<Vec<_>>>()?;
        for call in slots.iter().flat_map(|s| &s.calls) {
            if registry.make(&call.name).is_none() {
                return Err(Error::internal(format!(
                    "aggregate function {} is not registered",
                    call.name
                )));
            }
        }
        let keys = keys
            .iter()
            .map(|k| Ok((lhs_path(&k.lhs)?, k.rhs.clone())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            parent,
            keys,
            slots,
            registry,
            opts,
            batch_size: batch_size.max(1),
            index: BTreeMap::new(),
            groups: Vec::new(),
            primary: None,
            out: VecDeque::new(),
            eof: false,
        })
    }

    fn new_group(&self, keys: Vec<Value>) -> Group {
        let accs = self
            .slots
            .iter()
            .map(|s| {
                s.calls
                    .iter()
                    .filter_map(|c| self.registry.make(&c.name))
                    .collect()
            })
            .collect();
        Group { keys, accs }
    }

    fn consume(&mut self, v: &Value, vars: &[Value]) -> Result<()> {
        let keys = self
            .keys
            .iter()
            .map(|(_, e)| eval::eval(e, v, vars))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if self.opts.input_sort_dir.is_some() {
            if let Some(first) = keys.first() {
                let moved = self
                    .primary
                    .as_ref()
                    .map(|p| p.total_cmp(first) != std::cmp::Ordering::Equal)
                    .unwrap_or(false);
                if moved {
                    self.flush()?;
                }
                self.primary = Some(first.clone());
            }
        }
        let ord: Vec<OrdValue> = keys.iter().cloned().map(OrdValue).collect();
        let at = match self.index.get(&ord) {
            Some(&i) => i,
            None => {
                let group = self.new_group(keys);
                self.groups.push(group);
                self.index.insert(ord, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        let group = &mut self.groups[at];
        for (slot, accs) in self.slots.iter().zip(group.accs.iter_mut()) {
            if self.opts.partials_in {
                slot.merge(accs, v.deref_path(&slot.path));
                continue;
            }
            for (call, acc) in slot.calls.iter().zip(accs.iter_mut()) {
                if let Some(f) = &call.filter {
                    if !eval::eval_bool(f, v, vars)? {
                        continue;
                    }
                }
                let arg = match &call.expr {
                    Some(e) => eval::eval(e, v, vars)?,
                    None => v.clone(),
                };
                acc.update(arg);
            }
        }
        if self.opts.partials_out && self.opts.limit > 0 && self.groups.len() >= self.opts.limit {
            self.flush()?;
        }
        Ok(())
    }

    /// Move every group into the output queue.
    fn flush(&mut self) -> Result<()> {
        self.index.clear();
        for group in std::mem::take(&mut self.groups) {
            let mut rec = Value::Record(Vec::new());
            for ((path, _), key) in self.keys.iter().zip(group.keys) {
                rec.set_path(path, key);
            }
            for (slot, accs) in self.slots.iter().zip(&group.accs) {
                let v = if self.opts.partials_out {
                    slot.partial(accs)
                } else {
                    slot.finish(accs)?
                };
                rec.set_path(&slot.path, v);
            }
            self.out.push_back(rec);
        }
        Ok(())
    }
}

impl Puller for Summarize {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if done {
            self.out.clear();
            self.groups.clear();
            self.index.clear();
            if !self.eof {
                self.eof = true;
                self.parent.pull(true)?;
            }
            return Ok(None);
        }
        while self.out.is_empty() && !self.eof {
            match self.parent.pull(false)? {
                Some(batch) => {
                    for v in &batch.values {
                        self.consume(v, &batch.vars)?;
                    }
                }
                None => {
                    self.eof = true;
                    // A keyless aggregation always yields a row, so empty
                    // input still counts zero.
                    if self.keys.is_empty() && self.groups.is_empty() {
                        let group = self.new_group(Vec::new());
                        self.groups.push(group);
                    }
                    self.flush()?;
                }
            }
        }
        if self.out.is_empty() {
            return Ok(None);
        }
        let n = self.batch_size.min(self.out.len());
        Ok(Some(Batch::new(self.out.drain(..n).collect())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puller::{drain, Values};
    use lakeq_core::expr::BinOp;

    fn agg(name: &str, arg: Option<Expr>) -> Expr {
        Expr::Agg {
            name: name.into(),
            expr: arg.map(Box::new),
            filter: None,
        }
    }

    fn rows() -> Vec<Value> {
        [("a", 1), ("b", 2), ("a", 3), ("b", 4), ("a", 5)]
            .into_iter()
            .map(|(k, n)| Value::record([("k", Value::Str(k.into())), ("n", Value::Int(n))]))
            .collect()
    }

    fn run(input: Vec<Value>, keys: &[Assignment], aggs: &[Assignment], opts: SummarizeOpts) -> Vec<Value> {
        let mut s = Summarize::new(Box::new(Values::new(input, 2)), keys, aggs, opts, 100).unwrap();
        drain(&mut s).unwrap()
    }

    fn key() -> Vec<Assignment> {
        vec![Assignment::new(Expr::field("k"), Expr::field("k"))]
    }

    fn sum_n() -> Vec<Assignment> {
        vec![Assignment::new(Expr::field("s"), agg("sum", Some(Expr::field("n"))))]
    }

    #[test]
    fn groups_in_first_seen_order() {
        let out = run(rows(), &key(), &sum_n(), SummarizeOpts::default());
        assert_eq!(
            out,
            vec![
                Value::record([("k", Value::Str("a".into())), ("s", Value::Int(9))]),
                Value::record([("k", Value::Str("b".into())), ("s", Value::Int(6))]),
            ]
        );
    }

    #[test]
    fn keyless_count_of_nothing_is_zero() {
        let aggs = vec![Assignment::new(Expr::field("count"), agg("count", None))];
        let out = run(Vec::new(), &[], &aggs, SummarizeOpts::default());
        assert_eq!(out, vec![Value::record([("count", Value::Int(0))])]);
    }

    #[test]
    fn partials_recombine_to_the_same_answer() {
        let aggs = vec![
            Assignment::new(Expr::field("avg"), agg("avg", Some(Expr::field("n")))),
            Assignment::new(
                Expr::field("twice"),
                Expr::binary(BinOp::Mul, agg("count", None), Expr::lit(Value::Int(2))),
            ),
        ];
        let whole = run(rows(), &key(), &aggs, SummarizeOpts::default());

        let out_opts = SummarizeOpts {
            partials_out: true,
            ..Default::default()
        };
        let all = rows();
        let (left, right) = all.split_at(2);
        let mut partials = run(left.to_vec(), &key(), &aggs, out_opts);
        partials.extend(run(right.to_vec(), &key(), &aggs, out_opts));

        let merged_keys = vec![Assignment::new(Expr::field("k"), Expr::field("k"))];
        let in_opts = SummarizeOpts {
            partials_in: true,
            ..Default::default()
        };
        let merged = run(partials, &merged_keys, &aggs, in_opts);
        assert_eq!(merged, whole);
    }

    #[test]
    fn sorted_input_flushes_early() {
        let input: Vec<Value> = [1, 1, 2, 3, 3]
            .into_iter()
            .map(|k| Value::record([("k", Value::Int(k)), ("n", Value::Int(1))]))
            .collect();
        let opts = SummarizeOpts {
            input_sort_dir: Some(Order::Asc),
            ..Default::default()
        };
        let mut s = Summarize::new(Box::new(Values::new(input, 1)), &key(), &sum_n(), opts, 100).unwrap();
        let first = s.pull(false).unwrap().unwrap();
        assert_eq!(
            first.values,
            vec![Value::record([("k", Value::Int(1)), ("s", Value::Int(2))])]
        );
        assert_eq!(drain(&mut s).unwrap().len(), 2);
    }
}
