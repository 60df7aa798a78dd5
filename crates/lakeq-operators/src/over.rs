//! Lateral iteration.
//!
//! For each input row `over` evaluates its definitions into new variable
//! slots, evaluates its expressions, and unnests array results. Without a
//! body those values are emitted directly. With a body, a fresh instance
//! of the body is built for every row (a built graph cannot be restarted)
//! and run over the row's values; its output is the scope's output.

use std::collections::VecDeque;
use std::sync::Arc;

use lakeq_core::batch::{Batch, Puller};
use lakeq_core::error::Result;
use lakeq_core::eval;
use lakeq_core::expr::Expr;
use lakeq_core::value::Value;

use crate::puller::{Parent, Values};

/// Builds one instance of a lateral body over the given input.
pub type BodyFactory = Box<dyn FnMut(Parent) -> Result<Parent> + Send>;

pub struct Over {
    parent: Parent,
    defs: Vec<Expr>,
    exprs: Vec<Expr>,
    body: Option<BodyFactory>,
    batch_size: usize,
    pending: VecDeque<(Value, Arc<[Value]>)>,
    /// Body instance for the current row and the frame outside of it.
    current: Option<(Parent, Arc<[Value]>)>,
    eof: bool,
}

impl Over {
    pub fn new(
        parent: Parent,
        defs: Vec<Expr>,
        exprs: Vec<Expr>,
        body: Option<BodyFactory>,
        batch_size: usize,
    ) -> Self {
        Self {
            parent,
            defs,
            exprs,
            body,
            batch_size: batch_size.max(1),
            pending: VecDeque::new(),
            current: None,
            eof: false,
        }
    }

    fn unnest(&self, row: &Value, outer: &[Value]) -> Result<(Vec<Value>, Arc<[Value]>)> {
        let mut frame = outer.to_vec();
        for d in &self.defs {
            let v = eval::eval(d, row, &frame)?;
            frame.push(v);
        }
        let mut values = Vec::new();
        for e in &self.exprs {
            match eval::eval(e, row, &frame)? {
                Value::Array(elems) => values.extend(elems),
                Value::Missing => {}
                v => values.push(v),
            }
        }
        Ok((values, Arc::from(frame)))
    }
}

impl Puller for Over {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if self.eof {
            return Ok(None);
        }
        if done {
            self.eof = true;
            if let Some((mut body, _)) = self.current.take() {
                body.pull(true)?;
            }
            self.parent.pull(true)?;
            return Ok(None);
        }
        loop {
            if let Some((body, outer)) = self.current.as_mut() {
                match body.pull(false)? {
                    Some(batch) => return Ok(Some(Batch::with_vars(batch.values, outer.clone()))),
                    None => self.current = None,
                }
            }
            let Some((row, outer)) = self.pending.pop_front() else {
                match self.parent.pull(false)? {
                    Some(batch) => {
                        let vars = batch.vars;
                        self.pending
                            .extend(batch.values.into_iter().map(|v| (v, vars.clone())));
                        continue;
                    }
                    None => {
                        self.eof = true;
                        return Ok(None);
                    }
                }
            };
            let (values, frame) = self.unnest(&row, &outer)?;
            match self.body.as_mut() {
                None if values.is_empty() => continue,
                None => return Ok(Some(Batch::with_vars(values, outer))),
                Some(factory) => {
                    let input = Values::with_vars(values, frame, self.batch_size);
                    let body = factory(Box::new(input))?;
                    self.current = Some((body, outer));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::puller::drain;
    use lakeq_core::expr::BinOp;

    fn rows() -> Vec<Value> {
        vec![
            Value::record([
                ("xs", Value::Array(vec![Value::Int(1), Value::Int(5)])),
                ("min", Value::Int(2)),
            ]),
            Value::record([
                ("xs", Value::Array(vec![Value::Int(3)])),
                ("min", Value::Int(0)),
            ]),
        ]
    }

    #[test]
    fn unnests_without_body() {
        let mut o = Over::new(
            Box::new(Values::new(rows(), 1)),
            Vec::new(),
            vec![Expr::field("xs")],
            None,
            10,
        );
        assert_eq!(
            drain(&mut o).unwrap(),
            vec![Value::Int(1), Value::Int(5), Value::Int(3)]
        );
    }

    #[test]
    fn body_sees_the_row_definitions() {
        let var = Expr::Var {
            name: "lo".into(),
            slot: 0,
        };
        let keep = Expr::binary(BinOp::Gt, Expr::this(Vec::new()), var);
        let factory: BodyFactory =
            Box::new(move |input| Ok(Box::new(Filter::new(input, keep.clone())) as Parent));
        let mut o = Over::new(
            Box::new(Values::new(rows(), 2)),
            vec![Expr::field("min")],
            vec![Expr::field("xs")],
            Some(factory),
            10,
        );
        assert_eq!(drain(&mut o).unwrap(), vec![Value::Int(5), Value::Int(3)]);
    }
}
