//! Row-wise reshaping: yield, put, cut, drop, rename, explode.
//!
//! All of these map one input value to zero or more output values with no
//! state carried across rows, so they share one puller, [`Project`], and
//! differ only in the [`Shape`] they apply.

use lakeq_core::batch::{Batch, Puller};
use lakeq_core::error::Result;
use lakeq_core::eval;
use lakeq_core::expr::{Assignment, Expr};
use lakeq_core::value::Value;

use crate::puller::{lhs_path, Parent};

/// What a [`Project`] does to each row.
pub enum Shape {
    /// One output per expression; missing results are dropped.
    Yield(Vec<Expr>),
    /// Right-hand sides are all evaluated against the input row before any
    /// assignment is applied.
    Put(Vec<(Vec<String>, Expr)>),
    Cut(Vec<(Vec<String>, Expr)>),
    Drop(Vec<Vec<String>>),
    /// (destination, source)
    Rename(Vec<(Vec<String>, Vec<String>)>),
    Explode { args: Vec<Expr>, alias: String },
}

impl Shape {
    pub fn put(args: &[Assignment]) -> Result<Self> {
        Ok(Shape::Put(assignments(args)?))
    }

    pub fn cut(args: &[Assignment]) -> Result<Self> {
        Ok(Shape::Cut(assignments(args)?))
    }

    pub fn drop(args: &[Expr]) -> Result<Self> {
        Ok(Shape::Drop(
            args.iter().map(lhs_path).collect::<Result<_>>()?,
        ))
    }

    pub fn rename(args: &[Assignment]) -> Result<Self> {
        Ok(Shape::Rename(
            args.iter()
                .map(|a| Ok((lhs_path(&a.lhs)?, lhs_path(&a.rhs)?)))
                .collect::<Result<_>>()?,
        ))
    }

    fn apply(&self, v: Value, vars: &[Value], out: &mut Vec<Value>) -> Result<()> {
        match self {
            Shape::Yield(exprs) => {
                for e in exprs {
                    let y = eval::eval(e, &v, vars)?;
                    if !y.is_missing() {
                        out.push(y);
                    }
                }
            }
            Shape::Put(args) => {
                let vals = args
                    .iter()
                    .map(|(_, rhs)| eval::eval(rhs, &v, vars))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let mut rec = v;
                for ((path, _), val) in args.iter().zip(vals) {
                    rec.set_path(path, val);
                }
                out.push(rec);
            }
            Shape::Cut(args) => {
                let mut rec = Value::Record(Vec::new());
                for (path, rhs) in args {
                    let val = eval::eval(rhs, &v, vars)?;
                    if !val.is_missing() {
                        rec.set_path(path, val);
                    }
                }
                if !matches!(&rec, Value::Record(f) if f.is_empty()) {
                    out.push(rec);
                }
            }
            Shape::Drop(paths) => {
                let mut rec = v;
                for p in paths {
                    rec.remove_path(p);
                }
                out.push(rec);
            }
            Shape::Rename(args) => {
                let mut rec = v;
                for (dst, src) in args {
                    let val = rec.deref_path(src);
                    if val.is_missing() {
                        continue;
                    }
                    rec.remove_path(src);
                    rec.set_path(dst, val);
                }
                out.push(rec);
            }
            Shape::Explode { args, alias } => {
                for e in args {
                    match eval::eval(e, &v, vars)? {
                        Value::Array(elems) => out.extend(
                            elems
                                .into_iter()
                                .map(|x| Value::record([(alias.as_str(), x)])),
                        ),
                        Value::Missing => {}
                        x => out.push(Value::record([(alias.as_str(), x)])),
                    }
                }
            }
        }
        Ok(())
    }
}

fn assignments(args: &[Assignment]) -> Result<Vec<(Vec<String>, Expr)>> {
    args.iter()
        .map(|a| Ok((lhs_path(&a.lhs)?, a.rhs.clone())))
        .collect()
}

pub struct Project {
    parent: Parent,
    shape: Shape,
}

impl Project {
    pub fn new(parent: Parent, shape: Shape) -> Self {
        Self { parent, shape }
    }
}

impl Puller for Project {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        loop {
            let Some(batch) = self.parent.pull(done)? else {
                return Ok(None);
            };
            let mut out = Vec::with_capacity(batch.len());
            for v in batch.values {
                self.shape.apply(v, &batch.vars, &mut out)?;
            }
            if !out.is_empty() {
                return Ok(Some(Batch::with_vars(out, batch.vars)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puller::{drain, Values};
    use lakeq_core::expr::BinOp;

    fn run(rows: Vec<Value>, shape: Shape) -> Vec<Value> {
        let mut p = Project::new(Box::new(Values::new(rows, 10)), shape);
        drain(&mut p).unwrap()
    }

    fn row() -> Value {
        Value::record([
            ("a", Value::record([("b", Value::Int(1))])),
            ("x", Value::Int(2)),
        ])
    }

    #[test]
    fn put_reads_the_original_row() {
        let args = vec![
            Assignment::new(Expr::field("x"), Expr::lit(Value::Int(10))),
            Assignment::new(
                Expr::field("y"),
                Expr::binary(BinOp::Add, Expr::field("x"), Expr::lit(Value::Int(1))),
            ),
        ];
        let out = run(vec![row()], Shape::put(&args).unwrap());
        assert_eq!(out[0].field("x"), Some(&Value::Int(10)));
        assert_eq!(out[0].field("y"), Some(&Value::Int(3)));
    }

    #[test]
    fn rename_moves_nested_fields() {
        let args = vec![Assignment::new(Expr::path(&["a", "c"]), Expr::path(&["a", "b"]))];
        let out = run(vec![row()], Shape::rename(&args).unwrap());
        assert_eq!(
            out[0],
            Value::record([
                ("a", Value::record([("c", Value::Int(1))])),
                ("x", Value::Int(2)),
            ])
        );
    }

    #[test]
    fn cut_skips_rows_without_any_field() {
        let args = vec![Assignment::new(Expr::field("z"), Expr::field("z"))];
        assert!(run(vec![row()], Shape::cut(&args).unwrap()).is_empty());
        let args = vec![Assignment::new(Expr::field("x"), Expr::field("x"))];
        assert_eq!(
            run(vec![row()], Shape::cut(&args).unwrap()),
            vec![Value::record([("x", Value::Int(2))])]
        );
    }

    #[test]
    fn explode_unnests_arrays() {
        let rows = vec![Value::record([(
            "tags",
            Value::Array(vec![Value::Str("a".into()), Value::Str("b".into())]),
        )])];
        let out = run(
            rows,
            Shape::Explode {
                args: vec![Expr::field("tags")],
                alias: "tag".into(),
            },
        );
        assert_eq!(
            out,
            vec![
                Value::record([("tag", Value::Str("a".into()))]),
                Value::record([("tag", Value::Str("b".into()))]),
            ]
        );
    }
}
