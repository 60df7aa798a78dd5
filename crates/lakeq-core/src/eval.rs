//! Expression evaluation.
//!
//! [`eval`] is used by every execution primitive. [`const_eval`] evaluates
//! an expression with no input value and no variables; it is how the
//! analyzer folds constants and how the builder extracts switch-case keys
//! and pruner bounds.
//!
//! Faults of the evaluator itself (as opposed to data errors, which become
//! `Value::Error`) are reported as [`EvalError`]. Under constant evaluation
//! a reference to the input, an unbound variable, or an aggregate just
//! means "not a constant" and yields `Value::Missing`; an unknown function
//! name is a defect and surfaces as an internal error.

use std::cmp::Ordering;

use thiserror::Error;

use crate::error::{Error, Result};
use crate::expr::{BinOp, Expr, RecordElem, UnaryOp};
use crate::functions;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("reference to this outside of a row context")]
    NoInput,
    #[error("variable {name} (slot {slot}) is not bound")]
    UnboundVar { name: String, slot: usize },
    #[error("aggregate {0}() used in a scalar context")]
    AggInScalar(String),
    #[error("function {0}: not found")]
    UnknownFunction(String),
}

impl EvalError {
    /// Faults that only mean "this expression is not a constant".
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EvalError::UnknownFunction(_))
    }
}

/// Evaluate `expr` against one input value and the lateral variable frame.
pub fn eval(expr: &Expr, this: &Value, vars: &[Value]) -> std::result::Result<Value, EvalError> {
    eval_in(expr, Some(this), vars)
}

/// Evaluate `expr` as a predicate: only `true` passes.
pub fn eval_bool(expr: &Expr, this: &Value, vars: &[Value]) -> std::result::Result<bool, EvalError> {
    Ok(matches!(eval(expr, this, vars)?, Value::Bool(true)))
}

/// Evaluate without input. `Ok(Value::Missing)` means "not a constant".
pub fn const_eval(expr: &Expr) -> Result<Value> {
    match eval_in(expr, None, &[]) {
        Ok(v) => Ok(v),
        Err(e) if e.is_recoverable() => Ok(Value::Missing),
        Err(e) => Err(Error::internal(e.to_string())),
    }
}

/// Replace every constant subtree of `expr` with its literal value.
pub fn fold(expr: Expr) -> Result<Expr> {
    let mut failure = None;
    let folded = expr.fold(&mut |e| {
        if failure.is_some() || !foldable(&e) {
            return e;
        }
        match const_eval(&e) {
            Ok(Value::Missing) => e,
            Ok(value) => Expr::Literal { value },
            Err(err) => {
                failure = Some(err);
                e
            }
        }
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(folded),
    }
}

/// A node is worth folding when it computes something and all of its
/// immediate children are already literals.
fn foldable(e: &Expr) -> bool {
    let lit = |e: &Expr| matches!(e, Expr::Literal { .. });
    match e {
        Expr::Literal { .. } | Expr::This { .. } | Expr::Var { .. } | Expr::Agg { .. } => false,
        Expr::Dot { lhs, .. } => lit(lhs),
        Expr::Index { expr, index } => lit(expr) && lit(index),
        Expr::Binary { lhs, rhs, .. } => lit(lhs) && lit(rhs),
        Expr::Unary { operand, .. } => lit(operand),
        Expr::Call { args, .. } => args.iter().all(lit),
        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => lit(cond) && lit(then) && lit(otherwise),
        Expr::Record { elems } => elems.iter().all(|el| match el {
            RecordElem::Field { value, .. } => lit(value),
            RecordElem::Spread { expr } => lit(expr),
        }),
        Expr::Array { elems } => elems.iter().all(lit),
    }
}

fn eval_in(expr: &Expr, this: Option<&Value>, vars: &[Value]) -> std::result::Result<Value, EvalError> {
    match expr {
        Expr::Literal { value } => Ok(value.clone()),
        Expr::This { path } => match this {
            Some(v) => Ok(v.deref_path(path)),
            None => Err(EvalError::NoInput),
        },
        Expr::Var { name, slot } => vars
            .get(*slot)
            .cloned()
            .ok_or_else(|| EvalError::UnboundVar {
                name: name.clone(),
                slot: *slot,
            }),
        Expr::Dot { lhs, field } => {
            let v = eval_in(lhs, this, vars)?;
            Ok(match v {
                Value::Error(_) => v,
                v => v.field(field).cloned().unwrap_or(Value::Missing),
            })
        }
        Expr::Index { expr, index } => {
            let container = eval_in(expr, this, vars)?;
            let index = eval_in(index, this, vars)?;
            Ok(index_value(container, &index))
        }
        Expr::Binary { op: BinOp::And, lhs, rhs } => {
            let l = eval_in(lhs, this, vars)?;
            match l {
                Value::Bool(false) => Ok(Value::Bool(false)),
                Value::Bool(true) => logical(eval_in(rhs, this, vars)?),
                Value::Error(_) => Ok(l),
                other => Ok(not_bool(&other)),
            }
        }
        Expr::Binary { op: BinOp::Or, lhs, rhs } => {
            let l = eval_in(lhs, this, vars)?;
            match l {
                Value::Bool(true) => Ok(Value::Bool(true)),
                Value::Bool(false) => logical(eval_in(rhs, this, vars)?),
                Value::Error(_) => Ok(l),
                other => Ok(not_bool(&other)),
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            let l = eval_in(lhs, this, vars)?;
            let r = eval_in(rhs, this, vars)?;
            Ok(evaluate_binary_op(*op, &l, &r))
        }
        Expr::Unary { op, operand } => {
            let v = eval_in(operand, this, vars)?;
            Ok(evaluate_unary_op(*op, &v))
        }
        Expr::Call { name, args } => {
            let args = args
                .iter()
                .map(|a| eval_in(a, this, vars))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            functions::call_scalar(name, &args)
                .ok_or_else(|| EvalError::UnknownFunction(name.clone()))
        }
        Expr::Agg { name, .. } => Err(EvalError::AggInScalar(name.clone())),
        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => match eval_in(cond, this, vars)? {
            Value::Bool(true) => eval_in(then, this, vars),
            Value::Error(e) => Ok(Value::Error(e)),
            _ => eval_in(otherwise, this, vars),
        },
        Expr::Record { elems } => {
            let mut out: Vec<(String, Value)> = Vec::with_capacity(elems.len());
            for elem in elems {
                match elem {
                    RecordElem::Field { name, value } => {
                        let v = eval_in(value, this, vars)?;
                        if !v.is_missing() {
                            upsert(&mut out, name.clone(), v);
                        }
                    }
                    RecordElem::Spread { expr } => {
                        if let Value::Record(fields) = eval_in(expr, this, vars)? {
                            for (k, v) in fields {
                                upsert(&mut out, k, v);
                            }
                        }
                    }
                }
            }
            Ok(Value::Record(out))
        }
        Expr::Array { elems } => Ok(Value::Array(
            elems
                .iter()
                .map(|e| eval_in(e, this, vars))
                .collect::<std::result::Result<Vec<_>, _>>()?,
        )),
    }
}

fn upsert(fields: &mut Vec<(String, Value)>, name: String, v: Value) {
    match fields.iter_mut().find(|(k, _)| *k == name) {
        Some((_, slot)) => *slot = v,
        None => fields.push((name, v)),
    }
}

fn logical(v: Value) -> std::result::Result<Value, EvalError> {
    Ok(match v {
        Value::Bool(_) | Value::Error(_) => v,
        other => not_bool(&other),
    })
}

fn not_bool(v: &Value) -> Value {
    if v.is_null() {
        Value::Bool(false)
    } else {
        Value::error(format!("not a boolean: {v}"))
    }
}

fn index_value(container: Value, index: &Value) -> Value {
    match (container, index) {
        (e @ Value::Error(_), _) => e,
        (Value::Array(elems), Value::Int(i)) => {
            let len = elems.len() as i64;
            let i = if *i < 0 { len + i } else { *i };
            if (0..len).contains(&i) {
                elems[i as usize].clone()
            } else {
                Value::Missing
            }
        }
        (v @ Value::Record(_), Value::Str(name)) => {
            v.field(name).cloned().unwrap_or(Value::Missing)
        }
        (c, _) if c.is_null() => Value::Missing,
        (c, i) => Value::error(format!(
            "cannot index {} with {}",
            c.type_name(),
            i.type_name()
        )),
    }
}

/// Evaluate a binary operation.
fn evaluate_binary_op(op: BinOp, left: &Value, right: &Value) -> Value {
    use Value::*;

    if let Error(_) = left {
        return left.clone();
    }
    if let Error(_) = right {
        return right.clone();
    }
    if op.is_comparison() {
        if op == BinOp::Eq {
            return Bool(left.loose_eq(right));
        }
        if op == BinOp::Ne {
            return Bool(!left.loose_eq(right));
        }
        // Ordering against null is never true.
        if left.is_null() || right.is_null() {
            return Bool(false);
        }
        let ord = left.total_cmp(right);
        return Bool(match op {
            BinOp::Lt => ord == Ordering::Less,
            BinOp::Le => ord != Ordering::Greater,
            BinOp::Gt => ord == Ordering::Greater,
            _ => ord != Ordering::Less,
        });
    }
    if op == BinOp::In {
        return match right {
            Array(elems) => Bool(elems.iter().any(|e| e.loose_eq(left))),
            Record(fields) => Bool(fields.iter().any(|(_, v)| v.loose_eq(left))),
            v if v.is_null() => Bool(false),
            v => Value::error(format!("in: cannot search {}", v.type_name())),
        };
    }
    if left.is_null() || right.is_null() {
        return Null;
    }
    match (op, left, right) {
        (BinOp::Add, Int(a), Int(b)) => a.checked_add(*b).map(Int).unwrap_or_else(overflow),
        (BinOp::Sub, Int(a), Int(b)) => a.checked_sub(*b).map(Int).unwrap_or_else(overflow),
        (BinOp::Mul, Int(a), Int(b)) => a.checked_mul(*b).map(Int).unwrap_or_else(overflow),
        (BinOp::Div | BinOp::Mod, Int(_), Int(0)) => Value::error("divide by zero"),
        (BinOp::Div, Int(a), Int(b)) => a.checked_div(*b).map(Int).unwrap_or_else(overflow),
        (BinOp::Mod, Int(a), Int(b)) => a.checked_rem(*b).map(Int).unwrap_or_else(overflow),
        (BinOp::Add, Str(a), Str(b)) => Str(format!("{a}{b}")),
        (BinOp::Add, Time(t), Duration(d)) | (BinOp::Add, Duration(d), Time(t)) => {
            t.checked_add(*d).map(Time).unwrap_or_else(overflow)
        }
        (BinOp::Sub, Time(t), Duration(d)) => t.checked_sub(*d).map(Time).unwrap_or_else(overflow),
        (BinOp::Sub, Time(a), Time(b)) => a.checked_sub(*b).map(Duration).unwrap_or_else(overflow),
        (BinOp::Add, Duration(a), Duration(b)) => {
            a.checked_add(*b).map(Duration).unwrap_or_else(overflow)
        }
        (BinOp::Sub, Duration(a), Duration(b)) => {
            a.checked_sub(*b).map(Duration).unwrap_or_else(overflow)
        }
        (BinOp::Mul, Duration(d), Int(n)) | (BinOp::Mul, Int(n), Duration(d)) => {
            d.checked_mul(*n).map(Duration).unwrap_or_else(overflow)
        }
        (op, a, b) => match (as_float(a), as_float(b)) {
            (Some(x), Some(y)) => match op {
                BinOp::Add => Float(x + y),
                BinOp::Sub => Float(x - y),
                BinOp::Mul => Float(x * y),
                BinOp::Div if y == 0.0 => Value::error("divide by zero"),
                BinOp::Div => Float(x / y),
                BinOp::Mod if y == 0.0 => Value::error("divide by zero"),
                _ => Float(x % y),
            },
            _ => Value::error(format!(
                "unsupported operation: {} {} {}",
                a.type_name(),
                op.symbol(),
                b.type_name()
            )),
        },
    }
}

fn overflow() -> Value {
    Value::error("integer overflow")
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

/// Evaluate a unary operation.
fn evaluate_unary_op(op: UnaryOp, arg: &Value) -> Value {
    match op {
        UnaryOp::Not => match arg {
            Value::Bool(b) => Value::Bool(!b),
            Value::Error(_) => arg.clone(),
            v if v.is_null() => Value::Null,
            v => not_bool(v),
        },
        UnaryOp::Neg => match arg {
            Value::Int(i) => i.checked_neg().map(Value::Int).unwrap_or_else(overflow),
            Value::Float(f) => Value::Float(-f),
            Value::Duration(d) => d.checked_neg().map(Value::Duration).unwrap_or_else(overflow),
            v if v.is_null() || v.is_error() => v.clone(),
            v => Value::error(format!("cannot negate {}", v.type_name())),
        },
        UnaryOp::IsNull => Value::Bool(arg.is_null()),
        UnaryOp::IsNotNull => Value::Bool(!arg.is_null()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{parse_duration, parse_time};

    fn lit(v: Value) -> Expr {
        Expr::lit(v)
    }

    #[test]
    fn comparisons_against_missing_fields_are_false() {
        let row = Value::record([("a", Value::Int(3))]);
        let gt = Expr::binary(BinOp::Gt, Expr::field("b"), lit(Value::Int(1)));
        assert_eq!(eval(&gt, &row, &[]), Ok(Value::Bool(false)));
        let ok = Expr::binary(BinOp::Gt, Expr::field("a"), lit(Value::Int(1)));
        assert_eq!(eval(&ok, &row, &[]), Ok(Value::Bool(true)));
    }

    #[test]
    fn const_eval_downgrades_recoverable_faults() {
        assert_eq!(const_eval(&Expr::field("a")).unwrap(), Value::Missing);
        let var = Expr::Var {
            name: "x".into(),
            slot: 4,
        };
        assert_eq!(const_eval(&var).unwrap(), Value::Missing);
        let bad = Expr::call("frobnicate", vec![]);
        assert!(const_eval(&bad).unwrap_err().is_internal());
    }

    #[test]
    fn fold_collapses_time_arithmetic() {
        let t = parse_time("2024-01-01T03:00:00Z").unwrap();
        let three_hours = parse_duration("3h").unwrap();
        let e = Expr::binary(
            BinOp::Le,
            Expr::field("ts"),
            Expr::binary(BinOp::Sub, lit(Value::Time(t)), lit(Value::Duration(three_hours))),
        );
        let folded = fold(e).unwrap();
        let expected = Expr::binary(
            BinOp::Le,
            Expr::field("ts"),
            lit(Value::Time(parse_time("2024-01-01T00:00:00Z").unwrap())),
        );
        assert_eq!(folded, expected);
    }

    #[test]
    fn records_spread_and_drop_missing() {
        let row = Value::record([("a", Value::Int(1)), ("b", Value::Int(2))]);
        let e = Expr::Record {
            elems: vec![
                RecordElem::Spread {
                    expr: Expr::this(vec![]),
                },
                RecordElem::Field {
                    name: "a".into(),
                    value: lit(Value::Int(10)),
                },
                RecordElem::Field {
                    name: "z".into(),
                    value: Expr::field("nope"),
                },
            ],
        };
        assert_eq!(
            eval(&e, &row, &[]).unwrap(),
            Value::record([("a", Value::Int(10)), ("b", Value::Int(2))])
        );
    }

    #[test]
    fn integer_overflow_is_an_error_value() {
        let min = || lit(Value::Int(i64::MIN));
        let neg_one = || lit(Value::Int(-1));
        let overflowed = Value::error("integer overflow");

        let div = Expr::binary(BinOp::Div, min(), neg_one());
        assert_eq!(eval(&div, &Value::Null, &[]), Ok(overflowed.clone()));

        let neg = Expr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(min()),
        };
        assert_eq!(eval(&neg, &Value::Null, &[]), Ok(overflowed.clone()));

        let far = lit(Value::Duration(i64::MAX));
        let shifted = Expr::binary(BinOp::Add, lit(Value::Time(1)), far);
        assert_eq!(eval(&shifted, &Value::Null, &[]), Ok(overflowed.clone()));

        // Folding a constant remainder must not bring the compiler down.
        let rem = Expr::binary(BinOp::Mod, min(), neg_one());
        assert_eq!(fold(rem).unwrap(), lit(overflowed));
    }
}
