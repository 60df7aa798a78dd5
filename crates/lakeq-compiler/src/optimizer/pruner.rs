//! Key-range pruners.
//!
//! A pruner is evaluated against a data object's `{min, max}` key range
//! and returns `true` when the object cannot hold a row satisfying the
//! filter it was derived from. Only comparisons of the pool key against a
//! constant contribute; anything else is simply not used for pruning, so
//! a pruner never skips an object the filter could match.

use lakeq_core::eval::const_eval;
use lakeq_core::expr::{BinOp, Expr};
use lakeq_core::value::Value;

/// Derive a pruner for objects keyed on `key` from `filter`.
pub fn key_pruner(key: &[String], filter: &Expr) -> Option<Expr> {
    match filter {
        Expr::Binary {
            op: BinOp::And,
            lhs,
            rhs,
        } => match (key_pruner(key, lhs), key_pruner(key, rhs)) {
            // Either side ruling an object out rules out the conjunction.
            (Some(l), Some(r)) => Some(Expr::binary(BinOp::Or, l, r)),
            (Some(p), None) | (None, Some(p)) => Some(p),
            (None, None) => None,
        },
        Expr::Binary {
            op: BinOp::Or,
            lhs,
            rhs,
        } => {
            let l = key_pruner(key, lhs)?;
            let r = key_pruner(key, rhs)?;
            Some(Expr::and(l, r))
        }
        Expr::Binary { op, lhs, rhs } if op.is_comparison() => {
            if lhs.as_path() == Some(key) {
                compare(*op, constant(rhs)?)
            } else if rhs.as_path() == Some(key) {
                compare(op.flip()?, constant(lhs)?)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Pruner for `key <op> c`.
fn compare(op: BinOp, c: Value) -> Option<Expr> {
    let bound = |field: &str, op: BinOp| Expr::binary(op, Expr::field(field), Expr::lit(c.clone()));
    match op {
        BinOp::Le => Some(bound("min", BinOp::Gt)),
        BinOp::Lt => Some(bound("min", BinOp::Ge)),
        BinOp::Ge => Some(bound("max", BinOp::Lt)),
        BinOp::Gt => Some(bound("max", BinOp::Le)),
        BinOp::Eq => Some(Expr::binary(
            BinOp::Or,
            bound("min", BinOp::Gt),
            bound("max", BinOp::Lt),
        )),
        _ => None,
    }
}

/// A usable constant bound. Evaluation faults and null-ish results mean
/// the comparison is simply not used for pruning.
fn constant(e: &Expr) -> Option<Value> {
    match const_eval(e) {
        Ok(Value::Missing | Value::Null | Value::Error(_)) | Err(_) => None,
        Ok(v) => Some(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeq_core::lake::{prune, DataObject, ObjectId};

    fn key() -> Vec<String> {
        vec!["ts".to_string()]
    }

    fn obj(min: i64, max: i64) -> DataObject {
        DataObject {
            id: ObjectId::new(),
            min: Value::Int(min),
            max: Value::Int(max),
            count: 1,
        }
    }

    fn cmp(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(op, lhs, rhs)
    }

    #[test]
    fn upper_bound_keeps_intersecting_objects() {
        let filter = cmp(BinOp::Le, Expr::field("ts"), Expr::lit(Value::Int(10)));
        let pruner = key_pruner(&key(), &filter).unwrap();
        assert!(!prune(&pruner, &obj(0, 5)));
        assert!(!prune(&pruner, &obj(5, 20)));
        assert!(!prune(&pruner, &obj(10, 10)));
        assert!(prune(&pruner, &obj(11, 20)));
    }

    #[test]
    fn constant_on_the_left_is_flipped() {
        let filter = cmp(BinOp::Lt, Expr::lit(Value::Int(10)), Expr::field("ts"));
        let pruner = key_pruner(&key(), &filter).unwrap();
        assert!(prune(&pruner, &obj(0, 10)));
        assert!(!prune(&pruner, &obj(0, 11)));
    }

    #[test]
    fn conjunction_uses_any_usable_side() {
        let filter = Expr::and(
            cmp(BinOp::Eq, Expr::field("ts"), Expr::lit(Value::Int(7))),
            cmp(BinOp::Gt, Expr::field("other"), Expr::lit(Value::Int(0))),
        );
        let pruner = key_pruner(&key(), &filter).unwrap();
        assert!(!prune(&pruner, &obj(5, 9)));
        assert!(prune(&pruner, &obj(8, 9)));
        assert!(prune(&pruner, &obj(1, 6)));
    }

    #[test]
    fn disjunction_needs_both_sides() {
        let filter = cmp(
            BinOp::Or,
            cmp(BinOp::Lt, Expr::field("ts"), Expr::lit(Value::Int(3))),
            cmp(BinOp::Gt, Expr::field("other"), Expr::lit(Value::Int(0))),
        );
        assert!(key_pruner(&key(), &filter).is_none());

        let filter = cmp(
            BinOp::Or,
            cmp(BinOp::Lt, Expr::field("ts"), Expr::lit(Value::Int(3))),
            cmp(BinOp::Gt, Expr::field("ts"), Expr::lit(Value::Int(8))),
        );
        let pruner = key_pruner(&key(), &filter).unwrap();
        assert!(prune(&pruner, &obj(4, 7)));
        assert!(!prune(&pruner, &obj(2, 4)));
    }

    #[test]
    fn non_constant_bounds_do_not_prune() {
        let filter = cmp(BinOp::Le, Expr::field("ts"), Expr::field("limit"));
        assert!(key_pruner(&key(), &filter).is_none());
    }
}
