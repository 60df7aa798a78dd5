//! A key pruner may only skip objects that hold no matching row.

use lakeq_compiler::optimizer::key_pruner;
use lakeq_core::eval::eval_bool;
use lakeq_core::expr::{BinOp, Expr};
use lakeq_core::lake::{prune, DataObject, ObjectId};
use lakeq_core::value::Value;

const OPS: [BinOp; 5] = [BinOp::Lt, BinOp::Le, BinOp::Gt, BinOp::Ge, BinOp::Eq];

fn key() -> Vec<String> {
    vec!["k".to_string()]
}

fn cmp(op: BinOp, c: i64) -> Expr {
    Expr::binary(op, Expr::field("k"), Expr::lit(Value::Int(c)))
}

fn filters() -> Vec<Expr> {
    let mut out = Vec::new();
    for op in OPS {
        for c in -1..=11 {
            out.push(cmp(op, c));
            // Constant on the left.
            out.push(Expr::binary(op, Expr::lit(Value::Int(c)), Expr::field("k")));
        }
    }
    let base = out.clone();
    for (i, a) in base.iter().enumerate().step_by(7) {
        let b = &base[(i * 5 + 3) % base.len()];
        out.push(Expr::and(a.clone(), b.clone()));
        out.push(Expr::binary(BinOp::Or, a.clone(), b.clone()));
        out.push(Expr::and(
            a.clone(),
            Expr::binary(BinOp::Gt, Expr::field("other"), Expr::lit(Value::Int(0))),
        ));
    }
    out
}

/// Every object covering a contiguous key range inside 0..=10, holding
/// one row per key.
fn objects() -> Vec<(DataObject, Vec<Value>)> {
    let mut out = Vec::new();
    for lo in 0..=10 {
        for hi in lo..=10 {
            let rows: Vec<Value> = (lo..=hi)
                .map(|k| Value::record([("k", Value::Int(k)), ("other", Value::Int(1))]))
                .collect();
            let obj = DataObject {
                id: ObjectId::new(),
                min: Value::Int(lo),
                max: Value::Int(hi),
                count: rows.len() as u64,
            };
            out.push((obj, rows));
        }
    }
    out
}

#[test]
fn pruned_objects_never_hold_matches() {
    let objects = objects();
    let mut pruned = 0;
    for filter in filters() {
        let Some(pruner) = key_pruner(&key(), &filter) else {
            continue;
        };
        for (obj, rows) in &objects {
            if !prune(&pruner, obj) {
                continue;
            }
            pruned += 1;
            for row in rows {
                assert!(
                    !eval_bool(&filter, row, &[]).unwrap(),
                    "{pruner:?} pruned [{}, {}] but {row:?} matches {filter:?}",
                    obj.min,
                    obj.max
                );
            }
        }
    }
    // The grid has to exercise pruning at all.
    assert!(pruned > 0);
}

#[test]
fn filters_off_the_key_give_no_pruner() {
    let f = Expr::binary(BinOp::Gt, Expr::field("other"), Expr::lit(Value::Int(0)));
    assert!(key_pruner(&key(), &f).is_none());
    let f = Expr::binary(BinOp::Ne, Expr::field("k"), Expr::lit(Value::Int(3)));
    assert!(key_pruner(&key(), &f).is_none());
    let f = Expr::binary(
        BinOp::Or,
        cmp(BinOp::Lt, 2),
        Expr::binary(BinOp::Gt, Expr::field("other"), Expr::lit(Value::Int(0))),
    );
    assert!(key_pruner(&key(), &f).is_none());
}
