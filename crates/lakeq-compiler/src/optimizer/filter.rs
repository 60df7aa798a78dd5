//! Filter lifting and merging.

use lakeq_core::dag::{walk_seqs_mut, Op, Seq};
use lakeq_core::expr::{Expr, RecordElem};

/// Move each filter that directly follows a record-building yield in front
/// of it, rewriting the filter's field references into the yield's
/// expressions. Repeats until no filter moves so one filter can climb past
/// several projections.
pub(crate) fn lift_filters(seq: &mut Seq) {
    let _ = walk_seqs_mut::<()>(seq, &mut |s| {
        while lift_one(s) {}
        Ok(())
    });
}

fn lift_one(s: &mut Seq) -> bool {
    for i in 1..s.len() {
        let (Op::Yield { exprs }, Op::Filter { expr }) = (&s[i - 1], &s[i]) else {
            continue;
        };
        let [Expr::Record { elems }] = exprs.as_slice() else {
            continue;
        };
        let Some(lifted) = rewrite_through_record(expr, elems) else {
            continue;
        };
        tracing::trace!(filter = %lifted, "lifted filter above yield");
        s[i] = Op::Filter { expr: lifted };
        s.swap(i - 1, i);
        return true;
    }
    false
}

/// Express `filter` over the input of a yield producing `elems`. `None`
/// when some reference cannot be traced to a single defining element.
fn rewrite_through_record(filter: &Expr, elems: &[RecordElem]) -> Option<Expr> {
    let mut ok = true;
    let out = filter.clone().map_paths(&mut |path| match source_of(elems, &path) {
        Some(e) => e,
        None => {
            ok = false;
            Expr::this(path)
        }
    });
    ok.then_some(out)
}

/// The pre-projection expression for `path` of the record: the last field
/// element naming its head, or the spread source when exactly one spread
/// can supply it.
fn source_of(elems: &[RecordElem], path: &[String]) -> Option<Expr> {
    let (name, rest) = path.split_first()?;
    for (i, elem) in elems.iter().enumerate().rev() {
        match elem {
            RecordElem::Field { name: n, value } if n == name => {
                return Some(value.clone().extend_path(rest))
            }
            RecordElem::Field { .. } => {}
            RecordElem::Spread { expr } => {
                let shadowed = elems[..i].iter().any(|e| match e {
                    RecordElem::Field { name: n, .. } => n == name,
                    RecordElem::Spread { .. } => true,
                });
                return match (shadowed, expr) {
                    (false, Expr::This { .. }) => Some(expr.clone().extend_path(path)),
                    _ => None,
                };
            }
        }
    }
    None
}

/// `where a | where b` becomes `where a and b`. Scanning right to left
/// collapses a whole chain in one traversal.
pub(crate) fn merge_filters(seq: &mut Seq) {
    let _ = walk_seqs_mut::<()>(seq, &mut |s| {
        let mut i = s.len();
        while i > 1 {
            i -= 1;
            if !matches!((&s[i - 1], &s[i]), (Op::Filter { .. }, Op::Filter { .. })) {
                continue;
            }
            if let (Op::Filter { expr: rhs }, Some(Op::Filter { expr: lhs })) =
                (s.remove(i), s.get_mut(i - 1))
            {
                let prev = std::mem::replace(lhs, Expr::this(Vec::new()));
                *lhs = Expr::and(prev, rhs);
            }
        }
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeq_core::expr::BinOp;
    use lakeq_core::value::Value;

    fn gt(path: &[&str], n: i64) -> Expr {
        Expr::binary(BinOp::Gt, Expr::path(path), Expr::lit(Value::Int(n)))
    }

    #[test]
    fn chained_filters_collapse_and_stay_put() {
        let mut seq = Seq::new(vec![
            Op::Filter { expr: gt(&["a"], 1) },
            Op::Filter { expr: gt(&["b"], 2) },
            Op::Filter { expr: gt(&["c"], 3) },
            Op::Fuse,
        ]);
        merge_filters(&mut seq);
        assert_eq!(seq.len(), 2);
        let Op::Filter { expr } = &seq[0] else {
            panic!("expected filter, got {:?}", seq[0]);
        };
        assert_eq!(
            expr.clone().split_conjunction(),
            vec![gt(&["a"], 1), gt(&["b"], 2), gt(&["c"], 3)]
        );
        let once = seq.clone();
        merge_filters(&mut seq);
        assert_eq!(seq, once);
    }

    #[test]
    fn filter_lifts_through_renaming_yield() {
        let mut seq = Seq::new(vec![
            Op::Yield {
                exprs: vec![Expr::Record {
                    elems: vec![
                        RecordElem::Spread {
                            expr: Expr::this(Vec::new()),
                        },
                        RecordElem::Field {
                            name: "y".into(),
                            value: Expr::path(&["src", "x"]),
                        },
                    ],
                }],
            },
            Op::Filter {
                expr: Expr::and(gt(&["y"], 1), gt(&["z", "w"], 2)),
            },
        ]);
        lift_filters(&mut seq);
        assert!(matches!(seq[1], Op::Yield { .. }));
        assert_eq!(
            seq[0],
            Op::Filter {
                expr: Expr::and(gt(&["src", "x"], 1), gt(&["z", "w"], 2)),
            }
        );
    }

    #[test]
    fn filter_on_whole_value_stays_below_yield() {
        let mut seq = Seq::new(vec![
            Op::Yield {
                exprs: vec![Expr::Record {
                    elems: vec![RecordElem::Field {
                        name: "a".into(),
                        value: Expr::field("b"),
                    }],
                }],
            },
            Op::Filter {
                expr: Expr::call("has", vec![Expr::this(Vec::new())]),
            },
        ]);
        let before = seq.clone();
        lift_filters(&mut seq);
        assert_eq!(seq, before);
    }
}
