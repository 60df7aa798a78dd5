//! Projection merging and spread inlining.

use lakeq_core::dag::{walk_seqs_mut, Op, Seq};
use lakeq_core::expr::{Expr, RecordElem};
use lakeq_core::value::Value;

/// Fold a yield of a flat record into the yield that consumes it.
pub(crate) fn merge_yields(seq: &mut Seq) {
    let _ = walk_seqs_mut::<()>(seq, &mut |s| {
        let mut i = 1;
        while i < s.len() {
            let merged = match (&s[i - 1], &s[i]) {
                (Op::Yield { exprs: first }, Op::Yield { exprs: second }) => match first.as_slice() {
                    [record @ Expr::Record { elems }] if is_flat(elems) => Some(
                        second
                            .iter()
                            .map(|e| substitute_record(e.clone(), record, elems))
                            .collect::<Vec<_>>(),
                    ),
                    _ => None,
                },
                _ => None,
            };
            match merged {
                Some(exprs) => {
                    tracing::trace!(at = i, "merged adjacent yields");
                    s[i - 1] = Op::Yield { exprs };
                    s.remove(i);
                }
                None => i += 1,
            }
        }
        Ok(())
    });
}

/// Named fields with at most one leading spread of an input path.
fn is_flat(elems: &[RecordElem]) -> bool {
    elems.iter().enumerate().all(|(i, e)| match e {
        RecordElem::Field { .. } => true,
        RecordElem::Spread {
            expr: Expr::This { .. },
        } => i == 0,
        RecordElem::Spread { .. } => false,
    })
}

/// Rewrite `e`, evaluated against the output of `record`, to evaluate
/// against the record's input instead.
fn substitute_record(e: Expr, record: &Expr, elems: &[RecordElem]) -> Expr {
    e.map_paths(&mut |path| {
        let Some((name, rest)) = path.split_first() else {
            return record.clone();
        };
        let field = elems.iter().rev().find_map(|elem| match elem {
            RecordElem::Field { name: n, value } if n == name => Some(value),
            _ => None,
        });
        match (field, elems.first()) {
            (Some(value), _) => value.clone().extend_path(rest),
            (None, Some(RecordElem::Spread { expr })) => expr.clone().extend_path(&path),
            (None, _) => Expr::lit(Value::Missing),
        }
    })
}

/// `{...{a: 1}, b: 2}` becomes `{a: 1, b: 2}`.
pub(crate) fn inline_spreads(seq: &mut Seq) {
    let _ = walk_seqs_mut::<()>(seq, &mut |s| {
        for op in s.iter_mut() {
            op.visit_exprs_mut(&mut |e| {
                let taken = std::mem::replace(e, Expr::this(Vec::new()));
                *e = taken.fold(&mut inline_record);
            });
        }
        Ok(())
    });
}

fn inline_record(e: Expr) -> Expr {
    let Expr::Record { elems } = e else {
        return e;
    };
    let mut out = Vec::with_capacity(elems.len());
    for elem in elems {
        match elem {
            RecordElem::Spread {
                expr: Expr::Record { elems: inner },
            } => out.extend(inner),
            other => out.push(other),
        }
    }
    Expr::Record { elems: out }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, value: Expr) -> RecordElem {
        RecordElem::Field {
            name: name.into(),
            value,
        }
    }

    #[test]
    fn consecutive_yields_fold_into_one() {
        let mut seq = Seq::new(vec![
            Op::Yield {
                exprs: vec![Expr::Record {
                    elems: vec![field("a", Expr::field("x")), field("b", Expr::field("y"))],
                }],
            },
            Op::Yield {
                exprs: vec![Expr::Record {
                    elems: vec![
                        field("sum", Expr::path(&["a", "n"])),
                        field("gone", Expr::field("c")),
                    ],
                }],
            },
        ]);
        merge_yields(&mut seq);
        assert_eq!(
            seq,
            Seq::new(vec![Op::Yield {
                exprs: vec![Expr::Record {
                    elems: vec![
                        field("sum", Expr::path(&["x", "n"])),
                        field("gone", Expr::lit(Value::Missing)),
                    ],
                }],
            }])
        );
    }

    #[test]
    fn spread_supplies_undefined_fields() {
        let mut seq = Seq::new(vec![
            Op::Yield {
                exprs: vec![Expr::Record {
                    elems: vec![
                        RecordElem::Spread {
                            expr: Expr::field("inner"),
                        },
                        field("k", Expr::field("x")),
                    ],
                }],
            },
            Op::Yield {
                exprs: vec![Expr::field("k"), Expr::field("z")],
            },
        ]);
        merge_yields(&mut seq);
        assert_eq!(
            seq,
            Seq::new(vec![Op::Yield {
                exprs: vec![Expr::field("x"), Expr::path(&["inner", "z"])],
            }])
        );
    }

    #[test]
    fn nested_record_spreads_are_inlined() {
        let mut seq = Seq::new(vec![Op::Yield {
            exprs: vec![Expr::Record {
                elems: vec![
                    RecordElem::Spread {
                        expr: Expr::Record {
                            elems: vec![field("a", Expr::field("x"))],
                        },
                    },
                    field("b", Expr::field("y")),
                ],
            }],
        }]);
        inline_spreads(&mut seq);
        let expected = Seq::new(vec![Op::Yield {
            exprs: vec![Expr::Record {
                elems: vec![field("a", Expr::field("x")), field("b", Expr::field("y"))],
            }],
        }]);
        assert_eq!(seq, expected);
        inline_spreads(&mut seq);
        assert_eq!(seq, expected);
    }
}
