//! Source demand.
//!
//! Walks the operators after each scan until one fully determines which
//! input fields matter (a yield, cut, or summarize) and records those
//! field paths on the scan. Anything that may pass whole values through
//! leaves the demand at `None`.

use lakeq_core::dag::{walk_seqs_mut, Demand, Op, Seq};

pub(crate) fn mark_demand(seq: &mut Seq) {
    let _ = walk_seqs_mut::<()>(seq, &mut |s| {
        let Some(scan) = scan_index(s) else {
            return Ok(());
        };
        let demand = demand_of(&s[scan + 1..]);
        if let Some(slot) = s[scan].demand_mut() {
            *slot = demand;
        }
        Ok(())
    });
}

/// Position of the row-producing scan at the head of an entry sequence.
fn scan_index(s: &Seq) -> Option<usize> {
    match s.first()? {
        Op::Lister { .. } => s
            .iter()
            .take(3)
            .position(|op| matches!(op, Op::SeqScan { .. })),
        Op::DefaultScan { .. } | Op::FileScan { .. } | Op::HttpScan { .. } => Some(0),
        _ => None,
    }
}

fn demand_of(rest: &[Op]) -> Demand {
    let mut need = Vec::new();
    for op in rest {
        let complete = match op {
            Op::Filter { expr } => expr.input_paths(&mut need),
            Op::Sort { keys, .. } | Op::Top { keys, .. } => {
                keys.iter().all(|k| k.key.input_paths(&mut need))
            }
            Op::Head { .. } | Op::Tail { .. } | Op::Pass => true,
            Op::Yield { exprs } => {
                return exprs
                    .iter()
                    .all(|e| e.input_paths(&mut need))
                    .then_some(need)
            }
            Op::Cut { args } => {
                return args
                    .iter()
                    .all(|a| a.rhs.input_paths(&mut need))
                    .then_some(need)
            }
            Op::Summarize { keys, aggs, .. } => {
                return keys
                    .iter()
                    .chain(aggs)
                    .all(|a| a.rhs.input_paths(&mut need))
                    .then_some(need)
            }
            _ => return None,
        };
        if !complete {
            return None;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeq_core::expr::{Assignment, BinOp, Expr};
    use lakeq_core::value::Value;

    fn scan() -> Op {
        Op::DefaultScan {
            filter: None,
            demand: None,
        }
    }

    #[test]
    fn summarize_bounds_the_demand() {
        let mut seq = Seq::new(vec![
            scan(),
            Op::Filter {
                expr: Expr::binary(BinOp::Gt, Expr::field("n"), Expr::lit(Value::Int(0))),
            },
            Op::Summarize {
                keys: vec![Assignment::new(Expr::field("k"), Expr::path(&["a", "k"]))],
                aggs: vec![Assignment::new(
                    Expr::field("count"),
                    Expr::Agg {
                        name: "count".into(),
                        expr: None,
                        filter: None,
                    },
                )],
                limit: 0,
                partials_in: false,
                partials_out: false,
                input_sort_dir: None,
            },
        ]);
        mark_demand(&mut seq);
        let Op::DefaultScan { demand, .. } = &seq[0] else {
            panic!("scan moved");
        };
        assert_eq!(
            demand.clone(),
            Some(vec![vec!["n".to_string()], vec!["a".to_string(), "k".to_string()]])
        );
    }

    #[test]
    fn pass_through_chain_needs_everything() {
        let mut seq = Seq::new(vec![scan(), Op::Head { count: 1 }]);
        mark_demand(&mut seq);
        assert_eq!(
            seq[0],
            Op::DefaultScan {
                filter: None,
                demand: None
            }
        );

        let mut seq = Seq::new(vec![
            scan(),
            Op::Yield {
                exprs: vec![Expr::this(Vec::new())],
            },
        ]);
        mark_demand(&mut seq);
        assert!(matches!(seq[0], Op::DefaultScan { demand: None, .. }));
    }
}
