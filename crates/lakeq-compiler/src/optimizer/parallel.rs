//! Parallel branches.
//!
//! [`optimize_parallels`] pulls the operator following a fork or scatter
//! into its branches when doing so is safe. [`parallelize`] replicates a
//! pool scan and the longest safe prefix of its chain into scattered
//! branches that split the pool's objects between them.

use lakeq_core::dag::{walk_seqs_mut, Op, Seq, SortExpr};
use lakeq_core::error::Result;
use lakeq_core::expr::{Assignment, Expr};
use lakeq_core::sortkey::{Order, SortKey, SortKeys};

use super::sortkey::{groups_on, propagate, transfer};
use super::source::needs_order;
use super::Optimizer;

pub(crate) fn optimize_parallels(seq: &mut Seq) {
    let _ = walk_seqs_mut::<()>(seq, &mut |s| {
        let mut i = 0;
        while i < s.len() {
            if !lift_into_branches(s, i) {
                i += 1;
            }
        }
        Ok(())
    });
}

fn branches_mut(op: &mut Op) -> Option<&mut Vec<Seq>> {
    match op {
        Op::Fork { paths } | Op::Scatter { paths } => Some(paths),
        _ => None,
    }
}

/// A branch ending in an output or load emits nothing downstream, so
/// nothing after the fan-out may be moved into it.
fn dead_end(path: &Seq) -> bool {
    matches!(path.last(), Some(Op::Output { .. } | Op::Load { .. }))
}

/// Try one lift at fan-out position `i`; `true` if the sequence changed.
fn lift_into_branches(s: &mut Seq, i: usize) -> bool {
    let Some(paths) = s.get(i).and_then(|op| match op {
        Op::Fork { paths } | Op::Scatter { paths } => Some(paths),
        _ => None,
    }) else {
        return false;
    };
    if paths.is_empty() || paths.iter().any(dead_end) {
        return false;
    }
    let merge_at = i + 1;
    let (merge, j) = match s.get(merge_at) {
        Some(Op::Merge { expr, order }) => (Some((expr.clone(), *order)), merge_at + 1),
        Some(Op::Combine) => (None, merge_at + 1),
        _ => (None, merge_at),
    };
    let has_joiner = j > merge_at;
    let Some(candidate) = s.get(j).cloned() else {
        return false;
    };
    let merge_key = merge.as_ref().and_then(|(expr, order)| {
        expr.as_path()
            .filter(|p| !p.is_empty())
            .map(|p| SortKeys::single(SortKey::new(p.to_vec(), *order)))
    });

    match candidate {
        Op::Summarize {
            keys,
            aggs,
            limit,
            partials_in: false,
            partials_out: false,
            ..
        } => {
            let partial = Op::Summarize {
                keys: keys.clone(),
                aggs: aggs.clone(),
                limit,
                partials_in: false,
                partials_out: true,
                input_sort_dir: None,
            };
            push_into_branches(s, i, &partial);
            // Rows leaving the branches carry the key values under their
            // output names, so the merging summarize reads those.
            let merged_keys: Vec<Assignment> = keys
                .iter()
                .map(|k| Assignment::new(k.lhs.clone(), k.lhs.clone()))
                .collect();
            let rejoin = match &merge {
                Some((expr, Order::Asc)) => keys
                    .iter()
                    .find(|k| k.rhs == *expr)
                    .map(|k| Op::Merge {
                        expr: k.lhs.clone(),
                        order: Order::Asc,
                    })
                    .unwrap_or(Op::Combine),
                _ => Op::Combine,
            };
            s[j] = Op::Summarize {
                keys: merged_keys,
                aggs,
                limit,
                partials_in: true,
                partials_out: false,
                input_sort_dir: None,
            };
            set_joiner(s, merge_at, has_joiner, rejoin);
            tracing::debug!("split summarize across parallel branches");
            true
        }
        Op::Sort {
            keys,
            nulls_first: false,
        } if keys.len() == 1 => {
            let SortExpr { key, order } = &keys[0];
            if key.as_path().map(|p| p.is_empty()).unwrap_or(true) {
                return false;
            }
            let wanted = (key.clone(), *order);
            if merge.as_ref().map(|m| *m != wanted).unwrap_or(false) {
                return false;
            }
            let sort = s[j].clone();
            push_into_branches(s, i, &sort);
            s.remove(j);
            set_joiner(
                s,
                merge_at,
                has_joiner,
                Op::Merge {
                    expr: wanted.0,
                    order: wanted.1,
                },
            );
            tracing::debug!("pushed sort into parallel branches");
            true
        }
        Op::Head { .. } | Op::Tail { .. } => {
            let already = branches_mut(&mut s[i])
                .map(|paths| paths.iter().all(|p| p.last() == Some(&candidate)))
                .unwrap_or(true);
            if already {
                return false;
            }
            push_into_branches(s, i, &candidate);
            true
        }
        Op::Cut { .. }
        | Op::Drop { .. }
        | Op::Put { .. }
        | Op::Rename { .. }
        | Op::Yield { .. }
        | Op::Filter { .. } => {
            if let Some(key) = &merge_key {
                if transfer(&candidate, key) != *key {
                    return false;
                }
            }
            push_into_branches(s, i, &candidate);
            s.remove(j);
            tracing::trace!(op = candidate.kind(), "lifted operator into parallel branches");
            true
        }
        _ => false,
    }
}

fn push_into_branches(s: &mut Seq, i: usize, op: &Op) {
    if let Some(paths) = branches_mut(&mut s[i]) {
        for path in paths.iter_mut() {
            path.retain(|o| !matches!(o, Op::Pass));
            path.push(op.clone());
        }
    }
}

/// Put `joiner` right after the fan-out, replacing any existing one.
fn set_joiner(s: &mut Seq, at: usize, has_joiner: bool, joiner: Op) {
    if has_joiner {
        s[at] = joiner;
    } else {
        s.insert(at, joiner);
    }
}

/// What [`concurrent_path`] found: how many operators after the scan can
/// run in every replica, the order they leave behind, and whether the
/// last of them is a summarize to split into partials.
struct ConcurrentPath {
    len: usize,
    order: SortKeys,
    split_summarize: bool,
}

/// The longest prefix of `rest` safe to replicate behind a scan producing
/// rows in `order`.
fn concurrent_path(rest: &[Op], mut order: SortKeys) -> ConcurrentPath {
    for (i, op) in rest.iter().enumerate() {
        match op {
            Op::Summarize {
                keys,
                partials_in: false,
                partials_out: false,
                ..
            } => {
                let Some(first) = keys.first().filter(|k| groups_on(k, &order)) else {
                    return ConcurrentPath {
                        len: i,
                        order,
                        split_summarize: false,
                    };
                };
                let order = match (first.lhs.as_path(), order.primary()) {
                    (Some(path), Some(k)) => SortKeys::single(SortKey::new(path.to_vec(), k.order)),
                    _ => SortKeys::nil(),
                };
                return ConcurrentPath {
                    len: i + 1,
                    order,
                    split_summarize: true,
                };
            }
            Op::Sort { keys, .. } if keys.len() == 1 && keys[0].key.as_path().is_some() => {
                order = transfer(op, &order);
            }
            Op::Load { .. }
            | Op::Fork { .. }
            | Op::Scatter { .. }
            | Op::Mirror { .. }
            | Op::Head { .. }
            | Op::Tail { .. }
            | Op::Uniq { .. }
            | Op::Fuse
            | Op::Join { .. }
            | Op::HashJoin { .. }
            | Op::Output { .. }
            | Op::Switch { .. }
            | Op::Over { .. }
            | Op::Merge { .. }
            | Op::Combine
            | Op::Scope { .. }
            | Op::Summarize { .. }
            | Op::Sort { .. }
            | Op::Top { .. } => {
                return ConcurrentPath {
                    len: i,
                    order,
                    split_summarize: false,
                }
            }
            _ => {
                let next = transfer(op, &order);
                if !order.is_nil() && next.is_nil() {
                    return ConcurrentPath {
                        len: i,
                        order,
                        split_summarize: false,
                    };
                }
                order = next;
            }
        }
    }
    ConcurrentPath {
        len: rest.len(),
        order,
        split_summarize: false,
    }
}

pub(crate) fn parallelize(opt: &Optimizer<'_>, seq: &mut Seq, n: usize) -> Result<bool> {
    if n < 2 {
        return Ok(false);
    }
    let Some(Op::Lister { pool, .. }) = seq.first() else {
        return Ok(false);
    };
    let pool = *pool;
    let Some(scan_at) = seq
        .iter()
        .take(3)
        .position(|op| matches!(op, Op::SeqScan { .. }))
    else {
        return Ok(false);
    };
    let sliced = matches!(seq.get(1), Some(Op::Slicer { .. }));
    let filtered = matches!(&seq[scan_at], Op::SeqScan { filter: Some(_), .. });
    let rest = &seq[scan_at + 1..];
    if rest.is_empty() && !filtered {
        return Ok(false);
    }

    let order = if sliced {
        opt.adaptor.sort_keys(pool)?
    } else {
        SortKeys::nil()
    };
    let path = concurrent_path(rest, order);

    let mut ops = std::mem::take(&mut seq.0);
    let mut remainder = ops.split_off(scan_at + 1 + path.len);
    if path.split_summarize {
        if let Some(Op::Summarize {
            keys,
            aggs,
            limit,
            partials_out,
            ..
        }) = ops.last_mut()
        {
            *partials_out = true;
            let merged = Op::Summarize {
                keys: keys
                    .iter()
                    .map(|k| Assignment::new(k.lhs.clone(), k.lhs.clone()))
                    .collect(),
                aggs: aggs.clone(),
                limit: *limit,
                partials_in: true,
                partials_out: false,
                input_sort_dir: None,
            };
            remainder.insert(0, merged);
        }
    }
    let joiner = match path.order.primary() {
        Some(key) if needs_order(&remainder, &path.order) => Op::Merge {
            expr: Expr::this(key.path.clone()),
            order: key.order,
        },
        _ => Op::Combine,
    };
    tracing::debug!(
        replicas = n,
        replicated = ops.len(),
        merge = matches!(joiner, Op::Merge { .. }),
        "parallelized pool scan"
    );

    let branch = Seq::new(ops);
    let mut out = vec![
        Op::Scatter {
            paths: vec![branch; n],
        },
        joiner,
    ];
    out.extend(remainder);
    *seq = Seq::new(out);
    propagate(opt.adaptor, seq, Vec::new())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeq_core::expr::BinOp;
    use lakeq_core::value::Value;

    fn fork(paths: Vec<Seq>) -> Op {
        Op::Fork { paths }
    }

    #[test]
    fn summarize_after_fork_splits_into_partials() {
        let count = Expr::Agg {
            name: "count".into(),
            expr: None,
            filter: None,
        };
        let mut seq = Seq::new(vec![
            fork(vec![Seq::pass(), Seq::pass()]),
            Op::Combine,
            Op::Summarize {
                keys: vec![Assignment::new(Expr::field("k"), Expr::path(&["a", "k"]))],
                aggs: vec![Assignment::new(Expr::field("count"), count.clone())],
                limit: 0,
                partials_in: false,
                partials_out: false,
                input_sort_dir: None,
            },
        ]);
        optimize_parallels(&mut seq);
        let Op::Fork { paths } = &seq[0] else {
            panic!("fork moved");
        };
        for p in paths {
            assert!(matches!(
                p.as_slice(),
                [Op::Summarize { partials_out: true, partials_in: false, .. }]
            ));
        }
        assert_eq!(seq[1], Op::Combine);
        assert_eq!(
            seq[2],
            Op::Summarize {
                keys: vec![Assignment::new(Expr::field("k"), Expr::field("k"))],
                aggs: vec![Assignment::new(Expr::field("count"), count)],
                limit: 0,
                partials_in: true,
                partials_out: false,
                input_sort_dir: None,
            }
        );
    }

    #[test]
    fn filters_lift_and_head_is_copied_once() {
        let filter = Op::Filter {
            expr: Expr::binary(BinOp::Gt, Expr::field("x"), Expr::lit(Value::Int(1))),
        };
        let mut seq = Seq::new(vec![
            fork(vec![Seq::pass(), Seq::pass()]),
            filter.clone(),
            Op::Head { count: 3 },
        ]);
        optimize_parallels(&mut seq);
        let once = seq.clone();
        optimize_parallels(&mut seq);
        assert_eq!(seq, once);
        assert_eq!(seq.len(), 2);
        let Op::Fork { paths } = &seq[0] else {
            panic!("fork moved");
        };
        for p in paths {
            assert_eq!(p.as_slice(), &[filter.clone(), Op::Head { count: 3 }]);
        }
        assert_eq!(seq[1], Op::Head { count: 3 });
    }

    #[test]
    fn sort_synthesizes_merge() {
        let sort = Op::Sort {
            keys: vec![SortExpr::new(Expr::field("ts"), Order::Desc)],
            nulls_first: false,
        };
        let mut seq = Seq::new(vec![fork(vec![Seq::pass(), Seq::pass()]), sort.clone()]);
        optimize_parallels(&mut seq);
        assert_eq!(
            seq[1],
            Op::Merge {
                expr: Expr::field("ts"),
                order: Order::Desc
            }
        );
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn nothing_lifts_into_dead_end_branches() {
        let mut seq = Seq::new(vec![
            fork(vec![
                Seq::new(vec![Op::Output {
                    name: "a".into(),
                }]),
                Seq::pass(),
            ]),
            Op::Head { count: 1 },
        ]);
        let before = seq.clone();
        optimize_parallels(&mut seq);
        assert_eq!(seq, before);
    }

    #[test]
    fn concurrent_path_stops_at_boundaries() {
        let ts = SortKeys::single(SortKey::asc(&["ts"]));
        let rest = vec![
            Op::Filter {
                expr: Expr::field("ok"),
            },
            Op::Uniq { cflag: false },
            Op::Filter {
                expr: Expr::field("x"),
            },
        ];
        let path = concurrent_path(&rest, ts.clone());
        assert_eq!(path.len, 1);
        assert_eq!(path.order, ts);

        let rest = vec![Op::Put {
            args: vec![Assignment::new(Expr::field("ts"), Expr::field("other"))],
        }];
        assert_eq!(concurrent_path(&rest, ts).len, 0);
    }
}
