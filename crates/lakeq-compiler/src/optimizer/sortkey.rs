//! Sort-key propagation.
//!
//! [`transfer`] maps the proven order of an operator's input to the order
//! of its output for operators that act row by row. [`propagate`] walks a
//! whole sequence, handling sources, containers, merges, and aggregations,
//! and records what it learns on the DAG: a summarize whose input arrives
//! sorted on its primary key gets `input_sort_dir`, and a hash join learns
//! which of its inputs is sorted on its join key.

use lakeq_core::dag::{Op, Seq};
use lakeq_core::error::{Error, Result};
use lakeq_core::expr::{Assignment, Expr, RecordElem};
use lakeq_core::functions;
use lakeq_core::lake::DataAdaptor;
use lakeq_core::sortkey::{Order, SortKey, SortKeys};

/// Output order of a row-wise operator given its input order.
pub fn transfer(op: &Op, keys: &SortKeys) -> SortKeys {
    if keys.is_nil() {
        return match op {
            Op::Sort { keys: by, .. } | Op::Top { keys: by, .. } => sort_keys_of(by),
            _ => SortKeys::nil(),
        };
    }
    match op {
        Op::Filter { .. }
        | Op::Pass
        | Op::Head { .. }
        | Op::Tail { .. }
        | Op::Uniq { .. }
        | Op::Fuse => keys.clone(),
        Op::Sort { keys: by, .. } | Op::Top { keys: by, .. } => sort_keys_of(by),
        Op::Cut { args } => retain_keys(keys, |path| {
            args.iter()
                .find(|a| a.rhs.as_path() == Some(path))
                .and_then(|a| a.lhs.as_path().map(<[String]>::to_vec))
        }),
        Op::Put { args } => retain_keys(keys, |path| {
            let clobbered = args
                .iter()
                .filter_map(|a| a.lhs.as_path())
                .any(|lhs| overlaps(lhs, path));
            (!clobbered).then(|| path.to_vec())
        }),
        Op::Drop { args } => retain_keys(keys, |path| {
            let dropped = args
                .iter()
                .filter_map(Expr::as_path)
                .any(|p| overlaps(p, path));
            (!dropped).then(|| path.to_vec())
        }),
        Op::Rename { args } => retain_keys(keys, |path| Some(renamed(args, path))),
        Op::Yield { exprs } => match exprs.as_slice() {
            [Expr::Record { elems }] => retain_keys(keys, |path| yielded(elems, path)),
            _ => SortKeys::nil(),
        },
        _ => SortKeys::nil(),
    }
}

/// Keep the longest prefix of `keys` whose paths survive `map`.
fn retain_keys(keys: &SortKeys, mut map: impl FnMut(&[String]) -> Option<Vec<String>>) -> SortKeys {
    let mut out = Vec::new();
    for k in &keys.0 {
        match map(&k.path) {
            Some(path) => out.push(SortKey::new(path, k.order)),
            None => break,
        }
    }
    SortKeys(out)
}

fn sort_keys_of(by: &[lakeq_core::dag::SortExpr]) -> SortKeys {
    let mut out = Vec::with_capacity(by.len());
    for s in by {
        match s.key.as_path() {
            Some(path) if !path.is_empty() => out.push(SortKey::new(path.to_vec(), s.order)),
            _ => break,
        }
    }
    SortKeys(out)
}

/// One path is a prefix of the other.
fn overlaps(a: &[String], b: &[String]) -> bool {
    let n = a.len().min(b.len());
    a[..n] == b[..n]
}

fn renamed(args: &[Assignment], path: &[String]) -> Vec<String> {
    for a in args {
        let (Some(from), Some(to)) = (a.rhs.as_path(), a.lhs.as_path()) else {
            continue;
        };
        if path.starts_with(from) {
            let mut out = to.to_vec();
            out.extend_from_slice(&path[from.len()..]);
            return out;
        }
    }
    path.to_vec()
}

/// Where `path` of the input ends up in a yielded record, if it survives
/// unchanged.
fn yielded(elems: &[RecordElem], path: &[String]) -> Option<Vec<String>> {
    for (i, elem) in elems.iter().enumerate().rev() {
        match elem {
            RecordElem::Field { name, value } => {
                // A later field of the same name replaces this one.
                let replaced = elems[i + 1..]
                    .iter()
                    .any(|e| matches!(e, RecordElem::Field { name: n, .. } if n == name));
                if replaced {
                    continue;
                }
                if let Some(src) = value.as_path() {
                    if path.starts_with(src) {
                        let mut out = vec![name.clone()];
                        out.extend_from_slice(&path[src.len()..]);
                        return Some(out);
                    }
                }
            }
            RecordElem::Spread {
                expr: Expr::This { path: src },
            } if src.is_empty() && i == 0 => {
                let clobbered = elems[1..].iter().any(
                    |e| matches!(e, RecordElem::Field { name, .. } if path.first() == Some(name)),
                );
                return (!clobbered).then(|| path.to_vec());
            }
            RecordElem::Spread { .. } => return None,
        }
    }
    None
}

/// The key a summarize groups by can stream when its first key reads the
/// input's primary sort path, directly or through an order-preserving
/// function such as `bucket`.
pub(crate) fn groups_on(key: &Assignment, order: &SortKeys) -> bool {
    let Some(primary) = order.primary() else {
        return false;
    };
    let reads = |e: &Expr| e.as_path() == Some(primary.path.as_slice());
    match &key.rhs {
        e if reads(e) => true,
        Expr::Call { name, args } => {
            functions::preserves_order(name) && args.first().map(reads).unwrap_or(false)
        }
        _ => false,
    }
}

fn single(parents: &[SortKeys]) -> SortKeys {
    match parents {
        [one] => one.clone(),
        _ => SortKeys::nil(),
    }
}

/// Propagate `parents` (one order per upstream) through `seq`, annotating
/// the DAG, and return the orders of the sequence's outputs.
pub fn propagate(adaptor: &dyn DataAdaptor, seq: &mut Seq, parents: Vec<SortKeys>) -> Result<Vec<SortKeys>> {
    let mut cur = parents;
    let mut after_slicer = false;
    for op in seq.iter_mut() {
        let sliced = std::mem::replace(&mut after_slicer, false);
        cur = match &mut *op {
            Op::PoolScan { pool, pool_name, .. } => vec![adaptor
                .sort_keys(*pool)
                .map_err(|e| e.with_context(format!("sort keys of {pool_name}")))?],
            Op::SeqScan { pool, pool_name, .. } => {
                if sliced {
                    vec![adaptor
                        .sort_keys(*pool)
                        .map_err(|e| e.with_context(format!("sort keys of {pool_name}")))?]
                } else {
                    vec![SortKeys::nil()]
                }
            }
            Op::Slicer { .. } => {
                after_slicer = true;
                vec![SortKeys::nil()]
            }
            Op::DefaultScan { .. }
            | Op::FileScan { .. }
            | Op::HttpScan { .. }
            | Op::LakeMetaScan { .. }
            | Op::PoolMetaScan { .. }
            | Op::CommitMetaScan { .. }
            | Op::DeleteScan { .. }
            | Op::Lister { .. }
            | Op::Deleter { .. } => vec![SortKeys::nil()],
            Op::Fork { paths } | Op::Scatter { paths } => {
                let mut out = Vec::with_capacity(paths.len());
                for p in paths.iter_mut() {
                    out.extend(propagate(adaptor, p, cur.clone())?);
                }
                out
            }
            Op::Switch { cases, .. } => {
                let mut out = Vec::with_capacity(cases.len());
                for c in cases.iter_mut() {
                    out.extend(propagate(adaptor, &mut c.path, cur.clone())?);
                }
                out
            }
            Op::Mirror { main, mirror } => {
                propagate(adaptor, mirror, cur.clone())?;
                propagate(adaptor, main, cur.clone())?
            }
            Op::Scope { body } => propagate(adaptor, body, cur.clone())?,
            Op::Over { body, .. } => {
                if let Some(body) = body {
                    propagate(adaptor, body, vec![SortKeys::nil()])?;
                }
                vec![SortKeys::nil()]
            }
            Op::Merge { expr, order } => {
                let key = match expr.as_path() {
                    Some(path) if !path.is_empty() => {
                        SortKeys::single(SortKey::new(path.to_vec(), *order))
                    }
                    _ => SortKeys::nil(),
                };
                if !cur.is_empty() && cur.iter().all(|k| *k == key) {
                    vec![key]
                } else {
                    vec![SortKeys::nil()]
                }
            }
            Op::Combine | Op::Join { .. } | Op::Output { .. } | Op::Load { .. } => {
                vec![SortKeys::nil()]
            }
            Op::HashJoin {
                left_key,
                right_key,
                left_sorted,
                right_sorted,
                ..
            } => {
                let [left, right] = cur.as_slice() else {
                    return Err(Error::internal(format!(
                        "hash join with {} upstream paths",
                        cur.len()
                    )));
                };
                *left_sorted = sorted_on(left, left_key);
                *right_sorted = sorted_on(right, right_key);
                vec![SortKeys::nil()]
            }
            Op::Summarize {
                keys,
                input_sort_dir,
                ..
            } => {
                let parent = single(&cur);
                match keys.first() {
                    Some(key) if groups_on(key, &parent) => {
                        let order = parent.primary().map(|k| k.order).unwrap_or(Order::Asc);
                        *input_sort_dir = Some(order);
                        match key.lhs.as_path() {
                            Some(path) => vec![SortKeys::single(SortKey::new(path.to_vec(), order))],
                            None => vec![SortKeys::nil()],
                        }
                    }
                    _ => {
                        *input_sort_dir = None;
                        vec![SortKeys::nil()]
                    }
                }
            }
            other => vec![transfer(other, &single(&cur))],
        };
        tracing::trace!(op = op.kind(), order = %single(&cur), "propagated sort keys");
    }
    Ok(cur)
}

fn sorted_on(keys: &SortKeys, key: &Expr) -> bool {
    matches!(key.as_path(), Some(path) if !path.is_empty() && keys.primary_is(path))
}
