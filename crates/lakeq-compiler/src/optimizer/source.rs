//! Source-path optimization.
//!
//! For every entry point (a sequence starting with a source), a leading
//! filter is handed to the source: pool scans are expanded into a lister
//! with a key-range pruner, an optional slicer, and a sequence scan that
//! applies the filter; file, http, and default scans take the filter
//! directly; a tapped commit-metadata scan becomes a bare pruned listing.

use lakeq_core::dag::{Op, Seq};
use lakeq_core::error::Result;
use lakeq_core::expr::Expr;
use lakeq_core::sortkey::SortKeys;

use super::pruner::key_pruner;
use super::sortkey::groups_on;
use super::Optimizer;

/// File formats whose vectorized readers cannot filter rows and only use
/// the filter to skip row groups.
const PRUNE_ONLY_FORMATS: &[&str] = &["parquet", "csup"];

impl Optimizer<'_> {
    pub(crate) fn optimize_source_path(&self, seq: &mut Seq) -> Result<()> {
        if !seq.first().map(Op::is_source).unwrap_or(false) {
            return Ok(());
        }
        let filter = match seq.get(1) {
            Some(Op::Filter { .. }) => match seq.remove(1) {
                Op::Filter { expr } => Some(expr),
                _ => None,
            },
            _ => None,
        };
        let rest_start = 1;
        match &mut seq[0] {
            Op::PoolScan {
                pool,
                pool_name,
                commit,
            } => {
                let (pool, pool_name, commit) = (*pool, pool_name.clone(), *commit);
                let keys = self
                    .adaptor
                    .sort_keys(pool)
                    .map_err(|e| e.with_context(format!("sort keys of {pool_name}")))?;
                let pruner = match (&filter, keys.primary()) {
                    (Some(f), Some(k)) => key_pruner(&k.path, f),
                    _ => None,
                };
                let mut ops = vec![Op::Lister {
                    pool,
                    pool_name: pool_name.clone(),
                    commit,
                    key_pruner: pruner.clone(),
                }];
                if !keys.is_nil() && needs_order(&seq[rest_start..], &keys) {
                    ops.push(Op::Slicer { pool });
                }
                ops.push(Op::SeqScan {
                    pool,
                    pool_name: pool_name.clone(),
                    commit,
                    filter,
                    key_pruner: pruner,
                    demand: None,
                });
                tracing::debug!(pool = %pool_name, slicer = ops.len() == 3, "expanded pool scan");
                seq.splice(0..1, ops);
            }
            Op::FileScan {
                format,
                filter: slot,
                pruner,
                ..
            } => {
                let prune_only = self.config.vectorized
                    && format
                        .as_deref()
                        .map(|f| PRUNE_ONLY_FORMATS.contains(&f))
                        .unwrap_or(false);
                match filter {
                    Some(f) if prune_only => {
                        *pruner = Some(f.clone());
                        seq.insert(rest_start, Op::Filter { expr: f });
                    }
                    Some(f) => *slot = Some(conjoin(slot.take(), f)),
                    None => {}
                }
            }
            Op::DefaultScan { filter: slot, .. } | Op::HttpScan { filter: slot, .. } => {
                if let Some(f) = filter {
                    *slot = Some(conjoin(slot.take(), f));
                }
            }
            Op::CommitMetaScan {
                pool,
                pool_name,
                tap: true,
                key_pruner: slot,
                ..
            } => {
                let keys = self
                    .adaptor
                    .sort_keys(*pool)
                    .map_err(|e| e.with_context(format!("sort keys of {pool_name}")))?;
                if let (Some(f), Some(k)) = (&filter, keys.primary()) {
                    *slot = key_pruner(&k.path, f);
                }
                seq.truncate(1);
            }
            _ => {
                if let Some(expr) = filter {
                    seq.insert(rest_start, Op::Filter { expr });
                }
            }
        }
        Ok(())
    }
}

fn conjoin(prev: Option<Expr>, f: Expr) -> Expr {
    match prev {
        Some(p) => Expr::and(p, f),
        None => f,
    }
}

/// Whether the operators after a scan depend on it producing rows in pool
/// key order. Row-wise operators are looked through; a sort re-establishes
/// order itself; a summarize benefits only when it groups on the key; the
/// end of the chain and every other operator are assumed to need it.
pub fn needs_order(rest: &[Op], keys: &SortKeys) -> bool {
    for op in rest {
        match op {
            Op::Filter { .. }
            | Op::Pass
            | Op::Put { .. }
            | Op::Cut { .. }
            | Op::Drop { .. }
            | Op::Rename { .. }
            | Op::Yield { .. }
            | Op::Explode { .. }
            | Op::Fuse => continue,
            Op::Sort { .. } | Op::Top { .. } => return false,
            Op::Summarize { keys: by, .. } => {
                return by.first().map(|k| groups_on(k, keys)).unwrap_or(false)
            }
            _ => return true,
        }
    }
    true
}
