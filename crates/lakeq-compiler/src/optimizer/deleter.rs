//! Deletion rewrite.

use lakeq_core::dag::{Op, Seq};
use lakeq_core::error::{Error, Result};

use super::pruner::key_pruner;
use super::Optimizer;

/// Rewrite `[DeleteScan, Filter, Output]` so a lister hands objects to
/// deleters. With `n > 1` the lister and deleter are replicated into a
/// scatter; the listers share one scheduler at build time, so the
/// replicas split the objects between them.
pub(crate) fn optimize_deleter(opt: &Optimizer<'_>, seq: Seq, n: usize) -> Result<Seq> {
    let ops = seq.into_inner();
    let [Op::DeleteScan {
        pool,
        pool_name,
        commit,
    }, Op::Filter { expr }, Op::Output { .. }] = ops.as_slice()
    else {
        return Err(Error::InvalidDeleteWhere);
    };
    let keys = opt
        .adaptor
        .sort_keys(*pool)
        .map_err(|e| e.with_context(format!("sort keys of {pool_name}")))?;
    let pruner = keys.primary().and_then(|k| key_pruner(&k.path, expr));
    let lister = Op::Lister {
        pool: *pool,
        pool_name: pool_name.clone(),
        commit: *commit,
        key_pruner: pruner,
    };
    let deleter = Op::Deleter {
        pool: *pool,
        pool_name: pool_name.clone(),
        filter: expr.clone(),
    };
    let output = Op::Output {
        name: "main".to_string(),
    };
    tracing::debug!(pool = %pool_name, replicas = n, "rewrote delete query");
    let out = if n > 1 {
        let branch = Seq::new(vec![lister, deleter]);
        vec![
            Op::Scatter {
                paths: vec![branch; n],
            },
            Op::Combine,
            output,
        ]
    } else {
        vec![lister, deleter, output]
    };
    Ok(Seq::new(out))
}
