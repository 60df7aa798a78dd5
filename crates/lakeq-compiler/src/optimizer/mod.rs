//! DAG optimizer.
//!
//! [`Optimizer::optimize`] runs a fixed pipeline of rewrites over the
//! sequence produced by semantic analysis:
//!
//! 1. flatten declaration scopes
//! 2. lift filters above record projections
//! 3. merge adjacent filters
//! 4. merge adjacent projections
//! 5. inline nested spreads
//! 6. remove pass-through operators
//! 7. lift operators across parallel branches
//! 8. pick hash joins for equality predicates
//! 9. source-path pushdown and sort-key propagation
//! 10. merge filters and remove passes again, then mark source demand
//!
//! The scan parallelization ([`Optimizer::parallelize`]) and the deletion
//! rewrite ([`Optimizer::optimize_deleter`]) are separate entry points.
//!
//! A violated structural precondition is reported as
//! [`Error::Internal`](lakeq_core::error::Error::Internal): it means an
//! earlier pass produced a malformed DAG, not that the query is wrong.

mod cleanup;
mod deleter;
mod demand;
mod filter;
mod join;
mod parallel;
mod pruner;
mod sortkey;
mod source;
mod yields;

use lakeq_core::config::CompilerConfig;
use lakeq_core::dag::{walk_seqs_mut, Seq};
use lakeq_core::error::{Error, Result};
use lakeq_core::lake::DataAdaptor;

pub use pruner::key_pruner;
pub use sortkey::{propagate, transfer};
pub use source::needs_order;

pub struct Optimizer<'a> {
    adaptor: &'a dyn DataAdaptor,
    config: &'a CompilerConfig,
}

impl<'a> Optimizer<'a> {
    pub fn new(adaptor: &'a dyn DataAdaptor, config: &'a CompilerConfig) -> Self {
        Self { adaptor, config }
    }

    /// Run the rewrite pipeline.
    pub fn optimize(&self, mut seq: Seq) -> Result<Seq> {
        check_structure(&mut seq)?;

        cleanup::flatten_scopes(&mut seq);
        filter::lift_filters(&mut seq);
        filter::merge_filters(&mut seq);
        yields::merge_yields(&mut seq);
        yields::inline_spreads(&mut seq);
        cleanup::remove_passes(&mut seq);
        parallel::optimize_parallels(&mut seq);
        join::rewrite_joins(&mut seq);
        self.optimize_source_paths(&mut seq)?;
        filter::merge_filters(&mut seq);
        cleanup::remove_passes(&mut seq);
        demand::mark_demand(&mut seq);

        tracing::debug!(ops = seq.len(), "optimization complete");
        Ok(seq)
    }

    /// Replicate the pool scan at the head of `seq` into `n` scattered
    /// branches; returns whether the sequence was rewritten.
    pub fn parallelize(&self, seq: &mut Seq, n: usize) -> Result<bool> {
        parallel::parallelize(self, seq, n)
    }

    /// Rewrite `[DeleteScan, Filter, Output]` into a lister feeding `n`
    /// deleters.
    pub fn optimize_deleter(&self, seq: Seq, n: usize) -> Result<Seq> {
        deleter::optimize_deleter(self, seq, n)
    }

    /// Source pushdown over every entry point, then sort-key propagation.
    pub fn optimize_source_paths(&self, seq: &mut Seq) -> Result<()> {
        walk_seqs_mut(seq, &mut |s| self.optimize_source_path(s))?;
        propagate(self.adaptor, seq, Vec::new())?;
        Ok(())
    }
}

/// Every sequence in the tree must hold at least one operator.
fn check_structure(seq: &mut Seq) -> Result<()> {
    walk_seqs_mut(seq, &mut |s| {
        if s.is_empty() {
            let err = Error::internal("empty sequential operator");
            tracing::error!(error = %err, "malformed dag");
            return Err(err);
        }
        Ok(())
    })
}
