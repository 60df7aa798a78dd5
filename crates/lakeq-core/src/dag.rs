//! The dataflow DAG.
//!
//! The semantic analyzer produces a [`Seq`] of [`Op`]s; the optimizer
//! rewrites it; the builder lowers it into pullers. Containers (fork,
//! scatter, mirror, switch, over, scope) nest further sequences. Every
//! traversal over nested sequences goes through [`Op::child_seqs`] /
//! [`Op::child_seqs_mut`], which match exhaustively so a new container
//! variant cannot be skipped silently.

use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::expr::{Assignment, Expr};
use crate::lake::{CommitId, PoolId};
use crate::sortkey::Order;

/// Ordered list of operators forming a linear pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Seq(pub Vec<Op>);

impl Seq {
    pub fn new(ops: Vec<Op>) -> Self {
        Seq(ops)
    }

    /// A sequence that forwards its input unchanged.
    pub fn pass() -> Self {
        Seq(vec![Op::Pass])
    }

    /// True when the first operator produces its own input.
    pub fn is_entry(&self) -> bool {
        self.0.first().map(Op::is_source).unwrap_or(false)
    }

    pub fn into_inner(self) -> Vec<Op> {
        self.0
    }
}

impl Deref for Seq {
    type Target = Vec<Op>;
    fn deref(&self) -> &Vec<Op> {
        &self.0
    }
}

impl DerefMut for Seq {
    fn deref_mut(&mut self) -> &mut Vec<Op> {
        &mut self.0
    }
}

impl From<Vec<Op>> for Seq {
    fn from(ops: Vec<Op>) -> Self {
        Seq(ops)
    }
}

impl IntoIterator for Seq {
    type Item = Op;
    type IntoIter = std::vec::IntoIter<Op>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortExpr {
    pub key: Expr,
    pub order: Order,
}

impl SortExpr {
    pub fn new(key: Expr, order: Order) -> Self {
        Self { key, order }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinStyle {
    Inner,
    Left,
    Right,
    Anti,
    Cross,
}

impl JoinStyle {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "inner" => Some(JoinStyle::Inner),
            "left" => Some(JoinStyle::Left),
            "right" => Some(JoinStyle::Right),
            "anti" => Some(JoinStyle::Anti),
            "cross" => Some(JoinStyle::Cross),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JoinStyle::Inner => "inner",
            JoinStyle::Left => "left",
            JoinStyle::Right => "right",
            JoinStyle::Anti => "anti",
            JoinStyle::Cross => "cross",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    /// `None` routes everything no other case matched.
    pub expr: Option<Expr>,
    pub path: Seq,
}

/// Lateral binding evaluated against the outer row and visible to the
/// body as a variable slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Def {
    pub name: String,
    pub expr: Expr,
}

/// Field paths a source must produce; `None` means everything.
pub type Demand = Option<Vec<Vec<String>>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Op {
    // --- sources ---
    /// Values supplied by the caller's in-process readers.
    DefaultScan {
        filter: Option<Expr>,
        demand: Demand,
    },
    FileScan {
        path: String,
        format: Option<String>,
        filter: Option<Expr>,
        /// Metadata-level pruner for formats that cannot filter rows.
        pruner: Option<Expr>,
        demand: Demand,
    },
    HttpScan {
        url: String,
        format: Option<String>,
        method: Option<String>,
        filter: Option<Expr>,
        demand: Demand,
    },
    /// Unoptimized scan of a pool at a commit.
    PoolScan {
        pool: PoolId,
        pool_name: String,
        commit: CommitId,
    },
    LakeMetaScan {
        meta: String,
    },
    PoolMetaScan {
        pool: PoolId,
        pool_name: String,
        meta: String,
    },
    CommitMetaScan {
        pool: PoolId,
        pool_name: String,
        commit: CommitId,
        meta: String,
        tap: bool,
        key_pruner: Option<Expr>,
    },
    /// Scan of the rows matched by a `delete where`; only valid as the head
    /// of `[DeleteScan, Filter, Output]`, which the deleter rewrite replaces.
    DeleteScan {
        pool: PoolId,
        pool_name: String,
        commit: CommitId,
    },
    /// Enumerates the pool's data objects at a commit, skipping those the
    /// pruner proves irrelevant.
    Lister {
        pool: PoolId,
        pool_name: String,
        commit: CommitId,
        key_pruner: Option<Expr>,
    },
    /// Groups listed objects into slices of overlapping key ranges.
    Slicer {
        pool: PoolId,
    },
    /// Reads the rows of each object (or slice) handed to it.
    SeqScan {
        pool: PoolId,
        pool_name: String,
        commit: CommitId,
        filter: Option<Expr>,
        key_pruner: Option<Expr>,
        demand: Demand,
    },
    /// Emits the rows of each listed object that do not match `filter` and
    /// records the object in the deletion set when any row did.
    Deleter {
        pool: PoolId,
        pool_name: String,
        filter: Expr,
    },

    // --- transforms ---
    Filter {
        expr: Expr,
    },
    Yield {
        exprs: Vec<Expr>,
    },
    Summarize {
        keys: Vec<Assignment>,
        aggs: Vec<Assignment>,
        limit: usize,
        partials_in: bool,
        partials_out: bool,
        /// Set when the input is proven sorted on the primary group key,
        /// letting groups be emitted as soon as the key moves past them.
        input_sort_dir: Option<Order>,
    },
    Cut {
        args: Vec<Assignment>,
    },
    Drop {
        args: Vec<Expr>,
    },
    Put {
        args: Vec<Assignment>,
    },
    Rename {
        args: Vec<Assignment>,
    },
    Sort {
        keys: Vec<SortExpr>,
        nulls_first: bool,
    },
    Top {
        limit: usize,
        keys: Vec<SortExpr>,
        nulls_first: bool,
    },
    Head {
        count: usize,
    },
    Tail {
        count: usize,
    },
    Uniq {
        cflag: bool,
    },
    Pass,
    Fuse,
    Explode {
        args: Vec<Expr>,
        alias: String,
    },

    // --- topology ---
    /// Copies every input value to each path.
    Fork {
        paths: Vec<Seq>,
    },
    /// Hands each input batch to exactly one path.
    Scatter {
        paths: Vec<Seq>,
    },
    Mirror {
        main: Seq,
        mirror: Seq,
    },
    /// Order-preserving k-way merge of the upstream paths.
    Merge {
        expr: Expr,
        order: Order,
    },
    /// Unordered merge of the upstream paths.
    Combine,
    Switch {
        /// `None` makes every case expression a boolean guard.
        expr: Option<Expr>,
        cases: Vec<Case>,
    },
    /// Output rows are `{<left_alias>: l, <right_alias>: r}`; with no left
    /// alias the left record's fields are spread into the output instead.
    /// `cond` is evaluated against the output row; `None` is a cross join.
    Join {
        style: JoinStyle,
        left_alias: Option<String>,
        right_alias: String,
        cond: Option<Expr>,
    },
    /// Equi-join; `left_key` is evaluated on left rows and `right_key` on
    /// right rows.
    HashJoin {
        style: JoinStyle,
        left_alias: Option<String>,
        right_alias: String,
        left_key: Expr,
        right_key: Expr,
        left_sorted: bool,
        right_sorted: bool,
    },
    Over {
        defs: Vec<Def>,
        exprs: Vec<Expr>,
        body: Option<Seq>,
    },
    Scope {
        body: Seq,
    },
    Output {
        name: String,
    },
    Load {
        pool: PoolId,
        pool_name: String,
        branch: String,
        message: Option<String>,
    },
}

impl Op {
    /// Short lowercase name used in rendering and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Op::DefaultScan { .. } => "defaultscan",
            Op::FileScan { .. } => "file",
            Op::HttpScan { .. } => "http",
            Op::PoolScan { .. } => "poolscan",
            Op::LakeMetaScan { .. } => "lakemeta",
            Op::PoolMetaScan { .. } => "poolmeta",
            Op::CommitMetaScan { .. } => "commitmeta",
            Op::DeleteScan { .. } => "deletescan",
            Op::Lister { .. } => "lister",
            Op::Slicer { .. } => "slicer",
            Op::SeqScan { .. } => "seqscan",
            Op::Deleter { .. } => "deleter",
            Op::Filter { .. } => "where",
            Op::Yield { .. } => "yield",
            Op::Summarize { .. } => "summarize",
            Op::Cut { .. } => "cut",
            Op::Drop { .. } => "drop",
            Op::Put { .. } => "put",
            Op::Rename { .. } => "rename",
            Op::Sort { .. } => "sort",
            Op::Top { .. } => "top",
            Op::Head { .. } => "head",
            Op::Tail { .. } => "tail",
            Op::Uniq { .. } => "uniq",
            Op::Pass => "pass",
            Op::Fuse => "fuse",
            Op::Explode { .. } => "explode",
            Op::Fork { .. } => "fork",
            Op::Scatter { .. } => "scatter",
            Op::Mirror { .. } => "mirror",
            Op::Merge { .. } => "merge",
            Op::Combine => "combine",
            Op::Switch { .. } => "switch",
            Op::Join { .. } => "join",
            Op::HashJoin { .. } => "hashjoin",
            Op::Over { .. } => "over",
            Op::Scope { .. } => "scope",
            Op::Output { .. } => "output",
            Op::Load { .. } => "load",
        }
    }

    /// Operators that produce values without an upstream.
    pub fn is_source(&self) -> bool {
        matches!(
            self,
            Op::DefaultScan { .. }
                | Op::FileScan { .. }
                | Op::HttpScan { .. }
                | Op::PoolScan { .. }
                | Op::LakeMetaScan { .. }
                | Op::PoolMetaScan { .. }
                | Op::CommitMetaScan { .. }
                | Op::DeleteScan { .. }
                | Op::Lister { .. }
        )
    }

    /// Fan-out containers whose branches run side by side.
    pub fn is_parallel(&self) -> bool {
        matches!(self, Op::Fork { .. } | Op::Scatter { .. } | Op::Mirror { .. })
    }

    pub fn child_seqs(&self) -> Vec<&Seq> {
        match self {
            Op::Fork { paths } | Op::Scatter { paths } => paths.iter().collect(),
            Op::Mirror { main, mirror } => vec![main, mirror],
            Op::Switch { cases, .. } => cases.iter().map(|c| &c.path).collect(),
            Op::Over { body, .. } => body.iter().collect(),
            Op::Scope { body } => vec![body],
            Op::DefaultScan { .. }
            | Op::FileScan { .. }
            | Op::HttpScan { .. }
            | Op::PoolScan { .. }
            | Op::LakeMetaScan { .. }
            | Op::PoolMetaScan { .. }
            | Op::CommitMetaScan { .. }
            | Op::DeleteScan { .. }
            | Op::Lister { .. }
            | Op::Slicer { .. }
            | Op::SeqScan { .. }
            | Op::Deleter { .. }
            | Op::Filter { .. }
            | Op::Yield { .. }
            | Op::Summarize { .. }
            | Op::Cut { .. }
            | Op::Drop { .. }
            | Op::Put { .. }
            | Op::Rename { .. }
            | Op::Sort { .. }
            | Op::Top { .. }
            | Op::Head { .. }
            | Op::Tail { .. }
            | Op::Uniq { .. }
            | Op::Pass
            | Op::Fuse
            | Op::Explode { .. }
            | Op::Merge { .. }
            | Op::Combine
            | Op::Join { .. }
            | Op::HashJoin { .. }
            | Op::Output { .. }
            | Op::Load { .. } => Vec::new(),
        }
    }

    pub fn child_seqs_mut(&mut self) -> Vec<&mut Seq> {
        match self {
            Op::Fork { paths } | Op::Scatter { paths } => paths.iter_mut().collect(),
            Op::Mirror { main, mirror } => vec![main, mirror],
            Op::Switch { cases, .. } => cases.iter_mut().map(|c| &mut c.path).collect(),
            Op::Over { body, .. } => body.iter_mut().collect(),
            Op::Scope { body } => vec![body],
            Op::DefaultScan { .. }
            | Op::FileScan { .. }
            | Op::HttpScan { .. }
            | Op::PoolScan { .. }
            | Op::LakeMetaScan { .. }
            | Op::PoolMetaScan { .. }
            | Op::CommitMetaScan { .. }
            | Op::DeleteScan { .. }
            | Op::Lister { .. }
            | Op::Slicer { .. }
            | Op::SeqScan { .. }
            | Op::Deleter { .. }
            | Op::Filter { .. }
            | Op::Yield { .. }
            | Op::Summarize { .. }
            | Op::Cut { .. }
            | Op::Drop { .. }
            | Op::Put { .. }
            | Op::Rename { .. }
            | Op::Sort { .. }
            | Op::Top { .. }
            | Op::Head { .. }
            | Op::Tail { .. }
            | Op::Uniq { .. }
            | Op::Pass
            | Op::Fuse
            | Op::Explode { .. }
            | Op::Merge { .. }
            | Op::Combine
            | Op::Join { .. }
            | Op::HashJoin { .. }
            | Op::Output { .. }
            | Op::Load { .. } => Vec::new(),
        }
    }

    /// Filter stored on a source for pushdown, if the source takes one.
    pub fn pushdown_mut(&mut self) -> Option<&mut Option<Expr>> {
        match self {
            Op::DefaultScan { filter, .. }
            | Op::FileScan { filter, .. }
            | Op::HttpScan { filter, .. }
            | Op::SeqScan { filter, .. } => Some(filter),
            _ => None,
        }
    }

    /// Apply `f` to every expression held directly by this operator
    /// (nested sequences are not visited).
    pub fn visit_exprs_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        fn assignments(args: &mut [Assignment], f: &mut dyn FnMut(&mut Expr)) {
            for a in args {
                f(&mut a.lhs);
                f(&mut a.rhs);
            }
        }
        match self {
            Op::DefaultScan { filter, .. }
            | Op::HttpScan { filter, .. }
            | Op::Lister {
                key_pruner: filter, ..
            }
            | Op::CommitMetaScan {
                key_pruner: filter, ..
            } => filter.iter_mut().for_each(f),
            Op::FileScan { filter, pruner, .. } => {
                filter.iter_mut().for_each(&mut *f);
                pruner.iter_mut().for_each(f);
            }
            Op::SeqScan {
                filter, key_pruner, ..
            } => {
                filter.iter_mut().for_each(&mut *f);
                key_pruner.iter_mut().for_each(f);
            }
            Op::Deleter { filter: expr, .. }
            | Op::Filter { expr }
            | Op::Merge { expr, .. } => f(expr),
            Op::Yield { exprs } | Op::Drop { args: exprs } | Op::Explode { args: exprs, .. } => {
                exprs.iter_mut().for_each(f)
            }
            Op::Summarize { keys, aggs, .. } => {
                assignments(keys, f);
                assignments(aggs, f);
            }
            Op::Cut { args } | Op::Put { args } | Op::Rename { args } => assignments(args, f),
            Op::Sort { keys, .. } | Op::Top { keys, .. } => {
                keys.iter_mut().for_each(|k| f(&mut k.key))
            }
            Op::Switch { expr, cases } => {
                expr.iter_mut().for_each(&mut *f);
                cases
                    .iter_mut()
                    .filter_map(|c| c.expr.as_mut())
                    .for_each(f);
            }
            Op::Join { cond, .. } => cond.iter_mut().for_each(f),
            Op::HashJoin {
                left_key,
                right_key,
                ..
            } => {
                f(left_key);
                f(right_key);
            }
            Op::Over { defs, exprs, .. } => {
                defs.iter_mut().for_each(|d| f(&mut d.expr));
                exprs.iter_mut().for_each(f);
            }
            Op::PoolScan { .. }
            | Op::LakeMetaScan { .. }
            | Op::PoolMetaScan { .. }
            | Op::DeleteScan { .. }
            | Op::Slicer { .. }
            | Op::Head { .. }
            | Op::Tail { .. }
            | Op::Uniq { .. }
            | Op::Pass
            | Op::Fuse
            | Op::Fork { .. }
            | Op::Scatter { .. }
            | Op::Mirror { .. }
            | Op::Combine
            | Op::Scope { .. }
            | Op::Output { .. }
            | Op::Load { .. } => {}
        }
    }

    /// Demand slot of a source, if it has one.
    pub fn demand_mut(&mut self) -> Option<&mut Demand> {
        match self {
            Op::DefaultScan { demand, .. }
            | Op::FileScan { demand, .. }
            | Op::HttpScan { demand, .. }
            | Op::SeqScan { demand, .. } => Some(demand),
            _ => None,
        }
    }
}

/// Visit `seq` and every sequence nested in it, innermost first.
pub fn walk_seqs_mut<E>(
    seq: &mut Seq,
    f: &mut dyn FnMut(&mut Seq) -> Result<(), E>,
) -> Result<(), E> {
    for op in seq.iter_mut() {
        for child in op.child_seqs_mut() {
            walk_seqs_mut(child, f)?;
        }
    }
    f(seq)
}

/// Visit every operator in `seq`, nested ones included, parents first.
pub fn walk_ops(seq: &Seq, f: &mut dyn FnMut(&Op)) {
    for op in seq.iter() {
        f(op);
        for child in op.child_seqs() {
            walk_ops(child, f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_reaches_nested_paths() {
        let mut seq = Seq::new(vec![
            Op::Fork {
                paths: vec![
                    Seq::new(vec![Op::Pass]),
                    Seq::new(vec![Op::Scope {
                        body: Seq::new(vec![Op::Fuse]),
                    }]),
                ],
            },
            Op::Combine,
        ]);
        let mut lens = Vec::new();
        walk_seqs_mut::<()>(&mut seq, &mut |s| {
            lens.push(s.len());
            Ok(())
        })
        .unwrap();
        assert_eq!(lens, vec![1, 1, 1, 2]);

        let mut kinds = Vec::new();
        walk_ops(&seq, &mut |op| kinds.push(op.kind()));
        assert_eq!(kinds, vec!["fork", "pass", "scope", "fuse", "combine"]);
    }
}
