//! Builder: optimized DAG → graph of pullers.
//!
//! A single recursive descent. Each operator maps to one constructor over
//! the handles produced by the operators before it; fan-outs multiply the
//! handles and merges, combines, and joins fold them back. `Output`
//! operators and whatever handles are left at the end become the
//! program's named leaves.

use std::collections::BTreeMap;
use std::sync::Arc;

use lakeq_core::batch::Context;
use lakeq_core::config::CompilerConfig;
use lakeq_core::dag::{Case, JoinStyle, Op, Seq};
use lakeq_core::error::{Error, Result};
use lakeq_core::eval;
use lakeq_core::expr::Expr;
use lakeq_core::lake::{CommitId, DataAdaptor, MetaKind, ObjectId, PoolId, Scheduler};
use lakeq_core::sortkey::Order;
use lakeq_core::value::Value;

use lakeq_operators::aggregate::{Summarize, SummarizeOpts};
use lakeq_operators::combine::{Combine, Merge, Worker};
use lakeq_operators::fanout::{self, Cases};
use lakeq_operators::filter::Filter;
use lakeq_operators::join::hash::HashMatcher;
use lakeq_operators::join::nested::NestedMatcher;
use lakeq_operators::join::{require_two, Join};
use lakeq_operators::limit::{Fuse, Head, Tail, Uniq};
use lakeq_operators::load::Load;
use lakeq_operators::over::{BodyFactory, Over};
use lakeq_operators::project::{Project, Shape};
use lakeq_operators::scan::{meta_rows, DeleteSet, Deleter, Lister, Reader, SeqScan, Slicer};
use lakeq_operators::sort::Sort;
use lakeq_operators::{drain, Parent, Values};

use crate::registry::{SchedulerKey, SchedulerRegistry};

/// Name of the leaf that collects handles no `output` claimed.
pub const MAIN: &str = "main";

type Split = fn(Parent, usize) -> Vec<fanout::Branch>;

/// A built, runnable query.
pub struct Program {
    outputs: BTreeMap<String, Parent>,
    deletes: DeleteSet,
    ctx: Context,
}

impl Program {
    pub fn output_names(&self) -> Vec<String> {
        self.outputs.keys().cloned().collect()
    }

    /// Take ownership of one output leaf.
    pub fn take(&mut self, name: &str) -> Option<Parent> {
        self.outputs.remove(name)
    }

    /// Object ids a deletion touched so far.
    pub fn deletes(&self) -> Vec<ObjectId> {
        self.deletes.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Pull every remaining output to the end, one after the other.
    pub fn run(&mut self) -> Result<BTreeMap<String, Vec<Value>>> {
        let mut results = BTreeMap::new();
        for (name, mut leaf) in std::mem::take(&mut self.outputs) {
            let rows = drain(leaf.as_mut()).map_err(|e| e.with_context(format!("output {name}")))?;
            tracing::debug!(output = %name, rows = rows.len(), "output drained");
            results.insert(name, rows);
        }
        Ok(results)
    }
}

pub struct Builder {
    adaptor: Arc<dyn DataAdaptor>,
    config: CompilerConfig,
    ctx: Context,
    readers: Option<Vec<Parent>>,
    registry: SchedulerRegistry,
    outputs: BTreeMap<String, Vec<Parent>>,
    deletes: DeleteSet,
    scatter: Option<usize>,
    scatters: usize,
}

impl Builder {
    pub fn new(adaptor: Arc<dyn DataAdaptor>, config: CompilerConfig, ctx: Context) -> Self {
        Self {
            adaptor,
            config,
            ctx,
            readers: Some(Vec::new()),
            registry: SchedulerRegistry::new(),
            outputs: BTreeMap::new(),
            deletes: DeleteSet::default(),
            scatter: None,
            scatters: 0,
        }
    }

    /// In-process readers feeding the query's default scan.
    pub fn with_readers(mut self, readers: Vec<Parent>) -> Self {
        self.readers = Some(readers);
        self
    }

    pub fn registry(&self) -> &SchedulerRegistry {
        &self.registry
    }

    /// Every scheduler created so far, in creation order.
    pub fn schedulers(&self) -> Vec<Arc<dyn Scheduler>> {
        self.registry.schedulers()
    }

    /// Build `seq` and collect its leaves. The builder stays usable for
    /// inspecting the registry afterwards.
    pub fn build(&mut self, seq: &Seq) -> Result<Program> {
        let rest = self.build_seq(seq, Vec::new()).map_err(|e| {
            if e.is_internal() {
                tracing::error!(error = %e, "builder invariant violated");
            }
            e
        })?;
        if !rest.is_empty() {
            self.outputs.entry(MAIN.to_string()).or_default().extend(rest);
        }
        let mut outputs = BTreeMap::new();
        for (name, handles) in std::mem::take(&mut self.outputs) {
            outputs.insert(name, self.combine(handles)?);
        }
        tracing::debug!(
            outputs = outputs.len(),
            schedulers = self.registry.len(),
            "built program"
        );
        Ok(Program {
            outputs,
            deletes: self.deletes.clone(),
            ctx: self.ctx.clone(),
        })
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    fn build_seq(&mut self, seq: &Seq, parents: Vec<Parent>) -> Result<Vec<Parent>> {
        if seq.is_empty() {
            return Err(Error::internal("empty sequential operator"));
        }
        let mut cur = parents;
        for op in seq.iter() {
            cur = self.build_op(op, cur)?;
        }
        Ok(cur)
    }

    /// Fold several handles into one with an unordered combine.
    fn combine(&self, mut parents: Vec<Parent>) -> Result<Parent> {
        match parents.len() {
            0 => Ok(Box::new(Values::new(Vec::new(), 1))),
            1 => parents
                .pop()
                .ok_or_else(|| Error::internal("combine lost its only input")),
            n if self.config.parallel_workers => {
                tracing::trace!(inputs = n, "combine with workers");
                Ok(Box::new(Combine::with_workers(
                    parents,
                    self.ctx.clone(),
                    self.config.channel_capacity,
                )?))
            }
            _ => Ok(Box::new(Combine::new(parents, self.ctx.clone()))),
        }
    }

    /// The single upstream of a transform; several are combined first.
    fn one(&self, op: &Op, parents: Vec<Parent>) -> Result<Parent> {
        if parents.is_empty() {
            return Err(Error::internal(format!("{} has no upstream", op.kind())));
        }
        self.combine(parents)
    }

    fn source(&self, op: &Op, parents: &[Parent]) -> Result<()> {
        if parents.is_empty() {
            Ok(())
        } else {
            Err(Error::internal(format!("source {} has an upstream", op.kind())))
        }
    }

    fn build_op(&mut self, op: &Op, parents: Vec<Parent>) -> Result<Vec<Parent>> {
        let bs = self.batch_size();
        let out: Parent = match op {
            Op::DefaultScan { filter, demand } => {
                self.source(op, &parents)?;
                let readers = self
                    .readers
                    .take()
                    .ok_or_else(|| Error::internal("in-process readers already consumed"))?;
                let inner = self.combine(readers)?;
                Box::new(Reader::new(inner, filter.clone(), demand.clone(), self.ctx.clone()))
            }
            Op::FileScan {
                path,
                format,
                filter,
                demand,
                ..
            } => {
                self.source(op, &parents)?;
                // The adaptor applies the filter while reading.
                let inner = self
                    .adaptor
                    .open(path, format.as_deref(), filter.as_ref())
                    .map_err(|e| e.with_context(format!("file {path}")))?;
                Box::new(Reader::new(inner, None, demand.clone(), self.ctx.clone()))
            }
            Op::HttpScan {
                url,
                format,
                method,
                filter,
                demand,
            } => {
                self.source(op, &parents)?;
                let inner = self
                    .adaptor
                    .open_http(url, format.as_deref(), method.as_deref())
                    .map_err(|e| e.with_context(format!("url {url}")))?;
                Box::new(Reader::new(inner, filter.clone(), demand.clone(), self.ctx.clone()))
            }
            Op::PoolScan { pool, commit, .. } => {
                self.source(op, &parents)?;
                let lister = self.lister(*pool, *commit, None)?;
                Box::new(SeqScan::new(
                    lister,
                    self.adaptor.clone(),
                    *pool,
                    None,
                    None,
                    None,
                    None,
                    bs,
                ))
            }
            Op::LakeMetaScan { meta } => {
                self.source(op, &parents)?;
                let rows = self.adaptor.meta_scan(meta_kind(meta)?, None, None)?;
                Box::new(meta_rows(rows, None, bs))
            }
            Op::PoolMetaScan {
                pool,
                pool_name,
                meta,
            } => {
                self.source(op, &parents)?;
                let rows = self
                    .adaptor
                    .meta_scan(meta_kind(meta)?, Some(*pool), None)
                    .map_err(|e| e.with_context(format!("{pool_name}:{meta}")))?;
                Box::new(meta_rows(rows, None, bs))
            }
            Op::CommitMetaScan {
                pool,
                pool_name,
                commit,
                meta,
                tap,
                key_pruner,
            } => {
                self.source(op, &parents)?;
                let rows = self
                    .adaptor
                    .meta_scan(meta_kind(meta)?, Some(*pool), Some(*commit))
                    .map_err(|e| e.with_context(format!("{pool_name}@{commit}:{meta}")))?;
                let pruner = if *tap { key_pruner.as_ref() } else { None };
                Box::new(meta_rows(rows, pruner, bs))
            }
            Op::DeleteScan { .. } => {
                return Err(Error::internal(
                    "delete scan reached the builder without the deletion rewrite",
                ))
            }
            Op::Lister {
                pool,
                commit,
                key_pruner,
                ..
            } => {
                self.source(op, &parents)?;
                self.lister(*pool, *commit, key_pruner.clone())?
            }
            Op::Slicer { pool } => {
                let order = self
                    .adaptor
                    .sort_keys(*pool)
                    .map_err(|e| e.with_context("sort keys of sliced pool"))?
                    .primary()
                    .map_or(Order::Asc, |k| k.order);
                Box::new(Slicer::new(self.one(op, parents)?, order))
            }
            Op::SeqScan {
                pool,
                pool_name,
                filter,
                key_pruner,
                demand,
                ..
            } => {
                let keys = self
                    .adaptor
                    .sort_keys(*pool)
                    .map_err(|e| e.with_context(format!("sort keys of {pool_name}")))?;
                let pool_key = keys.primary().map(|k| (k.expr(), k.order));
                Box::new(SeqScan::new(
                    self.one(op, parents)?,
                    self.adaptor.clone(),
                    *pool,
                    filter.clone(),
                    key_pruner.clone(),
                    demand.clone(),
                    pool_key,
                    bs,
                ))
            }
            Op::Deleter { pool, filter, .. } => Box::new(Deleter::new(
                self.one(op, parents)?,
                self.adaptor.clone(),
                *pool,
                filter.clone(),
                self.deletes.clone(),
            )),

            Op::Filter { expr } => Box::new(Filter::new(self.one(op, parents)?, expr.clone())),
            Op::Yield { exprs } => Box::new(Project::new(
                self.one(op, parents)?,
                Shape::Yield(exprs.clone()),
            )),
            Op::Summarize {
                keys,
                aggs,
                limit,
                partials_in,
                partials_out,
                input_sort_dir,
            } => {
                let opts = SummarizeOpts {
                    limit: *limit,
                    partials_in: *partials_in,
                    partials_out: *partials_out,
                    input_sort_dir: *input_sort_dir,
                };
                Box::new(Summarize::new(self.one(op, parents)?, keys, aggs, opts, bs)?)
            }
            Op::Cut { args } => Box::new(Project::new(self.one(op, parents)?, Shape::cut(args)?)),
            Op::Drop { args } => Box::new(Project::new(self.one(op, parents)?, Shape::drop(args)?)),
            Op::Put { args } => Box::new(Project::new(self.one(op, parents)?, Shape::put(args)?)),
            Op::Rename { args } => {
                Box::new(Project::new(self.one(op, parents)?, Shape::rename(args)?))
            }
            Op::Sort { keys, nulls_first } => {
                Box::new(Sort::new(self.one(op, parents)?, keys, *nulls_first, bs))
            }
            Op::Top {
                limit,
                keys,
                nulls_first,
            } => Box::new(Sort::top(self.one(op, parents)?, *limit, keys, *nulls_first, bs)),
            Op::Head { count } => Box::new(Head::new(self.one(op, parents)?, *count)),
            Op::Tail { count } => Box::new(Tail::new(self.one(op, parents)?, *count)),
            Op::Uniq { cflag } => Box::new(Uniq::new(self.one(op, parents)?, *cflag)),
            Op::Pass => return Ok(parents),
            Op::Fuse => Box::new(Fuse::new(self.one(op, parents)?, bs)),
            Op::Explode { args, alias } => Box::new(Project::new(
                self.one(op, parents)?,
                Shape::Explode {
                    args: args.clone(),
                    alias: alias.clone(),
                },
            )),

            Op::Fork { paths } => return self.fan_out(parents, paths, fanout::fork),
            Op::Scatter { paths } => {
                let outer = self.scatter.replace(self.scatters);
                self.scatters += 1;
                let built = self.fan_out(parents, paths, fanout::scatter);
                self.scatter = outer;
                return built;
            }
            Op::Mirror { main, mirror } => {
                let mut branches = self.fan_out_handles(parents, 2, fanout::fork)?;
                let to_main = branches.pop().flatten();
                let to_mirror = branches.pop().flatten();
                let mirrored = self.build_seq(mirror, to_mirror.into_iter().collect())?;
                if !mirrored.is_empty() {
                    self.outputs
                        .entry("mirror".to_string())
                        .or_default()
                        .extend(mirrored);
                }
                return self.build_seq(main, to_main.into_iter().collect());
            }
            Op::Merge { expr, order } => {
                if parents.is_empty() {
                    return Err(Error::internal("merge has no upstream"));
                }
                let parents = if self.config.parallel_workers && parents.len() > 1 {
                    parents
                        .into_iter()
                        .map(|p| {
                            Worker::spawn(p, self.ctx.clone(), self.config.channel_capacity)
                                .map(|w| Box::new(w) as Parent)
                        })
                        .collect::<Result<Vec<_>>>()?
                } else {
                    parents
                };
                Box::new(Merge::new(parents, expr.clone(), *order, bs))
            }
            Op::Combine => self.combine(parents)?,
            Op::Switch { expr, cases } => return self.switch(op, parents, expr.as_ref(), cases),
            Op::Join {
                style,
                left_alias,
                right_alias,
                cond,
            } => {
                let (left, right) = two(parents)?;
                Box::new(Join::new(
                    *style,
                    left,
                    right,
                    left_alias.clone(),
                    right_alias.clone(),
                    NestedMatcher::new(cond.clone()),
                ))
            }
            Op::HashJoin {
                style,
                left_alias,
                right_alias,
                left_key,
                right_key,
                ..
            } => {
                let (left, right) = two(parents)?;
                Box::new(Join::new(
                    *style,
                    left,
                    right,
                    left_alias.clone(),
                    right_alias.clone(),
                    HashMatcher::new(
                        left_key.clone(),
                        right_key.clone(),
                        *style == JoinStyle::Right,
                    ),
                ))
            }
            Op::Over { defs, exprs, body } => {
                let defs = defs.iter().map(|d| d.expr.clone()).collect();
                let factory = body.as_ref().map(|b| self.body_factory(b.clone()));
                Box::new(Over::new(self.one(op, parents)?, defs, exprs.clone(), factory, bs))
            }
            Op::Scope { body } => return self.build_seq(body, parents),
            Op::Output { name } => {
                let leaf = self.one(op, parents)?;
                self.outputs.entry(name.clone()).or_default().push(leaf);
                return Ok(Vec::new());
            }
            Op::Load {
                pool,
                branch,
                message,
                ..
            } => Box::new(Load::new(
                self.one(op, parents)?,
                self.adaptor.clone(),
                *pool,
                branch.clone(),
                message.clone(),
            )),
        };
        Ok(vec![out])
    }

    fn lister(&mut self, pool: PoolId, commit: CommitId, pruner: Option<Expr>) -> Result<Parent> {
        let key = SchedulerKey {
            pool,
            commit,
            scatter: self.scatter,
        };
        let sched = self
            .registry
            .get_or_create(self.adaptor.as_ref(), key, pruner.as_ref())?;
        Ok(Box::new(Lister::new(
            sched,
            self.scatter.is_some(),
            pruner,
            self.ctx.clone(),
            self.batch_size(),
        )))
    }

    /// Split `parents` into `n` branch handles.
    fn fan_out_handles(
        &self,
        parents: Vec<Parent>,
        n: usize,
        split: Split,
    ) -> Result<Vec<Option<Parent>>> {
        if parents.is_empty() {
            return Ok((0..n).map(|_| None).collect());
        }
        let upstream = self.combine(parents)?;
        let branches = split(upstream, n);
        if branches.len() != n {
            return Err(Error::internal(format!(
                "fan-out produced {} branches for {n} paths",
                branches.len()
            )));
        }
        Ok(branches
            .into_iter()
            .map(|b| Some(Box::new(b) as Parent))
            .collect())
    }

    fn fan_out(&mut self, parents: Vec<Parent>, paths: &[Seq], split: Split) -> Result<Vec<Parent>> {
        let inputs = self.fan_out_handles(parents, paths.len(), split)?;
        let mut out = Vec::new();
        for (path, input) in paths.iter().zip(inputs) {
            // A path reading its own source drops its share of the input.
            let input = if path.is_entry() { None } else { input };
            out.extend(self.build_seq(path, input.into_iter().collect())?);
        }
        Ok(out)
    }

    fn switch(
        &mut self,
        op: &Op,
        parents: Vec<Parent>,
        expr: Option<&Expr>,
        cases: &[Case],
    ) -> Result<Vec<Parent>> {
        let routes = match expr {
            Some(expr) => {
                let keys = cases
                    .iter()
                    .map(|c| c.expr.as_ref().map(case_key).transpose())
                    .collect::<Result<Vec<_>>>()?;
                Cases::Values {
                    expr: expr.clone(),
                    keys,
                }
            }
            None => Cases::Guards(cases.iter().map(|c| c.expr.clone()).collect()),
        };
        let upstream = self.one(op, parents)?;
        let branches = fanout::switch(upstream, routes);
        if branches.len() != cases.len() {
            return Err(Error::internal(format!(
                "switch produced {} routes for {} cases",
                branches.len(),
                cases.len()
            )));
        }
        let mut out = Vec::new();
        for (case, branch) in cases.iter().zip(branches) {
            out.extend(self.build_seq(&case.path, vec![Box::new(branch)])?);
        }
        Ok(out)
    }

    /// Each row of a lateral gets a freshly built body: built pullers
    /// cannot be restarted.
    fn body_factory(&self, body: Seq) -> BodyFactory {
        let adaptor = self.adaptor.clone();
        let config = self.config.clone();
        let ctx = self.ctx.clone();
        Box::new(move |input: Parent| {
            let mut inner = Builder::new(adaptor.clone(), config.clone(), ctx.clone());
            let exits = inner.build_seq(&body, vec![input])?;
            // Rows only; the body runs on the caller's thread.
            Ok(match exits.len() {
                0 => Box::new(Values::new(Vec::new(), 1)) as Parent,
                1 => exits
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::internal("lateral body lost its exit"))?,
                _ => Box::new(Combine::new(exits, ctx.clone())),
            })
        })
    }
}

fn two(mut parents: Vec<Parent>) -> Result<(Parent, Parent)> {
    require_two(parents.len())?;
    let right = parents.pop();
    let left = parents.pop();
    match (left, right) {
        (Some(l), Some(r)) => Ok((l, r)),
        _ => Err(Error::internal("join requires two upstream paths")),
    }
}

fn meta_kind(meta: &str) -> Result<MetaKind> {
    MetaKind::parse(meta).ok_or_else(|| Error::internal(format!("unknown metadata listing {meta:?}")))
}

/// Switch case keys must be constants. A case whose value cannot be
/// computed without input is a query error, not a defect.
fn case_key(expr: &Expr) -> Result<Value> {
    match eval::const_eval(expr)? {
        Value::Missing => Err(Error::semantic(format!(
            "switch case is not a constant: {expr}"
        ))),
        v => Ok(v),
    }
}
