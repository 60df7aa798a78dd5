//! Operator lowering.

use lakeq_core::ast;
use lakeq_core::dag::{self, JoinStyle, Op, Seq};
use lakeq_core::error::{Error, Result};
use lakeq_core::expr::{Assignment, BinOp, Expr};
use lakeq_core::sortkey::Order;

use super::expr::is_boolean;
use super::scope::{Entry, Scope};
use super::Analyzer;

impl Analyzer<'_> {
    /// Lower a sequential block. Declarations made by `scope` blocks inside
    /// it are visible only to the rest of that block.
    pub(crate) fn lower_seq(&mut self, scope: &Scope<'_>, seq: &[ast::Op]) -> Result<Seq> {
        let mut out = Seq::default();
        for op in seq {
            self.lower_op(scope, op, &mut out)?;
        }
        Ok(out)
    }

    /// Lower a nested path; an empty path forwards its input.
    fn lower_path(&mut self, scope: &Scope<'_>, seq: &[ast::Op]) -> Result<Seq> {
        let child = scope.child();
        let out = self.lower_seq(&child, seq)?;
        Ok(if out.is_empty() { Seq::pass() } else { out })
    }

    fn lower_op(&mut self, scope: &Scope<'_>, op: &ast::Op, out: &mut Seq) -> Result<()> {
        match op {
            ast::Op::From { trunks } => {
                if !out.is_empty() {
                    return Err(Error::semantic(
                        "from: data source must be the first operator of its path",
                    ));
                }
                let mut paths = Vec::new();
                for trunk in trunks {
                    let trunk_seq = match &trunk.seq {
                        Some(seq) => self.lower_path(scope, seq)?,
                        None => Seq::default(),
                    };
                    for source in self.lower_source(&trunk.source)? {
                        let mut path = Seq::new(vec![source]);
                        path.extend(trunk_seq.iter().cloned());
                        paths.push(path);
                    }
                }
                match paths.len() {
                    0 => return Err(Error::semantic("from: no data source")),
                    1 => out.extend(paths.remove(0)),
                    _ => out.push(Op::Fork { paths }),
                }
            }
            ast::Op::Where { expr } => out.push(Op::Filter {
                expr: self.lower_expr(scope, expr)?,
            }),
            ast::Op::Yield { exprs } => {
                if exprs.is_empty() {
                    return Err(Error::semantic("yield: at least one expression required"));
                }
                out.push(Op::Yield {
                    exprs: self.lower_exprs(scope, exprs)?,
                })
            }
            ast::Op::OpExpr { expr } => self.lower_op_expr(scope, expr, out)?,
            ast::Op::OpAssignment { assignments } => {
                out.push(self.lower_op_assignment(scope, assignments)?)
            }
            ast::Op::Summarize { keys, aggs, limit } => {
                let keys = self.lower_assignments(scope, keys)?;
                let aggs = self.lower_assignments(scope, aggs)?;
                if keys.is_empty() && aggs.is_empty() {
                    return Err(Error::semantic("summarize: no keys or aggregations"));
                }
                if let Some(a) = aggs.iter().find(|a| !a.rhs.has_agg()) {
                    return Err(Error::semantic(format!(
                        "summarize: {} is not an aggregation",
                        a.rhs
                    )));
                }
                if let Some(k) = keys.iter().find(|k| k.rhs.has_agg()) {
                    return Err(Error::semantic(format!(
                        "summarize: aggregation {} used as a grouping key",
                        k.rhs
                    )));
                }
                out.push(summarize(keys, aggs, *limit));
            }
            ast::Op::Cut { args } => {
                if args.is_empty() {
                    return Err(Error::semantic("cut: at least one field required"));
                }
                out.push(Op::Cut {
                    args: self.lower_assignments(scope, args)?,
                })
            }
            ast::Op::Drop { args } => {
                if args.is_empty() {
                    return Err(Error::semantic("drop: at least one field required"));
                }
                let args = args
                    .iter()
                    .map(|a| self.lower_lval(scope, a, None))
                    .collect::<Result<Vec<_>>>()
                    .map_err(|e| Error::semantic(format!("drop: {e}")))?;
                out.push(Op::Drop { args })
            }
            ast::Op::Put { args } => {
                if args.is_empty() {
                    return Err(Error::semantic("put: at least one assignment required"));
                }
                out.push(Op::Put {
                    args: self.lower_assignments(scope, args)?,
                })
            }
            ast::Op::Rename { args } => out.push(self.lower_rename(scope, args)?),
            ast::Op::Sort { exprs, nulls_first } => {
                if exprs.is_empty() {
                    return Err(Error::semantic("sort: at least one key required"));
                }
                out.push(Op::Sort {
                    keys: self.lower_sort_exprs(scope, exprs)?,
                    nulls_first: *nulls_first,
                })
            }
            ast::Op::Top { limit, exprs } => {
                if exprs.is_empty() {
                    return Err(Error::semantic("top: at least one key required"));
                }
                out.push(Op::Top {
                    limit: self.const_count(scope, "top", limit.as_ref(), 1)?,
                    keys: self.lower_sort_exprs(scope, exprs)?,
                    nulls_first: false,
                })
            }
            ast::Op::Head { count } => out.push(Op::Head {
                count: self.const_count(scope, "head", count.as_ref(), 1)?,
            }),
            ast::Op::Tail { count } => out.push(Op::Tail {
                count: self.const_count(scope, "tail", count.as_ref(), 1)?,
            }),
            ast::Op::Uniq { cflag } => out.push(Op::Uniq { cflag: *cflag }),
            ast::Op::Pass => out.push(Op::Pass),
            ast::Op::Fuse => out.push(Op::Fuse),
            ast::Op::Explode { args, alias } => {
                if args.is_empty() {
                    return Err(Error::semantic("explode: at least one argument required"));
                }
                let alias = match alias {
                    None => "value".to_string(),
                    Some(ast::Expr::Id { name }) => name.clone(),
                    Some(other) => {
                        return Err(Error::semantic(format!(
                            "explode: as clause must be an identifier: {other}"
                        )))
                    }
                };
                out.push(Op::Explode {
                    args: self.lower_exprs(scope, args)?,
                    alias,
                })
            }
            ast::Op::Merge { exprs } => {
                let mut keys = self.lower_sort_exprs(scope, exprs)?;
                match keys.len() {
                    0 => return Err(Error::semantic("merge: at least one key required")),
                    1 => {}
                    n => {
                        return Err(Error::semantic(format!(
                            "merge: only one key is supported, got {n}"
                        )))
                    }
                }
                let key = keys.remove(0);
                out.push(Op::Merge {
                    expr: key.key,
                    order: key.order,
                })
            }
            ast::Op::Fork { paths } => {
                if paths.len() < 2 {
                    return Err(Error::semantic("fork: at least two paths required"));
                }
                let paths = paths
                    .iter()
                    .map(|p| self.lower_path(scope, p))
                    .collect::<Result<_>>()?;
                out.push(Op::Fork { paths })
            }
            ast::Op::Switch { expr, cases } => out.push(self.lower_switch(scope, expr.as_ref(), cases)?),
            ast::Op::Join {
                style,
                right,
                left_alias,
                right_alias,
                cond,
            } => {
                let style = JoinStyle::parse(style)
                    .ok_or_else(|| Error::semantic(format!("unknown join style: {style}")))?;
                let left_alias = left_alias.clone().unwrap_or_else(|| "left".to_string());
                let right_alias = right_alias.clone().unwrap_or_else(|| "right".to_string());
                if left_alias == right_alias {
                    return Err(Error::semantic(format!(
                        "join: left and right aliases are both {left_alias:?}"
                    )));
                }
                let cond = match cond {
                    Some(cond) => Some(self.lower_join_cond(scope, cond, &left_alias, &right_alias)?),
                    None => None,
                };
                check_join_cond(style, cond.is_some())?;
                if let Some(right) = right {
                    let right = self.lower_path(scope, right)?;
                    out.push(Op::Fork {
                        paths: vec![Seq::pass(), right],
                    });
                }
                out.push(Op::Join {
                    style,
                    left_alias: Some(left_alias),
                    right_alias,
                    cond,
                })
            }
            ast::Op::Over {
                exprs,
                locals,
                body,
            } => {
                if exprs.is_empty() {
                    return Err(Error::semantic("over: at least one expression required"));
                }
                let exprs = self.lower_exprs(scope, exprs)?;
                let mut inner = scope.child();
                let mut defs = Vec::with_capacity(locals.len());
                for local in locals {
                    let expr = self.lower_expr(scope, &local.expr)?;
                    inner.define_var(&local.name)?;
                    defs.push(dag::Def {
                        name: local.name.clone(),
                        expr,
                    });
                }
                let body = match body {
                    Some(body) => Some(self.lower_path(&inner, body)?),
                    None => None,
                };
                out.push(Op::Over { defs, exprs, body })
            }
            ast::Op::Scope { decls, body } => {
                let mut inner = scope.child();
                for decl in decls {
                    self.declare(&mut inner, decl)?;
                }
                let body = self.lower_seq(&inner, body)?;
                out.push(Op::Scope {
                    body: if body.is_empty() { Seq::pass() } else { body },
                })
            }
            ast::Op::Call { name, args } => out.push(self.inline_op(scope, name, args)?),
            ast::Op::Output { name } => out.push(Op::Output { name: name.clone() }),
            ast::Op::Load {
                pool,
                branch,
                message,
            } => {
                let (pool_id, pool_name) = self.resolve_pool_name(pool)?;
                out.push(Op::Load {
                    pool: pool_id,
                    pool_name,
                    branch: branch.clone().unwrap_or_else(|| "main".to_string()),
                    message: message.clone(),
                })
            }
            ast::Op::Delete { pool, branch, expr } => {
                if !out.is_empty() {
                    return Err(Error::semantic("delete: must be the only operator of a query"));
                }
                let (pool_id, pool_name) = self.resolve_pool_name(pool)?;
                let commit = self.resolve_commit(pool_id, &pool_name, branch.as_deref())?;
                out.push(Op::DeleteScan {
                    pool: pool_id,
                    pool_name,
                    commit,
                });
                out.push(Op::Filter {
                    expr: self.lower_expr(scope, expr)?,
                });
                out.push(Op::Output {
                    name: "main".to_string(),
                });
            }
            ast::Op::Sql { query } => {
                let seq = self.lower_query(scope, query)?;
                out.extend(seq);
            }
        }
        Ok(())
    }

    /// A bare expression at operator position is, in order: an aggregation
    /// (summarize with no keys), a filter if it is boolean-valued, or a
    /// projection. A bare identifier naming a user operator calls it.
    fn lower_op_expr(&mut self, scope: &Scope<'_>, expr: &ast::Expr, out: &mut Seq) -> Result<()> {
        if let ast::Expr::Id { name } = expr {
            if let Some(Entry::Op { .. }) = scope.lookup(name) {
                out.push(self.inline_op(scope, name, &[])?);
                return Ok(());
            }
        }
        let e = self.lower_expr(scope, expr)?;
        let op = match e {
            Expr::Agg { ref name, .. } => {
                let lhs = Expr::field(name);
                summarize(Vec::new(), vec![Assignment::new(lhs, e)], 0)
            }
            e if e.has_agg() => {
                return Err(Error::semantic(format!(
                    "aggregation nested in an expression at operator position: {expr}"
                )))
            }
            e if is_boolean(&e) => Op::Filter { expr: e },
            e => Op::Yield { exprs: vec![e] },
        };
        out.push(op);
        Ok(())
    }

    /// An assignment list at operator position is a summarize when every
    /// right-hand side aggregates and a put when none does.
    fn lower_op_assignment(&mut self, scope: &Scope<'_>, args: &[ast::Assignment]) -> Result<Op> {
        let args = self.lower_assignments(scope, args)?;
        let naggs = args.iter().filter(|a| a.rhs.has_agg()).count();
        if naggs == 0 {
            Ok(Op::Put { args })
        } else if naggs == args.len() {
            Ok(summarize(Vec::new(), args, 0))
        } else {
            Err(Error::semantic(
                "mix of aggregations and non-aggregations in assignment list",
            ))
        }
    }

    fn lower_rename(&mut self, scope: &Scope<'_>, args: &[ast::Assignment]) -> Result<Op> {
        if args.is_empty() {
            return Err(Error::semantic("rename: at least one assignment required"));
        }
        let mut out = Vec::with_capacity(args.len());
        for a in args {
            let Some(lhs) = &a.lhs else {
                return Err(Error::semantic(format!(
                    "rename: {} requires a new name",
                    a.rhs
                )));
            };
            let dst = self.lower_expr(scope, lhs)?;
            let src = self.lower_expr(scope, &a.rhs)?;
            let (Some(dpath), Some(spath)) = (dst.as_path(), src.as_path()) else {
                return Err(Error::semantic(format!(
                    "rename: both sides must be field paths: {a}"
                )));
            };
            if dpath.is_empty() || spath.is_empty() {
                return Err(Error::semantic("rename: cannot rename this"));
            }
            let (dtext, stext) = (dpath.join("."), spath.join("."));
            if dpath.len() != spath.len() {
                return Err(Error::semantic(format!(
                    "rename: cannot rename {stext} to {dtext} (left-hand side and right-hand side must have the same depth)"
                )));
            }
            let depth = dpath.len();
            if let Some(i) = (0..depth - 1).find(|&i| dpath[i] != spath[i]) {
                return Err(Error::semantic(format!(
                    "rename: cannot rename {stext} to {dtext} (differ in {} vs {})",
                    spath[i], dpath[i]
                )));
            }
            out.push(Assignment::new(dst, src));
        }
        Ok(Op::Rename { args: out })
    }

    fn lower_sort_exprs(
        &mut self,
        scope: &Scope<'_>,
        exprs: &[ast::SortExpr],
    ) -> Result<Vec<dag::SortExpr>> {
        exprs
            .iter()
            .map(|s| {
                let order = match &s.order {
                    Some(o) => Order::parse(o).map_err(Error::Semantic)?,
                    None => Order::Asc,
                };
                Ok(dag::SortExpr::new(self.lower_expr(scope, &s.expr)?, order))
            })
            .collect()
    }

    fn lower_switch(
        &mut self,
        scope: &Scope<'_>,
        expr: Option<&ast::Expr>,
        cases: &[ast::Case],
    ) -> Result<Op> {
        if cases.is_empty() {
            return Err(Error::semantic("switch: at least one case required"));
        }
        let expr = match expr {
            Some(e) => Some(self.lower_expr(scope, e)?),
            None => None,
        };
        let mut out = Vec::with_capacity(cases.len());
        let mut seen_default = false;
        for case in cases {
            let case_expr = match &case.expr {
                Some(e) => Some(self.lower_expr(scope, e)?),
                None if seen_default => {
                    return Err(Error::semantic("switch: more than one default case"))
                }
                None => {
                    seen_default = true;
                    None
                }
            };
            out.push(dag::Case {
                expr: case_expr,
                path: self.lower_path(scope, &case.path)?,
            });
        }
        Ok(Op::Switch { expr, cases: out })
    }

    /// Join conditions are evaluated against the joined row, whose two
    /// halves live under the aliases; `using (a)` compares `a` on both.
    pub(crate) fn lower_join_cond(
        &mut self,
        scope: &Scope<'_>,
        cond: &ast::JoinCond,
        left_alias: &str,
        right_alias: &str,
    ) -> Result<Expr> {
        match cond {
            ast::JoinCond::On { expr } => self.lower_expr(scope, expr),
            ast::JoinCond::Using { fields } => {
                if fields.is_empty() {
                    return Err(Error::semantic("join: using requires at least one field"));
                }
                let mut conds = Vec::with_capacity(fields.len());
                for f in fields {
                    let field = self.lower_lval(scope, f, None)?;
                    let path = field.as_path().unwrap_or_default();
                    let side = |alias: &str| {
                        let mut p = vec![alias.to_string()];
                        p.extend(path.iter().cloned());
                        Expr::this(p)
                    };
                    conds.push(Expr::binary(BinOp::Eq, side(left_alias), side(right_alias)));
                }
                Expr::conjoin(conds).ok_or_else(|| Error::internal("join: empty using list"))
            }
        }
    }

    fn declare(&mut self, scope: &mut Scope<'_>, decl: &ast::Decl) -> Result<()> {
        match decl {
            ast::Decl::Const { name, expr } => {
                let value = self.lower_expr(scope, expr)?;
                if !matches!(value, Expr::Literal { .. }) {
                    return Err(Error::semantic(format!(
                        "const {name}: not a constant expression: {expr}"
                    )));
                }
                scope.define(name, Entry::Const(value))
            }
            ast::Decl::Func { name, params, body } => scope.define(
                name,
                Entry::Func {
                    params: params.clone(),
                    body: body.clone(),
                },
            ),
            ast::Decl::Op { name, params, body } => scope.define(
                name,
                Entry::Op {
                    params: params.clone(),
                    body: body.clone(),
                },
            ),
        }
    }

    /// Inline a user operator. Its body is lowered in a child of the call
    /// site's scope with each parameter bound to the argument expression.
    fn inline_op(&mut self, scope: &Scope<'_>, name: &str, args: &[ast::Expr]) -> Result<Op> {
        let Some(Entry::Op { params, body }) = scope.lookup(name) else {
            return Err(Error::semantic(format!("{name}: no such operator")));
        };
        if params.len() != args.len() {
            return Err(Error::semantic(format!(
                "operator {name}: expected {} argument(s), got {}",
                params.len(),
                args.len()
            )));
        }
        let mut bound = scope.child();
        for (param, arg) in params.iter().zip(args) {
            let value = self.lower_expr(scope, arg)?;
            bound.define(param, Entry::Const(value))?;
        }
        let body = self.inlining("operator", name, |a| a.lower_seq(&bound, body))?;
        Ok(Op::Scope {
            body: if body.is_empty() { Seq::pass() } else { body },
        })
    }
}

fn summarize(keys: Vec<Assignment>, aggs: Vec<Assignment>, limit: usize) -> Op {
    Op::Summarize {
        keys,
        aggs,
        limit,
        partials_in: false,
        partials_out: false,
        input_sort_dir: None,
    }
}

pub(crate) fn check_join_cond(style: JoinStyle, has_cond: bool) -> Result<()> {
    match (style, has_cond) {
        (JoinStyle::Cross, true) => Err(Error::semantic("cross join: unexpected join condition")),
        (JoinStyle::Cross, false) | (_, true) => Ok(()),
        (style, false) => Err(Error::semantic(format!(
            "{} join: missing join condition",
            style.as_str()
        ))),
    }
}
