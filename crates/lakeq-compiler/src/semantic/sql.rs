//! SQL lowering.
//!
//! A select is rewritten into the pipe operator set: `from` becomes a
//! source (or a fork + join for joined tables), `where` a filter, grouping
//! and aggregates a summarize, `having` a filter over the summarize output,
//! the select list a record-building yield, `distinct` a sort + uniq,
//! `order by` a sort, and `limit` a head. Unions become a fork + combine.
//!
//! Column names are resolved against a [`Relation`]: with a single table
//! the rows are the table's rows; once tables are joined every row carries
//! each table's record under its alias.

use lakeq_core::ast;
use lakeq_core::dag::{JoinStyle, Op, Seq, SortExpr};
use lakeq_core::error::{Error, Result};
use lakeq_core::expr::{Assignment, BinOp, Expr, RecordElem};
use lakeq_core::sortkey::Order;

use super::op::check_join_cond;
use super::scope::{Entry, Scope};
use super::Analyzer;

#[derive(Debug, Clone)]
struct Table {
    alias: Option<String>,
    /// Where the table's record lives within a row of the relation.
    prefix: Vec<String>,
}

/// Tables visible to the expressions of one select.
#[derive(Debug, Clone)]
pub(crate) struct Relation {
    tables: Vec<Table>,
}

impl Relation {
    fn single(alias: Option<String>) -> Self {
        Relation {
            tables: vec![Table {
                alias,
                prefix: Vec::new(),
            }],
        }
    }

    fn table(&self, alias: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.alias.as_deref() == Some(alias))
    }

    /// Resolve an unqualified column name.
    pub(crate) fn column(&self, name: &str) -> Result<Expr> {
        match self.tables.as_slice() {
            [t] => Ok(Expr::this(extend(&t.prefix, name))),
            _ => match self.table(name) {
                Some(t) => Ok(Expr::this(t.prefix.clone())),
                None => Err(Error::semantic(format!(
                    "{name}: ambiguous column reference"
                ))),
            },
        }
    }

    /// Resolve `table.field`, if `table` names a table of this relation.
    pub(crate) fn qualified(&self, table: &str, field: &str) -> Option<Vec<String>> {
        self.table(table).map(|t| extend(&t.prefix, field))
    }
}

fn extend(prefix: &[String], name: &str) -> Vec<String> {
    let mut path = prefix.to_vec();
    path.push(name.to_string());
    path
}

enum Column {
    /// Spread of each listed table record.
    Star(Vec<Vec<String>>),
    Expr { name: String, expr: Expr },
}

impl Analyzer<'_> {
    pub(crate) fn lower_query(&mut self, scope: &Scope<'_>, query: &ast::SqlQuery) -> Result<Seq> {
        match query {
            ast::SqlQuery::Select(select) => self.lower_select(scope, select),
            ast::SqlQuery::Union {
                left,
                right,
                distinct,
            } => {
                let left = or_pass(self.lower_query(scope, left)?);
                let right = or_pass(self.lower_query(scope, right)?);
                let mut out = Seq::new(vec![
                    Op::Fork {
                        paths: vec![left, right],
                    },
                    Op::Combine,
                ]);
                if *distinct {
                    out.extend(distinct_ops());
                }
                Ok(out)
            }
            ast::SqlQuery::With { ctes, body } => {
                let mut inner = scope.child();
                for cte in ctes {
                    inner.define(&cte.name, Entry::Query(cte.query.clone()))?;
                }
                self.lower_query(&inner, body)
            }
        }
    }

    fn lower_select(&mut self, scope: &Scope<'_>, sel: &ast::SqlSelect) -> Result<Seq> {
        let (mut seq, rel) = match &sel.from {
            Some(from) => self.lower_from(scope, from)?,
            None => (Seq::default(), Relation::single(None)),
        };
        if let Some(filter) = &sel.filter {
            let expr = self.lower_expr_in(scope, filter, Some(&rel))?;
            if expr.has_agg() {
                return Err(Error::semantic(format!(
                    "aggregate functions are not allowed in where: {filter}"
                )));
            }
            seq.push(Op::Filter { expr });
        }

        let mut columns = Vec::with_capacity(sel.selection.len());
        for item in &sel.selection {
            columns.push(match item {
                ast::SqlItem::Star { table: None } => {
                    Column::Star(rel.tables.iter().map(|t| t.prefix.clone()).collect())
                }
                ast::SqlItem::Star { table: Some(t) } => match rel.table(t) {
                    Some(table) => Column::Star(vec![table.prefix.clone()]),
                    None => return Err(Error::semantic(format!("{t}: no such table"))),
                },
                ast::SqlItem::Expr { expr, alias } => {
                    let lowered = self.lower_expr_in(scope, expr, Some(&rel))?;
                    let name = match alias {
                        Some(a) => a.clone(),
                        None => column_name(expr, &lowered),
                    };
                    Column::Expr {
                        name,
                        expr: lowered,
                    }
                }
            });
        }
        let having = match &sel.having {
            Some(h) => Some(self.lower_expr_in(scope, h, Some(&rel))?),
            None => None,
        };
        let grouped = !sel.group_by.is_empty()
            || having.is_some()
            || columns
                .iter()
                .any(|c| matches!(c, Column::Expr { expr, .. } if expr.has_agg()));

        // Replacements applied to expressions evaluated after the summarize.
        let mut grouping: Vec<(Expr, Expr)> = Vec::new();
        if grouped {
            let mut keys = Vec::with_capacity(sel.group_by.len());
            for (i, key) in sel.group_by.iter().enumerate() {
                let expr = self.lower_expr_in(scope, key, Some(&rel))?;
                let name = columns
                    .iter()
                    .find_map(|c| match c {
                        Column::Expr { name, expr: e } if *e == expr => Some(name.clone()),
                        _ => None,
                    })
                    .or_else(|| expr.as_path().and_then(|p| p.last().cloned()))
                    .unwrap_or_else(|| format!("k{i}"));
                grouping.push((expr.clone(), Expr::field(&name)));
                keys.push(Assignment::new(Expr::field(&name), expr));
            }
            let mut aggs: Vec<Assignment> = Vec::new();
            let mut found = Vec::new();
            for c in &columns {
                match c {
                    Column::Expr { expr, .. } => collect_aggs(expr, &mut found),
                    Column::Star(_) => {
                        return Err(Error::semantic(
                            "select *: not allowed in an aggregating select",
                        ))
                    }
                }
            }
            if let Some(h) = &having {
                collect_aggs(h, &mut found);
            }
            for agg in found {
                let name = columns
                    .iter()
                    .find_map(|c| match c {
                        Column::Expr { name, expr } if *expr == agg => Some(name.clone()),
                        _ => None,
                    })
                    .unwrap_or_else(|| format!("_agg{}", aggs.len()));
                grouping.push((agg.clone(), Expr::field(&name)));
                aggs.push(Assignment::new(Expr::field(&name), agg));
            }
            seq.push(Op::Summarize {
                keys,
                aggs,
                limit: 0,
                partials_in: false,
                partials_out: false,
                input_sort_dir: None,
            });
            if let Some(h) = having {
                seq.push(Op::Filter {
                    expr: after_grouping(h, &grouping, "having")?,
                });
            }
            for c in columns.iter_mut() {
                if let Column::Expr { name, expr } = c {
                    let what = name.clone();
                    let e = std::mem::replace(expr, Expr::this(Vec::new()));
                    *expr = after_grouping(e, &grouping, &what)?;
                }
            }
        }

        if !sel.order_by.is_empty() && !sel.distinct {
            let mut keys = Vec::with_capacity(sel.order_by.len());
            for s in &sel.order_by {
                let key = match output_column(&s.expr, &columns) {
                    Some(e) => e,
                    None => {
                        let e = self.lower_expr_in(scope, &s.expr, Some(&rel))?;
                        if grouped {
                            after_grouping(e, &grouping, "order by")?
                        } else {
                            e
                        }
                    }
                };
                keys.push(SortExpr::new(key, sort_order(s)?));
            }
            seq.push(Op::Sort {
                keys,
                nulls_first: false,
            });
        }

        if let Some(y) = projection(&columns) {
            seq.push(y);
        }

        if sel.distinct {
            seq.extend(distinct_ops());
            if !sel.order_by.is_empty() {
                let mut keys = Vec::with_capacity(sel.order_by.len());
                for s in &sel.order_by {
                    let name = match &s.expr {
                        ast::Expr::Id { name }
                            if columns
                                .iter()
                                .any(|c| matches!(c, Column::Expr { name: n, .. } if n == name)) =>
                        {
                            name.clone()
                        }
                        other => {
                            return Err(Error::semantic(format!(
                                "for SELECT DISTINCT, ORDER BY expressions must appear in select list: {other}"
                            )))
                        }
                    };
                    keys.push(SortExpr::new(Expr::field(&name), sort_order(s)?));
                }
                seq.push(Op::Sort {
                    keys,
                    nulls_first: false,
                });
            }
        }
        if let Some(n) = sel.limit {
            seq.push(Op::Head { count: n });
        }
        Ok(seq)
    }

    fn lower_from(&mut self, scope: &Scope<'_>, from: &ast::SqlFrom) -> Result<(Seq, Relation)> {
        match from {
            ast::SqlFrom::Table { name, alias } => {
                let alias = alias.clone().unwrap_or_else(|| name.clone());
                let seq = match scope.lookup(name) {
                    Some(Entry::Query(q)) => {
                        let q = q.clone();
                        self.inlining("query", name, |a| a.lower_query(scope, &q))?
                    }
                    _ => {
                        let (pool, pool_name) = self.resolve_pool_name(name)?;
                        let commit = self.resolve_commit(pool, &pool_name, None)?;
                        Seq::new(vec![Op::PoolScan {
                            pool,
                            pool_name,
                            commit,
                        }])
                    }
                };
                Ok((seq, Relation::single(Some(alias))))
            }
            ast::SqlFrom::Source { source, alias } => {
                let sources = self.lower_source(source)?;
                let seq = if sources.len() == 1 {
                    Seq::new(sources)
                } else {
                    Seq::new(vec![
                        Op::Fork {
                            paths: sources.into_iter().map(|s| Seq::new(vec![s])).collect(),
                        },
                        Op::Combine,
                    ])
                };
                Ok((seq, Relation::single(Some(alias.clone()))))
            }
            ast::SqlFrom::SubSelect { query, alias } => Ok((
                self.lower_query(scope, query)?,
                Relation::single(Some(alias.clone())),
            )),
            ast::SqlFrom::Join {
                left,
                right,
                style,
                cond,
            } => {
                let style = JoinStyle::parse(style)
                    .ok_or_else(|| Error::semantic(format!("unknown join style: {style}")))?;
                let (lseq, lrel) = self.lower_from(scope, left)?;
                let (rseq, rrel) = self.lower_from(scope, right)?;
                let right_alias = match rrel.tables.as_slice() {
                    [Table {
                        alias: Some(a),
                        prefix,
                    }] if prefix.is_empty() => a.clone(),
                    _ => {
                        return Err(Error::semantic(
                            "join: right side must be a single named table",
                        ))
                    }
                };
                let (left_alias, mut tables) = match lrel.tables.as_slice() {
                    [Table {
                        alias: Some(a),
                        prefix,
                    }] if prefix.is_empty() => (
                        Some(a.clone()),
                        vec![Table {
                            alias: Some(a.clone()),
                            prefix: vec![a.clone()],
                        }],
                    ),
                    [Table { alias: None, .. }] => {
                        return Err(Error::semantic("join: left side must be a named table"))
                    }
                    _ => (None, lrel.tables.clone()),
                };
                if tables
                    .iter()
                    .any(|t| t.alias.as_deref() == Some(right_alias.as_str()))
                {
                    return Err(Error::semantic(format!(
                        "join: duplicate table alias {right_alias}"
                    )));
                }
                tables.push(Table {
                    alias: Some(right_alias.clone()),
                    prefix: vec![right_alias.clone()],
                });
                let rel = Relation { tables };
                let cond = match cond {
                    Some(ast::JoinCond::On { expr }) => {
                        Some(self.lower_expr_in(scope, expr, Some(&rel))?)
                    }
                    Some(ast::JoinCond::Using { fields }) => {
                        let left_prefix = rel.tables[rel.tables.len() - 2].prefix.clone();
                        let mut conds = Vec::with_capacity(fields.len());
                        for f in fields {
                            let ast::Expr::Id { name } = f else {
                                return Err(Error::semantic(format!(
                                    "join: using field must be a column name: {f}"
                                )));
                            };
                            conds.push(Expr::binary(
                                BinOp::Eq,
                                Expr::this(extend(&left_prefix, name)),
                                Expr::this(vec![right_alias.clone(), name.clone()]),
                            ));
                        }
                        Expr::conjoin(conds)
                    }
                    None => None,
                };
                check_join_cond(style, cond.is_some())?;
                let seq = Seq::new(vec![
                    Op::Fork {
                        paths: vec![or_pass(lseq), or_pass(rseq)],
                    },
                    Op::Join {
                        style,
                        left_alias,
                        right_alias,
                        cond,
                    },
                ]);
                Ok((seq, rel))
            }
        }
    }
}

fn or_pass(seq: Seq) -> Seq {
    if seq.is_empty() {
        Seq::pass()
    } else {
        seq
    }
}

fn distinct_ops() -> Vec<Op> {
    vec![
        Op::Sort {
            keys: vec![SortExpr::new(Expr::this(Vec::new()), Order::Asc)],
            nulls_first: false,
        },
        Op::Uniq { cflag: false },
    ]
}

fn sort_order(s: &ast::SortExpr) -> Result<Order> {
    match &s.order {
        Some(o) => Order::parse(o).map_err(Error::Semantic),
        None => Ok(Order::Asc),
    }
}

/// Output column name of a select item without an alias.
fn column_name(expr: &ast::Expr, lowered: &Expr) -> String {
    match lowered {
        Expr::This { path } if !path.is_empty() => path[path.len() - 1].clone(),
        Expr::Agg { name, .. } | Expr::Call { name, .. } => name.clone(),
        _ => expr.to_string(),
    }
}

/// An order-by key naming an output column sorts on that column's value.
fn output_column(key: &ast::Expr, columns: &[Column]) -> Option<Expr> {
    let ast::Expr::Id { name } = key else {
        return None;
    };
    columns.iter().find_map(|c| match c {
        Column::Expr { name: n, expr } if n == name => Some(expr.clone()),
        _ => None,
    })
}

fn collect_aggs(e: &Expr, out: &mut Vec<Expr>) {
    e.walk(&mut |sub| {
        if matches!(sub, Expr::Agg { .. }) && !out.contains(sub) {
            out.push(sub.clone());
        }
    });
}

/// Rewrite an expression evaluated after the summarize so grouping keys and
/// aggregates read the summarize's output fields. Any other column
/// reference left over was neither grouped nor aggregated.
fn after_grouping(e: Expr, grouping: &[(Expr, Expr)], what: &str) -> Result<Expr> {
    let out = e.substitute(&mut |sub| {
        grouping
            .iter()
            .find(|(from, _)| from == sub)
            .map(|(_, to)| to.clone())
    });
    let mut stray = None;
    out.walk(&mut |sub| {
        if let Expr::This { path } = sub {
            let known = grouping.iter().any(|(_, to)| to == sub);
            if !known && stray.is_none() {
                stray = Some(path.join("."));
            }
        }
    });
    match stray {
        Some(col) => Err(Error::semantic(format!(
            "{what}: column {col} must appear in the group by clause or be used in an aggregate function"
        ))),
        None => Ok(out),
    }
}

/// The record-building yield for the select list; `None` when the list is
/// a bare `*` over a single table.
fn projection(columns: &[Column]) -> Option<Op> {
    if let [Column::Star(prefixes)] = columns {
        if prefixes.len() == 1 && prefixes[0].is_empty() {
            return None;
        }
    }
    let mut elems = Vec::new();
    for c in columns {
        match c {
            Column::Star(prefixes) => {
                for p in prefixes {
                    elems.push(RecordElem::Spread {
                        expr: Expr::this(p.clone()),
                    });
                }
            }
            Column::Expr { name, expr } => elems.push(RecordElem::Field {
                name: name.clone(),
                value: expr.clone(),
            }),
        }
    }
    Some(Op::Yield {
        exprs: vec![Expr::Record { elems }],
    })
}
