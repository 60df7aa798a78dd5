//! Surface syntax tree.
//!
//! This is what the (external) parser hands to the semantic analyzer. It
//! still carries the ambiguities of the pipe language: a bare call at
//! operator position may be a filter, a projection, or an aggregation, and a
//! bare identifier may be a constant, a variable, or a field.
//!
//! Every node is internally tagged with `kind` so documents can be written
//! by hand in YAML or JSON (see `lakeq_compiler::dsl::yaml`).

use std::fmt;

use serde::{Deserialize, Serialize};

/// A sequence of operators forming a linear pipeline.
pub type Seq = Vec<Op>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Expr {
    /// Literal of a named primitive type, kept as text until lowering
    /// (`int64`, `float64`, `string`, `bool`, `time`, `duration`, `null`).
    Primitive {
        #[serde(rename = "type")]
        ty: String,
        text: String,
    },
    Id {
        name: String,
    },
    This,
    Binary {
        op: String,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: String,
        operand: Box<Expr>,
    },
    Call {
        name: String,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
        filter: Option<Box<Expr>>,
    },
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        #[serde(rename = "else")]
        otherwise: Box<Expr>,
    },
    Record {
        elems: Vec<RecordElem>,
    },
    Array {
        elems: Vec<Expr>,
    },
    Index {
        expr: Box<Expr>,
        index: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RecordElem {
    Field { name: String, value: Expr },
    Spread { expr: Expr },
    /// `{a}` shorthand for `{a: a}`.
    Identifier { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lhs: Option<Expr>,
    pub rhs: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortExpr {
    pub expr: Expr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Decl {
    Const {
        name: String,
        expr: Expr,
    },
    Func {
        name: String,
        params: Vec<String>,
        body: Expr,
    },
    Op {
        name: String,
        params: Vec<String>,
        body: Seq,
    },
}

/// `with name = expr` binding of a lateral body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Def {
    pub name: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    /// `None` is the default case.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<Expr>,
    pub path: Seq,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PoolName {
    Text { name: String },
    Glob { pattern: String },
    Regexp { pattern: String },
    /// The caller-supplied current pool.
    Head,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Source {
    Pool {
        name: PoolName,
        /// Branch name or commit id after `@`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commit: Option<String>,
        /// Metadata selector after `:` (`objects`, `branches`, ...).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<String>,
        #[serde(default)]
        tap: bool,
    },
    /// `from :pools` style lake metadata.
    LakeMeta { meta: String },
    File {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
    },
    Pass,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trunk {
    pub source: Source,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<Seq>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum JoinCond {
    On { expr: Expr },
    Using { fields: Vec<Expr> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Op {
    From {
        trunks: Vec<Trunk>,
    },
    Where {
        expr: Expr,
    },
    Yield {
        exprs: Vec<Expr>,
    },
    /// Bare expression at operator position; classified during lowering.
    OpExpr {
        expr: Expr,
    },
    /// Bare assignment list at operator position.
    OpAssignment {
        assignments: Vec<Assignment>,
    },
    Summarize {
        #[serde(default)]
        keys: Vec<Assignment>,
        #[serde(default)]
        aggs: Vec<Assignment>,
        #[serde(default)]
        limit: usize,
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
        #[serde(default)]
        exprs: Vec<SortExpr>,
        #[serde(default)]
        nulls_first: bool,
    },
    Top {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<Expr>,
        #[serde(default)]
        exprs: Vec<SortExpr>,
    },
    Head {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<Expr>,
    },
    Tail {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<Expr>,
    },
    Uniq {
        #[serde(default)]
        cflag: bool,
    },
    Pass,
    Fuse,
    Explode {
        args: Vec<Expr>,
        #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
        alias: Option<Expr>,
    },
    Merge {
        #[serde(default)]
        exprs: Vec<SortExpr>,
    },
    Fork {
        paths: Vec<Seq>,
    },
    Switch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expr: Option<Expr>,
        cases: Vec<Case>,
    },
    Join {
        #[serde(default = "default_join_style")]
        style: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        right: Option<Seq>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        left_alias: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        right_alias: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cond: Option<JoinCond>,
    },
    Over {
        exprs: Vec<Expr>,
        #[serde(default)]
        locals: Vec<Def>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Seq>,
    },
    /// Sequential block with its own declarations.
    Scope {
        #[serde(default)]
        decls: Vec<Decl>,
        body: Seq,
    },
    /// Call of a user-declared operator.
    Call {
        name: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    Output {
        name: String,
    },
    Load {
        pool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// `delete where <expr>` against a pool; compiled with the deleter path.
    Delete {
        pool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        expr: Expr,
    },
    Sql {
        query: SqlQuery,
    },
}

fn default_join_style() -> String {
    "inner".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SqlQuery {
    Select(Box<SqlSelect>),
    Union {
        left: Box<SqlQuery>,
        right: Box<SqlQuery>,
        #[serde(default)]
        distinct: bool,
    },
    With {
        ctes: Vec<Cte>,
        body: Box<SqlQuery>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cte {
    pub name: String,
    pub query: SqlQuery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SqlSelect {
    #[serde(default)]
    pub distinct: bool,
    pub selection: Vec<SqlItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<SqlFrom>,
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub filter: Option<Expr>,
    #[serde(default)]
    pub group_by: Vec<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub having: Option<Expr>,
    #[serde(default)]
    pub order_by: Vec<SortExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SqlItem {
    /// `*` or `t.*`
    Star {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table: Option<String>,
    },
    Expr {
        expr: Expr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alias: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SqlFrom {
    /// A named table: a CTE in scope or a pool.
    Table {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alias: Option<String>,
    },
    /// A concrete source (file, http, pool with commit...).
    Source {
        source: Source,
        alias: String,
    },
    SubSelect {
        query: Box<SqlQuery>,
        alias: String,
    },
    Join {
        left: Box<SqlFrom>,
        right: Box<SqlFrom>,
        #[serde(default = "default_join_style")]
        style: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cond: Option<JoinCond>,
    },
}

// --- query-text rendering ---

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Primitive { ty, text } => match ty.as_str() {
                "string" => write!(f, "{text:?}"),
                _ => write!(f, "{text}"),
            },
            Expr::Id { name } => write!(f, "{name}"),
            Expr::This => write!(f, "this"),
            Expr::Binary { op, lhs, rhs } if op == "." => write!(f, "{lhs}.{rhs}"),
            Expr::Binary { op, lhs, rhs } => write!(f, "{lhs} {op} {rhs}"),
            Expr::Unary { op, operand } => write!(f, "{op}{operand}"),
            Expr::Call { name, args, filter } => {
                write!(f, "{name}(")?;
                write_list(f, args, ",")?;
                write!(f, ")")?;
                if let Some(w) = filter {
                    write!(f, " where {w}")?;
                }
                Ok(())
            }
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => write!(f, "{cond} ? {then} : {otherwise}"),
            Expr::Record { elems } => {
                write!(f, "{{")?;
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    match elem {
                        RecordElem::Field { name, value } => write!(f, "{name}:{value}")?,
                        RecordElem::Spread { expr } => write!(f, "...{expr}")?,
                        RecordElem::Identifier { name } => write!(f, "{name}")?,
                    }
                }
                write!(f, "}}")
            }
            Expr::Array { elems } => {
                write!(f, "[")?;
                write_list(f, elems, ",")?;
                write!(f, "]")
            }
            Expr::Index { expr, index } => write!(f, "{expr}[{index}]"),
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lhs {
            Some(lhs) => write!(f, "{lhs}:={}", self.rhs),
            None => write!(f, "{}", self.rhs),
        }
    }
}

impl fmt::Display for SortExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if let Some(order) = &self.order {
            write!(f, " {order}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Pool {
                name,
                commit,
                meta,
                tap,
            } => {
                match name {
                    PoolName::Text { name } => write!(f, "{name}")?,
                    PoolName::Glob { pattern } => write!(f, "{pattern}")?,
                    PoolName::Regexp { pattern } => write!(f, "/{pattern}/")?,
                    PoolName::Head => write!(f, "HEAD")?,
                }
                if let Some(c) = commit {
                    write!(f, "@{c}")?;
                }
                if let Some(m) = meta {
                    write!(f, ":{m}")?;
                }
                if *tap {
                    write!(f, " tap")?;
                }
                Ok(())
            }
            Source::LakeMeta { meta } => write!(f, ":{meta}"),
            Source::File { path, format } => {
                write!(f, "file {path}")?;
                if let Some(fmt) = format {
                    write!(f, " format {fmt}")?;
                }
                Ok(())
            }
            Source::Http { url, .. } => write!(f, "get {url}"),
            Source::Pass => write!(f, "pass"),
        }
    }
}

struct SeqText<'a>(&'a [Op]);

impl fmt::Display for SeqText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_list(f, self.0, " | ")
    }
}

/// Render a sequence as query text, operators joined with `|`.
pub fn seq_text(seq: &[Op]) -> String {
    SeqText(seq).to_string()
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::From { trunks } => {
                write!(f, "from ")?;
                if trunks.len() > 1 {
                    write!(f, "(")?;
                }
                for (i, t) in trunks.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", t.source)?;
                    if let Some(seq) = &t.seq {
                        write!(f, " => {}", SeqText(seq))?;
                    }
                }
                if trunks.len() > 1 {
                    write!(f, ")")?;
                }
                Ok(())
            }
            Op::Where { expr } => write!(f, "where {expr}"),
            Op::Yield { exprs } => {
                write!(f, "yield ")?;
                write_list(f, exprs, ",")
            }
            Op::OpExpr { expr } => write!(f, "{expr}"),
            Op::OpAssignment { assignments } => write_list(f, assignments, ","),
            Op::Summarize { keys, aggs, .. } => {
                write!(f, "summarize ")?;
                write_list(f, aggs, ",")?;
                if !keys.is_empty() {
                    write!(f, " by ")?;
                    write_list(f, keys, ",")?;
                }
                Ok(())
            }
            Op::Cut { args } => {
                write!(f, "cut ")?;
                write_list(f, args, ",")
            }
            Op::Drop { args } => {
                write!(f, "drop ")?;
                write_list(f, args, ",")
            }
            Op::Put { args } => {
                write!(f, "put ")?;
                write_list(f, args, ",")
            }
            Op::Rename { args } => {
                write!(f, "rename ")?;
                write_list(f, args, ",")
            }
            Op::Sort { exprs, nulls_first } => {
                write!(f, "sort")?;
                if *nulls_first {
                    write!(f, " -nulls first")?;
                }
                if !exprs.is_empty() {
                    write!(f, " ")?;
                    write_list(f, exprs, ",")?;
                }
                Ok(())
            }
            Op::Top { limit, exprs } => {
                write!(f, "top")?;
                if let Some(l) = limit {
                    write!(f, " {l}")?;
                }
                if !exprs.is_empty() {
                    write!(f, " ")?;
                    write_list(f, exprs, ",")?;
                }
                Ok(())
            }
            Op::Head { count } => match count {
                Some(c) => write!(f, "head {c}"),
                None => write!(f, "head"),
            },
            Op::Tail { count } => match count {
                Some(c) => write!(f, "tail {c}"),
                None => write!(f, "tail"),
            },
            Op::Uniq { cflag } => write!(f, "uniq{}", if *cflag { " -c" } else { "" }),
            Op::Pass => write!(f, "pass"),
            Op::Fuse => write!(f, "fuse"),
            Op::Explode { args, alias } => {
                write!(f, "explode ")?;
                write_list(f, args, ",")?;
                if let Some(a) = alias {
                    write!(f, " as {a}")?;
                }
                Ok(())
            }
            Op::Merge { exprs } => {
                write!(f, "merge ")?;
                write_list(f, exprs, ",")
            }
            Op::Fork { paths } => {
                write!(f, "fork (")?;
                for p in paths {
                    write!(f, " => {}", SeqText(p))?;
                }
                write!(f, " )")
            }
            Op::Switch { expr, cases } => {
                write!(f, "switch")?;
                if let Some(e) = expr {
                    write!(f, " {e}")?;
                }
                write!(f, " (")?;
                for c in cases {
                    match &c.expr {
                        Some(e) => write!(f, " case {e} => {}", SeqText(&c.path))?,
                        None => write!(f, " default => {}", SeqText(&c.path))?,
                    }
                }
                write!(f, " )")
            }
            Op::Join {
                style,
                right,
                left_alias,
                right_alias,
                cond,
            } => {
                write!(f, "{style} join")?;
                if let Some(r) = right {
                    write!(f, " ({})", SeqText(r))?;
                }
                if left_alias.is_some() || right_alias.is_some() {
                    write!(
                        f,
                        " as {{{},{}}}",
                        left_alias.as_deref().unwrap_or("left"),
                        right_alias.as_deref().unwrap_or("right")
                    )?;
                }
                match cond {
                    Some(JoinCond::On { expr }) => write!(f, " on {expr}"),
                    Some(JoinCond::Using { fields }) => {
                        write!(f, " using (")?;
                        write_list(f, fields, ",")?;
                        write!(f, ")")
                    }
                    None => Ok(()),
                }
            }
            Op::Over {
                exprs,
                locals,
                body,
            } => {
                write!(f, "over ")?;
                write_list(f, exprs, ",")?;
                if !locals.is_empty() {
                    write!(f, " with ")?;
                    for (i, d) in locals.iter().enumerate() {
                        if i > 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "{}={}", d.name, d.expr)?;
                    }
                }
                if let Some(b) = body {
                    write!(f, " => ({})", SeqText(b))?;
                }
                Ok(())
            }
            Op::Scope { decls, body } => {
                write!(f, "(")?;
                for d in decls {
                    match d {
                        Decl::Const { name, expr } => write!(f, "const {name}={expr} ")?,
                        Decl::Func { name, params, body } => {
                            write!(f, "func {name}({}): ({body}) ", params.join(","))?
                        }
                        Decl::Op { name, params, body } => write!(
                            f,
                            "op {name}({}): ({}) ",
                            params.join(","),
                            SeqText(body)
                        )?,
                    }
                }
                write!(f, "{})", SeqText(body))
            }
            Op::Call { name, args } => {
                write!(f, "{name}(")?;
                write_list(f, args, ",")?;
                write!(f, ")")
            }
            Op::Output { name } => write!(f, "output {name}"),
            Op::Load { pool, branch, .. } => match branch {
                Some(b) => write!(f, "load {pool}@{b}"),
                None => write!(f, "load {pool}"),
            },
            Op::Delete { pool, branch, expr } => {
                write!(f, "delete from {pool}")?;
                if let Some(b) = branch {
                    write!(f, "@{b}")?;
                }
                write!(f, " where {expr}")
            }
            Op::Sql { .. } => write!(f, "select ..."),
        }
    }
}
