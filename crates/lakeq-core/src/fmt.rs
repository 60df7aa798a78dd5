//! Canonical text rendering of DAG expressions and sequences.
//!
//! Sequences render one operator per line, each line after the first
//! prefixed with `| `; nested paths are indented under their container.

use std::fmt::{self, Display, Formatter, Write};

use crate::dag::{Case, Op, Seq, SortExpr};
use crate::expr::{Assignment, BinOp, Expr, RecordElem, UnaryOp};

fn precedence(op: BinOp) -> u8 {
    match op {
        BinOp::Or => 1,
        BinOp::And => 2,
        BinOp::Eq | BinOp::Ne | BinOp::In => 3,
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 4,
        BinOp::Add | BinOp::Sub => 5,
        BinOp::Mul | BinOp::Div | BinOp::Mod => 6,
    }
}

fn write_operand(f: &mut Formatter<'_>, e: &Expr, parent: BinOp) -> fmt::Result {
    match e {
        Expr::Binary { op, .. } if precedence(*op) < precedence(parent) => write!(f, "({e})"),
        _ => write!(f, "{e}"),
    }
}

fn write_list<T: Display>(f: &mut Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal { value } => write!(f, "{value}"),
            Expr::This { path } if path.is_empty() => write!(f, "this"),
            Expr::This { path } => write!(f, "{}", path.join(".")),
            Expr::Var { name, .. } => write!(f, "{name}"),
            Expr::Dot { lhs, field } => write!(f, "{lhs}.{field}"),
            Expr::Index { expr, index } => write!(f, "{expr}[{index}]"),
            Expr::Binary { op, lhs, rhs } => {
                write_operand(f, lhs, *op)?;
                match op {
                    BinOp::And | BinOp::Or | BinOp::In => write!(f, " {} ", op.symbol())?,
                    _ => write!(f, "{}", op.symbol())?,
                }
                write_operand(f, rhs, *op)
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "!{operand}"),
                UnaryOp::Neg => write!(f, "-{operand}"),
                UnaryOp::IsNull => write!(f, "{operand} IS NULL"),
                UnaryOp::IsNotNull => write!(f, "{operand} IS NOT NULL"),
            },
            Expr::Call { name, args } => {
                write!(f, "{name}(")?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Expr::Agg { name, expr, filter } => {
                write!(f, "{name}(")?;
                if let Some(e) = expr {
                    write!(f, "{e}")?;
                }
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
            } => write!(f, "({cond}) ? {then} : {otherwise}"),
            Expr::Record { elems } => {
                write!(f, "{{")?;
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    match elem {
                        RecordElem::Field { name, value } => write!(f, "{name}:{value}")?,
                        RecordElem::Spread { expr } => write!(f, "...{expr}")?,
                    }
                }
                write!(f, "}}")
            }
            Expr::Array { elems } => {
                write!(f, "[")?;
                write_list(f, elems)?;
                write!(f, "]")
            }
        }
    }
}

impl Display for Assignment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:={}", self.lhs, self.rhs)
    }
}

impl Display for SortExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key, self.order)
    }
}

struct Printer {
    out: String,
    indent: usize,
}

impl Printer {
    fn line(&mut self, first: bool, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        if !first {
            self.out.push_str("| ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn seq(&mut self, seq: &Seq) {
        for (i, op) in seq.iter().enumerate() {
            self.op(i == 0, op);
        }
    }

    fn paths<'a>(&mut self, label: &str, first: bool, paths: impl Iterator<Item = (String, &'a Seq)>) {
        self.line(first, &format!("{label} ("));
        self.indent += 1;
        for (head, path) in paths {
            self.line(true, &head);
            self.indent += 1;
            self.seq(path);
            self.indent -= 1;
        }
        self.indent -= 1;
        self.line(true, ")");
    }

    fn op(&mut self, first: bool, op: &Op) {
        match op {
            Op::Fork { paths } | Op::Scatter { paths } => {
                self.paths(op.kind(), first, paths.iter().map(|p| ("=>".to_string(), p)))
            }
            Op::Mirror { main, mirror } => self.paths(
                "mirror",
                first,
                [("=>".to_string(), main), ("=> mirror".to_string(), mirror)].into_iter(),
            ),
            Op::Switch { expr, cases } => {
                let label = match expr {
                    Some(e) => format!("switch {e}"),
                    None => "switch".to_string(),
                };
                self.paths(&label, first, cases.iter().map(case_head))
            }
            Op::Over {
                body: Some(body), ..
            } => {
                self.line(first, &format!("{} => (", op_text(op)));
                self.indent += 1;
                self.seq(body);
                self.indent -= 1;
                self.line(true, ")");
            }
            Op::Scope { body } => {
                self.line(first, "(");
                self.indent += 1;
                self.seq(body);
                self.indent -= 1;
                self.line(true, ")");
            }
            _ => self.line(first, &op_text(op)),
        }
    }
}

fn case_head(c: &Case) -> (String, &Seq) {
    let head = match &c.expr {
        Some(e) => format!("case {e} =>"),
        None => "default =>".to_string(),
    };
    (head, &c.path)
}

fn opt<T: Display>(label: &str, v: &Option<T>) -> String {
    match v {
        Some(v) => format!(" {label}={v}"),
        None => String::new(),
    }
}

fn joined<T: Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// One-line rendering of an operator (containers render their header).
pub fn op_text(op: &Op) -> String {
    match op {
        Op::DefaultScan { filter, .. } => format!("defaultscan{}", opt("filter", filter)),
        Op::FileScan {
            path,
            format,
            filter,
            pruner,
            ..
        } => format!(
            "file {path}{}{}{}",
            opt("format", format),
            opt("filter", filter),
            opt("pruner", pruner)
        ),
        Op::HttpScan {
            url,
            format,
            filter,
            ..
        } => format!("get {url}{}{}", opt("format", format), opt("filter", filter)),
        Op::PoolScan {
            pool_name, commit, ..
        } => format!("poolscan pool={pool_name} commit={commit}"),
        Op::LakeMetaScan { meta } => format!("lakemeta :{meta}"),
        Op::PoolMetaScan {
            pool_name, meta, ..
        } => format!("poolmeta {pool_name}:{meta}"),
        Op::CommitMetaScan {
            pool_name,
            commit,
            meta,
            tap,
            key_pruner,
            ..
        } => format!(
            "commitmeta {pool_name}@{commit}:{meta}{}{}",
            if *tap { " tap" } else { "" },
            opt("pruner", key_pruner)
        ),
        Op::DeleteScan {
            pool_name, commit, ..
        } => format!("deletescan pool={pool_name} commit={commit}"),
        Op::Lister {
            pool_name,
            commit,
            key_pruner,
            ..
        } => format!(
            "lister pool={pool_name} commit={commit}{}",
            opt("pruner", key_pruner)
        ),
        Op::Slicer { .. } => "slicer".to_string(),
        Op::SeqScan {
            pool_name,
            filter,
            key_pruner,
            demand,
            ..
        } => {
            let mut s = format!(
                "seqscan pool={pool_name}{}{}",
                opt("filter", filter),
                opt("pruner", key_pruner)
            );
            if let Some(d) = demand {
                let fields: Vec<String> = d.iter().map(|p| p.join(".")).collect();
                let _ = write!(s, " demand=[{}]", fields.join(","));
            }
            s
        }
        Op::Deleter {
            pool_name, filter, ..
        } => format!("deleter pool={pool_name} where={filter}"),
        Op::Filter { expr } => format!("where {expr}"),
        Op::Yield { exprs } => format!("yield {}", joined(exprs)),
        Op::Summarize {
            keys,
            aggs,
            partials_in,
            partials_out,
            input_sort_dir,
            ..
        } => {
            let mut s = String::from("summarize");
            if *partials_out {
                s.push_str(" partials-out");
            }
            if *partials_in {
                s.push_str(" partials-in");
            }
            if let Some(dir) = input_sort_dir {
                let _ = write!(s, " sorted-input={dir}");
            }
            let _ = write!(s, " {}", joined(aggs));
            if !keys.is_empty() {
                let _ = write!(s, " by {}", joined(keys));
            }
            s
        }
        Op::Cut { args } => format!("cut {}", joined(args)),
        Op::Drop { args } => format!("drop {}", joined(args)),
        Op::Put { args } => format!("put {}", joined(args)),
        Op::Rename { args } => format!("rename {}", joined(args)),
        Op::Sort { keys, nulls_first } => format!(
            "sort{} {}",
            if *nulls_first { " -nulls first" } else { "" },
            joined(keys)
        ),
        Op::Top { limit, keys, .. } => format!("top {limit} {}", joined(keys)),
        Op::Head { count } => format!("head {count}"),
        Op::Tail { count } => format!("tail {count}"),
        Op::Uniq { cflag } => format!("uniq{}", if *cflag { " -c" } else { "" }),
        Op::Pass => "pass".to_string(),
        Op::Fuse => "fuse".to_string(),
        Op::Explode { args, alias } => format!("explode {} as {alias}", joined(args)),
        Op::Fork { paths } => format!("fork ({} paths)", paths.len()),
        Op::Scatter { paths } => format!("scatter ({} paths)", paths.len()),
        Op::Mirror { .. } => "mirror".to_string(),
        Op::Merge { expr, order } => format!("merge {expr}:{order}"),
        Op::Combine => "combine".to_string(),
        Op::Switch { .. } => "switch".to_string(),
        Op::Join {
            style,
            left_alias,
            right_alias,
            cond,
        } => format!(
            "{} join as {{{},{right_alias}}}{}",
            style.as_str(),
            left_alias.as_deref().unwrap_or("..."),
            opt("on", cond)
        ),
        Op::HashJoin {
            style,
            left_alias,
            right_alias,
            left_key,
            right_key,
            ..
        } => format!(
            "{} hashjoin as {{{},{right_alias}}} on {left_key}={right_key}",
            style.as_str(),
            left_alias.as_deref().unwrap_or("...")
        ),
        Op::Over { defs, exprs, .. } => {
            let mut s = format!("over {}", joined(exprs));
            if !defs.is_empty() {
                let defs: Vec<String> = defs.iter().map(|d| format!("{}={}", d.name, d.expr)).collect();
                let _ = write!(s, " with {}", defs.join(","));
            }
            s
        }
        Op::Scope { .. } => "scope".to_string(),
        Op::Output { name } => format!("output {name}"),
        Op::Load {
            pool_name, branch, ..
        } => format!("load {pool_name}@{branch}"),
    }
}

impl Display for Seq {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut p = Printer {
            out: String::new(),
            indent: 0,
        };
        p.seq(self);
        f.write_str(&p.out)
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&op_text(self))
    }
}
