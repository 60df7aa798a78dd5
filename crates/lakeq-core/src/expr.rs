//! DAG expressions.
//!
//! These are the resolved form of surface expressions: identifiers have been
//! turned into field paths (`This`), variable slots (`Var`), or folded
//! literals, and aggregate calls are distinguished from scalar calls.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Binary operators for expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    // Comparison operators
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    // Logical operators
    And,
    Or,
    // Arithmetic operators
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinOp {
    /// Parse a binary operator from a string.
    pub fn parse(op: &str) -> Result<Self, String> {
        match op {
            "==" | "=" => Ok(BinOp::Eq),
            "!=" | "<>" => Ok(BinOp::Ne),
            "<" => Ok(BinOp::Lt),
            "<=" => Ok(BinOp::Le),
            ">" => Ok(BinOp::Gt),
            ">=" => Ok(BinOp::Ge),
            "in" | "IN" => Ok(BinOp::In),
            "AND" | "and" | "&&" => Ok(BinOp::And),
            "OR" | "or" | "||" => Ok(BinOp::Or),
            "+" => Ok(BinOp::Add),
            "-" => Ok(BinOp::Sub),
            "*" => Ok(BinOp::Mul),
            "/" => Ok(BinOp::Div),
            "%" => Ok(BinOp::Mod),
            _ => Err(format!("unknown binary operator: {}", op)),
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::In => "in",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
        }
    }

    /// Operators whose result is always boolean.
    pub fn is_boolean(self) -> bool {
        !matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    /// The operator that gives the same answer with its operands swapped.
    pub fn flip(self) -> Option<Self> {
        match self {
            BinOp::Eq | BinOp::Ne => Some(self),
            BinOp::Lt => Some(BinOp::Gt),
            BinOp::Le => Some(BinOp::Ge),
            BinOp::Gt => Some(BinOp::Lt),
            BinOp::Ge => Some(BinOp::Le),
            _ => None,
        }
    }
}

/// Unary operators for expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

impl UnaryOp {
    /// Parse a unary operator from a string.
    pub fn parse(op: &str) -> Result<Self, String> {
        match op.to_uppercase().as_str() {
            "NOT" | "!" => Ok(UnaryOp::Not),
            "-" => Ok(UnaryOp::Neg),
            "ISNULL" | "IS NULL" => Ok(UnaryOp::IsNull),
            "ISNOTNULL" | "IS NOT NULL" => Ok(UnaryOp::IsNotNull),
            _ => Err(format!("unknown unary operator: {}", op)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Expr {
    Literal {
        value: Value,
    },
    /// Field path rooted at the implicit input value; empty path is `this`.
    This {
        path: Vec<String>,
    },
    /// Slot in the lateral evaluation frame.
    Var {
        name: String,
        slot: usize,
    },
    Dot {
        lhs: Box<Expr>,
        field: String,
    },
    Index {
        expr: Box<Expr>,
        index: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Agg {
        name: String,
        expr: Option<Box<Expr>>,
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
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RecordElem {
    Field { name: String, value: Expr },
    Spread { expr: Expr },
}

/// `lhs := rhs`; lhs is always a resolved field path expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub lhs: Expr,
    pub rhs: Expr,
}

impl Assignment {
    pub fn new(lhs: Expr, rhs: Expr) -> Self {
        Self { lhs, rhs }
    }
}

impl Expr {
    pub fn this(path: Vec<String>) -> Expr {
        Expr::This { path }
    }

    pub fn field(name: &str) -> Expr {
        Expr::This {
            path: vec![name.to_string()],
        }
    }

    pub fn path(path: &[&str]) -> Expr {
        Expr::This {
            path: path.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn lit(value: Value) -> Expr {
        Expr::Literal { value }
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn and(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::And, lhs, rhs)
    }

    pub fn not(operand: Expr) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        }
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            name: name.to_string(),
            args,
        }
    }

    /// Field access that collapses into a longer `This` path when possible.
    pub fn dot(lhs: Expr, field: &str) -> Expr {
        match lhs {
            Expr::This { mut path } => {
                path.push(field.to_string());
                Expr::This { path }
            }
            other => Expr::Dot {
                lhs: Box::new(other),
                field: field.to_string(),
            },
        }
    }

    /// Append a path suffix to an expression (`e` + `.a.b`).
    pub fn extend_path(self, suffix: &[String]) -> Expr {
        suffix
            .iter()
            .fold(self, |acc, name| Expr::dot(acc, name))
    }

    /// The static field path if this is a `This` reference.
    pub fn as_path(&self) -> Option<&[String]> {
        match self {
            Expr::This { path } => Some(path),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Expr::Literal { value } => Some(value),
            _ => None,
        }
    }

    /// Visit every sub-expression, parents before children.
    pub fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Literal { .. } | Expr::This { .. } | Expr::Var { .. } => {}
            Expr::Dot { lhs, .. } => lhs.walk(f),
            Expr::Index { expr, index } => {
                expr.walk(f);
                index.walk(f);
            }
            Expr::Binary { lhs, rhs, .. } => {
                lhs.walk(f);
                rhs.walk(f);
            }
            Expr::Unary { operand, .. } => operand.walk(f),
            Expr::Call { args, .. } => args.iter().for_each(|a| a.walk(f)),
            Expr::Agg { expr, filter, .. } => {
                if let Some(e) = expr {
                    e.walk(f);
                }
                if let Some(e) = filter {
                    e.walk(f);
                }
            }
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                cond.walk(f);
                then.walk(f);
                otherwise.walk(f);
            }
            Expr::Record { elems } => {
                for elem in elems {
                    match elem {
                        RecordElem::Field { value, .. } => value.walk(f),
                        RecordElem::Spread { expr } => expr.walk(f),
                    }
                }
            }
            Expr::Array { elems } => elems.iter().for_each(|e| e.walk(f)),
        }
    }

    /// Rebuild this node with each immediate child replaced by `f(child)`.
    pub fn map_children(self, f: &mut dyn FnMut(Expr) -> Expr) -> Expr {
        match self {
            e @ (Expr::Literal { .. } | Expr::This { .. } | Expr::Var { .. }) => e,
            Expr::Dot { lhs, field } => Expr::Dot {
                lhs: Box::new(f(*lhs)),
                field,
            },
            Expr::Index { expr, index } => Expr::Index {
                expr: Box::new(f(*expr)),
                index: Box::new(f(*index)),
            },
            Expr::Binary { op, lhs, rhs } => Expr::Binary {
                op,
                lhs: Box::new(f(*lhs)),
                rhs: Box::new(f(*rhs)),
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op,
                operand: Box::new(f(*operand)),
            },
            Expr::Call { name, args } => Expr::Call {
                name,
                args: args.into_iter().map(&mut *f).collect(),
            },
            Expr::Agg { name, expr, filter } => Expr::Agg {
                name,
                expr: expr.map(|e| Box::new(f(*e))),
                filter: filter.map(|e| Box::new(f(*e))),
            },
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => Expr::Conditional {
                cond: Box::new(f(*cond)),
                then: Box::new(f(*then)),
                otherwise: Box::new(f(*otherwise)),
            },
            Expr::Record { elems } => Expr::Record {
                elems: elems
                    .into_iter()
                    .map(|elem| match elem {
                        RecordElem::Field { name, value } => RecordElem::Field {
                            name,
                            value: f(value),
                        },
                        RecordElem::Spread { expr } => RecordElem::Spread { expr: f(expr) },
                    })
                    .collect(),
            },
            Expr::Array { elems } => Expr::Array {
                elems: elems.into_iter().map(&mut *f).collect(),
            },
        }
    }

    /// Rebuild the expression bottom-up, handing each rebuilt node to `f`.
    pub fn fold(self, f: &mut dyn FnMut(Expr) -> Expr) -> Expr {
        let rebuilt = self.map_children(&mut |child| child.fold(f));
        f(rebuilt)
    }

    /// Replace whole subtrees top-down: `f` returns `Some` to substitute a
    /// node (its children are not visited) or `None` to descend.
    pub fn substitute(self, f: &mut dyn FnMut(&Expr) -> Option<Expr>) -> Expr {
        match f(&self) {
            Some(replacement) => replacement,
            None => self.map_children(&mut |child| child.substitute(f)),
        }
    }

    /// Rewrite every field path in the expression.
    pub fn map_paths(self, f: &mut dyn FnMut(Vec<String>) -> Expr) -> Expr {
        self.fold(&mut |e| match e {
            Expr::This { path } => f(path),
            other => other,
        })
    }

    /// Collect the field paths this expression reads from its input.
    /// Returns `false` if the whole input (`this`) is referenced, in which
    /// case the paths are not a complete description.
    pub fn input_paths(&self, out: &mut Vec<Vec<String>>) -> bool {
        let mut complete = true;
        self.walk(&mut |e| {
            if let Expr::This { path } = e {
                if path.is_empty() {
                    complete = false;
                } else if !out.contains(path) {
                    out.push(path.clone());
                }
            }
        });
        complete
    }

    pub fn has_agg(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if matches!(e, Expr::Agg { .. }) {
                found = true;
            }
        });
        found
    }

    /// Split a predicate on `and`.
    pub fn split_conjunction(self) -> Vec<Expr> {
        let mut out = Vec::new();
        fn split(expr: Expr, out: &mut Vec<Expr>) {
            match expr {
                Expr::Binary {
                    op: BinOp::And,
                    lhs,
                    rhs,
                } => {
                    split(*lhs, out);
                    split(*rhs, out);
                }
                other => out.push(other),
            }
        }
        split(self, &mut out);
        out
    }

    /// Inverse of `split_conjunction`; `None` for an empty list.
    pub fn conjoin(exprs: Vec<Expr>) -> Option<Expr> {
        exprs.into_iter().reduce(Expr::and)
    }
}
