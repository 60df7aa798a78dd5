//! Expression lowering.

use lakeq_core::ast;
use lakeq_core::error::{Error, Result};
use lakeq_core::eval;
use lakeq_core::expr::{Assignment, BinOp, Expr, RecordElem, UnaryOp};
use lakeq_core::functions;
use lakeq_core::value::{parse_duration, parse_time, Value};

use super::scope::{Entry, Scope};
use super::sql::Relation;
use super::Analyzer;

impl Analyzer<'_> {
    /// Lower and constant-fold an expression in pipe context.
    pub(crate) fn lower_expr(&mut self, scope: &Scope<'_>, e: &ast::Expr) -> Result<Expr> {
        self.lower_expr_in(scope, e, None)
    }

    /// Lower and fold; with a relation, unresolved identifiers are columns
    /// of the relation instead of fields of `this`.
    pub(crate) fn lower_expr_in(
        &mut self,
        scope: &Scope<'_>,
        e: &ast::Expr,
        rel: Option<&Relation>,
    ) -> Result<Expr> {
        let resolved = self.resolve(scope, e, rel)?;
        eval::fold(resolved)
    }

    pub(crate) fn lower_exprs(&mut self, scope: &Scope<'_>, exprs: &[ast::Expr]) -> Result<Vec<Expr>> {
        exprs.iter().map(|e| self.lower_expr(scope, e)).collect()
    }

    /// Lower an assignment target, which must be a static field path.
    pub(crate) fn lower_lval(
        &mut self,
        scope: &Scope<'_>,
        e: &ast::Expr,
        rel: Option<&Relation>,
    ) -> Result<Expr> {
        let lowered = self.lower_expr_in(scope, e, rel)?;
        match lowered.as_path() {
            Some(path) if !path.is_empty() => Ok(lowered),
            _ => Err(Error::semantic(format!("cannot assign to {e}"))),
        }
    }

    /// Lower `lhs := rhs`; a missing lhs is inferred from the rhs (a field
    /// path names itself, a call names its function).
    pub(crate) fn lower_assignment(
        &mut self,
        scope: &Scope<'_>,
        a: &ast::Assignment,
        rel: Option<&Relation>,
    ) -> Result<Assignment> {
        let rhs = self.lower_expr_in(scope, &a.rhs, rel)?;
        let lhs = match &a.lhs {
            Some(lhs) => self.lower_lval(scope, lhs, rel)?,
            None => infer_lhs(&rhs).ok_or_else(|| {
                Error::semantic(format!("cannot infer field name for {}", a.rhs))
            })?,
        };
        Ok(Assignment::new(lhs, rhs))
    }

    pub(crate) fn lower_assignments(
        &mut self,
        scope: &Scope<'_>,
        args: &[ast::Assignment],
    ) -> Result<Vec<Assignment>> {
        args.iter()
            .map(|a| self.lower_assignment(scope, a, None))
            .collect()
    }

    /// Evaluate an optional count argument that must fold to a non-negative
    /// integer constant.
    pub(crate) fn const_count(
        &mut self,
        scope: &Scope<'_>,
        what: &str,
        e: Option<&ast::Expr>,
        default: usize,
    ) -> Result<usize> {
        let Some(e) = e else {
            return Ok(default);
        };
        match self.lower_expr(scope, e)? {
            Expr::Literal {
                value: Value::Int(n),
            } if n >= 0 => Ok(n as usize),
            _ => Err(Error::semantic(format!(
                "{what}: expression value must be a non-negative integer constant: {e}"
            ))),
        }
    }

    fn resolve(&mut self, scope: &Scope<'_>, e: &ast::Expr, rel: Option<&Relation>) -> Result<Expr> {
        match e {
            ast::Expr::Primitive { ty, text } => Ok(Expr::lit(primitive(ty, text)?)),
            ast::Expr::Id { name } => self.resolve_id(scope, name, rel),
            ast::Expr::This => Ok(Expr::this(Vec::new())),
            ast::Expr::Binary { op, lhs, rhs } if op == "." => {
                let ast::Expr::Id { name: field } = rhs.as_ref() else {
                    return Err(Error::semantic(format!("invalid field access: {e}")));
                };
                if let (Some(rel), ast::Expr::Id { name: table }) = (rel, lhs.as_ref()) {
                    if scope.lookup(table).is_none() {
                        if let Some(path) = rel.qualified(table, field) {
                            return Ok(Expr::this(path));
                        }
                    }
                }
                let lhs = self.resolve(scope, lhs, rel)?;
                Ok(Expr::dot(lhs, field))
            }
            ast::Expr::Binary { op, lhs, rhs } => {
                let op = BinOp::parse(op).map_err(Error::Semantic)?;
                Ok(Expr::binary(
                    op,
                    self.resolve(scope, lhs, rel)?,
                    self.resolve(scope, rhs, rel)?,
                ))
            }
            ast::Expr::Unary { op, operand } => Ok(Expr::Unary {
                op: UnaryOp::parse(op).map_err(Error::Semantic)?,
                operand: Box::new(self.resolve(scope, operand, rel)?),
            }),
            ast::Expr::Call { name, args, filter } => {
                self.resolve_call(scope, name, args, filter.as_deref(), rel)
            }
            ast::Expr::Conditional {
                cond,
                then,
                otherwise,
            } => Ok(Expr::Conditional {
                cond: Box::new(self.resolve(scope, cond, rel)?),
                then: Box::new(self.resolve(scope, then, rel)?),
                otherwise: Box::new(self.resolve(scope, otherwise, rel)?),
            }),
            ast::Expr::Record { elems } => {
                let mut out = Vec::with_capacity(elems.len());
                for elem in elems {
                    out.push(match elem {
                        ast::RecordElem::Field { name, value } => RecordElem::Field {
                            name: name.clone(),
                            value: self.resolve(scope, value, rel)?,
                        },
                        ast::RecordElem::Spread { expr } => RecordElem::Spread {
                            expr: self.resolve(scope, expr, rel)?,
                        },
                        ast::RecordElem::Identifier { name } => RecordElem::Field {
                            name: name.clone(),
                            value: self.resolve_id(scope, name, rel)?,
                        },
                    });
                }
                Ok(Expr::Record { elems: out })
            }
            ast::Expr::Array { elems } => Ok(Expr::Array {
                elems: elems
                    .iter()
                    .map(|e| self.resolve(scope, e, rel))
                    .collect::<Result<_>>()?,
            }),
            ast::Expr::Index { expr, index } => Ok(Expr::Index {
                expr: Box::new(self.resolve(scope, expr, rel)?),
                index: Box::new(self.resolve(scope, index, rel)?),
            }),
        }
    }

    fn resolve_id(&mut self, scope: &Scope<'_>, name: &str, rel: Option<&Relation>) -> Result<Expr> {
        match scope.lookup(name) {
            Some(Entry::Const(e)) => Ok(e.clone()),
            Some(Entry::Var { slot }) => Ok(Expr::Var {
                name: name.to_string(),
                slot: *slot,
            }),
            Some(other) => Err(Error::semantic(format!(
                "{name}: {} used as a value",
                other.describe()
            ))),
            None => match rel {
                Some(rel) => rel.column(name),
                None => Ok(Expr::field(name)),
            },
        }
    }

    fn resolve_call(
        &mut self,
        scope: &Scope<'_>,
        name: &str,
        args: &[ast::Expr],
        filter: Option<&ast::Expr>,
        rel: Option<&Relation>,
    ) -> Result<Expr> {
        match scope.lookup(name) {
            Some(Entry::Func { params, body }) => {
                if filter.is_some() {
                    return Err(Error::semantic(format!(
                        "{name}: where clause is only allowed on aggregate functions"
                    )));
                }
                if params.len() != args.len() {
                    return Err(Error::semantic(format!(
                        "function {name}: expected {} argument(s), got {}",
                        params.len(),
                        args.len()
                    )));
                }
                let mut bound = scope.child();
                for (param, arg) in params.iter().zip(args) {
                    let value = self.resolve(scope, arg, rel)?;
                    bound.define(param, Entry::Const(value))?;
                }
                return self.inlining("function", name, |a| a.resolve(&bound, body, None));
            }
            Some(Entry::Op { .. }) => {
                return Err(Error::semantic(format!(
                    "{name}: operator called as a function"
                )))
            }
            _ => {}
        }
        if functions::is_agg(name) {
            if args.len() > 1 {
                return Err(Error::semantic(format!(
                    "{name}: aggregate takes at most one argument"
                )));
            }
            if args.is_empty() && name != "count" {
                return Err(Error::semantic(format!("{name}: argument required")));
            }
            let expr = match args.first() {
                Some(arg) => Some(Box::new(self.resolve(scope, arg, rel)?)),
                None => None,
            };
            let filter = match filter {
                Some(f) => Some(Box::new(self.resolve(scope, f, rel)?)),
                None => None,
            };
            return Ok(Expr::Agg {
                name: name.to_string(),
                expr,
                filter,
            });
        }
        if filter.is_some() {
            return Err(Error::semantic(format!(
                "{name}: where clause is only allowed on aggregate functions"
            )));
        }
        functions::check_arity(name, args.len()).map_err(Error::Semantic)?;
        let args = args
            .iter()
            .map(|a| self.resolve(scope, a, rel))
            .collect::<Result<_>>()?;
        Ok(Expr::call(name, args))
    }
}

fn primitive(ty: &str, text: &str) -> Result<Value> {
    let bad = || Error::semantic(format!("invalid {ty} literal: {text}"));
    Ok(match ty {
        "int64" | "int" => Value::Int(text.parse().map_err(|_| bad())?),
        "float64" | "float" => Value::Float(text.parse().map_err(|_| bad())?),
        "string" => Value::Str(text.to_string()),
        "bool" => Value::Bool(text.parse().map_err(|_| bad())?),
        "time" => Value::Time(parse_time(text).ok_or_else(bad)?),
        "duration" => Value::Duration(parse_duration(text).ok_or_else(bad)?),
        "null" => Value::Null,
        _ => return Err(Error::semantic(format!("unknown primitive type: {ty}"))),
    })
}

/// Output field of an assignment written without a left-hand side.
fn infer_lhs(rhs: &Expr) -> Option<Expr> {
    match rhs {
        Expr::This { path } if !path.is_empty() => Some(rhs.clone()),
        Expr::Agg { name, .. } | Expr::Call { name, .. } => Some(Expr::field(name)),
        Expr::Var { name, .. } => Some(Expr::field(name)),
        _ => None,
    }
}

/// Expressions whose value is always a boolean, used to classify bare
/// expressions at operator position as filters.
pub(crate) fn is_boolean(e: &Expr) -> bool {
    match e {
        Expr::Binary { op, .. } => op.is_boolean(),
        Expr::Unary { op, .. } => matches!(op, UnaryOp::Not | UnaryOp::IsNull | UnaryOp::IsNotNull),
        Expr::Call { name, .. } => functions::is_boolean(name),
        Expr::Literal {
            value: Value::Bool(_),
        } => true,
        Expr::Conditional {
            then, otherwise, ..
        } => is_boolean(then) && is_boolean(otherwise),
        _ => false,
    }
}
