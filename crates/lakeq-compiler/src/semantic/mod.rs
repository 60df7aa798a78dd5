//! Semantic analysis: surface AST → DAG.
//!
//! The analyzer resolves every identifier against the enclosing [`Scope`]
//! chain (falling back to a field of `this`), classifies bare expressions
//! and assignment lists at operator position, resolves pool and commit
//! names through the [`DataAdaptor`], inlines user functions and operators,
//! and lowers SQL queries into the same operator set the pipe syntax uses.
//!
//! The only side effects are read-only adaptor calls.

mod expr;
mod op;
mod scope;
mod source;
mod sql;

use lakeq_core::ast;
use lakeq_core::dag::{Op, Seq};
use lakeq_core::error::{Error, Result};
use lakeq_core::lake::{DataAdaptor, Head};

pub use scope::{Entry, Scope};

/// Lower `seq` into a DAG sequence.
///
/// A query that does not begin by reading a source of its own is prefixed
/// with a [`Op::DefaultScan`] reading the caller's in-process readers.
pub fn analyze(seq: &ast::Seq, adaptor: &dyn DataAdaptor, head: Option<&Head>) -> Result<Seq> {
    if seq.is_empty() {
        return Err(Error::semantic("empty query"));
    }
    let mut analyzer = Analyzer::new(adaptor, head);
    let scope = Scope::root();
    let mut out = analyzer.lower_seq(&scope, seq)?;
    if !self_sufficient(&out) {
        out.insert(
            0,
            Op::DefaultScan {
                filter: None,
                demand: None,
            },
        );
    }
    tracing::debug!(ops = out.len(), "semantic analysis complete");
    Ok(out)
}

/// True when the sequence produces its own input: it starts with a source,
/// or with a scope or fork whose every path does.
pub(crate) fn self_sufficient(seq: &Seq) -> bool {
    match seq.first() {
        Some(op) if op.is_source() => true,
        Some(Op::Scope { body }) => self_sufficient(body),
        Some(Op::Fork { paths }) => !paths.is_empty() && paths.iter().all(self_sufficient),
        _ => false,
    }
}

pub(crate) struct Analyzer<'a> {
    adaptor: &'a dyn DataAdaptor,
    head: Option<&'a Head>,
    /// Names of the user functions and operators being inlined, innermost
    /// last; used to reject recursion.
    calls: Vec<String>,
}

impl<'a> Analyzer<'a> {
    pub(crate) fn new(adaptor: &'a dyn DataAdaptor, head: Option<&'a Head>) -> Self {
        Self {
            adaptor,
            head,
            calls: Vec::new(),
        }
    }

    /// Run `f` with `name` pushed on the inlining stack.
    fn inlining<T>(
        &mut self,
        kind: &str,
        name: &str,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        if self.calls.iter().any(|c| c == name) {
            return Err(Error::semantic(format!(
                "{kind} {name}: recursive calls are not supported"
            )));
        }
        self.calls.push(name.to_string());
        let out = f(self);
        self.calls.pop();
        out
    }
}
