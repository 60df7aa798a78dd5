//! Lexical environments used while lowering.
//!
//! A [`Scope`] borrows its parent, so a block's scope lives exactly as long
//! as the function call lowering that block. There is no explicit exit.

use std::collections::BTreeMap;

use lakeq_core::ast;
use lakeq_core::error::{Error, Result};
use lakeq_core::expr::Expr;

#[derive(Debug, Clone)]
pub enum Entry {
    /// Resolved expression substituted wherever the name appears
    /// (`const` declarations and inlined call parameters).
    Const(Expr),
    /// Slot of the lateral evaluation frame.
    Var { slot: usize },
    Func {
        params: Vec<String>,
        body: ast::Expr,
    },
    Op {
        params: Vec<String>,
        body: ast::Seq,
    },
    /// Named SQL query (`with name as (...)`), lowered at each reference.
    Query(ast::SqlQuery),
}

impl Entry {
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Entry::Const(_) => "constant",
            Entry::Var { .. } => "variable",
            Entry::Func { .. } => "function",
            Entry::Op { .. } => "operator",
            Entry::Query(_) => "query",
        }
    }
}

#[derive(Debug, Default)]
pub struct Scope<'p> {
    parent: Option<&'p Scope<'p>>,
    entries: BTreeMap<String, Entry>,
    /// Variable slots allocated in this scope.
    vars: usize,
}

impl<'p> Scope<'p> {
    pub fn root() -> Scope<'static> {
        Scope::default()
    }

    pub fn child(&'p self) -> Scope<'p> {
        Scope {
            parent: Some(self),
            entries: BTreeMap::new(),
            vars: 0,
        }
    }

    /// Bind `name` in this scope level. Shadowing an outer binding is fine;
    /// binding the same name twice at one level is not.
    pub fn define(&mut self, name: &str, entry: Entry) -> Result<()> {
        if let Some(prev) = self.entries.get(name) {
            return Err(Error::semantic(format!(
                "symbol {name:?} redefined (already a {})",
                prev.describe()
            )));
        }
        if matches!(entry, Entry::Var { .. }) {
            self.vars += 1;
        }
        self.entries.insert(name.to_string(), entry);
        Ok(())
    }

    /// Allocate the next variable slot and bind `name` to it.
    pub fn define_var(&mut self, name: &str) -> Result<usize> {
        let slot = self.nvars();
        self.define(name, Entry::Var { slot })?;
        Ok(slot)
    }

    pub fn lookup(&self, name: &str) -> Option<&Entry> {
        match self.entries.get(name) {
            Some(entry) => Some(entry),
            None => self.parent.and_then(|p| p.lookup(name)),
        }
    }

    /// Number of variable slots visible from this scope; the next slot
    /// allocated here gets this index.
    pub fn nvars(&self) -> usize {
        self.vars + self.parent.map(Scope::nvars).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeq_core::value::Value;

    #[test]
    fn lookup_walks_outward_and_children_shadow() {
        let mut root = Scope::root();
        root.define("x", Entry::Const(Expr::lit(Value::Int(1))))
            .unwrap();
        let mut child = root.child();
        assert!(matches!(child.lookup("x"), Some(Entry::Const(_))));
        child.define_var("x").unwrap();
        assert!(matches!(child.lookup("x"), Some(Entry::Var { slot: 0 })));
        assert!(root.lookup("y").is_none());
    }

    #[test]
    fn redefinition_at_one_level_fails() {
        let mut root = Scope::root();
        root.define_var("a").unwrap();
        let err = root.define_var("a").unwrap_err();
        assert!(err.to_string().contains("redefined"));
    }

    #[test]
    fn slots_continue_across_levels() {
        let mut root = Scope::root();
        assert_eq!(root.define_var("a").unwrap(), 0);
        let mut child = root.child();
        assert_eq!(child.define_var("b").unwrap(), 1);
        let mut grandchild = child.child();
        assert_eq!(grandchild.define_var("c").unwrap(), 2);
        assert_eq!(grandchild.nvars(), 3);
    }
}
