//! Proven stream orderings.
//!
//! `SortKeys` is what the optimizer trades in when deciding whether a
//! summarize can stream, whether a parallel fan-out rejoins with an ordered
//! merge or an unordered combine, and whether a pool scan can be pruned by
//! key range. An empty `SortKeys` means "no proven order".

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expr::Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "asc" => Ok(Order::Asc),
            "desc" => Ok(Order::Desc),
            _ => Err(format!("unknown sort order: {}", s)),
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            Order::Asc => Order::Desc,
            Order::Desc => Order::Asc,
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Order::Asc => write!(f, "asc"),
            Order::Desc => write!(f, "desc"),
        }
    }
}

/// One (field path, direction) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub path: Vec<String>,
    pub order: Order,
}

impl SortKey {
    pub fn new(path: Vec<String>, order: Order) -> Self {
        Self { path, order }
    }

    pub fn asc(path: &[&str]) -> Self {
        Self::new(path.iter().map(|s| s.to_string()).collect(), Order::Asc)
    }

    /// The comparison expression a merge on this key evaluates.
    pub fn expr(&self) -> Expr {
        Expr::this(self.path.clone())
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path.join("."), self.order)
    }
}

/// Ordered list of sort keys; two lists are equal only if every pair
/// matches in order and direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct SortKeys(pub Vec<SortKey>);

impl SortKeys {
    pub fn nil() -> Self {
        SortKeys(Vec::new())
    }

    pub fn single(key: SortKey) -> Self {
        SortKeys(vec![key])
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_empty()
    }

    pub fn primary(&self) -> Option<&SortKey> {
        self.0.first()
    }

    /// True when the primary key sorts on exactly `path` (any direction).
    pub fn primary_is(&self, path: &[String]) -> bool {
        self.primary().map(|k| k.path == path).unwrap_or(false)
    }
}

impl fmt::Display for SortKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            return write!(f, "nil");
        }
        for (i, k) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{k}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_requires_matching_direction() {
        let a = SortKeys::single(SortKey::asc(&["ts"]));
        let mut b = a.clone();
        assert_eq!(a, b);
        b.0[0].order = Order::Desc;
        assert_ne!(a, b);
        assert!(SortKeys::nil().is_nil());
        assert_eq!(a.to_string(), "ts:asc");
    }
}
