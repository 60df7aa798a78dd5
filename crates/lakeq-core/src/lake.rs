//! The data adaptor capability.
//!
//! The compiler never touches storage directly. Pool and commit resolution,
//! sort-key lookup, object listing, and opening of readers all go through
//! [`DataAdaptor`], which `lakeq-io` implements for an in-memory lake.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::batch::Puller;
use crate::error::Result;
use crate::eval;
use crate::expr::Expr;
use crate::sortkey::SortKeys;
use crate::value::Value;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }

            /// Parse a literal id; `None` if the text is not a UUID.
            pub fn parse(text: &str) -> Option<Self> {
                Uuid::parse_str(text).ok().map($name)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Stable identifier of a pool.
    PoolId
);
uuid_id!(
    /// Identifier of one commit in a pool's history.
    CommitId
);
uuid_id!(ObjectId);

/// One immutable data object of a pool with the range of its pool key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataObject {
    pub id: ObjectId,
    pub min: Value,
    pub max: Value,
    pub count: u64,
}

impl DataObject {
    /// `{min, max}` record a key pruner is evaluated against.
    pub fn key_range(&self) -> Value {
        Value::record([("min", self.min.clone()), ("max", self.max.clone())])
    }

    /// Record form handed from a lister to a scanner.
    pub fn to_value(&self) -> Value {
        Value::record([
            ("id", Value::Str(self.id.to_string())),
            ("min", self.min.clone()),
            ("max", self.max.clone()),
            ("count", Value::Int(self.count as i64)),
        ])
    }

    pub fn from_value(v: &Value) -> Option<Self> {
        let id = ObjectId::parse(v.field("id")?.as_str()?)?;
        Some(DataObject {
            id,
            min: v.field("min").cloned().unwrap_or(Value::Null),
            max: v.field("max").cloned().unwrap_or(Value::Null),
            count: v.field("count").and_then(Value::as_int).unwrap_or(0) as u64,
        })
    }
}

/// True if `pruner` proves the object cannot hold a matching row. A
/// pruner that does not evaluate to `true` never skips anything.
pub fn prune(pruner: &Expr, object: &DataObject) -> bool {
    matches!(
        eval::eval(pruner, &object.key_range(), &[]),
        Ok(Value::Bool(true))
    )
}

/// Caller-supplied default pool and branch for `HEAD` references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Head {
    pub pool: String,
    pub branch: String,
}

impl Head {
    pub fn new(pool: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            branch: branch.into(),
        }
    }
}

/// Hands out the objects of one pool at one commit.
///
/// A scheduler is shared by every reference to the same pool and commit in
/// a built graph. Replicas of a scattered scan split the work through the
/// shared cursor of [`Scheduler::next_object`]; independent readers iterate
/// the shared [`Scheduler::snapshot`].
pub trait Scheduler: Send + Sync {
    fn pool(&self) -> PoolId;
    fn commit(&self) -> CommitId;

    /// Next object not yet handed to any replica. Implementations must
    /// serialize concurrent callers.
    fn next_object(&self) -> Result<Option<DataObject>>;

    /// Every object that survives pruning, in key order.
    fn snapshot(&self) -> Result<Arc<Vec<DataObject>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaKind {
    /// `:pools`
    Pools,
    /// `pool:branches`
    Branches,
    /// `pool@commit:objects`
    Objects,
    /// `pool@commit:log`
    Log,
}

impl MetaKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pools" => Some(MetaKind::Pools),
            "branches" => Some(MetaKind::Branches),
            "objects" => Some(MetaKind::Objects),
            "log" => Some(MetaKind::Log),
            _ => None,
        }
    }
}

/// Access to pools, commits, and readers.
pub trait DataAdaptor: Send + Sync {
    /// Pool id for a name, `None` if no such pool exists.
    fn lookup_pool(&self, name: &str) -> Result<Option<PoolId>>;

    fn pool_names(&self) -> Result<Vec<String>>;

    /// Resolve a branch name or literal commit id within a pool.
    fn resolve_commit(&self, pool: PoolId, name: &str) -> Result<CommitId>;

    /// Proven order of the pool's data.
    fn sort_keys(&self, pool: PoolId) -> Result<SortKeys>;

    fn new_scheduler(
        &self,
        pool: PoolId,
        commit: CommitId,
        pruner: Option<&Expr>,
    ) -> Result<Arc<dyn Scheduler>>;

    /// Rows of one object, optionally filtered.
    fn open_object(
        &self,
        pool: PoolId,
        object: &DataObject,
        filter: Option<&Expr>,
    ) -> Result<Box<dyn Puller>>;

    /// Reader for a file path.
    fn open(
        &self,
        path: &str,
        format: Option<&str>,
        filter: Option<&Expr>,
    ) -> Result<Box<dyn Puller>>;

    fn open_http(&self, url: &str, format: Option<&str>, method: Option<&str>)
        -> Result<Box<dyn Puller>>;

    /// Rows of a metadata listing.
    fn meta_scan(
        &self,
        kind: MetaKind,
        pool: Option<PoolId>,
        commit: Option<CommitId>,
    ) -> Result<Vec<Value>>;

    /// Append values to a branch as a new object; returns the new commit.
    fn load(
        &self,
        pool: PoolId,
        branch: &str,
        values: Vec<Value>,
        message: Option<&str>,
    ) -> Result<CommitId>;

    /// Replace the listed objects with `keep` on a branch.
    fn delete(
        &self,
        pool: PoolId,
        branch: &str,
        objects: &[ObjectId],
        keep: Vec<Value>,
    ) -> Result<CommitId>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinOp;

    #[test]
    fn object_round_trips_through_value() {
        let obj = DataObject {
            id: ObjectId::new(),
            min: Value::Int(1),
            max: Value::Int(9),
            count: 3,
        };
        assert_eq!(DataObject::from_value(&obj.to_value()), Some(obj));
    }

    #[test]
    fn pruner_only_skips_on_true() {
        let obj = DataObject {
            id: ObjectId::new(),
            min: Value::Int(5),
            max: Value::Int(9),
            count: 1,
        };
        let skip = Expr::binary(BinOp::Gt, Expr::field("min"), Expr::lit(Value::Int(3)));
        assert!(prune(&skip, &obj));
        let keep = Expr::binary(BinOp::Gt, Expr::field("min"), Expr::lit(Value::Int(7)));
        assert!(!prune(&keep, &obj));
        assert!(!prune(&Expr::field("nope"), &obj));
    }
}
