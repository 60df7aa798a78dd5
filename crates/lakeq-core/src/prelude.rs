//! Convenient re-exports for downstream crates.

pub use crate::batch::{Batch, Context, Puller};
pub use crate::config::CompilerConfig;
pub use crate::dag::{Op, Seq};
pub use crate::error::{Error, Result};
pub use crate::expr::{Assignment, BinOp, Expr};
pub use crate::lake::{CommitId, DataAdaptor, DataObject, Head, ObjectId, PoolId, Scheduler};
pub use crate::sortkey::{Order, SortKey, SortKeys};
pub use crate::value::Value;
