use thiserror::Error;

use lakeq_core::lake::{CommitId, ObjectId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported format: {0}")]
    Format(String),

    #[error("pool {0}")]
    UnknownPool(String),

    #[error("branch {0}")]
    UnknownBranch(String),

    #[error("no commit {0}")]
    UnknownCommit(CommitId),

    #[error("no object {0}")]
    UnknownObject(ObjectId),

    #[error("pool {0} already exists")]
    PoolExists(String),

    #[error("not implemented: {0}")]
    Unimplemented(&'static str),

    #[error("lake state poisoned")]
    Poisoned,
}

impl Error {
    /// Surface a lake error through the core error type, tagged with the
    /// name or path that triggered it. Lookups that find nothing become
    /// `NotFound` so callers can tell them apart from I/O failures.
    pub fn into_core(self, context: impl Into<String>) -> lakeq_core::error::Error {
        use lakeq_core::error::Error as Core;
        match self {
            Error::UnknownPool(name) | Error::UnknownBranch(name) => Core::NotFound(name),
            Error::Unimplemented(what) => Core::Unimplemented(what),
            other => Core::adaptor(context, other),
        }
    }
}
