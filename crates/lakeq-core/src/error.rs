use thiserror::Error;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// User-facing shape error found while lowering a query
    /// (unknown identifier, malformed rename, mixed aggregations...).
    #[error("{0}")]
    Semantic(String),

    /// A named pool, branch, or pattern did not resolve to anything.
    #[error("{0}: not found")]
    NotFound(String),

    /// Failure reported by the data adaptor, tagged with the name or path
    /// that triggered it. The inner error is surfaced unchanged.
    #[error("{context}: {source}")]
    Adaptor {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A structural precondition of an optimizer pass or of the builder was
    /// violated. Always a defect in an upstream pass, never a user mistake.
    #[error("internal error: {0}")]
    Internal(String),

    /// A YAML or JSON query document did not deserialize into an AST.
    #[error("invalid query document: {0}")]
    Document(String),

    #[error("invalid delete where query")]
    InvalidDeleteWhere,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("execution error: {0}")]
    Exec(String),

    /// Evaluator fault at run time (unknown function, unbound variable).
    #[error(transparent)]
    Eval(#[from] crate::eval::EvalError),

    #[error("query canceled")]
    Canceled,

    #[error("not implemented: {0}")]
    Unimplemented(&'static str),

    /// Error with context chain for better debugging
    #[error("Error in {context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    pub fn semantic(msg: impl Into<String>) -> Self {
        Error::Semantic(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Wrap an error coming back from a data adaptor call with the name or
    /// path that was being resolved.
    pub fn adaptor(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Adaptor {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Add context to an error, creating an error chain.
    ///
    /// # Example
    /// ```rust,no_run
    /// use lakeq_core::error::Error;
    /// let err = Error::Semantic("unknown column 'xyz'".into());
    /// let err = err.with_context("while lowering select");
    /// ```
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self) as Box<dyn std::error::Error + Send + Sync>,
        }
    }

    /// True for errors that indicate a defect in the compiler itself rather
    /// than a problem with the query or the data.
    pub fn is_internal(&self) -> bool {
        match self {
            Error::Internal(_) => true,
            Error::Eval(e) => !e.is_recoverable(),
            Error::Context { source, .. } => source
                .downcast_ref::<Error>()
                .map(Error::is_internal)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Get suggestions for common errors (e.g., HEAD usage).
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Error::Semantic(msg) => {
                if msg.contains("HEAD") {
                    vec!["Supply a current pool and branch when compiling the query".into()]
                } else if msg.contains("ambiguous") {
                    vec!["Qualify the column with its table name or alias".into()]
                } else if msg.contains("rename") {
                    vec!["Renamed fields must keep the same parent path".into()]
                } else {
                    vec![]
                }
            }
            Error::NotFound(_) => {
                vec!["Check that the pool or branch name is spelled correctly".into()]
            }
            Error::Config(msg) => {
                if msg.contains("parallelism") {
                    vec!["Parallelism must be at least 1".into()]
                } else {
                    vec![]
                }
            }
            _ => vec![],
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}
