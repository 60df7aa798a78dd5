//! Compiler and runtime configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Replica count for parallelized pool scans; 1 disables parallelization.
    pub parallelism: usize,
    /// Vectorized execution is in effect (affects file-source pushdown).
    pub vectorized: bool,
    /// Run the optimizer at all.
    pub optimize: bool,
    /// Rows per batch produced by scans.
    pub batch_size: usize,
    /// Capacity of bounded worker handoff channels, in batches.
    pub channel_capacity: usize,
    /// Drive each upstream of a combine or merge from its own thread.
    pub parallel_workers: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            parallelism: 1,
            vectorized: false,
            optimize: true,
            batch_size: 500,
            channel_capacity: 4,
            parallel_workers: true,
        }
    }
}

impl CompilerConfig {
    /// Defaults overridden by `LAKEQ_*` environment variables. Unparseable
    /// values are ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = env_parse::<usize>("LAKEQ_PARALLELISM") {
            cfg.parallelism = n;
        }
        if let Some(b) = env_parse::<bool>("LAKEQ_VECTORIZED") {
            cfg.vectorized = b;
        }
        if let Some(b) = env_parse::<bool>("LAKEQ_OPTIMIZE") {
            cfg.optimize = b;
        }
        if let Some(n) = env_parse::<usize>("LAKEQ_BATCH_SIZE") {
            cfg.batch_size = n;
        }
        if let Some(n) = env_parse::<usize>("LAKEQ_CHANNEL_CAPACITY") {
            cfg.channel_capacity = n;
        }
        if let Some(b) = env_parse::<bool>("LAKEQ_PARALLEL_WORKERS") {
            cfg.parallel_workers = b;
        }
        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(Error::Config("parallelism must be >= 1".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be >= 1".into()));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config("channel_capacity must be >= 1".into()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = CompilerConfig::default();
        assert!(cfg.validate().is_ok());
        let bad = CompilerConfig {
            parallelism: 0,
            ..cfg
        };
        let err = bad.validate().unwrap_err();
        assert!(!err.suggestions().is_empty());
    }
}
