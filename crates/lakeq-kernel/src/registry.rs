//! Scheduler registry.
//!
//! Keyed by value: pool, commit, and the scatter the reference sits in.
//! References outside any scatter share one scheduler per pool and commit
//! and each walk its snapshot. Replicas inside one scatter share a
//! scheduler of their own and split its objects through the cursor.
//!
//! Only the builder mutates the registry, and only while building.

use std::collections::HashMap;
use std::sync::Arc;

use lakeq_core::error::Result;
use lakeq_core::expr::Expr;
use lakeq_core::lake::{CommitId, DataAdaptor, PoolId, Scheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchedulerKey {
    pub pool: PoolId,
    pub commit: CommitId,
    pub scatter: Option<usize>,
}

#[derive(Default)]
pub struct SchedulerRegistry {
    entries: HashMap<SchedulerKey, Arc<dyn Scheduler>>,
    /// Keys in creation order.
    order: Vec<SchedulerKey>,
}

impl SchedulerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduler for `key`, created on first use. Only scatter replicas
    /// hand their pruner to the adaptor: they all carry the same one, while
    /// independent references may not.
    pub fn get_or_create(
        &mut self,
        adaptor: &dyn DataAdaptor,
        key: SchedulerKey,
        pruner: Option<&Expr>,
    ) -> Result<Arc<dyn Scheduler>> {
        if let Some(s) = self.entries.get(&key) {
            tracing::trace!(pool = %key.pool, commit = %key.commit, "reusing scheduler");
            return Ok(s.clone());
        }
        let pruner = if key.scatter.is_some() { pruner } else { None };
        let s = adaptor
            .new_scheduler(key.pool, key.commit, pruner)
            .map_err(|e| e.with_context(format!("scheduler for {}@{}", key.pool, key.commit)))?;
        tracing::debug!(
            pool = %key.pool,
            commit = %key.commit,
            scatter = ?key.scatter,
            "created scheduler"
        );
        self.entries.insert(key, s.clone());
        self.order.push(key);
        Ok(s)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every scheduler, in creation order.
    pub fn schedulers(&self) -> Vec<Arc<dyn Scheduler>> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeq_core::sortkey::SortKeys;
    use lakeq_io::MemoryLake;

    #[test]
    fn same_key_same_instance() {
        let lake = MemoryLake::new();
        let pool = lake.create_pool("p", SortKeys::nil()).unwrap();
        let commit = lake.resolve_commit(pool, "main").unwrap();
        let mut reg = SchedulerRegistry::new();
        let key = SchedulerKey {
            pool,
            commit,
            scatter: None,
        };
        let a = reg.get_or_create(&lake, key, None).unwrap();
        let b = reg.get_or_create(&lake, key, None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let c = reg
            .get_or_create(
                &lake,
                SchedulerKey {
                    scatter: Some(0),
                    ..key
                },
                None,
            )
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(reg.len(), 2);
    }
}
