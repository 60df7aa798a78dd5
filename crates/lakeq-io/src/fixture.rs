//! JSON lake fixtures.
//!
//! ```json
//! { "pools": [
//!     { "name": "logs", "key": "ts", "order": "asc",
//!       "objects": [ [ {"ts": 1, "msg": "a"} ], [ {"ts": 5, "msg": "b"} ] ] }
//! ] }
//! ```
//!
//! Each inner array becomes one data object on `main`, in its own commit.

use serde::{Deserialize, Serialize};

use lakeq_core::sortkey::{Order, SortKey, SortKeys};
use lakeq_core::value::Value;

use crate::error::{Error, Result};
use crate::lake::MemoryLake;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LakeFixture {
    #[serde(default)]
    pub pools: Vec<PoolFixture>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolFixture {
    pub name: String,
    /// Dotted path of the pool key; absent for an unordered pool.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub objects: Vec<Vec<serde_json::Value>>,
}

impl PoolFixture {
    fn sort_keys(&self) -> Result<SortKeys> {
        let Some(key) = &self.key else {
            return Ok(SortKeys::nil());
        };
        let order = match &self.order {
            Some(o) => Order::parse(o).map_err(Error::Format)?,
            None => Order::Asc,
        };
        let path = key.split('.').map(str::to_string).collect();
        Ok(SortKeys::single(SortKey::new(path, order)))
    }
}

impl LakeFixture {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn build(&self, batch_size: usize) -> Result<MemoryLake> {
        let lake = MemoryLake::new().with_batch_size(batch_size);
        for pf in &self.pools {
            let pool = lake.create_pool(&pf.name, pf.sort_keys()?)?;
            for rows in &pf.objects {
                let values = rows.iter().map(Value::from_json).collect();
                lake.append(pool, "main", values, Some("fixture"))?;
            }
            for b in &pf.branches {
                lake.create_branch(pool, b, "main")?;
            }
        }
        tracing::debug!(pools = self.pools.len(), "built lake from fixture");
        Ok(lake)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeq_core::lake::DataAdaptor;

    #[test]
    fn builds_pools_objects_and_branches() {
        let fx = LakeFixture::parse(
            r#"{"pools":[{"name":"logs","key":"ts","order":"desc","branches":["dev"],
                "objects":[[{"ts":1}],[{"ts":5},{"ts":3}]]}]}"#,
        )
        .unwrap();
        let lake = fx.build(10).unwrap();
        let pool = lake.lookup_pool("logs").unwrap().unwrap();
        assert_eq!(lake.sort_keys(pool).unwrap().to_string(), "ts:desc");
        let dev = lake.resolve_commit(pool, "dev").unwrap();
        let objs = lake.objects(pool, dev).unwrap();
        assert_eq!(objs.len(), 2);
        // Descending pools list the highest range first.
        assert_eq!(objs[0].max, Value::Int(5));
    }

    #[test]
    fn rejects_unknown_order() {
        let fx = LakeFixture::parse(r#"{"pools":[{"name":"p","key":"k","order":"up"}]}"#).unwrap();
        assert!(matches!(fx.build(1), Err(Error::Format(_))));
    }
}
