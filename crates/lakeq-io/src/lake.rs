//! In-memory lake.
//!
//! Pools hold branches pointing at commits; a commit is an immutable list
//! of data objects kept in pool-key order. Loads and deletes never mutate
//! an object: they write new objects and a new commit and move the branch.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use lakeq_core::batch::{Batch, Puller};
use lakeq_core::error::{Error as CoreError, Result as CoreResult};
use lakeq_core::eval;
use lakeq_core::expr::Expr;
use lakeq_core::lake::{
    prune, CommitId, DataAdaptor, DataObject, MetaKind, ObjectId, PoolId, Scheduler,
};
use lakeq_core::sortkey::{Order, SortKeys};
use lakeq_core::value::Value;

use crate::error::{Error, Result};
use crate::readers::JsonlReader;

#[derive(Debug, Clone)]
struct Commit {
    parent: Option<CommitId>,
    objects: Vec<DataObject>,
    message: String,
    /// Nanoseconds since the epoch.
    date: i64,
}

#[derive(Debug)]
struct Pool {
    id: PoolId,
    name: String,
    keys: SortKeys,
    branches: BTreeMap<String, CommitId>,
    commits: HashMap<CommitId, Commit>,
}

impl Pool {
    fn commit(&self, id: CommitId) -> Result<&Commit> {
        self.commits.get(&id).ok_or(Error::UnknownCommit(id))
    }

    fn head(&self, branch: &str) -> Result<CommitId> {
        self.branches
            .get(branch)
            .copied()
            .ok_or_else(|| Error::UnknownBranch(format!("{}@{branch}", self.name)))
    }

    fn key_of(&self, row: &Value) -> Value {
        match self.keys.primary() {
            Some(k) => row.deref_path(&k.path),
            None => Value::Null,
        }
    }

    fn order(&self) -> Order {
        self.keys.primary().map(|k| k.order).unwrap_or_default()
    }

    /// Sort objects so listing order follows the pool key.
    fn sort_objects(&self, objects: &mut [DataObject]) {
        match self.order() {
            Order::Asc => objects.sort_by(|a, b| a.min.total_cmp(&b.min)),
            Order::Desc => objects.sort_by(|a, b| b.max.total_cmp(&a.max)),
        }
    }

    /// Write `rows` as a new object in key order. `None` for no rows.
    fn write_object(
        &self,
        mut rows: Vec<Value>,
        data: &mut HashMap<ObjectId, Arc<Vec<Value>>>,
    ) -> Option<DataObject> {
        if rows.is_empty() {
            return None;
        }
        if let Some(k) = self.keys.primary() {
            rows.sort_by(|a, b| {
                let (ka, kb) = (a.deref_path(&k.path), b.deref_path(&k.path));
                match k.order {
                    Order::Asc => ka.total_cmp(&kb),
                    Order::Desc => kb.total_cmp(&ka),
                }
            });
        }
        let keys: Vec<Value> = rows.iter().map(|r| self.key_of(r)).collect();
        let min = keys.iter().min_by(|a, b| a.total_cmp(b)).cloned();
        let max = keys.iter().max_by(|a, b| a.total_cmp(b)).cloned();
        let obj = DataObject {
            id: ObjectId::new(),
            min: min.unwrap_or(Value::Null),
            max: max.unwrap_or(Value::Null),
            count: rows.len() as u64,
        };
        data.insert(obj.id, Arc::new(rows));
        Some(obj)
    }
}

#[derive(Debug, Default)]
struct State {
    pools: Vec<Pool>,
    data: HashMap<ObjectId, Arc<Vec<Value>>>,
}

impl State {
    fn pool(&self, id: PoolId) -> Result<&Pool> {
        self.pools
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::UnknownPool(id.to_string()))
    }

    fn pool_mut(&mut self, id: PoolId) -> Result<&mut Pool> {
        self.pools
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::UnknownPool(id.to_string()))
    }
}

/// A lake held entirely in memory. Cheap to share: every method takes
/// `&self`.
#[derive(Debug)]
pub struct MemoryLake {
    state: RwLock<State>,
    batch_size: usize,
}

impl Default for MemoryLake {
    fn default() -> Self {
        Self::new()
    }
}

fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

impl MemoryLake {
    pub fn new() -> Self {
        Self {
            state: RwLock::default(),
            batch_size: 500,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| Error::Poisoned)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| Error::Poisoned)
    }

    /// Create an empty pool with a `main` branch.
    pub fn create_pool(&self, name: &str, keys: SortKeys) -> Result<PoolId> {
        let mut state = self.write()?;
        if state.pools.iter().any(|p| p.name == name) {
            return Err(Error::PoolExists(name.to_string()));
        }
        let id = PoolId::new();
        let root = CommitId::new();
        let commit = Commit {
            parent: None,
            objects: Vec::new(),
            message: "initial commit".into(),
            date: now_nanos(),
        };
        state.pools.push(Pool {
            id,
            name: name.to_string(),
            keys,
            branches: BTreeMap::from([("main".to_string(), root)]),
            commits: HashMap::from([(root, commit)]),
        });
        tracing::debug!(pool = name, id = %id, "created pool");
        Ok(id)
    }

    /// Point a new branch at the head of `from`.
    pub fn create_branch(&self, pool: PoolId, name: &str, from: &str) -> Result<CommitId> {
        let mut state = self.write()?;
        let p = state.pool_mut(pool)?;
        let head = p.head(from)?;
        p.branches.insert(name.to_string(), head);
        Ok(head)
    }

    /// Append `rows` to a branch as one new object.
    pub fn append(
        &self,
        pool: PoolId,
        branch: &str,
        rows: Vec<Value>,
        message: Option<&str>,
    ) -> Result<CommitId> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        let p = state
            .pools
            .iter_mut()
            .find(|p| p.id == pool)
            .ok_or_else(|| Error::UnknownPool(pool.to_string()))?;
        let parent = p.head(branch)?;
        let mut objects = p.commit(parent)?.objects.clone();
        let rows_len = rows.len();
        if let Some(obj) = p.write_object(rows, &mut state.data) {
            objects.push(obj);
        }
        p.sort_objects(&mut objects);
        let id = CommitId::new();
        p.commits.insert(
            id,
            Commit {
                parent: Some(parent),
                objects,
                message: message.unwrap_or("loaded").to_string(),
                date: now_nanos(),
            },
        );
        p.branches.insert(branch.to_string(), id);
        tracing::debug!(pool = %p.name, branch, rows = rows_len, commit = %id, "appended object");
        Ok(id)
    }

    /// Drop `remove` from a branch, writing `keep` as one replacement object.
    pub fn replace(
        &self,
        pool: PoolId,
        branch: &str,
        remove: &[ObjectId],
        keep: Vec<Value>,
    ) -> Result<CommitId> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        let p = state
            .pools
            .iter_mut()
            .find(|p| p.id == pool)
            .ok_or_else(|| Error::UnknownPool(pool.to_string()))?;
        let parent = p.head(branch)?;
        let mut objects = p.commit(parent)?.objects.clone();
        if let Some(missing) = remove.iter().find(|id| !objects.iter().any(|o| o.id == **id)) {
            return Err(Error::UnknownObject(*missing));
        }
        objects.retain(|o| !remove.contains(&o.id));
        if let Some(obj) = p.write_object(keep, &mut state.data) {
            objects.push(obj);
        }
        p.sort_objects(&mut objects);
        let id = CommitId::new();
        p.commits.insert(
            id,
            Commit {
                parent: Some(parent),
                objects,
                message: format!("deleted from {} objects", remove.len()),
                date: now_nanos(),
            },
        );
        p.branches.insert(branch.to_string(), id);
        Ok(id)
    }

    /// Data objects of a pool at a commit, in key order.
    pub fn objects(&self, pool: PoolId, commit: CommitId) -> Result<Vec<DataObject>> {
        let state = self.read()?;
        Ok(state.pool(pool)?.commit(commit)?.objects.clone())
    }

    /// Every row on a branch, object by object in key order.
    pub fn rows(&self, pool: PoolId, branch: &str) -> Result<Vec<Value>> {
        let state = self.read()?;
        let p = state.pool(pool)?;
        let commit = p.commit(p.head(branch)?)?;
        let mut out = Vec::new();
        for obj in &commit.objects {
            let rows = state.data.get(&obj.id).ok_or(Error::UnknownObject(obj.id))?;
            out.extend(rows.iter().cloned());
        }
        Ok(out)
    }

    fn resolve(&self, pool: PoolId, name: &str) -> Result<CommitId> {
        let state = self.read()?;
        let p = state.pool(pool)?;
        if let Some(id) = p.branches.get(name) {
            return Ok(*id);
        }
        match CommitId::parse(name) {
            Some(id) if p.commits.contains_key(&id) => Ok(id),
            _ => Err(Error::UnknownBranch(format!("{}@{name}", p.name))),
        }
    }

    fn meta(&self, kind: MetaKind, pool: Option<PoolId>, commit: Option<CommitId>) -> Result<Vec<Value>> {
        let state = self.read()?;
        let need_pool = || pool.ok_or(Error::Unimplemented("metadata listing without a pool"));
        let need_commit = || commit.ok_or(Error::Unimplemented("metadata listing without a commit"));
        match kind {
            MetaKind::Pools => Ok(state
                .pools
                .iter()
                .map(|p| {
                    Value::record([
                        ("name", Value::Str(p.name.clone())),
                        ("id", Value::Str(p.id.to_string())),
                        ("keys", Value::Str(p.keys.to_string())),
                    ])
                })
                .collect()),
            MetaKind::Branches => {
                let p = state.pool(need_pool()?)?;
                Ok(p.branches
                    .iter()
                    .map(|(name, id)| {
                        Value::record([
                            ("branch", Value::Str(name.clone())),
                            ("commit", Value::Str(id.to_string())),
                        ])
                    })
                    .collect())
            }
            MetaKind::Objects => {
                let p = state.pool(need_pool()?)?;
                Ok(p.commit(need_commit()?)?
                    .objects
                    .iter()
                    .map(DataObject::to_value)
                    .collect())
            }
            MetaKind::Log => {
                let p = state.pool(need_pool()?)?;
                let mut out = Vec::new();
                let mut at = Some(need_commit()?);
                while let Some(id) = at {
                    let c = p.commit(id)?;
                    out.push(Value::record([
                        ("commit", Value::Str(id.to_string())),
                        (
                            "parent",
                            c.parent
                                .map(|parent| Value::Str(parent.to_string()))
                                .unwrap_or(Value::Null),
                        ),
                        ("message", Value::Str(c.message.clone())),
                        ("date", Value::Time(c.date)),
                    ]));
                    at = c.parent;
                }
                Ok(out)
            }
        }
    }
}

/// Hands out the objects of one pool at one commit that survive the
/// pruner. `next_object` is a cursor shared by every caller.
pub struct LakeScheduler {
    pool: PoolId,
    commit: CommitId,
    objects: Arc<Vec<DataObject>>,
    cursor: Mutex<usize>,
}

impl Scheduler for LakeScheduler {
    fn pool(&self) -> PoolId {
        self.pool
    }

    fn commit(&self) -> CommitId {
        self.commit
    }

    fn next_object(&self) -> CoreResult<Option<DataObject>> {
        let mut cursor = self
            .cursor
            .lock()
            .map_err(|_| Error::Poisoned.into_core("scheduler cursor"))?;
        let obj = self.objects.get(*cursor).cloned();
        if obj.is_some() {
            *cursor += 1;
        }
        Ok(obj)
    }

    fn snapshot(&self) -> CoreResult<Arc<Vec<DataObject>>> {
        Ok(self.objects.clone())
    }
}

/// Rows of one stored object.
struct ObjectReader {
    rows: Arc<Vec<Value>>,
    pos: usize,
    filter: Option<Expr>,
    batch_size: usize,
}

impl Puller for ObjectReader {
    fn pull(&mut self, done: bool) -> CoreResult<Option<Batch>> {
        if done {
            self.pos = self.rows.len();
            return Ok(None);
        }
        let mut out = Vec::new();
        while self.pos < self.rows.len() && out.len() < self.batch_size {
            let row = &self.rows[self.pos];
            self.pos += 1;
            let keep = match &self.filter {
                Some(f) => eval::eval_bool(f, row, &[])?,
                None => true,
            };
            if keep {
                out.push(row.clone());
            }
        }
        if out.is_empty() {
            return Ok(None);
        }
        Ok(Some(Batch::new(out)))
    }
}

impl DataAdaptor for MemoryLake {
    fn lookup_pool(&self, name: &str) -> CoreResult<Option<PoolId>> {
        let state = self.read().map_err(|e| e.into_core(name))?;
        Ok(state.pools.iter().find(|p| p.name == name).map(|p| p.id))
    }

    fn pool_names(&self) -> CoreResult<Vec<String>> {
        let state = self.read().map_err(|e| e.into_core("pool names"))?;
        Ok(state.pools.iter().map(|p| p.name.clone()).collect())
    }

    fn resolve_commit(&self, pool: PoolId, name: &str) -> CoreResult<CommitId> {
        self.resolve(pool, name).map_err(|e| e.into_core(name))
    }

    fn sort_keys(&self, pool: PoolId) -> CoreResult<SortKeys> {
        let state = self.read().map_err(|e| e.into_core("sort keys"))?;
        state
            .pool(pool)
            .map(|p| p.keys.clone())
            .map_err(|e| e.into_core("sort keys"))
    }

    fn new_scheduler(
        &self,
        pool: PoolId,
        commit: CommitId,
        pruner: Option<&Expr>,
    ) -> CoreResult<Arc<dyn Scheduler>> {
        let mut objects = self
            .objects(pool, commit)
            .map_err(|e| e.into_core(format!("{pool}@{commit}")))?;
        let listed = objects.len();
        if let Some(p) = pruner {
            objects.retain(|o| !prune(p, o));
        }
        tracing::debug!(
            pool = %pool,
            commit = %commit,
            listed,
            kept = objects.len(),
            "new scheduler"
        );
        Ok(Arc::new(LakeScheduler {
            pool,
            commit,
            objects: Arc::new(objects),
            cursor: Mutex::new(0),
        }))
    }

    fn open_object(
        &self,
        _pool: PoolId,
        object: &DataObject,
        filter: Option<&Expr>,
    ) -> CoreResult<Box<dyn Puller>> {
        let state = self.read().map_err(|e| e.into_core("open object"))?;
        let rows = state
            .data
            .get(&object.id)
            .cloned()
            .ok_or_else(|| Error::UnknownObject(object.id).into_core("open object"))?;
        Ok(Box::new(ObjectReader {
            rows,
            pos: 0,
            filter: filter.cloned(),
            batch_size: self.batch_size.max(1),
        }))
    }

    fn open(
        &self,
        path: &str,
        format: Option<&str>,
        filter: Option<&Expr>,
    ) -> CoreResult<Box<dyn Puller>> {
        match format.unwrap_or("jsonl") {
            "json" | "jsonl" | "ndjson" => {
                let r = JsonlReader::from_path(path).map_err(|e| e.into_core(path))?;
                Ok(Box::new(
                    r.with_filter(filter.cloned())
                        .with_batch_size(self.batch_size.max(1)),
                ))
            }
            other => Err(Error::Format(other.to_string()).into_core(path)),
        }
    }

    fn open_http(
        &self,
        _url: &str,
        _format: Option<&str>,
        _method: Option<&str>,
    ) -> CoreResult<Box<dyn Puller>> {
        Err(CoreError::Unimplemented("http sources"))
    }

    fn meta_scan(
        &self,
        kind: MetaKind,
        pool: Option<PoolId>,
        commit: Option<CommitId>,
    ) -> CoreResult<Vec<Value>> {
        self.meta(kind, pool, commit)
            .map_err(|e| e.into_core("metadata listing"))
    }

    fn load(
        &self,
        pool: PoolId,
        branch: &str,
        values: Vec<Value>,
        message: Option<&str>,
    ) -> CoreResult<CommitId> {
        self.append(pool, branch, values, message)
            .map_err(|e| e.into_core(format!("load {branch}")))
    }

    fn delete(
        &self,
        pool: PoolId,
        branch: &str,
        objects: &[ObjectId],
        keep: Vec<Value>,
    ) -> CoreResult<CommitId> {
        self.replace(pool, branch, objects, keep)
            .map_err(|e| e.into_core(format!("delete on {branch}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeq_core::expr::BinOp;
    use lakeq_core::sortkey::SortKey;

    fn rows(range: std::ops::Range<i64>) -> Vec<Value> {
        range.map(|k| Value::record([("k", Value::Int(k))])).collect()
    }

    fn lake() -> (MemoryLake, PoolId) {
        let lake = MemoryLake::new().with_batch_size(2);
        let pool = lake
            .create_pool("p", SortKeys::single(SortKey::asc(&["k"])))
            .unwrap();
        lake.append(pool, "main", rows(10..20), None).unwrap();
        lake.append(pool, "main", rows(0..10), None).unwrap();
        (lake, pool)
    }

    #[test]
    fn objects_list_in_key_order() {
        let (lake, pool) = lake();
        let head = lake.resolve_commit(pool, "main").unwrap();
        let objs = lake.objects(pool, head).unwrap();
        assert_eq!(objs.len(), 2);
        assert_eq!(objs[0].min, Value::Int(0));
        assert_eq!(objs[1].max, Value::Int(19));
    }

    #[test]
    fn scheduler_cursor_hands_out_each_object_once() {
        let (lake, pool) = lake();
        let head = lake.resolve_commit(pool, "main").unwrap();
        let pruner = Expr::binary(BinOp::Gt, Expr::field("min"), Expr::lit(Value::Int(5)));
        let s = lake.new_scheduler(pool, head, Some(&pruner)).unwrap();
        assert_eq!(s.snapshot().unwrap().len(), 1);
        assert!(s.next_object().unwrap().is_some());
        assert!(s.next_object().unwrap().is_none());
    }

    #[test]
    fn replace_and_log_move_the_branch() {
        let (lake, pool) = lake();
        let head = lake.resolve_commit(pool, "main").unwrap();
        let first = lake.objects(pool, head).unwrap()[0].id;
        let next = lake.replace(pool, "main", &[first], rows(0..3)).unwrap();
        assert_eq!(lake.rows(pool, "main").unwrap().len(), 13);
        let log = lake.meta_scan(MetaKind::Log, Some(pool), Some(next)).unwrap();
        assert_eq!(log.len(), 4);
        // The replaced commit is still readable by id.
        assert!(lake.resolve_commit(pool, &head.to_string()).is_ok());
    }

    #[test]
    fn unknown_names_are_not_found() {
        let (lake, pool) = lake();
        assert!(matches!(
            lake.resolve_commit(pool, "nope"),
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            lake.open_http("http://x", None, None),
            Err(CoreError::Unimplemented(_))
        ));
        assert_eq!(lake.lookup_pool("q").unwrap(), None);
    }
}
