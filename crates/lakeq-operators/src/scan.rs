//! Sources: object listing, slicing, sequential pool scans, metadata
//! listings, readers opened through the adaptor, and the deleter.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use lakeq_core::batch::{Batch, Context, Puller};
use lakeq_core::dag::Demand;
use lakeq_core::error::{Error, Result};
use lakeq_core::eval;
use lakeq_core::expr::Expr;
use lakeq_core::lake::{prune, DataAdaptor, DataObject, ObjectId, PoolId, Scheduler};
use lakeq_core::sortkey::Order;
use lakeq_core::value::Value;

use crate::puller::{poisoned, Parent, Values};
use crate::sort::compare_keys;

/// Keep only the demanded paths of a record. An empty path demands the
/// whole value.
pub fn project_demand(v: Value, demand: &Demand) -> Value {
    let Some(paths) = demand else {
        return v;
    };
    if !matches!(v, Value::Record(_)) || paths.iter().any(Vec::is_empty) {
        return v;
    }
    let mut out = Value::Record(Vec::new());
    for p in paths {
        let field = v.deref_path(p);
        if !field.is_missing() {
            out.set_path(p, field);
        }
    }
    out
}

/// Emits the data objects of a pool as records. Inside a scatter the
/// replicas share the scheduler's cursor and so split the objects between
/// them; otherwise the lister walks the scheduler's snapshot. A scheduler
/// may be shared by listers with different pruners, so each lister also
/// prunes what it is handed.
pub struct Lister {
    scheduler: Arc<dyn Scheduler>,
    shared_cursor: bool,
    pruner: Option<Expr>,
    snapshot: Option<VecDeque<DataObject>>,
    ctx: Context,
    batch_size: usize,
    done: bool,
}

impl Lister {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        shared_cursor: bool,
        pruner: Option<Expr>,
        ctx: Context,
        batch_size: usize,
    ) -> Self {
        Self {
            scheduler,
            shared_cursor,
            pruner,
            snapshot: None,
            ctx,
            batch_size: batch_size.max(1),
            done: false,
        }
    }

    fn skip(&self, obj: &DataObject) -> bool {
        self.pruner.as_ref().map(|p| prune(p, obj)).unwrap_or(false)
    }
}

impl Puller for Lister {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if self.done || done {
            self.done = true;
            return Ok(None);
        }
        self.ctx.check()?;
        if self.shared_cursor {
            // One object per batch so the replicas interleave.
            while let Some(obj) = self.scheduler.next_object()? {
                if !self.skip(&obj) {
                    return Ok(Some(Batch::new(vec![obj.to_value()])));
                }
            }
            self.done = true;
            return Ok(None);
        }
        if self.snapshot.is_none() {
            let objects = self.scheduler.snapshot()?;
            tracing::trace!(
                pool = %self.scheduler.pool(),
                objects = objects.len(),
                "listing snapshot"
            );
            self.snapshot = Some(objects.iter().filter(|o| !self.skip(o)).cloned().collect());
        }
        let Some(pending) = self.snapshot.as_mut() else {
            return Ok(None);
        };
        let n = self.batch_size.min(pending.len());
        let chunk: Vec<Value> = pending.drain(..n).map(|o| o.to_value()).collect();
        if chunk.is_empty() {
            self.done = true;
            return Ok(None);
        }
        Ok(Some(Batch::new(chunk)))
    }
}

/// Groups listed objects, which arrive in pool key order, into slices of
/// overlapping key ranges: `{objects: [...]}`. `bound` is the far edge of
/// the current slice in that order: the highest max ascending, the lowest
/// min descending.
pub struct Slicer {
    parent: Parent,
    order: Order,
    current: Vec<Value>,
    bound: Value,
    eof: bool,
}

impl Slicer {
    pub fn new(parent: Parent, order: Order) -> Self {
        Self {
            parent,
            order,
            current: Vec::new(),
            bound: Value::Null,
            eof: false,
        }
    }

    fn flush(&mut self) -> Value {
        self.bound = Value::Null;
        Value::record([("objects", Value::Array(std::mem::take(&mut self.current)))])
    }

    /// Whether `obj` starts inside the current slice.
    fn overlaps(&self, obj: &DataObject) -> bool {
        match self.order {
            Order::Asc => obj.min.total_cmp(&self.bound).is_le(),
            Order::Desc => obj.max.total_cmp(&self.bound).is_ge(),
        }
    }

    fn extend(&mut self, obj: &DataObject) {
        let (edge, further) = match self.order {
            Order::Asc => (&obj.max, obj.max.total_cmp(&self.bound).is_gt()),
            Order::Desc => (&obj.min, obj.min.total_cmp(&self.bound).is_lt()),
        };
        if self.current.is_empty() || further {
            self.bound = edge.clone();
        }
    }
}

impl Puller for Slicer {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if self.eof {
            return Ok(None);
        }
        if done {
            self.eof = true;
            self.parent.pull(true)?;
            return Ok(None);
        }
        loop {
            let Some(batch) = self.parent.pull(false)? else {
                self.eof = true;
                if self.current.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(Batch::new(vec![self.flush()])));
            };
            let mut out = Vec::new();
            for v in batch.values {
                let Some(obj) = DataObject::from_value(&v) else {
                    return Err(Error::internal("slicer input is not a data object"));
                };
                if !self.current.is_empty() && !self.overlaps(&obj) {
                    out.push(self.flush());
                }
                self.extend(&obj);
                self.current.push(v);
            }
            if !out.is_empty() {
                return Ok(Some(Batch::new(out)));
            }
        }
    }
}

/// Reads the rows of each object or slice handed to it. Rows of a slice
/// with several objects are merged on the pool key so the scan's output
/// keeps the pool order.
pub struct SeqScan {
    parent: Parent,
    adaptor: Arc<dyn DataAdaptor>,
    pool: PoolId,
    filter: Option<Expr>,
    key_pruner: Option<Expr>,
    demand: Demand,
    pool_key: Option<(Expr, Order)>,
    batch_size: usize,
    pending: VecDeque<Value>,
    reader: Option<Parent>,
    eof: bool,
}

impl SeqScan {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parent: Parent,
        adaptor: Arc<dyn DataAdaptor>,
        pool: PoolId,
        filter: Option<Expr>,
        key_pruner: Option<Expr>,
        demand: Demand,
        pool_key: Option<(Expr, Order)>,
        batch_size: usize,
    ) -> Self {
        Self {
            parent,
            adaptor,
            pool,
            filter,
            key_pruner,
            demand,
            pool_key,
            batch_size: batch_size.max(1),
            pending: VecDeque::new(),
            reader: None,
            eof: false,
        }
    }

    fn objects_of(v: &Value) -> Result<Vec<DataObject>> {
        let members = match v.field("objects") {
            Some(Value::Array(items)) => items.clone(),
            _ => vec![v.clone()],
        };
        members
            .iter()
            .map(|m| {
                DataObject::from_value(m)
                    .ok_or_else(|| Error::internal("scan input is not a data object"))
            })
            .collect()
    }

    fn open(&self, obj: &DataObject) -> Result<Parent> {
        self.adaptor
            .open_object(self.pool, obj, self.filter.as_ref())
            .map_err(|e| e.with_context(format!("open object {}", obj.id)))
    }

    /// Reader for the next unit of work, or `None` when the input is done.
    fn next_reader(&mut self) -> Result<Option<Parent>> {
        loop {
            let Some(v) = self.pending.pop_front() else {
                match self.parent.pull(false)? {
                    Some(batch) => {
                        self.pending.extend(batch.values);
                        continue;
                    }
                    None => return Ok(None),
                }
            };
            let mut objects = Self::objects_of(&v)?;
            if let Some(pruner) = &self.key_pruner {
                objects.retain(|o| !prune(pruner, o));
            }
            match objects.len() {
                0 => continue,
                1 => return self.open(&objects[0]).map(Some),
                _ => {
                    let mut rows = Vec::new();
                    for obj in &objects {
                        let mut r = self.open(obj)?;
                        while let Some(batch) = r.pull(false)? {
                            rows.extend(batch.values);
                        }
                    }
                    if let Some((key, order)) = &self.pool_key {
                        let mut keyed = rows
                            .into_iter()
                            .map(|r| Ok((eval::eval(key, &r, &[])?, r)))
                            .collect::<Result<Vec<_>>>()?;
                        keyed.sort_by(|a, b| compare_keys(&a.0, &b.0, *order, false));
                        rows = keyed.into_iter().map(|(_, r)| r).collect();
                    }
                    return Ok(Some(Box::new(Values::new(rows, self.batch_size))));
                }
            }
        }
    }
}

impl Puller for SeqScan {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if self.eof {
            return Ok(None);
        }
        if done {
            self.eof = true;
            if let Some(mut r) = self.reader.take() {
                r.pull(true)?;
            }
            self.parent.pull(true)?;
            return Ok(None);
        }
        loop {
            if let Some(r) = self.reader.as_mut() {
                match r.pull(false)? {
                    Some(batch) if batch.is_empty() => continue,
                    Some(batch) => {
                        let values = batch
                            .values
                            .into_iter()
                            .map(|v| project_demand(v, &self.demand))
                            .collect();
                        return Ok(Some(Batch::new(values)));
                    }
                    None => self.reader = None,
                }
            }
            match self.next_reader()? {
                Some(r) => self.reader = Some(r),
                None => {
                    self.eof = true;
                    return Ok(None);
                }
            }
        }
    }
}

/// Wraps a reader with demand projection and a row filter the reader
/// itself may not apply.
pub struct Reader {
    inner: Parent,
    filter: Option<Expr>,
    demand: Demand,
    ctx: Context,
}

impl Reader {
    pub fn new(inner: Parent, filter: Option<Expr>, demand: Demand, ctx: Context) -> Self {
        Self {
            inner,
            filter,
            demand,
            ctx,
        }
    }
}

impl Puller for Reader {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if done {
            return self.inner.pull(true);
        }
        self.ctx.check()?;
        loop {
            let Some(batch) = self.inner.pull(false)? else {
                return Ok(None);
            };
            let mut out = Vec::with_capacity(batch.len());
            for v in batch.values {
                if let Some(f) = &self.filter {
                    if !eval::eval_bool(f, &v, &batch.vars)? {
                        continue;
                    }
                }
                out.push(project_demand(v, &self.demand));
            }
            if !out.is_empty() {
                return Ok(Some(Batch::with_vars(out, batch.vars)));
            }
        }
    }
}

/// Rows of a metadata listing, optionally filtered by a key pruner over
/// each row (a tapped object listing).
pub fn meta_rows(rows: Vec<Value>, pruner: Option<&Expr>, batch_size: usize) -> Values {
    let rows = match pruner {
        Some(p) => rows
            .into_iter()
            .filter(|r| !matches!(eval::eval(p, r, &[]), Ok(Value::Bool(true))))
            .collect(),
        None => rows,
    };
    Values::new(rows, batch_size)
}

/// Object ids a delete touched, shared between the deleter replicas and
/// the caller that commits the deletion.
pub type DeleteSet = Arc<Mutex<Vec<ObjectId>>>;

/// Reads each listed object in full. When any row matches `filter` the
/// object joins the delete set and its surviving rows are emitted; objects
/// without a match emit nothing and stay in the pool untouched.
pub struct Deleter {
    parent: Parent,
    adaptor: Arc<dyn DataAdaptor>,
    pool: PoolId,
    filter: Expr,
    deletes: DeleteSet,
    pending: VecDeque<Value>,
    eof: bool,
}

impl Deleter {
    pub fn new(
        parent: Parent,
        adaptor: Arc<dyn DataAdaptor>,
        pool: PoolId,
        filter: Expr,
        deletes: DeleteSet,
    ) -> Self {
        Self {
            parent,
            adaptor,
            pool,
            filter,
            deletes,
            pending: VecDeque::new(),
            eof: false,
        }
    }

    fn scrub(&self, obj: &DataObject) -> Result<Option<Vec<Value>>> {
        let mut reader = self
            .adaptor
            .open_object(self.pool, obj, None)
            .map_err(|e| e.with_context(format!("open object {}", obj.id)))?;
        let mut keep = Vec::new();
        let mut hit = false;
        while let Some(batch) = reader.pull(false)? {
            for v in batch.values {
                if eval::eval_bool(&self.filter, &v, &batch.vars)? {
                    hit = true;
                } else {
                    keep.push(v);
                }
            }
        }
        Ok(hit.then_some(keep))
    }
}

impl Puller for Deleter {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if self.eof {
            return Ok(None);
        }
        if done {
            self.eof = true;
            self.parent.pull(true)?;
            return Ok(None);
        }
        loop {
            let Some(v) = self.pending.pop_front() else {
                match self.parent.pull(false)? {
                    Some(batch) => {
                        self.pending.extend(batch.values);
                        continue;
                    }
                    None => {
                        self.eof = true;
                        return Ok(None);
                    }
                }
            };
            let obj = DataObject::from_value(&v)
                .ok_or_else(|| Error::internal("deleter input is not a data object"))?;
            let Some(keep) = self.scrub(&obj)? else {
                continue;
            };
            tracing::debug!(object = %obj.id, kept = keep.len(), "object touched by delete");
            self.deletes.lock().map_err(|_| poisoned())?.push(obj.id);
            if !keep.is_empty() {
                return Ok(Some(Batch::new(keep)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeq_core::expr::BinOp;
    use lakeq_core::sortkey::{SortKey, SortKeys};
    use lakeq_io::MemoryLake;

    fn keyed(keys: &[i64]) -> Vec<Value> {
        keys.iter()
            .map(|k| Value::record([("k", Value::Int(*k))]))
            .collect()
    }

    fn pool_lake() -> (Arc<MemoryLake>, PoolId) {
        let lake = Arc::new(MemoryLake::new());
        let pool = lake
            .create_pool("p", SortKeys::single(SortKey::asc(&["k"])))
            .unwrap();
        lake.append(pool, "main", keyed(&[1, 2, 3]), None).unwrap();
        lake.append(pool, "main", keyed(&[2, 5]), None).unwrap();
        lake.append(pool, "main", keyed(&[8, 9]), None).unwrap();
        (lake, pool)
    }

    fn lister(lake: &MemoryLake, pool: PoolId) -> Parent {
        let commit = lake.resolve_commit(pool, "main").unwrap();
        let sched = lake.new_scheduler(pool, commit, None).unwrap();
        Box::new(Lister::new(sched, false, None, Context::new(), 10))
    }

    #[test]
    fn sliced_scan_keeps_pool_order() {
        let (lake, pool) = pool_lake();
        let slicer = Slicer::new(lister(&lake, pool), Order::Asc);
        let mut scan = SeqScan::new(
            Box::new(slicer),
            lake.clone(),
            pool,
            None,
            None,
            None,
            Some((Expr::field("k"), Order::Asc)),
            10,
        );
        assert_eq!(crate::drain(&mut scan).unwrap(), keyed(&[1, 2, 2, 3, 5, 8, 9]));
    }

    #[test]
    fn deleter_keeps_survivors_of_touched_objects() {
        let (lake, pool) = pool_lake();
        let deletes = DeleteSet::default();
        let two = Expr::binary(BinOp::Eq, Expr::field("k"), Expr::lit(Value::Int(2)));
        let mut d = Deleter::new(lister(&lake, pool), lake.clone(), pool, two, deletes.clone());
        assert_eq!(crate::drain(&mut d).unwrap(), keyed(&[1, 3, 5]));
        assert_eq!(deletes.lock().unwrap().len(), 2);
    }

    fn obj(min: i64, max: i64) -> Value {
        DataObject {
            id: ObjectId::new(),
            min: Value::Int(min),
            max: Value::Int(max),
            count: 1,
        }
        .to_value()
    }

    fn slice_sizes(input: Vec<Value>, order: Order) -> Vec<usize> {
        let mut s = Slicer::new(Box::new(Values::new(input, 2)), order);
        crate::drain(&mut s)
            .unwrap()
            .iter()
            .map(|slice| match slice.field("objects") {
                Some(Value::Array(items)) => items.len(),
                _ => 0,
            })
            .collect()
    }

    #[test]
    fn slicer_groups_overlapping_ranges() {
        let input = vec![obj(0, 5), obj(3, 8), obj(9, 10), obj(11, 20), obj(12, 13)];
        assert_eq!(slice_sizes(input, Order::Asc), vec![2, 1, 2]);
    }

    #[test]
    fn slicer_groups_descending_pools() {
        let disjoint = vec![obj(20, 30), obj(10, 19), obj(0, 9)];
        assert_eq!(slice_sizes(disjoint, Order::Desc), vec![1, 1, 1]);

        let input = vec![obj(11, 20), obj(12, 13), obj(9, 10), obj(3, 8), obj(0, 5)];
        assert_eq!(slice_sizes(input, Order::Desc), vec![2, 1, 2]);
    }

    #[test]
    fn demand_keeps_only_requested_paths() {
        let row = Value::record([
            ("a", Value::Int(1)),
            ("b", Value::record([("c", Value::Int(2)), ("d", Value::Int(3))])),
        ]);
        let demand = Some(vec![vec!["b".to_string(), "c".to_string()]]);
        assert_eq!(
            project_demand(row.clone(), &demand),
            Value::record([("b", Value::record([("c", Value::Int(2))]))])
        );
        assert_eq!(project_demand(row.clone(), &None), row);
    }

    #[test]
    fn reader_filters_rows() {
        let rows = (0..6).map(|i| Value::record([("x", Value::Int(i))])).collect();
        let even = Expr::binary(
            lakeq_core::expr::BinOp::Eq,
            Expr::binary(
                lakeq_core::expr::BinOp::Mod,
                Expr::field("x"),
                Expr::lit(Value::Int(2)),
            ),
            Expr::lit(Value::Int(0)),
        );
        let mut r = Reader::new(
            Box::new(Values::new(rows, 4)),
            Some(even),
            None,
            Context::new(),
        );
        assert_eq!(crate::drain(&mut r).unwrap().len(), 3);
    }
}
