//! Joins of two upstreams.
//!
//! One side, the driver, is streamed; the other, the probe side, is read
//! into memory on the first pull. A right join is run as a left join with
//! the roles swapped, so the driver is always the side whose unmatched
//! rows are kept. [`hash`] looks matches up by key; [`nested`] tests every
//! probe row against a condition.

pub mod hash;
pub mod nested;

use lakeq_core::batch::{Batch, Puller};
use lakeq_core::dag::JoinStyle;
use lakeq_core::error::{Error, Result};
use lakeq_core::value::Value;

use crate::puller::Parent;

/// How output rows are assembled from a left and a right row.
#[derive(Debug, Clone)]
pub struct Layout {
    pub left_alias: Option<String>,
    pub right_alias: String,
    /// Driver rows are right rows.
    pub swapped: bool,
}

impl Layout {
    /// `{<left_alias>: l, <right_alias>: r}`; without a left alias the
    /// left record's fields are spread at top level.
    pub fn compose(&self, driver: &Value, probe: Option<&Value>) -> Value {
        let (left, right) = if self.swapped {
            (probe, Some(driver))
        } else {
            (Some(driver), probe)
        };
        let mut out = match (&self.left_alias, left) {
            (Some(alias), Some(l)) => Value::record([(alias.as_str(), l.clone())]),
            (None, Some(l @ Value::Record(_))) => l.clone(),
            _ => Value::Record(Vec::new()),
        };
        if let Some(r) = right {
            out.set_path(std::slice::from_ref(&self.right_alias), r.clone());
        }
        out
    }
}

/// Finds the probe rows matching a driver row.
pub trait Matcher: Send {
    /// Read the probe side.
    fn load(&mut self, probe: &mut dyn Puller) -> Result<()>;

    /// Push one composed output row per match; true if anything matched.
    fn probe(&self, row: &Value, vars: &[Value], layout: &Layout, out: &mut Vec<Value>)
        -> Result<bool>;
}

/// What happens to driver rows, after any right-join swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keep {
    Matches,
    MatchesOrDriver,
    UnmatchedDriver,
}

pub struct Join<M> {
    driver: Parent,
    probe: Option<Parent>,
    matcher: M,
    layout: Layout,
    keep: Keep,
    eof: bool,
}

impl<M: Matcher> Join<M> {
    /// `left` and `right` are the join's two upstreams in query order.
    pub fn new(
        style: JoinStyle,
        left: Parent,
        right: Parent,
        left_alias: Option<String>,
        right_alias: String,
        matcher: M,
    ) -> Self {
        let swapped = style == JoinStyle::Right;
        let (driver, probe) = if swapped { (right, left) } else { (left, right) };
        let keep = match style {
            JoinStyle::Inner | JoinStyle::Cross => Keep::Matches,
            JoinStyle::Left | JoinStyle::Right => Keep::MatchesOrDriver,
            JoinStyle::Anti => Keep::UnmatchedDriver,
        };
        Self {
            driver,
            probe: Some(probe),
            matcher,
            layout: Layout {
                left_alias,
                right_alias,
                swapped,
            },
            keep,
            eof: false,
        }
    }
}

impl<M: Matcher> Puller for Join<M> {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        if self.eof {
            return Ok(None);
        }
        if done {
            self.eof = true;
            if let Some(mut p) = self.probe.take() {
                p.pull(true)?;
            }
            self.driver.pull(true)?;
            return Ok(None);
        }
        if let Some(mut p) = self.probe.take() {
            self.matcher
                .load(p.as_mut())
                .map_err(|e| e.with_context("join probe side"))?;
        }
        loop {
            let Some(batch) = self.driver.pull(false)? else {
                self.eof = true;
                return Ok(None);
            };
            let mut out = Vec::new();
            for row in &batch.values {
                let mut matched = Vec::new();
                let hit = self.matcher.probe(row, &batch.vars, &self.layout, &mut matched)?;
                match self.keep {
                    Keep::Matches => out.extend(matched),
                    Keep::MatchesOrDriver if hit => out.extend(matched),
                    Keep::MatchesOrDriver => out.push(self.layout.compose(row, None)),
                    Keep::UnmatchedDriver if !hit => out.push(row.clone()),
                    Keep::UnmatchedDriver => {}
                }
            }
            if !out.is_empty() {
                return Ok(Some(Batch::with_vars(out, batch.vars)));
            }
        }
    }
}

pub fn require_two(parents: usize) -> Result<()> {
    if parents != 2 {
        return Err(Error::internal(format!(
            "join requires exactly two upstream paths, got {parents}"
        )));
    }
    Ok(())
}
