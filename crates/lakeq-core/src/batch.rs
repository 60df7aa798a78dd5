//! Batches and the pull contract every execution primitive implements.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::error::{Error, Result};
use crate::value::Value;

/// A run of values together with the lateral variable frame they were
/// produced under.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub values: Vec<Value>,
    pub vars: Arc<[Value]>,
}

impl Batch {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            vars: Arc::from(Vec::new()),
        }
    }

    pub fn with_vars(values: Vec<Value>, vars: Arc<[Value]>) -> Self {
        Self { values, vars }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Pull-based producer of batches.
///
/// `pull(false)` returns the next batch or `None` at end of stream.
/// `pull(true)` tells the producer the consumer is finished: it must
/// release its upstreams and return `None`. Pulling again after `None` is
/// not supported.
pub trait Puller: Send {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>>;
}

impl<P: Puller + ?Sized> Puller for Box<P> {
    fn pull(&mut self, done: bool) -> Result<Option<Batch>> {
        (**self).pull(done)
    }
}

/// Execution context shared by every primitive of a built graph.
///
/// Cancellation works by disconnecting a channel: every blocking point
/// selects on [`Context::done`], which becomes ready once
/// [`Context::cancel`] drops the only sender.
#[derive(Clone)]
pub struct Context {
    done: Receiver<()>,
    cancel: Arc<Mutex<Option<Sender<()>>>>,
}

impl Context {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self {
            done: rx,
            cancel: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Channel that becomes ready (disconnected) on cancellation.
    pub fn done(&self) -> &Receiver<()> {
        &self.done
    }

    pub fn cancel(&self) {
        if let Ok(mut guard) = self.cancel.lock() {
            guard.take();
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// `Err(Canceled)` once the context has been canceled.
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_visible_to_clones() {
        let ctx = Context::new();
        let other = ctx.clone();
        assert!(other.check().is_ok());
        ctx.cancel();
        assert!(other.is_canceled());
        assert!(matches!(other.check(), Err(Error::Canceled)));
    }
}
