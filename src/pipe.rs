//! The bounded pipe connecting filters running in one process.
//!
//! A pipe is a strict-FIFO, fixed-capacity queue of stream items. The
//! producer parks on `enqueue` while the pipe is full and the consumer
//! parks on `dequeue` while it is empty; those are the only two places
//! a worker ever suspends. Items are moved into the pipe, so a producer
//! cannot mutate a row the consumer already observes.
//!
//! The first item through a pipe is the producer's committed schema,
//! making a pipe endpoint self-describing exactly like a file endpoint.
//! Dropping the last sender closes the pipe: the consumer drains what is
//! buffered and then sees end of stream.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::channel::{bounded_channel, BoundedReceiver, BoundedSender, TryRecvError};
use crate::error::{Error, Result};
use crate::stream::{Record, Schema};

static DEFAULT_CAPACITY: AtomicUsize = AtomicUsize::new(2048);

/// The process-wide default pipe capacity, in items.
pub fn default_capacity() -> usize {
    DEFAULT_CAPACITY.load(Ordering::Relaxed)
}

/// Change the process-wide default pipe capacity. Affects pipes created
/// after the call.
pub fn set_default_capacity(cap: usize) {
    DEFAULT_CAPACITY.store(cap.max(1), Ordering::Relaxed);
}

/// What travels through a pipe.
#[derive(Debug, Clone)]
pub enum PipeItem {
    /// The producer's schema; always the first item.
    Header(Arc<Schema>),
    Record(Record),
}

/// Writing end of a pipe. Cloneable: any number of producers may share
/// it, and the pipe closes when the last clone drops.
#[derive(Debug, Clone)]
pub struct PipeSender {
    tx: BoundedSender<PipeItem>,
}

/// Reading end of a pipe.
#[derive(Debug, Clone)]
pub struct PipeReceiver {
    rx: BoundedReceiver<PipeItem>,
}

/// Create a pipe with the process-wide default capacity.
pub fn pipe() -> (PipeSender, PipeReceiver) {
    pipe_with_capacity(default_capacity())
}

pub fn pipe_with_capacity(cap: usize) -> (PipeSender, PipeReceiver) {
    let (tx, rx) = bounded_channel(cap.max(1));
    (PipeSender { tx }, PipeReceiver { rx })
}

/// A pipe with no capacity bound, for edges that must buffer a whole
/// stream while stages run one at a time.
pub(crate) fn pipe_elastic() -> (PipeSender, PipeReceiver) {
    let (tx, rx) = crate::channel::elastic_channel();
    (PipeSender { tx }, PipeReceiver { rx })
}

impl PipeSender {
    /// Enqueue an item, blocking while the pipe is at capacity.
    ///
    /// Fails with [`Error::Downstream`] when the consumer is gone; the
    /// producer must treat that as its stage failing, not spin.
    pub fn enqueue(&self, item: PipeItem) -> Result<()> {
        self.tx.send(item).map_err(|_| Error::Downstream)
    }

    pub fn header(&self, schema: Arc<Schema>) -> Result<()> {
        self.enqueue(PipeItem::Header(schema))
    }

    pub fn record(&self, record: Record) -> Result<()> {
        self.enqueue(PipeItem::Record(record))
    }
}

impl PipeReceiver {
    /// Dequeue the next item, blocking while the pipe is empty. `None`
    /// means the write side closed and the pipe has drained.
    pub fn dequeue(&self) -> Option<PipeItem> {
        self.rx.recv().ok()
    }

    /// Non-blocking dequeue.
    pub fn try_dequeue(&self) -> std::result::Result<PipeItem, TryRecvError> {
        self.rx.try_recv()
    }

    /// Number of items currently buffered.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
