//! Coalescing many event sends into few wire messages.
//!
//! [`BatchClient`] buffers events in a lock-free [`BatchBuffer`] and hands
//! each caller a [`ChainedPromise`]. Whichever caller pushes the buffer to
//! `batch_size` flushes it on its own thread: up to `batch_size` events are
//! claimed, sent as one message through the inner transport, and the single
//! response is attached to every claimed promise. Success or failure is
//! therefore shared by the whole batch.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::chained::ChainedPromise;
use crate::config::BatchConfig;
use crate::error::Result;
use crate::message::{Event, Msg};
use crate::promise::{join_all, Awaitable, Joined, Response};
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::transport::{AsyncSender, Connectable, SyncSender, Transport};

type Entry = (Event, ChainedPromise<Msg>);

/// Concurrent FIFO of buffered events with an approximate length.
///
/// The length is bumped before an entry becomes visible and lowered after
/// entries are claimed, so it never undercounts what a claimer can pop.
pub struct BatchBuffer {
    queue: SegQueue<Entry>,
    len: AtomicUsize,
}

impl BatchBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            len: AtomicUsize::new(0),
        }
    }

    /// Appends an entry and returns the buffered count including it.
    pub fn push(&self, event: Event, promise: ChainedPromise<Msg>) -> usize {
        let count = self.len.fetch_add(1, Ordering::AcqRel) + 1;
        self.queue.push((event, promise));
        count
    }

    /// Removes up to `max` entries in insertion order. Concurrent claimers
    /// receive disjoint entries.
    pub fn claim(&self, max: usize) -> Vec<Entry> {
        let mut claimed = Vec::with_capacity(max.min(self.len()));
        while claimed.len() < max {
            match self.queue.pop() {
                Some(entry) => claimed.push(entry),
                None => break,
            }
        }
        if !claimed.is_empty() {
            self.len.fetch_sub(claimed.len(), Ordering::AcqRel);
        }
        claimed
    }

    /// Entries counted as buffered.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BatchBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// A transport that batches individually sent events.
///
/// Whole messages passed to [`AsyncSender::send_async`] or
/// [`SyncSender::send_sync`] bypass the buffer.
pub struct BatchClient {
    inner: Arc<dyn Transport>,
    buffer: BatchBuffer,
    batch_size: usize,
    flusher: Mutex<Option<ScheduledTask>>,
    scheduler: Option<Scheduler>,
}

impl BatchClient {
    /// Wraps `inner`. When `config.flush_interval_ms` is set, whatever is
    /// buffered is also flushed on that interval.
    pub fn new(inner: Arc<dyn Transport>, config: &BatchConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let scheduler = match config.flush_interval_ms {
            Some(_) => Some(Scheduler::new()?),
            None => None,
        };
        let client = Arc::new(Self {
            inner,
            buffer: BatchBuffer::new(),
            batch_size: config.batch_size,
            flusher: Mutex::new(None),
            scheduler,
        });
        if let (Some(scheduler), Some(ms)) = (&client.scheduler, config.flush_interval_ms) {
            let weak: Weak<BatchClient> = Arc::downgrade(&client);
            let task = scheduler.every(Duration::from_millis(ms), move || {
                if let Some(client) = weak.upgrade() {
                    client.flush_all();
                }
            })?;
            *client.flusher.lock() = Some(task);
        }
        Ok(client)
    }

    /// Events per wire message.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Events waiting to be flushed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &Arc<dyn Transport> {
        &self.inner
    }

    /// Buffers `event`, flushing on this thread if the batch is full.
    /// The returned promise resolves with the response to its whole batch.
    pub fn send_event(&self, event: Event) -> ChainedPromise<Msg> {
        let promise = ChainedPromise::new();
        if self.buffer.push(event, promise.clone()) >= self.batch_size {
            self.flush_batch();
        }
        promise
    }

    /// Buffers every event; the result resolves once all of them have.
    pub fn send_events<I>(&self, events: I) -> Joined<Msg>
    where
        I: IntoIterator<Item = Event>,
    {
        let parts: Vec<Response<Msg>> = events
            .into_iter()
            .map(|event| Box::new(self.send_event(event)) as Response<Msg>)
            .collect();
        join_all(parts)
    }

    /// Sends at most one batch of up to `batch_size` buffered events.
    /// Returns how many events it claimed.
    pub fn flush_batch(&self) -> usize {
        let claimed = self.buffer.claim(self.batch_size);
        if claimed.is_empty() {
            return 0;
        }
        let (events, promises): (Vec<Event>, Vec<ChainedPromise<Msg>>) =
            claimed.into_iter().unzip();
        let count = events.len();
        let response: Arc<dyn Awaitable<Msg>> =
            Arc::from(self.inner.send_async(Msg::with_events(events)));
        for promise in promises {
            promise.attach(Arc::clone(&response));
        }
        trace!(events = count, "flushed batch");
        count
    }

    /// Flushes batches until a partial one goes out. Returns how many events
    /// were sent.
    pub fn flush_all(&self) -> usize {
        let mut total = 0;
        loop {
            let sent = self.flush_batch();
            total += sent;
            if sent < self.batch_size {
                return total;
            }
        }
    }
}

impl Connectable for BatchClient {
    fn connect(&self) -> Result<()> {
        self.inner.connect()
    }

    /// Flushes what is buffered, then closes the inner transport.
    fn close(&self) {
        if let Some(task) = self.flusher.lock().take() {
            task.cancel();
        }
        let flushed = self.flush_all();
        if flushed > 0 {
            debug!(events = flushed, "final flush before close");
        }
        self.inner.close();
    }

    fn reconnect(&self) -> Result<()> {
        self.inner.reconnect()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn flush(&self) -> Result<()> {
        self.flush_all();
        self.inner.flush()
    }
}

impl AsyncSender for BatchClient {
    fn send_async(&self, msg: Msg) -> Response<Msg> {
        self.inner.send_async(msg)
    }
}

impl SyncSender for BatchClient {
    fn send_sync(&self, msg: &Msg) -> Result<Msg> {
        self.inner.send_sync(msg)
    }
}

impl fmt::Debug for BatchClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchClient")
            .field("batch_size", &self.batch_size)
            .field("buffered", &self.buffer.len())
            .field("inner", &self.inner)
            .finish()
    }
}
