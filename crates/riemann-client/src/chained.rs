//! Results whose producer is attached after the handle is given out.
//!
//! The batching client returns a [`ChainedPromise`] as soon as an event is
//! buffered; when the batch is flushed, the promise for the single wire send
//! is attached to every chained promise in that batch.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::{Error, Result};
use crate::promise::{Awaitable, Promise};

type Producer<T> = Arc<dyn Awaitable<T>>;

/// A result that forwards to a producer attached later.
///
/// There is no `deliver`: a result is supplied by attaching an already
/// created (possibly already completed) producer.
pub struct ChainedPromise<T> {
    producer: Promise<Producer<T>>,
}

impl<T> ChainedPromise<T> {
    /// A chained promise with no producer yet.
    pub fn new() -> Self {
        Self {
            producer: Promise::new(),
        }
    }

    /// Attaches the producer. Only the first attachment counts; later calls
    /// are ignored and return `false`.
    pub fn attach(&self, producer: Producer<T>) -> bool {
        let attached = self.producer.deliver(Ok(producer));
        if !attached {
            warn!("producer already attached to chained promise, ignoring");
        }
        attached
    }

    /// Attaches a producer that has already failed with `error`.
    pub fn attach_error(&self, error: Error) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        self.attach(Arc::new(Promise::<T>::failed(error)))
    }

    /// True once a producer is attached (it may still be pending).
    pub fn is_attached(&self) -> bool {
        self.producer.is_delivered()
    }
}

impl<T> Default for ChainedPromise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ChainedPromise<T> {
    fn clone(&self) -> Self {
        Self {
            producer: self.producer.clone(),
        }
    }
}

impl<T> fmt::Debug for ChainedPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainedPromise")
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl<T: 'static> Awaitable<T> for ChainedPromise<T> {
    fn wait(&self) -> Result<T> {
        self.producer.wait()?.wait()
    }

    fn wait_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        let start = Instant::now();
        match self.producer.wait_timeout(timeout)? {
            None => Ok(None),
            Some(producer) => producer.wait_timeout(timeout.saturating_sub(start.elapsed())),
        }
    }

    fn is_realized(&self) -> bool {
        match self.producer.wait_timeout(Duration::ZERO) {
            Ok(Some(producer)) => producer.is_realized(),
            Ok(None) => false,
            Err(_) => true,
        }
    }
}
