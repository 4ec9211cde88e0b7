//! Single-assignment result cells.
//!
//! A [`Promise`] is filled exactly once, by whichever producer gets there
//! first, and can be observed by any number of threads. Errors are ordinary
//! values inside the cell: they are only turned into an `Err` at the point a
//! caller waits, so producers never need to know how the result is consumed.
//!
//! Every observable result handle implements [`Awaitable`], which is object
//! safe so transports can hand back `Box<dyn Awaitable<T>>` regardless of
//! how the result is produced (directly, via a batch, or via an adapter).

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// The handle every send and query returns.
pub type Response<T> = Box<dyn Awaitable<T>>;

/// A result that becomes available at some point.
///
/// Waiting is advisory: a timed-out wait does not cancel the operation and
/// other waiters are unaffected.
pub trait Awaitable<T>: Send + Sync {
    /// Blocks until the result is delivered. A delivered error is returned as `Err`.
    fn wait(&self) -> Result<T>;

    /// Blocks for at most `timeout`; `Ok(None)` means nothing arrived in time.
    fn wait_timeout(&self, timeout: Duration) -> Result<Option<T>>;

    /// True once waiting would not block.
    fn is_realized(&self) -> bool;

    /// Like [`wait_timeout`](Self::wait_timeout) but substitutes `default` on timeout.
    fn wait_timeout_or(&self, timeout: Duration, default: T) -> Result<T> {
        Ok(self.wait_timeout(timeout)?.unwrap_or(default))
    }

    /// Derives a new result by applying `f` to this one.
    ///
    /// `f` runs lazily on the first observation of the derived result and at
    /// most once; its outcome is cached. An `Err` from `f` becomes the derived
    /// result's error.
    fn map<U, F>(self, f: F) -> Mapped<T, U, Self, F>
    where
        Self: Sized,
        F: FnOnce(T) -> Result<U> + Send,
        U: Clone + Send + Sync,
    {
        Mapped::new(self, f)
    }
}

impl<T, A> Awaitable<T> for Box<A>
where
    A: Awaitable<T> + ?Sized,
{
    fn wait(&self) -> Result<T> {
        (**self).wait()
    }

    fn wait_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        (**self).wait_timeout(timeout)
    }

    fn is_realized(&self) -> bool {
        (**self).is_realized()
    }
}

impl<T, A> Awaitable<T> for Arc<A>
where
    A: Awaitable<T> + ?Sized,
{
    fn wait(&self) -> Result<T> {
        (**self).wait()
    }

    fn wait_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        (**self).wait_timeout(timeout)
    }

    fn is_realized(&self) -> bool {
        (**self).is_realized()
    }
}

struct Cell<T> {
    value: OnceLock<Result<T>>,
    lock: Mutex<()>,
    ready: Condvar,
}

/// A thread-safe, single-assignment result cell.
///
/// Clones share the same cell.
pub struct Promise<T> {
    cell: Arc<Cell<T>>,
}

impl<T> Promise<T> {
    /// An empty promise.
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Cell {
                value: OnceLock::new(),
                lock: Mutex::new(()),
                ready: Condvar::new(),
            }),
        }
    }

    /// A promise already holding `value`.
    pub fn fulfilled(value: T) -> Self {
        let p = Self::new();
        p.deliver(Ok(value));
        p
    }

    /// A promise already holding `error`.
    pub fn failed(error: Error) -> Self {
        let p = Self::new();
        p.deliver(Err(error));
        p
    }

    /// Delivers an outcome. Only the first delivery has any effect; the
    /// return value says whether this call was it.
    pub fn deliver(&self, outcome: Result<T>) -> bool {
        if self.cell.value.set(outcome).is_err() {
            return false;
        }
        // Taking the lock orders this notify after any waiter's emptiness check.
        let _guard = self.cell.lock.lock();
        self.cell.ready.notify_all();
        true
    }

    /// True once an outcome has been delivered.
    pub fn is_delivered(&self) -> bool {
        self.cell.value.get().is_some()
    }

    fn block_until(&self, deadline: Option<Instant>) -> Option<&Result<T>> {
        if let Some(v) = self.cell.value.get() {
            return Some(v);
        }
        let mut guard = self.cell.lock.lock();
        loop {
            if let Some(v) = self.cell.value.get() {
                return Some(v);
            }
            match deadline {
                Some(deadline) => {
                    if self.cell.ready.wait_until(&mut guard, deadline).timed_out() {
                        return self.cell.value.get();
                    }
                }
                None => self.cell.ready.wait(&mut guard),
            }
        }
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.cell.value.get() {
            None => "pending",
            Some(Ok(_)) => "fulfilled",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

impl<T> Awaitable<T> for Promise<T>
where
    T: Clone + Send + Sync,
{
    fn wait(&self) -> Result<T> {
        match self.block_until(None) {
            Some(outcome) => outcome.clone(),
            None => Err(Error::channel_closed("promise abandoned")),
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> Result<Option<T>> {
        let deadline = Instant::now().checked_add(timeout);
        match self.block_until(deadline) {
            Some(outcome) => outcome.clone().map(Some),
            None => Ok(None),
        }
    }

    fn is_realized(&self) -> bool {
        self.is_delivered()
    }
}

/// The result of [`Awaitable::map`].
pub struct Mapped<T, U, A, F> {
    source: A,
    f: Mutex<Option<F>>,
    value: OnceLock<Result<U>>,
    _source_type: PhantomData<fn() -> T>,
}

impl<T, U, A, F> Mapped<T, U, A, F> {
    fn new(source: A, f: F) -> Self {
        Self {
            source,
            f: Mutex::new(Some(f)),
            value: OnceLock::new(),
            _source_type: PhantomData,
        }
    }
}

impl<T, U, A, F> Mapped<T, U, A, F>
where
    F: FnOnce(T) -> Result<U>,
    U: Clone,
{
    fn resolve(&self, source: Result<T>) -> Result<U> {
        self.value
            .get_or_init(|| {
                let value = source?;
                let f = self.f.lock().take();
                match f {
                    Some(f) => f(value),
                    None => Err(Error::channel_closed("map function already consumed")),
                }
            })
            .clone()
    }
}

impl<T, U, A, F> Awaitable<U> for Mapped<T, U, A, F>
where
    A: Awaitable<T>,
    F: FnOnce(T) -> Result<U> + Send,
    U: Clone + Send + Sync,
{
    fn wait(&self) -> Result<U> {
        if let Some(v) = self.value.get() {
            return v.clone();
        }
        let source = self.source.wait();
        self.resolve(source)
    }

    fn wait_timeout(&self, timeout: Duration) -> Result<Option<U>> {
        if let Some(v) = self.value.get() {
            return v.clone().map(Some);
        }
        match self.source.wait_timeout(timeout) {
            Ok(None) => Ok(None),
            Ok(Some(v)) => self.resolve(Ok(v)).map(Some),
            Err(e) => self.resolve(Err(e)).map(Some),
        }
    }

    fn is_realized(&self) -> bool {
        self.value.get().is_some() || self.source.is_realized()
    }
}

impl<T, U, A, F> fmt::Debug for Mapped<T, U, A, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapped")
            .field("cached", &self.value.get().is_some())
            .finish()
    }
}

/// Waits on several results as one; the first error wins.
pub struct Joined<T> {
    parts: Vec<Response<T>>,
}

/// Combines `parts` into a single result holding every value in order.
pub fn join_all<T>(parts: Vec<Response<T>>) -> Joined<T> {
    Joined { parts }
}

impl<T: Send + Sync> Awaitable<Vec<T>> for Joined<T> {
    fn wait(&self) -> Result<Vec<T>> {
        self.parts.iter().map(|p| p.wait()).collect()
    }

    fn wait_timeout(&self, timeout: Duration) -> Result<Option<Vec<T>>> {
        let start = Instant::now();
        let mut values = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            let remaining = timeout.saturating_sub(start.elapsed());
            match part.wait_timeout(remaining)? {
                Some(v) => values.push(v),
                None => return Ok(None),
            }
        }
        Ok(Some(values))
    }

    fn is_realized(&self) -> bool {
        self.parts.iter().all(|p| p.is_realized())
    }
}

impl<T> fmt::Debug for Joined<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Joined")
            .field("parts", &self.parts.len())
            .finish()
    }
}
