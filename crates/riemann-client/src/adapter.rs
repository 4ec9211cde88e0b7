//! Bridges between blocking and non-blocking transports.
//!
//! [`Synchronized`] gives an asynchronous transport a blocking send by
//! waiting on the returned handle. [`Asynchronized`] gives a blocking
//! transport a non-blocking-looking send by running the blocking call on the
//! caller's thread and handing back an already completed promise; it brings
//! no thread pool of its own. Errors cross either bridge unchanged.

use std::fmt;

use crate::error::Result;
use crate::message::Msg;
use crate::promise::{Awaitable, Promise, Response};
use crate::transport::{AsyncSender, Connectable, SyncSender};

/// Adds [`SyncSender`] to an [`AsyncSender`].
pub struct Synchronized<T> {
    inner: T,
}

impl<T> Synchronized<T> {
    /// Wraps `inner`.
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Connectable> Connectable for Synchronized<T> {
    fn connect(&self) -> Result<()> {
        self.inner.connect()
    }

    fn close(&self) {
        self.inner.close()
    }

    fn reconnect(&self) -> Result<()> {
        self.inner.reconnect()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn flush(&self) -> Result<()> {
        self.inner.flush()
    }
}

impl<T: AsyncSender> AsyncSender for Synchronized<T> {
    fn send_async(&self, msg: Msg) -> Response<Msg> {
        self.inner.send_async(msg)
    }
}

impl<T: AsyncSender> SyncSender for Synchronized<T> {
    fn send_sync(&self, msg: &Msg) -> Result<Msg> {
        self.inner.send_async(msg.clone()).wait()
    }
}

impl<T: fmt::Debug> fmt::Debug for Synchronized<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Synchronized").field(&self.inner).finish()
    }
}

/// Adds [`AsyncSender`] to a [`SyncSender`].
pub struct Asynchronized<T> {
    inner: T,
}

impl<T> Asynchronized<T> {
    /// Wraps `inner`.
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Connectable> Connectable for Asynchronized<T> {
    fn connect(&self) -> Result<()> {
        self.inner.connect()
    }

    fn close(&self) {
        self.inner.close()
    }

    fn reconnect(&self) -> Result<()> {
        self.inner.reconnect()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn flush(&self) -> Result<()> {
        self.inner.flush()
    }
}

impl<T: SyncSender> AsyncSender for Asynchronized<T> {
    fn send_async(&self, msg: Msg) -> Response<Msg> {
        let promise = Promise::new();
        promise.deliver(self.inner.send_sync(&msg));
        Box::new(promise)
    }
}

impl<T: SyncSender> SyncSender for Asynchronized<T> {
    fn send_sync(&self, msg: &Msg) -> Result<Msg> {
        self.inner.send_sync(msg)
    }
}

impl<T: fmt::Debug> fmt::Debug for Asynchronized<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Asynchronized").field(&self.inner).finish()
    }
}
