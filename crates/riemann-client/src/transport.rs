//! Capability traits shared by every transport.
//!
//! A transport is assembled from three small capabilities instead of a
//! class hierarchy:
//!
//! - [`Connectable`]: lifecycle (`connect`, `close`, `reconnect`, `flush`)
//! - [`AsyncSender`]: send without blocking, observe the result later
//! - [`SyncSender`]: send and block for the result
//!
//! Natively blocking transports (UDP) implement only `SyncSender` and
//! natively asynchronous ones (TCP) only `AsyncSender`; the adapters in
//! [`crate::adapter`] supply the missing half so that both end up as a full
//! [`Transport`].

use std::fmt;

use crate::error::{Error, Result};
use crate::limiter::WritePermit;
use crate::message::Msg;
use crate::promise::{Promise, Response};

/// Lifecycle of one logical connection to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Not connected; the initial state and the state after `close`.
    Disconnected = 0,
    /// `connect` is establishing the first channel.
    Connecting = 1,
    /// Administratively connected. The channel may be down and awaiting reconnection.
    Connected = 2,
    /// `close` is tearing the channel down.
    Disconnecting = 3,
}

impl ConnectionState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Connection lifecycle.
pub trait Connectable: Send + Sync {
    /// Connects. A no-op when already connected.
    fn connect(&self) -> Result<()>;

    /// Disconnects, failing anything still awaiting a response. A no-op when
    /// already closed.
    fn close(&self);

    /// Closes and connects again.
    fn reconnect(&self) -> Result<()> {
        self.close();
        self.connect()
    }

    /// True when messages can currently be written.
    fn is_connected(&self) -> bool;

    /// Pushes out anything buffered locally.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Sends without blocking on the network.
pub trait AsyncSender: Send + Sync {
    /// Queues `msg` and returns a handle to the collector's response.
    fn send_async(&self, msg: Msg) -> Response<Msg>;
}

/// Sends and blocks until the response (or failure) is known.
pub trait SyncSender: Send + Sync {
    /// Sends `msg` and returns the collector's response.
    fn send_sync(&self, msg: &Msg) -> Result<Msg>;
}

/// A fully capable transport.
pub trait Transport: Connectable + AsyncSender + SyncSender + fmt::Debug {}

impl<T> Transport for T where T: Connectable + AsyncSender + SyncSender + fmt::Debug {}

/// One outbound message and the promise its response is delivered into.
///
/// A write dropped before it was handed on (queue torn down, task
/// cancelled, runtime shut down) fails its promise with a channel-closed
/// error, so no caller waits on a producer that no longer exists.
pub struct Write {
    pub(crate) message: Msg,
    pub(crate) promise: Promise<Msg>,
    pub(crate) permit: Option<WritePermit>,
    handed_off: bool,
}

impl Write {
    /// Pairs `message` with a fresh promise.
    pub fn new(message: Msg) -> Self {
        Self {
            message,
            promise: Promise::new(),
            permit: None,
            handed_off: false,
        }
    }

    /// The promise the response is delivered into.
    pub fn promise(&self) -> &Promise<Msg> {
        &self.promise
    }

    pub(crate) fn with_permit(mut self, permit: WritePermit) -> Self {
        self.permit = Some(permit);
        self
    }

    /// Fails the promise now; the permit is released on return.
    pub(crate) fn fail(self, error: Error) {
        self.promise.deliver(Err(error));
    }

    /// Takes the write apart once its promise has a new owner (the
    /// pending-response queue). Dropping the parts does not fail the promise.
    pub(crate) fn into_parts(mut self) -> (Msg, Promise<Msg>, Option<WritePermit>) {
        self.handed_off = true;
        (
            std::mem::take(&mut self.message),
            self.promise.clone(),
            self.permit.take(),
        )
    }
}

impl Drop for Write {
    fn drop(&mut self) {
        if !self.handed_off && !self.promise.is_delivered() {
            self.promise
                .deliver(Err(Error::channel_closed("write dropped before transmission")));
        }
    }
}

impl fmt::Debug for Write {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Write")
            .field("events", &self.message.events.len())
            .field("query", &self.message.query.is_some())
            .field("promise", &self.promise)
            .finish()
    }
}
