//! Matching responses to requests on one connection.
//!
//! The collector answers requests on a connection strictly in the order it
//! received them and carries no request ids, so a FIFO of promises is all
//! the bookkeeping needed: every transmitted write enqueues its promise and
//! every inbound message completes the oldest one.
//!
//! Each physical channel is identified by an epoch handed out by
//! [`PendingResponses::open`]. Stale work from a previous channel (a writer
//! still draining, a reader reporting a late error) carries an old epoch and
//! is rejected instead of corrupting the correlation of the current channel.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::message::Msg;
use crate::promise::Promise;

struct State {
    epoch: u64,
    open: bool,
    queue: VecDeque<Promise<Msg>>,
}

/// FIFO of promises awaiting a response.
pub struct PendingResponses {
    state: Mutex<State>,
}

impl PendingResponses {
    /// A closed correlator; nothing can be enqueued until [`open`](Self::open).
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                epoch: 0,
                open: false,
                queue: VecDeque::new(),
            }),
        }
    }

    /// Starts a new channel epoch with an empty queue and returns it.
    pub fn open(&self) -> u64 {
        let (epoch, leftovers) = {
            let mut state = self.state.lock();
            state.epoch += 1;
            state.open = true;
            (state.epoch, std::mem::take(&mut state.queue))
        };
        for promise in leftovers {
            promise.deliver(Err(Error::channel_closed("channel replaced")));
        }
        debug!(epoch, "pending-response queue opened");
        epoch
    }

    /// Enqueues `promise` for the channel of `epoch`.
    ///
    /// If that channel is closed or superseded the promise is failed right
    /// away and the error is returned as well.
    pub fn enqueue(&self, epoch: u64, promise: Promise<Msg>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.open && state.epoch == epoch {
                state.queue.push_back(promise);
                return Ok(());
            }
        }
        let err = Error::channel_closed("channel closed before write");
        promise.deliver(Err(err.clone()));
        Err(err)
    }

    /// Hands an inbound response to the oldest pending promise.
    pub fn complete(&self, epoch: u64, response: Msg) -> bool {
        let next = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return false;
            }
            state.queue.pop_front()
        };
        match next {
            Some(promise) => promise.deliver(Ok(response)),
            None => {
                warn!(epoch, "response received with no request outstanding");
                false
            }
        }
    }

    /// Closes the channel of `epoch` and fails everything still pending with
    /// `error`. Returns how many promises were failed. A stale epoch is a no-op.
    pub fn close(&self, epoch: u64, error: &Error) -> usize {
        let drained = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return 0;
            }
            state.open = false;
            std::mem::take(&mut state.queue)
        };
        let count = drained.len();
        for promise in drained {
            promise.deliver(Err(error.clone()));
        }
        if count > 0 {
            debug!(epoch, count, error = %error, "failed pending responses");
        }
        count
    }

    /// Closes whatever epoch is current.
    pub fn close_current(&self, error: &Error) -> usize {
        let epoch = self.state.lock().epoch;
        self.close(epoch, error)
    }

    /// Number of promises awaiting a response.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// True when nothing is awaiting a response.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while the current epoch accepts new entries.
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

impl Default for PendingResponses {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PendingResponses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PendingResponses")
            .field("epoch", &state.epoch)
            .field("open", &state.open)
            .field("pending", &state.queue.len())
            .finish()
    }
}
