//! Streaming transport: length-prefixed frames over TCP, optionally TLS.
//!
//! [`TcpTransport`] owns a small tokio runtime that drives one reader task
//! and one writer task per physical channel. Callers never block on the
//! network: [`AsyncSender::send_async`] takes a write permit, queues the
//! write for the writer task and returns a promise that the reader task
//! completes when the collector answers.
//!
//! The transport is *administratively* connected from `connect` until
//! `close`. While in that state a lost channel is re-established in the
//! background after `reconnect_delay_ms`; sends made while no channel is up
//! fail immediately with a channel-closed error.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TcpConfig;
use crate::correlator::PendingResponses;
use crate::dialer::{BoxedReader, BoxedWriter, Dialer, PlainDialer, TlsDialer};
use crate::error::{Error, Result};
use crate::limiter::{WriteLimiter, WritePermit};
use crate::message::Msg;
use crate::promise::{Promise, Response};
use crate::protocol::{encode_frame, read_frame};
use crate::resolver::{default_resolver, Resolver};
use crate::transport::{AsyncSender, ConnectionState, Connectable, Write};

struct Channel {
    epoch: u64,
    tx: UnboundedSender<Write>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Channel {
    /// Stops both tasks. Writes still queued for the writer are dropped with
    /// it and fail their promises.
    fn abort(self) -> [JoinHandle<()>; 2] {
        drop(self.tx);
        self.writer.abort();
        self.reader.abort();
        [self.writer, self.reader]
    }
}

struct Shared {
    config: TcpConfig,
    resolver: Arc<dyn Resolver>,
    dialer: Arc<dyn Dialer>,
    handle: Handle,
    state: AtomicU8,
    lifecycle: Mutex<()>,
    channel: RwLock<Option<Channel>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    limiter: WriteLimiter,
    pending: PendingResponses,
}

/// TCP (or TLS) connection to a collector.
pub struct TcpTransport {
    shared: Arc<Shared>,
    runtime: Option<Runtime>,
}

impl TcpTransport {
    /// Creates a disconnected transport using the system resolver.
    pub fn new(config: TcpConfig) -> Result<Self> {
        let resolver = default_resolver(config.cache_dns);
        Self::with_resolver(config, resolver)
    }

    /// Creates a disconnected transport that resolves through `resolver`.
    pub fn with_resolver(config: TcpConfig, resolver: Arc<dyn Resolver>) -> Result<Self> {
        config.validate()?;
        let dialer: Arc<dyn Dialer> = match &config.tls {
            Some(tls) => Arc::new(TlsDialer::new(tls, &config.host)?),
            None => Arc::new(PlainDialer),
        };
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.io_threads)
            .thread_name("riemann-io")
            .enable_all()
            .build()?;
        let shared = Arc::new(Shared {
            limiter: WriteLimiter::new(config.write_limit),
            config,
            resolver,
            dialer,
            handle: runtime.handle().clone(),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            lifecycle: Mutex::new(()),
            channel: RwLock::new(None),
            reconnect_task: Mutex::new(None),
            pending: PendingResponses::new(),
        });
        Ok(Self {
            shared,
            runtime: Some(runtime),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Writes holding a permit, i.e. accepted but not yet on the wire.
    pub fn outstanding_writes(&self) -> usize {
        self.shared.limiter.outstanding()
    }

    /// Writes on the wire still awaiting the collector's response.
    pub fn pending_responses(&self) -> usize {
        self.shared.pending.len()
    }

    /// The configured write limit.
    pub fn write_limit(&self) -> usize {
        self.shared.limiter.limit()
    }

    /// Changes the write limit. Only allowed while disconnected.
    pub fn set_write_limit(&self, limit: usize) -> Result<()> {
        if limit == 0 {
            return Err(Error::Config("write_limit must be at least 1".into()));
        }
        let _guard = self.shared.lifecycle.lock();
        if self.shared.state() != ConnectionState::Disconnected {
            return Err(Error::Config(
                "write limit can only be changed while disconnected".into(),
            ));
        }
        self.shared.limiter.set_limit(limit);
        Ok(())
    }

    /// Closes even when the transport does not consider itself connected,
    /// releasing anything a half-finished connect left behind.
    pub fn force_close(&self) {
        let _guard = self.shared.lifecycle.lock();
        self.shared.shutdown(true);
    }

    /// `host:port` of the collector.
    pub fn address(&self) -> String {
        self.shared.config.address()
    }
}

impl Connectable for TcpTransport {
    /// Establishes the first channel.
    ///
    /// The transport counts as connected afterwards even when this returns
    /// an error, so the background reconnect keeps trying until `close`.
    /// Must not be called from within an async runtime.
    fn connect(&self) -> Result<()> {
        let _guard = self.shared.lifecycle.lock();
        self.shared.connect()
    }

    fn close(&self) {
        let _guard = self.shared.lifecycle.lock();
        self.shared.shutdown(false);
    }

    fn reconnect(&self) -> Result<()> {
        let _guard = self.shared.lifecycle.lock();
        self.shared.shutdown(false);
        self.shared.connect()
    }

    fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Connected && self.shared.channel.read().is_some()
    }
}

impl AsyncSender for TcpTransport {
    fn send_async(&self, msg: Msg) -> Response<Msg> {
        Box::new(self.shared.submit(msg))
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        {
            let _guard = self.shared.lifecycle.lock();
            self.shared.shutdown(true);
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("address", &self.shared.config.address())
            .field("tls", &self.shared.config.tls.is_some())
            .field("state", &self.shared.state())
            .field("limiter", &self.shared.limiter)
            .field("pending", &self.shared.pending.len())
            .finish()
    }
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Caller holds `lifecycle`.
    fn connect(self: &Arc<Self>) -> Result<()> {
        if self.state() != ConnectionState::Disconnected {
            return Ok(());
        }
        self.set_state(ConnectionState::Connecting);
        info!(addr = %self.config.address(), tls = self.config.tls.is_some(), "connecting");

        let result = self.handle.block_on(Arc::clone(self).dial());
        self.set_state(ConnectionState::Connected);
        match result {
            Ok((reader, writer)) => {
                self.install(reader, writer);
                Ok(())
            }
            Err(e) => {
                warn!(addr = %self.config.address(), error = %e, "connect failed; will retry in background");
                self.schedule_reconnect();
                Err(e)
            }
        }
    }

    /// Caller holds `lifecycle`.
    fn shutdown(&self, force: bool) {
        if self.state() != ConnectionState::Connected && !force {
            return;
        }
        self.set_state(ConnectionState::Disconnecting);
        if let Some(task) = self.reconnect_task.lock().take() {
            task.abort();
        }
        let channel = self.channel.write().take();
        let failed = self
            .pending
            .close_current(&Error::channel_closed("connection closed"));
        if let Some(channel) = channel {
            let tasks = channel.abort();
            // Outside a runtime, wait for the aborted tasks so their permits
            // and socket are gone before `close` returns.
            if Handle::try_current().is_err() {
                let grace = self.config.write_timeout();
                self.handle.block_on(async move {
                    for task in tasks {
                        let _ = tokio::time::timeout(grace, task).await;
                    }
                });
            }
        }
        self.set_state(ConnectionState::Disconnected);
        info!(addr = %self.config.address(), failed, "closed");
    }

    async fn dial(self: Arc<Self>) -> Result<(BoxedReader, BoxedWriter)> {
        let resolver = Arc::clone(&self.resolver);
        let (host, port) = (self.config.host.clone(), self.config.port);
        let addr = tokio::task::spawn_blocking(move || resolver.resolve(&host, port))
            .await
            .map_err(|e| Error::Resolve {
                host: self.config.host.clone(),
                reason: e.to_string(),
            })??;
        tokio::time::timeout(
            self.config.connect_timeout(),
            self.dialer.dial(addr, self.config.local_address),
        )
        .await
        .map_err(|_| Error::ConnectionTimeout {
            addr: addr.to_string(),
            timeout_ms: self.config.connect_timeout_ms,
        })?
    }

    /// Starts the reader and writer for a freshly dialed stream.
    fn install(self: &Arc<Self>, reader: BoxedReader, writer: BoxedWriter) {
        let mut slot = self.channel.write();
        let epoch = self.start_channel(&mut slot, reader, writer);
        debug!(addr = %self.config.address(), epoch, "channel established");
    }

    /// Like [`install`](Self::install), but only while connected with no
    /// channel up. Returns whether the stream was used.
    fn install_if_wanted(self: &Arc<Self>, reader: BoxedReader, writer: BoxedWriter) -> bool {
        let mut slot = self.channel.write();
        if self.state() != ConnectionState::Connected || slot.is_some() {
            return false;
        }
        let epoch = self.start_channel(&mut slot, reader, writer);
        info!(addr = %self.config.address(), epoch, "reconnected");
        true
    }

    fn start_channel(
        self: &Arc<Self>,
        slot: &mut Option<Channel>,
        reader: BoxedReader,
        writer: BoxedWriter,
    ) -> u64 {
        let epoch = self.pending.open();
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = self
            .handle
            .spawn(write_loop(Arc::clone(self), epoch, writer, rx));
        let reader = self.handle.spawn(read_loop(Arc::clone(self), epoch, reader));
        *slot = Some(Channel {
            epoch,
            tx,
            reader,
            writer,
        });
        epoch
    }

    fn needs_channel(&self) -> bool {
        self.state() == ConnectionState::Connected && self.channel.read().is_none()
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let weak: Weak<Shared> = Arc::downgrade(self);
        let delay = self.config.reconnect_delay();
        let task = self.handle.spawn(async move {
            loop {
                tokio::time::sleep(delay).await;
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                if !shared.needs_channel() {
                    return;
                }
                match Arc::clone(&shared).dial().await {
                    Ok((reader, writer)) => {
                        if !shared.install_if_wanted(reader, writer) {
                            debug!("reconnected channel no longer needed");
                        }
                        return;
                    }
                    Err(e) => {
                        warn!(addr = %shared.config.address(), error = %e, delay_ms = delay.as_millis() as u64, "reconnect failed; retrying");
                    }
                }
            }
        });
        let mut slot = self.reconnect_task.lock();
        // `shutdown` may have run since the caller saw CONNECTED.
        if self.state() != ConnectionState::Connected {
            task.abort();
            return;
        }
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    /// Tears down the channel of `epoch` after an I/O failure and, while
    /// connected, arranges for a new one.
    fn channel_lost(self: &Arc<Self>, epoch: u64, error: Error) {
        let lost = {
            let mut slot = self.channel.write();
            match slot.as_ref() {
                Some(channel) if channel.epoch == epoch => slot.take(),
                _ => None,
            }
        };
        self.pending.close(epoch, &error);
        let Some(channel) = lost else {
            return;
        };
        channel.abort();
        if self.state() == ConnectionState::Connected {
            warn!(
                addr = %self.config.address(),
                epoch,
                error = %error,
                delay_ms = self.config.reconnect_delay_ms,
                "channel lost; reconnecting"
            );
            self.schedule_reconnect();
        }
    }

    fn submit(&self, msg: Msg) -> Promise<Msg> {
        if self.state() != ConnectionState::Connected {
            return Promise::failed(Error::NotConnected);
        }
        let permit = match self.limiter.try_acquire() {
            Ok(permit) => permit,
            Err(e) => {
                debug!(error = %e, "write refused");
                return Promise::failed(e);
            }
        };
        let write = Write::new(msg).with_permit(permit);
        let promise = write.promise().clone();
        let slot = self.channel.read();
        match slot.as_ref() {
            Some(channel) => {
                if let Err(mpsc::error::SendError(write)) = channel.tx.send(write) {
                    write.fail(Error::channel_closed("writer stopped"));
                }
            }
            None => write.fail(Error::channel_closed("reconnecting")),
        }
        promise
    }
}

/// Encodes queued writes, coalescing frames until `low_watermark` bytes are
/// buffered, and never buffering past `high_watermark` unless a single frame
/// is that large. Permits are released once their bytes are on the wire.
///
/// A write stays wrapped until its promise moves into the pending queue, so
/// aborting this task at any await point fails it instead of losing it.
async fn write_loop(
    shared: Arc<Shared>,
    epoch: u64,
    mut sink: BoxedWriter,
    mut rx: UnboundedReceiver<Write>,
) {
    let config = &shared.config;
    let mut buf = BytesMut::with_capacity(config.high_watermark);
    let mut permits: Vec<WritePermit> = Vec::new();
    let mut failure: Option<Error> = None;

    while let Some(first) = rx.recv().await {
        let mut next = Some(first);
        while let Some(write) = next.take() {
            if let Some(err) = &failure {
                write.fail(err.clone());
                continue;
            }
            let frame = match encode_frame(&write.message, config.max_frame_size) {
                Ok(frame) => frame,
                Err(e) => {
                    write.fail(e);
                    continue;
                }
            };
            if !buf.is_empty() && buf.len() + frame.len() > config.high_watermark {
                if let Err(e) = flush(config, &mut sink, &mut buf, &mut permits).await {
                    write.fail(e.clone());
                    shared.channel_lost(epoch, e.clone());
                    failure = Some(e);
                    continue;
                }
            }
            let (_, promise, permit) = write.into_parts();
            if shared.pending.enqueue(epoch, promise).is_err() {
                continue;
            }
            buf.extend_from_slice(&frame);
            permits.extend(permit);
            if buf.len() < config.low_watermark {
                next = rx.try_recv().ok();
            }
        }
        if failure.is_none() && !buf.is_empty() {
            if let Err(e) = flush(config, &mut sink, &mut buf, &mut permits).await {
                shared.channel_lost(epoch, e.clone());
                failure = Some(e);
            }
        }
    }
    if failure.is_none() {
        let _ = sink.shutdown().await;
    }
    debug!(epoch, "writer stopped");
}

async fn flush(
    config: &TcpConfig,
    sink: &mut BoxedWriter,
    buf: &mut BytesMut,
    permits: &mut Vec<WritePermit>,
) -> Result<()> {
    let result = tokio::time::timeout(config.write_timeout(), async {
        sink.write_all(&buf[..]).await?;
        sink.flush().await
    })
    .await;
    buf.clear();
    permits.clear();
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(Error::channel_closed(format!(
            "write timed out after {} ms",
            config.write_timeout_ms
        ))),
    }
}

async fn read_loop(shared: Arc<Shared>, epoch: u64, mut source: BoxedReader) {
    let error = loop {
        match read_frame(&mut source, shared.config.max_frame_size).await {
            Ok(Some(msg)) => {
                shared.pending.complete(epoch, msg);
            }
            Ok(None) => break Error::channel_closed("connection closed by collector"),
            Err(e) => break e,
        }
    };
    debug!(epoch, error = %error, "reader stopped");
    shared.channel_lost(epoch, error);
}
