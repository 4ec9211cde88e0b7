//! The client facade applications use.
//!
//! [`RiemannClient`] puts an event builder, query support and periodic
//! scheduling in front of any [`Transport`]. Every acknowledged response
//! passes through a validator, so a collector answering `ok = false` shows up
//! as [`Error::ServerRejected`] when the caller waits.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::adapter::{Asynchronized, Synchronized};
use crate::batch::BatchClient;
use crate::config::{BatchConfig, TcpConfig, TlsConfig, UdpConfig};
use crate::error::{Error, Result};
use crate::event::EventBuilder;
use crate::message::{Event, Msg};
use crate::promise::{Awaitable, Response};
use crate::resolver::Resolver;
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::tcp::TcpTransport;
use crate::transport::Transport;
use crate::udp::UdpTransport;

/// Turns a collector rejection into an error.
fn validate(msg: Msg) -> Result<Msg> {
    if msg.is_ok() {
        Ok(msg)
    } else {
        Err(Error::ServerRejected(msg.error.unwrap_or_default()))
    }
}

/// Sends events and queries to a collector.
///
/// ```no_run
/// use riemann_client::{Awaitable, RiemannClient, TcpConfig};
///
/// let client = RiemannClient::tcp(TcpConfig::new("riemann.local", 5555))?;
/// client.connect()?;
/// client
///     .event()
///     .service("api latency")
///     .metric(12.5)
///     .tag("api")
///     .send()
///     .wait()?;
/// # Ok::<(), riemann_client::Error>(())
/// ```
pub struct RiemannClient {
    transport: Arc<dyn Transport>,
    batch: Option<Arc<BatchClient>>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl RiemannClient {
    /// A client over an already built transport.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            batch: None,
            scheduler: Mutex::new(None),
        }
    }

    /// A client over TCP, or TLS when `config.tls` is set.
    pub fn tcp(config: TcpConfig) -> Result<Self> {
        let transport = TcpTransport::new(config)?;
        Ok(Self::with_transport(Arc::new(Synchronized::new(transport))))
    }

    /// Like [`tcp`](Self::tcp), resolving the host through `resolver`.
    pub fn tcp_with_resolver(config: TcpConfig, resolver: Arc<dyn Resolver>) -> Result<Self> {
        let transport = TcpTransport::with_resolver(config, resolver)?;
        Ok(Self::with_transport(Arc::new(Synchronized::new(transport))))
    }

    /// A client over TLS.
    pub fn tls(config: TcpConfig, tls: TlsConfig) -> Result<Self> {
        Self::tcp(TcpConfig {
            tls: Some(tls),
            ..config
        })
    }

    /// A client over UDP. Sends are fire-and-forget and queries are refused.
    pub fn udp(config: UdpConfig) -> Self {
        Self::with_transport(Arc::new(Asynchronized::new(UdpTransport::new(config))))
    }

    /// Routes individually sent events through a [`BatchClient`].
    pub fn batched(self, config: &BatchConfig) -> Result<Self> {
        let batch = BatchClient::new(Arc::clone(&self.transport), config)?;
        let transport: Arc<dyn Transport> = batch.clone();
        Ok(Self {
            transport,
            batch: Some(batch),
            scheduler: self.scheduler,
        })
    }

    /// The transport messages go through.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// True when events are batched.
    pub fn is_batched(&self) -> bool {
        self.batch.is_some()
    }

    /// Starts an event that [`EventBuilder::send`] sends through this client.
    pub fn event(&self) -> EventBuilder<'_> {
        EventBuilder::for_client(self)
    }

    /// Sends one event.
    pub fn send_event(&self, event: Event) -> Response<Msg> {
        let response: Response<Msg> = match &self.batch {
            Some(batch) => Box::new(batch.send_event(event)),
            None => self.transport.send_async(Msg::with_events(vec![event])),
        };
        Box::new(response.map(validate))
    }

    /// Sends several events. Unbatched they travel in one message; batched,
    /// the result resolves once every event's batch has been answered and
    /// fails if any batch failed.
    pub fn send_events<I>(&self, events: I) -> Response<Msg>
    where
        I: IntoIterator<Item = Event>,
    {
        match &self.batch {
            Some(batch) => Box::new(batch.send_events(events).map(|responses| {
                let mut last = Msg::ack();
                for response in responses {
                    last = validate(response)?;
                }
                Ok(last)
            })),
            None => self.send_message(Msg::with_events(events.into_iter().collect())),
        }
    }

    /// Sends a complete message, bypassing any batching.
    pub fn send_message(&self, msg: Msg) -> Response<Msg> {
        Box::new(self.transport.send_async(msg).map(validate))
    }

    /// Reports `error` as an event for `service`.
    ///
    /// The description holds the error followed by its chain of sources.
    pub fn send_error(
        &self,
        service: impl Into<String>,
        error: &(dyn std::error::Error + 'static),
    ) -> Response<Msg> {
        let mut description = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            description.push_str("\ncaused by: ");
            description.push_str(&cause.to_string());
            source = cause.source();
        }
        self.event()
            .service(service)
            .state("error")
            .tag("error")
            .description(description)
            .attribute("error", error.to_string())
            .now()
            .send()
    }

    /// Runs a query and returns the matching events. The expression is
    /// passed to the collector untouched.
    pub fn query(&self, expression: impl Into<String>) -> Response<Vec<Event>> {
        Box::new(
            self.transport
                .send_async(Msg::with_query(expression))
                .map(|msg| validate(msg).map(|msg| msg.events)),
        )
    }

    /// Runs a query and returns the whole response message.
    pub fn query_message(&self, expression: impl Into<String>) -> Response<Msg> {
        self.send_message(Msg::with_query(expression))
    }

    /// Connects the transport.
    pub fn connect(&self) -> Result<()> {
        self.transport.connect()
    }

    /// Flushes buffered events and closes the transport.
    pub fn close(&self) {
        self.transport.close()
    }

    /// Closes and connects again.
    pub fn reconnect(&self) -> Result<()> {
        self.transport.reconnect()
    }

    /// Sends anything buffered.
    pub fn flush(&self) -> Result<()> {
        self.transport.flush()
    }

    /// True when the transport has a live connection.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Runs `task` every `interval` on a background thread until the returned
    /// handle is cancelled or dropped.
    pub fn every<F>(&self, interval: Duration, task: F) -> Result<ScheduledTask>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut slot = self.scheduler.lock();
        let scheduler = match slot.take() {
            Some(scheduler) => scheduler,
            None => {
                debug!("starting client scheduler");
                Scheduler::new()?
            }
        };
        slot.insert(scheduler).every(interval, task)
    }
}

impl fmt::Debug for RiemannClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RiemannClient")
            .field("transport", &self.transport)
            .field("batched", &self.batch.is_some())
            .finish()
    }
}
