#![warn(missing_docs)]

//! Riemann client: framed TCP/TLS and UDP transports, promises, write backpressure, batching

pub mod adapter;
pub mod batch;
pub mod chained;
pub mod client;
pub mod config;
pub mod correlator;
pub mod dialer;
pub mod error;
pub mod event;
pub mod limiter;
pub mod message;
pub mod promise;
pub mod protocol;
pub mod resolver;
pub mod scheduler;
pub mod tcp;
pub mod transport;
pub mod udp;

pub use adapter::{Asynchronized, Synchronized};
pub use batch::{BatchBuffer, BatchClient};
pub use chained::ChainedPromise;
pub use client::RiemannClient;
pub use config::{BatchConfig, TcpConfig, TlsConfig, UdpConfig, DEFAULT_HOST, DEFAULT_PORT};
pub use correlator::PendingResponses;
pub use error::{Error, Result};
pub use event::{EventBuilder, Metric};
pub use limiter::{WriteLimiter, WritePermit, DEFAULT_WRITE_LIMIT};
pub use message::{Attribute, Event, Msg, Query};
pub use promise::{join_all, Awaitable, Joined, Mapped, Promise, Response};
pub use resolver::{CachingResolver, Resolver, SystemResolver};
pub use scheduler::{ScheduledTask, Scheduler};
pub use tcp::TcpTransport;
pub use transport::{AsyncSender, Connectable, ConnectionState, SyncSender, Transport, Write};
pub use udp::UdpTransport;
