//! Datagram transport: one encoded message per UDP packet.
//!
//! UDP gives no acknowledgement, so a successful send only means the packet
//! left the socket; the returned message carries no `ok` field. Queries need
//! a response and are refused.

use std::fmt;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::UdpConfig;
use crate::error::{Error, Result};
use crate::message::Msg;
use crate::protocol::encode_datagram;
use crate::resolver::{default_resolver, Resolver};
use crate::transport::{Connectable, SyncSender};

/// UDP socket aimed at a collector.
pub struct UdpTransport {
    config: UdpConfig,
    resolver: Arc<dyn Resolver>,
    socket: RwLock<Option<UdpSocket>>,
}

impl UdpTransport {
    /// Creates a disconnected transport using the system resolver.
    pub fn new(config: UdpConfig) -> Self {
        let resolver = default_resolver(config.cache_dns);
        Self::with_resolver(config, resolver)
    }

    /// Creates a disconnected transport that resolves through `resolver`.
    pub fn with_resolver(config: UdpConfig, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            config,
            resolver,
            socket: RwLock::new(None),
        }
    }

    /// Local address of the socket, once connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket
            .read()
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
    }

    fn open(&self) -> Result<UdpSocket> {
        let remote = self.resolver.resolve(&self.config.host, self.config.port)?;
        let local = self.config.local_address.unwrap_or_else(|| {
            if remote.is_ipv4() {
                SocketAddr::from(([0, 0, 0, 0], 0))
            } else {
                SocketAddr::from(([0u16; 8], 0))
            }
        });
        let socket = UdpSocket::bind(local)?;
        socket.connect(remote)?;
        info!(remote = %remote, local = %local, "UDP socket ready");
        Ok(socket)
    }
}

impl Connectable for UdpTransport {
    fn connect(&self) -> Result<()> {
        let mut slot = self.socket.write();
        if slot.is_some() {
            return Ok(());
        }
        *slot = Some(self.open()?);
        Ok(())
    }

    fn close(&self) {
        if self.socket.write().take().is_some() {
            debug!(host = %self.config.host, port = self.config.port, "UDP socket closed");
        }
    }

    fn is_connected(&self) -> bool {
        self.socket.read().is_some()
    }
}

impl SyncSender for UdpTransport {
    fn send_sync(&self, msg: &Msg) -> Result<Msg> {
        if msg.query.is_some() {
            return Err(Error::Unsupported("queries need a response; UDP has none"));
        }
        let datagram = encode_datagram(msg, self.config.max_size)?;
        let slot = self.socket.read();
        let socket = slot.as_ref().ok_or(Error::NotConnected)?;
        // Best effort: delivery failures (ICMP port unreachable surfacing as
        // ECONNREFUSED on a connected socket) are logged, not returned.
        if let Err(e) = socket.send(&datagram) {
            debug!(host = %self.config.host, port = self.config.port, error = %e, "UDP send failed");
        }
        Ok(Msg::default())
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpTransport")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("max_size", &self.config.max_size)
            .field("connected", &self.is_connected())
            .finish()
    }
}
