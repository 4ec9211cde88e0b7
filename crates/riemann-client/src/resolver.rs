//! Hostname resolution for transports.
//!
//! Transports resolve the collector's address on every connection attempt
//! through a [`Resolver`]. Callers can plug in their own (any
//! `Fn(&str, u16) -> Result<SocketAddr>` works); by default the system
//! resolver is used, optionally wrapped in a [`CachingResolver`].

use std::collections::HashMap;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// Turns a host and port into a socket address.
pub trait Resolver: Send + Sync {
    /// Resolves `host:port`. Implementations may block.
    fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr>;
}

impl<F> Resolver for F
where
    F: Fn(&str, u16) -> Result<SocketAddr> + Send + Sync,
{
    fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr> {
        self(host, port)
    }
}

/// Resolves through the operating system on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr> {
        let mut addrs = (host, port).to_socket_addrs().map_err(|e| Error::Resolve {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
        addrs.next().ok_or_else(|| Error::Resolve {
            host: host.to_string(),
            reason: "no addresses returned".to_string(),
        })
    }
}

/// Remembers the first successful answer for each host and port.
pub struct CachingResolver<R> {
    inner: R,
    cache: Mutex<HashMap<(String, u16), SocketAddr>>,
}

impl<R: Resolver> CachingResolver<R> {
    /// Wraps `inner` with a cache.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Forgets every cached answer.
    pub fn invalidate(&self) {
        self.cache.lock().clear();
    }
}

impl<R: Resolver> Resolver for CachingResolver<R> {
    fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr> {
        let key = (host.to_string(), port);
        if let Some(addr) = self.cache.lock().get(&key) {
            return Ok(*addr);
        }
        let addr = self.inner.resolve(host, port)?;
        debug!(host, port, addr = %addr, "caching resolved address");
        self.cache.lock().insert(key, addr);
        Ok(addr)
    }
}

impl<R> fmt::Debug for CachingResolver<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingResolver")
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}

/// The resolver a transport uses when none is supplied.
pub fn default_resolver(cache_dns: bool) -> Arc<dyn Resolver> {
    if cache_dns {
        Arc::new(CachingResolver::new(SystemResolver))
    } else {
        Arc::new(SystemResolver)
    }
}
