//! Establishing the byte stream under a TCP transport.
//!
//! A [`Dialer`] opens a socket to an already resolved address and returns
//! its read and write halves. [`PlainDialer`] hands back the raw TCP stream;
//! [`TlsDialer`] runs a rustls handshake on top of it first.

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::config::TlsConfig;
use crate::error::{Error, Result};

/// Read half of an established channel.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Write half of an established channel.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens channels to the collector.
#[async_trait]
pub trait Dialer: Send + Sync + fmt::Debug {
    /// Connects to `addr`, binding `local` first when given.
    async fn dial(
        &self,
        addr: SocketAddr,
        local: Option<SocketAddr>,
    ) -> Result<(BoxedReader, BoxedWriter)>;
}

async fn open_stream(addr: SocketAddr, local: Option<SocketAddr>) -> Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    if let Some(local) = local {
        socket.bind(local)?;
    }
    let stream = socket.connect(addr).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::ConnectionRefused => Error::ConnectionRefused {
            addr: addr.to_string(),
            reason: e.to_string(),
        },
        _ => Error::from(e),
    })?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainDialer;

#[async_trait]
impl Dialer for PlainDialer {
    async fn dial(
        &self,
        addr: SocketAddr,
        local: Option<SocketAddr>,
    ) -> Result<(BoxedReader, BoxedWriter)> {
        let stream = open_stream(addr, local).await?;
        debug!(addr = %addr, "TCP connected");
        let (read, write) = stream.into_split();
        Ok((Box::new(read), Box::new(write)))
    }
}

/// TCP wrapped in TLS, optionally presenting a client certificate.
pub struct TlsDialer {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl TlsDialer {
    /// Loads the PEM material named in `config`. The server certificate is
    /// verified against `config.server_name`, or `host` when that is unset.
    pub fn new(config: &TlsConfig, host: &str) -> Result<Self> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut roots = rustls::RootCertStore::empty();
        for cert in load_certs(&config.ca_cert_path)? {
            roots.add(cert).map_err(|e| Error::Tls {
                reason: format!("failed to add CA cert: {}", e),
            })?;
        }
        let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
        let client_config = match (&config.cert_path, &config.key_path) {
            (Some(cert), Some(key)) => builder
                .with_client_auth_cert(load_certs(cert)?, load_private_key(key)?)
                .map_err(|e| Error::Tls {
                    reason: format!("failed to create client config: {}", e),
                })?,
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(Error::Config(
                    "TLS cert_path and key_path must be set together".into(),
                ))
            }
        };

        let name = config.server_name.clone().unwrap_or_else(|| host.to_string());
        let server_name = ServerName::try_from(name).map_err(|e| Error::Tls {
            reason: format!("invalid server name: {}", e),
        })?;

        Ok(Self {
            connector: TlsConnector::from(Arc::new(client_config)),
            server_name,
        })
    }
}

impl fmt::Debug for TlsDialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsDialer")
            .field("server_name", &self.server_name)
            .finish()
    }
}

#[async_trait]
impl Dialer for TlsDialer {
    async fn dial(
        &self,
        addr: SocketAddr,
        local: Option<SocketAddr>,
    ) -> Result<(BoxedReader, BoxedWriter)> {
        let stream = open_stream(addr, local).await?;
        let tls = self
            .connector
            .connect(self.server_name.clone(), stream)
            .await
            .map_err(|e| Error::Tls {
                reason: format!("TLS handshake failed: {}", e),
            })?;
        debug!(addr = %addr, "TLS connected");
        let (read, write) = tokio::io::split(tls);
        Ok((Box::new(read), Box::new(write)))
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| Error::Tls {
        reason: format!("cannot read {}: {}", path.display(), e),
    })
}

/// Loads every certificate from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = read_pem(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls {
            reason: format!("invalid certificate PEM in {}: {}", path.display(), e),
        })?;
    if certs.is_empty() {
        return Err(Error::Tls {
            reason: format!("no certificates found in {}", path.display()),
        });
    }
    Ok(certs)
}

/// Loads the first private key from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem = read_pem(path)?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| Error::Tls {
            reason: format!("invalid key PEM in {}: {}", path.display(), e),
        })?
        .ok_or_else(|| Error::Tls {
            reason: format!("no private key found in {}", path.display()),
        })
}
