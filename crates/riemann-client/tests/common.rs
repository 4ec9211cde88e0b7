//! Common test utilities: an in-process collector speaking the framed
//! protocol over plain TCP or TLS, and a UDP receiver.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use prost::Message;
use riemann_client::protocol::{encode_frame, DEFAULT_MAX_FRAME_SIZE};
use riemann_client::{Msg, TlsConfig};

/// Decides the collector's answer to each request; `None` stays silent.
pub type Handler = Arc<dyn Fn(&Msg) -> Option<Msg> + Send + Sync>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn read_msg<S: Read>(stream: &mut S) -> Option<Msg> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).ok()?;
    let mut payload = vec![0u8; u32::from_be_bytes(prefix) as usize];
    stream.read_exact(&mut payload).ok()?;
    Msg::decode(payload.as_slice()).ok()
}

pub fn write_msg<S: Write>(stream: &mut S, msg: &Msg) -> bool {
    let frame = encode_frame(msg, DEFAULT_MAX_FRAME_SIZE).expect("encodable response");
    stream.write_all(&frame).and_then(|_| stream.flush()).is_ok()
}

fn serve<S: Read + Write>(mut stream: S, handler: &Handler, received: &Mutex<Vec<Msg>>) {
    while let Some(msg) = read_msg(&mut stream) {
        let answer = handler(&msg);
        received.lock().push(msg);
        if let Some(answer) = answer {
            if !write_msg(&mut stream, &answer) {
                return;
            }
        }
    }
}

/// A collector on 127.0.0.1 serving each connection on its own thread.
pub struct MockCollector {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Msg>>>,
    streams: Arc<Mutex<Vec<TcpStream>>>,
    accepted: Arc<AtomicUsize>,
}

impl MockCollector {
    pub fn start<H>(handler: H) -> Self
    where
        H: Fn(&Msg) -> Option<Msg> + Send + Sync + 'static,
    {
        Self::start_inner(Arc::new(handler), None)
    }

    /// Acknowledges every request.
    pub fn acking() -> Self {
        Self::start(|_| Some(Msg::ack()))
    }

    /// Reads requests and never answers.
    pub fn silent() -> Self {
        Self::start(|_| None)
    }

    /// Acknowledges every request over TLS using the given server identity.
    pub fn tls(identity: &TlsIdentity) -> Self {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(
                vec![identity.cert_der.clone()],
                rustls::pki_types::PrivateKeyDer::Pkcs8(identity.key_der.clone().into()),
            )
            .expect("server TLS config");
        Self::start_inner(Arc::new(|_: &Msg| Some(Msg::ack())), Some(Arc::new(config)))
    }

    fn start_inner(handler: Handler, tls: Option<Arc<rustls::ServerConfig>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind collector");
        let addr = listener.local_addr().expect("collector address");
        let received = Arc::new(Mutex::new(Vec::new()));
        let streams = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        {
            let received = Arc::clone(&received);
            let streams = Arc::clone(&streams);
            let accepted = Arc::clone(&accepted);
            std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(stream) = stream else { return };
                    accepted.fetch_add(1, Ordering::SeqCst);
                    if let Ok(clone) = stream.try_clone() {
                        streams.lock().push(clone);
                    }
                    let handler = Arc::clone(&handler);
                    let received = Arc::clone(&received);
                    let tls = tls.clone();
                    std::thread::spawn(move || match tls {
                        Some(config) => {
                            let Ok(conn) = rustls::ServerConnection::new(config) else {
                                return;
                            };
                            serve(rustls::StreamOwned::new(conn, stream), &handler, &received);
                        }
                        None => serve(stream, &handler, &received),
                    });
                }
            });
        }
        Self {
            addr,
            received,
            streams,
            accepted,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Msg> {
        self.received.lock().clone()
    }

    /// Waits until at least `count` requests arrived.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Msg> {
        let deadline = Instant::now() + timeout;
        loop {
            let received = self.received();
            if received.len() >= count || Instant::now() >= deadline {
                return received;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Shuts down every accepted connection from the collector's side.
    pub fn drop_connections(&self) {
        for stream in self.streams.lock().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// A UDP socket standing in for the collector.
pub struct UdpReceiver {
    socket: UdpSocket,
}

impl UdpReceiver {
    pub fn bind() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind UDP receiver");
        socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        Self { socket }
    }

    pub fn port(&self) -> u16 {
        self.socket.local_addr().expect("UDP address").port()
    }

    pub fn recv(&self) -> Option<Msg> {
        let mut buf = vec![0u8; 65536];
        let len = self.socket.recv(&mut buf).ok()?;
        Msg::decode(&buf[..len]).ok()
    }
}

/// Self-signed certificate for `localhost`, written out as PEM files.
pub struct TlsIdentity {
    pub cert_der: rustls::pki_types::CertificateDer<'static>,
    pub key_der: Vec<u8>,
    pub ca_path: PathBuf,
    _dir: tempfile::TempDir,
}

impl TlsIdentity {
    pub fn localhost() -> Self {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("self-signed certificate");
        let dir = tempfile::tempdir().expect("temp dir");
        let ca_path = dir.path().join("ca.pem");
        std::fs::write(&ca_path, certified.cert.pem()).expect("write CA PEM");
        Self {
            cert_der: certified.cert.der().clone(),
            key_der: certified.key_pair.serialize_der(),
            ca_path,
            _dir: dir,
        }
    }

    pub fn client_config(&self) -> TlsConfig {
        TlsConfig {
            ca_cert_path: self.ca_path.clone(),
            ..TlsConfig::default()
        }
    }
}
