//! Abstract transport capability the engine drives, plus the TCP backend.
//!
//! The traits mirror tokio's readiness model: async `writable`/`readable`
//! resolve when the socket reports capacity or pending data, and the
//! non-blocking `try_write`/`try_read` may still return `WouldBlock` when the
//! readiness turned out to be spurious. A different backend only has to
//! conform to these traits; the engine never names a concrete socket type.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;

/// Target of every connection for the whole run. Resolved once at startup;
/// resolution failure is fatal and the run never begins.
#[derive(Debug, Clone)]
pub struct TargetEndpoint {
    host: String,
    port: u16,
    addr: SocketAddr,
}

impl TargetEndpoint {
    pub async fn resolve(host: &str, port: u16) -> io::Result<Self> {
        let addr = lookup_host((host, port)).await?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
        })?;
        Ok(Self {
            host: host.to_string(),
            port,
            addr,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl fmt::Display for TargetEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One live connection. A session owns exactly one transport and never
/// shares it.
pub trait Transport: Send {
    /// Resolves when the transport can accept more outbound bytes.
    fn writable(&self) -> impl Future<Output = io::Result<()>> + Send;

    /// Resolves when inbound bytes (or end-of-stream) are pending.
    fn readable(&self) -> impl Future<Output = io::Result<()>> + Send;

    /// Non-blocking write of as much of `buf` as the transport will take.
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Non-blocking read; `Ok(0)` is the orderly peer close.
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Produces new transports bound to the runtime's worker pool.
pub trait TransportFactory: Send + Sync {
    type Conn: Transport + Send + 'static;

    fn connect(
        &self,
        endpoint: &TargetEndpoint,
    ) -> impl Future<Output = io::Result<Self::Conn>> + Send;
}

/// A shared factory connects like the factory it wraps.
impl<F: TransportFactory> TransportFactory for std::sync::Arc<F> {
    type Conn = F::Conn;

    fn connect(
        &self,
        endpoint: &TargetEndpoint,
    ) -> impl Future<Output = io::Result<Self::Conn>> + Send {
        (**self).connect(endpoint)
    }
}

/// TCP backend. Backend selection (epoll vs generic poll) is the runtime's
/// concern; the connector only bounds how long an attempt may take.
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl TransportFactory for TcpConnector {
    type Conn = TcpTransport;

    fn connect(
        &self,
        endpoint: &TargetEndpoint,
    ) -> impl Future<Output = io::Result<TcpTransport>> + Send {
        let addr = endpoint.addr();
        let connect_timeout = self.connect_timeout;
        async move {
            match timeout(connect_timeout, TcpStream::connect(addr)).await {
                Ok(stream) => Ok(TcpTransport { stream: stream? }),
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "connect attempt timed out",
                )),
            }
        }
    }
}

pub struct TcpTransport {
    stream: TcpStream,
}

impl Transport for TcpTransport {
    fn writable(&self) -> impl Future<Output = io::Result<()>> + Send {
        self.stream.writable()
    }

    fn readable(&self) -> impl Future<Output = io::Result<()>> + Send {
        self.stream.readable()
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        self.stream.try_write(buf)
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.try_read(buf)
    }

    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        use tokio::io::AsyncWriteExt;
        self.stream.shutdown()
    }
}
