// TCP transport configuration and primitives.
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

/// Transport-level configuration defaults.
///
/// ```
/// use courier_transport::TransportConfig;
///
/// let config = TransportConfig::default();
/// assert!(config.max_frame_bytes > 0);
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Max frame payload accepted on a connection.
    pub max_frame_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        // Large enough for any sane control payload.
        Self {
            max_frame_bytes: 1024 * 1024,
        }
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Stable connection identifier used for tracing/logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Metadata about a live connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
}

/// TCP listener wrapper.
///
/// ```no_run
/// use courier_transport::{TcpServer, TransportConfig};
///
/// # async fn run() -> anyhow::Result<()> {
/// let server = TcpServer::bind("127.0.0.1:0".parse()?, TransportConfig::default()).await?;
/// let connection = server.accept().await?;
/// println!("peer {}", connection.info().peer_addr);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TcpServer {
    listener: TcpListener,
    transport: TransportConfig,
}

impl TcpServer {
    pub async fn bind(addr: SocketAddr, transport: TransportConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.context("bind TCP listener")?;
        Ok(Self {
            listener,
            transport,
        })
    }

    pub async fn accept(&self) -> Result<Connection> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .context("accept TCP connection")?;
        // Nagle hurts small control frames.
        stream.set_nodelay(true).context("set TCP_NODELAY")?;
        Ok(Connection::new(stream, peer_addr))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("read TCP local address")
    }

    pub fn transport(&self) -> &TransportConfig {
        &self.transport
    }
}

/// One accepted or dialed TCP connection.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    info: ConnectionInfo,
}

impl Connection {
    fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        let id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            stream,
            info: ConnectionInfo { id, peer_addr },
        }
    }

    /// Dial a broker endpoint. Used by the client crate and tests.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect to {addr}"))?;
        stream.set_nodelay(true).context("set TCP_NODELAY")?;
        let peer_addr = stream.peer_addr().context("read peer address")?;
        Ok(Self::new(stream, peer_addr))
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Split into the session's reader and writer halves.
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.stream.into_split()
    }
}
