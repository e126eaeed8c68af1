//! TCP transport for relay links.
//!
//! [`TcpTransport`] wraps a connected socket, either one accepted by the
//! relay server or one dialled by a client with [`TcpTransport::connect`].
//!
//! # Example
//!
//! ```no_run
//! use dvap_transport::TcpTransport;
//! use dvap_core::transport::{Transport, send_all};
//!
//! # async fn example() -> dvap_core::Result<()> {
//! let transport = TcpTransport::connect("127.0.0.1:8191").await?;
//! let (_reader, mut writer) = Box::new(transport).split();
//! send_all(writer.as_mut(), &[0x02, 0x60]).await?;
//! # Ok(())
//! # }
//! ```

use dvap_core::error::{Error, Result};
use dvap_core::transport::{Transport, TransportReader, TransportWriter};
use std::time::Duration;
use tokio::net::TcpStream;

use crate::stream::{StreamReader, StreamWriter};

/// Default connection timeout (5 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP transport for relay clients and the relay server's accepted peers.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    /// Peer address, used as the relay client id and in logs.
    addr: String,
}

impl TcpTransport {
    /// Connect to a `host:port` endpoint using the default timeout.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_timeout(addr, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect to a `host:port` endpoint with a specified timeout.
    pub async fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        tracing::debug!(
            addr = %addr,
            timeout_ms = timeout.as_millis(),
            "Connecting to TCP endpoint"
        );

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                tracing::error!(addr = %addr, "TCP connection timed out");
                Error::Timeout
            })?
            .map_err(|e| {
                tracing::error!(addr = %addr, error = %e, "TCP connection failed");
                map_connect_error(e, addr)
            })?;

        tracing::info!(addr = %addr, "TCP connection established");
        Ok(Self::from_stream(stream, addr.to_string()))
    }

    /// Wrap an already-connected stream, e.g. one returned by `accept()`.
    ///
    /// `addr` labels the connection; the relay uses it as the client id.
    pub fn from_stream(stream: TcpStream, addr: String) -> Self {
        // Voice frames are small and latency-sensitive.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(
                addr = %addr,
                error = %e,
                "Failed to set TCP_NODELAY (continuing anyway)"
            );
        }
        Self { stream, addr }
    }

    /// The peer address string.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Transport for TcpTransport {
    fn peer(&self) -> &str {
        &self.addr
    }

    fn split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        let TcpTransport { stream, addr } = *self;
        let (r, w) = stream.into_split();
        (
            Box::new(StreamReader::new(r, addr.clone())),
            Box::new(StreamWriter::new(w, addr)),
        )
    }
}

/// Map a connection-time I/O error to the appropriate [`Error`] variant.
fn map_connect_error(e: std::io::Error, addr: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Error::Transport(format!("connection refused: {}", addr))
        }
        _ => Error::Io(e),
    }
}
