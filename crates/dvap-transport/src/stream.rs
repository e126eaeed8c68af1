//! Generic read/write halves over tokio byte streams.
//!
//! Serial ports, TCP sockets and in-memory pipes all end up as a pair of
//! [`StreamReader`] / [`StreamWriter`] once split, so the EOF and error
//! mapping rules live in one place.

use async_trait::async_trait;
use dvap_core::error::{Error, Result};
use dvap_core::transport::{Transport, TransportReader, TransportWriter};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read half of a split byte stream.
pub struct StreamReader<R> {
    inner: R,
    peer: String,
}

impl<R> StreamReader<R> {
    pub fn new(inner: R, peer: impl Into<String>) -> Self {
        StreamReader {
            inner,
            peer: peer.into(),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> TransportReader for StreamReader<R> {
    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.inner.read(buf).await {
            Ok(0) => {
                tracing::debug!(peer = %self.peer, "peer closed stream");
                Err(Error::Disconnected)
            }
            Ok(n) => {
                tracing::trace!(peer = %self.peer, bytes = n, "received data");
                Ok(n)
            }
            Err(e) => {
                tracing::debug!(peer = %self.peer, error = %e, "read failed");
                Err(map_io_error(e))
            }
        }
    }
}

/// Write half of a split byte stream.
pub struct StreamWriter<W> {
    inner: W,
    peer: String,
    closed: bool,
}

impl<W> StreamWriter<W> {
    pub fn new(inner: W, peer: impl Into<String>) -> Self {
        StreamWriter {
            inner,
            peer: peer.into(),
            closed: false,
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> TransportWriter for StreamWriter<W> {
    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        let n = self.inner.write(data).await.map_err(|e| {
            tracing::debug!(peer = %self.peer, error = %e, "write failed");
            map_io_error(e)
        })?;
        self.inner.flush().await.map_err(map_io_error)?;
        tracing::trace!(peer = %self.peer, bytes = n, "sent data");
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Err(e) = self.inner.shutdown().await {
            tracing::debug!(
                peer = %self.peer,
                error = %e,
                "shutdown failed (continuing anyway)"
            );
        }
        tracing::debug!(peer = %self.peer, "write half closed");
        Ok(())
    }
}

/// A [`Transport`] over any tokio stream that is both readable and writable.
///
/// Used for serial ports and in-memory `tokio::io::duplex` pipes; TCP has
/// its own transport so it can use the socket's owned halves.
pub struct StreamTransport<S> {
    stream: S,
    peer: String,
}

impl<S> StreamTransport<S> {
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        StreamTransport {
            stream,
            peer: peer.into(),
        }
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn peer(&self) -> &str {
        &self.peer
    }

    fn split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        let this = *self;
        let (r, w) = tokio::io::split(this.stream);
        (
            Box::new(StreamReader::new(r, this.peer.clone())),
            Box::new(StreamWriter::new(w, this.peer)),
        )
    }
}

/// Map a data-path I/O error to the appropriate [`Error`] variant.
pub(crate) fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted => Error::ConnectionLost,
        std::io::ErrorKind::UnexpectedEof => Error::Disconnected,
        _ => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvap_core::transport::send_all;

    #[tokio::test]
    async fn duplex_round_trip() {
        let (a, b) = tokio::io::duplex(64);
        let (mut ar, mut aw) = Box::new(StreamTransport::new(a, "a")).split();
        let (mut br, mut bw) = Box::new(StreamTransport::new(b, "b")).split();

        send_all(aw.as_mut(), b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let n = br.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");

        send_all(bw.as_mut(), b"back").await.unwrap();
        let n = ar.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"back");
    }

    #[tokio::test]
    async fn eof_is_disconnected() {
        let (a, b) = tokio::io::duplex(64);
        let (mut ar, _aw) = Box::new(StreamTransport::new(a, "a")).split();
        drop(b);
        let mut buf = [0u8; 4];
        assert!(matches!(
            ar.receive(&mut buf).await.unwrap_err(),
            Error::Disconnected
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_sends() {
        let (a, _b) = tokio::io::duplex(64);
        let (_ar, mut aw) = Box::new(StreamTransport::new(a, "a")).split();
        aw.close().await.unwrap();
        aw.close().await.unwrap();
        assert!(matches!(
            aw.send(b"x").await.unwrap_err(),
            Error::NotConnected
        ));
    }

    #[tokio::test]
    async fn closing_writer_ends_peer_reader() {
        let (a, b) = tokio::io::duplex(64);
        let (_ar, mut aw) = Box::new(StreamTransport::new(a, "a")).split();
        let (mut br, _bw) = Box::new(StreamTransport::new(b, "b")).split();
        aw.close().await.unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(
            br.receive(&mut buf).await.unwrap_err(),
            Error::Disconnected
        ));
    }

    #[test]
    fn io_error_mapping() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(map_io_error(reset), Error::ConnectionLost));
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(map_io_error(eof), Error::Disconnected));
        let other = std::io::Error::other("boom");
        assert!(matches!(map_io_error(other), Error::Io(_)));
    }
}
