//! In-memory relay peers.
//!
//! [`TestPeer::pair`] returns a server-side [`Transport`] to hand to the
//! relay plus the client end, which speaks whole frames.

use std::time::Duration;

use dvap_core::error::{Error, Result};
use dvap_core::transport::{Transport, TransportReader, TransportWriter, send_all};
use dvap_protocol::frame::{Frame, read_frame};
use dvap_transport::StreamTransport;

/// The client end of an in-memory relay connection.
pub struct TestPeer {
    name: String,
    reader: Box<dyn TransportReader>,
    writer: Box<dyn TransportWriter>,
}

impl TestPeer {
    /// Create a connected pair. The transport's peer label is `name`.
    pub fn pair(name: &str) -> (Box<dyn Transport>, TestPeer) {
        let (server_side, client_side) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = Box::new(StreamTransport::new(client_side, "relay")).split();
        let peer = TestPeer {
            name: name.to_string(),
            reader,
            writer,
        };
        (Box::new(StreamTransport::new(server_side, name)), peer)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write raw bytes (one or more frames, or a partial one).
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        send_all(self.writer.as_mut(), data).await
    }

    /// Read the next frame.
    pub async fn recv(&mut self) -> Result<Frame> {
        read_frame(self.reader.as_mut()).await
    }

    /// Read the next frame, or `None` if nothing arrives within `wait`.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Option<Result<Frame>> {
        tokio::time::timeout(wait, self.recv()).await.ok()
    }

    /// Wait until the relay closes this connection.
    ///
    /// Frames still in flight are discarded. Returns `Err(Timeout)` if the
    /// connection stays open for longer than `wait`.
    pub async fn expect_closed(&mut self, wait: Duration) -> Result<()> {
        let drain = async {
            loop {
                if self.recv().await.is_err() {
                    return;
                }
            }
        };
        tokio::time::timeout(wait, drain)
            .await
            .map_err(|_| Error::Timeout)
    }

    /// Close only the sending direction. The relay sees EOF while this
    /// peer can still receive.
    pub async fn shutdown_send(&mut self) -> Result<()> {
        self.writer.close().await
    }

    /// Close the client end; the relay sees EOF.
    pub async fn close(mut self) {
        let _ = self.writer.close().await;
    }
}
