//! Transport traits for DVAP links.
//!
//! Both links in the bridge (the serial line to the DVAP dongle and each
//! relay client's TCP socket) are full-duplex byte streams that are read
//! and written from two different tasks at once. A [`Transport`] is
//! therefore consumed by [`Transport::split`] into an independently owned
//! [`TransportReader`] and [`TransportWriter`].
//!
//! Implementations for serial ports, TCP sockets and generic tokio streams
//! (including in-memory duplex pipes) live in `dvap-transport`.

use async_trait::async_trait;

use crate::error::Result;

/// Read half of a transport.
#[async_trait]
pub trait TransportReader: Send {
    /// Receive bytes into `buf`, waiting until at least one byte arrives.
    ///
    /// Returns the number of bytes read. End of stream is reported as
    /// [`Error::Disconnected`](crate::error::Error::Disconnected), never as
    /// `Ok(0)`; a reader that returns `Ok(0)` for a non-empty buffer is
    /// faulty and the framing layer treats it as such.
    async fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Write half of a transport.
#[async_trait]
pub trait TransportWriter: Send {
    /// Write some of `data`, returning how many bytes were accepted.
    ///
    /// Short writes are allowed; callers loop until everything is written.
    async fn send(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush and shut down the write direction.
    ///
    /// Closing twice is a no-op.
    async fn close(&mut self) -> Result<()>;
}

/// A full-duplex byte stream to a DVAP device or relay peer.
pub trait Transport: Send {
    /// Label identifying the remote end (port path or peer address).
    fn peer(&self) -> &str;

    /// Split into independently owned read and write halves.
    fn split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>);
}

/// Write all of `data`, looping on short writes.
///
/// A writer that accepts zero bytes fails with
/// [`Error::TransportFault`](crate::error::Error::TransportFault).
pub async fn send_all(writer: &mut dyn TransportWriter, mut data: &[u8]) -> Result<()> {
    while !data.is_empty() {
        let n = writer.send(data).await?;
        if n == 0 {
            return Err(crate::error::Error::TransportFault);
        }
        data = &data[n..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    /// Writer that accepts at most `chunk` bytes per call.
    struct ChunkedWriter {
        chunk: usize,
        written: Vec<u8>,
        calls: usize,
    }

    #[async_trait]
    impl TransportWriter for ChunkedWriter {
        async fn send(&mut self, data: &[u8]) -> Result<usize> {
            self.calls += 1;
            let n = data.len().min(self.chunk);
            self.written.extend_from_slice(&data[..n]);
            Ok(n)
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_all_loops_on_short_writes() {
        let mut w = ChunkedWriter {
            chunk: 3,
            written: Vec::new(),
            calls: 0,
        };
        send_all(&mut w, &[1, 2, 3, 4, 5, 6, 7]).await.unwrap();
        assert_eq!(w.written, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(w.calls, 3);
    }

    #[tokio::test]
    async fn send_all_zero_progress_is_fault() {
        let mut w = ChunkedWriter {
            chunk: 0,
            written: Vec::new(),
            calls: 0,
        };
        let err = send_all(&mut w, &[1, 2]).await.unwrap_err();
        assert!(matches!(err, Error::TransportFault));
    }

    #[tokio::test]
    async fn send_all_empty_is_noop() {
        let mut w = ChunkedWriter {
            chunk: 0,
            written: Vec::new(),
            calls: 0,
        };
        send_all(&mut w, &[]).await.unwrap();
        assert_eq!(w.calls, 0);
    }
}
