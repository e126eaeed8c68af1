//! Serial transport for the DVAP dongle.
//!
//! The DVAP enumerates as a USB FTDI serial port and runs raw 8N1 at
//! 230400 baud. [`SerialTransport`] opens it through `tokio-serial` and
//! hands out split halves for the device session's send and receive tasks.
//!
//! # Example
//!
//! ```no_run
//! use dvap_transport::SerialTransport;
//!
//! # async fn example() -> dvap_core::Result<()> {
//! let transport = SerialTransport::open("/dev/ttyUSB0", 230_400).await?;
//! # Ok(())
//! # }
//! ```

use dvap_core::error::{Error, Result};
use dvap_core::transport::{Transport, TransportReader, TransportWriter};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

use crate::stream::{StreamReader, StreamWriter};

/// Baud rate of the DVAP serial link.
pub const DVAP_BAUD_RATE: u32 = 230_400;

/// Serial port transport to a DVAP.
pub struct SerialTransport {
    port: SerialStream,
    port_name: String,
}

impl SerialTransport {
    /// Open a serial port at the given baud rate, 8N1, no flow control.
    ///
    /// The DVAP firmware supports no other framing or flow control.
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self> {
        tracing::debug!(port = %port, baud_rate, "Opening serial port");

        let mut serial_stream = tokio_serial::new(port, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                tracing::error!(port = %port, error = %e, "Failed to open serial port");
                Error::Transport(format!("Failed to open serial port {}: {}", port, e))
            })?;

        // One session per link; interleaved writers corrupt framing.
        #[cfg(unix)]
        if let Err(e) = serial_stream.set_exclusive(true) {
            tracing::warn!(port = %port, error = %e, "Failed to set exclusive access");
        }

        if let Err(e) = serial_stream.clear(tokio_serial::ClearBuffer::All) {
            tracing::warn!(port = %port, error = %e, "Failed to clear serial buffers");
        }

        tracing::info!(port = %port, baud_rate, "Serial port opened successfully");

        Ok(Self {
            port: serial_stream,
            port_name: port.to_string(),
        })
    }

    /// Get the name of the serial port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Transport for SerialTransport {
    fn peer(&self) -> &str {
        &self.port_name
    }

    fn split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        let SerialTransport { port, port_name } = *self;
        let (r, w) = tokio::io::split(port);
        (
            Box::new(StreamReader::new(r, port_name.clone())),
            Box::new(StreamWriter::new(w, port_name)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_missing_port_fails() {
        let result = SerialTransport::open("/dev/does-not-exist-dvap", DVAP_BAUD_RATE).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
