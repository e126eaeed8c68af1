//! DvapBuilder -- fluent builder for [`DvapDevice`] sessions.
//!
//! Separates configuration from construction so that callers can set the
//! serial port, baud rate and timing before the link is opened.
//!
//! # Example
//!
//! ```no_run
//! use dvap_device::DvapBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> dvap_core::Result<()> {
//! let device = DvapBuilder::new()
//!     .serial_port("/dev/ttyUSB0")
//!     .response_timeout(Duration::from_secs(1))
//!     .build()
//!     .await?;
//! println!("{}", device.name().await?);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use dvap_core::error::{Error, Result};
use dvap_core::transport::Transport;
use dvap_transport::{DVAP_BAUD_RATE, SerialTransport};

use crate::device::DvapDevice;

/// Fluent builder for [`DvapDevice`].
pub struct DvapBuilder {
    serial_port: Option<String>,
    baud_rate: u32,
    keepalive_interval: Duration,
    response_timeout: Duration,
    event_capacity: usize,
}

impl DvapBuilder {
    pub fn new() -> Self {
        DvapBuilder {
            serial_port: None,
            baud_rate: DVAP_BAUD_RATE,
            keepalive_interval: Duration::from_secs(3),
            response_timeout: Duration::from_secs(2),
            event_capacity: 256,
        }
    }

    /// Set the serial port path (e.g. `/dev/ttyUSB0` or `COM3`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Override the baud rate (default: 230400).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Idle time before the link keepalive is written (default: 3s).
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// How long a control operation waits for its response (default: 2s).
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Capacity of the event broadcast channel (default: 256).
    ///
    /// Subscribers that fall further behind than this miss events.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.keepalive_interval.is_zero() {
            return Err(Error::InvalidParameter(
                "keepalive interval must be non-zero".into(),
            ));
        }
        if self.response_timeout.is_zero() {
            return Err(Error::InvalidParameter(
                "response timeout must be non-zero".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::InvalidParameter(
                "event capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Start a session on a caller-provided transport.
    ///
    /// This is the entry point for tests (pass a mock from
    /// `dvap-test-harness`) and for links other than a local serial port.
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<DvapDevice> {
        self.validate()?;
        Ok(DvapDevice::new(
            transport,
            self.keepalive_interval,
            self.response_timeout,
            self.event_capacity,
        ))
    }

    /// Open the configured serial port and start a session on it.
    pub async fn build(self) -> Result<DvapDevice> {
        self.validate()?;
        let port = self
            .serial_port
            .as_deref()
            .ok_or_else(|| Error::InvalidParameter("serial port not set".into()))?;
        let transport = SerialTransport::open(port, self.baud_rate).await?;
        self.build_with_transport(Box::new(transport)).await
    }
}

impl Default for DvapBuilder {
    fn default() -> Self {
        Self::new()
    }
}
