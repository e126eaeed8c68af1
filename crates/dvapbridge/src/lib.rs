//! # dvapbridge -- DVAP Dongle to network bridge
//!
//! `dvapbridge` connects a DVAP Dongle (a USB D-STAR hotspot) to a network
//! of clients that exchange frames in the DVAP wire format over TCP.
//!
//! ## Architecture
//!
//! | Crate              | Purpose                                          |
//! |--------------------|--------------------------------------------------|
//! | `dvap-core`        | [`Error`], [`Result`], the [`Transport`] traits  |
//! | `dvap-protocol`    | Frame codec and GMSK header parsing              |
//! | `dvap-transport`   | Serial, TCP and in-memory stream transports      |
//! | `dvap-device`      | Session with a DVAP: control API and events      |
//! | `dvap-relay`       | Broadcast relay for network clients              |
//! | **`dvapbridge`**   | This facade crate -- re-exports everything       |
//!
//! ## Feature Flags
//!
//! | Feature  | Enables                      | Default |
//! |----------|------------------------------|---------|
//! | `device` | [`device`] module            | yes     |
//! | `relay`  | [`relay`] module             | yes     |
//!
//! ## Talking to a DVAP
//!
//! ```no_run
//! use dvapbridge::device::{DvapBuilder, DeviceEvent};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let dvap = DvapBuilder::new().serial_port("/dev/ttyUSB0").build().await?;
//!     println!("{} ({})", dvap.name().await?, dvap.serial().await?);
//!
//!     let mut events = dvap.subscribe();
//!     dvap.start().await?;
//!     while let Ok(event) = events.recv().await {
//!         if event == DeviceEvent::Disconnected {
//!             break;
//!         }
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Running a relay
//!
//! ```no_run
//! use dvapbridge::relay::{RelayConfig, RelayServer};
//!
//! # async fn example() -> dvapbridge::Result<()> {
//! let server = RelayServer::bind(RelayConfig::default()).await?;
//! server.run().await
//! # }
//! ```

pub use dvap_core::*;

/// Frame codec and GMSK header parsing.
pub mod protocol {
    pub use dvap_protocol::*;
}

/// Serial, TCP and in-memory stream transports.
pub mod transport {
    pub use dvap_transport::*;
}

/// Host-side client for the DVAP control protocol.
///
/// Provides [`DvapBuilder`](device::DvapBuilder) and
/// [`DvapDevice`](device::DvapDevice).
#[cfg(feature = "device")]
pub mod device {
    pub use dvap_device::*;
}

/// Broadcast relay for network clients.
///
/// Provides [`RelayServer`](relay::RelayServer) and
/// [`RelayConfig`](relay::RelayConfig).
#[cfg(feature = "relay")]
pub mod relay {
    pub use dvap_relay::*;
}
