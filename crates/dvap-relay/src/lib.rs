//! Relay broadcast server for DVAP frames.
//!
//! Network clients connect over TCP and exchange frames in the DVAP wire
//! format. Every frame a client sends is relayed verbatim to every other
//! connected client. GMSK voice headers are decoded on the way through so
//! the relay can track which callsign each client is using.
//!
//! - [`config`] -- [`RelayConfig`], loadable from TOML
//! - [`RelayServer`] / [`RelayHandle`] -- accept loop and control handle
//!
//! Internally, one dispatcher task owns the client registry and each client
//! has a read task and a write task.
//!
//! # Example
//!
//! ```no_run
//! use dvap_relay::{RelayConfig, RelayServer};
//!
//! # async fn example() -> dvap_core::Result<()> {
//! let server = RelayServer::bind(RelayConfig::default()).await?;
//! let handle = server.handle();
//! tokio::spawn(server.run());
//! // ...
//! handle.shutdown();
//! # Ok(())
//! # }
//! ```

mod client;
pub mod config;
mod dispatcher;
mod server;

pub use config::{ConfigError, OverflowPolicy, RelayConfig};
pub use dispatcher::ClientInfo;
pub use server::{RelayHandle, RelayServer};
