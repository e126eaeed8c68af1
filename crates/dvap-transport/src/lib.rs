//! Transport implementations for the DVAP bridge.
//!
//! This crate provides concrete implementations of the
//! [`Transport`](dvap_core::Transport) trait from `dvap-core`:
//!
//! - [`SerialTransport`]: the USB serial link to a DVAP dongle
//! - [`TcpTransport`]: relay client connections
//! - [`StreamTransport`]: any tokio `AsyncRead + AsyncWrite` stream, such as
//!   an in-memory `tokio::io::duplex` pipe

pub mod serial;
pub mod stream;
pub mod tcp;

pub use serial::{DVAP_BAUD_RATE, SerialTransport};
pub use stream::{StreamReader, StreamTransport, StreamWriter};
pub use tcp::TcpTransport;
