//! dvap-core: Core error type and transport abstraction for the DVAP bridge.
//!
//! Every other crate in the workspace (the frame codec, the device client,
//! the relay server) builds on the types defined here. Applications that
//! only need to supply a custom link depend on this crate alone.
//!
//! # Key types
//!
//! - [`Transport`] -- full-duplex byte stream, split into read/write halves
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod transport;

pub use error::{Error, MAX_FRAME_LEN, Result};
pub use transport::{Transport, TransportReader, TransportWriter, send_all};
