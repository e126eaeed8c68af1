//! dvap-protocol: Wire format of the DVAP serial protocol.
//!
//! The DVAP dongle and the relay's network clients exchange the same
//! length-prefixed binary frames. This crate holds everything about those
//! frames that is independent of any particular link:
//!
//! - [`frame`] -- header packing, encode, incremental decode, and the
//!   blocking [`read_frame`] used by every read task
//! - [`gmsk`] -- GMSK voice header and data frame field extraction
//! - [`codes`] -- frame type codes, control item codes and data markers

pub mod codes;
pub mod frame;
pub mod gmsk;

pub use frame::{
    DecodeResult, Frame, HEADER_LEN, decode_frame, encode, encode_control, read_frame,
    read_frame_with_limit, write_frame,
};
pub use gmsk::{CQCQCQ, DataFrame, FrameKind, VoiceHeader, classify};
