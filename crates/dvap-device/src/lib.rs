//! Host-side client for the DVAP Dongle.
//!
//! This crate drives a DVAP over its serial link. It provides:
//!
//! - **Command builders** ([`commands`]) -- encode control requests (run
//!   state, modulation, squelch, frequencies, TX power, LEDs, band scan) and
//!   parse the corresponding responses.
//! - **Events** ([`events`]) -- unsolicited notifications (PTT, operational
//!   status, DTMF) and received data frames.
//! - **DvapDevice** ([`device`]) -- an open session: background send and
//!   receive tasks, the link keepalive, and serialized control exchanges.
//! - **DvapBuilder** ([`builder`]) -- fluent builder for sessions on a serial
//!   port or any other [`Transport`](dvap_core::Transport).
//!
//! # Example
//!
//! ```
//! use dvap_device::commands::{request_item, set_squelch_threshold};
//! use dvap_protocol::codes::item;
//!
//! // Ask for the DVAP's name.
//! assert_eq!(&request_item(item::TARGET_NAME).unwrap()[..], &[0x04, 0x20, 0x01, 0x00]);
//!
//! // Squelch below the floor is clamped to -128 dBm.
//! assert_eq!(&set_squelch_threshold(-200).unwrap()[..], &[0x05, 0x00, 0x80, 0x00, 0x80]);
//! ```

pub mod builder;
pub mod commands;
pub mod device;
pub mod events;
mod io;

pub use builder::DvapBuilder;
pub use commands::{
    BandScan, DeviceStatus, LedControl, Modulation, OperationMode, RunState, VersionSelector,
};
pub use device::DvapDevice;
pub use events::DeviceEvent;
