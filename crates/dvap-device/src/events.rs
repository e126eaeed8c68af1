//! Events published by a device session.
//!
//! Unsolicited frames from the DVAP and data frames received over the air
//! are delivered through a `tokio::sync::broadcast` channel, so any number
//! of consumers (a relay uplink, a monitor, a logger) can follow the same
//! session. Obtain a receiver with
//! [`DvapDevice::subscribe()`](crate::DvapDevice::subscribe).

use bytes::Bytes;
use dvap_protocol::codes::item;
use dvap_protocol::frame::Frame;

/// An asynchronous notification from the DVAP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The DVAP switched between receive and transmit (item 0x0118).
    PttChanged { transmitting: bool },

    /// Periodic operational status report (item 0x0090). The payload is
    /// passed through undecoded.
    OperationalStatus { payload: Bytes },

    /// Any other unsolicited control item, e.g. a DTMF message (0x0406).
    Unsolicited { item: u16, payload: Bytes },

    /// A data frame from the radio side (GMSK header, voice data, ack).
    Data(Frame),

    /// The session's link failed; no further events will follow.
    Disconnected,
}

impl DeviceEvent {
    /// Decode an unsolicited (type 1) frame.
    pub fn from_unsolicited(frame: &Frame) -> Self {
        let Some(code) = frame.control_item() else {
            return DeviceEvent::Unsolicited {
                item: 0,
                payload: Bytes::copy_from_slice(frame.payload()),
            };
        };
        let data = frame.control_data();
        match code {
            item::PTT_STATE if !data.is_empty() => DeviceEvent::PttChanged {
                transmitting: data[0] != 0x00,
            },
            item::OPERATIONAL_STATUS => DeviceEvent::OperationalStatus {
                payload: Bytes::copy_from_slice(data),
            },
            other => DeviceEvent::Unsolicited {
                item: other,
                payload: Bytes::copy_from_slice(data),
            },
        }
    }
}
