//! Numeric constants of the DVAP wire protocol.
//!
//! Frame type codes are direction-dependent: the same 3-bit value means
//! different things host-to-target and target-to-host, so they live in
//! separate [`host`] and [`target`] modules.

/// Frame types sent by the host (this bridge) to the DVAP.
pub mod host {
    pub const SET_CTRL: u8 = 0x00;
    pub const REQ_CTRL_ITEM: u8 = 0x01;
    pub const REQ_CTRL_RANGE: u8 = 0x02;
    pub const DATA_ACK: u8 = 0x03;
    pub const DATA_ITEM_0: u8 = 0x04;
    pub const DATA_ITEM_1: u8 = 0x05;
    pub const DATA_ITEM_2: u8 = 0x06;
    pub const DATA_ITEM_3: u8 = 0x07;
}

/// Frame types sent by the DVAP to the host.
pub mod target {
    pub const ITEM_RESPONSE: u8 = 0x00;
    pub const UNSOLICITED: u8 = 0x01;
    pub const RANGE_RESPONSE: u8 = 0x02;
    pub const DATA_ACK: u8 = 0x03;
    pub const DATA_ITEM_0: u8 = 0x04;
    pub const DATA_ITEM_1: u8 = 0x05;
    pub const DATA_ITEM_2: u8 = 0x06;
    pub const DATA_ITEM_3: u8 = 0x07;

    /// Whether a target frame type answers a control request.
    pub fn is_response(frame_type: u8) -> bool {
        frame_type == ITEM_RESPONSE || frame_type == RANGE_RESPONSE
    }
}

/// Control item codes (16-bit, little-endian on the wire).
pub mod item {
    pub const TARGET_NAME: u16 = 0x0001;
    pub const TARGET_SERIAL: u16 = 0x0002;
    pub const IFACE_VERSION: u16 = 0x0003;
    pub const HW_VERSION: u16 = 0x0004;
    pub const STATUS: u16 = 0x0005;
    pub const RUN_STATE: u16 = 0x0018;
    pub const RX_FREQ: u16 = 0x0020;
    pub const MODULATION_TYPE: u16 = 0x0028;
    pub const OPERATION_MODE: u16 = 0x002A;
    pub const SQUELCH_THRESHOLD: u16 = 0x0080;
    pub const OPERATIONAL_STATUS: u16 = 0x0090;
    pub const PTT_STATE: u16 = 0x0118;
    pub const EXTERNAL_TR_CONTROL: u16 = 0x011A;
    pub const LED_CONTROL: u16 = 0x011C;
    pub const TX_FREQ: u16 = 0x0120;
    pub const TX_POWER: u16 = 0x0138;
    pub const RX_TX_FREQ: u16 = 0x0220;
    pub const TX_FREQ_LIMITS: u16 = 0x0230;
    pub const FREQ_CALIBRATION: u16 = 0x0400;
    pub const BAND_SCAN: u16 = 0x0404;
    pub const DTMF_MESSAGE: u16 = 0x0406;
}

/// Data-frame markers: the first two bytes of a frame read as a
/// little-endian u16.
///
/// The marker is the frame header itself, so each marker pins both the
/// frame type and the total length of that kind of frame.
pub mod marker {
    /// FM voice header (bytes `42 81`).
    pub const FM_HEADER: u16 = 0x8142;
    /// GMSK voice header (bytes `2F A0`, 47-byte type-5 frame).
    pub const GMSK_HEADER: u16 = 0xA02F;
    /// GMSK voice data (bytes `12 C0`, 18-byte type-6 frame).
    pub const GMSK_DATA: u16 = 0xC012;
    /// Acknowledgement of a transmitted GMSK header (bytes `2F 60`).
    pub const GMSK_TX_ACK: u16 = 0x602F;
}
