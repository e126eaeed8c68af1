//! DVAP control command builders and response parsers.
//!
//! Each public function in the first half of this module produces a
//! complete frame (header included) ready to be written to the serial
//! link. The second half decodes control responses. Out-of-range set
//! values are clamped silently to the ranges the firmware accepts.
//!
//! Response offsets are relative to the frame payload, i.e. the item code
//! echoed by the DVAP occupies payload bytes 0..2.

use bytes::{BufMut, Bytes, BytesMut};
use dvap_core::error::{Error, Result};
use dvap_protocol::codes::{host, item};
use dvap_protocol::frame::{Frame, encode_control};

/// Squelch threshold range in dBm.
pub const SQUELCH_MIN: i32 = -128;
pub const SQUELCH_MAX: i32 = -45;

/// LED intensity range in percent.
pub const LED_INTENSITY_MIN: i32 = 0;
pub const LED_INTENSITY_MAX: i32 = 100;

/// TX power range in dBm.
pub const TX_POWER_MIN: i32 = -12;
pub const TX_POWER_MAX: i32 = 10;

/// Band scan parameter ranges.
pub const BAND_SCAN_STEPS_MIN: u16 = 1;
pub const BAND_SCAN_STEPS_MAX: u16 = 800;
pub const BAND_SCAN_STRIDE_MIN: u8 = 1;
pub const BAND_SCAN_STRIDE_MAX: u8 = 255;
pub const BAND_SCAN_FREQ_MIN: u32 = 144_000_000;
pub const BAND_SCAN_FREQ_MAX: u32 = 148_000_000;

/// Link keepalive: a 3-byte DATA_ACK with a single zero payload byte.
pub const KEEPALIVE: [u8; 3] = [0x03, 0x60, 0x00];

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

/// Receiver run state (item 0x0018).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stop,
    Run,
}

impl RunState {
    pub fn code(self) -> u8 {
        match self {
            RunState::Stop => 0x00,
            RunState::Run => 0x01,
        }
    }
}

/// Modulation type (item 0x0028). Only settable while stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    Fm,
    Gmsk,
}

impl Modulation {
    pub fn code(self) -> u8 {
        match self {
            Modulation::Fm => 0x00,
            Modulation::Gmsk => 0x01,
        }
    }
}

/// Operation mode (item 0x002A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Normal,
    CwTest,
    DeviationTest,
}

impl OperationMode {
    pub fn code(self) -> u8 {
        match self {
            OperationMode::Normal => 0x00,
            OperationMode::CwTest => 0x01,
            OperationMode::DeviationTest => 0x02,
        }
    }
}

/// Which version the hardware version item reports (item 0x0004).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector {
    Bootcode,
    Firmware,
}

impl VersionSelector {
    pub fn code(self) -> u8 {
        match self {
            VersionSelector::Bootcode => 0x00,
            VersionSelector::Firmware => 0x01,
        }
    }
}

/// Device status code (item 0x0005).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Stopped,
    Running,
    BootIdle,
    BootProgramming,
    BootProgrammingError,
    /// A code this driver does not know.
    Other(u8),
}

impl DeviceStatus {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => DeviceStatus::Stopped,
            0x01 => DeviceStatus::Running,
            0x0E => DeviceStatus::BootIdle,
            0x0F => DeviceStatus::BootProgramming,
            0x80 => DeviceStatus::BootProgrammingError,
            other => DeviceStatus::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            DeviceStatus::Stopped => 0x00,
            DeviceStatus::Running => 0x01,
            DeviceStatus::BootIdle => 0x0E,
            DeviceStatus::BootProgramming => 0x0F,
            DeviceStatus::BootProgrammingError => 0x80,
            DeviceStatus::Other(code) => code,
        }
    }
}

/// LED control setting (item 0x011C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedControl {
    /// The DVAP drives its own LEDs.
    Dvap,
    /// The host sets each LED's intensity, 0 (off) to 100 (full).
    Host { yellow: u8, red: u8, green: u8 },
}

impl LedControl {
    /// Host-driven LEDs with each intensity clamped to 0..=100.
    pub fn host(yellow: i32, red: i32, green: i32) -> Self {
        LedControl::Host {
            yellow: clamp_led(yellow),
            red: clamp_led(red),
            green: clamp_led(green),
        }
    }

    /// The 4-byte item payload.
    pub fn payload(self) -> [u8; 4] {
        match self {
            LedControl::Dvap => [0x00, 0x00, 0x00, 0x00],
            LedControl::Host { yellow, red, green } => [
                0x01,
                yellow.min(LED_INTENSITY_MAX as u8),
                red.min(LED_INTENSITY_MAX as u8),
                green.min(LED_INTENSITY_MAX as u8),
            ],
        }
    }
}

/// Band scan parameters, clamped on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandScan {
    /// Number of frequency steps, 1..=800.
    pub steps: u16,
    /// Step size in units of 100 Hz, 1..=255.
    pub stride: u8,
    /// Start frequency in Hz, 144 MHz..=148 MHz.
    pub start_hz: u32,
}

impl BandScan {
    pub fn new(steps: u16, stride: u8, start_hz: u32) -> Self {
        BandScan {
            steps: steps.clamp(BAND_SCAN_STEPS_MIN, BAND_SCAN_STEPS_MAX),
            stride: stride.clamp(BAND_SCAN_STRIDE_MIN, BAND_SCAN_STRIDE_MAX),
            start_hz: start_hz.clamp(BAND_SCAN_FREQ_MIN, BAND_SCAN_FREQ_MAX),
        }
    }

    /// Frequency in Hz of scan step `index`.
    pub fn step_frequency(&self, index: u16) -> u32 {
        let step_hz = u32::from(self.stride) * 100;
        self.start_hz
            .saturating_add(step_hz.saturating_mul(u32::from(index)))
    }

    /// The 7-byte item payload: steps (u16 LE), stride (u8), start (u32 LE).
    pub fn payload(&self) -> [u8; 7] {
        let mut buf = [0u8; 7];
        buf[..2].copy_from_slice(&self.steps.to_le_bytes());
        buf[2] = self.stride;
        buf[3..].copy_from_slice(&self.start_hz.to_le_bytes());
        buf
    }
}

// ---------------------------------------------------------------------------
// Clamping
// ---------------------------------------------------------------------------

/// Clamp a squelch threshold to -128..=-45 dBm.
pub fn clamp_squelch(dbm: i32) -> i8 {
    dbm.clamp(SQUELCH_MIN, SQUELCH_MAX) as i8
}

/// Clamp an LED intensity to 0..=100.
pub fn clamp_led(intensity: i32) -> u8 {
    intensity.clamp(LED_INTENSITY_MIN, LED_INTENSITY_MAX) as u8
}

/// Clamp a TX power to -12..=10 dBm.
pub fn clamp_tx_power(dbm: i32) -> i16 {
    dbm.clamp(TX_POWER_MIN, TX_POWER_MAX) as i16
}

// ---------------------------------------------------------------------------
// Request builders
// ---------------------------------------------------------------------------

/// Request a control item's current value.
pub fn request_item(code: u16) -> Result<Bytes> {
    encode_control(host::REQ_CTRL_ITEM, code, &[])
}

/// Request the bootcode or firmware version.
pub fn request_hardware_version(selector: VersionSelector) -> Result<Bytes> {
    encode_control(host::REQ_CTRL_ITEM, item::HW_VERSION, &[selector.code()])
}

pub fn set_run_state(state: RunState) -> Result<Bytes> {
    encode_control(host::SET_CTRL, item::RUN_STATE, &[state.code()])
}

pub fn set_modulation(modulation: Modulation) -> Result<Bytes> {
    encode_control(host::SET_CTRL, item::MODULATION_TYPE, &[modulation.code()])
}

pub fn set_operation_mode(mode: OperationMode) -> Result<Bytes> {
    encode_control(host::SET_CTRL, item::OPERATION_MODE, &[mode.code()])
}

/// Set the squelch threshold; sent as one two's-complement byte.
pub fn set_squelch_threshold(dbm: i32) -> Result<Bytes> {
    let squelch = clamp_squelch(dbm);
    encode_control(host::SET_CTRL, item::SQUELCH_THRESHOLD, &[squelch as u8])
}

/// Set the external T/R control mode byte.
pub fn set_external_tr_control(mode: u8) -> Result<Bytes> {
    encode_control(host::SET_CTRL, item::EXTERNAL_TR_CONTROL, &[mode])
}

pub fn set_led_control(led: LedControl) -> Result<Bytes> {
    encode_control(host::SET_CTRL, item::LED_CONTROL, &led.payload())
}

pub fn set_rx_frequency(hz: u32) -> Result<Bytes> {
    encode_control(host::SET_CTRL, item::RX_FREQ, &hz.to_le_bytes())
}

pub fn set_tx_frequency(hz: u32) -> Result<Bytes> {
    encode_control(host::SET_CTRL, item::TX_FREQ, &hz.to_le_bytes())
}

pub fn set_rx_tx_frequency(hz: u32) -> Result<Bytes> {
    encode_control(host::SET_CTRL, item::RX_TX_FREQ, &hz.to_le_bytes())
}

/// Set the TX power; sent as a little-endian i16.
pub fn set_tx_power(dbm: i32) -> Result<Bytes> {
    let mut payload = BytesMut::with_capacity(2);
    payload.put_i16_le(clamp_tx_power(dbm));
    encode_control(host::SET_CTRL, item::TX_POWER, &payload)
}

pub fn request_band_scan(scan: &BandScan) -> Result<Bytes> {
    encode_control(host::REQ_CTRL_ITEM, item::BAND_SCAN, &scan.payload())
}

// ---------------------------------------------------------------------------
// Response parsers
// ---------------------------------------------------------------------------

fn require(frame: &Frame, min_payload: usize, what: &str) -> Result<()> {
    if frame.payload().len() < min_payload {
        return Err(Error::Protocol(format!(
            "{what} response too short: {} payload bytes, need {min_payload}",
            frame.payload().len()
        )));
    }
    Ok(())
}

/// Decode a text item (name, serial). Trailing NULs are dropped.
pub fn parse_text(frame: &Frame) -> Result<String> {
    require(frame, 2, "text")?;
    let text = String::from_utf8_lossy(&frame.payload()[2..]);
    Ok(text.trim_end_matches('\0').to_string())
}

/// Decode the interface version (u16 LE hundredths after the item code).
pub fn parse_interface_version(frame: &Frame) -> Result<f32> {
    require(frame, 4, "interface version")?;
    let p = frame.payload();
    Ok(u16::from_le_bytes([p[2], p[3]]) as f32 / 100.0)
}

/// Decode a hardware version (selector echo, then u16 LE hundredths).
pub fn parse_hardware_version(frame: &Frame) -> Result<f32> {
    require(frame, 5, "hardware version")?;
    let p = frame.payload();
    Ok(u16::from_le_bytes([p[3], p[4]]) as f32 / 100.0)
}

pub fn parse_status(frame: &Frame) -> Result<DeviceStatus> {
    require(frame, 3, "status")?;
    Ok(DeviceStatus::from_code(frame.payload()[2]))
}

/// Decode the TX frequency limits as `(lower_hz, upper_hz)`.
pub fn parse_tx_frequency_limits(frame: &Frame) -> Result<(u32, u32)> {
    require(frame, 10, "TX frequency limits")?;
    let p = frame.payload();
    let lower = u32::from_le_bytes([p[2], p[3], p[4], p[5]]);
    let upper = u32::from_le_bytes([p[6], p[7], p[8], p[9]]);
    Ok((lower, upper))
}

/// Decode a band scan response: one raw RSSI byte per step.
pub fn parse_band_scan(frame: &Frame) -> Result<Vec<u8>> {
    require(frame, 2, "band scan")?;
    Ok(frame.payload()[2..].to_vec())
}
