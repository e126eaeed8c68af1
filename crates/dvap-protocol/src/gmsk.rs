//! GMSK (D-STAR) voice header and data frame parsing.
//!
//! Only the routing metadata is decoded: stream id, frame position,
//! sequence number and the four callsign fields of the voice header. The
//! AMBE voice payload and slow data are passed through untouched.
//!
//! All offsets below are relative to the full frame, header included.
//!
//! ```text
//! 0..2    marker (2F A0 voice header, 12 C0 voice data)
//! 2..4    stream id (u16 LE)
//! 4       frame position (bits 7:3), flag bits (2:0)
//! 5       sequence
//! 6..9    D-STAR header flags
//! 9..17   rpt1
//! 17..25  rpt2
//! 25..33  urcall
//! 33..41  mycall
//! 41..47  mycall suffix, checksum
//! ```

use crate::codes;
use crate::frame::HEADER_LEN;

/// Minimum full-frame length of a voice header.
pub const VOICE_HEADER_LEN: usize = 47;

/// Minimum full-frame length of a voice data frame.
pub const DATA_FRAME_LEN: usize = 18;

/// The reserved "general call" destination, six letters and two spaces.
pub const CQCQCQ: &str = "CQCQCQ  ";

/// Fields of a GMSK voice header frame.
///
/// Callsigns are stored exactly as received, space padding included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceHeader {
    pub stream_id: u16,
    pub frame_pos: u8,
    pub seq: u8,
    /// The three D-STAR flag bytes, uninterpreted.
    pub flags: [u8; 3],
    pub rpt1: String,
    pub rpt2: String,
    pub urcall: String,
    pub mycall: String,
}

impl VoiceHeader {
    /// Whether the destination is the general call `"CQCQCQ  "`.
    pub fn is_general_call(&self) -> bool {
        self.urcall == CQCQCQ
    }
}

/// Fields of a GMSK voice data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFrame {
    pub stream_id: u16,
    pub frame_pos: u8,
    pub seq: u8,
}

/// What a relayed frame turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    VoiceHeader(VoiceHeader),
    DataFrame(DataFrame),
    /// Anything else, including marked frames too short to parse.
    /// Carries the marker when the frame had two bytes to read one from.
    Unknown(Option<u16>),
}

/// Read the little-endian marker from the first two bytes of a frame.
pub fn marker(frame: &[u8]) -> Option<u16> {
    if frame.len() < 2 {
        return None;
    }
    Some(u16::from_le_bytes([frame[0], frame[1]]))
}

/// Parse a full voice header frame.
///
/// Returns `None` for frames shorter than [`VOICE_HEADER_LEN`]; a
/// truncated header is expected on a lossy link and is not an error.
/// The marker is not checked here; see [`classify`].
pub fn parse_voice_header(frame: &[u8]) -> Option<VoiceHeader> {
    if frame.len() < VOICE_HEADER_LEN {
        return None;
    }
    Some(VoiceHeader {
        stream_id: u16::from_le_bytes([frame[2], frame[3]]),
        frame_pos: frame[4] >> 3,
        seq: frame[5],
        flags: [frame[6], frame[7], frame[8]],
        rpt1: callsign(&frame[9..17]),
        rpt2: callsign(&frame[17..25]),
        urcall: callsign(&frame[25..33]),
        mycall: callsign(&frame[33..41]),
    })
}

/// Parse a full voice data frame.
///
/// Returns `None` for frames shorter than [`DATA_FRAME_LEN`].
pub fn parse_data_frame(frame: &[u8]) -> Option<DataFrame> {
    if frame.len() < DATA_FRAME_LEN {
        return None;
    }
    Some(DataFrame {
        stream_id: u16::from_le_bytes([frame[2], frame[3]]),
        frame_pos: frame[4] >> 3,
        seq: frame[5],
    })
}

/// Parse a voice header from a codec payload (the frame minus its header).
pub fn parse_voice_header_from_payload(payload: &[u8]) -> Option<VoiceHeader> {
    if payload.len() < VOICE_HEADER_LEN - HEADER_LEN {
        return None;
    }
    parse_voice_header(&with_header(payload))
}

/// Parse a data frame from a codec payload (the frame minus its header).
pub fn parse_data_frame_from_payload(payload: &[u8]) -> Option<DataFrame> {
    if payload.len() < DATA_FRAME_LEN - HEADER_LEN {
        return None;
    }
    parse_data_frame(&with_header(payload))
}

/// Classify a full frame by its marker and decode what is decodable.
pub fn classify(frame: &[u8]) -> FrameKind {
    let Some(m) = marker(frame) else {
        return FrameKind::Unknown(None);
    };
    let kind = match m {
        codes::marker::GMSK_HEADER => parse_voice_header(frame).map(FrameKind::VoiceHeader),
        codes::marker::GMSK_DATA => parse_data_frame(frame).map(FrameKind::DataFrame),
        _ => None,
    };
    kind.unwrap_or(FrameKind::Unknown(Some(m)))
}

// Offsets are frame-relative, so payload callers get two placeholder bytes.
fn with_header(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + HEADER_LEN);
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(payload);
    frame
}

fn callsign(field: &[u8]) -> String {
    String::from_utf8_lossy(field).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice_header_frame(urcall: &[u8; 8], mycall: &[u8; 8]) -> Vec<u8> {
        let mut f = vec![0u8; VOICE_HEADER_LEN];
        f[0] = 0x2F;
        f[1] = 0xA0;
        f[2] = 0x34;
        f[3] = 0x12;
        f[4] = 0x80;
        f[5] = 0x00;
        f[9..17].copy_from_slice(b"DIRECT  ");
        f[17..25].copy_from_slice(b"DIRECT  ");
        f[25..33].copy_from_slice(urcall);
        f[33..41].copy_from_slice(mycall);
        f
    }

    #[test]
    fn parse_full_voice_header() {
        let f = voice_header_frame(b"CQCQCQ  ", b"N0CALL  ");
        let h = parse_voice_header(&f).unwrap();
        assert_eq!(h.stream_id, 0x1234);
        assert_eq!(h.frame_pos, 0x10);
        assert_eq!(h.seq, 0);
        assert_eq!(h.rpt1, "DIRECT  ");
        assert_eq!(h.urcall, "CQCQCQ  ");
        assert_eq!(h.mycall, "N0CALL  ");
        assert!(h.is_general_call());
    }

    #[test]
    fn truncated_voice_header_is_absent() {
        let f = voice_header_frame(b"CQCQCQ  ", b"N0CALL  ");
        assert!(parse_voice_header(&f[..44]).is_none());
        assert!(parse_voice_header(&f[..46]).is_none());
    }

    #[test]
    fn callsigns_keep_padding() {
        let f = voice_header_frame(b"W1AW    ", b"K1ABC  B");
        let h = parse_voice_header(&f).unwrap();
        assert_eq!(h.urcall, "W1AW    ");
        assert_eq!(h.mycall, "K1ABC  B");
        assert!(!h.is_general_call());
    }

    #[test]
    fn payload_variants_use_frame_offsets() {
        let f = voice_header_frame(b"CQCQCQ  ", b"N0CALL  ");
        let h = parse_voice_header_from_payload(&f[2..]).unwrap();
        assert_eq!(h, parse_voice_header(&f).unwrap());
        assert!(parse_voice_header_from_payload(&f[2..46]).is_none());

        let mut d = vec![0u8; DATA_FRAME_LEN];
        d[0] = 0x12;
        d[1] = 0xC0;
        d[2] = 0x34;
        d[3] = 0x12;
        d[4] = 0x0B << 3;
        d[5] = 7;
        let parsed = parse_data_frame_from_payload(&d[2..]).unwrap();
        assert_eq!(parsed.stream_id, 0x1234);
        assert_eq!(parsed.frame_pos, 0x0B);
        assert_eq!(parsed.seq, 7);
        assert!(parse_data_frame_from_payload(&d[2..17]).is_none());
    }

    #[test]
    fn frame_position_ignores_flag_bits() {
        let mut d = vec![0u8; DATA_FRAME_LEN];
        d[0] = 0x12;
        d[1] = 0xC0;
        d[4] = (3 << 3) | 0x07;
        assert_eq!(parse_data_frame(&d).unwrap().frame_pos, 3);
    }

    #[test]
    fn classify_by_marker() {
        let f = voice_header_frame(b"CQCQCQ  ", b"N0CALL  ");
        assert!(matches!(classify(&f), FrameKind::VoiceHeader(h) if h.mycall == "N0CALL  "));

        let mut d = vec![0u8; DATA_FRAME_LEN];
        d[0] = 0x12;
        d[1] = 0xC0;
        assert!(matches!(classify(&d), FrameKind::DataFrame(_)));

        assert_eq!(classify(&[0x03, 0x60, 0x00]), FrameKind::Unknown(Some(0x6003)));
        assert_eq!(classify(&[0x03]), FrameKind::Unknown(None));
    }

    #[test]
    fn classify_short_marked_frames_as_unknown() {
        let f = voice_header_frame(b"CQCQCQ  ", b"N0CALL  ");
        assert_eq!(
            classify(&f[..20]),
            FrameKind::Unknown(Some(codes::marker::GMSK_HEADER))
        );
        assert_eq!(
            classify(&[0x12, 0xC0, 0x00]),
            FrameKind::Unknown(Some(codes::marker::GMSK_DATA))
        );
    }
}
