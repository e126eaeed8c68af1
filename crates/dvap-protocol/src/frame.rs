//! DVAP frame encoder/decoder.
//!
//! The serial link to the DVAP and the relay's TCP links carry the same
//! length-prefixed frames. This module handles the byte-level encoding,
//! the incremental buffer decoder, and the blocking frame reader used by
//! every read task in the workspace.
//!
//! # Frame format
//!
//! ```text
//! offset 0: length_lsb
//! offset 1: bits[7:5] = type, bits[4:0] = length_msb
//! offset 2..: payload (length - 2 bytes)
//! ```
//!
//! `length` is the total frame length including the 2-byte header, so it
//! fits in 13 bits and never exceeds [`MAX_FRAME_LEN`].

use bytes::{BufMut, Bytes, BytesMut};
use dvap_core::error::{Error, MAX_FRAME_LEN, Result};
use dvap_core::transport::{TransportReader, TransportWriter, send_all};

/// Size of the frame header in bytes.
pub const HEADER_LEN: usize = 2;

/// A single decoded frame.
///
/// The raw wire bytes are kept intact so the relay can forward a frame
/// without re-encoding it. Cloning is cheap (reference-counted buffer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    raw: Bytes,
}

impl Frame {
    /// Wrap raw wire bytes, checking that the header matches their length.
    pub fn from_bytes(raw: impl Into<Bytes>) -> Result<Self> {
        let raw = raw.into();
        if raw.len() < HEADER_LEN {
            return Err(Error::Protocol(format!(
                "frame shorter than header: {} bytes",
                raw.len()
            )));
        }
        let (_, len) = parse_header([raw[0], raw[1]]);
        if len != raw.len() {
            return Err(Error::Protocol(format!(
                "header declares {} bytes but frame has {}",
                len,
                raw.len()
            )));
        }
        Ok(Frame { raw })
    }

    /// The 3-bit frame type code.
    pub fn frame_type(&self) -> u8 {
        (self.raw[1] >> 5) & 0x07
    }

    /// Total frame length, header included.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Always false: a frame holds at least its header.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Bytes after the 2-byte header.
    pub fn payload(&self) -> &[u8] {
        &self.raw[HEADER_LEN..]
    }

    /// The full frame as it appeared on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Consume the frame, returning the shared wire buffer.
    pub fn into_bytes(self) -> Bytes {
        self.raw
    }

    /// The first two bytes read as a little-endian marker.
    ///
    /// For data frames this identifies the frame kind (see
    /// [`codes::marker`](crate::codes::marker)).
    pub fn marker(&self) -> u16 {
        u16::from_le_bytes([self.raw[0], self.raw[1]])
    }

    /// The control item code of a control frame (first two payload bytes).
    ///
    /// Returns `None` for frames too short to carry one.
    pub fn control_item(&self) -> Option<u16> {
        let payload = self.payload();
        if payload.len() < 2 {
            return None;
        }
        Some(u16::from_le_bytes([payload[0], payload[1]]))
    }

    /// The control payload after the item code (empty if there is none).
    pub fn control_data(&self) -> &[u8] {
        let payload = self.payload();
        if payload.len() < 2 { &[] } else { &payload[2..] }
    }
}

/// Split a header into `(type, length)`.
pub fn parse_header(header: [u8; 2]) -> (u8, usize) {
    let frame_type = (header[1] >> 5) & 0x07;
    let len = header[0] as usize + (((header[1] & 0x1F) as usize) << 8);
    (frame_type, len)
}

/// Encode a frame of the given type around `payload`.
///
/// The type is masked to 3 bits. Fails with [`Error::PayloadTooLarge`] if
/// the frame would exceed [`MAX_FRAME_LEN`].
///
/// # Example
///
/// ```
/// use dvap_protocol::frame::encode;
///
/// let bytes = encode(3, &[]).unwrap();
/// assert_eq!(&bytes[..], &[0x02, 0x60]);
/// ```
pub fn encode(frame_type: u8, payload: &[u8]) -> Result<Bytes> {
    let len = HEADER_LEN + payload.len();
    if len > MAX_FRAME_LEN {
        return Err(Error::PayloadTooLarge { len });
    }
    let mut buf = BytesMut::with_capacity(len);
    buf.put_u8((len & 0xFF) as u8);
    buf.put_u8(((frame_type & 0x07) << 5) | ((len >> 8) & 0x1F) as u8);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Encode a control frame: item code (LE) followed by the item payload.
pub fn encode_control(frame_type: u8, item: u16, data: &[u8]) -> Result<Bytes> {
    let mut payload = BytesMut::with_capacity(2 + data.len());
    payload.put_u16_le(item);
    payload.put_slice(data);
    encode(frame_type, &payload)
}

/// Result of attempting to decode a frame from a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// A complete frame was decoded. The `usize` is the number of bytes
    /// consumed from the input buffer.
    Frame(Frame, usize),

    /// The buffer does not yet contain a complete frame.
    Incomplete,

    /// The header declares a length beyond the decoder's capacity.
    TooLarge(usize),

    /// The header declares a length shorter than the header itself.
    Malformed(usize),
}

/// Try to decode one frame from the front of `buf`.
///
/// Used for byte buffers that are already in memory, such as a recorded
/// relay log. Live links go through [`read_frame`].
pub fn decode_frame(buf: &[u8], max_len: usize) -> DecodeResult {
    if buf.len() < HEADER_LEN {
        return DecodeResult::Incomplete;
    }
    let (_, len) = parse_header([buf[0], buf[1]]);
    if len > max_len {
        return DecodeResult::TooLarge(len);
    }
    if len < HEADER_LEN {
        return DecodeResult::Malformed(len);
    }
    if buf.len() < len {
        return DecodeResult::Incomplete;
    }
    let frame = Frame {
        raw: Bytes::copy_from_slice(&buf[..len]),
    };
    DecodeResult::Frame(frame, len)
}

/// Read one frame using the full 13-bit capacity.
pub async fn read_frame(reader: &mut dyn TransportReader) -> Result<Frame> {
    read_frame_with_limit(reader, MAX_FRAME_LEN).await
}

/// Read one frame, rejecting headers that declare more than `max_len`.
///
/// Short reads are retried until the header and then the whole frame are
/// buffered. Errors:
///
/// - [`Error::FrameTooLarge`] when the declared length exceeds `max_len`;
///   the stream position is then unknown and the link must be dropped.
/// - [`Error::Protocol`] when the declared length is below the header size.
/// - [`Error::TransportFault`] when the reader returns `Ok(0)`.
/// - Whatever the reader returns, e.g. [`Error::Disconnected`] at EOF.
pub async fn read_frame_with_limit(
    reader: &mut dyn TransportReader,
    max_len: usize,
) -> Result<Frame> {
    let mut header = [0u8; HEADER_LEN];
    read_full(reader, &mut header).await?;

    let (_, len) = parse_header(header);
    if len > max_len {
        return Err(Error::FrameTooLarge { len, max: max_len });
    }
    if len < HEADER_LEN {
        return Err(Error::Protocol(format!(
            "header declares {len} bytes, less than the header itself"
        )));
    }

    let mut buf = BytesMut::zeroed(len);
    buf[..HEADER_LEN].copy_from_slice(&header);
    read_full(reader, &mut buf[HEADER_LEN..]).await?;

    tracing::trace!(bytes = len, data = ?&buf[..], "frame received");
    Ok(Frame { raw: buf.freeze() })
}

/// Write a complete frame, looping on short writes.
pub async fn write_frame(writer: &mut dyn TransportWriter, frame: &[u8]) -> Result<()> {
    tracing::trace!(bytes = frame.len(), data = ?frame, "frame sent");
    send_all(writer, frame).await
}

async fn read_full(reader: &mut dyn TransportReader, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.receive(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(Error::TransportFault);
        }
        filled += n;
    }
    Ok(())
}
