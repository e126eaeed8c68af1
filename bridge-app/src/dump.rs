// parse-dump subcommand -- walks a frame log recorded by the relay and
// describes each frame.

use anyhow::{Result, bail};

use dvapbridge::MAX_FRAME_LEN;
use dvapbridge::protocol::{DecodeResult, FrameKind, classify, decode_frame};

/// One-line description of every frame in `buf`, in order.
///
/// A trailing partial frame is reported, not treated as an error; a
/// corrupt header is.
pub fn describe_frames(buf: &[u8]) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        match decode_frame(&buf[offset..], MAX_FRAME_LEN) {
            DecodeResult::Frame(frame, consumed) => {
                let detail = match classify(frame.as_bytes()) {
                    FrameKind::VoiceHeader(h) => format!(
                        "voice header stream={:#06x} rpt1=[{}] rpt2=[{}] urcall=[{}] mycall=[{}]",
                        h.stream_id, h.rpt1, h.rpt2, h.urcall, h.mycall
                    ),
                    FrameKind::DataFrame(d) => format!(
                        "voice data   stream={:#06x} pos={} seq={}",
                        d.stream_id, d.frame_pos, d.seq
                    ),
                    FrameKind::Unknown(Some(marker)) => {
                        format!("type {} marker={marker:#06x}", frame.frame_type())
                    }
                    FrameKind::Unknown(None) => format!("type {}", frame.frame_type()),
                };
                lines.push(format!("{offset:>8}  {:>4} bytes  {detail}", frame.len()));
                offset += consumed;
            }
            DecodeResult::Incomplete => {
                lines.push(format!(
                    "{offset:>8}  truncated frame ({} trailing bytes)",
                    buf.len() - offset
                ));
                break;
            }
            DecodeResult::TooLarge(len) | DecodeResult::Malformed(len) => {
                bail!("corrupt frame header at offset {offset}: declared length {len}");
            }
        }
    }

    Ok(lines)
}
