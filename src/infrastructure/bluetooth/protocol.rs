//! Glow Device Wire Protocol
//!
//! Byte-exact framing shared with the device firmware: the 12-byte
//! fragmentation header carried by every characteristic write, and the OTA
//! control frames driving the firmware-update sequence.
//!
//! # Fragment header (12 bytes, all fields little-endian)
//!
//! ```text
//! [0-3]  sessionId   random tag, regenerated per payload transmission
//! [4-7]  offset      byte offset of this chunk within the payload
//! [8-11] totalLength full payload length
//! [12..] chunk       up to (MTU - 12) payload bytes
//! ```
//!
//! Concatenating the chunks of one session in offset order reconstructs the
//! payload exactly once, with no gaps or overlaps.
//!
//! # OTA control frame
//!
//! ```text
//! [0]    flag        0x00 write, 0xFD reset, 0xFF begin, 0xFE end
//! [1]    reserved    0x00
//! [2-5]  argument    u32 little-endian
//! [6..]  chunk bytes (flag 0x00 only)
//! ```

use thiserror::Error;
use uuid::Uuid;

/// Glow mesh GATT service UUID.
pub const SERVICE_UUID: &str = "cc540e31-80be-44af-b64a-5d2def886bf5";

/// Command characteristic - acknowledged/unacknowledged command writes.
pub const COMMAND_CHAR_UUID: &str = "33a0937e-0c61-41ea-b770-007ade2c79fa";

/// Clock characteristic - 4-byte timestamp read/write.
pub const CLOCK_CHAR_UUID: &str = "7a1e0e3a-6b9b-49ef-b9b7-65c81b714a19";

/// Request characteristic - request/response traffic and OTA frames.
pub const REQUEST_CHAR_UUID: &str = "9ebe2e4b-10c7-4a81-ac83-49540d1135a5";

/// Fragment header length reserved out of every transport write.
pub const FRAME_HEADER_LEN: usize = 12;

/// Single-write capacity assumed until the link negotiates an MTU.
pub const DEFAULT_MTU: usize = 512;

/// OTA image window per control frame. Must stay a multiple of 16, the
/// device's internal flash block size.
pub const OTA_CHUNK_SIZE: usize = 4992;

pub const OTA_FLAG_WRITE: u8 = 0x00;
pub const OTA_FLAG_RESET: u8 = 0xFD;
pub const OTA_FLAG_END: u8 = 0xFE;
pub const OTA_FLAG_BEGIN: u8 = 0xFF;

/// One fragment of a payload transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub session_id: u32,
    pub offset: u32,
    pub total_length: u32,
    pub chunk: Vec<u8>,
}

/// Framing violations detected on decode/reassembly.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame shorter than the {FRAME_HEADER_LEN}-byte header: {got} bytes")]
    TooShort { got: usize },
    #[error("frame session {got:#010x} does not match session {expected:#010x}")]
    SessionMismatch { expected: u32, got: u32 },
    #[error("frame offset {got} leaves a gap or overlap, expected {expected}")]
    DiscontiguousOffset { expected: u32, got: u32 },
    #[error("frames disagree on total length: {got} after {expected}")]
    TotalLengthMismatch { expected: u32, got: u32 },
    #[error("reassembled {got} bytes of a declared {expected}")]
    Incomplete { expected: u32, got: u32 },
}

impl Frame {
    /// Serialize header + chunk into the bytes handed to the transport.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FRAME_HEADER_LEN + self.chunk.len());
        bytes.extend_from_slice(&self.session_id.to_le_bytes());
        bytes.extend_from_slice(&self.offset.to_le_bytes());
        bytes.extend_from_slice(&self.total_length.to_le_bytes());
        bytes.extend_from_slice(&self.chunk);
        bytes
    }

    /// Parse one transport write back into a frame.
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(FrameError::TooShort { got: bytes.len() });
        }
        Ok(Self {
            session_id: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            offset: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            total_length: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            chunk: bytes[FRAME_HEADER_LEN..].to_vec(),
        })
    }
}

/// Split a payload into frames of at most `capacity` chunk bytes, in strictly
/// increasing offset order, under one session tag.
///
/// An empty payload still yields exactly one frame with an empty chunk, so
/// the receiver observes `totalLength = 0` and completes immediately. A
/// payload that is an exact multiple of `capacity` yields `len / capacity`
/// frames with no trailing empty frame.
pub fn encode(payload: &[u8], capacity: usize, session_id: u32) -> Vec<Frame> {
    debug_assert!(capacity >= 1, "frame capacity must be at least one byte");
    let total_length = payload.len() as u32;

    if payload.is_empty() {
        return vec![Frame {
            session_id,
            offset: 0,
            total_length,
            chunk: Vec::new(),
        }];
    }

    payload
        .chunks(capacity.max(1))
        .enumerate()
        .map(|(i, chunk)| Frame {
            session_id,
            offset: (i * capacity) as u32,
            total_length,
            chunk: chunk.to_vec(),
        })
        .collect()
}

/// Reassemble the original payload from the frames of one session.
///
/// Frames must arrive in offset order and agree on session tag and total
/// length; anything else is a [`FrameError`], never a silent merge or drop.
pub fn reassemble(frames: &[Frame]) -> Result<Vec<u8>, FrameError> {
    let Some(first) = frames.first() else {
        return Err(FrameError::Incomplete {
            expected: 0,
            got: 0,
        });
    };

    let session_id = first.session_id;
    let total_length = first.total_length;
    let mut payload = Vec::with_capacity(total_length as usize);

    for frame in frames {
        if frame.session_id != session_id {
            return Err(FrameError::SessionMismatch {
                expected: session_id,
                got: frame.session_id,
            });
        }
        if frame.total_length != total_length {
            return Err(FrameError::TotalLengthMismatch {
                expected: total_length,
                got: frame.total_length,
            });
        }
        if frame.offset != payload.len() as u32 {
            return Err(FrameError::DiscontiguousOffset {
                expected: payload.len() as u32,
                got: frame.offset,
            });
        }
        payload.extend_from_slice(&frame.chunk);
    }

    if payload.len() as u32 != total_length {
        return Err(FrameError::Incomplete {
            expected: total_length,
            got: payload.len() as u32,
        });
    }
    Ok(payload)
}

/// Fresh random session tag for one payload transmission.
pub fn new_session_id() -> u32 {
    rand::random()
}

/// Build an OTA control frame: flag, reserved zero byte, u32 argument.
pub fn ota_control_frame(flag: u8, argument: u32) -> Vec<u8> {
    let mut frame = Vec::with_capacity(6);
    frame.push(flag);
    frame.push(0x00);
    frame.extend_from_slice(&argument.to_le_bytes());
    frame
}

/// Build an OTA write frame carrying one image window at `offset`.
pub fn ota_write_frame(offset: u32, chunk: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(6 + chunk.len());
    frame.push(OTA_FLAG_WRITE);
    frame.push(0x00);
    frame.extend_from_slice(&offset.to_le_bytes());
    frame.extend_from_slice(chunk);
    frame
}

/// Parse a UUID string from settings.
pub fn parse_uuid(uuid_str: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(uuid_str).map_err(|e| anyhow::anyhow!("invalid UUID '{uuid_str}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_little_endian() {
        let frame = Frame {
            session_id: 0x0403_0201,
            offset: 0x0807_0605,
            total_length: 0x0C0B_0A09,
            chunk: vec![0xAA, 0xBB],
        };
        assert_eq!(
            frame.to_bytes(),
            vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 0xAA, 0xBB]
        );
        assert_eq!(Frame::parse(&frame.to_bytes()).unwrap(), frame);
    }

    #[test]
    fn parse_rejects_truncated_header() {
        assert_eq!(
            Frame::parse(&[0u8; 11]),
            Err(FrameError::TooShort { got: 11 })
        );
    }

    #[test]
    fn round_trip_across_sizes() {
        let cases = [
            (0usize, 20usize),
            (1, 20),
            (19, 20),
            (20, 20),
            (21, 20),
            (60, 20),
            (61, 20),
            (5, 1),
        ];
        for (len, cap) in cases {
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let frames = encode(&payload, cap, 7);
            assert_eq!(reassemble(&frames).unwrap(), payload, "len={len} cap={cap}");
        }
    }

    #[test]
    fn empty_payload_emits_single_empty_frame() {
        let frames = encode(&[], 100, 1);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].total_length, 0);
        assert!(frames[0].chunk.is_empty());
    }

    #[test]
    fn exact_multiple_has_no_trailing_empty_frame() {
        let payload = vec![0u8; 60];
        let frames = encode(&payload, 20, 1);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.chunk.len() == 20));
    }

    #[test]
    fn offsets_increase_strictly() {
        let frames = encode(&[0u8; 45], 20, 1);
        let offsets: Vec<u32> = frames.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 20, 40]);
        assert_eq!(frames[2].chunk.len(), 5);
    }

    #[test]
    fn reassemble_rejects_gap() {
        let mut frames = encode(&[0u8; 45], 20, 1);
        frames.remove(1);
        assert_eq!(
            reassemble(&frames),
            Err(FrameError::DiscontiguousOffset {
                expected: 20,
                got: 40
            })
        );
    }

    #[test]
    fn reassemble_rejects_foreign_session() {
        let mut frames = encode(&[0u8; 45], 20, 1);
        frames[2].session_id = 2;
        assert!(matches!(
            reassemble(&frames),
            Err(FrameError::SessionMismatch { .. })
        ));
    }

    #[test]
    fn ota_frames_match_wire_contract() {
        assert_eq!(
            ota_control_frame(OTA_FLAG_BEGIN, 10_000),
            vec![0xFF, 0x00, 0x10, 0x27, 0x00, 0x00]
        );
        assert_eq!(
            ota_control_frame(OTA_FLAG_RESET, 0),
            vec![0xFD, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            ota_write_frame(4992, &[0xAB; 2]),
            vec![0x00, 0x00, 0x80, 0x13, 0x00, 0x00, 0xAB, 0xAB]
        );
    }

    #[test]
    fn chunk_size_matches_device_block_size() {
        assert_eq!(OTA_CHUNK_SIZE % 16, 0);
    }

    #[test]
    fn parse_uuid_accepts_service_uuid() {
        let uuid = parse_uuid(SERVICE_UUID).unwrap();
        assert_eq!(uuid.as_fields().0, 0xcc540e31);
        assert!(parse_uuid("not-a-uuid").is_err());
    }
}
