//! OTA Update State Machine
//!
//! The firmware push is a fixed sequence of framed writes:
//!
//! ```text
//! Idle -> Resetting -> Beginning -> Writing -> Ending -> Succeeded/Failed
//! ```
//!
//! Each phase is a task posted to the command queue, so every control frame
//! inherits the single-outstanding-write guarantee. A failure in any phase
//! sets the session's failed flag; later phases check it and return without
//! writing (and without a second rejection). This module owns the plan: the
//! phase order, the chunk windows over the image, and progress arithmetic.

use std::ops::Range;

use crate::infrastructure::bluetooth::protocol::{
    ota_control_frame, ota_write_frame, OTA_CHUNK_SIZE, OTA_FLAG_BEGIN, OTA_FLAG_END,
    OTA_FLAG_RESET,
};

/// Phase of an OTA session, for logging and state inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaPhase {
    Idle,
    Resetting,
    Beginning,
    Writing,
    Ending,
    Succeeded,
    Failed,
}

/// Progress sentinel emitted once before the Resetting phase runs.
pub const OTA_PROGRESS_STARTING: f32 = -1.0;

/// Reset frame: tell the device to drop any previous update attempt.
pub fn reset_frame() -> Vec<u8> {
    ota_control_frame(OTA_FLAG_RESET, 0)
}

/// Begin frame announcing the full image length.
pub fn begin_frame(image_len: u32) -> Vec<u8> {
    ota_control_frame(OTA_FLAG_BEGIN, image_len)
}

/// Write frame carrying the image window starting at `offset`.
pub fn chunk_frame(offset: u32, chunk: &[u8]) -> Vec<u8> {
    ota_write_frame(offset, chunk)
}

/// End frame confirming how many bytes were pushed.
pub fn end_frame(bytes_written: u32) -> Vec<u8> {
    ota_control_frame(OTA_FLAG_END, bytes_written)
}

/// Fixed-size windows over the image, in offset order. The final window
/// carries the remainder; together they cover the image exactly once.
pub fn chunk_windows(image_len: usize) -> impl Iterator<Item = Range<usize>> {
    (0..image_len)
        .step_by(OTA_CHUNK_SIZE)
        .map(move |from| from..(from + OTA_CHUNK_SIZE).min(image_len))
}

/// Progress in percent after `written` of `total` image bytes.
pub fn progress(written: u32, total: u32) -> f32 {
    if total == 0 {
        return 100.0;
    }
    (written as f32 / total as f32) * 100.0
}
