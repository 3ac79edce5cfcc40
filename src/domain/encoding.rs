//! Byte codecs for command payload fields.
//!
//! Callers build their command payloads out of a small fixed vocabulary:
//! bit-packed timeline flags, 5-byte labels, RGB triplets, percentage values
//! mapped onto the full i32 range, and the 4-byte clock timestamp. The
//! framing layer treats the result as opaque bytes.

use std::time::{SystemTime, UNIX_EPOCH};

/// Pack a timeline index (low nibble) and paused flag (bit 4) into one byte.
pub fn timeline_flag(timeline_index: u8, paused: bool) -> u8 {
    let index = timeline_index & 0b0000_1111;
    let paused = ((paused as u8) << 4) & 0b0001_0000;
    paused | index
}

/// Encode a label as exactly 5 ASCII bytes, truncated or zero-padded.
pub fn label_bytes(label: &str) -> [u8; 5] {
    let mut result = [0u8; 5];
    for (slot, ch) in result.iter_mut().zip(label.chars()) {
        *slot = ch as u8;
    }
    result
}

/// Decode a `#rrggbb` lowercase hex color into an RGB triplet.
/// Anything else reads as black.
pub fn color_bytes(color_hex: &str) -> [u8; 3] {
    let Some(digits) = color_hex.strip_prefix('#') else {
        return [0, 0, 0];
    };
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
    {
        return [0, 0, 0];
    }
    match hex::decode(digits) {
        Ok(rgb) => [rgb[0], rgb[1], rgb[2]],
        Err(_) => [0, 0, 0],
    }
}

/// Encode a percentage in `-100.0..=100.0` as a little-endian i32 spanning
/// the full integer range.
pub fn percentage_bytes(percentage: f32) -> [u8; 4] {
    let value = map_value(percentage, -100.0, 100.0, -2_147_483_647.0, 2_147_483_647.0) as i32;
    value.to_le_bytes()
}

/// Current wall-clock timestamp as the device expects it: epoch milliseconds
/// wrapped to a positive i32, little-endian.
pub fn clock_timestamp() -> [u8; 4] {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    ((millis % 0x7fff_ffff) as u32).to_le_bytes()
}

/// Linearly map `x` from one range onto another, clamping to both.
pub fn map_value(x: f32, in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> f32 {
    if in_min == in_max {
        return out_min / 2.0 + out_max / 2.0;
    }

    let x = x.clamp(in_min.min(in_max), in_min.max(in_max));
    let result = ((x - in_min) * (out_max - out_min)) / (in_max - in_min) + out_min;
    result.clamp(out_min.min(out_max), out_min.max(out_max))
}
