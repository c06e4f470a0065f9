//! Single-byte, NUL-terminated device strings.
//!
//! The firmware knows nothing about Unicode: every character is one byte
//! and the string ends at the first `0x00`.

use crate::error::{MpError, Result};

/// Encode `s` with a trailing NUL.
///
/// Characters above `U+00FF` cannot be represented and embedded NULs would
/// truncate the value on the device, so both are rejected.
pub fn encode(s: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(s.len() + 1);
    for ch in s.chars() {
        let code = ch as u32;
        if code == 0 {
            return Err(MpError::InvalidDeviceString("embedded NUL"));
        }
        if code > 0xFF {
            return Err(MpError::InvalidDeviceString("character outside single-byte range"));
        }
        buf.push(code as u8);
    }
    buf.push(0);
    Ok(buf)
}

/// Decode bytes up to the first NUL (or the end of the slice).
pub fn decode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}
