//! Fixed-size HID frames.
//!
//! ```text
//! byte 0      payload length L (0..=62)
//! byte 1      command code
//! bytes 2..   payload (L bytes), rest zero
//! ```

use std::fmt;

use crate::error::{MpError, Result};
use crate::message::Command;

/// Total size of one HID report.
pub const FRAME_SIZE: usize = 64;

/// Header bytes in front of the payload.
pub const HEADER_SIZE: usize = 2;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_SIZE: usize = FRAME_SIZE - HEADER_SIZE;

/// One HID report exchanged with the device.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_SIZE]);

impl Frame {
    /// Build a frame for `command`, optionally carrying `payload`.
    ///
    /// Without a payload the length byte is zero.
    pub fn encode(command: impl Into<u8>, payload: Option<&[u8]>) -> Result<Self> {
        let mut bytes = [0u8; FRAME_SIZE];
        bytes[1] = command.into();
        if let Some(payload) = payload {
            if payload.len() > MAX_PAYLOAD_SIZE {
                return Err(MpError::PayloadTooLarge {
                    size: payload.len(),
                    max: MAX_PAYLOAD_SIZE,
                });
            }
            bytes[0] = payload.len() as u8;
            bytes[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
        }
        Ok(Self(bytes))
    }

    /// Build a frame with no payload.
    pub fn command(command: Command) -> Self {
        let mut bytes = [0u8; FRAME_SIZE];
        bytes[1] = command as u8;
        Self(bytes)
    }

    /// Split the frame into `(length, code, payload)`.
    ///
    /// The length byte is returned as sent; the payload slice is clamped to
    /// the frame so a bogus length never reads out of bounds.
    pub fn decode(&self) -> (u8, u8, &[u8]) {
        let len = self.0[0];
        let end = HEADER_SIZE + (len as usize).min(MAX_PAYLOAD_SIZE);
        (len, self.0[1], &self.0[HEADER_SIZE..end])
    }

    /// Validate a raw report read from a transport and wrap it.
    ///
    /// Short reports are zero-padded; the length byte must fit in the bytes
    /// actually read.
    pub fn from_report(report: &[u8]) -> Result<Self> {
        if report.len() > FRAME_SIZE {
            return Err(MpError::InvalidFrame("report longer than 64 bytes"));
        }
        if report.len() < HEADER_SIZE {
            return Err(MpError::InvalidFrame("report shorter than header"));
        }
        if report[0] as usize > report.len() - HEADER_SIZE {
            return Err(MpError::InvalidFrame("length byte exceeds report"));
        }
        let mut bytes = [0u8; FRAME_SIZE];
        bytes[..report.len()].copy_from_slice(report);
        Ok(Self(bytes))
    }

    /// Wrap a full report without checks.
    pub fn from_bytes(bytes: [u8; FRAME_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.0
    }

    pub fn len_byte(&self) -> u8 {
        self.0[0]
    }

    pub fn code(&self) -> u8 {
        self.0[1]
    }

    /// The command, if the code is known.
    pub fn command_id(&self) -> Result<Command> {
        Command::try_from(self.0[1])
    }

    pub fn payload(&self) -> &[u8] {
        self.decode().2
    }

    /// First payload byte, read regardless of the length field.
    ///
    /// The device sets it on every acknowledgement, including ones sent with
    /// a zero length byte.
    pub fn status(&self) -> u8 {
        self.0[HEADER_SIZE]
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (len, code, payload) = self.decode();
        f.debug_struct("Frame")
            .field("len", &len)
            .field("code", &format_args!("{code:#04x}"))
            .field("payload", &payload)
            .finish()
    }
}
