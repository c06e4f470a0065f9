//! Device command codes and reply status bytes.
//!
//! Uses a proper enum with `TryFrom` so unknown codes never panic.

use crate::error::MpError;
use std::fmt;

// ── Status bytes ─────────────────────────────────────────────────

/// First payload byte of a reply acknowledging success.
pub const STATUS_OK: u8 = 0x01;

/// First payload byte of a CONTEXT reply when no smartcard is inserted.
pub const STATUS_NO_CARD: u8 = 0x03;

// ── Command ──────────────────────────────────────────────────────

/// Every command exchanged with the device.
///
/// The same code is used for a request and for the device's reply to it.
/// Organized by category:
/// - `0x01..0x0A` protocol and credentials
/// - `0x30..0x39` flash/EEPROM export and import
/// - `0x40..0x46` maintenance, media slots, export start
/// - `0x52..0x54` media partition import
/// - `0x60`       smartcard reset
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // ── Protocol (0x0x) ──────────────────────────────────────────
    /// Debug text pushed by the firmware.
    Debug = 0x01,
    /// Liveness ping.
    Ping = 0x02,
    /// Firmware version and flash chip id.
    Version = 0x03,

    // ── Credentials (0x0x) ───────────────────────────────────────
    /// Select the credential context for a site.
    Context = 0x04,
    /// Read the login of the current context.
    GetLogin = 0x05,
    /// Read the password of the current context.
    GetPassword = 0x06,
    /// Store the login of the current context.
    SetLogin = 0x07,
    /// Store the password of the current context.
    SetPassword = 0x08,
    /// Create a new credential context.
    AddContext = 0x0A,

    // ── Export / Import (0x3x) ───────────────────────────────────
    /// Flash export data packet (request next / reply data).
    ExportFlash = 0x30,
    /// Flash export finished.
    ExportFlashEnd = 0x31,
    /// Begin a flash import.
    ImportFlashBegin = 0x32,
    /// Flash import data chunk.
    ImportFlash = 0x33,
    /// End a flash import.
    ImportFlashEnd = 0x34,
    /// EEPROM export data packet.
    ExportEeprom = 0x35,
    /// EEPROM export finished.
    ExportEepromEnd = 0x36,
    /// Begin an EEPROM import.
    ImportEepromBegin = 0x37,
    /// EEPROM import data chunk.
    ImportEeprom = 0x38,
    /// End an EEPROM import.
    ImportEepromEnd = 0x39,

    // ── Maintenance / slots (0x4x) ───────────────────────────────
    /// Erase the whole EEPROM.
    EraseEeprom = 0x40,
    /// Erase the whole flash.
    EraseFlash = 0x41,
    /// Erase the inserted smartcard.
    EraseSmartcard = 0x42,
    /// Allocate a media slot for a blob of the given length.
    AllocateSlot = 0x43,
    /// Write a chunk into an allocated media slot.
    WriteSlot = 0x44,
    /// Start a flash export.
    ExportFlashStart = 0x45,
    /// Start an EEPROM export.
    ExportEepromStart = 0x46,

    // ── Media partition (0x5x) ───────────────────────────────────
    /// Begin a media partition import.
    ImportMediaStart = 0x52,
    /// Media partition data chunk.
    ImportMedia = 0x53,
    /// End a media partition import.
    ImportMediaEnd = 0x54,

    // ── Card (0x6x) ──────────────────────────────────────────────
    /// Reset the inserted smartcard.
    ResetCard = 0x60,
}

impl TryFrom<u8> for Command {
    type Error = MpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Command::Debug),
            0x02 => Ok(Command::Ping),
            0x03 => Ok(Command::Version),
            0x04 => Ok(Command::Context),
            0x05 => Ok(Command::GetLogin),
            0x06 => Ok(Command::GetPassword),
            0x07 => Ok(Command::SetLogin),
            0x08 => Ok(Command::SetPassword),
            0x0A => Ok(Command::AddContext),

            0x30 => Ok(Command::ExportFlash),
            0x31 => Ok(Command::ExportFlashEnd),
            0x32 => Ok(Command::ImportFlashBegin),
            0x33 => Ok(Command::ImportFlash),
            0x34 => Ok(Command::ImportFlashEnd),
            0x35 => Ok(Command::ExportEeprom),
            0x36 => Ok(Command::ExportEepromEnd),
            0x37 => Ok(Command::ImportEepromBegin),
            0x38 => Ok(Command::ImportEeprom),
            0x39 => Ok(Command::ImportEepromEnd),

            0x40 => Ok(Command::EraseEeprom),
            0x41 => Ok(Command::EraseFlash),
            0x42 => Ok(Command::EraseSmartcard),
            0x43 => Ok(Command::AllocateSlot),
            0x44 => Ok(Command::WriteSlot),
            0x45 => Ok(Command::ExportFlashStart),
            0x46 => Ok(Command::ExportEepromStart),

            0x52 => Ok(Command::ImportMediaStart),
            0x53 => Ok(Command::ImportMedia),
            0x54 => Ok(Command::ImportMediaEnd),

            0x60 => Ok(Command::ResetCard),

            _ => Err(MpError::UnknownVariant {
                type_name: "Command",
                value: value as u64,
            }),
        }
    }
}

impl From<Command> for u8 {
    fn from(cmd: Command) -> Self {
        cmd as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:#04x})", self, *self as u8)
    }
}

impl Command {
    /// Returns `true` if the device sends this frame without being asked.
    pub fn is_unsolicited(&self) -> bool {
        matches!(self, Command::Debug)
    }

    /// Returns `true` for commands that are followed by bulk data frames.
    pub fn is_bulk(&self) -> bool {
        matches!(*self as u8, 0x30..=0x39 | 0x43..=0x46 | 0x52..=0x54)
    }
}
