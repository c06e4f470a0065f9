//! Domain-specific error types for the Mooltipass protocol engine.
//!
//! All fallible operations return `Result<T, MpError>`.
//! No panics on malformed device input: every error is typed and recoverable.

use std::time::Duration;
use thiserror::Error;

use crate::message::Command;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MpError>;

/// The canonical error type for the Mooltipass client.
#[derive(Debug, Error)]
pub enum MpError {
    // ── Framing Errors ───────────────────────────────────────────
    /// The payload does not fit into a single HID report.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A report read from the transport is not a valid frame.
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),

    /// A string cannot be represented as a single-byte device string.
    #[error("invalid device string: {0}")]
    InvalidDeviceString(&'static str),

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// The URL carries no host from which a credential context can be taken.
    #[error("no credential context in {0:?}")]
    NoContext(String),

    // ── Device Errors ────────────────────────────────────────────
    /// The device reported a flash chip id we have no geometry for.
    #[error("unknown flash chip id {0}")]
    UnknownChip(u8),

    /// No compatible device was found during enumeration.
    #[error("no device found")]
    NoDevice,

    /// The HID link failed (device unplugged, send or receive error).
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The device did not answer an outstanding request in time.
    #[error("no reply to {command} after {waited:?}")]
    ReplyTimeout { command: Command, waited: Duration },

    /// A bulk transfer or maintenance command is already running, or an
    /// authentication exchange owns the link.
    #[error("session busy: {0}")]
    Busy(&'static str),

    /// A bulk transfer stopped before all data was exchanged.
    #[error("transfer aborted: {0}")]
    TransferAborted(String),

    // ── Plumbing Errors ──────────────────────────────────────────
    /// Local I/O failed (dump files, sockets).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A client message could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The session runtime is gone.
    #[error("channel closed")]
    ChannelClosed,

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for MpError {
    fn from(s: String) -> Self {
        MpError::Other(s)
    }
}

impl From<&str> for MpError {
    fn from(s: &str) -> Self {
        MpError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for MpError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        MpError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for MpError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        MpError::ChannelClosed
    }
}

impl MpError {
    /// Returns `true` for errors that mean the physical link is gone.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MpError::TransportFailure(_) | MpError::ReplyTimeout { .. } | MpError::Io(_)
        )
    }
}
