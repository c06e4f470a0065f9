//! Device connection lifecycle.
//!
//! Transitions return `Result` instead of panicking; a failed link always
//! drops straight back to `Idle` through [`SessionPhase::force_idle`].

use std::fmt;
use std::time::{Duration, Instant};

use crate::error::{MpError, Result};

/// The current phase of the device connection.
///
/// ```text
///  Idle ──► Discovering ──► Connecting ──► Connected
///   ▲            │               │              │
///   └────────────┴───────────────┴──────────────┘
///        (no device / connect failed / link lost)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No device connection. Initial state.
    #[default]
    Idle,

    /// Waiting for the transport to enumerate devices.
    Discovering,

    /// A device was picked; the transport is opening it.
    Connecting,

    /// The device is open and frames can flow.
    Connected {
        /// When the connection was established.
        since: Instant,
    },
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Discovering => write!(f, "Discovering"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected { .. } => write!(f, "Connected"),
        }
    }
}

impl SessionPhase {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// How long the device has been connected, measured at `now`.
    pub fn connected_for(&self, now: Instant) -> Option<Duration> {
        match self {
            Self::Connected { since } => Some(now.saturating_duration_since(*since)),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Idle`.
    pub fn begin_discovery(&mut self) -> Result<()> {
        match self {
            Self::Idle => {
                *self = Self::Discovering;
                Ok(())
            }
            _ => Err(MpError::Other(format!("cannot discover while {self}"))),
        }
    }

    /// Valid from: `Discovering`.
    pub fn begin_connect(&mut self) -> Result<()> {
        match self {
            Self::Discovering => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(MpError::Other(format!("cannot connect while {self}"))),
        }
    }

    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self, now: Instant) -> Result<()> {
        match self {
            Self::Connecting => {
                *self = Self::Connected { since: now };
                Ok(())
            }
            _ => Err(MpError::Other(format!("cannot complete connect while {self}"))),
        }
    }

    /// Drop back to `Idle` from any phase.
    pub fn force_idle(&mut self) {
        *self = Self::Idle;
    }
}
