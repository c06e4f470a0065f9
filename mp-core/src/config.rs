//! Timing and behaviour knobs for a [`Session`](crate::Session).

use std::time::Duration;

/// Keepalive period: discovery while idle, VERSION probe while connected.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_millis(2000);

/// How long an authentication request may stay active.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_millis(15_000);

/// How long the device may take to answer a single frame.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(30_000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub keepalive_interval: Duration,
    pub auth_timeout: Duration,
    /// An unanswered frame older than this is treated as a lost device.
    pub reply_timeout: Duration,
    /// Include the media partition in flash exports.
    pub export_everything: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: DEFAULT_KEEPALIVE,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            export_everything: false,
        }
    }
}
