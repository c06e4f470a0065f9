//! Configuration for the Mooltipass client.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mp_core::SessionConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Which device to talk to.
    pub device: DeviceConfig,
    /// Session timing.
    pub session: SessionSection,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Device selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// `host:port` of a device emulator. If empty, USB HID is used.
    pub emulator: String,
    /// USB vendor id to match.
    pub vendor_id: u16,
    /// USB product id to match.
    pub product_id: u16,
}

/// Session timing, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Keepalive / reconnect period.
    pub keepalive_ms: u64,
    /// Lifetime of one credential request once it owns the device.
    pub auth_timeout_ms: u64,
    /// Longest wait for a single device reply.
    pub reply_timeout_ms: u64,
    /// How long CLI commands wait for the device to come up.
    pub ready_timeout_ms: u64,
    /// Include the media partition in flash exports.
    pub export_everything: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            emulator: String::new(),
            vendor_id: mp_core::VENDOR_ID,
            product_id: mp_core::PRODUCT_ID,
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            keepalive_ms: 2_000,
            auth_timeout_ms: 15_000,
            reply_timeout_ms: 30_000,
            ready_timeout_ms: 10_000,
            export_everything: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// The emulator address, if one is configured.
    pub fn emulator(&self) -> Option<&str> {
        let addr = self.device.emulator.trim();
        (!addr.is_empty()).then_some(addr)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.session.ready_timeout_ms)
    }

    /// Convert the session section into engine settings. Zero periods are
    /// raised to one millisecond.
    pub fn to_session_config(&self) -> SessionConfig {
        let ms = |v: u64| Duration::from_millis(v.max(1));
        SessionConfig {
            keepalive_interval: ms(self.session.keepalive_ms),
            auth_timeout: ms(self.session.auth_timeout_ms),
            reply_timeout: ms(self.session.reply_timeout_ms),
            export_everything: self.session.export_everything,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
