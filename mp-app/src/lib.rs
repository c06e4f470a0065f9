//! # mp-app: Mooltipass client host
//!
//! Runs the protocol engine from `mp-core` against a device and exposes it
//! two ways:
//!
//! - **Serve**: a browser native-messaging host on stdin/stdout.
//! - **Maintenance**: one-shot CLI commands for dumps, imports, media slot
//!   uploads and erase/reset operations.
//!
//! The device is reached over USB HID (feature `hid`) or, for development,
//! over TCP to an emulator.

pub mod bridge;
pub mod commands;
pub mod config;

#[cfg(feature = "hid")]
pub mod hid;
