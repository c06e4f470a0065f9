//! The link between the session and a physical (or emulated) device.
//!
//! A [`Transport`] moves whole 64-byte frames. The session runtime owns one
//! transport and drives it from a single task, so implementations only need
//! to be `Send`.

pub mod stream;

use async_trait::async_trait;
use std::fmt;

use crate::error::Result;
use crate::frame::Frame;

pub use stream::{StreamTransport, StreamTarget};

/// USB vendor id of the device.
pub const VENDOR_ID: u16 = 0x16d0;

/// USB product id of the device.
pub const PRODUCT_ID: u16 = 0x09a0;

/// A device found during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Backend-specific address (HID path, socket address).
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product: Option<String>,
}

impl DeviceInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            vendor_id: VENDOR_ID,
            product_id: PRODUCT_ID,
            product: None,
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} at {}",
            self.vendor_id, self.product_id, self.path
        )
    }
}

/// Handle of an open device connection, unique per transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Frame-level access to a device.
///
/// `receive` must be cancel-safe: the runtime polls it inside
/// `tokio::select!` and drops the future whenever another branch wins.
#[async_trait]
pub trait Transport: Send {
    /// List candidate devices. An empty list is not an error.
    async fn enumerate(&mut self) -> Result<Vec<DeviceInfo>>;

    /// Open `device`, replacing any previous connection.
    async fn connect(&mut self, device: &DeviceInfo) -> Result<ConnectionId>;

    /// Close the current connection, if any.
    async fn disconnect(&mut self);

    /// Write one frame.
    async fn send(&mut self, frame: &Frame) -> Result<()>;

    /// Wait for the next frame from the device.
    async fn receive(&mut self) -> Result<Frame>;
}
