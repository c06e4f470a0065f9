//! # mp-core
//!
//! Protocol engine for the Mooltipass hardware password keeper.
//!
//! This crate contains:
//! - **Framing**: `Frame` (fixed 64-byte HID reports) and `FrameCodec` for
//!   stream-backed links via `tokio_util`
//! - **Protocol**: the `Command` table, single-byte device strings, the
//!   credential `FieldKey` map, URL → context derivation, flash geometry
//! - **State**: the sans-IO `Session` with its connection phase and
//!   half-duplex link discipline
//! - **Auth**: context selection and per-field credential exchange
//! - **Queue**: `RequestQueue`, one active request at a time
//! - **Bulk**: flash/EEPROM export, page-aware import, slot upload and
//!   maintenance commands
//! - **Transport**: the `Transport` trait and a TCP `StreamTransport`
//! - **Runtime**: the tokio task that drives a `Session` and the
//!   `SessionHandle` used by clients
//! - **Error**: `MpError`, a typed `thiserror` hierarchy

pub mod auth;
pub mod bulk;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod message;
pub mod protocol;
pub mod queue;
pub mod runtime;
pub mod sink;
pub mod state;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use auth::{AuthKind, AuthRequest, AuthStep};
pub use bulk::{ExportKind, ImportTarget, Maintenance, Transfer, TransferOutcome};
pub use client::{ClientEvent, ClientRequest, RequesterId};
pub use codec::FrameCodec;
pub use config::SessionConfig;
pub use error::{MpError, Result};
pub use frame::{FRAME_SIZE, Frame, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{Command, STATUS_NO_CARD, STATUS_OK};
pub use protocol::{FieldKey, FlashGeometry, context_from_url};
pub use queue::RequestQueue;
pub use runtime::{
    ExportReport, ImportReport, Runtime, SessionHandle, SessionStatus, SlotReport, spawn,
};
pub use sink::{ExportSink, FileSink};
pub use state::{Action, SessionPhase, Session};
pub use transport::{
    ConnectionId, DeviceInfo, PRODUCT_ID, StreamTarget, StreamTransport, Transport, VENDOR_ID,
};
