//! Bulk transfers: flash/EEPROM export, image import, slot upload and the
//! one-shot maintenance commands.
//!
//! At most one runs at a time and never alongside an authentication
//! exchange. Each step is issued from the acknowledgement of the previous
//! one.

pub mod export;
pub mod import;
pub mod media;

pub use export::{ExportKind, ExportProgress, ExportSession};
pub use import::{ImportSession, ImportTarget};
pub use media::{MediaUpload, SLOT_CHUNK_SIZE};

use bytes::Bytes;
use std::fmt;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::{MpError, Result};
use crate::frame::Frame;
use crate::message::{Command, STATUS_OK};
use crate::protocol::{DEFAULT_PAGE_SIZE, EEPROM_SIZE};
use crate::state::{Action, Owner, Session};

/// Single-frame device maintenance commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Maintenance {
    EraseEeprom,
    EraseFlash,
    EraseSmartcard,
    ResetCard,
}

impl Maintenance {
    pub fn command(self) -> Command {
        match self {
            Maintenance::EraseEeprom => Command::EraseEeprom,
            Maintenance::EraseFlash => Command::EraseFlash,
            Maintenance::EraseSmartcard => Command::EraseSmartcard,
            Maintenance::ResetCard => Command::ResetCard,
        }
    }
}

impl fmt::Display for Maintenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Maintenance::EraseEeprom => write!(f, "erase eeprom"),
            Maintenance::EraseFlash => write!(f, "erase flash"),
            Maintenance::EraseSmartcard => write!(f, "erase smartcard"),
            Maintenance::ResetCard => write!(f, "reset card"),
        }
    }
}

/// The bulk activity currently owning the device.
#[derive(Debug)]
pub enum Transfer {
    Export(ExportSession),
    Import(ImportSession),
    Upload(MediaUpload),
    Maintenance(Maintenance),
}

impl fmt::Display for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transfer::Export(e) => write!(f, "{} export", e.kind()),
            Transfer::Import(i) => write!(f, "{} import", i.target()),
            Transfer::Upload(_) => write!(f, "slot upload"),
            Transfer::Maintenance(m) => write!(f, "{m}"),
        }
    }
}

/// How a bulk activity ended.
#[derive(Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// `data` has the full export size; `received` bytes of it came from
    /// the device.
    Exported {
        kind: ExportKind,
        data: Vec<u8>,
        received: usize,
    },
    Imported {
        target: ImportTarget,
        bytes: usize,
    },
    SlotWritten {
        slot: u8,
        bytes: usize,
    },
    Maintenance(Maintenance),
}

impl Session {
    // ── Starting ─────────────────────────────────────────────────

    /// Dump flash or EEPROM. Flash needs the chip identified first.
    pub fn start_export(&mut self, kind: ExportKind, now: Instant) -> Result<()> {
        self.ensure_bulk_free()?;
        let size = match kind {
            ExportKind::Eeprom => EEPROM_SIZE,
            ExportKind::Flash => {
                let geometry = match (self.geometry, self.chip_id) {
                    (Some(geometry), _) => geometry,
                    (None, Some(chip)) => return Err(MpError::UnknownChip(chip)),
                    (None, None) => return Err(MpError::NoDevice),
                };
                geometry.export_size(self.config.export_everything)
            }
        };
        info!("exporting {size} bytes of {kind}");
        self.begin_transfer(
            Transfer::Export(ExportSession::new(kind, size)),
            kind.start_command(),
            None,
            now,
        )
    }

    /// Write `data` to flash, EEPROM or the media partition.
    pub fn start_import(&mut self, target: ImportTarget, data: Bytes, now: Instant) -> Result<()> {
        self.ensure_bulk_free()?;
        let page_size = self
            .geometry
            .map_or(DEFAULT_PAGE_SIZE, |g| g.page_size);
        info!("importing {} bytes into {target}", data.len());
        self.begin_transfer(
            Transfer::Import(ImportSession::new(target, data, page_size)),
            target.begin_command(),
            None,
            now,
        )
    }

    /// Store `data` in a freshly allocated slot.
    pub fn start_slot_upload(&mut self, data: Bytes, now: Instant) -> Result<()> {
        self.ensure_bulk_free()?;
        let upload = MediaUpload::new(data)?;
        let payload = upload.allocate_payload();
        info!("allocating a slot for {} bytes", upload.total());
        self.begin_transfer(
            Transfer::Upload(upload),
            Command::AllocateSlot,
            Some(&payload),
            now,
        )
    }

    pub fn start_maintenance(&mut self, op: Maintenance, now: Instant) -> Result<()> {
        self.ensure_bulk_free()?;
        info!("{op}");
        self.begin_transfer(Transfer::Maintenance(op), op.command(), None, now)
    }

    fn ensure_bulk_free(&self) -> Result<()> {
        if self.transfer.is_some() {
            return Err(MpError::Busy("another transfer is running"));
        }
        if self.queue.active().is_some() {
            return Err(MpError::Busy("a credential request is in progress"));
        }
        Ok(())
    }

    fn begin_transfer(
        &mut self,
        transfer: Transfer,
        command: Command,
        payload: Option<&[u8]>,
        now: Instant,
    ) -> Result<()> {
        self.transfer = Some(transfer);
        if let Err(e) = self.send(command, payload, Owner::Transfer, now) {
            self.transfer = None;
            return Err(e);
        }
        Ok(())
    }

    /// End the running transfer, report the result and let queued
    /// credential requests run.
    fn finish_transfer(&mut self, result: Result<TransferOutcome>, now: Instant) {
        self.transfer = None;
        match &result {
            Ok(_) => debug!("transfer finished"),
            Err(e) => warn!("{e}"),
        }
        self.push_action(Action::Transfer(result));
        self.activate_next(now);
    }

    fn abort_transfer(&mut self, reason: String, now: Instant) {
        self.finish_transfer(Err(MpError::TransferAborted(reason)), now);
    }

    // ── Replies ──────────────────────────────────────────────────

    pub(crate) fn on_transfer_reply(&mut self, command: Command, frame: &Frame, now: Instant) {
        match &self.transfer {
            Some(Transfer::Export(_)) => self.on_export_reply(command, frame, now),
            Some(Transfer::Import(_)) => self.on_import_reply(command, frame, now),
            Some(Transfer::Upload(_)) => self.on_upload_reply(command, frame, now),
            Some(Transfer::Maintenance(op)) => {
                let op = *op;
                self.on_maintenance_reply(op, command, frame, now)
            }
            None => match command {
                Command::ExportFlashEnd | Command::ExportEepromEnd => {
                    warn!("{command} with no active export")
                }
                _ => debug!("{command} with no active transfer, ignored"),
            },
        }
    }

    fn on_export_reply(&mut self, command: Command, frame: &Frame, now: Instant) {
        let Some(Transfer::Export(export)) = self.transfer.as_mut() else {
            return;
        };
        let kind = export.kind();

        if command == kind.start_command() {
            if frame.status() == STATUS_OK {
                // restart from the first packet
                self.send_or_abort(kind.data_command(), Some(&[0]), now);
            } else {
                self.abort_transfer(format!("device refused {kind} export"), now);
            }
        } else if command == kind.data_command() {
            match export.accept(frame.payload()) {
                ExportProgress::More => self.send_or_abort(kind.data_command(), Some(&[1]), now),
                ExportProgress::Complete => self.complete_export(now),
            }
        } else if command == kind.end_command() {
            if export.received() < export.size() {
                warn!(
                    "{kind} export ended after {} of {} bytes",
                    export.received(),
                    export.size()
                );
            }
            self.complete_export(now);
        } else {
            debug!("{command} during {kind} export, ignored");
        }
    }

    fn complete_export(&mut self, now: Instant) {
        let Some(Transfer::Export(export)) = self.transfer.take() else {
            return;
        };
        let kind = export.kind();
        let received = export.received();
        info!("{kind} export complete, {received} bytes");
        self.finish_transfer(
            Ok(TransferOutcome::Exported {
                kind,
                received,
                data: export.into_data(),
            }),
            now,
        );
    }

    fn on_import_reply(&mut self, command: Command, frame: &Frame, now: Instant) {
        let Some(Transfer::Import(import)) = self.transfer.as_mut() else {
            return;
        };
        let target = import.target();

        if command == target.end_command() {
            let bytes = import.total();
            info!("{target} import finished, {bytes} bytes");
            self.finish_transfer(Ok(TransferOutcome::Imported { target, bytes }), now);
        } else if command == target.begin_command() || command == target.data_command() {
            if import.is_ending() {
                debug!("late {command} during {target} import end, ignored");
                return;
            }
            if frame.status() != STATUS_OK {
                let remaining = import.remaining();
                self.abort_transfer(
                    format!("device refused {target} import with {remaining} bytes left"),
                    now,
                );
                return;
            }
            match import.next_chunk() {
                Some(chunk) => self.send_or_abort(target.data_command(), Some(&chunk), now),
                None => {
                    import.mark_ending();
                    self.send_or_abort(target.end_command(), None, now);
                }
            }
        } else {
            debug!("{command} during {target} import, ignored");
        }
    }

    fn on_upload_reply(&mut self, command: Command, frame: &Frame, now: Instant) {
        let Some(Transfer::Upload(upload)) = self.transfer.as_mut() else {
            return;
        };

        match command {
            Command::AllocateSlot => {
                if upload.slot().is_some() {
                    debug!("duplicate slot allocation reply ignored");
                    return;
                }
                let slot = frame.status();
                if slot == 0 {
                    self.abort_transfer("device could not allocate a slot".into(), now);
                    return;
                }
                debug!("allocated slot {slot}");
                upload.set_slot(slot);
            }
            Command::WriteSlot => {
                if frame.status() != STATUS_OK {
                    let remaining = upload.remaining();
                    self.abort_transfer(
                        format!("slot write refused with {remaining} bytes left"),
                        now,
                    );
                    return;
                }
            }
            _ => {
                debug!("{command} during slot upload, ignored");
                return;
            }
        }

        match upload.next_frame_payload() {
            Some(payload) => self.send_or_abort(Command::WriteSlot, Some(&payload), now),
            None => {
                let slot = upload.slot().unwrap_or_default();
                let bytes = upload.total();
                info!("wrote {bytes} bytes to slot {slot}");
                self.finish_transfer(Ok(TransferOutcome::SlotWritten { slot, bytes }), now);
            }
        }
    }

    fn on_maintenance_reply(&mut self, op: Maintenance, command: Command, frame: &Frame, now: Instant) {
        if command != op.command() {
            debug!("{command} during {op}, ignored");
            return;
        }
        if frame.status() == STATUS_OK {
            info!("{op} succeeded");
            self.finish_transfer(Ok(TransferOutcome::Maintenance(op)), now);
        } else {
            self.abort_transfer(format!("{op} failed"), now);
        }
    }

    fn send_or_abort(&mut self, command: Command, payload: Option<&[u8]>, now: Instant) {
        if let Err(e) = self.send(command, payload, Owner::Transfer, now) {
            self.abort_transfer(e.to_string(), now);
        }
    }
}
