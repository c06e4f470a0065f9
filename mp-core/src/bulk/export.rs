//! Device-to-host dump of flash or EEPROM.

use std::fmt;

use tracing::warn;

use crate::message::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Flash,
    Eeprom,
}

impl ExportKind {
    pub fn start_command(self) -> Command {
        match self {
            ExportKind::Flash => Command::ExportFlashStart,
            ExportKind::Eeprom => Command::ExportEepromStart,
        }
    }

    pub fn data_command(self) -> Command {
        match self {
            ExportKind::Flash => Command::ExportFlash,
            ExportKind::Eeprom => Command::ExportEeprom,
        }
    }

    pub fn end_command(self) -> Command {
        match self {
            ExportKind::Flash => Command::ExportFlashEnd,
            ExportKind::Eeprom => Command::ExportEepromEnd,
        }
    }
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportKind::Flash => write!(f, "flash"),
            ExportKind::Eeprom => write!(f, "eeprom"),
        }
    }
}

/// What the caller should do after a data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportProgress {
    /// Ask for the next packet.
    More,
    /// The buffer is done; flush it.
    Complete,
}

#[derive(Debug)]
pub struct ExportSession {
    kind: ExportKind,
    buffer: Vec<u8>,
    offset: usize,
    written: usize,
}

impl ExportSession {
    pub fn new(kind: ExportKind, size: usize) -> Self {
        Self {
            kind,
            buffer: vec![0; size],
            offset: 0,
            written: 0,
        }
    }

    pub fn kind(&self) -> ExportKind {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes accounted for so far. May exceed `size` after an overflow.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Store one data packet.
    ///
    /// A packet that would run past the buffer is not written; the offset
    /// still moves by its length and the export is declared complete with
    /// whatever fitted before it.
    pub fn accept(&mut self, packet: &[u8]) -> ExportProgress {
        let end = self.offset + packet.len();
        if end > self.buffer.len() {
            warn!(
                "{} export packet overflows buffer by {} bytes",
                self.kind,
                end - self.buffer.len()
            );
            self.offset = end;
            return ExportProgress::Complete;
        }
        self.buffer[self.offset..end].copy_from_slice(packet);
        self.offset = end;
        self.written = end;
        if end == self.buffer.len() {
            ExportProgress::Complete
        } else {
            ExportProgress::More
        }
    }

    /// Bytes actually stored in the buffer.
    pub fn received(&self) -> usize {
        self.written
    }

    pub fn into_data(self) -> Vec<u8> {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_full_completes() {
        let mut export = ExportSession::new(ExportKind::Eeprom, 124);
        assert_eq!(export.accept(&[1; 62]), ExportProgress::More);
        assert_eq!(export.accept(&[2; 62]), ExportProgress::Complete);
        assert_eq!(export.offset(), 124);
        let data = export.into_data();
        assert_eq!(&data[..62], &[1; 62]);
        assert_eq!(&data[62..], &[2; 62]);
    }

    #[test]
    fn overflow_advances_without_writing() {
        let mut export = ExportSession::new(ExportKind::Flash, 100);
        assert_eq!(export.accept(&[7; 62]), ExportProgress::More);
        assert_eq!(export.accept(&[9; 62]), ExportProgress::Complete);
        assert_eq!(export.offset(), 124);
        assert_eq!(export.received(), 62);

        let data = export.into_data();
        assert_eq!(data.len(), 100);
        assert!(data[..62].iter().all(|&b| b == 7));
        assert!(data[62..].iter().all(|&b| b == 0));
    }

    #[test]
    fn commands_per_kind() {
        assert_eq!(ExportKind::Flash.start_command(), Command::ExportFlashStart);
        assert_eq!(ExportKind::Eeprom.data_command(), Command::ExportEeprom);
        assert_eq!(ExportKind::Eeprom.end_command(), Command::ExportEepromEnd);
    }
}
