//! Host-to-device upload of flash, EEPROM or media images.
//!
//! Chunks never straddle a flash page: each one is capped by the payload
//! size and by the space left in the current page.

use bytes::Bytes;
use std::fmt;

use crate::frame::MAX_PAYLOAD_SIZE;
use crate::message::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportTarget {
    Flash,
    Eeprom,
    Media,
}

impl ImportTarget {
    pub fn begin_command(self) -> Command {
        match self {
            ImportTarget::Flash => Command::ImportFlashBegin,
            ImportTarget::Eeprom => Command::ImportEepromBegin,
            ImportTarget::Media => Command::ImportMediaStart,
        }
    }

    pub fn data_command(self) -> Command {
        match self {
            ImportTarget::Flash => Command::ImportFlash,
            ImportTarget::Eeprom => Command::ImportEeprom,
            ImportTarget::Media => Command::ImportMedia,
        }
    }

    pub fn end_command(self) -> Command {
        match self {
            ImportTarget::Flash => Command::ImportFlashEnd,
            ImportTarget::Eeprom => Command::ImportEepromEnd,
            ImportTarget::Media => Command::ImportMediaEnd,
        }
    }
}

impl fmt::Display for ImportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportTarget::Flash => write!(f, "flash"),
            ImportTarget::Eeprom => write!(f, "eeprom"),
            ImportTarget::Media => write!(f, "media"),
        }
    }
}

#[derive(Debug)]
pub struct ImportSession {
    target: ImportTarget,
    data: Bytes,
    offset: usize,
    page_size: usize,
    page_space: usize,
    ending: bool,
}

impl ImportSession {
    pub fn new(target: ImportTarget, data: Bytes, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        Self {
            target,
            data,
            offset: 0,
            page_size,
            page_space: page_size,
            ending: false,
        }
    }

    pub fn target(&self) -> ImportTarget {
        self.target
    }

    pub fn total(&self) -> usize {
        self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Whether the END command has been issued.
    pub fn is_ending(&self) -> bool {
        self.ending
    }

    pub fn mark_ending(&mut self) {
        self.ending = true;
    }

    /// Cut the next chunk, or `None` once everything has been handed out.
    pub fn next_chunk(&mut self) -> Option<Bytes> {
        let size = self.remaining().min(MAX_PAYLOAD_SIZE).min(self.page_space);
        if size == 0 {
            return None;
        }
        let chunk = self.data.slice(self.offset..self.offset + size);
        self.offset += size;
        self.page_space -= size;
        if self.page_space == 0 {
            self.page_space = self.page_size;
        }
        Some(chunk)
    }
}
