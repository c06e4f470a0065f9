//! Flash chip geometry and export sizing.
//!
//! The device reports a chip id in its VERSION reply. Supported parts:
//!
//! ```text
//! id   page  pages  pages/sector   size
//!  1    264    512     128          1 Mbit (AT45DB011D)
//!  2    264   1024     128          2 Mbit (AT45DB021E)
//!  4    264   2048     256          4 Mbit (AT45DB041E)
//!  8    264   4096     256          8 Mbit (AT45DB081E)
//! 16    528   4096     256         16 Mbit (AT45DB161E)
//! 32    528   8192     128         32 Mbit (AT45DB321E)
//! ```

use crate::error::{MpError, Result};

/// First page of the media partition inside sector 0.
pub const MEDIA_START_PAGE: usize = 8;

/// Size of the device EEPROM in bytes.
pub const EEPROM_SIZE: usize = 1024;

/// Page size assumed before the chip has been identified.
pub const DEFAULT_PAGE_SIZE: usize = 264;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashGeometry {
    pub page_size: usize,
    pub page_count: usize,
    pub pages_per_sector: usize,
}

impl FlashGeometry {
    /// Look up the geometry for a device-reported chip id.
    pub fn for_chip(chip_id: u8) -> Result<Self> {
        let (page_size, page_count, pages_per_sector) = match chip_id {
            1 => (264, 512, 128),
            2 => (264, 1024, 128),
            4 => (264, 2048, 256),
            8 => (264, 4096, 256),
            16 => (528, 4096, 256),
            32 => (528, 8192, 128),
            other => return Err(MpError::UnknownChip(other)),
        };
        Ok(Self {
            page_size,
            page_count,
            pages_per_sector,
        })
    }

    /// Total bytes of flash.
    pub fn capacity(&self) -> usize {
        self.page_size * self.page_count
    }

    /// Bytes reserved for the media partition in the first sector.
    pub fn media_span(&self) -> usize {
        self.page_size * (self.pages_per_sector - MEDIA_START_PAGE)
    }

    /// Size of a flash export; the media partition is skipped unless
    /// `everything` is set.
    pub fn export_size(&self, everything: bool) -> usize {
        if everything {
            self.capacity()
        } else {
            self.capacity() - self.media_span()
        }
    }
}
