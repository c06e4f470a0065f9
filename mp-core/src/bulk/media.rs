//! Two-phase upload of an opaque blob into a device storage slot.

use bytes::Bytes;

use crate::error::{MpError, Result};
use crate::frame::MAX_PAYLOAD_SIZE;

/// Data bytes per WRITE_SLOT frame; the first payload byte is the slot id.
pub const SLOT_CHUNK_SIZE: usize = MAX_PAYLOAD_SIZE - 1;

#[derive(Debug)]
pub struct MediaUpload {
    data: Bytes,
    slot: Option<u8>,
    offset: usize,
}

impl MediaUpload {
    /// Blobs are sized with a 16-bit length on the wire.
    pub fn new(data: Bytes) -> Result<Self> {
        if data.len() > u16::MAX as usize {
            return Err(MpError::PayloadTooLarge {
                size: data.len(),
                max: u16::MAX as usize,
            });
        }
        Ok(Self {
            data,
            slot: None,
            offset: 0,
        })
    }

    /// ALLOCATE_SLOT payload: the blob length, little-endian.
    pub fn allocate_payload(&self) -> [u8; 2] {
        (self.data.len() as u16).to_le_bytes()
    }

    pub fn slot(&self) -> Option<u8> {
        self.slot
    }

    pub fn set_slot(&mut self, slot: u8) {
        self.slot = Some(slot);
    }

    pub fn total(&self) -> usize {
        self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Next WRITE_SLOT payload, or `None` when the blob is fully sent or no
    /// slot has been assigned.
    pub fn next_frame_payload(&mut self) -> Option<Vec<u8>> {
        let slot = self.slot?;
        let size = self.remaining().min(SLOT_CHUNK_SIZE);
        if size == 0 {
            return None;
        }
        let mut payload = Vec::with_capacity(size + 1);
        payload.push(slot);
        payload.extend_from_slice(&self.data[self.offset..self.offset + size]);
        self.offset += size;
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_is_little_endian() {
        let upload = MediaUpload::new(Bytes::from(vec![0u8; 0x0102])).unwrap();
        assert_eq!(upload.allocate_payload(), [0x02, 0x01]);
    }

    #[test]
    fn rejects_oversized_blob() {
        assert!(matches!(
            MediaUpload::new(Bytes::from(vec![0u8; 65_536])),
            Err(MpError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn chunks_are_prefixed_with_slot() {
        let data: Vec<u8> = (0..130u8).collect();
        let mut upload = MediaUpload::new(Bytes::from(data)).unwrap();
        assert!(upload.next_frame_payload().is_none());

        upload.set_slot(5);
        let first = upload.next_frame_payload().unwrap();
        assert_eq!(first.len(), 62);
        assert_eq!(first[0], 5);
        assert_eq!(first[1], 0);

        let second = upload.next_frame_payload().unwrap();
        assert_eq!(second.len(), 62);
        let third = upload.next_frame_payload().unwrap();
        assert_eq!(third, vec![5, 122, 123, 124, 125, 126, 127, 128, 129]);
        assert!(upload.next_frame_payload().is_none());
    }
}
