//! `tokio_util` codec that cuts a byte stream into 64-byte frames.
//!
//! Used by stream-backed transports (device emulators over TCP, pipes in
//! tests). Real HID backends read whole reports and use
//! [`Frame::from_report`] instead.

use bytes::{Buf, BytesMut};

use crate::error::MpError;
use crate::frame::{FRAME_SIZE, Frame};

#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl tokio_util::codec::Decoder for FrameCodec {
    type Item = Frame;
    type Error = MpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_SIZE {
            src.reserve(FRAME_SIZE - src.len());
            return Ok(None);
        }
        let mut report = [0u8; FRAME_SIZE];
        report.copy_from_slice(&src[..FRAME_SIZE]);
        src.advance(FRAME_SIZE);
        Frame::from_report(&report).map(Some)
    }
}

impl tokio_util::codec::Encoder<Frame> for FrameCodec {
    type Error = MpError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Command;
    use tokio_util::codec::{Decoder, Encoder};

    #[test]
    fn partial_input_waits() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&[0u8; 10][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn two_frames_back_to_back() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        codec.encode(Frame::command(Command::Version), &mut buf).unwrap();
        codec
            .encode(Frame::encode(Command::Context, Some(b"a.b\0")).unwrap(), &mut buf)
            .unwrap();
        assert_eq!(buf.len(), 2 * FRAME_SIZE);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.command_id().unwrap(), Command::Version);
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.payload(), b"a.b\0");
        assert!(buf.is_empty());
    }

    #[test]
    fn bogus_length_byte_is_an_error() {
        let mut codec = FrameCodec;
        let mut raw = [0u8; FRAME_SIZE];
        raw[0] = 63;
        let mut buf = BytesMut::from(&raw[..]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
