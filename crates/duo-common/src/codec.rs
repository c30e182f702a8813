//! `tokio_util` codec for [`Frame`]s.
//!
//! Wrap any byte stream with `Framed::new(stream, FrameCodec)` to get a
//! `Stream<Item = Result<Frame, FrameError>>` plus a `Sink<Frame>`. The
//! stream yields `None` only when the peer closes on a frame boundary; a close
//! in the middle of a frame is reported as an error.

use crate::frame::{Frame, FrameError, HEADER_LEN, MAX_FRAME_LEN};
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Length-prefixed TLV codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Creates a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut prefix = [0u8; HEADER_LEN];
        prefix.copy_from_slice(&src[..HEADER_LEN]);
        let len = u32::from_be_bytes(prefix) as usize;

        if len == 0 {
            return Err(FrameError::TooShort {
                expected: 1,
                actual: 0,
            });
        }
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge {
                max: MAX_FRAME_LEN,
                actual: len,
            });
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(len);
        Frame::parse(&body).map(Some)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        dst.reserve(HEADER_LEN + frame.wire_len());
        frame.write_to(dst)
    }
}
