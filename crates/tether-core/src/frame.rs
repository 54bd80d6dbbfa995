//! Length-prefixed framing over the raw byte stream.
//!
//! Wire layout: `[length: u32 LE][magic: "VT01"][payload: length bytes]`.
//! The codec knows nothing about encryption or message semantics — it only
//! cuts the stream into payloads. Decoding is resumable: no bytes are
//! consumed until a complete frame is buffered, so partial TCP deliveries
//! are handled by the `FramedRead` driver feeding more data in.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

/// Magic bytes following the length field of every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"VT01";

/// Bytes of framing overhead preceding each payload.
pub const FRAME_HEADER_LEN: usize = 8;

/// Default maximum payload size accepted from the peer.
pub const DEFAULT_MAX_FRAME: usize = 1024 * 1024;

/// Codec for the `[length][magic][payload]` frame format.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame: usize,
}

impl FrameCodec {
    /// Create a codec enforcing the given maximum payload size.
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_frame {
            // Fatal: either the peer is broken or we lost frame alignment.
            return Err(ProtocolError::OversizeFrame {
                len,
                max: self.max_frame,
            });
        }

        let magic = [src[4], src[5], src[6], src[7]];
        if magic != FRAME_MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }

        if src.len() < FRAME_HEADER_LEN + len {
            src.reserve(FRAME_HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if payload.len() > self.max_frame {
            return Err(ProtocolError::OversizeFrame {
                len: payload.len(),
                max: self.max_frame,
            });
        }

        dst.reserve(FRAME_HEADER_LEN + payload.len());
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(&FRAME_MAGIC);
        dst.put_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn encode_frame(payload: &[u8]) -> BytesMut {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(Bytes::copy_from_slice(payload), &mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn decode_waits_for_header() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&[3u8, 0, 0][..]);
        assert_matches!(codec.decode(&mut buf), Ok(None));
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn decode_waits_for_full_payload() {
        let mut codec = FrameCodec::default();
        let mut buf = encode_frame(b"hello");
        let _ = buf.split_off(buf.len() - 2);
        assert_matches!(codec.decode(&mut buf), Ok(None));
        // Nothing consumed while incomplete.
        assert_eq!(buf.len(), FRAME_HEADER_LEN + 3);
    }

    #[test]
    fn decode_across_partial_feeds() {
        let mut codec = FrameCodec::default();
        let full = encode_frame(b"split me");
        let mut buf = BytesMut::new();
        for chunk in full.chunks(3) {
            buf.extend_from_slice(chunk);
            if buf.len() < full.len() {
                assert_matches!(codec.decode(&mut buf), Ok(None));
            }
        }
        let payload = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&payload[..], b"split me");
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_two_frames_back_to_back() {
        let mut codec = FrameCodec::default();
        let mut buf = encode_frame(b"one");
        buf.extend_from_slice(&encode_frame(b"two"));
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"one");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"two");
        assert_matches!(codec.decode(&mut buf), Ok(None));
    }

    #[test]
    fn oversize_frame_rejected() {
        let mut codec = FrameCodec::new(16);
        let mut buf = BytesMut::new();
        buf.put_u32_le(17);
        buf.put_slice(&FRAME_MAGIC);
        assert_matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizeFrame { len: 17, max: 16 })
        );
    }

    #[test]
    fn oversize_encode_rejected() {
        let mut codec = FrameCodec::new(4);
        let mut buf = BytesMut::new();
        assert_matches!(
            codec.encode(Bytes::from_static(b"toolong"), &mut buf),
            Err(ProtocolError::OversizeFrame { .. })
        );
    }

    #[test]
    fn bad_magic_rejected() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        buf.put_u32_le(0);
        buf.put_slice(b"XXXX");
        assert_matches!(codec.decode(&mut buf), Err(ProtocolError::BadMagic(_)));
    }

    #[test]
    fn empty_payload_round_trips() {
        let mut codec = FrameCodec::default();
        let mut buf = encode_frame(b"");
        let payload = codec.decode(&mut buf).unwrap().unwrap();
        assert!(payload.is_empty());
    }

    proptest! {
        #[test]
        fn round_trip(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let mut codec = FrameCodec::default();
            let mut buf = BytesMut::new();
            codec.encode(Bytes::from(payload.clone()), &mut buf).unwrap();
            let decoded = codec.decode(&mut buf).unwrap().unwrap();
            prop_assert_eq!(&decoded[..], &payload[..]);
            prop_assert!(buf.is_empty());
        }
    }
}
