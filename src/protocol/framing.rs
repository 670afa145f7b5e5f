//! Length-prefixed framing for byte-stream transports
//!
//! Every encoded message travels as `[u32 big-endian length][payload]`. A single
//! read may hold zero, one or many frames, and a frame may span many reads, so
//! incoming bytes accumulate in a buffer that is drained one complete frame at a time.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::constants::{DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_LEN};
use crate::error::{Result, RoomcastError};

/// Prefix `payload` with its length
pub fn pack(payload: &[u8]) -> Result<Bytes> {
    let len = u32::try_from(payload.len()).map_err(|_| RoomcastError::FrameTooLarge(payload.len()))?;
    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.put_u32(len);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Extract every complete frame from `buffer`, leaving any partial frame in place
pub fn unpack(buffer: &mut BytesMut) -> Vec<Bytes> {
    let mut payloads = Vec::new();
    while let Some(len) = peek_len(buffer) {
        if buffer.len() < FRAME_HEADER_LEN + len {
            break;
        }
        payloads.push(split_frame(buffer, len));
    }
    payloads
}

fn peek_len(buffer: &BytesMut) -> Option<usize> {
    if buffer.len() < FRAME_HEADER_LEN {
        return None;
    }
    let mut header = &buffer[..FRAME_HEADER_LEN];
    Some(header.get_u32() as usize)
}

fn split_frame(buffer: &mut BytesMut, len: usize) -> Bytes {
    buffer.advance(FRAME_HEADER_LEN);
    buffer.split_to(len).freeze()
}

/// `tokio_util` codec speaking the same framing, with an upper bound on frame size.
///
/// A length prefix above the bound means the stream is out of sync; the error ends the connection.
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    max_frame_size: usize,
}

impl PacketCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for PacketCodec {
    type Item = Bytes;
    type Error = RoomcastError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let len = match peek_len(src) {
            Some(len) => len,
            None => return Ok(None),
        };
        if len > self.max_frame_size {
            return Err(RoomcastError::FrameTooLarge(len));
        }

        let total = FRAME_HEADER_LEN + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        Ok(Some(split_frame(src, len)))
    }
}

impl Encoder<Bytes> for PacketCodec {
    type Error = RoomcastError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_frame_size || u32::try_from(item.len()).is_err() {
            return Err(RoomcastError::FrameTooLarge(item.len()));
        }
        dst.reserve(FRAME_HEADER_LEN + item.len());
        dst.put_u32(item.len() as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads() -> Vec<Vec<u8>> {
        vec![
            b"[\"a\"]".to_vec(),
            Vec::new(),
            br#"["chat",{"text":"hi"},"req-1"]"#.to_vec(),
            vec![0u8; 700],
            b"x".to_vec(),
        ]
    }

    fn stream() -> Vec<u8> {
        let mut all = Vec::new();
        for p in payloads() {
            all.extend_from_slice(&pack(&p).unwrap());
        }
        all
    }

    fn feed_in_chunks(data: &[u8], chunk: usize) -> Vec<Vec<u8>> {
        let mut buffer = BytesMut::new();
        let mut out = Vec::new();
        for piece in data.chunks(chunk) {
            buffer.extend_from_slice(piece);
            out.extend(unpack(&mut buffer).into_iter().map(|b| b.to_vec()));
        }
        assert!(buffer.is_empty());
        out
    }

    #[test]
    fn test_pack_header() {
        let frame = pack(b"hello").unwrap();
        assert_eq!(&frame[..4], &[0, 0, 0, 5]);
        assert_eq!(&frame[4..], b"hello");
    }

    #[test]
    fn test_unpack_any_chunking() {
        let data = stream();
        for chunk in [1, 2, 3, 4, 5, 7, 64, 1000, data.len()] {
            assert_eq!(feed_in_chunks(&data, chunk), payloads(), "chunk size {}", chunk);
        }
    }

    #[test]
    fn test_unpack_keeps_partial_frame() {
        let mut buffer = BytesMut::from(&pack(b"abcdef").unwrap()[..7]);
        assert!(unpack(&mut buffer).is_empty());
        assert_eq!(buffer.len(), 7);

        buffer.extend_from_slice(b"ef");
        buffer.extend_from_slice(&[0, 0]);
        assert_eq!(unpack(&mut buffer), vec![Bytes::from_static(b"abcdef")]);
        assert_eq!(&buffer[..], &[0, 0]);
    }

    #[test]
    fn test_codec_matches_unpack() {
        let data = stream();
        let mut codec = PacketCodec::default();
        let mut buffer = BytesMut::new();
        let mut out = Vec::new();
        for byte in data {
            buffer.put_u8(byte);
            while let Some(frame) = codec.decode(&mut buffer).unwrap() {
                out.push(frame.to_vec());
            }
        }
        assert_eq!(out, payloads());
    }

    #[test]
    fn test_codec_encode_is_pack() {
        let mut codec = PacketCodec::default();
        let mut dst = BytesMut::new();
        codec.encode(Bytes::from_static(b"hello"), &mut dst).unwrap();
        assert_eq!(dst.freeze(), pack(b"hello").unwrap());
    }

    #[test]
    fn test_codec_rejects_oversized_prefix() {
        let mut codec = PacketCodec::new(16);
        assert_eq!(codec.max_frame_size(), 16);
        assert_eq!(PacketCodec::default().max_frame_size(), DEFAULT_MAX_FRAME_SIZE);
        let mut buffer = BytesMut::from(&[0u8, 0, 1, 0][..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(RoomcastError::FrameTooLarge(256))
        ));

        let mut dst = BytesMut::new();
        assert!(codec.encode(Bytes::from(vec![0u8; 17]), &mut dst).is_err());
    }
}
