//! `tokio_util::codec` integration for [`FrameCodec`].

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{Frame, FrameCodec};
use crate::error::FrameError;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        self.decode_frame(src)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        match self.decode_frame(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        self.encode_frame(frame.tag, &frame.payload, dst)
    }
}

impl<'a> Encoder<(u32, &'a [u8])> for FrameCodec {
    type Error = FrameError;

    fn encode(
        &mut self,
        (tag, payload): (u32, &'a [u8]),
        dst: &mut BytesMut,
    ) -> Result<(), FrameError> {
        self.encode_frame(tag, payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[tokio::test]
    async fn test_framed_roundtrip() {
        let mut wire = Vec::new();
        {
            let mut sink = FramedWrite::new(&mut wire, FrameCodec::default());
            sink.send(Frame::new(1, &b"one"[..])).await.unwrap();
            sink.send(Frame::new(2, &b""[..])).await.unwrap();
            sink.send(Frame::new(u32::MAX, &b"three"[..])).await.unwrap();
        }

        let mut stream = FramedRead::new(wire.as_slice(), FrameCodec::default());
        let mut frames = Vec::new();
        while let Some(frame) = stream.next().await {
            frames.push(frame.expect("frame should decode"));
        }

        assert_eq!(
            frames,
            vec![
                Frame::new(1, &b"one"[..]),
                Frame::new(2, &b""[..]),
                Frame::new(u32::MAX, &b"three"[..]),
            ]
        );
    }

    #[test]
    fn test_decoder_byte_by_byte() {
        let mut codec = FrameCodec::default();
        let wire = codec.encode_to_bytes(5, b"trickle").unwrap();

        let mut buf = BytesMut::new();
        let mut decoded = None;
        for (i, byte) in wire.iter().enumerate() {
            buf.extend_from_slice(&[*byte]);
            let result = codec.decode(&mut buf).unwrap();
            if i + 1 < wire.len() {
                assert!(result.is_none(), "frame completed early at byte {i}");
            } else {
                decoded = result;
            }
        }

        assert_eq!(decoded, Some(Frame::new(5, &b"trickle"[..])));
    }

    #[tokio::test]
    async fn test_partial_frame_at_eof() {
        let codec = FrameCodec::default();
        let wire = codec.encode_to_bytes(5, b"cut short").unwrap();

        let mut stream = FramedRead::new(&wire[..25], codec);
        let err = stream
            .next()
            .await
            .expect("stream should yield an error")
            .unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn test_tuple_encoder() {
        let mut codec = FrameCodec::default();
        let mut dst = BytesMut::new();
        codec.encode((8u32, &b"raw"[..]), &mut dst).unwrap();

        assert_eq!(
            codec.decode(&mut dst).unwrap(),
            Some(Frame::new(8, &b"raw"[..]))
        );
    }
}
