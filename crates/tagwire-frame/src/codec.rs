use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::error::{FrameError, Result};

/// Default total frame size (tag field + length field + body).
pub const DEFAULT_PACKET_SIZE: usize = 1024;

/// Default width reserved for each of the tag and length fields.
pub const DEFAULT_FIELD_WIDTH: usize = 10;

/// Bytes of each field that carry a value; the rest is zero padding.
pub const FIELD_VALUE_SIZE: usize = 4;

/// Frame layout shared by both ends of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    /// Largest frame accepted, fields included. Default: 1024.
    pub packet_size: usize,
    /// Bytes reserved for the tag field. Default: 10.
    pub header_field_width: usize,
    /// Bytes reserved for the length field. Default: 10.
    pub length_field_width: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            header_field_width: DEFAULT_FIELD_WIDTH,
            length_field_width: DEFAULT_FIELD_WIDTH,
        }
    }
}

impl FrameConfig {
    /// Bytes in front of the body.
    pub fn prefix_size(&self) -> usize {
        self.header_field_width + self.length_field_width
    }

    /// Largest body a frame may carry.
    pub fn max_body_size(&self) -> usize {
        self.packet_size.saturating_sub(self.prefix_size())
    }

    /// Check that the layout can carry frames at all.
    pub fn validate(&self) -> Result<()> {
        if self.header_field_width < FIELD_VALUE_SIZE {
            return Err(FrameError::InvalidConfig(format!(
                "header field width {} is below {FIELD_VALUE_SIZE} bytes",
                self.header_field_width
            )));
        }
        if self.length_field_width < FIELD_VALUE_SIZE {
            return Err(FrameError::InvalidConfig(format!(
                "length field width {} is below {FIELD_VALUE_SIZE} bytes",
                self.length_field_width
            )));
        }
        if self.packet_size <= self.prefix_size() {
            return Err(FrameError::InvalidConfig(format!(
                "packet size {} leaves no room for a body after {} bytes of fields",
                self.packet_size,
                self.prefix_size()
            )));
        }
        if self.packet_size > i32::MAX as usize {
            return Err(FrameError::InvalidConfig(format!(
                "packet size {} exceeds {}",
                self.packet_size,
                i32::MAX
            )));
        }
        Ok(())
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type used for dispatch.
    pub tag: u32,
    /// The frame body.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(tag: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }
}

/// Encodes and decodes tag/length frames.
///
/// Wire format (default widths):
/// ```text
/// ┌────────────────────┬────────────────────┬──────────────────┐
/// │ Tag (10B)          │ Length (10B)       │ Body             │
/// │ u32 LE + 6B zeroes │ i32 LE + 6B zeroes │ (Length bytes)   │
/// └────────────────────┴────────────────────┴──────────────────┘
/// ```
///
/// Padding bytes are written as zero and ignored when decoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    config: FrameConfig,
}

impl FrameCodec {
    /// Create a codec for a validated layout.
    pub fn new(config: FrameConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The frame layout.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Append one encoded frame to `dst`.
    pub fn encode_frame(&self, tag: u32, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
        let max = self.config.max_body_size();
        if payload.len() > max {
            return Err(FrameError::FrameTooLarge {
                size: payload.len(),
                max,
            });
        }
        let length = i32::try_from(payload.len()).map_err(|_| FrameError::FrameTooLarge {
            size: payload.len(),
            max,
        })?;

        dst.reserve(self.config.prefix_size() + payload.len());
        dst.put_u32_le(tag);
        dst.put_bytes(0, self.config.header_field_width - FIELD_VALUE_SIZE);
        dst.put_i32_le(length);
        dst.put_bytes(0, self.config.length_field_width - FIELD_VALUE_SIZE);
        dst.put_slice(payload);
        Ok(())
    }

    /// Encode one frame into a fresh buffer.
    pub fn encode_to_bytes(&self, tag: u32, payload: &[u8]) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(self.config.prefix_size() + payload.len());
        self.encode_frame(tag, payload, &mut dst)?;
        Ok(dst.freeze())
    }

    /// Read the tag from the start of `buf`.
    pub fn decode_header(&self, buf: &[u8]) -> Result<u32> {
        let mut field = field_at(buf, 0)?;
        Ok(field.get_u32_le())
    }

    /// Read the body length that follows the tag field.
    pub fn decode_length(&self, buf: &[u8]) -> Result<i32> {
        let mut field = field_at(buf, self.config.header_field_width)?;
        Ok(field.get_i32_le())
    }

    /// The `length` body bytes that follow both fields.
    pub fn decode_body<'b>(&self, buf: &'b [u8], length: i32) -> Result<&'b [u8]> {
        let length = self.check_length(length)?;
        let start = self.config.prefix_size();
        let end = start + length;
        if buf.len() < end {
            return Err(FrameError::Truncated {
                needed: end,
                available: buf.len(),
            });
        }
        Ok(&buf[start..end])
    }

    /// Take the next complete frame off the front of `src`.
    ///
    /// Returns `Ok(None)` if `src` doesn't hold a complete frame yet, after
    /// reserving room for the missing bytes. On success the frame bytes are
    /// consumed from `src`.
    pub fn decode_frame(&self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let prefix = self.config.prefix_size();
        if src.len() < prefix {
            src.reserve(prefix - src.len());
            return Ok(None);
        }

        let tag = self.decode_header(src)?;
        let length = self.check_length(self.decode_length(src)?)?;

        let total = prefix + length;
        if src.len() < total {
            trace!(tag, length, buffered = src.len(), "waiting for frame body");
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(prefix);
        let payload = src.split_to(length).freeze();

        Ok(Some(Frame { tag, payload }))
    }

    fn check_length(&self, length: i32) -> Result<usize> {
        let length = usize::try_from(length).map_err(|_| FrameError::InvalidLength(length.into()))?;
        let max = self.config.max_body_size();
        if length > max {
            return Err(FrameError::FrameTooLarge { size: length, max });
        }
        Ok(length)
    }
}

fn field_at(buf: &[u8], offset: usize) -> Result<&[u8]> {
    let end = offset + FIELD_VALUE_SIZE;
    if buf.len() < end {
        return Err(FrameError::Truncated {
            needed: end,
            available: buf.len(),
        });
    }
    Ok(&buf[offset..end])
}
