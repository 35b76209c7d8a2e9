use bytes::{Buf, BufMut};

use crate::error::{BufferError, BufferResult};

/// Width of the `i32` length prefix in front of blobs and strings.
const LENGTH_PREFIX_SIZE: usize = 4;

enum Storage<'a> {
    Owned(Vec<u8>),
    View(&'a [u8]),
}

impl Storage<'_> {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Owned(bytes) => bytes,
            Storage::View(bytes) => bytes,
        }
    }
}

/// Bounded byte buffer with independent write and read cursors.
///
/// A writable buffer owns a zeroed region of fixed capacity. A view borrows
/// bytes owned elsewhere (typically the body of a received frame) and only
/// supports reads; writes fail with [`BufferError::ReadOnlyViolation`].
///
/// There is no per-field type tag. A body written as `i32, bool, string`
/// must be read back as `i32, bool, string`.
///
/// ```
/// use tagwire_frame::PacketBuffer;
///
/// let mut out = PacketBuffer::new(64);
/// out.write_i32(21).unwrap();
/// out.write_bool(true).unwrap();
/// out.write_string("Aradhya").unwrap();
///
/// let mut input = PacketBuffer::view(out.written());
/// assert_eq!(input.read_i32().unwrap(), 21);
/// assert!(input.read_bool().unwrap());
/// assert_eq!(input.read_string().unwrap(), "Aradhya");
/// ```
pub struct PacketBuffer<'a> {
    storage: Storage<'a>,
    write_pos: usize,
    read_pos: usize,
}

impl PacketBuffer<'static> {
    /// Create a writable buffer of `capacity` zeroed bytes.
    pub fn new(capacity: usize) -> Self {
        Self::from_vec(vec![0; capacity])
    }

    /// Create a writable buffer over existing bytes.
    ///
    /// Capacity is `bytes.len()`; both cursors start at zero, so the bytes can
    /// be read back or overwritten.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            storage: Storage::Owned(bytes),
            write_pos: 0,
            read_pos: 0,
        }
    }
}

impl<'a> PacketBuffer<'a> {
    /// Create a read-only view over `bytes`.
    pub fn view(bytes: &'a [u8]) -> Self {
        Self {
            storage: Storage::View(bytes),
            write_pos: 0,
            read_pos: 0,
        }
    }

    /// Total size of the buffer in bytes.
    pub fn capacity(&self) -> usize {
        self.storage.as_slice().len()
    }

    /// Whether writes are allowed.
    pub fn is_writable(&self) -> bool {
        matches!(self.storage, Storage::Owned(_))
    }

    /// Bytes written so far.
    pub fn write_position(&self) -> usize {
        self.write_pos
    }

    /// Bytes consumed by reads so far.
    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    /// Bytes still available for writing (zero for a view).
    pub fn remaining_write(&self) -> usize {
        match &self.storage {
            Storage::Owned(bytes) => bytes.len() - self.write_pos,
            Storage::View(_) => 0,
        }
    }

    /// Bytes still available for reading.
    pub fn remaining_read(&self) -> usize {
        self.capacity() - self.read_pos
    }

    /// The written prefix of the buffer.
    pub fn written(&self) -> &[u8] {
        &self.storage.as_slice()[..self.write_pos]
    }

    /// The whole buffer, written or not.
    pub fn as_slice(&self) -> &[u8] {
        self.storage.as_slice()
    }

    /// Zero the buffer and rewind both cursors.
    ///
    /// A view cannot be zeroed; only its read cursor is rewound.
    pub fn reset(&mut self) {
        if let Storage::Owned(bytes) = &mut self.storage {
            bytes.fill(0);
        }
        self.write_pos = 0;
        self.read_pos = 0;
    }

    pub fn write_bool(&mut self, value: bool) -> BufferResult<()> {
        self.reserve_write(1)?.put_u8(u8::from(value));
        Ok(())
    }

    /// Write `value` as a single UTF-16 code unit.
    pub fn write_char(&mut self, value: char) -> BufferResult<()> {
        let unit =
            u16::try_from(u32::from(value)).map_err(|_| BufferError::UnencodableChar(value))?;
        self.reserve_write(2)?.put_u16_le(unit);
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> BufferResult<()> {
        self.reserve_write(4)?.put_i32_le(value);
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> BufferResult<()> {
        self.reserve_write(4)?.put_u32_le(value);
        Ok(())
    }

    pub fn write_i64(&mut self, value: i64) -> BufferResult<()> {
        self.reserve_write(8)?.put_i64_le(value);
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> BufferResult<()> {
        self.reserve_write(8)?.put_u64_le(value);
        Ok(())
    }

    pub fn write_f32(&mut self, value: f32) -> BufferResult<()> {
        self.reserve_write(4)?.put_f32_le(value);
        Ok(())
    }

    pub fn write_f64(&mut self, value: f64) -> BufferResult<()> {
        self.reserve_write(8)?.put_f64_le(value);
        Ok(())
    }

    /// Write a 4-byte length prefix followed by `blob`.
    ///
    /// Either the whole prefixed blob is written or nothing is: on
    /// [`BufferError::CapacityExceeded`] the write cursor does not move.
    pub fn write_bytes(&mut self, blob: &[u8]) -> BufferResult<()> {
        let needed = LENGTH_PREFIX_SIZE.saturating_add(blob.len());
        let len = i32::try_from(blob.len()).map_err(|_| BufferError::CapacityExceeded {
            needed,
            remaining: self.remaining_write(),
        })?;

        let mut dst = self.reserve_write(needed)?;
        dst.put_i32_le(len);
        dst.put_slice(blob);
        Ok(())
    }

    /// Write `text` as length-prefixed UTF-8.
    pub fn write_string(&mut self, text: &str) -> BufferResult<()> {
        self.write_bytes(text.as_bytes())
    }

    pub fn read_bool(&mut self) -> BufferResult<bool> {
        Ok(self.reserve_read(1)?.get_u8() != 0)
    }

    pub fn read_char(&mut self) -> BufferResult<char> {
        let unit = self.reserve_read(2)?.get_u16_le();
        char::from_u32(u32::from(unit)).ok_or(BufferError::InvalidChar(unit))
    }

    pub fn read_i32(&mut self) -> BufferResult<i32> {
        Ok(self.reserve_read(4)?.get_i32_le())
    }

    pub fn read_u32(&mut self) -> BufferResult<u32> {
        Ok(self.reserve_read(4)?.get_u32_le())
    }

    pub fn read_i64(&mut self) -> BufferResult<i64> {
        Ok(self.reserve_read(8)?.get_i64_le())
    }

    pub fn read_u64(&mut self) -> BufferResult<u64> {
        Ok(self.reserve_read(8)?.get_u64_le())
    }

    pub fn read_f32(&mut self) -> BufferResult<f32> {
        Ok(self.reserve_read(4)?.get_f32_le())
    }

    pub fn read_f64(&mut self) -> BufferResult<f64> {
        Ok(self.reserve_read(8)?.get_f64_le())
    }

    /// Read a length-prefixed blob into a new vector.
    pub fn read_bytes(&mut self) -> BufferResult<Vec<u8>> {
        self.read_prefixed().map(<[u8]>::to_vec)
    }

    /// Read a length-prefixed blob without copying it.
    pub fn read_bytes_view(&mut self) -> BufferResult<&[u8]> {
        self.read_prefixed()
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> BufferResult<String> {
        let bytes = self.read_prefixed()?;
        Ok(std::str::from_utf8(bytes)?.to_owned())
    }

    fn reserve_write(&mut self, width: usize) -> BufferResult<&mut [u8]> {
        let Storage::Owned(bytes) = &mut self.storage else {
            return Err(BufferError::ReadOnlyViolation);
        };

        let remaining = bytes.len() - self.write_pos;
        if width > remaining {
            return Err(BufferError::CapacityExceeded {
                needed: width,
                remaining,
            });
        }

        let start = self.write_pos;
        self.write_pos += width;
        Ok(&mut bytes[start..start + width])
    }

    fn reserve_read(&mut self, width: usize) -> BufferResult<&[u8]> {
        let available = self.remaining_read();
        if width > available {
            return Err(BufferError::BufferUnderrun {
                needed: width,
                available,
            });
        }

        let start = self.read_pos;
        self.read_pos += width;
        Ok(&self.storage.as_slice()[start..start + width])
    }

    /// Validates prefix and body before moving the cursor, so a failed read
    /// leaves the buffer where it was.
    fn read_prefixed(&mut self) -> BufferResult<&[u8]> {
        let available = self.remaining_read();
        if available < LENGTH_PREFIX_SIZE {
            return Err(BufferError::BufferUnderrun {
                needed: LENGTH_PREFIX_SIZE,
                available,
            });
        }

        let mut prefix = &self.storage.as_slice()[self.read_pos..];
        let len = prefix.get_i32_le();
        let len = usize::try_from(len).map_err(|_| BufferError::InvalidLength(len))?;

        let needed = LENGTH_PREFIX_SIZE + len;
        if needed > available {
            return Err(BufferError::BufferUnderrun { needed, available });
        }

        let start = self.read_pos + LENGTH_PREFIX_SIZE;
        self.read_pos += needed;
        Ok(&self.storage.as_slice()[start..start + len])
    }
}

impl std::fmt::Debug for PacketBuffer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("capacity", &self.capacity())
            .field("writable", &self.is_writable())
            .field("write_pos", &self.write_pos)
            .field("read_pos", &self.read_pos)
            .finish()
    }
}
