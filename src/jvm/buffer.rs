use super::Error;
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

/// Growable byte buffer that class files get assembled into
///
/// Everything is big-endian (as is everything in class files). The write cursor is always the
/// end of the buffer: bytes are appended, and the only way to change an existing byte is to
/// overwrite a previously reserved field (see [`ByteBuffer::reserve_u16`] and
/// [`ByteBuffer::reserve_u32`]).
///
/// Growth goes through `try_reserve`, so running out of memory surfaces as
/// [`Error::ResourceExhaustion`] rather than an abort.
#[derive(Debug, Default, Clone)]
pub struct ByteBuffer {
    bytes: Vec<u8>,
}

/// Two byte field that was written as zero and still needs its real value
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a reserved field must be patched"]
pub struct U16Placeholder(usize);

/// Four byte field that was written as zero and still needs its real value
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a reserved field must be patched"]
pub struct U32Placeholder(usize);

impl U16Placeholder {
    /// Position of the field in the buffer
    pub fn position(&self) -> usize {
        self.0
    }
}

impl U32Placeholder {
    /// Position of the field in the buffer
    pub fn position(&self) -> usize {
        self.0
    }

    /// Number of bytes written after this field (excluding the field itself)
    pub fn span_to(&self, end: usize) -> usize {
        end - self.0 - 4
    }
}

impl ByteBuffer {
    const INITIAL_CAPACITY: usize = 4 * 1024;

    pub fn new() -> ByteBuffer {
        ByteBuffer {
            bytes: Vec::with_capacity(ByteBuffer::INITIAL_CAPACITY),
        }
    }

    /// Current write cursor (also the number of bytes written)
    pub fn position(&self) -> usize {
        self.bytes.len()
    }

    /// Drop the contents, keeping the allocation around
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    fn grow(&mut self, additional: usize) -> Result<(), Error> {
        self.bytes.try_reserve(additional)?;
        Ok(())
    }

    pub fn put_u8(&mut self, value: u8) -> Result<(), Error> {
        self.grow(1)?;
        self.bytes.push(value);
        Ok(())
    }

    pub fn put_u16(&mut self, value: u16) -> Result<(), Error> {
        self.grow(2)?;
        self.bytes.write_u16::<BigEndian>(value)?;
        Ok(())
    }

    pub fn put_i16(&mut self, value: i16) -> Result<(), Error> {
        self.grow(2)?;
        self.bytes.write_i16::<BigEndian>(value)?;
        Ok(())
    }

    pub fn put_u32(&mut self, value: u32) -> Result<(), Error> {
        self.grow(4)?;
        self.bytes.write_u32::<BigEndian>(value)?;
        Ok(())
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.grow(bytes.len())?;
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    /// Write a zero `u16` which will be patched later
    pub fn reserve_u16(&mut self) -> Result<U16Placeholder, Error> {
        let position = self.position();
        self.put_u16(0)?;
        Ok(U16Placeholder(position))
    }

    /// Write a zero `u32` which will be patched later
    pub fn reserve_u32(&mut self) -> Result<U32Placeholder, Error> {
        let position = self.position();
        self.put_u32(0)?;
        Ok(U32Placeholder(position))
    }

    pub fn patch_u16(&mut self, placeholder: U16Placeholder, value: u16) {
        self.overwrite_u16(placeholder.0, value);
    }

    pub fn patch_u32(&mut self, placeholder: U32Placeholder, value: u32) {
        self.overwrite_u32(placeholder.0, value);
    }

    /// Overwrite two already written bytes
    pub fn overwrite_u16(&mut self, position: usize, value: u16) {
        debug_assert!(
            position + 2 <= self.bytes.len(),
            "overwrite of [{}, {}) past cursor {}",
            position,
            position + 2,
            self.bytes.len()
        );
        BigEndian::write_u16(&mut self.bytes[position..position + 2], value);
    }

    /// Overwrite four already written bytes
    pub fn overwrite_u32(&mut self, position: usize, value: u32) {
        debug_assert!(
            position + 4 <= self.bytes.len(),
            "overwrite of [{}, {}) past cursor {}",
            position,
            position + 4,
            self.bytes.len()
        );
        BigEndian::write_u32(&mut self.bytes[position..position + 4], value);
    }

    /// Read back a byte that has already been written
    pub fn get(&self, position: usize) -> u8 {
        debug_assert!(
            position < self.bytes.len(),
            "read of {} past cursor {}",
            position,
            self.bytes.len()
        );
        self.bytes[position]
    }

    /// Read back a big-endian `u16` that has already been written
    pub fn get_u16(&self, position: usize) -> u16 {
        BigEndian::read_u16(&self.bytes[position..position + 2])
    }

    /// Read back a big-endian `u32` that has already been written
    pub fn get_u32(&self, position: usize) -> u32 {
        BigEndian::read_u32(&self.bytes[position..position + 4])
    }

    /// View of everything up to the cursor
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Owned snapshot of everything up to the cursor
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}
