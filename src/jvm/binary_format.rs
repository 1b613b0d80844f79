use super::{ByteBuffer, Error};

/// Utility trait for writing class file structures into a [`ByteBuffer`]
///
/// Class files are a flat big-endian format where tags are `u8` and most counts and indices are
/// `u16`. Since the assembler writes in a single pass (patching lengths afterwards), everything
/// goes straight to the buffer instead of through an intermediate tree.
pub trait Serialize {
    fn serialize(&self, buf: &mut ByteBuffer) -> Result<(), Error>;
}

impl Serialize for u8 {
    fn serialize(&self, buf: &mut ByteBuffer) -> Result<(), Error> {
        buf.put_u8(*self)
    }
}

impl Serialize for u16 {
    fn serialize(&self, buf: &mut ByteBuffer) -> Result<(), Error> {
        buf.put_u16(*self)
    }
}

impl Serialize for u32 {
    fn serialize(&self, buf: &mut ByteBuffer) -> Result<(), Error> {
        buf.put_u32(*self)
    }
}

impl Serialize for i16 {
    fn serialize(&self, buf: &mut ByteBuffer) -> Result<(), Error> {
        buf.put_i16(*self)
    }
}

/// Sequences in class files are prefixed by their `u16` length
impl<A: Serialize> Serialize for [A] {
    fn serialize(&self, buf: &mut ByteBuffer) -> Result<(), Error> {
        let len = u16::try_from(self.len()).map_err(|_| Error::TableTooLong(self.len()))?;
        len.serialize(buf)?;
        for elem in self {
            elem.serialize(buf)?;
        }
        Ok(())
    }
}
