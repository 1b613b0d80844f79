use super::{ByteBuffer, Error, Serialize};

/// Constants as in the constant pool
///
/// Only the handful of constant kinds needed to describe classes, their members, and references
/// to other members are supported. Constants refer to each other by index, never directly.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (see [`encode_modified_utf8`]).
    Utf8(String),

    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Field, method, or interface method
    MemberRef {
        kind: MemberKind,
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },
}

/// What sort of member a `MemberRef` constant refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Field,
    Method,
    InterfaceMethod,
}

impl MemberKind {
    pub fn tag(self) -> u8 {
        match self {
            MemberKind::Field => Constant::FIELD_REF,
            MemberKind::Method => Constant::METHOD_REF,
            MemberKind::InterfaceMethod => Constant::INTERFACE_METHOD_REF,
        }
    }
}

impl Constant {
    pub const UTF8: u8 = 1;
    pub const CLASS: u8 = 7;
    pub const FIELD_REF: u8 = 9;
    pub const METHOD_REF: u8 = 10;
    pub const INTERFACE_METHOD_REF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;

    /// Short name of the constant kind, used in diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Constant::Utf8(_) => "Utf8",
            Constant::Class(_) => "Class",
            Constant::MemberRef {
                kind: MemberKind::Field,
                ..
            } => "Fieldref",
            Constant::MemberRef {
                kind: MemberKind::Method,
                ..
            } => "Methodref",
            Constant::MemberRef {
                kind: MemberKind::InterfaceMethod,
                ..
            } => "InterfaceMethodref",
            Constant::NameAndType { .. } => "NameAndType",
        }
    }
}

impl Serialize for Constant {
    fn serialize(&self, buf: &mut ByteBuffer) -> Result<(), Error> {
        match self {
            Constant::Utf8(string) => {
                let encoded = encode_modified_utf8(string);
                if encoded.len() > u16::MAX as usize {
                    return Err(Error::ConstantTooLong(encoded.len()));
                }
                Constant::UTF8.serialize(buf)?;
                (encoded.len() as u16).serialize(buf)?;
                buf.put_bytes(&encoded)?;
            }
            Constant::Class(name) => {
                Constant::CLASS.serialize(buf)?;
                name.serialize(buf)?;
            }
            Constant::MemberRef {
                kind,
                class,
                name_and_type,
            } => {
                kind.tag().serialize(buf)?;
                class.serialize(buf)?;
                name_and_type.serialize(buf)?;
            }
            Constant::NameAndType { name, descriptor } => {
                Constant::NAME_AND_TYPE.serialize(buf)?;
                name.serialize(buf)?;
                descriptor.serialize(buf)?;
            }
        }
        Ok(())
    }
}

/// Modified UTF-8 format used in class files.
///
/// See [this `DataInput` section for details][0]. Quoting from that section:
///
/// > The differences between this format and the standard UTF-8 format are the following:
/// >
/// >  * The null byte `\u0000` is encoded in 2-byte format rather than 1-byte, so that the encoded
/// >    strings never have embedded nulls.
/// >  * Only the 1-byte, 2-byte, and 3-byte formats are used.
/// >  * Supplementary characters are represented in the form of surrogate pairs.
///
/// [0]: https://docs.oracle.com/en/java/javase/17/docs/api/java.base/java/io/DataInput.html#modified-utf-8
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = Vec::with_capacity(string.len());
    let mut units = [0u16; 2];
    for c in string.chars() {
        for unit in c.encode_utf16(&mut units).iter() {
            let unit = *unit as u32;
            if unit != 0 && unit < 0x80 {
                buffer.push(unit as u8);
            } else if unit < 0x800 {
                buffer.push((unit >> 6 & 0x1F) as u8 | 0b1100_0000);
                buffer.push((unit & 0x3F) as u8 | 0b1000_0000);
            } else {
                buffer.push((unit >> 12 & 0x0F) as u8 | 0b1110_0000);
                buffer.push((unit >> 6 & 0x3F) as u8 | 0b1000_0000);
                buffer.push((unit & 0x3F) as u8 | 0b1000_0000);
            }
        }
    }
    buffer
}

/// Inverse of [`encode_modified_utf8`]
///
/// Returns `None` on truncated sequences or unpaired surrogates.
pub fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i] as u16;
        match b0 {
            0x01..=0x7F => {
                units.push(b0);
                i += 1;
            }
            0xC0..=0xDF => {
                let b1 = *bytes.get(i + 1)? as u16;
                units.push((b0 & 0x1F) << 6 | (b1 & 0x3F));
                i += 2;
            }
            0xE0..=0xEF => {
                let b1 = *bytes.get(i + 1)? as u16;
                let b2 = *bytes.get(i + 2)? as u16;
                units.push((b0 & 0x0F) << 12 | (b1 & 0x3F) << 6 | (b2 & 0x3F));
                i += 3;
            }
            _ => return None,
        }
    }
    String::from_utf16(&units).ok()
}

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug, PartialOrd, Ord)]
pub struct ConstantIndex(pub u16);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct Utf8ConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ClassConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct NameAndTypeConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct MemberRefConstantIndex(pub ConstantIndex);

impl From<Utf8ConstantIndex> for ConstantIndex {
    fn from(idx: Utf8ConstantIndex) -> ConstantIndex {
        idx.0
    }
}
impl From<ClassConstantIndex> for ConstantIndex {
    fn from(idx: ClassConstantIndex) -> ConstantIndex {
        idx.0
    }
}
impl From<NameAndTypeConstantIndex> for ConstantIndex {
    fn from(idx: NameAndTypeConstantIndex) -> ConstantIndex {
        idx.0
    }
}
impl From<MemberRefConstantIndex> for ConstantIndex {
    fn from(idx: MemberRefConstantIndex) -> ConstantIndex {
        idx.0
    }
}

impl Serialize for ConstantIndex {
    fn serialize(&self, buf: &mut ByteBuffer) -> Result<(), Error> {
        self.0.serialize(buf)
    }
}
impl Serialize for Utf8ConstantIndex {
    fn serialize(&self, buf: &mut ByteBuffer) -> Result<(), Error> {
        self.0.serialize(buf)
    }
}
impl Serialize for ClassConstantIndex {
    fn serialize(&self, buf: &mut ByteBuffer) -> Result<(), Error> {
        self.0.serialize(buf)
    }
}
impl Serialize for NameAndTypeConstantIndex {
    fn serialize(&self, buf: &mut ByteBuffer) -> Result<(), Error> {
        self.0.serialize(buf)
    }
}
impl Serialize for MemberRefConstantIndex {
    fn serialize(&self, buf: &mut ByteBuffer) -> Result<(), Error> {
        self.0.serialize(buf)
    }
}

#[cfg(test)]
mod modified_utf8_tests {
    use super::*;

    #[test]
    fn containing_null_byte() {
        assert_eq!(encode_modified_utf8("a\x00a"), vec![97, 192, 128, 97]);
        assert_eq!(decode_modified_utf8(&[97, 192, 128, 97]).unwrap(), "a\x00a");
    }

    #[test]
    fn simple_ascii() {
        assert_eq!(encode_modified_utf8("foo"), vec![102, 111, 111]);
        assert_eq!(
            encode_modified_utf8("java/lang/Object"),
            b"java/lang/Object".to_vec()
        );
    }

    #[test]
    fn two_and_three_byte_encodings() {
        assert_eq!(
            encode_modified_utf8("ĄǍ"),
            vec![196, 132, 199, 141]
        );
        assert_eq!(encode_modified_utf8("ऄअ"), vec![224, 164, 132, 224, 164, 133]);
    }

    #[test]
    fn supplementary_characters() {
        let encoded = encode_modified_utf8("\u{10000}\u{10FFFF}");
        assert_eq!(
            encoded,
            vec![237, 160, 128, 237, 176, 128, 237, 175, 191, 237, 191, 191]
        );
        assert_eq!(decode_modified_utf8(&encoded).unwrap(), "\u{10000}\u{10FFFF}");
    }

    #[test]
    fn rejects_raw_null_and_truncation() {
        assert_eq!(decode_modified_utf8(&[0]), None);
        assert_eq!(decode_modified_utf8(&[0xE0, 0xA4]), None);
    }
}
