use super::verifier::VerificationType;
use crate::jvm::{
    decode_modified_utf8, ClassAccessFlags, ClassConstantIndex, Constant, ConstantIndex, Error,
    FieldAccessFlags, FieldType, MalformedKind, MemberKind, MethodAccessFlags, MethodDescriptor,
    NameAndTypeConstantIndex, ParseDescriptor, Utf8ConstantIndex, Version,
};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{self, Cursor};

/// Newest class file major version the loader understands (Java 8)
pub const MAX_MAJOR_VERSION: u16 = 52;

/// Oldest class file major version the loader understands (Java 1.1)
pub const MIN_MAJOR_VERSION: u16 = 45;

/// Constant pool read back from a class file
///
/// Indices are 1-based, exactly as they are in the file.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    /// The value written in the class file's `constant_pool_count`
    pub fn count(&self) -> u16 {
        self.entries.len() as u16 + 1
    }

    pub fn get(&self, index: ConstantIndex) -> Option<&Constant> {
        let index = index.0 as usize;
        if index == 0 {
            None
        } else {
            self.entries.get(index - 1)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConstantIndex, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, constant)| (ConstantIndex(i as u16 + 1), constant))
    }

    fn bad_index(offset: usize, index: ConstantIndex, expected: &'static str) -> Error {
        Error::malformed(
            offset,
            MalformedKind::BadConstantIndex {
                index: index.0,
                expected,
            },
        )
    }

    /// Look up a text constant, `offset` being where the index was read (for errors)
    pub fn utf8(&self, index: Utf8ConstantIndex, offset: usize) -> Result<&str, Error> {
        match self.get(index.0) {
            Some(Constant::Utf8(text)) => Ok(text),
            _ => Err(Self::bad_index(offset, index.0, "Utf8")),
        }
    }

    /// Binary name of a class constant
    pub fn class_name(&self, index: ClassConstantIndex, offset: usize) -> Result<&str, Error> {
        match self.get(index.0) {
            Some(Constant::Class(name)) => self.utf8(*name, offset),
            _ => Err(Self::bad_index(offset, index.0, "Class")),
        }
    }

    pub fn name_and_type(
        &self,
        index: NameAndTypeConstantIndex,
        offset: usize,
    ) -> Result<(&str, &str), Error> {
        match self.get(index.0) {
            Some(Constant::NameAndType { name, descriptor }) => {
                Ok((self.utf8(*name, offset)?, self.utf8(*descriptor, offset)?))
            }
            _ => Err(Self::bad_index(offset, index.0, "NameAndType")),
        }
    }

    /// Resolve a field or method reference of the expected kind
    pub fn member_ref(
        &self,
        index: ConstantIndex,
        expected: MemberKind,
        offset: usize,
    ) -> Result<MemberRef, Error> {
        let expected_name = match expected {
            MemberKind::Field => "Fieldref",
            MemberKind::Method => "Methodref",
            MemberKind::InterfaceMethod => "InterfaceMethodref",
        };
        match self.get(index) {
            Some(Constant::MemberRef {
                kind,
                class,
                name_and_type,
            }) if *kind == expected => {
                let (name, descriptor) = self.name_and_type(*name_and_type, offset)?;
                Ok(MemberRef {
                    kind: *kind,
                    class: self.class_name(*class, offset)?.to_owned(),
                    name: name.to_owned(),
                    descriptor: descriptor.to_owned(),
                })
            }
            _ => Err(Self::bad_index(offset, index, expected_name)),
        }
    }

    /// Check that every index inside a constant points at the right kind of constant
    fn check_references(&self, entry_offsets: &[usize]) -> Result<(), Error> {
        for ((_, constant), offset) in self.iter().zip(entry_offsets.iter().copied()) {
            match constant {
                Constant::Utf8(_) => (),
                Constant::Class(name) => {
                    self.utf8(*name, offset)?;
                }
                Constant::NameAndType { name, descriptor } => {
                    self.utf8(*name, offset)?;
                    self.utf8(*descriptor, offset)?;
                }
                Constant::MemberRef {
                    class,
                    name_and_type,
                    ..
                } => {
                    self.class_name(*class, offset)?;
                    self.name_and_type(*name_and_type, offset)?;
                }
            }
        }
        Ok(())
    }
}

/// Resolved field or method reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    pub kind: MemberKind,
    pub class: String,
    pub name: String,
    pub descriptor: String,
}

/// Class file as read from bytes, with every constant index checked
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: String,
    pub super_class: String,
    pub interfaces: Vec<String>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub access_flags: FieldAccessFlags,
    pub name: String,
    pub descriptor: FieldType,
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub access_flags: MethodAccessFlags,
    pub name: String,
    pub descriptor: MethodDescriptor,

    /// Descriptor as it appears in the pool
    pub descriptor_text: String,

    /// Only abstract methods have no code
    pub code: Option<CodeInfo>,
}

impl MethodInfo {
    /// Name and descriptor, as used in diagnostics
    pub fn signature(&self) -> String {
        format!("{}{}", self.name, self.descriptor_text)
    }
}

#[derive(Debug, Clone)]
pub struct CodeInfo {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,

    /// Position in the class file of the first bytecode byte
    pub code_position: usize,

    pub stack_map: Vec<StackMapFrame>,
}

/// Entry of a `StackMapTable`
///
/// Class names in verification types are already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame {
    Same {
        offset_delta: u16,
    },
    SameLocals1StackItem {
        offset_delta: u16,
        stack: VerificationType,
    },
    Chop {
        offset_delta: u16,
        chopped: u8,
    },
    Append {
        offset_delta: u16,
        locals: Vec<VerificationType>,
    },
    Full {
        offset_delta: u16,
        locals: Vec<VerificationType>,
        stack: Vec<VerificationType>,
    },
}

impl StackMapFrame {
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::Same { offset_delta }
            | StackMapFrame::SameLocals1StackItem { offset_delta, .. }
            | StackMapFrame::Chop { offset_delta, .. }
            | StackMapFrame::Append { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }
}

/// Cursor over class file bytes
///
/// Every read failure is reported as [`MalformedKind::Truncated`] at the offset where the read
/// started.
pub struct ClassReader<'b> {
    cursor: Cursor<&'b [u8]>,
}

impl<'b> ClassReader<'b> {
    pub fn new(bytes: &'b [u8]) -> ClassReader<'b> {
        ClassReader {
            cursor: Cursor::new(bytes),
        }
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    /// Bytes left after the cursor
    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    fn read<T>(
        &mut self,
        read: impl FnOnce(&mut Cursor<&'b [u8]>) -> io::Result<T>,
    ) -> Result<T, Error> {
        let offset = self.position();
        read(&mut self.cursor).map_err(|_| Error::malformed(offset, MalformedKind::Truncated))
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        self.read(|cursor| cursor.read_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16, Error> {
        self.read(|cursor| cursor.read_u16::<BigEndian>())
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        self.read(|cursor| cursor.read_u32::<BigEndian>())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'b [u8], Error> {
        let start = self.position();
        if len > self.remaining() {
            return Err(Error::malformed(start, MalformedKind::Truncated));
        }
        let bytes: &'b [u8] = *self.cursor.get_ref();
        self.cursor.set_position((start + len) as u64);
        Ok(&bytes[start..start + len])
    }

    fn read_utf8_index(&mut self) -> Result<Utf8ConstantIndex, Error> {
        self.read_u16().map(|idx| Utf8ConstantIndex(ConstantIndex(idx)))
    }

    fn read_class_index(&mut self) -> Result<ClassConstantIndex, Error> {
        self.read_u16().map(|idx| ClassConstantIndex(ConstantIndex(idx)))
    }

    /// Read a class index and resolve it to a binary name
    fn read_class_name(&mut self, pool: &ConstantPool) -> Result<String, Error> {
        let offset = self.position();
        let index = self.read_class_index()?;
        pool.class_name(index, offset).map(str::to_owned)
    }

    fn read_text(&mut self, pool: &ConstantPool) -> Result<String, Error> {
        let offset = self.position();
        let index = self.read_utf8_index()?;
        pool.utf8(index, offset).map(str::to_owned)
    }

    fn read_constant(&mut self) -> Result<Constant, Error> {
        let offset = self.position();
        let constant = match self.read_u8()? {
            Constant::UTF8 => {
                let len = self.read_u16()? as usize;
                let bytes = self.read_bytes(len)?;
                let text = decode_modified_utf8(bytes)
                    .ok_or_else(|| Error::malformed(offset, MalformedKind::BadUtf8))?;
                Constant::Utf8(text)
            }
            Constant::CLASS => Constant::Class(self.read_utf8_index()?),
            tag @ (Constant::FIELD_REF | Constant::METHOD_REF | Constant::INTERFACE_METHOD_REF) => {
                let kind = match tag {
                    Constant::FIELD_REF => MemberKind::Field,
                    Constant::METHOD_REF => MemberKind::Method,
                    _ => MemberKind::InterfaceMethod,
                };
                let class = self.read_class_index()?;
                let name_and_type = NameAndTypeConstantIndex(ConstantIndex(self.read_u16()?));
                Constant::MemberRef {
                    kind,
                    class,
                    name_and_type,
                }
            }
            Constant::NAME_AND_TYPE => Constant::NameAndType {
                name: self.read_utf8_index()?,
                descriptor: self.read_utf8_index()?,
            },
            other => {
                return Err(Error::malformed(
                    offset,
                    MalformedKind::UnknownConstantTag(other),
                ))
            }
        };
        Ok(constant)
    }

    fn read_constant_pool(&mut self) -> Result<ConstantPool, Error> {
        let count_offset = self.position();
        let count = self.read_u16()?;
        if count == 0 {
            return Err(Error::malformed(count_offset, MalformedKind::BadPoolCount));
        }

        let mut entries = Vec::with_capacity(count as usize - 1);
        let mut entry_offsets = Vec::with_capacity(count as usize - 1);
        for _ in 1..count {
            entry_offsets.push(self.position());
            entries.push(self.read_constant()?);
        }
        let pool = ConstantPool { entries };
        pool.check_references(&entry_offsets)?;
        Ok(pool)
    }

    fn read_field_descriptor(&mut self, pool: &ConstantPool) -> Result<FieldType, Error> {
        let offset = self.position();
        let text = self.read_text(pool)?;
        FieldType::parse(&text)
            .map_err(|_| Error::malformed(offset, MalformedKind::BadDescriptor(text)))
    }

    /// Skip over an attribute body whose name has already been read
    fn skip_attribute(&mut self) -> Result<(), Error> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)?;
        Ok(())
    }

    fn read_field(&mut self, pool: &ConstantPool) -> Result<FieldInfo, Error> {
        let access_flags = FieldAccessFlags::from_bits_truncate(self.read_u16()?);
        let name = self.read_text(pool)?;
        let descriptor = self.read_field_descriptor(pool)?;
        let attributes_count = self.read_u16()?;
        for _ in 0..attributes_count {
            self.read_text(pool)?;
            self.skip_attribute()?;
        }
        Ok(FieldInfo {
            access_flags,
            name,
            descriptor,
        })
    }

    fn read_method(&mut self, pool: &ConstantPool) -> Result<MethodInfo, Error> {
        let start = self.position();
        let access_flags = MethodAccessFlags::from_bits_truncate(self.read_u16()?);
        let name = self.read_text(pool)?;
        let descriptor_offset = self.position();
        let descriptor_text = self.read_text(pool)?;
        let descriptor = MethodDescriptor::parse(&descriptor_text).map_err(|_| {
            Error::malformed(
                descriptor_offset,
                MalformedKind::BadDescriptor(descriptor_text.clone()),
            )
        })?;
        let signature = format!("{}{}", name, descriptor_text);

        let mut code = None;
        let attributes_count = self.read_u16()?;
        for _ in 0..attributes_count {
            let attribute_offset = self.position();
            let attribute_name = self.read_text(pool)?;
            if attribute_name != "Code" {
                self.skip_attribute()?;
                continue;
            }
            if code.is_some() {
                return Err(Error::malformed(
                    attribute_offset,
                    MalformedKind::DuplicateAttribute {
                        owner: signature,
                        attribute: attribute_name,
                    },
                ));
            }
            code = Some(self.read_code(pool, &signature)?);
        }

        if code.is_none() && !access_flags.contains(MethodAccessFlags::ABSTRACT) {
            return Err(Error::malformed(start, MalformedKind::MissingCode(signature)));
        }
        Ok(MethodInfo {
            access_flags,
            name,
            descriptor,
            descriptor_text,
            code,
        })
    }

    /// Read a `Code` attribute body (the name has already been read)
    fn read_code(&mut self, pool: &ConstantPool, signature: &str) -> Result<CodeInfo, Error> {
        let length_offset = self.position();
        let declared = self.read_u32()?;
        let body_start = self.position();

        let max_stack = self.read_u16()?;
        let max_locals = self.read_u16()?;
        let code_length_offset = self.position();
        let code_length = self.read_u32()?;
        if code_length == 0 || code_length >= 65536 {
            return Err(Error::malformed(
                code_length_offset,
                MalformedKind::BadLength {
                    declared: code_length,
                    actual: self.remaining() as u32,
                },
            ));
        }
        let code_position = self.position();
        let code = self.read_bytes(code_length as usize)?.to_vec();

        let handlers_offset = self.position();
        if self.read_u16()? != 0 {
            return Err(Error::malformed(
                handlers_offset,
                MalformedKind::ExceptionHandlers(signature.to_owned()),
            ));
        }

        let mut stack_map = None;
        let attributes_count = self.read_u16()?;
        for _ in 0..attributes_count {
            let attribute_offset = self.position();
            let attribute_name = self.read_text(pool)?;
            if attribute_name != "StackMapTable" {
                self.skip_attribute()?;
                continue;
            }
            if stack_map.is_some() {
                return Err(Error::malformed(
                    attribute_offset,
                    MalformedKind::DuplicateAttribute {
                        owner: signature.to_owned(),
                        attribute: attribute_name,
                    },
                ));
            }
            stack_map = Some(self.read_stack_map_table(pool)?);
        }

        let actual = (self.position() - body_start) as u32;
        if actual != declared {
            return Err(Error::malformed(
                length_offset,
                MalformedKind::BadLength { declared, actual },
            ));
        }

        Ok(CodeInfo {
            max_stack,
            max_locals,
            code,
            code_position,
            stack_map: stack_map.unwrap_or_default(),
        })
    }

    fn read_stack_map_table(&mut self, pool: &ConstantPool) -> Result<Vec<StackMapFrame>, Error> {
        let length_offset = self.position();
        let declared = self.read_u32()?;
        let start = self.position();

        let count = self.read_u16()?;
        let mut frames = Vec::with_capacity(count as usize);
        for _ in 0..count {
            frames.push(self.read_stack_map_frame(pool)?);
        }

        let actual = (self.position() - start) as u32;
        if actual != declared {
            return Err(Error::malformed(
                length_offset,
                MalformedKind::BadLength { declared, actual },
            ));
        }
        Ok(frames)
    }

    fn read_stack_map_frame(&mut self, pool: &ConstantPool) -> Result<StackMapFrame, Error> {
        let offset = self.position();
        let frame = match self.read_u8()? {
            frame_type @ 0..=63 => StackMapFrame::Same {
                offset_delta: frame_type as u16,
            },
            frame_type @ 64..=127 => StackMapFrame::SameLocals1StackItem {
                offset_delta: frame_type as u16 - 64,
                stack: self.read_verification_type(pool)?,
            },
            247 => StackMapFrame::SameLocals1StackItem {
                offset_delta: self.read_u16()?,
                stack: self.read_verification_type(pool)?,
            },
            frame_type @ 248..=250 => StackMapFrame::Chop {
                offset_delta: self.read_u16()?,
                chopped: 251 - frame_type,
            },
            251 => StackMapFrame::Same {
                offset_delta: self.read_u16()?,
            },
            frame_type @ 252..=254 => {
                let offset_delta = self.read_u16()?;
                let mut locals = vec![];
                for _ in 251..frame_type {
                    locals.push(self.read_verification_type(pool)?);
                }
                StackMapFrame::Append {
                    offset_delta,
                    locals,
                }
            }
            255 => {
                let offset_delta = self.read_u16()?;
                let locals_count = self.read_u16()?;
                let mut locals = Vec::with_capacity(locals_count as usize);
                for _ in 0..locals_count {
                    locals.push(self.read_verification_type(pool)?);
                }
                let stack_count = self.read_u16()?;
                let mut stack = Vec::with_capacity(stack_count as usize);
                for _ in 0..stack_count {
                    stack.push(self.read_verification_type(pool)?);
                }
                StackMapFrame::Full {
                    offset_delta,
                    locals,
                    stack,
                }
            }
            reserved => {
                return Err(Error::malformed(
                    offset,
                    MalformedKind::UnsupportedFrame(reserved),
                ))
            }
        };
        Ok(frame)
    }

    /// Read a `verification_type_info`
    ///
    /// Uninitialized types only show up around `new`, which the loader does not support.
    fn read_verification_type(&mut self, pool: &ConstantPool) -> Result<VerificationType, Error> {
        let offset = self.position();
        let verification_type = match self.read_u8()? {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            7 => VerificationType::Object(self.read_class_name(pool)?),
            other => {
                return Err(Error::malformed(
                    offset,
                    MalformedKind::BadVerificationType(other),
                ))
            }
        };
        Ok(verification_type)
    }

    /// Read a whole class file, leaving method bodies unverified
    pub fn read_class(mut self) -> Result<ClassFile, Error> {
        let magic = self.read_u32()?;
        if magic != crate::jvm::assembler::MAGIC {
            return Err(Error::malformed(0, MalformedKind::BadMagic(magic)));
        }

        let version_offset = self.position();
        let minor_version = self.read_u16()?;
        let major_version = self.read_u16()?;
        if !(MIN_MAJOR_VERSION..=MAX_MAJOR_VERSION).contains(&major_version) {
            return Err(Error::malformed(
                version_offset,
                MalformedKind::UnsupportedVersion {
                    major: major_version,
                    minor: minor_version,
                },
            ));
        }
        let version = Version {
            minor_version,
            major_version,
        };

        let constants = self.read_constant_pool()?;
        let access_flags = ClassAccessFlags::from_bits_truncate(self.read_u16()?);
        let this_class = self.read_class_name(&constants)?;
        let super_class = self.read_class_name(&constants)?;

        let interfaces_count = self.read_u16()?;
        let mut interfaces = Vec::with_capacity(interfaces_count as usize);
        for _ in 0..interfaces_count {
            interfaces.push(self.read_class_name(&constants)?);
        }

        let fields_count = self.read_u16()?;
        let mut fields = Vec::with_capacity(fields_count as usize);
        for _ in 0..fields_count {
            fields.push(self.read_field(&constants)?);
        }

        let methods_count = self.read_u16()?;
        let mut methods = Vec::with_capacity(methods_count as usize);
        for _ in 0..methods_count {
            methods.push(self.read_method(&constants)?);
        }

        let attributes_count = self.read_u16()?;
        for _ in 0..attributes_count {
            self.read_text(&constants)?;
            self.skip_attribute()?;
        }

        if self.remaining() > 0 {
            return Err(Error::malformed(
                self.position(),
                MalformedKind::TrailingBytes(self.remaining()),
            ));
        }

        Ok(ClassFile {
            version,
            constants,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
        })
    }
}
