//! Single-pass class file assembler
//!
//! The [`ClassAssembler`] writes a class file front to back straight into a [`ByteBuffer`]. There
//! is no intermediate model of the class: the caller drives the writes in the order the class
//! file format lays them out, and the assembler takes care of the few fields whose value is only
//! known after the fact (the constant pool count, the `Code` attribute length, and the length of
//! the bytecode array). Those are reserved as zero and patched once the span they describe has
//! been written.
//!
//! A session goes like this:
//!
//!   1. [`ClassAssembler::setup_pool`] writes the header and the standard constants
//!   2. the `add_*` methods append the rest of the constant pool
//!   3. [`ClassAssembler::finish_pool`] patches the pool count
//!   4. [`ClassAssembler::define_class`], interfaces, fields, methods, class attributes
//!   5. [`ClassAssembler::to_bytes`] hands the artifact to [`crate::loader::load`]
//!
//! The assembler does no cross-section validation: getting the order wrong produces a class file
//! that the loader will reject.

mod class;
mod method;

pub use class::MAGIC;
pub use method::JumpSite;

use super::{
    ByteBuffer, ClassConstantIndex, Constant, ConstantIndex, Contract, Error, MemberKind,
    MemberRefConstantIndex, NameAndTypeConstantIndex, Serialize, U16Placeholder,
    U32Placeholder, Utf8ConstantIndex,
};

/// Constants registered by [`ClassAssembler::setup_pool`] which every generated class needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardPool {
    /// `java/lang/Object`, the default superclass
    pub object_class: ClassConstantIndex,

    /// `<init>`
    pub init_name: Utf8ConstantIndex,

    /// `()V`
    pub init_descriptor: Utf8ConstantIndex,

    /// `java/lang/Object.<init>()V`
    pub object_init: MemberRefConstantIndex,

    /// `Code`, the name of the attribute holding method bytecode
    pub code_attribute: Utf8ConstantIndex,
}

/// Placeholders of the method currently being assembled
#[derive(Debug)]
struct OpenMethod {
    /// Length of the whole `Code` attribute
    attribute_length: U32Placeholder,

    /// Length of the bytecode array, `None` once `end_method_code` has patched it
    code_length: Option<U32Placeholder>,

    /// Buffer position of the first bytecode byte
    code_start: usize,
}

/// Stateful single-use class file writer
///
/// Not meant to be shared: one session assembles one class, then is either dropped or
/// [`cleared`](ClassAssembler::clear) for the next one.
#[derive(Debug)]
pub struct ClassAssembler {
    buf: ByteBuffer,

    /// Index the next constant will get (pool indices start at 1)
    pool_count: u16,

    /// Reserved pool count field, `None` before `begin_class` and after `finish_pool`
    pool_count_field: Option<U16Placeholder>,

    class_begun: bool,
    standard: Option<StandardPool>,
    method: Option<OpenMethod>,
}

impl Default for ClassAssembler {
    fn default() -> ClassAssembler {
        ClassAssembler::new()
    }
}

impl ClassAssembler {
    pub fn new() -> ClassAssembler {
        ClassAssembler {
            buf: ByteBuffer::new(),
            pool_count: 1,
            pool_count_field: None,
            class_begun: false,
            standard: None,
            method: None,
        }
    }

    /// Reset the session so it can assemble another class
    pub fn clear(&mut self) {
        self.buf.clear();
        self.pool_count = 1;
        self.pool_count_field = None;
        self.class_begun = false;
        self.standard = None;
        self.method = None;
    }

    /// Current write position in the class file
    pub fn position(&self) -> usize {
        self.buf.position()
    }

    /// Read back an already written byte
    pub fn get(&self, position: usize) -> u8 {
        self.buf.get(position)
    }

    /// Bytes written so far
    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_bytes()
    }

    /// Snapshot of the class file, ready for [`crate::loader::load`]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.buf.to_vec()
    }

    /// Index the next pool entry will be assigned (also the value `finish_pool` writes)
    pub fn pool_count(&self) -> u16 {
        self.pool_count
    }

    /// Indices registered by [`ClassAssembler::setup_pool`]
    pub fn standard_pool(&self) -> Option<&StandardPool> {
        self.standard.as_ref()
    }

    fn standard(&self) -> Result<StandardPool, Error> {
        match self.standard {
            Some(standard) => Ok(standard),
            None if self.class_begun => Err(Contract::StandardPoolMissing.into()),
            None => Err(Contract::ClassNotBegun.into()),
        }
    }

    fn push_constant(&mut self, constant: Constant) -> Result<ConstantIndex, Error> {
        if !self.class_begun {
            return Err(Contract::ClassNotBegun.into());
        }
        if self.pool_count_field.is_none() {
            return Err(Contract::PoolAlreadyFinished.into());
        }
        let offset = self.pool_count;
        if offset == u16::MAX {
            return Err(Error::ConstantPoolOverflow { offset });
        }
        log::trace!("constant #{} = {:?}", offset, constant);
        constant.serialize(&mut self.buf)?;
        self.pool_count += 1;
        Ok(ConstantIndex(offset))
    }

    /// Append a `CONSTANT_Utf8_info`
    ///
    /// Constants are never deduplicated: adding the same text twice yields two entries.
    pub fn add_utf8(&mut self, text: &str) -> Result<Utf8ConstantIndex, Error> {
        let constant = Constant::Utf8(text.to_owned());
        self.push_constant(constant).map(Utf8ConstantIndex)
    }

    /// Append a `CONSTANT_Class_info`
    pub fn add_class(&mut self, name: Utf8ConstantIndex) -> Result<ClassConstantIndex, Error> {
        self.push_constant(Constant::Class(name))
            .map(ClassConstantIndex)
    }

    /// Append a `CONSTANT_NameAndType_info`
    pub fn add_name_and_type(
        &mut self,
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    ) -> Result<NameAndTypeConstantIndex, Error> {
        let constant = Constant::NameAndType { name, descriptor };
        self.push_constant(constant).map(NameAndTypeConstantIndex)
    }

    /// Append a `CONSTANT_Fieldref_info`, `CONSTANT_Methodref_info`, or
    /// `CONSTANT_InterfaceMethodref_info`
    pub fn add_member_ref(
        &mut self,
        kind: MemberKind,
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
    ) -> Result<MemberRefConstantIndex, Error> {
        let constant = Constant::MemberRef {
            kind,
            class,
            name_and_type,
        };
        self.push_constant(constant).map(MemberRefConstantIndex)
    }

    pub fn add_field_ref(
        &mut self,
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
    ) -> Result<MemberRefConstantIndex, Error> {
        self.add_member_ref(MemberKind::Field, class, name_and_type)
    }

    pub fn add_method_ref(
        &mut self,
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
    ) -> Result<MemberRefConstantIndex, Error> {
        self.add_member_ref(MemberKind::Method, class, name_and_type)
    }

    pub fn add_interface_method_ref(
        &mut self,
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
    ) -> Result<MemberRefConstantIndex, Error> {
        self.add_member_ref(MemberKind::InterfaceMethod, class, name_and_type)
    }

    /// Patch the constant pool count now that all constants are known
    ///
    /// Must be called exactly once, after the last constant and before anything else in the
    /// class body is written.
    pub fn finish_pool(&mut self) -> Result<(), Error> {
        match self.pool_count_field.take() {
            Some(field) => {
                log::trace!("constant pool finished with count {}", self.pool_count);
                self.buf.patch_u16(field, self.pool_count);
                Ok(())
            }
            None if self.class_begun => Err(Contract::PoolAlreadyFinished.into()),
            None => Err(Contract::ClassNotBegun.into()),
        }
    }

    /// Append a raw byte
    pub fn put_u8(&mut self, value: u8) -> Result<(), Error> {
        self.buf.put_u8(value)
    }

    /// Append a raw big-endian `u16` (counts, indices, flags)
    pub fn put_u16(&mut self, value: u16) -> Result<(), Error> {
        self.buf.put_u16(value)
    }

    /// Append a raw big-endian `i16` (branch offsets, `sipush` operands)
    pub fn put_i16(&mut self, value: i16) -> Result<(), Error> {
        self.buf.put_i16(value)
    }

    /// Append a raw big-endian `u32`
    pub fn put_u32(&mut self, value: u32) -> Result<(), Error> {
        self.buf.put_u32(value)
    }

    /// Overwrite a two byte field that was already written
    pub fn overwrite_u16(&mut self, position: usize, value: u16) {
        self.buf.overwrite_u16(position, value)
    }

    /// Overwrite a four byte field that was already written
    pub fn overwrite_u32(&mut self, position: usize, value: u32) {
        self.buf.overwrite_u32(position, value)
    }

    /// Write the class file out for offline inspection (eg. with `javap -v`)
    pub fn dump_to<W: std::io::Write>(&self, writer: &mut W) -> Result<(), Error> {
        writer.write_all(self.buf.as_bytes())?;
        Ok(())
    }

    /// Save the class file to disk
    pub fn dump<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), Error> {
        let mut file = std::fs::File::create(path)?;
        self.dump_to(&mut file)
    }
}

#[cfg(test)]
mod pool_tests {
    use super::*;
    use crate::jvm::{ClassAccessFlags, MethodAccessFlags, Version};

    #[test]
    fn indices_are_sequential_and_stable() {
        let mut asm = ClassAssembler::new();
        asm.begin_class(Version::JAVA7).unwrap();
        let a = asm.add_utf8("a").unwrap();
        let b = asm.add_utf8("a").unwrap();
        let class = asm.add_class(b).unwrap();
        let nat = asm.add_name_and_type(a, b).unwrap();
        let field = asm.add_field_ref(class, nat).unwrap();
        assert_eq!(a, Utf8ConstantIndex(ConstantIndex(1)));
        assert_eq!(b, Utf8ConstantIndex(ConstantIndex(2)));
        assert_eq!(class, ClassConstantIndex(ConstantIndex(3)));
        assert_eq!(nat, NameAndTypeConstantIndex(ConstantIndex(4)));
        assert_eq!(field, MemberRefConstantIndex(ConstantIndex(5)));
        assert_eq!(asm.pool_count(), 6);
    }

    #[test]
    fn finish_pool_patches_count() {
        let mut asm = ClassAssembler::new();
        asm.begin_class(Version::JAVA7).unwrap();
        for text in ["x", "y", "z"] {
            asm.add_utf8(text).unwrap();
        }
        assert_eq!(asm.as_bytes()[8..10], [0, 0]);
        asm.finish_pool().unwrap();
        assert_eq!(asm.as_bytes()[8..10], [0, 4]);
    }

    #[test]
    fn pool_entry_bytes() {
        let mut asm = ClassAssembler::new();
        asm.begin_class(Version::JAVA7).unwrap();
        let name = asm.add_utf8("ab").unwrap();
        let class = asm.add_class(name).unwrap();
        let nat = asm.add_name_and_type(name, name).unwrap();
        asm.add_interface_method_ref(class, nat).unwrap();
        assert_eq!(
            &asm.as_bytes()[10..],
            &[1, 0, 2, b'a', b'b', 7, 0, 1, 12, 0, 1, 0, 1, 11, 0, 2, 0, 3]
        );
    }

    #[test]
    fn pool_misuse() {
        let mut asm = ClassAssembler::new();
        assert!(matches!(
            asm.add_utf8("early"),
            Err(Error::ContractViolation(Contract::ClassNotBegun))
        ));
        asm.begin_class(Version::JAVA7).unwrap();
        asm.finish_pool().unwrap();
        assert!(matches!(
            asm.finish_pool(),
            Err(Error::ContractViolation(Contract::PoolAlreadyFinished))
        ));
        assert!(matches!(
            asm.add_utf8("late"),
            Err(Error::ContractViolation(Contract::PoolAlreadyFinished))
        ));
    }

    #[test]
    fn clear_allows_reuse() {
        let mut asm = ClassAssembler::new();
        asm.setup_pool().unwrap();
        asm.add_utf8("first").unwrap();
        asm.clear();
        assert_eq!(asm.position(), 0);
        assert_eq!(asm.pool_count(), 1);
        asm.setup_pool().unwrap();
        assert_eq!(asm.standard_pool().unwrap().code_attribute.0, ConstantIndex(7));
    }

    #[test]
    fn pool_limits() {
        let mut asm = ClassAssembler::new();
        asm.begin_class(Version::JAVA7).unwrap();
        assert!(matches!(
            asm.add_utf8(&"x".repeat(65536)),
            Err(Error::ConstantTooLong(65536))
        ));
        // Nothing of the rejected constant was written
        assert_eq!(asm.position(), 10);
        asm.add_utf8(&"x".repeat(65535)).unwrap();

        for _ in 2..u16::MAX {
            asm.add_utf8("").unwrap();
        }
        assert_eq!(asm.pool_count(), u16::MAX);
        assert!(matches!(
            asm.add_utf8(""),
            Err(Error::ConstantPoolOverflow { offset: 65535 })
        ));
        asm.finish_pool().unwrap();
        assert_eq!(asm.as_bytes()[8..10], [0xFF, 0xFF]);
    }

    #[test]
    fn standard_pool_needs_setup() {
        let mut asm = ClassAssembler::new();
        let standard = ClassAssembler::new().setup_pool().unwrap();
        assert!(matches!(
            asm.define_default_constructor(),
            Err(Error::ContractViolation(Contract::ClassNotBegun))
        ));

        asm.begin_class(Version::JAVA7).unwrap();
        asm.finish_pool().unwrap();
        assert!(matches!(
            asm.define_class(ClassAccessFlags::PUBLIC, standard.object_class),
            Err(Error::ContractViolation(Contract::StandardPoolMissing))
        ));
        assert!(matches!(
            asm.begin_method(
                MethodAccessFlags::PUBLIC,
                standard.init_name,
                standard.init_descriptor,
                1,
                1
            ),
            Err(Error::ContractViolation(Contract::StandardPoolMissing))
        ));
    }
}
