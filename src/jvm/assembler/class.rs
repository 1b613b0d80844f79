use super::{ClassAssembler, StandardPool};
use crate::jvm::{
    opcodes, ClassAccessFlags, ClassConstantIndex, Contract, Error, FieldAccessFlags,
    MethodAccessFlags, Serialize, Utf8ConstantIndex, Version,
};

/// Magic header bytes that go at the front of the serialized class file
pub const MAGIC: u32 = 0xCAFE_BABE;

impl ClassAssembler {
    /// Write the magic number and version, and reserve the constant pool count
    pub fn begin_class(&mut self, version: Version) -> Result<(), Error> {
        if self.class_begun {
            return Err(Contract::ClassAlreadyBegun.into());
        }
        self.buf.put_u32(MAGIC)?;
        version.serialize(&mut self.buf)?;
        self.pool_count_field = Some(self.buf.reserve_u16()?);
        self.class_begun = true;
        Ok(())
    }

    /// Begin a class with the default version and register the constants every class needs
    ///
    /// See [`StandardPool`] for what gets registered. Callers should reuse those indices instead
    /// of registering the same constants again.
    pub fn setup_pool(&mut self) -> Result<StandardPool, Error> {
        self.begin_class(Version::default())?;

        let object_name = self.add_utf8("java/lang/Object")?;
        let object_class = self.add_class(object_name)?;
        let init_name = self.add_utf8("<init>")?;
        let init_descriptor = self.add_utf8("()V")?;
        let init_name_and_type = self.add_name_and_type(init_name, init_descriptor)?;
        let object_init = self.add_method_ref(object_class, init_name_and_type)?;
        let code_attribute = self.add_utf8("Code")?;

        let standard = StandardPool {
            object_class,
            init_name,
            init_descriptor,
            object_init,
            code_attribute,
        };
        self.standard = Some(standard);
        Ok(standard)
    }

    /// Write access flags, this class, and `java/lang/Object` as the superclass
    pub fn define_class(
        &mut self,
        access_flags: ClassAccessFlags,
        this_class: ClassConstantIndex,
    ) -> Result<(), Error> {
        let object_class = self.standard()?.object_class;
        self.define_class_with_super(access_flags, this_class, object_class)
    }

    /// Write access flags, this class, and superclass
    pub fn define_class_with_super(
        &mut self,
        access_flags: ClassAccessFlags,
        this_class: ClassConstantIndex,
        super_class: ClassConstantIndex,
    ) -> Result<(), Error> {
        access_flags.serialize(&mut self.buf)?;
        this_class.serialize(&mut self.buf)?;
        super_class.serialize(&mut self.buf)?;
        Ok(())
    }

    /// Write the interfaces table
    pub fn declare_interfaces(&mut self, interfaces: &[ClassConstantIndex]) -> Result<(), Error> {
        interfaces.serialize(&mut self.buf)
    }

    /// Write the field count, to be followed by that many [`ClassAssembler::define_field`]
    pub fn declare_fields(&mut self, count: u16) -> Result<(), Error> {
        self.buf.put_u16(count)
    }

    /// Write a field with no attributes
    pub fn define_field(
        &mut self,
        access_flags: FieldAccessFlags,
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    ) -> Result<(), Error> {
        access_flags.serialize(&mut self.buf)?;
        name.serialize(&mut self.buf)?;
        descriptor.serialize(&mut self.buf)?;
        0u16.serialize(&mut self.buf)?;
        Ok(())
    }

    /// Write the method count, to be followed by that many method definitions
    pub fn declare_methods(&mut self, count: u16) -> Result<(), Error> {
        self.buf.put_u16(count)
    }

    /// Write a public no-argument constructor which just calls `Object.<init>`
    pub fn define_default_constructor(&mut self) -> Result<(), Error> {
        let standard = self.standard()?;
        self.begin_method(
            MethodAccessFlags::PUBLIC,
            standard.init_name,
            standard.init_descriptor,
            1,
            1,
        )?;
        self.op(opcodes::ALOAD_0)?;
        self.op(opcodes::INVOKESPECIAL)?;
        self.put_u16(standard.object_init.0 .0)?;
        self.op(opcodes::RETURN)?;
        self.end_method_code()?;
        self.code_attributes(0)?;
        self.end_method()
    }

    /// Write the class attribute count, to be followed by that many
    /// [`ClassAssembler::define_attribute`]
    pub fn declare_class_attributes(&mut self, count: u16) -> Result<(), Error> {
        self.buf.put_u16(count)
    }

    /// Write an opaque attribute (name, length, contents)
    pub fn define_attribute(&mut self, name: Utf8ConstantIndex, info: &[u8]) -> Result<(), Error> {
        let len = u32::try_from(info.len()).map_err(|_| Error::TableTooLong(info.len()))?;
        name.serialize(&mut self.buf)?;
        len.serialize(&mut self.buf)?;
        self.buf.put_bytes(info)
    }
}
