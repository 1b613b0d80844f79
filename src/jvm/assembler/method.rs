use super::{ClassAssembler, OpenMethod};
use crate::jvm::{
    opcodes, Contract, Error, MemberRefConstantIndex, MethodAccessFlags, Serialize,
    Utf8ConstantIndex,
};

/// Forward branch whose 16-bit offset has not been written yet
///
/// Returned by [`ClassAssembler::jump`] and consumed by [`ClassAssembler::place_jump`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a forward jump must be placed"]
pub struct JumpSite {
    /// Code offset of the branch opcode (offsets are relative to this)
    instruction_offset: usize,

    /// Buffer position of the offset operand
    operand_position: usize,
}

impl ClassAssembler {
    fn open_method(&self) -> Result<&OpenMethod, Error> {
        self.method
            .as_ref()
            .ok_or(Error::ContractViolation(Contract::NoOpenMethod))
    }

    fn open_code(&self) -> Result<&OpenMethod, Error> {
        let method = self.open_method()?;
        if method.code_length.is_none() {
            return Err(Contract::CodeAlreadyClosed.into());
        }
        Ok(method)
    }

    /// Write the method header and the start of its `Code` attribute
    ///
    /// The method gets exactly one attribute (`Code`), whose length and bytecode length are
    /// reserved here and patched by [`ClassAssembler::end_method_code`] and
    /// [`ClassAssembler::end_method`].
    pub fn begin_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
        max_stack: u16,
        max_locals: u16,
    ) -> Result<(), Error> {
        if self.method.is_some() {
            return Err(Contract::MethodAlreadyOpen.into());
        }
        let code_attribute = self.standard()?.code_attribute;

        access_flags.serialize(&mut self.buf)?;
        name.serialize(&mut self.buf)?;
        descriptor.serialize(&mut self.buf)?;
        1u16.serialize(&mut self.buf)?;

        code_attribute.serialize(&mut self.buf)?;
        let attribute_length = self.buf.reserve_u32()?;
        max_stack.serialize(&mut self.buf)?;
        max_locals.serialize(&mut self.buf)?;
        let code_length = self.buf.reserve_u32()?;
        let code_start = self.buf.position();

        log::trace!(
            "method #{} starts at {} (max_stack = {}, max_locals = {})",
            name.0 .0,
            code_start,
            max_stack,
            max_locals
        );
        self.method = Some(OpenMethod {
            attribute_length,
            code_length: Some(code_length),
            code_start,
        });
        Ok(())
    }

    /// Offset of the next instruction from the start of the method's bytecode
    pub fn code_offset(&self) -> Result<usize, Error> {
        Ok(self.buf.position() - self.open_code()?.code_start)
    }

    /// Append an opcode byte
    pub fn op(&mut self, opcode: u8) -> Result<(), Error> {
        self.open_code()?;
        self.buf.put_u8(opcode)
    }

    /// Push an `int` constant using the shortest encoding
    ///
    /// `iconst_<n>` covers `-1..=5` and `bipush` covers `6..=127`. Everything else, including all
    /// negatives below `-1`, goes through `sipush` (the operand is truncated to 16 bits).
    pub fn push_int(&mut self, value: i32) -> Result<(), Error> {
        if (-1..6).contains(&value) {
            self.op((opcodes::ICONST_0 as i32 + value) as u8)
        } else if value < 0 {
            self.op(opcodes::SIPUSH)?;
            self.put_i16(value as i16)
        } else if value < 128 {
            self.op(opcodes::BIPUSH)?;
            self.put_u8(value as u8)
        } else {
            self.op(opcodes::SIPUSH)?;
            self.put_i16(value as i16)
        }
    }

    /// Load an `int` local, using the short forms for the first four slots
    pub fn iload(&mut self, local: u8) -> Result<(), Error> {
        match local {
            0..=3 => self.op(opcodes::ILOAD_0 + local),
            _ => {
                self.op(opcodes::ILOAD)?;
                self.put_u8(local)
            }
        }
    }

    /// Store an `int` local, using the short forms for the first four slots
    pub fn istore(&mut self, local: u8) -> Result<(), Error> {
        match local {
            0..=3 => self.op(opcodes::ISTORE_0 + local),
            _ => {
                self.op(opcodes::ISTORE)?;
                self.put_u8(local)
            }
        }
    }

    /// Load a reference local, using the short forms for the first four slots
    pub fn aload(&mut self, local: u8) -> Result<(), Error> {
        match local {
            0..=3 => self.op(opcodes::ALOAD_0 + local),
            _ => {
                self.op(opcodes::ALOAD)?;
                self.put_u8(local)
            }
        }
    }

    pub fn get_field(&mut self, field: MemberRefConstantIndex) -> Result<(), Error> {
        self.op(opcodes::GETFIELD)?;
        field.serialize(&mut self.buf)
    }

    pub fn put_field(&mut self, field: MemberRefConstantIndex) -> Result<(), Error> {
        self.op(opcodes::PUTFIELD)?;
        field.serialize(&mut self.buf)
    }

    /// Call an interface method
    ///
    /// `arg_slots` counts the receiver and all arguments, where `long` and `double` take two.
    pub fn invoke_interface(
        &mut self,
        method: MemberRefConstantIndex,
        arg_slots: u8,
    ) -> Result<(), Error> {
        self.op(opcodes::INVOKEINTERFACE)?;
        method.serialize(&mut self.buf)?;
        self.put_u8(arg_slots)?;
        self.put_u8(0)
    }

    /// Emit a branch instruction whose target is further ahead
    pub fn jump(&mut self, opcode: u8) -> Result<JumpSite, Error> {
        let instruction_offset = self.code_offset()?;
        self.op(opcode)?;
        let operand_position = self.buf.position();
        self.put_i16(0)?;
        Ok(JumpSite {
            instruction_offset,
            operand_position,
        })
    }

    /// Make a forward jump land on the next instruction to be emitted
    ///
    /// Returns the code offset of the target (eg. for [`ClassAssembler::stack_map_append_int`]).
    pub fn place_jump(&mut self, site: JumpSite) -> Result<usize, Error> {
        let target = self.code_offset()?;
        if target <= site.instruction_offset {
            return Err(Contract::BackwardJump.into());
        }
        let delta = target - site.instruction_offset;
        if delta > i16::MAX as usize {
            return Err(Contract::CodeTooLarge(delta).into());
        }
        self.buf.overwrite_u16(site.operand_position, delta as u16);
        Ok(target)
    }

    /// Patch the bytecode length, closing the instruction stream
    ///
    /// Only the exception table and code attributes may follow before
    /// [`ClassAssembler::end_method`].
    pub fn end_method_code(&mut self) -> Result<(), Error> {
        let method = self
            .method
            .as_mut()
            .ok_or(Error::ContractViolation(Contract::NoOpenMethod))?;
        let length = method
            .code_length
            .as_ref()
            .ok_or(Error::ContractViolation(Contract::CodeAlreadyClosed))?
            .span_to(self.buf.position());
        if length == 0 {
            return Err(Contract::EmptyCode.into());
        }
        if length >= 65536 {
            return Err(Contract::CodeTooLarge(length).into());
        }
        // A rejected close leaves the instruction stream open
        if let Some(code_length) = method.code_length.take() {
            self.buf.patch_u32(code_length, length as u32);
        }
        Ok(())
    }

    /// Write an empty exception table followed by the count of `Code` attributes
    pub fn code_attributes(&mut self, count: u16) -> Result<(), Error> {
        0u16.serialize(&mut self.buf)?;
        count.serialize(&mut self.buf)
    }

    /// Write a `StackMapTable` with a single frame appending one `int` local at `target`
    ///
    /// Since this is always the only frame of its table, the offset delta is just the target
    /// offset. Each call writes a whole attribute and must be counted in
    /// [`ClassAssembler::code_attributes`].
    pub fn stack_map_append_int(
        &mut self,
        stack_map_table: Utf8ConstantIndex,
        target: u16,
    ) -> Result<(), Error> {
        stack_map_table.serialize(&mut self.buf)?;
        let length = self.buf.reserve_u32()?;
        1u16.serialize(&mut self.buf)?;
        // `append_frame` adding one local
        252u8.serialize(&mut self.buf)?;
        target.serialize(&mut self.buf)?;
        // `Integer_variable_info`
        1u8.serialize(&mut self.buf)?;
        let span = length.span_to(self.buf.position());
        self.buf.patch_u32(length, span as u32);
        Ok(())
    }

    /// Patch the `Code` attribute length, closing the method
    pub fn end_method(&mut self) -> Result<(), Error> {
        match self.method.take() {
            None => Err(Contract::NoOpenMethod.into()),
            Some(method) if method.code_length.is_some() => {
                self.method = Some(method);
                Err(Contract::CodeStillOpen.into())
            }
            Some(method) => {
                let span = method.attribute_length.span_to(self.buf.position());
                log::trace!("method ends at {} (Code is {} bytes)", self.buf.position(), span);
                self.buf.patch_u32(method.attribute_length, span as u32);
                Ok(())
            }
        }
    }
}
