//! Bytecode verification by type checking
//!
//! For any instruction in a method body, the types on the stack and in the locals must be the
//! same no matter which path reached it. Rather than infer those types (a fix-point over the
//! control flow graph), methods carry a `StackMapTable` declaring the frame at every jump target
//! and after every unconditional transfer. Verification is then a single linear pass: simulate
//! each instruction on the current frame, check jumps against the frames they land on, and
//! switch to the declared frame whenever one is reached.
//!
//! Only frames that can arise without `new` are understood, so uninitialized types are rejected
//! when the stack map is read.

use super::code::{self, DecodedInstruction, Instruction};
use super::reader::{ClassFile, CodeInfo, MethodInfo, StackMapFrame};
use crate::jvm::{
    BaseType, ConstantIndex, Error, FieldType, MalformedKind, MemberKind, MethodAccessFlags,
    MethodDescriptor, ParseDescriptor, RenderDescriptor, VerifierErrorKind,
};
use std::collections::BTreeMap;

/// These types are from [this hierarchy][0], minus the uninitialized ones
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se7/html/jvms-4.html#jvms-4.10.1.2
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,

    /// Object type, by binary name (arrays use their descriptor)
    Object(String),
}

impl VerificationType {
    pub fn width(&self) -> usize {
        match self {
            VerificationType::Long | VerificationType::Double => 2,
            _ => 1,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, VerificationType::Null | VerificationType::Object(_))
    }
}

impl From<&FieldType> for VerificationType {
    fn from(field_type: &FieldType) -> VerificationType {
        match field_type {
            FieldType::Base(
                BaseType::Int
                | BaseType::Char
                | BaseType::Short
                | BaseType::Byte
                | BaseType::Boolean,
            ) => VerificationType::Integer,
            FieldType::Base(BaseType::Float) => VerificationType::Float,
            FieldType::Base(BaseType::Long) => VerificationType::Long,
            FieldType::Base(BaseType::Double) => VerificationType::Double,
            FieldType::Object(name) => VerificationType::Object(name.clone()),
            array @ FieldType::Array { .. } => VerificationType::Object(array.render()),
        }
    }
}

/// Snapshot of the stack and local variables at a point in the bytecode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// One entry per local slot, where the second slot of a `long` or `double` is `Top`
    pub locals: Vec<VerificationType>,

    /// One entry per value, whatever its width
    pub stack: Vec<VerificationType>,
}

impl Frame {
    /// Number of stack slots in use
    pub fn depth(&self) -> usize {
        self.stack.iter().map(VerificationType::width).sum()
    }

    fn push(&mut self, typ: VerificationType, max_stack: u16) -> Result<(), VerifierErrorKind> {
        if self.depth() + typ.width() > max_stack as usize {
            return Err(VerifierErrorKind::StackOverflow { max_stack });
        }
        self.stack.push(typ);
        Ok(())
    }

    fn pop(&mut self) -> Result<VerificationType, VerifierErrorKind> {
        self.stack.pop().ok_or(VerifierErrorKind::EmptyStack)
    }

    /// Pop a value that is neither a `long` nor a `double`
    fn pop_narrow(&mut self) -> Result<VerificationType, VerifierErrorKind> {
        let typ = self.pop()?;
        if typ.width() != 1 {
            return Err(VerifierErrorKind::InvalidType);
        }
        Ok(typ)
    }

    fn local(&self, index: u16) -> Result<&VerificationType, VerifierErrorKind> {
        self.locals
            .get(index as usize)
            .ok_or(VerifierErrorKind::InvalidLocal(index))
    }

    fn set_local(&mut self, index: u16, typ: VerificationType) -> Result<(), VerifierErrorKind> {
        let slot = index as usize;
        if slot + typ.width() > self.locals.len() {
            return Err(VerifierErrorKind::InvalidLocal(index));
        }

        // Overwriting the second half of a wide value invalidates the first half
        if slot > 0 && self.locals[slot - 1].width() == 2 {
            self.locals[slot - 1] = VerificationType::Top;
        }
        if typ.width() == 2 {
            self.locals[slot + 1] = VerificationType::Top;
        }
        self.locals[slot] = typ;
        Ok(())
    }
}

enum Failure {
    Verify(VerifierErrorKind),
    Class(Error),
}

impl From<VerifierErrorKind> for Failure {
    fn from(kind: VerifierErrorKind) -> Failure {
        Failure::Verify(kind)
    }
}

impl From<Error> for Failure {
    fn from(err: Error) -> Failure {
        Failure::Class(err)
    }
}

struct MethodVerifier<'a> {
    class: &'a ClassFile,
    method: &'a MethodInfo,
    code: &'a CodeInfo,
    signature: String,
}

impl<'a> MethodVerifier<'a> {
    fn error(&self, code_offset: usize, kind: VerifierErrorKind) -> Error {
        Error::malformed(
            self.code.code_position + code_offset,
            MalformedKind::Verify {
                method: self.signature.clone(),
                code_offset,
                kind,
            },
        )
    }

    /// Can a value of type `from` be used where `to` is expected?
    ///
    /// The only class hierarchy known is that of the class being loaded: it is assignable to its
    /// superclass and its interfaces, and everything is assignable to `java/lang/Object`.
    fn is_assignable(&self, from: &VerificationType, to: &VerificationType) -> bool {
        match (from, to) {
            (_, VerificationType::Top) => true,
            (VerificationType::Null, VerificationType::Object(_)) => true,
            (VerificationType::Object(sub), VerificationType::Object(sup)) => {
                sub == sup
                    || sup == "java/lang/Object"
                    || (sub == &self.class.this_class
                        && (sup == &self.class.super_class
                            || self.class.interfaces.iter().any(|iface| iface == sup)))
            }
            (from, to) => from == to,
        }
    }

    fn is_frame_assignable(&self, from: &Frame, to: &Frame) -> bool {
        from.stack.len() == to.stack.len()
            && from.locals.len() == to.locals.len()
            && from
                .stack
                .iter()
                .zip(&to.stack)
                .all(|(f, t)| self.is_assignable(f, t))
            && from
                .locals
                .iter()
                .zip(&to.locals)
                .all(|(f, t)| self.is_assignable(f, t))
    }

    fn pop_expecting(
        &self,
        frame: &mut Frame,
        expected: &VerificationType,
    ) -> Result<(), VerifierErrorKind> {
        let actual = frame.pop()?;
        if self.is_assignable(&actual, expected) {
            Ok(())
        } else {
            Err(VerifierErrorKind::InvalidType)
        }
    }

    /// Locals on entry, one entry per value
    fn initial_locals(&self) -> Vec<VerificationType> {
        let mut locals: Vec<VerificationType> = vec![];
        if !self.method.access_flags.contains(MethodAccessFlags::STATIC) {
            locals.push(VerificationType::Object(self.class.this_class.clone()));
        }
        locals.extend(self.method.descriptor.parameters.iter().map(Into::into));
        locals
    }

    /// Lay out locals given one entry per value, padding with `Top` up to `max_locals`
    fn expand(
        &self,
        locals: &[VerificationType],
        stack: Vec<VerificationType>,
    ) -> Result<Frame, VerifierErrorKind> {
        let max_locals = self.code.max_locals as usize;
        let mut slots = Vec::with_capacity(max_locals);
        for local in locals {
            slots.push(local.clone());
            if local.width() == 2 {
                slots.push(VerificationType::Top);
            }
        }
        if slots.len() > max_locals {
            return Err(VerifierErrorKind::InvalidLocal(self.code.max_locals));
        }
        slots.resize(max_locals, VerificationType::Top);

        let frame = Frame {
            locals: slots,
            stack,
        };
        if frame.depth() > self.code.max_stack as usize {
            return Err(VerifierErrorKind::StackOverflow {
                max_stack: self.code.max_stack,
            });
        }
        Ok(frame)
    }

    /// Turn the `StackMapTable` deltas into a frame per code offset
    fn declared_frames(
        &self,
        instructions: &[(usize, DecodedInstruction)],
    ) -> Result<BTreeMap<usize, Frame>, Error> {
        let mut locals = self.initial_locals();
        let mut frames = BTreeMap::new();
        let mut previous: Option<usize> = None;

        for stack_map_frame in &self.code.stack_map {
            let delta = stack_map_frame.offset_delta() as usize;
            let offset = match previous {
                None => delta,
                Some(previous) => previous + delta + 1,
            };
            previous = Some(offset);

            let stack = match stack_map_frame {
                StackMapFrame::Same { .. } => vec![],
                StackMapFrame::SameLocals1StackItem { stack, .. } => vec![stack.clone()],
                StackMapFrame::Chop { chopped, .. } => {
                    let chopped = *chopped as usize;
                    if chopped > locals.len() {
                        return Err(self.error(offset, VerifierErrorKind::IncompatibleFrame));
                    }
                    locals.truncate(locals.len() - chopped);
                    vec![]
                }
                StackMapFrame::Append {
                    locals: appended, ..
                } => {
                    locals.extend(appended.iter().cloned());
                    vec![]
                }
                StackMapFrame::Full {
                    locals: full_locals,
                    stack,
                    ..
                } => {
                    locals = full_locals.clone();
                    stack.clone()
                }
            };

            if instructions
                .binary_search_by_key(&offset, |(pc, _)| *pc)
                .is_err()
            {
                return Err(self.error(offset, VerifierErrorKind::MisplacedFrame(offset)));
            }
            let frame = self
                .expand(&locals, stack)
                .map_err(|kind| self.error(offset, kind))?;
            frames.insert(offset, frame);
        }
        Ok(frames)
    }

    fn field_type(&self, index: ConstantIndex, pc: usize) -> Result<(String, FieldType), Error> {
        let offset = self.code.code_position + pc + 1;
        let member = self
            .class
            .constants
            .member_ref(index, MemberKind::Field, offset)?;
        let field_type = FieldType::parse(&member.descriptor).map_err(|_| {
            Error::malformed(offset, MalformedKind::BadDescriptor(member.descriptor.clone()))
        })?;
        Ok((member.class, field_type))
    }

    fn method_type(
        &self,
        index: ConstantIndex,
        kind: MemberKind,
        pc: usize,
    ) -> Result<(String, MethodDescriptor), Error> {
        let offset = self.code.code_position + pc + 1;
        let member = self.class.constants.member_ref(index, kind, offset)?;
        let descriptor = MethodDescriptor::parse(&member.descriptor).map_err(|_| {
            Error::malformed(offset, MalformedKind::BadDescriptor(member.descriptor.clone()))
        })?;
        Ok((member.class, descriptor))
    }

    fn check_jump(
        &self,
        frame: &Frame,
        target: usize,
        frames: &BTreeMap<usize, Frame>,
    ) -> Result<(), VerifierErrorKind> {
        match frames.get(&target) {
            None => Err(VerifierErrorKind::MissingFrame),
            Some(declared) if !self.is_frame_assignable(frame, declared) => {
                Err(VerifierErrorKind::IncompatibleFrame)
            }
            Some(_) => Ok(()),
        }
    }

    /// Update the frame to reflect the effects of one instruction
    fn step(
        &self,
        frame: &mut Frame,
        pc: usize,
        insn: &DecodedInstruction,
        frames: &BTreeMap<usize, Frame>,
    ) -> Result<(), Failure> {
        use VerificationType::*;
        let max_stack = self.code.max_stack;

        match insn {
            Instruction::Push(_) => frame.push(Integer, max_stack)?,
            Instruction::ILoad(index) => {
                if frame.local(*index)? != &Integer {
                    return Err(VerifierErrorKind::InvalidType.into());
                }
                frame.push(Integer, max_stack)?;
            }
            Instruction::ALoad(index) => {
                let typ = frame.local(*index)?.clone();
                if !typ.is_reference() {
                    return Err(VerifierErrorKind::InvalidType.into());
                }
                frame.push(typ, max_stack)?;
            }
            Instruction::IStore(index) => {
                self.pop_expecting(frame, &Integer)?;
                frame.set_local(*index, Integer)?;
            }
            Instruction::AStore(index) => {
                let typ = frame.pop()?;
                if !typ.is_reference() {
                    return Err(VerifierErrorKind::InvalidType.into());
                }
                frame.set_local(*index, typ)?;
            }
            Instruction::Pop => {
                frame.pop_narrow()?;
            }
            Instruction::Dup => {
                let typ = frame.pop_narrow()?;
                frame.push(typ.clone(), max_stack)?;
                frame.push(typ, max_stack)?;
            }
            Instruction::Swap => {
                let top = frame.pop_narrow()?;
                let below = frame.pop_narrow()?;
                frame.push(top, max_stack)?;
                frame.push(below, max_stack)?;
            }
            Instruction::IAdd | Instruction::ISub | Instruction::IMul => {
                self.pop_expecting(frame, &Integer)?;
                self.pop_expecting(frame, &Integer)?;
                frame.push(Integer, max_stack)?;
            }
            Instruction::INeg => {
                self.pop_expecting(frame, &Integer)?;
                frame.push(Integer, max_stack)?;
            }
            Instruction::I2L => {
                self.pop_expecting(frame, &Integer)?;
                frame.push(Long, max_stack)?;
            }
            Instruction::LCmp => {
                self.pop_expecting(frame, &Long)?;
                self.pop_expecting(frame, &Long)?;
                frame.push(Integer, max_stack)?;
            }
            Instruction::DCmp { .. } => {
                self.pop_expecting(frame, &Double)?;
                self.pop_expecting(frame, &Double)?;
                frame.push(Integer, max_stack)?;
            }
            Instruction::If { target, .. } => {
                self.pop_expecting(frame, &Integer)?;
                self.check_jump(frame, *target, frames)?;
            }
            Instruction::IfICmp { target, .. } => {
                self.pop_expecting(frame, &Integer)?;
                self.pop_expecting(frame, &Integer)?;
                self.check_jump(frame, *target, frames)?;
            }
            Instruction::Goto(target) => self.check_jump(frame, *target, frames)?,
            Instruction::IReturn => {
                match &self.method.descriptor.return_type {
                    Some(return_type) if VerificationType::from(return_type) == Integer => (),
                    _ => return Err(VerifierErrorKind::BadReturn.into()),
                }
                self.pop_expecting(frame, &Integer)?;
            }
            Instruction::Return => {
                if self.method.descriptor.return_type.is_some() {
                    return Err(VerifierErrorKind::BadReturn.into());
                }
            }
            Instruction::GetField(index) => {
                let (class, field_type) = self.field_type(*index, pc)?;
                self.pop_expecting(frame, &Object(class))?;
                frame.push((&field_type).into(), max_stack)?;
            }
            Instruction::PutField(index) => {
                let (class, field_type) = self.field_type(*index, pc)?;
                self.pop_expecting(frame, &(&field_type).into())?;
                self.pop_expecting(frame, &Object(class))?;
            }
            Instruction::InvokeSpecial(operand) | Instruction::InvokeInterface(operand) => {
                let kind = match insn {
                    Instruction::InvokeInterface(_) => MemberKind::InterfaceMethod,
                    _ => MemberKind::Method,
                };
                let (class, descriptor) = self.method_type(operand.index, kind, pc)?;
                if let Some(arg_slots) = operand.arg_slots {
                    if arg_slots as usize != descriptor.parameter_length(true) {
                        return Err(VerifierErrorKind::BadOperand.into());
                    }
                }
                for parameter in descriptor.parameters.iter().rev() {
                    self.pop_expecting(frame, &parameter.into())?;
                }
                self.pop_expecting(frame, &Object(class))?;
                if let Some(return_type) = &descriptor.return_type {
                    frame.push(return_type.into(), max_stack)?;
                }
            }
        }
        Ok(())
    }

    fn verify(&self) -> Result<Vec<(usize, DecodedInstruction)>, Error> {
        let instructions =
            code::decode(&self.code.code).map_err(|(pc, kind)| self.error(pc, kind))?;
        let frames = self.declared_frames(&instructions)?;
        let initial = self
            .expand(&self.initial_locals(), vec![])
            .map_err(|kind| self.error(0, kind))?;

        let mut current = Some(initial);
        for (pc, insn) in &instructions {
            if let Some(declared) = frames.get(pc) {
                if let Some(frame) = &current {
                    if !self.is_frame_assignable(frame, declared) {
                        return Err(self.error(*pc, VerifierErrorKind::IncompatibleFrame));
                    }
                }
                current = Some(declared.clone());
            }

            let frame = current
                .as_mut()
                .ok_or_else(|| self.error(*pc, VerifierErrorKind::MissingFrame))?;
            self.step(frame, *pc, insn, &frames)
                .map_err(|failure| match failure {
                    Failure::Verify(kind) => self.error(*pc, kind),
                    Failure::Class(err) => err,
                })?;
            if insn.is_unconditional() {
                current = None;
            }
        }

        if current.is_some() {
            return Err(self.error(self.code.code.len(), VerifierErrorKind::FallsOffEnd));
        }
        Ok(instructions)
    }
}

/// Type-check a method body against its stack map frames
///
/// Returns the decoded instructions (with their code offsets), or `None` for abstract methods.
pub fn verify_method(
    class: &ClassFile,
    method: &MethodInfo,
) -> Result<Option<Vec<(usize, DecodedInstruction)>>, Error> {
    let code = match &method.code {
        None => return Ok(None),
        Some(code) => code,
    };
    let verifier = MethodVerifier {
        class,
        method,
        code,
        signature: method.signature(),
    };
    let instructions = verifier.verify()?;
    log::trace!(
        "verified {}.{} ({} instructions)",
        class.this_class,
        verifier.signature,
        instructions.len()
    );
    Ok(Some(instructions))
}
