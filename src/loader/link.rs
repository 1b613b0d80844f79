use super::code::{DecodedInstruction, Instruction};
use super::reader::{ClassFile, MethodInfo};
use crate::jvm::{
    ConstantIndex, Error, FieldAccessFlags, LinkError, MalformedKind, MemberKind,
    MethodAccessFlags, RenderDescriptor, VerifierErrorKind,
};
use crate::record::{
    ColumnKind, COMPARE_DESCRIPTOR, COMPARE_NAME, RECORD_CLASS, RECORD_COMPARATOR_CLASS,
    SET_LEFT_DESCRIPTOR, SET_LEFT_NAME,
};

const OBJECT_CLASS: &str = "java/lang/Object";

/// Method an invoke instruction is bound to
///
/// Loaded code lives in a closed world: besides its own class it can only reach the
/// `java/lang/Object` constructor and the accessors of `Record`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkedMethod {
    ObjectInit,
    RecordAccessor(ColumnKind),
}

/// Instruction with jumps as instruction indices, fields as slots, and bound methods
pub type LinkedInstruction = Instruction<usize, usize, LinkedMethod>;

/// Method body ready to be interpreted
#[derive(Debug, Clone)]
pub struct LinkedCode {
    pub max_stack: u16,
    pub max_locals: u16,
    pub instructions: Vec<LinkedInstruction>,

    /// Code offset of each instruction, for diagnostics
    pub code_offsets: Vec<usize>,
}

fn unresolved_field(class: String, name: String, descriptor: String) -> Error {
    LinkError::UnresolvedField {
        class,
        name,
        descriptor,
    }
    .into()
}

fn unresolved_method(class: String, name: String, descriptor: String) -> Error {
    LinkError::UnresolvedMethod {
        class,
        name,
        descriptor,
    }
    .into()
}

/// Find the slot of an instance field declared by the class itself
fn link_field(class: &ClassFile, index: ConstantIndex, offset: usize) -> Result<usize, Error> {
    let member = class
        .constants
        .member_ref(index, MemberKind::Field, offset)?;
    if member.class != class.this_class {
        return Err(unresolved_field(member.class, member.name, member.descriptor));
    }
    class
        .fields
        .iter()
        .position(|field| {
            field.name == member.name
                && field.descriptor.render() == member.descriptor
                && !field.access_flags.contains(FieldAccessFlags::STATIC)
        })
        .ok_or_else(|| unresolved_field(member.class, member.name, member.descriptor))
}

fn link_method(
    class: &ClassFile,
    index: ConstantIndex,
    kind: MemberKind,
    offset: usize,
) -> Result<LinkedMethod, Error> {
    let member = class.constants.member_ref(index, kind, offset)?;
    let linked = match kind {
        MemberKind::Method
            if member.class == OBJECT_CLASS
                && member.name == "<init>"
                && member.descriptor == "()V" =>
        {
            Some(LinkedMethod::ObjectInit)
        }
        MemberKind::InterfaceMethod if member.class == RECORD_CLASS => {
            ColumnKind::from_accessor(&member.name, &member.descriptor)
                .map(LinkedMethod::RecordAccessor)
        }
        _ => None,
    };
    linked.ok_or_else(|| unresolved_method(member.class, member.name, member.descriptor))
}

/// Bind the members a verified method body refers to
pub fn link_code(
    class: &ClassFile,
    method: &MethodInfo,
    decoded: Vec<(usize, DecodedInstruction)>,
) -> Result<Option<LinkedCode>, Error> {
    let code = match &method.code {
        None => return Ok(None),
        Some(code) => code,
    };
    let code_offsets: Vec<usize> = decoded.iter().map(|(pc, _)| *pc).collect();
    let instruction_index = |pc: usize, target: usize| {
        code_offsets.binary_search(&target).map_err(|_| {
            Error::malformed(
                code.code_position + pc,
                MalformedKind::Verify {
                    method: method.signature(),
                    code_offset: pc,
                    kind: VerifierErrorKind::BadBranchTarget(target as i32),
                },
            )
        })
    };

    let mut instructions = Vec::with_capacity(decoded.len());
    for (pc, insn) in decoded {
        let offset = code.code_position + pc + 1;
        let linked = match insn {
            Instruction::Push(value) => Instruction::Push(value),
            Instruction::ILoad(local) => Instruction::ILoad(local),
            Instruction::ALoad(local) => Instruction::ALoad(local),
            Instruction::IStore(local) => Instruction::IStore(local),
            Instruction::AStore(local) => Instruction::AStore(local),
            Instruction::Pop => Instruction::Pop,
            Instruction::Dup => Instruction::Dup,
            Instruction::Swap => Instruction::Swap,
            Instruction::IAdd => Instruction::IAdd,
            Instruction::ISub => Instruction::ISub,
            Instruction::IMul => Instruction::IMul,
            Instruction::INeg => Instruction::INeg,
            Instruction::I2L => Instruction::I2L,
            Instruction::LCmp => Instruction::LCmp,
            Instruction::DCmp { nan_result } => Instruction::DCmp { nan_result },
            Instruction::If { comparison, target } => Instruction::If {
                comparison,
                target: instruction_index(pc, target)?,
            },
            Instruction::IfICmp { comparison, target } => Instruction::IfICmp {
                comparison,
                target: instruction_index(pc, target)?,
            },
            Instruction::Goto(target) => Instruction::Goto(instruction_index(pc, target)?),
            Instruction::IReturn => Instruction::IReturn,
            Instruction::Return => Instruction::Return,
            Instruction::GetField(index) => {
                Instruction::GetField(link_field(class, index, offset)?)
            }
            Instruction::PutField(index) => {
                Instruction::PutField(link_field(class, index, offset)?)
            }
            Instruction::InvokeSpecial(operand) => Instruction::InvokeSpecial(link_method(
                class,
                operand.index,
                MemberKind::Method,
                offset,
            )?),
            Instruction::InvokeInterface(operand) => Instruction::InvokeInterface(link_method(
                class,
                operand.index,
                MemberKind::InterfaceMethod,
                offset,
            )?),
        };
        instructions.push(linked);
    }

    Ok(Some(LinkedCode {
        max_stack: code.max_stack,
        max_locals: code.max_locals,
        instructions,
        code_offsets,
    }))
}

fn has_instance_method(class: &ClassFile, name: &str, descriptor: &str) -> bool {
    class.methods.iter().any(|method| {
        method.name == name
            && method.descriptor_text == descriptor
            && method.code.is_some()
            && !method.access_flags.contains(MethodAccessFlags::STATIC)
    })
}

/// Class-level link checks: superclass, constructor, and capability methods
pub fn check_class(class: &ClassFile) -> Result<(), LinkError> {
    if class.super_class != OBJECT_CLASS {
        return Err(LinkError::UnsupportedSuperclass(class.super_class.clone()));
    }
    if !has_instance_method(class, "<init>", "()V") {
        return Err(LinkError::MissingConstructor(class.this_class.clone()));
    }

    if class.interfaces.iter().any(|iface| iface == RECORD_COMPARATOR_CLASS) {
        let capability = [
            (SET_LEFT_NAME, SET_LEFT_DESCRIPTOR),
            (COMPARE_NAME, COMPARE_DESCRIPTOR),
        ];
        for (name, descriptor) in capability {
            if !has_instance_method(class, name, descriptor) {
                return Err(LinkError::MissingCapabilityMethod {
                    class: class.this_class.clone(),
                    name: name.to_owned(),
                    descriptor: descriptor.to_owned(),
                });
            }
        }
    }
    Ok(())
}
