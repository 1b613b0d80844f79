use crate::jvm::{opcodes, ConstantIndex, VerifierErrorKind};

/// Condition tested by `if<cond>` and `if_icmp<cond>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl Comparison {
    fn from_offset(offset: u8) -> Comparison {
        match offset {
            0 => Comparison::Eq,
            1 => Comparison::Ne,
            2 => Comparison::Lt,
            3 => Comparison::Ge,
            4 => Comparison::Gt,
            _ => Comparison::Le,
        }
    }

    pub fn holds(self, lhs: i32, rhs: i32) -> bool {
        match self {
            Comparison::Eq => lhs == rhs,
            Comparison::Ne => lhs != rhs,
            Comparison::Lt => lhs < rhs,
            Comparison::Ge => lhs >= rhs,
            Comparison::Gt => lhs > rhs,
            Comparison::Le => lhs <= rhs,
        }
    }
}

/// Instructions of the supported subset
///
/// The type parameters are how jump targets, field operands, and method operands are
/// represented. Freshly decoded code uses code offsets and constant pool indices; linked code
/// uses instruction indices and resolved members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction<T, F, M> {
    /// `iconst_<n>`, `bipush`, `sipush`
    Push(i32),
    ILoad(u16),
    ALoad(u16),
    IStore(u16),
    AStore(u16),
    Pop,
    Dup,
    Swap,
    IAdd,
    ISub,
    IMul,
    INeg,
    I2L,
    LCmp,

    /// `dcmpl` (NaN compares as `-1`) or `dcmpg` (NaN compares as `1`)
    DCmp {
        nan_result: i32,
    },

    /// Compare the top of the stack against zero
    If {
        comparison: Comparison,
        target: T,
    },

    /// Compare the top two ints of the stack
    IfICmp {
        comparison: Comparison,
        target: T,
    },
    Goto(T),
    IReturn,
    Return,
    GetField(F),
    PutField(F),
    InvokeSpecial(M),
    InvokeInterface(M),
}

impl<T, F, M> Instruction<T, F, M> {
    /// Does control never continue to the next instruction?
    pub fn is_unconditional(&self) -> bool {
        matches!(
            self,
            Instruction::Goto(_) | Instruction::IReturn | Instruction::Return
        )
    }

    pub fn jump_target(&self) -> Option<&T> {
        match self {
            Instruction::If { target, .. }
            | Instruction::IfICmp { target, .. }
            | Instruction::Goto(target) => Some(target),
            _ => None,
        }
    }
}

/// Method operand of a freshly decoded invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodOperand {
    pub index: ConstantIndex,

    /// The `count` operand of `invokeinterface` (always `None` for `invokespecial`)
    pub arg_slots: Option<u8>,
}

/// Instruction as decoded from bytes
pub type DecodedInstruction = Instruction<usize, ConstantIndex, MethodOperand>;

/// Decode failure, with the code offset of the offending instruction
pub type DecodeError = (usize, VerifierErrorKind);

struct Decoder<'c> {
    code: &'c [u8],
    pc: usize,
}

impl<'c> Decoder<'c> {
    fn u8(&mut self) -> Option<u8> {
        let byte = *self.code.get(self.pc)?;
        self.pc += 1;
        Some(byte)
    }

    fn u16(&mut self) -> Option<u16> {
        let hi = self.u8()?;
        let lo = self.u8()?;
        Some(u16::from_be_bytes([hi, lo]))
    }

    fn i16(&mut self) -> Option<i16> {
        self.u16().map(|value| value as i16)
    }

    /// Read a branch offset and build the jump with its absolute target
    fn branch(
        &mut self,
        instruction_pc: usize,
        make: impl FnOnce(usize) -> DecodedInstruction,
    ) -> Option<Result<DecodedInstruction, VerifierErrorKind>> {
        let delta = self.i16()?;
        let target = instruction_pc as i32 + delta as i32;
        if target < 0 || target as usize >= self.code.len() {
            Some(Err(VerifierErrorKind::BadBranchTarget(target)))
        } else {
            Some(Ok(make(target as usize)))
        }
    }

    /// Decode one instruction, `None` meaning the code ends mid-instruction
    fn instruction(&mut self, pc: usize) -> Option<Result<DecodedInstruction, VerifierErrorKind>> {
        use opcodes::*;

        let opcode = self.u8()?;

        let insn = match opcode {
            ICONST_M1..=ICONST_5 => Instruction::Push(opcode as i32 - ICONST_0 as i32),
            BIPUSH => Instruction::Push(self.u8()? as i8 as i32),
            SIPUSH => Instruction::Push(self.i16()? as i32),
            ILOAD => Instruction::ILoad(self.u8()? as u16),
            ALOAD => Instruction::ALoad(self.u8()? as u16),
            ISTORE => Instruction::IStore(self.u8()? as u16),
            ASTORE => Instruction::AStore(self.u8()? as u16),
            ILOAD_0..=ILOAD_3 => Instruction::ILoad((opcode - ILOAD_0) as u16),
            ALOAD_0..=ALOAD_3 => Instruction::ALoad((opcode - ALOAD_0) as u16),
            ISTORE_0..=ISTORE_3 => Instruction::IStore((opcode - ISTORE_0) as u16),
            ASTORE_0..=ASTORE_3 => Instruction::AStore((opcode - ASTORE_0) as u16),
            POP => Instruction::Pop,
            DUP => Instruction::Dup,
            SWAP => Instruction::Swap,
            IADD => Instruction::IAdd,
            ISUB => Instruction::ISub,
            IMUL => Instruction::IMul,
            INEG => Instruction::INeg,
            I2L => Instruction::I2L,
            LCMP => Instruction::LCmp,
            DCMPL => Instruction::DCmp { nan_result: -1 },
            DCMPG => Instruction::DCmp { nan_result: 1 },
            IFEQ..=IFLE => {
                let comparison = Comparison::from_offset(opcode - IFEQ);
                return self.branch(pc, |target| Instruction::If { comparison, target });
            }
            IF_ICMPEQ..=IF_ICMPLE => {
                let comparison = Comparison::from_offset(opcode - IF_ICMPEQ);
                return self.branch(pc, |target| Instruction::IfICmp { comparison, target });
            }
            GOTO => return self.branch(pc, Instruction::Goto),
            IRETURN => Instruction::IReturn,
            RETURN => Instruction::Return,
            GETFIELD => Instruction::GetField(ConstantIndex(self.u16()?)),
            PUTFIELD => Instruction::PutField(ConstantIndex(self.u16()?)),
            INVOKESPECIAL => Instruction::InvokeSpecial(MethodOperand {
                index: ConstantIndex(self.u16()?),
                arg_slots: None,
            }),
            INVOKEINTERFACE => {
                let index = ConstantIndex(self.u16()?);
                let arg_slots = self.u8()?;
                if self.u8()? != 0 || arg_slots == 0 {
                    return Some(Err(VerifierErrorKind::BadOperand));
                }
                Instruction::InvokeInterface(MethodOperand {
                    index,
                    arg_slots: Some(arg_slots),
                })
            }
            other => return Some(Err(VerifierErrorKind::UnsupportedOpcode(other))),
        };
        Some(Ok(insn))
    }
}

/// Decode a whole method body
///
/// Returns every instruction along with its code offset. Jump targets are checked to be in
/// bounds and to land on an instruction.
pub fn decode(code: &[u8]) -> Result<Vec<(usize, DecodedInstruction)>, DecodeError> {
    let mut decoder = Decoder { code, pc: 0 };
    let mut instructions = vec![];
    while decoder.pc < code.len() {
        let pc = decoder.pc;
        match decoder.instruction(pc) {
            None => return Err((pc, VerifierErrorKind::TruncatedInstruction)),
            Some(Err(kind)) => return Err((pc, kind)),
            Some(Ok(insn)) => instructions.push((pc, insn)),
        }
    }

    for (pc, insn) in &instructions {
        if let Some(&target) = insn.jump_target() {
            if instructions.binary_search_by_key(&target, |(pc, _)| *pc).is_err() {
                return Err((*pc, VerifierErrorKind::BadBranchTarget(target as i32)));
            }
        }
    }
    Ok(instructions)
}
