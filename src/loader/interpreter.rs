use super::code::Instruction;
use super::link::{LinkedCode, LinkedMethod};
use crate::jvm::{BaseType, ExecutionError, FieldType, TrapKind};
use crate::record::{ColumnKind, Record};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

/// Reference value as seen by loaded code
#[derive(Clone)]
pub enum Reference<'r> {
    Null,

    /// The instance whose method is running
    This,

    /// A record the instance may hold on to
    Shared(Rc<dyn Record>),

    /// A record that only lives for the duration of the call
    Borrowed(&'r dyn Record),
}

impl<'r> Reference<'r> {
    fn record(&self) -> Result<&dyn Record, TrapKind> {
        match self {
            Reference::Null => Err(TrapKind::NullReference),
            Reference::This => Err(TrapKind::WrongReceiver),
            Reference::Shared(record) => Ok(record.as_ref()),
            Reference::Borrowed(record) => Ok(*record),
        }
    }

    /// Version of the reference that can be stored in a field
    fn to_stored(&self) -> Result<Reference<'static>, TrapKind> {
        match self {
            Reference::Null => Ok(Reference::Null),
            Reference::This => Ok(Reference::This),
            Reference::Shared(record) => Ok(Reference::Shared(record.clone())),
            Reference::Borrowed(_) => Err(TrapKind::EscapingReference),
        }
    }
}

impl<'r> fmt::Debug for Reference<'r> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Null => f.write_str("null"),
            Reference::This => f.write_str("this"),
            Reference::Shared(record) => write!(f, "shared record @ {:p}", Rc::as_ptr(record)),
            Reference::Borrowed(record) => write!(f, "borrowed record @ {:p}", *record),
        }
    }
}

/// Value on the operand stack, in a local, or in a field
///
/// `long` and `double` take up a single value here even though they take two slots in the
/// class file's accounting.
#[derive(Clone, Debug)]
pub enum Value<'r> {
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Reference(Reference<'r>),
}

impl<'r> Value<'r> {
    /// Initial value of a field of this type
    pub fn zero(field_type: &FieldType) -> Value<'static> {
        match field_type {
            FieldType::Base(BaseType::Long) => Value::Long(0),
            FieldType::Base(BaseType::Double) => Value::Double(0.0),
            FieldType::Base(BaseType::Float) => Value::Float(0.0),
            FieldType::Base(_) => Value::Int(0),
            FieldType::Object(_) | FieldType::Array { .. } => Value::Reference(Reference::Null),
        }
    }

    /// Can this value be passed where the type is expected?
    pub fn has_type(&self, field_type: &FieldType) -> bool {
        matches!(
            (self, field_type),
            (Value::Long(_), FieldType::Base(BaseType::Long))
                | (Value::Double(_), FieldType::Base(BaseType::Double))
                | (Value::Float(_), FieldType::Base(BaseType::Float))
                | (
                    Value::Int(_),
                    FieldType::Base(
                        BaseType::Int
                            | BaseType::Short
                            | BaseType::Char
                            | BaseType::Byte
                            | BaseType::Boolean
                    )
                )
                | (
                    Value::Reference(_),
                    FieldType::Object(_) | FieldType::Array { .. }
                )
        )
    }

    /// Slots taken up in the locals
    fn width(&self) -> usize {
        match self {
            Value::Long(_) | Value::Double(_) => 2,
            _ => 1,
        }
    }

    fn to_stored(&self) -> Result<Value<'static>, TrapKind> {
        Ok(match self {
            Value::Int(value) => Value::Int(*value),
            Value::Float(value) => Value::Float(*value),
            Value::Long(value) => Value::Long(*value),
            Value::Double(value) => Value::Double(*value),
            Value::Reference(reference) => Value::Reference(reference.to_stored()?),
        })
    }
}

fn ordering_to_int(ordering: Ordering) -> i32 {
    match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// Instructions one call may execute before it traps with [`TrapKind::StepLimit`]
///
/// Code without backward jumps runs each instruction at most once, so only loops get near this.
pub const STEP_LIMIT: usize = 1 << 20;

/// Execution state of one method call
struct Activation<'c, 'r> {
    code: &'c LinkedCode,
    locals: Vec<Value<'r>>,
    stack: Vec<Value<'r>>,
}

impl<'c, 'r> Activation<'c, 'r> {
    fn pop(&mut self) -> Result<Value<'r>, TrapKind> {
        self.stack.pop().ok_or(TrapKind::BadOperands)
    }

    fn pop_int(&mut self) -> Result<i32, TrapKind> {
        match self.pop()? {
            Value::Int(value) => Ok(value),
            _ => Err(TrapKind::BadOperands),
        }
    }

    fn pop_long(&mut self) -> Result<i64, TrapKind> {
        match self.pop()? {
            Value::Long(value) => Ok(value),
            _ => Err(TrapKind::BadOperands),
        }
    }

    fn pop_double(&mut self) -> Result<f64, TrapKind> {
        match self.pop()? {
            Value::Double(value) => Ok(value),
            _ => Err(TrapKind::BadOperands),
        }
    }

    fn pop_reference(&mut self) -> Result<Reference<'r>, TrapKind> {
        match self.pop()? {
            Value::Reference(reference) => Ok(reference),
            _ => Err(TrapKind::BadOperands),
        }
    }

    fn load(&mut self, local: u16) -> Result<(), TrapKind> {
        let value = self
            .locals
            .get(local as usize)
            .cloned()
            .ok_or(TrapKind::BadOperands)?;
        self.stack.push(value);
        Ok(())
    }

    fn store(&mut self, local: u16) -> Result<(), TrapKind> {
        let value = self.pop()?;
        let slot = self
            .locals
            .get_mut(local as usize)
            .ok_or(TrapKind::BadOperands)?;
        *slot = value;
        Ok(())
    }

    fn int_binary(&mut self, op: fn(i32, i32) -> i32) -> Result<(), TrapKind> {
        let rhs = self.pop_int()?;
        let lhs = self.pop_int()?;
        self.stack.push(Value::Int(op(lhs, rhs)));
        Ok(())
    }

    /// Run from the first instruction until a return
    ///
    /// Returns the instruction index where a trap happened along with the trap.
    fn run(
        &mut self,
        fields: &mut [Value<'static>],
    ) -> Result<Option<Value<'r>>, (usize, TrapKind)> {
        let code = self.code;
        let mut ip = 0;
        for _ in 0..STEP_LIMIT {
            let current = ip;
            let insn = code
                .instructions
                .get(ip)
                .ok_or((current, TrapKind::BadOperands))?;
            ip += 1;
            let trap = |kind: TrapKind| (current, kind);

            match insn {
                Instruction::Push(value) => self.stack.push(Value::Int(*value)),
                Instruction::ILoad(local) | Instruction::ALoad(local) => {
                    self.load(*local).map_err(trap)?
                }
                Instruction::IStore(local) | Instruction::AStore(local) => {
                    self.store(*local).map_err(trap)?
                }
                Instruction::Pop => {
                    self.pop().map_err(trap)?;
                }
                Instruction::Dup => {
                    let value = self.pop().map_err(trap)?;
                    self.stack.push(value.clone());
                    self.stack.push(value);
                }
                Instruction::Swap => {
                    let top = self.pop().map_err(trap)?;
                    let below = self.pop().map_err(trap)?;
                    self.stack.push(top);
                    self.stack.push(below);
                }
                Instruction::IAdd => self.int_binary(i32::wrapping_add).map_err(trap)?,
                Instruction::ISub => self.int_binary(i32::wrapping_sub).map_err(trap)?,
                Instruction::IMul => self.int_binary(i32::wrapping_mul).map_err(trap)?,
                Instruction::INeg => {
                    let value = self.pop_int().map_err(trap)?;
                    self.stack.push(Value::Int(value.wrapping_neg()));
                }
                Instruction::I2L => {
                    let value = self.pop_int().map_err(trap)?;
                    self.stack.push(Value::Long(value as i64));
                }
                Instruction::LCmp => {
                    let rhs = self.pop_long().map_err(trap)?;
                    let lhs = self.pop_long().map_err(trap)?;
                    self.stack.push(Value::Int(ordering_to_int(lhs.cmp(&rhs))));
                }
                Instruction::DCmp { nan_result } => {
                    let rhs = self.pop_double().map_err(trap)?;
                    let lhs = self.pop_double().map_err(trap)?;
                    let result = lhs
                        .partial_cmp(&rhs)
                        .map(ordering_to_int)
                        .unwrap_or(*nan_result);
                    self.stack.push(Value::Int(result));
                }
                Instruction::If { comparison, target } => {
                    let value = self.pop_int().map_err(trap)?;
                    if comparison.holds(value, 0) {
                        ip = *target;
                    }
                }
                Instruction::IfICmp { comparison, target } => {
                    let rhs = self.pop_int().map_err(trap)?;
                    let lhs = self.pop_int().map_err(trap)?;
                    if comparison.holds(lhs, rhs) {
                        ip = *target;
                    }
                }
                Instruction::Goto(target) => ip = *target,
                Instruction::IReturn => return Ok(Some(self.pop().map_err(trap)?)),
                Instruction::Return => return Ok(None),
                Instruction::GetField(slot) => {
                    match self.pop_reference().map_err(trap)? {
                        Reference::This => (),
                        Reference::Null => return Err(trap(TrapKind::NullReference)),
                        _ => return Err(trap(TrapKind::WrongReceiver)),
                    }
                    let value = fields.get(*slot).cloned().ok_or(trap(TrapKind::BadOperands))?;
                    self.stack.push(value);
                }
                Instruction::PutField(slot) => {
                    let value = self.pop().map_err(trap)?;
                    match self.pop_reference().map_err(trap)? {
                        Reference::This => (),
                        Reference::Null => return Err(trap(TrapKind::NullReference)),
                        _ => return Err(trap(TrapKind::WrongReceiver)),
                    }
                    let stored = value.to_stored().map_err(trap)?;
                    let field = fields.get_mut(*slot).ok_or(trap(TrapKind::BadOperands))?;
                    *field = stored;
                }
                Instruction::InvokeSpecial(method) | Instruction::InvokeInterface(method) => {
                    match method {
                        LinkedMethod::ObjectInit => {
                            if let Reference::Null = self.pop_reference().map_err(trap)? {
                                return Err(trap(TrapKind::NullReference));
                            }
                        }
                        LinkedMethod::RecordAccessor(kind) => {
                            let column = self.pop_int().map_err(trap)?;
                            let receiver = self.pop_reference().map_err(trap)?;
                            let record = receiver.record().map_err(trap)?;
                            let value = match kind {
                                ColumnKind::Int => Value::Int(record.get_int(column)),
                                ColumnKind::Long => Value::Long(record.get_long(column)),
                                ColumnKind::Double => Value::Double(record.get_double(column)),
                            };
                            self.stack.push(value);
                        }
                    }
                }
            }
        }
        Err((ip, TrapKind::StepLimit))
    }
}

/// Run a linked method body
///
/// `this` is `None` for static methods. Arguments must already have been checked against the
/// descriptor.
pub fn execute<'r>(
    signature: &str,
    code: &LinkedCode,
    this: Option<&mut [Value<'static>]>,
    args: Vec<Value<'r>>,
) -> Result<Option<Value<'r>>, ExecutionError> {
    let mut locals = vec![Value::Int(0); code.max_locals as usize];
    let mut slot = 0;
    let mut no_fields: [Value<'static>; 0] = [];
    let fields = match this {
        Some(fields) => {
            if let Some(local) = locals.get_mut(0) {
                *local = Value::Reference(Reference::This);
            }
            slot = 1;
            fields
        }
        None => &mut no_fields[..],
    };
    for arg in args {
        let width = arg.width();
        if let Some(local) = locals.get_mut(slot) {
            *local = arg;
        }
        slot += width;
    }

    let mut activation = Activation {
        code,
        locals,
        stack: Vec::with_capacity(code.max_stack as usize),
    };
    activation.run(fields).map_err(|(index, kind)| {
        let code_offset = code.code_offsets.get(index).copied().unwrap_or_default();
        log::debug!("{} trapped at {}: {:?}", signature, code_offset, kind);
        ExecutionError::Trap {
            method: signature.to_owned(),
            code_offset,
            kind,
        }
    })
}

#[cfg(test)]
mod interpreter_tests {
    use super::*;
    use crate::loader::code::Comparison;
    use crate::loader::link::LinkedInstruction;
    use crate::record::{Column, Row};

    fn code(max_stack: u16, max_locals: u16, instructions: Vec<LinkedInstruction>) -> LinkedCode {
        let code_offsets = (0..instructions.len()).collect();
        LinkedCode {
            max_stack,
            max_locals,
            instructions,
            code_offsets,
        }
    }

    fn int_result(result: Result<Option<Value>, ExecutionError>) -> i32 {
        match result {
            Ok(Some(Value::Int(value))) => value,
            other => panic!("expected an int, got {:?}", other),
        }
    }

    #[test]
    fn arithmetic_and_branches() {
        // abs(x - 10)
        let body = code(
            2,
            1,
            vec![
                Instruction::ILoad(0),
                Instruction::Push(10),
                Instruction::ISub,
                Instruction::Dup,
                Instruction::If {
                    comparison: Comparison::Ge,
                    target: 6,
                },
                Instruction::INeg,
                Instruction::IReturn,
            ],
        );
        assert_eq!(int_result(execute("abs", &body, None, vec![Value::Int(3)])), 7);
        assert_eq!(int_result(execute("abs", &body, None, vec![Value::Int(15)])), 5);
    }

    #[test]
    fn double_comparison_with_nan() {
        let row = Row::new(vec![Column::Double(f64::NAN), Column::Double(1.0)]);
        for (nan_result, expected) in [(-1, -1), (1, 1)] {
            let body = code(
                4,
                1,
                vec![
                    Instruction::ALoad(0),
                    Instruction::Push(0),
                    Instruction::InvokeInterface(LinkedMethod::RecordAccessor(ColumnKind::Double)),
                    Instruction::ALoad(0),
                    Instruction::Push(1),
                    Instruction::InvokeInterface(LinkedMethod::RecordAccessor(ColumnKind::Double)),
                    Instruction::DCmp { nan_result },
                    Instruction::IReturn,
                ],
            );
            let args = vec![Value::Reference(Reference::Borrowed(&row))];
            assert_eq!(int_result(execute("nan", &body, None, args)), expected);
        }
    }

    #[test]
    fn fields_hold_shared_records_only() {
        let store = code(
            2,
            2,
            vec![
                Instruction::ALoad(0),
                Instruction::ALoad(1),
                Instruction::PutField(0),
                Instruction::Return,
            ],
        );
        let mut fields = vec![Value::Reference(Reference::Null)];

        let shared: Rc<dyn Record> = Rc::new(Row::new(vec![Column::Int(1)]));
        let args = vec![Value::Reference(Reference::Shared(shared))];
        assert!(matches!(execute("store", &store, Some(&mut fields[..]), args), Ok(None)));
        assert!(matches!(fields[0], Value::Reference(Reference::Shared(_))));

        let row = Row::new(vec![Column::Int(2)]);
        let args = vec![Value::Reference(Reference::Borrowed(&row))];
        match execute("store", &store, Some(&mut fields[..]), args) {
            Err(ExecutionError::Trap {
                code_offset, kind, ..
            }) => {
                assert_eq!(code_offset, 2);
                assert_eq!(kind, TrapKind::EscapingReference);
            }
            other => panic!("expected a trap, got {:?}", other),
        }
    }

    #[test]
    fn null_field_access() {
        let load = code(
            2,
            1,
            vec![
                Instruction::ALoad(0),
                Instruction::GetField(0),
                Instruction::Push(0),
                Instruction::InvokeInterface(LinkedMethod::RecordAccessor(ColumnKind::Int)),
                Instruction::IReturn,
            ],
        );
        let mut fields = vec![Value::Reference(Reference::Null)];
        match execute("load", &load, Some(&mut fields[..]), vec![]) {
            Err(ExecutionError::Trap { kind, .. }) => assert_eq!(kind, TrapKind::NullReference),
            other => panic!("expected a trap, got {:?}", other),
        }
    }

    #[test]
    fn endless_loop_hits_step_limit() {
        let spin = code(1, 0, vec![Instruction::Push(1), Instruction::Pop, Instruction::Goto(0)]);
        match execute("spin", &spin, None, vec![]) {
            Err(ExecutionError::Trap { kind, .. }) => assert_eq!(kind, TrapKind::StepLimit),
            other => panic!("expected a trap, got {:?}", other),
        }
    }

    #[test]
    fn accessor_on_this() {
        let column = code(
            2,
            1,
            vec![
                Instruction::ALoad(0),
                Instruction::Push(0),
                Instruction::InvokeInterface(LinkedMethod::RecordAccessor(ColumnKind::Int)),
                Instruction::IReturn,
            ],
        );
        let mut fields: Vec<Value<'static>> = vec![];
        match execute("column", &column, Some(&mut fields[..]), vec![]) {
            Err(ExecutionError::Trap {
                code_offset, kind, ..
            }) => {
                assert_eq!(code_offset, 2);
                assert_eq!(kind, TrapKind::WrongReceiver);
            }
            other => panic!("expected a trap, got {:?}", other),
        }
    }
}
