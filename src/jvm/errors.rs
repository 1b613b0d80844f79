use std::collections::TryReserveError;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// The assembler API was used out of order (indicates a bug in the caller)
    ContractViolation(Contract),

    /// The output buffer could not grow
    ResourceExhaustion(TryReserveError),

    /// Constant pool would have more than 65535 entries
    ConstantPoolOverflow { offset: u16 },

    /// Modified UTF-8 encoding of a text constant is longer than 65535 bytes
    ConstantTooLong(usize),

    /// A table or attribute has more entries than its length prefix can count
    TableTooLong(usize),

    /// The loader rejected the artifact
    Malformed { offset: usize, kind: MalformedKind },

    /// The artifact is well-formed but refers to something that cannot be linked
    Link(LinkError),

    /// A loaded method could not run to completion
    Execution(ExecutionError),

    IoError(std::io::Error),
}

/// Ways of misusing the assembler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contract {
    /// `begin_class` (or `setup_pool`) called twice without `clear`
    ClassAlreadyBegun,

    /// Something was written to the pool before the header was
    ClassNotBegun,

    /// The class was begun with `begin_class`, but something needs the constants only
    /// `setup_pool` registers
    StandardPoolMissing,

    /// `finish_pool` called twice, or a constant added after it
    PoolAlreadyFinished,

    /// `begin_method` called while another method is still open
    MethodAlreadyOpen,

    /// `end_method_code` or `end_method` without an open method
    NoOpenMethod,

    /// `end_method` before `end_method_code`
    CodeStillOpen,

    /// Method body emission after `end_method_code`
    CodeAlreadyClosed,

    /// A forward jump was placed behind its own instruction
    BackwardJump,

    /// A method with no bytecode
    EmptyCode,

    /// Code offset does not fit in the two bytes the format allows
    CodeTooLarge(usize),
}

/// Reasons the loader rejects bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedKind {
    BadMagic(u32),
    UnsupportedVersion { major: u16, minor: u16 },
    Truncated,
    TrailingBytes(usize),
    BadPoolCount,
    UnknownConstantTag(u8),
    BadUtf8,
    /// Index is zero, past the end of the pool, or points at the wrong kind of constant
    BadConstantIndex { index: u16, expected: &'static str },
    BadDescriptor(String),
    /// A length field disagrees with what was actually read
    BadLength { declared: u32, actual: u32 },
    MissingCode(String),
    DuplicateAttribute { owner: String, attribute: String },
    /// Exception tables are not supported, so they must be empty
    ExceptionHandlers(String),
    UnsupportedFrame(u8),
    BadVerificationType(u8),
    Verify {
        method: String,
        code_offset: usize,
        kind: VerifierErrorKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifierErrorKind {
    UnsupportedOpcode(u8),
    TruncatedInstruction,
    EmptyStack,
    StackOverflow { max_stack: u16 },
    InvalidLocal(u16),
    InvalidType,
    BadBranchTarget(i32),
    MissingFrame,
    /// A stack map frame is declared at an offset which is not the start of an instruction
    MisplacedFrame(usize),
    IncompatibleFrame,
    FallsOffEnd,
    BadReturn,
    /// An operand byte has a value the instruction does not allow
    BadOperand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    UnresolvedMethod {
        class: String,
        name: String,
        descriptor: String,
    },
    UnresolvedField {
        class: String,
        name: String,
        descriptor: String,
    },
    UnsupportedSuperclass(String),
    MissingConstructor(String),
    MissingCapabilityMethod {
        class: String,
        name: String,
        descriptor: String,
    },
}

/// Failures while running loaded code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    NoSuchMethod { name: String, descriptor: String },

    /// Arguments passed in from the host do not match the method descriptor
    BadArguments { name: String, descriptor: String },

    /// An instruction could not complete
    Trap {
        method: String,
        code_offset: usize,
        kind: TrapKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    /// Field access or call on a null reference
    NullReference,

    /// Attempt to store a borrowed record into a field, where it would outlive the call
    EscapingReference,

    /// Record accessor called on the instance itself, or a field read off a record
    WrongReceiver,

    /// The call ran more instructions than the interpreter allows (eg. an endless loop)
    StepLimit,

    /// Operand stack or locals do not hold what the instruction needs (verified code never does
    /// this)
    BadOperands,
}

impl Error {
    pub fn malformed(offset: usize, kind: MalformedKind) -> Error {
        Error::Malformed { offset, kind }
    }
}

impl From<Contract> for Error {
    fn from(contract: Contract) -> Error {
        Error::ContractViolation(contract)
    }
}

impl From<TryReserveError> for Error {
    fn from(err: TryReserveError) -> Error {
        Error::ResourceExhaustion(err)
    }
}

impl From<LinkError> for Error {
    fn from(err: LinkError) -> Error {
        Error::Link(err)
    }
}

impl From<ExecutionError> for Error {
    fn from(err: ExecutionError) -> Error {
        Error::Execution(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ContractViolation(contract) => write!(f, "assembler misuse: {:?}", contract),
            Error::ResourceExhaustion(err) => write!(f, "out of memory: {}", err),
            Error::ConstantPoolOverflow { offset } => {
                write!(f, "constant pool overflow at index {}", offset)
            }
            Error::ConstantTooLong(len) => {
                write!(f, "text constant is {} bytes (max 65535)", len)
            }
            Error::TableTooLong(len) => write!(f, "table of {} entries is too long", len),
            Error::Malformed { offset, kind } => {
                write!(f, "malformed class at byte {}: {:?}", offset, kind)
            }
            Error::Link(err) => write!(f, "link error: {:?}", err),
            Error::Execution(err) => write!(f, "execution failed: {:?}", err),
            Error::IoError(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ResourceExhaustion(err) => Some(err),
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}
