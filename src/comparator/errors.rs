use crate::jvm;
use crate::record::ColumnKind;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Assembling or loading the generated class failed
    BytecodeGen(jvm::Error),

    /// Column index too large to be pushed as an `int` constant
    ColumnOutOfRange(u16),

    /// No accessor was registered in the pool for a column kind the layout reads
    MissingAccessor(ColumnKind),
}

impl From<jvm::Error> for Error {
    fn from(err: jvm::Error) -> Error {
        Error::BytecodeGen(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BytecodeGen(err) => write!(f, "comparator generation failed: {}", err),
            Error::ColumnOutOfRange(column) => write!(f, "column {} is out of range", column),
            Error::MissingAccessor(kind) => write!(f, "no accessor constant for {:?}", kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::BytecodeGen(err) => Some(err),
            Error::ColumnOutOfRange(_) | Error::MissingAccessor(_) => None,
        }
    }
}
