use crate::record::ColumnKind;
use std::fmt;
use std::str::FromStr;

/// One column of a sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortKey {
    pub column: u16,
    pub kind: ColumnKind,
    pub descending: bool,
}

impl SortKey {
    pub fn ascending(kind: ColumnKind, column: u16) -> SortKey {
        SortKey {
            column,
            kind,
            descending: false,
        }
    }

    pub fn descending(kind: ColumnKind, column: u16) -> SortKey {
        SortKey {
            column,
            kind,
            descending: true,
        }
    }
}

/// Ordered sort keys, most significant first
///
/// Equal layouts always produce equivalent comparators, so this is what generated classes are
/// cached by.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KeyLayout {
    pub keys: Vec<SortKey>,
}

impl KeyLayout {
    pub fn new(keys: Vec<SortKey>) -> KeyLayout {
        KeyLayout { keys }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Kinds of column read, without duplicates and in a fixed order
    pub fn kinds(&self) -> Vec<ColumnKind> {
        ColumnKind::ALL
            .into_iter()
            .filter(|kind| self.keys.iter().any(|key| key.kind == *kind))
            .collect()
    }
}

impl FromIterator<SortKey> for KeyLayout {
    fn from_iter<I: IntoIterator<Item = SortKey>>(iter: I) -> KeyLayout {
        KeyLayout::new(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseLayoutError {
    /// Not of the form `kind:column` or `kind:column:direction`
    BadKey(String),
    UnknownKind(String),

    /// Column must be an integer `push_int` can load in one instruction (`0..=32767`)
    BadColumn(String),
    UnknownDirection(String),
}

impl fmt::Display for ParseLayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseLayoutError::BadKey(key) => {
                write!(f, "bad sort key '{}' (expected eg. 'int:0' or 'long:2:desc')", key)
            }
            ParseLayoutError::UnknownKind(kind) => write!(
                f,
                "unknown column kind '{}' (expected 'int', 'long', or 'double')",
                kind
            ),
            ParseLayoutError::BadColumn(column) => write!(f, "bad column index '{}'", column),
            ParseLayoutError::UnknownDirection(direction) => write!(
                f,
                "unknown direction '{}' (expected 'asc' or 'desc')",
                direction
            ),
        }
    }
}

impl std::error::Error for ParseLayoutError {}

impl FromStr for SortKey {
    type Err = ParseLayoutError;

    fn from_str(s: &str) -> Result<SortKey, ParseLayoutError> {
        let mut parts = s.trim().split(':');
        let (kind, column) = match (parts.next(), parts.next()) {
            (Some(kind), Some(column)) => (kind, column),
            _ => return Err(ParseLayoutError::BadKey(s.to_owned())),
        };
        let direction = parts.next();
        if parts.next().is_some() {
            return Err(ParseLayoutError::BadKey(s.to_owned()));
        }

        let kind = match kind {
            "int" => ColumnKind::Int,
            "long" => ColumnKind::Long,
            "double" => ColumnKind::Double,
            other => return Err(ParseLayoutError::UnknownKind(other.to_owned())),
        };
        let column = match column.parse::<u16>() {
            Ok(column) if column <= i16::MAX as u16 => column,
            _ => return Err(ParseLayoutError::BadColumn(column.to_owned())),
        };
        let descending = match direction {
            None | Some("asc") => false,
            Some("desc") => true,
            Some(other) => return Err(ParseLayoutError::UnknownDirection(other.to_owned())),
        };
        Ok(SortKey {
            column,
            kind,
            descending,
        })
    }
}

/// Comma separated sort keys (eg. `int:0,double:3:desc`)
impl FromStr for KeyLayout {
    type Err = ParseLayoutError;

    fn from_str(s: &str) -> Result<KeyLayout, ParseLayoutError> {
        if s.trim().is_empty() {
            return Ok(KeyLayout::default());
        }
        s.split(',').map(SortKey::from_str).collect()
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ColumnKind::Int => "int",
            ColumnKind::Long => "long",
            ColumnKind::Double => "double",
        };
        write!(f, "{}:{}", kind, self.column)?;
        if self.descending {
            f.write_str(":desc")?;
        }
        Ok(())
    }
}

impl fmt::Display for KeyLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", key)?;
        }
        Ok(())
    }
}
