use std::io::{Error, ErrorKind, Result};
use std::iter::Peekable;
use std::str::Chars;

/// Utility trait for converting descriptors to and from string representations
pub trait RenderDescriptor {
    /// Turn the descriptor into a string
    fn render(&self) -> String {
        let mut string = String::new();
        self.render_to(&mut string);
        string
    }

    /// Write the descriptor to a string
    fn render_to(&self, write_to: &mut String);
}

pub trait ParseDescriptor: Sized {
    /// Parse a descriptor from a string
    fn parse(source: &str) -> Result<Self> {
        let mut chars = source.chars().peekable();
        let ret = Self::parse_from(&mut chars)?;
        match chars.next() {
            None => Ok(ret),
            Some(c) => {
                let msg = format!("Unexpected leftover input '{}'", c);
                Err(Error::new(ErrorKind::InvalidInput, msg))
            }
        }
    }

    /// Read the descriptor from a character buffer
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self>;
}

/// Primitive value types
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl BaseType {
    /// Number of stack or local slots a value of this type occupies
    pub fn width(self) -> usize {
        match self {
            BaseType::Double | BaseType::Long => 2,
            _ => 1,
        }
    }
}

impl RenderDescriptor for BaseType {
    fn render_to(&self, write_to: &mut String) {
        let c = match self {
            BaseType::Byte => 'B',
            BaseType::Char => 'C',
            BaseType::Double => 'D',
            BaseType::Float => 'F',
            BaseType::Int => 'I',
            BaseType::Long => 'J',
            BaseType::Short => 'S',
            BaseType::Boolean => 'Z',
        };
        write_to.push(c);
    }
}

impl ParseDescriptor for BaseType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        let typ = match source.next() {
            Some('B') => BaseType::Byte,
            Some('C') => BaseType::Char,
            Some('D') => BaseType::Double,
            Some('F') => BaseType::Float,
            Some('I') => BaseType::Int,
            Some('J') => BaseType::Long,
            Some('S') => BaseType::Short,
            Some('Z') => BaseType::Boolean,
            Some(c) => {
                let msg = format!("Invalid base type character '{}'", c);
                return Err(Error::new(ErrorKind::InvalidInput, msg));
            }
            None => {
                let msg = "Missing base type character";
                return Err(Error::new(ErrorKind::UnexpectedEof, msg));
            }
        };
        Ok(typ)
    }
}

/// Type of a field, parameter, or return value
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum FieldType {
    Base(BaseType),

    /// Object type, by binary name (eg. `java/lang/Object`)
    Object(String),

    /// Array type (`[I` has one dimension and element type `I`)
    Array {
        dimensions: usize,
        element_type: Box<FieldType>,
    },
}

impl FieldType {
    pub fn object(binary_name: &str) -> FieldType {
        FieldType::Object(binary_name.to_owned())
    }

    pub const fn int() -> FieldType {
        FieldType::Base(BaseType::Int)
    }

    pub const fn long() -> FieldType {
        FieldType::Base(BaseType::Long)
    }

    pub const fn double() -> FieldType {
        FieldType::Base(BaseType::Double)
    }

    pub fn width(&self) -> usize {
        match self {
            FieldType::Base(base_type) => base_type.width(),
            _ => 1,
        }
    }
}

impl RenderDescriptor for FieldType {
    fn render_to(&self, write_to: &mut String) {
        match self {
            FieldType::Base(base_type) => base_type.render_to(write_to),
            FieldType::Object(name) => {
                write_to.push('L');
                write_to.push_str(name);
                write_to.push(';');
            }
            FieldType::Array {
                dimensions,
                element_type,
            } => {
                for _ in 0..*dimensions {
                    write_to.push('[');
                }
                element_type.render_to(write_to);
            }
        }
    }
}

impl ParseDescriptor for FieldType {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        match source.peek().copied() {
            None => Err(Error::new(ErrorKind::UnexpectedEof, "Missing field type")),
            Some('B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z') => {
                BaseType::parse_from(source).map(FieldType::Base)
            }
            Some('L') => {
                let _ = source.next();
                let mut name = String::new();
                loop {
                    match source.next() {
                        Some(';') if !name.is_empty() => break,
                        Some(';' | '.' | '[') | None => {
                            let msg = format!("Invalid class name in descriptor 'L{}'", name);
                            return Err(Error::new(ErrorKind::InvalidInput, msg));
                        }
                        Some(c) => name.push(c),
                    }
                }
                Ok(FieldType::Object(name))
            }
            Some('[') => {
                let mut dimensions = 0;
                while let Some('[') = source.peek().copied() {
                    let _ = source.next();
                    dimensions += 1;
                }
                if dimensions > 255 {
                    let msg = "Array type has more than 255 dimensions";
                    return Err(Error::new(ErrorKind::InvalidInput, msg));
                }
                let element_type = Box::new(FieldType::parse_from(source)?);
                Ok(FieldType::Array {
                    dimensions,
                    element_type,
                })
            }
            Some(c) => {
                let msg = format!("Invalid field type character '{}'", c);
                Err(Error::new(ErrorKind::InvalidInput, msg))
            }
        }
    }
}

/// Signature of a method
#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub struct MethodDescriptor {
    pub parameters: Vec<FieldType>,
    pub return_type: Option<FieldType>, // `None` is for `void` (ie. no return)
}

impl MethodDescriptor {
    /// Total length of parameters (not the same as the length of the vector),
    /// which must be 255 or less for it to be valid
    pub fn parameter_length(&self, has_this_param: bool) -> usize {
        let this_len = if has_this_param { 1 } else { 0 };
        this_len + self.parameters.iter().map(FieldType::width).sum::<usize>()
    }
}

impl RenderDescriptor for MethodDescriptor {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('(');
        for parameter in &self.parameters {
            parameter.render_to(write_to);
        }
        write_to.push(')');
        match &self.return_type {
            None => write_to.push('V'),
            Some(typ) => typ.render_to(write_to),
        };
    }
}

impl ParseDescriptor for MethodDescriptor {
    fn parse_from(source: &mut Peekable<Chars>) -> Result<Self> {
        if source.next() != Some('(') {
            let msg = "Expected '(' for method";
            return Err(Error::new(ErrorKind::InvalidInput, msg));
        }

        let mut parameters = vec![];
        while source.peek().copied() != Some(')') {
            parameters.push(FieldType::parse_from(source)?);
        }
        let _ = source.next();

        let return_type = if let Some('V') = source.peek().copied() {
            let _ = source.next();
            None
        } else {
            Some(FieldType::parse_from(source)?)
        };

        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fmt::Debug;

    fn round_trip<T: RenderDescriptor + ParseDescriptor + Debug + Eq>(rendered: &str, parsed: T) {
        assert_eq!(rendered, parsed.render());
        assert_eq!(T::parse(rendered).unwrap(), parsed);
    }

    #[test]
    fn field_types() {
        round_trip("I", FieldType::int());
        round_trip("J", FieldType::long());
        round_trip("Ljava/lang/Object;", FieldType::object("java/lang/Object"));
        round_trip(
            "[[D",
            FieldType::Array {
                dimensions: 2,
                element_type: Box::new(FieldType::double()),
            },
        );
    }

    #[test]
    fn method_types() {
        round_trip(
            "()V",
            MethodDescriptor {
                parameters: vec![],
                return_type: None,
            },
        );
        let compare = MethodDescriptor::parse("(Lio/classasm/Record;)I").unwrap();
        assert_eq!(compare.parameters, vec![FieldType::object("io/classasm/Record")]);
        assert_eq!(compare.return_type, Some(FieldType::int()));
        assert_eq!(compare.parameter_length(true), 2);

        let wide = MethodDescriptor::parse("(JID)V").unwrap();
        assert_eq!(wide.parameter_length(false), 5);
    }

    #[test]
    fn bad_descriptors() {
        assert!(FieldType::parse("").is_err());
        assert!(FieldType::parse("Q").is_err());
        assert!(FieldType::parse("Ljava/lang/Object").is_err());
        assert!(FieldType::parse("II").is_err());
        assert!(MethodDescriptor::parse("I)V").is_err());
        assert!(MethodDescriptor::parse("(I").is_err());
    }
}
