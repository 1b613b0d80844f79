//! In-process loading of assembled classes
//!
//! There is no JVM to hand generated bytes to, so the loader plays its part for the narrow subset
//! of the class file format the assembler produces:
//!
//!   1. **parse** the bytes ([`ClassReader`]), checking every length and constant index
//!   2. **verify** every method body against its stack map frames ([`verify_method`])
//!   3. **link** field and method references against the closed world of the class itself,
//!      `java/lang/Object`, and [`crate::record::Record`]
//!
//! The result is a [`LoadedClass`], an immutable type handle which can be shared across threads
//! and cached. [`LoadedClass::new_instance`] then runs the constructor and hands back an
//! [`Instance`] whose methods are run by a small interpreter.

mod code;
mod interpreter;
mod link;
mod reader;
mod verifier;

pub use code::{Comparison, DecodedInstruction, Instruction, MethodOperand};
pub use interpreter::{Reference, Value};
pub use link::{LinkedCode, LinkedInstruction, LinkedMethod};
pub use reader::*;
pub use verifier::{verify_method, Frame, VerificationType};

use crate::jvm::{Error, ExecutionError, FieldType, MethodAccessFlags, MethodDescriptor, Version};
use crate::record::{
    Record, RecordComparator, COMPARE_DESCRIPTOR, COMPARE_NAME, SET_LEFT_DESCRIPTOR,
    SET_LEFT_NAME,
};
use std::rc::Rc;
use std::sync::Arc;

/// Read a class file without verifying or linking it
pub fn parse(bytes: &[u8]) -> Result<ClassFile, Error> {
    ClassReader::new(bytes).read_class()
}

/// Parse, verify, and link a class file
pub fn load(bytes: &[u8]) -> Result<Arc<LoadedClass>, Error> {
    let class = parse(bytes)?;
    link::check_class(&class)?;

    let mut methods = Vec::with_capacity(class.methods.len());
    for method in &class.methods {
        let body = match verifier::verify_method(&class, method)? {
            None => None,
            Some(decoded) => link::link_code(&class, method, decoded)?,
        };
        methods.push(LoadedMethod {
            name: method.name.clone(),
            descriptor_text: method.descriptor_text.clone(),
            descriptor: method.descriptor.clone(),
            is_static: method.access_flags.contains(MethodAccessFlags::STATIC),
            body,
        });
    }

    let loaded = LoadedClass {
        name: class.this_class,
        super_name: class.super_class,
        interfaces: class.interfaces,
        version: class.version,
        fields: class
            .fields
            .into_iter()
            .map(|field| LoadedField {
                name: field.name,
                descriptor: field.descriptor,
            })
            .collect(),
        methods,
    };
    log::debug!(
        "loaded {} ({} bytes, {} fields, {} methods)",
        loaded.name,
        bytes.len(),
        loaded.fields.len(),
        loaded.methods.len()
    );
    Ok(Arc::new(loaded))
}

#[derive(Debug, Clone)]
pub struct LoadedField {
    pub name: String,
    pub descriptor: FieldType,
}

#[derive(Debug, Clone)]
pub struct LoadedMethod {
    pub name: String,
    pub descriptor_text: String,
    pub descriptor: MethodDescriptor,
    pub is_static: bool,

    /// `None` for abstract methods
    pub body: Option<LinkedCode>,
}

impl LoadedMethod {
    pub fn signature(&self) -> String {
        format!("{}{}", self.name, self.descriptor_text)
    }
}

/// Verified and linked class
///
/// Holds no reference to the bytes it was loaded from, nor to the assembler that produced them.
#[derive(Debug)]
pub struct LoadedClass {
    name: String,
    super_name: String,
    interfaces: Vec<String>,
    version: Version,
    fields: Vec<LoadedField>,
    methods: Vec<LoadedMethod>,
}

impl LoadedClass {
    /// Binary name (eg. `io/classasm/gen/RecordComparator$0`)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn super_name(&self) -> &str {
        &self.super_name
    }

    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    pub fn implements(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|iface| iface == interface)
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn fields(&self) -> &[LoadedField] {
        &self.fields
    }

    pub fn methods(&self) -> &[LoadedMethod] {
        &self.methods
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&LoadedMethod> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.descriptor_text == descriptor)
    }

    /// Allocate the fields of a new instance and run its no-argument constructor
    pub fn new_instance(self: &Arc<Self>) -> Result<Instance, Error> {
        let mut instance = Instance {
            class: self.clone(),
            fields: self
                .fields
                .iter()
                .map(|field| Value::zero(&field.descriptor))
                .collect(),
        };
        instance.invoke("<init>", "()V", vec![])?;
        Ok(instance)
    }
}

/// Instance of a [`LoadedClass`]
///
/// Instances are cheap and meant to be used by one thread: they may hold on to the
/// [`Record`]s handed to them.
#[derive(Debug)]
pub struct Instance {
    class: Arc<LoadedClass>,
    fields: Vec<Value<'static>>,
}

impl Instance {
    pub fn class(&self) -> &Arc<LoadedClass> {
        &self.class
    }

    /// Current value of a field
    pub fn field(&self, name: &str) -> Option<&Value<'static>> {
        let slot = self.class.fields.iter().position(|field| field.name == name)?;
        self.fields.get(slot)
    }

    /// Call a method by name and descriptor
    ///
    /// Arguments are checked against the descriptor. Static methods are called the same way,
    /// just without access to the instance fields.
    pub fn invoke<'r>(
        &mut self,
        name: &str,
        descriptor: &str,
        args: Vec<Value<'r>>,
    ) -> Result<Option<Value<'r>>, Error> {
        let class = self.class.clone();
        let method = class.find_method(name, descriptor);
        let (method, body) = match method.and_then(|method| Some((method, method.body.as_ref()?))) {
            Some(found) => found,
            None => {
                return Err(ExecutionError::NoSuchMethod {
                    name: name.to_owned(),
                    descriptor: descriptor.to_owned(),
                }
                .into())
            }
        };

        let parameters = &method.descriptor.parameters;
        if args.len() != parameters.len()
            || !args.iter().zip(parameters).all(|(arg, typ)| arg.has_type(typ))
        {
            return Err(ExecutionError::BadArguments {
                name: name.to_owned(),
                descriptor: descriptor.to_owned(),
            }
            .into());
        }

        let this = if method.is_static {
            None
        } else {
            Some(&mut self.fields[..])
        };
        let result = interpreter::execute(&method.signature(), body, this, args)?;
        Ok(result)
    }
}

impl RecordComparator for Instance {
    fn set_left(&mut self, left: Rc<dyn Record>) {
        let args = vec![Value::Reference(Reference::Shared(left))];
        if let Err(err) = self.invoke(SET_LEFT_NAME, SET_LEFT_DESCRIPTOR, args) {
            panic!("{}.setLeft failed: {}", self.class.name, err);
        }
    }

    fn compare(&mut self, right: &dyn Record) -> i32 {
        let args = vec![Value::Reference(Reference::Borrowed(right))];
        match self.invoke(COMPARE_NAME, COMPARE_DESCRIPTOR, args) {
            Ok(Some(Value::Int(result))) => result,
            Ok(other) => panic!("{}.compare returned {:?}", self.class.name, other),
            Err(err) => panic!("{}.compare failed: {}", self.class.name, err),
        }
    }
}
