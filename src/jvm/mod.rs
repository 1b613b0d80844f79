//! Assemble JVM class files in memory
//!
//! ### Simple example
//!
//! Consider the following Java class:
//!
//! ```java,ignore,no_run
//! public class Empty implements Runnable {
//!     public Empty() {
//!         super();
//!     }
//! }
//! ```
//!
//! Generating an analogous class file can be done as follows:
//!
//! ```
//! use classasm::jvm::*;
//!
//! # fn generate_class() -> Result<Vec<u8>, Error> {
//! let mut asm = ClassAssembler::new();
//! asm.setup_pool()?;
//! let name = asm.add_utf8("Empty")?;
//! let this_class = asm.add_class(name)?;
//! let runnable_name = asm.add_utf8("java/lang/Runnable")?;
//! let runnable = asm.add_class(runnable_name)?;
//! asm.finish_pool()?;
//!
//! asm.define_class(ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER, this_class)?;
//! asm.declare_interfaces(&[runnable])?;
//! asm.declare_fields(0)?;
//! asm.declare_methods(1)?;
//! asm.define_default_constructor()?;
//! asm.declare_class_attributes(0)?;
//!
//! Ok(asm.to_bytes())
//! # }
//! # generate_class().unwrap();
//! ```

mod access_flags;
pub mod assembler;
mod binary_format;
mod buffer;
mod constants;
mod descriptors;
mod errors;
pub mod opcodes;
mod version;

pub use access_flags::*;
pub use assembler::{ClassAssembler, JumpSite, StandardPool};
pub use binary_format::*;
pub use buffer::*;
pub use constants::*;
pub use descriptors::*;
pub use errors::*;
pub use version::*;
