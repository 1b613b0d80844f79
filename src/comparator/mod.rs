//! Record comparators specialized to a key layout
//!
//! A [`KeyLayout`] says which columns to compare, as what type, and in which direction. The
//! [`ComparatorCompiler`] turns a layout into a class implementing `RecordComparator` with the
//! keys unrolled into straight-line bytecode, and the [`ComparatorFactory`] caches those classes
//! and falls back to the interpreted [`GenericComparator`] when generation fails.

mod compiler;
mod errors;
mod factory;
mod generic;
mod layout;

pub use compiler::*;
pub use errors::*;
pub use factory::*;
pub use generic::*;
pub use layout::*;
