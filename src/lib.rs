//! Runtime class file assembly for record comparators
//!
//! When a query needs to order records by some key layout, [`comparator::ComparatorFactory`]
//! synthesizes a small class implementing `RecordComparator` straight into a byte buffer with
//! the [`jvm::ClassAssembler`], then hands the bytes to [`loader::load`] which verifies and links
//! the class so it can be instantiated and called from Rust.

pub mod comparator;
pub mod jvm;
pub mod loader;
pub mod record;
