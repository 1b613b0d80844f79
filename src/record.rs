//! Records and the comparator capability generated classes implement
//!
//! Generated code never sees Rust types: it reads columns through the `io/classasm/Record`
//! interface and is called through `io/classasm/RecordComparator`. This module pins down the
//! binary names and descriptors of both sides, together with the Rust traits they map onto.

use std::rc::Rc;

/// Binary name of the record interface generated code reads columns through
pub const RECORD_CLASS: &str = "io/classasm/Record";

/// Binary name of the interface generated comparators implement
pub const RECORD_COMPARATOR_CLASS: &str = "io/classasm/RecordComparator";

/// Field descriptor of a record reference
pub const RECORD_DESCRIPTOR: &str = "Lio/classasm/Record;";

pub const SET_LEFT_NAME: &str = "setLeft";
pub const SET_LEFT_DESCRIPTOR: &str = "(Lio/classasm/Record;)V";
pub const COMPARE_NAME: &str = "compare";
pub const COMPARE_DESCRIPTOR: &str = "(Lio/classasm/Record;)I";

/// A row whose columns can be read by index
pub trait Record {
    fn get_int(&self, column: i32) -> i32;
    fn get_long(&self, column: i32) -> i64;
    fn get_double(&self, column: i32) -> f64;
}

/// Three-way comparison of records against a fixed left-hand side
///
/// The left record is set once and then compared against many right records, which is how a
/// sort or merge typically drives it.
pub trait RecordComparator {
    fn set_left(&mut self, left: Rc<dyn Record>);

    /// Negative if the left record orders first, positive if the right one does, zero if their
    /// keys are equal
    ///
    /// # Panics
    ///
    /// If [`RecordComparator::set_left`] was never called.
    fn compare(&mut self, right: &dyn Record) -> i32;
}

/// Types of columns that can take part in a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnKind {
    Int,
    Long,
    Double,
}

impl ColumnKind {
    pub const ALL: [ColumnKind; 3] = [ColumnKind::Int, ColumnKind::Long, ColumnKind::Double];

    /// Name of the [`Record`] method reading this kind of column
    pub fn accessor_name(self) -> &'static str {
        match self {
            ColumnKind::Int => "getInt",
            ColumnKind::Long => "getLong",
            ColumnKind::Double => "getDouble",
        }
    }

    /// Descriptor of the [`Record`] method reading this kind of column
    pub fn accessor_descriptor(self) -> &'static str {
        match self {
            ColumnKind::Int => "(I)I",
            ColumnKind::Long => "(I)J",
            ColumnKind::Double => "(I)D",
        }
    }

    /// Find the column kind whose accessor has this name and descriptor
    pub fn from_accessor(name: &str, descriptor: &str) -> Option<ColumnKind> {
        ColumnKind::ALL
            .into_iter()
            .find(|kind| kind.accessor_name() == name && kind.accessor_descriptor() == descriptor)
    }
}

/// Single column value of a [`Row`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Column {
    Int(i32),
    Long(i64),
    Double(f64),
}

/// Simple in-memory [`Record`]
///
/// Accessors convert between column types the way a numeric cast would. Reading a column past
/// the end of the row panics.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row(pub Vec<Column>);

impl Row {
    pub fn new(columns: Vec<Column>) -> Row {
        Row(columns)
    }

    fn column(&self, column: i32) -> Column {
        self.0[column as usize]
    }
}

impl Record for Row {
    fn get_int(&self, column: i32) -> i32 {
        match self.column(column) {
            Column::Int(value) => value,
            Column::Long(value) => value as i32,
            Column::Double(value) => value as i32,
        }
    }

    fn get_long(&self, column: i32) -> i64 {
        match self.column(column) {
            Column::Int(value) => value as i64,
            Column::Long(value) => value,
            Column::Double(value) => value as i64,
        }
    }

    fn get_double(&self, column: i32) -> f64 {
        match self.column(column) {
            Column::Int(value) => value as f64,
            Column::Long(value) => value as f64,
            Column::Double(value) => value,
        }
    }
}
