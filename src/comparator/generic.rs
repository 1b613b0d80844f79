use super::{KeyLayout, SortKey};
use crate::record::{ColumnKind, Record, RecordComparator};
use std::cmp::Ordering;
use std::rc::Rc;

/// Comparator walking the key layout at every call
///
/// Used when no class could be generated for a layout. Results match generated comparators
/// exactly, including for `NaN` (which compares as less than anything, in both directions).
pub struct GenericComparator {
    layout: KeyLayout,
    left: Option<Rc<dyn Record>>,
}

impl GenericComparator {
    pub fn new(layout: KeyLayout) -> GenericComparator {
        GenericComparator { layout, left: None }
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    /// `-1`, `0`, or `1`, the way `lcmp` and `dcmpl` would answer
    fn compare_key(key: &SortKey, left: &dyn Record, right: &dyn Record) -> i32 {
        let (first, second) = if key.descending {
            (right, left)
        } else {
            (left, right)
        };
        let column = key.column as i32;
        let ordering = match key.kind {
            ColumnKind::Int => Some(first.get_int(column).cmp(&second.get_int(column))),
            ColumnKind::Long => Some(first.get_long(column).cmp(&second.get_long(column))),
            ColumnKind::Double => first
                .get_double(column)
                .partial_cmp(&second.get_double(column)),
        };
        match ordering {
            Some(Ordering::Less) | None => -1,
            Some(Ordering::Equal) => 0,
            Some(Ordering::Greater) => 1,
        }
    }
}

impl RecordComparator for GenericComparator {
    fn set_left(&mut self, left: Rc<dyn Record>) {
        self.left = Some(left);
    }

    fn compare(&mut self, right: &dyn Record) -> i32 {
        let left = match &self.left {
            Some(left) => left.as_ref(),
            None => panic!("compare called before set_left"),
        };
        for key in &self.layout.keys {
            let result = Self::compare_key(key, left, right);
            if result != 0 {
                return result;
            }
        }
        0
    }
}
