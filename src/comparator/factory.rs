use super::{ComparatorCompiler, GenericComparator, KeyLayout};
use crate::loader::LoadedClass;
use crate::record::RecordComparator;
use std::collections::HashMap;
use std::sync::Arc;

/// Hands out comparators, generating at most one class per key layout
///
/// Layouts whose class could not be generated or loaded are remembered too, so the failure is
/// only reported once and later requests go straight to [`GenericComparator`].
#[derive(Debug, Default)]
pub struct ComparatorFactory {
    compiler: ComparatorCompiler,
    classes: HashMap<KeyLayout, Option<Arc<LoadedClass>>>,
}

impl ComparatorFactory {
    pub fn new() -> ComparatorFactory {
        ComparatorFactory::default()
    }

    /// Loaded class for a layout, generating it on first use
    ///
    /// `None` if generation failed (now or on an earlier call).
    pub fn class_for(&mut self, layout: &KeyLayout) -> Option<Arc<LoadedClass>> {
        if let Some(cached) = self.classes.get(layout) {
            return cached.clone();
        }

        let class = match self.compiler.assemble(layout) {
            Ok(class) => Some(class),
            Err(err) => {
                log::warn!(
                    "falling back to generic comparator for '{}': {}",
                    layout,
                    err
                );
                None
            }
        };
        self.classes.insert(layout.clone(), class.clone());
        class
    }

    /// Fresh comparator for a layout
    pub fn comparator(&mut self, layout: &KeyLayout) -> Box<dyn RecordComparator> {
        if let Some(class) = self.class_for(layout) {
            match class.new_instance() {
                Ok(instance) => return Box::new(instance),
                Err(err) => log::warn!(
                    "falling back to generic comparator for '{}': {}",
                    layout,
                    err
                ),
            }
        }
        Box::new(GenericComparator::new(layout.clone()))
    }

    /// Number of layouts seen so far (whether generation succeeded or not)
    pub fn cached_layouts(&self) -> usize {
        self.classes.len()
    }
}

#[cfg(test)]
mod factory_tests {
    use super::*;
    use crate::comparator::SortKey;
    use crate::record::{Column, ColumnKind, Row};
    use std::rc::Rc;

    #[test]
    fn classes_are_cached_per_layout() {
        let mut factory = ComparatorFactory::new();
        let layout: KeyLayout = "long:0,int:1:desc".parse().unwrap();

        let first = factory.class_for(&layout).unwrap();
        let second = factory.class_for(&layout.clone()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = factory.class_for(&"long:0".parse().unwrap()).unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_ne!(first.name(), other.name());
        assert_eq!(factory.cached_layouts(), 2);
    }

    #[test]
    fn failures_fall_back() {
        let mut factory = ComparatorFactory::new();
        let layout = KeyLayout::new(vec![SortKey::descending(ColumnKind::Int, u16::MAX)]);
        assert!(factory.class_for(&layout).is_none());

        // Still a working comparator, just not a generated one
        let mut comparator = factory.comparator(&layout);
        let mut columns = vec![Column::Int(0); u16::MAX as usize + 1];
        comparator.set_left(Rc::new(Row(columns.clone())));
        columns[u16::MAX as usize] = Column::Int(1);
        assert_eq!(comparator.compare(&Row(columns)), 1);
        assert_eq!(factory.cached_layouts(), 1);
    }
}
