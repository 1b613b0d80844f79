use super::{Error, KeyLayout};
use crate::jvm::{
    opcodes, ClassAccessFlags, ClassAssembler, FieldAccessFlags, MemberRefConstantIndex,
    MethodAccessFlags, Utf8ConstantIndex,
};
use crate::loader::{self, LoadedClass};
use crate::record::{
    ColumnKind, COMPARE_DESCRIPTOR, COMPARE_NAME, RECORD_CLASS, RECORD_COMPARATOR_CLASS,
    RECORD_DESCRIPTOR, SET_LEFT_DESCRIPTOR, SET_LEFT_NAME,
};
use std::sync::Arc;

/// Package generated classes are put in
pub const GENERATED_PACKAGE: &str = "io/classasm/gen";

/// Locals of `compare`: `this`, the right record, and the result of the last key
const COMPARE_MAX_LOCALS: u16 = 3;
const RESULT_LOCAL: u8 = 2;

/// A widened key value (2 slots), plus a record and a column index for the second accessor call
const COMPARE_MAX_STACK: u16 = 4;

/// Pool indices `compare` and `setLeft` refer to
struct ComparatorPool {
    left_field: MemberRefConstantIndex,
    stack_map_table: Utf8ConstantIndex,
    accessors: Vec<(ColumnKind, MemberRefConstantIndex)>,
}

impl ComparatorPool {
    fn accessor(&self, kind: ColumnKind) -> Result<MemberRefConstantIndex, Error> {
        self.accessors
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, method)| *method)
            .ok_or(Error::MissingAccessor(kind))
    }
}

/// Generates `RecordComparator` classes specialized to a key layout
///
/// The generated class looks like the following Java (for `int:0,double:1:desc`):
///
/// ```java
/// public final class RecordComparator$0 implements RecordComparator {
///   private Record left;
///
///   public void setLeft(Record left) { this.left = left; }
///
///   public int compare(Record right) {
///     int result = Long.compare(left.getInt(0), right.getInt(0));
///     if (result != 0) return result;
///     result = Double.compare(right.getDouble(1), left.getDouble(1)); // dcmpl
///     return result;
///   }
/// }
/// ```
///
/// One assembler is reused for every class.
#[derive(Debug, Default)]
pub struct ComparatorCompiler {
    asm: ClassAssembler,

    /// Number of classes generated so far, used to name the next one
    generated: usize,
}

impl ComparatorCompiler {
    pub fn new() -> ComparatorCompiler {
        ComparatorCompiler::default()
    }

    /// Assembler holding the most recently generated class (eg. to dump it)
    pub fn assembler(&self) -> &ClassAssembler {
        &self.asm
    }

    /// Name the next generated class will have
    pub fn next_class_name(&self) -> String {
        format!("{}/RecordComparator${}", GENERATED_PACKAGE, self.generated)
    }

    /// Generate and load a comparator class
    pub fn assemble(&mut self, layout: &KeyLayout) -> Result<Arc<LoadedClass>, Error> {
        let bytes = self.generate(layout)?;
        Ok(loader::load(&bytes)?)
    }

    /// Generate the bytes of a comparator class
    pub fn generate(&mut self, layout: &KeyLayout) -> Result<Vec<u8>, Error> {
        if let Some(key) = layout.keys.iter().find(|key| key.column > i16::MAX as u16) {
            return Err(Error::ColumnOutOfRange(key.column));
        }

        let class_name = self.next_class_name();
        self.asm.clear();
        self.write_class(&class_name, layout)?;
        self.generated += 1;

        log::debug!(
            "generated {} for '{}' ({} bytes)",
            class_name,
            layout,
            self.asm.position()
        );
        Ok(self.asm.to_bytes())
    }

    fn write_class(&mut self, class_name: &str, layout: &KeyLayout) -> Result<(), Error> {
        let asm = &mut self.asm;
        asm.setup_pool()?;

        let this_name = asm.add_utf8(class_name)?;
        let this_class = asm.add_class(this_name)?;
        let comparator_name = asm.add_utf8(RECORD_COMPARATOR_CLASS)?;
        let comparator_class = asm.add_class(comparator_name)?;
        let record_name = asm.add_utf8(RECORD_CLASS)?;
        let record_class = asm.add_class(record_name)?;

        let left_name = asm.add_utf8("left")?;
        let record_descriptor = asm.add_utf8(RECORD_DESCRIPTOR)?;
        let left_name_and_type = asm.add_name_and_type(left_name, record_descriptor)?;
        let left_field = asm.add_field_ref(this_class, left_name_and_type)?;

        let set_left_name = asm.add_utf8(SET_LEFT_NAME)?;
        let set_left_descriptor = asm.add_utf8(SET_LEFT_DESCRIPTOR)?;
        let compare_name = asm.add_utf8(COMPARE_NAME)?;
        let compare_descriptor = asm.add_utf8(COMPARE_DESCRIPTOR)?;
        let stack_map_table = asm.add_utf8("StackMapTable")?;

        let mut accessors = vec![];
        for kind in layout.kinds() {
            let name = asm.add_utf8(kind.accessor_name())?;
            let descriptor = asm.add_utf8(kind.accessor_descriptor())?;
            let name_and_type = asm.add_name_and_type(name, descriptor)?;
            let method = asm.add_interface_method_ref(record_class, name_and_type)?;
            accessors.push((kind, method));
        }
        asm.finish_pool()?;

        let pool = ComparatorPool {
            left_field,
            stack_map_table,
            accessors,
        };

        asm.define_class(
            ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL | ClassAccessFlags::SUPER,
            this_class,
        )?;
        asm.declare_interfaces(&[comparator_class])?;
        asm.declare_fields(1)?;
        asm.define_field(FieldAccessFlags::PRIVATE, left_name, record_descriptor)?;

        asm.declare_methods(3)?;
        asm.define_default_constructor()?;
        Self::write_set_left(asm, &pool, set_left_name, set_left_descriptor)?;
        Self::write_compare(asm, &pool, layout, compare_name, compare_descriptor)?;
        asm.declare_class_attributes(0)?;
        Ok(())
    }

    fn write_set_left(
        asm: &mut ClassAssembler,
        pool: &ComparatorPool,
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    ) -> Result<(), Error> {
        asm.begin_method(MethodAccessFlags::PUBLIC, name, descriptor, 2, 2)?;
        asm.aload(0)?;
        asm.aload(1)?;
        asm.put_field(pool.left_field)?;
        asm.op(opcodes::RETURN)?;
        asm.end_method_code()?;
        asm.code_attributes(0)?;
        asm.end_method()?;
        Ok(())
    }

    /// Push one side's key value, widened to `long` for `int` columns
    fn write_key_value(
        asm: &mut ClassAssembler,
        pool: &ComparatorPool,
        kind: ColumnKind,
        column: u16,
        left: bool,
    ) -> Result<(), Error> {
        if left {
            asm.aload(0)?;
            asm.get_field(pool.left_field)?;
        } else {
            asm.aload(1)?;
        }
        asm.push_int(column as i32)?;
        asm.invoke_interface(pool.accessor(kind)?, 2)?;
        if kind == ColumnKind::Int {
            asm.op(opcodes::I2L)?;
        }
        Ok(())
    }

    fn write_compare(
        asm: &mut ClassAssembler,
        pool: &ComparatorPool,
        layout: &KeyLayout,
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    ) -> Result<(), Error> {
        asm.begin_method(
            MethodAccessFlags::PUBLIC,
            name,
            descriptor,
            COMPARE_MAX_STACK,
            COMPARE_MAX_LOCALS,
        )?;

        if layout.is_empty() {
            asm.push_int(0)?;
            asm.op(opcodes::IRETURN)?;
            asm.end_method_code()?;
            asm.code_attributes(0)?;
            asm.end_method()?;
            return Ok(());
        }

        let mut exits = vec![];
        let last = layout.keys.len() - 1;
        for (i, key) in layout.keys.iter().enumerate() {
            // Descending keys compare `right` against `left`
            let first_is_left = !key.descending;
            Self::write_key_value(asm, pool, key.kind, key.column, first_is_left)?;
            Self::write_key_value(asm, pool, key.kind, key.column, !first_is_left)?;
            match key.kind {
                ColumnKind::Int | ColumnKind::Long => asm.op(opcodes::LCMP)?,
                ColumnKind::Double => asm.op(opcodes::DCMPL)?,
            }
            asm.istore(RESULT_LOCAL)?;

            if i != last {
                asm.iload(RESULT_LOCAL)?;
                exits.push(asm.jump(opcodes::IFNE)?);
            }
        }

        let mut return_offset = None;
        for exit in exits {
            return_offset = Some(asm.place_jump(exit)?);
        }
        asm.iload(RESULT_LOCAL)?;
        asm.op(opcodes::IRETURN)?;
        asm.end_method_code()?;

        match return_offset {
            None => asm.code_attributes(0)?,
            Some(offset) => {
                asm.code_attributes(1)?;
                asm.stack_map_append_int(pool.stack_map_table, offset as u16)?;
            }
        }
        asm.end_method()?;
        Ok(())
    }
}

#[cfg(test)]
mod compiler_tests {
    use super::*;
    use crate::comparator::SortKey;
    use crate::loader::{parse, Instance};
    use crate::record::{Column, RecordComparator, Row};
    use std::rc::Rc;

    fn instance(layout: &str) -> Instance {
        let layout: KeyLayout = layout.parse().unwrap();
        let class = ComparatorCompiler::new().assemble(&layout).unwrap();
        class.new_instance().unwrap()
    }

    fn ints(values: &[i32]) -> Row {
        Row(values.iter().map(|v| Column::Int(*v)).collect())
    }

    #[test]
    fn class_shape() {
        let mut compiler = ComparatorCompiler::new();
        let layout: KeyLayout = "int:0,long:1".parse().unwrap();
        let class = parse(&compiler.generate(&layout).unwrap()).unwrap();

        assert_eq!(class.this_class, "io/classasm/gen/RecordComparator$0");
        assert_eq!(class.super_class, "java/lang/Object");
        assert_eq!(class.interfaces, vec![RECORD_COMPARATOR_CLASS.to_owned()]);
        assert_eq!(class.fields.len(), 1);
        assert_eq!(class.fields[0].name, "left");
        let methods: Vec<String> = class.methods.iter().map(|m| m.signature()).collect();
        assert_eq!(
            methods,
            vec![
                "<init>()V",
                "setLeft(Lio/classasm/Record;)V",
                "compare(Lio/classasm/Record;)I"
            ]
        );
        let compare = class.methods[2].code.as_ref().unwrap();
        assert_eq!(compare.max_stack, COMPARE_MAX_STACK);
        assert_eq!(compare.max_locals, COMPARE_MAX_LOCALS);
        assert_eq!(compare.stack_map.len(), 1);

        assert_eq!(
            compiler.next_class_name(),
            "io/classasm/gen/RecordComparator$1"
        );
    }

    #[test]
    fn single_key_has_no_frame() {
        let layout = KeyLayout::new(vec![SortKey::ascending(ColumnKind::Double, 4)]);
        let class = parse(&ComparatorCompiler::new().generate(&layout).unwrap()).unwrap();
        let compare = class.methods[2].code.as_ref().unwrap();
        assert!(compare.stack_map.is_empty());
    }

    #[test]
    fn two_int_keys() {
        let mut comparator = instance("int:0,int:1");
        comparator.set_left(Rc::new(ints(&[1, 2])));
        assert!(comparator.compare(&ints(&[1, 3])) < 0);
        assert_eq!(comparator.compare(&ints(&[1, 2])), 0);

        comparator.set_left(Rc::new(ints(&[2, 1])));
        assert!(comparator.compare(&ints(&[1, 9])) > 0);
    }

    #[test]
    fn extreme_ints_do_not_overflow() {
        let mut comparator = instance("int:0");
        comparator.set_left(Rc::new(ints(&[i32::MIN])));
        assert_eq!(comparator.compare(&ints(&[i32::MAX])), -1);
    }

    #[test]
    fn empty_layout_is_always_equal() {
        let mut comparator = instance("");
        comparator.set_left(Rc::new(ints(&[1])));
        assert_eq!(comparator.compare(&ints(&[2])), 0);
    }

    #[test]
    fn column_out_of_range() {
        let layout = KeyLayout::new(vec![SortKey::ascending(ColumnKind::Int, 40000)]);
        assert!(matches!(
            ComparatorCompiler::new().generate(&layout),
            Err(Error::ColumnOutOfRange(40000))
        ));
    }

    #[test]
    #[should_panic]
    fn compare_before_set_left() {
        let mut comparator = instance("int:0");
        comparator.compare(&ints(&[1]));
    }
}
