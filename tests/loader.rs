use classasm::comparator::{ComparatorCompiler, KeyLayout};
use classasm::jvm::{
    opcodes, ClassAccessFlags, ClassAssembler, ClassConstantIndex, Constant, ConstantIndex, Error,
    ExecutionError, LinkError, MalformedKind, MemberRefConstantIndex, MethodAccessFlags,
    TrapKind, VerifierErrorKind,
};
use classasm::loader;
use classasm::record::{ColumnKind, RECORD_CLASS, RECORD_DESCRIPTOR};

/// Assembler with a pool holding the standard constants plus `test/Sample`
fn sample_pool() -> (ClassAssembler, ClassConstantIndex) {
    let mut asm = ClassAssembler::new();
    asm.setup_pool().unwrap();
    let name = asm.add_utf8("test/Sample").unwrap();
    let class = asm.add_class(name).unwrap();
    (asm, class)
}

/// Finish the pool and write a `test/Sample` header with a default constructor
///
/// `methods` counts the constructor too.
fn begin_sample(
    asm: &mut ClassAssembler,
    this_class: ClassConstantIndex,
    interfaces: &[ClassConstantIndex],
    methods: u16,
) {
    asm.finish_pool().unwrap();
    asm.define_class(ClassAccessFlags::PUBLIC, this_class).unwrap();
    asm.declare_interfaces(interfaces).unwrap();
    asm.declare_fields(0).unwrap();
    asm.declare_methods(methods).unwrap();
    asm.define_default_constructor().unwrap();
}

/// `io/classasm/Record` and its `getInt` accessor
fn add_record_get_int(asm: &mut ClassAssembler) -> (ClassConstantIndex, MemberRefConstantIndex) {
    let record_name = asm.add_utf8(RECORD_CLASS).unwrap();
    let record_class = asm.add_class(record_name).unwrap();
    let name = asm.add_utf8(ColumnKind::Int.accessor_name()).unwrap();
    let descriptor = asm.add_utf8(ColumnKind::Int.accessor_descriptor()).unwrap();
    let name_and_type = asm.add_name_and_type(name, descriptor).unwrap();
    let get_int = asm
        .add_interface_method_ref(record_class, name_and_type)
        .unwrap();
    (record_class, get_int)
}

fn malformed_kind(result: Result<impl std::fmt::Debug, Error>) -> MalformedKind {
    match result {
        Err(Error::Malformed { kind, .. }) => kind,
        other => panic!("expected a malformed class, got {:?}", other),
    }
}

#[test]
fn pool_reads_back() {
    let layout: KeyLayout = "int:0,double:3:desc".parse().unwrap();
    let bytes = ComparatorCompiler::new().generate(&layout).unwrap();
    let class = loader::parse(&bytes).unwrap();

    let pool = &class.constants;
    assert_eq!(
        pool.get(ConstantIndex(1)),
        Some(&Constant::Utf8("java/lang/Object".to_owned()))
    );
    assert_eq!(
        pool.get(ConstantIndex(7)),
        Some(&Constant::Utf8("Code".to_owned()))
    );
    assert_eq!(pool.get(ConstantIndex(0)), None);
    assert_eq!(pool.get(ConstantIndex(pool.count())), None);

    let texts: Vec<&str> = pool
        .iter()
        .filter_map(|(_, constant)| match constant {
            Constant::Utf8(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    for expected in ["getInt", "(I)I", "getDouble", "(I)D", "StackMapTable", "left"] {
        assert!(texts.contains(&expected), "missing {}", expected);
    }
    assert!(!texts.contains(&"getLong"));
}

#[test]
fn missing_finish_pool() {
    let (mut asm, this_class) = sample_pool();
    // Pool count stays at its reserved zero
    asm.define_class(ClassAccessFlags::PUBLIC, this_class).unwrap();
    asm.declare_interfaces(&[]).unwrap();
    asm.declare_fields(0).unwrap();
    asm.declare_methods(0).unwrap();
    asm.declare_class_attributes(0).unwrap();

    assert_eq!(
        malformed_kind(loader::parse(&asm.to_bytes())),
        MalformedKind::BadPoolCount
    );
}

#[test]
fn interface_count_mismatch() {
    let (mut asm, this_class) = sample_pool();
    let standard = *asm.standard_pool().unwrap();
    asm.finish_pool().unwrap();
    asm.define_class(ClassAccessFlags::PUBLIC, this_class).unwrap();
    // Two interfaces declared, only one written
    asm.put_u16(2).unwrap();
    asm.put_u16(standard.object_class.0 .0).unwrap();
    asm.declare_fields(0).unwrap();
    asm.declare_methods(1).unwrap();
    asm.define_default_constructor().unwrap();
    asm.declare_class_attributes(0).unwrap();

    assert!(matches!(
        loader::load(&asm.to_bytes()),
        Err(Error::Malformed { .. })
    ));
}

#[test]
fn bad_code_attribute_length() {
    let (mut asm, this_class) = sample_pool();
    asm.finish_pool().unwrap();
    asm.define_class(ClassAccessFlags::PUBLIC, this_class).unwrap();
    asm.declare_interfaces(&[]).unwrap();
    asm.declare_fields(0).unwrap();
    asm.declare_methods(1).unwrap();

    // access flags, name, descriptor, attribute count, then the `Code` attribute name
    let attribute_length = asm.position() + 10;
    asm.define_default_constructor().unwrap();
    asm.declare_class_attributes(0).unwrap();
    let bytes = asm.to_bytes();
    let declared = u32::from_be_bytes([
        bytes[attribute_length],
        bytes[attribute_length + 1],
        bytes[attribute_length + 2],
        bytes[attribute_length + 3],
    ]);
    assert!(loader::load(&bytes).is_ok());

    asm.overwrite_u32(attribute_length, declared + 1);
    let bytes = asm.to_bytes();
    assert!(matches!(
        loader::load(&bytes),
        Err(Error::Malformed {
            offset,
            kind: MalformedKind::BadLength { actual, .. },
        }) if offset == attribute_length && actual == declared
    ));
}

#[test]
fn jump_without_frame() {
    let (mut asm, this_class) = sample_pool();
    let compute = asm.add_utf8("compute").unwrap();
    let compute_descriptor = asm.add_utf8("(I)I").unwrap();
    asm.finish_pool().unwrap();
    asm.define_class(ClassAccessFlags::PUBLIC, this_class).unwrap();
    asm.declare_interfaces(&[]).unwrap();
    asm.declare_fields(0).unwrap();
    asm.declare_methods(2).unwrap();
    asm.define_default_constructor().unwrap();

    asm.begin_method(MethodAccessFlags::PUBLIC, compute, compute_descriptor, 1, 2)
        .unwrap();
    asm.iload(1).unwrap();
    let site = asm.jump(opcodes::IFEQ).unwrap();
    asm.push_int(7).unwrap();
    asm.op(opcodes::IRETURN).unwrap();
    let target = asm.place_jump(site).unwrap();
    asm.push_int(-7).unwrap();
    asm.op(opcodes::IRETURN).unwrap();
    asm.end_method_code().unwrap();
    asm.code_attributes(0).unwrap();
    asm.end_method().unwrap();
    asm.declare_class_attributes(0).unwrap();

    match malformed_kind(loader::load(&asm.to_bytes())) {
        MalformedKind::Verify {
            method,
            code_offset,
            kind,
        } => {
            assert_eq!(method, "compute(I)I");
            assert_eq!(kind, VerifierErrorKind::MissingFrame);
            assert!(code_offset == 1 || code_offset == target);
        }
        other => panic!("expected a verification failure, got {:?}", other),
    }
}

#[test]
fn instance_methods_run() {
    let (mut asm, this_class) = sample_pool();
    let compute = asm.add_utf8("compute").unwrap();
    let compute_descriptor = asm.add_utf8("(I)I").unwrap();
    let stack_map_table = asm.add_utf8("StackMapTable").unwrap();
    asm.finish_pool().unwrap();
    asm.define_class(ClassAccessFlags::PUBLIC, this_class).unwrap();
    asm.declare_interfaces(&[]).unwrap();
    asm.declare_fields(0).unwrap();
    asm.declare_methods(2).unwrap();
    asm.define_default_constructor().unwrap();

    // x == 0 ? 300 : x * 3
    asm.begin_method(MethodAccessFlags::PUBLIC, compute, compute_descriptor, 2, 3)
        .unwrap();
    asm.push_int(300).unwrap();
    asm.istore(2).unwrap();
    asm.iload(1).unwrap();
    let site = asm.jump(opcodes::IFEQ).unwrap();
    asm.iload(1).unwrap();
    asm.push_int(3).unwrap();
    asm.op(opcodes::IMUL).unwrap();
    asm.istore(2).unwrap();
    let target = asm.place_jump(site).unwrap();
    asm.iload(2).unwrap();
    asm.op(opcodes::IRETURN).unwrap();
    asm.end_method_code().unwrap();
    asm.code_attributes(1).unwrap();
    asm.stack_map_append_int(stack_map_table, target as u16).unwrap();
    asm.end_method().unwrap();
    asm.declare_class_attributes(0).unwrap();

    let class = loader::load(&asm.to_bytes()).unwrap();
    assert_eq!(class.name(), "test/Sample");
    let mut instance = class.new_instance().unwrap();
    let call = |instance: &mut loader::Instance, x: i32| {
        instance
            .invoke("compute", "(I)I", vec![loader::Value::Int(x)])
            .unwrap()
    };
    assert!(matches!(call(&mut instance, 0), Some(loader::Value::Int(300))));
    assert!(matches!(call(&mut instance, -5), Some(loader::Value::Int(-15))));

    assert!(matches!(
        instance.invoke("compute", "(J)I", vec![loader::Value::Long(1)]),
        Err(Error::Execution(_))
    ));
    assert!(matches!(
        instance.invoke("compute", "(I)I", vec![loader::Value::Long(1)]),
        Err(Error::Execution(_))
    ));
}

#[test]
fn comparator_interface_needs_its_methods() {
    let (mut asm, this_class) = sample_pool();
    let comparator_name = asm.add_utf8(classasm::record::RECORD_COMPARATOR_CLASS).unwrap();
    let comparator_class = asm.add_class(comparator_name).unwrap();
    asm.finish_pool().unwrap();
    asm.define_class(ClassAccessFlags::PUBLIC, this_class).unwrap();
    asm.declare_interfaces(&[comparator_class]).unwrap();
    asm.declare_fields(0).unwrap();
    asm.declare_methods(1).unwrap();
    asm.define_default_constructor().unwrap();
    asm.declare_class_attributes(0).unwrap();

    assert!(matches!(
        loader::load(&asm.to_bytes()),
        Err(Error::Link(LinkError::MissingCapabilityMethod { .. }))
    ));
}

fn link_error(result: Result<impl std::fmt::Debug, Error>) -> LinkError {
    match result {
        Err(Error::Link(err)) => err,
        other => panic!("expected a link error, got {:?}", other),
    }
}

fn verifier_error(result: Result<impl std::fmt::Debug, Error>) -> (usize, VerifierErrorKind) {
    match malformed_kind(result) {
        MalformedKind::Verify {
            code_offset, kind, ..
        } => (code_offset, kind),
        other => panic!("expected a verification failure, got {:?}", other),
    }
}

#[test]
fn unresolved_field() {
    let (mut asm, this_class) = sample_pool();
    let read = asm.add_utf8("read").unwrap();
    let read_descriptor = asm.add_utf8("()I").unwrap();
    let missing = asm.add_utf8("missing").unwrap();
    let int_descriptor = asm.add_utf8("I").unwrap();
    let name_and_type = asm.add_name_and_type(missing, int_descriptor).unwrap();
    let field = asm.add_field_ref(this_class, name_and_type).unwrap();
    begin_sample(&mut asm, this_class, &[], 2);

    asm.begin_method(MethodAccessFlags::PUBLIC, read, read_descriptor, 1, 1)
        .unwrap();
    asm.aload(0).unwrap();
    asm.get_field(field).unwrap();
    asm.op(opcodes::IRETURN).unwrap();
    asm.end_method_code().unwrap();
    asm.code_attributes(0).unwrap();
    asm.end_method().unwrap();
    asm.declare_class_attributes(0).unwrap();

    assert_eq!(
        link_error(loader::load(&asm.to_bytes())),
        LinkError::UnresolvedField {
            class: "test/Sample".to_owned(),
            name: "missing".to_owned(),
            descriptor: "I".to_owned(),
        }
    );
}

#[test]
fn unresolved_method() {
    let (mut asm, this_class) = sample_pool();
    let reset = asm.add_utf8("reset").unwrap();
    let void_descriptor = asm.add_utf8("()V").unwrap();
    let name_and_type = asm.add_name_and_type(reset, void_descriptor).unwrap();
    let method = asm.add_method_ref(this_class, name_and_type).unwrap();
    begin_sample(&mut asm, this_class, &[], 2);

    asm.begin_method(MethodAccessFlags::PUBLIC, reset, void_descriptor, 1, 1)
        .unwrap();
    asm.aload(0).unwrap();
    asm.op(opcodes::INVOKESPECIAL).unwrap();
    asm.put_u16(method.0 .0).unwrap();
    asm.op(opcodes::RETURN).unwrap();
    asm.end_method_code().unwrap();
    asm.code_attributes(0).unwrap();
    asm.end_method().unwrap();
    asm.declare_class_attributes(0).unwrap();

    assert_eq!(
        link_error(loader::load(&asm.to_bytes())),
        LinkError::UnresolvedMethod {
            class: "test/Sample".to_owned(),
            name: "reset".to_owned(),
            descriptor: "()V".to_owned(),
        }
    );
}

#[test]
fn superclass_must_be_object() {
    let (mut asm, this_class) = sample_pool();
    asm.finish_pool().unwrap();
    asm.define_class_with_super(ClassAccessFlags::PUBLIC, this_class, this_class)
        .unwrap();
    asm.declare_interfaces(&[]).unwrap();
    asm.declare_fields(0).unwrap();
    asm.declare_methods(1).unwrap();
    asm.define_default_constructor().unwrap();
    asm.declare_class_attributes(0).unwrap();

    assert_eq!(
        link_error(loader::load(&asm.to_bytes())),
        LinkError::UnsupportedSuperclass("test/Sample".to_owned())
    );
}

#[test]
fn constructor_is_required() {
    let (mut asm, this_class) = sample_pool();
    asm.finish_pool().unwrap();
    asm.define_class(ClassAccessFlags::PUBLIC, this_class).unwrap();
    asm.declare_interfaces(&[]).unwrap();
    asm.declare_fields(0).unwrap();
    asm.declare_methods(0).unwrap();
    asm.declare_class_attributes(0).unwrap();

    assert_eq!(
        link_error(loader::load(&asm.to_bytes())),
        LinkError::MissingConstructor("test/Sample".to_owned())
    );
}

#[test]
fn exception_handlers_are_rejected() {
    let (mut asm, this_class) = sample_pool();
    let run = asm.add_utf8("run").unwrap();
    let run_descriptor = asm.add_utf8("()V").unwrap();
    begin_sample(&mut asm, this_class, &[], 2);

    asm.begin_method(MethodAccessFlags::PUBLIC, run, run_descriptor, 0, 1)
        .unwrap();
    asm.op(opcodes::RETURN).unwrap();
    asm.end_method_code().unwrap();
    // One catch-all handler covering the whole body
    for value in [1, 0, 1, 0, 0] {
        asm.put_u16(value).unwrap();
    }
    asm.put_u16(0).unwrap();
    asm.end_method().unwrap();
    asm.declare_class_attributes(0).unwrap();

    assert_eq!(
        malformed_kind(loader::load(&asm.to_bytes())),
        MalformedKind::ExceptionHandlers("run()V".to_owned())
    );
}

#[test]
fn duplicate_stack_map_table() {
    let (mut asm, this_class) = sample_pool();
    let compute = asm.add_utf8("compute").unwrap();
    let compute_descriptor = asm.add_utf8("(I)I").unwrap();
    let stack_map_table = asm.add_utf8("StackMapTable").unwrap();
    begin_sample(&mut asm, this_class, &[], 2);

    asm.begin_method(MethodAccessFlags::PUBLIC, compute, compute_descriptor, 1, 2)
        .unwrap();
    asm.iload(1).unwrap();
    asm.op(opcodes::IRETURN).unwrap();
    asm.end_method_code().unwrap();
    asm.code_attributes(2).unwrap();
    asm.stack_map_append_int(stack_map_table, 0).unwrap();
    asm.stack_map_append_int(stack_map_table, 0).unwrap();
    asm.end_method().unwrap();
    asm.declare_class_attributes(0).unwrap();

    assert_eq!(
        malformed_kind(loader::load(&asm.to_bytes())),
        MalformedKind::DuplicateAttribute {
            owner: "compute(I)I".to_owned(),
            attribute: "StackMapTable".to_owned(),
        }
    );
}

#[test]
fn unsupported_stack_map_entries() {
    let cases: [(&[u8], MalformedKind); 3] = [
        (&[0, 1, 128], MalformedKind::UnsupportedFrame(128)),
        // `append_frame` adding `UninitializedThis`, then `Uninitialized`
        (&[0, 1, 252, 0, 0, 6], MalformedKind::BadVerificationType(6)),
        (&[0, 1, 252, 0, 0, 8, 0, 0], MalformedKind::BadVerificationType(8)),
    ];
    for (table, expected) in cases {
        let (mut asm, this_class) = sample_pool();
        let run = asm.add_utf8("run").unwrap();
        let run_descriptor = asm.add_utf8("()V").unwrap();
        let stack_map_table = asm.add_utf8("StackMapTable").unwrap();
        begin_sample(&mut asm, this_class, &[], 2);

        asm.begin_method(MethodAccessFlags::PUBLIC, run, run_descriptor, 0, 2)
            .unwrap();
        asm.op(opcodes::RETURN).unwrap();
        asm.end_method_code().unwrap();
        asm.code_attributes(1).unwrap();
        asm.define_attribute(stack_map_table, table).unwrap();
        asm.end_method().unwrap();
        asm.declare_class_attributes(0).unwrap();

        assert_eq!(malformed_kind(loader::load(&asm.to_bytes())), expected);
    }
}

#[test]
fn jump_to_incompatible_frame() {
    let (mut asm, this_class) = sample_pool();
    let compute = asm.add_utf8("compute").unwrap();
    let compute_descriptor = asm.add_utf8("(I)I").unwrap();
    let stack_map_table = asm.add_utf8("StackMapTable").unwrap();
    begin_sample(&mut asm, this_class, &[], 2);

    asm.begin_method(MethodAccessFlags::PUBLIC, compute, compute_descriptor, 2, 2)
        .unwrap();
    asm.iload(1).unwrap();
    let site = asm.jump(opcodes::IFEQ).unwrap();
    asm.push_int(1).unwrap();
    asm.op(opcodes::IRETURN).unwrap();
    let target = asm.place_jump(site).unwrap();
    asm.push_int(0).unwrap();
    asm.op(opcodes::IRETURN).unwrap();
    asm.end_method_code().unwrap();
    asm.code_attributes(1).unwrap();
    // Frame at the target expects an `int` on the stack, the jump leaves it empty
    asm.define_attribute(stack_map_table, &[0, 1, 64 + target as u8, 1])
        .unwrap();
    asm.end_method().unwrap();
    asm.declare_class_attributes(0).unwrap();

    assert_eq!(
        verifier_error(loader::load(&asm.to_bytes())),
        (1, VerifierErrorKind::IncompatibleFrame)
    );
}

#[test]
fn interface_call_argument_count() {
    let (mut asm, this_class) = sample_pool();
    let (_, get_int) = add_record_get_int(&mut asm);
    let peek = asm.add_utf8("peek").unwrap();
    let peek_descriptor = asm
        .add_utf8(&format!("({})I", RECORD_DESCRIPTOR))
        .unwrap();
    begin_sample(&mut asm, this_class, &[], 2);

    asm.begin_method(MethodAccessFlags::PUBLIC, peek, peek_descriptor, 2, 2)
        .unwrap();
    asm.aload(1).unwrap();
    asm.push_int(0).unwrap();
    // `getInt(I)I` on a record takes two slots, not three
    asm.invoke_interface(get_int, 3).unwrap();
    asm.op(opcodes::IRETURN).unwrap();
    asm.end_method_code().unwrap();
    asm.code_attributes(0).unwrap();
    asm.end_method().unwrap();
    asm.declare_class_attributes(0).unwrap();

    assert_eq!(
        verifier_error(loader::load(&asm.to_bytes())),
        (2, VerifierErrorKind::BadOperand)
    );
}

#[test]
fn record_accessor_on_instance() {
    let (mut asm, this_class) = sample_pool();
    let (record_class, get_int) = add_record_get_int(&mut asm);
    let column = asm.add_utf8("column").unwrap();
    let column_descriptor = asm.add_utf8("()I").unwrap();
    begin_sample(&mut asm, this_class, &[record_class], 2);

    asm.begin_method(MethodAccessFlags::PUBLIC, column, column_descriptor, 2, 1)
        .unwrap();
    asm.aload(0).unwrap();
    asm.push_int(0).unwrap();
    asm.invoke_interface(get_int, 2).unwrap();
    asm.op(opcodes::IRETURN).unwrap();
    asm.end_method_code().unwrap();
    asm.code_attributes(0).unwrap();
    asm.end_method().unwrap();
    asm.declare_class_attributes(0).unwrap();

    let class = loader::load(&asm.to_bytes()).unwrap();
    let mut instance = class.new_instance().unwrap();
    match instance.invoke("column", "()I", vec![]) {
        Err(Error::Execution(ExecutionError::Trap {
            method,
            code_offset,
            kind,
        })) => {
            assert_eq!(method, "column()I");
            assert_eq!(code_offset, 2);
            assert_eq!(kind, TrapKind::WrongReceiver);
        }
        other => panic!("expected a trap, got {:?}", other),
    }
}

#[test]
fn endless_loop_traps() {
    let (mut asm, this_class) = sample_pool();
    let spin = asm.add_utf8("spin").unwrap();
    let spin_descriptor = asm.add_utf8("()V").unwrap();
    let stack_map_table = asm.add_utf8("StackMapTable").unwrap();
    begin_sample(&mut asm, this_class, &[], 2);

    asm.begin_method(MethodAccessFlags::PUBLIC, spin, spin_descriptor, 0, 1)
        .unwrap();
    asm.op(opcodes::GOTO).unwrap();
    asm.put_i16(0).unwrap();
    asm.end_method_code().unwrap();
    asm.code_attributes(1).unwrap();
    // `same_frame` at offset 0, so the backward jump verifies
    asm.define_attribute(stack_map_table, &[0, 1, 0]).unwrap();
    asm.end_method().unwrap();
    asm.declare_class_attributes(0).unwrap();

    let class = loader::load(&asm.to_bytes()).unwrap();
    let mut instance = class.new_instance().unwrap();
    assert!(matches!(
        instance.invoke("spin", "()V", vec![]),
        Err(Error::Execution(ExecutionError::Trap {
            kind: TrapKind::StepLimit,
            ..
        }))
    ));
}
