use sable_common::ModuleLocation;
use sable_common::SymbolPath;
use sable_object::builder::CallConfig;
use sable_object::bytecode::{
    NEW_STRUCT, STATIC_LOAD, STATIC_STORE, TARGET_ARGUMENT, TARGET_FIELD, TARGET_RECEIVER,
};
use sable_object::descriptor::StructDescriptor;
use sable_object::{far, near, LinkageSection, Object, ObjectBuilder, Opcode, ProcBuilder, TypeSpec};
use sable_runtime::{
    BytecodeInterpreter, DataCell, InterpreterBridge, InterpreterState, MemoryLoader, Plugin,
    RuntimeResult, Trap,
};
use std::sync::Arc;

fn loc(path: &str) -> ModuleLocation {
    ModuleLocation::new(path)
}

fn path(name: &str) -> SymbolPath {
    SymbolPath::from_parts(&[name])
}

fn run_object(object: Object) -> sable_runtime::InterpreterExit {
    let mut loader = MemoryLoader::new();
    loader.insert_object(loc("/main"), object.to_bytes().unwrap());
    run_loader(loader)
}

fn run_loader(loader: MemoryLoader) -> sable_runtime::InterpreterExit {
    let state = InterpreterState::new(Arc::new(loader), &loc("/main")).unwrap();
    BytecodeInterpreter::new(state).run().unwrap()
}

/// Builder with one NoReturn type entry, for calls that need type indices.
fn builder_with_type() -> (ObjectBuilder, u32) {
    let mut builder = ObjectBuilder::new();
    let ty = builder.add_type(TypeSpec::NoReturn, None);
    (builder, ty)
}

#[test]
fn arithmetic_and_return() {
    let (mut builder, ty) = builder_with_type();
    let mut proc = ProcBuilder::new(0, 0);
    proc.op_i64(20);
    proc.op_i64(22);
    proc.op(Opcode::I64Add);
    proc.op(Opcode::Return);
    builder
        .add_call(CallConfig::new(path("$entry"), ty, ty), proc)
        .unwrap();

    let exit = run_object(builder.build().unwrap());
    assert_eq!(exit.main_return, DataCell::I64(42));
    assert_eq!(exit.status_code, 0);
    assert_eq!(exit.instruction_count, 4);
}

#[test]
fn comparison_drives_a_branch() {
    let (mut builder, ty) = builder_with_type();
    let mut proc = ProcBuilder::new(0, 0);
    proc.op_i64(3);
    proc.op_i64(5);
    proc.op(Opcode::I64Cmp);
    let less = proc.make_label();
    proc.jump_op(Opcode::IfLt, less);
    proc.op_i64(0);
    proc.op(Opcode::Return);
    proc.bind_label(less);
    proc.op_i64(1);
    proc.op(Opcode::Return);
    builder
        .add_call(CallConfig::new(path("$entry"), ty, ty), proc)
        .unwrap();

    let exit = run_object(builder.build().unwrap());
    assert_eq!(exit.main_return, DataCell::I64(1));
}

#[test]
fn static_call_passes_arguments() {
    let (mut builder, ty) = builder_with_type();

    let mut add = ProcBuilder::new(2, 0);
    add.op_load(TARGET_ARGUMENT, 0);
    add.op_load(TARGET_ARGUMENT, 1);
    add.op(Opcode::I64Add);
    add.op(Opcode::Return);
    let add = builder
        .add_call(CallConfig::new(path("add"), ty, ty), add)
        .unwrap();

    let mut entry = ProcBuilder::new(0, 0);
    entry.op_i64(40);
    entry.op_i64(2);
    entry.op_call_static(near(add), 2);
    entry.op(Opcode::Return);
    builder
        .add_call(CallConfig::new(path("$entry"), ty, ty), entry)
        .unwrap();

    let exit = run_object(builder.build().unwrap());
    assert_eq!(exit.main_return, DataCell::I64(42));
}

#[test]
fn extra_arguments_become_rest_arguments() {
    let (mut builder, ty) = builder_with_type();

    let mut sum = ProcBuilder::new(1, 0);
    sum.op_load(TARGET_ARGUMENT, 0);
    sum.op_va_load(0);
    sum.op(Opcode::I64Add);
    sum.op(Opcode::VaSize);
    sum.op(Opcode::I64Add);
    sum.op(Opcode::Return);
    let sum = builder
        .add_call(CallConfig::new(path("sum"), ty, ty), sum)
        .unwrap();

    let mut entry = ProcBuilder::new(0, 0);
    entry.op_i64(30);
    entry.op_i64(10);
    entry.op_call_static(near(sum), 2);
    entry.op(Opcode::Return);
    builder
        .add_call(CallConfig::new(path("$entry"), ty, ty), entry)
        .unwrap();

    // 30 + 10 + one rest argument
    let exit = run_object(builder.build().unwrap());
    assert_eq!(exit.main_return, DataCell::I64(41));
}

#[test]
fn static_slot_initializes_lazily_and_once() {
    let (mut builder, ty) = builder_with_type();

    let mut init = ProcBuilder::new(0, 0);
    init.op_i64(21);
    init.op(Opcode::Return);
    let init = builder
        .add_call(CallConfig::new(path("counter.$init"), ty, ty), init)
        .unwrap();
    let counter = builder.add_static(path("counter"), ty, true, near(init));

    let mut entry = ProcBuilder::new(0, 0);
    entry.op_static(STATIC_LOAD, near(counter));
    entry.op_static(STATIC_LOAD, near(counter));
    entry.op(Opcode::I64Add);
    entry.op(Opcode::Return);
    builder
        .add_call(CallConfig::new(path("$entry"), ty, ty), entry)
        .unwrap();

    let exit = run_object(builder.build().unwrap());
    assert_eq!(exit.main_return, DataCell::I64(42));
}

#[test]
fn static_store_replaces_the_initialized_value() {
    let (mut builder, ty) = builder_with_type();

    let mut init = ProcBuilder::new(0, 0);
    init.op_i64(1);
    init.op(Opcode::Return);
    let init = builder
        .add_call(CallConfig::new(path("value.$init"), ty, ty), init)
        .unwrap();
    let slot = builder.add_static(path("value"), ty, true, near(init));

    let mut entry = ProcBuilder::new(0, 0);
    entry.op_static(STATIC_LOAD, near(slot));
    entry.op(Opcode::Pop);
    entry.op_i64(10);
    entry.op_static(STATIC_STORE, near(slot));
    entry.op_static(STATIC_LOAD, near(slot));
    entry.op(Opcode::Return);
    builder
        .add_call(CallConfig::new(path("$entry"), ty, ty), entry)
        .unwrap();

    let exit = run_object(builder.build().unwrap());
    assert_eq!(exit.main_return, DataCell::I64(10));
}

#[test]
fn new_constructs_and_virtual_call_dispatches() {
    let mut builder = ObjectBuilder::new();
    let no_return = builder.add_type(TypeSpec::NoReturn, None);
    let point_type = builder.add_type(
        TypeSpec::Concrete {
            section: LinkageSection::Struct,
            address: near(0),
            arguments: Vec::new(),
        },
        None,
    );
    let field = builder.add_field(path("x"), no_return, true);

    // ctor stores its argument into the field
    let mut ctor = ProcBuilder::new(1, 0);
    ctor.op_load(TARGET_RECEIVER, 0);
    ctor.op_load(TARGET_ARGUMENT, 0);
    ctor.op_store(TARGET_FIELD, near(field));
    let ctor = builder
        .add_call(
            CallConfig::new(path("Point.$ctor"), no_return, no_return).constructor(),
            ctor,
        )
        .unwrap();

    let mut get = ProcBuilder::new(0, 0);
    get.op_load(TARGET_RECEIVER, 0);
    get.op_load(TARGET_FIELD, near(field));
    get.op(Opcode::Return);
    let get = builder
        .add_call(CallConfig::new(path("Point.get"), no_return, no_return), get)
        .unwrap();

    builder.add_struct(StructDescriptor {
        symbol_path: path("Point"),
        type_index: point_type,
        super_struct: None,
        allocator_trap: None,
        ctor_call: near(ctor),
        members: vec![near(field)],
        methods: vec![near(get)],
        impls: Vec::new(),
        sealed_subtypes: Vec::new(),
        sealed: false,
        is_abstract: false,
    });

    let mut entry = ProcBuilder::new(0, 0);
    entry.op_i64(42);
    entry.op_new(NEW_STRUCT, near(0), 1);
    entry.op_call_virtual(near(get), 0);
    entry.op(Opcode::Return);
    builder
        .add_call(CallConfig::new(path("$entry"), no_return, no_return), entry)
        .unwrap();

    let exit = run_object(builder.build().unwrap());
    assert_eq!(exit.main_return, DataCell::I64(42));
}

#[test]
fn cross_segment_call_executes_in_the_target() {
    let mut provider = ObjectBuilder::new();
    let ty = provider.add_type(TypeSpec::NoReturn, None);
    let mut proc = ProcBuilder::new(0, 0);
    proc.op_i64(42);
    proc.op(Opcode::Return);
    provider
        .add_call(CallConfig::new(path("forty_two"), ty, ty), proc)
        .unwrap();

    let (mut main, ty) = builder_with_type();
    let import = main.add_import(loc("/lib"), false);
    let link = main.add_link(LinkageSection::Call, path("forty_two"), import);
    let mut entry = ProcBuilder::new(0, 0);
    entry.op_call_static(far(link), 0);
    entry.op(Opcode::Return);
    main.add_call(CallConfig::new(path("$entry"), ty, ty), entry)
        .unwrap();

    let mut loader = MemoryLoader::new();
    loader.insert_object(loc("/main"), main.build().unwrap().to_bytes().unwrap());
    loader.insert_object(loc("/lib"), provider.build().unwrap().to_bytes().unwrap());

    let exit = run_loader(loader);
    assert_eq!(exit.main_return, DataCell::I64(42));
}

struct DoublerPlugin;

fn double_trap(bridge: &mut InterpreterBridge) -> RuntimeResult<()> {
    let value = bridge.coroutine.pop_data()?.as_i64()?;
    bridge.coroutine.push_data(DataCell::I64(value * 2));
    Ok(())
}

impl Plugin for DoublerPlugin {
    fn num_traps(&self) -> u32 {
        1
    }

    fn trap(&self, index: u32) -> Option<Trap> {
        match index {
            0 => Some(double_trap),
            _ => None,
        }
    }
}

#[test]
fn trap_runs_native_code() {
    let (mut builder, ty) = builder_with_type();
    builder.set_plugin(1).unwrap();

    let mut entry = ProcBuilder::new(0, 0);
    entry.op_i64(21);
    entry.op_trap(0, 0);
    entry.op(Opcode::Return);
    builder
        .add_call(CallConfig::new(path("$entry"), ty, ty), entry)
        .unwrap();

    let mut loader = MemoryLoader::new();
    loader.insert_object(loc("/main"), builder.build().unwrap().to_bytes().unwrap());
    loader.insert_plugin(loc("/main"), Arc::new(DoublerPlugin));

    let exit = run_loader(loader);
    assert_eq!(exit.main_return, DataCell::I64(42));
}

#[test]
fn halt_finishes_with_the_top_of_stack() {
    let (mut builder, ty) = builder_with_type();
    let mut entry = ProcBuilder::new(0, 0);
    entry.op_i64(7);
    entry.op(Opcode::Halt);
    builder
        .add_call(CallConfig::new(path("$entry"), ty, ty), entry)
        .unwrap();

    let exit = run_object(builder.build().unwrap());
    assert_eq!(exit.main_return, DataCell::I64(7));
    assert_eq!(exit.status_code, 0);
}

#[test]
fn abort_surfaces_its_status_code() {
    let (mut builder, ty) = builder_with_type();
    let mut entry = ProcBuilder::new(0, 0);
    entry.op_i64(3);
    entry.op(Opcode::Abort);
    builder
        .add_call(CallConfig::new(path("$entry"), ty, ty), entry)
        .unwrap();

    let exit = run_object(builder.build().unwrap());
    assert_eq!(exit.main_return, DataCell::Nil);
    assert_eq!(exit.status_code, 3);
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    let (mut builder, ty) = builder_with_type();
    let mut entry = ProcBuilder::new(0, 0);
    entry.op_i64(1);
    entry.op_i64(0);
    entry.op(Opcode::I64Div);
    entry.op(Opcode::Return);
    builder
        .add_call(CallConfig::new(path("$entry"), ty, ty), entry)
        .unwrap();

    let mut loader = MemoryLoader::new();
    loader.insert_object(
        loc("/main"),
        builder.build().unwrap().to_bytes().unwrap(),
    );
    let state = InterpreterState::new(Arc::new(loader), &loc("/main")).unwrap();
    assert!(BytecodeInterpreter::new(state).run().is_err());
}

#[test]
fn string_literals_materialize_through_the_heap() {
    use sable_object::descriptor::LiteralDescriptor;
    use sable_runtime::HeapValue;

    let (mut builder, ty) = builder_with_type();
    let hello = builder.add_literal(LiteralDescriptor::String("hello".to_string()));

    let mut entry = ProcBuilder::new(0, 0);
    entry.op_string(near(hello));
    entry.op(Opcode::Return);
    builder
        .add_call(CallConfig::new(path("$entry"), ty, ty), entry)
        .unwrap();

    let mut loader = MemoryLoader::new();
    loader.insert_object(
        loc("/main"),
        builder.build().unwrap().to_bytes().unwrap(),
    );
    let state = InterpreterState::new(Arc::new(loader), &loc("/main")).unwrap();
    let mut interpreter = BytecodeInterpreter::new(state);
    let exit = interpreter.run().unwrap();

    let handle = exit.main_return.as_ref().unwrap();
    match interpreter.state().heap.value(handle).unwrap() {
        HeapValue::Str(value) => assert_eq!(&**value, "hello"),
        other => panic!("unexpected heap value {:?}", other),
    }
}

#[test]
fn implicit_return_at_end_of_proc() {
    let (mut builder, ty) = builder_with_type();

    // no explicit return; the callee returns no value
    let mut side = ProcBuilder::new(0, 0);
    side.op(Opcode::Noop);
    let side = builder
        .add_call(CallConfig::new(path("side"), ty, ty).no_return(), side)
        .unwrap();

    let mut entry = ProcBuilder::new(0, 0);
    entry.op_call_static(near(side), 0);
    entry.op_i64(5);
    entry.op(Opcode::Return);
    builder
        .add_call(CallConfig::new(path("$entry"), ty, ty), entry)
        .unwrap();

    let exit = run_object(builder.build().unwrap());
    assert_eq!(exit.main_return, DataCell::I64(5));
}
