use sable_common::ModuleLocation;
use sable_common::SymbolPath;
use sable_object::builder::CallConfig;
use sable_object::descriptor::{
    ConceptDescriptor, EnumDescriptor, ExtensionRecord, ImplRecord, StructDescriptor,
};
use sable_object::{far, near, LinkageSection, ObjectBuilder, Opcode, ProcBuilder, TypeSpec};
use sable_runtime::{
    DescriptorCell, LinkEntry, Loader, MemoryLoader, SegmentManager, StackfulCoroutine,
    SubroutineManager, TypeHandle, TypeManager,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

fn loc(path: &str) -> ModuleLocation {
    ModuleLocation::new(path)
}

fn path(name: &str) -> SymbolPath {
    SymbolPath::from_parts(&[name])
}

fn cell(segment: u32, value: u32, section: LinkageSection) -> DescriptorCell {
    DescriptorCell {
        segment,
        value,
        section,
    }
}

fn empty_proc() -> ProcBuilder {
    let mut proc = ProcBuilder::new(0, 0);
    proc.op(Opcode::Return);
    proc
}

fn manager_for(objects: Vec<(&str, sable_object::Object)>) -> Arc<SegmentManager> {
    let mut loader = MemoryLoader::new();
    for (location, object) in objects {
        loader.insert_object(loc(location), object.to_bytes().unwrap());
    }
    Arc::new(SegmentManager::new(Arc::new(loader)))
}

/// Object exporting one call `forty_two` that pushes 42.
fn provider_object() -> sable_object::Object {
    let mut builder = ObjectBuilder::new();
    let ty = builder.add_type(TypeSpec::NoReturn, None);
    let mut proc = ProcBuilder::new(0, 0);
    proc.op_i64(42);
    proc.op(Opcode::Return);
    builder
        .add_call(CallConfig::new(path("forty_two"), ty, ty), proc)
        .unwrap();
    builder.build().unwrap()
}

/// Object importing `forty_two` from `/b` through one far link.
fn importer_object() -> sable_object::Object {
    let mut builder = ObjectBuilder::new();
    let ty = builder.add_type(TypeSpec::NoReturn, None);
    let import = builder.add_import(loc("/b"), false);
    let link = builder.add_link(LinkageSection::Call, path("forty_two"), import);

    let mut proc = ProcBuilder::new(0, 0);
    proc.op_call_static(far(link), 0);
    proc.op(Opcode::Return);
    builder
        .add_call(CallConfig::new(path("$entry"), ty, ty), proc)
        .unwrap();
    builder.build().unwrap()
}

#[test]
fn far_link_resolves_to_target_segment() {
    let segments = manager_for(vec![("/a", importer_object()), ("/b", provider_object())]);
    let seg_a = segments.get_or_load_segment(&loc("/a")).unwrap();

    let entry = segments.resolve_link(&seg_a, 0).unwrap();
    let seg_b = segments.get_segment(&loc("/b")).unwrap();
    assert_eq!(
        entry,
        LinkEntry {
            segment: seg_b.segment_index(),
            linkage: LinkageSection::Call,
            value: 0,
        }
    );

    // a frame built through the far address executes in the target segment
    let subroutines = SubroutineManager::new(segments.clone());
    let mut coroutine = StackfulCoroutine::new();
    let call = segments
        .resolve_descriptor(&seg_a, LinkageSection::Call, far(0))
        .unwrap();
    subroutines.call_proc(&mut coroutine, call, 0, None).unwrap();
    assert_eq!(
        coroutine.current_call().unwrap().call_segment(),
        seg_b.segment_index()
    );
}

#[test]
fn link_resolution_is_idempotent() {
    let segments = manager_for(vec![("/a", importer_object()), ("/b", provider_object())]);
    let seg_a = segments.get_or_load_segment(&loc("/a")).unwrap();

    let first = segments.resolve_link(&seg_a, 0).unwrap();
    let second = segments.resolve_link(&seg_a, 0).unwrap();
    assert_eq!(first, second);
    assert_eq!(segments.num_segments(), 2);
}

#[test]
fn racing_threads_observe_one_link_entry() {
    let segments = manager_for(vec![("/a", importer_object()), ("/b", provider_object())]);
    let seg_a = segments.get_or_load_segment(&loc("/a")).unwrap();

    let entries = thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let segments = segments.clone();
                let seg_a = seg_a.clone();
                scope.spawn(move || segments.resolve_link(&seg_a, 0).unwrap())
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>()
    });

    assert_eq!(entries[0], entries[1]);
    // both threads loaded the same target segment
    assert_eq!(segments.num_segments(), 2);
}

#[test]
fn wrong_linkage_kind_is_fatal() {
    let mut builder = ObjectBuilder::new();
    let ty = builder.add_type(TypeSpec::NoReturn, None);
    let import = builder.add_import(loc("/b"), false);
    // the provider exports forty_two as a call, not a static
    let link = builder.add_link(LinkageSection::Static, path("forty_two"), import);
    builder.add_static(path("s"), ty, true, far(link));
    let mut proc = ProcBuilder::new(0, 0);
    proc.op(Opcode::Return);
    builder
        .add_call(CallConfig::new(path("$entry"), ty, ty), proc)
        .unwrap();

    let segments = manager_for(vec![("/a", builder.build().unwrap()), ("/b", provider_object())]);
    let seg_a = segments.get_or_load_segment(&loc("/a")).unwrap();
    assert!(segments.resolve_link(&seg_a, 0).is_err());
}

/// Struct with one field and one method, no supertype.
fn point_object() -> sable_object::Object {
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
    let ctor = builder
        .add_call(
            CallConfig::new(path("Point.$ctor"), no_return, no_return).constructor(),
            empty_proc(),
        )
        .unwrap();
    let method = builder
        .add_call(CallConfig::new(path("Point.get"), no_return, no_return), {
            let mut proc = ProcBuilder::new(0, 0);
            proc.op_i64(1);
            proc.op(Opcode::Return);
            proc
        })
        .unwrap();

    builder.add_struct(StructDescriptor {
        symbol_path: path("Point"),
        type_index: point_type,
        super_struct: None,
        allocator_trap: None,
        ctor_call: near(ctor),
        members: vec![near(field)],
        methods: vec![near(method)],
        impls: Vec::new(),
        sealed_subtypes: Vec::new(),
        sealed: false,
        is_abstract: false,
    });
    builder.build().unwrap()
}

#[test]
fn struct_virtual_table_has_one_ctor_and_no_inherited_entries() {
    let segments = manager_for(vec![("/point", point_object())]);
    segments.get_or_load_segment(&loc("/point")).unwrap();

    let table = segments
        .resolve_struct_virtual_table(&cell(0, 0, LinkageSection::Struct))
        .unwrap();
    assert!(table.parent().is_none());
    assert_eq!(table.ctor().call_index, 0);
    assert!(!table.ctor().returns_value);
    assert_eq!(table.num_local_methods(), 1);
    assert_eq!(table.layout_total(), 1);

    let member = table.get_member(&cell(0, 0, LinkageSection::Field)).unwrap();
    assert_eq!(member.layout_offset, 0);
}

#[test]
fn table_lookups_are_memoized() {
    let segments = manager_for(vec![("/point", point_object())]);
    segments.get_or_load_segment(&loc("/point")).unwrap();

    let key = cell(0, 0, LinkageSection::Struct);
    let first = segments.resolve_struct_virtual_table(&key).unwrap();
    let second = segments.resolve_struct_virtual_table(&key).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

/// Class Base plus two subclasses sharing it.
fn hierarchy_object() -> sable_object::Object {
    use sable_object::descriptor::ClassDescriptor;

    let mut builder = ObjectBuilder::new();
    let no_return = builder.add_type(TypeSpec::NoReturn, None);

    let class_type = |builder: &mut ObjectBuilder, index: u32| {
        builder.add_type(
            TypeSpec::Concrete {
                section: LinkageSection::Class,
                address: near(index),
                arguments: Vec::new(),
            },
            None,
        )
    };
    let base_type = class_type(&mut builder, 0);
    let left_type = class_type(&mut builder, 1);
    let right_type = class_type(&mut builder, 2);

    let ctor = |builder: &mut ObjectBuilder, name: &str| {
        builder
            .add_call(
                CallConfig::new(path(name), no_return, no_return).constructor(),
                empty_proc(),
            )
            .unwrap()
    };
    let base_ctor = ctor(&mut builder, "Base.$ctor");
    let left_ctor = ctor(&mut builder, "Left.$ctor");
    let right_ctor = ctor(&mut builder, "Right.$ctor");

    let class = |name: &str, type_index: u32, super_class: Option<u32>, ctor_call: u32| {
        ClassDescriptor {
            symbol_path: path(name),
            type_index,
            super_class,
            template: None,
            allocator_trap: None,
            ctor_call: near(ctor_call),
            members: Vec::new(),
            methods: Vec::new(),
            impls: Vec::new(),
            sealed_subtypes: Vec::new(),
            sealed: false,
            is_abstract: false,
        }
    };
    builder.add_class(class("Base", base_type, None, base_ctor));
    builder.add_class(class("Left", left_type, Some(near(0)), left_ctor));
    builder.add_class(class("Right", right_type, Some(near(0)), right_ctor));
    builder.build().unwrap()
}

#[test]
fn shared_parent_table_is_built_once() {
    let segments = manager_for(vec![("/h", hierarchy_object())]);
    segments.get_or_load_segment(&loc("/h")).unwrap();

    let left = segments
        .resolve_class_virtual_table(&cell(0, 1, LinkageSection::Class))
        .unwrap();
    let right = segments
        .resolve_class_virtual_table(&cell(0, 2, LinkageSection::Class))
        .unwrap();

    let left_parent = left.parent().unwrap();
    let right_parent = right.parent().unwrap();
    assert!(Arc::ptr_eq(left_parent, right_parent));
    assert_eq!(left_parent.descriptor(), cell(0, 0, LinkageSection::Class));
}

/// Sealed enum `Color` permitting only `Red`.
fn sealed_enum_object() -> sable_object::Object {
    let mut builder = ObjectBuilder::new();
    let no_return = builder.add_type(TypeSpec::NoReturn, None);
    let color_type = builder.add_type(
        TypeSpec::Concrete {
            section: LinkageSection::Enum,
            address: near(0),
            arguments: Vec::new(),
        },
        None,
    );
    let red_type = builder.add_type(
        TypeSpec::Concrete {
            section: LinkageSection::Enum,
            address: near(1),
            arguments: Vec::new(),
        },
        Some(color_type),
    );

    let color_ctor = builder
        .add_call(
            CallConfig::new(path("Color.$ctor"), no_return, no_return).constructor(),
            empty_proc(),
        )
        .unwrap();
    let red_ctor = builder
        .add_call(
            CallConfig::new(path("Red.$ctor"), no_return, no_return).constructor(),
            empty_proc(),
        )
        .unwrap();

    let descriptor = |name: &str, type_index: u32, super_enum, ctor: u32, sealed_subtypes| {
        EnumDescriptor {
            symbol_path: path(name),
            type_index,
            super_enum,
            allocator_trap: None,
            ctor_call: near(ctor),
            members: Vec::new(),
            methods: Vec::new(),
            impls: Vec::new(),
            sealed_subtypes,
            sealed: true,
        }
    };
    builder.add_enum(descriptor(
        "Color",
        color_type,
        None,
        color_ctor,
        vec![TypeSpec::Concrete {
            section: LinkageSection::Enum,
            address: near(1),
            arguments: Vec::new(),
        }],
    ));
    builder.add_enum(descriptor("Red", red_type, Some(near(0)), red_ctor, Vec::new()));
    builder.build().unwrap()
}

#[test]
fn sealed_enum_accepts_only_listed_subtypes() {
    let segments = manager_for(vec![("/color", sealed_enum_object())]);
    let segment = segments.get_or_load_segment(&loc("/color")).unwrap();
    let types = TypeManager::new(segments.clone(), HashMap::new());

    let color = cell(0, 0, LinkageSection::Enum);
    let red = types
        .resolve_handle(TypeHandle {
            segment: segment.segment_index(),
            type_index: 2,
        })
        .unwrap();
    let color_def = types
        .resolve_handle(TypeHandle {
            segment: segment.segment_index(),
            type_index: 1,
        })
        .unwrap();

    assert!(types.has_sealed_type(&color, &red).unwrap());
    assert!(!types.has_sealed_type(&color, &color_def).unwrap());
}

#[test]
fn type_specs_round_trip_through_the_manager() {
    use sable_common::{SymbolUrl, TypeDef};

    let segments = manager_for(vec![("/point", point_object())]);
    let segment = segments.get_or_load_segment(&loc("/point")).unwrap();
    let types = TypeManager::new(segments.clone(), HashMap::new());

    let spec = TypeSpec::Concrete {
        section: LinkageSection::Struct,
        address: near(0),
        arguments: Vec::new(),
    };
    let def = types.resolve_spec(&segment, &spec).unwrap();
    assert_eq!(
        def,
        TypeDef::concrete(SymbolUrl::new(loc("/point"), path("Point")), Vec::new())
    );

    assert_eq!(types.spec_from_def(&segment, &def).unwrap(), spec);
}

/// Concept chain `Grandchild extends Child extends Root`, with the action's
/// default extension attached at the root.
fn concept_chain_object() -> sable_object::Object {
    let mut builder = ObjectBuilder::new();
    let no_return = builder.add_type(TypeSpec::NoReturn, None);

    let concept_type = |builder: &mut ObjectBuilder, index: u32| {
        builder.add_type(
            TypeSpec::Concrete {
                section: LinkageSection::Concept,
                address: near(index),
                arguments: Vec::new(),
            },
            None,
        )
    };
    let root_type = concept_type(&mut builder, 0);
    let child_type = concept_type(&mut builder, 1);
    let grandchild_type = concept_type(&mut builder, 2);

    let action = builder.add_action(path("describe"), near(0), no_return);
    let default_impl = builder
        .add_call(CallConfig::new(path("Root.describe"), no_return, no_return), {
            let mut proc = ProcBuilder::new(0, 0);
            proc.op_i64(7);
            proc.op(Opcode::Return);
            proc
        })
        .unwrap();

    builder.add_concept(ConceptDescriptor {
        symbol_path: path("Root"),
        type_index: root_type,
        template: None,
        super_concept: None,
        actions: vec![near(action)],
        impls: vec![ImplRecord {
            concept_type: root_type,
            extensions: vec![ExtensionRecord {
                action: near(action),
                call: near(default_impl),
            }],
        }],
    });
    builder.add_concept(ConceptDescriptor {
        symbol_path: path("Child"),
        type_index: child_type,
        template: None,
        super_concept: Some(near(0)),
        actions: Vec::new(),
        impls: Vec::new(),
    });
    builder.add_concept(ConceptDescriptor {
        symbol_path: path("Grandchild"),
        type_index: grandchild_type,
        template: None,
        super_concept: Some(near(1)),
        actions: Vec::new(),
        impls: Vec::new(),
    });
    builder.build().unwrap()
}

#[test]
fn concept_lookup_falls_through_to_the_root() {
    let segments = manager_for(vec![("/concepts", concept_chain_object())]);
    segments.get_or_load_segment(&loc("/concepts")).unwrap();

    let grandchild = segments
        .resolve_concept_table(&cell(0, 2, LinkageSection::Concept))
        .unwrap();
    assert_eq!(grandchild.num_local_extensions(), 0);
    assert!(grandchild.parent().is_some());

    let action = cell(0, 0, LinkageSection::Action);
    let method = grandchild.get_extension(&action).unwrap();
    assert_eq!(method.call_index, 1);
    assert!(method.returns_value);
}

#[test]
fn loader_miss_reports_a_missing_object() {
    let segments = manager_for(vec![]);
    assert!(segments.get_or_load_segment(&loc("/nowhere")).is_err());
}

#[test]
fn relative_locations_cannot_be_loaded() {
    let loader = MemoryLoader::new();
    assert!(loader.load_object(&loc("relative")).unwrap().is_none());

    let segments = Arc::new(SegmentManager::new(Arc::new(loader)));
    assert!(segments.get_or_load_segment(&loc("relative")).is_err());
}
