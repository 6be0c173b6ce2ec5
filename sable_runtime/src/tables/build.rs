use crate::data_cell::{DescriptorCell, TypeHandle};
use crate::error::{RuntimeError, RuntimeResult};
use crate::segment::BytecodeSegment;
use crate::segment_manager::SegmentManager;
use crate::tables::{ConceptTable, ExistentialTable, ImplTable, VirtualMember, VirtualMethod, VirtualTable};
use sable_object::descriptor::ImplRecord;
use sable_object::{LinkageSection, Object, TypeSpec};
use std::collections::HashMap;
use std::sync::Arc;

/// Classes, structs, enums and instances share one dispatch shape; this view
/// lets a single builder serve all four sections.
struct ClassLikeView<'a> {
    type_index: u32,
    super_address: Option<u32>,
    allocator_trap: Option<u32>,
    ctor_call: u32,
    members: &'a [u32],
    methods: &'a [u32],
    impls: &'a [ImplRecord],
}

fn class_like_view<'a>(object: &'a Object, cell: &DescriptorCell) -> RuntimeResult<ClassLikeView<'a>> {
    let missing = || {
        RuntimeError::InvariantViolation(format!("no {} descriptor at {}", cell.section, cell))
    };

    let view = match cell.section {
        LinkageSection::Class => {
            let class = object.get_class(cell.value).ok_or_else(missing)?;
            ClassLikeView {
                type_index: class.type_index,
                super_address: class.super_class,
                allocator_trap: class.allocator_trap,
                ctor_call: class.ctor_call,
                members: &class.members,
                methods: &class.methods,
                impls: &class.impls,
            }
        }
        LinkageSection::Struct => {
            let st = object.get_struct(cell.value).ok_or_else(missing)?;
            ClassLikeView {
                type_index: st.type_index,
                super_address: st.super_struct,
                allocator_trap: st.allocator_trap,
                ctor_call: st.ctor_call,
                members: &st.members,
                methods: &st.methods,
                impls: &st.impls,
            }
        }
        LinkageSection::Enum => {
            let en = object.get_enum(cell.value).ok_or_else(missing)?;
            ClassLikeView {
                type_index: en.type_index,
                super_address: en.super_enum,
                allocator_trap: en.allocator_trap,
                ctor_call: en.ctor_call,
                members: &en.members,
                methods: &en.methods,
                impls: &en.impls,
            }
        }
        LinkageSection::Instance => {
            let inst = object.get_instance(cell.value).ok_or_else(missing)?;
            ClassLikeView {
                type_index: inst.type_index,
                super_address: inst.super_instance,
                allocator_trap: inst.allocator_trap,
                ctor_call: inst.ctor_call,
                members: &inst.members,
                methods: &inst.methods,
                impls: &inst.impls,
            }
        }
        section => {
            return Err(RuntimeError::InvariantViolation(format!(
                "{} descriptor has no virtual table",
                section
            )));
        }
    };

    Ok(view)
}

/// Resolve a call address into a dispatchable target. A far address whose
/// link resolves to a non-call symbol is a fatal structural error reported
/// by `resolve_descriptor`.
fn resolve_virtual_method(
    mgr: &SegmentManager,
    segment: &BytecodeSegment,
    address: u32,
) -> RuntimeResult<VirtualMethod> {
    let cell = mgr.resolve_descriptor(segment, LinkageSection::Call, address)?;
    let target = mgr.get_segment_by_index(cell.segment).ok_or_else(|| {
        RuntimeError::InvariantViolation(format!("unknown segment {}", cell.segment))
    })?;
    let call = target.object().get_call(cell.value).ok_or_else(|| {
        RuntimeError::InvariantViolation(format!("no call descriptor at {}", cell))
    })?;

    if call.declonly {
        return Err(RuntimeError::InvariantViolation(format!(
            "call {} is a declaration without a proc",
            call.symbol_path
        )));
    }

    Ok(VirtualMethod {
        segment: cell.segment,
        call_index: cell.value,
        proc_offset: call.proc_offset,
        returns_value: !call.no_return,
    })
}

/// The concept implemented by an impl record, as a descriptor cell. The
/// record names the concept through a type entry, which must be a concrete
/// concept type.
fn resolve_impl_concept(
    mgr: &SegmentManager,
    segment: &BytecodeSegment,
    rec: &ImplRecord,
) -> RuntimeResult<DescriptorCell> {
    let ty = segment.object().get_type(rec.concept_type).ok_or_else(|| {
        RuntimeError::InvariantViolation(format!(
            "no type descriptor at index {}",
            rec.concept_type
        ))
    })?;

    match &ty.spec {
        TypeSpec::Concrete {
            section: LinkageSection::Concept,
            address,
            ..
        } => mgr.resolve_descriptor(segment, LinkageSection::Concept, *address),

        other => Err(RuntimeError::InvariantViolation(format!(
            "impl type {:?} is not a concrete concept",
            other
        ))),
    }
}

fn build_impl_tables(
    mgr: &SegmentManager,
    segment: &BytecodeSegment,
    impls: &[ImplRecord],
) -> RuntimeResult<HashMap<DescriptorCell, ImplTable>> {
    let mut tables = HashMap::with_capacity(impls.len());

    for rec in impls {
        let concept = resolve_impl_concept(mgr, segment, rec)?;

        let mut extensions = HashMap::with_capacity(rec.extensions.len());
        for ext in &rec.extensions {
            let action = mgr.resolve_descriptor(segment, LinkageSection::Action, ext.action)?;
            let method = resolve_virtual_method(mgr, segment, ext.call)?;
            extensions.insert(action, method);
        }

        tables.insert(
            concept,
            ImplTable {
                concept,
                extensions,
            },
        );
    }

    Ok(tables)
}

/// Build the virtual table for a class-like descriptor. The parent table is
/// resolved first (recursively, through the manager's cache), so
/// construction is strictly bottom-up and shared ancestors are built once.
pub(crate) fn build_virtual_table(
    mgr: &SegmentManager,
    cell: &DescriptorCell,
) -> RuntimeResult<Arc<VirtualTable>> {
    let segment = mgr.get_segment_by_index(cell.segment).ok_or_else(|| {
        RuntimeError::InvariantViolation(format!("unknown segment {}", cell.segment))
    })?;
    let object = segment.object().clone();
    let view = class_like_view(&object, cell)?;

    let parent = match view.super_address {
        Some(address) => {
            let parent_cell = mgr.resolve_descriptor(&segment, cell.section, address)?;
            Some(mgr.resolve_virtual_table(&parent_cell)?)
        }
        None => None,
    };

    let layout_start = parent.as_ref().map_or(0, |p| p.layout_total());

    let mut members = HashMap::with_capacity(view.members.len());
    for (i, address) in view.members.iter().enumerate() {
        let field = mgr.resolve_descriptor(&segment, LinkageSection::Field, *address)?;
        members.insert(
            field,
            VirtualMember {
                segment: field.segment,
                field_index: field.value,
                layout_offset: layout_start + i as u32,
            },
        );
    }
    let layout_total = layout_start + view.members.len() as u32;

    let ctor = resolve_virtual_method(mgr, &segment, view.ctor_call)?;

    let mut methods = HashMap::with_capacity(view.methods.len());
    for address in view.methods {
        let call = mgr.resolve_descriptor(&segment, LinkageSection::Call, *address)?;
        let method = resolve_virtual_method(mgr, &segment, *address)?;
        methods.insert(call, method);
    }

    let impls = build_impl_tables(mgr, &segment, view.impls)?;

    Ok(Arc::new(VirtualTable::new(
        *cell,
        TypeHandle {
            segment: cell.segment,
            type_index: view.type_index,
        },
        parent,
        view.allocator_trap,
        ctor,
        members,
        methods,
        impls,
        layout_total,
    )))
}

pub(crate) fn build_concept_table(
    mgr: &SegmentManager,
    cell: &DescriptorCell,
) -> RuntimeResult<Arc<ConceptTable>> {
    let segment = mgr.get_segment_by_index(cell.segment).ok_or_else(|| {
        RuntimeError::InvariantViolation(format!("unknown segment {}", cell.segment))
    })?;
    let object = segment.object().clone();

    let concept = object.get_concept(cell.value).ok_or_else(|| {
        RuntimeError::InvariantViolation(format!("no concept descriptor at {}", cell))
    })?;

    let parent = match concept.super_concept {
        Some(address) => {
            let parent_cell =
                mgr.resolve_descriptor(&segment, LinkageSection::Concept, address)?;
            Some(mgr.resolve_concept_table(&parent_cell)?)
        }
        None => None,
    };

    // the concept's own impls supply default extensions, flattened into one
    // action-keyed map
    let mut extensions = HashMap::new();
    for rec in &concept.impls {
        for ext in &rec.extensions {
            let action = mgr.resolve_descriptor(&segment, LinkageSection::Action, ext.action)?;
            let method = resolve_virtual_method(mgr, &segment, ext.call)?;
            extensions.insert(action, method);
        }
    }

    Ok(Arc::new(ConceptTable::new(
        *cell,
        TypeHandle {
            segment: cell.segment,
            type_index: concept.type_index,
        },
        parent,
        extensions,
    )))
}

pub(crate) fn build_existential_table(
    mgr: &SegmentManager,
    cell: &DescriptorCell,
) -> RuntimeResult<Arc<ExistentialTable>> {
    let segment = mgr.get_segment_by_index(cell.segment).ok_or_else(|| {
        RuntimeError::InvariantViolation(format!("unknown segment {}", cell.segment))
    })?;
    let object = segment.object().clone();

    let existential = object.get_existential(cell.value).ok_or_else(|| {
        RuntimeError::InvariantViolation(format!("no existential descriptor at {}", cell))
    })?;

    let parent = match existential.super_existential {
        Some(address) => {
            let parent_cell =
                mgr.resolve_descriptor(&segment, LinkageSection::Existential, address)?;
            Some(mgr.resolve_existential_table(&parent_cell)?)
        }
        None => None,
    };

    let mut methods = HashMap::with_capacity(existential.methods.len());
    for address in &existential.methods {
        let call = mgr.resolve_descriptor(&segment, LinkageSection::Call, *address)?;
        let method = resolve_virtual_method(mgr, &segment, *address)?;
        methods.insert(call, method);
    }

    let impls = build_impl_tables(mgr, &segment, &existential.impls)?;

    Ok(Arc::new(ExistentialTable::new(
        *cell,
        TypeHandle {
            segment: cell.segment,
            type_index: existential.type_index,
        },
        parent,
        methods,
        impls,
    )))
}
