use crate::data_cell::{DescriptorCell, TypeHandle};
use std::collections::HashMap;
use std::sync::Arc;

/// One field of a class-like receiver: where the field descriptor lives and
/// which slot of the instance's storage it occupies. Slots chain from the
/// parent's layout, so a subtype's fields follow its supertype's.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VirtualMember {
    pub segment: u32,
    pub field_index: u32,
    pub layout_offset: u32,
}

/// One resolved call target.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VirtualMethod {
    pub segment: u32,
    pub call_index: u32,
    pub proc_offset: u32,
    pub returns_value: bool,
}

/// Mapping from one implemented concept's actions to the concrete calls
/// satisfying them.
#[derive(Clone, Debug)]
pub struct ImplTable {
    pub concept: DescriptorCell,
    pub extensions: HashMap<DescriptorCell, VirtualMethod>,
}

impl ImplTable {
    pub fn get_extension(&self, action: &DescriptorCell) -> Option<&VirtualMethod> {
        self.extensions.get(action)
    }
}

/// Flattened dispatch table of a class, struct, enum or instance. Lookups
/// not satisfied locally fall back to the parent table, mirroring the
/// descriptor's supertype chain.
#[derive(Debug)]
pub struct VirtualTable {
    descriptor: DescriptorCell,
    type_handle: TypeHandle,
    parent: Option<Arc<VirtualTable>>,

    allocator_trap: Option<u32>,
    ctor: VirtualMethod,

    members: HashMap<DescriptorCell, VirtualMember>,
    methods: HashMap<DescriptorCell, VirtualMethod>,
    impls: HashMap<DescriptorCell, ImplTable>,

    layout_total: u32,
}

impl VirtualTable {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        descriptor: DescriptorCell,
        type_handle: TypeHandle,
        parent: Option<Arc<VirtualTable>>,
        allocator_trap: Option<u32>,
        ctor: VirtualMethod,
        members: HashMap<DescriptorCell, VirtualMember>,
        methods: HashMap<DescriptorCell, VirtualMethod>,
        impls: HashMap<DescriptorCell, ImplTable>,
        layout_total: u32,
    ) -> Self {
        VirtualTable {
            descriptor,
            type_handle,
            parent,
            allocator_trap,
            ctor,
            members,
            methods,
            impls,
            layout_total,
        }
    }

    pub fn descriptor(&self) -> DescriptorCell {
        self.descriptor
    }

    pub fn type_handle(&self) -> TypeHandle {
        self.type_handle
    }

    pub fn parent(&self) -> Option<&Arc<VirtualTable>> {
        self.parent.as_ref()
    }

    pub fn allocator_trap(&self) -> Option<u32> {
        self.allocator_trap
    }

    pub fn ctor(&self) -> &VirtualMethod {
        &self.ctor
    }

    /// Total number of field slots an instance of this type carries,
    /// including inherited ones.
    pub fn layout_total(&self) -> u32 {
        self.layout_total
    }

    pub fn num_local_members(&self) -> usize {
        self.members.len()
    }

    pub fn num_local_methods(&self) -> usize {
        self.methods.len()
    }

    pub fn get_member(&self, field: &DescriptorCell) -> Option<&VirtualMember> {
        match self.members.get(field) {
            Some(member) => Some(member),
            None => self.parent.as_ref()?.get_member(field),
        }
    }

    pub fn get_method(&self, call: &DescriptorCell) -> Option<&VirtualMethod> {
        match self.methods.get(call) {
            Some(method) => Some(method),
            None => self.parent.as_ref()?.get_method(call),
        }
    }

    /// Look up the call implementing `action` of `concept`, walking up the
    /// parent chain until some ancestor's impl provides it.
    pub fn get_extension(
        &self,
        concept: &DescriptorCell,
        action: &DescriptorCell,
    ) -> Option<&VirtualMethod> {
        if let Some(table) = self.impls.get(concept) {
            if let Some(method) = table.get_extension(action) {
                return Some(method);
            }
        }
        self.parent.as_ref()?.get_extension(concept, action)
    }
}
