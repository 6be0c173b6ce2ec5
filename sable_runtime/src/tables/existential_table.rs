use crate::data_cell::{DescriptorCell, TypeHandle};
use crate::tables::virtual_table::{ImplTable, VirtualMethod};
use std::collections::HashMap;
use std::sync::Arc;

/// Dispatch table of an existential type. Existentials are how intrinsic
/// values (ints, strings and the rest) carry methods and concept impls.
#[derive(Debug)]
pub struct ExistentialTable {
    descriptor: DescriptorCell,
    type_handle: TypeHandle,
    parent: Option<Arc<ExistentialTable>>,
    methods: HashMap<DescriptorCell, VirtualMethod>,
    impls: HashMap<DescriptorCell, ImplTable>,
}

impl ExistentialTable {
    pub(crate) fn new(
        descriptor: DescriptorCell,
        type_handle: TypeHandle,
        parent: Option<Arc<ExistentialTable>>,
        methods: HashMap<DescriptorCell, VirtualMethod>,
        impls: HashMap<DescriptorCell, ImplTable>,
    ) -> Self {
        ExistentialTable {
            descriptor,
            type_handle,
            parent,
            methods,
            impls,
        }
    }

    pub fn descriptor(&self) -> DescriptorCell {
        self.descriptor
    }

    pub fn type_handle(&self) -> TypeHandle {
        self.type_handle
    }

    pub fn parent(&self) -> Option<&Arc<ExistentialTable>> {
        self.parent.as_ref()
    }

    pub fn get_method(&self, call: &DescriptorCell) -> Option<&VirtualMethod> {
        match self.methods.get(call) {
            Some(method) => Some(method),
            None => self.parent.as_ref()?.get_method(call),
        }
    }

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
