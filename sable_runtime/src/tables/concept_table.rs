use crate::data_cell::{DescriptorCell, TypeHandle};
use crate::tables::virtual_table::VirtualMethod;
use std::collections::HashMap;
use std::sync::Arc;

/// Dispatch table of a concept: its default extensions keyed by action
/// descriptor, with lookups falling through the superconcept chain. Built
/// strictly bottom-up, so by the time a table exists its whole ancestor
/// chain does too.
#[derive(Debug)]
pub struct ConceptTable {
    descriptor: DescriptorCell,
    type_handle: TypeHandle,
    parent: Option<Arc<ConceptTable>>,
    extensions: HashMap<DescriptorCell, VirtualMethod>,
}

impl ConceptTable {
    pub(crate) fn new(
        descriptor: DescriptorCell,
        type_handle: TypeHandle,
        parent: Option<Arc<ConceptTable>>,
        extensions: HashMap<DescriptorCell, VirtualMethod>,
    ) -> Self {
        ConceptTable {
            descriptor,
            type_handle,
            parent,
            extensions,
        }
    }

    pub fn descriptor(&self) -> DescriptorCell {
        self.descriptor
    }

    pub fn type_handle(&self) -> TypeHandle {
        self.type_handle
    }

    pub fn parent(&self) -> Option<&Arc<ConceptTable>> {
        self.parent.as_ref()
    }

    pub fn num_local_extensions(&self) -> usize {
        self.extensions.len()
    }

    pub fn get_extension(&self, action: &DescriptorCell) -> Option<&VirtualMethod> {
        match self.extensions.get(action) {
            Some(method) => Some(method),
            None => self.parent.as_ref()?.get_extension(action),
        }
    }
}
