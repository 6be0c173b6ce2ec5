use crate::data_cell::{DataCell, RefHandle};
use crate::error::{RuntimeError, RuntimeResult};
use crate::heap::{AbstractHeap, HeapValue, SableHeap};
use crate::literal_cell::LiteralCell;
use crate::segment::BytecodeSegment;
use crate::tables::VirtualTable;
use std::sync::Arc;

/// Allocation front end over the abstract heap. Boxed literals are cached
/// per segment so repeated execution of the same literal load reuses the
/// first allocation.
pub struct HeapManager {
    heap: Box<dyn AbstractHeap>,
}

impl HeapManager {
    pub fn new(heap: Box<dyn AbstractHeap>) -> Self {
        HeapManager { heap }
    }

    pub fn with_default_heap() -> Self {
        HeapManager::new(Box::new(SableHeap::new()))
    }

    pub fn allocate_string(&mut self, value: impl Into<Arc<str>>) -> DataCell {
        DataCell::Ref(self.heap.insert(HeapValue::Str(value.into())))
    }

    pub fn allocate_url(&mut self, value: impl Into<Arc<str>>) -> DataCell {
        DataCell::Ref(self.heap.insert(HeapValue::Url(value.into())))
    }

    pub fn allocate_bytes(&mut self, value: impl Into<Arc<[u8]>>) -> DataCell {
        DataCell::Ref(self.heap.insert(HeapValue::Bytes(value.into())))
    }

    pub fn allocate_status(&mut self, code: i64, message: impl Into<Arc<str>>) -> DataCell {
        DataCell::Ref(self.heap.insert(HeapValue::Status {
            code,
            message: message.into(),
        }))
    }

    pub fn allocate_rest(&mut self, values: Vec<DataCell>) -> DataCell {
        DataCell::Ref(self.heap.insert(HeapValue::Rest(values)))
    }

    /// Allocate a fresh instance with storage for every field slot the
    /// vtable's layout names, including inherited ones.
    pub fn allocate_instance(&mut self, vtable: Arc<VirtualTable>) -> DataCell {
        let fields = vec![DataCell::Undef; vtable.layout_total() as usize];
        DataCell::Ref(self.heap.insert(HeapValue::Instance { vtable, fields }))
    }

    pub fn value(&self, handle: RefHandle) -> RuntimeResult<&HeapValue> {
        self.heap
            .get(handle)
            .ok_or_else(|| RuntimeError::InvariantViolation(format!("dangling {}", handle)))
    }

    pub fn value_mut(&mut self, handle: RefHandle) -> RuntimeResult<&mut HeapValue> {
        self.heap
            .get_mut(handle)
            .ok_or_else(|| RuntimeError::InvariantViolation(format!("dangling {}", handle)))
    }

    pub fn instance_vtable(&self, handle: RefHandle) -> RuntimeResult<Arc<VirtualTable>> {
        match self.value(handle)? {
            HeapValue::Instance { vtable, .. } => Ok(vtable.clone()),
            other => Err(RuntimeError::InvariantViolation(format!(
                "{} is not an instance ({:?})",
                handle, other
            ))),
        }
    }

    pub fn get_field(&self, handle: RefHandle, layout_offset: u32) -> RuntimeResult<DataCell> {
        match self.value(handle)? {
            HeapValue::Instance { fields, .. } => {
                fields.get(layout_offset as usize).copied().ok_or_else(|| {
                    RuntimeError::InvariantViolation(format!(
                        "field slot {} out of range for {}",
                        layout_offset, handle
                    ))
                })
            }
            _ => Err(RuntimeError::InvariantViolation(format!(
                "{} is not an instance",
                handle
            ))),
        }
    }

    pub fn set_field(
        &mut self,
        handle: RefHandle,
        layout_offset: u32,
        value: DataCell,
    ) -> RuntimeResult<()> {
        match self.value_mut(handle)? {
            HeapValue::Instance { fields, .. } => {
                let slot = fields.get_mut(layout_offset as usize).ok_or_else(|| {
                    RuntimeError::InvariantViolation(format!(
                        "field slot {} out of range for {}",
                        layout_offset, handle
                    ))
                })?;
                *slot = value;
                Ok(())
            }
            _ => Err(RuntimeError::InvariantViolation(format!(
                "{} is not an instance",
                handle
            ))),
        }
    }

    /// Turn a resolved literal into a data cell, boxing strings and byte
    /// buffers. Boxed cells are cached in the owning segment keyed by the
    /// literal's address.
    pub fn materialize_literal(
        &mut self,
        owner: &BytecodeSegment,
        address: u32,
        literal: &LiteralCell,
    ) -> DataCell {
        if let Some(cell) = literal.to_unboxed() {
            return cell;
        }

        if let Some(cached) = owner.cached_literal(address) {
            return cached;
        }

        let cell = match literal {
            LiteralCell::String(value) => self.allocate_string(value.clone()),
            LiteralCell::Bytes(value) => self.allocate_bytes(value.clone()),
            // to_unboxed covered everything else
            _ => unreachable!(),
        };
        owner.cache_literal(address, cell)
    }

    pub fn collect_garbage(&mut self, roots: &[RefHandle]) {
        self.heap.collect_garbage(roots);
    }
}
