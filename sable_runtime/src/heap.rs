use crate::data_cell::{DataCell, RefHandle};
use crate::tables::VirtualTable;
use std::sync::Arc;

/// Anything that lives behind a `RefHandle`: boxed primitives and instances
/// of class-like types.
#[derive(Clone, Debug)]
pub enum HeapValue {
    Str(Arc<str>),
    Url(Arc<str>),
    Bytes(Arc<[u8]>),
    Status { code: i64, message: Arc<str> },
    Rest(Vec<DataCell>),
    Instance {
        vtable: Arc<VirtualTable>,
        fields: Vec<DataCell>,
    },
}

/// Object lifetime tracking is an external collaborator: the runtime
/// allocates through this trait and reports roots, and the heap
/// implementation decides if and when anything is reclaimed.
pub trait AbstractHeap: Send {
    fn insert(&mut self, value: HeapValue) -> RefHandle;

    fn get(&self, handle: RefHandle) -> Option<&HeapValue>;

    fn get_mut(&mut self, handle: RefHandle) -> Option<&mut HeapValue>;

    fn collect_garbage(&mut self, roots: &[RefHandle]);
}

struct Slot {
    value: HeapValue,
    marked: bool,
}

/// Arena heap: slots are handed out in order and never reused. The mark
/// phase of `collect_garbage` is implemented so an embedder can observe
/// reachability, but this heap never frees anything.
pub struct SableHeap {
    slots: Vec<Slot>,
}

impl SableHeap {
    pub fn new() -> Self {
        SableHeap { slots: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_marked(&self, handle: RefHandle) -> bool {
        self.slots.get(handle.0).map_or(false, |slot| slot.marked)
    }

    fn mark(&mut self, root: RefHandle) {
        let mut worklist = vec![root];

        while let Some(handle) = worklist.pop() {
            let slot = match self.slots.get_mut(handle.0) {
                Some(slot) if !slot.marked => slot,
                _ => continue,
            };
            slot.marked = true;

            let mut visit = |cells: &[DataCell]| {
                cells
                    .iter()
                    .filter_map(|cell| match cell {
                        DataCell::Ref(handle) => Some(*handle),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
            };

            match &slot.value {
                HeapValue::Rest(cells) => worklist.extend(visit(cells)),
                HeapValue::Instance { fields, .. } => worklist.extend(visit(fields)),
                _ => {}
            }
        }
    }
}

impl Default for SableHeap {
    fn default() -> Self {
        SableHeap::new()
    }
}

impl AbstractHeap for SableHeap {
    fn insert(&mut self, value: HeapValue) -> RefHandle {
        self.slots.push(Slot {
            value,
            marked: false,
        });
        RefHandle(self.slots.len() - 1)
    }

    fn get(&self, handle: RefHandle) -> Option<&HeapValue> {
        self.slots.get(handle.0).map(|slot| &slot.value)
    }

    fn get_mut(&mut self, handle: RefHandle) -> Option<&mut HeapValue> {
        self.slots.get_mut(handle.0).map(|slot| &mut slot.value)
    }

    fn collect_garbage(&mut self, roots: &[RefHandle]) {
        for slot in &mut self.slots {
            slot.marked = false;
        }
        for root in roots {
            self.mark(*root);
        }
    }
}
