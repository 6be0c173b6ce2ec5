use crate::coroutine::StackfulCoroutine;
use crate::error::RuntimeResult;
use crate::heap_manager::HeapManager;
use crate::segment_manager::SegmentManager;
use std::sync::Arc;

/// What a native trap gets to touch while it runs: the invoking coroutine's
/// stacks, the heap and the segment registry. Traps run inside a guard, so
/// they cannot pop frames below the invoking call.
pub struct InterpreterBridge<'a> {
    pub coroutine: &'a mut StackfulCoroutine,
    pub heap: &'a mut HeapManager,
    pub segments: &'a Arc<SegmentManager>,
}

/// One native operation. Traps communicate through the data stack: they pop
/// their operands and push their results like any other instruction.
pub type Trap = fn(&mut InterpreterBridge) -> RuntimeResult<()>;

/// Native extension of one module. The loader supplies the plugin when the
/// module's object declares one; bytecode invokes its traps by number.
pub trait Plugin: Send + Sync {
    fn num_traps(&self) -> u32;

    fn trap(&self, index: u32) -> Option<Trap>;
}
