pub mod call_cell;
pub mod coroutine;
pub mod data_cell;
pub mod error;
pub mod heap;
pub mod heap_manager;
pub mod interpreter;
pub mod interpreter_state;
pub mod literal_cell;
pub mod loader;
pub mod plugin;
pub mod segment;
pub mod segment_manager;
pub mod subroutine;
pub mod tables;
pub mod type_manager;

pub use self::call_cell::CallCell;
pub use self::coroutine::StackfulCoroutine;
pub use self::data_cell::{DataCell, DescriptorCell, RefHandle, TypeHandle};
pub use self::error::{RuntimeError, RuntimeResult};
pub use self::heap::{AbstractHeap, HeapValue, SableHeap};
pub use self::heap_manager::HeapManager;
pub use self::interpreter::{BytecodeInterpreter, InterpreterExit};
pub use self::interpreter_state::InterpreterState;
pub use self::literal_cell::LiteralCell;
pub use self::loader::{DirectoryLoader, Loader, MemoryLoader};
pub use self::plugin::{InterpreterBridge, Plugin, Trap};
pub use self::segment::{BytecodeSegment, LinkEntry};
pub use self::segment_manager::SegmentManager;
pub use self::subroutine::SubroutineManager;
pub use self::tables::{ConceptTable, ExistentialTable, ImplTable, VirtualMember, VirtualMethod, VirtualTable};
pub use self::type_manager::{TypeComparison, TypeManager};
