use crate::coroutine::StackfulCoroutine;
use crate::data_cell::DescriptorCell;
use crate::error::{RuntimeError, RuntimeResult};
use crate::heap_manager::HeapManager;
use crate::loader::Loader;
use crate::segment::BytecodeSegment;
use crate::segment_manager::SegmentManager;
use crate::subroutine::SubroutineManager;
use crate::type_manager::TypeManager;
use sable_common::{ModuleLocation, SymbolPath};
use sable_object::LinkageSection;
use std::sync::Arc;

/// Name of the call a main object may export as its entry point. When the
/// symbol is absent the first call in the object is the entry.
pub const ENTRY_SYMBOL: &str = "$entry";

/// Everything one interpreter run needs: the shared segment registry, the
/// typing and subroutine services built over it, the coroutine being driven
/// and its private heap.
pub struct InterpreterState {
    pub segments: Arc<SegmentManager>,
    pub types: TypeManager,
    pub subroutines: SubroutineManager,
    pub heap: HeapManager,
    pub coroutine: StackfulCoroutine,

    main_segment: Arc<BytecodeSegment>,
    entry_call: DescriptorCell,
}

impl InterpreterState {
    /// Load the main object, bootstrap intrinsic types from its system
    /// prelude (or from the main object itself when it imports none), and
    /// locate the entry call.
    pub fn new(loader: Arc<dyn Loader>, main_location: &ModuleLocation) -> RuntimeResult<Self> {
        let segments = Arc::new(SegmentManager::new(loader));
        let main_segment = segments.get_or_load_segment(main_location)?;
        let object = main_segment.object().clone();

        let prelude = {
            let mut prelude = None;
            for index in 0..object.num_imports() {
                let import = match object.get_import(index) {
                    Some(import) if import.system => import,
                    _ => continue,
                };
                let location = import
                    .location
                    .resolve(main_segment.location())
                    .map_err(|err| RuntimeError::InvariantViolation(err.to_string()))?;
                prelude = Some(segments.get_or_load_segment(&location)?);
                break;
            }
            prelude.unwrap_or_else(|| main_segment.clone())
        };

        let intrinsics = TypeManager::bootstrap_intrinsics(&prelude);
        let types = TypeManager::new(segments.clone(), intrinsics);
        let subroutines = SubroutineManager::new(segments.clone());

        let entry_path = SymbolPath::from_parts(&[ENTRY_SYMBOL]);
        let entry_call = match object.find_symbol(&entry_path) {
            Some((LinkageSection::Call, index)) => DescriptorCell {
                segment: main_segment.segment_index(),
                value: index,
                section: LinkageSection::Call,
            },
            Some((section, _)) => {
                return Err(RuntimeError::LinkageMismatch {
                    expected: LinkageSection::Call,
                    found: section,
                });
            }
            None if object.num_calls() > 0 => DescriptorCell {
                segment: main_segment.segment_index(),
                value: 0,
                section: LinkageSection::Call,
            },
            None => return Err(RuntimeError::MissingSymbol(entry_path)),
        };

        Ok(InterpreterState {
            segments,
            types,
            subroutines,
            heap: HeapManager::with_default_heap(),
            coroutine: StackfulCoroutine::new(),
            main_segment,
            entry_call,
        })
    }

    pub fn main_segment(&self) -> &Arc<BytecodeSegment> {
        &self.main_segment
    }

    pub fn entry_call(&self) -> DescriptorCell {
        self.entry_call
    }

    /// The segment the coroutine is currently executing in.
    pub fn current_segment(&self) -> RuntimeResult<Arc<BytecodeSegment>> {
        let index = self.coroutine.sp().ok_or_else(|| {
            RuntimeError::InvariantViolation("no active segment".to_string())
        })?;
        self.segments.get_segment_by_index(index).ok_or_else(|| {
            RuntimeError::InvariantViolation(format!("unknown segment {}", index))
        })
    }
}
