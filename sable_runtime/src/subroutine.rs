use crate::call_cell::CallCell;
use crate::coroutine::StackfulCoroutine;
use crate::data_cell::{DataCell, DescriptorCell};
use crate::error::{RuntimeError, RuntimeResult};
use crate::segment_manager::SegmentManager;
use crate::tables::VirtualMethod;
use sable_object::object::iterator_for_call;
use sable_object::{LexicalTarget, LinkageSection, ProcInfo};
use smallvec::SmallVec;
use std::sync::Arc;

/// Builds activation frames and transfers control into and out of procs.
/// All the bookkeeping of a call lives here: popping arguments, capturing
/// lexicals from ancestor frames, recording the return address, and
/// unwinding the data stack on return.
pub struct SubroutineManager {
    segments: Arc<SegmentManager>,
}

impl SubroutineManager {
    pub fn new(segments: Arc<SegmentManager>) -> Self {
        SubroutineManager { segments }
    }

    /// Capture the lexical variables a proc declares by walking the call
    /// stack from the innermost frame outward. Each record names the call
    /// whose activation holds the variable; the nearest matching frame wins.
    fn capture_lexicals(
        coroutine: &StackfulCoroutine,
        segment_index: u32,
        proc: &ProcInfo,
    ) -> RuntimeResult<Vec<DataCell>> {
        let mut lexicals: SmallVec<[DataCell; 4]> =
            SmallVec::with_capacity(proc.lexicals.len());

        for record in &proc.lexicals {
            let mut captured = None;

            for depth in (0..coroutine.call_stack_size()).rev() {
                let frame = coroutine.peek_call(depth as i32)?;
                if frame.call_segment() != segment_index
                    || frame.call_index() != record.activation_call
                {
                    continue;
                }

                let value = match record.target {
                    LexicalTarget::Argument => frame.get_argument(record.target_offset)?,
                    LexicalTarget::Local => frame.get_local(record.target_offset)?,
                };
                captured = Some(value);
                break;
            }

            match captured {
                Some(value) => lexicals.push(value),
                None => {
                    return Err(RuntimeError::InvariantViolation(format!(
                        "no activation of call {} found for lexical capture",
                        record.activation_call
                    )));
                }
            }
        }

        Ok(lexicals.into_vec())
    }

    /// Build a frame for the given call descriptor cell and transfer control
    /// to its proc. The top `num_args` data stack values become the
    /// arguments, bottom first; values beyond the proc's required count
    /// become rest arguments.
    pub fn call_proc(
        &self,
        coroutine: &mut StackfulCoroutine,
        cell: DescriptorCell,
        num_args: u16,
        receiver: Option<DataCell>,
    ) -> RuntimeResult<()> {
        let segment = self.segments.get_segment_by_index(cell.segment).ok_or_else(|| {
            RuntimeError::InvariantViolation(format!("unknown segment {}", cell.segment))
        })?;
        let object = segment.object().clone();
        let call = object.get_call(cell.value).ok_or_else(|| {
            RuntimeError::InvariantViolation(format!("no call descriptor at {}", cell))
        })?;

        if call.declonly {
            return Err(RuntimeError::InvariantViolation(format!(
                "call {} is a declaration without a proc",
                call.symbol_path
            )));
        }

        let proc = object.parse_proc(call.proc_offset)?;

        if num_args < proc.num_arguments {
            return Err(RuntimeError::InvariantViolation(format!(
                "call {} requires {} arguments, {} supplied",
                call.symbol_path, proc.num_arguments, num_args
            )));
        }

        let mut arguments = coroutine.pop_data_n(cast::usize(num_args))?;
        let rest = arguments.split_off(cast::usize(proc.num_arguments));

        let lexicals = Self::capture_lexicals(coroutine, cell.segment, &proc)?;

        // the data stack depth after argument pops is the callee's floor
        let stack_guard = coroutine.data_stack_size();

        let frame = CallCell::new(
            cell.value,
            cell.segment,
            call.proc_offset,
            coroutine.sp(),
            coroutine.ip().cloned(),
            !call.no_return,
            stack_guard,
            arguments,
            rest,
            proc.num_locals,
            lexicals,
            receiver,
        );
        coroutine.push_call(frame);

        let ip = iterator_for_call(&object, call)?;
        coroutine.transfer_control(Some(ip), Some(cell.segment));
        Ok(())
    }

    /// Static call through a near or far call address.
    pub fn call_static(
        &self,
        coroutine: &mut StackfulCoroutine,
        address: u32,
        num_args: u16,
        receiver: Option<DataCell>,
    ) -> RuntimeResult<()> {
        let segment_index = coroutine.sp().ok_or_else(|| {
            RuntimeError::InvariantViolation("no active segment for call".to_string())
        })?;
        let segment = self
            .segments
            .get_segment_by_index(segment_index)
            .ok_or_else(|| {
                RuntimeError::InvariantViolation(format!("unknown segment {}", segment_index))
            })?;

        let cell = self
            .segments
            .resolve_descriptor(&segment, LinkageSection::Call, address)?;
        self.call_proc(coroutine, cell, num_args, receiver)
    }

    /// Call a method already resolved through a dispatch table.
    pub fn call_method(
        &self,
        coroutine: &mut StackfulCoroutine,
        method: &VirtualMethod,
        num_args: u16,
        receiver: Option<DataCell>,
    ) -> RuntimeResult<()> {
        let cell = DescriptorCell {
            segment: method.segment,
            value: method.call_index,
            section: LinkageSection::Call,
        };
        self.call_proc(coroutine, cell, num_args, receiver)
    }

    /// Pop the current frame and restore the caller. The callee's leftovers
    /// above the frame's stack guard are discarded; when the call returns a
    /// value the top leftover is kept and re-pushed, and also handed back to
    /// the caller of this function.
    pub fn return_to_caller(
        &self,
        coroutine: &mut StackfulCoroutine,
    ) -> RuntimeResult<Option<DataCell>> {
        let mut frame = coroutine.pop_call()?;

        let result = if frame.returns_value() {
            if coroutine.data_stack_size() <= frame.stack_guard() {
                return Err(RuntimeError::InvariantViolation(format!(
                    "call {} returned no value",
                    frame.call_index()
                )));
            }
            let value = coroutine.pop_data()?;
            coroutine.truncate_data(frame.stack_guard());
            coroutine.push_data(value);
            Some(value)
        } else {
            coroutine.truncate_data(frame.stack_guard());
            None
        };

        let ip = frame.take_return_ip();
        let sp = frame.return_segment();
        coroutine.transfer_control(ip, sp);

        Ok(result)
    }
}
