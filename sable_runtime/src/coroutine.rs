use crate::call_cell::CallCell;
use crate::data_cell::DataCell;
use crate::error::{RuntimeError, RuntimeResult};
use sable_object::{BytecodeIterator, OpCell};

/// One logical thread of bytecode execution: the instruction pointer and
/// current segment, the call stack, the data stack and the guard stack.
/// A coroutine owns its stacks exclusively; everything shared between
/// coroutines lives in the segment manager.
///
/// Stack offsets are signed: negative offsets index from the top, so -1 is
/// the most recent entry. An out-of-range offset is a runtime invariant
/// error and never mutates the stack.
pub struct StackfulCoroutine {
    call_stack: Vec<CallCell>,
    data_stack: Vec<DataCell>,
    guard_stack: Vec<usize>,

    ip: Option<BytecodeIterator>,
    sp: Option<u32>,
}

fn resolve_offset(len: usize, offset: i32, what: &str) -> RuntimeResult<usize> {
    let index = if offset < 0 {
        let back = offset.unsigned_abs() as usize;
        if back > len {
            None
        } else {
            Some(len - back)
        }
    } else {
        let index = offset as usize;
        if index < len {
            Some(index)
        } else {
            None
        }
    };

    index.ok_or_else(|| {
        RuntimeError::InvariantViolation(format!(
            "{} offset {} out of range for depth {}",
            what, offset, len
        ))
    })
}

impl StackfulCoroutine {
    pub fn new() -> Self {
        StackfulCoroutine {
            call_stack: Vec::new(),
            data_stack: Vec::new(),
            guard_stack: Vec::new(),
            ip: None,
            sp: None,
        }
    }

    pub fn ip(&self) -> Option<&BytecodeIterator> {
        self.ip.as_ref()
    }

    pub fn sp(&self) -> Option<u32> {
        self.sp
    }

    /// Point execution at a new proc, or clear it when returning from the
    /// outermost frame.
    pub fn transfer_control(&mut self, ip: Option<BytecodeIterator>, sp: Option<u32>) {
        self.ip = ip;
        self.sp = sp;
    }

    /// Fetch and decode the next instruction. `None` when the current proc
    /// has run off the end of its code (implicit return) or there is no
    /// active proc.
    pub fn next_op(&mut self) -> RuntimeResult<Option<OpCell>> {
        match &mut self.ip {
            Some(ip) => Ok(ip.next_op()?),
            None => Ok(None),
        }
    }

    pub fn move_ip(&mut self, delta: i16) -> RuntimeResult<()> {
        match &mut self.ip {
            Some(ip) => {
                ip.move_ip(delta)?;
                Ok(())
            }
            None => Err(RuntimeError::InvariantViolation(
                "no active proc to jump within".to_string(),
            )),
        }
    }

    // call stack

    pub fn call_stack_size(&self) -> usize {
        self.call_stack.len()
    }

    pub fn push_call(&mut self, frame: CallCell) {
        self.call_stack.push(frame);
    }

    pub fn pop_call(&mut self) -> RuntimeResult<CallCell> {
        if let Some(guard) = self.guard_stack.last() {
            if self.call_stack.len() < *guard + 1 {
                return Err(RuntimeError::InvariantViolation(format!(
                    "pop would cross guard at depth {}",
                    guard
                )));
            }
        }

        self.call_stack.pop().ok_or_else(|| {
            RuntimeError::InvariantViolation("pop from empty call stack".to_string())
        })
    }

    pub fn peek_call(&self, offset: i32) -> RuntimeResult<&CallCell> {
        let index = resolve_offset(self.call_stack.len(), offset, "call stack")?;
        Ok(&self.call_stack[index])
    }

    pub fn peek_call_mut(&mut self, offset: i32) -> RuntimeResult<&mut CallCell> {
        let index = resolve_offset(self.call_stack.len(), offset, "call stack")?;
        Ok(&mut self.call_stack[index])
    }

    pub fn current_call(&self) -> RuntimeResult<&CallCell> {
        self.peek_call(-1)
    }

    pub fn current_call_mut(&mut self) -> RuntimeResult<&mut CallCell> {
        self.peek_call_mut(-1)
    }

    /// Remove the frame at the given offset. Fails without mutating anything
    /// when the offset is out of range or removal would cross a guard.
    pub fn drop_call(&mut self, offset: i32) -> RuntimeResult<()> {
        let index = resolve_offset(self.call_stack.len(), offset, "call stack")?;

        if let Some(guard) = self.guard_stack.last() {
            if self.call_stack.len() - 1 < *guard {
                return Err(RuntimeError::InvariantViolation(format!(
                    "drop would cross guard at depth {}",
                    guard
                )));
            }
        }

        self.call_stack.remove(index);
        Ok(())
    }

    // data stack

    pub fn data_stack_size(&self) -> usize {
        self.data_stack.len()
    }

    pub fn push_data(&mut self, value: DataCell) {
        self.data_stack.push(value);
    }

    pub fn pop_data(&mut self) -> RuntimeResult<DataCell> {
        self.data_stack.pop().ok_or_else(|| {
            RuntimeError::InvariantViolation("pop from empty data stack".to_string())
        })
    }

    /// Remove the top `count` values, returned in their original stack order
    /// (bottom first). Fails without popping anything on underflow.
    pub fn pop_data_n(&mut self, count: usize) -> RuntimeResult<Vec<DataCell>> {
        if count > self.data_stack.len() {
            return Err(RuntimeError::InvariantViolation(format!(
                "pop of {} values underflows data stack of depth {}",
                count,
                self.data_stack.len()
            )));
        }
        Ok(self.data_stack.split_off(self.data_stack.len() - count))
    }

    pub fn peek_data(&self, offset: i32) -> RuntimeResult<&DataCell> {
        let index = resolve_offset(self.data_stack.len(), offset, "data stack")?;
        Ok(&self.data_stack[index])
    }

    pub fn drop_data(&mut self, offset: i32) -> RuntimeResult<()> {
        let index = resolve_offset(self.data_stack.len(), offset, "data stack")?;
        self.data_stack.remove(index);
        Ok(())
    }

    pub fn truncate_data(&mut self, depth: usize) {
        self.data_stack.truncate(depth);
    }

    // guard stack

    /// Record the current call stack depth as a boundary that later pops and
    /// drops may not cross until the guard is popped again.
    pub fn push_guard(&mut self) -> usize {
        let guard = self.call_stack.len();
        self.guard_stack.push(guard);
        guard
    }

    pub fn pop_guard(&mut self) -> RuntimeResult<usize> {
        self.guard_stack.pop().ok_or_else(|| {
            RuntimeError::InvariantViolation("pop from empty guard stack".to_string())
        })
    }

    pub fn peek_guard(&self) -> Option<usize> {
        self.guard_stack.last().copied()
    }

    /// The guard invariant: the innermost guard never exceeds the call stack
    /// depth.
    pub fn check_guard(&self) -> bool {
        match self.guard_stack.last() {
            Some(guard) => *guard <= self.call_stack.len(),
            None => true,
        }
    }

    pub fn reset(&mut self) {
        self.call_stack.clear();
        self.data_stack.clear();
        self.guard_stack.clear();
        self.ip = None;
        self.sp = None;
    }
}

impl Default for StackfulCoroutine {
    fn default() -> Self {
        StackfulCoroutine::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn frame() -> CallCell {
        CallCell::new(
            0,
            0,
            0,
            None,
            None,
            false,
            0,
            Vec::new(),
            Vec::new(),
            0,
            Vec::new(),
            None,
        )
    }

    #[test]
    fn guard_holds_after_push() {
        let mut coro = StackfulCoroutine::new();
        coro.push_call(frame());
        coro.push_guard();
        assert!(coro.check_guard());

        coro.push_call(frame());
        assert!(coro.check_guard());
    }

    #[test]
    fn pop_across_guard_is_rejected() {
        let mut coro = StackfulCoroutine::new();
        coro.push_call(frame());
        coro.push_guard();
        coro.push_call(frame());

        // popping back to the guard depth is fine
        coro.pop_call().unwrap();
        // popping past it is not
        assert!(coro.pop_call().is_err());
        assert_eq!(coro.call_stack_size(), 1);

        coro.pop_guard().unwrap();
        coro.pop_call().unwrap();
        assert_eq!(coro.call_stack_size(), 0);
    }

    #[test]
    fn drop_call_out_of_range_leaves_stack_unchanged() {
        let mut coro = StackfulCoroutine::new();
        for _ in 0..3 {
            coro.push_call(frame());
        }

        let err = coro.drop_call(-5).unwrap_err();
        assert!(matches!(err, RuntimeError::InvariantViolation(..)));
        assert_eq!(coro.call_stack_size(), 3);
    }

    #[test]
    fn negative_offsets_index_from_the_top() {
        let mut coro = StackfulCoroutine::new();
        coro.push_data(DataCell::I64(1));
        coro.push_data(DataCell::I64(2));
        coro.push_data(DataCell::I64(3));

        assert_eq!(*coro.peek_data(-1).unwrap(), DataCell::I64(3));
        assert_eq!(*coro.peek_data(0).unwrap(), DataCell::I64(1));

        coro.drop_data(-2).unwrap();
        assert_eq!(*coro.peek_data(-1).unwrap(), DataCell::I64(3));
        assert_eq!(*coro.peek_data(-2).unwrap(), DataCell::I64(1));
    }

    #[test]
    fn failed_bulk_pop_leaves_data_stack_unchanged() {
        let mut coro = StackfulCoroutine::new();
        coro.push_data(DataCell::I64(1));
        coro.push_data(DataCell::I64(2));

        assert!(coro.pop_data_n(3).is_err());
        assert_eq!(coro.data_stack_size(), 2);

        let popped = coro.pop_data_n(2).unwrap();
        assert_eq!(popped, vec![DataCell::I64(1), DataCell::I64(2)]);
    }
}
