use crate::data_cell::DataCell;
use crate::error::{RuntimeError, RuntimeResult};
use sable_object::BytecodeIterator;

/// One activation record. The frame's storage is a single flat vector sized
/// at construction and never resized, subdivided into four contiguous
/// ranges: required arguments, rest arguments, locals and lexical captures.
#[derive(Debug)]
pub struct CallCell {
    call_index: u32,
    call_segment: u32,
    proc_offset: u32,

    return_segment: Option<u32>,
    return_ip: Option<BytecodeIterator>,
    returns_value: bool,

    /// Data stack depth at frame entry. On return the callee's leftovers
    /// above this depth are discarded, apart from the single return value
    /// when the call returns one.
    stack_guard: usize,

    num_arguments: u16,
    num_rest: u16,
    num_locals: u16,
    num_lexicals: u16,

    receiver: Option<DataCell>,
    data: Vec<DataCell>,
}

impl CallCell {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        call_index: u32,
        call_segment: u32,
        proc_offset: u32,
        return_segment: Option<u32>,
        return_ip: Option<BytecodeIterator>,
        returns_value: bool,
        stack_guard: usize,
        arguments: Vec<DataCell>,
        rest: Vec<DataCell>,
        num_locals: u16,
        lexicals: Vec<DataCell>,
        receiver: Option<DataCell>,
    ) -> Self {
        let num_arguments = arguments.len() as u16;
        let num_rest = rest.len() as u16;
        let num_lexicals = lexicals.len() as u16;

        let mut data = Vec::with_capacity(
            arguments.len() + rest.len() + num_locals as usize + lexicals.len(),
        );
        data.extend(arguments);
        data.extend(rest);
        data.resize(data.len() + num_locals as usize, DataCell::Undef);
        data.extend(lexicals);

        CallCell {
            call_index,
            call_segment,
            proc_offset,
            return_segment,
            return_ip,
            returns_value,
            stack_guard,
            num_arguments,
            num_rest,
            num_locals,
            num_lexicals,
            receiver,
            data,
        }
    }

    pub fn call_index(&self) -> u32 {
        self.call_index
    }

    pub fn call_segment(&self) -> u32 {
        self.call_segment
    }

    pub fn proc_offset(&self) -> u32 {
        self.proc_offset
    }

    pub fn return_segment(&self) -> Option<u32> {
        self.return_segment
    }

    pub fn take_return_ip(&mut self) -> Option<BytecodeIterator> {
        self.return_ip.take()
    }

    pub fn returns_value(&self) -> bool {
        self.returns_value
    }

    pub fn stack_guard(&self) -> usize {
        self.stack_guard
    }

    pub fn num_arguments(&self) -> u16 {
        self.num_arguments
    }

    pub fn num_rest(&self) -> u16 {
        self.num_rest
    }

    pub fn num_locals(&self) -> u16 {
        self.num_locals
    }

    pub fn num_lexicals(&self) -> u16 {
        self.num_lexicals
    }

    pub fn receiver(&self) -> Option<&DataCell> {
        self.receiver.as_ref()
    }

    fn slot(&self, base: usize, count: u16, index: u32, what: &str) -> RuntimeResult<usize> {
        if index >= u32::from(count) {
            return Err(RuntimeError::InvariantViolation(format!(
                "{} index {} out of range for frame with {} {}s",
                what, index, count, what
            )));
        }
        Ok(base + index as usize)
    }

    fn argument_slot(&self, index: u32) -> RuntimeResult<usize> {
        self.slot(0, self.num_arguments, index, "argument")
    }

    fn rest_slot(&self, index: u32) -> RuntimeResult<usize> {
        self.slot(self.num_arguments as usize, self.num_rest, index, "rest argument")
    }

    fn local_slot(&self, index: u32) -> RuntimeResult<usize> {
        let base = self.num_arguments as usize + self.num_rest as usize;
        self.slot(base, self.num_locals, index, "local")
    }

    fn lexical_slot(&self, index: u32) -> RuntimeResult<usize> {
        let base =
            self.num_arguments as usize + self.num_rest as usize + self.num_locals as usize;
        self.slot(base, self.num_lexicals, index, "lexical")
    }

    pub fn get_argument(&self, index: u32) -> RuntimeResult<DataCell> {
        Ok(self.data[self.argument_slot(index)?])
    }

    pub fn set_argument(&mut self, index: u32, value: DataCell) -> RuntimeResult<()> {
        let slot = self.argument_slot(index)?;
        self.data[slot] = value;
        Ok(())
    }

    pub fn get_rest(&self, index: u32) -> RuntimeResult<DataCell> {
        Ok(self.data[self.rest_slot(index)?])
    }

    pub fn get_local(&self, index: u32) -> RuntimeResult<DataCell> {
        Ok(self.data[self.local_slot(index)?])
    }

    pub fn set_local(&mut self, index: u32, value: DataCell) -> RuntimeResult<()> {
        let slot = self.local_slot(index)?;
        self.data[slot] = value;
        Ok(())
    }

    pub fn get_lexical(&self, index: u32) -> RuntimeResult<DataCell> {
        Ok(self.data[self.lexical_slot(index)?])
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
            true,
            0,
            vec![DataCell::I64(1), DataCell::I64(2)],
            vec![DataCell::I64(3)],
            2,
            vec![DataCell::Bool(true)],
            None,
        )
    }

    #[test]
    fn ranges_are_disjoint() {
        let mut frame = frame();

        assert_eq!(frame.get_argument(0).unwrap(), DataCell::I64(1));
        assert_eq!(frame.get_argument(1).unwrap(), DataCell::I64(2));
        assert_eq!(frame.get_rest(0).unwrap(), DataCell::I64(3));
        assert_eq!(frame.get_local(0).unwrap(), DataCell::Undef);
        assert_eq!(frame.get_lexical(0).unwrap(), DataCell::Bool(true));

        frame.set_local(1, DataCell::Chr('x')).unwrap();
        assert_eq!(frame.get_local(1).unwrap(), DataCell::Chr('x'));
        assert_eq!(frame.get_rest(0).unwrap(), DataCell::I64(3));
    }

    #[test]
    fn out_of_range_access_is_an_error() {
        let frame = frame();
        assert!(frame.get_argument(2).is_err());
        assert!(frame.get_rest(1).is_err());
        assert!(frame.get_local(2).is_err());
        assert!(frame.get_lexical(1).is_err());
    }
}
