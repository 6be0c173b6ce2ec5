use crate::data_cell::{DataCell, DescriptorCell};
use crate::error::{RuntimeError, RuntimeResult};
use crate::heap::HeapValue;
use crate::interpreter_state::InterpreterState;
use crate::literal_cell::LiteralCell;
use crate::plugin::InterpreterBridge;
use crate::segment::BytecodeSegment;
use crate::tables::VirtualTable;
use crate::type_manager::TypeComparison;
use sable_object::bytecode::{
    NEW_CLASS, NEW_ENUM, NEW_INSTANCE, NEW_STRUCT, STATIC_LOAD, STATIC_STORE, TARGET_ARGUMENT,
    TARGET_FIELD, TARGET_LEXICAL, TARGET_LOCAL, TARGET_RECEIVER,
};
use sable_object::{IntrinsicType, LinkageSection, OpCell, Opcode, Operands};
use std::cmp::Ordering;
use std::sync::Arc;

/// Depth limit on nested interpreter entries (static initializers running
/// inside an already-running dispatch loop).
pub const MAX_INTERPRETER_RECURSION: u32 = 16;

/// Terminal state of one interpreter run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InterpreterExit {
    pub main_return: DataCell,
    pub status_code: i64,
    pub instruction_count: u64,
}

/// What one dispatch step did to control flow.
enum Flow {
    Continue,
    Returned(Option<DataCell>),
    Halted(InterpreterExit),
}

/// The fetch-dispatch loop. Owns the interpreter state for the duration of
/// the run; every failure an opcode can produce surfaces as a status value,
/// and only `run` converts an abort status into an exit.
pub struct BytecodeInterpreter {
    state: InterpreterState,
    trace: bool,

    instruction_count: u64,
    recursion_depth: u32,
}

fn ordering_value(ordering: Ordering) -> i64 {
    match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

impl BytecodeInterpreter {
    pub fn new(state: InterpreterState) -> Self {
        BytecodeInterpreter {
            state,
            trace: false,
            instruction_count: 0,
            recursion_depth: 0,
        }
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn state(&self) -> &InterpreterState {
        &self.state
    }

    /// Execute from the entry call to completion. `Halt` and `Abort` both
    /// finish the run normally; every other failure is an error.
    pub fn run(&mut self) -> RuntimeResult<InterpreterExit> {
        let entry = self.state.entry_call();
        self.state
            .subroutines
            .call_proc(&mut self.state.coroutine, entry, 0, None)?;

        let result = self.interpret();
        match result {
            Err(RuntimeError::Aborted { status_code }) => Ok(InterpreterExit {
                main_return: DataCell::Nil,
                status_code,
                instruction_count: self.instruction_count,
            }),
            other => other,
        }
    }

    fn interpret(&mut self) -> RuntimeResult<InterpreterExit> {
        loop {
            match self.step()? {
                Flow::Continue => {}
                Flow::Returned(value) => {
                    if self.state.coroutine.ip().is_none() {
                        return Ok(InterpreterExit {
                            main_return: value.unwrap_or(DataCell::Nil),
                            status_code: 0,
                            instruction_count: self.instruction_count,
                        });
                    }
                }
                Flow::Halted(exit) => return Ok(exit),
            }
        }
    }

    /// Nested dispatch loop used by lazy static initialization: runs the
    /// given call in the current coroutine behind a guard, and hands back
    /// its return value once the call stack is back at the entry depth.
    fn run_nested(&mut self, cell: DescriptorCell) -> RuntimeResult<DataCell> {
        if self.recursion_depth >= MAX_INTERPRETER_RECURSION {
            return Err(RuntimeError::ExceededMaxRecursion);
        }
        self.recursion_depth += 1;
        let result = self.interpret_nested(cell);
        self.recursion_depth -= 1;
        result
    }

    fn interpret_nested(&mut self, cell: DescriptorCell) -> RuntimeResult<DataCell> {
        let guard = self.state.coroutine.push_guard();
        self.state
            .subroutines
            .call_proc(&mut self.state.coroutine, cell, 0, None)?;

        let result = loop {
            match self.step()? {
                Flow::Continue => {}
                Flow::Returned(value) => {
                    if self.state.coroutine.call_stack_size() == guard {
                        match value {
                            Some(value) => break value,
                            None => {
                                return Err(RuntimeError::InvariantViolation(
                                    "initializer returned no value".to_string(),
                                ));
                            }
                        }
                    }
                }
                Flow::Halted(..) => {
                    return Err(RuntimeError::InvariantViolation(
                        "halt during initialization".to_string(),
                    ));
                }
            }
        };

        self.state.coroutine.pop_guard()?;
        // the initializer's value stays with us, not on the stack
        self.state.coroutine.pop_data()?;
        Ok(result)
    }

    fn step(&mut self) -> RuntimeResult<Flow> {
        let op = match self.state.coroutine.next_op()? {
            Some(op) => op,
            // end of proc: implicit return
            None => return self.op_return(),
        };
        self.instruction_count += 1;

        if self.trace {
            eprintln!("{}", op);
        }

        match op.opcode {
            Opcode::Noop => Ok(Flow::Continue),

            Opcode::Nil => self.push(DataCell::Nil),
            Opcode::Undef => self.push(DataCell::Undef),
            Opcode::True => self.push(DataCell::Bool(true)),
            Opcode::False => self.push(DataCell::Bool(false)),
            Opcode::I64 => {
                let value = self.i64_operand(&op)?;
                self.push(DataCell::I64(value))
            }
            Opcode::Dbl => {
                let value = self.dbl_operand(&op)?;
                self.push(DataCell::Dbl(value))
            }
            Opcode::Chr => {
                let value = self.chr_operand(&op)?;
                self.push(DataCell::Chr(value))
            }

            Opcode::Literal => self.op_literal(&op),
            Opcode::String => self.op_string(&op),
            Opcode::Url => self.op_url(&op),
            Opcode::Static => self.op_static(&op),
            Opcode::Descriptor => self.op_descriptor(&op),
            Opcode::Load => self.op_load(&op),
            Opcode::Store => self.op_store(&op),
            Opcode::VaLoad => self.op_va_load(&op),
            Opcode::VaSize => self.op_va_size(),

            Opcode::Pop => {
                self.state.coroutine.pop_data()?;
                Ok(Flow::Continue)
            }
            Opcode::Dup => {
                let top = *self.state.coroutine.peek_data(-1)?;
                self.push(top)
            }
            Opcode::Pick => {
                let offset = self.stack_operand(&op)?;
                let value = *self.state.coroutine.peek_data(-1 - i32::from(offset))?;
                self.push(value)
            }
            Opcode::Drop => {
                let offset = self.stack_operand(&op)?;
                self.state.coroutine.drop_data(-1 - i32::from(offset))?;
                Ok(Flow::Continue)
            }
            Opcode::RPick => {
                let offset = self.stack_operand(&op)?;
                let index = self.frame_relative(offset)?;
                let value = *self.state.coroutine.peek_data(index)?;
                self.push(value)
            }
            Opcode::RDrop => {
                let offset = self.stack_operand(&op)?;
                let index = self.frame_relative(offset)?;
                self.state.coroutine.drop_data(index)?;
                Ok(Flow::Continue)
            }

            Opcode::I64Add => self.i64_binary(|lhs, rhs| Ok(lhs.wrapping_add(rhs))),
            Opcode::I64Sub => self.i64_binary(|lhs, rhs| Ok(lhs.wrapping_sub(rhs))),
            Opcode::I64Mul => self.i64_binary(|lhs, rhs| Ok(lhs.wrapping_mul(rhs))),
            Opcode::I64Div => self.i64_binary(|lhs, rhs| {
                if rhs == 0 {
                    Err(RuntimeError::InvariantViolation(
                        "division by zero".to_string(),
                    ))
                } else {
                    Ok(lhs.wrapping_div(rhs))
                }
            }),
            Opcode::I64Neg => {
                let value = self.state.coroutine.pop_data()?.as_i64()?;
                self.push(DataCell::I64(value.wrapping_neg()))
            }

            Opcode::DblAdd => self.dbl_binary(|lhs, rhs| lhs + rhs),
            Opcode::DblSub => self.dbl_binary(|lhs, rhs| lhs - rhs),
            Opcode::DblMul => self.dbl_binary(|lhs, rhs| lhs * rhs),
            Opcode::DblDiv => self.dbl_binary(|lhs, rhs| lhs / rhs),
            Opcode::DblNeg => {
                let value = self.state.coroutine.pop_data()?.as_dbl()?;
                self.push(DataCell::Dbl(-value))
            }

            Opcode::BoolCmp => {
                let rhs = self.state.coroutine.pop_data()?.as_bool()?;
                let lhs = self.state.coroutine.pop_data()?.as_bool()?;
                self.push(DataCell::I64(ordering_value(lhs.cmp(&rhs))))
            }
            Opcode::I64Cmp => {
                let rhs = self.state.coroutine.pop_data()?.as_i64()?;
                let lhs = self.state.coroutine.pop_data()?.as_i64()?;
                self.push(DataCell::I64(ordering_value(lhs.cmp(&rhs))))
            }
            Opcode::DblCmp => {
                let rhs = self.state.coroutine.pop_data()?.as_dbl()?;
                let lhs = self.state.coroutine.pop_data()?.as_dbl()?;
                let ordering = lhs.partial_cmp(&rhs).ok_or_else(|| {
                    RuntimeError::InvariantViolation("cannot order nan".to_string())
                })?;
                self.push(DataCell::I64(ordering_value(ordering)))
            }
            Opcode::ChrCmp => {
                let rhs = self.state.coroutine.pop_data()?.as_chr()?;
                let lhs = self.state.coroutine.pop_data()?.as_chr()?;
                self.push(DataCell::I64(ordering_value(lhs.cmp(&rhs))))
            }
            Opcode::TypeCmp => {
                let rhs = self.state.coroutine.pop_data()?.as_type()?;
                let lhs = self.state.coroutine.pop_data()?.as_type()?;
                let value = match self.state.types.compare_types(lhs, rhs)? {
                    TypeComparison::Equal => 0,
                    TypeComparison::Extends => -1,
                    TypeComparison::Disjoint => 1,
                };
                self.push(DataCell::I64(value))
            }

            Opcode::LogicalAnd => {
                let rhs = self.state.coroutine.pop_data()?.as_bool()?;
                let lhs = self.state.coroutine.pop_data()?.as_bool()?;
                self.push(DataCell::Bool(lhs && rhs))
            }
            Opcode::LogicalOr => {
                let rhs = self.state.coroutine.pop_data()?.as_bool()?;
                let lhs = self.state.coroutine.pop_data()?.as_bool()?;
                self.push(DataCell::Bool(lhs || rhs))
            }
            Opcode::LogicalNot => {
                let value = self.state.coroutine.pop_data()?.as_bool()?;
                self.push(DataCell::Bool(!value))
            }

            Opcode::IfNil => {
                let taken = self.state.coroutine.pop_data()?.is_nil();
                self.branch(&op, taken)
            }
            Opcode::IfNotNil => {
                let taken = !self.state.coroutine.pop_data()?.is_nil();
                self.branch(&op, taken)
            }
            Opcode::IfTrue => {
                let taken = self.state.coroutine.pop_data()?.as_bool()?;
                self.branch(&op, taken)
            }
            Opcode::IfFalse => {
                let taken = !self.state.coroutine.pop_data()?.as_bool()?;
                self.branch(&op, taken)
            }
            Opcode::IfZero => {
                let value = self.state.coroutine.pop_data()?.as_i64()?;
                self.branch(&op, value == 0)
            }
            Opcode::IfNotZero => {
                let value = self.state.coroutine.pop_data()?.as_i64()?;
                self.branch(&op, value != 0)
            }
            Opcode::IfGt => {
                let value = self.state.coroutine.pop_data()?.as_i64()?;
                self.branch(&op, value > 0)
            }
            Opcode::IfGe => {
                let value = self.state.coroutine.pop_data()?.as_i64()?;
                self.branch(&op, value >= 0)
            }
            Opcode::IfLt => {
                let value = self.state.coroutine.pop_data()?.as_i64()?;
                self.branch(&op, value < 0)
            }
            Opcode::IfLe => {
                let value = self.state.coroutine.pop_data()?.as_i64()?;
                self.branch(&op, value <= 0)
            }
            Opcode::Jump => self.branch(&op, true),

            Opcode::Import => self.op_import(&op),
            Opcode::CallStatic => self.op_call_static(&op),
            Opcode::CallVirtual => self.op_call_virtual(&op),
            Opcode::CallConcept => self.op_call_concept(&op),
            Opcode::CallExistential => self.op_call_existential(&op),
            Opcode::Trap => self.op_trap(&op),
            Opcode::Return => self.op_return(),

            Opcode::New => self.op_new(&op),
            Opcode::TypeOf => {
                let value = self.state.coroutine.pop_data()?;
                let ty = self.state.types.type_of(&value, &self.state.heap)?;
                self.push(ty)
            }

            Opcode::Interrupt => Err(RuntimeError::Interrupted(
                "interrupt instruction".to_string(),
            )),
            Opcode::Halt => {
                let main_return = if self.state.coroutine.data_stack_size() > 0 {
                    self.state.coroutine.pop_data()?
                } else {
                    DataCell::Nil
                };
                Ok(Flow::Halted(InterpreterExit {
                    main_return,
                    status_code: 0,
                    instruction_count: self.instruction_count,
                }))
            }
            Opcode::Abort => {
                let status_code = self.state.coroutine.pop_data()?.as_i64()?;
                Err(RuntimeError::Aborted { status_code })
            }
        }
    }

    // operand accessors; decoding guarantees the kind matches the opcode,
    // so a mismatch here is interpreter corruption

    fn operand_mismatch(op: &OpCell) -> RuntimeError {
        RuntimeError::InvariantViolation(format!("malformed operands for {}", op.opcode))
    }

    fn i64_operand(&self, op: &OpCell) -> RuntimeResult<i64> {
        match op.operands {
            Operands::I64(value) => Ok(value),
            _ => Err(Self::operand_mismatch(op)),
        }
    }

    fn dbl_operand(&self, op: &OpCell) -> RuntimeResult<f64> {
        match op.operands {
            Operands::Dbl(value) => Ok(value),
            _ => Err(Self::operand_mismatch(op)),
        }
    }

    fn chr_operand(&self, op: &OpCell) -> RuntimeResult<char> {
        match op.operands {
            Operands::Chr(value) => Ok(value),
            _ => Err(Self::operand_mismatch(op)),
        }
    }

    fn address_operand(&self, op: &OpCell) -> RuntimeResult<u32> {
        match op.operands {
            Operands::Address(address) => Ok(address),
            _ => Err(Self::operand_mismatch(op)),
        }
    }

    fn flags_address_operand(&self, op: &OpCell) -> RuntimeResult<(u8, u32)> {
        match op.operands {
            Operands::FlagsAddress { flags, address } => Ok((flags, address)),
            _ => Err(Self::operand_mismatch(op)),
        }
    }

    fn stack_operand(&self, op: &OpCell) -> RuntimeResult<u16> {
        match op.operands {
            Operands::StackOffset(offset) => Ok(offset),
            _ => Err(Self::operand_mismatch(op)),
        }
    }

    fn jump_operand(&self, op: &OpCell) -> RuntimeResult<i16> {
        match op.operands {
            Operands::JumpOffset(delta) => Ok(delta),
            _ => Err(Self::operand_mismatch(op)),
        }
    }

    fn call_operand(&self, op: &OpCell) -> RuntimeResult<(u8, u32, u16)> {
        match op.operands {
            Operands::FlagsAddressPlacement {
                flags,
                address,
                placement,
            } => Ok((flags, address, placement)),
            _ => Err(Self::operand_mismatch(op)),
        }
    }

    // dispatch helpers

    fn i64_binary(
        &mut self,
        f: impl FnOnce(i64, i64) -> RuntimeResult<i64>,
    ) -> RuntimeResult<Flow> {
        let rhs = self.state.coroutine.pop_data()?.as_i64()?;
        let lhs = self.state.coroutine.pop_data()?.as_i64()?;
        self.push(DataCell::I64(f(lhs, rhs)?))
    }

    fn dbl_binary(&mut self, f: impl FnOnce(f64, f64) -> f64) -> RuntimeResult<Flow> {
        let rhs = self.state.coroutine.pop_data()?.as_dbl()?;
        let lhs = self.state.coroutine.pop_data()?.as_dbl()?;
        self.push(DataCell::Dbl(f(lhs, rhs)))
    }

    fn push(&mut self, value: DataCell) -> RuntimeResult<Flow> {
        self.state.coroutine.push_data(value);
        Ok(Flow::Continue)
    }

    fn branch(&mut self, op: &OpCell, taken: bool) -> RuntimeResult<Flow> {
        let delta = self.jump_operand(op)?;
        if taken {
            self.state.coroutine.move_ip(delta)?;
        }
        Ok(Flow::Continue)
    }

    /// Data stack index of the current frame's floor plus `offset`.
    fn frame_relative(&self, offset: u16) -> RuntimeResult<i32> {
        let guard = self.state.coroutine.current_call()?.stack_guard();
        Ok(cast::i32(guard as u64 + u64::from(offset)).map_err(|_| {
            RuntimeError::InvariantViolation("frame-relative offset overflow".to_string())
        })?)
    }

    fn op_literal(&mut self, op: &OpCell) -> RuntimeResult<Flow> {
        let address = self.address_operand(op)?;
        let segment = self.state.current_segment()?;
        let (owner, index, literal) = self.state.segments.resolve_literal(&segment, address)?;
        let cell = self.state.heap.materialize_literal(&owner, index, &literal);
        self.push(cell)
    }

    fn op_string(&mut self, op: &OpCell) -> RuntimeResult<Flow> {
        let address = self.address_operand(op)?;
        let segment = self.state.current_segment()?;
        let (owner, index, literal) = self.state.segments.resolve_literal(&segment, address)?;
        match literal {
            LiteralCell::String(..) => {
                let cell = self.state.heap.materialize_literal(&owner, index, &literal);
                self.push(cell)
            }
            other => Err(RuntimeError::InvariantViolation(format!(
                "string instruction names a {:?} literal",
                other
            ))),
        }
    }

    fn op_url(&mut self, op: &OpCell) -> RuntimeResult<Flow> {
        let address = self.address_operand(op)?;
        let segment = self.state.current_segment()?;
        let (_, _, literal) = self.state.segments.resolve_literal(&segment, address)?;
        match literal {
            // url cells are never cached: the same utf8 literal may also
            // back a plain string load
            LiteralCell::String(value) => {
                let cell = self.state.heap.allocate_url(value);
                self.push(cell)
            }
            other => Err(RuntimeError::InvariantViolation(format!(
                "url instruction names a {:?} literal",
                other
            ))),
        }
    }

    fn op_static(&mut self, op: &OpCell) -> RuntimeResult<Flow> {
        let (flags, address) = self.flags_address_operand(op)?;
        let segment = self.state.current_segment()?;

        match flags {
            STATIC_LOAD => {
                if let Some(value) = self.state.segments.load_static(&segment, address)? {
                    return self.push(value);
                }
                let value = self.initialize_static(&segment, address)?;
                self.push(value)
            }
            STATIC_STORE => {
                let value = self.state.coroutine.pop_data()?;
                self.state.segments.store_static(&segment, address, value)?;
                Ok(Flow::Continue)
            }
            other => Err(RuntimeError::InvariantViolation(format!(
                "invalid static flags {}",
                other
            ))),
        }
    }

    /// First load of an empty static slot: run its initializer call in a
    /// nested dispatch loop and store the result. A concurrent initializer
    /// may have won the race, in which case its value stands.
    fn initialize_static(
        &mut self,
        segment: &Arc<BytecodeSegment>,
        address: u32,
    ) -> RuntimeResult<DataCell> {
        let cell =
            self.state
                .segments
                .resolve_descriptor(segment, LinkageSection::Static, address)?;
        let owner = self
            .state
            .segments
            .get_segment_by_index(cell.segment)
            .ok_or_else(|| {
                RuntimeError::InvariantViolation(format!("unknown segment {}", cell.segment))
            })?;
        let descriptor = owner.object().get_static(cell.value).ok_or_else(|| {
            RuntimeError::InvariantViolation(format!("no static descriptor at {}", cell))
        })?;

        let init =
            self.state
                .segments
                .resolve_descriptor(&owner, LinkageSection::Call, descriptor.init_call)?;
        let value = self.run_nested(init)?;

        owner.store_static(cell.value, value)?;
        owner.load_static(cell.value)?.ok_or_else(|| {
            RuntimeError::InvariantViolation(format!("static {} not initialized", cell))
        })
    }

    fn op_descriptor(&mut self, op: &OpCell) -> RuntimeResult<Flow> {
        let (flags, address) = self.flags_address_operand(op)?;
        let section = LinkageSection::from_flag(flags).ok_or_else(|| {
            RuntimeError::InvariantViolation(format!("invalid linkage flags {}", flags))
        })?;
        let segment = self.state.current_segment()?;
        let cell = self.state.segments.resolve_descriptor(&segment, section, address)?;
        self.push(DataCell::Descriptor(cell))
    }

    fn op_load(&mut self, op: &OpCell) -> RuntimeResult<Flow> {
        let (flags, address) = self.flags_address_operand(op)?;

        let value = match flags {
            TARGET_ARGUMENT => self.state.coroutine.current_call()?.get_argument(address)?,
            TARGET_LOCAL => self.state.coroutine.current_call()?.get_local(address)?,
            TARGET_LEXICAL => self.state.coroutine.current_call()?.get_lexical(address)?,
            TARGET_RECEIVER => {
                *self.state.coroutine.current_call()?.receiver().ok_or_else(|| {
                    RuntimeError::InvariantViolation("frame has no receiver".to_string())
                })?
            }
            TARGET_FIELD => {
                let receiver = self.state.coroutine.pop_data()?.as_ref()?;
                let segment = self.state.current_segment()?;
                let field = self.state.segments.resolve_descriptor(
                    &segment,
                    LinkageSection::Field,
                    address,
                )?;
                let vtable = self.state.heap.instance_vtable(receiver)?;
                let member = vtable.get_member(&field).ok_or_else(|| {
                    RuntimeError::InvariantViolation(format!("no member for field {}", field))
                })?;
                self.state.heap.get_field(receiver, member.layout_offset)?
            }
            other => {
                return Err(RuntimeError::InvariantViolation(format!(
                    "invalid load flags {}",
                    other
                )));
            }
        };

        self.push(value)
    }

    fn op_store(&mut self, op: &OpCell) -> RuntimeResult<Flow> {
        let (flags, address) = self.flags_address_operand(op)?;
        let value = self.state.coroutine.pop_data()?;

        match flags {
            TARGET_ARGUMENT => {
                self.state
                    .coroutine
                    .current_call_mut()?
                    .set_argument(address, value)?;
            }
            TARGET_LOCAL => {
                self.state
                    .coroutine
                    .current_call_mut()?
                    .set_local(address, value)?;
            }
            TARGET_FIELD => {
                let receiver = self.state.coroutine.pop_data()?.as_ref()?;
                let segment = self.state.current_segment()?;
                let field = self.state.segments.resolve_descriptor(
                    &segment,
                    LinkageSection::Field,
                    address,
                )?;
                let vtable = self.state.heap.instance_vtable(receiver)?;
                let member = vtable.get_member(&field).ok_or_else(|| {
                    RuntimeError::InvariantViolation(format!("no member for field {}", field))
                })?;
                self.state.heap.set_field(receiver, member.layout_offset, value)?;
            }
            other => {
                return Err(RuntimeError::InvariantViolation(format!(
                    "invalid store flags {}",
                    other
                )));
            }
        }

        Ok(Flow::Continue)
    }

    fn op_va_load(&mut self, op: &OpCell) -> RuntimeResult<Flow> {
        let offset = self.stack_operand(op)?;
        let value = self
            .state
            .coroutine
            .current_call()?
            .get_rest(u32::from(offset))?;
        self.push(value)
    }

    fn op_va_size(&mut self) -> RuntimeResult<Flow> {
        let size = self.state.coroutine.current_call()?.num_rest();
        self.push(DataCell::I64(i64::from(size)))
    }

    /// Eagerly load the segment an import names. The import's location is
    /// resolved against the current segment, like any far link.
    fn op_import(&mut self, op: &OpCell) -> RuntimeResult<Flow> {
        let index = self.address_operand(op)?;
        let segment = self.state.current_segment()?;
        let import = segment.object().get_import(index).ok_or_else(|| {
            RuntimeError::InvariantViolation(format!("no import descriptor at index {}", index))
        })?;
        let location = import
            .location
            .resolve(segment.location())
            .map_err(|err| RuntimeError::InvariantViolation(err.to_string()))?;
        self.state.segments.get_or_load_segment(&location)?;
        Ok(Flow::Continue)
    }

    fn op_call_static(&mut self, op: &OpCell) -> RuntimeResult<Flow> {
        let (_, address, placement) = self.call_operand(op)?;
        self.state
            .subroutines
            .call_static(&mut self.state.coroutine, address, placement, None)?;
        Ok(Flow::Continue)
    }

    /// Resolve a receiver value to its virtual table. A ref receiver carries
    /// its table; a descriptor receiver names a class-like symbol.
    fn receiver_virtual_table(
        &self,
        receiver: &DataCell,
    ) -> RuntimeResult<Arc<VirtualTable>> {
        match receiver {
            DataCell::Ref(handle) => self.state.heap.instance_vtable(*handle),
            DataCell::Descriptor(cell) => self.state.segments.resolve_virtual_table(cell),
            other => Err(RuntimeError::InvariantViolation(format!(
                "{} receiver cannot be dispatched",
                other.kind_name()
            ))),
        }
    }

    fn op_call_virtual(&mut self, op: &OpCell) -> RuntimeResult<Flow> {
        let (_, address, placement) = self.call_operand(op)?;
        let receiver = self.state.coroutine.pop_data()?;
        let segment = self.state.current_segment()?;

        let call =
            self.state
                .segments
                .resolve_descriptor(&segment, LinkageSection::Call, address)?;
        let vtable = self.receiver_virtual_table(&receiver)?;
        let method = *vtable.get_method(&call).ok_or_else(|| {
            RuntimeError::InvariantViolation(format!("no virtual method for call {}", call))
        })?;

        self.state.subroutines.call_method(
            &mut self.state.coroutine,
            &method,
            placement,
            Some(receiver),
        )?;
        Ok(Flow::Continue)
    }

    /// Concept dispatch: the operand names an action; the action's owner
    /// names the concept. The receiver's own impl wins, then the concept's
    /// default extensions along its superconcept chain.
    fn op_call_concept(&mut self, op: &OpCell) -> RuntimeResult<Flow> {
        let (_, address, placement) = self.call_operand(op)?;
        let receiver = self.state.coroutine.pop_data()?;
        let segment = self.state.current_segment()?;

        let action =
            self.state
                .segments
                .resolve_descriptor(&segment, LinkageSection::Action, address)?;
        let owner = self
            .state
            .segments
            .get_segment_by_index(action.segment)
            .ok_or_else(|| {
                RuntimeError::InvariantViolation(format!("unknown segment {}", action.segment))
            })?;
        let descriptor = owner.object().get_action(action.value).ok_or_else(|| {
            RuntimeError::InvariantViolation(format!("no action descriptor at {}", action))
        })?;
        let concept = self.state.segments.resolve_descriptor(
            &owner,
            LinkageSection::Concept,
            descriptor.receiver,
        )?;

        let resolved = match &receiver {
            DataCell::Ref(..) | DataCell::Descriptor(..) => self
                .receiver_virtual_table(&receiver)?
                .get_extension(&concept, &action)
                .copied(),
            _ => None,
        };

        let method = match resolved {
            Some(method) => method,
            None => {
                let table = self.state.segments.resolve_concept_table(&concept)?;
                *table.get_extension(&action).ok_or_else(|| {
                    RuntimeError::InvariantViolation(format!(
                        "no extension for action {} of concept {}",
                        action, concept
                    ))
                })?
            }
        };

        self.state.subroutines.call_method(
            &mut self.state.coroutine,
            &method,
            placement,
            Some(receiver),
        )?;
        Ok(Flow::Continue)
    }

    fn intrinsic_of_value(&self, value: &DataCell) -> RuntimeResult<IntrinsicType> {
        let intrinsic = match value {
            DataCell::Nil => IntrinsicType::Nil,
            DataCell::Undef => IntrinsicType::Undef,
            DataCell::Bool(..) => IntrinsicType::Bool,
            DataCell::I64(..) => IntrinsicType::Int64,
            DataCell::Dbl(..) => IntrinsicType::Float64,
            DataCell::Chr(..) => IntrinsicType::Char,
            DataCell::Type(..) => IntrinsicType::Type,
            DataCell::Ref(handle) => match self.state.heap.value(*handle)? {
                HeapValue::Str(..) => IntrinsicType::String,
                HeapValue::Url(..) => IntrinsicType::Url,
                HeapValue::Bytes(..) => IntrinsicType::Bytes,
                HeapValue::Status { .. } => IntrinsicType::Status,
                HeapValue::Rest(..) => IntrinsicType::Rest,
                HeapValue::Instance { .. } => {
                    return Err(RuntimeError::InvariantViolation(
                        "instance receiver has no intrinsic type".to_string(),
                    ));
                }
            },
            DataCell::Descriptor(..) => {
                return Err(RuntimeError::InvariantViolation(
                    "descriptor receiver has no intrinsic type".to_string(),
                ));
            }
        };
        Ok(intrinsic)
    }

    /// Existential dispatch: the operand names a call; the receiver's
    /// intrinsic kind selects the existential table servicing it.
    fn op_call_existential(&mut self, op: &OpCell) -> RuntimeResult<Flow> {
        let (_, address, placement) = self.call_operand(op)?;
        let receiver = self.state.coroutine.pop_data()?;
        let segment = self.state.current_segment()?;

        let call =
            self.state
                .segments
                .resolve_descriptor(&segment, LinkageSection::Call, address)?;

        let existential = match &receiver {
            DataCell::Descriptor(cell) if cell.section == LinkageSection::Existential => *cell,
            other => {
                let intrinsic = self.intrinsic_of_value(other)?;
                self.state.types.intrinsic_cell(intrinsic)?
            }
        };

        let table = self.state.segments.resolve_existential_table(&existential)?;
        let method = *table.get_method(&call).ok_or_else(|| {
            RuntimeError::InvariantViolation(format!(
                "no existential method for call {}",
                call
            ))
        })?;

        self.state.subroutines.call_method(
            &mut self.state.coroutine,
            &method,
            placement,
            Some(receiver),
        )?;
        Ok(Flow::Continue)
    }

    fn invoke_trap(&mut self, segment: &Arc<BytecodeSegment>, index: u32) -> RuntimeResult<()> {
        let plugin = segment.plugin().ok_or_else(|| {
            RuntimeError::InvariantViolation(format!(
                "no native plugin available for {}",
                segment.location()
            ))
        })?;
        let trap = plugin.trap(index).ok_or_else(|| {
            RuntimeError::InvariantViolation(format!(
                "no trap {} in plugin of {}",
                index,
                segment.location()
            ))
        })?;

        // traps run behind a guard so they cannot unwind the invoking call
        self.state.coroutine.push_guard();
        let result = trap(&mut InterpreterBridge {
            coroutine: &mut self.state.coroutine,
            heap: &mut self.state.heap,
            segments: &self.state.segments,
        });
        self.state.coroutine.pop_guard()?;
        result?;

        if !self.state.coroutine.check_guard() {
            return Err(RuntimeError::InvariantViolation(
                "trap unwound past its guard".to_string(),
            ));
        }
        Ok(())
    }

    fn op_trap(&mut self, op: &OpCell) -> RuntimeResult<Flow> {
        let (flags, index) = self.flags_address_operand(op)?;
        if flags != 0 {
            return Err(RuntimeError::InvariantViolation(format!(
                "invalid trap flags {}",
                flags
            )));
        }
        let segment = self.state.current_segment()?;
        self.invoke_trap(&segment, index)?;
        Ok(Flow::Continue)
    }

    fn op_return(&mut self) -> RuntimeResult<Flow> {
        let value = self
            .state
            .subroutines
            .return_to_caller(&mut self.state.coroutine)?;
        Ok(Flow::Returned(value))
    }

    /// Allocate a new receiver and invoke its constructor. The new ref is
    /// inserted beneath the constructor's arguments, so it sits at the
    /// constructor frame's stack floor; a constructor returns no value, so
    /// unwinding to that floor leaves the ref on top for the caller.
    fn op_new(&mut self, op: &OpCell) -> RuntimeResult<Flow> {
        let (flags, address, placement) = self.call_operand(op)?;
        let section = match flags {
            NEW_CLASS => LinkageSection::Class,
            NEW_STRUCT => LinkageSection::Struct,
            NEW_ENUM => LinkageSection::Enum,
            NEW_INSTANCE => LinkageSection::Instance,
            other => {
                return Err(RuntimeError::InvariantViolation(format!(
                    "invalid new flags {}",
                    other
                )));
            }
        };

        let segment = self.state.current_segment()?;
        let cell = self.state.segments.resolve_descriptor(&segment, section, address)?;
        let vtable = self.state.segments.resolve_virtual_table(&cell)?;

        let args = self.state.coroutine.pop_data_n(cast::usize(placement))?;

        let receiver = match vtable.allocator_trap() {
            Some(index) => {
                let owner = self
                    .state
                    .segments
                    .get_segment_by_index(cell.segment)
                    .ok_or_else(|| {
                        RuntimeError::InvariantViolation(format!(
                            "unknown segment {}",
                            cell.segment
                        ))
                    })?;
                // the allocator trap leaves the fresh ref on the stack
                self.state.coroutine.push_data(DataCell::Descriptor(cell));
                self.invoke_trap(&owner, index)?;
                self.state.coroutine.pop_data()?
            }
            None => self.state.heap.allocate_instance(vtable.clone()),
        };
        receiver.as_ref()?;

        self.state.coroutine.push_data(receiver);
        for arg in args {
            self.state.coroutine.push_data(arg);
        }

        let ctor = *vtable.ctor();
        self.state.subroutines.call_method(
            &mut self.state.coroutine,
            &ctor,
            placement,
            Some(receiver),
        )?;
        Ok(Flow::Continue)
    }
}
