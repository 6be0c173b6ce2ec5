use crate::error::{ObjectError, ObjectResult};
use crate::object::Object;
use crate::opcode::Opcode;
use std::fmt;
use std::sync::Arc;

// flag values carried by Load and Store
pub const TARGET_ARGUMENT: u8 = 0;
pub const TARGET_LOCAL: u8 = 1;
pub const TARGET_LEXICAL: u8 = 2;
pub const TARGET_FIELD: u8 = 3;
pub const TARGET_RECEIVER: u8 = 4;

// flag values carried by Static
pub const STATIC_LOAD: u8 = 0;
pub const STATIC_STORE: u8 = 1;

// flag values carried by New
pub const NEW_CLASS: u8 = 0;
pub const NEW_STRUCT: u8 = 1;
pub const NEW_ENUM: u8 = 2;
pub const NEW_INSTANCE: u8 = 3;

/// Decoded operands of one instruction. Multi-byte operands are big-endian
/// in the encoded form.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Operands {
    None,
    I64(i64),
    Dbl(f64),
    Chr(char),
    Address(u32),
    FlagsAddress { flags: u8, address: u32 },
    StackOffset(u16),
    JumpOffset(i16),
    FlagsAddressPlacement { flags: u8, address: u32, placement: u16 },
}

/// One decoded instruction plus its offset within the proc's code.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OpCell {
    pub offset: u32,
    pub opcode: Opcode,
    pub operands: Operands,
}

/// Which operand encoding an opcode uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperandsKind {
    None,
    I64,
    Dbl,
    Chr,
    Address,
    FlagsAddress,
    StackOffset,
    JumpOffset,
    FlagsAddressPlacement,
}

pub fn operands_kind(opcode: Opcode) -> OperandsKind {
    match opcode {
        Opcode::Noop
        | Opcode::Nil
        | Opcode::Undef
        | Opcode::True
        | Opcode::False
        | Opcode::VaSize
        | Opcode::Pop
        | Opcode::Dup
        | Opcode::I64Add
        | Opcode::I64Sub
        | Opcode::I64Mul
        | Opcode::I64Div
        | Opcode::I64Neg
        | Opcode::DblAdd
        | Opcode::DblSub
        | Opcode::DblMul
        | Opcode::DblDiv
        | Opcode::DblNeg
        | Opcode::BoolCmp
        | Opcode::I64Cmp
        | Opcode::DblCmp
        | Opcode::ChrCmp
        | Opcode::TypeCmp
        | Opcode::LogicalAnd
        | Opcode::LogicalOr
        | Opcode::LogicalNot
        | Opcode::Return
        | Opcode::TypeOf
        | Opcode::Interrupt
        | Opcode::Halt
        | Opcode::Abort => OperandsKind::None,

        Opcode::I64 => OperandsKind::I64,
        Opcode::Dbl => OperandsKind::Dbl,
        Opcode::Chr => OperandsKind::Chr,

        Opcode::Literal | Opcode::String | Opcode::Url | Opcode::Import => OperandsKind::Address,

        Opcode::Static | Opcode::Descriptor | Opcode::Load | Opcode::Store | Opcode::Trap => {
            OperandsKind::FlagsAddress
        }

        Opcode::VaLoad | Opcode::Pick | Opcode::Drop | Opcode::RPick | Opcode::RDrop => {
            OperandsKind::StackOffset
        }

        Opcode::IfNil
        | Opcode::IfNotNil
        | Opcode::IfTrue
        | Opcode::IfFalse
        | Opcode::IfZero
        | Opcode::IfNotZero
        | Opcode::IfGt
        | Opcode::IfGe
        | Opcode::IfLt
        | Opcode::IfLe
        | Opcode::Jump => OperandsKind::JumpOffset,

        Opcode::CallStatic
        | Opcode::CallVirtual
        | Opcode::CallConcept
        | Opcode::CallExistential
        | Opcode::New => OperandsKind::FlagsAddressPlacement,
    }
}

fn read_u8(code: &[u8], pos: &mut usize, offset: u32) -> ObjectResult<u8> {
    let byte = *code
        .get(*pos)
        .ok_or(ObjectError::TruncatedOperands(offset))?;
    *pos += 1;
    Ok(byte)
}

fn read_u16(code: &[u8], pos: &mut usize, offset: u32) -> ObjectResult<u16> {
    let bytes = code
        .get(*pos..*pos + 2)
        .ok_or(ObjectError::TruncatedOperands(offset))?;
    *pos += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32(code: &[u8], pos: &mut usize, offset: u32) -> ObjectResult<u32> {
    let bytes = code
        .get(*pos..*pos + 4)
        .ok_or(ObjectError::TruncatedOperands(offset))?;
    *pos += 4;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u64(code: &[u8], pos: &mut usize, offset: u32) -> ObjectResult<u64> {
    let bytes = code
        .get(*pos..*pos + 8)
        .ok_or(ObjectError::TruncatedOperands(offset))?;
    *pos += 8;
    let mut raw = [0; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(raw))
}

/// Decode one instruction starting at `*pos` in `code`. `offset` is the
/// instruction's offset relative to the start of its proc's code region, used
/// only for error reporting and listings.
pub fn read_op(code: &[u8], pos: &mut usize, offset: u32) -> ObjectResult<OpCell> {
    let byte = read_u8(code, pos, offset)?;
    let opcode = Opcode::from_u8(byte).ok_or(ObjectError::UnknownOpcode { offset, byte })?;

    let operands = match operands_kind(opcode) {
        OperandsKind::None => Operands::None,
        OperandsKind::I64 => Operands::I64(read_u64(code, pos, offset)? as i64),
        OperandsKind::Dbl => Operands::Dbl(f64::from_bits(read_u64(code, pos, offset)?)),
        OperandsKind::Chr => {
            let scalar = read_u32(code, pos, offset)?;
            let ch = char::from_u32(scalar).ok_or(ObjectError::TruncatedOperands(offset))?;
            Operands::Chr(ch)
        }
        OperandsKind::Address => Operands::Address(read_u32(code, pos, offset)?),
        OperandsKind::FlagsAddress => {
            let flags = read_u8(code, pos, offset)?;
            let address = read_u32(code, pos, offset)?;
            Operands::FlagsAddress { flags, address }
        }
        OperandsKind::StackOffset => Operands::StackOffset(read_u16(code, pos, offset)?),
        OperandsKind::JumpOffset => Operands::JumpOffset(read_u16(code, pos, offset)? as i16),
        OperandsKind::FlagsAddressPlacement => {
            let flags = read_u8(code, pos, offset)?;
            let address = read_u32(code, pos, offset)?;
            let placement = read_u16(code, pos, offset)?;
            Operands::FlagsAddressPlacement {
                flags,
                address,
                placement,
            }
        }
    };

    Ok(OpCell {
        offset,
        opcode,
        operands,
    })
}

impl fmt::Display for OpCell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:6} {}", self.offset, self.opcode)?;
        match self.operands {
            Operands::None => Ok(()),
            Operands::I64(value) => write!(f, " {}", value),
            Operands::Dbl(value) => write!(f, " {}", value),
            Operands::Chr(value) => write!(f, " {:?}", value),
            Operands::Address(address) => write!(f, " {:#010x}", address),
            Operands::FlagsAddress { flags, address } => {
                write!(f, " flags={} {:#010x}", flags, address)
            }
            Operands::StackOffset(offset) => write!(f, " {}", offset),
            Operands::JumpOffset(delta) => write!(f, " {:+}", delta),
            Operands::FlagsAddressPlacement {
                flags,
                address,
                placement,
            } => write!(f, " flags={} {:#010x} n={}", flags, address, placement),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LexicalTarget {
    Argument,
    Local,
}

/// One lexical capture of a proc: which ancestor activation supplies the
/// value and where in that activation's frame it lives.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LexicalRecord {
    pub activation_call: u32,
    pub target_offset: u32,
    pub target: LexicalTarget,
}

/// Parsed header of one proc within the bytecode blob.
#[derive(Clone, Debug)]
pub struct ProcInfo {
    pub proc_offset: u32,
    pub num_arguments: u16,
    pub num_locals: u16,
    pub num_lexicals: u16,
    pub lexicals: Vec<LexicalRecord>,

    /// Code region as absolute byte offsets into the bytecode blob.
    pub code_start: usize,
    pub code_end: usize,
}

const LEXICAL_RECORD_SIZE: usize = 9;
pub const PROC_HEADER_SIZE: usize = 10;

/// Proc layout at `proc_offset`: proc_size u32 counting everything after the
/// size word, then num_arguments/num_locals/num_lexicals u16, then the
/// lexical records, then the code.
pub fn parse_proc_info(bytecode: &[u8], proc_offset: u32) -> ObjectResult<ProcInfo> {
    let start = proc_offset as usize;
    if start >= bytecode.len() {
        return Err(ObjectError::BadProcOffset(proc_offset));
    }

    let mut pos = start;
    let proc_size = read_u32(bytecode, &mut pos, proc_offset)? as usize;
    let proc_end = start + 4 + proc_size;
    if proc_end > bytecode.len() {
        return Err(ObjectError::TruncatedProc(proc_offset));
    }

    let num_arguments = read_u16(bytecode, &mut pos, proc_offset)?;
    let num_locals = read_u16(bytecode, &mut pos, proc_offset)?;
    let num_lexicals = read_u16(bytecode, &mut pos, proc_offset)?;

    let lexicals_size = num_lexicals as usize * LEXICAL_RECORD_SIZE;
    if pos + lexicals_size > proc_end {
        return Err(ObjectError::TruncatedProc(proc_offset));
    }

    let mut lexicals = Vec::with_capacity(num_lexicals as usize);
    for _ in 0..num_lexicals {
        let activation_call = read_u32(bytecode, &mut pos, proc_offset)?;
        let target_offset = read_u32(bytecode, &mut pos, proc_offset)?;
        let target = match read_u8(bytecode, &mut pos, proc_offset)? {
            0 => LexicalTarget::Argument,
            1 => LexicalTarget::Local,
            _ => return Err(ObjectError::TruncatedProc(proc_offset)),
        };
        lexicals.push(LexicalRecord {
            activation_call,
            target_offset,
            target,
        });
    }

    Ok(ProcInfo {
        proc_offset,
        num_arguments,
        num_locals,
        num_lexicals,
        lexicals,
        code_start: pos,
        code_end: proc_end,
    })
}

/// Instruction pointer over one proc's code region. Cloning an iterator
/// snapshots its position, which is how return addresses are saved.
#[derive(Clone)]
pub struct BytecodeIterator {
    object: Arc<Object>,
    base: usize,
    end: usize,
    pos: usize,
}

impl BytecodeIterator {
    pub fn for_proc(object: Arc<Object>, proc: &ProcInfo) -> Self {
        BytecodeIterator {
            object,
            base: proc.code_start,
            end: proc.code_end,
            pos: proc.code_start,
        }
    }

    pub fn object(&self) -> &Arc<Object> {
        &self.object
    }

    /// Offset of the next instruction relative to the proc's code start.
    pub fn offset(&self) -> u32 {
        (self.pos - self.base) as u32
    }

    /// Decode the instruction at the current position and advance past it.
    /// Returns `None` at the end of the proc's code.
    pub fn next_op(&mut self) -> ObjectResult<Option<OpCell>> {
        if self.pos >= self.end {
            return Ok(None);
        }

        let offset = self.offset();
        let code = &self.object.bytecode()[..self.end];
        let op = read_op(code, &mut self.pos, offset)?;
        Ok(Some(op))
    }

    /// Apply a relative jump. The delta is measured from the position after
    /// the jump instruction's operands, i.e. from where `next_op` left the
    /// iterator.
    pub fn move_ip(&mut self, delta: i16) -> ObjectResult<()> {
        let target = self.pos as i64 + i64::from(delta);
        if target < self.base as i64 || target > self.end as i64 {
            return Err(ObjectError::BadProcOffset(target as u32));
        }
        self.pos = target as usize;
        Ok(())
    }
}

impl fmt::Debug for BytecodeIterator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BytecodeIterator")
            .field("base", &self.base)
            .field("end", &self.end)
            .field("pos", &self.pos)
            .finish()
    }
}
