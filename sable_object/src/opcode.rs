use std::fmt;

/// The instruction set. The numbering is stable: encoded objects refer to
/// opcodes by these byte values.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Noop = 0x00,

    // immediate values
    Nil = 0x01,
    Undef = 0x02,
    True = 0x03,
    False = 0x04,
    I64 = 0x05,
    Dbl = 0x06,
    Chr = 0x07,

    // loads through the current segment
    Literal = 0x08,
    String = 0x09,
    Url = 0x0a,
    Static = 0x0b,
    Descriptor = 0x0c,

    // frame-relative loads and stores
    Load = 0x0d,
    Store = 0x0e,
    VaLoad = 0x0f,
    VaSize = 0x10,

    // data stack manipulation
    Pop = 0x11,
    Dup = 0x12,
    Pick = 0x13,
    Drop = 0x14,
    RPick = 0x15,
    RDrop = 0x16,

    // integer arithmetic
    I64Add = 0x17,
    I64Sub = 0x18,
    I64Mul = 0x19,
    I64Div = 0x1a,
    I64Neg = 0x1b,

    // double arithmetic
    DblAdd = 0x1c,
    DblSub = 0x1d,
    DblMul = 0x1e,
    DblDiv = 0x1f,
    DblNeg = 0x20,

    // comparisons, each pushing an i64 ordering value
    BoolCmp = 0x21,
    I64Cmp = 0x22,
    DblCmp = 0x23,
    ChrCmp = 0x24,
    TypeCmp = 0x25,

    // logical operators
    LogicalAnd = 0x26,
    LogicalOr = 0x27,
    LogicalNot = 0x28,

    // conditional and unconditional branches
    IfNil = 0x29,
    IfNotNil = 0x2a,
    IfTrue = 0x2b,
    IfFalse = 0x2c,
    IfZero = 0x2d,
    IfNotZero = 0x2e,
    IfGt = 0x2f,
    IfGe = 0x30,
    IfLt = 0x31,
    IfLe = 0x32,
    Jump = 0x33,

    // segment and call operations
    Import = 0x34,
    CallStatic = 0x35,
    CallVirtual = 0x36,
    CallConcept = 0x37,
    CallExistential = 0x38,
    Trap = 0x39,
    Return = 0x3a,

    // allocation and typing
    New = 0x3b,
    TypeOf = 0x3c,

    // interpreter control
    Interrupt = 0x3d,
    Halt = 0x3e,
    Abort = 0x3f,
}

impl Opcode {
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        let op = match byte {
            0x00 => Opcode::Noop,
            0x01 => Opcode::Nil,
            0x02 => Opcode::Undef,
            0x03 => Opcode::True,
            0x04 => Opcode::False,
            0x05 => Opcode::I64,
            0x06 => Opcode::Dbl,
            0x07 => Opcode::Chr,
            0x08 => Opcode::Literal,
            0x09 => Opcode::String,
            0x0a => Opcode::Url,
            0x0b => Opcode::Static,
            0x0c => Opcode::Descriptor,
            0x0d => Opcode::Load,
            0x0e => Opcode::Store,
            0x0f => Opcode::VaLoad,
            0x10 => Opcode::VaSize,
            0x11 => Opcode::Pop,
            0x12 => Opcode::Dup,
            0x13 => Opcode::Pick,
            0x14 => Opcode::Drop,
            0x15 => Opcode::RPick,
            0x16 => Opcode::RDrop,
            0x17 => Opcode::I64Add,
            0x18 => Opcode::I64Sub,
            0x19 => Opcode::I64Mul,
            0x1a => Opcode::I64Div,
            0x1b => Opcode::I64Neg,
            0x1c => Opcode::DblAdd,
            0x1d => Opcode::DblSub,
            0x1e => Opcode::DblMul,
            0x1f => Opcode::DblDiv,
            0x20 => Opcode::DblNeg,
            0x21 => Opcode::BoolCmp,
            0x22 => Opcode::I64Cmp,
            0x23 => Opcode::DblCmp,
            0x24 => Opcode::ChrCmp,
            0x25 => Opcode::TypeCmp,
            0x26 => Opcode::LogicalAnd,
            0x27 => Opcode::LogicalOr,
            0x28 => Opcode::LogicalNot,
            0x29 => Opcode::IfNil,
            0x2a => Opcode::IfNotNil,
            0x2b => Opcode::IfTrue,
            0x2c => Opcode::IfFalse,
            0x2d => Opcode::IfZero,
            0x2e => Opcode::IfNotZero,
            0x2f => Opcode::IfGt,
            0x30 => Opcode::IfGe,
            0x31 => Opcode::IfLt,
            0x32 => Opcode::IfLe,
            0x33 => Opcode::Jump,
            0x34 => Opcode::Import,
            0x35 => Opcode::CallStatic,
            0x36 => Opcode::CallVirtual,
            0x37 => Opcode::CallConcept,
            0x38 => Opcode::CallExistential,
            0x39 => Opcode::Trap,
            0x3a => Opcode::Return,
            0x3b => Opcode::New,
            0x3c => Opcode::TypeOf,
            0x3d => Opcode::Interrupt,
            0x3e => Opcode::Halt,
            0x3f => Opcode::Abort,
            _ => return None,
        };
        Some(op)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Opcode::Noop => "noop",
            Opcode::Nil => "nil",
            Opcode::Undef => "undef",
            Opcode::True => "true",
            Opcode::False => "false",
            Opcode::I64 => "i64",
            Opcode::Dbl => "dbl",
            Opcode::Chr => "chr",
            Opcode::Literal => "literal",
            Opcode::String => "string",
            Opcode::Url => "url",
            Opcode::Static => "static",
            Opcode::Descriptor => "descriptor",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::VaLoad => "vaload",
            Opcode::VaSize => "vasize",
            Opcode::Pop => "pop",
            Opcode::Dup => "dup",
            Opcode::Pick => "pick",
            Opcode::Drop => "drop",
            Opcode::RPick => "rpick",
            Opcode::RDrop => "rdrop",
            Opcode::I64Add => "i64.add",
            Opcode::I64Sub => "i64.sub",
            Opcode::I64Mul => "i64.mul",
            Opcode::I64Div => "i64.div",
            Opcode::I64Neg => "i64.neg",
            Opcode::DblAdd => "dbl.add",
            Opcode::DblSub => "dbl.sub",
            Opcode::DblMul => "dbl.mul",
            Opcode::DblDiv => "dbl.div",
            Opcode::DblNeg => "dbl.neg",
            Opcode::BoolCmp => "bool.cmp",
            Opcode::I64Cmp => "i64.cmp",
            Opcode::DblCmp => "dbl.cmp",
            Opcode::ChrCmp => "chr.cmp",
            Opcode::TypeCmp => "type.cmp",
            Opcode::LogicalAnd => "and",
            Opcode::LogicalOr => "or",
            Opcode::LogicalNot => "not",
            Opcode::IfNil => "if.nil",
            Opcode::IfNotNil => "if.notnil",
            Opcode::IfTrue => "if.true",
            Opcode::IfFalse => "if.false",
            Opcode::IfZero => "if.zero",
            Opcode::IfNotZero => "if.notzero",
            Opcode::IfGt => "if.gt",
            Opcode::IfGe => "if.ge",
            Opcode::IfLt => "if.lt",
            Opcode::IfLe => "if.le",
            Opcode::Jump => "jump",
            Opcode::Import => "import",
            Opcode::CallStatic => "call.static",
            Opcode::CallVirtual => "call.virtual",
            Opcode::CallConcept => "call.concept",
            Opcode::CallExistential => "call.existential",
            Opcode::Trap => "trap",
            Opcode::Return => "return",
            Opcode::New => "new",
            Opcode::TypeOf => "typeof",
            Opcode::Interrupt => "interrupt",
            Opcode::Halt => "halt",
            Opcode::Abort => "abort",
        };
        write!(f, "{}", name)
    }
}
