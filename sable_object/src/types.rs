use serde::{Deserialize, Serialize};
use std::fmt;

/// Addresses embedded in descriptors and bytecode are u32 values. The high
/// bit selects the addressing mode: clear means a near address (an index into
/// one of the current object's descriptor sections), set means a far address
/// (an index into the current object's link table, resolved across modules at
/// runtime).
const FAR_BIT: u32 = 0x8000_0000;

pub const INVALID_ADDRESS: u32 = u32::MAX;

pub fn is_near(address: u32) -> bool {
    address != INVALID_ADDRESS && address & FAR_BIT == 0
}

pub fn is_far(address: u32) -> bool {
    address != INVALID_ADDRESS && address & FAR_BIT != 0
}

pub fn descriptor_offset(address: u32) -> u32 {
    address & !FAR_BIT
}

pub fn link_offset(address: u32) -> u32 {
    address & !FAR_BIT
}

pub fn near(index: u32) -> u32 {
    debug_assert!(index & FAR_BIT == 0);
    index
}

pub fn far(index: u32) -> u32 {
    index | FAR_BIT
}

/// Identifies which descriptor section a symbol or link refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum LinkageSection {
    Type,
    Existential,
    Literal,
    Call,
    Field,
    Static,
    Action,
    Class,
    Struct,
    Instance,
    Concept,
    Enum,
    Namespace,
    Binding,
    Plugin,
}

impl LinkageSection {
    pub fn name(self) -> &'static str {
        match self {
            LinkageSection::Type => "type",
            LinkageSection::Existential => "existential",
            LinkageSection::Literal => "literal",
            LinkageSection::Call => "call",
            LinkageSection::Field => "field",
            LinkageSection::Static => "static",
            LinkageSection::Action => "action",
            LinkageSection::Class => "class",
            LinkageSection::Struct => "struct",
            LinkageSection::Instance => "instance",
            LinkageSection::Concept => "concept",
            LinkageSection::Enum => "enum",
            LinkageSection::Namespace => "namespace",
            LinkageSection::Binding => "binding",
            LinkageSection::Plugin => "plugin",
        }
    }

    pub fn to_flag(self) -> u8 {
        match self {
            LinkageSection::Type => 0,
            LinkageSection::Existential => 1,
            LinkageSection::Literal => 2,
            LinkageSection::Call => 3,
            LinkageSection::Field => 4,
            LinkageSection::Static => 5,
            LinkageSection::Action => 6,
            LinkageSection::Class => 7,
            LinkageSection::Struct => 8,
            LinkageSection::Instance => 9,
            LinkageSection::Concept => 10,
            LinkageSection::Enum => 11,
            LinkageSection::Namespace => 12,
            LinkageSection::Binding => 13,
            LinkageSection::Plugin => 14,
        }
    }

    pub fn from_flag(flag: u8) -> Option<LinkageSection> {
        let section = match flag {
            0 => LinkageSection::Type,
            1 => LinkageSection::Existential,
            2 => LinkageSection::Literal,
            3 => LinkageSection::Call,
            4 => LinkageSection::Field,
            5 => LinkageSection::Static,
            6 => LinkageSection::Action,
            7 => LinkageSection::Class,
            8 => LinkageSection::Struct,
            9 => LinkageSection::Instance,
            10 => LinkageSection::Concept,
            11 => LinkageSection::Enum,
            12 => LinkageSection::Namespace,
            13 => LinkageSection::Binding,
            14 => LinkageSection::Plugin,
            _ => return None,
        };
        Some(section)
    }
}

impl fmt::Display for LinkageSection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Built-in value kinds whose type descriptors live in the prelude module.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum IntrinsicType {
    Nil,
    Undef,
    Bool,
    Char,
    Int64,
    Float64,
    String,
    Url,
    Bytes,
    Status,
    Rest,
    Type,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallMode {
    Normal,
    Constructor,
    Inline,
}
