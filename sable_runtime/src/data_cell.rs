use crate::error::{RuntimeError, RuntimeResult};
use sable_object::LinkageSection;
use std::fmt;

/// Handle of one heap object. Handles are opaque slot identifiers owned by
/// the heap; they carry no lifetime information of their own.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RefHandle(pub usize);

impl fmt::Display for RefHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ref#{}", self.0)
    }
}

/// First-class reference to a descriptor: which segment it lives in, its
/// index within that segment and the section the index refers to. All
/// descriptor addressing in the runtime happens through these handles, never
/// through pointers, so a cell stays valid for the whole session (segments
/// are never unloaded).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DescriptorCell {
    pub segment: u32,
    pub value: u32,
    pub section: LinkageSection,
}

impl fmt::Display for DescriptorCell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}:{}", self.section, self.segment, self.value)
    }
}

/// Reference to one entry of a segment's type section.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TypeHandle {
    pub segment: u32,
    pub type_index: u32,
}

impl fmt::Display for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "type@{}:{}", self.segment, self.type_index)
    }
}

/// Any value the interpreter can hold on its data stack or in a frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DataCell {
    Nil,
    Undef,
    Bool(bool),
    I64(i64),
    Dbl(f64),
    Chr(char),
    Ref(RefHandle),
    Descriptor(DescriptorCell),
    Type(TypeHandle),
}

impl DataCell {
    pub fn kind_name(&self) -> &'static str {
        match self {
            DataCell::Nil => "nil",
            DataCell::Undef => "undef",
            DataCell::Bool(..) => "bool",
            DataCell::I64(..) => "i64",
            DataCell::Dbl(..) => "dbl",
            DataCell::Chr(..) => "chr",
            DataCell::Ref(..) => "ref",
            DataCell::Descriptor(..) => "descriptor",
            DataCell::Type(..) => "type",
        }
    }

    fn bad_kind(&self, expected: &str) -> RuntimeError {
        RuntimeError::InvariantViolation(format!(
            "expected {} value, found {}",
            expected,
            self.kind_name()
        ))
    }

    pub fn as_bool(&self) -> RuntimeResult<bool> {
        match self {
            DataCell::Bool(value) => Ok(*value),
            other => Err(other.bad_kind("bool")),
        }
    }

    pub fn as_i64(&self) -> RuntimeResult<i64> {
        match self {
            DataCell::I64(value) => Ok(*value),
            other => Err(other.bad_kind("i64")),
        }
    }

    pub fn as_dbl(&self) -> RuntimeResult<f64> {
        match self {
            DataCell::Dbl(value) => Ok(*value),
            other => Err(other.bad_kind("dbl")),
        }
    }

    pub fn as_chr(&self) -> RuntimeResult<char> {
        match self {
            DataCell::Chr(value) => Ok(*value),
            other => Err(other.bad_kind("chr")),
        }
    }

    pub fn as_ref(&self) -> RuntimeResult<RefHandle> {
        match self {
            DataCell::Ref(handle) => Ok(*handle),
            other => Err(other.bad_kind("ref")),
        }
    }

    pub fn as_descriptor(&self) -> RuntimeResult<DescriptorCell> {
        match self {
            DataCell::Descriptor(cell) => Ok(*cell),
            other => Err(other.bad_kind("descriptor")),
        }
    }

    pub fn as_type(&self) -> RuntimeResult<TypeHandle> {
        match self {
            DataCell::Type(handle) => Ok(*handle),
            other => Err(other.bad_kind("type")),
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, DataCell::Nil)
    }

    /// Value equality between cells of the same kind; cells of different
    /// kinds are never equal.
    pub fn try_eq(&self, other: &DataCell) -> bool {
        self == other
    }
}

impl fmt::Display for DataCell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DataCell::Nil => write!(f, "nil"),
            DataCell::Undef => write!(f, "undef"),
            DataCell::Bool(value) => write!(f, "{}", value),
            DataCell::I64(value) => write!(f, "{}", value),
            DataCell::Dbl(value) => write!(f, "{}", value),
            DataCell::Chr(value) => write!(f, "{:?}", value),
            DataCell::Ref(handle) => write!(f, "{}", handle),
            DataCell::Descriptor(cell) => write!(f, "{}", cell),
            DataCell::Type(handle) => write!(f, "{}", handle),
        }
    }
}
