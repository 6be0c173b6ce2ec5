use crate::data_cell::DataCell;
use sable_object::descriptor::LiteralDescriptor;
use std::sync::Arc;

/// A literal resolved from an object's literal section. Unboxed literals
/// convert straight into data cells; strings and byte buffers must be boxed
/// on the heap before they can be pushed.
#[derive(Clone, Debug, PartialEq)]
pub enum LiteralCell {
    Nil,
    Bool(bool),
    I64(i64),
    Dbl(f64),
    Chr(char),
    String(Arc<str>),
    Bytes(Arc<[u8]>),
}

impl LiteralCell {
    /// The direct data cell for unboxed literals, `None` for literals that
    /// need heap allocation.
    pub fn to_unboxed(&self) -> Option<DataCell> {
        match self {
            LiteralCell::Nil => Some(DataCell::Nil),
            LiteralCell::Bool(value) => Some(DataCell::Bool(*value)),
            LiteralCell::I64(value) => Some(DataCell::I64(*value)),
            LiteralCell::Dbl(value) => Some(DataCell::Dbl(*value)),
            LiteralCell::Chr(value) => Some(DataCell::Chr(*value)),
            LiteralCell::String(..) | LiteralCell::Bytes(..) => None,
        }
    }
}

impl From<&LiteralDescriptor> for LiteralCell {
    fn from(descriptor: &LiteralDescriptor) -> Self {
        match descriptor {
            LiteralDescriptor::Nil => LiteralCell::Nil,
            LiteralDescriptor::Bool(value) => LiteralCell::Bool(*value),
            LiteralDescriptor::I64(value) => LiteralCell::I64(*value),
            LiteralDescriptor::F64(value) => LiteralCell::Dbl(*value),
            LiteralDescriptor::Char(value) => LiteralCell::Chr(*value),
            LiteralDescriptor::String(value) => LiteralCell::String(Arc::from(value.as_str())),
            LiteralDescriptor::Bytes(value) => LiteralCell::Bytes(Arc::from(value.as_slice())),
        }
    }
}
