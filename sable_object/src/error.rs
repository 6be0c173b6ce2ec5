use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum ObjectError {
    UnsupportedVersion(u32),
    DecodeFailed(String),
    BadAddress {
        section: &'static str,
        address: u32,
        count: usize,
    },
    BadProcOffset(u32),
    TruncatedProc(u32),
    TruncatedOperands(u32),
    UnknownOpcode {
        offset: u32,
        byte: u8,
    },
    UnsortedSymbolIndex(usize),
    DuplicateSymbol(String),
    MultiplePlugins,
    TooManyDescriptors(&'static str),
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ObjectError::UnsupportedVersion(version) => {
                write!(f, "unsupported object version {}", version)
            }
            ObjectError::DecodeFailed(msg) => {
                write!(f, "object decoding failed: {}", msg)
            }
            ObjectError::BadAddress {
                section,
                address,
                count,
            } => {
                write!(
                    f,
                    "address {:#010x} out of range for {} section of {} entries",
                    address, section, count
                )
            }
            ObjectError::BadProcOffset(offset) => {
                write!(f, "proc offset {} outside bytecode", offset)
            }
            ObjectError::TruncatedProc(offset) => {
                write!(f, "truncated proc header at offset {}", offset)
            }
            ObjectError::TruncatedOperands(offset) => {
                write!(f, "truncated operands at bytecode offset {}", offset)
            }
            ObjectError::UnknownOpcode { offset, byte } => {
                write!(f, "unknown opcode {:#04x} at bytecode offset {}", byte, offset)
            }
            ObjectError::UnsortedSymbolIndex(entry) => {
                write!(f, "symbol index entry {} out of order", entry)
            }
            ObjectError::DuplicateSymbol(path) => {
                write!(f, "duplicate symbol \"{}\"", path)
            }
            ObjectError::MultiplePlugins => {
                write!(f, "object declares more than one plugin")
            }
            ObjectError::TooManyDescriptors(section) => {
                write!(f, "too many descriptors in {} section", section)
            }
        }
    }
}

pub type ObjectResult<T> = Result<T, ObjectError>;
