use sable_common::{ModuleLocation, SymbolPath};
use sable_object::{LinkageSection, ObjectError};
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeError {
    /// A structural invariant of the running program was violated: stack
    /// underflow, an out-of-range frame offset, a descriptor of the wrong
    /// kind and the like. Indicates a bug in the compiler output or the
    /// interpreter rather than in user code.
    InvariantViolation(String),

    MissingObject(ModuleLocation),
    MissingSymbol(SymbolPath),

    LinkageMismatch {
        expected: LinkageSection,
        found: LinkageSection,
    },

    ObjectError(ObjectError),

    ExceededMaxRecursion,
    Interrupted(String),
    Aborted {
        status_code: i64,
    },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RuntimeError::InvariantViolation(msg) => {
                write!(f, "runtime invariant violated: {}", msg)
            }
            RuntimeError::MissingObject(location) => {
                write!(f, "missing object for module {}", location)
            }
            RuntimeError::MissingSymbol(path) => {
                write!(f, "missing symbol {}", path)
            }
            RuntimeError::LinkageMismatch { expected, found } => {
                write!(
                    f,
                    "linkage mismatch: expected {} symbol, found {} symbol",
                    expected, found
                )
            }
            RuntimeError::ObjectError(err) => {
                write!(f, "{}", err)
            }
            RuntimeError::ExceededMaxRecursion => {
                write!(f, "exceeded max interpreter recursion")
            }
            RuntimeError::Interrupted(msg) => {
                write!(f, "interrupted: {}", msg)
            }
            RuntimeError::Aborted { status_code } => {
                write!(f, "aborted with status {}", status_code)
            }
        }
    }
}

impl From<ObjectError> for RuntimeError {
    fn from(err: ObjectError) -> Self {
        RuntimeError::ObjectError(err)
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
