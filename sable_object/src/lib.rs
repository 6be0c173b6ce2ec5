pub mod builder;
pub mod bytecode;
pub mod descriptor;
pub mod error;
pub mod object;
pub mod opcode;
pub mod type_spec;
pub mod types;

pub use self::builder::{ObjectBuilder, ProcBuilder};
pub use self::bytecode::{BytecodeIterator, LexicalRecord, LexicalTarget, OpCell, Operands, ProcInfo};
pub use self::error::{ObjectError, ObjectResult};
pub use self::object::{Object, OBJECT_VERSION};
pub use self::opcode::Opcode;
pub use self::type_spec::TypeSpec;
pub use self::types::{
    descriptor_offset, far, is_far, is_near, link_offset, near, CallMode, IntrinsicType,
    LinkageSection, INVALID_ADDRESS,
};
