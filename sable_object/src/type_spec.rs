use crate::types::LinkageSection;
use serde::{Deserialize, Serialize};

/// Wire form of a type. Descriptors refer to types by index into the object's
/// type section; each type entry carries a TypeSpec. Specs address symbols by
/// near/far address rather than by name, so the runtime resolves them into
/// canonical `TypeDef` values once the owning segment is known.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TypeSpec {
    Concrete {
        section: LinkageSection,
        address: u32,
        arguments: Vec<TypeSpec>,
    },
    Placeholder {
        index: u8,
        template_index: u32,
        arguments: Vec<TypeSpec>,
    },
    Union {
        members: Vec<TypeSpec>,
    },
    Intersection {
        members: Vec<TypeSpec>,
    },
    NoReturn,
}
