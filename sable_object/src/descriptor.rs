use crate::type_spec::TypeSpec;
use crate::types::{CallMode, IntrinsicType, LinkageSection};
use sable_common::{ModuleLocation, SymbolPath};
use serde::{Deserialize, Serialize};

/// One entry of the object's type section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub spec: TypeSpec,

    /// Index of the supertype's entry in the same type section, if any.
    pub super_type: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemplateDescriptor {
    pub symbol_path: SymbolPath,
    pub placeholders: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallDescriptor {
    pub symbol_path: SymbolPath,
    pub template: Option<u32>,
    pub receiver: Option<SymbolAddress>,
    pub type_index: u32,
    pub mode: CallMode,
    pub no_return: bool,
    pub bound: bool,
    pub declonly: bool,
    pub proc_offset: u32,
    pub result_type: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub symbol_path: SymbolPath,
    pub type_index: u32,
    pub is_variable: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaticDescriptor {
    pub symbol_path: SymbolPath,
    pub type_index: u32,
    pub is_variable: bool,

    /// Address of the call evaluated to produce the initial value the first
    /// time the static is loaded.
    pub init_call: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub symbol_path: SymbolPath,
    pub template: Option<u32>,

    /// Address of the concept that declares this action.
    pub receiver: u32,
    pub result_type: u32,
}

/// A class, struct, enum and instance all share the same dispatch shape:
/// an optional parent, a constructor, members, methods and concept impls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    pub symbol_path: SymbolPath,
    pub type_index: u32,
    pub super_class: Option<u32>,
    pub template: Option<u32>,
    pub allocator_trap: Option<u32>,
    pub ctor_call: u32,
    pub members: Vec<u32>,
    pub methods: Vec<u32>,
    pub impls: Vec<ImplRecord>,
    pub sealed_subtypes: Vec<TypeSpec>,
    pub sealed: bool,
    pub is_abstract: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructDescriptor {
    pub symbol_path: SymbolPath,
    pub type_index: u32,
    pub super_struct: Option<u32>,
    pub allocator_trap: Option<u32>,
    pub ctor_call: u32,
    pub members: Vec<u32>,
    pub methods: Vec<u32>,
    pub impls: Vec<ImplRecord>,
    pub sealed_subtypes: Vec<TypeSpec>,
    pub sealed: bool,
    pub is_abstract: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnumDescriptor {
    pub symbol_path: SymbolPath,
    pub type_index: u32,
    pub super_enum: Option<u32>,
    pub allocator_trap: Option<u32>,
    pub ctor_call: u32,
    pub members: Vec<u32>,
    pub methods: Vec<u32>,
    pub impls: Vec<ImplRecord>,
    pub sealed_subtypes: Vec<TypeSpec>,
    pub sealed: bool,
}

/// Singleton receiver used to attach concept impls to a module.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub symbol_path: SymbolPath,
    pub type_index: u32,
    pub super_instance: Option<u32>,
    pub allocator_trap: Option<u32>,
    pub ctor_call: u32,
    pub members: Vec<u32>,
    pub methods: Vec<u32>,
    pub impls: Vec<ImplRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConceptDescriptor {
    pub symbol_path: SymbolPath,
    pub type_index: u32,
    pub template: Option<u32>,
    pub super_concept: Option<u32>,
    pub actions: Vec<u32>,
    pub impls: Vec<ImplRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExistentialDescriptor {
    pub symbol_path: SymbolPath,
    pub type_index: u32,
    pub intrinsic: Option<IntrinsicType>,
    pub super_existential: Option<u32>,
    pub methods: Vec<u32>,
    pub impls: Vec<ImplRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BindingDescriptor {
    pub symbol_path: SymbolPath,
    pub type_index: u32,
    pub target: SymbolAddress,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamespaceDescriptor {
    pub symbol_path: SymbolPath,
    pub targets: Vec<SymbolAddress>,
}

/// One concept implementation attached to a class-like descriptor: the
/// implemented concept's type plus the mapping from its actions to the
/// concrete calls satisfying them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImplRecord {
    pub concept_type: u32,
    pub extensions: Vec<ExtensionRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtensionRecord {
    pub action: u32,
    pub call: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LiteralDescriptor {
    Nil,
    Bool(bool),
    I64(i64),
    F64(f64),
    Char(char),
    String(String),
    Bytes(Vec<u8>),
}

/// A far reference out of this object: the import supplying the target
/// module plus the path of the symbol within it. The section records the
/// linkage kind the compiler expected; resolution checks it against the kind
/// actually found.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkDescriptor {
    pub linkage: LinkageSection,
    pub symbol_path: SymbolPath,
    pub import_index: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImportDescriptor {
    pub location: ModuleLocation,

    /// The system import supplies the prelude whose existentials define the
    /// intrinsic types.
    pub system: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub trap_count: u32,
}

/// A (section, address) pair naming a descriptor in any section, used where
/// a reference can point at more than one kind of symbol.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SymbolAddress {
    pub section: LinkageSection,
    pub address: u32,
}

/// Sorted side index mapping symbol paths to their descriptors, searched by
/// `Object::find_symbol`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymbolIndexEntry {
    pub symbol_path: SymbolPath,
    pub section: LinkageSection,
    pub index: u32,
}
