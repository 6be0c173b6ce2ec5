//! Derived dispatch structures. Each table flattens one descriptor's
//! inheritance chain into cheap lookups and is built at most once per
//! descriptor cell, cached by the segment manager.

pub(crate) mod build;
mod concept_table;
mod existential_table;
mod virtual_table;

pub use self::concept_table::ConceptTable;
pub use self::existential_table::ExistentialTable;
pub use self::virtual_table::{ImplTable, VirtualMember, VirtualMethod, VirtualTable};
