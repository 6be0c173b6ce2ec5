pub mod location;
pub mod symbol;
pub mod type_def;

pub use self::location::ModuleLocation;
pub use self::symbol::{SymbolPath, SymbolUrl};
pub use self::type_def::{CommonError, CommonResult, TypeDef};
