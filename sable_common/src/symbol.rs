use crate::location::ModuleLocation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dotted name of a symbol within one module, e.g. `Vector.append`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct SymbolPath {
    parts: Vec<String>,
}

impl SymbolPath {
    pub fn new(parts: Vec<String>) -> Self {
        SymbolPath { parts }
    }

    pub fn from_parts(parts: &[&str]) -> Self {
        SymbolPath {
            parts: parts.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.parts.is_empty() && !self.parts.iter().any(|part| part.is_empty())
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn name(&self) -> Option<&str> {
        self.parts.last().map(|s| s.as_str())
    }

    /// Path of a nested symbol declared under this one.
    pub fn child(&self, name: impl Into<String>) -> SymbolPath {
        let mut parts = self.parts.clone();
        parts.push(name.into());
        SymbolPath { parts }
    }
}

impl fmt::Display for SymbolPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for part in &self.parts {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{}", part)?;
            first = false;
        }
        Ok(())
    }
}

/// Fully qualified name of a symbol: the module that declares it plus the
/// path of the symbol within that module.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct SymbolUrl {
    location: ModuleLocation,
    path: SymbolPath,
}

impl SymbolUrl {
    pub fn new(location: ModuleLocation, path: SymbolPath) -> Self {
        SymbolUrl { location, path }
    }

    pub fn is_valid(&self) -> bool {
        self.location.is_valid() && self.path.is_valid()
    }

    pub fn location(&self) -> &ModuleLocation {
        &self.location
    }

    pub fn path(&self) -> &SymbolPath {
        &self.path
    }
}

impl fmt::Display for SymbolUrl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}#{}", self.location, self.path)
    }
}
