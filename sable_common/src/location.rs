use crate::type_def::{CommonError, CommonResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized path-like name of a module, e.g. `/std/prelude` (absolute) or
/// `../sibling` (relative). Relative locations only make sense when resolved
/// against the location of the module that refers to them.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ModuleLocation {
    path: String,
}

impl ModuleLocation {
    pub fn new(path: impl Into<String>) -> Self {
        ModuleLocation { path: path.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn is_absolute(&self) -> bool {
        self.path.starts_with('/')
    }

    /// A location is valid when it is non-empty and contains no empty
    /// path components.
    pub fn is_valid(&self) -> bool {
        if self.path.is_empty() || self.path == "/" {
            return false;
        }

        let trimmed = self.path.strip_prefix('/').unwrap_or(&self.path);
        !trimmed.split('/').any(|part| part.is_empty())
    }

    fn parts(&self) -> impl Iterator<Item = &str> {
        self.path
            .strip_prefix('/')
            .unwrap_or(&self.path)
            .split('/')
    }

    /// Resolve this location against the location of the importing module,
    /// producing an absolute location. `base` must itself be absolute. The
    /// final component of `base` names the importing module, so relative
    /// components are applied to its containing "directory".
    pub fn resolve(&self, base: &ModuleLocation) -> CommonResult<ModuleLocation> {
        if !self.is_valid() {
            return Err(CommonError::InvalidLocation(self.path.clone()));
        }

        if self.is_absolute() {
            return Ok(self.clone());
        }

        if !base.is_absolute() || !base.is_valid() {
            return Err(CommonError::InvalidLocation(base.path.clone()));
        }

        let mut stack: Vec<&str> = base.parts().collect();

        // drop the importing module's own name
        stack.pop();

        for part in self.parts() {
            match part {
                "." => {}
                ".." => {
                    if stack.pop().is_none() {
                        return Err(CommonError::InvalidLocation(self.path.clone()));
                    }
                }
                part => stack.push(part),
            }
        }

        if stack.is_empty() {
            return Err(CommonError::InvalidLocation(self.path.clone()));
        }

        let mut path = String::new();
        for part in stack {
            path.push('/');
            path.push_str(part);
        }

        Ok(ModuleLocation { path })
    }
}

impl fmt::Display for ModuleLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn absolute_location_resolves_to_itself() {
        let base = ModuleLocation::new("/app/main");
        let loc = ModuleLocation::new("/std/prelude");
        assert_eq!(loc.resolve(&base).unwrap(), loc);
    }

    #[test]
    fn relative_location_resolves_against_base_dir() {
        let base = ModuleLocation::new("/app/main");
        let loc = ModuleLocation::new("util");
        assert_eq!(loc.resolve(&base).unwrap(), ModuleLocation::new("/app/util"));
    }

    #[test]
    fn parent_component_pops_base_dir() {
        let base = ModuleLocation::new("/app/sub/main");
        let loc = ModuleLocation::new("../other");
        assert_eq!(
            loc.resolve(&base).unwrap(),
            ModuleLocation::new("/app/other")
        );
    }

    #[test]
    fn escaping_the_root_is_an_error() {
        let base = ModuleLocation::new("/main");
        let loc = ModuleLocation::new("../../other");
        assert!(loc.resolve(&base).is_err());
    }

    #[test]
    fn empty_location_is_invalid() {
        assert!(!ModuleLocation::new("").is_valid());
        assert!(!ModuleLocation::new("/").is_valid());
        assert!(!ModuleLocation::new("/a//b").is_valid());
        assert!(ModuleLocation::new("/a/b").is_valid());
    }
}
