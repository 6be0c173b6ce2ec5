use crate::error::RuntimeResult;
use crate::plugin::Plugin;
use sable_common::ModuleLocation;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Supplies object bytes for module locations. How locations map to storage
/// is the embedder's concern; the runtime only asks for bytes and, when an
/// object declares one, the matching native plugin.
pub trait Loader: Send + Sync {
    fn load_object(&self, location: &ModuleLocation) -> RuntimeResult<Option<Vec<u8>>>;

    fn load_plugin(&self, location: &ModuleLocation) -> Option<Arc<dyn Plugin>>;
}

/// In-memory loader used by tests and embedders that assemble objects
/// programmatically.
pub struct MemoryLoader {
    objects: HashMap<ModuleLocation, Vec<u8>>,
    plugins: HashMap<ModuleLocation, Arc<dyn Plugin>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        MemoryLoader {
            objects: HashMap::new(),
            plugins: HashMap::new(),
        }
    }

    pub fn insert_object(&mut self, location: ModuleLocation, bytes: Vec<u8>) {
        self.objects.insert(location, bytes);
    }

    pub fn insert_plugin(&mut self, location: ModuleLocation, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(location, plugin);
    }
}

impl Default for MemoryLoader {
    fn default() -> Self {
        MemoryLoader::new()
    }
}

impl Loader for MemoryLoader {
    fn load_object(&self, location: &ModuleLocation) -> RuntimeResult<Option<Vec<u8>>> {
        Ok(self.objects.get(location).cloned())
    }

    fn load_plugin(&self, location: &ModuleLocation) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(location).cloned()
    }
}

/// Maps absolute module locations to `.sbo` files under a list of search
/// directories, first hit wins.
pub struct DirectoryLoader {
    search_paths: Vec<PathBuf>,
}

impl DirectoryLoader {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        DirectoryLoader { search_paths }
    }

    fn file_for(&self, base: &PathBuf, location: &ModuleLocation) -> PathBuf {
        let relative = location.as_str().trim_start_matches('/');
        base.join(format!("{}.sbo", relative))
    }
}

impl Loader for DirectoryLoader {
    fn load_object(&self, location: &ModuleLocation) -> RuntimeResult<Option<Vec<u8>>> {
        for base in &self.search_paths {
            let path = self.file_for(base, location);
            if path.is_file() {
                match std::fs::read(&path) {
                    Ok(bytes) => {
                        log::debug!("loaded {} from {}", location, path.display());
                        return Ok(Some(bytes));
                    }
                    Err(err) => {
                        log::warn!("failed reading {}: {}", path.display(), err);
                    }
                }
            }
        }
        Ok(None)
    }

    fn load_plugin(&self, _location: &ModuleLocation) -> Option<Arc<dyn Plugin>> {
        // native plugins cannot be loaded from the filesystem; embedders
        // with plugins supply their own loader
        None
    }
}
