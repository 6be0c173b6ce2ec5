use crate::data_cell::DataCell;
use crate::error::{RuntimeError, RuntimeResult};
use crate::plugin::Plugin;
use parking_lot::{Mutex, RwLock};
use sable_common::ModuleLocation;
use sable_object::{LinkageSection, Object};
use std::collections::HashMap;
use std::sync::Arc;

/// Resolved result of following a far reference out of a segment. Once a
/// link slot is filled it never changes for the rest of the session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LinkEntry {
    pub segment: u32,
    pub linkage: LinkageSection,
    pub value: u32,
}

/// One loaded object plus its runtime state: the lazily filled link table,
/// the module-scoped storage for statics, instance singletons and enum
/// singletons, the materialized-literal cache and the optional native
/// plugin.
pub struct BytecodeSegment {
    segment_index: u32,
    location: ModuleLocation,
    object: Arc<Object>,

    links: RwLock<Vec<Option<LinkEntry>>>,
    statics: RwLock<Vec<Option<DataCell>>>,
    instances: RwLock<Vec<Option<DataCell>>>,
    enums: RwLock<Vec<Option<DataCell>>>,

    literals: Mutex<HashMap<u32, DataCell>>,

    plugin: Option<Arc<dyn Plugin>>,
}

impl BytecodeSegment {
    pub fn new(
        segment_index: u32,
        location: ModuleLocation,
        object: Arc<Object>,
        plugin: Option<Arc<dyn Plugin>>,
    ) -> Self {
        let links = vec![None; object.num_links() as usize];
        let statics = vec![None; object.num_statics() as usize];
        let instances = vec![None; object.num_instances() as usize];
        let enums = vec![None; object.num_enums() as usize];

        BytecodeSegment {
            segment_index,
            location,
            object,
            links: RwLock::new(links),
            statics: RwLock::new(statics),
            instances: RwLock::new(instances),
            enums: RwLock::new(enums),
            literals: Mutex::new(HashMap::new()),
            plugin,
        }
    }

    pub fn segment_index(&self) -> u32 {
        self.segment_index
    }

    pub fn location(&self) -> &ModuleLocation {
        &self.location
    }

    pub fn object(&self) -> &Arc<Object> {
        &self.object
    }

    pub fn plugin(&self) -> Option<&Arc<dyn Plugin>> {
        self.plugin.as_ref()
    }

    pub fn get_link(&self, index: u32) -> Option<LinkEntry> {
        self.links.read().get(index as usize).copied().flatten()
    }

    /// Fill a link slot. The first resolution wins; a concurrent resolver
    /// that lost the race gets the already stored entry back so every caller
    /// observes one canonical result.
    pub fn set_link(&self, index: u32, entry: LinkEntry) -> RuntimeResult<LinkEntry> {
        let mut links = self.links.write();
        let slot = links.get_mut(index as usize).ok_or_else(|| {
            RuntimeError::InvariantViolation(format!(
                "link index {} out of range in segment {}",
                index, self.segment_index
            ))
        })?;

        match slot {
            Some(existing) => Ok(*existing),
            None => {
                *slot = Some(entry);
                Ok(entry)
            }
        }
    }

    fn storage_error(&self, what: &str, index: u32) -> RuntimeError {
        RuntimeError::InvariantViolation(format!(
            "{} index {} out of range in segment {}",
            what, index, self.segment_index
        ))
    }

    pub fn load_static(&self, index: u32) -> RuntimeResult<Option<DataCell>> {
        self.statics
            .read()
            .get(index as usize)
            .copied()
            .ok_or_else(|| self.storage_error("static", index))
    }

    pub fn store_static(&self, index: u32, value: DataCell) -> RuntimeResult<()> {
        let mut statics = self.statics.write();
        let slot = statics
            .get_mut(index as usize)
            .ok_or_else(|| self.storage_error("static", index))?;
        *slot = Some(value);
        Ok(())
    }

    pub fn load_instance(&self, index: u32) -> RuntimeResult<Option<DataCell>> {
        self.instances
            .read()
            .get(index as usize)
            .copied()
            .ok_or_else(|| self.storage_error("instance", index))
    }

    pub fn store_instance(&self, index: u32, value: DataCell) -> RuntimeResult<()> {
        let mut instances = self.instances.write();
        let slot = instances
            .get_mut(index as usize)
            .ok_or_else(|| self.storage_error("instance", index))?;
        *slot = Some(value);
        Ok(())
    }

    pub fn load_enum(&self, index: u32) -> RuntimeResult<Option<DataCell>> {
        self.enums
            .read()
            .get(index as usize)
            .copied()
            .ok_or_else(|| self.storage_error("enum", index))
    }

    pub fn store_enum(&self, index: u32, value: DataCell) -> RuntimeResult<()> {
        let mut enums = self.enums.write();
        let slot = enums
            .get_mut(index as usize)
            .ok_or_else(|| self.storage_error("enum", index))?;
        *slot = Some(value);
        Ok(())
    }

    /// Boxed literal cells already materialized for this segment, keyed by
    /// literal address. Repeated loads of the same literal reuse the first
    /// allocation.
    pub fn cached_literal(&self, address: u32) -> Option<DataCell> {
        self.literals.lock().get(&address).copied()
    }

    pub fn cache_literal(&self, address: u32, value: DataCell) -> DataCell {
        *self.literals.lock().entry(address).or_insert(value)
    }
}
