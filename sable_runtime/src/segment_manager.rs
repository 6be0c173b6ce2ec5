use crate::data_cell::{DataCell, DescriptorCell};
use crate::error::{RuntimeError, RuntimeResult};
use crate::literal_cell::LiteralCell;
use crate::loader::Loader;
use crate::segment::{BytecodeSegment, LinkEntry};
use crate::tables::{build, ConceptTable, ExistentialTable, VirtualTable};
use parking_lot::{Mutex, RwLock};
use sable_common::ModuleLocation;
use sable_object::{self as object, LinkageSection, Object};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of all loaded segments plus the caches derived from them: the
/// per-segment link tables and the memoized dispatch tables. Shared by every
/// coroutine; the registry is append-only and a cache entry, once present,
/// never changes, so readers always observe one canonical result.
pub struct SegmentManager {
    loader: Arc<dyn Loader>,

    segments: RwLock<Vec<Arc<BytecodeSegment>>>,

    /// Guards the check-load-register sequence so concurrent first loads of
    /// one location cannot produce two segments.
    locations: Mutex<HashMap<ModuleLocation, u32>>,

    vtables: Mutex<HashMap<DescriptorCell, Arc<VirtualTable>>>,
    concepts: Mutex<HashMap<DescriptorCell, Arc<ConceptTable>>>,
    existentials: Mutex<HashMap<DescriptorCell, Arc<ExistentialTable>>>,
}

impl SegmentManager {
    pub fn new(loader: Arc<dyn Loader>) -> Self {
        SegmentManager {
            loader,
            segments: RwLock::new(Vec::new()),
            locations: Mutex::new(HashMap::new()),
            vtables: Mutex::new(HashMap::new()),
            concepts: Mutex::new(HashMap::new()),
            existentials: Mutex::new(HashMap::new()),
        }
    }

    pub fn num_segments(&self) -> usize {
        self.segments.read().len()
    }

    pub fn get_segment_by_index(&self, index: u32) -> Option<Arc<BytecodeSegment>> {
        self.segments.read().get(index as usize).cloned()
    }

    pub fn get_segment(&self, location: &ModuleLocation) -> Option<Arc<BytecodeSegment>> {
        let index = *self.locations.lock().get(location)?;
        self.get_segment_by_index(index)
    }

    /// Idempotent load: the first call for a location reads, verifies and
    /// registers the object; every later call returns the same segment.
    pub fn get_or_load_segment(
        &self,
        location: &ModuleLocation,
    ) -> RuntimeResult<Arc<BytecodeSegment>> {
        if !location.is_absolute() || !location.is_valid() {
            return Err(RuntimeError::InvariantViolation(format!(
                "cannot load relative or invalid location {}",
                location
            )));
        }

        let mut locations = self.locations.lock();

        if let Some(index) = locations.get(location) {
            return self
                .get_segment_by_index(*index)
                .ok_or_else(|| RuntimeError::MissingObject(location.clone()));
        }

        let bytes = self
            .loader
            .load_object(location)?
            .ok_or_else(|| RuntimeError::MissingObject(location.clone()))?;
        let object = Object::from_bytes(&bytes)?;

        let plugin = if object.plugin().is_some() {
            match self.loader.load_plugin(location) {
                Some(plugin) => Some(plugin),
                None => {
                    return Err(RuntimeError::InvariantViolation(format!(
                        "no native plugin available for {}",
                        location
                    )));
                }
            }
        } else {
            None
        };

        let mut segments = self.segments.write();
        let index = segments.len() as u32;
        let segment = Arc::new(BytecodeSegment::new(
            index,
            location.clone(),
            object,
            plugin,
        ));
        segments.push(segment.clone());
        locations.insert(location.clone(), index);

        log::debug!("loaded segment {} from {}", index, location);
        Ok(segment)
    }

    /// Resolve a far link, loading the target segment if needed. Cached per
    /// (segment, link index): the stored entry never changes once set.
    pub fn resolve_link(
        &self,
        segment: &BytecodeSegment,
        link_index: u32,
    ) -> RuntimeResult<LinkEntry> {
        if let Some(entry) = segment.get_link(link_index) {
            return Ok(entry);
        }

        let object = segment.object();
        let link = object.get_link(link_index).ok_or_else(|| {
            RuntimeError::InvariantViolation(format!(
                "no link descriptor at index {} in segment {}",
                link_index,
                segment.segment_index()
            ))
        })?;
        let import = object.get_import(link.import_index).ok_or_else(|| {
            RuntimeError::InvariantViolation(format!(
                "no import descriptor at index {}",
                link.import_index
            ))
        })?;

        let location = import
            .location
            .resolve(segment.location())
            .map_err(|err| RuntimeError::InvariantViolation(err.to_string()))?;
        let target = self.get_or_load_segment(&location)?;

        let (section, value) = target
            .object()
            .find_symbol(&link.symbol_path)
            .ok_or_else(|| RuntimeError::MissingSymbol(link.symbol_path.clone()))?;

        if section != link.linkage {
            return Err(RuntimeError::LinkageMismatch {
                expected: link.linkage,
                found: section,
            });
        }

        let entry = LinkEntry {
            segment: target.segment_index(),
            linkage: section,
            value,
        };

        log::trace!(
            "resolved link {} of segment {} to {}:{} ({})",
            link_index,
            segment.segment_index(),
            entry.segment,
            entry.value,
            entry.linkage
        );

        // first resolution wins if another coroutine raced us here
        segment.set_link(link_index, entry)
    }

    /// Turn a near/far address into a descriptor cell of the expected
    /// section. A resolved far link of a different section is a fatal
    /// structural error.
    pub fn resolve_descriptor(
        &self,
        segment: &BytecodeSegment,
        section: LinkageSection,
        address: u32,
    ) -> RuntimeResult<DescriptorCell> {
        if object::is_near(address) {
            let offset = object::descriptor_offset(address);
            let count = segment.object().section_count(section);
            if (offset as usize) >= count {
                return Err(RuntimeError::InvariantViolation(format!(
                    "near {} address {} out of range ({} entries)",
                    section, offset, count
                )));
            }
            return Ok(DescriptorCell {
                segment: segment.segment_index(),
                value: offset,
                section,
            });
        }

        if object::is_far(address) {
            let entry = self.resolve_link(segment, object::link_offset(address))?;
            if entry.linkage != section {
                return Err(RuntimeError::LinkageMismatch {
                    expected: section,
                    found: entry.linkage,
                });
            }
            return Ok(DescriptorCell {
                segment: entry.segment,
                value: entry.value,
                section,
            });
        }

        Err(RuntimeError::InvariantViolation(format!(
            "invalid {} address",
            section
        )))
    }

    /// Resolve a literal address to its cell plus the segment that owns it,
    /// so callers can consult that segment's materialized-literal cache.
    pub fn resolve_literal(
        &self,
        segment: &Arc<BytecodeSegment>,
        address: u32,
    ) -> RuntimeResult<(Arc<BytecodeSegment>, u32, LiteralCell)> {
        let cell = self.resolve_descriptor(segment, LinkageSection::Literal, address)?;

        let owner = if cell.segment == segment.segment_index() {
            segment.clone()
        } else {
            self.get_segment_by_index(cell.segment).ok_or_else(|| {
                RuntimeError::InvariantViolation(format!("unknown segment {}", cell.segment))
            })?
        };

        let descriptor = owner.object().get_literal(cell.value).ok_or_else(|| {
            RuntimeError::InvariantViolation(format!("no literal descriptor at {}", cell))
        })?;

        Ok((owner.clone(), cell.value, LiteralCell::from(descriptor)))
    }

    fn resolve_storage(
        &self,
        segment: &Arc<BytecodeSegment>,
        section: LinkageSection,
        address: u32,
    ) -> RuntimeResult<(Arc<BytecodeSegment>, u32)> {
        let cell = self.resolve_descriptor(segment, section, address)?;
        let owner = if cell.segment == segment.segment_index() {
            segment.clone()
        } else {
            self.get_segment_by_index(cell.segment).ok_or_else(|| {
                RuntimeError::InvariantViolation(format!("unknown segment {}", cell.segment))
            })?
        };
        Ok((owner, cell.value))
    }

    pub fn load_static(
        &self,
        segment: &Arc<BytecodeSegment>,
        address: u32,
    ) -> RuntimeResult<Option<DataCell>> {
        let (owner, index) = self.resolve_storage(segment, LinkageSection::Static, address)?;
        owner.load_static(index)
    }

    pub fn store_static(
        &self,
        segment: &Arc<BytecodeSegment>,
        address: u32,
        value: DataCell,
    ) -> RuntimeResult<()> {
        let (owner, index) = self.resolve_storage(segment, LinkageSection::Static, address)?;
        owner.store_static(index, value)
    }

    pub fn load_instance(
        &self,
        segment: &Arc<BytecodeSegment>,
        address: u32,
    ) -> RuntimeResult<Option<DataCell>> {
        let (owner, index) = self.resolve_storage(segment, LinkageSection::Instance, address)?;
        owner.load_instance(index)
    }

    pub fn store_instance(
        &self,
        segment: &Arc<BytecodeSegment>,
        address: u32,
        value: DataCell,
    ) -> RuntimeResult<()> {
        let (owner, index) = self.resolve_storage(segment, LinkageSection::Instance, address)?;
        owner.store_instance(index, value)
    }

    pub fn load_enum(
        &self,
        segment: &Arc<BytecodeSegment>,
        address: u32,
    ) -> RuntimeResult<Option<DataCell>> {
        let (owner, index) = self.resolve_storage(segment, LinkageSection::Enum, address)?;
        owner.load_enum(index)
    }

    pub fn store_enum(
        &self,
        segment: &Arc<BytecodeSegment>,
        address: u32,
        value: DataCell,
    ) -> RuntimeResult<()> {
        let (owner, index) = self.resolve_storage(segment, LinkageSection::Enum, address)?;
        owner.store_enum(index, value)
    }

    /// Memoized virtual table lookup for any class-like descriptor cell.
    /// The build happens outside the cache lock because it may recurse into
    /// this same cache for parent tables; double-checked insertion keeps the
    /// first stored table canonical.
    pub fn resolve_virtual_table(
        &self,
        cell: &DescriptorCell,
    ) -> RuntimeResult<Arc<VirtualTable>> {
        match cell.section {
            LinkageSection::Class
            | LinkageSection::Struct
            | LinkageSection::Enum
            | LinkageSection::Instance => {}
            section => {
                return Err(RuntimeError::InvariantViolation(format!(
                    "{} descriptor has no virtual table",
                    section
                )));
            }
        }

        if let Some(table) = self.vtables.lock().get(cell) {
            return Ok(table.clone());
        }

        let built = build::build_virtual_table(self, cell)?;

        let mut cache = self.vtables.lock();
        Ok(cache.entry(*cell).or_insert(built).clone())
    }

    fn expect_section(cell: &DescriptorCell, section: LinkageSection) -> RuntimeResult<()> {
        if cell.section == section {
            Ok(())
        } else {
            Err(RuntimeError::LinkageMismatch {
                expected: section,
                found: cell.section,
            })
        }
    }

    pub fn resolve_class_virtual_table(
        &self,
        cell: &DescriptorCell,
    ) -> RuntimeResult<Arc<VirtualTable>> {
        Self::expect_section(cell, LinkageSection::Class)?;
        self.resolve_virtual_table(cell)
    }

    pub fn resolve_struct_virtual_table(
        &self,
        cell: &DescriptorCell,
    ) -> RuntimeResult<Arc<VirtualTable>> {
        Self::expect_section(cell, LinkageSection::Struct)?;
        self.resolve_virtual_table(cell)
    }

    pub fn resolve_enum_virtual_table(
        &self,
        cell: &DescriptorCell,
    ) -> RuntimeResult<Arc<VirtualTable>> {
        Self::expect_section(cell, LinkageSection::Enum)?;
        self.resolve_virtual_table(cell)
    }

    pub fn resolve_instance_virtual_table(
        &self,
        cell: &DescriptorCell,
    ) -> RuntimeResult<Arc<VirtualTable>> {
        Self::expect_section(cell, LinkageSection::Instance)?;
        self.resolve_virtual_table(cell)
    }

    pub fn resolve_concept_table(
        &self,
        cell: &DescriptorCell,
    ) -> RuntimeResult<Arc<ConceptTable>> {
        Self::expect_section(cell, LinkageSection::Concept)?;

        if let Some(table) = self.concepts.lock().get(cell) {
            return Ok(table.clone());
        }

        let built = build::build_concept_table(self, cell)?;

        let mut cache = self.concepts.lock();
        Ok(cache.entry(*cell).or_insert(built).clone())
    }

    pub fn resolve_existential_table(
        &self,
        cell: &DescriptorCell,
    ) -> RuntimeResult<Arc<ExistentialTable>> {
        Self::expect_section(cell, LinkageSection::Existential)?;

        if let Some(table) = self.existentials.lock().get(cell) {
            return Ok(table.clone());
        }

        let built = build::build_existential_table(self, cell)?;

        let mut cache = self.existentials.lock();
        Ok(cache.entry(*cell).or_insert(built).clone())
    }
}
