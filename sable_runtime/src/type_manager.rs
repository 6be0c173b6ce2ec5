use crate::data_cell::{DataCell, DescriptorCell, TypeHandle};
use crate::error::{RuntimeError, RuntimeResult};
use crate::heap::HeapValue;
use crate::heap_manager::HeapManager;
use crate::segment::BytecodeSegment;
use crate::segment_manager::SegmentManager;
use sable_common::{SymbolPath, SymbolUrl, TypeDef};
use sable_object::{self as object, IntrinsicType, LinkageSection, Object, TypeSpec};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TypeComparison {
    Equal,
    Extends,
    Disjoint,
}

/// Typing services: the intrinsic-type snapshot assembled at bootstrap,
/// `type_of` for any data cell, structural comparison along supertype
/// chains, and resolution between wire-form `TypeSpec`s and canonical
/// `TypeDef` values.
pub struct TypeManager {
    segments: Arc<SegmentManager>,

    /// Immutable after construction; assembled once from the prelude.
    intrinsics: HashMap<IntrinsicType, DescriptorCell>,
}

impl TypeManager {
    pub fn new(
        segments: Arc<SegmentManager>,
        intrinsics: HashMap<IntrinsicType, DescriptorCell>,
    ) -> Self {
        TypeManager {
            segments,
            intrinsics,
        }
    }

    /// Collect the intrinsic existentials a prelude segment declares.
    pub fn bootstrap_intrinsics(
        segment: &BytecodeSegment,
    ) -> HashMap<IntrinsicType, DescriptorCell> {
        let object = segment.object();
        let mut intrinsics = HashMap::new();

        for index in 0..object.num_existentials() {
            let existential = match object.get_existential(index) {
                Some(existential) => existential,
                None => continue,
            };
            if let Some(intrinsic) = existential.intrinsic {
                intrinsics.insert(
                    intrinsic,
                    DescriptorCell {
                        segment: segment.segment_index(),
                        value: index,
                        section: LinkageSection::Existential,
                    },
                );
            }
        }

        intrinsics
    }

    pub fn intrinsic_cell(&self, intrinsic: IntrinsicType) -> RuntimeResult<DescriptorCell> {
        self.intrinsics.get(&intrinsic).copied().ok_or_else(|| {
            RuntimeError::InvariantViolation(format!(
                "intrinsic type {:?} was not bootstrapped",
                intrinsic
            ))
        })
    }

    fn intrinsic_type_handle(&self, intrinsic: IntrinsicType) -> RuntimeResult<TypeHandle> {
        let cell = self.intrinsic_cell(intrinsic)?;
        self.descriptor_type_handle(&cell)
    }

    fn segment_by_index(&self, index: u32) -> RuntimeResult<Arc<BytecodeSegment>> {
        self.segments
            .get_segment_by_index(index)
            .ok_or_else(|| RuntimeError::InvariantViolation(format!("unknown segment {}", index)))
    }

    /// Index of the type entry describing the given descriptor.
    fn descriptor_type_index(object_: &Object, cell: &DescriptorCell) -> RuntimeResult<u32> {
        let missing = || {
            RuntimeError::InvariantViolation(format!("no {} descriptor at {}", cell.section, cell))
        };

        let type_index = match cell.section {
            LinkageSection::Existential => {
                object_.get_existential(cell.value).ok_or_else(missing)?.type_index
            }
            LinkageSection::Call => object_.get_call(cell.value).ok_or_else(missing)?.type_index,
            LinkageSection::Field => object_.get_field(cell.value).ok_or_else(missing)?.type_index,
            LinkageSection::Static => {
                object_.get_static(cell.value).ok_or_else(missing)?.type_index
            }
            LinkageSection::Class => object_.get_class(cell.value).ok_or_else(missing)?.type_index,
            LinkageSection::Struct => {
                object_.get_struct(cell.value).ok_or_else(missing)?.type_index
            }
            LinkageSection::Instance => {
                object_.get_instance(cell.value).ok_or_else(missing)?.type_index
            }
            LinkageSection::Concept => {
                object_.get_concept(cell.value).ok_or_else(missing)?.type_index
            }
            LinkageSection::Enum => object_.get_enum(cell.value).ok_or_else(missing)?.type_index,
            LinkageSection::Binding => {
                object_.get_binding(cell.value).ok_or_else(missing)?.type_index
            }
            section => {
                return Err(RuntimeError::InvariantViolation(format!(
                    "{} descriptor has no type",
                    section
                )));
            }
        };

        Ok(type_index)
    }

    pub fn descriptor_type_handle(&self, cell: &DescriptorCell) -> RuntimeResult<TypeHandle> {
        let segment = self.segment_by_index(cell.segment)?;
        let type_index = Self::descriptor_type_index(segment.object(), cell)?;
        Ok(TypeHandle {
            segment: cell.segment,
            type_index,
        })
    }

    /// The type of any runtime value, as a type cell.
    pub fn type_of(&self, value: &DataCell, heap: &HeapManager) -> RuntimeResult<DataCell> {
        let handle = match value {
            DataCell::Nil => self.intrinsic_type_handle(IntrinsicType::Nil)?,
            DataCell::Undef => self.intrinsic_type_handle(IntrinsicType::Undef)?,
            DataCell::Bool(..) => self.intrinsic_type_handle(IntrinsicType::Bool)?,
            DataCell::I64(..) => self.intrinsic_type_handle(IntrinsicType::Int64)?,
            DataCell::Dbl(..) => self.intrinsic_type_handle(IntrinsicType::Float64)?,
            DataCell::Chr(..) => self.intrinsic_type_handle(IntrinsicType::Char)?,
            DataCell::Type(..) => self.intrinsic_type_handle(IntrinsicType::Type)?,
            DataCell::Descriptor(cell) => self.descriptor_type_handle(cell)?,

            DataCell::Ref(handle) => match heap.value(*handle)? {
                HeapValue::Str(..) => self.intrinsic_type_handle(IntrinsicType::String)?,
                HeapValue::Url(..) => self.intrinsic_type_handle(IntrinsicType::Url)?,
                HeapValue::Bytes(..) => self.intrinsic_type_handle(IntrinsicType::Bytes)?,
                HeapValue::Status { .. } => self.intrinsic_type_handle(IntrinsicType::Status)?,
                HeapValue::Rest(..) => self.intrinsic_type_handle(IntrinsicType::Rest)?,
                HeapValue::Instance { vtable, .. } => vtable.type_handle(),
            },
        };

        Ok(DataCell::Type(handle))
    }

    fn symbol_url_of(&self, cell: &DescriptorCell) -> RuntimeResult<SymbolUrl> {
        let segment = self.segment_by_index(cell.segment)?;
        let object_ = segment.object();

        let missing = || {
            RuntimeError::InvariantViolation(format!("no {} descriptor at {}", cell.section, cell))
        };

        let path: &SymbolPath = match cell.section {
            LinkageSection::Existential => {
                &object_.get_existential(cell.value).ok_or_else(missing)?.symbol_path
            }
            LinkageSection::Call => &object_.get_call(cell.value).ok_or_else(missing)?.symbol_path,
            LinkageSection::Field => {
                &object_.get_field(cell.value).ok_or_else(missing)?.symbol_path
            }
            LinkageSection::Static => {
                &object_.get_static(cell.value).ok_or_else(missing)?.symbol_path
            }
            LinkageSection::Action => {
                &object_.get_action(cell.value).ok_or_else(missing)?.symbol_path
            }
            LinkageSection::Class => {
                &object_.get_class(cell.value).ok_or_else(missing)?.symbol_path
            }
            LinkageSection::Struct => {
                &object_.get_struct(cell.value).ok_or_else(missing)?.symbol_path
            }
            LinkageSection::Instance => {
                &object_.get_instance(cell.value).ok_or_else(missing)?.symbol_path
            }
            LinkageSection::Concept => {
                &object_.get_concept(cell.value).ok_or_else(missing)?.symbol_path
            }
            LinkageSection::Enum => &object_.get_enum(cell.value).ok_or_else(missing)?.symbol_path,
            LinkageSection::Namespace => {
                &object_.get_namespace(cell.value).ok_or_else(missing)?.symbol_path
            }
            LinkageSection::Binding => {
                &object_.get_binding(cell.value).ok_or_else(missing)?.symbol_path
            }
            section => {
                return Err(RuntimeError::InvariantViolation(format!(
                    "{} descriptor has no symbol path",
                    section
                )));
            }
        };

        Ok(SymbolUrl::new(segment.location().clone(), path.clone()))
    }

    /// Resolve a wire-form spec, addressed from `segment`, into a canonical
    /// type value.
    pub fn resolve_spec(
        &self,
        segment: &Arc<BytecodeSegment>,
        spec: &TypeSpec,
    ) -> RuntimeResult<TypeDef> {
        match spec {
            TypeSpec::Concrete {
                section,
                address,
                arguments,
            } => {
                let cell = self.segments.resolve_descriptor(segment, *section, *address)?;
                let symbol = self.symbol_url_of(&cell)?;
                let arguments = arguments
                    .iter()
                    .map(|arg| self.resolve_spec(segment, arg))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                Ok(TypeDef::concrete(symbol, arguments))
            }

            TypeSpec::Placeholder {
                index,
                template_index,
                arguments,
            } => {
                let template = segment
                    .object()
                    .get_template(*template_index)
                    .ok_or_else(|| {
                        RuntimeError::InvariantViolation(format!(
                            "no template descriptor at index {}",
                            template_index
                        ))
                    })?;
                let url = SymbolUrl::new(
                    segment.location().clone(),
                    template.symbol_path.clone(),
                );
                let arguments = arguments
                    .iter()
                    .map(|arg| self.resolve_spec(segment, arg))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                Ok(TypeDef::placeholder(*index, url, arguments))
            }

            TypeSpec::Union { members } => {
                let members = members
                    .iter()
                    .map(|member| self.resolve_spec(segment, member))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                TypeDef::for_union(members)
                    .map_err(|err| RuntimeError::InvariantViolation(err.to_string()))
            }

            TypeSpec::Intersection { members } => {
                let members = members
                    .iter()
                    .map(|member| self.resolve_spec(segment, member))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                TypeDef::for_intersection(members)
                    .map_err(|err| RuntimeError::InvariantViolation(err.to_string()))
            }

            TypeSpec::NoReturn => Ok(TypeDef::NoReturn),
        }
    }

    /// Encode a type value back into a wire-form spec addressed from
    /// `segment`. Only symbols declared by that segment's own object can be
    /// encoded; everything a compiler writes for an object satisfies this.
    pub fn spec_from_def(
        &self,
        segment: &Arc<BytecodeSegment>,
        def: &TypeDef,
    ) -> RuntimeResult<TypeSpec> {
        match def {
            TypeDef::Concrete { symbol, arguments } => {
                if symbol.location() != segment.location() {
                    return Err(RuntimeError::InvariantViolation(format!(
                        "cannot encode foreign symbol {}",
                        symbol
                    )));
                }
                let (section, index) = segment
                    .object()
                    .find_symbol(symbol.path())
                    .ok_or_else(|| RuntimeError::MissingSymbol(symbol.path().clone()))?;
                let arguments = arguments
                    .iter()
                    .map(|arg| self.spec_from_def(segment, arg))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                Ok(TypeSpec::Concrete {
                    section,
                    address: object::near(index),
                    arguments,
                })
            }

            TypeDef::Placeholder {
                index,
                template,
                arguments,
            } => {
                if template.location() != segment.location() {
                    return Err(RuntimeError::InvariantViolation(format!(
                        "cannot encode foreign template {}",
                        template
                    )));
                }
                let object_ = segment.object();
                let template_index = (0..object_.num_templates())
                    .find(|i| {
                        object_
                            .get_template(*i)
                            .map_or(false, |t| t.symbol_path == *template.path())
                    })
                    .ok_or_else(|| RuntimeError::MissingSymbol(template.path().clone()))?;
                let arguments = arguments
                    .iter()
                    .map(|arg| self.spec_from_def(segment, arg))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                Ok(TypeSpec::Placeholder {
                    index: *index,
                    template_index,
                    arguments,
                })
            }

            TypeDef::Union { members } => {
                let members = members
                    .iter()
                    .map(|member| self.spec_from_def(segment, member))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                Ok(TypeSpec::Union { members })
            }

            TypeDef::Intersection { members } => {
                let members = members
                    .iter()
                    .map(|member| self.spec_from_def(segment, member))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                Ok(TypeSpec::Intersection { members })
            }

            TypeDef::NoReturn => Ok(TypeSpec::NoReturn),
        }
    }

    /// Canonical type value of a type section entry.
    pub fn resolve_handle(&self, handle: TypeHandle) -> RuntimeResult<TypeDef> {
        let segment = self.segment_by_index(handle.segment)?;
        let ty = segment.object().get_type(handle.type_index).ok_or_else(|| {
            RuntimeError::InvariantViolation(format!(
                "no type descriptor at index {}",
                handle.type_index
            ))
        })?;
        self.resolve_spec(&segment, &ty.spec)
    }

    /// Structural comparison: equal types are `Equal`, a type whose
    /// supertype chain reaches the other (or that is a member of the other
    /// when the other is a union) `Extends` it, anything else is
    /// `Disjoint`.
    pub fn compare_types(
        &self,
        lhs: TypeHandle,
        rhs: TypeHandle,
    ) -> RuntimeResult<TypeComparison> {
        let ldef = self.resolve_handle(lhs)?;
        let rdef = self.resolve_handle(rhs)?;

        if ldef == rdef {
            return Ok(TypeComparison::Equal);
        }

        if let TypeDef::Union { members } = &rdef {
            if members.contains(&ldef) {
                return Ok(TypeComparison::Extends);
            }
        }

        // walk the supertype chain; entries of one chain always live in the
        // same object's type section
        let segment = self.segment_by_index(lhs.segment)?;
        let mut current = lhs.type_index;
        loop {
            let ty = segment.object().get_type(current).ok_or_else(|| {
                RuntimeError::InvariantViolation(format!(
                    "no type descriptor at index {}",
                    current
                ))
            })?;

            match ty.super_type {
                Some(super_index) => {
                    let super_def = self.resolve_handle(TypeHandle {
                        segment: lhs.segment,
                        type_index: super_index,
                    })?;
                    if super_def == rdef {
                        return Ok(TypeComparison::Extends);
                    }
                    current = super_index;
                }
                None => return Ok(TypeComparison::Disjoint),
            }
        }
    }

    /// Whether `def` appears in the sealed-subtype list of the given
    /// class-like descriptor.
    pub fn has_sealed_type(
        &self,
        cell: &DescriptorCell,
        def: &TypeDef,
    ) -> RuntimeResult<bool> {
        let segment = self.segment_by_index(cell.segment)?;
        let object_ = segment.object().clone();

        let missing = || {
            RuntimeError::InvariantViolation(format!("no {} descriptor at {}", cell.section, cell))
        };

        let sealed: &[TypeSpec] = match cell.section {
            LinkageSection::Class => {
                &object_.get_class(cell.value).ok_or_else(missing)?.sealed_subtypes
            }
            LinkageSection::Struct => {
                &object_.get_struct(cell.value).ok_or_else(missing)?.sealed_subtypes
            }
            LinkageSection::Enum => {
                &object_.get_enum(cell.value).ok_or_else(missing)?.sealed_subtypes
            }
            section => {
                return Err(RuntimeError::InvariantViolation(format!(
                    "{} descriptor has no sealed subtypes",
                    section
                )));
            }
        };

        for spec in sealed {
            if self.resolve_spec(&segment, spec)? == *def {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
