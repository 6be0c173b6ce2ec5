use crate::bytecode::{self, BytecodeIterator, ProcInfo};
use crate::descriptor::*;
use crate::error::{ObjectError, ObjectResult};
use crate::type_spec::TypeSpec;
use crate::types::{self, LinkageSection};
use sable_common::SymbolPath;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const OBJECT_VERSION: u32 = 1;

/// One compiled module. Immutable once constructed: the compiler or the
/// assembler produces an Object exactly once and the runtime only reads it.
/// Construction runs a verifier pass over every descriptor, so accessors can
/// assume internally consistent indices and stay total (out-of-range lookups
/// return `None` rather than panicking).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub(crate) version: u32,

    pub(crate) types: Vec<TypeDescriptor>,
    pub(crate) templates: Vec<TemplateDescriptor>,
    pub(crate) existentials: Vec<ExistentialDescriptor>,
    pub(crate) literals: Vec<LiteralDescriptor>,
    pub(crate) calls: Vec<CallDescriptor>,
    pub(crate) fields: Vec<FieldDescriptor>,
    pub(crate) statics: Vec<StaticDescriptor>,
    pub(crate) actions: Vec<ActionDescriptor>,
    pub(crate) classes: Vec<ClassDescriptor>,
    pub(crate) structs: Vec<StructDescriptor>,
    pub(crate) instances: Vec<InstanceDescriptor>,
    pub(crate) concepts: Vec<ConceptDescriptor>,
    pub(crate) enums: Vec<EnumDescriptor>,
    pub(crate) namespaces: Vec<NamespaceDescriptor>,
    pub(crate) bindings: Vec<BindingDescriptor>,
    pub(crate) links: Vec<LinkDescriptor>,
    pub(crate) imports: Vec<ImportDescriptor>,
    pub(crate) plugin: Option<PluginDescriptor>,
    pub(crate) symbols: Vec<SymbolIndexEntry>,
    pub(crate) bytecode: Vec<u8>,
}

impl Object {
    /// Decode an object from its serialized form and verify it. Fails closed:
    /// a buffer that decodes but contains any structurally invalid descriptor
    /// is rejected as a whole.
    pub fn from_bytes(bytes: &[u8]) -> ObjectResult<Arc<Object>> {
        let object: Object = bincode::deserialize(bytes)
            .map_err(|err| ObjectError::DecodeFailed(err.to_string()))?;

        if object.version != OBJECT_VERSION {
            return Err(ObjectError::UnsupportedVersion(object.version));
        }

        object.verify()?;
        Ok(Arc::new(object))
    }

    pub fn to_bytes(&self) -> ObjectResult<Vec<u8>> {
        bincode::serialize(self).map_err(|err| ObjectError::DecodeFailed(err.to_string()))
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn num_types(&self) -> u32 {
        self.types.len() as u32
    }

    pub fn get_type(&self, index: u32) -> Option<&TypeDescriptor> {
        self.types.get(index as usize)
    }

    pub fn num_templates(&self) -> u32 {
        self.templates.len() as u32
    }

    pub fn get_template(&self, index: u32) -> Option<&TemplateDescriptor> {
        self.templates.get(index as usize)
    }

    pub fn num_existentials(&self) -> u32 {
        self.existentials.len() as u32
    }

    pub fn get_existential(&self, index: u32) -> Option<&ExistentialDescriptor> {
        self.existentials.get(index as usize)
    }

    pub fn num_literals(&self) -> u32 {
        self.literals.len() as u32
    }

    pub fn get_literal(&self, index: u32) -> Option<&LiteralDescriptor> {
        self.literals.get(index as usize)
    }

    pub fn num_calls(&self) -> u32 {
        self.calls.len() as u32
    }

    pub fn get_call(&self, index: u32) -> Option<&CallDescriptor> {
        self.calls.get(index as usize)
    }

    pub fn num_fields(&self) -> u32 {
        self.fields.len() as u32
    }

    pub fn get_field(&self, index: u32) -> Option<&FieldDescriptor> {
        self.fields.get(index as usize)
    }

    pub fn num_statics(&self) -> u32 {
        self.statics.len() as u32
    }

    pub fn get_static(&self, index: u32) -> Option<&StaticDescriptor> {
        self.statics.get(index as usize)
    }

    pub fn num_actions(&self) -> u32 {
        self.actions.len() as u32
    }

    pub fn get_action(&self, index: u32) -> Option<&ActionDescriptor> {
        self.actions.get(index as usize)
    }

    pub fn num_classes(&self) -> u32 {
        self.classes.len() as u32
    }

    pub fn get_class(&self, index: u32) -> Option<&ClassDescriptor> {
        self.classes.get(index as usize)
    }

    pub fn num_structs(&self) -> u32 {
        self.structs.len() as u32
    }

    pub fn get_struct(&self, index: u32) -> Option<&StructDescriptor> {
        self.structs.get(index as usize)
    }

    pub fn num_instances(&self) -> u32 {
        self.instances.len() as u32
    }

    pub fn get_instance(&self, index: u32) -> Option<&InstanceDescriptor> {
        self.instances.get(index as usize)
    }

    pub fn num_concepts(&self) -> u32 {
        self.concepts.len() as u32
    }

    pub fn get_concept(&self, index: u32) -> Option<&ConceptDescriptor> {
        self.concepts.get(index as usize)
    }

    pub fn num_enums(&self) -> u32 {
        self.enums.len() as u32
    }

    pub fn get_enum(&self, index: u32) -> Option<&EnumDescriptor> {
        self.enums.get(index as usize)
    }

    pub fn num_namespaces(&self) -> u32 {
        self.namespaces.len() as u32
    }

    pub fn get_namespace(&self, index: u32) -> Option<&NamespaceDescriptor> {
        self.namespaces.get(index as usize)
    }

    pub fn num_bindings(&self) -> u32 {
        self.bindings.len() as u32
    }

    pub fn get_binding(&self, index: u32) -> Option<&BindingDescriptor> {
        self.bindings.get(index as usize)
    }

    pub fn num_links(&self) -> u32 {
        self.links.len() as u32
    }

    pub fn get_link(&self, index: u32) -> Option<&LinkDescriptor> {
        self.links.get(index as usize)
    }

    pub fn num_imports(&self) -> u32 {
        self.imports.len() as u32
    }

    pub fn get_import(&self, index: u32) -> Option<&ImportDescriptor> {
        self.imports.get(index as usize)
    }

    pub fn plugin(&self) -> Option<&PluginDescriptor> {
        self.plugin.as_ref()
    }

    pub fn num_symbols(&self) -> u32 {
        self.symbols.len() as u32
    }

    /// Look up a symbol by path in the sorted symbol index.
    pub fn find_symbol(&self, path: &SymbolPath) -> Option<(LinkageSection, u32)> {
        let slot = self
            .symbols
            .binary_search_by(|entry| entry.symbol_path.cmp(path))
            .ok()?;
        let entry = &self.symbols[slot];
        Some((entry.section, entry.index))
    }

    /// Number of entries in the section a near address would index.
    pub fn section_count(&self, section: LinkageSection) -> usize {
        match section {
            LinkageSection::Type => self.types.len(),
            LinkageSection::Existential => self.existentials.len(),
            LinkageSection::Literal => self.literals.len(),
            LinkageSection::Call => self.calls.len(),
            LinkageSection::Field => self.fields.len(),
            LinkageSection::Static => self.statics.len(),
            LinkageSection::Action => self.actions.len(),
            LinkageSection::Class => self.classes.len(),
            LinkageSection::Struct => self.structs.len(),
            LinkageSection::Instance => self.instances.len(),
            LinkageSection::Concept => self.concepts.len(),
            LinkageSection::Enum => self.enums.len(),
            LinkageSection::Namespace => self.namespaces.len(),
            LinkageSection::Binding => self.bindings.len(),
            LinkageSection::Plugin => usize::from(self.plugin.is_some()),
        }
    }

    pub fn parse_proc(&self, proc_offset: u32) -> ObjectResult<ProcInfo> {
        bytecode::parse_proc_info(&self.bytecode, proc_offset)
    }

    fn check_address(&self, section: LinkageSection, address: u32) -> ObjectResult<()> {
        if types::is_near(address) {
            let count = self.section_count(section);
            if (types::descriptor_offset(address) as usize) < count {
                return Ok(());
            }
            return Err(ObjectError::BadAddress {
                section: section.name(),
                address,
                count,
            });
        }

        if types::is_far(address) {
            if (types::link_offset(address) as usize) < self.links.len() {
                return Ok(());
            }
            return Err(ObjectError::BadAddress {
                section: "link",
                address,
                count: self.links.len(),
            });
        }

        Err(ObjectError::BadAddress {
            section: section.name(),
            address,
            count: self.section_count(section),
        })
    }

    fn check_type_index(&self, index: u32) -> ObjectResult<()> {
        if (index as usize) < self.types.len() {
            Ok(())
        } else {
            Err(ObjectError::BadAddress {
                section: "type",
                address: index,
                count: self.types.len(),
            })
        }
    }

    fn check_spec(&self, spec: &TypeSpec) -> ObjectResult<()> {
        match spec {
            TypeSpec::Concrete {
                section,
                address,
                arguments,
            } => {
                self.check_address(*section, *address)?;
                for arg in arguments {
                    self.check_spec(arg)?;
                }
                Ok(())
            }
            TypeSpec::Placeholder {
                template_index,
                arguments,
                ..
            } => {
                if (*template_index as usize) >= self.templates.len() {
                    return Err(ObjectError::BadAddress {
                        section: "template",
                        address: *template_index,
                        count: self.templates.len(),
                    });
                }
                for arg in arguments {
                    self.check_spec(arg)?;
                }
                Ok(())
            }
            TypeSpec::Union { members } | TypeSpec::Intersection { members } => {
                for member in members {
                    self.check_spec(member)?;
                }
                Ok(())
            }
            TypeSpec::NoReturn => Ok(()),
        }
    }

    fn check_impls(&self, impls: &[ImplRecord]) -> ObjectResult<()> {
        for rec in impls {
            self.check_type_index(rec.concept_type)?;
            for ext in &rec.extensions {
                self.check_address(LinkageSection::Action, ext.action)?;
                self.check_address(LinkageSection::Call, ext.call)?;
            }
        }
        Ok(())
    }

    fn check_class_like(
        &self,
        type_index: u32,
        super_address: Option<u32>,
        super_section: LinkageSection,
        ctor_call: u32,
        members: &[u32],
        methods: &[u32],
        impls: &[ImplRecord],
        sealed_subtypes: &[TypeSpec],
    ) -> ObjectResult<()> {
        self.check_type_index(type_index)?;
        if let Some(address) = super_address {
            self.check_address(super_section, address)?;
        }
        self.check_address(LinkageSection::Call, ctor_call)?;
        for member in members {
            self.check_address(LinkageSection::Field, *member)?;
        }
        for method in methods {
            self.check_address(LinkageSection::Call, *method)?;
        }
        self.check_impls(impls)?;
        for spec in sealed_subtypes {
            self.check_spec(spec)?;
        }
        Ok(())
    }

    /// Structural verification of every descriptor. Runs once at
    /// construction so the accessors and the runtime can treat the object as
    /// internally consistent afterwards.
    pub(crate) fn verify(&self) -> ObjectResult<()> {
        for ty in &self.types {
            self.check_spec(&ty.spec)?;
            if let Some(super_type) = ty.super_type {
                self.check_type_index(super_type)?;
            }
        }

        for call in &self.calls {
            self.check_type_index(call.type_index)?;
            self.check_type_index(call.result_type)?;
            if let Some(template) = call.template {
                if (template as usize) >= self.templates.len() {
                    return Err(ObjectError::BadAddress {
                        section: "template",
                        address: template,
                        count: self.templates.len(),
                    });
                }
            }
            if let Some(receiver) = &call.receiver {
                self.check_address(receiver.section, receiver.address)?;
            }
            if !call.declonly {
                self.parse_proc(call.proc_offset)?;
            }
        }

        for field in &self.fields {
            self.check_type_index(field.type_index)?;
        }

        for stat in &self.statics {
            self.check_type_index(stat.type_index)?;
            self.check_address(LinkageSection::Call, stat.init_call)?;
        }

        for action in &self.actions {
            self.check_address(LinkageSection::Concept, action.receiver)?;
            self.check_type_index(action.result_type)?;
        }

        for class in &self.classes {
            self.check_class_like(
                class.type_index,
                class.super_class,
                LinkageSection::Class,
                class.ctor_call,
                &class.members,
                &class.methods,
                &class.impls,
                &class.sealed_subtypes,
            )?;
        }

        for st in &self.structs {
            self.check_class_like(
                st.type_index,
                st.super_struct,
                LinkageSection::Struct,
                st.ctor_call,
                &st.members,
                &st.methods,
                &st.impls,
                &st.sealed_subtypes,
            )?;
        }

        for en in &self.enums {
            self.check_class_like(
                en.type_index,
                en.super_enum,
                LinkageSection::Enum,
                en.ctor_call,
                &en.members,
                &en.methods,
                &en.impls,
                &en.sealed_subtypes,
            )?;
        }

        for inst in &self.instances {
            self.check_class_like(
                inst.type_index,
                inst.super_instance,
                LinkageSection::Instance,
                inst.ctor_call,
                &inst.members,
                &inst.methods,
                &inst.impls,
                &[],
            )?;
        }

        for concept in &self.concepts {
            self.check_type_index(concept.type_index)?;
            if let Some(address) = concept.super_concept {
                self.check_address(LinkageSection::Concept, address)?;
            }
            for action in &concept.actions {
                self.check_address(LinkageSection::Action, *action)?;
            }
            self.check_impls(&concept.impls)?;
        }

        for ex in &self.existentials {
            self.check_type_index(ex.type_index)?;
            if let Some(address) = ex.super_existential {
                self.check_address(LinkageSection::Existential, address)?;
            }
            for method in &ex.methods {
                self.check_address(LinkageSection::Call, *method)?;
            }
            self.check_impls(&ex.impls)?;
        }

        for binding in &self.bindings {
            self.check_type_index(binding.type_index)?;
            self.check_address(binding.target.section, binding.target.address)?;
        }

        for ns in &self.namespaces {
            for target in &ns.targets {
                self.check_address(target.section, target.address)?;
            }
        }

        for link in &self.links {
            if (link.import_index as usize) >= self.imports.len() {
                return Err(ObjectError::BadAddress {
                    section: "import",
                    address: link.import_index,
                    count: self.imports.len(),
                });
            }
        }

        for (i, entry) in self.symbols.iter().enumerate() {
            if i > 0 && self.symbols[i - 1].symbol_path >= entry.symbol_path {
                if self.symbols[i - 1].symbol_path == entry.symbol_path {
                    return Err(ObjectError::DuplicateSymbol(entry.symbol_path.to_string()));
                }
                return Err(ObjectError::UnsortedSymbolIndex(i));
            }
            let count = self.section_count(entry.section);
            if (entry.index as usize) >= count {
                return Err(ObjectError::BadAddress {
                    section: entry.section.name(),
                    address: entry.index,
                    count,
                });
            }
        }

        Ok(())
    }
}

/// Human-readable listing of the object, printed by the driver's dump mode.
impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "object version {}", self.version)?;

        if !self.imports.is_empty() {
            writeln!(f, "imports:")?;
            for (i, import) in self.imports.iter().enumerate() {
                let system = if import.system { " (system)" } else { "" };
                writeln!(f, "  {:4}: {}{}", i, import.location, system)?;
            }
        }

        if !self.links.is_empty() {
            writeln!(f, "links:")?;
            for (i, link) in self.links.iter().enumerate() {
                writeln!(
                    f,
                    "  {:4}: {} {} via import {}",
                    i, link.linkage, link.symbol_path, link.import_index
                )?;
            }
        }

        if !self.literals.is_empty() {
            writeln!(f, "literals:")?;
            for (i, literal) in self.literals.iter().enumerate() {
                writeln!(f, "  {:4}: {:?}", i, literal)?;
            }
        }

        if !self.statics.is_empty() {
            writeln!(f, "statics:")?;
            for (i, stat) in self.statics.iter().enumerate() {
                writeln!(f, "  {:4}: {}", i, stat.symbol_path)?;
            }
        }

        for (name, paths) in [
            ("classes", self.classes.iter().map(|c| &c.symbol_path).collect::<Vec<_>>()),
            ("structs", self.structs.iter().map(|s| &s.symbol_path).collect()),
            ("enums", self.enums.iter().map(|e| &e.symbol_path).collect()),
            ("instances", self.instances.iter().map(|i| &i.symbol_path).collect()),
            ("concepts", self.concepts.iter().map(|c| &c.symbol_path).collect()),
            ("existentials", self.existentials.iter().map(|e| &e.symbol_path).collect()),
        ] {
            if !paths.is_empty() {
                writeln!(f, "{}:", name)?;
                for (i, path) in paths.iter().enumerate() {
                    writeln!(f, "  {:4}: {}", i, path)?;
                }
            }
        }

        if !self.calls.is_empty() {
            writeln!(f, "calls:")?;
        }
        for (i, call) in self.calls.iter().enumerate() {
            writeln!(f, "  {:4}: {}", i, call.symbol_path)?;
            if call.declonly {
                writeln!(f, "        (declaration only)")?;
                continue;
            }

            let proc = match self.parse_proc(call.proc_offset) {
                Ok(proc) => proc,
                Err(err) => {
                    writeln!(f, "        <bad proc: {}>", err)?;
                    continue;
                }
            };
            writeln!(
                f,
                "        args={} locals={} lexicals={}",
                proc.num_arguments, proc.num_locals, proc.num_lexicals
            )?;

            let mut pos = proc.code_start;
            while pos < proc.code_end {
                let offset = (pos - proc.code_start) as u32;
                match bytecode::read_op(&self.bytecode[..proc.code_end], &mut pos, offset) {
                    Ok(op) => writeln!(f, "      {}", op)?,
                    Err(err) => {
                        writeln!(f, "      <decode error: {}>", err)?;
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

/// Iterator positioned at the first instruction of a call's proc.
pub fn iterator_for_call(
    object: &Arc<Object>,
    call: &CallDescriptor,
) -> ObjectResult<BytecodeIterator> {
    let proc = object.parse_proc(call.proc_offset)?;
    Ok(BytecodeIterator::for_proc(object.clone(), &proc))
}
