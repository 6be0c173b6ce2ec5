use crate::bytecode::{operands_kind, LexicalTarget, OperandsKind, PROC_HEADER_SIZE};
use crate::descriptor::*;
use crate::error::{ObjectError, ObjectResult};
use crate::object::{Object, OBJECT_VERSION};
use crate::opcode::Opcode;
use crate::type_spec::TypeSpec;
use crate::types::{CallMode, LinkageSection};
use sable_common::{ModuleLocation, SymbolPath};

/// Forward reference to a code offset within one proc, bound later and
/// patched into jump operands when the proc is finished.
#[derive(Clone, Copy, Debug)]
pub struct Label(usize);

struct LexicalSpec {
    activation_call: u32,
    target_offset: u32,
    target: LexicalTarget,
}

/// Emits the code of one proc. Jump targets are labels so code can be
/// emitted in one forward pass; `finish` resolves them into relative i16
/// offsets.
pub struct ProcBuilder {
    num_arguments: u16,
    num_locals: u16,
    lexicals: Vec<LexicalSpec>,
    code: Vec<u8>,
    labels: Vec<Option<u32>>,
    patches: Vec<(usize, usize)>,
}

impl ProcBuilder {
    pub fn new(num_arguments: u16, num_locals: u16) -> Self {
        ProcBuilder {
            num_arguments,
            num_locals,
            lexicals: Vec::new(),
            code: Vec::new(),
            labels: Vec::new(),
            patches: Vec::new(),
        }
    }

    pub fn add_lexical(&mut self, activation_call: u32, target_offset: u32, target: LexicalTarget) {
        self.lexicals.push(LexicalSpec {
            activation_call,
            target_offset,
            target,
        });
    }

    pub fn make_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind a label to the current end of the code.
    pub fn bind_label(&mut self, label: Label) {
        debug_assert!(self.labels[label.0].is_none());
        self.labels[label.0] = Some(self.code.len() as u32);
    }

    /// Emit an instruction that takes no operands.
    pub fn op(&mut self, opcode: Opcode) {
        debug_assert_eq!(operands_kind(opcode), OperandsKind::None);
        self.code.push(opcode as u8);
    }

    pub fn op_i64(&mut self, value: i64) {
        self.code.push(Opcode::I64 as u8);
        self.code.extend_from_slice(&(value as u64).to_be_bytes());
    }

    pub fn op_dbl(&mut self, value: f64) {
        self.code.push(Opcode::Dbl as u8);
        self.code.extend_from_slice(&value.to_bits().to_be_bytes());
    }

    pub fn op_chr(&mut self, value: char) {
        self.code.push(Opcode::Chr as u8);
        self.code.extend_from_slice(&(value as u32).to_be_bytes());
    }

    fn address_op(&mut self, opcode: Opcode, address: u32) {
        debug_assert_eq!(operands_kind(opcode), OperandsKind::Address);
        self.code.push(opcode as u8);
        self.code.extend_from_slice(&address.to_be_bytes());
    }

    pub fn op_literal(&mut self, address: u32) {
        self.address_op(Opcode::Literal, address);
    }

    pub fn op_string(&mut self, address: u32) {
        self.address_op(Opcode::String, address);
    }

    pub fn op_url(&mut self, address: u32) {
        self.address_op(Opcode::Url, address);
    }

    pub fn op_import(&mut self, import_index: u32) {
        self.address_op(Opcode::Import, import_index);
    }

    fn flags_address_op(&mut self, opcode: Opcode, flags: u8, address: u32) {
        debug_assert_eq!(operands_kind(opcode), OperandsKind::FlagsAddress);
        self.code.push(opcode as u8);
        self.code.push(flags);
        self.code.extend_from_slice(&address.to_be_bytes());
    }

    pub fn op_static(&mut self, flags: u8, address: u32) {
        self.flags_address_op(Opcode::Static, flags, address);
    }

    pub fn op_descriptor(&mut self, section: LinkageSection, address: u32) {
        self.flags_address_op(Opcode::Descriptor, section.to_flag(), address);
    }

    pub fn op_load(&mut self, target: u8, address: u32) {
        self.flags_address_op(Opcode::Load, target, address);
    }

    pub fn op_store(&mut self, target: u8, address: u32) {
        self.flags_address_op(Opcode::Store, target, address);
    }

    pub fn op_trap(&mut self, flags: u8, trap_index: u32) {
        self.flags_address_op(Opcode::Trap, flags, trap_index);
    }

    fn stack_offset_op(&mut self, opcode: Opcode, offset: u16) {
        debug_assert_eq!(operands_kind(opcode), OperandsKind::StackOffset);
        self.code.push(opcode as u8);
        self.code.extend_from_slice(&offset.to_be_bytes());
    }

    pub fn op_va_load(&mut self, index: u16) {
        self.stack_offset_op(Opcode::VaLoad, index);
    }

    pub fn op_pick(&mut self, offset: u16) {
        self.stack_offset_op(Opcode::Pick, offset);
    }

    pub fn op_drop(&mut self, offset: u16) {
        self.stack_offset_op(Opcode::Drop, offset);
    }

    pub fn op_rpick(&mut self, offset: u16) {
        self.stack_offset_op(Opcode::RPick, offset);
    }

    pub fn op_rdrop(&mut self, offset: u16) {
        self.stack_offset_op(Opcode::RDrop, offset);
    }

    /// Emit a branch targeting `label`. The operand is patched when the proc
    /// is finished.
    pub fn jump_op(&mut self, opcode: Opcode, label: Label) {
        debug_assert_eq!(operands_kind(opcode), OperandsKind::JumpOffset);
        self.code.push(opcode as u8);
        self.patches.push((self.code.len(), label.0));
        self.code.extend_from_slice(&0u16.to_be_bytes());
    }

    fn call_op(&mut self, opcode: Opcode, flags: u8, address: u32, placement: u16) {
        debug_assert_eq!(operands_kind(opcode), OperandsKind::FlagsAddressPlacement);
        self.code.push(opcode as u8);
        self.code.push(flags);
        self.code.extend_from_slice(&address.to_be_bytes());
        self.code.extend_from_slice(&placement.to_be_bytes());
    }

    pub fn op_call_static(&mut self, address: u32, num_args: u16) {
        self.call_op(Opcode::CallStatic, 0, address, num_args);
    }

    pub fn op_call_virtual(&mut self, address: u32, num_args: u16) {
        self.call_op(Opcode::CallVirtual, 0, address, num_args);
    }

    pub fn op_call_concept(&mut self, action_address: u32, num_args: u16) {
        self.call_op(Opcode::CallConcept, 0, action_address, num_args);
    }

    pub fn op_call_existential(&mut self, address: u32, num_args: u16) {
        self.call_op(Opcode::CallExistential, 0, address, num_args);
    }

    pub fn op_new(&mut self, flags: u8, address: u32, num_args: u16) {
        self.call_op(Opcode::New, flags, address, num_args);
    }

    /// Resolve labels and produce the encoded proc: header, lexical records,
    /// then code.
    fn finish(self) -> ObjectResult<Vec<u8>> {
        let mut code = self.code;

        for (pos, label) in self.patches {
            let target = self.labels[label]
                .ok_or_else(|| ObjectError::DecodeFailed(format!("unbound label {}", label)))?;
            let after_op = pos as i64 + 2;
            let delta = i64::from(target) - after_op;
            if delta < i64::from(i16::MIN) || delta > i64::from(i16::MAX) {
                return Err(ObjectError::DecodeFailed(format!(
                    "jump at offset {} out of i16 range",
                    pos
                )));
            }
            code[pos..pos + 2].copy_from_slice(&(delta as i16).to_be_bytes());
        }

        let lexicals_size = self.lexicals.len() * 9;
        let proc_size = (PROC_HEADER_SIZE - 4) + lexicals_size + code.len();

        let mut bytes = Vec::with_capacity(4 + proc_size);
        bytes.extend_from_slice(&(proc_size as u32).to_be_bytes());
        bytes.extend_from_slice(&self.num_arguments.to_be_bytes());
        bytes.extend_from_slice(&self.num_locals.to_be_bytes());
        bytes.extend_from_slice(&(self.lexicals.len() as u16).to_be_bytes());
        for lexical in &self.lexicals {
            bytes.extend_from_slice(&lexical.activation_call.to_be_bytes());
            bytes.extend_from_slice(&lexical.target_offset.to_be_bytes());
            bytes.push(match lexical.target {
                LexicalTarget::Argument => 0,
                LexicalTarget::Local => 1,
            });
        }
        bytes.extend_from_slice(&code);

        Ok(bytes)
    }
}

/// Configuration of one call descriptor, separate from its proc body.
pub struct CallConfig {
    pub symbol_path: SymbolPath,
    pub template: Option<u32>,
    pub receiver: Option<SymbolAddress>,
    pub type_index: u32,
    pub result_type: u32,
    pub mode: CallMode,
    pub no_return: bool,
    pub bound: bool,
}

impl CallConfig {
    pub fn new(symbol_path: SymbolPath, type_index: u32, result_type: u32) -> Self {
        CallConfig {
            symbol_path,
            template: None,
            receiver: None,
            type_index,
            result_type,
            mode: CallMode::Normal,
            no_return: false,
            bound: false,
        }
    }

    pub fn constructor(mut self) -> Self {
        self.mode = CallMode::Constructor;
        self.no_return = true;
        self
    }

    pub fn no_return(mut self) -> Self {
        self.no_return = true;
        self
    }

    pub fn bound(mut self, receiver: SymbolAddress) -> Self {
        self.bound = true;
        self.receiver = Some(receiver);
        self
    }
}

/// Programmatic object construction, used by the assembler and by tests.
/// Descriptors are appended in index order; `build` sorts the symbol index
/// and runs the same verifier as `Object::from_bytes`.
pub struct ObjectBuilder {
    types: Vec<TypeDescriptor>,
    templates: Vec<TemplateDescriptor>,
    existentials: Vec<ExistentialDescriptor>,
    literals: Vec<LiteralDescriptor>,
    calls: Vec<CallDescriptor>,
    fields: Vec<FieldDescriptor>,
    statics: Vec<StaticDescriptor>,
    actions: Vec<ActionDescriptor>,
    classes: Vec<ClassDescriptor>,
    structs: Vec<StructDescriptor>,
    instances: Vec<InstanceDescriptor>,
    concepts: Vec<ConceptDescriptor>,
    enums: Vec<EnumDescriptor>,
    namespaces: Vec<NamespaceDescriptor>,
    bindings: Vec<BindingDescriptor>,
    links: Vec<LinkDescriptor>,
    imports: Vec<ImportDescriptor>,
    plugin: Option<PluginDescriptor>,
    symbols: Vec<SymbolIndexEntry>,
    bytecode: Vec<u8>,
}

impl ObjectBuilder {
    pub fn new() -> Self {
        ObjectBuilder {
            types: Vec::new(),
            templates: Vec::new(),
            existentials: Vec::new(),
            literals: Vec::new(),
            calls: Vec::new(),
            fields: Vec::new(),
            statics: Vec::new(),
            actions: Vec::new(),
            classes: Vec::new(),
            structs: Vec::new(),
            instances: Vec::new(),
            concepts: Vec::new(),
            enums: Vec::new(),
            namespaces: Vec::new(),
            bindings: Vec::new(),
            links: Vec::new(),
            imports: Vec::new(),
            plugin: None,
            symbols: Vec::new(),
            bytecode: Vec::new(),
        }
    }

    fn add_symbol(&mut self, symbol_path: SymbolPath, section: LinkageSection, index: u32) {
        self.symbols.push(SymbolIndexEntry {
            symbol_path,
            section,
            index,
        });
    }

    pub fn add_import(&mut self, location: ModuleLocation, system: bool) -> u32 {
        self.imports.push(ImportDescriptor { location, system });
        (self.imports.len() - 1) as u32
    }

    /// Add a far reference. Returns the link index; embed it in descriptors
    /// or operands with `far(index)`.
    pub fn add_link(
        &mut self,
        linkage: LinkageSection,
        symbol_path: SymbolPath,
        import_index: u32,
    ) -> u32 {
        self.links.push(LinkDescriptor {
            linkage,
            symbol_path,
            import_index,
        });
        (self.links.len() - 1) as u32
    }

    pub fn add_literal(&mut self, literal: LiteralDescriptor) -> u32 {
        self.literals.push(literal);
        (self.literals.len() - 1) as u32
    }

    pub fn add_type(&mut self, spec: TypeSpec, super_type: Option<u32>) -> u32 {
        self.types.push(TypeDescriptor { spec, super_type });
        (self.types.len() - 1) as u32
    }

    pub fn add_template(&mut self, symbol_path: SymbolPath, placeholders: Vec<String>) -> u32 {
        self.templates.push(TemplateDescriptor {
            symbol_path,
            placeholders,
        });
        (self.templates.len() - 1) as u32
    }

    pub fn add_call(&mut self, config: CallConfig, proc: ProcBuilder) -> ObjectResult<u32> {
        let proc_offset = self.bytecode.len() as u32;
        let bytes = proc.finish()?;
        self.bytecode.extend_from_slice(&bytes);

        let index = self.calls.len() as u32;
        self.add_symbol(config.symbol_path.clone(), LinkageSection::Call, index);
        self.calls.push(CallDescriptor {
            symbol_path: config.symbol_path,
            template: config.template,
            receiver: config.receiver,
            type_index: config.type_index,
            mode: config.mode,
            no_return: config.no_return,
            bound: config.bound,
            declonly: false,
            proc_offset,
            result_type: config.result_type,
        });
        Ok(index)
    }

    pub fn add_declared_call(&mut self, config: CallConfig) -> u32 {
        let index = self.calls.len() as u32;
        self.add_symbol(config.symbol_path.clone(), LinkageSection::Call, index);
        self.calls.push(CallDescriptor {
            symbol_path: config.symbol_path,
            template: config.template,
            receiver: config.receiver,
            type_index: config.type_index,
            mode: config.mode,
            no_return: config.no_return,
            bound: config.bound,
            declonly: true,
            proc_offset: 0,
            result_type: config.result_type,
        });
        index
    }

    pub fn add_field(&mut self, symbol_path: SymbolPath, type_index: u32, is_variable: bool) -> u32 {
        let index = self.fields.len() as u32;
        self.add_symbol(symbol_path.clone(), LinkageSection::Field, index);
        self.fields.push(FieldDescriptor {
            symbol_path,
            type_index,
            is_variable,
        });
        index
    }

    pub fn add_static(
        &mut self,
        symbol_path: SymbolPath,
        type_index: u32,
        is_variable: bool,
        init_call: u32,
    ) -> u32 {
        let index = self.statics.len() as u32;
        self.add_symbol(symbol_path.clone(), LinkageSection::Static, index);
        self.statics.push(StaticDescriptor {
            symbol_path,
            type_index,
            is_variable,
            init_call,
        });
        index
    }

    pub fn add_action(
        &mut self,
        symbol_path: SymbolPath,
        receiver: u32,
        result_type: u32,
    ) -> u32 {
        let index = self.actions.len() as u32;
        self.add_symbol(symbol_path.clone(), LinkageSection::Action, index);
        self.actions.push(ActionDescriptor {
            symbol_path,
            template: None,
            receiver,
            result_type,
        });
        index
    }

    pub fn add_class(&mut self, class: ClassDescriptor) -> u32 {
        let index = self.classes.len() as u32;
        self.add_symbol(class.symbol_path.clone(), LinkageSection::Class, index);
        self.classes.push(class);
        index
    }

    pub fn add_struct(&mut self, descriptor: StructDescriptor) -> u32 {
        let index = self.structs.len() as u32;
        self.add_symbol(descriptor.symbol_path.clone(), LinkageSection::Struct, index);
        self.structs.push(descriptor);
        index
    }

    pub fn add_enum(&mut self, descriptor: EnumDescriptor) -> u32 {
        let index = self.enums.len() as u32;
        self.add_symbol(descriptor.symbol_path.clone(), LinkageSection::Enum, index);
        self.enums.push(descriptor);
        index
    }

    pub fn add_instance(&mut self, descriptor: InstanceDescriptor) -> u32 {
        let index = self.instances.len() as u32;
        self.add_symbol(
            descriptor.symbol_path.clone(),
            LinkageSection::Instance,
            index,
        );
        self.instances.push(descriptor);
        index
    }

    pub fn add_concept(&mut self, descriptor: ConceptDescriptor) -> u32 {
        let index = self.concepts.len() as u32;
        self.add_symbol(descriptor.symbol_path.clone(), LinkageSection::Concept, index);
        self.concepts.push(descriptor);
        index
    }

    pub fn add_existential(&mut self, descriptor: ExistentialDescriptor) -> u32 {
        let index = self.existentials.len() as u32;
        self.add_symbol(
            descriptor.symbol_path.clone(),
            LinkageSection::Existential,
            index,
        );
        self.existentials.push(descriptor);
        index
    }

    pub fn add_binding(&mut self, descriptor: BindingDescriptor) -> u32 {
        let index = self.bindings.len() as u32;
        self.add_symbol(descriptor.symbol_path.clone(), LinkageSection::Binding, index);
        self.bindings.push(descriptor);
        index
    }

    pub fn add_namespace(&mut self, descriptor: NamespaceDescriptor) -> u32 {
        let index = self.namespaces.len() as u32;
        self.add_symbol(
            descriptor.symbol_path.clone(),
            LinkageSection::Namespace,
            index,
        );
        self.namespaces.push(descriptor);
        index
    }

    pub fn set_plugin(&mut self, trap_count: u32) -> ObjectResult<()> {
        if self.plugin.is_some() {
            return Err(ObjectError::MultiplePlugins);
        }
        self.plugin = Some(PluginDescriptor { trap_count });
        Ok(())
    }

    pub fn build(mut self) -> ObjectResult<Object> {
        self.symbols.sort_by(|a, b| a.symbol_path.cmp(&b.symbol_path));

        let object = Object {
            version: OBJECT_VERSION,
            types: self.types,
            templates: self.templates,
            existentials: self.existentials,
            literals: self.literals,
            calls: self.calls,
            fields: self.fields,
            statics: self.statics,
            actions: self.actions,
            classes: self.classes,
            structs: self.structs,
            instances: self.instances,
            concepts: self.concepts,
            enums: self.enums,
            namespaces: self.namespaces,
            bindings: self.bindings,
            links: self.links,
            imports: self.imports,
            plugin: self.plugin,
            symbols: self.symbols,
            bytecode: self.bytecode,
        };

        object.verify()?;
        Ok(object)
    }
}

impl Default for ObjectBuilder {
    fn default() -> Self {
        ObjectBuilder::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bytecode::{BytecodeIterator, Operands};
    use crate::object::iterator_for_call;
    use crate::types::{far, near};
    use std::sync::Arc;

    fn empty_type(builder: &mut ObjectBuilder) -> u32 {
        builder.add_type(TypeSpec::NoReturn, None)
    }

    fn path(name: &str) -> SymbolPath {
        SymbolPath::from_parts(&[name])
    }

    #[test]
    fn round_trip_through_bytes() {
        let mut builder = ObjectBuilder::new();
        let ty = empty_type(&mut builder);

        let mut proc = ProcBuilder::new(0, 0);
        proc.op_i64(42);
        proc.op(Opcode::Return);
        builder
            .add_call(CallConfig::new(path("$entry"), ty, ty), proc)
            .unwrap();

        let object = builder.build().unwrap();
        let bytes = object.to_bytes().unwrap();
        let decoded = Object::from_bytes(&bytes).unwrap();

        assert_eq!(*decoded, object);
        assert_eq!(
            decoded.find_symbol(&path("$entry")),
            Some((LinkageSection::Call, 0))
        );
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut builder = ObjectBuilder::new();
        empty_type(&mut builder);
        let mut object = builder.build().unwrap();
        object.version = 99;

        let bytes = object.to_bytes().unwrap();
        assert_eq!(
            Object::from_bytes(&bytes).unwrap_err(),
            ObjectError::UnsupportedVersion(99)
        );
    }

    #[test]
    fn bad_near_address_fails_verification() {
        let mut builder = ObjectBuilder::new();
        let ty = empty_type(&mut builder);
        builder.add_static(path("counter"), ty, true, near(7));

        assert!(matches!(
            builder.build(),
            Err(ObjectError::BadAddress { .. })
        ));
    }

    #[test]
    fn far_address_requires_link_entry() {
        let mut builder = ObjectBuilder::new();
        let ty = empty_type(&mut builder);
        builder.add_static(path("counter"), ty, true, far(0));

        // no links were added, so far(0) is out of range
        assert!(matches!(
            builder.build(),
            Err(ObjectError::BadAddress { .. })
        ));
    }

    #[test]
    fn decode_emitted_ops() {
        let mut builder = ObjectBuilder::new();
        let ty = empty_type(&mut builder);

        let mut proc = ProcBuilder::new(1, 0);
        proc.op_load(crate::bytecode::TARGET_ARGUMENT, 0);
        proc.op_i64(-3);
        proc.op(Opcode::I64Add);
        proc.op(Opcode::Return);
        let call = builder
            .add_call(CallConfig::new(path("f"), ty, ty), proc)
            .unwrap();

        let object = Arc::new(builder.build().unwrap());
        let call = object.get_call(call).unwrap().clone();
        let mut it = iterator_for_call(&object, &call).unwrap();

        let op = it.next_op().unwrap().unwrap();
        assert_eq!(op.opcode, Opcode::Load);
        let op = it.next_op().unwrap().unwrap();
        assert_eq!(op.operands, Operands::I64(-3));
        assert_eq!(it.next_op().unwrap().unwrap().opcode, Opcode::I64Add);
        assert_eq!(it.next_op().unwrap().unwrap().opcode, Opcode::Return);
        assert!(it.next_op().unwrap().is_none());
    }

    #[test]
    fn jump_labels_patch_to_relative_offsets() {
        let mut builder = ObjectBuilder::new();
        let ty = empty_type(&mut builder);

        // if true skip the abort
        let mut proc = ProcBuilder::new(0, 0);
        proc.op(Opcode::True);
        let done = proc.make_label();
        proc.jump_op(Opcode::IfTrue, done);
        proc.op(Opcode::Abort);
        proc.bind_label(done);
        proc.op_i64(1);
        proc.op(Opcode::Return);
        let call = builder
            .add_call(CallConfig::new(path("f"), ty, ty), proc)
            .unwrap();

        let object = Arc::new(builder.build().unwrap());
        let call = object.get_call(call).unwrap().clone();
        let mut it: BytecodeIterator = iterator_for_call(&object, &call).unwrap();

        assert_eq!(it.next_op().unwrap().unwrap().opcode, Opcode::True);
        let branch = it.next_op().unwrap().unwrap();
        match branch.operands {
            Operands::JumpOffset(delta) => {
                // the abort is a single byte, so the branch skips one byte
                assert_eq!(delta, 1);
                it.move_ip(delta).unwrap();
            }
            other => panic!("unexpected operands {:?}", other),
        }
        assert_eq!(it.next_op().unwrap().unwrap().opcode, Opcode::I64);
    }

    #[test]
    fn truncated_proc_is_rejected() {
        let mut builder = ObjectBuilder::new();
        let ty = empty_type(&mut builder);
        let mut proc = ProcBuilder::new(0, 0);
        proc.op(Opcode::Return);
        builder
            .add_call(CallConfig::new(path("f"), ty, ty), proc)
            .unwrap();

        let mut object = builder.build().unwrap();
        object.bytecode.truncate(object.bytecode.len() - 1);

        let bytes = object.to_bytes().unwrap();
        assert!(Object::from_bytes(&bytes).is_err());
    }
}
