//! The structured codec writer: a [`ClassNode`] to class file bytes.

use std::collections::HashMap;

use crate::analysis::{HandlerInfo, MethodContext};
use crate::bridge::constants::{to_visitor_constant, to_visitor_constants, to_visitor_handle};
use crate::bytecode::CodeEmitter;
use crate::class_reader::{LineNumber, LocalVariable};
use crate::class_writer::{
    assemble_code, bootstrap_index, class_file_access, constant_index, push_annotation_default,
    push_bootstrap_methods, push_enclosing_method, push_flag_attributes, push_inner_classes,
    push_method_parameters, push_module, push_parameter_annotations, push_record, push_source,
    write_class, write_member, write_record_component, AttributeList, ClassHeader, CodeParts,
    MemberAttributes,
};
use crate::constant_pool::ConstantPoolBuilder;
use crate::constants::*;
use crate::desc::ConstantDesc;
use crate::error::{ClassWriteError, Error, Result};
use crate::frame::{ExpandedFrame, FrameType};
use crate::hierarchy::{ClassHierarchy, HierarchyResolver};
use crate::insn::{CodeElement, Insn, LabelNode};
use crate::nodes::{
    ClassNode, CodeNode, FieldNode, MethodNode, RecordComponentNode, VerificationType,
};
use crate::opcodes::*;

/// Options of [`write_class_node`].
pub struct NodeWriteOptions {
    /// A combination of [`COMPUTE_MAXS`] and [`COMPUTE_FRAMES`].
    pub flags: u32,
    resolver: Box<dyn HierarchyResolver>,
}

impl Default for NodeWriteOptions {
    fn default() -> Self {
        Self::new(0)
    }
}

impl std::fmt::Debug for NodeWriteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeWriteOptions").field("flags", &self.flags).finish_non_exhaustive()
    }
}

impl NodeWriteOptions {
    pub fn new(flags: u32) -> Self {
        Self {
            flags,
            resolver: Box::new(ClassHierarchy::default()),
        }
    }

    /// Replaces the resolver consulted when frames merge two reference
    /// types.
    pub fn with_hierarchy_resolver(mut self, resolver: impl HierarchyResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub(crate) fn with_boxed_resolver(mut self, resolver: Box<dyn HierarchyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn resolver(&self) -> &dyn HierarchyResolver {
        self.resolver.as_ref()
    }
}

/// Serializes a model to class file bytes.
///
/// The pool is seeded from [`ClassNode::constant_pool`] when present, so a
/// parsed and unchanged class keeps its constant indices.
pub fn write_class_node(node: &ClassNode, options: &NodeWriteOptions) -> Result<Vec<u8>> {
    let major = node.major_version;
    if major > STRUCTURED_CODEC_MAX_MAJOR {
        return Err(Error::UnsupportedVersion {
            major,
            ceiling: STRUCTURED_CODEC_MAX_MAJOR,
        });
    }
    let mut cp = match &node.constant_pool {
        Some(snapshot) => ConstantPoolBuilder::from_snapshot(snapshot),
        None => ConstantPoolBuilder::new(),
    };
    let header = ClassHeader {
        minor_version: node.minor_version,
        major_version: major,
        access: class_file_access(node.access, major),
        this_class: cp.class(&node.name),
        super_class: node.super_name.as_deref().map_or(0, |name| cp.class(name)),
        interfaces: node.interfaces.iter().map(|name| cp.class(name)).collect(),
    };

    let mut writer = NodeWriter {
        class: node,
        cp,
        options,
    };
    let mut record_components = Vec::with_capacity(node.record_components.len());
    for component in &node.record_components {
        record_components.push(writer.record_component(component)?);
    }
    let mut fields = Vec::with_capacity(node.fields.len());
    for field in &node.fields {
        fields.push(writer.field(field)?);
    }
    let mut methods = Vec::with_capacity(node.methods.len());
    for method in &node.methods {
        methods.push(writer.method(method)?);
    }

    let cp = &mut writer.cp;
    let mut list = AttributeList::default();
    push_source(&mut list, cp, node.source_file.as_deref(), node.source_debug.as_deref());
    push_inner_classes(&mut list, cp, &node.inner_classes);
    if let Some(outer) = &node.outer_class {
        push_enclosing_method(&mut list, cp, outer);
    }
    push_flag_attributes(&mut list, cp, node.access, major);
    if let Some(module) = &node.module {
        push_module(&mut list, cp, module);
    }
    if let Some(host) = &node.nest_host {
        let index = cp.class(host);
        list.push_u2(cp, attrs::NEST_HOST, index);
    }
    if !node.nest_members.is_empty() {
        list.push_classes(cp, attrs::NEST_MEMBERS, &node.nest_members);
    }
    if !node.permitted_subclasses.is_empty() {
        list.push_classes(cp, attrs::PERMITTED_SUBCLASSES, &node.permitted_subclasses);
    }
    push_record(&mut list, cp, node.access, &record_components);
    MemberAttributes {
        signature: node.signature.as_deref(),
        visible_annotations: &node.visible_annotations,
        invisible_annotations: &node.invisible_annotations,
        visible_type_annotations: &node.visible_type_annotations,
        invisible_type_annotations: &node.invisible_type_annotations,
        attributes: &node.attributes,
    }
    .push_into(&mut list, cp)?;
    push_bootstrap_methods(&mut list, cp);
    log::trace!("serialized model of class {} with {} method(s)", node.name, methods.len());
    write_class(&writer.cp, &header, &fields, &methods, &list)
}

struct NodeWriter<'a> {
    class: &'a ClassNode,
    cp: ConstantPoolBuilder,
    options: &'a NodeWriteOptions,
}

impl NodeWriter<'_> {
    fn record_component(&mut self, component: &RecordComponentNode) -> Result<Vec<u8>> {
        let mut list = AttributeList::default();
        MemberAttributes {
            signature: component.signature.as_deref(),
            visible_annotations: &component.visible_annotations,
            invisible_annotations: &component.invisible_annotations,
            visible_type_annotations: &component.visible_type_annotations,
            invisible_type_annotations: &component.invisible_type_annotations,
            attributes: &component.attributes,
        }
        .push_into(&mut list, &mut self.cp)?;
        Ok(write_record_component(&mut self.cp, &component.name, &component.descriptor, &list))
    }

    fn field(&mut self, field: &FieldNode) -> Result<Vec<u8>> {
        let major = self.class.major_version;
        let cp = &mut self.cp;
        let mut list = AttributeList::default();
        if let Some(value) = &field.value {
            let index = constant_desc_index(cp, value)?;
            list.push_u2(cp, attrs::CONSTANT_VALUE, index);
        }
        push_flag_attributes(&mut list, cp, field.access, major);
        MemberAttributes {
            signature: field.signature.as_deref(),
            visible_annotations: &field.visible_annotations,
            invisible_annotations: &field.invisible_annotations,
            visible_type_annotations: &field.visible_type_annotations,
            invisible_type_annotations: &field.invisible_type_annotations,
            attributes: &field.attributes,
        }
        .push_into(&mut list, cp)?;
        let access = class_file_access(field.access, major);
        Ok(write_member(cp, access, &field.name, &field.descriptor, &list))
    }

    fn method(&mut self, method: &MethodNode) -> Result<Vec<u8>> {
        let major = self.class.major_version;
        let code = match &method.code {
            Some(code) => Some(self.code(method, code)?),
            None => None,
        };
        let cp = &mut self.cp;
        let mut list = AttributeList::default();
        if let Some(code) = code {
            list.push(cp, attrs::CODE, code);
        }
        if !method.exceptions.is_empty() {
            list.push_classes(cp, attrs::EXCEPTIONS, &method.exceptions);
        }
        push_flag_attributes(&mut list, cp, method.access, major);
        push_method_parameters(&mut list, cp, &method.parameters);
        if let Some(value) = &method.annotation_default {
            push_annotation_default(&mut list, cp, value);
        }
        push_parameter_annotations(
            &mut list,
            cp,
            method.visible_parameter_annotations.as_deref(),
            method.invisible_parameter_annotations.as_deref(),
        );
        MemberAttributes {
            signature: method.signature.as_deref(),
            visible_annotations: &method.visible_annotations,
            invisible_annotations: &method.invisible_annotations,
            visible_type_annotations: &method.visible_type_annotations,
            invisible_type_annotations: &method.invisible_type_annotations,
            attributes: &method.attributes,
        }
        .push_into(&mut list, cp)?;
        let access = class_file_access(method.access, major);
        Ok(write_member(cp, access, &method.name, &method.descriptor, &list))
    }

    fn code(&mut self, method: &MethodNode, code: &CodeNode) -> Result<Vec<u8>> {
        let mut emitter: CodeEmitter<LabelNode> = CodeEmitter::new();
        let mut line_numbers = Vec::new();
        for element in &code.elements {
            match element {
                CodeElement::Label(label) => emitter.bind(*label)?,
                CodeElement::LineNumber(line) => line_numbers.push(LineNumber {
                    start_pc: emitter.offset() as u16,
                    line_number: *line,
                }),
                CodeElement::Insn(insn) => emit_insn(&mut emitter, &mut self.cp, insn)?,
            }
        }
        let (bytes, labels) = emitter.finish(&method.name)?;
        let offset = |label: LabelNode| -> Result<usize> {
            labels
                .get(&label)
                .copied()
                .ok_or_else(|| ClassWriteError::UnboundLabel(format!("{label:?}")).into())
        };

        let mut parts = CodeParts {
            code: bytes,
            max_stack: code.max_stack,
            max_locals: code.max_locals,
            line_numbers,
            attributes: code.attributes.clone(),
            ..CodeParts::default()
        };
        for block in &code.try_catch_blocks {
            parts.handlers.push(HandlerInfo {
                start: offset(block.start)?,
                end: offset(block.end)?,
                handler: offset(block.handler)?,
                catch_type: block
                    .catch_type
                    .as_ref()
                    .map(|class| class.internal_name().to_string()),
            });
        }
        for variable in &code.local_variables {
            let start_pc = offset(variable.start)? as u16;
            parts.local_variables.push(LocalVariable {
                start_pc,
                length: (offset(variable.end)? as u16).wrapping_sub(start_pc),
                name: variable.name.clone(),
                descriptor: variable.descriptor.clone(),
                index: variable.slot,
            });
        }
        for variable in &code.local_variable_types {
            let start_pc = offset(variable.start)? as u16;
            parts.local_variable_types.push(LocalVariable {
                start_pc,
                length: (offset(variable.end)? as u16).wrapping_sub(start_pc),
                name: variable.name.clone(),
                descriptor: variable.signature.clone(),
                index: variable.slot,
            });
        }
        let mut frames: HashMap<usize, ExpandedFrame<FrameType>> = HashMap::new();
        for frame in &code.frames {
            let at = offset(frame.label)?;
            let mut frame_type = |value: &VerificationType| -> Result<FrameType> {
                Ok(match value {
                    VerificationType::Top => FrameType::Top,
                    VerificationType::Integer => FrameType::Integer,
                    VerificationType::Float => FrameType::Float,
                    VerificationType::Double => FrameType::Double,
                    VerificationType::Long => FrameType::Long,
                    VerificationType::Null => FrameType::Null,
                    VerificationType::UninitializedThis => FrameType::UninitializedThis,
                    VerificationType::Object(class) => {
                        FrameType::Object(class.internal_name().to_string())
                    }
                    VerificationType::Uninitialized(new) => {
                        FrameType::Uninitialized(offset(*new)? as u16)
                    }
                })
            };
            let expanded = ExpandedFrame {
                offset: at as u16,
                locals: frame.locals.iter().map(&mut frame_type).collect::<Result<_>>()?,
                stack: frame.stack.iter().map(&mut frame_type).collect::<Result<_>>()?,
            };
            if frames.insert(at, expanded).is_some() {
                return Err(Error::protocol(format!(
                    "two frames at offset {at} in {}",
                    method.name
                )));
            }
        }
        let mut frames: Vec<_> = frames.into_values().collect();
        frames.sort_by_key(|frame| frame.offset);
        parts.frames = frames;
        for (annotations, visible) in [
            (&code.visible_type_annotations, true),
            (&code.invisible_type_annotations, false),
        ] {
            for annotation in annotations {
                let annotation = annotation
                    .clone()
                    .map_positions(|label| offset(label).map(|at| at as u16))?;
                parts.type_annotations.push((annotation, visible));
            }
        }

        let context = MethodContext {
            owner: &self.class.name,
            access: method.access,
            name: &method.name,
            descriptor: &method.descriptor,
        };
        assemble_code(
            &mut self.cp,
            &context,
            self.class.major_version,
            self.options.flags,
            self.options.resolver(),
            parts,
        )
    }
}

/// Adds a model constant to the pool through its visitor form.
fn constant_desc_index(cp: &mut ConstantPoolBuilder, constant: &ConstantDesc) -> Result<u16> {
    constant_index(cp, &to_visitor_constant(constant))
}

fn emit_insn(
    emitter: &mut CodeEmitter<LabelNode>,
    cp: &mut ConstantPoolBuilder,
    insn: &Insn,
) -> Result<()> {
    match insn {
        Insn::Nop
        | Insn::ConstantIntrinsic(_)
        | Insn::ArrayLoad(_)
        | Insn::ArrayStore(_)
        | Insn::Stack(_)
        | Insn::Operator(_)
        | Insn::Convert(_)
        | Insn::Return(_)
        | Insn::Throw
        | Insn::Monitor(_) => emitter.simple(insn.opcode()),
        Insn::Push { opcode, value } => emitter.int_insn(*opcode, *value),
        Insn::Ldc(constant) => {
            let index = constant_desc_index(cp, constant)?;
            emitter.ldc(index, constant.is_wide());
        }
        Insn::Load { slot, .. } | Insn::Store { slot, .. } | Insn::Ret(slot) => {
            emitter.var(insn.opcode(), *slot)
        }
        Insn::Increment { slot, constant } => emitter.iinc(*slot, *constant),
        Insn::Branch { opcode, target } => emitter.jump(*opcode, *target),
        Insn::TableSwitch {
            low,
            high,
            default,
            targets,
        } => {
            if i64::from(*high) - i64::from(*low) + 1 != targets.len() as i64 {
                return Err(Error::protocol(format!(
                    "table switch {low}..={high} has {} targets",
                    targets.len()
                )));
            }
            emitter.table_switch(*low, *high, *default, targets);
        }
        Insn::LookupSwitch { default, cases } => emitter.lookup_switch(*default, cases),
        Insn::Field {
            opcode,
            owner,
            name,
            descriptor,
        } => {
            let index = cp.field_ref(owner.internal_name(), name, descriptor);
            emitter.cp_insn(*opcode, index);
        }
        Insn::Invoke {
            opcode,
            owner,
            name,
            descriptor,
            is_interface,
        } => {
            let index = cp.method_ref(owner.internal_name(), name, descriptor, *is_interface);
            if *opcode == INVOKEINTERFACE {
                emitter.invokeinterface(index, descriptor);
            } else {
                emitter.cp_insn(*opcode, index);
            }
        }
        Insn::InvokeDynamic(site) => {
            let handle = to_visitor_handle(&site.bootstrap);
            let arguments = to_visitor_constants(&site.args);
            let bootstrap = bootstrap_index(cp, &handle, &arguments)?;
            let index = cp.invoke_dynamic(bootstrap, &site.name, &site.descriptor);
            emitter.invokedynamic(index);
        }
        Insn::NewObject(class) => {
            let index = cp.class(class.internal_name());
            emitter.cp_insn(NEW, index);
        }
        Insn::NewPrimitiveArray(kind) => {
            let code = kind
                .newarray_code()
                .ok_or_else(|| Error::protocol(format!("no primitive array of {kind:?}")))?;
            emitter.int_insn(NEWARRAY, i32::from(code));
        }
        Insn::NewReferenceArray(component) => {
            let index = cp.class(component.internal_name());
            emitter.cp_insn(ANEWARRAY, index);
        }
        Insn::NewMultiArray { array_type, dimensions } => {
            let index = cp.class(array_type.internal_name());
            emitter.multianewarray(index, *dimensions);
        }
        Insn::TypeCheck { opcode, class } => {
            let index = cp.class(class.internal_name());
            emitter.cp_insn(*opcode, index);
        }
    }
    Ok(())
}
