//! The structured codec reader: class file bytes to a [`ClassNode`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::annotation::{Annotation, TypeAnnotation};
use crate::attribute::{Attribute, AttributeRegistry};
use crate::bridge::constants::{to_model_call_site, to_model_constant};
use crate::bytecode::{decode_code, Operand, ParsedInstruction};
use crate::class_reader::{
    attribute_flags, check_label_offsets, read_class_file, read_major_version, signature_of,
    AttributeInfo, ClassFile, CodeAttribute, MemberInfo, RecordComponentInfo,
};
use crate::constants::*;
use crate::desc::ClassDesc;
use crate::error::{ClassReadError, Error, Result};
use crate::frame::{expand_frames, initial_locals, FrameType};
use crate::insn::{CodeElement, Insn, LabelNode, TypeKind};
use crate::nodes::{
    ClassNode, CodeNode, FieldNode, FrameNode, LocalVariableNode, LocalVariableTypeNode, MethodNode,
    RecordComponentNode, TryCatchBlockNode, VerificationType,
};
use crate::opcodes::*;

/// Options of [`read_class_node`].
#[derive(Debug, Clone, Default)]
pub struct NodeReadOptions {
    /// A combination of [`SKIP_CODE`], [`SKIP_DEBUG`] and [`SKIP_FRAMES`].
    /// Model frames are always expanded, so [`EXPAND_FRAMES`] has no effect.
    pub flags: u32,
    pub attribute_registry: AttributeRegistry,
}

impl NodeReadOptions {
    pub fn new(flags: u32) -> Self {
        Self {
            flags,
            attribute_registry: AttributeRegistry::new(),
        }
    }

    pub fn with_attribute_registry(mut self, registry: AttributeRegistry) -> Self {
        self.attribute_registry = registry;
        self
    }
}

/// Parses a class file into the structured model.
///
/// Accepts every version up to [`STRUCTURED_CODEC_MAX_MAJOR`].
///
/// ```
/// use classfile_bridge::node_reader::{read_class_node, NodeReadOptions};
///
/// let err = read_class_node(&[0xCA, 0xFE], &NodeReadOptions::default());
/// assert!(err.is_err());
/// ```
pub fn read_class_node(bytes: &[u8], options: &NodeReadOptions) -> Result<ClassNode> {
    let major = read_major_version(bytes)?;
    if major > STRUCTURED_CODEC_MAX_MAJOR {
        return Err(Error::UnsupportedVersion {
            major,
            ceiling: STRUCTURED_CODEC_MAX_MAJOR,
        });
    }
    let class_file = read_class_file(bytes, &options.attribute_registry)?;
    log::trace!("building model of class {} (version {})", class_file.name, major);
    to_class_node(&class_file, options.flags)
}

/// Annotations and unknown attributes of a class, member or record
/// component.
#[derive(Default)]
struct Annotated {
    visible: Vec<Annotation>,
    invisible: Vec<Annotation>,
    visible_type: Vec<TypeAnnotation>,
    invisible_type: Vec<TypeAnnotation>,
    attributes: Vec<Attribute>,
}

impl Annotated {
    fn collect(attributes: &[AttributeInfo]) -> Result<Self> {
        let mut annotated = Self::default();
        for attr in attributes {
            match attr {
                AttributeInfo::Annotations { visible: true, annotations } => {
                    annotated.visible.extend(annotations.iter().cloned())
                }
                AttributeInfo::Annotations { visible: false, annotations } => {
                    annotated.invisible.extend(annotations.iter().cloned())
                }
                AttributeInfo::TypeAnnotations { visible, annotations } => {
                    let converted = outside_code(annotations)?;
                    if *visible {
                        annotated.visible_type.extend(converted);
                    } else {
                        annotated.invisible_type.extend(converted);
                    }
                }
                AttributeInfo::Unknown(attribute) => annotated.attributes.push(attribute.clone()),
                _ => {}
            }
        }
        Ok(annotated)
    }
}

fn outside_code(annotations: &[TypeAnnotation<u16>]) -> Result<Vec<TypeAnnotation>> {
    annotations
        .iter()
        .cloned()
        .map(|annotation| {
            annotation.map_positions(|offset: u16| {
                Err(Error::from(ClassReadError::InvalidAttribute(format!(
                    "type annotation outside code points at offset {offset}"
                ))))
            })
        })
        .collect()
}

fn to_class_node(class_file: &ClassFile, flags: u32) -> Result<ClassNode> {
    let skip_debug = flags & SKIP_DEBUG != 0;
    let attributes = &class_file.attributes;
    let annotated = Annotated::collect(attributes)?;
    let mut node = ClassNode {
        major_version: class_file.major_version,
        minor_version: class_file.minor_version,
        access: class_file.access_flags as u32 | attribute_flags(attributes),
        name: class_file.name.clone(),
        super_name: class_file.super_name.clone(),
        interfaces: class_file.interfaces.clone(),
        signature: signature_of(attributes).map(str::to_string),
        visible_annotations: annotated.visible,
        invisible_annotations: annotated.invisible,
        visible_type_annotations: annotated.visible_type,
        invisible_type_annotations: annotated.invisible_type,
        attributes: annotated.attributes,
        constant_pool: Some(Arc::new(class_file.snapshot())),
        ..ClassNode::default()
    };

    let mut packages = Vec::new();
    let mut main_class = None;
    for attr in attributes {
        match attr {
            AttributeInfo::SourceFile(source) if !skip_debug => {
                node.source_file = Some(source.clone())
            }
            AttributeInfo::SourceDebugExtension(debug) if !skip_debug => {
                node.source_debug = Some(debug.clone())
            }
            AttributeInfo::Module(module) => node.module = Some(module.clone()),
            AttributeInfo::ModulePackages(names) => packages.extend(names.iter().cloned()),
            AttributeInfo::ModuleMainClass(name) => main_class = Some(name.clone()),
            AttributeInfo::NestHost(host) => node.nest_host = Some(host.clone()),
            AttributeInfo::EnclosingMethod(outer) => node.outer_class = Some(outer.clone()),
            AttributeInfo::NestMembers(members) => {
                node.nest_members.extend(members.iter().cloned())
            }
            AttributeInfo::PermittedSubclasses(subclasses) => {
                node.permitted_subclasses.extend(subclasses.iter().cloned())
            }
            AttributeInfo::InnerClasses(classes) => {
                node.inner_classes.extend(classes.iter().cloned())
            }
            AttributeInfo::Record(components) => {
                for component in components {
                    node.record_components.push(to_record_component_node(component)?);
                }
            }
            _ => {}
        }
    }
    match node.module.as_mut() {
        Some(module) => {
            module.packages = packages;
            module.main_class = main_class;
        }
        None if !packages.is_empty() || main_class.is_some() => {
            log::debug!(
                "dropping module attributes of {}, which has no Module attribute",
                node.name
            );
        }
        None => {}
    }

    for field in &class_file.fields {
        node.fields.push(to_field_node(class_file, field)?);
    }
    for method in &class_file.methods {
        node.methods.push(to_method_node(class_file, method, flags)?);
    }
    Ok(node)
}

fn to_record_component_node(component: &RecordComponentInfo) -> Result<RecordComponentNode> {
    let annotated = Annotated::collect(&component.attributes)?;
    Ok(RecordComponentNode {
        name: component.name.clone(),
        descriptor: component.descriptor.clone(),
        signature: signature_of(&component.attributes).map(str::to_string),
        visible_annotations: annotated.visible,
        invisible_annotations: annotated.invisible,
        visible_type_annotations: annotated.visible_type,
        invisible_type_annotations: annotated.invisible_type,
        attributes: annotated.attributes,
    })
}

fn to_field_node(class_file: &ClassFile, field: &MemberInfo) -> Result<FieldNode> {
    let attributes = &field.attributes;
    let annotated = Annotated::collect(attributes)?;
    let value = attributes
        .iter()
        .find_map(|attr| match attr {
            AttributeInfo::ConstantValue(index) => Some(*index),
            _ => None,
        })
        .map(|index| -> Result<_> { to_model_constant(&class_file.constant(index)?) })
        .transpose()?;
    Ok(FieldNode {
        access: field.access_flags as u32 | attribute_flags(attributes),
        name: field.name.clone(),
        descriptor: field.descriptor.clone(),
        signature: signature_of(attributes).map(str::to_string),
        value,
        visible_annotations: annotated.visible,
        invisible_annotations: annotated.invisible,
        visible_type_annotations: annotated.visible_type,
        invisible_type_annotations: annotated.invisible_type,
        attributes: annotated.attributes,
    })
}

fn to_method_node(class_file: &ClassFile, method: &MemberInfo, flags: u32) -> Result<MethodNode> {
    let attributes = &method.attributes;
    let annotated = Annotated::collect(attributes)?;
    let mut node = MethodNode {
        access: method.access_flags as u32 | attribute_flags(attributes),
        name: method.name.clone(),
        descriptor: method.descriptor.clone(),
        signature: signature_of(attributes).map(str::to_string),
        visible_annotations: annotated.visible,
        invisible_annotations: annotated.invisible,
        visible_type_annotations: annotated.visible_type,
        invisible_type_annotations: annotated.invisible_type,
        attributes: annotated.attributes,
        ..MethodNode::default()
    };
    for attr in attributes {
        match attr {
            AttributeInfo::Exceptions(exceptions) => node.exceptions = exceptions.clone(),
            AttributeInfo::MethodParameters(parameters) if flags & SKIP_DEBUG == 0 => {
                node.parameters = parameters.clone()
            }
            AttributeInfo::AnnotationDefault(value) => {
                node.annotation_default = Some(value.clone())
            }
            AttributeInfo::ParameterAnnotations { visible: true, parameters } => {
                node.visible_parameter_annotations = Some(parameters.clone())
            }
            AttributeInfo::ParameterAnnotations { visible: false, parameters } => {
                node.invisible_parameter_annotations = Some(parameters.clone())
            }
            AttributeInfo::Code(code) if flags & SKIP_CODE == 0 => {
                node.code = Some(to_code_node(class_file, method, code, flags)?)
            }
            _ => {}
        }
    }
    Ok(node)
}

fn to_code_node(
    class_file: &ClassFile,
    method: &MemberInfo,
    code: &CodeAttribute,
    flags: u32,
) -> Result<CodeNode> {
    let insns = decode_code(&code.code)?;
    let skip_debug = flags & SKIP_DEBUG != 0;
    let type_annotations = code.type_annotations();

    let mut lines: BTreeMap<usize, Vec<u16>> = BTreeMap::new();
    let mut variables = Vec::new();
    let mut variable_types = Vec::new();
    if !skip_debug {
        for line in code.line_numbers() {
            lines.entry(line.start_pc as usize).or_default().push(line.line_number);
        }
        for attr in &code.attributes {
            match attr {
                AttributeInfo::LocalVariableTable(vars) => variables.extend(vars.iter()),
                AttributeInfo::LocalVariableTypeTable(vars) => variable_types.extend(vars.iter()),
                _ => {}
            }
        }
    }
    let frames = match code.stack_map() {
        Some(entries) if flags & SKIP_FRAMES == 0 => {
            let initial = initial_locals(
                &class_file.name,
                method.access_flags as u32,
                &method.name,
                &method.descriptor,
            );
            expand_frames(initial, entries.to_vec())?
        }
        _ => Vec::new(),
    };

    let mut offsets: BTreeSet<usize> = BTreeSet::new();
    for insn in &insns {
        offsets.extend(insn.branch_targets());
    }
    for entry in &code.exception_table {
        offsets.extend([entry.start_pc as usize, entry.end_pc as usize, entry.handler_pc as usize]);
    }
    offsets.extend(lines.keys().copied());
    for var in &variables {
        offsets.extend([var.start_pc as usize, var.start_pc as usize + var.length as usize]);
    }
    for (annotation, _) in &type_annotations {
        if let Some(position) = annotation.target.position() {
            offsets.insert(*position as usize);
        }
        for range in annotation.target.local_variable_ranges().unwrap_or(&[]) {
            offsets.extend([range.start as usize, range.end as usize]);
        }
    }
    for frame in &frames {
        offsets.insert(frame.offset as usize);
        for value in frame.locals.iter().chain(&frame.stack) {
            if let FrameType::Uninitialized(new) = value {
                offsets.insert(*new as usize);
            }
        }
    }
    check_label_offsets(offsets.iter().copied(), &insns, code.code.len())?;

    let mut node = CodeNode {
        max_stack: code.max_stack,
        max_locals: code.max_locals,
        ..CodeNode::default()
    };
    let labels: HashMap<usize, LabelNode> =
        offsets.iter().map(|offset| (*offset, node.new_label())).collect();
    let label = |offset: usize| -> Result<LabelNode> {
        labels
            .get(&offset)
            .copied()
            .ok_or_else(|| ClassReadError::InvalidOffset(offset as u32).into())
    };

    for insn in &insns {
        push_position(&mut node.elements, insn.offset, &labels, &lines);
        node.elements.push(CodeElement::Insn(to_insn(class_file, insn, &label)?));
    }
    push_position(&mut node.elements, code.code.len(), &labels, &lines);

    for entry in &code.exception_table {
        node.try_catch_blocks.push(TryCatchBlockNode {
            start: label(entry.start_pc as usize)?,
            end: label(entry.end_pc as usize)?,
            handler: label(entry.handler_pc as usize)?,
            catch_type: entry.catch_type.as_deref().map(ClassDesc::of_internal_name),
        });
    }
    for var in &variables {
        node.local_variables.push(LocalVariableNode {
            name: var.name.clone(),
            descriptor: var.descriptor.clone(),
            start: label(var.start_pc as usize)?,
            end: label(var.start_pc as usize + var.length as usize)?,
            slot: var.index,
        });
    }
    for var in &variable_types {
        let matched = variables.iter().any(|other| {
            other.start_pc == var.start_pc
                && other.length == var.length
                && other.name == var.name
                && other.index == var.index
        });
        if !matched {
            log::debug!(
                "dropping LocalVariableTypeTable entry {} without a LocalVariableTable match",
                var.name
            );
            continue;
        }
        node.local_variable_types.push(LocalVariableTypeNode {
            name: var.name.clone(),
            signature: var.descriptor.clone(),
            start: label(var.start_pc as usize)?,
            end: label(var.start_pc as usize + var.length as usize)?,
            slot: var.index,
        });
    }
    for frame in &frames {
        let mut verification_type = |value: &FrameType| -> Result<VerificationType> {
            Ok(match value {
                FrameType::Top => VerificationType::Top,
                FrameType::Integer => VerificationType::Integer,
                FrameType::Float => VerificationType::Float,
                FrameType::Double => VerificationType::Double,
                FrameType::Long => VerificationType::Long,
                FrameType::Null => VerificationType::Null,
                FrameType::UninitializedThis => VerificationType::UninitializedThis,
                FrameType::Object(name) => {
                    VerificationType::Object(ClassDesc::of_internal_name(name))
                }
                FrameType::Uninitialized(new) => {
                    VerificationType::Uninitialized(label(*new as usize)?)
                }
            })
        };
        let locals = frame.locals.iter().map(&mut verification_type).collect::<Result<Vec<_>>>()?;
        let stack = frame.stack.iter().map(&mut verification_type).collect::<Result<Vec<_>>>()?;
        node.frames.push(FrameNode {
            label: label(frame.offset as usize)?,
            locals,
            stack,
        });
    }
    for (annotation, visible) in type_annotations {
        let converted = annotation.clone().map_positions(|offset| label(offset as usize))?;
        if visible {
            node.visible_type_annotations.push(converted);
        } else {
            node.invisible_type_annotations.push(converted);
        }
    }
    for attr in &code.attributes {
        if let AttributeInfo::Unknown(attribute) = attr {
            node.attributes.push(attribute.clone());
        }
    }
    Ok(node)
}

/// Label and line numbers at `offset`, in that order.
fn push_position(
    elements: &mut Vec<CodeElement>,
    offset: usize,
    labels: &HashMap<usize, LabelNode>,
    lines: &BTreeMap<usize, Vec<u16>>,
) {
    if let Some(label) = labels.get(&offset) {
        elements.push(CodeElement::Label(*label));
    }
    for line in lines.get(&offset).into_iter().flatten() {
        elements.push(CodeElement::LineNumber(*line));
    }
}

fn to_insn(
    class_file: &ClassFile,
    insn: &ParsedInstruction,
    label: &impl Fn(usize) -> Result<LabelNode>,
) -> Result<Insn> {
    let cp = &class_file.constant_pool;
    let opcode = insn.opcode;
    let converted = match &insn.operand {
        Operand::None => Insn::simple(opcode),
        Operand::Int(code) if opcode == NEWARRAY => {
            TypeKind::from_newarray_code(*code as u8).map(Insn::NewPrimitiveArray)
        }
        Operand::Int(value) => Some(Insn::Push { opcode, value: *value }),
        Operand::Local(slot) => Insn::var(opcode, *slot),
        Operand::Iinc { index, increment } => Some(Insn::Increment {
            slot: *index,
            constant: *increment,
        }),
        Operand::Constant(index) => {
            Some(Insn::Ldc(to_model_constant(&class_file.constant(*index)?)?))
        }
        Operand::Member(index) => {
            let member = cp.member_ref(*index)?;
            let owner = ClassDesc::of_internal_name(member.owner);
            if (GETSTATIC..=PUTFIELD).contains(&opcode) {
                Some(Insn::Field {
                    opcode,
                    owner,
                    name: member.name.to_string(),
                    descriptor: member.descriptor.to_string(),
                })
            } else {
                Some(Insn::Invoke {
                    opcode,
                    owner,
                    name: member.name.to_string(),
                    descriptor: member.descriptor.to_string(),
                    is_interface: member.is_interface,
                })
            }
        }
        Operand::InvokeDynamic(index) => {
            let (bootstrap_index, name, descriptor) = cp.dynamic(*index)?;
            let (handle, arguments) = class_file.bootstrap(bootstrap_index)?;
            Some(Insn::InvokeDynamic(to_model_call_site(name, descriptor, &handle, &arguments)?))
        }
        Operand::Class(index) => {
            let class = ClassDesc::of_internal_name(cp.class_name(*index)?);
            match opcode {
                NEW => Some(Insn::NewObject(class)),
                ANEWARRAY => Some(Insn::NewReferenceArray(class)),
                _ => Some(Insn::TypeCheck { opcode, class }),
            }
        }
        Operand::Branch(target) => Some(Insn::Branch {
            opcode,
            target: label(*target)?,
        }),
        Operand::TableSwitch {
            default,
            low,
            high,
            targets,
        } => Some(Insn::TableSwitch {
            low: *low,
            high: *high,
            default: label(*default)?,
            targets: targets.iter().map(|target| label(*target)).collect::<Result<_>>()?,
        }),
        Operand::LookupSwitch { default, pairs } => Some(Insn::LookupSwitch {
            default: label(*default)?,
            cases: pairs
                .iter()
                .map(|(key, target)| Ok((*key, label(*target)?)))
                .collect::<Result<_>>()?,
        }),
        Operand::MultiANewArray { index, dimensions } => Some(Insn::NewMultiArray {
            array_type: ClassDesc::of_internal_name(cp.class_name(*index)?),
            dimensions: *dimensions,
        }),
    };
    converted.ok_or_else(|| {
        ClassReadError::InvalidOpcode {
            opcode,
            offset: insn.offset,
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_writer::ClassWriter;
    use crate::types::{Constant, Frame};
    use crate::visitor::{ClassVisitor, FieldVisitor, Label, MethodVisitor};
    use pretty_assertions::assert_eq;

    /// `static int pick(boolean b) { return b ? 1 : 2; }` with a line table.
    fn pick_class() -> Vec<u8> {
        let mut cw = ClassWriter::new(0);
        cw.visit(V17, 0, ACC_PUBLIC, "demo/Pick", None, Some("java/lang/Object"), &[])
            .unwrap();
        cw.visit_source(Some("Pick.java"), None).unwrap();
        {
            let mut fv = cw
                .visit_field(
                    ACC_STATIC | ACC_FINAL,
                    "LIMIT",
                    "J",
                    None,
                    Some(&Constant::Long(7)),
                )
                .unwrap()
                .unwrap();
            fv.visit_end().unwrap();
        }
        {
            let mut mv = cw
                .visit_method(ACC_STATIC, "pick", "(Z)I", None, &[])
                .unwrap()
                .unwrap();
            let start = Label::new();
            let other = Label::new();
            mv.visit_code().unwrap();
            mv.visit_label(start).unwrap();
            mv.visit_line_number(3, start).unwrap();
            mv.visit_var_insn(ILOAD, 0).unwrap();
            mv.visit_jump_insn(IFEQ, other).unwrap();
            mv.visit_insn(ICONST_1).unwrap();
            mv.visit_insn(IRETURN).unwrap();
            mv.visit_label(other).unwrap();
            mv.visit_frame(&Frame::Same).unwrap();
            mv.visit_insn(ICONST_2).unwrap();
            mv.visit_insn(IRETURN).unwrap();
            mv.visit_maxs(1, 1).unwrap();
            mv.visit_end().unwrap();
        }
        cw.visit_end().unwrap();
        cw.to_bytes().unwrap()
    }

    #[test]
    fn code_becomes_labeled_elements() {
        let node = read_class_node(&pick_class(), &NodeReadOptions::default()).unwrap();
        assert_eq!(node.source_file.as_deref(), Some("Pick.java"));
        assert_eq!(
            node.field("LIMIT").and_then(|f| f.value.clone()),
            Some(crate::desc::ConstantDesc::Long(7))
        );

        let code = node.method("pick", "(Z)I").and_then(|m| m.code.as_ref()).unwrap();
        let CodeElement::Label(start) = code.elements[0] else {
            panic!("expected a label, got {:?}", code.elements[0]);
        };
        assert_eq!(code.elements[1], CodeElement::LineNumber(3));
        assert_eq!(
            code.elements[2],
            CodeElement::Insn(Insn::Load {
                kind: TypeKind::Int,
                slot: 0
            })
        );
        let CodeElement::Insn(Insn::Branch { opcode: IFEQ, target }) = code.elements[3] else {
            panic!("expected a branch, got {:?}", code.elements[3]);
        };
        assert_ne!(start, target);
        let frame = code.frame_at(target).unwrap();
        assert_eq!(frame.locals, vec![VerificationType::Integer]);
        assert!(frame.stack.is_empty());
        assert_eq!(code.instructions().count(), 6);
        assert_eq!(code.label_count(), 2);
    }

    #[test]
    fn skip_flags_drop_debug_and_code() {
        let bytes = pick_class();
        let options = NodeReadOptions::new(SKIP_DEBUG | SKIP_FRAMES);
        let node = read_class_node(&bytes, &options).unwrap();
        assert_eq!(node.source_file, None);
        let code = node.method("pick", "(Z)I").and_then(|m| m.code.as_ref()).unwrap();
        assert!(code.frames.is_empty());
        assert!(!code.elements.iter().any(|e| matches!(e, CodeElement::LineNumber(_))));
        assert_eq!(code.label_count(), 1);

        let node = read_class_node(&bytes, &NodeReadOptions::new(SKIP_CODE)).unwrap();
        assert!(node.methods.iter().all(|m| m.code.is_none()));
    }

    #[test]
    fn versions_up_to_the_structured_ceiling_are_accepted() {
        let mut bytes = pick_class();
        bytes[6..8].copy_from_slice(&V25.to_be_bytes());
        let node = read_class_node(&bytes, &NodeReadOptions::default()).unwrap();
        assert_eq!(node.major_version, V25);
        bytes[6..8].copy_from_slice(&(V25 + 1).to_be_bytes());
        assert!(matches!(
            read_class_node(&bytes, &NodeReadOptions::default()),
            Err(Error::UnsupportedVersion { major: 70, ceiling: 69 })
        ));
    }
}
