//! Assembles a [`ClassNode`] from visitor calls.

use std::collections::HashSet;

use crate::annotation::{Annotation, AnnotationNodeBuilder, LocalVarTarget, TargetInfo};
use crate::attribute::Attribute;
use crate::bridge::annotations::{annotation_sink, type_annotation_sink};
use crate::bridge::constants::{to_model_call_site, to_model_constant};
use crate::bridge::frames::{to_model_verification_type, to_visitor_frame_value, FrameExpander};
use crate::bridge::labels::LabelMap;
use crate::builder::{initial_frame, referenced_labels};
use crate::class_writer::ModuleWriter;
use crate::constants::*;
use crate::desc::ClassDesc;
use crate::error::{ClassWriteError, Error, Result};
use crate::frame::parameter_descriptors;
use crate::guard::FailureFlag;
use crate::insn::{CodeElement, Insn, LabelNode, TypeKind};
use crate::node_writer::{write_class_node, NodeWriteOptions};
use crate::nodes::{
    ClassNode, CodeNode, FieldNode, FrameNode, InnerClassNode, LocalVariableNode,
    LocalVariableTypeNode, MethodNode, ModuleNode, OuterClassNode, ParameterNode,
    RecordComponentNode, TryCatchBlockNode,
};
use crate::opcodes::*;
use crate::types::{Constant, Frame, Handle, TypePath, TypeReference};
use crate::visitor::{
    AnnotationVisitor, ClassVisitor, FieldVisitor, Label, MethodVisitor, ModuleVisitor,
    RecordComponentVisitor,
};

fn annotation_list<'v, T>(
    visible: bool,
    shown: &'v mut Vec<T>,
    hidden: &'v mut Vec<T>,
) -> &'v mut Vec<T> {
    if visible {
        shown
    } else {
        hidden
    }
}

/// A [`ClassVisitor`] that builds the structured model of the visited
/// class.
///
/// ```
/// use classfile_bridge::bridge::ClassNodeWriter;
/// use classfile_bridge::constants::{ACC_PUBLIC, V21};
/// use classfile_bridge::visitor::ClassVisitor;
///
/// # fn main() -> classfile_bridge::error::Result<()> {
/// let mut writer = ClassNodeWriter::new();
/// writer.visit(V21, 0, ACC_PUBLIC, "demo/Empty", None, Some("java/lang/Object"), &[])?;
/// writer.visit_end()?;
/// let node = writer.into_class_node()?;
/// assert_eq!(node.name, "demo/Empty");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ClassNodeWriter {
    node: ClassNode,
    finished: bool,
    failed: FailureFlag,
}

impl ClassNodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The finished model. Fails before `visit_end` and after any failed
    /// visit.
    pub fn into_class_node(self) -> Result<ClassNode> {
        self.failed.ensure_clear(&self.node.name)?;
        if !self.finished {
            return Err(Error::protocol("into_class_node called before visit_end"));
        }
        Ok(self.node)
    }

    /// Serializes the finished model with the structured codec.
    pub fn to_bytes(&self, options: &NodeWriteOptions) -> Result<Vec<u8>> {
        self.failed.ensure_clear(&self.node.name)?;
        if !self.finished {
            return Err(Error::protocol("to_bytes called before visit_end"));
        }
        write_class_node(&self.node, options)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            return Err(Error::protocol("class visited after visit_end"));
        }
        Ok(())
    }
}

impl ClassVisitor for ClassNodeWriter {
    fn visit(
        &mut self,
        major: u16,
        minor: u16,
        access: u32,
        name: &str,
        signature: Option<&str>,
        super_name: Option<&str>,
        interfaces: &[String],
    ) -> Result<()> {
        self.failed.check(self.ensure_open())?;
        if major > STRUCTURED_CODEC_MAX_MAJOR {
            return self.failed.check(Err(Error::UnsupportedVersion {
                major,
                ceiling: STRUCTURED_CODEC_MAX_MAJOR,
            }));
        }
        let node = &mut self.node;
        node.major_version = major;
        node.minor_version = minor;
        node.access = access;
        node.name = name.to_string();
        node.signature = signature.map(str::to_string);
        node.super_name = super_name.map(str::to_string);
        node.interfaces = interfaces.to_vec();
        Ok(())
    }

    fn visit_source(&mut self, source: Option<&str>, debug: Option<&str>) -> Result<()> {
        self.node.source_file = source.map(str::to_string);
        self.node.source_debug = debug.map(str::to_string);
        Ok(())
    }

    fn visit_module(
        &mut self,
        name: &str,
        access: u32,
        version: Option<&str>,
    ) -> Result<Option<Box<dyn ModuleVisitor + '_>>> {
        let module = self.node.module.insert(ModuleNode {
            name: name.to_string(),
            access,
            version: version.map(str::to_string),
            ..ModuleNode::default()
        });
        Ok(Some(self.failed.guard(Box::new(ModuleWriter { module }))))
    }

    fn visit_nest_host(&mut self, nest_host: &str) -> Result<()> {
        self.node.nest_host = Some(nest_host.to_string());
        Ok(())
    }

    fn visit_outer_class(
        &mut self,
        owner: &str,
        name: Option<&str>,
        descriptor: Option<&str>,
    ) -> Result<()> {
        self.node.outer_class = Some(OuterClassNode {
            owner: owner.to_string(),
            method_name: name.map(str::to_string),
            method_descriptor: descriptor.map(str::to_string),
        });
        Ok(())
    }

    fn visit_annotation(
        &mut self,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        let node = &mut self.node;
        let list = annotation_list(
            visible,
            &mut node.visible_annotations,
            &mut node.invisible_annotations,
        );
        self.failed.child(Ok(annotation_sink(list, descriptor)))
    }

    fn visit_type_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        let target = self.failed.check(TargetInfo::from_type_reference(type_ref))?;
        let node = &mut self.node;
        let list = annotation_list(
            visible,
            &mut node.visible_type_annotations,
            &mut node.invisible_type_annotations,
        );
        self.failed.child(type_annotation_sink(list, target, type_path, descriptor))
    }

    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.node.attributes.push(attribute.clone());
        Ok(())
    }

    fn visit_nest_member(&mut self, nest_member: &str) -> Result<()> {
        self.node.nest_members.push(nest_member.to_string());
        Ok(())
    }

    fn visit_permitted_subclass(&mut self, permitted_subclass: &str) -> Result<()> {
        self.node.permitted_subclasses.push(permitted_subclass.to_string());
        Ok(())
    }

    fn visit_inner_class(
        &mut self,
        name: &str,
        outer_name: Option<&str>,
        inner_name: Option<&str>,
        access: u32,
    ) -> Result<()> {
        self.node.inner_classes.push(InnerClassNode {
            name: name.to_string(),
            outer_name: outer_name.map(str::to_string),
            inner_name: inner_name.map(str::to_string),
            access,
        });
        Ok(())
    }

    fn visit_record_component(
        &mut self,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
    ) -> Result<Option<Box<dyn RecordComponentVisitor + '_>>> {
        let components = &mut self.node.record_components;
        let index = components.len();
        components.push(RecordComponentNode {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            signature: signature.map(str::to_string),
            ..RecordComponentNode::default()
        });
        Ok(Some(self.failed.guard(Box::new(RecordComponentNodeWriter {
            component: &mut components[index],
        }))))
    }

    fn visit_field(
        &mut self,
        access: u32,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        value: Option<&Constant>,
    ) -> Result<Option<Box<dyn FieldVisitor + '_>>> {
        let value = self.failed.check(value.map(to_model_constant).transpose())?;
        let fields = &mut self.node.fields;
        let index = fields.len();
        fields.push(FieldNode {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            signature: signature.map(str::to_string),
            value,
            ..FieldNode::default()
        });
        Ok(Some(self.failed.guard(Box::new(FieldNodeWriter {
            field: &mut fields[index],
        }))))
    }

    fn visit_method(
        &mut self,
        access: u32,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        exceptions: &[String],
    ) -> Result<Option<Box<dyn MethodVisitor + '_>>> {
        let ClassNode {
            name: owner, methods, ..
        } = &mut self.node;
        let index = methods.len();
        methods.push(MethodNode {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            signature: signature.map(str::to_string),
            exceptions: exceptions.to_vec(),
            ..MethodNode::default()
        });
        Ok(Some(self.failed.guard(Box::new(MethodNodeWriter {
            owner: owner.as_str(),
            method: &mut methods[index],
            code: None,
        }))))
    }

    fn visit_end(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.failed.ensure_clear(&self.node.name)?;
        log::trace!(
            "assembled model of class {} with {} method(s)",
            self.node.name,
            self.node.methods.len()
        );
        self.finished = true;
        Ok(())
    }
}

struct RecordComponentNodeWriter<'a> {
    component: &'a mut RecordComponentNode,
}

impl RecordComponentVisitor for RecordComponentNodeWriter<'_> {
    fn visit_annotation(
        &mut self,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        let component = &mut *self.component;
        let list = annotation_list(
            visible,
            &mut component.visible_annotations,
            &mut component.invisible_annotations,
        );
        Ok(annotation_sink(list, descriptor))
    }

    fn visit_type_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        let target = TargetInfo::from_type_reference(type_ref)?;
        let component = &mut *self.component;
        let list = annotation_list(
            visible,
            &mut component.visible_type_annotations,
            &mut component.invisible_type_annotations,
        );
        type_annotation_sink(list, target, type_path, descriptor)
    }

    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.component.attributes.push(attribute.clone());
        Ok(())
    }
}

struct FieldNodeWriter<'a> {
    field: &'a mut FieldNode,
}

impl FieldVisitor for FieldNodeWriter<'_> {
    fn visit_annotation(
        &mut self,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        let field = &mut *self.field;
        let list = annotation_list(
            visible,
            &mut field.visible_annotations,
            &mut field.invisible_annotations,
        );
        Ok(annotation_sink(list, descriptor))
    }

    fn visit_type_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        let target = TargetInfo::from_type_reference(type_ref)?;
        let field = &mut *self.field;
        let list = annotation_list(
            visible,
            &mut field.visible_type_annotations,
            &mut field.invisible_type_annotations,
        );
        type_annotation_sink(list, target, type_path, descriptor)
    }

    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.field.attributes.push(attribute.clone());
        Ok(())
    }
}

/// Holds the last visited instruction until the next event shows nothing
/// has to be placed in front of it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelayBuffer {
    pending: Option<Insn>,
}

impl DelayBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `insn` and hands back the instruction it displaces.
    pub fn push(&mut self, insn: Insn) -> Option<Insn> {
        self.pending.replace(insn)
    }

    pub fn take(&mut self) -> Option<Insn> {
        self.pending.take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// A body under construction.
#[derive(Debug, Default)]
struct CodeState {
    node: CodeNode,
    labels: LabelMap<Label, LabelNode>,
    bound: HashSet<LabelNode>,
    pending: DelayBuffer,
    /// The label placed after the last instruction, if any.
    trailing_label: Option<LabelNode>,
    /// Label in front of the instruction the last annotation went to.
    annotated: Option<LabelNode>,
    /// Line numbers whose label is not placed yet.
    early_lines: Vec<(u16, LabelNode)>,
    frames: FrameExpander,
}

impl CodeState {
    fn label(&mut self, label: Label) -> LabelNode {
        let node = &mut self.node;
        self.labels.resolve(label, || node.new_label())
    }

    fn flush(&mut self) {
        if let Some(insn) = self.pending.take() {
            self.node.elements.push(CodeElement::Insn(insn));
            self.trailing_label = None;
        }
    }

    fn emit(&mut self, insn: Insn) {
        if let Some(previous) = self.pending.push(insn) {
            self.node.elements.push(CodeElement::Insn(previous));
        }
        self.trailing_label = None;
        self.annotated = None;
    }

    fn place(&mut self, label: LabelNode) -> Result<()> {
        if !self.bound.insert(label) {
            return Err(Error::protocol(format!("label L{} visited twice", label.id())));
        }
        self.node.elements.push(CodeElement::Label(label));
        self.trailing_label = Some(label);
        Ok(())
    }

    fn bind(&mut self, label: Label) -> Result<()> {
        self.flush();
        self.annotated = None;
        let label = self.label(label);
        self.place(label)?;
        let (now, later): (Vec<_>, Vec<_>) =
            self.early_lines.drain(..).partition(|(_, start)| *start == label);
        self.early_lines = later;
        for (line, _) in now {
            self.node.elements.push(CodeElement::LineNumber(line));
        }
        Ok(())
    }

    /// Places `line` after the label `start` and the lines already there.
    fn line_number(&mut self, line: u16, start: Label) {
        self.flush();
        let start = self.label(start);
        let elements = &mut self.node.elements;
        let placed = elements.iter().position(|element| *element == CodeElement::Label(start));
        let Some(at) = placed else {
            self.early_lines.push((line, start));
            return;
        };
        let mut at = at + 1;
        while matches!(elements.get(at), Some(CodeElement::LineNumber(_))) {
            at += 1;
        }
        elements.insert(at, CodeElement::LineNumber(line));
    }

    /// The label for the frame at the current point, placing one when the
    /// last element is an instruction.
    fn frame_label(&mut self) -> Result<LabelNode> {
        if let Some(label) = self.trailing_label {
            return Ok(label);
        }
        let label = self.node.new_label();
        self.place(label)?;
        Ok(label)
    }

    fn finish(mut self) -> Result<CodeNode> {
        self.flush();
        if let Some((line, _)) = self.early_lines.first() {
            return Err(ClassWriteError::UnboundLabel(format!("start of line {line}")).into());
        }
        for label in referenced_labels(&self.node) {
            if !self.bound.contains(&label) {
                return Err(ClassWriteError::UnboundLabel(format!("L{}", label.id())).into());
            }
        }
        Ok(self.node)
    }
}

struct MethodNodeWriter<'a> {
    owner: &'a str,
    method: &'a mut MethodNode,
    code: Option<CodeState>,
}

impl MethodNodeWriter<'_> {
    fn code(&mut self) -> Result<&mut CodeState> {
        self.code
            .as_mut()
            .ok_or_else(|| Error::protocol("instruction visited before visit_code"))
    }

    fn emit(&mut self, insn: Option<Insn>, what: impl FnOnce() -> String) -> Result<()> {
        let insn = insn.ok_or_else(|| Error::protocol(what()))?;
        self.code()?.emit(insn);
        Ok(())
    }

    fn code_annotation(
        &mut self,
        target: TargetInfo<LabelNode>,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        let node = &mut self.code()?.node;
        let list = annotation_list(
            visible,
            &mut node.visible_type_annotations,
            &mut node.invisible_type_annotations,
        );
        type_annotation_sink(list, target, type_path, descriptor)
    }
}

impl MethodVisitor for MethodNodeWriter<'_> {
    fn visit_parameter(&mut self, name: Option<&str>, access: u32) -> Result<()> {
        self.method.parameters.push(ParameterNode {
            name: name.map(str::to_string),
            access,
        });
        Ok(())
    }

    fn visit_annotation_default(&mut self) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(Some(Box::new(AnnotationNodeBuilder::for_default(
            &mut self.method.annotation_default,
        ))))
    }

    fn visit_annotation(
        &mut self,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        let method = &mut *self.method;
        let list = annotation_list(
            visible,
            &mut method.visible_annotations,
            &mut method.invisible_annotations,
        );
        Ok(annotation_sink(list, descriptor))
    }

    fn visit_type_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        let target = TargetInfo::from_type_reference(type_ref)?;
        let method = &mut *self.method;
        let list = annotation_list(
            visible,
            &mut method.visible_type_annotations,
            &mut method.invisible_type_annotations,
        );
        type_annotation_sink(list, target, type_path, descriptor)
    }

    fn visit_annotable_parameter_count(&mut self, count: u8, visible: bool) -> Result<()> {
        let parameters = vec![Vec::new(); count as usize];
        if visible {
            self.method.visible_parameter_annotations = Some(parameters);
        } else {
            self.method.invisible_parameter_annotations = Some(parameters);
        }
        Ok(())
    }

    fn visit_parameter_annotation(
        &mut self,
        parameter: u8,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        let method = &mut *self.method;
        let declared = parameter_descriptors(&method.descriptor).len();
        let slot = if visible {
            &mut method.visible_parameter_annotations
        } else {
            &mut method.invisible_parameter_annotations
        };
        let parameters: &mut Vec<Vec<Annotation>> =
            slot.get_or_insert_with(|| vec![Vec::new(); declared]);
        let index = parameter as usize;
        if index >= parameters.len() {
            parameters.resize(index + 1, Vec::new());
        }
        Ok(annotation_sink(&mut parameters[index], descriptor))
    }

    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.method.attributes.push(attribute.clone());
        Ok(())
    }

    fn visit_code(&mut self) -> Result<()> {
        let initial = initial_frame(self.owner, &*self.method)
            .iter()
            .map(|value| to_visitor_frame_value(value, &mut |_| Label::new()))
            .collect();
        self.code = Some(CodeState {
            frames: FrameExpander::new(initial),
            ..CodeState::default()
        });
        Ok(())
    }

    fn visit_frame(&mut self, frame: &Frame) -> Result<()> {
        let code = self.code()?;
        code.flush();
        let (locals, stack) = code.frames.expand(frame)?;
        let label = code.frame_label()?;
        if code.node.frames.last().is_some_and(|last| last.label == label) {
            return Err(Error::protocol(format!("two frames at label L{}", label.id())));
        }
        let locals = locals
            .iter()
            .map(|value| to_model_verification_type(value, &mut |label| code.label(label)))
            .collect();
        let stack = stack
            .iter()
            .map(|value| to_model_verification_type(value, &mut |label| code.label(label)))
            .collect();
        code.node.frames.push(FrameNode { label, locals, stack });
        Ok(())
    }

    fn visit_insn(&mut self, opcode: u8) -> Result<()> {
        self.emit(Insn::simple(opcode), || format!("opcode {opcode:#04x} takes operands"))
    }

    fn visit_int_insn(&mut self, opcode: u8, operand: i32) -> Result<()> {
        let insn = match opcode {
            _ if !int_operand_fits(opcode, operand) => None,
            BIPUSH | SIPUSH => Some(Insn::Push { opcode, value: operand }),
            NEWARRAY => TypeKind::from_newarray_code(operand as u8).map(Insn::NewPrimitiveArray),
            _ => None,
        };
        self.emit(insn, || format!("invalid int instruction {opcode:#04x} {operand}"))
    }

    fn visit_var_insn(&mut self, opcode: u8, var: u16) -> Result<()> {
        self.emit(Insn::var(opcode, var), || {
            format!("opcode {opcode:#04x} is not a variable instruction")
        })
    }

    fn visit_type_insn(&mut self, opcode: u8, type_name: &str) -> Result<()> {
        let class = ClassDesc::of_internal_name(type_name);
        let insn = match opcode {
            NEW => Some(Insn::NewObject(class)),
            ANEWARRAY => Some(Insn::NewReferenceArray(class)),
            CHECKCAST | INSTANCEOF => Some(Insn::TypeCheck { opcode, class }),
            _ => None,
        };
        self.emit(insn, || format!("opcode {opcode:#04x} is not a type instruction"))
    }

    fn visit_field_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<()> {
        let insn = (GETSTATIC..=PUTFIELD).contains(&opcode).then(|| Insn::Field {
            opcode,
            owner: ClassDesc::of_internal_name(owner),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        });
        self.emit(insn, || format!("opcode {opcode:#04x} is not a field instruction"))
    }

    fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<()> {
        let insn = (INVOKEVIRTUAL..=INVOKEINTERFACE).contains(&opcode).then(|| Insn::Invoke {
            opcode,
            owner: ClassDesc::of_internal_name(owner),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            is_interface,
        });
        self.emit(insn, || format!("opcode {opcode:#04x} is not a method instruction"))
    }

    fn visit_invoke_dynamic_insn(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap_method: &Handle,
        bootstrap_arguments: &[Constant],
    ) -> Result<()> {
        let site = to_model_call_site(name, descriptor, bootstrap_method, bootstrap_arguments)?;
        self.code()?.emit(Insn::InvokeDynamic(site));
        Ok(())
    }

    fn visit_jump_insn(&mut self, opcode: u8, label: Label) -> Result<()> {
        if !matches!(opcode, IFEQ..=JSR | IFNULL | IFNONNULL) {
            return Err(Error::protocol(format!("opcode {opcode:#04x} is not a jump")));
        }
        let code = self.code()?;
        let target = code.label(label);
        code.emit(Insn::Branch { opcode, target });
        Ok(())
    }

    fn visit_label(&mut self, label: Label) -> Result<()> {
        self.code()?.bind(label)
    }

    fn visit_ldc_insn(&mut self, value: &Constant) -> Result<()> {
        let value = to_model_constant(value)?;
        self.code()?.emit(Insn::Ldc(value));
        Ok(())
    }

    fn visit_iinc_insn(&mut self, var: u16, increment: i16) -> Result<()> {
        self.code()?.emit(Insn::Increment {
            slot: var,
            constant: increment,
        });
        Ok(())
    }

    fn visit_table_switch_insn(
        &mut self,
        min: i32,
        max: i32,
        default: Label,
        labels: &[Label],
    ) -> Result<()> {
        if max < min || (max as i64 - min as i64 + 1) as usize != labels.len() {
            return Err(Error::protocol(format!(
                "tableswitch {min}..={max} has {} targets",
                labels.len()
            )));
        }
        let code = self.code()?;
        let default = code.label(default);
        let targets = labels.iter().map(|label| code.label(*label)).collect();
        code.emit(Insn::TableSwitch {
            low: min,
            high: max,
            default,
            targets,
        });
        Ok(())
    }

    fn visit_lookup_switch_insn(
        &mut self,
        default: Label,
        keys: &[i32],
        labels: &[Label],
    ) -> Result<()> {
        if keys.len() != labels.len() {
            return Err(Error::protocol("lookupswitch keys and targets differ in length"));
        }
        let code = self.code()?;
        let default = code.label(default);
        let cases = keys
            .iter()
            .zip(labels)
            .map(|(key, label)| (*key, code.label(*label)))
            .collect();
        code.emit(Insn::LookupSwitch { default, cases });
        Ok(())
    }

    fn visit_multi_anew_array_insn(&mut self, descriptor: &str, dimensions: u8) -> Result<()> {
        self.code()?.emit(Insn::NewMultiArray {
            array_type: ClassDesc::of_internal_name(descriptor),
            dimensions,
        });
        Ok(())
    }

    fn visit_insn_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        let code = self.code()?;
        let position = if code.pending.is_pending() {
            let label = code.node.new_label();
            code.place(label)?;
            code.flush();
            code.annotated = Some(label);
            label
        } else {
            code.annotated.ok_or_else(|| {
                Error::protocol("instruction annotation without a pending instruction")
            })?
        };
        let target = TargetInfo::at_position(type_ref, position)?;
        self.code_annotation(target, type_path, descriptor, visible)
    }

    fn visit_try_catch_block(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> Result<()> {
        let code = self.code()?;
        code.flush();
        let block = TryCatchBlockNode {
            start: code.label(start),
            end: code.label(end),
            handler: code.label(handler),
            catch_type: catch_type.map(ClassDesc::of_internal_name),
        };
        code.node.try_catch_blocks.push(block);
        Ok(())
    }

    fn visit_try_catch_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        let target = TargetInfo::from_type_reference(type_ref)?;
        self.code_annotation(target, type_path, descriptor, visible)
    }

    fn visit_local_variable(
        &mut self,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        start: Label,
        end: Label,
        index: u16,
    ) -> Result<()> {
        let code = self.code()?;
        code.flush();
        let start = code.label(start);
        let end = code.label(end);
        code.node.local_variables.push(LocalVariableNode {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            start,
            end,
            slot: index,
        });
        if let Some(signature) = signature {
            code.node.local_variable_types.push(LocalVariableTypeNode {
                name: name.to_string(),
                signature: signature.to_string(),
                start,
                end,
                slot: index,
            });
        }
        Ok(())
    }

    fn visit_local_variable_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        start: &[Label],
        end: &[Label],
        index: &[u16],
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        if start.len() != end.len() || start.len() != index.len() {
            return Err(Error::protocol("local variable annotation ranges differ in length"));
        }
        let code = self.code()?;
        let ranges = start
            .iter()
            .zip(end)
            .zip(index)
            .map(|((start, end), index)| LocalVarTarget {
                start: code.label(*start),
                end: code.label(*end),
                index: *index,
            })
            .collect();
        let target = TargetInfo::local_variable(type_ref, ranges)?;
        self.code_annotation(target, type_path, descriptor, visible)
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<()> {
        self.code()?.line_number(line, start);
        Ok(())
    }

    fn visit_code_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.code()?.node.attributes.push(attribute.clone());
        Ok(())
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) -> Result<()> {
        let code = self.code()?;
        code.flush();
        code.node.max_stack = max_stack;
        code.node.max_locals = max_locals;
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        if let Some(code) = self.code.take() {
            log::trace!("assembled body of {}{}", self.method.name, self.method.descriptor);
            self.method.code = Some(code.finish()?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::VerificationType;
    use crate::types::AnnotationValue;
    use pretty_assertions::assert_eq;

    fn class_writer() -> ClassNodeWriter {
        let mut writer = ClassNodeWriter::new();
        writer
            .visit(V17, 0, ACC_PUBLIC, "demo/Flag", None, Some("java/lang/Object"), &[])
            .unwrap();
        writer
    }

    #[test]
    fn delay_buffer_holds_one_instruction() {
        let mut buffer = DelayBuffer::new();
        assert!(!buffer.is_pending());
        assert_eq!(buffer.push(Insn::Nop), None);
        assert_eq!(buffer.push(Insn::Throw), Some(Insn::Nop));
        assert!(buffer.is_pending());
        assert_eq!(buffer.take(), Some(Insn::Throw));
        assert_eq!(buffer.take(), None);
    }

    #[test]
    fn calls_become_elements_and_tables() {
        let mut writer = class_writer();
        {
            let mut mv = writer
                .visit_method(ACC_STATIC, "flag", "(I)I", None, &[])
                .unwrap()
                .unwrap();
            let (start, other, end) = (Label::new(), Label::new(), Label::new());
            mv.visit_code().unwrap();
            mv.visit_label(start).unwrap();
            mv.visit_line_number(5, start).unwrap();
            mv.visit_var_insn(ILOAD, 0).unwrap();
            mv.visit_jump_insn(IFEQ, other).unwrap();
            mv.visit_insn(ICONST_1).unwrap();
            mv.visit_insn(IRETURN).unwrap();
            mv.visit_label(other).unwrap();
            mv.visit_frame(&Frame::Same).unwrap();
            mv.visit_insn(ICONST_0).unwrap();
            mv.visit_insn(IRETURN).unwrap();
            mv.visit_label(end).unwrap();
            mv.visit_local_variable("x", "I", None, start, end, 0).unwrap();
            mv.visit_maxs(1, 1).unwrap();
            mv.visit_end().unwrap();
        }
        writer.visit_end().unwrap();
        let node = writer.into_class_node().unwrap();
        let code = node.method("flag", "(I)I").and_then(|m| m.code.as_ref()).unwrap();

        let (start, other, end) = (LabelNode(0), LabelNode(1), LabelNode(2));
        assert_eq!(
            code.elements,
            vec![
                CodeElement::Label(start),
                CodeElement::LineNumber(5),
                CodeElement::Insn(Insn::Load {
                    kind: TypeKind::Int,
                    slot: 0
                }),
                CodeElement::Insn(Insn::Branch {
                    opcode: IFEQ,
                    target: other
                }),
                CodeElement::Insn(Insn::ConstantIntrinsic(ICONST_1)),
                CodeElement::Insn(Insn::Return(TypeKind::Int)),
                CodeElement::Label(other),
                CodeElement::Insn(Insn::ConstantIntrinsic(ICONST_0)),
                CodeElement::Insn(Insn::Return(TypeKind::Int)),
                CodeElement::Label(end),
            ]
        );
        assert_eq!(
            code.frames,
            vec![FrameNode {
                label: other,
                locals: vec![VerificationType::Integer],
                stack: Vec::new(),
            }]
        );
        assert_eq!(code.local_variables[0].start, start);
        assert_eq!(code.local_variables[0].end, end);
        assert!(code.local_variable_types.is_empty());
        assert_eq!((code.max_stack, code.max_locals), (1, 1));
    }

    #[test]
    fn instruction_annotations_get_a_fresh_label() {
        let mut writer = class_writer();
        {
            let mut mv = writer
                .visit_method(ACC_STATIC, "cast", "(Ljava/lang/Object;)V", None, &[])
                .unwrap()
                .unwrap();
            mv.visit_code().unwrap();
            mv.visit_var_insn(ALOAD, 0).unwrap();
            mv.visit_type_insn(CHECKCAST, "java/lang/String").unwrap();
            for descriptor in ["Ldemo/A;", "Ldemo/B;"] {
                let cast = TypeReference::type_argument(TypeReference::CAST, 0);
                drop(mv.visit_insn_annotation(cast, None, descriptor, true).unwrap());
            }
            mv.visit_insn(POP).unwrap();
            mv.visit_insn(RETURN).unwrap();
            mv.visit_maxs(1, 1).unwrap();
            mv.visit_end().unwrap();
        }
        writer.visit_end().unwrap();
        let node = writer.into_class_node().unwrap();
        let code = node.methods[0].code.as_ref().unwrap();

        let fresh = LabelNode(0);
        assert_eq!(code.elements[1], CodeElement::Label(fresh));
        assert!(matches!(code.elements[2], CodeElement::Insn(Insn::TypeCheck { .. })));
        let positions: Vec<_> = code
            .visible_type_annotations
            .iter()
            .map(|annotation| annotation.target.position().copied())
            .collect();
        assert_eq!(positions, vec![Some(fresh), Some(fresh)]);
    }

    #[test]
    fn annotations_need_a_pending_instruction() {
        let mut writer = class_writer();
        {
            let mut mv =
                writer.visit_method(ACC_STATIC, "none", "()V", None, &[]).unwrap().unwrap();
            mv.visit_code().unwrap();
            let cast = TypeReference::type_argument(TypeReference::CAST, 0);
            assert!(matches!(
                mv.visit_insn_annotation(cast, None, "Ldemo/A;", true),
                Err(Error::ProtocolViolation(_))
            ));
        }
        assert!(writer.visit_end().is_err());
    }

    #[test]
    fn unplaced_labels_fail_the_method() {
        let mut writer = class_writer();
        let mut mv = writer.visit_method(ACC_STATIC, "spin", "()V", None, &[]).unwrap().unwrap();
        mv.visit_code().unwrap();
        mv.visit_jump_insn(GOTO, Label::new()).unwrap();
        mv.visit_maxs(0, 0).unwrap();
        let err = mv.visit_end().unwrap_err();
        assert!(matches!(err, Error::ClassWrite(ClassWriteError::UnboundLabel(_))), "{err}");
    }

    #[test]
    fn failed_method_keeps_the_class_from_finishing() {
        let mut writer = class_writer();
        {
            let mut mv =
                writer.visit_method(ACC_STATIC, "spin", "()V", None, &[]).unwrap().unwrap();
            mv.visit_code().unwrap();
            mv.visit_jump_insn(GOTO, Label::new()).unwrap();
            mv.visit_maxs(0, 0).unwrap();
            assert!(mv.visit_end().is_err());
        }
        assert!(matches!(writer.visit_end(), Err(Error::ProtocolViolation(_))));
        assert!(writer.to_bytes(&NodeWriteOptions::default()).is_err());
        assert!(writer.into_class_node().is_err());
    }

    #[test]
    fn failed_annotation_value_keeps_the_class_from_finishing() {
        let mut writer = class_writer();
        {
            let mut fv = writer.visit_field(ACC_PRIVATE, "f", "I", None, None).unwrap().unwrap();
            let mut av = fv.visit_annotation("Ldemo/A;", true).unwrap().unwrap();
            av.visit(Some("named"), &AnnotationValue::Int(1)).unwrap();
            assert!(av.visit(None, &AnnotationValue::Int(2)).is_err());
        }
        assert!(writer.visit_end().is_err());
        assert!(writer.into_class_node().is_err());
    }

    #[test]
    fn out_of_range_push_operands_are_rejected() {
        let mut writer = class_writer();
        let mut mv = writer.visit_method(ACC_STATIC, "push", "()V", None, &[]).unwrap().unwrap();
        mv.visit_code().unwrap();
        mv.visit_int_insn(BIPUSH, -128).unwrap();
        mv.visit_int_insn(SIPUSH, 32767).unwrap();
        let out_of_range = [(BIPUSH, 128), (BIPUSH, -129), (SIPUSH, 32768), (SIPUSH, -32769)];
        for (opcode, operand) in out_of_range {
            assert!(matches!(
                mv.visit_int_insn(opcode, operand),
                Err(Error::ProtocolViolation(_))
            ));
        }
    }

    #[test]
    fn lifecycle_is_enforced() {
        let mut writer = ClassNodeWriter::new();
        assert!(matches!(
            writer.visit(V25 + 1, 0, ACC_PUBLIC, "demo/Next", None, None, &[]),
            Err(Error::UnsupportedVersion { major: 70, ceiling: 69 })
        ));
        let writer = class_writer();
        assert!(writer.to_bytes(&NodeWriteOptions::default()).is_err());
        assert!(writer.into_class_node().is_err());
    }
}
