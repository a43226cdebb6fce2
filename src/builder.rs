//! Builders for the structured model. Each builder is consumed by
//! `build`, which validates what it collected.

use std::collections::HashSet;

use crate::annotation::{Annotation, ElementValue, TypeAnnotation};
use crate::attribute::Attribute;
use crate::constants::{ACC_STATIC, V1_8};
use crate::desc::{ClassDesc, ConstantDesc};
use crate::error::{ClassWriteError, Result};
use crate::insn::{CodeElement, Insn, LabelNode, TypeKind};
use crate::nodes::{
    ClassNode, CodeNode, FieldNode, FrameNode, InnerClassNode, LocalVariableNode,
    LocalVariableTypeNode, MethodNode, ParameterNode, RecordComponentNode, TryCatchBlockNode,
    VerificationType,
};

pub struct ClassBuilder {
    node: ClassNode,
    fields: Vec<FieldBuilder>,
    methods: Vec<MethodBuilder>,
}

impl ClassBuilder {
    pub fn new(name: &str, super_name: &str) -> Self {
        Self {
            node: ClassNode {
                major_version: V1_8,
                name: name.to_string(),
                super_name: Some(super_name.to_string()),
                ..ClassNode::default()
            },
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn version(&mut self, major: u16, minor: u16) -> &mut Self {
        self.node.major_version = major;
        self.node.minor_version = minor;
        self
    }

    pub fn access(&mut self, access: u32) -> &mut Self {
        self.node.access = access;
        self
    }

    /// `java/lang/Object` and module descriptors have no super class.
    pub fn no_super_class(&mut self) -> &mut Self {
        self.node.super_name = None;
        self
    }

    pub fn add_interface(&mut self, name: &str) -> &mut Self {
        self.node.interfaces.push(name.to_string());
        self
    }

    pub fn signature(&mut self, signature: &str) -> &mut Self {
        self.node.signature = Some(signature.to_string());
        self
    }

    pub fn source_file(&mut self, name: &str) -> &mut Self {
        self.node.source_file = Some(name.to_string());
        self
    }

    pub fn nest_host(&mut self, host: &str) -> &mut Self {
        self.node.nest_host = Some(host.to_string());
        self
    }

    pub fn add_nest_member(&mut self, member: &str) -> &mut Self {
        self.node.nest_members.push(member.to_string());
        self
    }

    pub fn add_permitted_subclass(&mut self, subclass: &str) -> &mut Self {
        self.node.permitted_subclasses.push(subclass.to_string());
        self
    }

    pub fn add_inner_class(&mut self, inner: InnerClassNode) -> &mut Self {
        self.node.inner_classes.push(inner);
        self
    }

    pub fn add_annotation(&mut self, annotation: Annotation, visible: bool) -> &mut Self {
        if visible {
            self.node.visible_annotations.push(annotation);
        } else {
            self.node.invisible_annotations.push(annotation);
        }
        self
    }

    pub fn add_type_annotation(&mut self, annotation: TypeAnnotation, visible: bool) -> &mut Self {
        if visible {
            self.node.visible_type_annotations.push(annotation);
        } else {
            self.node.invisible_type_annotations.push(annotation);
        }
        self
    }

    pub fn add_record_component(&mut self, component: RecordComponentNode) -> &mut Self {
        self.node.record_components.push(component);
        self
    }

    pub fn add_field(&mut self, field: FieldBuilder) -> &mut Self {
        self.fields.push(field);
        self
    }

    pub fn add_method(&mut self, method: MethodBuilder) -> &mut Self {
        self.methods.push(method);
        self
    }

    pub fn add_attribute(&mut self, attr: Attribute) -> &mut Self {
        self.node.attributes.push(attr);
        self
    }

    pub fn build(self) -> Result<ClassNode> {
        let mut node = self.node;
        node.fields = self.fields.into_iter().map(FieldBuilder::build).collect();
        node.methods = self
            .methods
            .into_iter()
            .map(MethodBuilder::build)
            .collect::<Result<Vec<_>>>()?;
        Ok(node)
    }
}

pub struct FieldBuilder {
    node: FieldNode,
}

impl FieldBuilder {
    pub fn new(access: u32, name: &str, descriptor: &str) -> Self {
        Self {
            node: FieldNode {
                access,
                name: name.to_string(),
                descriptor: descriptor.to_string(),
                ..FieldNode::default()
            },
        }
    }

    pub fn signature(&mut self, signature: &str) -> &mut Self {
        self.node.signature = Some(signature.to_string());
        self
    }

    pub fn constant_value(&mut self, value: ConstantDesc) -> &mut Self {
        self.node.value = Some(value);
        self
    }

    pub fn add_annotation(&mut self, annotation: Annotation, visible: bool) -> &mut Self {
        if visible {
            self.node.visible_annotations.push(annotation);
        } else {
            self.node.invisible_annotations.push(annotation);
        }
        self
    }

    pub fn add_attribute(&mut self, attr: Attribute) -> &mut Self {
        self.node.attributes.push(attr);
        self
    }

    pub fn build(self) -> FieldNode {
        self.node
    }
}

pub struct MethodBuilder {
    node: MethodNode,
    code: Option<CodeBuilder>,
}

impl MethodBuilder {
    pub fn new(access: u32, name: &str, descriptor: &str) -> Self {
        Self {
            node: MethodNode {
                access,
                name: name.to_string(),
                descriptor: descriptor.to_string(),
                ..MethodNode::default()
            },
            code: None,
        }
    }

    pub fn signature(&mut self, signature: &str) -> &mut Self {
        self.node.signature = Some(signature.to_string());
        self
    }

    pub fn add_exception(&mut self, name: &str) -> &mut Self {
        self.node.exceptions.push(name.to_string());
        self
    }

    pub fn add_parameter(&mut self, name: Option<&str>, access: u32) -> &mut Self {
        self.node.parameters.push(ParameterNode {
            name: name.map(str::to_string),
            access,
        });
        self
    }

    pub fn annotation_default(&mut self, value: ElementValue) -> &mut Self {
        self.node.annotation_default = Some(value);
        self
    }

    pub fn add_annotation(&mut self, annotation: Annotation, visible: bool) -> &mut Self {
        if visible {
            self.node.visible_annotations.push(annotation);
        } else {
            self.node.invisible_annotations.push(annotation);
        }
        self
    }

    pub fn add_parameter_annotation(
        &mut self,
        parameter: u8,
        annotation: Annotation,
        visible: bool,
    ) -> &mut Self {
        let table = if visible {
            &mut self.node.visible_parameter_annotations
        } else {
            &mut self.node.invisible_parameter_annotations
        };
        let table = table.get_or_insert_with(Vec::new);
        if table.len() <= parameter as usize {
            table.resize(parameter as usize + 1, Vec::new());
        }
        table[parameter as usize].push(annotation);
        self
    }

    pub fn add_attribute(&mut self, attr: Attribute) -> &mut Self {
        self.node.attributes.push(attr);
        self
    }

    /// The body builder, created on first use.
    pub fn code(&mut self) -> &mut CodeBuilder {
        self.code.get_or_insert_with(CodeBuilder::new)
    }

    pub fn set_code(&mut self, code: CodeBuilder) -> &mut Self {
        self.code = Some(code);
        self
    }

    pub fn build(self) -> Result<MethodNode> {
        let mut node = self.node;
        node.code = self.code.map(CodeBuilder::build).transpose()?;
        Ok(node)
    }
}

/// Collects the elements of a method body. Labels come from
/// [`CodeBuilder::new_label`] and must each be bound exactly once with
/// [`CodeBuilder::label`].
#[derive(Debug, Default)]
pub struct CodeBuilder {
    node: CodeNode,
    bound: HashSet<LabelNode>,
    bind_error: Option<LabelNode>,
}

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_label(&mut self) -> LabelNode {
        self.node.new_label()
    }

    pub fn label(&mut self, label: LabelNode) -> &mut Self {
        if !self.bound.insert(label) && self.bind_error.is_none() {
            self.bind_error = Some(label);
        }
        self.node.elements.push(CodeElement::Label(label));
        self
    }

    pub fn line_number(&mut self, line: u16) -> &mut Self {
        self.node.elements.push(CodeElement::LineNumber(line));
        self
    }

    pub fn insn(&mut self, insn: Insn) -> &mut Self {
        self.node.elements.push(CodeElement::Insn(insn));
        self
    }

    pub fn load(&mut self, kind: TypeKind, slot: u16) -> &mut Self {
        self.insn(Insn::Load { kind, slot })
    }

    pub fn store(&mut self, kind: TypeKind, slot: u16) -> &mut Self {
        self.insn(Insn::Store { kind, slot })
    }

    pub fn ldc(&mut self, value: ConstantDesc) -> &mut Self {
        self.insn(Insn::Ldc(value))
    }

    pub fn branch(&mut self, opcode: u8, target: LabelNode) -> &mut Self {
        self.insn(Insn::Branch { opcode, target })
    }

    pub fn field(&mut self, opcode: u8, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.insn(Insn::Field {
            opcode,
            owner: ClassDesc::of_internal_name(owner),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        })
    }

    pub fn invoke(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> &mut Self {
        self.insn(Insn::Invoke {
            opcode,
            owner: ClassDesc::of_internal_name(owner),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            is_interface,
        })
    }

    pub fn return_(&mut self, kind: TypeKind) -> &mut Self {
        self.insn(Insn::Return(kind))
    }

    /// Emits `opcode` through [`Insn::simple`]; opcodes that carry operands
    /// are ignored.
    pub fn simple(&mut self, opcode: u8) -> &mut Self {
        match Insn::simple(opcode) {
            Some(insn) => self.insn(insn),
            None => self,
        }
    }

    pub fn try_catch(
        &mut self,
        start: LabelNode,
        end: LabelNode,
        handler: LabelNode,
        catch_type: Option<&str>,
    ) -> &mut Self {
        self.node.try_catch_blocks.push(TryCatchBlockNode {
            start,
            end,
            handler,
            catch_type: catch_type.map(ClassDesc::of_internal_name),
        });
        self
    }

    pub fn local_variable(
        &mut self,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        start: LabelNode,
        end: LabelNode,
        slot: u16,
    ) -> &mut Self {
        self.node.local_variables.push(LocalVariableNode {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            start,
            end,
            slot,
        });
        if let Some(signature) = signature {
            self.node.local_variable_types.push(LocalVariableTypeNode {
                name: name.to_string(),
                signature: signature.to_string(),
                start,
                end,
                slot,
            });
        }
        self
    }

    pub fn frame(
        &mut self,
        label: LabelNode,
        locals: Vec<VerificationType>,
        stack: Vec<VerificationType>,
    ) -> &mut Self {
        self.node.frames.push(FrameNode { label, locals, stack });
        self
    }

    pub fn add_type_annotation(&mut self, annotation: TypeAnnotation, visible: bool) -> &mut Self {
        if visible {
            self.node.visible_type_annotations.push(annotation);
        } else {
            self.node.invisible_type_annotations.push(annotation);
        }
        self
    }

    pub fn add_attribute(&mut self, attr: Attribute) -> &mut Self {
        self.node.attributes.push(attr);
        self
    }

    pub fn maxs(&mut self, max_stack: u16, max_locals: u16) -> &mut Self {
        self.node.max_stack = max_stack;
        self.node.max_locals = max_locals;
        self
    }

    pub fn build(self) -> Result<CodeNode> {
        if let Some(label) = self.bind_error {
            return Err(crate::error::Error::protocol(format!("label L{} bound twice", label.id())));
        }
        for label in referenced_labels(&self.node) {
            if !self.bound.contains(&label) {
                return Err(ClassWriteError::UnboundLabel(format!("L{}", label.id())).into());
            }
        }
        Ok(self.node)
    }
}

/// Every label a body refers to, in no particular order.
pub(crate) fn referenced_labels(code: &CodeNode) -> Vec<LabelNode> {
    let mut labels = Vec::new();
    for element in &code.elements {
        match element {
            CodeElement::Insn(Insn::Branch { target, .. }) => labels.push(*target),
            CodeElement::Insn(Insn::TableSwitch { default, targets, .. }) => {
                labels.push(*default);
                labels.extend(targets.iter().copied());
            }
            CodeElement::Insn(Insn::LookupSwitch { default, cases }) => {
                labels.push(*default);
                labels.extend(cases.iter().map(|(_, label)| *label));
            }
            _ => {}
        }
    }
    for block in &code.try_catch_blocks {
        labels.extend([block.start, block.end, block.handler]);
    }
    for var in &code.local_variables {
        labels.extend([var.start, var.end]);
    }
    for var in &code.local_variable_types {
        labels.extend([var.start, var.end]);
    }
    for frame in &code.frames {
        labels.push(frame.label);
        for value in frame.locals.iter().chain(&frame.stack) {
            if let VerificationType::Uninitialized(label) = value {
                labels.push(*label);
            }
        }
    }
    for annotation in code.visible_type_annotations.iter().chain(&code.invisible_type_annotations) {
        if let Some(position) = annotation.target.position() {
            labels.push(*position);
        }
        if let Some(ranges) = annotation.target.local_variable_ranges() {
            for range in ranges {
                labels.extend([range.start, range.end]);
            }
        }
    }
    labels
}

/// The implicit frame at the start of a method, in model form.
pub fn initial_frame(owner: &str, method: &MethodNode) -> Vec<VerificationType> {
    let mut locals = Vec::new();
    if method.access & ACC_STATIC == 0 {
        if method.name == "<init>" {
            locals.push(VerificationType::UninitializedThis);
        } else {
            locals.push(VerificationType::Object(ClassDesc::of_internal_name(owner)));
        }
    }
    for parameter in crate::frame::parameter_descriptors(&method.descriptor) {
        locals.push(match TypeKind::from_descriptor(parameter) {
            TypeKind::Long => VerificationType::Long,
            TypeKind::Double => VerificationType::Double,
            TypeKind::Float => VerificationType::Float,
            TypeKind::Reference => VerificationType::Object(ClassDesc::of_descriptor(parameter)),
            _ => VerificationType::Integer,
        });
    }
    locals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ACC_PUBLIC;
    use crate::opcodes;
    use pretty_assertions::assert_eq;

    #[test]
    fn build_simple_class() {
        let mut method = MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "answer", "()I");
        method
            .code()
            .insn(Insn::Push {
                opcode: opcodes::BIPUSH,
                value: 42,
            })
            .return_(TypeKind::Int)
            .maxs(1, 0);

        let mut class = ClassBuilder::new("demo/Answer", "java/lang/Object");
        class.access(ACC_PUBLIC).source_file("Answer.java").add_method(method);
        let node = class.build().unwrap();

        assert_eq!(node.major_version, V1_8);
        let code = node.method("answer", "()I").and_then(|m| m.code.as_ref()).unwrap();
        assert_eq!(code.instructions().count(), 2);
        assert_eq!(code.max_stack, 1);
    }

    #[test]
    fn unbound_branch_target_fails_build() {
        let mut code = CodeBuilder::new();
        let target = code.new_label();
        code.branch(opcodes::GOTO, target);
        let err = code.build().unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::ClassWrite(ClassWriteError::UnboundLabel(_))
        ));
    }

    #[test]
    fn labels_bind_once() {
        let mut code = CodeBuilder::new();
        let label = code.new_label();
        code.label(label).label(label);
        assert!(code.build().is_err());
    }

    #[test]
    fn local_variable_with_signature_fills_both_tables() {
        let mut code = CodeBuilder::new();
        let start = code.new_label();
        let end = code.new_label();
        code.label(start)
            .simple(opcodes::RETURN)
            .label(end)
            .local_variable("xs", "Ljava/util/List;", Some("Ljava/util/List<TT;>;"), start, end, 1);
        let node = code.build().unwrap();
        assert_eq!(node.local_variables.len(), 1);
        assert_eq!(node.local_variable_types[0].signature, "Ljava/util/List<TT;>;");
    }

    #[test]
    fn initial_frame_of_constructor() {
        let method = MethodBuilder::new(0, "<init>", "(JLjava/lang/String;)V").build().unwrap();
        assert_eq!(
            initial_frame("demo/A", &method),
            vec![
                VerificationType::UninitializedThis,
                VerificationType::Long,
                VerificationType::Object(ClassDesc::of_descriptor("Ljava/lang/String;")),
            ]
        );
    }
}
