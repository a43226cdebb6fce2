//! Replays a [`ClassNode`] as visitor calls.
//!
//! The calls come in the order [`ClassReader`](crate::class_reader::ClassReader)
//! produces for the bytes the model was parsed from, so a consumer cannot
//! tell which codec fed it.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::annotation::{TargetInfo, TypeAnnotation};
use crate::bridge::annotations::{accept_annotation, visitor_type_path};
use crate::bridge::constants::{to_visitor_constant, to_visitor_constants, to_visitor_handle};
use crate::bridge::frames::{to_visitor_frame_value, FrameExpander};
use crate::bridge::labels::LabelMap;
use crate::builder::initial_frame;
use crate::constants::*;
use crate::error::{Error, Result};
use crate::insn::{CodeElement, Insn, LabelNode};
use crate::nodes::{
    ClassNode, CodeNode, FieldNode, FrameNode, MethodNode, ModuleNode, RecordComponentNode,
    VerificationType,
};
use crate::opcodes::*;
use crate::types::{Frame, FrameValue};
use crate::visitor::{ClassVisitor, Label, MethodVisitor};

/// Drives a [`ClassVisitor`] from a parsed or built model.
#[derive(Debug, Clone, Copy)]
pub struct ClassNodeReader<'a> {
    node: &'a ClassNode,
}

impl<'a> ClassNodeReader<'a> {
    pub fn new(node: &'a ClassNode) -> Self {
        Self { node }
    }

    /// Visits the whole class. `flags` takes the reader flags
    /// [`SKIP_CODE`], [`SKIP_DEBUG`], [`SKIP_FRAMES`] and [`EXPAND_FRAMES`].
    pub fn accept(&self, visitor: &mut dyn ClassVisitor, flags: u32) -> Result<()> {
        let node = self.node;
        log::trace!("replaying model of class {} (version {})", node.name, node.major_version);
        visitor.visit(
            node.major_version,
            node.minor_version,
            node.access,
            &node.name,
            node.signature.as_deref(),
            node.super_name.as_deref(),
            &node.interfaces,
        )?;
        if flags & SKIP_DEBUG == 0 && (node.source_file.is_some() || node.source_debug.is_some()) {
            visitor.visit_source(node.source_file.as_deref(), node.source_debug.as_deref())?;
        }
        if let Some(module) = &node.module {
            accept_module(module, visitor)?;
        }
        if let Some(host) = &node.nest_host {
            visitor.visit_nest_host(host)?;
        }
        if let Some(outer) = &node.outer_class {
            visitor.visit_outer_class(
                &outer.owner,
                outer.method_name.as_deref(),
                outer.method_descriptor.as_deref(),
            )?;
        }
        for (annotation, visible) in
            tagged(&node.visible_annotations, &node.invisible_annotations)
        {
            let child = visitor.visit_annotation(&annotation.descriptor, visible)?;
            accept_annotation(annotation, child)?;
        }
        for (annotation, visible) in
            tagged(&node.visible_type_annotations, &node.invisible_type_annotations)
        {
            let path = visitor_type_path(&annotation.path);
            let child = visitor.visit_type_annotation(
                annotation.target.type_reference(),
                path.as_ref(),
                &annotation.annotation.descriptor,
                visible,
            )?;
            accept_annotation(&annotation.annotation, child)?;
        }
        for attribute in &node.attributes {
            visitor.visit_attribute(attribute)?;
        }
        for member in &node.nest_members {
            visitor.visit_nest_member(member)?;
        }
        for subclass in &node.permitted_subclasses {
            visitor.visit_permitted_subclass(subclass)?;
        }
        for inner in &node.inner_classes {
            visitor.visit_inner_class(
                &inner.name,
                inner.outer_name.as_deref(),
                inner.inner_name.as_deref(),
                inner.access,
            )?;
        }
        for component in &node.record_components {
            accept_record_component(component, visitor)?;
        }
        for field in &node.fields {
            accept_field(field, visitor)?;
        }
        for method in &node.methods {
            accept_method(&node.name, method, visitor, flags)?;
        }
        visitor.visit_end()
    }
}

/// Visible entries first, each paired with its visibility.
fn tagged<'n, T>(visible: &'n [T], invisible: &'n [T]) -> impl Iterator<Item = (&'n T, bool)> {
    visible
        .iter()
        .map(|item| (item, true))
        .chain(invisible.iter().map(|item| (item, false)))
}

fn accept_module(module: &ModuleNode, visitor: &mut dyn ClassVisitor) -> Result<()> {
    let version = module.version.as_deref();
    let Some(mut mv) = visitor.visit_module(&module.name, module.access, version)? else {
        return Ok(());
    };
    if let Some(main_class) = &module.main_class {
        mv.visit_main_class(main_class)?;
    }
    for package in &module.packages {
        mv.visit_package(package)?;
    }
    for require in &module.requires {
        mv.visit_require(&require.module, require.access, require.version.as_deref())?;
    }
    for export in &module.exports {
        mv.visit_export(&export.package, export.access, &export.modules)?;
    }
    for open in &module.opens {
        mv.visit_open(&open.package, open.access, &open.modules)?;
    }
    for service in &module.uses {
        mv.visit_use(service)?;
    }
    for provide in &module.provides {
        mv.visit_provide(&provide.service, &provide.providers)?;
    }
    mv.visit_end()
}

fn accept_record_component(
    component: &RecordComponentNode,
    visitor: &mut dyn ClassVisitor,
) -> Result<()> {
    let signature = component.signature.as_deref();
    let Some(mut rv) =
        visitor.visit_record_component(&component.name, &component.descriptor, signature)?
    else {
        return Ok(());
    };
    let rv = rv.as_mut();
    for (annotation, visible) in
        tagged(&component.visible_annotations, &component.invisible_annotations)
    {
        let child = rv.visit_annotation(&annotation.descriptor, visible)?;
        accept_annotation(annotation, child)?;
    }
    for (annotation, visible) in tagged(
        &component.visible_type_annotations,
        &component.invisible_type_annotations,
    ) {
        let path = visitor_type_path(&annotation.path);
        let child = rv.visit_type_annotation(
            annotation.target.type_reference(),
            path.as_ref(),
            &annotation.annotation.descriptor,
            visible,
        )?;
        accept_annotation(&annotation.annotation, child)?;
    }
    for attribute in &component.attributes {
        rv.visit_attribute(attribute)?;
    }
    rv.visit_end()
}

fn accept_field(field: &FieldNode, visitor: &mut dyn ClassVisitor) -> Result<()> {
    let value = field.value.as_ref().map(to_visitor_constant);
    let Some(mut fv) = visitor.visit_field(
        field.access,
        &field.name,
        &field.descriptor,
        field.signature.as_deref(),
        value.as_ref(),
    )?
    else {
        return Ok(());
    };
    let fv = fv.as_mut();
    for (annotation, visible) in tagged(&field.visible_annotations, &field.invisible_annotations) {
        let child = fv.visit_annotation(&annotation.descriptor, visible)?;
        accept_annotation(annotation, child)?;
    }
    for (annotation, visible) in
        tagged(&field.visible_type_annotations, &field.invisible_type_annotations)
    {
        let path = visitor_type_path(&annotation.path);
        let child = fv.visit_type_annotation(
            annotation.target.type_reference(),
            path.as_ref(),
            &annotation.annotation.descriptor,
            visible,
        )?;
        accept_annotation(&annotation.annotation, child)?;
    }
    for attribute in &field.attributes {
        fv.visit_attribute(attribute)?;
    }
    fv.visit_end()
}

fn accept_method(
    owner: &str,
    method: &MethodNode,
    visitor: &mut dyn ClassVisitor,
    flags: u32,
) -> Result<()> {
    let Some(mut mv) = visitor.visit_method(
        method.access,
        &method.name,
        &method.descriptor,
        method.signature.as_deref(),
        &method.exceptions,
    )?
    else {
        return Ok(());
    };
    let mv = mv.as_mut();

    if flags & SKIP_DEBUG == 0 {
        for parameter in &method.parameters {
            mv.visit_parameter(parameter.name.as_deref(), parameter.access)?;
        }
    }
    if let Some(value) = &method.annotation_default {
        if let Some(mut av) = mv.visit_annotation_default()? {
            value.accept(av.as_mut(), None)?;
            av.visit_end()?;
        }
    }
    for (annotation, visible) in
        tagged(&method.visible_annotations, &method.invisible_annotations)
    {
        let child = mv.visit_annotation(&annotation.descriptor, visible)?;
        accept_annotation(annotation, child)?;
    }
    for (annotation, visible) in
        tagged(&method.visible_type_annotations, &method.invisible_type_annotations)
    {
        let path = visitor_type_path(&annotation.path);
        let child = mv.visit_type_annotation(
            annotation.target.type_reference(),
            path.as_ref(),
            &annotation.annotation.descriptor,
            visible,
        )?;
        accept_annotation(&annotation.annotation, child)?;
    }
    let parameter_annotations = [
        (&method.visible_parameter_annotations, true),
        (&method.invisible_parameter_annotations, false),
    ];
    for (parameters, visible) in parameter_annotations {
        let Some(parameters) = parameters else {
            continue;
        };
        mv.visit_annotable_parameter_count(parameters.len() as u8, visible)?;
        for (index, annotations) in parameters.iter().enumerate() {
            for annotation in annotations {
                let child =
                    mv.visit_parameter_annotation(index as u8, &annotation.descriptor, visible)?;
                accept_annotation(annotation, child)?;
            }
        }
    }
    for attribute in &method.attributes {
        mv.visit_attribute(attribute)?;
    }

    if flags & SKIP_CODE == 0 {
        if let Some(code) = &method.code {
            mv.visit_code()?;
            CodeReader::new(owner, method, code, flags).accept(mv)?;
        }
    }
    mv.visit_end()
}

/// A cursor over code elements with room to push back two of them.
///
/// Taking an element and handing it back is how the reader looks past a
/// label for the line numbers bound to the same point.
#[derive(Debug, Clone)]
pub struct InstructionCursor<'a> {
    elements: std::slice::Iter<'a, CodeElement>,
    slots: [Option<&'a CodeElement>; 2],
}

impl<'a> InstructionCursor<'a> {
    pub fn new(elements: &'a [CodeElement]) -> Self {
        Self {
            elements: elements.iter(),
            slots: [None, None],
        }
    }

    /// The next element, without taking it.
    pub fn peek(&mut self) -> Option<&'a CodeElement> {
        if self.slots[0].is_none() {
            self.slots[0] = self.elements.next();
        }
        self.slots[0]
    }

    pub fn consume(&mut self) -> Option<&'a CodeElement> {
        match self.slots[0].take() {
            Some(element) => {
                self.slots[0] = self.slots[1].take();
                Some(element)
            }
            None => self.elements.next(),
        }
    }

    /// Returns `element` to the front. Fails when both slots are taken.
    pub fn push_back(&mut self, element: &'a CodeElement) -> Result<()> {
        if self.slots[1].is_some() {
            return Err(Error::protocol(
                "instruction cursor holds two pushed back elements already",
            ));
        }
        self.slots[1] = self.slots[0].take();
        self.slots[0] = Some(element);
        Ok(())
    }
}

/// State of one code body being replayed.
struct CodeReader<'a> {
    owner: &'a str,
    method: &'a MethodNode,
    code: &'a CodeNode,
    flags: u32,
    labels: LabelMap<LabelNode, Label>,
}

impl<'a> CodeReader<'a> {
    fn new(owner: &'a str, method: &'a MethodNode, code: &'a CodeNode, flags: u32) -> Self {
        Self {
            owner,
            method,
            code,
            flags,
            labels: LabelMap::new(),
        }
    }

    fn label(&mut self, label: LabelNode) -> Label {
        self.labels.resolve(label, Label::new)
    }

    fn frame_values(&mut self, values: &[VerificationType]) -> Vec<FrameValue> {
        values
            .iter()
            .map(|value| to_visitor_frame_value(value, &mut |label| self.label(label)))
            .collect()
    }

    fn accept(mut self, mv: &mut dyn MethodVisitor) -> Result<()> {
        let code = self.code;
        let skip_debug = self.flags & SKIP_DEBUG != 0;

        for block in &code.try_catch_blocks {
            let start = self.label(block.start);
            let end = self.label(block.end);
            let handler = self.label(block.handler);
            let catch_type = block.catch_type.as_ref().map(|class| class.internal_name());
            mv.visit_try_catch_block(start, end, handler, catch_type)?;
        }
        let type_annotations: Vec<(&TypeAnnotation, bool)> =
            tagged(&code.visible_type_annotations, &code.invisible_type_annotations).collect();
        for (annotation, visible) in &type_annotations {
            if let TargetInfo::ExceptionParameter(_) = annotation.target {
                let path = visitor_type_path(&annotation.path);
                let child = mv.visit_try_catch_annotation(
                    annotation.target.type_reference(),
                    path.as_ref(),
                    &annotation.annotation.descriptor,
                    *visible,
                )?;
                accept_annotation(&annotation.annotation, child)?;
            }
        }

        let mut insn_annotations: HashMap<LabelNode, Vec<(&TypeAnnotation, bool)>> = HashMap::new();
        for (annotation, visible) in &type_annotations {
            if let Some(position) = annotation.target.position() {
                insn_annotations.entry(*position).or_default().push((*annotation, *visible));
            }
        }
        let frames: HashMap<LabelNode, &FrameNode> = if self.flags & SKIP_FRAMES == 0 {
            code.frames.iter().map(|frame| (frame.label, frame)).collect()
        } else {
            HashMap::new()
        };
        let initial = initial_frame(self.owner, self.method);
        let initial = self.frame_values(&initial);
        let mut running = FrameExpander::new(initial);

        let mut cursor = InstructionCursor::new(&code.elements);
        let mut since_insn: Vec<LabelNode> = Vec::new();
        while let Some(element) = cursor.consume() {
            match element {
                CodeElement::Label(node) => {
                    let label = self.label(*node);
                    mv.visit_label(label)?;
                    while let Some(next) = cursor.consume() {
                        let CodeElement::LineNumber(line) = next else {
                            cursor.push_back(next)?;
                            break;
                        };
                        if !skip_debug {
                            mv.visit_line_number(*line, label)?;
                        }
                    }
                    if let Some(frame) = frames.get(node) {
                        let frame = self.frame(frame, &mut running);
                        mv.visit_frame(&frame)?;
                    }
                    since_insn.push(*node);
                }
                CodeElement::LineNumber(line) => {
                    if !skip_debug {
                        let label = Label::new();
                        mv.visit_label(label)?;
                        mv.visit_line_number(*line, label)?;
                    }
                }
                CodeElement::Insn(insn) => {
                    self.visit_insn(mv, insn)?;
                    for position in since_insn.drain(..) {
                        let bound = insn_annotations.remove(&position).unwrap_or_default();
                        for (annotation, visible) in bound {
                            let path = visitor_type_path(&annotation.path);
                            let child = mv.visit_insn_annotation(
                                annotation.target.type_reference(),
                                path.as_ref(),
                                &annotation.annotation.descriptor,
                                visible,
                            )?;
                            accept_annotation(&annotation.annotation, child)?;
                        }
                    }
                }
            }
        }
        if let Some(position) = insn_annotations.keys().next() {
            return Err(Error::protocol(format!(
                "type annotation at L{} has no instruction to annotate",
                position.id()
            )));
        }

        if !skip_debug {
            self.visit_local_variables(mv)?;
        }
        for (annotation, visible) in &type_annotations {
            let Some(ranges) = annotation.target.local_variable_ranges() else {
                continue;
            };
            let starts: Vec<Label> = ranges.iter().map(|range| self.label(range.start)).collect();
            let ends: Vec<Label> = ranges.iter().map(|range| self.label(range.end)).collect();
            let indices: Vec<u16> = ranges.iter().map(|range| range.index).collect();
            let path = visitor_type_path(&annotation.path);
            let child = mv.visit_local_variable_annotation(
                annotation.target.type_reference(),
                path.as_ref(),
                &starts,
                &ends,
                &indices,
                &annotation.annotation.descriptor,
                *visible,
            )?;
            accept_annotation(&annotation.annotation, child)?;
        }
        for attribute in &code.attributes {
            mv.visit_code_attribute(attribute)?;
        }
        mv.visit_maxs(code.max_stack, code.max_locals)
    }

    /// The visitor form of a model frame: as is with [`EXPAND_FRAMES`],
    /// otherwise the narrowest delta against the previous frame.
    fn frame(&mut self, frame: &FrameNode, running: &mut FrameExpander) -> Frame {
        let locals = self.frame_values(&frame.locals);
        let stack = self.frame_values(&frame.stack);
        if self.flags & EXPAND_FRAMES != 0 {
            Frame::New { locals, stack }
        } else {
            running.compress(locals, stack)
        }
    }

    /// Variables and variable types sharing `(start, end, name, slot)` go
    /// out as one call.
    fn visit_local_variables(&mut self, mv: &mut dyn MethodVisitor) -> Result<()> {
        type Key<'k> = (LabelNode, LabelNode, &'k str, u16);
        let code = self.code;
        let mut variables: IndexMap<Key<'_>, (&str, Option<&str>)> = IndexMap::new();
        for var in &code.local_variables {
            variables
                .entry((var.start, var.end, var.name.as_str(), var.slot))
                .or_insert((var.descriptor.as_str(), None));
        }
        for var in &code.local_variable_types {
            match variables.get_mut(&(var.start, var.end, var.name.as_str(), var.slot)) {
                Some(entry) => entry.1 = Some(var.signature.as_str()),
                None => log::debug!(
                    "dropping local variable type {} without a matching local variable",
                    var.name
                ),
            }
        }
        for ((start, end, name, slot), (descriptor, signature)) in variables {
            let start = self.label(start);
            let end = self.label(end);
            mv.visit_local_variable(name, descriptor, signature, start, end, slot)?;
        }
        Ok(())
    }

    fn visit_insn(&mut self, mv: &mut dyn MethodVisitor, insn: &Insn) -> Result<()> {
        match insn {
            Insn::Nop
            | Insn::ConstantIntrinsic(_)
            | Insn::Stack(_)
            | Insn::Operator(_)
            | Insn::Convert(_)
            | Insn::Monitor(_)
            | Insn::ArrayLoad(_)
            | Insn::ArrayStore(_)
            | Insn::Return(_)
            | Insn::Throw => mv.visit_insn(insn.opcode()),
            Insn::Push { opcode, value } => mv.visit_int_insn(*opcode, *value),
            Insn::Ldc(value) => mv.visit_ldc_insn(&to_visitor_constant(value)),
            Insn::Load { slot, .. } | Insn::Store { slot, .. } | Insn::Ret(slot) => {
                mv.visit_var_insn(insn.opcode(), *slot)
            }
            Insn::Increment { slot, constant } => mv.visit_iinc_insn(*slot, *constant),
            Insn::Branch { opcode, target } => {
                let target = self.label(*target);
                mv.visit_jump_insn(*opcode, target)
            }
            Insn::TableSwitch {
                low,
                high,
                default,
                targets,
            } => {
                let default = self.label(*default);
                let labels: Vec<Label> = targets.iter().map(|target| self.label(*target)).collect();
                mv.visit_table_switch_insn(*low, *high, default, &labels)
            }
            Insn::LookupSwitch { default, cases } => {
                let default = self.label(*default);
                let keys: Vec<i32> = cases.iter().map(|(key, _)| *key).collect();
                let labels: Vec<Label> =
                    cases.iter().map(|(_, target)| self.label(*target)).collect();
                mv.visit_lookup_switch_insn(default, &keys, &labels)
            }
            Insn::Field {
                opcode,
                owner,
                name,
                descriptor,
            } => mv.visit_field_insn(*opcode, owner.internal_name(), name, descriptor),
            Insn::Invoke {
                opcode,
                owner,
                name,
                descriptor,
                is_interface,
            } => mv.visit_method_insn(
                *opcode,
                owner.internal_name(),
                name,
                descriptor,
                *is_interface,
            ),
            Insn::InvokeDynamic(site) => mv.visit_invoke_dynamic_insn(
                &site.name,
                &site.descriptor,
                &to_visitor_handle(&site.bootstrap),
                &to_visitor_constants(&site.args),
            ),
            Insn::NewObject(class) => mv.visit_type_insn(NEW, class.internal_name()),
            Insn::NewPrimitiveArray(kind) => {
                let code = kind
                    .newarray_code()
                    .ok_or_else(|| {
                        Error::protocol(format!("newarray of non-primitive kind {kind:?}"))
                    })?;
                mv.visit_int_insn(NEWARRAY, code as i32)
            }
            Insn::NewReferenceArray(component) => {
                mv.visit_type_insn(ANEWARRAY, component.internal_name())
            }
            Insn::NewMultiArray { array_type, dimensions } => {
                mv.visit_multi_anew_array_insn(array_type.internal_name(), *dimensions)
            }
            Insn::TypeCheck { opcode, class } => mv.visit_type_insn(*opcode, class.internal_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Annotation;
    use crate::builder::{ClassBuilder, MethodBuilder};
    use crate::desc::ClassDesc;
    use crate::insn::TypeKind;
    use crate::nodes::VerificationType;
    use crate::types::{TypePath, TypeReference};
    use crate::visitor::AnnotationVisitor;
    use pretty_assertions::assert_eq;

    #[test]
    fn cursor_peeks_and_takes_back() {
        let elements = vec![
            CodeElement::LineNumber(1),
            CodeElement::LineNumber(2),
            CodeElement::Insn(Insn::Nop),
        ];
        let mut cursor = InstructionCursor::new(&elements);
        assert_eq!(cursor.peek(), Some(&elements[0]));
        let first = cursor.consume().unwrap();
        let second = cursor.consume().unwrap();
        cursor.push_back(second).unwrap();
        cursor.push_back(first).unwrap();
        assert!(cursor.push_back(first).is_err());
        assert_eq!(cursor.consume(), Some(&elements[0]));
        assert_eq!(cursor.consume(), Some(&elements[1]));
        assert_eq!(cursor.peek(), Some(&elements[2]));
        assert_eq!(cursor.consume(), Some(&elements[2]));
        assert_eq!(cursor.consume(), None);
    }

    #[derive(Default)]
    struct Events(Vec<String>);

    impl ClassVisitor for Events {
        fn visit_method(
            &mut self,
            _access: u32,
            name: &str,
            _descriptor: &str,
            _signature: Option<&str>,
            _exceptions: &[String],
        ) -> Result<Option<Box<dyn MethodVisitor + '_>>> {
            self.0.push(format!("method {name}"));
            Ok(Some(Box::new(MethodEvents(&mut self.0))))
        }
    }

    struct MethodEvents<'a>(&'a mut Vec<String>);

    impl MethodVisitor for MethodEvents<'_> {
        fn visit_label(&mut self, _label: Label) -> Result<()> {
            self.0.push("label".to_string());
            Ok(())
        }

        fn visit_line_number(&mut self, line: u16, _start: Label) -> Result<()> {
            self.0.push(format!("line {line}"));
            Ok(())
        }

        fn visit_frame(&mut self, frame: &Frame) -> Result<()> {
            self.0.push(format!("frame {frame:?}"));
            Ok(())
        }

        fn visit_var_insn(&mut self, opcode: u8, var: u16) -> Result<()> {
            self.0.push(format!("var {opcode} {var}"));
            Ok(())
        }

        fn visit_type_insn(&mut self, opcode: u8, type_name: &str) -> Result<()> {
            self.0.push(format!("type {opcode} {type_name}"));
            Ok(())
        }

        fn visit_insn(&mut self, opcode: u8) -> Result<()> {
            self.0.push(format!("insn {opcode}"));
            Ok(())
        }

        fn visit_insn_annotation(
            &mut self,
            type_ref: TypeReference,
            _type_path: Option<&TypePath>,
            descriptor: &str,
            _visible: bool,
        ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
            self.0.push(format!("insn annotation {:#x} {descriptor}", type_ref.sort()));
            Ok(None)
        }

        fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) -> Result<()> {
            self.0.push(format!("maxs {max_stack} {max_locals}"));
            Ok(())
        }
    }

    fn cast_class() -> ClassNode {
        let mut method =
            MethodBuilder::new(ACC_STATIC, "cast", "(Ljava/lang/Object;)Ljava/lang/String;");
        let code = method.code();
        let start = code.new_label();
        let cast = code.new_label();
        code.label(start)
            .line_number(7)
            .load(TypeKind::Reference, 0)
            .label(cast)
            .insn(Insn::TypeCheck {
                opcode: CHECKCAST,
                class: ClassDesc::of_internal_name("java/lang/String"),
            })
            .return_(TypeKind::Reference)
            .frame(
                start,
                vec![VerificationType::Object(ClassDesc::of_internal_name("java/lang/Object"))],
                Vec::new(),
            )
            .add_type_annotation(
                TypeAnnotation {
                    target: TargetInfo::Cast {
                        position: cast,
                        type_argument: 0,
                    },
                    path: Vec::new(),
                    annotation: Annotation::new("Ldemo/NonNull;"),
                },
                true,
            )
            .maxs(1, 1);
        let mut class = ClassBuilder::new("demo/Cast", "java/lang/Object");
        class.add_method(method);
        class.build().unwrap()
    }

    #[test]
    fn replays_code_in_visit_order() {
        let node = cast_class();
        let mut events = Events::default();
        ClassNodeReader::new(&node).accept(&mut events, 0).unwrap();
        assert_eq!(
            events.0,
            vec![
                "method cast".to_string(),
                "label".to_string(),
                "line 7".to_string(),
                format!("frame {:?}", Frame::Same),
                format!("var {ALOAD} 0"),
                "label".to_string(),
                format!("type {CHECKCAST} java/lang/String"),
                format!("insn annotation {:#x} Ldemo/NonNull;", TypeReference::CAST),
                format!("insn {ARETURN}"),
                "maxs 1 1".to_string(),
            ]
        );
    }

    #[test]
    fn annotations_past_the_last_instruction_are_rejected() {
        let mut method = MethodBuilder::new(ACC_STATIC, "tail", "()V");
        let code = method.code();
        let tail = code.new_label();
        code.return_(TypeKind::Void)
            .label(tail)
            .add_type_annotation(
                TypeAnnotation {
                    target: TargetInfo::InstanceOf(tail),
                    path: Vec::new(),
                    annotation: Annotation::new("Ldemo/Lost;"),
                },
                false,
            )
            .maxs(0, 0);
        let mut class = ClassBuilder::new("demo/Tail", "java/lang/Object");
        class.add_method(method);
        let node = class.build().unwrap();

        let err = ClassNodeReader::new(&node)
            .accept(&mut Events::default(), 0)
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)), "{err}");
    }

    #[test]
    fn flags_expand_or_skip() {
        let node = cast_class();
        let mut events = Events::default();
        ClassNodeReader::new(&node)
            .accept(&mut events, SKIP_DEBUG | EXPAND_FRAMES)
            .unwrap();
        let expanded = Frame::New {
            locals: vec![FrameValue::Object("java/lang/Object".to_string())],
            stack: Vec::new(),
        };
        assert!(events.0.contains(&format!("frame {expanded:?}")));
        assert!(!events.0.iter().any(|event| event.starts_with("line")));

        let mut events = Events::default();
        ClassNodeReader::new(&node).accept(&mut events, SKIP_CODE).unwrap();
        assert_eq!(events.0, vec!["method cast".to_string()]);
    }
}
