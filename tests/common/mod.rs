#![allow(dead_code)]

use std::collections::HashMap;

use classfile_bridge::attribute::Attribute;
use classfile_bridge::class_reader::ClassReader;
use classfile_bridge::constants::*;
use classfile_bridge::error::Result;
use classfile_bridge::node_reader::{read_class_node, NodeReadOptions};
use classfile_bridge::opcodes::*;
use classfile_bridge::types::{
    AnnotationValue, Constant, ConstantDynamic, Frame, FrameValue, Handle, Type, TypePath,
    TypeReference, H_GETSTATIC, H_INVOKESTATIC,
};
use classfile_bridge::visitor::{
    AnnotationVisitor, ClassVisitor, FieldVisitor, Label, MethodVisitor, ModuleVisitor,
    RecordComponentVisitor,
};
use classfile_bridge::ClassNodeReader;

/// Logs every call it receives as a line of text. Labels are renamed by
/// order of first appearance so logs from different readers compare equal.
#[derive(Default)]
pub struct Recorder {
    pub events: Vec<String>,
    labels: HashMap<Label, usize>,
}

impl Recorder {
    fn log(&mut self, event: String) {
        self.events.push(event);
    }

    fn label(&mut self, label: Label) -> String {
        let next = self.labels.len();
        format!("L{}", self.labels.entry(label).or_insert(next))
    }

    fn labels(&mut self, labels: &[Label]) -> String {
        let names: Vec<String> = labels.iter().map(|label| self.label(*label)).collect();
        format!("[{}]", names.join(" "))
    }

    fn frame_value(&mut self, value: &FrameValue) -> String {
        match value {
            FrameValue::Uninitialized(label) => format!("Uninitialized({})", self.label(*label)),
            other => format!("{other:?}"),
        }
    }

    fn frame_values(&mut self, values: &[FrameValue]) -> String {
        let names: Vec<String> = values.iter().map(|value| self.frame_value(value)).collect();
        format!("[{}]", names.join(" "))
    }

    fn frame(&mut self, frame: &Frame) -> String {
        match frame {
            Frame::New { locals, stack } => {
                format!("new {} {}", self.frame_values(locals), self.frame_values(stack))
            }
            Frame::Full { locals, stack } => {
                format!("full {} {}", self.frame_values(locals), self.frame_values(stack))
            }
            Frame::Append(values) => format!("append {}", self.frame_values(values)),
            Frame::Chop(count) => format!("chop {count}"),
            Frame::Same => "same".to_string(),
            Frame::Same1(value) => format!("same1 {}", self.frame_value(value)),
        }
    }

    fn annotation(
        &mut self,
        descriptor: &str,
        visible: bool,
    ) -> Option<Box<dyn AnnotationVisitor + '_>> {
        self.log(format!("annotation {descriptor} {visible}"));
        Some(Box::new(AnnotationRecorder(self)))
    }

    fn type_annotation(
        &mut self,
        kind: &str,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Option<Box<dyn AnnotationVisitor + '_>> {
        let steps = type_path.map(|path| path.steps().to_vec());
        self.log(format!(
            "{kind} {:#010x} {steps:?} {descriptor} {visible}",
            type_ref.value()
        ));
        Some(Box::new(AnnotationRecorder(self)))
    }

    fn attribute(&mut self, kind: &str, attribute: &Attribute) {
        self.log(format!("{kind} {} {:?}", attribute.name, attribute.raw_bytes()));
    }
}

struct AnnotationRecorder<'a>(&'a mut Recorder);

impl AnnotationVisitor for AnnotationRecorder<'_> {
    fn visit(&mut self, name: Option<&str>, value: &AnnotationValue) -> Result<()> {
        self.0.log(format!("  value {name:?} {value:?}"));
        Ok(())
    }

    fn visit_enum(&mut self, name: Option<&str>, descriptor: &str, value: &str) -> Result<()> {
        self.0.log(format!("  enum {name:?} {descriptor} {value}"));
        Ok(())
    }

    fn visit_annotation(
        &mut self,
        name: Option<&str>,
        descriptor: &str,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        self.0.log(format!("  nested {name:?} {descriptor}"));
        Ok(Some(Box::new(AnnotationRecorder(&mut *self.0))))
    }

    fn visit_array(
        &mut self,
        name: Option<&str>,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        self.0.log(format!("  array {name:?}"));
        Ok(Some(Box::new(AnnotationRecorder(&mut *self.0))))
    }

    fn visit_end(&mut self) -> Result<()> {
        self.0.log("  end".to_string());
        Ok(())
    }
}

struct ModuleRecorder<'a>(&'a mut Recorder);

impl ModuleVisitor for ModuleRecorder<'_> {
    fn visit_main_class(&mut self, main_class: &str) -> Result<()> {
        self.0.log(format!("main_class {main_class}"));
        Ok(())
    }

    fn visit_package(&mut self, package: &str) -> Result<()> {
        self.0.log(format!("package {package}"));
        Ok(())
    }

    fn visit_require(&mut self, module: &str, access: u32, version: Option<&str>) -> Result<()> {
        self.0.log(format!("require {module} {access:#x} {version:?}"));
        Ok(())
    }

    fn visit_export(&mut self, package: &str, access: u32, modules: &[String]) -> Result<()> {
        self.0.log(format!("export {package} {access:#x} {modules:?}"));
        Ok(())
    }

    fn visit_open(&mut self, package: &str, access: u32, modules: &[String]) -> Result<()> {
        self.0.log(format!("open {package} {access:#x} {modules:?}"));
        Ok(())
    }

    fn visit_use(&mut self, service: &str) -> Result<()> {
        self.0.log(format!("use {service}"));
        Ok(())
    }

    fn visit_provide(&mut self, service: &str, providers: &[String]) -> Result<()> {
        self.0.log(format!("provide {service} {providers:?}"));
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        self.0.log("module_end".to_string());
        Ok(())
    }
}

struct ComponentRecorder<'a>(&'a mut Recorder);

impl RecordComponentVisitor for ComponentRecorder<'_> {
    fn visit_annotation(
        &mut self,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(self.0.annotation(descriptor, visible))
    }

    fn visit_type_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(self.0.type_annotation("type_annotation", type_ref, type_path, descriptor, visible))
    }

    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.0.attribute("attribute", attribute);
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        self.0.log("component_end".to_string());
        Ok(())
    }
}

struct FieldRecorder<'a>(&'a mut Recorder);

impl FieldVisitor for FieldRecorder<'_> {
    fn visit_annotation(
        &mut self,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(self.0.annotation(descriptor, visible))
    }

    fn visit_type_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(self.0.type_annotation("type_annotation", type_ref, type_path, descriptor, visible))
    }

    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.0.attribute("attribute", attribute);
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        self.0.log("field_end".to_string());
        Ok(())
    }
}

struct MethodRecorder<'a>(&'a mut Recorder);

impl MethodVisitor for MethodRecorder<'_> {
    fn visit_parameter(&mut self, name: Option<&str>, access: u32) -> Result<()> {
        self.0.log(format!("parameter {name:?} {access:#x}"));
        Ok(())
    }

    fn visit_annotation_default(&mut self) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        self.0.log("annotation_default".to_string());
        Ok(Some(Box::new(AnnotationRecorder(&mut *self.0))))
    }

    fn visit_annotation(
        &mut self,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(self.0.annotation(descriptor, visible))
    }

    fn visit_type_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(self.0.type_annotation("type_annotation", type_ref, type_path, descriptor, visible))
    }

    fn visit_annotable_parameter_count(&mut self, count: u8, visible: bool) -> Result<()> {
        self.0.log(format!("annotable_parameters {count} {visible}"));
        Ok(())
    }

    fn visit_parameter_annotation(
        &mut self,
        parameter: u8,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        self.0.log(format!("parameter_annotation {parameter}"));
        Ok(self.0.annotation(descriptor, visible))
    }

    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.0.attribute("attribute", attribute);
        Ok(())
    }

    fn visit_code(&mut self) -> Result<()> {
        self.0.log("code".to_string());
        Ok(())
    }

    fn visit_frame(&mut self, frame: &Frame) -> Result<()> {
        let frame = self.0.frame(frame);
        self.0.log(format!("frame {frame}"));
        Ok(())
    }

    fn visit_insn(&mut self, opcode: u8) -> Result<()> {
        self.0.log(format!("insn {opcode}"));
        Ok(())
    }

    fn visit_int_insn(&mut self, opcode: u8, operand: i32) -> Result<()> {
        self.0.log(format!("int {opcode} {operand}"));
        Ok(())
    }

    fn visit_var_insn(&mut self, opcode: u8, var: u16) -> Result<()> {
        self.0.log(format!("var {opcode} {var}"));
        Ok(())
    }

    fn visit_type_insn(&mut self, opcode: u8, type_name: &str) -> Result<()> {
        self.0.log(format!("type {opcode} {type_name}"));
        Ok(())
    }

    fn visit_field_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<()> {
        self.0.log(format!("field {opcode} {owner}.{name}:{descriptor}"));
        Ok(())
    }

    fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<()> {
        self.0.log(format!("method {opcode} {owner}.{name}{descriptor} {is_interface}"));
        Ok(())
    }

    fn visit_invoke_dynamic_insn(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap_method: &Handle,
        bootstrap_arguments: &[Constant],
    ) -> Result<()> {
        self.0.log(format!(
            "indy {name}{descriptor} {bootstrap_method:?} {bootstrap_arguments:?}"
        ));
        Ok(())
    }

    fn visit_jump_insn(&mut self, opcode: u8, label: Label) -> Result<()> {
        let label = self.0.label(label);
        self.0.log(format!("jump {opcode} {label}"));
        Ok(())
    }

    fn visit_label(&mut self, label: Label) -> Result<()> {
        let label = self.0.label(label);
        self.0.log(format!("label {label}"));
        Ok(())
    }

    fn visit_ldc_insn(&mut self, value: &Constant) -> Result<()> {
        self.0.log(format!("ldc {value:?}"));
        Ok(())
    }

    fn visit_iinc_insn(&mut self, var: u16, increment: i16) -> Result<()> {
        self.0.log(format!("iinc {var} {increment}"));
        Ok(())
    }

    fn visit_table_switch_insn(
        &mut self,
        min: i32,
        max: i32,
        default: Label,
        labels: &[Label],
    ) -> Result<()> {
        let default = self.0.label(default);
        let labels = self.0.labels(labels);
        self.0.log(format!("tableswitch {min} {max} {default} {labels}"));
        Ok(())
    }

    fn visit_lookup_switch_insn(
        &mut self,
        default: Label,
        keys: &[i32],
        labels: &[Label],
    ) -> Result<()> {
        let default = self.0.label(default);
        let labels = self.0.labels(labels);
        self.0.log(format!("lookupswitch {default} {keys:?} {labels}"));
        Ok(())
    }

    fn visit_multi_anew_array_insn(&mut self, descriptor: &str, dimensions: u8) -> Result<()> {
        self.0.log(format!("multianewarray {descriptor} {dimensions}"));
        Ok(())
    }

    fn visit_insn_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(self.0.type_annotation("insn_annotation", type_ref, type_path, descriptor, visible))
    }

    fn visit_try_catch_block(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> Result<()> {
        let labels = self.0.labels(&[start, end, handler]);
        self.0.log(format!("try_catch {labels} {catch_type:?}"));
        Ok(())
    }

    fn visit_try_catch_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(self.0.type_annotation("try_catch_annotation", type_ref, type_path, descriptor, visible))
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
        let labels = self.0.labels(&[start, end]);
        self.0.log(format!("local {name} {descriptor} {signature:?} {labels} {index}"));
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
        let starts = self.0.labels(start);
        let ends = self.0.labels(end);
        self.0.log(format!("local_annotation {starts} {ends} {index:?}"));
        Ok(self.0.type_annotation(
            "local_variable_annotation",
            type_ref,
            type_path,
            descriptor,
            visible,
        ))
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<()> {
        let start = self.0.label(start);
        self.0.log(format!("line {line} {start}"));
        Ok(())
    }

    fn visit_code_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.0.attribute("code_attribute", attribute);
        Ok(())
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) -> Result<()> {
        self.0.log(format!("maxs {max_stack} {max_locals}"));
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        self.0.log("method_end".to_string());
        Ok(())
    }
}

impl ClassVisitor for Recorder {
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
        self.log(format!(
            "class {major}.{minor} {access:#x} {name} {signature:?} {super_name:?} {interfaces:?}"
        ));
        Ok(())
    }

    fn visit_source(&mut self, source: Option<&str>, debug: Option<&str>) -> Result<()> {
        self.log(format!("source {source:?} {debug:?}"));
        Ok(())
    }

    fn visit_module(
        &mut self,
        name: &str,
        access: u32,
        version: Option<&str>,
    ) -> Result<Option<Box<dyn ModuleVisitor + '_>>> {
        self.log(format!("module {name} {access:#x} {version:?}"));
        Ok(Some(Box::new(ModuleRecorder(self))))
    }

    fn visit_nest_host(&mut self, nest_host: &str) -> Result<()> {
        self.log(format!("nest_host {nest_host}"));
        Ok(())
    }

    fn visit_outer_class(
        &mut self,
        owner: &str,
        name: Option<&str>,
        descriptor: Option<&str>,
    ) -> Result<()> {
        self.log(format!("outer_class {owner} {name:?} {descriptor:?}"));
        Ok(())
    }

    fn visit_annotation(
        &mut self,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(self.annotation(descriptor, visible))
    }

    fn visit_type_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(self.type_annotation("type_annotation", type_ref, type_path, descriptor, visible))
    }

    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.attribute("attribute", attribute);
        Ok(())
    }

    fn visit_nest_member(&mut self, nest_member: &str) -> Result<()> {
        self.log(format!("nest_member {nest_member}"));
        Ok(())
    }

    fn visit_permitted_subclass(&mut self, permitted_subclass: &str) -> Result<()> {
        self.log(format!("permitted_subclass {permitted_subclass}"));
        Ok(())
    }

    fn visit_inner_class(
        &mut self,
        name: &str,
        outer_name: Option<&str>,
        inner_name: Option<&str>,
        access: u32,
    ) -> Result<()> {
        self.log(format!("inner_class {name} {outer_name:?} {inner_name:?} {access:#x}"));
        Ok(())
    }

    fn visit_record_component(
        &mut self,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
    ) -> Result<Option<Box<dyn RecordComponentVisitor + '_>>> {
        self.log(format!("component {name} {descriptor} {signature:?}"));
        Ok(Some(Box::new(ComponentRecorder(self))))
    }

    fn visit_field(
        &mut self,
        access: u32,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        value: Option<&Constant>,
    ) -> Result<Option<Box<dyn FieldVisitor + '_>>> {
        self.log(format!("field {access:#x} {name} {descriptor} {signature:?} {value:?}"));
        Ok(Some(Box::new(FieldRecorder(self))))
    }

    fn visit_method(
        &mut self,
        access: u32,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        exceptions: &[String],
    ) -> Result<Option<Box<dyn MethodVisitor + '_>>> {
        self.log(format!("method {access:#x} {name}{descriptor} {signature:?} {exceptions:?}"));
        Ok(Some(Box::new(MethodRecorder(self))))
    }

    fn visit_end(&mut self) -> Result<()> {
        self.log("class_end".to_string());
        Ok(())
    }
}

/// Calls reported by the visitor codec.
pub fn visitor_events(bytes: &[u8], flags: u32) -> Vec<String> {
    let mut recorder = Recorder::default();
    ClassReader::new(bytes).accept(&mut recorder, flags).unwrap();
    recorder.events
}

/// Calls reported by parsing a model and replaying it.
pub fn model_events(bytes: &[u8], flags: u32) -> Vec<String> {
    let node = read_class_node(bytes, &NodeReadOptions::new(flags)).unwrap();
    let mut recorder = Recorder::default();
    ClassNodeReader::new(&node).accept(&mut recorder, flags).unwrap();
    recorder.events
}

/// Streams a class that touches most of the protocol: annotations, a
/// custom attribute, constant fields, a switch, a guarded cast and debug
/// tables. Frames and maxs are left for the writer to compute.
pub fn write_sample(cv: &mut dyn ClassVisitor, major: u16) -> Result<()> {
    cv.visit(
        major,
        0,
        ACC_PUBLIC | ACC_SUPER,
        "demo/Sample",
        None,
        Some("java/lang/Object"),
        &["java/lang/Runnable".to_string()],
    )?;
    cv.visit_source(Some("Sample.java"), None)?;
    if let Some(mut av) = cv.visit_annotation("Ldemo/Marker;", true)? {
        av.visit(Some("level"), &AnnotationValue::Int(3))?;
        av.visit_enum(Some("mode"), "Ldemo/Mode;", "FAST")?;
        if let Some(mut array) = av.visit_array(Some("tags"))? {
            array.visit(None, &AnnotationValue::String("a".to_string()))?;
            array.visit(None, &AnnotationValue::String("b".to_string()))?;
            array.visit_end()?;
        }
        av.visit_end()?;
    }
    cv.visit_attribute(&Attribute::raw("demo.Custom", vec![1, 2, 3]))?;
    cv.visit_inner_class("demo/Sample$Inner", Some("demo/Sample"), Some("Inner"), ACC_STATIC)?;

    if let Some(mut fv) = cv.visit_field(
        ACC_PUBLIC | ACC_STATIC | ACC_FINAL,
        "LIMIT",
        "I",
        None,
        Some(&Constant::Integer(42)),
    )? {
        fv.visit_end()?;
    }
    if let Some(mut fv) = cv.visit_field(ACC_PRIVATE, "name", "Ljava/lang/String;", None, None)? {
        if let Some(mut av) = fv.visit_annotation("Ldemo/Nullable;", false)? {
            av.visit_end()?;
        }
        fv.visit_end()?;
    }

    if let Some(mut mv) = cv.visit_method(ACC_PUBLIC, "<init>", "()V", None, &[])? {
        mv.visit_code()?;
        mv.visit_var_insn(ALOAD, 0)?;
        mv.visit_method_insn(INVOKESPECIAL, "java/lang/Object", "<init>", "()V", false)?;
        mv.visit_insn(RETURN)?;
        mv.visit_maxs(0, 0)?;
        mv.visit_end()?;
    }

    if let Some(mut mv) =
        cv.visit_method(ACC_PUBLIC | ACC_STATIC, "pick", "(I)Ljava/lang/String;", None, &[])?
    {
        let start = Label::new();
        let zero = Label::new();
        let one = Label::new();
        let other = Label::new();
        let end = Label::new();
        mv.visit_code()?;
        mv.visit_label(start)?;
        mv.visit_line_number(10, start)?;
        mv.visit_var_insn(ILOAD, 0)?;
        mv.visit_table_switch_insn(0, 1, other, &[zero, one])?;
        mv.visit_label(zero)?;
        mv.visit_line_number(11, zero)?;
        mv.visit_ldc_insn(&Constant::String("zero".to_string()))?;
        mv.visit_insn(ARETURN)?;
        mv.visit_label(one)?;
        mv.visit_ldc_insn(&Constant::String("one".to_string()))?;
        mv.visit_insn(ARETURN)?;
        mv.visit_label(other)?;
        mv.visit_insn(ACONST_NULL)?;
        mv.visit_insn(ARETURN)?;
        mv.visit_label(end)?;
        mv.visit_local_variable("index", "I", None, start, end, 0)?;
        mv.visit_maxs(0, 0)?;
        mv.visit_end()?;
    }

    if let Some(mut mv) = cv.visit_method(
        ACC_PUBLIC | ACC_STATIC,
        "cast",
        "(Ljava/lang/Object;)Ljava/lang/String;",
        None,
        &[],
    )? {
        let try_start = Label::new();
        let try_end = Label::new();
        let handler = Label::new();
        mv.visit_code()?;
        let catch_type = Some("java/lang/ClassCastException");
        mv.visit_try_catch_block(try_start, try_end, handler, catch_type)?;
        mv.visit_label(try_start)?;
        mv.visit_var_insn(ALOAD, 0)?;
        mv.visit_type_insn(CHECKCAST, "java/lang/String")?;
        if let Some(mut av) = mv.visit_insn_annotation(
            TypeReference::type_argument(TypeReference::CAST, 0),
            None,
            "Ldemo/NonNull;",
            true,
        )? {
            av.visit_end()?;
        }
        mv.visit_label(try_end)?;
        mv.visit_insn(ARETURN)?;
        mv.visit_label(handler)?;
        mv.visit_var_insn(ASTORE, 1)?;
        mv.visit_insn(ACONST_NULL)?;
        mv.visit_insn(ARETURN)?;
        mv.visit_maxs(0, 0)?;
        mv.visit_end()?;
    }

    cv.visit_end()
}

/// Streams a `module-info` class declaring one of every module directive.
pub fn write_module_info(cv: &mut dyn ClassVisitor, major: u16) -> Result<()> {
    cv.visit(major, 0, ACC_MODULE, "module-info", None, None, &[])?;
    cv.visit_source(Some("module-info.java"), None)?;
    if let Some(mut mv) = cv.visit_module("demo.app", 0, Some("1.0"))? {
        mv.visit_main_class("demo/app/Main")?;
        mv.visit_package("demo/app")?;
        mv.visit_package("demo/app/internal")?;
        mv.visit_require("java.base", ACC_MANDATED, None)?;
        mv.visit_require("java.logging", ACC_TRANSITIVE, Some("17"))?;
        mv.visit_export("demo/app", 0, &[])?;
        mv.visit_export("demo/app/internal", 0, &["demo.tests".to_string()])?;
        mv.visit_open("demo/app/internal", 0, &["demo.tests".to_string()])?;
        mv.visit_use("demo/app/Plugin")?;
        mv.visit_provide("demo/app/Plugin", &["demo/app/internal/DefaultPlugin".to_string()])?;
        mv.visit_end()?;
    }
    cv.visit_end()
}

/// Streams a record with annotated components, one of them generic with a
/// type annotation on its type argument.
pub fn write_record(cv: &mut dyn ClassVisitor, major: u16) -> Result<()> {
    let names_signature = "Ljava/util/List<Ljava/lang/String;>;";
    cv.visit(
        major,
        0,
        ACC_PUBLIC | ACC_FINAL | ACC_SUPER | ACC_RECORD,
        "demo/Point",
        None,
        Some("java/lang/Record"),
        &[],
    )?;
    if let Some(mut rv) = cv.visit_record_component("x", "I", None)? {
        if let Some(mut av) = rv.visit_annotation("Ldemo/Positive;", true)? {
            av.visit_end()?;
        }
        rv.visit_end()?;
    }
    if let Some(mut rv) = cv.visit_record_component("y", "I", None)? {
        let field = TypeReference::new(TypeReference::FIELD);
        if let Some(mut av) = rv.visit_type_annotation(field, None, "Ldemo/Unsigned;", false)? {
            av.visit_end()?;
        }
        rv.visit_end()?;
    }
    if let Some(mut rv) =
        cv.visit_record_component("names", "Ljava/util/List;", Some(names_signature))?
    {
        let field = TypeReference::new(TypeReference::FIELD);
        let path: TypePath = "0;".parse()?;
        if let Some(mut av) = rv.visit_type_annotation(field, Some(&path), "Ldemo/Elem;", true)? {
            av.visit_end()?;
        }
        rv.visit_end()?;
    }
    for (name, descriptor, signature) in
        [("x", "I", None), ("y", "I", None), ("names", "Ljava/util/List;", Some(names_signature))]
    {
        if let Some(mut fv) =
            cv.visit_field(ACC_PRIVATE | ACC_FINAL, name, descriptor, signature, None)?
        {
            fv.visit_end()?;
        }
    }
    if let Some(mut mv) = cv.visit_method(ACC_PUBLIC, "x", "()I", None, &[])? {
        mv.visit_code()?;
        mv.visit_var_insn(ALOAD, 0)?;
        mv.visit_field_insn(GETFIELD, "demo/Point", "x", "I")?;
        mv.visit_insn(IRETURN)?;
        mv.visit_maxs(1, 1)?;
        mv.visit_end()?;
    }
    cv.visit_end()
}

/// Streams a class covering the rarer parts of the protocol: dynamic call
/// sites and constants, method handle constants, uninitialized frame
/// values, a lookup switch, method parameters, parameter annotations,
/// annotation defaults, nest and permitted subclass lists, and type
/// annotations on paths, locals and exception handlers.
///
/// Frames are given explicitly in their narrowest encoding and maxs are
/// exact, so the class must be written without `COMPUTE_*` flags.
pub fn write_wide(cv: &mut dyn ClassVisitor, major: u16) -> Result<()> {
    let first_argument: TypePath = "0;".parse()?;
    let element: TypePath = "[".parse()?;
    cv.visit(
        major,
        0,
        ACC_PUBLIC | ACC_SUPER | ACC_ABSTRACT,
        "demo/Wide",
        Some("Ljava/lang/Object;Ljava/lang/Comparable<Ldemo/Wide;>;"),
        Some("java/lang/Object"),
        &["java/lang/Comparable".to_string()],
    )?;
    if let Some(mut av) = cv.visit_type_annotation(
        TypeReference::super_type(0),
        Some(&first_argument),
        "Ldemo/Self;",
        true,
    )? {
        av.visit_end()?;
    }
    cv.visit_nest_member("demo/Wide$Left")?;
    cv.visit_nest_member("demo/Wide$Right")?;
    cv.visit_permitted_subclass("demo/Wide$Left")?;
    cv.visit_permitted_subclass("demo/Wide$Right")?;

    if let Some(mut fv) = cv.visit_field(ACC_PROTECTED, "values", "[I", None, None)? {
        let field = TypeReference::new(TypeReference::FIELD);
        if let Some(mut av) =
            fv.visit_type_annotation(field, Some(&element), "Ldemo/Elem;", false)?
        {
            av.visit_end()?;
        }
        fv.visit_end()?;
    }

    if let Some(mut mv) = cv.visit_method(ACC_PUBLIC | ACC_ABSTRACT, "level", "()I", None, &[])? {
        if let Some(mut av) = mv.visit_annotation_default()? {
            av.visit(None, &AnnotationValue::Int(5))?;
            av.visit_end()?;
        }
        mv.visit_end()?;
    }

    if let Some(mut mv) = cv.visit_method(ACC_PUBLIC | ACC_STATIC, "link", "()V", None, &[])? {
        let metafactory = Handle::new(
            H_INVOKESTATIC,
            "java/lang/invoke/LambdaMetafactory",
            "metafactory",
            "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;\
             Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodType;\
             Ljava/lang/invoke/MethodHandle;Ljava/lang/invoke/MethodType;)\
             Ljava/lang/invoke/CallSite;",
            false,
        );
        let body = Handle::new(H_INVOKESTATIC, "demo/Wide", "lambda$link$0", "()V", false);
        let answer = ConstantDynamic {
            name: "answer".to_string(),
            descriptor: "I".to_string(),
            bootstrap_method: Handle::new(
                H_INVOKESTATIC,
                "java/lang/invoke/ConstantBootstraps",
                "invoke",
                "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/Class;\
                 Ljava/lang/invoke/MethodHandle;[Ljava/lang/Object;)Ljava/lang/Object;",
                false,
            ),
            bootstrap_arguments: vec![
                Constant::Handle(Handle::new(
                    H_INVOKESTATIC,
                    "java/lang/Integer",
                    "valueOf",
                    "(I)Ljava/lang/Integer;",
                    false,
                )),
                Constant::Integer(42),
            ],
        };
        mv.visit_code()?;
        mv.visit_invoke_dynamic_insn(
            "run",
            "()Ljava/lang/Runnable;",
            &metafactory,
            &[
                Constant::Type(Type::method_type("()V")),
                Constant::Handle(body),
                Constant::Type(Type::method_type("()V")),
            ],
        )?;
        mv.visit_insn(POP)?;
        mv.visit_ldc_insn(&Constant::Handle(Handle::new(
            H_GETSTATIC,
            "java/lang/System",
            "out",
            "Ljava/io/PrintStream;",
            false,
        )))?;
        mv.visit_insn(POP)?;
        mv.visit_ldc_insn(&Constant::Dynamic(Box::new(answer)))?;
        mv.visit_insn(POP)?;
        mv.visit_insn(RETURN)?;
        mv.visit_maxs(1, 0)?;
        mv.visit_end()?;
    }

    if let Some(mut mv) = cv.visit_method(
        ACC_PRIVATE | ACC_STATIC | ACC_SYNTHETIC,
        "lambda$link$0",
        "()V",
        None,
        &[],
    )? {
        mv.visit_code()?;
        mv.visit_insn(RETURN)?;
        mv.visit_maxs(0, 0)?;
        mv.visit_end()?;
    }

    if let Some(mut mv) = cv.visit_method(
        ACC_PUBLIC | ACC_STATIC,
        "make",
        "(Z)Ljava/lang/StringBuilder;",
        None,
        &[],
    )? {
        let created = Label::new();
        let otherwise = Label::new();
        let join = Label::new();
        let builder = || FrameValue::Uninitialized(created);
        mv.visit_code()?;
        mv.visit_label(created)?;
        mv.visit_type_insn(NEW, "java/lang/StringBuilder")?;
        mv.visit_insn(DUP)?;
        mv.visit_var_insn(ILOAD, 0)?;
        mv.visit_jump_insn(IFEQ, otherwise)?;
        mv.visit_ldc_insn(&Constant::String("yes".to_string()))?;
        mv.visit_jump_insn(GOTO, join)?;
        mv.visit_label(otherwise)?;
        mv.visit_frame(&Frame::Full {
            locals: vec![FrameValue::Integer],
            stack: vec![builder(), builder()],
        })?;
        mv.visit_ldc_insn(&Constant::String("no".to_string()))?;
        mv.visit_label(join)?;
        mv.visit_frame(&Frame::Full {
            locals: vec![FrameValue::Integer],
            stack: vec![
                builder(),
                builder(),
                FrameValue::Object("java/lang/String".to_string()),
            ],
        })?;
        mv.visit_method_insn(
            INVOKESPECIAL,
            "java/lang/StringBuilder",
            "<init>",
            "(Ljava/lang/String;)V",
            false,
        )?;
        mv.visit_insn(ARETURN)?;
        mv.visit_maxs(4, 1)?;
        mv.visit_end()?;
    }

    if let Some(mut mv) = cv.visit_method(
        ACC_PUBLIC | ACC_STATIC,
        "route",
        "(Ljava/util/List;I)I",
        Some("(Ljava/util/List<Ljava/lang/String;>;I)I"),
        &[],
    )? {
        let start = Label::new();
        let end = Label::new();
        let one = Label::new();
        let ten = Label::new();
        let other = Label::new();
        let handler = Label::new();
        let last = Label::new();
        mv.visit_parameter(Some("items"), 0)?;
        mv.visit_parameter(Some("key"), ACC_FINAL)?;
        mv.visit_annotable_parameter_count(2, true)?;
        if let Some(mut av) = mv.visit_parameter_annotation(1, "Ldemo/Key;", true)? {
            av.visit(Some("value"), &AnnotationValue::String("route".to_string()))?;
            av.visit_end()?;
        }
        if let Some(mut av) = mv.visit_type_annotation(
            TypeReference::formal_parameter(0),
            Some(&first_argument),
            "Ldemo/Elem;",
            true,
        )? {
            av.visit_end()?;
        }
        mv.visit_code()?;
        mv.visit_try_catch_block(start, end, handler, Some("java/lang/RuntimeException"))?;
        if let Some(mut av) = mv.visit_try_catch_annotation(
            TypeReference::try_catch(0),
            None,
            "Ldemo/Caught;",
            false,
        )? {
            av.visit_end()?;
        }
        mv.visit_label(start)?;
        mv.visit_var_insn(ALOAD, 0)?;
        mv.visit_method_insn(INVOKEINTERFACE, "java/util/List", "size", "()I", true)?;
        mv.visit_insn(POP)?;
        mv.visit_label(end)?;
        mv.visit_var_insn(ILOAD, 1)?;
        mv.visit_lookup_switch_insn(other, &[1, 10], &[one, ten])?;
        mv.visit_label(one)?;
        mv.visit_frame(&Frame::Same)?;
        mv.visit_insn(ICONST_1)?;
        mv.visit_insn(IRETURN)?;
        mv.visit_label(ten)?;
        mv.visit_frame(&Frame::Same)?;
        mv.visit_int_insn(BIPUSH, 10)?;
        mv.visit_insn(IRETURN)?;
        mv.visit_label(other)?;
        mv.visit_frame(&Frame::Same)?;
        mv.visit_insn(ICONST_M1)?;
        mv.visit_insn(IRETURN)?;
        mv.visit_label(handler)?;
        mv.visit_frame(&Frame::Same1(FrameValue::Object(
            "java/lang/RuntimeException".to_string(),
        )))?;
        mv.visit_var_insn(ASTORE, 2)?;
        mv.visit_insn(ICONST_0)?;
        mv.visit_insn(IRETURN)?;
        mv.visit_label(last)?;
        mv.visit_local_variable(
            "items",
            "Ljava/util/List;",
            Some("Ljava/util/List<Ljava/lang/String;>;"),
            start,
            last,
            0,
        )?;
        mv.visit_local_variable("key", "I", None, start, last, 1)?;
        if let Some(mut av) = mv.visit_local_variable_annotation(
            TypeReference::new(TypeReference::LOCAL_VARIABLE),
            Some(&first_argument),
            &[start],
            &[last],
            &[0],
            "Ldemo/Elem;",
            true,
        )? {
            av.visit_end()?;
        }
        mv.visit_maxs(1, 3)?;
        mv.visit_end()?;
    }

    cv.visit_end()
}

/// Writes a class into a visitor for the given major version.
pub type Fixture = fn(&mut dyn ClassVisitor, u16) -> Result<()>;

/// Every fixture with the writer flags it is meant to be written with.
pub const FIXTURES: [(&str, Fixture, u32); 4] = [
    ("sample", write_sample, COMPUTE_FRAMES),
    ("wide", write_wide, 0),
    ("record", write_record, 0),
    ("module", write_module_info, 0),
];
