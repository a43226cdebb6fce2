//! The visitor codec writer and the class file assembly shared with the
//! structured model writer.

use std::collections::HashMap;

use crate::analysis::{
    compute_frames, compute_maxs, remove_dead_code, trim_handlers, HandlerInfo, Maxs, MethodContext,
};
use crate::annotation::{
    write_annotations, write_element_value, write_parameter_annotations, write_type_annotations,
    Annotation, AnnotationNodeBuilder, ElementValue, LocalVarTarget, TargetInfo, TypeAnnotation,
};
use crate::attribute::Attribute;
use crate::bridge::frames::FrameExpander;
use crate::bridge::annotations::{annotation_sink, model_type_path, type_annotation_sink};
use crate::bytecode::CodeEmitter;
use crate::bytes::{write_attribute_with_info, write_u1, write_u2, write_u4};
use crate::class_reader::{ClassReader, LineNumber, LocalVariable};
use crate::constant_pool::{encode_modified_utf8, ConstantPoolBuilder};
use crate::constants::*;
use crate::error::{ClassWriteError, Error, Result};
use crate::frame::{
    compress_frames, initial_locals, parameter_descriptors, write_stack_map_table, ExpandedFrame,
    FrameType,
};
use crate::guard::FailureFlag;
use crate::hierarchy::{ClassHierarchy, HierarchyResolver};
use crate::insn::LabelNode;
use crate::nodes::{
    InnerClassNode, ModuleExportNode, ModuleNode, ModuleProvideNode, ModuleRequireNode,
    OuterClassNode, ParameterNode,
};
use crate::opcodes::{int_operand_fits, INVOKEINTERFACE};
use crate::types::{Constant, Frame, FrameValue, Handle, TypePath, TypeReference};
use crate::visitor::{
    AnnotationVisitor, ClassVisitor, FieldVisitor, Label, MethodVisitor, ModuleVisitor,
    RecordComponentVisitor,
};

/// Attributes of a class, member or `Code` attribute, ready to be written.
#[derive(Debug, Default)]
pub(crate) struct AttributeList {
    entries: Vec<(u16, Vec<u8>)>,
}

impl AttributeList {
    pub(crate) fn push(&mut self, cp: &mut ConstantPoolBuilder, name: &str, info: Vec<u8>) {
        let name_index = cp.utf8(name);
        self.entries.push((name_index, info));
    }

    pub(crate) fn push_u2(&mut self, cp: &mut ConstantPoolBuilder, name: &str, value: u16) {
        let mut info = Vec::with_capacity(2);
        write_u2(&mut info, value);
        self.push(cp, name, info);
    }

    pub(crate) fn push_classes(
        &mut self,
        cp: &mut ConstantPoolBuilder,
        name: &str,
        classes: &[String],
    ) {
        let info = class_table(cp, classes);
        self.push(cp, name, info);
    }

    pub(crate) fn push_unknown(
        &mut self,
        cp: &mut ConstantPoolBuilder,
        attribute: &Attribute,
    ) -> Result<()> {
        let info = attribute.encode()?;
        self.push(cp, &attribute.name, info);
        Ok(())
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        write_u2(out, self.entries.len() as u16);
        for (name_index, info) in &self.entries {
            write_attribute_with_info(out, *name_index, info);
        }
    }
}

fn class_table(cp: &mut ConstantPoolBuilder, classes: &[String]) -> Vec<u8> {
    let mut info = Vec::with_capacity(2 + classes.len() * 2);
    write_u2(&mut info, classes.len() as u16);
    for class in classes {
        write_u2(&mut info, cp.class(class));
    }
    info
}

/// Access flags as stored in the class file. Pseudo flags are dropped and
/// `ACC_SYNTHETIC` becomes an attribute before version 49.
pub(crate) fn class_file_access(access: u32, major: u16) -> u16 {
    let mut access = access & ACC_CLASS_FILE_MASK;
    if major < V1_5 {
        access &= !ACC_SYNTHETIC;
    }
    access as u16
}

/// `Synthetic` and `Deprecated` attributes standing for access flags.
pub(crate) fn push_flag_attributes(
    list: &mut AttributeList,
    cp: &mut ConstantPoolBuilder,
    access: u32,
    major: u16,
) {
    if access & ACC_SYNTHETIC != 0 && major < V1_5 {
        list.push(cp, attrs::SYNTHETIC, Vec::new());
    }
    if access & ACC_DEPRECATED != 0 {
        list.push(cp, attrs::DEPRECATED, Vec::new());
    }
}

/// Attributes every class, field, method and record component may carry.
pub(crate) struct MemberAttributes<'a> {
    pub signature: Option<&'a str>,
    pub visible_annotations: &'a [Annotation],
    pub invisible_annotations: &'a [Annotation],
    pub visible_type_annotations: &'a [TypeAnnotation],
    pub invisible_type_annotations: &'a [TypeAnnotation],
    pub attributes: &'a [Attribute],
}

impl MemberAttributes<'_> {
    /// Signature, annotations, type annotations, then unknown attributes.
    pub(crate) fn push_into(
        &self,
        list: &mut AttributeList,
        cp: &mut ConstantPoolBuilder,
    ) -> Result<()> {
        if let Some(signature) = self.signature {
            let index = cp.utf8(signature);
            list.push_u2(cp, attrs::SIGNATURE, index);
        }
        if !self.visible_annotations.is_empty() {
            let info = write_annotations(cp, self.visible_annotations);
            list.push(cp, attrs::RUNTIME_VISIBLE_ANNOTATIONS, info);
        }
        if !self.invisible_annotations.is_empty() {
            let info = write_annotations(cp, self.invisible_annotations);
            list.push(cp, attrs::RUNTIME_INVISIBLE_ANNOTATIONS, info);
        }
        if !self.visible_type_annotations.is_empty() {
            let info = write_type_annotations(cp, &outside_code(self.visible_type_annotations)?);
            list.push(cp, attrs::RUNTIME_VISIBLE_TYPE_ANNOTATIONS, info);
        }
        if !self.invisible_type_annotations.is_empty() {
            let info = write_type_annotations(cp, &outside_code(self.invisible_type_annotations)?);
            list.push(cp, attrs::RUNTIME_INVISIBLE_TYPE_ANNOTATIONS, info);
        }
        for attribute in self.attributes {
            list.push_unknown(cp, attribute)?;
        }
        Ok(())
    }
}

/// Type annotations on a class, field, method or record component never
/// point into code.
fn outside_code(annotations: &[TypeAnnotation]) -> Result<Vec<TypeAnnotation<u16>>> {
    annotations
        .iter()
        .cloned()
        .map(|annotation| {
            annotation.map_positions(|label: LabelNode| {
                Err(Error::protocol(format!(
                    "type annotation outside code refers to label {}",
                    label.id()
                )))
            })
        })
        .collect()
}

pub(crate) fn write_member(
    cp: &mut ConstantPoolBuilder,
    access: u16,
    name: &str,
    descriptor: &str,
    attributes: &AttributeList,
) -> Vec<u8> {
    let mut out = Vec::new();
    write_u2(&mut out, access);
    write_u2(&mut out, cp.utf8(name));
    write_u2(&mut out, cp.utf8(descriptor));
    attributes.write(&mut out);
    out
}

pub(crate) fn write_record_component(
    cp: &mut ConstantPoolBuilder,
    name: &str,
    descriptor: &str,
    attributes: &AttributeList,
) -> Vec<u8> {
    let mut out = Vec::new();
    write_u2(&mut out, cp.utf8(name));
    write_u2(&mut out, cp.utf8(descriptor));
    attributes.write(&mut out);
    out
}

/// The `Record` attribute, written for record classes even without
/// components.
pub(crate) fn push_record(
    list: &mut AttributeList,
    cp: &mut ConstantPoolBuilder,
    access: u32,
    components: &[Vec<u8>],
) {
    if access & ACC_RECORD == 0 && components.is_empty() {
        return;
    }
    let mut info = Vec::new();
    write_u2(&mut info, components.len() as u16);
    for component in components {
        info.extend_from_slice(component);
    }
    list.push(cp, attrs::RECORD, info);
}

pub(crate) fn push_inner_classes(
    list: &mut AttributeList,
    cp: &mut ConstantPoolBuilder,
    classes: &[InnerClassNode],
) {
    if classes.is_empty() {
        return;
    }
    let mut info = Vec::new();
    write_u2(&mut info, classes.len() as u16);
    for inner in classes {
        write_u2(&mut info, cp.class(&inner.name));
        write_u2(&mut info, inner.outer_name.as_deref().map_or(0, |name| cp.class(name)));
        write_u2(&mut info, inner.inner_name.as_deref().map_or(0, |name| cp.utf8(name)));
        write_u2(&mut info, inner.access as u16);
    }
    list.push(cp, attrs::INNER_CLASSES, info);
}

pub(crate) fn push_enclosing_method(
    list: &mut AttributeList,
    cp: &mut ConstantPoolBuilder,
    outer: &OuterClassNode,
) {
    let mut info = Vec::with_capacity(4);
    write_u2(&mut info, cp.class(&outer.owner));
    let method = match (&outer.method_name, &outer.method_descriptor) {
        (Some(name), Some(descriptor)) => cp.name_and_type(name, descriptor),
        _ => 0,
    };
    write_u2(&mut info, method);
    list.push(cp, attrs::ENCLOSING_METHOD, info);
}

pub(crate) fn push_source(
    list: &mut AttributeList,
    cp: &mut ConstantPoolBuilder,
    source_file: Option<&str>,
    source_debug: Option<&str>,
) {
    if let Some(source_file) = source_file {
        let index = cp.utf8(source_file);
        list.push_u2(cp, attrs::SOURCE_FILE, index);
    }
    if let Some(debug) = source_debug {
        list.push(cp, attrs::SOURCE_DEBUG_EXTENSION, encode_modified_utf8(debug));
    }
}

/// `Module`, `ModulePackages` and `ModuleMainClass`.
pub(crate) fn push_module(
    list: &mut AttributeList,
    cp: &mut ConstantPoolBuilder,
    module: &ModuleNode,
) {
    let mut info = Vec::new();
    write_u2(&mut info, cp.module(&module.name));
    write_u2(&mut info, module.access as u16);
    write_u2(&mut info, module.version.as_deref().map_or(0, |version| cp.utf8(version)));
    write_u2(&mut info, module.requires.len() as u16);
    for require in &module.requires {
        write_u2(&mut info, cp.module(&require.module));
        write_u2(&mut info, require.access as u16);
        write_u2(&mut info, require.version.as_deref().map_or(0, |version| cp.utf8(version)));
    }
    for directives in [&module.exports, &module.opens] {
        write_u2(&mut info, directives.len() as u16);
        for directive in directives {
            write_u2(&mut info, cp.package(&directive.package));
            write_u2(&mut info, directive.access as u16);
            write_u2(&mut info, directive.modules.len() as u16);
            for target in &directive.modules {
                write_u2(&mut info, cp.module(target));
            }
        }
    }
    info.extend(class_table(cp, &module.uses));
    write_u2(&mut info, module.provides.len() as u16);
    for provide in &module.provides {
        write_u2(&mut info, cp.class(&provide.service));
        info.extend(class_table(cp, &provide.providers));
    }
    list.push(cp, attrs::MODULE, info);

    if !module.packages.is_empty() {
        let mut info = Vec::new();
        write_u2(&mut info, module.packages.len() as u16);
        for package in &module.packages {
            write_u2(&mut info, cp.package(package));
        }
        list.push(cp, attrs::MODULE_PACKAGES, info);
    }
    if let Some(main_class) = &module.main_class {
        let index = cp.class(main_class);
        list.push_u2(cp, attrs::MODULE_MAIN_CLASS, index);
    }
}

pub(crate) fn push_method_parameters(
    list: &mut AttributeList,
    cp: &mut ConstantPoolBuilder,
    parameters: &[ParameterNode],
) {
    if parameters.is_empty() {
        return;
    }
    let mut info = Vec::new();
    write_u1(&mut info, parameters.len() as u8);
    for parameter in parameters {
        write_u2(&mut info, parameter.name.as_deref().map_or(0, |name| cp.utf8(name)));
        write_u2(&mut info, parameter.access as u16);
    }
    list.push(cp, attrs::METHOD_PARAMETERS, info);
}

pub(crate) fn push_annotation_default(
    list: &mut AttributeList,
    cp: &mut ConstantPoolBuilder,
    value: &ElementValue,
) {
    let mut info = Vec::new();
    write_element_value(&mut info, cp, value);
    list.push(cp, attrs::ANNOTATION_DEFAULT, info);
}

pub(crate) fn push_parameter_annotations(
    list: &mut AttributeList,
    cp: &mut ConstantPoolBuilder,
    visible: Option<&[Vec<Annotation>]>,
    invisible: Option<&[Vec<Annotation>]>,
) {
    if let Some(parameters) = visible {
        let info = write_parameter_annotations(cp, parameters);
        list.push(cp, attrs::RUNTIME_VISIBLE_PARAMETER_ANNOTATIONS, info);
    }
    if let Some(parameters) = invisible {
        let info = write_parameter_annotations(cp, parameters);
        list.push(cp, attrs::RUNTIME_INVISIBLE_PARAMETER_ANNOTATIONS, info);
    }
}

/// Appends `BootstrapMethods` once every constant has been added.
pub(crate) fn push_bootstrap_methods(list: &mut AttributeList, cp: &mut ConstantPoolBuilder) {
    if let Some(info) = cp.bootstrap_methods_body() {
        list.push(cp, attrs::BOOTSTRAP_METHODS, info);
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ClassHeader {
    pub minor_version: u16,
    pub major_version: u16,
    pub access: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
}

pub(crate) fn write_class(
    cp: &ConstantPoolBuilder,
    header: &ClassHeader,
    fields: &[Vec<u8>],
    methods: &[Vec<u8>],
    attributes: &AttributeList,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_u4(&mut out, CLASS_MAGIC);
    write_u2(&mut out, header.minor_version);
    write_u2(&mut out, header.major_version);
    cp.write(&mut out)?;
    write_u2(&mut out, header.access);
    write_u2(&mut out, header.this_class);
    write_u2(&mut out, header.super_class);
    write_u2(&mut out, header.interfaces.len() as u16);
    for interface in &header.interfaces {
        write_u2(&mut out, *interface);
    }
    for members in [fields, methods] {
        write_u2(&mut out, members.len() as u16);
        for member in members {
            out.extend_from_slice(member);
        }
    }
    attributes.write(&mut out);
    Ok(out)
}

pub(crate) fn handle_index(cp: &mut ConstantPoolBuilder, handle: &Handle) -> u16 {
    cp.method_handle(
        handle.tag,
        &handle.owner,
        &handle.name,
        &handle.descriptor,
        handle.is_interface,
    )
}

/// Adds a loadable constant and returns its index.
pub(crate) fn constant_index(cp: &mut ConstantPoolBuilder, constant: &Constant) -> Result<u16> {
    let index = match constant {
        Constant::Integer(value) => cp.integer(*value),
        Constant::Float(value) => cp.float(*value),
        Constant::Long(value) => cp.long(*value),
        Constant::Double(value) => cp.double(*value),
        Constant::String(value) => cp.string(value),
        Constant::Type(ty) if ty.is_method() => cp.method_type(ty.descriptor()),
        Constant::Type(ty) if ty.descriptor().starts_with(|c| c == 'L' || c == '[') => {
            cp.class(ty.internal_name())
        }
        Constant::Type(ty) => {
            return Err(Error::unsupported_constant(format!(
                "primitive type {} is not loadable",
                ty.descriptor()
            )))
        }
        Constant::Handle(handle) => handle_index(cp, handle),
        Constant::Dynamic(dynamic) => {
            let bootstrap =
                bootstrap_index(cp, &dynamic.bootstrap_method, &dynamic.bootstrap_arguments)?;
            cp.dynamic(bootstrap, &dynamic.name, &dynamic.descriptor)
        }
    };
    Ok(index)
}

pub(crate) fn bootstrap_index(
    cp: &mut ConstantPoolBuilder,
    handle: &Handle,
    arguments: &[Constant],
) -> Result<u16> {
    let handle = handle_index(cp, handle);
    let arguments = arguments
        .iter()
        .map(|argument| constant_index(cp, argument))
        .collect::<Result<Vec<_>>>()?;
    Ok(cp.bootstrap_method(handle, arguments))
}

/// A method body with every position resolved to a bytecode offset.
#[derive(Debug, Default)]
pub(crate) struct CodeParts {
    pub code: Vec<u8>,
    pub max_stack: u16,
    pub max_locals: u16,
    pub handlers: Vec<HandlerInfo>,
    pub line_numbers: Vec<LineNumber>,
    pub local_variables: Vec<LocalVariable>,
    /// `descriptor` holds the signature.
    pub local_variable_types: Vec<LocalVariable>,
    /// Sorted by offset.
    pub frames: Vec<ExpandedFrame<FrameType>>,
    pub type_annotations: Vec<(TypeAnnotation<u16>, bool)>,
    pub attributes: Vec<Attribute>,
}

/// Builds the body of a `Code` attribute, computing maxs and frames as
/// `flags` asks.
pub(crate) fn assemble_code(
    cp: &mut ConstantPoolBuilder,
    method: &MethodContext<'_>,
    major: u16,
    flags: u32,
    resolver: &dyn HierarchyResolver,
    mut parts: CodeParts,
) -> Result<Vec<u8>> {
    let mut maxs = Maxs {
        max_stack: parts.max_stack,
        max_locals: parts.max_locals,
    };
    if flags & COMPUTE_FRAMES != 0 {
        let analysis = compute_frames(&parts.code, cp.pool(), method, &parts.handlers, resolver)?;
        if !analysis.dead_blocks.is_empty() {
            log::debug!(
                "replacing {} unreachable block(s) in {}{}",
                analysis.dead_blocks.len(),
                method.name,
                method.descriptor
            );
            remove_dead_code(&mut parts.code, &analysis.dead_blocks);
            parts.handlers = trim_handlers(&parts.handlers, &analysis.dead_blocks);
        }
        maxs = analysis.maxs;
        parts.frames = if major >= V1_6 { analysis.frames } else { Vec::new() };
    } else if flags & COMPUTE_MAXS != 0 {
        maxs = compute_maxs(&parts.code, cp.pool(), method, &parts.handlers)?;
    }

    let mut out = Vec::new();
    write_u2(&mut out, maxs.max_stack);
    write_u2(&mut out, maxs.max_locals);
    write_u4(&mut out, parts.code.len() as u32);
    out.extend_from_slice(&parts.code);
    write_u2(&mut out, parts.handlers.len() as u16);
    for handler in &parts.handlers {
        write_u2(&mut out, handler.start as u16);
        write_u2(&mut out, handler.end as u16);
        write_u2(&mut out, handler.handler as u16);
        write_u2(&mut out, handler.catch_type.as_deref().map_or(0, |name| cp.class(name)));
    }

    let mut list = AttributeList::default();
    if !parts.line_numbers.is_empty() {
        let mut info = Vec::new();
        write_u2(&mut info, parts.line_numbers.len() as u16);
        for line in &parts.line_numbers {
            write_u2(&mut info, line.start_pc);
            write_u2(&mut info, line.line_number);
        }
        list.push(cp, attrs::LINE_NUMBER_TABLE, info);
    }
    for (name, variables) in [
        (attrs::LOCAL_VARIABLE_TABLE, &parts.local_variables),
        (attrs::LOCAL_VARIABLE_TYPE_TABLE, &parts.local_variable_types),
    ] {
        if variables.is_empty() {
            continue;
        }
        let mut info = Vec::new();
        write_u2(&mut info, variables.len() as u16);
        for variable in variables {
            write_u2(&mut info, variable.start_pc);
            write_u2(&mut info, variable.length);
            write_u2(&mut info, cp.utf8(&variable.name));
            write_u2(&mut info, cp.utf8(&variable.descriptor));
            write_u2(&mut info, variable.index);
        }
        list.push(cp, name, info);
    }
    if !parts.frames.is_empty() {
        let initial = initial_locals(method.owner, method.access, method.name, method.descriptor);
        let entries = compress_frames(&initial, &parts.frames);
        let info = write_stack_map_table(cp, &entries);
        list.push(cp, attrs::STACK_MAP_TABLE, info);
    }
    for (wanted, name) in [
        (true, attrs::RUNTIME_VISIBLE_TYPE_ANNOTATIONS),
        (false, attrs::RUNTIME_INVISIBLE_TYPE_ANNOTATIONS),
    ] {
        let annotations: Vec<TypeAnnotation<u16>> = parts
            .type_annotations
            .iter()
            .filter(|(_, visible)| *visible == wanted)
            .map(|(annotation, _)| annotation.clone())
            .collect();
        if !annotations.is_empty() {
            let info = write_type_annotations(cp, &annotations);
            list.push(cp, name, info);
        }
    }
    for attribute in &parts.attributes {
        list.push_unknown(cp, attribute)?;
    }
    list.write(&mut out);
    Ok(out)
}

/// Annotations collected by a member writer.
#[derive(Debug, Default)]
struct AnnotationSet {
    visible: Vec<Annotation>,
    invisible: Vec<Annotation>,
    visible_type: Vec<TypeAnnotation>,
    invisible_type: Vec<TypeAnnotation>,
    attributes: Vec<Attribute>,
}

impl AnnotationSet {
    fn annotation(
        &mut self,
        descriptor: &str,
        visible: bool,
    ) -> Option<Box<dyn AnnotationVisitor + '_>> {
        let list = if visible { &mut self.visible } else { &mut self.invisible };
        annotation_sink(list, descriptor)
    }

    fn type_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        let target = TargetInfo::from_type_reference(type_ref)?;
        let list = if visible {
            &mut self.visible_type
        } else {
            &mut self.invisible_type
        };
        type_annotation_sink(list, target, type_path, descriptor)
    }

    fn member_attributes<'a>(&'a self, signature: Option<&'a str>) -> MemberAttributes<'a> {
        MemberAttributes {
            signature,
            visible_annotations: &self.visible,
            invisible_annotations: &self.invisible,
            visible_type_annotations: &self.visible_type,
            invisible_type_annotations: &self.invisible_type,
            attributes: &self.attributes,
        }
    }
}

/// A [`ClassVisitor`] that writes a class file.
///
/// ```
/// use classfile_bridge::class_writer::ClassWriter;
/// use classfile_bridge::constants::{ACC_PUBLIC, COMPUTE_FRAMES, V1_8};
/// use classfile_bridge::opcodes::RETURN;
/// use classfile_bridge::visitor::ClassVisitor;
///
/// # fn main() -> classfile_bridge::error::Result<()> {
/// let mut cw = ClassWriter::new(COMPUTE_FRAMES);
/// cw.visit(V1_8, 0, ACC_PUBLIC, "demo/Hello", None, Some("java/lang/Object"), &[])?;
/// if let Some(mut mv) = cw.visit_method(ACC_PUBLIC, "run", "()V", None, &[])? {
///     mv.visit_code()?;
///     mv.visit_insn(RETURN)?;
///     mv.visit_maxs(0, 0)?;
///     mv.visit_end()?;
/// }
/// cw.visit_end()?;
/// let bytes = cw.to_bytes()?;
/// assert_eq!(&bytes[..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
/// # Ok(())
/// # }
/// ```
pub struct ClassWriter {
    flags: u32,
    cp: ConstantPoolBuilder,
    resolver: Box<dyn HierarchyResolver>,
    header: ClassHeader,
    access: u32,
    name: String,
    signature: Option<String>,
    source_file: Option<String>,
    source_debug: Option<String>,
    module: Option<ModuleNode>,
    nest_host: Option<String>,
    outer_class: Option<OuterClassNode>,
    annotations: AnnotationSet,
    nest_members: Vec<String>,
    permitted_subclasses: Vec<String>,
    inner_classes: Vec<InnerClassNode>,
    record_components: Vec<Vec<u8>>,
    fields: Vec<Vec<u8>>,
    methods: Vec<Vec<u8>>,
    finished: Option<AttributeList>,
    failed: FailureFlag,
}

impl ClassWriter {
    /// `flags` is a combination of [`COMPUTE_MAXS`] and [`COMPUTE_FRAMES`].
    pub fn new(flags: u32) -> Self {
        Self::with_pool(flags, ConstantPoolBuilder::new())
    }

    fn with_pool(flags: u32, cp: ConstantPoolBuilder) -> Self {
        Self {
            flags,
            cp,
            resolver: Box::new(ClassHierarchy::default()),
            header: ClassHeader::default(),
            access: 0,
            name: String::new(),
            signature: None,
            source_file: None,
            source_debug: None,
            module: None,
            nest_host: None,
            outer_class: None,
            annotations: AnnotationSet::default(),
            nest_members: Vec::new(),
            permitted_subclasses: Vec::new(),
            inner_classes: Vec::new(),
            record_components: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            finished: None,
            failed: FailureFlag::default(),
        }
    }

    /// Starts from the constant pool of `reader` so entries keep their
    /// indices when the class is copied with few changes.
    pub fn from_reader(reader: &ClassReader, flags: u32) -> Result<Self> {
        let class_file = reader.class_file()?;
        Ok(Self::with_pool(flags, ConstantPoolBuilder::from_snapshot(&class_file.snapshot())))
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

    /// The finished class file. Fails before `visit_end` and after any
    /// failed visit.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.failed.ensure_clear(&self.name)?;
        let attributes = self
            .finished
            .as_ref()
            .ok_or_else(|| Error::protocol("to_bytes called before visit_end"))?;
        write_class(&self.cp, &self.header, &self.fields, &self.methods, attributes)
    }

    pub fn constant_pool(&self) -> &ConstantPoolBuilder {
        &self.cp
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finished.is_some() {
            return Err(Error::protocol("class visited after visit_end"));
        }
        Ok(())
    }
}

impl ClassVisitor for ClassWriter {
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
        if major > VISITOR_CODEC_MAX_MAJOR {
            return self.failed.check(Err(Error::UnsupportedVersion {
                major,
                ceiling: VISITOR_CODEC_MAX_MAJOR,
            }));
        }
        self.access = access;
        self.name = name.to_string();
        self.signature = signature.map(str::to_string);
        self.header = ClassHeader {
            minor_version: minor,
            major_version: major,
            access: class_file_access(access, major),
            this_class: self.cp.class(name),
            super_class: super_name.map_or(0, |super_name| self.cp.class(super_name)),
            interfaces: interfaces.iter().map(|interface| self.cp.class(interface)).collect(),
        };
        Ok(())
    }

    fn visit_source(&mut self, source: Option<&str>, debug: Option<&str>) -> Result<()> {
        self.source_file = source.map(str::to_string);
        self.source_debug = debug.map(str::to_string);
        Ok(())
    }

    fn visit_module(
        &mut self,
        name: &str,
        access: u32,
        version: Option<&str>,
    ) -> Result<Option<Box<dyn ModuleVisitor + '_>>> {
        let module = self.module.insert(ModuleNode {
            name: name.to_string(),
            access,
            version: version.map(str::to_string),
            ..ModuleNode::default()
        });
        Ok(Some(self.failed.guard(Box::new(ModuleWriter { module }))))
    }

    fn visit_nest_host(&mut self, nest_host: &str) -> Result<()> {
        self.nest_host = Some(nest_host.to_string());
        Ok(())
    }

    fn visit_outer_class(
        &mut self,
        owner: &str,
        name: Option<&str>,
        descriptor: Option<&str>,
    ) -> Result<()> {
        self.outer_class = Some(OuterClassNode {
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
        self.failed.child(Ok(self.annotations.annotation(descriptor, visible)))
    }

    fn visit_type_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        let child = self.annotations.type_annotation(type_ref, type_path, descriptor, visible);
        self.failed.child(child)
    }

    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.annotations.attributes.push(attribute.clone());
        Ok(())
    }

    fn visit_nest_member(&mut self, nest_member: &str) -> Result<()> {
        self.nest_members.push(nest_member.to_string());
        Ok(())
    }

    fn visit_permitted_subclass(&mut self, permitted_subclass: &str) -> Result<()> {
        self.permitted_subclasses.push(permitted_subclass.to_string());
        Ok(())
    }

    fn visit_inner_class(
        &mut self,
        name: &str,
        outer_name: Option<&str>,
        inner_name: Option<&str>,
        access: u32,
    ) -> Result<()> {
        self.inner_classes.push(InnerClassNode {
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
        let failed = self.failed.clone();
        Ok(Some(failed.guard(Box::new(RecordComponentWriter {
            cw: self,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            signature: signature.map(str::to_string),
            annotations: AnnotationSet::default(),
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
        let failed = self.failed.clone();
        let value = value.map(|value| constant_index(&mut self.cp, value)).transpose();
        let value = failed.check(value)?;
        Ok(Some(failed.guard(Box::new(FieldWriter {
            cw: self,
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            signature: signature.map(str::to_string),
            value,
            annotations: AnnotationSet::default(),
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
        let failed = self.failed.clone();
        Ok(Some(failed.guard(Box::new(MethodWriter {
            cw: self,
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            signature: signature.map(str::to_string),
            exceptions: exceptions.to_vec(),
            parameters: Vec::new(),
            annotation_default: None,
            annotations: AnnotationSet::default(),
            visible_parameter_annotations: None,
            invisible_parameter_annotations: None,
            code: None,
        }))))
    }

    fn visit_end(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.failed.ensure_clear(&self.name)?;
        let major = self.header.major_version;
        let cp = &mut self.cp;
        let mut list = AttributeList::default();
        push_source(&mut list, cp, self.source_file.as_deref(), self.source_debug.as_deref());
        push_inner_classes(&mut list, cp, &self.inner_classes);
        if let Some(outer) = &self.outer_class {
            push_enclosing_method(&mut list, cp, outer);
        }
        push_flag_attributes(&mut list, cp, self.access, major);
        if let Some(module) = &self.module {
            push_module(&mut list, cp, module);
        }
        if let Some(host) = &self.nest_host {
            let index = cp.class(host);
            list.push_u2(cp, attrs::NEST_HOST, index);
        }
        if !self.nest_members.is_empty() {
            list.push_classes(cp, attrs::NEST_MEMBERS, &self.nest_members);
        }
        if !self.permitted_subclasses.is_empty() {
            list.push_classes(cp, attrs::PERMITTED_SUBCLASSES, &self.permitted_subclasses);
        }
        push_record(&mut list, cp, self.access, &self.record_components);
        let annotations = self.annotations.member_attributes(self.signature.as_deref());
        self.failed.check(annotations.push_into(&mut list, cp))?;
        push_bootstrap_methods(&mut list, cp);
        log::trace!("finished class {} with {} method(s)", self.name, self.methods.len());
        self.finished = Some(list);
        Ok(())
    }
}

/// Collects module directives into a [`ModuleNode`].
pub(crate) struct ModuleWriter<'a> {
    pub(crate) module: &'a mut ModuleNode,
}

impl ModuleVisitor for ModuleWriter<'_> {
    fn visit_main_class(&mut self, main_class: &str) -> Result<()> {
        self.module.main_class = Some(main_class.to_string());
        Ok(())
    }

    fn visit_package(&mut self, package: &str) -> Result<()> {
        self.module.packages.push(package.to_string());
        Ok(())
    }

    fn visit_require(&mut self, module: &str, access: u32, version: Option<&str>) -> Result<()> {
        self.module.requires.push(ModuleRequireNode {
            module: module.to_string(),
            access,
            version: version.map(str::to_string),
        });
        Ok(())
    }

    fn visit_export(&mut self, package: &str, access: u32, modules: &[String]) -> Result<()> {
        self.module.exports.push(ModuleExportNode {
            package: package.to_string(),
            access,
            modules: modules.to_vec(),
        });
        Ok(())
    }

    fn visit_open(&mut self, package: &str, access: u32, modules: &[String]) -> Result<()> {
        self.module.opens.push(ModuleExportNode {
            package: package.to_string(),
            access,
            modules: modules.to_vec(),
        });
        Ok(())
    }

    fn visit_use(&mut self, service: &str) -> Result<()> {
        self.module.uses.push(service.to_string());
        Ok(())
    }

    fn visit_provide(&mut self, service: &str, providers: &[String]) -> Result<()> {
        self.module.provides.push(ModuleProvideNode {
            service: service.to_string(),
            providers: providers.to_vec(),
        });
        Ok(())
    }
}

struct RecordComponentWriter<'a> {
    cw: &'a mut ClassWriter,
    name: String,
    descriptor: String,
    signature: Option<String>,
    annotations: AnnotationSet,
}

impl RecordComponentVisitor for RecordComponentWriter<'_> {
    fn visit_annotation(
        &mut self,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(self.annotations.annotation(descriptor, visible))
    }

    fn visit_type_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        self.annotations.type_annotation(type_ref, type_path, descriptor, visible)
    }

    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.annotations.attributes.push(attribute.clone());
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        let cp = &mut self.cw.cp;
        let mut list = AttributeList::default();
        self.annotations
            .member_attributes(self.signature.as_deref())
            .push_into(&mut list, cp)?;
        let component = write_record_component(cp, &self.name, &self.descriptor, &list);
        self.cw.record_components.push(component);
        Ok(())
    }
}

struct FieldWriter<'a> {
    cw: &'a mut ClassWriter,
    access: u32,
    name: String,
    descriptor: String,
    signature: Option<String>,
    value: Option<u16>,
    annotations: AnnotationSet,
}

impl FieldVisitor for FieldWriter<'_> {
    fn visit_annotation(
        &mut self,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(self.annotations.annotation(descriptor, visible))
    }

    fn visit_type_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        self.annotations.type_annotation(type_ref, type_path, descriptor, visible)
    }

    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.annotations.attributes.push(attribute.clone());
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        let major = self.cw.header.major_version;
        let cp = &mut self.cw.cp;
        let mut list = AttributeList::default();
        if let Some(index) = self.value {
            list.push_u2(cp, attrs::CONSTANT_VALUE, index);
        }
        push_flag_attributes(&mut list, cp, self.access, major);
        self.annotations
            .member_attributes(self.signature.as_deref())
            .push_into(&mut list, cp)?;
        let access = class_file_access(self.access, major);
        let field = write_member(cp, access, &self.name, &self.descriptor, &list);
        self.cw.fields.push(field);
        Ok(())
    }
}

/// A code position in a type annotation: the offset of an instruction
/// already written, or a label bound later.
#[derive(Debug, Clone, Copy)]
enum Position {
    Offset(usize),
    Label(Label),
}

/// Code being written by a [`MethodWriter`].
#[derive(Debug, Default)]
struct CodeState {
    emitter: CodeEmitter<Label>,
    handlers: Vec<(Label, Label, Label, Option<String>)>,
    line_numbers: Vec<(u16, Label)>,
    local_variables: Vec<(String, String, Option<String>, Label, Label, u16)>,
    frames: Vec<(usize, Vec<FrameValue>, Vec<FrameValue>)>,
    frame_locals: FrameExpander,
    type_annotations: Vec<(TypeAnnotation<Position>, bool)>,
    attributes: Vec<Attribute>,
    max_stack: u16,
    max_locals: u16,
}

fn label_offset(labels: &HashMap<Label, usize>, label: Label) -> Result<usize> {
    labels
        .get(&label)
        .copied()
        .ok_or_else(|| ClassWriteError::UnboundLabel(format!("L{}", label.id())).into())
}

fn frame_value_of(value: &FrameType) -> FrameValue {
    match value {
        FrameType::Top => FrameValue::Top,
        FrameType::Integer => FrameValue::Integer,
        FrameType::Float => FrameValue::Float,
        FrameType::Double => FrameValue::Double,
        FrameType::Long => FrameValue::Long,
        FrameType::Null => FrameValue::Null,
        FrameType::UninitializedThis => FrameValue::UninitializedThis,
        FrameType::Object(name) => FrameValue::Object(name.clone()),
        // Never part of an initial frame.
        FrameType::Uninitialized(_) => FrameValue::Top,
    }
}

fn frame_type_of(value: &FrameValue, labels: &HashMap<Label, usize>) -> Result<FrameType> {
    Ok(match value {
        FrameValue::Top => FrameType::Top,
        FrameValue::Integer => FrameType::Integer,
        FrameValue::Float => FrameType::Float,
        FrameValue::Double => FrameType::Double,
        FrameValue::Long => FrameType::Long,
        FrameValue::Null => FrameType::Null,
        FrameValue::UninitializedThis => FrameType::UninitializedThis,
        FrameValue::Object(name) => FrameType::Object(name.clone()),
        FrameValue::Uninitialized(label) => {
            FrameType::Uninitialized(label_offset(labels, *label)? as u16)
        }
    })
}

struct MethodWriter<'a> {
    cw: &'a mut ClassWriter,
    access: u32,
    name: String,
    descriptor: String,
    signature: Option<String>,
    exceptions: Vec<String>,
    parameters: Vec<ParameterNode>,
    annotation_default: Option<ElementValue>,
    annotations: AnnotationSet,
    visible_parameter_annotations: Option<Vec<Vec<Annotation>>>,
    invisible_parameter_annotations: Option<Vec<Vec<Annotation>>>,
    code: Option<CodeState>,
}

impl MethodWriter<'_> {
    fn code(&mut self) -> Result<&mut CodeState> {
        self.code
            .as_mut()
            .ok_or_else(|| Error::protocol("instruction visited before visit_code"))
    }

    fn context(&self) -> MethodContext<'_> {
        MethodContext {
            owner: &self.cw.name,
            access: self.access,
            name: &self.name,
            descriptor: &self.descriptor,
        }
    }

    fn finish_code(&mut self, state: CodeState) -> Result<Vec<u8>> {
        let (code, labels) = state.emitter.finish(&self.name)?;
        let mut parts = CodeParts {
            code,
            max_stack: state.max_stack,
            max_locals: state.max_locals,
            attributes: state.attributes,
            ..CodeParts::default()
        };
        for (start, end, handler, catch_type) in state.handlers {
            parts.handlers.push(HandlerInfo {
                start: label_offset(&labels, start)?,
                end: label_offset(&labels, end)?,
                handler: label_offset(&labels, handler)?,
                catch_type,
            });
        }
        for (line, start) in state.line_numbers {
            parts.line_numbers.push(LineNumber {
                start_pc: label_offset(&labels, start)? as u16,
                line_number: line,
            });
        }
        for (name, descriptor, signature, start, end, index) in state.local_variables {
            let start_pc = label_offset(&labels, start)? as u16;
            let length = (label_offset(&labels, end)? as u16).wrapping_sub(start_pc);
            if let Some(signature) = signature {
                parts.local_variable_types.push(LocalVariable {
                    start_pc,
                    length,
                    name: name.clone(),
                    descriptor: signature,
                    index,
                });
            }
            parts.local_variables.push(LocalVariable {
                start_pc,
                length,
                name,
                descriptor,
                index,
            });
        }
        for (offset, locals, stack) in &state.frames {
            let locals = locals
                .iter()
                .map(|value| frame_type_of(value, &labels))
                .collect::<Result<Vec<_>>>()?;
            let stack = stack
                .iter()
                .map(|value| frame_type_of(value, &labels))
                .collect::<Result<Vec<_>>>()?;
            parts.frames.push(ExpandedFrame {
                offset: *offset as u16,
                locals,
                stack,
            });
        }
        for (annotation, visible) in state.type_annotations {
            let annotation = annotation.map_positions(|position| match position {
                Position::Offset(offset) => Ok(offset as u16),
                Position::Label(label) => label_offset(&labels, label).map(|offset| offset as u16),
            })?;
            parts.type_annotations.push((annotation, visible));
        }

        let major = self.cw.header.major_version;
        let flags = self.cw.flags;
        let context = MethodContext {
            owner: &self.cw.name,
            access: self.access,
            name: &self.name,
            descriptor: &self.descriptor,
        };
        assemble_code(&mut self.cw.cp, &context, major, flags, self.cw.resolver.as_ref(), parts)
    }
}

impl MethodVisitor for MethodWriter<'_> {
    fn visit_parameter(&mut self, name: Option<&str>, access: u32) -> Result<()> {
        self.parameters.push(ParameterNode {
            name: name.map(str::to_string),
            access,
        });
        Ok(())
    }

    fn visit_annotation_default(&mut self) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(Some(Box::new(AnnotationNodeBuilder::for_default(&mut self.annotation_default))))
    }

    fn visit_annotation(
        &mut self,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(self.annotations.annotation(descriptor, visible))
    }

    fn visit_type_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        self.annotations.type_annotation(type_ref, type_path, descriptor, visible)
    }

    fn visit_annotable_parameter_count(&mut self, count: u8, visible: bool) -> Result<()> {
        let parameters = vec![Vec::new(); count as usize];
        if visible {
            self.visible_parameter_annotations = Some(parameters);
        } else {
            self.invisible_parameter_annotations = Some(parameters);
        }
        Ok(())
    }

    fn visit_parameter_annotation(
        &mut self,
        parameter: u8,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        let declared = parameter_descriptors(&self.descriptor).len();
        let slot = if visible {
            &mut self.visible_parameter_annotations
        } else {
            &mut self.invisible_parameter_annotations
        };
        let parameters = slot.get_or_insert_with(|| vec![Vec::new(); declared]);
        let index = parameter as usize;
        if index >= parameters.len() {
            parameters.resize(index + 1, Vec::new());
        }
        Ok(annotation_sink(&mut parameters[index], descriptor))
    }

    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.annotations.attributes.push(attribute.clone());
        Ok(())
    }

    fn visit_code(&mut self) -> Result<()> {
        let context = self.context();
        let frame_locals =
            initial_locals(context.owner, context.access, context.name, context.descriptor)
                .iter()
                .map(frame_value_of)
                .collect();
        self.code = Some(CodeState {
            frame_locals: FrameExpander::new(frame_locals),
            ..CodeState::default()
        });
        Ok(())
    }

    fn visit_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.cw.flags & COMPUTE_FRAMES != 0 {
            return Ok(());
        }
        let code = self.code()?;
        let (locals, stack) = code.frame_locals.expand(frame)?;
        let offset = code.emitter.offset();
        if code.frames.last().is_some_and(|(last, _, _)| *last == offset) {
            return Err(Error::protocol(format!("two frames at offset {offset}")));
        }
        code.frames.push((offset, locals, stack));
        Ok(())
    }

    fn visit_insn(&mut self, opcode: u8) -> Result<()> {
        self.code()?.emitter.simple(opcode);
        Ok(())
    }

    fn visit_int_insn(&mut self, opcode: u8, operand: i32) -> Result<()> {
        if !int_operand_fits(opcode, operand) {
            return Err(Error::protocol(format!(
                "invalid int instruction {opcode:#04x} {operand}"
            )));
        }
        self.code()?.emitter.int_insn(opcode, operand);
        Ok(())
    }

    fn visit_var_insn(&mut self, opcode: u8, var: u16) -> Result<()> {
        self.code()?.emitter.var(opcode, var);
        Ok(())
    }

    fn visit_type_insn(&mut self, opcode: u8, type_name: &str) -> Result<()> {
        let index = self.cw.cp.class(type_name);
        self.code()?.emitter.cp_insn(opcode, index);
        Ok(())
    }

    fn visit_field_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<()> {
        let index = self.cw.cp.field_ref(owner, name, descriptor);
        self.code()?.emitter.cp_insn(opcode, index);
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
        let index = self.cw.cp.method_ref(owner, name, descriptor, is_interface);
        let emitter = &mut self.code()?.emitter;
        if opcode == INVOKEINTERFACE {
            emitter.invokeinterface(index, descriptor);
        } else {
            emitter.cp_insn(opcode, index);
        }
        Ok(())
    }

    fn visit_invoke_dynamic_insn(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap_method: &Handle,
        bootstrap_arguments: &[Constant],
    ) -> Result<()> {
        let bootstrap = bootstrap_index(&mut self.cw.cp, bootstrap_method, bootstrap_arguments)?;
        let index = self.cw.cp.invoke_dynamic(bootstrap, name, descriptor);
        self.code()?.emitter.invokedynamic(index);
        Ok(())
    }

    fn visit_jump_insn(&mut self, opcode: u8, label: Label) -> Result<()> {
        self.code()?.emitter.jump(opcode, label);
        Ok(())
    }

    fn visit_label(&mut self, label: Label) -> Result<()> {
        self.code()?.emitter.bind(label)
    }

    fn visit_ldc_insn(&mut self, value: &Constant) -> Result<()> {
        let index = constant_index(&mut self.cw.cp, value)?;
        self.code()?.emitter.ldc(index, value.is_wide());
        Ok(())
    }

    fn visit_iinc_insn(&mut self, var: u16, increment: i16) -> Result<()> {
        self.code()?.emitter.iinc(var, increment);
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
        self.code()?.emitter.table_switch(min, max, default, labels);
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
        let pairs: Vec<(i32, Label)> = keys.iter().copied().zip(labels.iter().copied()).collect();
        self.code()?.emitter.lookup_switch(default, &pairs);
        Ok(())
    }

    fn visit_multi_anew_array_insn(&mut self, descriptor: &str, dimensions: u8) -> Result<()> {
        let index = self.cw.cp.class(descriptor);
        self.code()?.emitter.multianewarray(index, dimensions);
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
        let offset = code
            .emitter
            .last_instruction_offset()
            .ok_or_else(|| Error::protocol("instruction annotation before any instruction"))?;
        let target = TargetInfo::at_position(type_ref, Position::Offset(offset))?;
        code_annotation_sink(&mut code.type_annotations, target, type_path, descriptor, visible)
    }

    fn visit_try_catch_block(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> Result<()> {
        self.code()?
            .handlers
            .push((start, end, handler, catch_type.map(str::to_string)));
        Ok(())
    }

    fn visit_try_catch_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        let code = self.code()?;
        let target = TargetInfo::from_type_reference(type_ref)?;
        code_annotation_sink(&mut code.type_annotations, target, type_path, descriptor, visible)
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
        self.code()?.local_variables.push((
            name.to_string(),
            descriptor.to_string(),
            signature.map(str::to_string),
            start,
            end,
            index,
        ));
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
        let ranges = start
            .iter()
            .zip(end)
            .zip(index)
            .map(|((start, end), index)| LocalVarTarget {
                start: Position::Label(*start),
                end: Position::Label(*end),
                index: *index,
            })
            .collect();
        let code = self.code()?;
        let target = TargetInfo::local_variable(type_ref, ranges)?;
        code_annotation_sink(&mut code.type_annotations, target, type_path, descriptor, visible)
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<()> {
        self.code()?.line_numbers.push((line, start));
        Ok(())
    }

    fn visit_code_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.code()?.attributes.push(attribute.clone());
        Ok(())
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) -> Result<()> {
        let code = self.code()?;
        code.max_stack = max_stack;
        code.max_locals = max_locals;
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        let major = self.cw.header.major_version;
        let code = match self.code.take() {
            Some(state) => Some(self.finish_code(state)?),
            None => None,
        };
        let cp = &mut self.cw.cp;
        let mut list = AttributeList::default();
        if let Some(code) = code {
            list.push(cp, attrs::CODE, code);
        }
        if !self.exceptions.is_empty() {
            list.push_classes(cp, attrs::EXCEPTIONS, &self.exceptions);
        }
        push_flag_attributes(&mut list, cp, self.access, major);
        push_method_parameters(&mut list, cp, &self.parameters);
        if let Some(value) = &self.annotation_default {
            push_annotation_default(&mut list, cp, value);
        }
        push_parameter_annotations(
            &mut list,
            cp,
            self.visible_parameter_annotations.as_deref(),
            self.invisible_parameter_annotations.as_deref(),
        );
        self.annotations
            .member_attributes(self.signature.as_deref())
            .push_into(&mut list, cp)?;
        let access = class_file_access(self.access, major);
        let method = write_member(cp, access, &self.name, &self.descriptor, &list);
        self.cw.methods.push(method);
        Ok(())
    }
}

fn code_annotation_sink<'v>(
    list: &'v mut Vec<(TypeAnnotation<Position>, bool)>,
    target: TargetInfo<Position>,
    type_path: Option<&TypePath>,
    descriptor: &str,
    visible: bool,
) -> Result<Option<Box<dyn AnnotationVisitor + 'v>>> {
    let path = model_type_path(type_path)?;
    list.push((
        TypeAnnotation {
            target,
            path,
            annotation: Annotation::new(descriptor),
        },
        visible,
    ));
    Ok(list.last_mut().map(|(last, _)| {
        Box::new(AnnotationNodeBuilder::for_annotation(&mut last.annotation))
            as Box<dyn AnnotationVisitor + 'v>
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameDelta;
    use crate::class_reader::{read_class_file, AttributeInfo};
    use crate::attribute::AttributeRegistry;
    use crate::opcodes::*;
    use pretty_assertions::assert_eq;

    fn header(cw: &mut ClassWriter, major: u16) {
        cw.visit(major, 0, ACC_PUBLIC, "demo/Sample", None, Some("java/lang/Object"), &[])
            .unwrap();
    }

    #[test]
    fn writes_a_parsable_class() {
        let mut cw = ClassWriter::new(COMPUTE_MAXS);
        header(&mut cw, V1_8);
        cw.visit_source(Some("Sample.java"), None).unwrap();
        {
            let access = ACC_PRIVATE | ACC_STATIC | ACC_FINAL;
            let mut fv = cw
                .visit_field(access, "LIMIT", "I", None, Some(&Constant::Integer(7)))
                .unwrap()
                .unwrap();
            fv.visit_end().unwrap();
        }
        {
            let mut mv = cw.visit_method(ACC_PUBLIC, "<init>", "()V", None, &[]).unwrap().unwrap();
            mv.visit_code().unwrap();
            mv.visit_var_insn(ALOAD, 0).unwrap();
            mv.visit_method_insn(INVOKESPECIAL, "java/lang/Object", "<init>", "()V", false)
                .unwrap();
            mv.visit_insn(RETURN).unwrap();
            mv.visit_maxs(0, 0).unwrap();
            mv.visit_end().unwrap();
        }
        cw.visit_end().unwrap();

        let bytes = cw.to_bytes().unwrap();
        let class_file = read_class_file(&bytes, &AttributeRegistry::new()).unwrap();
        assert_eq!(class_file.name, "demo/Sample");
        assert_eq!(class_file.super_name.as_deref(), Some("java/lang/Object"));
        assert_eq!(class_file.fields[0].name, "LIMIT");
        assert!(matches!(
            class_file.attributes[0],
            AttributeInfo::SourceFile(ref source) if source == "Sample.java"
        ));
        let Some(AttributeInfo::Code(code)) = class_file.methods[0].attributes.first() else {
            panic!("constructor has no code");
        };
        assert_eq!((code.max_stack, code.max_locals), (1, 1));
        assert_eq!(code.code.len(), 5);
        assert_eq!(code.code[0], ALOAD_0);
        assert_eq!(code.code[4], RETURN);
    }

    #[test]
    fn versions_above_the_ceiling_are_rejected() {
        let mut cw = ClassWriter::new(0);
        let err = cw
            .visit(V21 + 1, 0, ACC_PUBLIC, "demo/Sample", None, Some("java/lang/Object"), &[])
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion { major: 66, ceiling: 65 }));
    }

    #[test]
    fn to_bytes_requires_visit_end() {
        let mut cw = ClassWriter::new(0);
        header(&mut cw, V1_8);
        assert!(matches!(cw.to_bytes(), Err(Error::ProtocolViolation(_))));
    }

    #[test]
    fn unbound_labels_fail_the_method() {
        let mut cw = ClassWriter::new(0);
        header(&mut cw, V1_8);
        let mut mv = cw.visit_method(ACC_STATIC, "loop", "()V", None, &[]).unwrap().unwrap();
        mv.visit_code().unwrap();
        mv.visit_jump_insn(GOTO, Label::new()).unwrap();
        let err = mv.visit_end().unwrap_err();
        assert!(matches!(err, Error::ClassWrite(ClassWriteError::UnboundLabel(_))));
    }

    #[test]
    fn failed_method_keeps_the_class_from_finishing() {
        let mut cw = ClassWriter::new(0);
        header(&mut cw, V1_8);
        {
            let mut mv = cw.visit_method(ACC_STATIC, "spin", "()V", None, &[]).unwrap().unwrap();
            mv.visit_code().unwrap();
            mv.visit_jump_insn(GOTO, Label::new()).unwrap();
            mv.visit_maxs(0, 0).unwrap();
            assert!(mv.visit_end().is_err());
        }
        assert!(matches!(cw.visit_end(), Err(Error::ProtocolViolation(_))));
        assert!(matches!(cw.to_bytes(), Err(Error::ProtocolViolation(_))));
    }

    #[test]
    fn push_operands_must_fit_their_immediate() {
        let mut cw = ClassWriter::new(0);
        header(&mut cw, V1_8);
        let mut mv = cw.visit_method(ACC_STATIC, "push", "()V", None, &[]).unwrap().unwrap();
        mv.visit_code().unwrap();
        mv.visit_int_insn(BIPUSH, 127).unwrap();
        mv.visit_int_insn(SIPUSH, -32768).unwrap();
        assert!(matches!(mv.visit_int_insn(BIPUSH, 200), Err(Error::ProtocolViolation(_))));
        assert!(matches!(mv.visit_int_insn(SIPUSH, 40000), Err(Error::ProtocolViolation(_))));
    }

    #[test]
    fn synthetic_becomes_an_attribute_before_java_5() {
        assert_eq!(
            class_file_access(ACC_PUBLIC | ACC_SYNTHETIC | ACC_DEPRECATED, V1_1),
            ACC_PUBLIC as u16
        );
        assert_eq!(
            class_file_access(ACC_PUBLIC | ACC_SYNTHETIC | ACC_RECORD, V1_8),
            (ACC_PUBLIC | ACC_SYNTHETIC) as u16
        );
    }

    #[test]
    fn computed_frames_cover_branch_targets() {
        let mut cw = ClassWriter::new(COMPUTE_FRAMES);
        header(&mut cw, V1_8);
        {
            let mut mv = cw.visit_method(ACC_STATIC, "abs", "(I)I", None, &[]).unwrap().unwrap();
            let negative = Label::new();
            mv.visit_code().unwrap();
            mv.visit_var_insn(ILOAD, 0).unwrap();
            mv.visit_jump_insn(IFLT, negative).unwrap();
            mv.visit_var_insn(ILOAD, 0).unwrap();
            mv.visit_insn(IRETURN).unwrap();
            mv.visit_label(negative).unwrap();
            mv.visit_var_insn(ILOAD, 0).unwrap();
            mv.visit_insn(INEG).unwrap();
            mv.visit_insn(IRETURN).unwrap();
            mv.visit_maxs(0, 0).unwrap();
            mv.visit_end().unwrap();
        }
        cw.visit_end().unwrap();

        let bytes = cw.to_bytes().unwrap();
        let class_file = read_class_file(&bytes, &AttributeRegistry::new()).unwrap();
        let Some(AttributeInfo::Code(code)) = class_file.methods[0].attributes.first() else {
            panic!("method has no code");
        };
        assert_eq!((code.max_stack, code.max_locals), (1, 1));
        assert_eq!(code.stack_map(), Some(&[(6, FrameDelta::Same)][..]));
    }
}
