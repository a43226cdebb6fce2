//! Class file parsing and the visitor codec reader.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;

use crate::annotation::{
    read_annotations, read_element_value, read_parameter_annotations, read_type_annotations,
    Annotation, ElementValue, TargetInfo, TypeAnnotation,
};
use crate::attribute::{Attribute, AttributeRegistry};
use crate::bytecode::{decode_code, Operand, ParsedInstruction};
use crate::bridge::annotations::{accept_annotation, visitor_type_path};
use crate::bytes::ByteReader;
use crate::constant_pool::{BootstrapMethod, ConstantPool, ConstantPoolSnapshot, CpInfo};
use crate::constants::*;
use crate::error::{ClassReadError, Error, Result};
use crate::frame::{read_stack_map_table, FrameDelta, FrameType};
use crate::nodes::{
    InnerClassNode, ModuleExportNode, ModuleNode, ModuleProvideNode, ModuleRequireNode,
    OuterClassNode, ParameterNode,
};
use crate::opcodes::*;
use crate::types::{Constant, ConstantDynamic, Frame, FrameValue, Handle, Type};
use crate::visitor::{ClassVisitor, Label, MethodVisitor};

/// A parsed class file with symbolic references resolved to names.
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub bootstrap_methods: Vec<BootstrapMethod>,
    pub access_flags: u16,
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<AttributeInfo>,
}

impl ClassFile {
    pub fn snapshot(&self) -> ConstantPoolSnapshot {
        ConstantPoolSnapshot {
            pool: self.constant_pool.clone(),
            bootstrap_methods: self.bootstrap_methods.clone(),
        }
    }

    /// Resolves a loadable constant pool entry.
    pub fn constant(&self, index: u16) -> std::result::Result<Constant, ClassReadError> {
        read_constant(&self.constant_pool, &self.bootstrap_methods, index)
    }

    /// The bootstrap handle and arguments of a `BootstrapMethods` entry.
    pub fn bootstrap(
        &self,
        index: u16,
    ) -> std::result::Result<(Handle, Vec<Constant>), ClassReadError> {
        read_bootstrap(&self.constant_pool, &self.bootstrap_methods, index)
    }
}

/// A field or method.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Debug, Clone)]
pub struct RecordComponentInfo {
    pub name: String,
    pub descriptor: String,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Debug, Clone)]
pub enum AttributeInfo {
    Code(CodeAttribute),
    /// Index of the constant.
    ConstantValue(u16),
    Exceptions(Vec<String>),
    SourceFile(String),
    SourceDebugExtension(String),
    LineNumberTable(Vec<LineNumber>),
    LocalVariableTable(Vec<LocalVariable>),
    /// Same layout as `LocalVariableTable`; `descriptor` holds the
    /// signature.
    LocalVariableTypeTable(Vec<LocalVariable>),
    Signature(String),
    StackMapTable(Vec<(u16, FrameDelta<FrameType>)>),
    Deprecated,
    Synthetic,
    InnerClasses(Vec<InnerClassNode>),
    EnclosingMethod(OuterClassNode),
    NestHost(String),
    NestMembers(Vec<String>),
    PermittedSubclasses(Vec<String>),
    Record(Vec<RecordComponentInfo>),
    MethodParameters(Vec<ParameterNode>),
    Module(ModuleNode),
    ModulePackages(Vec<String>),
    ModuleMainClass(String),
    AnnotationDefault(ElementValue),
    Annotations { visible: bool, annotations: Vec<Annotation> },
    ParameterAnnotations { visible: bool, parameters: Vec<Vec<Annotation>> },
    TypeAnnotations { visible: bool, annotations: Vec<TypeAnnotation<u16>> },
    Unknown(Attribute),
}

#[derive(Debug, Clone)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub attributes: Vec<AttributeInfo>,
}

impl CodeAttribute {
    pub fn line_numbers(&self) -> impl Iterator<Item = &LineNumber> {
        self.attributes.iter().flat_map(|attr| match attr {
            AttributeInfo::LineNumberTable(entries) => entries.as_slice(),
            _ => &[],
        })
    }

    pub fn stack_map(&self) -> Option<&[(u16, FrameDelta<FrameType>)]> {
        self.attributes.iter().find_map(|attr| match attr {
            AttributeInfo::StackMapTable(entries) => Some(entries.as_slice()),
            _ => None,
        })
    }

    /// Code type annotations, visible ones first.
    pub fn type_annotations(&self) -> Vec<(&TypeAnnotation<u16>, bool)> {
        type_annotations_of(&self.attributes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    pub start_pc: u16,
    pub line_number: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: u16,
    pub length: u16,
    pub name: String,
    pub descriptor: String,
    pub index: u16,
}

/// Checks the magic number and returns the major version, without
/// parsing the rest of the class.
pub fn read_major_version(bytes: &[u8]) -> Result<u16> {
    let mut reader = ByteReader::new(bytes);
    let magic = reader.read_u4()?;
    if magic != CLASS_MAGIC {
        return Err(ClassReadError::InvalidMagic(magic).into());
    }
    reader.read_u2()?;
    Ok(reader.read_u2()?)
}

pub fn read_class_file(bytes: &[u8], registry: &AttributeRegistry) -> Result<ClassFile> {
    let mut reader = ByteReader::new(bytes);
    let magic = reader.read_u4()?;
    if magic != CLASS_MAGIC {
        return Err(ClassReadError::InvalidMagic(magic).into());
    }
    let minor_version = reader.read_u2()?;
    let major_version = reader.read_u2()?;
    let constant_pool = ConstantPool::read(&mut reader)?;
    let access_flags = reader.read_u2()?;
    let name = constant_pool.class_name(reader.read_u2()?)?.to_string();
    let super_name = constant_pool.optional_class_name(reader.read_u2()?)?.map(str::to_string);
    let mut interfaces = Vec::new();
    for index in reader.read_u2_table()? {
        interfaces.push(constant_pool.class_name(index)?.to_string());
    }
    let fields = read_members(&mut reader, &constant_pool, registry)?;
    let methods = read_members(&mut reader, &constant_pool, registry)?;

    let mut bootstrap_methods = Vec::new();
    let mut attributes = Vec::new();
    let count = reader.read_u2()? as usize;
    for _ in 0..count {
        let name_index = reader.read_u2()?;
        let length = reader.read_u4()? as usize;
        let attr_name = constant_pool.utf8(name_index)?;
        let info = reader.read_bytes(length)?;
        if attr_name == attrs::BOOTSTRAP_METHODS {
            bootstrap_methods = read_bootstrap_methods(info)?;
        } else {
            attributes.push(parse_attribute(attr_name, info, &constant_pool, registry)?);
        }
    }

    Ok(ClassFile {
        minor_version,
        major_version,
        constant_pool,
        bootstrap_methods,
        access_flags,
        name,
        super_name,
        interfaces,
        fields,
        methods,
        attributes,
    })
}

fn read_members(
    reader: &mut ByteReader<'_>,
    cp: &ConstantPool,
    registry: &AttributeRegistry,
) -> Result<Vec<MemberInfo>> {
    let count = reader.read_u2()? as usize;
    let mut members = Vec::with_capacity(count);
    for _ in 0..count {
        let access_flags = reader.read_u2()?;
        let name = cp.utf8(reader.read_u2()?)?.to_string();
        let descriptor = cp.utf8(reader.read_u2()?)?.to_string();
        let attributes = read_attributes(reader, cp, registry)?;
        members.push(MemberInfo {
            access_flags,
            name,
            descriptor,
            attributes,
        });
    }
    Ok(members)
}

fn read_attributes(
    reader: &mut ByteReader<'_>,
    cp: &ConstantPool,
    registry: &AttributeRegistry,
) -> Result<Vec<AttributeInfo>> {
    let count = reader.read_u2()? as usize;
    let mut attributes = Vec::with_capacity(count);
    for _ in 0..count {
        let name_index = reader.read_u2()?;
        let length = reader.read_u4()? as usize;
        let name = cp.utf8(name_index)?;
        let info = reader.read_bytes(length)?;
        attributes.push(parse_attribute(name, info, cp, registry)?);
    }
    Ok(attributes)
}

fn read_bootstrap_methods(
    info: &[u8],
) -> std::result::Result<Vec<BootstrapMethod>, ClassReadError> {
    let mut reader = ByteReader::new(info);
    let count = reader.read_u2()? as usize;
    let mut methods = Vec::with_capacity(count);
    for _ in 0..count {
        let bootstrap_method_ref = reader.read_u2()?;
        let bootstrap_arguments = reader.read_u2_table()?;
        methods.push(BootstrapMethod {
            bootstrap_method_ref,
            bootstrap_arguments,
        });
    }
    Ok(methods)
}

fn read_class_names(
    reader: &mut ByteReader<'_>,
    cp: &ConstantPool,
) -> std::result::Result<Vec<String>, ClassReadError> {
    reader
        .read_u2_table()?
        .into_iter()
        .map(|index| cp.class_name(index).map(str::to_string))
        .collect()
}

fn parse_attribute(
    name: &str,
    info: &[u8],
    cp: &ConstantPool,
    registry: &AttributeRegistry,
) -> Result<AttributeInfo> {
    let mut reader = ByteReader::new(info);
    let attribute = match name {
        attrs::CODE => {
            let max_stack = reader.read_u2()?;
            let max_locals = reader.read_u2()?;
            let code_length = reader.read_u4()? as usize;
            let code = reader.read_bytes(code_length)?.to_vec();
            let exception_table_length = reader.read_u2()? as usize;
            let mut exception_table = Vec::with_capacity(exception_table_length);
            for _ in 0..exception_table_length {
                exception_table.push(ExceptionTableEntry {
                    start_pc: reader.read_u2()?,
                    end_pc: reader.read_u2()?,
                    handler_pc: reader.read_u2()?,
                    catch_type: cp.optional_class_name(reader.read_u2()?)?.map(str::to_string),
                });
            }
            let attributes = read_attributes(&mut reader, cp, registry)?;
            AttributeInfo::Code(CodeAttribute {
                max_stack,
                max_locals,
                code,
                exception_table,
                attributes,
            })
        }
        attrs::CONSTANT_VALUE => AttributeInfo::ConstantValue(reader.read_u2()?),
        attrs::EXCEPTIONS => AttributeInfo::Exceptions(read_class_names(&mut reader, cp)?),
        attrs::SOURCE_FILE => AttributeInfo::SourceFile(cp.utf8(reader.read_u2()?)?.to_string()),
        attrs::SOURCE_DEBUG_EXTENSION => {
            let bytes = reader.read_bytes(info.len())?;
            AttributeInfo::SourceDebugExtension(crate::constant_pool::decode_modified_utf8(bytes)?)
        }
        attrs::LINE_NUMBER_TABLE => {
            let count = reader.read_u2()? as usize;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                entries.push(LineNumber {
                    start_pc: reader.read_u2()?,
                    line_number: reader.read_u2()?,
                });
            }
            AttributeInfo::LineNumberTable(entries)
        }
        attrs::LOCAL_VARIABLE_TABLE | attrs::LOCAL_VARIABLE_TYPE_TABLE => {
            let count = reader.read_u2()? as usize;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                entries.push(LocalVariable {
                    start_pc: reader.read_u2()?,
                    length: reader.read_u2()?,
                    name: cp.utf8(reader.read_u2()?)?.to_string(),
                    descriptor: cp.utf8(reader.read_u2()?)?.to_string(),
                    index: reader.read_u2()?,
                });
            }
            if name == attrs::LOCAL_VARIABLE_TABLE {
                AttributeInfo::LocalVariableTable(entries)
            } else {
                AttributeInfo::LocalVariableTypeTable(entries)
            }
        }
        attrs::SIGNATURE => AttributeInfo::Signature(cp.utf8(reader.read_u2()?)?.to_string()),
        attrs::STACK_MAP_TABLE => {
            AttributeInfo::StackMapTable(read_stack_map_table(&mut reader, cp)?)
        }
        attrs::DEPRECATED => AttributeInfo::Deprecated,
        attrs::SYNTHETIC => AttributeInfo::Synthetic,
        attrs::INNER_CLASSES => {
            let count = reader.read_u2()? as usize;
            let mut classes = Vec::with_capacity(count);
            for _ in 0..count {
                classes.push(InnerClassNode {
                    name: cp.class_name(reader.read_u2()?)?.to_string(),
                    outer_name: cp.optional_class_name(reader.read_u2()?)?.map(str::to_string),
                    inner_name: cp.optional_utf8(reader.read_u2()?)?.map(str::to_string),
                    access: reader.read_u2()? as u32,
                });
            }
            AttributeInfo::InnerClasses(classes)
        }
        attrs::ENCLOSING_METHOD => {
            let owner = cp.class_name(reader.read_u2()?)?.to_string();
            let method_index = reader.read_u2()?;
            let (method_name, method_descriptor) = if method_index == 0 {
                (None, None)
            } else {
                let (name, descriptor) = cp.name_and_type(method_index)?;
                (Some(name.to_string()), Some(descriptor.to_string()))
            };
            AttributeInfo::EnclosingMethod(OuterClassNode {
                owner,
                method_name,
                method_descriptor,
            })
        }
        attrs::NEST_HOST => AttributeInfo::NestHost(cp.class_name(reader.read_u2()?)?.to_string()),
        attrs::NEST_MEMBERS => AttributeInfo::NestMembers(read_class_names(&mut reader, cp)?),
        attrs::PERMITTED_SUBCLASSES => {
            AttributeInfo::PermittedSubclasses(read_class_names(&mut reader, cp)?)
        }
        attrs::RECORD => {
            let count = reader.read_u2()? as usize;
            let mut components = Vec::with_capacity(count);
            for _ in 0..count {
                components.push(RecordComponentInfo {
                    name: cp.utf8(reader.read_u2()?)?.to_string(),
                    descriptor: cp.utf8(reader.read_u2()?)?.to_string(),
                    attributes: read_attributes(&mut reader, cp, registry)?,
                });
            }
            AttributeInfo::Record(components)
        }
        attrs::METHOD_PARAMETERS => {
            let count = reader.read_u1()? as usize;
            let mut parameters = Vec::with_capacity(count);
            for _ in 0..count {
                parameters.push(ParameterNode {
                    name: cp.optional_utf8(reader.read_u2()?)?.map(str::to_string),
                    access: reader.read_u2()? as u32,
                });
            }
            AttributeInfo::MethodParameters(parameters)
        }
        attrs::MODULE => AttributeInfo::Module(read_module(&mut reader, cp)?),
        attrs::MODULE_PACKAGES => {
            let packages = reader
                .read_u2_table()?
                .into_iter()
                .map(|index| cp.package_name(index).map(str::to_string))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            AttributeInfo::ModulePackages(packages)
        }
        attrs::MODULE_MAIN_CLASS => {
            AttributeInfo::ModuleMainClass(cp.class_name(reader.read_u2()?)?.to_string())
        }
        attrs::ANNOTATION_DEFAULT => {
            AttributeInfo::AnnotationDefault(read_element_value(&mut reader, cp)?)
        }
        attrs::RUNTIME_VISIBLE_ANNOTATIONS | attrs::RUNTIME_INVISIBLE_ANNOTATIONS => {
            AttributeInfo::Annotations {
                visible: name == attrs::RUNTIME_VISIBLE_ANNOTATIONS,
                annotations: read_annotations(&mut reader, cp)?,
            }
        }
        attrs::RUNTIME_VISIBLE_PARAMETER_ANNOTATIONS
        | attrs::RUNTIME_INVISIBLE_PARAMETER_ANNOTATIONS => {
            AttributeInfo::ParameterAnnotations {
                visible: name == attrs::RUNTIME_VISIBLE_PARAMETER_ANNOTATIONS,
                parameters: read_parameter_annotations(&mut reader, cp)?,
            }
        }
        attrs::RUNTIME_VISIBLE_TYPE_ANNOTATIONS | attrs::RUNTIME_INVISIBLE_TYPE_ANNOTATIONS => {
            AttributeInfo::TypeAnnotations {
                visible: name == attrs::RUNTIME_VISIBLE_TYPE_ANNOTATIONS,
                annotations: read_type_annotations(&mut reader, cp)?,
            }
        }
        _ => return Ok(AttributeInfo::Unknown(registry.decode(name, info)?)),
    };

    if reader.remaining() != 0 {
        return Err(ClassReadError::InvalidAttribute(name.to_string()).into());
    }
    Ok(attribute)
}

fn read_module(
    reader: &mut ByteReader<'_>,
    cp: &ConstantPool,
) -> std::result::Result<ModuleNode, ClassReadError> {
    let name = cp.module_name(reader.read_u2()?)?.to_string();
    let access = reader.read_u2()? as u32;
    let version = cp.optional_utf8(reader.read_u2()?)?.map(str::to_string);

    let mut module = ModuleNode {
        name,
        access,
        version,
        ..ModuleNode::default()
    };
    for _ in 0..reader.read_u2()? {
        module.requires.push(ModuleRequireNode {
            module: cp.module_name(reader.read_u2()?)?.to_string(),
            access: reader.read_u2()? as u32,
            version: cp.optional_utf8(reader.read_u2()?)?.map(str::to_string),
        });
    }
    for opens in [false, true] {
        for _ in 0..reader.read_u2()? {
            let package = cp.package_name(reader.read_u2()?)?.to_string();
            let access = reader.read_u2()? as u32;
            let modules = reader
                .read_u2_table()?
                .into_iter()
                .map(|index| cp.module_name(index).map(str::to_string))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let directive = ModuleExportNode {
                package,
                access,
                modules,
            };
            if opens {
                module.opens.push(directive);
            } else {
                module.exports.push(directive);
            }
        }
    }
    module.uses = read_class_names(reader, cp)?;
    for _ in 0..reader.read_u2()? {
        let service = cp.class_name(reader.read_u2()?)?.to_string();
        let providers = read_class_names(reader, cp)?;
        module.provides.push(ModuleProvideNode { service, providers });
    }
    Ok(module)
}

/// Resolves a `CONSTANT_MethodHandle` entry.
pub(crate) fn read_handle(
    cp: &ConstantPool,
    index: u16,
) -> std::result::Result<Handle, ClassReadError> {
    match cp.get(index)? {
        CpInfo::MethodHandle {
            reference_kind,
            reference_index,
        } => {
            let member = cp.member_ref(*reference_index)?;
            Ok(Handle::new(
                *reference_kind,
                member.owner,
                member.name,
                member.descriptor,
                member.is_interface,
            ))
        }
        _ => Err(ClassReadError::InvalidIndex(index)),
    }
}

pub(crate) fn read_bootstrap(
    cp: &ConstantPool,
    bootstrap_methods: &[BootstrapMethod],
    index: u16,
) -> std::result::Result<(Handle, Vec<Constant>), ClassReadError> {
    let method = bootstrap_methods
        .get(index as usize)
        .ok_or(ClassReadError::InvalidIndex(index))?;
    let handle = read_handle(cp, method.bootstrap_method_ref)?;
    let arguments = method
        .bootstrap_arguments
        .iter()
        .map(|argument| read_constant(cp, bootstrap_methods, *argument))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((handle, arguments))
}

/// Resolves a loadable constant: an `ldc` operand, a `ConstantValue` or a
/// bootstrap argument.
pub(crate) fn read_constant(
    cp: &ConstantPool,
    bootstrap_methods: &[BootstrapMethod],
    index: u16,
) -> std::result::Result<Constant, ClassReadError> {
    let constant = match cp.get(index)? {
        CpInfo::Integer(value) => Constant::Integer(*value),
        CpInfo::Float(value) => Constant::Float(*value),
        CpInfo::Long(value) => Constant::Long(*value),
        CpInfo::Double(value) => Constant::Double(*value),
        CpInfo::String { string_index } => Constant::String(cp.utf8(*string_index)?.to_string()),
        CpInfo::Class { name_index } => Constant::Type(Type::object_type(cp.utf8(*name_index)?)),
        CpInfo::MethodType { descriptor_index } => {
            Constant::Type(Type::method_type(cp.utf8(*descriptor_index)?))
        }
        CpInfo::MethodHandle { .. } => Constant::Handle(read_handle(cp, index)?),
        CpInfo::Dynamic { .. } => {
            let (bootstrap_index, name, descriptor) = cp.dynamic(index)?;
            let (bootstrap_method, bootstrap_arguments) =
                read_bootstrap(cp, bootstrap_methods, bootstrap_index)?;
            Constant::Dynamic(Box::new(ConstantDynamic {
                name: name.to_string(),
                descriptor: descriptor.to_string(),
                bootstrap_method,
                bootstrap_arguments,
            }))
        }
        _ => return Err(ClassReadError::InvalidIndex(index)),
    };
    Ok(constant)
}

/// Reads a class file and reports it to a [`ClassVisitor`].
pub struct ClassReader {
    bytes: Vec<u8>,
    registry: AttributeRegistry,
}

impl ClassReader {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            registry: AttributeRegistry::new(),
        }
    }

    /// Attributes named in `registry` are decoded by their prototype
    /// instead of being kept as raw bytes.
    pub fn with_attribute_registry(mut self, registry: AttributeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn class_file(&self) -> Result<ClassFile> {
        read_class_file(&self.bytes, &self.registry)
    }

    /// Visits the class. `flags` is a combination of [`SKIP_CODE`],
    /// [`SKIP_DEBUG`], [`SKIP_FRAMES`] and [`EXPAND_FRAMES`].
    pub fn accept(&self, visitor: &mut dyn ClassVisitor, flags: u32) -> Result<()> {
        let major = read_major_version(&self.bytes)?;
        if major > VISITOR_CODEC_MAX_MAJOR {
            return Err(Error::UnsupportedVersion {
                major,
                ceiling: VISITOR_CODEC_MAX_MAJOR,
            });
        }
        let class_file = self.class_file()?;
        log::trace!("visiting class {} (version {})", class_file.name, class_file.major_version);
        accept_class(&class_file, visitor, flags)
    }
}

/// Pseudo access flags carried by attributes.
pub(crate) fn attribute_flags(attributes: &[AttributeInfo]) -> u32 {
    let mut flags = 0;
    for attr in attributes {
        match attr {
            AttributeInfo::Deprecated => flags |= ACC_DEPRECATED,
            AttributeInfo::Synthetic => flags |= ACC_SYNTHETIC,
            AttributeInfo::Record(_) => flags |= ACC_RECORD,
            _ => {}
        }
    }
    flags
}

pub(crate) fn signature_of(attributes: &[AttributeInfo]) -> Option<&str> {
    attributes.iter().find_map(|attr| match attr {
        AttributeInfo::Signature(signature) => Some(signature.as_str()),
        _ => None,
    })
}

/// Runtime annotations, visible ones first.
fn annotations_of(attributes: &[AttributeInfo]) -> Vec<(&Annotation, bool)> {
    let mut all = Vec::new();
    for wanted in [true, false] {
        for attr in attributes {
            if let AttributeInfo::Annotations { visible, annotations } = attr {
                if *visible == wanted {
                    all.extend(annotations.iter().map(|a| (a, wanted)));
                }
            }
        }
    }
    all
}

/// Type annotations, visible ones first.
fn type_annotations_of(attributes: &[AttributeInfo]) -> Vec<(&TypeAnnotation<u16>, bool)> {
    let mut all = Vec::new();
    for wanted in [true, false] {
        for attr in attributes {
            if let AttributeInfo::TypeAnnotations { visible, annotations } = attr {
                if *visible == wanted {
                    all.extend(annotations.iter().map(|a| (a, wanted)));
                }
            }
        }
    }
    all
}

pub(crate) fn unknown_attributes(attributes: &[AttributeInfo]) -> impl Iterator<Item = &Attribute> {
    attributes.iter().filter_map(|attr| match attr {
        AttributeInfo::Unknown(attribute) => Some(attribute),
        _ => None,
    })
}

fn accept_class(class_file: &ClassFile, visitor: &mut dyn ClassVisitor, flags: u32) -> Result<()> {
    let attributes = &class_file.attributes;
    let access = class_file.access_flags as u32 | attribute_flags(attributes);
    visitor.visit(
        class_file.major_version,
        class_file.minor_version,
        access,
        &class_file.name,
        signature_of(attributes),
        class_file.super_name.as_deref(),
        &class_file.interfaces,
    )?;

    if flags & SKIP_DEBUG == 0 {
        let source = attributes.iter().find_map(|attr| match attr {
            AttributeInfo::SourceFile(source) => Some(source.as_str()),
            _ => None,
        });
        let debug = attributes.iter().find_map(|attr| match attr {
            AttributeInfo::SourceDebugExtension(debug) => Some(debug.as_str()),
            _ => None,
        });
        if source.is_some() || debug.is_some() {
            visitor.visit_source(source, debug)?;
        }
    }

    for attr in attributes {
        if let AttributeInfo::Module(module) = attr {
            accept_module(class_file, module, visitor)?;
        }
    }
    for attr in attributes {
        if let AttributeInfo::NestHost(host) = attr {
            visitor.visit_nest_host(host)?;
        }
    }
    for attr in attributes {
        if let AttributeInfo::EnclosingMethod(outer) = attr {
            visitor.visit_outer_class(
                &outer.owner,
                outer.method_name.as_deref(),
                outer.method_descriptor.as_deref(),
            )?;
        }
    }

    for (annotation, visible) in annotations_of(attributes) {
        let child = visitor.visit_annotation(&annotation.descriptor, visible)?;
        accept_annotation(annotation, child)?;
    }
    for (annotation, visible) in type_annotations_of(attributes) {
        let path = visitor_type_path(&annotation.path);
        let child = visitor.visit_type_annotation(
            annotation.target.type_reference(),
            path.as_ref(),
            &annotation.annotation.descriptor,
            visible,
        )?;
        accept_annotation(&annotation.annotation, child)?;
    }
    for attribute in unknown_attributes(attributes) {
        visitor.visit_attribute(attribute)?;
    }

    for attr in attributes {
        if let AttributeInfo::NestMembers(members) = attr {
            for member in members {
                visitor.visit_nest_member(member)?;
            }
        }
    }
    for attr in attributes {
        if let AttributeInfo::PermittedSubclasses(subclasses) = attr {
            for subclass in subclasses {
                visitor.visit_permitted_subclass(subclass)?;
            }
        }
    }
    for attr in attributes {
        if let AttributeInfo::InnerClasses(classes) = attr {
            for inner in classes {
                visitor.visit_inner_class(
                    &inner.name,
                    inner.outer_name.as_deref(),
                    inner.inner_name.as_deref(),
                    inner.access,
                )?;
            }
        }
    }
    for attr in attributes {
        if let AttributeInfo::Record(components) = attr {
            for component in components {
                accept_record_component(component, visitor)?;
            }
        }
    }

    for field in &class_file.fields {
        accept_field(class_file, field, visitor)?;
    }
    for method in &class_file.methods {
        accept_method(class_file, method, visitor, flags)?;
    }
    visitor.visit_end()
}

fn accept_module(
    class_file: &ClassFile,
    module: &ModuleNode,
    visitor: &mut dyn ClassVisitor,
) -> Result<()> {
    let version = module.version.as_deref();
    let Some(mut mv) = visitor.visit_module(&module.name, module.access, version)? else {
        return Ok(());
    };
    for attr in &class_file.attributes {
        if let AttributeInfo::ModuleMainClass(main_class) = attr {
            mv.visit_main_class(main_class)?;
        }
    }
    for attr in &class_file.attributes {
        if let AttributeInfo::ModulePackages(packages) = attr {
            for package in packages {
                mv.visit_package(package)?;
            }
        }
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
    component: &RecordComponentInfo,
    visitor: &mut dyn ClassVisitor,
) -> Result<()> {
    let Some(mut rv) = visitor.visit_record_component(
        &component.name,
        &component.descriptor,
        signature_of(&component.attributes),
    )?
    else {
        return Ok(());
    };
    let rv = rv.as_mut();
    for (annotation, visible) in annotations_of(&component.attributes) {
        let child = rv.visit_annotation(&annotation.descriptor, visible)?;
        accept_annotation(annotation, child)?;
    }
    for (annotation, visible) in type_annotations_of(&component.attributes) {
        let path = visitor_type_path(&annotation.path);
        let child = rv.visit_type_annotation(
            annotation.target.type_reference(),
            path.as_ref(),
            &annotation.annotation.descriptor,
            visible,
        )?;
        accept_annotation(&annotation.annotation, child)?;
    }
    for attribute in unknown_attributes(&component.attributes) {
        rv.visit_attribute(attribute)?;
    }
    rv.visit_end()
}

fn accept_field(
    class_file: &ClassFile,
    field: &MemberInfo,
    visitor: &mut dyn ClassVisitor,
) -> Result<()> {
    let attributes = &field.attributes;
    let value = attributes
        .iter()
        .find_map(|attr| match attr {
            AttributeInfo::ConstantValue(index) => Some(*index),
            _ => None,
        })
        .map(|index| class_file.constant(index))
        .transpose()?;
    let access = field.access_flags as u32 | attribute_flags(attributes);
    let Some(mut fv) = visitor.visit_field(
        access,
        &field.name,
        &field.descriptor,
        signature_of(attributes),
        value.as_ref(),
    )?
    else {
        return Ok(());
    };
    let fv = fv.as_mut();
    for (annotation, visible) in annotations_of(attributes) {
        let child = fv.visit_annotation(&annotation.descriptor, visible)?;
        accept_annotation(annotation, child)?;
    }
    for (annotation, visible) in type_annotations_of(attributes) {
        let path = visitor_type_path(&annotation.path);
        let child = fv.visit_type_annotation(
            annotation.target.type_reference(),
            path.as_ref(),
            &annotation.annotation.descriptor,
            visible,
        )?;
        accept_annotation(&annotation.annotation, child)?;
    }
    for attribute in unknown_attributes(attributes) {
        fv.visit_attribute(attribute)?;
    }
    fv.visit_end()
}

fn accept_method(
    class_file: &ClassFile,
    method: &MemberInfo,
    visitor: &mut dyn ClassVisitor,
    flags: u32,
) -> Result<()> {
    let attributes = &method.attributes;
    let exceptions = attributes
        .iter()
        .find_map(|attr| match attr {
            AttributeInfo::Exceptions(exceptions) => Some(exceptions.as_slice()),
            _ => None,
        })
        .unwrap_or(&[]);
    let access = method.access_flags as u32 | attribute_flags(attributes);
    let Some(mut mv) = visitor.visit_method(
        access,
        &method.name,
        &method.descriptor,
        signature_of(attributes),
        exceptions,
    )?
    else {
        return Ok(());
    };
    let mv = mv.as_mut();

    if flags & SKIP_DEBUG == 0 {
        for attr in attributes {
            if let AttributeInfo::MethodParameters(parameters) = attr {
                for parameter in parameters {
                    mv.visit_parameter(parameter.name.as_deref(), parameter.access)?;
                }
            }
        }
    }
    for attr in attributes {
        if let AttributeInfo::AnnotationDefault(value) = attr {
            if let Some(mut av) = mv.visit_annotation_default()? {
                value.accept(av.as_mut(), None)?;
                av.visit_end()?;
            }
        }
    }
    for (annotation, visible) in annotations_of(attributes) {
        let child = mv.visit_annotation(&annotation.descriptor, visible)?;
        accept_annotation(annotation, child)?;
    }
    for (annotation, visible) in type_annotations_of(attributes) {
        let path = visitor_type_path(&annotation.path);
        let child = mv.visit_type_annotation(
            annotation.target.type_reference(),
            path.as_ref(),
            &annotation.annotation.descriptor,
            visible,
        )?;
        accept_annotation(&annotation.annotation, child)?;
    }
    for wanted in [true, false] {
        for attr in attributes {
            if let AttributeInfo::ParameterAnnotations { visible, parameters } = attr {
                if *visible != wanted {
                    continue;
                }
                mv.visit_annotable_parameter_count(parameters.len() as u8, wanted)?;
                for (index, annotations) in parameters.iter().enumerate() {
                    for annotation in annotations {
                        let child = mv.visit_parameter_annotation(
                            index as u8,
                            &annotation.descriptor,
                            wanted,
                        )?;
                        accept_annotation(annotation, child)?;
                    }
                }
            }
        }
    }
    for attribute in unknown_attributes(attributes) {
        mv.visit_attribute(attribute)?;
    }

    if flags & SKIP_CODE == 0 {
        for attr in attributes {
            if let AttributeInfo::Code(code) = attr {
                mv.visit_code()?;
                CodeVisit::new(class_file, method, code, flags).accept(mv)?;
            }
        }
    }
    mv.visit_end()
}

/// Fails unless every offset is an instruction start or the end of the code.
pub(crate) fn check_label_offsets(
    offsets: impl IntoIterator<Item = usize>,
    insns: &[ParsedInstruction],
    code_length: usize,
) -> Result<()> {
    for offset in offsets {
        let on_boundary = offset == code_length
            || insns.binary_search_by_key(&offset, |insn| insn.offset).is_ok();
        if !on_boundary {
            return Err(ClassReadError::InvalidOffset(offset as u32).into());
        }
    }
    Ok(())
}

/// State of one `Code` attribute being visited.
struct CodeVisit<'a> {
    class_file: &'a ClassFile,
    method: &'a MemberInfo,
    code: &'a CodeAttribute,
    flags: u32,
    labels: HashMap<usize, Label>,
}

impl<'a> CodeVisit<'a> {
    fn new(
        class_file: &'a ClassFile,
        method: &'a MemberInfo,
        code: &'a CodeAttribute,
        flags: u32,
    ) -> Self {
        Self {
            class_file,
            method,
            code,
            flags,
            labels: HashMap::new(),
        }
    }

    fn label(&mut self, offset: usize) -> Label {
        *self.labels.entry(offset).or_default()
    }

    fn frame_value(&mut self, value: &FrameType) -> FrameValue {
        match value {
            FrameType::Top => FrameValue::Top,
            FrameType::Integer => FrameValue::Integer,
            FrameType::Float => FrameValue::Float,
            FrameType::Double => FrameValue::Double,
            FrameType::Long => FrameValue::Long,
            FrameType::Null => FrameValue::Null,
            FrameType::UninitializedThis => FrameValue::UninitializedThis,
            FrameType::Object(name) => FrameValue::Object(name.clone()),
            FrameType::Uninitialized(offset) => {
                FrameValue::Uninitialized(self.label(*offset as usize))
            }
        }
    }

    fn frame_values(&mut self, values: &[FrameType]) -> Vec<FrameValue> {
        values.iter().map(|value| self.frame_value(value)).collect()
    }

    /// Frames keyed by offset, either as encoded or fully expanded.
    fn frames(&mut self) -> Result<BTreeMap<usize, Frame>> {
        let mut frames = BTreeMap::new();
        if self.flags & SKIP_FRAMES != 0 {
            return Ok(frames);
        }
        let code = self.code;
        let Some(entries) = code.stack_map() else {
            return Ok(frames);
        };
        if self.flags & EXPAND_FRAMES != 0 {
            let initial = crate::frame::initial_locals(
                &self.class_file.name,
                self.method.access_flags as u32,
                &self.method.name,
                &self.method.descriptor,
            );
            for frame in crate::frame::expand_frames(initial, entries.to_vec())? {
                let locals = self.frame_values(&frame.locals);
                let stack = self.frame_values(&frame.stack);
                frames.insert(frame.offset as usize, Frame::New { locals, stack });
            }
            return Ok(frames);
        }
        let mut previous: Option<usize> = None;
        for (offset_delta, delta) in entries {
            let offset = match previous {
                None => *offset_delta as usize,
                Some(previous) => previous + *offset_delta as usize + 1,
            };
            let frame = match delta {
                FrameDelta::Same => Frame::Same,
                FrameDelta::SameLocals1StackItem(value) => Frame::Same1(self.frame_value(value)),
                FrameDelta::Chop(count) => Frame::Chop(*count),
                FrameDelta::Append(values) => Frame::Append(self.frame_values(values)),
                FrameDelta::Full { locals, stack } => Frame::Full {
                    locals: self.frame_values(locals),
                    stack: self.frame_values(stack),
                },
            };
            frames.insert(offset, frame);
            previous = Some(offset);
        }
        Ok(frames)
    }

    fn accept(mut self, mv: &mut dyn MethodVisitor) -> Result<()> {
        let code = self.code;
        let insns = decode_code(&code.code)?;
        let skip_debug = self.flags & SKIP_DEBUG != 0;

        for entry in &code.exception_table {
            let start = self.label(entry.start_pc as usize);
            let end = self.label(entry.end_pc as usize);
            let handler = self.label(entry.handler_pc as usize);
            mv.visit_try_catch_block(start, end, handler, entry.catch_type.as_deref())?;
        }
        let type_annotations = code.type_annotations();
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

        // Every offset that needs a label, so labels are visited before
        // the instruction that follows them.
        let mut needed: Vec<usize> = Vec::new();
        for insn in &insns {
            needed.extend(insn.branch_targets());
        }
        for entry in &code.exception_table {
            needed.extend([
                entry.start_pc as usize,
                entry.end_pc as usize,
                entry.handler_pc as usize,
            ]);
        }
        let mut lines: BTreeMap<usize, Vec<u16>> = BTreeMap::new();
        if !skip_debug {
            for line in code.line_numbers() {
                lines.entry(line.start_pc as usize).or_default().push(line.line_number);
                needed.push(line.start_pc as usize);
            }
            for attr in &code.attributes {
                if let AttributeInfo::LocalVariableTable(vars) = attr {
                    for var in vars {
                        let start = var.start_pc as usize;
                        needed.extend([start, start + var.length as usize]);
                    }
                }
            }
        }
        let mut insn_annotations: HashMap<usize, Vec<(&TypeAnnotation<u16>, bool)>> =
            HashMap::new();
        for (annotation, visible) in &type_annotations {
            if let Some(position) = annotation.target.position() {
                insn_annotations
                    .entry(*position as usize)
                    .or_default()
                    .push((*annotation, *visible));
                needed.push(*position as usize);
            }
            if let Some(ranges) = annotation.target.local_variable_ranges() {
                for range in ranges {
                    needed.extend([range.start as usize, range.end as usize]);
                }
            }
        }
        let frames = self.frames()?;
        needed.extend(frames.keys().copied());
        for offset in needed {
            self.label(offset);
        }
        check_label_offsets(self.labels.keys().copied(), &insns, code.code.len())?;

        for insn in &insns {
            self.visit_position(mv, insn.offset, &lines, &frames)?;
            self.visit_insn(mv, insn)?;
            if let Some(annotations) = insn_annotations.get(&insn.offset) {
                for (annotation, visible) in annotations {
                    let path = visitor_type_path(&annotation.path);
                    let child = mv.visit_insn_annotation(
                        annotation.target.type_reference(),
                        path.as_ref(),
                        &annotation.annotation.descriptor,
                        *visible,
                    )?;
                    accept_annotation(&annotation.annotation, child)?;
                }
            }
        }
        self.visit_position(mv, code.code.len(), &lines, &frames)?;

        if !skip_debug {
            self.visit_local_variables(mv)?;
        }
        for (annotation, visible) in &type_annotations {
            let Some(ranges) = annotation.target.local_variable_ranges() else {
                continue;
            };
            let starts: Vec<Label> = ranges.iter().map(|r| self.label(r.start as usize)).collect();
            let ends: Vec<Label> = ranges.iter().map(|r| self.label(r.end as usize)).collect();
            let indices: Vec<u16> = ranges.iter().map(|r| r.index).collect();
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
        for attribute in unknown_attributes(&code.attributes) {
            mv.visit_code_attribute(attribute)?;
        }
        mv.visit_maxs(code.max_stack, code.max_locals)
    }

    /// Label, line numbers and frame at `offset`.
    fn visit_position(
        &mut self,
        mv: &mut dyn MethodVisitor,
        offset: usize,
        lines: &BTreeMap<usize, Vec<u16>>,
        frames: &BTreeMap<usize, Frame>,
    ) -> Result<()> {
        let Some(label) = self.labels.get(&offset).copied() else {
            return Ok(());
        };
        mv.visit_label(label)?;
        if let Some(lines) = lines.get(&offset) {
            for line in lines {
                mv.visit_line_number(*line, label)?;
            }
        }
        if let Some(frame) = frames.get(&offset) {
            mv.visit_frame(frame)?;
        }
        Ok(())
    }

    /// `LocalVariableTable` and `LocalVariableTypeTable` entries sharing
    /// `(start, end, name, slot)` are reported as one variable.
    fn visit_local_variables(&mut self, mv: &mut dyn MethodVisitor) -> Result<()> {
        type Key<'k> = (u16, u16, &'k str, u16);
        let code = self.code;
        let mut variables: IndexMap<Key<'_>, (&str, Option<&str>)> = IndexMap::new();
        for attr in &code.attributes {
            if let AttributeInfo::LocalVariableTable(vars) = attr {
                for var in vars {
                    variables
                        .entry((var.start_pc, var.length, var.name.as_str(), var.index))
                        .or_insert((var.descriptor.as_str(), None));
                }
            }
        }
        for attr in &code.attributes {
            if let AttributeInfo::LocalVariableTypeTable(vars) = attr {
                for var in vars {
                    let key = (var.start_pc, var.length, var.name.as_str(), var.index);
                    match variables.get_mut(&key) {
                        Some(entry) => entry.1 = Some(var.descriptor.as_str()),
                        None => log::debug!(
                            "dropping unmatched LocalVariableTypeTable entry {}",
                            var.name
                        ),
                    }
                }
            }
        }
        for ((start_pc, length, name, index), (descriptor, signature)) in variables {
            let start = self.label(start_pc as usize);
            let end = self.label(start_pc as usize + length as usize);
            mv.visit_local_variable(name, descriptor, signature, start, end, index)?;
        }
        Ok(())
    }

    fn visit_insn(&mut self, mv: &mut dyn MethodVisitor, insn: &ParsedInstruction) -> Result<()> {
        let class_file = self.class_file;
        let cp = &class_file.constant_pool;
        match &insn.operand {
            Operand::None => mv.visit_insn(insn.opcode),
            Operand::Int(value) => mv.visit_int_insn(insn.opcode, *value),
            Operand::Local(slot) => mv.visit_var_insn(insn.opcode, *slot),
            Operand::Iinc { index, increment } => mv.visit_iinc_insn(*index, *increment),
            Operand::Constant(index) => mv.visit_ldc_insn(&class_file.constant(*index)?),
            Operand::Member(index) => {
                let member = cp.member_ref(*index)?;
                if (GETSTATIC..=PUTFIELD).contains(&insn.opcode) {
                    mv.visit_field_insn(insn.opcode, member.owner, member.name, member.descriptor)
                } else {
                    mv.visit_method_insn(
                        insn.opcode,
                        member.owner,
                        member.name,
                        member.descriptor,
                        member.is_interface,
                    )
                }
            }
            Operand::InvokeDynamic(index) => {
                let (bootstrap_index, name, descriptor) = cp.dynamic(*index)?;
                let (handle, arguments) = class_file.bootstrap(bootstrap_index)?;
                mv.visit_invoke_dynamic_insn(name, descriptor, &handle, &arguments)
            }
            Operand::Class(index) => mv.visit_type_insn(insn.opcode, cp.class_name(*index)?),
            Operand::Branch(target) => {
                let label = self.label(*target);
                mv.visit_jump_insn(insn.opcode, label)
            }
            Operand::TableSwitch {
                default,
                low,
                high,
                targets,
            } => {
                let default = self.label(*default);
                let labels: Vec<Label> = targets.iter().map(|target| self.label(*target)).collect();
                mv.visit_table_switch_insn(*low, *high, default, &labels)
            }
            Operand::LookupSwitch { default, pairs } => {
                let default = self.label(*default);
                let keys: Vec<i32> = pairs.iter().map(|(key, _)| *key).collect();
                let labels: Vec<Label> =
                    pairs.iter().map(|(_, target)| self.label(*target)).collect();
                mv.visit_lookup_switch_insn(default, &keys, &labels)
            }
            Operand::MultiANewArray { index, dimensions } => {
                mv.visit_multi_anew_array_insn(cp.class_name(*index)?, *dimensions)
            }
        }
    }
}
