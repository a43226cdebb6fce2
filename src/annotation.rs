//! Annotations and type annotations in their structured form, with the
//! binary codec used for the `Runtime*Annotations` attributes.

use crate::bytes::{write_u1, write_u2, ByteReader};
use crate::constant_pool::{ConstantPool, ConstantPoolBuilder, CpInfo};
use crate::error::{ClassReadError, Error, Result};
use crate::insn::LabelNode;
use crate::types::{
    AnnotationValue, Type, TypePath, TypeReference, TYPE_PATH_ARRAY_ELEMENT, TYPE_PATH_INNER_TYPE,
    TYPE_PATH_TYPE_ARGUMENT, TYPE_PATH_WILDCARD_BOUND,
};
use crate::visitor::AnnotationVisitor;

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Field descriptor of the annotation interface.
    pub descriptor: String,
    pub elements: Vec<(String, ElementValue)>,
}

impl Annotation {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            elements: Vec::new(),
        }
    }

    pub fn with_element(mut self, name: impl Into<String>, value: ElementValue) -> Self {
        self.elements.push((name.into(), value));
        self
    }

    /// Replays the element-value pairs on `visitor`, then calls `visit_end`.
    pub fn accept(&self, visitor: &mut dyn AnnotationVisitor) -> Result<()> {
        for (name, value) in &self.elements {
            value.accept(visitor, Some(name))?;
        }
        visitor.visit_end()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    /// A class literal, by return descriptor (`V` for `void.class`).
    Class(String),
    Enum {
        descriptor: String,
        name: String,
    },
    Annotation(Annotation),
    Array(Vec<ElementValue>),
}

impl ElementValue {
    pub fn accept(&self, visitor: &mut dyn AnnotationVisitor, name: Option<&str>) -> Result<()> {
        match self {
            ElementValue::Enum { descriptor, name: value } => {
                visitor.visit_enum(name, descriptor, value)
            }
            ElementValue::Annotation(nested) => {
                if let Some(mut child) = visitor.visit_annotation(name, &nested.descriptor)? {
                    nested.accept(child.as_mut())?;
                }
                Ok(())
            }
            ElementValue::Array(values) => {
                if let Some(primitive) = primitive_array(values) {
                    return visitor.visit(name, &primitive);
                }
                if let Some(mut child) = visitor.visit_array(name)? {
                    for value in values {
                        value.accept(child.as_mut(), None)?;
                    }
                    child.visit_end()?;
                }
                Ok(())
            }
            other => match other.to_annotation_value() {
                Some(value) => visitor.visit(name, &value),
                None => Ok(()),
            },
        }
    }

    fn to_annotation_value(&self) -> Option<AnnotationValue> {
        let value = match self {
            ElementValue::Boolean(v) => AnnotationValue::Boolean(*v),
            ElementValue::Byte(v) => AnnotationValue::Byte(*v),
            ElementValue::Char(v) => AnnotationValue::Char(*v),
            ElementValue::Short(v) => AnnotationValue::Short(*v),
            ElementValue::Int(v) => AnnotationValue::Int(*v),
            ElementValue::Long(v) => AnnotationValue::Long(*v),
            ElementValue::Float(v) => AnnotationValue::Float(*v),
            ElementValue::Double(v) => AnnotationValue::Double(*v),
            ElementValue::String(v) => AnnotationValue::String(v.clone()),
            ElementValue::Class(descriptor) => {
                AnnotationValue::Type(Type::from_descriptor(descriptor.clone()))
            }
            ElementValue::Enum { .. } | ElementValue::Annotation(_) | ElementValue::Array(_) => {
                return None;
            }
        };
        Some(value)
    }

    fn tag(&self) -> u8 {
        match self {
            ElementValue::Boolean(_) => b'Z',
            ElementValue::Byte(_) => b'B',
            ElementValue::Char(_) => b'C',
            ElementValue::Short(_) => b'S',
            ElementValue::Int(_) => b'I',
            ElementValue::Long(_) => b'J',
            ElementValue::Float(_) => b'F',
            ElementValue::Double(_) => b'D',
            ElementValue::String(_) => b's',
            ElementValue::Class(_) => b'c',
            ElementValue::Enum { .. } => b'e',
            ElementValue::Annotation(_) => b'@',
            ElementValue::Array(_) => b'[',
        }
    }
}

impl From<&AnnotationValue> for ElementValue {
    fn from(value: &AnnotationValue) -> Self {
        fn array<T: Copy>(values: &[T], f: impl Fn(T) -> ElementValue) -> ElementValue {
            ElementValue::Array(values.iter().copied().map(f).collect())
        }
        match value {
            AnnotationValue::Boolean(v) => ElementValue::Boolean(*v),
            AnnotationValue::Byte(v) => ElementValue::Byte(*v),
            AnnotationValue::Char(v) => ElementValue::Char(*v),
            AnnotationValue::Short(v) => ElementValue::Short(*v),
            AnnotationValue::Int(v) => ElementValue::Int(*v),
            AnnotationValue::Long(v) => ElementValue::Long(*v),
            AnnotationValue::Float(v) => ElementValue::Float(*v),
            AnnotationValue::Double(v) => ElementValue::Double(*v),
            AnnotationValue::String(v) => ElementValue::String(v.clone()),
            AnnotationValue::Type(t) => ElementValue::Class(t.descriptor().to_string()),
            AnnotationValue::BooleanArray(v) => array(v, ElementValue::Boolean),
            AnnotationValue::ByteArray(v) => array(v, ElementValue::Byte),
            AnnotationValue::CharArray(v) => array(v, ElementValue::Char),
            AnnotationValue::ShortArray(v) => array(v, ElementValue::Short),
            AnnotationValue::IntArray(v) => array(v, ElementValue::Int),
            AnnotationValue::LongArray(v) => array(v, ElementValue::Long),
            AnnotationValue::FloatArray(v) => array(v, ElementValue::Float),
            AnnotationValue::DoubleArray(v) => array(v, ElementValue::Double),
        }
    }
}

/// Collapses a non-empty array whose elements all carry the same primitive
/// tag into one primitive array value.
fn primitive_array(values: &[ElementValue]) -> Option<AnnotationValue> {
    macro_rules! collect {
        ($variant:ident, $array:ident) => {{
            let mut out = Vec::with_capacity(values.len());
            for value in values {
                match value {
                    ElementValue::$variant(v) => out.push(*v),
                    _ => return None,
                }
            }
            Some(AnnotationValue::$array(out))
        }};
    }
    match values.first()? {
        ElementValue::Boolean(_) => collect!(Boolean, BooleanArray),
        ElementValue::Byte(_) => collect!(Byte, ByteArray),
        ElementValue::Char(_) => collect!(Char, CharArray),
        ElementValue::Short(_) => collect!(Short, ShortArray),
        ElementValue::Int(_) => collect!(Int, IntArray),
        ElementValue::Long(_) => collect!(Long, LongArray),
        ElementValue::Float(_) => collect!(Float, FloatArray),
        ElementValue::Double(_) => collect!(Double, DoubleArray),
        _ => None,
    }
}

enum Sink<'a> {
    Elements(&'a mut Vec<(String, ElementValue)>),
    Values(&'a mut Vec<ElementValue>),
    Single(&'a mut Option<ElementValue>),
}

/// An [`AnnotationVisitor`] that stores what it is given into a structured
/// annotation, an array, or a single default value.
pub struct AnnotationNodeBuilder<'a> {
    sink: Sink<'a>,
}

impl<'a> AnnotationNodeBuilder<'a> {
    pub fn for_annotation(annotation: &'a mut Annotation) -> Self {
        Self {
            sink: Sink::Elements(&mut annotation.elements),
        }
    }

    pub fn for_elements(elements: &'a mut Vec<(String, ElementValue)>) -> Self {
        Self {
            sink: Sink::Elements(elements),
        }
    }

    pub fn for_array(values: &'a mut Vec<ElementValue>) -> Self {
        Self {
            sink: Sink::Values(values),
        }
    }

    /// Collects the single unnamed value of an `AnnotationDefault`.
    pub fn for_default(value: &'a mut Option<ElementValue>) -> Self {
        Self {
            sink: Sink::Single(value),
        }
    }

    fn slot(&mut self, name: Option<&str>, value: ElementValue) -> Result<&mut ElementValue> {
        match &mut self.sink {
            Sink::Elements(elements) => {
                let name = name
                    .ok_or_else(|| Error::protocol("annotation element visited without a name"))?;
                let index = elements.len();
                elements.push((name.to_string(), value));
                Ok(&mut elements[index].1)
            }
            Sink::Values(values) => {
                let index = values.len();
                values.push(value);
                Ok(&mut values[index])
            }
            Sink::Single(slot) => Ok(slot.insert(value)),
        }
    }
}

impl AnnotationVisitor for AnnotationNodeBuilder<'_> {
    fn visit(&mut self, name: Option<&str>, value: &AnnotationValue) -> Result<()> {
        self.slot(name, ElementValue::from(value))?;
        Ok(())
    }

    fn visit_enum(&mut self, name: Option<&str>, descriptor: &str, value: &str) -> Result<()> {
        self.slot(
            name,
            ElementValue::Enum {
                descriptor: descriptor.to_string(),
                name: value.to_string(),
            },
        )?;
        Ok(())
    }

    fn visit_annotation(
        &mut self,
        name: Option<&str>,
        descriptor: &str,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        match self.slot(name, ElementValue::Annotation(Annotation::new(descriptor)))? {
            ElementValue::Annotation(nested) => {
                Ok(Some(Box::new(AnnotationNodeBuilder::for_annotation(nested))))
            }
            _ => Ok(None),
        }
    }

    fn visit_array(
        &mut self,
        name: Option<&str>,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        match self.slot(name, ElementValue::Array(Vec::new()))? {
            ElementValue::Array(values) => {
                Ok(Some(Box::new(AnnotationNodeBuilder::for_array(values))))
            }
            _ => Ok(None),
        }
    }
}

/// One step of a type path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypePathComponent {
    Array,
    InnerType,
    Wildcard,
    TypeArgument(u8),
}

impl TypePathComponent {
    pub fn to_type_path(components: &[TypePathComponent]) -> TypePath {
        TypePath::from_steps(
            components
                .iter()
                .map(|component| match component {
                    TypePathComponent::Array => (TYPE_PATH_ARRAY_ELEMENT, 0),
                    TypePathComponent::InnerType => (TYPE_PATH_INNER_TYPE, 0),
                    TypePathComponent::Wildcard => (TYPE_PATH_WILDCARD_BOUND, 0),
                    TypePathComponent::TypeArgument(index) => (TYPE_PATH_TYPE_ARGUMENT, *index),
                })
                .collect(),
        )
    }

    pub fn from_type_path(path: &TypePath) -> Result<Vec<TypePathComponent>> {
        path.steps()
            .iter()
            .map(|(kind, argument)| match *kind {
                TYPE_PATH_ARRAY_ELEMENT => Ok(TypePathComponent::Array),
                TYPE_PATH_INNER_TYPE => Ok(TypePathComponent::InnerType),
                TYPE_PATH_WILDCARD_BOUND => Ok(TypePathComponent::Wildcard),
                TYPE_PATH_TYPE_ARGUMENT => Ok(TypePathComponent::TypeArgument(*argument)),
                other => Err(Error::protocol(format!("invalid type path step kind {other}"))),
            })
            .collect()
    }
}

/// A live range of a local variable targeted by a type annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVarTarget<P> {
    pub start: P,
    pub end: P,
    pub index: u16,
}

/// What a type annotation is attached to. `P` is a position in code: a
/// bytecode offset while parsing, a label in the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetInfo<P> {
    ClassTypeParameter(u8),
    MethodTypeParameter(u8),
    /// `0xFFFF` for the super class, otherwise an index into `interfaces`.
    ClassExtends(u16),
    ClassTypeParameterBound { param: u8, bound: u8 },
    MethodTypeParameterBound { param: u8, bound: u8 },
    Field,
    MethodReturn,
    MethodReceiver,
    MethodFormalParameter(u8),
    Throws(u16),
    LocalVariable(Vec<LocalVarTarget<P>>),
    ResourceVariable(Vec<LocalVarTarget<P>>),
    ExceptionParameter(u16),
    InstanceOf(P),
    New(P),
    ConstructorReference(P),
    MethodReference(P),
    Cast { position: P, type_argument: u8 },
    ConstructorInvocationTypeArgument { position: P, type_argument: u8 },
    MethodInvocationTypeArgument { position: P, type_argument: u8 },
    ConstructorReferenceTypeArgument { position: P, type_argument: u8 },
    MethodReferenceTypeArgument { position: P, type_argument: u8 },
}

impl<P> TargetInfo<P> {
    pub fn sort(&self) -> u8 {
        match self {
            TargetInfo::ClassTypeParameter(_) => TypeReference::CLASS_TYPE_PARAMETER,
            TargetInfo::MethodTypeParameter(_) => TypeReference::METHOD_TYPE_PARAMETER,
            TargetInfo::ClassExtends(_) => TypeReference::CLASS_EXTENDS,
            TargetInfo::ClassTypeParameterBound { .. } => TypeReference::CLASS_TYPE_PARAMETER_BOUND,
            TargetInfo::MethodTypeParameterBound { .. } => {
                TypeReference::METHOD_TYPE_PARAMETER_BOUND
            }
            TargetInfo::Field => TypeReference::FIELD,
            TargetInfo::MethodReturn => TypeReference::METHOD_RETURN,
            TargetInfo::MethodReceiver => TypeReference::METHOD_RECEIVER,
            TargetInfo::MethodFormalParameter(_) => TypeReference::METHOD_FORMAL_PARAMETER,
            TargetInfo::Throws(_) => TypeReference::THROWS,
            TargetInfo::LocalVariable(_) => TypeReference::LOCAL_VARIABLE,
            TargetInfo::ResourceVariable(_) => TypeReference::RESOURCE_VARIABLE,
            TargetInfo::ExceptionParameter(_) => TypeReference::EXCEPTION_PARAMETER,
            TargetInfo::InstanceOf(_) => TypeReference::INSTANCEOF,
            TargetInfo::New(_) => TypeReference::NEW,
            TargetInfo::ConstructorReference(_) => TypeReference::CONSTRUCTOR_REFERENCE,
            TargetInfo::MethodReference(_) => TypeReference::METHOD_REFERENCE,
            TargetInfo::Cast { .. } => TypeReference::CAST,
            TargetInfo::ConstructorInvocationTypeArgument { .. } => {
                TypeReference::CONSTRUCTOR_INVOCATION_TYPE_ARGUMENT
            }
            TargetInfo::MethodInvocationTypeArgument { .. } => {
                TypeReference::METHOD_INVOCATION_TYPE_ARGUMENT
            }
            TargetInfo::ConstructorReferenceTypeArgument { .. } => {
                TypeReference::CONSTRUCTOR_REFERENCE_TYPE_ARGUMENT
            }
            TargetInfo::MethodReferenceTypeArgument { .. } => {
                TypeReference::METHOD_REFERENCE_TYPE_ARGUMENT
            }
        }
    }

    /// The packed reference for this target. Code positions and local
    /// variable ranges are not part of it.
    pub fn type_reference(&self) -> TypeReference {
        let sort = self.sort();
        match self {
            TargetInfo::ClassTypeParameter(index) | TargetInfo::MethodTypeParameter(index) => {
                TypeReference::type_parameter(sort, *index)
            }
            TargetInfo::ClassExtends(index) => TypeReference::super_type(*index),
            TargetInfo::ClassTypeParameterBound { param, bound }
            | TargetInfo::MethodTypeParameterBound { param, bound } => {
                TypeReference::type_parameter_bound(sort, *param, *bound)
            }
            TargetInfo::MethodFormalParameter(index) => TypeReference::formal_parameter(*index),
            TargetInfo::Throws(index) => TypeReference::exception(*index),
            TargetInfo::ExceptionParameter(index) => TypeReference::try_catch(*index),
            TargetInfo::Cast { type_argument, .. }
            | TargetInfo::ConstructorInvocationTypeArgument { type_argument, .. }
            | TargetInfo::MethodInvocationTypeArgument { type_argument, .. }
            | TargetInfo::ConstructorReferenceTypeArgument { type_argument, .. }
            | TargetInfo::MethodReferenceTypeArgument { type_argument, .. } => {
                TypeReference::type_argument(sort, *type_argument)
            }
            _ => TypeReference::new(sort),
        }
    }

    /// Builds a target that needs no code position.
    pub fn from_type_reference(type_ref: TypeReference) -> Result<Self> {
        let target = match type_ref.sort() {
            TypeReference::CLASS_TYPE_PARAMETER => {
                TargetInfo::ClassTypeParameter(type_ref.type_parameter_index())
            }
            TypeReference::METHOD_TYPE_PARAMETER => {
                TargetInfo::MethodTypeParameter(type_ref.type_parameter_index())
            }
            TypeReference::CLASS_EXTENDS => TargetInfo::ClassExtends(type_ref.super_type_index()),
            TypeReference::CLASS_TYPE_PARAMETER_BOUND => TargetInfo::ClassTypeParameterBound {
                param: type_ref.type_parameter_index(),
                bound: type_ref.type_parameter_bound_index(),
            },
            TypeReference::METHOD_TYPE_PARAMETER_BOUND => TargetInfo::MethodTypeParameterBound {
                param: type_ref.type_parameter_index(),
                bound: type_ref.type_parameter_bound_index(),
            },
            TypeReference::FIELD => TargetInfo::Field,
            TypeReference::METHOD_RETURN => TargetInfo::MethodReturn,
            TypeReference::METHOD_RECEIVER => TargetInfo::MethodReceiver,
            TypeReference::METHOD_FORMAL_PARAMETER => {
                TargetInfo::MethodFormalParameter(type_ref.formal_parameter_index())
            }
            TypeReference::THROWS => TargetInfo::Throws(type_ref.exception_index()),
            TypeReference::EXCEPTION_PARAMETER => {
                TargetInfo::ExceptionParameter(type_ref.try_catch_block_index())
            }
            sort => {
                return Err(Error::protocol(format!(
                    "type reference sort 0x{sort:02x} needs a code position"
                )))
            }
        };
        Ok(target)
    }

    /// Builds an instruction target at `position`.
    pub fn at_position(type_ref: TypeReference, position: P) -> Result<Self> {
        let type_argument = type_ref.type_argument_index();
        let target = match type_ref.sort() {
            TypeReference::INSTANCEOF => TargetInfo::InstanceOf(position),
            TypeReference::NEW => TargetInfo::New(position),
            TypeReference::CONSTRUCTOR_REFERENCE => TargetInfo::ConstructorReference(position),
            TypeReference::METHOD_REFERENCE => TargetInfo::MethodReference(position),
            TypeReference::CAST => TargetInfo::Cast { position, type_argument },
            TypeReference::CONSTRUCTOR_INVOCATION_TYPE_ARGUMENT => {
                TargetInfo::ConstructorInvocationTypeArgument { position, type_argument }
            }
            TypeReference::METHOD_INVOCATION_TYPE_ARGUMENT => {
                TargetInfo::MethodInvocationTypeArgument { position, type_argument }
            }
            TypeReference::CONSTRUCTOR_REFERENCE_TYPE_ARGUMENT => {
                TargetInfo::ConstructorReferenceTypeArgument { position, type_argument }
            }
            TypeReference::METHOD_REFERENCE_TYPE_ARGUMENT => {
                TargetInfo::MethodReferenceTypeArgument { position, type_argument }
            }
            sort => {
                return Err(Error::protocol(format!(
                    "type reference sort 0x{sort:02x} is not an instruction target"
                )))
            }
        };
        Ok(target)
    }

    /// Builds a local or resource variable target.
    pub fn local_variable(type_ref: TypeReference, ranges: Vec<LocalVarTarget<P>>) -> Result<Self> {
        match type_ref.sort() {
            TypeReference::LOCAL_VARIABLE => Ok(TargetInfo::LocalVariable(ranges)),
            TypeReference::RESOURCE_VARIABLE => Ok(TargetInfo::ResourceVariable(ranges)),
            sort => Err(Error::protocol(format!(
                "type reference sort 0x{sort:02x} is not a local variable target"
            ))),
        }
    }

    /// The instruction position of an offset target.
    pub fn position(&self) -> Option<&P> {
        match self {
            TargetInfo::InstanceOf(position)
            | TargetInfo::New(position)
            | TargetInfo::ConstructorReference(position)
            | TargetInfo::MethodReference(position)
            | TargetInfo::Cast { position, .. }
            | TargetInfo::ConstructorInvocationTypeArgument { position, .. }
            | TargetInfo::MethodInvocationTypeArgument { position, .. }
            | TargetInfo::ConstructorReferenceTypeArgument { position, .. }
            | TargetInfo::MethodReferenceTypeArgument { position, .. } => Some(position),
            _ => None,
        }
    }

    pub fn local_variable_ranges(&self) -> Option<&[LocalVarTarget<P>]> {
        match self {
            TargetInfo::LocalVariable(ranges) | TargetInfo::ResourceVariable(ranges) => {
                Some(ranges)
            }
            _ => None,
        }
    }

    /// Rewrites every code position with `f`.
    pub fn map_positions<Q, E>(
        self,
        mut f: impl FnMut(P) -> std::result::Result<Q, E>,
    ) -> std::result::Result<TargetInfo<Q>, E> {
        let mapped = match self {
            TargetInfo::ClassTypeParameter(i) => TargetInfo::ClassTypeParameter(i),
            TargetInfo::MethodTypeParameter(i) => TargetInfo::MethodTypeParameter(i),
            TargetInfo::ClassExtends(i) => TargetInfo::ClassExtends(i),
            TargetInfo::ClassTypeParameterBound { param, bound } => {
                TargetInfo::ClassTypeParameterBound { param, bound }
            }
            TargetInfo::MethodTypeParameterBound { param, bound } => {
                TargetInfo::MethodTypeParameterBound { param, bound }
            }
            TargetInfo::Field => TargetInfo::Field,
            TargetInfo::MethodReturn => TargetInfo::MethodReturn,
            TargetInfo::MethodReceiver => TargetInfo::MethodReceiver,
            TargetInfo::MethodFormalParameter(i) => TargetInfo::MethodFormalParameter(i),
            TargetInfo::Throws(i) => TargetInfo::Throws(i),
            TargetInfo::ExceptionParameter(i) => TargetInfo::ExceptionParameter(i),
            TargetInfo::LocalVariable(ranges) => {
                TargetInfo::LocalVariable(map_ranges(ranges, &mut f)?)
            }
            TargetInfo::ResourceVariable(ranges) => {
                TargetInfo::ResourceVariable(map_ranges(ranges, &mut f)?)
            }
            TargetInfo::InstanceOf(p) => TargetInfo::InstanceOf(f(p)?),
            TargetInfo::New(p) => TargetInfo::New(f(p)?),
            TargetInfo::ConstructorReference(p) => TargetInfo::ConstructorReference(f(p)?),
            TargetInfo::MethodReference(p) => TargetInfo::MethodReference(f(p)?),
            TargetInfo::Cast { position, type_argument } => TargetInfo::Cast {
                position: f(position)?,
                type_argument,
            },
            TargetInfo::ConstructorInvocationTypeArgument { position, type_argument } => {
                TargetInfo::ConstructorInvocationTypeArgument {
                    position: f(position)?,
                    type_argument,
                }
            }
            TargetInfo::MethodInvocationTypeArgument { position, type_argument } => {
                TargetInfo::MethodInvocationTypeArgument {
                    position: f(position)?,
                    type_argument,
                }
            }
            TargetInfo::ConstructorReferenceTypeArgument { position, type_argument } => {
                TargetInfo::ConstructorReferenceTypeArgument {
                    position: f(position)?,
                    type_argument,
                }
            }
            TargetInfo::MethodReferenceTypeArgument { position, type_argument } => {
                TargetInfo::MethodReferenceTypeArgument {
                    position: f(position)?,
                    type_argument,
                }
            }
        };
        Ok(mapped)
    }
}

fn map_ranges<P, Q, E>(
    ranges: Vec<LocalVarTarget<P>>,
    f: &mut impl FnMut(P) -> std::result::Result<Q, E>,
) -> std::result::Result<Vec<LocalVarTarget<Q>>, E> {
    ranges
        .into_iter()
        .map(|range| {
            Ok(LocalVarTarget {
                start: f(range.start)?,
                end: f(range.end)?,
                index: range.index,
            })
        })
        .collect()
}

fn position_target<Q>(type_ref: TypeReference, position: Q) -> TargetInfo<Q> {
    let type_argument = type_ref.type_argument_index();
    match type_ref.sort() {
        TypeReference::INSTANCEOF => TargetInfo::InstanceOf(position),
        TypeReference::NEW => TargetInfo::New(position),
        TypeReference::CONSTRUCTOR_REFERENCE => TargetInfo::ConstructorReference(position),
        TypeReference::METHOD_REFERENCE => TargetInfo::MethodReference(position),
        TypeReference::CAST => TargetInfo::Cast { position, type_argument },
        TypeReference::CONSTRUCTOR_INVOCATION_TYPE_ARGUMENT => {
            TargetInfo::ConstructorInvocationTypeArgument { position, type_argument }
        }
        TypeReference::METHOD_INVOCATION_TYPE_ARGUMENT => {
            TargetInfo::MethodInvocationTypeArgument { position, type_argument }
        }
        TypeReference::CONSTRUCTOR_REFERENCE_TYPE_ARGUMENT => {
            TargetInfo::ConstructorReferenceTypeArgument { position, type_argument }
        }
        _ => TargetInfo::MethodReferenceTypeArgument { position, type_argument },
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeAnnotation<P = LabelNode> {
    pub target: TargetInfo<P>,
    pub path: Vec<TypePathComponent>,
    pub annotation: Annotation,
}

impl<P> TypeAnnotation<P> {
    pub fn map_positions<Q, E>(
        self,
        f: impl FnMut(P) -> std::result::Result<Q, E>,
    ) -> std::result::Result<TypeAnnotation<Q>, E> {
        Ok(TypeAnnotation {
            target: self.target.map_positions(f)?,
            path: self.path,
            annotation: self.annotation,
        })
    }
}

pub(crate) fn read_annotations(
    reader: &mut ByteReader<'_>,
    cp: &ConstantPool,
) -> std::result::Result<Vec<Annotation>, ClassReadError> {
    let count = reader.read_u2()? as usize;
    let mut annotations = Vec::with_capacity(count);
    for _ in 0..count {
        annotations.push(read_annotation(reader, cp)?);
    }
    Ok(annotations)
}

pub(crate) fn read_parameter_annotations(
    reader: &mut ByteReader<'_>,
    cp: &ConstantPool,
) -> std::result::Result<Vec<Vec<Annotation>>, ClassReadError> {
    let count = reader.read_u1()? as usize;
    let mut parameters = Vec::with_capacity(count);
    for _ in 0..count {
        parameters.push(read_annotations(reader, cp)?);
    }
    Ok(parameters)
}

pub(crate) fn read_type_annotations(
    reader: &mut ByteReader<'_>,
    cp: &ConstantPool,
) -> std::result::Result<Vec<TypeAnnotation<u16>>, ClassReadError> {
    let count = reader.read_u2()? as usize;
    let mut annotations = Vec::with_capacity(count);
    for _ in 0..count {
        annotations.push(read_type_annotation(reader, cp)?);
    }
    Ok(annotations)
}

pub(crate) fn read_annotation(
    reader: &mut ByteReader<'_>,
    cp: &ConstantPool,
) -> std::result::Result<Annotation, ClassReadError> {
    let descriptor = cp.utf8(reader.read_u2()?)?.to_string();
    let count = reader.read_u2()? as usize;
    let mut elements = Vec::with_capacity(count);
    for _ in 0..count {
        let name = cp.utf8(reader.read_u2()?)?.to_string();
        elements.push((name, read_element_value(reader, cp)?));
    }
    Ok(Annotation { descriptor, elements })
}

pub(crate) fn read_element_value(
    reader: &mut ByteReader<'_>,
    cp: &ConstantPool,
) -> std::result::Result<ElementValue, ClassReadError> {
    let tag = reader.read_u1()?;
    let int_value = |reader: &mut ByteReader<'_>| -> std::result::Result<i32, ClassReadError> {
        let index = reader.read_u2()?;
        match cp.get(index)? {
            CpInfo::Integer(value) => Ok(*value),
            _ => Err(ClassReadError::InvalidIndex(index)),
        }
    };
    let value = match tag {
        b'Z' => ElementValue::Boolean(int_value(reader)? != 0),
        b'B' => ElementValue::Byte(int_value(reader)? as i8),
        b'C' => ElementValue::Char(int_value(reader)? as u16),
        b'S' => ElementValue::Short(int_value(reader)? as i16),
        b'I' => ElementValue::Int(int_value(reader)?),
        b'J' => {
            let index = reader.read_u2()?;
            match cp.get(index)? {
                CpInfo::Long(value) => ElementValue::Long(*value),
                _ => return Err(ClassReadError::InvalidIndex(index)),
            }
        }
        b'F' => {
            let index = reader.read_u2()?;
            match cp.get(index)? {
                CpInfo::Float(value) => ElementValue::Float(*value),
                _ => return Err(ClassReadError::InvalidIndex(index)),
            }
        }
        b'D' => {
            let index = reader.read_u2()?;
            match cp.get(index)? {
                CpInfo::Double(value) => ElementValue::Double(*value),
                _ => return Err(ClassReadError::InvalidIndex(index)),
            }
        }
        b's' => ElementValue::String(cp.utf8(reader.read_u2()?)?.to_string()),
        b'e' => ElementValue::Enum {
            descriptor: cp.utf8(reader.read_u2()?)?.to_string(),
            name: cp.utf8(reader.read_u2()?)?.to_string(),
        },
        b'c' => ElementValue::Class(cp.utf8(reader.read_u2()?)?.to_string()),
        b'@' => ElementValue::Annotation(read_annotation(reader, cp)?),
        b'[' => {
            let count = reader.read_u2()? as usize;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(read_element_value(reader, cp)?);
            }
            ElementValue::Array(values)
        }
        other => return Err(ClassReadError::InvalidElementTag(other as char)),
    };
    Ok(value)
}

fn read_type_annotation(
    reader: &mut ByteReader<'_>,
    cp: &ConstantPool,
) -> std::result::Result<TypeAnnotation<u16>, ClassReadError> {
    let sort = TypeReference::check_sort(reader.read_u1()?)?;
    let target = match sort {
        TypeReference::CLASS_TYPE_PARAMETER => TargetInfo::ClassTypeParameter(reader.read_u1()?),
        TypeReference::METHOD_TYPE_PARAMETER => TargetInfo::MethodTypeParameter(reader.read_u1()?),
        TypeReference::CLASS_EXTENDS => TargetInfo::ClassExtends(reader.read_u2()?),
        TypeReference::CLASS_TYPE_PARAMETER_BOUND => TargetInfo::ClassTypeParameterBound {
            param: reader.read_u1()?,
            bound: reader.read_u1()?,
        },
        TypeReference::METHOD_TYPE_PARAMETER_BOUND => TargetInfo::MethodTypeParameterBound {
            param: reader.read_u1()?,
            bound: reader.read_u1()?,
        },
        TypeReference::FIELD => TargetInfo::Field,
        TypeReference::METHOD_RETURN => TargetInfo::MethodReturn,
        TypeReference::METHOD_RECEIVER => TargetInfo::MethodReceiver,
        TypeReference::METHOD_FORMAL_PARAMETER => {
            TargetInfo::MethodFormalParameter(reader.read_u1()?)
        }
        TypeReference::THROWS => TargetInfo::Throws(reader.read_u2()?),
        TypeReference::LOCAL_VARIABLE | TypeReference::RESOURCE_VARIABLE => {
            let count = reader.read_u2()? as usize;
            let mut ranges = Vec::with_capacity(count);
            for _ in 0..count {
                let start = reader.read_u2()?;
                let length = reader.read_u2()?;
                ranges.push(LocalVarTarget {
                    start,
                    end: start.wrapping_add(length),
                    index: reader.read_u2()?,
                });
            }
            if sort == TypeReference::LOCAL_VARIABLE {
                TargetInfo::LocalVariable(ranges)
            } else {
                TargetInfo::ResourceVariable(ranges)
            }
        }
        TypeReference::EXCEPTION_PARAMETER => TargetInfo::ExceptionParameter(reader.read_u2()?),
        TypeReference::INSTANCEOF..=TypeReference::METHOD_REFERENCE => {
            position_target(TypeReference::new(sort), reader.read_u2()?)
        }
        _ => {
            let offset = reader.read_u2()?;
            let argument = reader.read_u1()?;
            position_target(TypeReference::type_argument(sort, argument), offset)
        }
    };

    let path_length = reader.read_u1()? as usize;
    let mut path = Vec::with_capacity(path_length);
    for _ in 0..path_length {
        let kind = reader.read_u1()?;
        let argument = reader.read_u1()?;
        path.push(match kind {
            TYPE_PATH_ARRAY_ELEMENT => TypePathComponent::Array,
            TYPE_PATH_INNER_TYPE => TypePathComponent::InnerType,
            TYPE_PATH_WILDCARD_BOUND => TypePathComponent::Wildcard,
            TYPE_PATH_TYPE_ARGUMENT => TypePathComponent::TypeArgument(argument),
            _ => return Err(ClassReadError::InvalidAttribute(format!("type path kind {kind}"))),
        });
    }

    Ok(TypeAnnotation {
        target,
        path,
        annotation: read_annotation(reader, cp)?,
    })
}

pub(crate) fn write_annotations(
    cp: &mut ConstantPoolBuilder,
    annotations: &[Annotation],
) -> Vec<u8> {
    let mut out = Vec::new();
    write_u2(&mut out, annotations.len() as u16);
    for annotation in annotations {
        write_annotation(&mut out, cp, annotation);
    }
    out
}

pub(crate) fn write_parameter_annotations(
    cp: &mut ConstantPoolBuilder,
    parameters: &[Vec<Annotation>],
) -> Vec<u8> {
    let mut out = Vec::new();
    write_u1(&mut out, parameters.len() as u8);
    for annotations in parameters {
        write_u2(&mut out, annotations.len() as u16);
        for annotation in annotations {
            write_annotation(&mut out, cp, annotation);
        }
    }
    out
}

pub(crate) fn write_type_annotations(
    cp: &mut ConstantPoolBuilder,
    annotations: &[TypeAnnotation<u16>],
) -> Vec<u8> {
    let mut out = Vec::new();
    write_u2(&mut out, annotations.len() as u16);
    for annotation in annotations {
        write_type_annotation(&mut out, cp, annotation);
    }
    out
}

pub(crate) fn write_annotation(
    out: &mut Vec<u8>,
    cp: &mut ConstantPoolBuilder,
    annotation: &Annotation,
) {
    write_u2(out, cp.utf8(&annotation.descriptor));
    write_u2(out, annotation.elements.len() as u16);
    for (name, value) in &annotation.elements {
        write_u2(out, cp.utf8(name));
        write_element_value(out, cp, value);
    }
}

pub(crate) fn write_element_value(
    out: &mut Vec<u8>,
    cp: &mut ConstantPoolBuilder,
    value: &ElementValue,
) {
    write_u1(out, value.tag());
    match value {
        ElementValue::Boolean(v) => write_u2(out, cp.integer(*v as i32)),
        ElementValue::Byte(v) => write_u2(out, cp.integer(*v as i32)),
        ElementValue::Char(v) => write_u2(out, cp.integer(*v as i32)),
        ElementValue::Short(v) => write_u2(out, cp.integer(*v as i32)),
        ElementValue::Int(v) => write_u2(out, cp.integer(*v)),
        ElementValue::Long(v) => write_u2(out, cp.long(*v)),
        ElementValue::Float(v) => write_u2(out, cp.float(*v)),
        ElementValue::Double(v) => write_u2(out, cp.double(*v)),
        ElementValue::String(v) | ElementValue::Class(v) => write_u2(out, cp.utf8(v)),
        ElementValue::Enum { descriptor, name } => {
            write_u2(out, cp.utf8(descriptor));
            write_u2(out, cp.utf8(name));
        }
        ElementValue::Annotation(annotation) => write_annotation(out, cp, annotation),
        ElementValue::Array(values) => {
            write_u2(out, values.len() as u16);
            for value in values {
                write_element_value(out, cp, value);
            }
        }
    }
}

fn write_type_annotation(
    out: &mut Vec<u8>,
    cp: &mut ConstantPoolBuilder,
    annotation: &TypeAnnotation<u16>,
) {
    write_u1(out, annotation.target.sort());
    match &annotation.target {
        TargetInfo::ClassTypeParameter(index)
        | TargetInfo::MethodTypeParameter(index)
        | TargetInfo::MethodFormalParameter(index) => write_u1(out, *index),
        TargetInfo::ClassExtends(index)
        | TargetInfo::Throws(index)
        | TargetInfo::ExceptionParameter(index) => write_u2(out, *index),
        TargetInfo::ClassTypeParameterBound { param, bound }
        | TargetInfo::MethodTypeParameterBound { param, bound } => {
            write_u1(out, *param);
            write_u1(out, *bound);
        }
        TargetInfo::Field | TargetInfo::MethodReturn | TargetInfo::MethodReceiver => {}
        TargetInfo::LocalVariable(ranges) | TargetInfo::ResourceVariable(ranges) => {
            write_u2(out, ranges.len() as u16);
            for range in ranges {
                write_u2(out, range.start);
                write_u2(out, range.end.wrapping_sub(range.start));
                write_u2(out, range.index);
            }
        }
        TargetInfo::InstanceOf(offset)
        | TargetInfo::New(offset)
        | TargetInfo::ConstructorReference(offset)
        | TargetInfo::MethodReference(offset) => write_u2(out, *offset),
        TargetInfo::Cast { position, type_argument }
        | TargetInfo::ConstructorInvocationTypeArgument { position, type_argument }
        | TargetInfo::MethodInvocationTypeArgument { position, type_argument }
        | TargetInfo::ConstructorReferenceTypeArgument { position, type_argument }
        | TargetInfo::MethodReferenceTypeArgument { position, type_argument } => {
            write_u2(out, *position);
            write_u1(out, *type_argument);
        }
    }
    write_u1(out, annotation.path.len() as u8);
    for component in &annotation.path {
        let (kind, argument) = match component {
            TypePathComponent::Array => (TYPE_PATH_ARRAY_ELEMENT, 0),
            TypePathComponent::InnerType => (TYPE_PATH_INNER_TYPE, 0),
            TypePathComponent::Wildcard => (TYPE_PATH_WILDCARD_BOUND, 0),
            TypePathComponent::TypeArgument(index) => (TYPE_PATH_TYPE_ARGUMENT, *index),
        };
        write_u1(out, kind);
        write_u1(out, argument);
    }
    write_annotation(out, cp, &annotation.annotation);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Log(Vec<String>);

    impl AnnotationVisitor for Log {
        fn visit(&mut self, name: Option<&str>, value: &AnnotationValue) -> Result<()> {
            self.0.push(format!("visit {name:?} {value:?}"));
            Ok(())
        }

        fn visit_array(
            &mut self,
            name: Option<&str>,
        ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
            self.0.push(format!("array {name:?}"));
            Ok(Some(Box::new(Nested(&mut self.0))))
        }

        fn visit_end(&mut self) -> Result<()> {
            self.0.push("end".to_string());
            Ok(())
        }
    }

    struct Nested<'a>(&'a mut Vec<String>);

    impl AnnotationVisitor for Nested<'_> {
        fn visit_enum(&mut self, _name: Option<&str>, descriptor: &str, value: &str) -> Result<()> {
            self.0.push(format!("enum {descriptor} {value}"));
            Ok(())
        }

        fn visit_end(&mut self) -> Result<()> {
            self.0.push("array end".to_string());
            Ok(())
        }
    }

    #[test]
    fn homogeneous_primitive_arrays_collapse() {
        let annotation = Annotation::new("LMarker;")
            .with_element(
                "ints",
                ElementValue::Array(vec![ElementValue::Int(1), ElementValue::Int(2)]),
            )
            .with_element(
                "mixed",
                ElementValue::Array(vec![ElementValue::Enum {
                    descriptor: "LColor;".into(),
                    name: "RED".into(),
                }]),
            )
            .with_element("empty", ElementValue::Array(vec![]));
        let mut log = Log::default();
        annotation.accept(&mut log).unwrap();
        assert_eq!(
            log.0,
            vec![
                "visit Some(\"ints\") IntArray([1, 2])",
                "array Some(\"mixed\")",
                "enum LColor; RED",
                "array end",
                "array Some(\"empty\")",
                "array end",
                "end",
            ]
        );
    }

    #[test]
    fn builder_rejects_unnamed_elements() {
        let mut annotation = Annotation::new("LMarker;");
        let mut builder = AnnotationNodeBuilder::for_annotation(&mut annotation);
        let err = builder.visit(None, &AnnotationValue::Int(3)).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }

    #[test]
    fn builder_collects_nested_values() {
        let mut annotation = Annotation::new("LOuter;");
        {
            let mut builder = AnnotationNodeBuilder::for_annotation(&mut annotation);
            let flags = AnnotationValue::BooleanArray(vec![true, false]);
            builder.visit(Some("flags"), &flags).unwrap();
            let mut nested = builder.visit_annotation(Some("inner"), "LInner;").unwrap().unwrap();
            nested.visit(Some("value"), &AnnotationValue::String("x".into())).unwrap();
            nested.visit_end().unwrap();
        }
        assert_eq!(
            annotation,
            Annotation::new("LOuter;")
                .with_element(
                    "flags",
                    ElementValue::Array(vec![
                        ElementValue::Boolean(true),
                        ElementValue::Boolean(false),
                    ])
                )
                .with_element(
                    "inner",
                    ElementValue::Annotation(
                        Annotation::new("LInner;")
                            .with_element("value", ElementValue::String("x".into()))
                    )
                )
        );
    }

    #[test]
    fn type_annotation_binary_form() {
        let annotation = TypeAnnotation {
            target: TargetInfo::LocalVariable(vec![LocalVarTarget { start: 4, end: 10, index: 2 }]),
            path: vec![TypePathComponent::TypeArgument(1), TypePathComponent::Array],
            annotation: Annotation::new("LNonNull;"),
        };
        let mut cp = ConstantPoolBuilder::new();
        let body = write_type_annotations(&mut cp, std::slice::from_ref(&annotation));
        assert_eq!(&body[..10], &[0, 1, 0x40, 0, 1, 0, 4, 0, 6, 0]);

        let parsed = read_type_annotations(&mut ByteReader::new(&body), cp.pool()).unwrap();
        assert_eq!(parsed, vec![annotation]);
    }

    #[test]
    fn target_info_maps_positions() {
        let target: TargetInfo<u16> = TargetInfo::Cast { position: 7, type_argument: 1 };
        let mapped = target.map_positions(|offset| Ok::<_, ()>(offset as u32 * 2)).unwrap();
        assert_eq!(mapped, TargetInfo::Cast { position: 14, type_argument: 1 });
        assert_eq!(mapped.type_reference().value(), 0x4700_0001);
    }
}
