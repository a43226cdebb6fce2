//! Values passed through the visitor protocol.

use std::fmt;
use std::str::FromStr;

use crate::error::{ClassReadError, Error};
use crate::visitor::Label;

/// A field or method type, stored as its descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Type {
    descriptor: String,
}

impl Type {
    pub fn from_descriptor(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
        }
    }

    /// Creates an object or array type from an internal name such as
    /// `java/lang/String` or `[I`.
    pub fn object_type(internal_name: &str) -> Self {
        if internal_name.starts_with('[') {
            Self::from_descriptor(internal_name)
        } else {
            Self::from_descriptor(format!("L{internal_name};"))
        }
    }

    pub fn method_type(descriptor: impl Into<String>) -> Self {
        Self::from_descriptor(descriptor)
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn is_method(&self) -> bool {
        self.descriptor.starts_with('(')
    }

    /// Internal name of an object or array type; the descriptor of any
    /// other type.
    pub fn internal_name(&self) -> &str {
        match self.descriptor.strip_prefix('L').and_then(|s| s.strip_suffix(';')) {
            Some(name) => name,
            None => &self.descriptor,
        }
    }
}

pub const H_GETFIELD: u8 = 1;
pub const H_GETSTATIC: u8 = 2;
pub const H_PUTFIELD: u8 = 3;
pub const H_PUTSTATIC: u8 = 4;
pub const H_INVOKEVIRTUAL: u8 = 5;
pub const H_INVOKESTATIC: u8 = 6;
pub const H_INVOKESPECIAL: u8 = 7;
pub const H_NEWINVOKESPECIAL: u8 = 8;
pub const H_INVOKEINTERFACE: u8 = 9;

/// A method handle constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    pub tag: u8,
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub is_interface: bool,
}

impl Handle {
    pub fn new(
        tag: u8,
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        is_interface: bool,
    ) -> Self {
        Self {
            tag,
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
            is_interface,
        }
    }
}

/// A dynamically-computed constant.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantDynamic {
    pub name: String,
    pub descriptor: String,
    pub bootstrap_method: Handle,
    pub bootstrap_arguments: Vec<Constant>,
}

/// A loadable constant: the operand of `ldc`, a field's `ConstantValue`, or
/// a bootstrap method argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    /// An object, array or method type.
    Type(Type),
    Handle(Handle),
    Dynamic(Box<ConstantDynamic>),
}

impl Constant {
    /// Long and double constants take two stack slots.
    pub fn is_wide(&self) -> bool {
        match self {
            Constant::Long(_) | Constant::Double(_) => true,
            Constant::Dynamic(dynamic) => matches!(dynamic.descriptor.as_str(), "J" | "D"),
            _ => false,
        }
    }
}

/// A primitive, string or class annotation element value as passed to
/// `AnnotationVisitor::visit`.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationValue {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Type(Type),
    BooleanArray(Vec<bool>),
    ByteArray(Vec<i8>),
    CharArray(Vec<u16>),
    ShortArray(Vec<i16>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
    FloatArray(Vec<f32>),
    DoubleArray(Vec<f64>),
}

pub const TYPE_PATH_ARRAY_ELEMENT: u8 = 0;
pub const TYPE_PATH_INNER_TYPE: u8 = 1;
pub const TYPE_PATH_WILDCARD_BOUND: u8 = 2;
pub const TYPE_PATH_TYPE_ARGUMENT: u8 = 3;

/// The path to the annotated part of a type, as stored in a class file:
/// pairs of `(kind, type_argument_index)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TypePath {
    steps: Vec<(u8, u8)>,
}

impl TypePath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<(u8, u8)>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[(u8, u8)] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Display for TypePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (kind, argument) in &self.steps {
            match *kind {
                TYPE_PATH_ARRAY_ELEMENT => f.write_str("[")?,
                TYPE_PATH_INNER_TYPE => f.write_str(".")?,
                TYPE_PATH_WILDCARD_BOUND => f.write_str("*")?,
                _ => write!(f, "{argument};")?,
            }
        }
        Ok(())
    }
}

impl FromStr for TypePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut steps = Vec::new();
        let mut chars = s.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '[' => steps.push((TYPE_PATH_ARRAY_ELEMENT, 0)),
                '.' => steps.push((TYPE_PATH_INNER_TYPE, 0)),
                '*' => steps.push((TYPE_PATH_WILDCARD_BOUND, 0)),
                '0'..='9' => {
                    let too_large =
                        || Error::protocol(format!("type argument index too large in {s:?}"));
                    let mut value = c.to_digit(10).unwrap_or(0);
                    loop {
                        match chars.next() {
                            Some(';') => break,
                            Some(d @ '0'..='9') => {
                                let digit = d.to_digit(10).unwrap_or(0);
                                value = value
                                    .checked_mul(10)
                                    .and_then(|value| value.checked_add(digit))
                                    .ok_or_else(too_large)?;
                            }
                            _ => return Err(Error::protocol(format!("malformed type path {s:?}"))),
                        }
                    }
                    let argument = u8::try_from(value).map_err(|_| too_large())?;
                    steps.push((TYPE_PATH_TYPE_ARGUMENT, argument));
                }
                _ => return Err(Error::protocol(format!("malformed type path {s:?}"))),
            }
        }
        Ok(Self { steps })
    }
}

/// A packed type annotation target, laid out with the target sort in the
/// most significant byte and its indices in the lower bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeReference(u32);

impl TypeReference {
    pub const CLASS_TYPE_PARAMETER: u8 = 0x00;
    pub const METHOD_TYPE_PARAMETER: u8 = 0x01;
    pub const CLASS_EXTENDS: u8 = 0x10;
    pub const CLASS_TYPE_PARAMETER_BOUND: u8 = 0x11;
    pub const METHOD_TYPE_PARAMETER_BOUND: u8 = 0x12;
    pub const FIELD: u8 = 0x13;
    pub const METHOD_RETURN: u8 = 0x14;
    pub const METHOD_RECEIVER: u8 = 0x15;
    pub const METHOD_FORMAL_PARAMETER: u8 = 0x16;
    pub const THROWS: u8 = 0x17;
    pub const LOCAL_VARIABLE: u8 = 0x40;
    pub const RESOURCE_VARIABLE: u8 = 0x41;
    pub const EXCEPTION_PARAMETER: u8 = 0x42;
    pub const INSTANCEOF: u8 = 0x43;
    pub const NEW: u8 = 0x44;
    pub const CONSTRUCTOR_REFERENCE: u8 = 0x45;
    pub const METHOD_REFERENCE: u8 = 0x46;
    pub const CAST: u8 = 0x47;
    pub const CONSTRUCTOR_INVOCATION_TYPE_ARGUMENT: u8 = 0x48;
    pub const METHOD_INVOCATION_TYPE_ARGUMENT: u8 = 0x49;
    pub const CONSTRUCTOR_REFERENCE_TYPE_ARGUMENT: u8 = 0x4A;
    pub const METHOD_REFERENCE_TYPE_ARGUMENT: u8 = 0x4B;

    pub fn from_value(value: u32) -> Self {
        Self(value)
    }

    /// A reference whose target carries no index.
    pub fn new(sort: u8) -> Self {
        Self((sort as u32) << 24)
    }

    pub fn type_parameter(sort: u8, param_index: u8) -> Self {
        Self(((sort as u32) << 24) | ((param_index as u32) << 16))
    }

    pub fn type_parameter_bound(sort: u8, param_index: u8, bound_index: u8) -> Self {
        Self(((sort as u32) << 24) | ((param_index as u32) << 16) | ((bound_index as u32) << 8))
    }

    /// `interface_index` is `0xFFFF` for the super class.
    pub fn super_type(interface_index: u16) -> Self {
        Self(((Self::CLASS_EXTENDS as u32) << 24) | ((interface_index as u32) << 8))
    }

    pub fn formal_parameter(param_index: u8) -> Self {
        Self(((Self::METHOD_FORMAL_PARAMETER as u32) << 24) | ((param_index as u32) << 16))
    }

    pub fn exception(exception_index: u16) -> Self {
        Self(((Self::THROWS as u32) << 24) | ((exception_index as u32) << 8))
    }

    pub fn try_catch(try_catch_index: u16) -> Self {
        Self(((Self::EXCEPTION_PARAMETER as u32) << 24) | ((try_catch_index as u32) << 8))
    }

    pub fn type_argument(sort: u8, argument_index: u8) -> Self {
        Self(((sort as u32) << 24) | argument_index as u32)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn sort(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub fn type_parameter_index(&self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub fn type_parameter_bound_index(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn super_type_index(&self) -> u16 {
        (self.0 >> 8) as u16
    }

    pub fn formal_parameter_index(&self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub fn exception_index(&self) -> u16 {
        (self.0 >> 8) as u16
    }

    pub fn try_catch_block_index(&self) -> u16 {
        (self.0 >> 8) as u16
    }

    pub fn type_argument_index(&self) -> u8 {
        self.0 as u8
    }

    pub(crate) fn check_sort(sort: u8) -> Result<u8, ClassReadError> {
        match sort {
            0x00 | 0x01 | 0x10..=0x17 | 0x40..=0x4B => Ok(sort),
            _ => Err(ClassReadError::InvalidTargetType(sort)),
        }
    }
}

/// The encoding a visitor frame uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Fully expanded, as produced with `EXPAND_FRAMES`.
    New,
    Full,
    Append,
    Chop,
    Same,
    Same1,
}

/// A verification type in a visitor frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameValue {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    /// An initialized object or array, by internal name.
    Object(String),
    /// The result of the `new` instruction at the given label.
    Uninitialized(Label),
}

/// A stack map frame as passed to `MethodVisitor::visit_frame`.
///
/// Long and double values are single entries in both lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    New {
        locals: Vec<FrameValue>,
        stack: Vec<FrameValue>,
    },
    Full {
        locals: Vec<FrameValue>,
        stack: Vec<FrameValue>,
    },
    Append(Vec<FrameValue>),
    Chop(usize),
    Same,
    Same1(FrameValue),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::New { .. } => FrameKind::New,
            Frame::Full { .. } => FrameKind::Full,
            Frame::Append(_) => FrameKind::Append,
            Frame::Chop(_) => FrameKind::Chop,
            Frame::Same => FrameKind::Same,
            Frame::Same1(_) => FrameKind::Same1,
        }
    }
}
