//! Stack map frames: the `StackMapTable` binary form and the delta
//! encoding between consecutive frames.

use crate::bytes::{write_u1, write_u2, ByteReader};
use crate::constant_pool::{ConstantPool, ConstantPoolBuilder};
use crate::constants::ACC_STATIC;
use crate::error::ClassReadError;

/// A verification type as stored in a class file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    /// Internal name of a class or array type.
    Object(String),
    /// Offset of the `new` instruction that created the value.
    Uninitialized(u16),
}

impl FrameType {
    pub fn is_wide(&self) -> bool {
        matches!(self, FrameType::Long | FrameType::Double)
    }
}

/// The frame type byte, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTag {
    Same,
    SameLocals1StackItem,
    SameLocals1StackItemExtended,
    Chop(u8),
    SameExtended,
    Append(u8),
    Full,
}

pub fn decode_frame_type(frame_type: u8) -> Result<FrameTag, ClassReadError> {
    let tag = match frame_type {
        0..=63 => FrameTag::Same,
        64..=127 => FrameTag::SameLocals1StackItem,
        247 => FrameTag::SameLocals1StackItemExtended,
        248..=250 => FrameTag::Chop(251 - frame_type),
        251 => FrameTag::SameExtended,
        252..=254 => FrameTag::Append(frame_type - 251),
        255 => FrameTag::Full,
        _ => return Err(ClassReadError::InvalidStackMapFrameType(frame_type)),
    };
    Ok(tag)
}

/// A frame described relative to the locals of the previous frame.
/// Long and double values are single entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDelta<V> {
    Same,
    SameLocals1StackItem(V),
    Chop(usize),
    Append(Vec<V>),
    Full { locals: Vec<V>, stack: Vec<V> },
}

impl<V: Clone + PartialEq> FrameDelta<V> {
    /// Picks the narrowest delta that turns `previous` into `locals` with
    /// the given `stack`.
    pub fn diff(previous: &[V], locals: &[V], stack: &[V]) -> Self {
        if stack.is_empty() {
            if locals == previous {
                return FrameDelta::Same;
            }
            if locals.len() < previous.len()
                && previous.len() - locals.len() <= 3
                && previous.starts_with(locals)
            {
                return FrameDelta::Chop(previous.len() - locals.len());
            }
            if locals.len() > previous.len()
                && locals.len() - previous.len() <= 3
                && locals.starts_with(previous)
            {
                return FrameDelta::Append(locals[previous.len()..].to_vec());
            }
        } else if stack.len() == 1 && locals == previous {
            return FrameDelta::SameLocals1StackItem(stack[0].clone());
        }
        FrameDelta::Full {
            locals: locals.to_vec(),
            stack: stack.to_vec(),
        }
    }

    /// Applies the delta to the running `locals` and returns the stack.
    pub fn apply(self, locals: &mut Vec<V>) -> Result<Vec<V>, ClassReadError> {
        match self {
            FrameDelta::Same => Ok(Vec::new()),
            FrameDelta::SameLocals1StackItem(value) => Ok(vec![value]),
            FrameDelta::Chop(count) => {
                if count > locals.len() {
                    return Err(ClassReadError::InvalidAttribute(format!(
                        "chop frame removes {count} of {} locals",
                        locals.len()
                    )));
                }
                locals.truncate(locals.len() - count);
                Ok(Vec::new())
            }
            FrameDelta::Append(values) => {
                locals.extend(values);
                Ok(Vec::new())
            }
            FrameDelta::Full { locals: full, stack } => {
                *locals = full;
                Ok(stack)
            }
        }
    }

    pub fn map<W>(self, mut f: impl FnMut(V) -> W) -> FrameDelta<W> {
        match self {
            FrameDelta::Same => FrameDelta::Same,
            FrameDelta::SameLocals1StackItem(value) => FrameDelta::SameLocals1StackItem(f(value)),
            FrameDelta::Chop(count) => FrameDelta::Chop(count),
            FrameDelta::Append(values) => FrameDelta::Append(values.into_iter().map(f).collect()),
            FrameDelta::Full { locals, stack } => FrameDelta::Full {
                locals: locals.into_iter().map(&mut f).collect(),
                stack: stack.into_iter().map(f).collect(),
            },
        }
    }
}

/// A fully expanded frame at a bytecode offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedFrame<V> {
    pub offset: u16,
    pub locals: Vec<V>,
    pub stack: Vec<V>,
}

/// Turns `(offset_delta, delta)` pairs into frames at absolute offsets.
pub fn expand_frames<V: Clone + PartialEq>(
    initial_locals: Vec<V>,
    entries: Vec<(u16, FrameDelta<V>)>,
) -> Result<Vec<ExpandedFrame<V>>, ClassReadError> {
    let mut locals = initial_locals;
    let mut frames = Vec::with_capacity(entries.len());
    let mut previous: Option<u16> = None;
    for (offset_delta, delta) in entries {
        let offset = match previous {
            None => offset_delta as u32,
            Some(previous) => previous as u32 + offset_delta as u32 + 1,
        };
        let offset = u16::try_from(offset).map_err(|_| ClassReadError::InvalidOffset(offset))?;
        let stack = delta.apply(&mut locals)?;
        frames.push(ExpandedFrame {
            offset,
            locals: locals.clone(),
            stack,
        });
        previous = Some(offset);
    }
    Ok(frames)
}

/// The inverse of [`expand_frames`]. `frames` must be sorted by offset
/// with no duplicates.
pub fn compress_frames<V: Clone + PartialEq>(
    initial_locals: &[V],
    frames: &[ExpandedFrame<V>],
) -> Vec<(u16, FrameDelta<V>)> {
    let mut previous_locals = initial_locals;
    let mut previous_offset: Option<u16> = None;
    let mut entries = Vec::with_capacity(frames.len());
    for frame in frames {
        let offset_delta = match previous_offset {
            None => frame.offset,
            Some(previous) => frame.offset.wrapping_sub(previous).wrapping_sub(1),
        };
        let delta = FrameDelta::diff(previous_locals, &frame.locals, &frame.stack);
        entries.push((offset_delta, delta));
        previous_locals = &frame.locals;
        previous_offset = Some(frame.offset);
    }
    entries
}

pub(crate) fn read_stack_map_table(
    reader: &mut ByteReader<'_>,
    cp: &ConstantPool,
) -> Result<Vec<(u16, FrameDelta<FrameType>)>, ClassReadError> {
    let count = reader.read_u2()? as usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let frame_type = reader.read_u1()?;
        let entry = match decode_frame_type(frame_type)? {
            FrameTag::Same => (frame_type as u16, FrameDelta::Same),
            FrameTag::SameLocals1StackItem => (
                (frame_type - 64) as u16,
                FrameDelta::SameLocals1StackItem(read_verification_type(reader, cp)?),
            ),
            FrameTag::SameLocals1StackItemExtended => {
                let offset_delta = reader.read_u2()?;
                (
                    offset_delta,
                    FrameDelta::SameLocals1StackItem(read_verification_type(reader, cp)?),
                )
            }
            FrameTag::Chop(count) => (reader.read_u2()?, FrameDelta::Chop(count as usize)),
            FrameTag::SameExtended => (reader.read_u2()?, FrameDelta::Same),
            FrameTag::Append(count) => {
                let offset_delta = reader.read_u2()?;
                let mut locals = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    locals.push(read_verification_type(reader, cp)?);
                }
                (offset_delta, FrameDelta::Append(locals))
            }
            FrameTag::Full => {
                let offset_delta = reader.read_u2()?;
                let locals = read_verification_types(reader, cp)?;
                let stack = read_verification_types(reader, cp)?;
                (offset_delta, FrameDelta::Full { locals, stack })
            }
        };
        entries.push(entry);
    }
    Ok(entries)
}

fn read_verification_types(
    reader: &mut ByteReader<'_>,
    cp: &ConstantPool,
) -> Result<Vec<FrameType>, ClassReadError> {
    let count = reader.read_u2()? as usize;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(read_verification_type(reader, cp)?);
    }
    Ok(values)
}

fn read_verification_type(
    reader: &mut ByteReader<'_>,
    cp: &ConstantPool,
) -> Result<FrameType, ClassReadError> {
    let tag = reader.read_u1()?;
    let value = match tag {
        0 => FrameType::Top,
        1 => FrameType::Integer,
        2 => FrameType::Float,
        3 => FrameType::Double,
        4 => FrameType::Long,
        5 => FrameType::Null,
        6 => FrameType::UninitializedThis,
        7 => FrameType::Object(cp.class_name(reader.read_u2()?)?.to_string()),
        8 => FrameType::Uninitialized(reader.read_u2()?),
        _ => return Err(ClassReadError::InvalidVerificationType(tag)),
    };
    Ok(value)
}

/// Encodes the `StackMapTable` body, choosing the short or extended form of
/// each delta from its offset delta.
pub(crate) fn write_stack_map_table(
    cp: &mut ConstantPoolBuilder,
    entries: &[(u16, FrameDelta<FrameType>)],
) -> Vec<u8> {
    let mut out = Vec::new();
    write_u2(&mut out, entries.len() as u16);
    for (offset_delta, delta) in entries {
        let offset_delta = *offset_delta;
        match delta {
            FrameDelta::Same if offset_delta < 64 => write_u1(&mut out, offset_delta as u8),
            FrameDelta::Same => {
                write_u1(&mut out, 251);
                write_u2(&mut out, offset_delta);
            }
            FrameDelta::SameLocals1StackItem(value) => {
                if offset_delta < 64 {
                    write_u1(&mut out, 64 + offset_delta as u8);
                } else {
                    write_u1(&mut out, 247);
                    write_u2(&mut out, offset_delta);
                }
                write_verification_type(&mut out, cp, value);
            }
            FrameDelta::Chop(count) => {
                write_u1(&mut out, 251 - *count as u8);
                write_u2(&mut out, offset_delta);
            }
            FrameDelta::Append(values) => {
                write_u1(&mut out, 251 + values.len() as u8);
                write_u2(&mut out, offset_delta);
                for value in values {
                    write_verification_type(&mut out, cp, value);
                }
            }
            FrameDelta::Full { locals, stack } => {
                write_u1(&mut out, 255);
                write_u2(&mut out, offset_delta);
                write_u2(&mut out, locals.len() as u16);
                for value in locals {
                    write_verification_type(&mut out, cp, value);
                }
                write_u2(&mut out, stack.len() as u16);
                for value in stack {
                    write_verification_type(&mut out, cp, value);
                }
            }
        }
    }
    out
}

fn write_verification_type(out: &mut Vec<u8>, cp: &mut ConstantPoolBuilder, value: &FrameType) {
    match value {
        FrameType::Top => write_u1(out, 0),
        FrameType::Integer => write_u1(out, 1),
        FrameType::Float => write_u1(out, 2),
        FrameType::Double => write_u1(out, 3),
        FrameType::Long => write_u1(out, 4),
        FrameType::Null => write_u1(out, 5),
        FrameType::UninitializedThis => write_u1(out, 6),
        FrameType::Object(name) => {
            write_u1(out, 7);
            write_u2(out, cp.class(name));
        }
        FrameType::Uninitialized(offset) => {
            write_u1(out, 8);
            write_u2(out, *offset);
        }
    }
}

/// The implicit frame at offset 0 of a method.
pub fn initial_locals(owner: &str, access: u32, name: &str, descriptor: &str) -> Vec<FrameType> {
    let mut locals = Vec::new();
    if access & ACC_STATIC == 0 {
        if name == "<init>" {
            locals.push(FrameType::UninitializedThis);
        } else {
            locals.push(FrameType::Object(owner.to_string()));
        }
    }
    for parameter in parameter_descriptors(descriptor) {
        locals.push(frame_type_of(parameter));
    }
    locals
}

/// Verification type of a value of the given field descriptor.
pub fn frame_type_of(descriptor: &str) -> FrameType {
    match descriptor.as_bytes().first() {
        Some(b'Z' | b'B' | b'C' | b'S' | b'I') => FrameType::Integer,
        Some(b'F') => FrameType::Float,
        Some(b'J') => FrameType::Long,
        Some(b'D') => FrameType::Double,
        Some(b'L') => FrameType::Object(
            descriptor
                .strip_prefix('L')
                .and_then(|d| d.strip_suffix(';'))
                .unwrap_or(descriptor)
                .to_string(),
        ),
        _ => FrameType::Object(descriptor.to_string()),
    }
}

/// Splits the parameter part of a method descriptor into field
/// descriptors.
pub fn parameter_descriptors(descriptor: &str) -> Vec<&str> {
    let mut parameters = Vec::new();
    let Some(rest) = descriptor.strip_prefix('(') else {
        return parameters;
    };
    let bytes = rest.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i] != b')' {
        let start = i;
        while i < bytes.len() && bytes[i] == b'[' {
            i += 1;
        }
        if i < bytes.len() && bytes[i] == b'L' {
            while i < bytes.len() && bytes[i] != b';' {
                i += 1;
            }
        }
        i += 1;
        parameters.push(&rest[start..i.min(bytes.len())]);
    }
    parameters
}

/// The return descriptor of a method descriptor.
pub fn return_descriptor(descriptor: &str) -> &str {
    match descriptor.find(')') {
        Some(index) => &descriptor[index + 1..],
        None => descriptor,
    }
}
