//! Frame conversions.
//!
//! Visitor frames may be compressed deltas against the previous frame;
//! model frames are always fully expanded and bound to a label. Expanding
//! replays deltas over running locals, compressing picks the narrowest
//! kind that reproduces the next frame.

use crate::desc::ClassDesc;
use crate::error::{Error, Result};
use crate::frame::FrameDelta;
use crate::insn::LabelNode;
use crate::nodes::VerificationType;
use crate::types::{Frame, FrameValue};
use crate::visitor::Label;

pub fn to_model_verification_type(
    value: &FrameValue,
    label: &mut impl FnMut(Label) -> LabelNode,
) -> VerificationType {
    match value {
        FrameValue::Top => VerificationType::Top,
        FrameValue::Integer => VerificationType::Integer,
        FrameValue::Float => VerificationType::Float,
        FrameValue::Double => VerificationType::Double,
        FrameValue::Long => VerificationType::Long,
        FrameValue::Null => VerificationType::Null,
        FrameValue::UninitializedThis => VerificationType::UninitializedThis,
        FrameValue::Object(name) => VerificationType::Object(ClassDesc::of_internal_name(name)),
        FrameValue::Uninitialized(new) => VerificationType::Uninitialized(label(*new)),
    }
}

pub fn to_visitor_frame_value(
    value: &VerificationType,
    label: &mut impl FnMut(LabelNode) -> Label,
) -> FrameValue {
    match value {
        VerificationType::Top => FrameValue::Top,
        VerificationType::Integer => FrameValue::Integer,
        VerificationType::Float => FrameValue::Float,
        VerificationType::Double => FrameValue::Double,
        VerificationType::Long => FrameValue::Long,
        VerificationType::Null => FrameValue::Null,
        VerificationType::UninitializedThis => FrameValue::UninitializedThis,
        VerificationType::Object(class) => FrameValue::Object(class.internal_name().to_string()),
        VerificationType::Uninitialized(new) => FrameValue::Uninitialized(label(*new)),
    }
}

fn to_delta(frame: &Frame) -> FrameDelta<FrameValue> {
    match frame.clone() {
        Frame::New { locals, stack } | Frame::Full { locals, stack } => {
            FrameDelta::Full { locals, stack }
        }
        Frame::Append(values) => FrameDelta::Append(values),
        Frame::Chop(count) => FrameDelta::Chop(count),
        Frame::Same => FrameDelta::Same,
        Frame::Same1(value) => FrameDelta::SameLocals1StackItem(value),
    }
}

fn to_frame(delta: FrameDelta<FrameValue>) -> Frame {
    match delta {
        FrameDelta::Same => Frame::Same,
        FrameDelta::SameLocals1StackItem(value) => Frame::Same1(value),
        FrameDelta::Chop(count) => Frame::Chop(count),
        FrameDelta::Append(values) => Frame::Append(values),
        FrameDelta::Full { locals, stack } => Frame::Full { locals, stack },
    }
}

/// Running locals of a method's frames, starting from the implicit frame.
#[derive(Debug, Clone, Default)]
pub struct FrameExpander {
    locals: Vec<FrameValue>,
}

impl FrameExpander {
    pub fn new(initial: Vec<FrameValue>) -> Self {
        Self { locals: initial }
    }

    pub fn locals(&self) -> &[FrameValue] {
        &self.locals
    }

    /// Applies `frame` and returns the full locals and stack it describes.
    pub fn expand(&mut self, frame: &Frame) -> Result<(Vec<FrameValue>, Vec<FrameValue>)> {
        let stack = to_delta(frame)
            .apply(&mut self.locals)
            .map_err(|err| {
                Error::protocol(format!("frame does not apply to the previous frame: {err}"))
            })?;
        Ok((self.locals.clone(), stack))
    }

    /// The narrowest frame turning the running locals into `locals`.
    pub fn compress(&mut self, locals: Vec<FrameValue>, stack: Vec<FrameValue>) -> Frame {
        let delta = FrameDelta::diff(&self.locals, &locals, &stack);
        self.locals = locals;
        to_frame(delta)
    }
}
