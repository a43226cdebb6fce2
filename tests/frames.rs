mod common;

use classfile_bridge::attribute::AttributeRegistry;
use classfile_bridge::class_reader::{read_class_file, AttributeInfo};
use classfile_bridge::constants::*;
use classfile_bridge::error::Result;
use classfile_bridge::frame::{FrameDelta, FrameType};
use classfile_bridge::node_writer::NodeWriteOptions;
use classfile_bridge::nodes::VerificationType;
use classfile_bridge::opcodes::*;
use classfile_bridge::types::{Frame, FrameValue};
use classfile_bridge::visitor::{ClassVisitor, Label, MethodVisitor};
use classfile_bridge::{
    read_class_node, ClassNodeWriter, ClassWriter, NodeReadOptions, VersionedClassWriter,
};
use pretty_assertions::assert_eq;

use common::{model_events, visitor_events, write_sample};

fn stack_map(bytes: &[u8], method: &str) -> Vec<(u16, FrameDelta<FrameType>)> {
    let class_file = read_class_file(bytes, &AttributeRegistry::new()).unwrap();
    let method = class_file.methods.iter().find(|m| m.name == method).unwrap();
    method
        .attributes
        .iter()
        .find_map(|attr| match attr {
            AttributeInfo::Code(code) => code.stack_map().map(<[_]>::to_vec),
            _ => None,
        })
        .unwrap_or_default()
}

fn nops(mv: &mut dyn MethodVisitor, count: usize) -> Result<()> {
    for _ in 0..count {
        mv.visit_insn(NOP)?;
    }
    Ok(())
}

fn framed(mv: &mut dyn MethodVisitor, frame: Frame) -> Result<()> {
    mv.visit_label(Label::new())?;
    mv.visit_frame(&frame)
}

/// One frame of each encoded kind, with offset deltas on both sides of the
/// short form limit.
fn write_frames(cv: &mut dyn ClassVisitor, major: u16) -> Result<()> {
    cv.visit(major, 0, ACC_PUBLIC, "demo/Frames", None, Some("java/lang/Object"), &[])?;
    if let Some(mut mv) = cv.visit_method(ACC_STATIC, "frames", "()V", None, &[])? {
        let mv = mv.as_mut();
        mv.visit_code()?;
        nops(mv, 63)?;
        framed(mv, Frame::Same)?;
        nops(mv, 65)?;
        framed(mv, Frame::Same)?;
        nops(mv, 64)?;
        framed(mv, Frame::Same1(FrameValue::Integer))?;
        nops(mv, 65)?;
        framed(mv, Frame::Same1(FrameValue::Integer))?;
        nops(mv, 1)?;
        framed(mv, Frame::Append(vec![FrameValue::Integer, FrameValue::Float]))?;
        nops(mv, 1)?;
        framed(mv, Frame::Chop(1))?;
        nops(mv, 1)?;
        framed(
            mv,
            Frame::Full {
                locals: vec![FrameValue::Integer, FrameValue::Long],
                stack: vec![FrameValue::Null],
            },
        )?;
        mv.visit_insn(RETURN)?;
        mv.visit_maxs(1, 3)?;
        mv.visit_end()?;
    }
    cv.visit_end()
}

#[test]
fn explicit_frames_keep_their_encoding() {
    let mut cw = ClassWriter::new(0);
    write_frames(&mut cw, V17).unwrap();
    let from_visitor = cw.to_bytes().unwrap();

    let mut writer = ClassNodeWriter::new();
    write_frames(&mut writer, V17).unwrap();
    let from_model = writer.to_bytes(&NodeWriteOptions::new(0)).unwrap();

    let expected = vec![
        (63, FrameDelta::Same),
        (64, FrameDelta::Same),
        (63, FrameDelta::SameLocals1StackItem(FrameType::Integer)),
        (64, FrameDelta::SameLocals1StackItem(FrameType::Integer)),
        (0, FrameDelta::Append(vec![FrameType::Integer, FrameType::Float])),
        (0, FrameDelta::Chop(1)),
        (
            0,
            FrameDelta::Full {
                locals: vec![FrameType::Integer, FrameType::Long],
                stack: vec![FrameType::Null],
            },
        ),
    ];
    assert_eq!(stack_map(&from_visitor, "frames"), expected);
    assert_eq!(stack_map(&from_model, "frames"), expected);

    let frames = |events: Vec<String>| -> Vec<String> {
        events.into_iter().filter(|event| event.starts_with("frame ")).collect()
    };
    let reported = frames(visitor_events(&from_visitor, 0));
    assert_eq!(
        reported,
        vec![
            "frame same",
            "frame same",
            "frame same1 Integer",
            "frame same1 Integer",
            "frame append [Integer Float]",
            "frame chop 1",
            "frame full [Integer Long] [Null]",
        ]
    );
    assert_eq!(frames(model_events(&from_visitor, 0)), reported);
    assert_eq!(frames(model_events(&from_model, 0)), reported);
}

#[test]
fn expanded_frames_carry_full_locals() {
    let mut cw = ClassWriter::new(0);
    write_frames(&mut cw, V17).unwrap();
    let bytes = cw.to_bytes().unwrap();

    let expanded: Vec<String> = model_events(&bytes, EXPAND_FRAMES)
        .into_iter()
        .filter(|event| event.starts_with("frame "))
        .collect();
    assert_eq!(expanded[0], "frame new [] []");
    assert_eq!(expanded[4], "frame new [Integer Float] []");
    assert_eq!(expanded[5], "frame new [Integer] []");
    let reported: Vec<String> = visitor_events(&bytes, EXPAND_FRAMES)
        .into_iter()
        .filter(|event| event.starts_with("frame "))
        .collect();
    assert_eq!(expanded, reported);
}

fn write_scoped_local(cv: &mut dyn ClassVisitor, major: u16) -> Result<()> {
    cv.visit(major, 0, ACC_PUBLIC, "demo/Scoped", None, Some("java/lang/Object"), &[])?;
    if let Some(mut mv) = cv.visit_method(ACC_STATIC, "scoped", "(Z)V", None, &[])? {
        let assigned = Label::new();
        let done = Label::new();
        mv.visit_code()?;
        mv.visit_insn(ICONST_0)?;
        mv.visit_var_insn(ISTORE, 1)?;
        mv.visit_var_insn(ILOAD, 0)?;
        mv.visit_jump_insn(IFEQ, assigned)?;
        mv.visit_insn(ICONST_1)?;
        mv.visit_var_insn(ISTORE, 1)?;
        mv.visit_label(assigned)?;
        mv.visit_var_insn(ILOAD, 0)?;
        mv.visit_jump_insn(IFEQ, done)?;
        mv.visit_insn(FCONST_0)?;
        mv.visit_var_insn(FSTORE, 1)?;
        mv.visit_label(done)?;
        mv.visit_insn(RETURN)?;
        mv.visit_maxs(0, 0)?;
        mv.visit_end()?;
    }
    cv.visit_end()
}

#[test]
fn computed_frames_append_then_chop_a_scoped_local() {
    let mut writer = VersionedClassWriter::new(COMPUTE_FRAMES);
    write_scoped_local(&mut writer, V25).unwrap();
    let bytes = writer.to_bytes().unwrap();

    assert_eq!(
        stack_map(&bytes, "scoped"),
        vec![(8, FrameDelta::Append(vec![FrameType::Integer])), (5, FrameDelta::Chop(1))]
    );

    let node = read_class_node(&bytes, &NodeReadOptions::new(0)).unwrap();
    let code = node.method("scoped", "(Z)V").unwrap().code.as_ref().unwrap();
    assert_eq!((code.max_stack, code.max_locals), (1, 2));
    assert_eq!(code.frames[0].locals, vec![VerificationType::Integer, VerificationType::Integer]);
    assert_eq!(code.frames[1].locals, vec![VerificationType::Integer]);
}

#[test]
fn computed_frames_for_branches_are_same_frames() {
    let mut writer = VersionedClassWriter::new(COMPUTE_FRAMES);
    write_sample(&mut writer, V25).unwrap();
    let bytes = writer.to_bytes().unwrap();

    assert_eq!(
        stack_map(&bytes, "pick"),
        vec![(24, FrameDelta::Same), (2, FrameDelta::Same), (2, FrameDelta::Same)]
    );
    assert_eq!(
        stack_map(&bytes, "cast"),
        vec![(
            5,
            FrameDelta::SameLocals1StackItem(FrameType::Object(
                "java/lang/ClassCastException".to_string()
            ))
        )]
    );
}
