//! The visitor protocol.
//!
//! A class is streamed as an ordered sequence of calls. Every method has a
//! no-op default so implementations only override what they consume. A
//! method returning `Ok(None)` for a child visitor tells the caller to skip
//! that element.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::attribute::Attribute;
use crate::error::Result;
use crate::types::{AnnotationValue, Constant, Frame, Handle, TypePath, TypeReference};

static NEXT_LABEL_ID: AtomicU32 = AtomicU32::new(0);

/// A position in the code of a method.
///
/// Labels are identity tokens: two labels are equal only when one is a
/// copy of the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    id: u32,
}

impl Label {
    pub fn new() -> Self {
        Self {
            id: NEXT_LABEL_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Default for Label {
    fn default() -> Self {
        Self::new()
    }
}

pub trait ClassVisitor {
    #[allow(clippy::too_many_arguments)]
    fn visit(
        &mut self,
        _major: u16,
        _minor: u16,
        _access: u32,
        _name: &str,
        _signature: Option<&str>,
        _super_name: Option<&str>,
        _interfaces: &[String],
    ) -> Result<()> {
        Ok(())
    }

    fn visit_source(&mut self, _source: Option<&str>, _debug: Option<&str>) -> Result<()> {
        Ok(())
    }

    fn visit_module(
        &mut self,
        _name: &str,
        _access: u32,
        _version: Option<&str>,
    ) -> Result<Option<Box<dyn ModuleVisitor + '_>>> {
        Ok(None)
    }

    fn visit_nest_host(&mut self, _nest_host: &str) -> Result<()> {
        Ok(())
    }

    fn visit_outer_class(
        &mut self,
        _owner: &str,
        _name: Option<&str>,
        _descriptor: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_annotation(
        &mut self,
        _descriptor: &str,
        _visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(None)
    }

    fn visit_type_annotation(
        &mut self,
        _type_ref: TypeReference,
        _type_path: Option<&TypePath>,
        _descriptor: &str,
        _visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(None)
    }

    fn visit_attribute(&mut self, _attribute: &Attribute) -> Result<()> {
        Ok(())
    }

    fn visit_nest_member(&mut self, _nest_member: &str) -> Result<()> {
        Ok(())
    }

    fn visit_permitted_subclass(&mut self, _permitted_subclass: &str) -> Result<()> {
        Ok(())
    }

    fn visit_inner_class(
        &mut self,
        _name: &str,
        _outer_name: Option<&str>,
        _inner_name: Option<&str>,
        _access: u32,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_record_component(
        &mut self,
        _name: &str,
        _descriptor: &str,
        _signature: Option<&str>,
    ) -> Result<Option<Box<dyn RecordComponentVisitor + '_>>> {
        Ok(None)
    }

    fn visit_field(
        &mut self,
        _access: u32,
        _name: &str,
        _descriptor: &str,
        _signature: Option<&str>,
        _value: Option<&Constant>,
    ) -> Result<Option<Box<dyn FieldVisitor + '_>>> {
        Ok(None)
    }

    fn visit_method(
        &mut self,
        _access: u32,
        _name: &str,
        _descriptor: &str,
        _signature: Option<&str>,
        _exceptions: &[String],
    ) -> Result<Option<Box<dyn MethodVisitor + '_>>> {
        Ok(None)
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait ModuleVisitor {
    fn visit_main_class(&mut self, _main_class: &str) -> Result<()> {
        Ok(())
    }

    fn visit_package(&mut self, _package: &str) -> Result<()> {
        Ok(())
    }

    fn visit_require(&mut self, _module: &str, _access: u32, _version: Option<&str>) -> Result<()> {
        Ok(())
    }

    fn visit_export(&mut self, _package: &str, _access: u32, _modules: &[String]) -> Result<()> {
        Ok(())
    }

    fn visit_open(&mut self, _package: &str, _access: u32, _modules: &[String]) -> Result<()> {
        Ok(())
    }

    fn visit_use(&mut self, _service: &str) -> Result<()> {
        Ok(())
    }

    fn visit_provide(&mut self, _service: &str, _providers: &[String]) -> Result<()> {
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait AnnotationVisitor {
    /// Visits a primitive, string or class value, or a primitive array.
    /// `name` is `None` inside arrays.
    fn visit(&mut self, _name: Option<&str>, _value: &AnnotationValue) -> Result<()> {
        Ok(())
    }

    fn visit_enum(&mut self, _name: Option<&str>, _descriptor: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn visit_annotation(
        &mut self,
        _name: Option<&str>,
        _descriptor: &str,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(None)
    }

    fn visit_array(
        &mut self,
        _name: Option<&str>,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(None)
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait FieldVisitor {
    fn visit_annotation(
        &mut self,
        _descriptor: &str,
        _visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(None)
    }

    fn visit_type_annotation(
        &mut self,
        _type_ref: TypeReference,
        _type_path: Option<&TypePath>,
        _descriptor: &str,
        _visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(None)
    }

    fn visit_attribute(&mut self, _attribute: &Attribute) -> Result<()> {
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait RecordComponentVisitor {
    fn visit_annotation(
        &mut self,
        _descriptor: &str,
        _visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(None)
    }

    fn visit_type_annotation(
        &mut self,
        _type_ref: TypeReference,
        _type_path: Option<&TypePath>,
        _descriptor: &str,
        _visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(None)
    }

    fn visit_attribute(&mut self, _attribute: &Attribute) -> Result<()> {
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait MethodVisitor {
    fn visit_parameter(&mut self, _name: Option<&str>, _access: u32) -> Result<()> {
        Ok(())
    }

    fn visit_annotation_default(&mut self) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(None)
    }

    fn visit_annotation(
        &mut self,
        _descriptor: &str,
        _visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(None)
    }

    fn visit_type_annotation(
        &mut self,
        _type_ref: TypeReference,
        _type_path: Option<&TypePath>,
        _descriptor: &str,
        _visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(None)
    }

    fn visit_annotable_parameter_count(&mut self, _count: u8, _visible: bool) -> Result<()> {
        Ok(())
    }

    fn visit_parameter_annotation(
        &mut self,
        _parameter: u8,
        _descriptor: &str,
        _visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(None)
    }

    fn visit_attribute(&mut self, _attribute: &Attribute) -> Result<()> {
        Ok(())
    }

    fn visit_code(&mut self) -> Result<()> {
        Ok(())
    }

    fn visit_frame(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }

    fn visit_insn(&mut self, _opcode: u8) -> Result<()> {
        Ok(())
    }

    /// `BIPUSH`, `SIPUSH` or `NEWARRAY`.
    fn visit_int_insn(&mut self, _opcode: u8, _operand: i32) -> Result<()> {
        Ok(())
    }

    fn visit_var_insn(&mut self, _opcode: u8, _var: u16) -> Result<()> {
        Ok(())
    }

    /// `NEW`, `ANEWARRAY`, `CHECKCAST` or `INSTANCEOF` with an internal name.
    fn visit_type_insn(&mut self, _opcode: u8, _type_name: &str) -> Result<()> {
        Ok(())
    }

    fn visit_field_insn(
        &mut self,
        _opcode: u8,
        _owner: &str,
        _name: &str,
        _descriptor: &str,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_method_insn(
        &mut self,
        _opcode: u8,
        _owner: &str,
        _name: &str,
        _descriptor: &str,
        _is_interface: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_invoke_dynamic_insn(
        &mut self,
        _name: &str,
        _descriptor: &str,
        _bootstrap_method: &Handle,
        _bootstrap_arguments: &[Constant],
    ) -> Result<()> {
        Ok(())
    }

    fn visit_jump_insn(&mut self, _opcode: u8, _label: Label) -> Result<()> {
        Ok(())
    }

    fn visit_label(&mut self, _label: Label) -> Result<()> {
        Ok(())
    }

    fn visit_ldc_insn(&mut self, _value: &Constant) -> Result<()> {
        Ok(())
    }

    fn visit_iinc_insn(&mut self, _var: u16, _increment: i16) -> Result<()> {
        Ok(())
    }

    fn visit_table_switch_insn(
        &mut self,
        _min: i32,
        _max: i32,
        _default: Label,
        _labels: &[Label],
    ) -> Result<()> {
        Ok(())
    }

    fn visit_lookup_switch_insn(
        &mut self,
        _default: Label,
        _keys: &[i32],
        _labels: &[Label],
    ) -> Result<()> {
        Ok(())
    }

    fn visit_multi_anew_array_insn(&mut self, _descriptor: &str, _dimensions: u8) -> Result<()> {
        Ok(())
    }

    /// Visits a type annotation on the instruction visited just before.
    fn visit_insn_annotation(
        &mut self,
        _type_ref: TypeReference,
        _type_path: Option<&TypePath>,
        _descriptor: &str,
        _visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(None)
    }

    fn visit_try_catch_block(
        &mut self,
        _start: Label,
        _end: Label,
        _handler: Label,
        _catch_type: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    fn visit_try_catch_annotation(
        &mut self,
        _type_ref: TypeReference,
        _type_path: Option<&TypePath>,
        _descriptor: &str,
        _visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(None)
    }

    #[allow(clippy::too_many_arguments)]
    fn visit_local_variable(
        &mut self,
        _name: &str,
        _descriptor: &str,
        _signature: Option<&str>,
        _start: Label,
        _end: Label,
        _index: u16,
    ) -> Result<()> {
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn visit_local_variable_annotation(
        &mut self,
        _type_ref: TypeReference,
        _type_path: Option<&TypePath>,
        _start: &[Label],
        _end: &[Label],
        _index: &[u16],
        _descriptor: &str,
        _visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        Ok(None)
    }

    fn visit_line_number(&mut self, _line: u16, _start: Label) -> Result<()> {
        Ok(())
    }

    /// Visits a non-standard attribute of the `Code` attribute.
    fn visit_code_attribute(&mut self, _attribute: &Attribute) -> Result<()> {
        Ok(())
    }

    fn visit_maxs(&mut self, _max_stack: u16, _max_locals: u16) -> Result<()> {
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_identity_tokens() {
        let a = Label::new();
        let b = Label::new();
        let copy = a;
        assert_ne!(a, b);
        assert_eq!(a, copy);
        assert!(b.id() > a.id());
    }
}
