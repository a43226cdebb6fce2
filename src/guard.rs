//! Child visitors that report their failures to the class being written.

use std::cell::Cell;
use std::rc::Rc;

use crate::attribute::Attribute;
use crate::error::{Error, Result};
use crate::types::{AnnotationValue, Constant, Frame, Handle, TypePath, TypeReference};
use crate::visitor::{
    AnnotationVisitor, FieldVisitor, Label, MethodVisitor, ModuleVisitor, RecordComponentVisitor,
};

type Child<'v> = Result<Option<Box<dyn AnnotationVisitor + 'v>>>;

/// Shared by a class writer and every visitor it hands out. Once set, the
/// class never produces output.
#[derive(Debug, Clone, Default)]
pub(crate) struct FailureFlag(Rc<Cell<bool>>);

impl FailureFlag {
    pub(crate) fn is_set(&self) -> bool {
        self.0.get()
    }

    /// Passes `result` through, remembering an error.
    pub(crate) fn check<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.0.set(true);
        }
        result
    }

    /// Fails once any visit of `class` has failed.
    pub(crate) fn ensure_clear(&self, class: &str) -> Result<()> {
        if self.is_set() {
            return Err(Error::protocol(format!(
                "class {class} has a failed visit and cannot be finished"
            )));
        }
        Ok(())
    }

    pub(crate) fn guard<V: ?Sized>(&self, inner: Box<V>) -> Box<Guarded<V>> {
        Box::new(Guarded {
            failed: self.clone(),
            inner,
        })
    }

    pub(crate) fn child<'v>(&self, result: Child<'v>) -> Child<'v> {
        let child = self.check(result)?;
        Ok(child.map(|inner| self.guard(inner) as Box<dyn AnnotationVisitor + 'v>))
    }
}

/// Forwards every call to `inner` and sets the flag on the first error.
pub(crate) struct Guarded<V: ?Sized> {
    failed: FailureFlag,
    inner: Box<V>,
}

impl<V: AnnotationVisitor + ?Sized> AnnotationVisitor for Guarded<V> {
    fn visit(&mut self, name: Option<&str>, value: &AnnotationValue) -> Result<()> {
        self.failed.check(self.inner.visit(name, value))
    }

    fn visit_enum(&mut self, name: Option<&str>, descriptor: &str, value: &str) -> Result<()> {
        self.failed.check(self.inner.visit_enum(name, descriptor, value))
    }

    fn visit_annotation(&mut self, name: Option<&str>, descriptor: &str) -> Child<'_> {
        self.failed.child(self.inner.visit_annotation(name, descriptor))
    }

    fn visit_array(&mut self, name: Option<&str>) -> Child<'_> {
        self.failed.child(self.inner.visit_array(name))
    }

    fn visit_end(&mut self) -> Result<()> {
        self.failed.check(self.inner.visit_end())
    }
}

impl<V: ModuleVisitor + ?Sized> ModuleVisitor for Guarded<V> {
    fn visit_main_class(&mut self, main_class: &str) -> Result<()> {
        self.failed.check(self.inner.visit_main_class(main_class))
    }

    fn visit_package(&mut self, package: &str) -> Result<()> {
        self.failed.check(self.inner.visit_package(package))
    }

    fn visit_require(&mut self, module: &str, access: u32, version: Option<&str>) -> Result<()> {
        self.failed.check(self.inner.visit_require(module, access, version))
    }

    fn visit_export(&mut self, package: &str, access: u32, modules: &[String]) -> Result<()> {
        self.failed.check(self.inner.visit_export(package, access, modules))
    }

    fn visit_open(&mut self, package: &str, access: u32, modules: &[String]) -> Result<()> {
        self.failed.check(self.inner.visit_open(package, access, modules))
    }

    fn visit_use(&mut self, service: &str) -> Result<()> {
        self.failed.check(self.inner.visit_use(service))
    }

    fn visit_provide(&mut self, service: &str, providers: &[String]) -> Result<()> {
        self.failed.check(self.inner.visit_provide(service, providers))
    }

    fn visit_end(&mut self) -> Result<()> {
        self.failed.check(self.inner.visit_end())
    }
}

impl<V: FieldVisitor + ?Sized> FieldVisitor for Guarded<V> {
    fn visit_annotation(&mut self, descriptor: &str, visible: bool) -> Child<'_> {
        self.failed.child(self.inner.visit_annotation(descriptor, visible))
    }

    fn visit_type_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Child<'_> {
        let child = self.inner.visit_type_annotation(type_ref, type_path, descriptor, visible);
        self.failed.child(child)
    }

    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.failed.check(self.inner.visit_attribute(attribute))
    }

    fn visit_end(&mut self) -> Result<()> {
        self.failed.check(self.inner.visit_end())
    }
}

impl<V: RecordComponentVisitor + ?Sized> RecordComponentVisitor for Guarded<V> {
    fn visit_annotation(&mut self, descriptor: &str, visible: bool) -> Child<'_> {
        self.failed.child(self.inner.visit_annotation(descriptor, visible))
    }

    fn visit_type_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Child<'_> {
        let child = self.inner.visit_type_annotation(type_ref, type_path, descriptor, visible);
        self.failed.child(child)
    }

    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.failed.check(self.inner.visit_attribute(attribute))
    }

    fn visit_end(&mut self) -> Result<()> {
        self.failed.check(self.inner.visit_end())
    }
}

impl<V: MethodVisitor + ?Sized> MethodVisitor for Guarded<V> {
    fn visit_parameter(&mut self, name: Option<&str>, access: u32) -> Result<()> {
        self.failed.check(self.inner.visit_parameter(name, access))
    }

    fn visit_annotation_default(&mut self) -> Child<'_> {
        self.failed.child(self.inner.visit_annotation_default())
    }

    fn visit_annotation(&mut self, descriptor: &str, visible: bool) -> Child<'_> {
        self.failed.child(self.inner.visit_annotation(descriptor, visible))
    }

    fn visit_type_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Child<'_> {
        let child = self.inner.visit_type_annotation(type_ref, type_path, descriptor, visible);
        self.failed.child(child)
    }

    fn visit_annotable_parameter_count(&mut self, count: u8, visible: bool) -> Result<()> {
        self.failed.check(self.inner.visit_annotable_parameter_count(count, visible))
    }

    fn visit_parameter_annotation(
        &mut self,
        parameter: u8,
        descriptor: &str,
        visible: bool,
    ) -> Child<'_> {
        let child = self.inner.visit_parameter_annotation(parameter, descriptor, visible);
        self.failed.child(child)
    }

    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.failed.check(self.inner.visit_attribute(attribute))
    }

    fn visit_code(&mut self) -> Result<()> {
        self.failed.check(self.inner.visit_code())
    }

    fn visit_frame(&mut self, frame: &Frame) -> Result<()> {
        self.failed.check(self.inner.visit_frame(frame))
    }

    fn visit_insn(&mut self, opcode: u8) -> Result<()> {
        self.failed.check(self.inner.visit_insn(opcode))
    }

    fn visit_int_insn(&mut self, opcode: u8, operand: i32) -> Result<()> {
        self.failed.check(self.inner.visit_int_insn(opcode, operand))
    }

    fn visit_var_insn(&mut self, opcode: u8, var: u16) -> Result<()> {
        self.failed.check(self.inner.visit_var_insn(opcode, var))
    }

    fn visit_type_insn(&mut self, opcode: u8, type_name: &str) -> Result<()> {
        self.failed.check(self.inner.visit_type_insn(opcode, type_name))
    }

    fn visit_field_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<()> {
        let result = self.inner.visit_field_insn(opcode, owner, name, descriptor);
        self.failed.check(result)
    }

    fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<()> {
        let result = self.inner.visit_method_insn(opcode, owner, name, descriptor, is_interface);
        self.failed.check(result)
    }

    fn visit_invoke_dynamic_insn(
        &mut self,
        name: &str,
        descriptor: &str,
        bootstrap_method: &Handle,
        bootstrap_arguments: &[Constant],
    ) -> Result<()> {
        let result = self.inner.visit_invoke_dynamic_insn(
            name,
            descriptor,
            bootstrap_method,
            bootstrap_arguments,
        );
        self.failed.check(result)
    }

    fn visit_jump_insn(&mut self, opcode: u8, label: Label) -> Result<()> {
        self.failed.check(self.inner.visit_jump_insn(opcode, label))
    }

    fn visit_label(&mut self, label: Label) -> Result<()> {
        self.failed.check(self.inner.visit_label(label))
    }

    fn visit_ldc_insn(&mut self, value: &Constant) -> Result<()> {
        self.failed.check(self.inner.visit_ldc_insn(value))
    }

    fn visit_iinc_insn(&mut self, var: u16, increment: i16) -> Result<()> {
        self.failed.check(self.inner.visit_iinc_insn(var, increment))
    }

    fn visit_table_switch_insn(
        &mut self,
        min: i32,
        max: i32,
        default: Label,
        labels: &[Label],
    ) -> Result<()> {
        let result = self.inner.visit_table_switch_insn(min, max, default, labels);
        self.failed.check(result)
    }

    fn visit_lookup_switch_insn(
        &mut self,
        default: Label,
        keys: &[i32],
        labels: &[Label],
    ) -> Result<()> {
        let result = self.inner.visit_lookup_switch_insn(default, keys, labels);
        self.failed.check(result)
    }

    fn visit_multi_anew_array_insn(&mut self, descriptor: &str, dimensions: u8) -> Result<()> {
        let result = self.inner.visit_multi_anew_array_insn(descriptor, dimensions);
        self.failed.check(result)
    }

    fn visit_insn_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Child<'_> {
        let child = self.inner.visit_insn_annotation(type_ref, type_path, descriptor, visible);
        self.failed.child(child)
    }

    fn visit_try_catch_block(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> Result<()> {
        let result = self.inner.visit_try_catch_block(start, end, handler, catch_type);
        self.failed.check(result)
    }

    fn visit_try_catch_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Child<'_> {
        let child =
            self.inner.visit_try_catch_annotation(type_ref, type_path, descriptor, visible);
        self.failed.child(child)
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
        let result =
            self.inner.visit_local_variable(name, descriptor, signature, start, end, index);
        self.failed.check(result)
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
    ) -> Child<'_> {
        let child = self.inner.visit_local_variable_annotation(
            type_ref, type_path, start, end, index, descriptor, visible,
        );
        self.failed.child(child)
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<()> {
        self.failed.check(self.inner.visit_line_number(line, start))
    }

    fn visit_code_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.failed.check(self.inner.visit_code_attribute(attribute))
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) -> Result<()> {
        self.failed.check(self.inner.visit_maxs(max_stack, max_locals))
    }

    fn visit_end(&mut self) -> Result<()> {
        self.failed.check(self.inner.visit_end())
    }
}
