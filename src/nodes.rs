use std::sync::Arc;

use crate::annotation::{Annotation, ElementValue, TypeAnnotation};
use crate::attribute::Attribute;
use crate::constant_pool::ConstantPoolSnapshot;
use crate::desc::{ClassDesc, ConstantDesc};
use crate::insn::{CodeElement, LabelNode};

/// A class in the structured model.
///
/// `access` holds the class file flags plus the pseudo flags
/// [`ACC_RECORD`](crate::constants::ACC_RECORD) and
/// [`ACC_DEPRECATED`](crate::constants::ACC_DEPRECATED), which stand for the
/// `Record` and `Deprecated` attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassNode {
    pub major_version: u16,
    pub minor_version: u16,
    pub access: u32,
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub signature: Option<String>,
    pub source_file: Option<String>,
    pub source_debug: Option<String>,
    pub module: Option<ModuleNode>,
    pub nest_host: Option<String>,
    pub outer_class: Option<OuterClassNode>,
    pub visible_annotations: Vec<Annotation>,
    pub invisible_annotations: Vec<Annotation>,
    pub visible_type_annotations: Vec<TypeAnnotation>,
    pub invisible_type_annotations: Vec<TypeAnnotation>,
    pub nest_members: Vec<String>,
    pub permitted_subclasses: Vec<String>,
    pub inner_classes: Vec<InnerClassNode>,
    pub record_components: Vec<RecordComponentNode>,
    pub fields: Vec<FieldNode>,
    pub methods: Vec<MethodNode>,
    /// Attributes with no dedicated field, in class file order.
    pub attributes: Vec<Attribute>,
    /// The constant pool of the parsed class, if any. Writers seed their
    /// pool from it so unchanged entries keep their indices.
    pub constant_pool: Option<Arc<ConstantPoolSnapshot>>,
}

impl ClassNode {
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodNode> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    pub fn field(&self, name: &str) -> Option<&FieldNode> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleNode {
    pub name: String,
    pub access: u32,
    pub version: Option<String>,
    pub main_class: Option<String>,
    pub packages: Vec<String>,
    pub requires: Vec<ModuleRequireNode>,
    pub exports: Vec<ModuleExportNode>,
    pub opens: Vec<ModuleExportNode>,
    pub uses: Vec<String>,
    pub provides: Vec<ModuleProvideNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRequireNode {
    pub module: String,
    pub access: u32,
    pub version: Option<String>,
}

/// An `exports` or `opens` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleExportNode {
    pub package: String,
    pub access: u32,
    pub modules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleProvideNode {
    pub service: String,
    pub providers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClassNode {
    pub name: String,
    pub outer_name: Option<String>,
    pub inner_name: Option<String>,
    pub access: u32,
}

/// The `EnclosingMethod` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OuterClassNode {
    pub owner: String,
    pub method_name: Option<String>,
    pub method_descriptor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordComponentNode {
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
    pub visible_annotations: Vec<Annotation>,
    pub invisible_annotations: Vec<Annotation>,
    pub visible_type_annotations: Vec<TypeAnnotation>,
    pub invisible_type_annotations: Vec<TypeAnnotation>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldNode {
    pub access: u32,
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
    /// The `ConstantValue` attribute.
    pub value: Option<ConstantDesc>,
    pub visible_annotations: Vec<Annotation>,
    pub invisible_annotations: Vec<Annotation>,
    pub visible_type_annotations: Vec<TypeAnnotation>,
    pub invisible_type_annotations: Vec<TypeAnnotation>,
    pub attributes: Vec<Attribute>,
}

/// An entry of the `MethodParameters` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterNode {
    pub name: Option<String>,
    pub access: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodNode {
    pub access: u32,
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
    pub exceptions: Vec<String>,
    pub parameters: Vec<ParameterNode>,
    pub annotation_default: Option<ElementValue>,
    pub visible_annotations: Vec<Annotation>,
    pub invisible_annotations: Vec<Annotation>,
    pub visible_type_annotations: Vec<TypeAnnotation>,
    pub invisible_type_annotations: Vec<TypeAnnotation>,
    /// One list per annotable parameter. `None` when the method has no
    /// such attribute.
    pub visible_parameter_annotations: Option<Vec<Vec<Annotation>>>,
    pub invisible_parameter_annotations: Option<Vec<Vec<Annotation>>>,
    pub attributes: Vec<Attribute>,
    /// `None` for abstract and native methods.
    pub code: Option<CodeNode>,
}

/// A method body. Labels are allocated per body by [`CodeNode::new_label`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeNode {
    pub max_stack: u16,
    pub max_locals: u16,
    pub elements: Vec<CodeElement>,
    pub try_catch_blocks: Vec<TryCatchBlockNode>,
    pub local_variables: Vec<LocalVariableNode>,
    pub local_variable_types: Vec<LocalVariableTypeNode>,
    pub frames: Vec<FrameNode>,
    pub visible_type_annotations: Vec<TypeAnnotation>,
    pub invisible_type_annotations: Vec<TypeAnnotation>,
    pub attributes: Vec<Attribute>,
    pub(crate) next_label: u32,
}

impl CodeNode {
    pub fn new_label(&mut self) -> LabelNode {
        let label = LabelNode(self.next_label);
        self.next_label += 1;
        label
    }

    pub fn label_count(&self) -> u32 {
        self.next_label
    }

    pub fn instructions(&self) -> impl Iterator<Item = &crate::insn::Insn> {
        self.elements.iter().filter_map(|element| match element {
            CodeElement::Insn(insn) => Some(insn),
            _ => None,
        })
    }

    /// The frame bound to `label`, if any.
    pub fn frame_at(&self, label: LabelNode) -> Option<&FrameNode> {
        self.frames.iter().find(|frame| frame.label == label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryCatchBlockNode {
    pub start: LabelNode,
    pub end: LabelNode,
    pub handler: LabelNode,
    /// `None` catches everything.
    pub catch_type: Option<ClassDesc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableNode {
    pub name: String,
    pub descriptor: String,
    pub start: LabelNode,
    pub end: LabelNode,
    pub slot: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableTypeNode {
    pub name: String,
    pub signature: String,
    pub start: LabelNode,
    pub end: LabelNode,
    pub slot: u16,
}

/// A verification type of an explicit frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object(ClassDesc),
    /// Bound to the label of the `new` instruction.
    Uninitialized(LabelNode),
}

/// A fully expanded stack map frame at `label`. Long and double values are
/// single entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameNode {
    pub label: LabelNode,
    pub locals: Vec<VerificationType>,
    pub stack: Vec<VerificationType>,
}
