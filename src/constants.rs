//! Access flags, attribute names, reader/writer flags and version ceilings.

pub const ACC_PUBLIC: u32 = 0x0001;
pub const ACC_PRIVATE: u32 = 0x0002;
pub const ACC_PROTECTED: u32 = 0x0004;
pub const ACC_STATIC: u32 = 0x0008;
pub const ACC_FINAL: u32 = 0x0010;
pub const ACC_SUPER: u32 = 0x0020;
pub const ACC_SYNCHRONIZED: u32 = 0x0020;
pub const ACC_OPEN: u32 = 0x0020;
pub const ACC_TRANSITIVE: u32 = 0x0020;
pub const ACC_VOLATILE: u32 = 0x0040;
pub const ACC_BRIDGE: u32 = 0x0040;
pub const ACC_STATIC_PHASE: u32 = 0x0040;
pub const ACC_VARARGS: u32 = 0x0080;
pub const ACC_TRANSIENT: u32 = 0x0080;
pub const ACC_NATIVE: u32 = 0x0100;
pub const ACC_INTERFACE: u32 = 0x0200;
pub const ACC_ABSTRACT: u32 = 0x0400;
pub const ACC_STRICT: u32 = 0x0800;
pub const ACC_SYNTHETIC: u32 = 0x1000;
pub const ACC_ANNOTATION: u32 = 0x2000;
pub const ACC_ENUM: u32 = 0x4000;
pub const ACC_MANDATED: u32 = 0x8000;
pub const ACC_MODULE: u32 = 0x8000;

/// Pseudo flag set on classes carrying a `Record` attribute.
pub const ACC_RECORD: u32 = 0x10000;
/// Pseudo flag standing for the `Deprecated` attribute.
pub const ACC_DEPRECATED: u32 = 0x20000;

/// Mask of the flags that are actually written into the class file.
pub(crate) const ACC_CLASS_FILE_MASK: u32 = 0xFFFF;

// Reader flags.
pub const SKIP_CODE: u32 = 0x1;
pub const SKIP_DEBUG: u32 = 0x2;
pub const SKIP_FRAMES: u32 = 0x4;
pub const EXPAND_FRAMES: u32 = 0x8;

// Writer flags.
/// Recompute `max_stack` and `max_locals`, ignoring `visit_maxs`.
pub const COMPUTE_MAXS: u32 = 0x1;
/// Recompute the `StackMapTable`, ignoring `visit_frame`. Implies
/// `COMPUTE_MAXS`.
pub const COMPUTE_FRAMES: u32 = 0x2;

pub const V1_1: u16 = 45;
pub const V1_5: u16 = 49;
pub const V1_6: u16 = 50;
pub const V1_7: u16 = 51;
pub const V1_8: u16 = 52;
pub const V9: u16 = 53;
pub const V11: u16 = 55;
pub const V17: u16 = 61;
pub const V21: u16 = 65;
pub const V22: u16 = 66;
pub const V25: u16 = 69;

/// Highest major version understood by the visitor codec.
pub const VISITOR_CODEC_MAX_MAJOR: u16 = V21;
/// Highest major version understood by the structured codec.
pub const STRUCTURED_CODEC_MAX_MAJOR: u16 = V25;

pub const CLASS_MAGIC: u32 = 0xCAFE_BABE;

pub mod attrs {
    pub const ANNOTATION_DEFAULT: &str = "AnnotationDefault";
    pub const BOOTSTRAP_METHODS: &str = "BootstrapMethods";
    pub const CODE: &str = "Code";
    pub const CONSTANT_VALUE: &str = "ConstantValue";
    pub const DEPRECATED: &str = "Deprecated";
    pub const ENCLOSING_METHOD: &str = "EnclosingMethod";
    pub const EXCEPTIONS: &str = "Exceptions";
    pub const INNER_CLASSES: &str = "InnerClasses";
    pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
    pub const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
    pub const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
    pub const METHOD_PARAMETERS: &str = "MethodParameters";
    pub const MODULE: &str = "Module";
    pub const MODULE_MAIN_CLASS: &str = "ModuleMainClass";
    pub const MODULE_PACKAGES: &str = "ModulePackages";
    pub const NEST_HOST: &str = "NestHost";
    pub const NEST_MEMBERS: &str = "NestMembers";
    pub const PERMITTED_SUBCLASSES: &str = "PermittedSubclasses";
    pub const RECORD: &str = "Record";
    pub const RUNTIME_INVISIBLE_ANNOTATIONS: &str = "RuntimeInvisibleAnnotations";
    pub const RUNTIME_INVISIBLE_PARAMETER_ANNOTATIONS: &str =
        "RuntimeInvisibleParameterAnnotations";
    pub const RUNTIME_INVISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeInvisibleTypeAnnotations";
    pub const RUNTIME_VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";
    pub const RUNTIME_VISIBLE_PARAMETER_ANNOTATIONS: &str = "RuntimeVisibleParameterAnnotations";
    pub const RUNTIME_VISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeVisibleTypeAnnotations";
    pub const SIGNATURE: &str = "Signature";
    pub const SOURCE_DEBUG_EXTENSION: &str = "SourceDebugExtension";
    pub const SOURCE_FILE: &str = "SourceFile";
    pub const STACK_MAP_TABLE: &str = "StackMapTable";
    pub const SYNTHETIC: &str = "Synthetic";
}
