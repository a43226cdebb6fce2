//! Nominal descriptors used by the structured model.

use std::fmt;

/// A class, interface, array or primitive type, held as a field
/// descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassDesc {
    descriptor: String,
}

impl ClassDesc {
    pub fn of_descriptor(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
        }
    }

    /// `java/lang/String` becomes `Ljava/lang/String;`; array names such
    /// as `[I` already are descriptors.
    pub fn of_internal_name(internal_name: &str) -> Self {
        if internal_name.starts_with('[') {
            Self::of_descriptor(internal_name)
        } else {
            Self::of_descriptor(format!("L{internal_name};"))
        }
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// The inverse of [`ClassDesc::of_internal_name`].
    pub fn internal_name(&self) -> &str {
        if self.is_array() {
            return &self.descriptor;
        }
        self.descriptor
            .strip_prefix('L')
            .and_then(|s| s.strip_suffix(';'))
            .unwrap_or(&self.descriptor)
    }

    pub fn is_array(&self) -> bool {
        self.descriptor.starts_with('[')
    }

    pub fn is_primitive(&self) -> bool {
        self.descriptor.len() == 1
    }

    pub fn component_type(&self) -> Option<ClassDesc> {
        self.descriptor.strip_prefix('[').map(ClassDesc::of_descriptor)
    }

    pub fn array_type(&self) -> ClassDesc {
        ClassDesc::of_descriptor(format!("[{}", self.descriptor))
    }
}

impl fmt::Display for ClassDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor)
    }
}

/// The nine kinds of direct method handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodHandleKind {
    Getter,
    StaticGetter,
    Setter,
    StaticSetter,
    Virtual,
    Static,
    InterfaceStatic,
    Special,
    InterfaceSpecial,
    Constructor,
    InterfaceVirtual,
}

impl MethodHandleKind {
    /// Maps a `reference_kind` and the interface bit of the referenced
    /// member to a kind. Returns `None` for tags outside 1 to 9.
    pub fn from_ref_kind(reference_kind: u8, is_interface: bool) -> Option<Self> {
        let kind = match (reference_kind, is_interface) {
            (1, _) => MethodHandleKind::Getter,
            (2, _) => MethodHandleKind::StaticGetter,
            (3, _) => MethodHandleKind::Setter,
            (4, _) => MethodHandleKind::StaticSetter,
            (5, _) => MethodHandleKind::Virtual,
            (6, false) => MethodHandleKind::Static,
            (6, true) => MethodHandleKind::InterfaceStatic,
            (7, false) => MethodHandleKind::Special,
            (7, true) => MethodHandleKind::InterfaceSpecial,
            (8, _) => MethodHandleKind::Constructor,
            (9, _) => MethodHandleKind::InterfaceVirtual,
            _ => return None,
        };
        Some(kind)
    }

    pub fn ref_kind(&self) -> u8 {
        match self {
            MethodHandleKind::Getter => 1,
            MethodHandleKind::StaticGetter => 2,
            MethodHandleKind::Setter => 3,
            MethodHandleKind::StaticSetter => 4,
            MethodHandleKind::Virtual => 5,
            MethodHandleKind::Static | MethodHandleKind::InterfaceStatic => 6,
            MethodHandleKind::Special | MethodHandleKind::InterfaceSpecial => 7,
            MethodHandleKind::Constructor => 8,
            MethodHandleKind::InterfaceVirtual => 9,
        }
    }

    pub fn is_interface(&self) -> bool {
        matches!(
            self,
            MethodHandleKind::InterfaceStatic
                | MethodHandleKind::InterfaceSpecial
                | MethodHandleKind::InterfaceVirtual
        )
    }
}

/// A method handle that refers directly to a field, method or constructor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectMethodHandleDesc {
    pub kind: MethodHandleKind,
    pub owner: ClassDesc,
    pub name: String,
    /// A field descriptor for getters and setters, otherwise a method
    /// descriptor.
    pub descriptor: String,
}

/// A dynamically-computed constant.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicConstantDesc {
    pub bootstrap: DirectMethodHandleDesc,
    pub name: String,
    pub ty: ClassDesc,
    pub args: Vec<ConstantDesc>,
}

/// An `invokedynamic` call site.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicCallSiteDesc {
    pub bootstrap: DirectMethodHandleDesc,
    pub name: String,
    pub descriptor: String,
    pub args: Vec<ConstantDesc>,
}

/// A loadable constant in the structured model.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantDesc {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Class(ClassDesc),
    MethodType(String),
    MethodHandle(DirectMethodHandleDesc),
    Dynamic(Box<DynamicConstantDesc>),
}

impl ConstantDesc {
    pub fn is_wide(&self) -> bool {
        match self {
            ConstantDesc::Long(_) | ConstantDesc::Double(_) => true,
            ConstantDesc::Dynamic(dynamic) => matches!(dynamic.ty.descriptor(), "J" | "D"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_names_and_descriptors() {
        let string = ClassDesc::of_internal_name("java/lang/String");
        assert_eq!(string.descriptor(), "Ljava/lang/String;");
        assert_eq!(string.internal_name(), "java/lang/String");

        let array = ClassDesc::of_internal_name("[Ljava/lang/Object;");
        assert!(array.is_array());
        assert_eq!(array.internal_name(), "[Ljava/lang/Object;");
        assert_eq!(
            array.component_type(),
            Some(ClassDesc::of_descriptor("Ljava/lang/Object;"))
        );
    }

    #[test]
    fn handle_kinds_follow_interface_bit() {
        assert_eq!(
            MethodHandleKind::from_ref_kind(6, true),
            Some(MethodHandleKind::InterfaceStatic)
        );
        assert_eq!(MethodHandleKind::from_ref_kind(7, false), Some(MethodHandleKind::Special));
        assert_eq!(MethodHandleKind::from_ref_kind(10, false), None);
        assert_eq!(MethodHandleKind::from_ref_kind(0, false), None);
        for tag in 1..=9 {
            let kind = MethodHandleKind::from_ref_kind(tag, false).unwrap();
            assert_eq!(kind.ref_kind(), tag);
        }
    }
}
