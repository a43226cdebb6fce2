//! Picks a codec by class file version.
//!
//! The visitor codec handles versions up to [`VISITOR_CODEC_MAX_MAJOR`].
//! Newer classes up to [`STRUCTURED_CODEC_MAX_MAJOR`] go through the
//! structured codec and the bridge, which keeps the visitor API the same
//! for callers.

use crate::attribute::{Attribute, AttributeRegistry};
use crate::bridge::{ClassNodeReader, ClassNodeWriter};
use crate::bytes::ByteReader;
use crate::class_reader::ClassReader;
use crate::class_writer::ClassWriter;
use crate::constants::*;
use crate::error::{ClassReadError, Error, Result};
use crate::hierarchy::HierarchyResolver;
use crate::node_reader::{read_class_node, NodeReadOptions};
use crate::node_writer::NodeWriteOptions;
use crate::types::{Constant, TypePath, TypeReference};
use crate::visitor::{
    AnnotationVisitor, ClassVisitor, FieldVisitor, MethodVisitor, ModuleVisitor,
    RecordComponentVisitor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    VisitorCodec,
    StructuredCodec,
}

impl Backend {
    /// The newest major version this backend handles.
    pub fn ceiling(&self) -> u16 {
        match self {
            Backend::VisitorCodec => VISITOR_CODEC_MAX_MAJOR,
            Backend::StructuredCodec => STRUCTURED_CODEC_MAX_MAJOR,
        }
    }
}

/// Checks the magic number and returns `(major, minor)`.
pub fn peek_version(bytes: &[u8]) -> Result<(u16, u16)> {
    let mut reader = ByteReader::new(bytes);
    let magic = reader.read_u4()?;
    if magic != CLASS_MAGIC {
        return Err(ClassReadError::InvalidMagic(magic).into());
    }
    let minor = reader.read_u2()?;
    let major = reader.read_u2()?;
    Ok((major, minor))
}

pub fn select_backend(major: u16) -> Result<Backend> {
    if major <= VISITOR_CODEC_MAX_MAJOR {
        Ok(Backend::VisitorCodec)
    } else if major <= STRUCTURED_CODEC_MAX_MAJOR {
        Ok(Backend::StructuredCodec)
    } else {
        Err(Error::UnsupportedVersion {
            major,
            ceiling: STRUCTURED_CODEC_MAX_MAJOR,
        })
    }
}

/// Reports the class in `bytes` to `visitor` through whichever codec
/// handles its version, and returns that codec.
///
/// ```
/// use classfile_bridge::backend::{read_class, Backend};
/// use classfile_bridge::class_writer::ClassWriter;
/// use classfile_bridge::constants::{ACC_PUBLIC, V17};
/// use classfile_bridge::visitor::ClassVisitor;
///
/// # fn main() -> classfile_bridge::error::Result<()> {
/// let mut cw = ClassWriter::new(0);
/// cw.visit(V17, 0, ACC_PUBLIC, "demo/Old", None, Some("java/lang/Object"), &[])?;
/// cw.visit_end()?;
/// let bytes = cw.to_bytes()?;
///
/// let mut sink = ClassWriter::new(0);
/// assert_eq!(read_class(&bytes, &mut sink, 0)?, Backend::VisitorCodec);
/// # Ok(())
/// # }
/// ```
pub fn read_class(bytes: &[u8], visitor: &mut dyn ClassVisitor, flags: u32) -> Result<Backend> {
    read_class_with_registry(bytes, AttributeRegistry::new(), visitor, flags)
}

/// [`read_class`] with custom attribute prototypes.
pub fn read_class_with_registry(
    bytes: &[u8],
    registry: AttributeRegistry,
    visitor: &mut dyn ClassVisitor,
    flags: u32,
) -> Result<Backend> {
    let (major, _) = peek_version(bytes)?;
    let backend = select_backend(major)?;
    log::debug!("reading class file version {major} with the {backend:?} backend");
    match backend {
        Backend::VisitorCodec => ClassReader::new(bytes)
            .with_attribute_registry(registry)
            .accept(visitor, flags)?,
        Backend::StructuredCodec => {
            let options = NodeReadOptions::new(flags).with_attribute_registry(registry);
            let node = read_class_node(bytes, &options)?;
            ClassNodeReader::new(&node).accept(visitor, flags)?;
        }
    }
    Ok(backend)
}

enum Selected {
    Unselected,
    Visitor(ClassWriter),
    Structured(ClassNodeWriter, NodeWriteOptions),
}

/// A [`ClassVisitor`] that writes through the codec chosen for the class
/// version.
///
/// The choice is made by [`for_version`](Self::for_version) or by the
/// first `visit` call and holds until the writer is dropped.
pub struct VersionedClassWriter {
    flags: u32,
    resolver: Option<Box<dyn HierarchyResolver>>,
    state: Selected,
}

impl VersionedClassWriter {
    /// `flags` is a combination of [`COMPUTE_MAXS`] and [`COMPUTE_FRAMES`].
    pub fn new(flags: u32) -> Self {
        Self {
            flags,
            resolver: None,
            state: Selected::Unselected,
        }
    }

    /// A writer with the backend for `major` already chosen.
    pub fn for_version(major: u16, flags: u32) -> Result<Self> {
        let mut writer = Self::new(flags);
        writer.select(major)?;
        Ok(writer)
    }

    pub fn with_hierarchy_resolver(mut self, resolver: impl HierarchyResolver + 'static) -> Self {
        self.state = match std::mem::replace(&mut self.state, Selected::Unselected) {
            Selected::Visitor(cw) => Selected::Visitor(cw.with_boxed_resolver(Box::new(resolver))),
            Selected::Structured(writer, options) => {
                Selected::Structured(writer, options.with_boxed_resolver(Box::new(resolver)))
            }
            Selected::Unselected => {
                self.resolver = Some(Box::new(resolver));
                Selected::Unselected
            }
        };
        self
    }

    pub fn backend(&self) -> Option<Backend> {
        match self.state {
            Selected::Unselected => None,
            Selected::Visitor(_) => Some(Backend::VisitorCodec),
            Selected::Structured(..) => Some(Backend::StructuredCodec),
        }
    }

    /// The finished class file. Fails before `visit_end`.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match &self.state {
            Selected::Unselected => Err(Error::protocol("to_bytes called before visit")),
            Selected::Visitor(cw) => cw.to_bytes(),
            Selected::Structured(writer, options) => writer.to_bytes(options),
        }
    }

    fn select(&mut self, major: u16) -> Result<()> {
        let backend = select_backend(major)?;
        log::debug!("writing class file version {major} with the {backend:?} backend");
        self.state = match backend {
            Backend::VisitorCodec => {
                let mut cw = ClassWriter::new(self.flags);
                if let Some(resolver) = self.resolver.take() {
                    cw = cw.with_boxed_resolver(resolver);
                }
                Selected::Visitor(cw)
            }
            Backend::StructuredCodec => {
                let mut options = NodeWriteOptions::new(self.flags);
                if let Some(resolver) = self.resolver.take() {
                    options = options.with_boxed_resolver(resolver);
                }
                Selected::Structured(ClassNodeWriter::new(), options)
            }
        };
        Ok(())
    }

    fn target(&mut self) -> Result<&mut dyn ClassVisitor> {
        match &mut self.state {
            Selected::Unselected => Err(Error::protocol("class element visited before visit")),
            Selected::Visitor(cw) => Ok(cw),
            Selected::Structured(writer, _) => Ok(writer),
        }
    }
}

impl ClassVisitor for VersionedClassWriter {
    fn visit(
        &mut self,
        major: u16,
        minor: u16,
        access: u32,
        name: &str,
        signature: Option<&str>,
        super_name: Option<&str>,
        interfaces: &[String],
    ) -> Result<()> {
        if let Selected::Unselected = self.state {
            self.select(major)?;
        }
        self.target()?
            .visit(major, minor, access, name, signature, super_name, interfaces)
    }

    fn visit_source(&mut self, source: Option<&str>, debug: Option<&str>) -> Result<()> {
        self.target()?.visit_source(source, debug)
    }

    fn visit_module(
        &mut self,
        name: &str,
        access: u32,
        version: Option<&str>,
    ) -> Result<Option<Box<dyn ModuleVisitor + '_>>> {
        self.target()?.visit_module(name, access, version)
    }

    fn visit_nest_host(&mut self, nest_host: &str) -> Result<()> {
        self.target()?.visit_nest_host(nest_host)
    }

    fn visit_outer_class(
        &mut self,
        owner: &str,
        name: Option<&str>,
        descriptor: Option<&str>,
    ) -> Result<()> {
        self.target()?.visit_outer_class(owner, name, descriptor)
    }

    fn visit_annotation(
        &mut self,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        self.target()?.visit_annotation(descriptor, visible)
    }

    fn visit_type_annotation(
        &mut self,
        type_ref: TypeReference,
        type_path: Option<&TypePath>,
        descriptor: &str,
        visible: bool,
    ) -> Result<Option<Box<dyn AnnotationVisitor + '_>>> {
        self.target()?
            .visit_type_annotation(type_ref, type_path, descriptor, visible)
    }

    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.target()?.visit_attribute(attribute)
    }

    fn visit_nest_member(&mut self, nest_member: &str) -> Result<()> {
        self.target()?.visit_nest_member(nest_member)
    }

    fn visit_permitted_subclass(&mut self, permitted_subclass: &str) -> Result<()> {
        self.target()?.visit_permitted_subclass(permitted_subclass)
    }

    fn visit_inner_class(
        &mut self,
        name: &str,
        outer_name: Option<&str>,
        inner_name: Option<&str>,
        access: u32,
    ) -> Result<()> {
        self.target()?.visit_inner_class(name, outer_name, inner_name, access)
    }

    fn visit_record_component(
        &mut self,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
    ) -> Result<Option<Box<dyn RecordComponentVisitor + '_>>> {
        self.target()?.visit_record_component(name, descriptor, signature)
    }

    fn visit_field(
        &mut self,
        access: u32,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        value: Option<&Constant>,
    ) -> Result<Option<Box<dyn FieldVisitor + '_>>> {
        self.target()?.visit_field(access, name, descriptor, signature, value)
    }

    fn visit_method(
        &mut self,
        access: u32,
        name: &str,
        descriptor: &str,
        signature: Option<&str>,
        exceptions: &[String],
    ) -> Result<Option<Box<dyn MethodVisitor + '_>>> {
        self.target()?
            .visit_method(access, name, descriptor, signature, exceptions)
    }

    fn visit_end(&mut self) -> Result<()> {
        self.target()?.visit_end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::*;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Versions(Vec<u16>);

    impl ClassVisitor for Versions {
        fn visit(
            &mut self,
            major: u16,
            _minor: u16,
            _access: u32,
            _name: &str,
            _signature: Option<&str>,
            _super_name: Option<&str>,
            _interfaces: &[String],
        ) -> Result<()> {
            self.0.push(major);
            Ok(())
        }
    }

    fn hello(writer: &mut dyn ClassVisitor, major: u16) -> Result<()> {
        writer.visit(major, 0, ACC_PUBLIC, "demo/Hello", None, Some("java/lang/Object"), &[])?;
        let access = ACC_PUBLIC | ACC_STATIC;
        if let Some(mut mv) = writer.visit_method(access, "run", "()V", None, &[])? {
            mv.visit_code()?;
            mv.visit_insn(RETURN)?;
            mv.visit_maxs(0, 0)?;
            mv.visit_end()?;
        }
        writer.visit_end()
    }

    #[test]
    fn backends_split_at_the_ceilings() {
        assert_eq!(select_backend(V1_1).unwrap(), Backend::VisitorCodec);
        assert_eq!(select_backend(65).unwrap(), Backend::VisitorCodec);
        assert_eq!(select_backend(66).unwrap(), Backend::StructuredCodec);
        assert_eq!(select_backend(69).unwrap(), Backend::StructuredCodec);
        assert!(matches!(
            select_backend(70),
            Err(Error::UnsupportedVersion { major: 70, ceiling: 69 })
        ));
        assert_eq!(Backend::VisitorCodec.ceiling(), 65);
    }

    #[test]
    fn probing_checks_the_magic() {
        let bytes = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x03, 0x00, 0x45];
        assert_eq!(peek_version(&bytes).unwrap(), (69, 3));
        assert!(matches!(
            peek_version(&[0xCA, 0xFE, 0xD0, 0x0D, 0, 0, 0, 0x34]),
            Err(Error::MalformedInput(ClassReadError::InvalidMagic(0xCAFE_D00D)))
        ));
        assert!(peek_version(&[0xCA, 0xFE]).is_err());
    }

    #[test]
    fn writer_selects_on_first_visit() {
        for (major, backend) in [(V21, Backend::VisitorCodec), (V25, Backend::StructuredCodec)] {
            let mut writer = VersionedClassWriter::new(COMPUTE_FRAMES);
            assert_eq!(writer.backend(), None);
            hello(&mut writer, major).unwrap();
            assert_eq!(writer.backend(), Some(backend));
            let bytes = writer.to_bytes().unwrap();
            assert_eq!(peek_version(&bytes).unwrap(), (major, 0));

            let mut versions = Versions::default();
            assert_eq!(read_class(&bytes, &mut versions, 0).unwrap(), backend);
            assert_eq!(versions.0, vec![major]);
        }
    }

    #[test]
    fn writer_never_switches_backends() {
        let mut writer = VersionedClassWriter::for_version(V21, 0).unwrap();
        assert!(matches!(
            hello(&mut writer, V22),
            Err(Error::UnsupportedVersion { major: 66, .. })
        ));
        assert_eq!(writer.backend(), Some(Backend::VisitorCodec));
    }

    #[test]
    fn calls_before_visit_are_rejected() {
        let mut writer = VersionedClassWriter::new(0);
        assert!(matches!(
            writer.visit_source(Some("A.java"), None),
            Err(Error::ProtocolViolation(_))
        ));
        assert!(writer.to_bytes().is_err());
        assert!(matches!(
            writer.visit(V25 + 1, 0, ACC_PUBLIC, "demo/Next", None, None, &[]),
            Err(Error::UnsupportedVersion { major: 70, .. })
        ));
    }
}
