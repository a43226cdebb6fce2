mod common;

use std::sync::Arc;

use classfile_bridge::attribute::{
    Attribute, AttributePayload, AttributePrototype, AttributeRegistry,
};
use classfile_bridge::backend::read_class_with_registry;
use classfile_bridge::constants::*;
use classfile_bridge::error::{Error, Result};
use classfile_bridge::visitor::ClassVisitor;
use classfile_bridge::{read_class, Backend, VersionedClassWriter};
use pretty_assertions::assert_eq;

use common::write_sample;

/// Reads `demo.Custom` bodies as their byte sum.
#[derive(Debug)]
struct Checksum;

impl AttributePrototype for Checksum {
    fn decode(&self, info: &[u8]) -> Result<AttributePayload> {
        Ok(Arc::new(info.iter().map(|byte| *byte as u32).sum::<u32>()))
    }

    fn encode(&self, payload: &AttributePayload) -> Result<Vec<u8>> {
        let sum = payload
            .downcast_ref::<u32>()
            .ok_or_else(|| Error::ProtocolViolation("not a checksum".to_string()))?;
        Ok(vec![*sum as u8])
    }
}

#[derive(Default)]
struct ClassAttributes(Vec<Attribute>);

impl ClassVisitor for ClassAttributes {
    fn visit_attribute(&mut self, attribute: &Attribute) -> Result<()> {
        self.0.push(attribute.clone());
        Ok(())
    }
}

fn sample(major: u16) -> Vec<u8> {
    let mut writer = VersionedClassWriter::new(COMPUTE_FRAMES);
    write_sample(&mut writer, major).unwrap();
    writer.to_bytes().unwrap()
}

#[test]
fn unknown_attributes_keep_their_bytes_on_both_backends() {
    for (major, backend) in [(V17, Backend::VisitorCodec), (V25, Backend::StructuredCodec)] {
        let mut attributes = ClassAttributes::default();
        assert_eq!(read_class(&sample(major), &mut attributes, 0).unwrap(), backend);
        assert_eq!(attributes.0, vec![Attribute::raw("demo.Custom", vec![1, 2, 3])]);
    }
}

#[test]
fn registered_prototypes_apply_on_both_backends() {
    for major in [V17, V25] {
        let mut registry = AttributeRegistry::new();
        registry.register("demo.Custom", Arc::new(Checksum));
        let mut attributes = ClassAttributes::default();
        read_class_with_registry(&sample(major), registry, &mut attributes, 0).unwrap();

        assert_eq!(attributes.0.len(), 1);
        assert_eq!(attributes.0[0].payload::<u32>(), Some(&6));
        assert_eq!(attributes.0[0].encode().unwrap(), vec![6]);
    }
}

#[test]
fn decoded_attributes_are_written_through_their_prototype() {
    let mut registry = AttributeRegistry::new();
    registry.register("demo.Custom", Arc::new(Checksum));
    let mut attributes = ClassAttributes::default();
    read_class_with_registry(&sample(V25), registry, &mut attributes, 0).unwrap();

    let mut writer = VersionedClassWriter::new(0);
    writer
        .visit(V25, 0, ACC_PUBLIC, "demo/Copy", None, Some("java/lang/Object"), &[])
        .unwrap();
    writer.visit_attribute(&attributes.0[0]).unwrap();
    writer.visit_end().unwrap();

    let mut reread = ClassAttributes::default();
    read_class(&writer.to_bytes().unwrap(), &mut reread, 0).unwrap();
    assert_eq!(reread.0, vec![Attribute::raw("demo.Custom", vec![6])]);
}
