//! Annotation plumbing shared by both directions.
//!
//! Annotations themselves have the same shape on both sides; only type
//! paths and code positions differ. Code positions are handled where the
//! labels live, in the reader and writer.

use crate::annotation::{
    Annotation, AnnotationNodeBuilder, TargetInfo, TypeAnnotation, TypePathComponent,
};
use crate::error::Result;
use crate::types::TypePath;
use crate::visitor::AnnotationVisitor;

/// The visitor form of a model type path; an empty path is `None`.
pub fn visitor_type_path(components: &[TypePathComponent]) -> Option<TypePath> {
    if components.is_empty() {
        None
    } else {
        Some(TypePathComponent::to_type_path(components))
    }
}

pub fn model_type_path(path: Option<&TypePath>) -> Result<Vec<TypePathComponent>> {
    match path {
        Some(path) => TypePathComponent::from_type_path(path),
        None => Ok(Vec::new()),
    }
}

/// Replays `annotation` into `visitor`, if the caller wants it.
pub fn accept_annotation(
    annotation: &Annotation,
    visitor: Option<Box<dyn AnnotationVisitor + '_>>,
) -> Result<()> {
    match visitor {
        Some(mut visitor) => annotation.accept(visitor.as_mut()),
        None => Ok(()),
    }
}

/// Appends an annotation to `list` and returns a visitor filling it in.
pub(crate) fn annotation_sink<'v>(
    list: &'v mut Vec<Annotation>,
    descriptor: &str,
) -> Option<Box<dyn AnnotationVisitor + 'v>> {
    list.push(Annotation::new(descriptor));
    let annotation = list.last_mut()?;
    Some(Box::new(AnnotationNodeBuilder::for_annotation(annotation)))
}

pub(crate) fn type_annotation_sink<'v, P>(
    list: &'v mut Vec<TypeAnnotation<P>>,
    target: TargetInfo<P>,
    type_path: Option<&TypePath>,
    descriptor: &str,
) -> Result<Option<Box<dyn AnnotationVisitor + 'v>>> {
    let path = model_type_path(type_path)?;
    list.push(TypeAnnotation {
        target,
        path,
        annotation: Annotation::new(descriptor),
    });
    Ok(list.last_mut().map(|last| {
        Box::new(AnnotationNodeBuilder::for_annotation(&mut last.annotation))
            as Box<dyn AnnotationVisitor + 'v>
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::ElementValue;
    use crate::types::{AnnotationValue, TypeReference};
    use pretty_assertions::assert_eq;

    #[test]
    fn sinks_collect_visited_elements() {
        let mut list: Vec<TypeAnnotation<u16>> = Vec::new();
        let path: TypePath = "[0;".parse().unwrap();
        {
            let field = TypeReference::new(TypeReference::FIELD);
            let target = TargetInfo::from_type_reference(field).unwrap();
            let mut visitor = type_annotation_sink(&mut list, target, Some(&path), "Ldemo/NonNull;")
                .unwrap()
                .unwrap();
            visitor.visit(Some("value"), &AnnotationValue::Int(3)).unwrap();
            visitor.visit_end().unwrap();
        }
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].target, TargetInfo::Field);
        assert_eq!(visitor_type_path(&list[0].path), Some(path));
        assert_eq!(
            list[0].annotation.elements,
            vec![("value".to_string(), ElementValue::from(&AnnotationValue::Int(3)))]
        );
    }

    #[test]
    fn empty_paths_are_absent() {
        assert_eq!(visitor_type_path(&[]), None);
        assert_eq!(model_type_path(None).unwrap(), Vec::new());
    }
}
